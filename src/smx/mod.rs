//! SMX metadata: the compiled-script container (functions, natives, globals,
//! RTTI type records) that the CFG builder, lifter, and typer read from.

mod parse;
mod types;

pub use parse::parse_image;
pub use types::*;

impl SmxImage {
    /// Parses an in-memory SMX file, rejecting gzip-compressed images.
    pub fn from_bytes(bytes: &[u8]) -> Result<SmxImage, crate::error::SmxParseError> {
        parse_image(bytes)
    }
}
