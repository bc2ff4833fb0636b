//! Error taxonomy per the error handling design: fatal CFG/decode errors
//! propagate with `?`; type and fixer issues are collected as warnings and
//! never abort the containing function's decompilation.

use thiserror::Error;

use crate::cell::Cell;

/// Fatal errors from CFG construction (`spec.md` §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CfgError {
    #[error("unknown opcode 0x{opcode:x} at pc {pc:?}")]
    DecodeError { pc: Cell, opcode: i32 },

    #[error("truncated operand for opcode at pc {pc:?}")]
    TruncatedOperand { pc: Cell },

    #[error("branch target {target:?} does not align with any leader")]
    InvalidCfg { target: Cell },

    #[error("entry instruction at {pc:?} is not PROC")]
    MissingProcEntry { pc: Cell },

    #[error("dominance computation did not converge within {iterations} iterations")]
    DominanceDidNotConverge { iterations: usize },
}

/// Non-fatal warning: a variable reference could not be typed from metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrecoverableType {
    pub node_desc: String,
}

/// Non-fatal warning: a code-fixer pass found an idiom that didn't match
/// exactly and left the IL unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedPattern {
    pub pass: &'static str,
    pub detail: String,
}

/// Accumulated non-fatal diagnostics for one function's decompilation.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticSink {
    pub unrecoverable_types: Vec<UnrecoverableType>,
    pub unsupported_patterns: Vec<UnsupportedPattern>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn_unrecoverable_type(&mut self, node_desc: impl Into<String>) {
        let w = UnrecoverableType {
            node_desc: node_desc.into(),
        };
        log::warn!("unrecoverable type for {}", w.node_desc);
        self.unrecoverable_types.push(w);
    }

    pub fn warn_unsupported_pattern(&mut self, pass: &'static str, detail: impl Into<String>) {
        let w = UnsupportedPattern {
            pass,
            detail: detail.into(),
        };
        log::debug!("{}: unsupported pattern: {}", w.pass, w.detail);
        self.unsupported_patterns.push(w);
    }

    pub fn is_clean(&self) -> bool {
        self.unrecoverable_types.is_empty() && self.unsupported_patterns.is_empty()
    }
}

/// Fatal errors parsing the SMX container itself (ambient, not part of the
/// core spec's testable properties).
#[derive(Debug, Error)]
pub enum SmxParseError {
    #[error("not an SMX file: bad magic")]
    BadMagic,

    #[error("unsupported compression scheme {0}")]
    UnsupportedCompression(u8),

    #[error("truncated file: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("section {0:?} missing or malformed")]
    MalformedSection(&'static str),

    #[error("rtti data reference out of bounds at offset {0}")]
    RttiOutOfBounds(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
