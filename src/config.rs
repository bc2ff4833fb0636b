//! Decompiler-wide options threaded through `driver::decompile_all`. Kept as
//! one flat struct per `original_source/SmxDecompiler/decompiler-options.h`'s
//! options block rather than splitting into per-stage config types, since
//! every field here is a user-facing CLI flag and nothing downstream reads
//! it outside the driver.

/// How aggressively to recognize string-literal data references in the
/// `data` section when printing a constant operand. `None` never guesses;
/// `Heuristic` matches the original's printable-ASCII-run check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringDetection {
    #[default]
    None,
    Heuristic,
}

#[derive(Debug, Clone, Default)]
pub struct DecompilerOptions {
    /// Only decompile functions whose name contains this substring.
    pub function_filter: Option<String>,
    pub print_globals: bool,
    pub print_assembly: bool,
    pub print_il: bool,
    pub string_detection: StringDetection,
}

impl DecompilerOptions {
    pub fn matches(&self, function_name: &str) -> bool {
        match &self.function_filter {
            Some(filter) => function_name.contains(filter.as_str()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_matches_everything() {
        let opts = DecompilerOptions::default();
        assert!(opts.matches("AnyFunction"));
    }

    #[test]
    fn filter_restricts_to_substring_match() {
        let mut opts = DecompilerOptions::default();
        opts.function_filter = Some("OnPlayer".into());
        assert!(opts.matches("OnPlayerSpawn"));
        assert!(!opts.matches("OnMapStart"));
    }
}
