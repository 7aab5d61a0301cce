use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::quality::FlagKind;
use super::window::serialize_ts;

/// Pseudo-symbol for changed lines outside every definition.
pub const MODULE_SYMBOL: &str = "<module>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Trait,
    Constant,
    Module,
    Type,
}

/// How a symbol touch was attributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    TreeSitter,
    HeaderFallback,
    HunkHeader,
}

impl ExtractionMethod {
    pub fn is_fallback(self) -> bool {
        !matches!(self, Self::TreeSitter)
    }
}

/// A definition's line extent (1-indexed, inclusive) within one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolSpan {
    /// Dot-qualified name, e.g. `Parser.parse_args`.
    pub name: String,
    pub kind: SymbolKind,
    pub start_line: usize,
    pub end_line: usize,
}

impl SymbolSpan {
    pub fn contains(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    pub fn len(&self) -> usize {
        self.end_line + 1 - self.start_line
    }

    pub fn is_empty(&self) -> bool {
        self.end_line < self.start_line
    }
}

/// Deterministic symbol id: first 16 hex chars of BLAKE3(`path` NUL `qualified_name`).
pub fn symbol_id(path: &str, qualified_name: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.as_bytes());
    hasher.update(&[0]);
    hasher.update(qualified_name.as_bytes());
    let hex = hasher.finalize().to_hex();
    hex[..16].to_string()
}

/// One commit's edit to one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolTouch {
    pub repo: String,
    pub sha: String,
    #[serde(rename = "ts", serialize_with = "serialize_ts")]
    pub timestamp: OffsetDateTime,
    pub file: String,
    pub symbol_id: String,
    pub symbol_display: String,
    pub touches: u64,
    pub added: u64,
    pub deleted: u64,
    pub churn: u64,
    pub extractor: ExtractionMethod,
    pub flags: Vec<FlagKind>,
}

impl SymbolTouch {
    pub fn has_flag(&self, flag: FlagKind) -> bool {
        self.flags.contains(&flag)
    }
}

/// Per-symbol aggregate over its touches in the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Symbol {
    pub symbol_id: String,
    pub symbol_display: String,
    pub file: String,
    pub touches: u64,
    pub added: u64,
    pub deleted: u64,
    pub churn: u64,
    #[serde(serialize_with = "serialize_ts")]
    pub first_touch: OffsetDateTime,
    #[serde(serialize_with = "serialize_ts")]
    pub last_touch: OffsetDateTime,
    /// Mean gap between consecutive touches; absent below two touches.
    pub avg_gap_days: Option<f64>,
    /// The last touch removed the symbol from the file.
    pub removed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_id_is_stable_and_path_scoped() {
        let a = symbol_id("src/cli.py", "parse_args");
        assert_eq!(a, symbol_id("src/cli.py", "parse_args"));
        assert_eq!(a.len(), 16);
        assert_ne!(a, symbol_id("src/other.py", "parse_args"));
        assert_ne!(a, symbol_id("src/cli.py", "Parser.parse_args"));
    }

    #[test]
    fn span_bounds_are_inclusive() {
        let span = SymbolSpan {
            name: "f".into(),
            kind: SymbolKind::Function,
            start_line: 3,
            end_line: 5,
        };
        assert!(span.contains(3) && span.contains(5));
        assert!(!span.contains(6));
        assert_eq!(span.len(), 3);
    }
}
