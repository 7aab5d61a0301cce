use std::fmt;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use tree_sitter::{ParseOptions, ParseState, Parser, Tree};

use crate::error::TimelapseError;
use crate::language::LangId;

/// Why a structural parse produced no usable tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailure {
    Unsupported,
    SyntaxError,
    Timeout,
    Failed,
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unsupported => "unsupported language",
            Self::SyntaxError => "syntax error",
            Self::Timeout => "parse timeout",
            Self::Failed => "parser failure",
        };
        f.write_str(s)
    }
}

/// Detect the language of `path`.
pub fn detect_language(path: &str) -> Result<LangId, TimelapseError> {
    LangId::from_path(Utf8Path::new(path))
}

/// Parse `source`, cancelling the parse once `timeout` has elapsed.
///
/// A tree with error nodes counts as a syntax error.
pub fn parse_bounded(source: &str, lang_id: LangId, timeout: Duration) -> Result<Tree, ParseFailure> {
    let mut parser = Parser::new();
    parser
        .set_language(&lang_id.ts_language())
        .map_err(|_| ParseFailure::Failed)?;

    // An unrepresentable deadline means no deadline.
    let deadline = Instant::now().checked_add(timeout);
    let mut expired = false;
    let mut progress = |_: &ParseState| {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            expired = true;
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    };
    let bytes = source.as_bytes();
    let tree = parser.parse_with_options(
        &mut |offset, _| &bytes[offset.min(bytes.len())..],
        None,
        Some(ParseOptions::new().progress_callback(&mut progress)),
    );

    match tree {
        Some(tree) if tree.root_node().has_error() => Err(ParseFailure::SyntaxError),
        Some(tree) => Ok(tree),
        None if expired => Err(ParseFailure::Timeout),
        None => Err(ParseFailure::Failed),
    }
}
