use serde::Serialize;
use std::collections::BTreeSet;

/// Every degraded or skipped condition the engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    MalformedLogEntry,
    BinaryNumstatPresent,
    MergeSkipped,
    SymbolFallbackHeader,
    SymbolUnresolved,
    SymbolRemoved,
    RenameOnly,
    ParseTimeout,
    SourceUnavailable,
    OversizedChangeset,
    NoCommitsForFile,
    MalformedSessionLine,
    MissingTimestamp,
    InvalidTimestamp,
    NoUserPrompts,
    NoPrecedingPrompt,
    LagExceedsMax,
    NoCandidateSession,
}

/// A data-quality event attached to whatever produced it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct QualityFlag {
    pub flag: FlagKind,
    pub context: String,
}

impl QualityFlag {
    pub fn new(flag: FlagKind, context: impl Into<String>) -> Self {
        Self {
            flag,
            context: context.into(),
        }
    }
}

/// Ordered, de-duplicated flag collection used for payload `quality_flags`.
#[derive(Debug, Clone, Default)]
pub struct QualityLog {
    flags: BTreeSet<QualityFlag>,
}

impl QualityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, flag: QualityFlag) {
        self.flags.insert(flag);
    }

    pub fn record(&mut self, kind: FlagKind, context: impl Into<String>) {
        self.push(QualityFlag::new(kind, context));
    }

    pub fn extend(&mut self, flags: impl IntoIterator<Item = QualityFlag>) {
        self.flags.extend(flags);
    }

    pub fn contains(&self, kind: FlagKind) -> bool {
        self.flags.iter().any(|f| f.flag == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn into_vec(self) -> Vec<QualityFlag> {
        self.flags.into_iter().collect()
    }
}
