//! Output payloads and their flat CSV twins.

use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;

use super::cochange::{CouplingEdge, VelocityBucket};
use super::commit::{Commit, FileTouch};
use super::metrics::{ChurnFile, Mix, Optimization, ReworkPoint, Throughput};
use super::quality::QualityFlag;
use super::quality::FlagKind;
use super::session::{
    AgentSource, AttributionStatus, CommitAttribution, ContextScope, LazyCommitLink, PromptAssessment, Session,
    SessionTotals,
};
use super::symbol::{ExtractionMethod, Symbol, SymbolTouch};
use super::window::{TimeWindow, WindowRow, format_utc, serialize_ts};
use crate::engine::lazy::PromptLintSummary;

pub const SCHEMA_VERSION: &str = "v0.1";
pub const SOURCE_SYSTEM: &str = "git+agent-sessions";

pub fn collector_version() -> String {
    format!("timelapse/{}", env!("CARGO_PKG_VERSION"))
}

/// Provenance fields shared by every payload.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub schema_version: &'static str,
    pub collector_version: String,
    #[serde(serialize_with = "serialize_ts")]
    pub generated_at: OffsetDateTime,
    pub source_system: &'static str,
    pub window: WindowRow,
    pub quality_flags: Vec<QualityFlag>,
}

impl Envelope {
    pub fn new(generated_at: OffsetDateTime, window: &TimeWindow, quality_flags: Vec<QualityFlag>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            collector_version: collector_version(),
            generated_at,
            source_system: SOURCE_SYSTEM,
            window: WindowRow::from(window),
            quality_flags,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report<T> {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(flatten)]
    pub body: T,
}

/// A flat CSV row. `HEADER` names its serialized fields in order, so an
/// empty file still carries the schema.
pub trait CsvRecord: Serialize {
    const HEADER: &'static [&'static str];
}

/// A payload body with a one-row-per-event CSV rendition.
pub trait CsvTwin {
    type Row: CsvRecord;

    fn csv_rows(&self) -> Vec<Self::Row>;
}

fn join(items: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    items.into_iter().map(|s| s.as_ref().to_string()).collect::<Vec<_>>().join("|")
}

/// Join enum values by their serialized names.
fn join_names<T: Serialize>(items: &[T]) -> String {
    join(items.iter().filter_map(|item| match serde_json::to_value(item) {
        Ok(serde_json::Value::String(name)) => Some(name),
        _ => None,
    }))
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitRow {
    pub sha: String,
    pub repo: String,
    #[serde(rename = "ts", serialize_with = "serialize_ts")]
    pub timestamp: OffsetDateTime,
    pub subject: String,
    pub parent_count: usize,
    pub merge_commit: bool,
    pub insertions: u64,
    pub deletions: u64,
    pub is_binary_numstat: bool,
    pub files: Vec<String>,
}

impl From<&Commit> for CommitRow {
    fn from(c: &Commit) -> Self {
        Self {
            sha: c.sha.clone(),
            repo: c.repo.clone(),
            timestamp: c.timestamp,
            subject: c.subject.clone(),
            parent_count: c.parent_count,
            merge_commit: c.is_merge,
            insertions: c.insertions,
            deletions: c.deletions,
            is_binary_numstat: c.is_binary_numstat,
            files: c.files().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoBody {
    pub repos: Vec<String>,
    pub throughput: Throughput,
    pub mix: Mix,
    pub optimization: Optimization,
    pub top_churn_files: Vec<ChurnFile>,
    pub rework_series: Vec<ReworkPoint>,
    pub top_coupling: Vec<CouplingEdge>,
    pub commits: Vec<CommitRow>,
    pub commit_attribution: Vec<CommitAttribution>,
    pub lazy_commit_links: Vec<LazyCommitLink>,
}

#[derive(Debug, Serialize)]
pub struct CommitCsvRow {
    pub sha: String,
    pub repo: String,
    pub ts: String,
    pub subject: String,
    pub parent_count: usize,
    pub merge_commit: bool,
    pub insertions: u64,
    pub deletions: u64,
    pub is_binary_numstat: bool,
    pub files: String,
    pub session_id: Option<String>,
    pub lag_hours: Option<f64>,
}

impl CsvRecord for CommitCsvRow {
    const HEADER: &'static [&'static str] = &[
        "sha",
        "repo",
        "ts",
        "subject",
        "parent_count",
        "merge_commit",
        "insertions",
        "deletions",
        "is_binary_numstat",
        "files",
        "session_id",
        "lag_hours",
    ];
}

impl CsvTwin for RepoBody {
    type Row = CommitCsvRow;

    fn csv_rows(&self) -> Vec<CommitCsvRow> {
        let attribution: BTreeMap<&str, &CommitAttribution> =
            self.commit_attribution.iter().map(|r| (r.sha.as_str(), r)).collect();
        self.commits
            .iter()
            .map(|c| {
                let row = attribution.get(c.sha.as_str());
                CommitCsvRow {
                    sha: c.sha.clone(),
                    repo: c.repo.clone(),
                    ts: format_utc(c.timestamp),
                    subject: c.subject.clone(),
                    parent_count: c.parent_count,
                    merge_commit: c.merge_commit,
                    insertions: c.insertions,
                    deletions: c.deletions,
                    is_binary_numstat: c.is_binary_numstat,
                    files: join(&c.files),
                    session_id: row.and_then(|r| r.session_id.clone()),
                    lag_hours: row.and_then(|r| r.lag_hours),
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileTouchRow {
    pub sha: String,
    #[serde(rename = "ts", serialize_with = "serialize_ts")]
    pub timestamp: OffsetDateTime,
    pub path: String,
    pub insertions: u64,
    pub deletions: u64,
    pub binary: bool,
    pub renamed_from: Option<String>,
}

impl FileTouchRow {
    pub fn new(commit: &Commit, touch: &FileTouch) -> Self {
        Self {
            sha: touch.sha.clone(),
            timestamp: commit.timestamp,
            path: touch.path.clone(),
            insertions: touch.insertions,
            deletions: touch.deletions,
            binary: touch.binary,
            renamed_from: touch.renamed_from.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileBody {
    pub repo: String,
    pub file: String,
    pub summary: ChurnFile,
    pub retouch_ratio: f64,
    pub coupling: Vec<CouplingEdge>,
    pub velocity: Vec<VelocityBucket>,
    pub touches: Vec<FileTouchRow>,
}

#[derive(Debug, Serialize)]
pub struct FileTouchCsvRow {
    pub repo: String,
    pub sha: String,
    pub ts: String,
    pub file: String,
    pub insertions: u64,
    pub deletions: u64,
    pub binary: bool,
    pub renamed_from: Option<String>,
}

impl CsvRecord for FileTouchCsvRow {
    const HEADER: &'static [&'static str] = &[
        "repo",
        "sha",
        "ts",
        "file",
        "insertions",
        "deletions",
        "binary",
        "renamed_from",
    ];
}

impl CsvTwin for FileBody {
    type Row = FileTouchCsvRow;

    fn csv_rows(&self) -> Vec<FileTouchCsvRow> {
        self.touches
            .iter()
            .map(|t| FileTouchCsvRow {
                repo: self.repo.clone(),
                sha: t.sha.clone(),
                ts: format_utc(t.timestamp),
                file: t.path.clone(),
                insertions: t.insertions,
                deletions: t.deletions,
                binary: t.binary,
                renamed_from: t.renamed_from.clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SymbolBody {
    pub repo: String,
    pub file: String,
    /// Extraction method → number of symbol touches it produced.
    pub extraction: BTreeMap<ExtractionMethod, usize>,
    pub symbols: Vec<Symbol>,
    pub symbol_touches: Vec<SymbolTouch>,
}

#[derive(Debug, Serialize)]
pub struct SymbolTouchCsvRow {
    pub repo: String,
    pub sha: String,
    pub ts: String,
    pub file: String,
    pub symbol_id: String,
    pub symbol_display: String,
    pub touches: u64,
    pub added: u64,
    pub deleted: u64,
    pub churn: u64,
    pub extractor: ExtractionMethod,
    pub flags: String,
}

impl CsvRecord for SymbolTouchCsvRow {
    const HEADER: &'static [&'static str] = &[
        "repo",
        "sha",
        "ts",
        "file",
        "symbol_id",
        "symbol_display",
        "touches",
        "added",
        "deleted",
        "churn",
        "extractor",
        "flags",
    ];
}

impl CsvTwin for SymbolBody {
    type Row = SymbolTouchCsvRow;

    fn csv_rows(&self) -> Vec<SymbolTouchCsvRow> {
        self.symbol_touches
            .iter()
            .map(|t| SymbolTouchCsvRow {
                repo: t.repo.clone(),
                sha: t.sha.clone(),
                ts: format_utc(t.timestamp),
                file: t.file.clone(),
                symbol_id: t.symbol_id.clone(),
                symbol_display: t.symbol_display.clone(),
                touches: t.touches,
                added: t.added,
                deleted: t.deleted,
                churn: t.churn,
                extractor: t.extractor,
                flags: join_names(&t.flags),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub repo: String,
    pub source: AgentSource,
    pub path: Option<String>,
    pub previous_session_id: Option<String>,
    #[serde(serialize_with = "serialize_ts")]
    pub start: OffsetDateTime,
    #[serde(serialize_with = "serialize_ts")]
    pub end: OffsetDateTime,
    pub working_set: Vec<String>,
}

impl From<&Session> for SessionInfo {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.id.clone(),
            repo: s.repo.clone(),
            source: s.source,
            path: s.path.clone(),
            previous_session_id: s.previous_session_id.clone(),
            start: s.start,
            end: s.end,
            working_set: s.working_set.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionBody {
    pub session: SessionInfo,
    pub totals: SessionTotals,
    pub prompts: Vec<PromptAssessment>,
    pub commit_attribution: Vec<CommitAttribution>,
    pub top_files: Vec<ChurnFile>,
}

#[derive(Debug, Serialize)]
pub struct AttributionCsvRow {
    pub sha: String,
    pub repo: String,
    pub ts: String,
    pub subject: String,
    pub insertions: u64,
    pub deletions: u64,
    pub files: String,
    pub status: AttributionStatus,
    pub session_id: Option<String>,
    pub lag_hours: Option<f64>,
    pub flag: Option<FlagKind>,
    pub nearest_prompt_text: Option<String>,
}

impl CsvRecord for AttributionCsvRow {
    const HEADER: &'static [&'static str] = &[
        "sha",
        "repo",
        "ts",
        "subject",
        "insertions",
        "deletions",
        "files",
        "status",
        "session_id",
        "lag_hours",
        "flag",
        "nearest_prompt_text",
    ];
}

impl From<&CommitAttribution> for AttributionCsvRow {
    fn from(r: &CommitAttribution) -> Self {
        Self {
            sha: r.sha.clone(),
            repo: r.repo.clone(),
            ts: format_utc(r.timestamp),
            subject: r.subject.clone(),
            insertions: r.insertions,
            deletions: r.deletions,
            files: join(&r.files),
            status: r.status,
            session_id: r.session_id.clone(),
            lag_hours: r.lag_hours,
            flag: r.flag,
            nearest_prompt_text: r.nearest_prompt_text.clone(),
        }
    }
}

impl CsvTwin for SessionBody {
    type Row = AttributionCsvRow;

    fn csv_rows(&self) -> Vec<AttributionCsvRow> {
        self.commit_attribution.iter().map(AttributionCsvRow::from).collect()
    }
}

// ---------------------------------------------------------------------------
// Prompt lint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PromptBody {
    pub summary: PromptLintSummary,
    pub prompts: Vec<PromptAssessment>,
}

#[derive(Debug, Serialize)]
pub struct PromptCsvRow {
    pub session_id: String,
    pub repo: String,
    pub source: AgentSource,
    pub ts: String,
    pub lazy: bool,
    pub lazy_score: u32,
    pub reasons: String,
    pub context_scope: ContextScope,
    pub context_turns_considered: usize,
    pub text: String,
}

impl CsvRecord for PromptCsvRow {
    const HEADER: &'static [&'static str] = &[
        "session_id",
        "repo",
        "source",
        "ts",
        "lazy",
        "lazy_score",
        "reasons",
        "context_scope",
        "context_turns_considered",
        "text",
    ];
}

impl CsvTwin for PromptBody {
    type Row = PromptCsvRow;

    fn csv_rows(&self) -> Vec<PromptCsvRow> {
        self.prompts
            .iter()
            .map(|p| PromptCsvRow {
                session_id: p.session_id.clone(),
                repo: p.repo.clone(),
                source: p.source,
                ts: format_utc(p.timestamp),
                lazy: p.lazy,
                lazy_score: p.lazy_score,
                reasons: join_names(&p.reasons),
                context_scope: p.context_scope,
                context_turns_considered: p.context_turns_considered,
                text: p.text.clone(),
            })
            .collect()
    }
}
