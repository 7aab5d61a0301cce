use serde::Serialize;
use std::collections::BTreeSet;
use time::OffsetDateTime;

use super::quality::FlagKind;
use super::window::serialize_ts;

/// Agent that produced a session log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentSource {
    Claude,
    Codex,
}

/// One user turn, normalized across agent sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub session_id: String,
    pub repo: String,
    pub source: AgentSource,
    #[serde(rename = "ts", serialize_with = "serialize_ts")]
    pub timestamp: OffsetDateTime,
    pub text: String,
}

/// Ordered prompts from one log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub repo: String,
    pub source: AgentSource,
    pub path: Option<String>,
    pub previous_session_id: Option<String>,
    /// First and last event of any role.
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    /// User turns in timestamp order.
    pub prompts: Vec<Prompt>,
    pub assistant_turns: usize,
    /// Repo-relative paths the agent's tools referenced.
    pub working_set: BTreeSet<String>,
}

impl Session {
    pub fn first_prompt(&self) -> Option<&Prompt> {
        self.prompts.first()
    }

    pub fn last_prompt(&self) -> Option<&Prompt> {
        self.prompts.last()
    }

    /// Latest prompt at or before `ts`.
    pub fn nearest_preceding_prompt(&self, ts: OffsetDateTime) -> Option<&Prompt> {
        let idx = self.prompts.partition_point(|p| p.timestamp <= ts);
        idx.checked_sub(1).map(|i| &self.prompts[i])
    }
}

/// Where a prompt's lazy-classification context came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    /// Enough prior turns in the same session.
    Session,
    /// Too few prior turns; the prompt stays neutral.
    Insufficient,
}

/// Why a prompt scored as lazy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LazyReason {
    ShortWithoutContext,
    NoExplicitTargetMultiTurn,
    NoSuccessCriteriaMultiTurn,
    VagueReference,
    UnderspecifiedImperative,
}

/// Multi-turn lazy-prompt assessment of one prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptAssessment {
    pub session_id: String,
    pub repo: String,
    pub source: AgentSource,
    #[serde(rename = "ts", serialize_with = "serialize_ts")]
    pub timestamp: OffsetDateTime,
    pub text: String,
    pub lazy_score: u32,
    pub lazy: bool,
    pub reasons: Vec<LazyReason>,
    pub context_scope: ContextScope,
    pub context_turns_considered: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionStatus {
    Attributed,
    Unattributed,
}

/// Outcome of matching one commit against prompts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitAttribution {
    pub sha: String,
    pub repo: String,
    #[serde(rename = "ts", serialize_with = "serialize_ts")]
    pub timestamp: OffsetDateTime,
    pub subject: String,
    pub insertions: u64,
    pub deletions: u64,
    pub files: Vec<String>,
    pub status: AttributionStatus,
    pub session_id: Option<String>,
    pub nearest_prompt_text: Option<String>,
    /// Timestamp of the nearest prompt; joins the row to its assessment.
    #[serde(skip)]
    pub nearest_prompt_at: Option<OffsetDateTime>,
    pub lag_hours: Option<f64>,
    /// Why the commit stayed unattributed.
    pub flag: Option<FlagKind>,
}

impl CommitAttribution {
    pub fn is_attributed(&self) -> bool {
        self.status == AttributionStatus::Attributed
    }

    pub fn lines_changed(&self) -> u64 {
        self.insertions + self.deletions
    }
}

/// An attributed commit whose nearest preceding prompt was classified lazy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LazyCommitLink {
    pub repo: String,
    pub sha: String,
    #[serde(rename = "ts", serialize_with = "serialize_ts")]
    pub timestamp: OffsetDateTime,
    pub subject: String,
    pub session_id: String,
    pub lag_hours: f64,
    pub prompt_text: String,
    pub prompt_reasons: Vec<LazyReason>,
    pub files: Vec<String>,
    pub insertions: u64,
    pub deletions: u64,
}

/// Session totals, always recomputed from the attribution rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionTotals {
    pub request_count: usize,
    pub assistant_turns: usize,
    pub linked_commits: usize,
    pub lines_changed: u64,
    pub commits_per_prompt: f64,
    pub lines_per_prompt: f64,
}

impl SessionTotals {
    pub fn derive(session: &Session, rows: &[CommitAttribution]) -> Self {
        let request_count = session.prompts.len();
        let linked: Vec<&CommitAttribution> = rows
            .iter()
            .filter(|r| r.is_attributed() && r.session_id.as_deref() == Some(session.id.as_str()))
            .collect();
        let linked_commits = linked.len();
        let lines_changed: u64 = linked.iter().map(|r| r.lines_changed()).sum();

        let (commits_per_prompt, lines_per_prompt) = if request_count == 0 {
            (0.0, 0.0)
        } else {
            (
                round6(linked_commits as f64 / request_count as f64),
                round6(lines_changed as f64 / request_count as f64),
            )
        };

        Self {
            request_count,
            assistant_turns: session.assistant_turns,
            linked_commits,
            lines_changed,
            commits_per_prompt,
            lines_per_prompt,
        }
    }
}

pub fn round6(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn prompt(ts: OffsetDateTime, text: &str) -> Prompt {
        Prompt {
            session_id: "s1".into(),
            repo: "r".into(),
            source: AgentSource::Claude,
            timestamp: ts,
            text: text.into(),
        }
    }

    fn session(prompts: Vec<Prompt>) -> Session {
        Session {
            id: "s1".into(),
            repo: "r".into(),
            source: AgentSource::Claude,
            path: None,
            previous_session_id: None,
            start: prompts[0].timestamp,
            end: prompts[prompts.len() - 1].timestamp,
            prompts,
            assistant_turns: 0,
            working_set: BTreeSet::new(),
        }
    }

    #[test]
    fn nearest_preceding_prompt_is_inclusive() {
        let s = session(vec![
            prompt(datetime!(2026-02-01 10:00 UTC), "a"),
            prompt(datetime!(2026-02-01 11:00 UTC), "b"),
        ]);
        assert!(s.nearest_preceding_prompt(datetime!(2026-02-01 09:59 UTC)).is_none());
        assert_eq!(
            s.nearest_preceding_prompt(datetime!(2026-02-01 11:00 UTC)).unwrap().text,
            "b"
        );
        assert_eq!(
            s.nearest_preceding_prompt(datetime!(2026-02-01 10:30 UTC)).unwrap().text,
            "a"
        );
    }

    #[test]
    fn totals_count_only_rows_linked_to_the_session() {
        let s = session(vec![
            prompt(datetime!(2026-02-01 10:00 UTC), "a"),
            prompt(datetime!(2026-02-01 11:00 UTC), "b"),
        ]);
        let row = |sha: &str, session: Option<&str>, status| CommitAttribution {
            sha: sha.into(),
            repo: "r".into(),
            timestamp: datetime!(2026-02-01 11:30 UTC),
            subject: "s".into(),
            insertions: 10,
            deletions: 5,
            files: vec![],
            status,
            session_id: session.map(str::to_string),
            nearest_prompt_text: None,
            nearest_prompt_at: None,
            lag_hours: None,
            flag: None,
        };
        let rows = vec![
            row("a", Some("s1"), AttributionStatus::Attributed),
            row("b", Some("other"), AttributionStatus::Attributed),
            row("c", None, AttributionStatus::Unattributed),
        ];
        let totals = SessionTotals::derive(&s, &rows);
        assert_eq!(totals.request_count, 2);
        assert_eq!(totals.linked_commits, 1);
        assert_eq!(totals.lines_changed, 15);
        assert_eq!(totals.commits_per_prompt, 0.5);
        assert_eq!(totals.lines_per_prompt, 7.5);
    }
}
