use rayon::prelude::*;
use time::Duration;
use tracing::debug;

use crate::config::AnalysisOptions;
use crate::models::commit::Commit;
use crate::models::quality::{FlagKind, QualityFlag};
use crate::models::session::{AttributionStatus, CommitAttribution, Prompt, Session, round6};
use crate::models::window::hours_between;

/// Attribution rows for every commit plus one flag per unattributed commit.
#[derive(Debug, Default)]
pub struct AttributionOutcome {
    pub rows: Vec<CommitAttribution>,
    pub flags: Vec<QualityFlag>,
}

/// Where a commit's search ended.
#[derive(Debug, Clone, PartialEq)]
enum Resolution<'a> {
    Attributed {
        session: &'a Session,
        prompt: &'a Prompt,
        lag_hours: f64,
    },
    Unattributed(FlagKind),
}

/// Match each commit to at most one session.
///
/// A session is a candidate when it belongs to the commit's repository and
/// either its prompt span (widened by the lead/trail margins) contains the
/// commit or its working set shares a file with it. Among candidates whose
/// nearest preceding prompt lies within `max_lag_hours`, the smallest lag
/// wins, then the smaller session id.
pub fn attribute_commits(commits: &[Commit], sessions: &[Session], options: &AnalysisOptions) -> AttributionOutcome {
    let mut rows: Vec<CommitAttribution> = commits
        .par_iter()
        .map(|commit| {
            let resolution = resolve(commit, sessions, options);
            row(commit, resolution)
        })
        .collect();
    rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.sha.cmp(&b.sha)));

    let flags: Vec<QualityFlag> = rows
        .iter()
        .filter_map(|r| r.flag.map(|f| QualityFlag::new(f, short(&r.sha))))
        .collect();
    debug!(
        commits = rows.len(),
        attributed = rows.iter().filter(|r| r.is_attributed()).count(),
        "attribution finished"
    );
    AttributionOutcome { rows, flags }
}

fn short(sha: &str) -> String {
    sha.chars().take(7).collect()
}

fn is_candidate(commit: &Commit, session: &Session, options: &AnalysisOptions) -> bool {
    if session.repo != commit.repo {
        return false;
    }
    let (Some(first), Some(last)) = (session.first_prompt(), session.last_prompt()) else {
        return false;
    };
    let from = first
        .timestamp
        .saturating_sub(Duration::minutes(options.attribution_lead_minutes));
    let to = last
        .timestamp
        .saturating_add(Duration::minutes(options.attribution_trail_minutes));
    let in_span = from <= commit.timestamp && commit.timestamp <= to;
    in_span || commit.files().any(|f| session.working_set.contains(f))
}

fn resolve<'a>(commit: &Commit, sessions: &'a [Session], options: &AnalysisOptions) -> Resolution<'a> {
    let candidates: Vec<&Session> = sessions
        .iter()
        .filter(|s| is_candidate(commit, s, options))
        .collect();
    if candidates.is_empty() {
        return Resolution::Unattributed(FlagKind::NoCandidateSession);
    }

    let mut saw_preceding = false;
    let mut best: Option<Resolution<'a>> = None;
    for session in candidates {
        let Some(prompt) = session.nearest_preceding_prompt(commit.timestamp) else {
            continue;
        };
        saw_preceding = true;
        let lag = hours_between(prompt.timestamp, commit.timestamp);
        if lag > options.max_lag_hours {
            continue;
        }
        let better = match &best {
            Some(Resolution::Attributed {
                session: current,
                lag_hours,
                ..
            }) => lag < *lag_hours || (lag == *lag_hours && session.id < current.id),
            _ => true,
        };
        if better {
            best = Some(Resolution::Attributed {
                session,
                prompt,
                lag_hours: lag,
            });
        }
    }

    best.unwrap_or(Resolution::Unattributed(if saw_preceding {
        FlagKind::LagExceedsMax
    } else {
        FlagKind::NoPrecedingPrompt
    }))
}

fn row(commit: &Commit, resolution: Resolution<'_>) -> CommitAttribution {
    let mut row = CommitAttribution {
        sha: commit.sha.clone(),
        repo: commit.repo.clone(),
        timestamp: commit.timestamp,
        subject: commit.subject.clone(),
        insertions: commit.insertions,
        deletions: commit.deletions,
        files: commit.files().map(str::to_string).collect(),
        status: AttributionStatus::Unattributed,
        session_id: None,
        nearest_prompt_text: None,
        nearest_prompt_at: None,
        lag_hours: None,
        flag: None,
    };
    match resolution {
        Resolution::Attributed {
            session,
            prompt,
            lag_hours,
        } => {
            row.status = AttributionStatus::Attributed;
            row.session_id = Some(session.id.clone());
            row.nearest_prompt_text = Some(prompt.text.clone());
            row.nearest_prompt_at = Some(prompt.timestamp);
            row.lag_hours = Some(round6(lag_hours));
        }
        Resolution::Unattributed(flag) => row.flag = Some(flag),
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::{AgentSource, Prompt, SessionTotals};
    use std::collections::BTreeSet;
    use time::OffsetDateTime;
    use time::macros::datetime;

    fn session(id: &str, repo: &str, prompts: &[(OffsetDateTime, &str)]) -> Session {
        Session {
            id: id.into(),
            repo: repo.into(),
            source: AgentSource::Claude,
            path: None,
            previous_session_id: None,
            start: prompts[0].0,
            end: prompts[prompts.len() - 1].0,
            prompts: prompts
                .iter()
                .map(|(ts, text)| Prompt {
                    session_id: id.into(),
                    repo: repo.into(),
                    source: AgentSource::Claude,
                    timestamp: *ts,
                    text: text.to_string(),
                })
                .collect(),
            assistant_turns: 1,
            working_set: BTreeSet::new(),
        }
    }

    fn commit(sha: &str, repo: &str, ts: OffsetDateTime, file: &str) -> Commit {
        let mut c = Commit::new(repo, sha, ts, "change", 1);
        c.add_touch(file, None, Some(10), Some(5));
        c
    }

    #[test]
    fn commit_three_minutes_after_prompt() {
        let sessions = [session(
            "s1",
            "app",
            &[(datetime!(2026-02-03 10:00 UTC), "fix the off-by-one in parse_args")],
        )];
        let commits = [commit("abc123", "app", datetime!(2026-02-03 10:03 UTC), "cli.py")];
        let out = attribute_commits(&commits, &sessions, &AnalysisOptions::default());
        let row = &out.rows[0];
        assert!(row.is_attributed());
        assert_eq!(row.session_id.as_deref(), Some("s1"));
        assert_eq!(row.nearest_prompt_text.as_deref(), Some("fix the off-by-one in parse_args"));
        assert!((row.lag_hours.unwrap() - 0.05).abs() < 1e-9);
        assert!(out.flags.is_empty());

        let totals = SessionTotals::derive(&sessions[0], &out.rows);
        assert_eq!(totals.linked_commits, 1);
        assert_eq!(totals.lines_changed, 15);
        assert_eq!(totals.commits_per_prompt, 1.0);
    }

    #[test]
    fn at_most_one_session_smallest_lag_then_id() {
        let sessions = [
            session("s-b", "app", &[(datetime!(2026-02-03 10:00 UTC), "b")]),
            session("s-a", "app", &[(datetime!(2026-02-03 10:00 UTC), "a")]),
            session("s-c", "app", &[(datetime!(2026-02-03 09:50 UTC), "c")]),
        ];
        let commits = [commit("c1", "app", datetime!(2026-02-03 10:10 UTC), "x.py")];
        let out = attribute_commits(&commits, &sessions, &AnalysisOptions::default());
        assert_eq!(out.rows[0].session_id.as_deref(), Some("s-a"));
    }

    #[test]
    fn other_repo_has_no_candidate() {
        let sessions = [session("s1", "docs", &[(datetime!(2026-02-03 10:00 UTC), "p")])];
        let commits = [commit("c1", "app", datetime!(2026-02-03 10:01 UTC), "x.py")];
        let out = attribute_commits(&commits, &sessions, &AnalysisOptions::default());
        assert_eq!(out.rows[0].status, AttributionStatus::Unattributed);
        assert_eq!(out.rows[0].flag, Some(FlagKind::NoCandidateSession));
        assert_eq!(out.flags[0].context, "c1");
    }

    #[test]
    fn commit_before_first_prompt_has_no_preceding_prompt() {
        let sessions = [session("s1", "app", &[(datetime!(2026-02-03 10:00 UTC), "p")])];
        // Inside the five-minute lead margin, but earlier than any prompt.
        let commits = [commit("c1", "app", datetime!(2026-02-03 09:58 UTC), "x.py")];
        let out = attribute_commits(&commits, &sessions, &AnalysisOptions::default());
        assert_eq!(out.rows[0].flag, Some(FlagKind::NoPrecedingPrompt));
    }

    #[test]
    fn working_set_overlap_extends_candidacy_but_lag_still_bounds() {
        let mut s = session("s1", "app", &[(datetime!(2026-02-03 10:00 UTC), "refactor cli.py")]);
        s.working_set.insert("cli.py".into());
        let sessions = [s];
        let commits = [commit("c1", "app", datetime!(2026-02-04 06:00 UTC), "cli.py")];

        let out = attribute_commits(&commits, &sessions, &AnalysisOptions::default());
        assert_eq!(out.rows[0].flag, Some(FlagKind::LagExceedsMax));

        let relaxed = AnalysisOptions {
            max_lag_hours: 24.0,
            ..AnalysisOptions::default()
        };
        let out = attribute_commits(&commits, &sessions, &relaxed);
        assert!(out.rows[0].is_attributed());
        assert_eq!(out.rows[0].lag_hours, Some(20.0));
    }

    #[test]
    fn rows_are_chronological() {
        let commits = [
            commit("b", "app", datetime!(2026-02-03 12:00 UTC), "x.py"),
            commit("a", "app", datetime!(2026-02-03 11:00 UTC), "x.py"),
        ];
        let out = attribute_commits(&commits, &[], &AnalysisOptions::default());
        let shas: Vec<&str> = out.rows.iter().map(|r| r.sha.as_str()).collect();
        assert_eq!(shas, ["a", "b"]);
    }
}
