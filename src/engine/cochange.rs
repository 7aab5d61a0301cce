use std::collections::{BTreeMap, BTreeSet};

use time::Duration;
use time::macros::format_description;
use tracing::debug;

use crate::config::AnalysisOptions;
use crate::models::cochange::{CouplingEdge, VelocityBucket};
use crate::models::commit::Commit;
use crate::models::quality::{FlagKind, QualityFlag};
use crate::models::window::TimeWindow;

/// Coupling edges plus the commits that were too large to count.
#[derive(Debug, Default)]
pub struct CouplingReport {
    pub edges: Vec<CouplingEdge>,
    pub flags: Vec<QualityFlag>,
}

/// Distinct file sets of the commits small enough to count for coupling.
fn changesets<'a>(commits: &'a [Commit], max_size: usize, flags: &mut Vec<QualityFlag>) -> Vec<BTreeSet<&'a str>> {
    commits
        .iter()
        .filter_map(|commit| {
            let files: BTreeSet<&str> = commit.files().collect();
            if files.len() > max_size {
                flags.push(QualityFlag::new(
                    FlagKind::OversizedChangeset,
                    format!("{} ({} files)", commit.short_sha(), files.len()),
                ));
                return None;
            }
            Some(files)
        })
        .collect()
}

/// Directional co-change of `target` with every other file.
///
/// `coupling = shared_commits / target_commit_touches`, so the relation is
/// asymmetric. Sorted by coupling desc, shared commits desc, path asc and
/// truncated to `coupling_top_n`.
pub fn coupling_for(target: &str, commits: &[Commit], options: &AnalysisOptions) -> CouplingReport {
    let mut flags = Vec::new();
    let sets = changesets(commits, options.max_changeset_size, &mut flags);

    let mut target_touches = 0usize;
    let mut shared: BTreeMap<&str, usize> = BTreeMap::new();
    for files in sets.iter().filter(|f| f.contains(target)) {
        target_touches += 1;
        for other in files.iter().filter(|f| **f != target) {
            *shared.entry(other).or_insert(0) += 1;
        }
    }

    let mut edges: Vec<CouplingEdge> = shared
        .into_iter()
        .filter(|(_, n)| *n >= options.min_shared_commits)
        .map(|(other, n)| edge(target, other, n, target_touches))
        .collect();
    sort_and_truncate(&mut edges, options.coupling_top_n);

    debug!(target, target_touches, edges = edges.len(), "coupling computed");
    CouplingReport { edges, flags }
}

/// Strongest directional edges across every file pair of the repository.
pub fn top_coupling(commits: &[Commit], options: &AnalysisOptions) -> CouplingReport {
    let mut flags = Vec::new();
    let sets = changesets(commits, options.max_changeset_size, &mut flags);

    let mut touches: BTreeMap<&str, usize> = BTreeMap::new();
    let mut pairs: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for files in &sets {
        for file in files {
            *touches.entry(file).or_insert(0) += 1;
        }
        for a in files {
            for b in files.iter().filter(|b| *b != a) {
                *pairs.entry((*a, *b)).or_insert(0) += 1;
            }
        }
    }

    let mut edges: Vec<CouplingEdge> = pairs
        .into_iter()
        .filter(|(_, n)| *n >= options.min_shared_commits)
        .map(|((a, b), n)| edge(a, b, n, touches.get(a).copied().unwrap_or(n)))
        .collect();
    sort_and_truncate(&mut edges, options.coupling_top_n);
    CouplingReport { edges, flags }
}

fn edge(file: &str, other: &str, shared: usize, target_touches: usize) -> CouplingEdge {
    let coupling = if target_touches == 0 {
        0.0
    } else {
        (shared as f64 / target_touches as f64).clamp(0.0, 1.0)
    };
    CouplingEdge {
        file: file.to_string(),
        other_file: other.to_string(),
        shared_commits: shared,
        target_commit_touches: target_touches,
        coupling: round4(coupling),
    }
}

pub(crate) fn sort_and_truncate(edges: &mut Vec<CouplingEdge>, top_n: usize) {
    edges.sort_by(|a, b| {
        b.coupling
            .total_cmp(&a.coupling)
            .then(b.shared_commits.cmp(&a.shared_commits))
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.other_file.cmp(&b.other_file))
    });
    edges.truncate(top_n);
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Fixed-width churn series for `target`, anchored at the window start.
///
/// Buckets are `[start + i*w, start + (i+1)*w)`; every bucket of the window
/// is emitted, empty ones with zeros. The last bucket may extend past the
/// window end.
pub fn velocity(target: &str, commits: &[Commit], window: &TimeWindow, bucket_days: u32) -> Vec<VelocityBucket> {
    let width = Duration::days(i64::from(bucket_days.max(1)));
    let total = window.end - window.start;
    let count = (total.whole_seconds() + width.whole_seconds() - 1) / width.whole_seconds();
    let date = format_description!("[year]-[month]-[day]");

    let mut buckets: Vec<VelocityBucket> = (0..count.max(1))
        .map(|i| {
            let start = window.start + width * (i as i32);
            VelocityBucket {
                bucket_index: i as usize,
                bucket_start: start.format(date).unwrap_or_default(),
                commit_touches: 0,
                insertions: 0,
                deletions: 0,
            }
        })
        .collect();

    for commit in commits.iter().filter(|c| window.contains(c.timestamp)) {
        let Some(touch) = commit.touch(target) else {
            continue;
        };
        let idx = ((commit.timestamp - window.start).whole_seconds() / width.whole_seconds()) as usize;
        if let Some(bucket) = buckets.get_mut(idx) {
            bucket.commit_touches += 1;
            bucket.insertions += touch.insertions;
            bucket.deletions += touch.deletions;
        }
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use time::macros::datetime;

    fn commit(n: usize, ts: OffsetDateTime, files: &[&str]) -> Commit {
        let mut c = Commit::new("repo", format!("{n:040x}"), ts, "c", 1);
        for f in files {
            c.add_touch(f, None, Some(2), Some(1));
        }
        c
    }

    fn base() -> OffsetDateTime {
        datetime!(2026-02-01 00:00 UTC)
    }

    /// a: 15 commits, b: 16 commits, 12 shared.
    fn asymmetric_history() -> Vec<Commit> {
        let mut commits = Vec::new();
        let mut n = 0;
        let mut push = |files: &[&str], commits: &mut Vec<Commit>| {
            n += 1;
            commits.push(commit(n, base() + Duration::hours(n as i64), files));
        };
        for _ in 0..12 {
            push(&["a.py", "b.py"], &mut commits);
        }
        for _ in 0..3 {
            push(&["a.py"], &mut commits);
        }
        for _ in 0..4 {
            push(&["b.py", "c.py"], &mut commits);
        }
        commits
    }

    #[test]
    fn coupling_is_asymmetric() {
        let commits = asymmetric_history();
        let opts = AnalysisOptions::default();
        let ab = coupling_for("a.py", &commits, &opts);
        let ba = coupling_for("b.py", &commits, &opts);
        assert_eq!(ab.edges[0].other_file, "b.py");
        assert_eq!(ab.edges[0].coupling, 0.8);
        assert_eq!(ba.edges[0].other_file, "a.py");
        assert_eq!(ba.edges[0].coupling, 0.75);
        assert_eq!(ba.edges[1].other_file, "c.py");
        assert_eq!(ba.edges[1].coupling, 0.25);
    }

    #[test]
    fn coupling_stays_in_unit_interval() {
        let opts = AnalysisOptions::default();
        let report = top_coupling(&asymmetric_history(), &opts);
        assert!(!report.edges.is_empty());
        assert!(report.edges.iter().all(|e| (0.0..=1.0).contains(&e.coupling)));
        // c.py only ever changes with b.py.
        assert_eq!(report.edges[0].file, "c.py");
        assert_eq!(report.edges[0].coupling, 1.0);
    }

    #[test]
    fn oversized_changesets_are_ignored_and_flagged() {
        let opts = AnalysisOptions {
            max_changeset_size: 2,
            ..AnalysisOptions::default()
        };
        let commits = vec![
            commit(1, base(), &["a.py", "b.py", "c.py"]),
            commit(2, base(), &["a.py", "b.py"]),
        ];
        let report = coupling_for("a.py", &commits, &opts);
        assert_eq!(report.edges.len(), 1);
        assert_eq!(report.edges[0].target_commit_touches, 1);
        assert_eq!(report.flags[0].flag, FlagKind::OversizedChangeset);
    }

    #[test]
    fn min_shared_and_top_n_apply() {
        let opts = AnalysisOptions {
            min_shared_commits: 2,
            coupling_top_n: 1,
            ..AnalysisOptions::default()
        };
        let commits = vec![
            commit(1, base(), &["a.py", "b.py", "c.py"]),
            commit(2, base(), &["a.py", "b.py", "d.py"]),
            commit(3, base(), &["a.py", "d.py"]),
        ];
        let report = coupling_for("a.py", &commits, &opts);
        assert_eq!(report.edges.len(), 1);
        // b and d tie on coupling and shared commits; path breaks the tie.
        assert_eq!(report.edges[0].other_file, "b.py");
    }

    #[test]
    fn velocity_emits_every_bucket_left_closed() {
        let window = TimeWindow::new(base(), base() + Duration::days(21)).unwrap();
        let commits = vec![
            commit(1, base(), &["a.py"]),
            // Exactly on the second bucket's left edge.
            commit(2, base() + Duration::days(7), &["a.py"]),
            commit(3, base() + Duration::days(8), &["other.py"]),
        ];
        let buckets = velocity("a.py", &commits, &window, 7);
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].bucket_start, "2026-02-01");
        assert_eq!(buckets[1].bucket_start, "2026-02-08");
        assert_eq!(buckets[0].commit_touches, 1);
        assert_eq!(buckets[1].commit_touches, 1);
        assert_eq!(buckets[1].insertions, 2);
        assert_eq!(buckets[2].commit_touches, 0);
    }

    #[test]
    fn partial_last_bucket_is_kept() {
        let window = TimeWindow::new(base(), base() + Duration::days(10)).unwrap();
        let buckets = velocity("a.py", &[], &window, 7);
        assert_eq!(buckets.len(), 2);
        assert!(buckets.iter().all(|b| b.commit_touches == 0));
    }
}
