use std::collections::BTreeMap;

use time::macros::format_description;
use time::{Duration, OffsetDateTime};

use crate::models::commit::Commit;
use crate::models::metrics::{ChurnFile, Mix, ReworkPoint, Throughput};
use crate::models::session::{CommitAttribution, Prompt, round6};
use crate::models::window::TimeWindow;

pub fn throughput(commits: &[Commit], prompts: usize, window: &TimeWindow) -> Throughput {
    let span = window.span_days() as f64;
    Throughput {
        commits: commits.len(),
        prompts,
        insertions: commits.iter().map(|c| c.insertions).sum(),
        deletions: commits.iter().map(|c| c.deletions).sum(),
        commits_per_day: (commits.len() as f64 / span * 10_000.0).round() / 10_000.0,
    }
}

pub fn mix(commits: &[Commit], prompts: &[&Prompt]) -> Mix {
    let mut mix = Mix::default();
    for commit in commits {
        *mix.commits_by_repo.entry(commit.repo.clone()).or_insert(0) += 1;
    }
    for prompt in prompts {
        *mix.prompts_by_repo.entry(prompt.repo.clone()).or_insert(0) += 1;
        *mix.prompts_by_source.entry(prompt.source).or_insert(0) += 1;
    }
    mix
}

/// Every file touch with whether it re-touched the file within `lookback`.
///
/// A touch at `t` is a re-touch when the same file was touched at some `t'`
/// with `t - lookback <= t' < t`. Touches sharing a timestamp do not count
/// for each other.
fn classify_touches(commits: &[Commit], lookback: Duration) -> Vec<(OffsetDateTime, bool)> {
    let mut by_file: BTreeMap<(&str, &str), Vec<OffsetDateTime>> = BTreeMap::new();
    for commit in commits {
        for file in commit.files() {
            by_file.entry((commit.repo.as_str(), file)).or_default().push(commit.timestamp);
        }
    }

    let mut touches = Vec::new();
    for stamps in by_file.values_mut() {
        stamps.sort();
        for (i, &t) in stamps.iter().enumerate() {
            let previous = stamps[..i].iter().rev().find(|&&p| p < t);
            let retouch = previous.is_some_and(|&p| t - p <= lookback);
            touches.push((t, retouch));
        }
    }
    touches
}

fn ratio(touches: usize, retouches: usize) -> f64 {
    if touches == 0 {
        0.0
    } else {
        round6(retouches as f64 / touches as f64)
    }
}

/// Share of touches in `[end - trailing_days, end)` that re-touched a file
/// changed in the `lookback_days` before them.
pub fn rework_ratio(commits: &[Commit], end: OffsetDateTime, trailing_days: u32, lookback_days: u32) -> f64 {
    let from = end - Duration::days(i64::from(trailing_days));
    let (touches, retouches) = classify_touches(commits, Duration::days(i64::from(lookback_days)))
        .into_iter()
        .filter(|(t, _)| from <= *t && *t < end)
        .fold((0, 0), |(n, r), (_, retouch)| (n + 1, r + usize::from(retouch)));
    ratio(touches, retouches)
}

/// Rework ratio per fixed-width bucket, aligned with the velocity buckets.
pub fn rework_series(commits: &[Commit], window: &TimeWindow, bucket_days: u32, lookback_days: u32) -> Vec<ReworkPoint> {
    let width = Duration::days(i64::from(bucket_days.max(1)));
    let count = ((window.end - window.start).whole_seconds() + width.whole_seconds() - 1) / width.whole_seconds();
    let date = format_description!("[year]-[month]-[day]");
    let touches = classify_touches(commits, Duration::days(i64::from(lookback_days)));

    (0..count.max(1))
        .map(|i| {
            let start = window.start + width * (i as i32);
            let end = start.saturating_add(width).min(window.end);
            let (n, r) = touches
                .iter()
                .filter(|(t, _)| start <= *t && *t < end)
                .fold((0, 0), |(n, r), (_, retouch)| (n + 1, r + usize::from(*retouch)));
            ReworkPoint {
                bucket_index: i as usize,
                bucket_start: start.format(date).unwrap_or_default(),
                touches: n,
                retouches: r,
                ratio: ratio(n, r),
            }
        })
        .collect()
}

/// Fraction of consecutive touches of `file` no more than `window_days` apart.
pub fn retouch_ratio(file: &str, commits: &[Commit], window_days: u32) -> f64 {
    let mut stamps: Vec<OffsetDateTime> = commits
        .iter()
        .filter(|c| c.touches_file(file))
        .map(|c| c.timestamp)
        .collect();
    if stamps.len() < 2 {
        return 0.0;
    }
    stamps.sort();
    let window = Duration::days(i64::from(window_days));
    let close = stamps.windows(2).filter(|w| w[1] - w[0] <= window).count();
    round6(close as f64 / (stamps.len() - 1) as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let m = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };
    Some(round6(m))
}

pub fn median_prompt_lag(rows: &[CommitAttribution]) -> Option<f64> {
    let lags: Vec<f64> = rows.iter().filter_map(|r| r.lag_hours).collect();
    median(&lags)
}

pub fn file_summary(file: &str, commits: &[Commit]) -> ChurnFile {
    let touches: Vec<_> = commits.iter().filter_map(|c| c.touch(file)).collect();
    ChurnFile {
        file: file.to_string(),
        touches: touches.len(),
        insertions: touches.iter().map(|t| t.insertions).sum(),
        deletions: touches.iter().map(|t| t.deletions).sum(),
    }
}

/// Most-touched files, ties broken by path.
pub fn top_churn_files<'a>(commits: impl IntoIterator<Item = &'a Commit>, limit: usize) -> Vec<ChurnFile> {
    let mut files: BTreeMap<&str, ChurnFile> = BTreeMap::new();
    for commit in commits {
        for touch in &commit.touches {
            let entry = files.entry(&touch.path).or_insert_with(|| ChurnFile {
                file: touch.path.clone(),
                touches: 0,
                insertions: 0,
                deletions: 0,
            });
            entry.touches += 1;
            entry.insertions += touch.insertions;
            entry.deletions += touch.deletions;
        }
    }
    let mut ranked: Vec<ChurnFile> = files.into_values().collect();
    ranked.sort_by(|a, b| b.touches.cmp(&a.touches).then_with(|| a.file.cmp(&b.file)));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn commit(n: u32, ts: OffsetDateTime, files: &[&str]) -> Commit {
        let mut c = Commit::new("app", format!("{n:040x}"), ts, "c", 1);
        for f in files {
            c.add_touch(f, None, Some(3), Some(1));
        }
        c
    }

    fn day(d: i64) -> OffsetDateTime {
        datetime!(2026-02-01 00:00 UTC) + Duration::days(d)
    }

    #[test]
    fn retouch_exactly_at_lookback_edge_counts() {
        let commits = [commit(1, day(0), &["a.py"]), commit(2, day(7), &["a.py"])];
        assert_eq!(rework_ratio(&commits, day(8), 7, 7), 1.0);
    }

    #[test]
    fn retouch_just_past_lookback_does_not_count() {
        let commits = [
            commit(1, day(0), &["a.py"]),
            commit(2, day(7) + Duration::seconds(1), &["a.py"]),
        ];
        assert_eq!(rework_ratio(&commits, day(8), 7, 7), 0.0);
    }

    #[test]
    fn trailing_window_is_half_open() {
        let commits = [
            commit(1, day(0), &["a.py"]),
            // Left edge of the trailing window: included.
            commit(2, day(3), &["a.py"]),
            // Right edge: excluded.
            commit(3, day(10), &["a.py", "b.py"]),
        ];
        assert_eq!(rework_ratio(&commits, day(10), 7, 7), 1.0);
    }

    #[test]
    fn same_timestamp_is_not_a_retouch() {
        let commits = [commit(1, day(1), &["a.py"]), commit(2, day(1), &["a.py"])];
        assert_eq!(rework_ratio(&commits, day(2), 7, 7), 0.0);
    }

    #[test]
    fn rework_series_per_bucket() {
        let window = TimeWindow::new(day(0), day(14)).unwrap();
        let commits = [
            commit(1, day(1), &["a.py", "b.py"]),
            commit(2, day(2), &["a.py"]),
            commit(3, day(9), &["c.py"]),
        ];
        let series = rework_series(&commits, &window, 7, 7);
        assert_eq!(series.len(), 2);
        assert_eq!((series[0].touches, series[0].retouches), (3, 1));
        assert_eq!(series[0].ratio, 0.333333);
        assert_eq!((series[1].touches, series[1].retouches), (1, 0));
        assert_eq!(series[1].bucket_start, "2026-02-08");
    }

    #[test]
    fn retouch_ratio_over_consecutive_gaps() {
        let commits = [
            commit(1, day(0), &["a.py"]),
            commit(2, day(2), &["a.py"]),
            commit(3, day(20), &["a.py"]),
        ];
        assert_eq!(retouch_ratio("a.py", &commits, 7), 0.5);
        assert_eq!(retouch_ratio("missing.py", &commits, 7), 0.0);
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }

    #[test]
    fn throughput_and_top_files() {
        let window = TimeWindow::new(day(0), day(4)).unwrap();
        let commits = [
            commit(1, day(1), &["a.py", "b.py"]),
            commit(2, day(2), &["b.py"]),
        ];
        let t = throughput(&commits, 5, &window);
        assert_eq!((t.commits, t.prompts, t.insertions, t.deletions), (2, 5, 9, 3));
        assert_eq!(t.commits_per_day, 0.5);

        let top = top_churn_files(&commits, 25);
        assert_eq!(top[0].file, "b.py");
        assert_eq!(top[0].touches, 2);
        assert_eq!(top[1].file, "a.py");
        assert_eq!(file_summary("b.py", &commits).insertions, 6);
    }
}
