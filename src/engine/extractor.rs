use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::engine::diff::{FileDiff, parse_unified_diff};
use crate::engine::git::VcsSource;
use crate::engine::parser::ParseFailure;
use crate::engine::symbols::{Resolved, resolve, symbol_from_hunk_header};
use crate::models::commit::Commit;
use crate::models::quality::{FlagKind, QualityFlag};
use crate::models::symbol::{ExtractionMethod, MODULE_SYMBOL, Symbol, SymbolTouch, symbol_id};

/// Symbol touches of a commit range plus the flags raised on the way.
#[derive(Debug, Default)]
pub struct SymbolExtract {
    pub touches: Vec<SymbolTouch>,
    pub flags: Vec<QualityFlag>,
}

/// Attribute every changed line of `commits` to its enclosing symbol.
///
/// With `only_path`, files other than that path are ignored. Output is sorted
/// by sha, path and symbol id.
pub fn extract_symbol_touches(
    commits: &[Commit],
    source: &dyn VcsSource,
    only_path: Option<&str>,
    parse_timeout: Duration,
) -> SymbolExtract {
    let per_commit: Vec<SymbolExtract> = commits
        .par_iter()
        .map(|commit| commit_symbol_touches(commit, source, only_path, parse_timeout))
        .collect();

    let mut extract = SymbolExtract::default();
    for part in per_commit {
        extract.touches.extend(part.touches);
        extract.flags.extend(part.flags);
    }
    extract.touches.sort_by(|a, b| {
        a.sha
            .cmp(&b.sha)
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.symbol_id.cmp(&b.symbol_id))
    });
    debug!(
        commits = commits.len(),
        touches = extract.touches.len(),
        flags = extract.flags.len(),
        "symbol extraction finished"
    );
    extract
}

fn commit_symbol_touches(
    commit: &Commit,
    source: &dyn VcsSource,
    only_path: Option<&str>,
    parse_timeout: Duration,
) -> SymbolExtract {
    let mut out = SymbolExtract::default();

    let relevant: Vec<_> = commit
        .touches
        .iter()
        .filter(|t| only_path.is_none_or(|p| t.path == p || t.renamed_from.as_deref() == Some(p)))
        .collect();
    if relevant.is_empty() {
        return out;
    }

    if commit.is_merge {
        out.flags.push(QualityFlag::new(FlagKind::MergeSkipped, commit.short_sha()));
        return out;
    }

    let mut paths: Vec<&str> = Vec::new();
    for touch in &relevant {
        if touch.binary {
            continue;
        }
        if touch.is_rename_only() {
            out.flags.push(QualityFlag::new(
                FlagKind::RenameOnly,
                format!("{}:{}", commit.short_sha(), touch.path),
            ));
            continue;
        }
        paths.push(&touch.path);
        if let Some(old) = touch.renamed_from.as_deref() {
            paths.push(old);
        }
    }
    if paths.is_empty() {
        return out;
    }

    let Some(raw) = source.diff(&commit.sha, &paths) else {
        warn!(sha = commit.short_sha(), "diff unavailable");
        out.flags.push(QualityFlag::new(FlagKind::SourceUnavailable, commit.short_sha()));
        return out;
    };

    for file in parse_unified_diff(&raw) {
        let path = if file.is_deleted_file() {
            file.old_path.as_str()
        } else {
            file.new_path.as_str()
        };
        if !relevant.iter().any(|t| t.path == path) {
            continue;
        }
        file_symbol_touches(commit, &file, source, parse_timeout, &mut out);
    }
    out
}

#[derive(Default)]
struct LineTally {
    added: u64,
    deleted: u64,
    method: Option<ExtractionMethod>,
    flags: BTreeSet<FlagKind>,
}

impl LineTally {
    fn note(&mut self, method: ExtractionMethod, failure: Option<ParseFailure>) {
        self.method = Some(self.method.map_or(method, |m| m.max(method)));
        if method.is_fallback() {
            self.flags.insert(FlagKind::SymbolFallbackHeader);
        }
        if failure == Some(ParseFailure::Timeout) {
            self.flags.insert(FlagKind::ParseTimeout);
        }
    }
}

fn file_symbol_touches(
    commit: &Commit,
    file: &FileDiff,
    source: &dyn VcsSource,
    parse_timeout: Duration,
    out: &mut SymbolExtract,
) {
    if file.binary {
        return;
    }
    let path = if file.is_deleted_file() { &file.old_path } else { &file.new_path };
    if file.is_rename_only() {
        out.flags.push(QualityFlag::new(
            FlagKind::RenameOnly,
            format!("{}:{}", commit.short_sha(), path),
        ));
        return;
    }

    let after = (!file.is_deleted_file())
        .then(|| source.show_file(&commit.sha, &file.new_path))
        .flatten()
        .map(|content| resolve(&file.new_path, &content, parse_timeout));
    let before = (!file.is_new_file() && file.deleted_total() > 0)
        .then(|| source.show_file(&format!("{}^", commit.sha), &file.old_path))
        .flatten()
        .map(|content| resolve(&file.old_path, &content, parse_timeout));

    if after.is_none() && before.is_none() {
        out.flags.push(QualityFlag::new(
            FlagKind::SourceUnavailable,
            format!("{}:{}", commit.short_sha(), path),
        ));
    }
    for resolved in [&after, &before].into_iter().flatten() {
        if let Some(failure) = resolved.failure
            && failure != ParseFailure::Unsupported
        {
            warn!(sha = commit.short_sha(), path, %failure, "structural parse failed");
            let kind = if failure == ParseFailure::Timeout {
                FlagKind::ParseTimeout
            } else {
                FlagKind::SymbolFallbackHeader
            };
            out.flags.push(QualityFlag::new(kind, format!("{}:{}", commit.short_sha(), path)));
        }
    }

    let mut tally: BTreeMap<String, LineTally> = BTreeMap::new();
    for hunk in &file.hunks {
        let hunk_symbol = || symbol_from_hunk_header(&hunk.header).unwrap_or_else(|| MODULE_SYMBOL.to_string());

        for &line in &hunk.added_lines {
            let (name, method, failure) = locate(after.as_ref(), line, &hunk_symbol);
            let entry = tally.entry(name).or_default();
            entry.added += 1;
            entry.note(method, failure);
        }
        for &line in &hunk.deleted_lines {
            let (name, method, failure) = locate(before.as_ref(), line, &hunk_symbol);
            let entry = tally.entry(name).or_default();
            entry.deleted += 1;
            entry.note(method, failure);
        }
    }

    // A definition that existed before the commit and is gone after it. Its
    // deleted count covers the whole prior span, nested definitions included.
    let gone_after = file.is_deleted_file() || after.is_some();
    if gone_after && let Some(before) = &before {
        for span in before.table.spans() {
            let still_there = after.as_ref().is_some_and(|a| a.table.find(&span.name).is_some());
            if !still_there && let Some(entry) = tally.get_mut(&span.name) {
                entry.deleted = entry.deleted.max(span.len() as u64);
                entry.flags.insert(FlagKind::SymbolRemoved);
            }
        }
    }

    for (name, entry) in tally {
        let extractor = entry.method.unwrap_or(ExtractionMethod::HunkHeader);
        out.touches.push(SymbolTouch {
            repo: commit.repo.clone(),
            sha: commit.sha.clone(),
            timestamp: commit.timestamp,
            file: path.clone(),
            symbol_id: symbol_id(path, &name),
            symbol_display: name,
            touches: 1,
            added: entry.added,
            deleted: entry.deleted,
            churn: entry.added + entry.deleted,
            extractor,
            flags: entry.flags.into_iter().collect(),
        });
    }
}

/// Name the symbol owning `line`, using the hunk header when no content was available.
fn locate(
    resolved: Option<&Resolved>,
    line: usize,
    hunk_symbol: &impl Fn() -> String,
) -> (String, ExtractionMethod, Option<ParseFailure>) {
    match resolved {
        Some(r) => {
            let name = r
                .table
                .lookup(line)
                .map_or_else(|| MODULE_SYMBOL.to_string(), |s| s.name.clone());
            (name, r.method, r.failure)
        }
        None => (hunk_symbol(), ExtractionMethod::HunkHeader, None),
    }
}

/// Fold touches into per-symbol aggregates in timestamp order.
///
/// Sorted by touches desc, churn desc, then symbol id.
pub fn aggregate_symbols(touches: &[SymbolTouch]) -> Vec<Symbol> {
    let mut groups: BTreeMap<&str, Vec<&SymbolTouch>> = BTreeMap::new();
    for touch in touches {
        groups.entry(&touch.symbol_id).or_default().push(touch);
    }

    let mut symbols: Vec<Symbol> = groups
        .into_values()
        .filter_map(|mut group| {
            group.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.sha.cmp(&b.sha)));
            let first = *group.first()?;
            let last = *group.last()?;

            let gaps: Vec<f64> = group
                .windows(2)
                .map(|w| (w[1].timestamp - w[0].timestamp).as_seconds_f64() / 86_400.0)
                .collect();
            let avg_gap_days = (!gaps.is_empty()).then(|| gaps.iter().sum::<f64>() / gaps.len() as f64);

            Some(Symbol {
                symbol_id: last.symbol_id.clone(),
                symbol_display: last.symbol_display.clone(),
                file: last.file.clone(),
                touches: group.iter().map(|t| t.touches).sum(),
                added: group.iter().map(|t| t.added).sum(),
                deleted: group.iter().map(|t| t.deleted).sum(),
                churn: group.iter().map(|t| t.churn).sum(),
                first_touch: first.timestamp,
                last_touch: last.timestamp,
                avg_gap_days,
                removed: last.has_flag(FlagKind::SymbolRemoved),
            })
        })
        .collect();

    symbols.sort_by(|a, b| {
        b.touches
            .cmp(&a.touches)
            .then(b.churn.cmp(&a.churn))
            .then_with(|| a.symbol_id.cmp(&b.symbol_id))
    });
    symbols
}
