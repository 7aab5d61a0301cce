use anyhow::Result;
use tracing::{debug, warn};

use crate::engine::git::{FIELD_SEP, RECORD_SEP, VcsSource};
use crate::models::commit::Commit;
use crate::models::quality::{FlagKind, QualityFlag};
use crate::models::window::{TimeWindow, parse_utc};

/// Commits of one repository in a window, plus what had to be skipped.
#[derive(Debug, Clone, Default)]
pub struct HistoryExtract {
    pub commits: Vec<Commit>,
    pub flags: Vec<QualityFlag>,
}

/// Read and parse the history of `repo` for `window`.
///
/// Git failures are fatal; malformed individual entries are not.
pub fn extract_history(
    repo: &str,
    source: &dyn VcsSource,
    window: &TimeWindow,
) -> Result<HistoryExtract> {
    let raw = source.log(window)?;
    let extract = parse_log(repo, &raw, window);
    debug!(
        repo,
        commits = extract.commits.len(),
        flags = extract.flags.len(),
        "history extracted"
    );
    Ok(extract)
}

/// Parse `git log` output produced with the record/field separators of
/// `GitCli::log` followed by `--numstat` lines.
///
/// Output is chronological with ties broken by sha, restricted to `window`.
pub fn parse_log(repo: &str, raw: &str, window: &TimeWindow) -> HistoryExtract {
    let mut commits = Vec::new();
    let mut flags = Vec::new();

    for record in raw.split(RECORD_SEP) {
        if record.trim().is_empty() {
            continue;
        }
        let mut lines = record.lines();
        let header = lines.next().unwrap_or("");

        let Some(mut commit) = parse_header(repo, header) else {
            warn!(repo, header, "skipping malformed log header");
            flags.push(QualityFlag::new(
                FlagKind::MalformedLogEntry,
                format!("{repo}: unparseable header {:?}", truncate(header, 80)),
            ));
            continue;
        };

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            match parse_numstat(line) {
                Some(entry) => {
                    commit.add_touch(&entry.path, entry.renamed_from, entry.insertions, entry.deletions)
                }
                None => flags.push(QualityFlag::new(
                    FlagKind::MalformedLogEntry,
                    format!("{}: unparseable numstat {:?}", commit.short_sha(), truncate(line, 80)),
                )),
            }
        }

        if !window.contains(commit.timestamp) {
            continue;
        }
        if commit.is_binary_numstat {
            flags.push(QualityFlag::new(
                FlagKind::BinaryNumstatPresent,
                commit.short_sha().to_string(),
            ));
        }
        commits.push(commit);
    }

    commits.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.sha.cmp(&b.sha)));
    HistoryExtract { commits, flags }
}

fn parse_header(repo: &str, header: &str) -> Option<Commit> {
    let mut fields = header.splitn(4, FIELD_SEP);
    let sha = fields.next()?.trim();
    let ts = fields.next()?;
    let parents = fields.next()?;
    let subject = fields.next()?;

    // SHA-1 or SHA-256 object names.
    if !matches!(sha.len(), 40 | 64) || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let timestamp = parse_utc(ts)?;
    let parent_count = parents.split_whitespace().count();

    Some(Commit::new(repo, sha, timestamp, subject.trim_end(), parent_count))
}

struct NumstatEntry {
    path: String,
    renamed_from: Option<String>,
    insertions: Option<u64>,
    deletions: Option<u64>,
}

/// `"10\t5\tpath"`, `"-\t-\timg.png"` or a rename such as
/// `"1\t0\tsrc/{old.py => new.py}"`.
fn parse_numstat(line: &str) -> Option<NumstatEntry> {
    let mut parts = line.splitn(3, '\t');
    let ins = parse_count(parts.next()?)?;
    let dels = parse_count(parts.next()?)?;
    let raw_path = parts.next()?.trim();
    if raw_path.is_empty() {
        return None;
    }
    let (path, renamed_from) = split_rename(unquote(raw_path));
    Some(NumstatEntry {
        path,
        renamed_from,
        insertions: ins,
        deletions: dels,
    })
}

/// `Some(Some(n))` for a count, `Some(None)` for a binary `-`, `None` if malformed.
fn parse_count(raw: &str) -> Option<Option<u64>> {
    let raw = raw.trim();
    if raw == "-" {
        return Some(None);
    }
    raw.parse().ok().map(Some)
}

fn unquote(path: &str) -> &str {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
}

/// Resolve git's rename notation into `(new_path, Some(old_path))`.
fn split_rename(path: &str) -> (String, Option<String>) {
    if let (Some(open), Some(close)) = (path.find('{'), path.rfind('}'))
        && open < close
        && let Some((old, new)) = path[open + 1..close].split_once(" => ")
    {
        let prefix = &path[..open];
        let suffix = &path[close + 1..];
        let join = |middle: &str| {
            let joined = format!("{prefix}{middle}{suffix}");
            joined.replace("//", "/")
        };
        return (join(new), Some(join(old)));
    }
    if let Some((old, new)) = path.split_once(" => ") {
        return (new.to_string(), Some(old.to_string()));
    }
    (path.to_string(), None)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
