/// A parsed hunk with the concrete line numbers it changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    /// Text after the closing `@@` (git's function context), may be empty.
    pub header: String,
    /// Added line numbers in the new file (1-indexed).
    pub added_lines: Vec<usize>,
    /// Deleted line numbers in the old file (1-indexed).
    pub deleted_lines: Vec<usize>,
}

/// One file section of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileDiff {
    pub old_path: String,
    pub new_path: String,
    pub hunks: Vec<Hunk>,
    pub rename: bool,
    /// `similarity index` reported by git for renames/copies.
    pub similarity: Option<u8>,
    pub binary: bool,
}

impl FileDiff {
    pub fn is_deleted_file(&self) -> bool {
        self.new_path == "/dev/null"
    }

    pub fn is_new_file(&self) -> bool {
        self.old_path == "/dev/null"
    }

    /// Rename without any content change.
    pub fn is_rename_only(&self) -> bool {
        self.rename && self.hunks.iter().all(|h| h.added_lines.is_empty() && h.deleted_lines.is_empty())
    }

    pub fn added_total(&self) -> usize {
        self.hunks.iter().map(|h| h.added_lines.len()).sum()
    }

    pub fn deleted_total(&self) -> usize {
        self.hunks.iter().map(|h| h.deleted_lines.len()).sum()
    }
}

/// Parse unified diff text (as produced by `git show --unified=N`) into per-file sections.
///
/// Hunk bodies are consumed by their declared line counts so that content
/// lines starting with `---` or `+++` are never mistaken for file headers.
pub fn parse_unified_diff(input: &str) -> Vec<FileDiff> {
    let mut files = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut old_line = 0usize;
    let mut new_line = 0usize;
    let mut remaining_old = 0usize;
    let mut remaining_new = 0usize;

    for line in input.lines() {
        if remaining_old > 0 || remaining_new > 0 {
            if let Some(hunk) = current.as_mut().and_then(|f| f.hunks.last_mut()) {
                if line.starts_with('+') {
                    hunk.added_lines.push(new_line);
                    new_line += 1;
                    remaining_new = remaining_new.saturating_sub(1);
                } else if line.starts_with('-') {
                    hunk.deleted_lines.push(old_line);
                    old_line += 1;
                    remaining_old = remaining_old.saturating_sub(1);
                } else if !line.starts_with('\\') {
                    old_line += 1;
                    new_line += 1;
                    remaining_old = remaining_old.saturating_sub(1);
                    remaining_new = remaining_new.saturating_sub(1);
                }
                continue;
            }
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            flush_file(&mut files, &mut current);
            let (old, new) = split_git_header(rest);
            current = Some(FileDiff {
                old_path: old,
                new_path: new,
                ..FileDiff::default()
            });
            continue;
        }

        if let Some(path) = line.strip_prefix("--- ") {
            // A second `---` after hunks starts a new file in headerless diffs.
            if current.as_ref().is_some_and(|f| !f.hunks.is_empty()) {
                flush_file(&mut files, &mut current);
            }
            let file = current.get_or_insert_with(FileDiff::default);
            file.old_path = strip_side_prefix(path, "a/");
            continue;
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if let Some(path) = line.strip_prefix("+++ ") {
            file.new_path = strip_side_prefix(path, "b/");
        } else if line.starts_with("@@ ") {
            if let Some(hunk) = parse_hunk_header(line) {
                old_line = hunk.old_start;
                new_line = hunk.new_start;
                remaining_old = hunk.old_count;
                remaining_new = hunk.new_count;
                file.hunks.push(hunk);
            }
        } else if let Some(from) = line.strip_prefix("rename from ") {
            file.rename = true;
            file.old_path = from.to_string();
        } else if let Some(to) = line.strip_prefix("rename to ") {
            file.rename = true;
            file.new_path = to.to_string();
        } else if let Some(pct) = line.strip_prefix("similarity index ") {
            file.similarity = pct.trim_end_matches('%').parse().ok();
        } else if line.starts_with("Binary files ") {
            file.binary = true;
        }
    }

    flush_file(&mut files, &mut current);
    files
}

fn flush_file(files: &mut Vec<FileDiff>, current: &mut Option<FileDiff>) {
    if let Some(file) = current.take()
        && (!file.hunks.is_empty() || file.rename || file.binary)
    {
        files.push(file);
    }
}

/// `"a/src/x.py b/src/y.py"` → `("src/x.py", "src/y.py")`.
fn split_git_header(rest: &str) -> (String, String) {
    match rest.split_once(" b/") {
        Some((old, new)) => (
            old.strip_prefix("a/").unwrap_or(old).to_string(),
            new.to_string(),
        ),
        None => (String::new(), String::new()),
    }
}

fn strip_side_prefix(path: &str, prefix: &str) -> String {
    let path = path.trim_end();
    if path == "/dev/null" {
        return path.to_string();
    }
    path.strip_prefix(prefix).unwrap_or(path).to_string()
}

/// `"@@ -10,5 +10,8 @@"` or `"@@ -10,5 +10,8 @@ fn foo()"`.
fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let rest = line.strip_prefix("@@ ")?;
    let end = rest.find(" @@")?;
    let range_part = &rest[..end];
    let header = rest[end + 3..].trim().to_string();

    let mut parts = range_part.split_whitespace();
    let old_part = parts.next()?.strip_prefix('-')?;
    let new_part = parts.next()?.strip_prefix('+')?;

    let (old_start, old_count) = parse_range_spec(old_part)?;
    let (new_start, new_count) = parse_range_spec(new_part)?;

    Some(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        header,
        added_lines: Vec::new(),
        deleted_lines: Vec::new(),
    })
}

/// `"10,5"` or `"10"` → `(start, count)`.
fn parse_range_spec(spec: &str) -> Option<(usize, usize)> {
    if let Some((start, count)) = spec.split_once(',') {
        Some((start.parse().ok()?, count.parse().ok()?))
    } else {
        Some((spec.parse().ok()?, 1))
    }
}
