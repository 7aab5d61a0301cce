use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::models::quality::{FlagKind, QualityFlag};
use crate::models::session::{AgentSource, Prompt, Session};
use crate::models::window::parse_utc;

/// Tags whose whole element is injected by the harness, not typed by the user.
const STRIP_TAGS: &[&str] = &[
    "system-reminder",
    "environment_context",
    "local-command-caveat",
    "command-name",
    "command-message",
    "command-args",
    "local-command-stdout",
    "claudeMd",
    "fast_mode_info",
    "gitStatus",
    "user-prompt-submit-hook",
];

static INJECTED: Lazy<Regex> = Lazy::new(|| {
    let alternatives = STRIP_TAGS.join("|");
    Regex::new(&format!(r"(?s)<({alternatives})>.*?</({alternatives})>")).expect("Invalid injected-tag regex")
});

static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("Invalid markup regex"));

/// Remove injected elements and remaining markup, then cap at `limit` chars.
pub fn clean_text(raw: &str, limit: usize) -> String {
    let without_injected = INJECTED.replace_all(raw, "");
    let stripped = MARKUP.replace_all(&without_injected, "");
    stripped.trim().chars().take(limit).collect::<String>().trim_end().to_string()
}

// ---------------------------------------------------------------------------
// Raw records
// ---------------------------------------------------------------------------

/// One Claude transcript line.
#[derive(Debug, Deserialize)]
pub struct ClaudeLine {
    #[serde(rename = "type", default)]
    kind: String,
    timestamp: Option<String>,
    message: Option<ClaudeMessage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeMessage {
    #[serde(default)]
    content: Value,
}

/// One Codex rollout line.
#[derive(Debug, Deserialize)]
pub struct CodexLine {
    #[serde(rename = "type", default)]
    kind: String,
    timestamp: Option<String>,
    #[serde(default)]
    payload: Value,
}

/// A log line tagged with the agent that wrote it.
#[derive(Debug)]
pub enum RawRecord {
    Claude(ClaudeLine),
    Codex(CodexLine),
}

impl RawRecord {
    pub fn parse(source: AgentSource, line: &str) -> serde_json::Result<Self> {
        Ok(match source {
            AgentSource::Claude => Self::Claude(serde_json::from_str(line)?),
            AgentSource::Codex => Self::Codex(serde_json::from_str(line)?),
        })
    }

    /// Map onto the source-independent event shape.
    pub fn normalize(self, text_limit: usize) -> Result<Event, FlagKind> {
        match self {
            Self::Claude(line) => normalize_claude(line, text_limit),
            Self::Codex(line) => normalize_codex(line, text_limit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// Normalized transcript event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Codex session header carrying the working directory.
    Meta { cwd: String },
    Turn {
        role: Role,
        timestamp: OffsetDateTime,
        text: String,
        /// File paths referenced by tool calls in this turn.
        files: Vec<String>,
    },
    Ignored,
}

fn turn_timestamp(raw: Option<&str>) -> Result<OffsetDateTime, FlagKind> {
    let raw = raw.filter(|s| !s.trim().is_empty()).ok_or(FlagKind::MissingTimestamp)?;
    parse_utc(raw).ok_or(FlagKind::InvalidTimestamp)
}

fn normalize_claude(line: ClaudeLine, text_limit: usize) -> Result<Event, FlagKind> {
    let role = match line.kind.as_str() {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        _ => return Ok(Event::Ignored),
    };
    let timestamp = turn_timestamp(line.timestamp.as_deref())?;
    let content = line.message.map(|m| m.content).unwrap_or(Value::Null);
    Ok(Event::Turn {
        role,
        timestamp,
        text: clean_text(&extract_text(&content), text_limit),
        files: tool_paths(&content),
    })
}

fn normalize_codex(line: CodexLine, text_limit: usize) -> Result<Event, FlagKind> {
    match line.kind.as_str() {
        "session_meta" => {
            let cwd = line.payload.get("cwd").and_then(Value::as_str).unwrap_or_default();
            Ok(Event::Meta { cwd: cwd.to_string() })
        }
        "response_item" => {
            let payload = &line.payload;
            let payload_type = payload.get("type").and_then(Value::as_str).unwrap_or("message");
            if payload_type == "function_call" {
                let timestamp = turn_timestamp(line.timestamp.as_deref())?;
                let files = payload
                    .get("arguments")
                    .and_then(Value::as_str)
                    .and_then(|args| serde_json::from_str::<Value>(args).ok())
                    .map(|args| input_paths(&args))
                    .unwrap_or_default();
                return Ok(Event::Turn {
                    role: Role::Assistant,
                    timestamp,
                    text: String::new(),
                    files,
                });
            }
            let role = match payload.get("role").and_then(Value::as_str) {
                Some("user") => Role::User,
                Some("assistant") => Role::Assistant,
                _ => return Ok(Event::Ignored),
            };
            let timestamp = turn_timestamp(line.timestamp.as_deref())?;
            let content = payload.get("content").cloned().unwrap_or(Value::Null);
            Ok(Event::Turn {
                role,
                timestamp,
                text: clean_text(&extract_text(&content), text_limit),
                files: Vec::new(),
            })
        }
        _ => Ok(Event::Ignored),
    }
}

/// Plain string content, or the `text` of each block joined by spaces.
fn extract_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

/// Paths named by `tool_use` blocks.
fn tool_paths(content: &Value) -> Vec<String> {
    let Value::Array(blocks) = content else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
        .filter_map(|b| b.get("input"))
        .flat_map(input_paths)
        .collect()
}

fn input_paths(input: &Value) -> Vec<String> {
    ["file_path", "path", "notebook_path"]
        .iter()
        .filter_map(|key| input.get(key).and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Session assembly
// ---------------------------------------------------------------------------

/// Loaded sessions plus everything skipped while reading them.
#[derive(Debug, Default)]
pub struct SessionLoad {
    pub sessions: Vec<Session>,
    pub flags: Vec<QualityFlag>,
}

/// Where to look for logs and how to assign them to repositories.
pub struct SessionLayout<'a> {
    pub claude_dirs: &'a BTreeMap<String, PathBuf>,
    pub codex_dir: Option<&'a Path>,
    pub repos: &'a BTreeMap<String, PathBuf>,
}

/// Every `*.jsonl` below `dir`, sorted.
pub fn discover_logs(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "session directory missing");
        return Vec::new();
    }
    let mut builder = WalkBuilder::new(dir);
    builder.hidden(false).git_ignore(false).git_global(false).ignore(false);

    let mut files: Vec<PathBuf> = builder
        .build()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();
    files
}

/// Load every session of every configured source, in parallel per file.
///
/// Sessions are sorted by id and linked to their predecessors.
pub fn load_sessions(layout: &SessionLayout<'_>, text_limit: usize) -> SessionLoad {
    let mut jobs: Vec<(AgentSource, PathBuf, Option<&str>)> = Vec::new();
    for (repo, dir) in layout.claude_dirs {
        for path in discover_logs(dir) {
            jobs.push((AgentSource::Claude, path, Some(repo.as_str())));
        }
    }
    if let Some(dir) = layout.codex_dir {
        for path in discover_logs(dir) {
            jobs.push((AgentSource::Codex, path, None));
        }
    }

    let loaded: Vec<(Option<Session>, Vec<QualityFlag>)> = jobs
        .par_iter()
        .map(|(source, path, repo)| match fs::read_to_string(path) {
            Ok(content) => parse_session(*source, path, &content, *repo, layout.repos, text_limit),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable session log");
                (
                    None,
                    vec![QualityFlag::new(FlagKind::SourceUnavailable, path.display().to_string())],
                )
            }
        })
        .collect();

    let mut out = SessionLoad::default();
    for (session, flags) in loaded {
        out.flags.extend(flags);
        out.sessions.extend(session);
    }
    out.sessions.sort_by(|a, b| a.id.cmp(&b.id).then(a.source.cmp(&b.source)));
    link_previous_sessions(&mut out.sessions);
    debug!(sessions = out.sessions.len(), flags = out.flags.len(), "sessions loaded");
    out
}

/// Build one session from a log file's content.
///
/// Codex logs choose their repository from the recorded cwd; a log that maps
/// to no configured repository yields no session.
pub fn parse_session(
    source: AgentSource,
    path: &Path,
    content: &str,
    repo: Option<&str>,
    repos: &BTreeMap<String, PathBuf>,
    text_limit: usize,
) -> (Option<Session>, Vec<QualityFlag>) {
    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut flags = Vec::new();
    let mut repo = repo.map(str::to_string);
    let mut prompts = Vec::new();
    let mut assistant_turns = 0usize;
    let mut referenced: Vec<String> = Vec::new();
    let mut span: Option<(OffsetDateTime, OffsetDateTime)> = None;

    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event = RawRecord::parse(source, line)
            .map_err(|_| FlagKind::MalformedSessionLine)
            .and_then(|raw| raw.normalize(text_limit));
        let event = match event {
            Ok(event) => event,
            Err(kind) => {
                flags.push(QualityFlag::new(kind, format!("{id}:{}", idx + 1)));
                continue;
            }
        };

        match event {
            Event::Meta { cwd } => {
                if repo.is_none() {
                    repo = detect_repo(&cwd, repos);
                }
            }
            Event::Turn {
                role,
                timestamp,
                text,
                files,
            } => {
                span = Some(match span {
                    Some((start, end)) => (start.min(timestamp), end.max(timestamp)),
                    None => (timestamp, timestamp),
                });
                referenced.extend(files);
                match role {
                    Role::Assistant => assistant_turns += 1,
                    Role::User if !text.is_empty() => prompts.push((timestamp, text)),
                    Role::User => {}
                }
            }
            Event::Ignored => {}
        }
    }

    let Some(repo) = repo else {
        debug!(id, "session maps to no configured repository");
        return (None, flags);
    };
    let Some((start, end)) = span else {
        flags.push(QualityFlag::new(FlagKind::NoUserPrompts, id));
        return (None, flags);
    };
    if prompts.is_empty() {
        flags.push(QualityFlag::new(FlagKind::NoUserPrompts, id.clone()));
    }

    let root = repos.get(&repo);
    let working_set: BTreeSet<String> = referenced
        .iter()
        .filter_map(|p| repo_relative(p, root.map(PathBuf::as_path)))
        .collect();

    prompts.sort_by(|a, b| a.0.cmp(&b.0));
    let prompts = prompts
        .into_iter()
        .map(|(timestamp, text)| Prompt {
            session_id: id.clone(),
            repo: repo.clone(),
            source,
            timestamp,
            text,
        })
        .collect();

    let session = Session {
        id,
        repo,
        source,
        path: Some(path.display().to_string()),
        previous_session_id: None,
        start,
        end,
        prompts,
        assistant_turns,
        working_set,
    };
    (Some(session), flags)
}

/// Configured repository whose path contains `cwd`, preferring the deepest.
fn detect_repo(cwd: &str, repos: &BTreeMap<String, PathBuf>) -> Option<String> {
    let cwd = Path::new(cwd);
    repos
        .iter()
        .filter(|(_, root)| cwd.starts_with(root))
        .max_by_key(|(_, root)| root.components().count())
        .map(|(name, _)| name.clone())
}

/// Absolute paths inside `root` become repo-relative; paths elsewhere are dropped.
fn repo_relative(path: &str, root: Option<&Path>) -> Option<String> {
    let p = Path::new(path);
    if p.is_relative() {
        return Some(path.trim_start_matches("./").to_string());
    }
    let rel = p.strip_prefix(root?).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

/// Point each session at the latest session of the same repo and source that
/// ended before it started.
pub fn link_previous_sessions(sessions: &mut [Session]) {
    let snapshot: Vec<(String, String, AgentSource, OffsetDateTime, OffsetDateTime)> = sessions
        .iter()
        .map(|s| (s.id.clone(), s.repo.clone(), s.source, s.start, s.end))
        .collect();

    for session in sessions.iter_mut() {
        session.previous_session_id = snapshot
            .iter()
            .filter(|(id, repo, source, _, end)| {
                *id != session.id && *repo == session.repo && *source == session.source && *end < session.start
            })
            .max_by(|a, b| a.4.cmp(&b.4).then_with(|| b.0.cmp(&a.0)))
            .map(|(id, ..)| id.clone());
    }
}
