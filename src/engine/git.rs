use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, bail};
use tracing::debug;

use crate::error::{ErrorCode, TimelapseError};
use crate::models::window::{TimeWindow, format_utc};

/// Record separator emitted before each commit header.
pub const RECORD_SEP: char = '\x1e';
/// Field separator inside a commit header.
pub const FIELD_SEP: char = '\x1f';

/// Read-only access to one repository's history.
///
/// Everything the engine needs from version control goes through this trait so
/// the analysis can run against a recorded snapshot in tests.
pub trait VcsSource: Sync {
    /// `git log` output in the header/numstat layout `history::parse_log` reads.
    fn log(&self, window: &TimeWindow) -> Result<String>;

    /// File content at `rev`, `None` when the path does not exist there.
    fn show_file(&self, rev: &str, path: &str) -> Option<String>;

    /// Zero-context unified diff of `paths` introduced by `sha`.
    fn diff(&self, sha: &str, paths: &[&str]) -> Option<String>;
}

/// `VcsSource` backed by the `git` binary.
pub struct GitCli {
    dir: PathBuf,
}

impl GitCli {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()
            .map_err(|e| TimelapseError::new(ErrorCode::GitError, format!("Failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(TimelapseError::new(
                ErrorCode::GitError,
                format!("git {} failed: {}", args.first().unwrap_or(&""), stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl VcsSource for GitCli {
    fn log(&self, window: &TimeWindow) -> Result<String> {
        let since = format!("--since={}", format_utc(window.start));
        let until = format!("--until={}", format_utc(window.end));
        let format = "--format=%x1e%H%x1f%aI%x1f%P%x1f%s";
        debug!(dir = %self.dir.display(), %since, %until, "reading git log");
        self.run(&[
            "log",
            &since,
            &until,
            "-M",
            "--diff-merges=first-parent",
            "--numstat",
            format,
        ])
    }

    fn show_file(&self, rev: &str, path: &str) -> Option<String> {
        let spec = format!("{rev}:{path}");
        self.run(&["show", &spec]).ok()
    }

    fn diff(&self, sha: &str, paths: &[&str]) -> Option<String> {
        let mut args = vec!["show", "--format=", "--unified=0", "-M", sha, "--"];
        args.extend_from_slice(paths);
        self.run(&args).ok()
    }
}
