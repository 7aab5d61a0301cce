use std::collections::HashMap;

use anyhow::Result;

use crate::engine::git::VcsSource;
use crate::models::window::TimeWindow;

/// In-memory `VcsSource` keyed by revision and path.
#[derive(Default)]
pub struct FakeVcs {
    pub log: String,
    pub files: HashMap<(String, String), String>,
    pub diffs: HashMap<String, String>,
}

impl FakeVcs {
    pub fn with_file(mut self, rev: &str, path: &str, content: &str) -> Self {
        self.files.insert((rev.to_string(), path.to_string()), content.to_string());
        self
    }

    pub fn with_diff(mut self, sha: &str, diff: &str) -> Self {
        self.diffs.insert(sha.to_string(), diff.to_string());
        self
    }
}

impl VcsSource for FakeVcs {
    fn log(&self, _window: &TimeWindow) -> Result<String> {
        Ok(self.log.clone())
    }

    fn show_file(&self, rev: &str, path: &str) -> Option<String> {
        self.files.get(&(rev.to_string(), path.to_string())).cloned()
    }

    fn diff(&self, sha: &str, _paths: &[&str]) -> Option<String> {
        self.diffs.get(sha).cloned()
    }
}
