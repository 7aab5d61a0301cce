//! Configuration loading and generation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ErrorCode, TimelapseError};

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enable debug logging to file
    pub debug: bool,

    /// Path to log directory
    pub log_path: PathBuf,

    /// Repository id → working tree
    pub repos: BTreeMap<String, PathBuf>,

    /// Where agent session logs live
    pub sessions: SessionSources,

    /// Tunables handed to the engine
    pub analysis: AnalysisOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            log_path: default_log_path(),
            repos: BTreeMap::new(),
            sessions: SessionSources::default(),
            analysis: AnalysisOptions::default(),
        }
    }
}

impl Config {
    /// Working tree of a configured repository.
    pub fn repo_path(&self, name: &str) -> Result<&Path, TimelapseError> {
        self.repos
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| TimelapseError::unknown_repo(name))
    }

    fn expand_paths(&mut self) {
        self.log_path = expand_tilde(&self.log_path);
        for path in self.repos.values_mut() {
            *path = expand_tilde(path);
        }
        for path in self.sessions.claude_dirs.values_mut() {
            *path = expand_tilde(path);
        }
        if let Some(dir) = self.sessions.codex_dir.as_mut() {
            *dir = expand_tilde(dir);
        }
    }
}

/// Session log locations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionSources {
    /// Repository id → Claude project directory of `*.jsonl` transcripts
    pub claude_dirs: BTreeMap<String, PathBuf>,

    /// Root of Codex `*.jsonl` sessions; repo is detected from the recorded cwd
    pub codex_dir: Option<PathBuf>,
}

/// Ten years.
const MAX_SPAN_DAYS: u32 = 3650;
/// One year.
const MAX_LAG_HOURS: f64 = 8760.0;
/// One week.
const MAX_MARGIN_MINUTES: i64 = 10_080;

/// Engine tunables. Passed explicitly to every component that needs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    pub bucket_days: u32,
    pub rework_window_days: u32,
    pub coupling_top_n: usize,
    pub min_shared_commits: usize,
    pub max_changeset_size: usize,
    pub lazy_context_window: usize,
    pub lazy_min_lookback: usize,
    pub lazy_score_threshold: u32,
    pub max_lag_hours: f64,
    pub attribution_lead_minutes: i64,
    pub attribution_trail_minutes: i64,
    pub parse_timeout_ms: u64,
    pub prompt_text_limit: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            bucket_days: 7,
            rework_window_days: 7,
            coupling_top_n: 25,
            min_shared_commits: 1,
            max_changeset_size: 50,
            lazy_context_window: 3,
            lazy_min_lookback: 2,
            lazy_score_threshold: 3,
            max_lag_hours: 12.0,
            attribution_lead_minutes: 5,
            attribution_trail_minutes: 30,
            parse_timeout_ms: 2000,
            prompt_text_limit: 300,
        }
    }
}

impl AnalysisOptions {
    pub fn parse_timeout(&self) -> Duration {
        Duration::from_millis(self.parse_timeout_ms)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<(), TimelapseError> {
        let invalid = |msg: &str| Err(TimelapseError::new(ErrorCode::InvalidConfig, msg));
        if self.bucket_days == 0 {
            return invalid("analysis.bucket_days must be at least 1");
        }
        if self.rework_window_days == 0 {
            return invalid("analysis.rework_window_days must be at least 1");
        }
        if self.max_changeset_size == 0 {
            return invalid("analysis.max_changeset_size must be at least 1");
        }
        if self.bucket_days > MAX_SPAN_DAYS || self.rework_window_days > MAX_SPAN_DAYS {
            return invalid("analysis.bucket_days and analysis.rework_window_days must be at most 3650");
        }
        if !self.max_lag_hours.is_finite() || self.max_lag_hours < 0.0 {
            return invalid("analysis.max_lag_hours must be a non-negative number");
        }
        if self.max_lag_hours > MAX_LAG_HOURS {
            return invalid("analysis.max_lag_hours must be at most 8760");
        }
        if self.attribution_lead_minutes < 0 || self.attribution_trail_minutes < 0 {
            return invalid("analysis.attribution_*_minutes must not be negative");
        }
        if self.attribution_lead_minutes > MAX_MARGIN_MINUTES || self.attribution_trail_minutes > MAX_MARGIN_MINUTES {
            return invalid("analysis.attribution_*_minutes must be at most 10080");
        }
        Ok(())
    }
}

/// Default log path: ~/.config/timelapse/logs
fn default_log_path() -> PathBuf {
    config_dir().join("logs")
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("timelapse")
}

/// `~/x` → `$HOME/x`; other paths are returned unchanged.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// Configuration service.
pub struct ConfigService;

impl ConfigService {
    /// Get the default configuration file path.
    pub fn default_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Load configuration from file.
    ///
    /// If `path` is `None`, uses the default path.
    /// If the file doesn't exist, returns default configuration.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = path.map(PathBuf::from).unwrap_or_else(Self::default_path);
        let config_dir = path.parent();

        if !path.exists() {
            let mut config = Config::default();
            if let Some(dir) = config_dir {
                config.log_path = dir.join("logs");
            }
            return Ok(config);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content).map_err(|e| {
            TimelapseError::new(
                ErrorCode::InvalidConfig,
                format!("Failed to parse config file {}: {e}", path.display()),
            )
        })?;

        // If log_path was not explicitly set, use config file's directory/logs
        if config.log_path == default_log_path()
            && let Some(dir) = config_dir
        {
            config.log_path = dir.join("logs");
        }

        config.expand_paths();
        config.analysis.validate()?;
        Ok(config)
    }

    /// Generate default configuration file at the default path.
    pub fn generate_default() -> Result<()> {
        Self::generate_at(&Self::default_path())
    }

    /// Generate default configuration file at the specified path.
    pub fn generate_at(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = Self::default_config_content();
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Generate default configuration content with comments.
    fn default_config_content() -> String {
        r#"# timelapse configuration file

# Enable debug logging to file (default: false)
debug = false

# Path to log directory (default: ~/.config/timelapse/logs)
# log_path = "~/.config/timelapse/logs"

# Repositories to analyze: id = working tree
[repos]
# app = "~/src/app"

[sessions]
# Claude transcripts per repository id
# claude_dirs = { app = "~/.claude/projects/-home-me-src-app" }
# Codex sessions; the repository is detected from each session's cwd
# codex_dir = "~/.codex/sessions"

[analysis]
# bucket_days = 7
# rework_window_days = 7
# coupling_top_n = 25
# min_shared_commits = 1
# max_changeset_size = 50
# lazy_context_window = 3
# lazy_min_lookback = 2
# lazy_score_threshold = 3
# max_lag_hours = 12.0
# attribution_lead_minutes = 5
# attribution_trail_minutes = 30
# parse_timeout_ms = 2000
# prompt_text_limit = 300
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_path_ends_with_config_toml() {
        let path = ConfigService::default_path();
        assert!(path.ends_with("timelapse/config.toml"));
    }

    #[test]
    fn test_generate_at_creates_parseable_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("nested").join("config.toml");

        ConfigService::generate_at(&config_path).unwrap();

        let content = fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("debug = false"));
        assert!(content.contains("[analysis]"));
        let config = ConfigService::load(Some(&config_path)).unwrap();
        assert_eq!(config.analysis, AnalysisOptions::default());
    }

    #[test]
    fn test_load_returns_defaults_when_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("nonexistent.toml");

        let config = ConfigService::load(Some(&config_path)).unwrap();

        assert!(!config_path.exists());
        assert!(!config.debug);
        assert!(config.repos.is_empty());
        assert_eq!(config.log_path, dir.path().join("logs"));
    }

    #[test]
    fn test_load_repos_sessions_and_analysis() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[repos]
app = "/srv/app"

[sessions]
claude_dirs = { app = "/logs/claude/app" }
codex_dir = "/logs/codex"

[analysis]
bucket_days = 14
max_lag_hours = 6.5
"#,
        )
        .unwrap();

        let config = ConfigService::load(Some(&config_path)).unwrap();
        assert_eq!(config.repo_path("app").unwrap(), Path::new("/srv/app"));
        assert_eq!(
            config.sessions.claude_dirs["app"],
            PathBuf::from("/logs/claude/app")
        );
        assert_eq!(config.sessions.codex_dir, Some(PathBuf::from("/logs/codex")));
        assert_eq!(config.analysis.bucket_days, 14);
        assert_eq!(config.analysis.max_lag_hours, 6.5);
        assert_eq!(config.analysis.coupling_top_n, 25);
    }

    #[test]
    fn test_unknown_repo_is_classified() {
        let err = Config::default().repo_path("ghost").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownRepo);
    }

    #[test]
    fn test_load_invalid_toml_is_invalid_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("bad.toml");
        fs::write(&config_path, "not valid [[[").unwrap();

        let err = ConfigService::load(Some(&config_path)).unwrap_err();
        let classified = err.downcast_ref::<TimelapseError>().unwrap();
        assert_eq!(classified.code, ErrorCode::InvalidConfig);
    }

    #[test]
    fn test_zero_bucket_days_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "[analysis]\nbucket_days = 0\n").unwrap();

        let err = ConfigService::load(Some(&config_path)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<TimelapseError>().unwrap().code,
            ErrorCode::InvalidConfig
        );
    }

    #[test]
    fn test_out_of_range_tunables_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        for body in [
            "max_lag_hours = 1e300",
            "attribution_lead_minutes = 9223372036854775807",
            "attribution_trail_minutes = 20000",
            "bucket_days = 4000000000",
        ] {
            fs::write(&config_path, format!("[analysis]\n{body}\n")).unwrap();
            let err = ConfigService::load(Some(&config_path)).unwrap_err();
            assert_eq!(
                err.downcast_ref::<TimelapseError>().unwrap().code,
                ErrorCode::InvalidConfig,
                "{body}"
            );
        }
        assert!(AnalysisOptions::default().validate().is_ok());
    }

    #[test]
    fn test_tilde_expansion() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde(Path::new("~/src/app")), home.join("src/app"));
        assert_eq!(expand_tilde(Path::new("/abs/path")), PathBuf::from("/abs/path"));
    }
}
