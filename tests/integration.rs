use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const GENERATED_AT: &str = "2026-02-08T00:00:00Z";

fn cargo_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_timelapse"))
}

fn git(dir: &Path, date: Option<&str>, args: &[&str]) {
    let mut cmd = Command::new("git");
    cmd.current_dir(dir)
        .args(["-c", "user.name=Dev", "-c", "user.email=dev@example.com", "-c", "commit.gpgsign=false"])
        .args(args);
    if let Some(date) = date {
        cmd.env("GIT_AUTHOR_DATE", date).env("GIT_COMMITTER_DATE", date);
    }
    let status = cmd.output().expect("failed to run git").status;
    assert!(status.success(), "git {args:?} failed");
}

fn commit_all(dir: &Path, date: &str, message: &str) {
    git(dir, None, &["add", "-A"]);
    git(dir, Some(date), &["commit", "-q", "-m", message]);
}

fn toml_str(path: &Path) -> String {
    toml::Value::String(path.display().to_string()).to_string()
}

/// A two-commit repository, one Claude session and a config pointing at both.
struct Workspace {
    dir: TempDir,
    repo: PathBuf,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("app");
        fs::create_dir_all(&repo).unwrap();
        git(&repo, None, &["init", "-q"]);

        fs::write(
            repo.join("cli.py"),
            "def parse_args(argv):\n    i = 0\n    return argv[i:]\n",
        )
        .unwrap();
        fs::write(repo.join("test_cli.py"), "def test_parse():\n    pass\n").unwrap();
        commit_all(&repo, "2026-02-03T10:03:00Z", "fix parse_args");

        fs::write(
            repo.join("cli.py"),
            "def parse_args(argv):\n    i = 1\n    return argv[i:]\n",
        )
        .unwrap();
        commit_all(&repo, "2026-02-04T09:00:00Z", "start at one");

        let sessions = dir.path().join("claude");
        fs::create_dir_all(&sessions).unwrap();
        let lines = [
            serde_json::json!({
                "type": "user",
                "timestamp": "2026-02-03T10:00:00Z",
                "message": {"content": "fix the off-by-one in parse_args"}
            }),
            serde_json::json!({
                "type": "assistant",
                "timestamp": "2026-02-03T10:01:00Z",
                "message": {"content": [
                    {"type": "tool_use", "name": "Edit", "input": {"file_path": repo.join("cli.py")}}
                ]}
            }),
        ];
        let log: String = lines.iter().map(|l| format!("{l}\n")).collect();
        fs::write(sessions.join("abc-session.jsonl"), log).unwrap();

        let config = dir.path().join("config.toml");
        fs::write(
            &config,
            format!(
                "[repos]\napp = {}\n\n[sessions.claude_dirs]\napp = {}\n",
                toml_str(&repo),
                toml_str(&sessions)
            ),
        )
        .unwrap();

        Self { dir, repo, config }
    }

    fn run(&self, args: &[&str]) -> Output {
        cargo_bin()
            .arg("--config")
            .arg(&self.config)
            .args(["--generated-at", GENERATED_AT])
            .args(args)
            .output()
            .expect("failed to run")
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("invalid JSON")
    }
}

fn error_code(output: &Output) -> String {
    assert!(!output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("invalid JSON");
    json["error"]["code"].as_str().unwrap().to_string()
}

#[test]
fn repo_report_attributes_commit_to_prompt() {
    let ws = Workspace::new();
    let json = ws.json(&["repo", "--days", "7"]);

    assert_eq!(json["schema_version"], "v0.1");
    assert_eq!(json["generated_at"], GENERATED_AT);
    assert_eq!(json["window"]["start"], "2026-02-01T00:00:00Z");
    assert_eq!(json["throughput"]["commits"], 2);
    assert_eq!(json["throughput"]["prompts"], 1);
    assert_eq!(json["top_churn_files"][0]["file"], "cli.py");

    let first = &json["commit_attribution"][0];
    assert_eq!(first["status"], "attributed");
    assert_eq!(first["session_id"], "abc-session");
    assert_eq!(first["nearest_prompt_text"], "fix the off-by-one in parse_args");
    assert!((first["lag_hours"].as_f64().unwrap() - 0.05).abs() < 1e-9);

    let second = &json["commit_attribution"][1];
    assert_eq!(second["status"], "unattributed");
    assert_eq!(second["flag"], "lag_exceeds_max");
    assert_eq!(json["lazy_commit_links"].as_array().unwrap().len(), 0);
}

#[test]
fn identical_runs_are_byte_identical() {
    let ws = Workspace::new();
    let a = ws.run(&["repo", "--days", "7"]);
    let b = ws.run(&["repo", "--days", "7"]);
    assert!(a.status.success());
    assert_eq!(a.stdout, b.stdout);
}

#[test]
fn out_options_write_json_and_csv() {
    let ws = Workspace::new();
    let json_path = ws.dir.path().join("out/repo.json");
    let csv_path = ws.dir.path().join("out/commits.csv");
    let stdout = ws.run(&[
        "repo",
        "--days",
        "7",
        "--out-json",
        json_path.to_str().unwrap(),
        "--out-csv",
        csv_path.to_str().unwrap(),
    ]);
    assert!(stdout.status.success());

    let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(written["throughput"]["commits"], 2);

    let csv = fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("sha,repo,ts,subject"));
    assert!(lines[1].contains("cli.py|test_cli.py"));
    assert!(lines[1].contains("abc-session"));
}

#[test]
fn file_report_coupling_and_velocity() {
    let ws = Workspace::new();
    let json = ws.json(&["file", "--repo", "app", "--file", "cli.py", "--days", "7"]);
    assert_eq!(json["summary"]["touches"], 2);
    assert_eq!(json["coupling"][0]["other_file"], "test_cli.py");
    assert_eq!(json["coupling"][0]["coupling"], 0.5);
    assert_eq!(json["velocity"].as_array().unwrap().len(), 1);
    assert_eq!(json["velocity"][0]["commit_touches"], 2);
    assert_eq!(json["retouch_ratio"], 1.0);
}

#[test]
fn symbol_report_on_python_function() {
    let ws = Workspace::new();
    let json = ws.json(&["symbols", "--repo", "app", "--file", "cli.py", "--days", "7"]);
    let symbols = json["symbols"].as_array().unwrap();
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0]["symbol_display"], "parse_args");
    assert_eq!(symbols[0]["touches"], 2);
    assert_eq!(symbols[0]["added"], 4);
    assert_eq!(symbols[0]["deleted"], 1);
    assert_eq!(json["extraction"]["tree_sitter"], 2);
}

#[test]
fn session_report_links_first_commit() {
    let ws = Workspace::new();
    let json = ws.json(&["session", "--session-id", "abc-session"]);
    assert_eq!(json["session"]["repo"], "app");
    assert_eq!(json["session"]["working_set"][0], "cli.py");
    assert_eq!(json["totals"]["linked_commits"], 1);
    assert_eq!(json["totals"]["request_count"], 1);
    assert_eq!(json["commit_attribution"].as_array().unwrap().len(), 1);
}

#[test]
fn prompt_lint_payload() {
    let ws = Workspace::new();
    let json = ws.json(&["prompts", "--days", "7"]);
    assert_eq!(json["summary"]["prompts"], 1);
    assert_eq!(json["summary"]["lazy_prompts"], 0);
    assert_eq!(json["prompts"][0]["context_scope"], "insufficient");
}

#[test]
fn unknown_repo_is_reported_as_json_error() {
    let ws = Workspace::new();
    let output = ws.run(&["file", "--repo", "ghost", "--file", "cli.py"]);
    assert_eq!(error_code(&output), "UNKNOWN_REPO");
}

#[test]
fn invalid_window_end_is_rejected() {
    let ws = Workspace::new();
    let output = ws.run(&["repo", "--end", "last tuesday"]);
    assert_eq!(error_code(&output), "INVALID_WINDOW");
    let output = ws.run(&["repo", "--days", "0"]);
    assert_eq!(error_code(&output), "INVALID_WINDOW");
    let output = ws.run(&["repo", "--days", "10000000"]);
    assert_eq!(error_code(&output), "INVALID_WINDOW");
}

#[test]
fn unreadable_config_is_invalid_config() {
    let ws = Workspace::new();
    fs::write(&ws.config, "repos = [not toml").unwrap();
    let output = ws.run(&["repo"]);
    assert_eq!(error_code(&output), "INVALID_CONFIG");
}

#[test]
fn out_of_window_history_is_empty_not_an_error() {
    let ws = Workspace::new();
    let json = ws.json(&["repo", "--days", "7", "--end", "2026-01-01T00:00:00Z"]);
    assert_eq!(json["throughput"]["commits"], 0);
    assert_eq!(json["repos"][0], "app");
    assert_eq!(json["rework_series"].as_array().unwrap().len(), 1);
}

#[test]
fn analysis_leaves_the_repository_untouched() {
    let ws = Workspace::new();
    ws.json(&["symbols", "--repo", "app", "--file", "cli.py", "--days", "7"]);
    let status = Command::new("git")
        .current_dir(&ws.repo)
        .args(["status", "--porcelain"])
        .output()
        .unwrap();
    assert!(status.stdout.is_empty());
}

#[test]
fn init_writes_commented_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/config.toml");
    let output = cargo_bin()
        .args(["init", "--path", path.to_str().unwrap()])
        .output()
        .expect("failed to run");
    assert!(output.status.success());
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("[analysis]"));
    assert!(content.contains("max_lag_hours"));
}
