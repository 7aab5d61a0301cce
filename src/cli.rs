use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "timelapse",
    version,
    about = "Commit, symbol and agent-session attribution analytics over git history"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Pretty-print JSON output (default: compact)
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Path to configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Generation timestamp stamped into payloads (RFC 3339, default: now)
    #[arg(long, global = true)]
    pub generated_at: Option<String>,
}

/// Trailing analysis window.
#[derive(Args, Debug)]
pub struct WindowArgs {
    /// Window length in days
    #[arg(short, long, default_value = "7")]
    pub days: i64,

    /// Window end (RFC 3339, default: generation time)
    #[arg(long)]
    pub end: Option<String>,
}

/// Optional on-disk copies of the payload.
#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Also write the JSON payload to this path
    #[arg(long)]
    pub out_json: Option<PathBuf>,

    /// Also write the CSV twin to this path
    #[arg(long)]
    pub out_csv: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Repository throughput, mix, rework, coupling and commit attribution
    Repo {
        /// Configured repository (default: all)
        #[arg(short, long)]
        repo: Option<String>,

        #[command(flatten)]
        window: WindowArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Churn, coupling and velocity of one file
    File {
        #[arg(short, long)]
        repo: String,

        /// Repo-relative path
        #[arg(short, long)]
        file: String,

        #[command(flatten)]
        window: WindowArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Per-symbol churn of one file
    Symbols {
        #[arg(short, long)]
        repo: String,

        /// Repo-relative path
        #[arg(short, long)]
        file: String,

        #[command(flatten)]
        window: WindowArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Prompts, linked commits and totals of one agent session
    Session {
        /// Restrict the lookup to sessions of this repository
        #[arg(short, long)]
        repo: Option<String>,

        #[arg(short, long)]
        session_id: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Lazy-prompt lint over every session in the window
    Prompts {
        #[arg(short, long)]
        repo: Option<String>,

        #[command(flatten)]
        window: WindowArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Generate default configuration file
    Init {
        /// Path to write the configuration file (default: ~/.config/timelapse/config.toml)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}
