use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use time::OffsetDateTime;

use timelapse::cli::{Cli, Commands, OutputArgs, WindowArgs};
use timelapse::config::ConfigService;
use timelapse::error::{ErrorCode, TimelapseError};
use timelapse::models::report::{CsvTwin, Report};
use timelapse::models::window::{TimeWindow, parse_utc};
use timelapse::output;
use timelapse::service::AppService;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        let (code, message) = classify_error(&e);
        let error = serde_json::json!({
            "error": { "code": code, "message": message }
        });
        println!("{error}");
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn classify_error(e: &anyhow::Error) -> (String, String) {
    if let Some(te) = e.downcast_ref::<TimelapseError>() {
        (te.code.to_string(), te.message.clone())
    } else {
        (ErrorCode::IoError.to_string(), format!("{e:#}"))
    }
}

fn parse_timestamp(raw: &str, code: ErrorCode, what: &str) -> Result<OffsetDateTime> {
    parse_utc(raw)
        .ok_or_else(|| TimelapseError::new(code, format!("Invalid {what} timestamp: {raw}")).into())
}

fn resolve_window(service: &AppService, args: &WindowArgs) -> Result<TimeWindow> {
    let end = args
        .end
        .as_deref()
        .map(|raw| parse_timestamp(raw, ErrorCode::InvalidWindow, "window end"))
        .transpose()?;
    service.window(args.days, end)
}

/// Print the payload and write the requested copies.
fn emit<T>(report: &Report<T>, output: &OutputArgs, pretty: bool) -> Result<()>
where
    T: Serialize + CsvTwin,
{
    let json = output::to_json(report, pretty)?;
    if let Some(path) = &output.out_json {
        output::write_json(path, report, pretty)?;
    }
    if let Some(path) = &output.out_csv {
        output::write_csv(path, &report.body.csv_rows())?;
    }
    println!("{json}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

fn run(cli: Cli) -> Result<()> {
    let pretty = cli.pretty;

    // Load configuration
    let config = ConfigService::load(cli.config.as_deref())?;

    // Initialize logging if debug mode (CLI flag or config)
    if cli.debug || config.debug {
        timelapse::logger::init(&config)?;
    }

    if let Commands::Init { path } = &cli.command {
        let config_path = if let Some(p) = path {
            ConfigService::generate_at(p)?;
            p.clone()
        } else {
            ConfigService::generate_default()?;
            ConfigService::default_path()
        };
        eprintln!("Configuration file created at: {}", config_path.display());
        return Ok(());
    }

    let generated_at = match cli.generated_at.as_deref() {
        Some(raw) => parse_timestamp(raw, ErrorCode::InvalidRequest, "generation")?,
        None => OffsetDateTime::now_utc(),
    };
    let service = AppService::from_config(config, generated_at);

    match cli.command {
        Commands::Repo { repo, window, output } => {
            let window = resolve_window(&service, &window)?;
            let report = service.repo_report(repo.as_deref(), &window)?;
            emit(&report, &output, pretty)
        }
        Commands::File {
            repo,
            file,
            window,
            output,
        } => {
            let window = resolve_window(&service, &window)?;
            let report = service.file_report(&repo, &file, &window)?;
            emit(&report, &output, pretty)
        }
        Commands::Symbols {
            repo,
            file,
            window,
            output,
        } => {
            let window = resolve_window(&service, &window)?;
            let report = service.symbol_report(&repo, &file, &window)?;
            emit(&report, &output, pretty)
        }
        Commands::Session {
            repo,
            session_id,
            output,
        } => {
            let report = service.session_report(&session_id, repo.as_deref())?;
            emit(&report, &output, pretty)
        }
        Commands::Prompts { repo, window, output } => {
            let window = resolve_window(&service, &window)?;
            let report = service.prompt_report(repo.as_deref(), &window)?;
            emit(&report, &output, pretty)
        }
        Commands::Init { .. } => unreachable!("handled above"),
    }
}
