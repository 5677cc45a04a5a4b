use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use survey_app::{render_pending, render_report, render_status, App};
use survey_core::SurveyError;

#[derive(Parser)]
#[command(
    name = "tree-survey",
    about = "Offline tree survey records and their sync to the survey server",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Print JSON instead of the text summary
    #[arg(long, global = true)]
    json: bool,

    /// Config file to use instead of $TREE_SURVEY_CONFIG or the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Show unsynced counts per collection and the last successful sync
    Status,
    /// List every record waiting to be uploaded
    Pending,
    /// Upload pending records to the server
    Sync,
    /// Create local records from a JSON document {projects, sections, groups, trees}
    Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => survey_config::load_from_path(path)?,
        None => survey_config::load_from_env()?,
    };
    init_file_logging(&config.log_path())?;
    let app = App::from_config(&config)?;

    match cli.command {
        Command::Status => {
            let status = app.status()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", render_status(&status));
            }
        }
        Command::Pending => {
            let pending = app.pending()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&pending)?);
            } else {
                print!("{}", render_pending(&pending));
            }
        }
        Command::Sync => {
            let report = app.sync().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render_report(&report));
            }
            if report.total_failed() > 0 {
                return Ok(ExitCode::from(2));
            }
        }
        Command::Import { file } => {
            let counts = app.import_file(&file)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                println!("imported {} record(s) from {}", counts.total(), file.display());
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_file_logging(log_path: &Path) -> Result<(), SurveyError> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|error| {
                SurveyError::Configuration(format!(
                    "failed to create tree-survey log directory '{}': {error}",
                    parent.display()
                ))
            })?;
        }
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|error| {
            SurveyError::Configuration(format!(
                "failed to open tree-survey log file '{}': {error}",
                log_path.display()
            ))
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();

    Ok(())
}
