//! Releaser - Entry Point
//!
//! Builds a Flutter app, uploads the artifact to the release server over
//! SFTP and records the release in PostgreSQL.

use std::path::PathBuf;
use std::pin::pin;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use releaser::config::{RequestOverrides, Settings};
use releaser::deploy::{DeployEvent, DeployOrchestrator, PipelineStage, RunManager, RunOutcome};
use releaser::errors::ReleaseError;
use releaser::logs::{init_logging, LogLevel, LogOptions};
use releaser::models::request::AppVersion;
use releaser::probe::ProbeTarget;
use releaser::store::PgReleaseStore;
use releaser::utils::version_info;

const EXIT_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(version, about = "Build, upload and record app releases")]
struct Cli {
    /// Settings file
    #[arg(
        long,
        short,
        env = "RELEASER_CONFIG",
        global = true,
        default_value = "releaser.json"
    )]
    config: PathBuf,

    /// Overrides the log level from the settings file
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build, upload and record a release
    Deploy(DeployArgs),
    /// Check the database connection
    TestDb,
    /// Check the SFTP connection
    TestSftp,
    /// Create the app_updates table if it is missing
    InitDb,
    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct DeployArgs {
    /// Version name, e.g. 1.4.0
    #[arg(long, requires = "version_code")]
    version_name: Option<String>,

    /// Version code, a positive integer
    #[arg(long, requires = "version_name")]
    version_code: Option<u32>,

    /// Release notes
    #[arg(long)]
    notes: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        return match print_version() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{} {:#}", "error:".red().bold(), e);
                ExitCode::from(EXIT_FAILED)
            }
        };
    }

    let settings = match Settings::load(&cli.config).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: cli.log_level.unwrap_or(settings.log_level),
        log_dir: settings.log_dir.clone(),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let manager = RunManager::new();
    let result = match cli.command {
        Commands::Deploy(args) => deploy(&manager, &settings, args).await.map(report_outcome),
        Commands::TestDb => match settings.database_params() {
            Ok(params) => probe(&manager, ProbeTarget::Database(params)).await,
            Err(e) => Err(e),
        },
        Commands::TestSftp => match settings.sftp_params() {
            Ok(params) => probe(&manager, ProbeTarget::Transfer(params)).await,
            Err(e) => Err(e),
        },
        Commands::InitDb => init_db(&settings).await,
        Commands::Version => Ok(ExitCode::SUCCESS),
    };

    result.unwrap_or_else(|e| {
        error!("{}", e);
        eprintln!("{} {}", "error:".red().bold(), e);
        ExitCode::from(exit_code(&e))
    })
}

async fn deploy(
    manager: &RunManager,
    settings: &Settings,
    args: DeployArgs,
) -> Result<RunOutcome, ReleaseError> {
    let version = match (args.version_name, args.version_code) {
        (Some(name), Some(code)) => Some(AppVersion { name, code }),
        _ => None,
    };
    let overrides = RequestOverrides {
        version,
        release_notes: args.notes,
    };
    let request = settings.to_request(&overrides)?;
    let orchestrator = Arc::new(DeployOrchestrator::for_request(&request));
    let mut handle = manager.start_run(request, orchestrator)?;
    info!("Run {} started", handle.id());

    let mut ctrl_c = pin!(tokio::signal::ctrl_c());
    let mut bar: Option<ProgressBar> = None;
    loop {
        let cancelling = handle.is_cancelled();
        tokio::select! {
            event = handle.next_event() => match event {
                Some(DeployEvent::Output(line)) => match &bar {
                    Some(bar) => bar.suspend(|| println!("{}", line)),
                    None => println!("{}", line),
                },
                Some(DeployEvent::StageChanged(stage)) => {
                    if let Some(bar) = bar.take() {
                        bar.finish_and_clear();
                    }
                    if stage == PipelineStage::Uploading {
                        bar = Some(upload_bar());
                    }
                }
                Some(DeployEvent::UploadProgress { sent, total }) => {
                    if let Some(bar) = &bar {
                        bar.set_length(total);
                        bar.set_position(sent);
                    }
                }
                Some(DeployEvent::Finished(_)) => {}
                None => break,
            },
            _ = &mut ctrl_c, if !cancelling => {
                println!("{}", "Cancelling, waiting for the current step to stop...".yellow());
                handle.cancel();
            }
        }
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    handle.wait().await
}

fn print_version() -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&version_info()).context("encoding version info")?;
    println!("{}", json);
    Ok(())
}

fn upload_bar() -> ProgressBar {
    let style = ProgressStyle::with_template(
        "  {bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    ProgressBar::new(0).with_style(style)
}

fn report_outcome(outcome: RunOutcome) -> ExitCode {
    match outcome.stage {
        PipelineStage::Succeeded => {
            println!("{}", outcome.message.green().bold());
            ExitCode::SUCCESS
        }
        PipelineStage::Cancelled => {
            println!("{}", outcome.message.yellow().bold());
            ExitCode::from(EXIT_CANCELLED)
        }
        _ => {
            println!("{}", outcome.message.red().bold());
            ExitCode::from(EXIT_FAILED)
        }
    }
}

async fn probe(manager: &RunManager, target: ProbeTarget) -> Result<ExitCode, ReleaseError> {
    let message = manager.test_connection(target).await?;
    println!("{}", message.green().bold());
    Ok(ExitCode::SUCCESS)
}

async fn init_db(settings: &Settings) -> Result<ExitCode, ReleaseError> {
    PgReleaseStore::new(settings.database_params()?)
        .ensure_schema()
        .await?;
    println!("{}", "Table app_updates is ready.".green().bold());
    Ok(ExitCode::SUCCESS)
}

fn exit_code(err: &ReleaseError) -> u8 {
    match err {
        ReleaseError::ConfigError(_) | ReleaseError::ValidationError(_) => EXIT_CONFIG,
        ReleaseError::Cancelled => EXIT_CANCELLED,
        _ => EXIT_FAILED,
    }
}
