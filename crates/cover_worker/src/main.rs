//! Cover Worker - renders AI covers for one song request.
//!
//! The request comes from the command line or the environment. Events
//! are printed to stdout as JSON lines, logs go to stderr and
//! `<logs>/<request_id>.log`.
//!
//! Exit codes:
//! - 0: every track completed and was delivered
//! - 1: setup or configuration failure
//! - 2: at least one track failed
//! - 3: results could not be uploaded or announced

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use cover_core::config::ConfigManager;
use cover_core::logging::init_tracing;
use cover_core::models::{Job, JobMetadata, RequestEvent};
use cover_core::orchestrator::{CancelHandle, Orchestrator, RequestError, RequestOutcome};

/// Command-line arguments for cover-worker
#[derive(Parser, Debug)]
#[command(name = "cover-worker")]
#[command(about = "Render AI covers for one song request")]
#[command(version)]
struct Args {
    /// Song request identifier
    #[arg(long, env = "COVER_REQUEST_ID")]
    request_id: String,

    /// Voice model to sing with
    #[arg(long, env = "COVER_VOICE_MODEL")]
    voice_model: String,

    /// Source audio URL of track 1
    #[arg(long, env = "COVER_SOURCE_URL_1")]
    source_1: String,

    /// Source audio URL of track 2
    #[arg(long, env = "COVER_SOURCE_URL_2")]
    source_2: String,

    /// Config file, created with defaults when missing
    #[arg(short, long, default_value = "cover-worker.toml", env = "COVER_CONFIG")]
    config: PathBuf,

    /// Song title forwarded in the completion notification
    #[arg(long, env = "COVER_SONG_TITLE")]
    title: Option<String>,

    /// Requesting user forwarded in the completion notification
    #[arg(long, env = "COVER_REQUESTED_BY")]
    requested_by: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("cover-worker: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut config = ConfigManager::new(&args.config);
    config
        .load_or_create()
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    config
        .ensure_dirs_exist()
        .context("Failed to create working directories")?;
    init_tracing(config.settings().logging.level);

    let settings = config.into_settings();
    let offsets = settings.pitch_offsets_for(&args.voice_model);
    let job = Job::new(
        &args.request_id,
        &args.voice_model,
        vec![args.source_1, args.source_2],
        offsets,
    )
    .context("Invalid request")?
    .with_metadata(JobMetadata {
        song_title: args.title,
        requested_by: args.requested_by,
    });

    let orchestrator = Orchestrator::builder(settings)
        .build()
        .context("Failed to set up the render engine")?;

    info!(
        "Starting request {} with model {} at offsets {:?}",
        job.request_id(),
        job.voice_model_id(),
        job.pitch_offsets()
    );

    let cancel = CancelHandle::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing work in flight");
            on_signal.cancel();
        }
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<RequestEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize event: {}", e),
            }
        }
    });

    let result = orchestrator.process_request(&job, &tx, &cancel).await;
    drop(tx);
    if let Err(e) = printer.await {
        warn!("Event printer stopped: {}", e);
    }

    match result {
        Ok(outcome) => Ok(summarize(&outcome)),
        Err(RequestError::RequestDeliveryFailed {
            message, outcome, ..
        }) => {
            summarize(&outcome);
            error!("Delivery failed: {}", message);
            Ok(ExitCode::from(3))
        }
        Err(e) => Err(e.into()),
    }
}

/// Log the outcome and pick the exit code.
fn summarize(outcome: &RequestOutcome) -> ExitCode {
    let completed = outcome.completed_indices();
    let failed = outcome.failed_indices();
    info!(
        "Request {} finished: completed {:?}, failed {:?}, {} pairs published",
        outcome.request_id,
        completed,
        failed,
        outcome.audio_pairs().len()
    );
    for err in outcome.failed() {
        error!("{}", err);
    }

    if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
