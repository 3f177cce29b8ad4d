//! vortex-fetch - Main entry point
//!
//! Runs the fetch and transcription pipelines from the terminal, with the
//! console transport standing in for a chat client.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vortex_common::config::{load_config, prepare_environment, LoggingConfig};
use vortex_fetch::ledger::Identity;
use vortex_fetch::pipeline::{messages, Completion, Inbound};
use vortex_fetch::process::TokioProcessRunner;
use vortex_fetch::transport::{ChatTransport, ConsoleTransport, UploadKind, UploadRef};
use vortex_fetch::AppState;

/// Command-line arguments for vortex-fetch
#[derive(Parser, Debug)]
#[command(name = "vortex-fetch")]
#[command(about = "Download media, identify its music and fetch the song")]
#[command(after_help = messages::HELP)]
#[command(version)]
struct Args {
    /// Configuration file (overrides VORTEX_CONFIG and the default locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory delivered files are copied into
    #[arg(short, long, global = true, env = "VORTEX_OUTPUT_DIR")]
    output: Option<PathBuf>,

    /// Requester id used for file prefixes and activity accounting
    #[arg(long, global = true, default_value = "1")]
    user_id: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a video link, identify its music and offer the song
    Fetch {
        url: String,

        /// Accept the song offer without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Transcribe a local audio, voice or video file
    Transcribe { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging)?;

    info!(
        "Starting vortex-fetch v{} ({})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    );

    let download_dir =
        prepare_environment(&config).context("Failed to prepare download directory")?;
    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| config.root_folder().join("delivered"));
    info!("Downloads: {}", download_dir.display());
    info!("Delivered files: {}", output_dir.display());

    let transport = Arc::new(ConsoleTransport::new(&output_dir));
    let state = AppState::from_config(
        &config,
        download_dir,
        Arc::clone(&transport) as Arc<dyn ChatTransport>,
        Arc::new(TokioProcessRunner::new()),
    )?;

    let identity = console_identity(args.user_id);
    let chat = args.user_id;

    match args.command {
        Command::Fetch { url, yes } => {
            let completion = state
                .dispatcher
                .dispatch(Inbound::Link {
                    identity: identity.clone(),
                    chat,
                    url,
                    event_id: event_id(),
                })
                .await;

            let Some(Completion::MediaDelivered { .. }) = completion else {
                return Ok(());
            };

            for offer in transport.take_offers().await {
                if !yes && !confirm(&offer.label).await? {
                    continue;
                }
                state
                    .dispatcher
                    .dispatch(Inbound::Callback {
                        identity: identity.clone(),
                        chat,
                        data: offer.callback_data,
                    })
                    .await;
            }
        }
        Command::Transcribe { file } => {
            let file = file
                .canonicalize()
                .with_context(|| format!("Cannot read {}", file.display()))?;
            let upload = UploadRef {
                file_id: file.to_string_lossy().into_owned(),
                file_name: file.file_name().map(|n| n.to_string_lossy().into_owned()),
                kind: upload_kind(&file),
            };
            state
                .dispatcher
                .dispatch(Inbound::Upload {
                    identity,
                    chat,
                    upload,
                    event_id: event_id(),
                })
                .await;
        }
    }

    info!(users = state.ledger.user_count().await, "vortex-fetch finished");
    Ok(())
}

/// Stderr unless a log file is configured; `RUST_LOG` overrides the level
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &logging.level;
        format!("vortex_fetch={level},vortex_common={level}").into()
    });

    let (stderr_layer, file_layer) = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (None, Some(layer))
        }
        None => (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn console_identity(user_id: i64) -> Identity {
    Identity {
        username: std::env::var("USER").ok(),
        ..Identity::new(user_id)
    }
}

/// Unique enough per invocation for file prefixes
fn event_id() -> u64 {
    chrono::Utc::now().timestamp_millis().unsigned_abs()
}

fn upload_kind(path: &Path) -> UploadKind {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "mp4" | "mkv" | "webm" | "mov" => UploadKind::Video,
        "ogg" | "oga" | "opus" => UploadKind::Voice,
        _ => UploadKind::Audio,
    }
}

async fn confirm(label: &str) -> Result<bool> {
    eprint!("{label}? [y/N] ");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    match lines.next_line().await? {
        Some(answer) => Ok(matches!(answer.trim(), "y" | "Y" | "yes")),
        None => {
            warn!("No answer on stdin; skipping offer");
            Ok(false)
        }
    }
}
