//! vortex-fetch library interface
//!
//! Media acquisition and deferred-recognition pipeline behind a chat
//! transport. Exposes public APIs for the binary and integration tests.

pub mod acquire;
pub mod deliver;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod pipeline;
pub mod process;
pub mod recognize;
pub mod retag;
pub mod status;
pub mod transcribe;
pub mod transport;

pub use crate::error::{FetchError, FetchResult};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use vortex_common::config::RecognitionBackend;
use vortex_common::TomlConfig;

use crate::acquire::{DownloadCommands, MediaAcquirer};
use crate::deliver::{RetryPolicy, UploadDeliverer};
use crate::jobs::DeferredJobRegistry;
use crate::ledger::{LoggingLedger, UserLedger};
use crate::pipeline::{Dispatcher, Pipeline, PipelineParts};
use crate::process::ProcessRunner;
use crate::recognize::{
    AcoustIdClient, AudioExtractor, FingerprintRecognizer, RecognitionService,
    ShazamCompatibleClient,
    YtDlpSearch,
};
use crate::transcribe::OpenAiTranscriber;
use crate::transport::ChatTransport;

/// Application state shared by every inbound event
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<DeferredJobRegistry>,
    pub ledger: Arc<LoggingLedger>,
    pub download_dir: PathBuf,
    /// Service startup timestamp
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire the production components from configuration
    pub fn from_config(
        config: &TomlConfig,
        download_dir: PathBuf,
        transport: Arc<dyn ChatTransport>,
        runner: Arc<dyn ProcessRunner>,
    ) -> FetchResult<Self> {
        let commands = DownloadCommands::new(
            &config.tools.yt_dlp,
            &download_dir,
            config.download.max_filesize_mb,
            config.download.credentials.clone(),
        );
        let acquirer = MediaAcquirer::new(
            Arc::clone(&runner),
            commands,
            config.download.max_filesize_bytes(),
        );
        let extractor = AudioExtractor::new(Arc::clone(&runner), &config.tools.ffmpeg);

        let recognizer = match recognition_service(config, &runner)? {
            Some(service) => {
                info!(service = service.name(), "Music identification enabled");
                let search = Arc::new(YtDlpSearch::new(
                    Arc::clone(&runner),
                    &config.tools.yt_dlp,
                    config.search.max_results,
                ));
                Some(FingerprintRecognizer::new(
                    extractor.clone(),
                    service,
                    search,
                    &download_dir,
                    Duration::from_secs(config.recognition.timeout_secs),
                    config.recognition.sample_seconds,
                ))
            }
            None => None,
        };

        let transcription = &config.transcription;
        let transcriber = Arc::new(OpenAiTranscriber::new(
            transcription.api_key.clone(),
            transcription.endpoint.clone(),
            transcription.model.clone(),
        ));

        let registry = Arc::new(DeferredJobRegistry::new());
        let pipeline = Pipeline::new(PipelineParts {
            transport: Arc::clone(&transport),
            acquirer,
            recognizer,
            extractor,
            registry: Arc::clone(&registry),
            deliverer: UploadDeliverer::new(
                Arc::clone(&transport),
                RetryPolicy::from_config(&config.delivery),
            ),
            transcriber,
            status_interval: Duration::from_millis(config.status.min_interval_ms),
            allowed_languages: transcription.allowed_languages.clone(),
        });

        let ledger = Arc::new(LoggingLedger::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(pipeline),
            Arc::clone(&ledger) as Arc<dyn UserLedger>,
            transport,
        ));

        Ok(Self {
            dispatcher,
            registry,
            ledger,
            download_dir,
            startup_time: Utc::now(),
        })
    }
}

/// Recognition backend selected by configuration, if it can be used
fn recognition_service(
    config: &TomlConfig,
    runner: &Arc<dyn ProcessRunner>,
) -> FetchResult<Option<Arc<dyn RecognitionService>>> {
    let recognition = &config.recognition;
    let service: Arc<dyn RecognitionService> = match recognition.backend {
        RecognitionBackend::Shazam => {
            let Some(endpoint) = &recognition.endpoint else {
                warn!("recognition.endpoint not configured; music identification disabled");
                return Ok(None);
            };
            Arc::new(ShazamCompatibleClient::new(
                endpoint.clone(),
                recognition.api_key.clone(),
            )?)
        }
        RecognitionBackend::AcoustId => {
            let Some(key) = &recognition.api_key else {
                warn!("AcoustID API key not configured; music identification disabled");
                return Ok(None);
            };
            Arc::new(
                AcoustIdClient::new(Arc::clone(runner), &config.tools.fpcalc, key.clone())?
                    .with_min_score(recognition.min_score),
            )
        }
    };
    Ok(Some(service))
}
