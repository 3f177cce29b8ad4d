//! Media acquisition through the external downloader
//!
//! A request downloads into the shared downloads directory under its own
//! prefix (`{requester}_{correlation}_`). The produced artifact is handed back
//! as a [`TempArtifact`]; everything else written under the prefix is removed
//! before `acquire_*` returns, whatever the outcome.

mod artifact;
mod classify;
mod command;

pub use artifact::{
    caption_from_artifact, find_by_prefix, is_partial, purge_prefix, PrefixSweep, TempArtifact,
};
pub use classify::{classify_failure, diagnostic_excerpt, FailureCategory};
pub use command::{host_matches, validate_source, DownloadCommands, MediaKind, VIDEO_FORMAT};

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{FetchError, FetchResult};
use crate::process::{CommandSpec, ProcessRunner, ProgressSink};

/// One download job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionRequest {
    pub requester_id: i64,
    pub source: String,
    /// Unique per job for this requester (event id or deferred-job token)
    pub correlation_id: String,
}

impl AcquisitionRequest {
    pub fn new(
        requester_id: i64,
        source: impl Into<String>,
        correlation_id: impl ToString,
    ) -> Self {
        Self {
            requester_id,
            source: source.into(),
            correlation_id: correlation_id.to_string(),
        }
    }

    /// Prefix shared by every file this job creates
    pub fn prefix(&self) -> String {
        file_prefix(self.requester_id, &self.correlation_id)
    }
}

/// `{requester}_{correlation}_`
pub fn file_prefix(requester_id: i64, correlation_id: &str) -> String {
    format!("{requester_id}_{correlation_id}_")
}

pub struct MediaAcquirer {
    runner: Arc<dyn ProcessRunner>,
    commands: DownloadCommands,
    max_filesize_bytes: u64,
}

impl MediaAcquirer {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        commands: DownloadCommands,
        max_filesize_bytes: u64,
    ) -> Self {
        Self {
            runner,
            commands,
            max_filesize_bytes,
        }
    }

    pub fn download_dir(&self) -> &Path {
        self.commands.download_dir()
    }

    /// Download the source as a video file
    pub async fn acquire_media(
        &self,
        request: &AcquisitionRequest,
        progress: &mut dyn ProgressSink,
    ) -> FetchResult<TempArtifact> {
        self.acquire(request, MediaKind::Video, progress).await
    }

    /// Download only the audio track, converted to MP3
    pub async fn acquire_audio_only(
        &self,
        request: &AcquisitionRequest,
        progress: &mut dyn ProgressSink,
    ) -> FetchResult<TempArtifact> {
        self.acquire(request, MediaKind::AudioOnly, progress).await
    }

    async fn acquire(
        &self,
        request: &AcquisitionRequest,
        kind: MediaKind,
        progress: &mut dyn ProgressSink,
    ) -> FetchResult<TempArtifact> {
        let url = validate_source(&request.source)?;
        let prefix = request.prefix();
        let dir = self.download_dir().to_path_buf();
        let command = self.commands.download_command(&url, &prefix, kind);

        info!(
            requester = request.requester_id,
            correlation = %request.correlation_id,
            kind = ?kind,
            source = %url,
            "Starting download"
        );

        // Dropped unfinished on cancellation, which still sweeps
        let mut sweep = PrefixSweep::new(&dir, &prefix);
        let result = self.download(request, &command, &dir, &prefix, progress).await;
        if let Ok(artifact) = &result {
            sweep.keep(artifact.path());
        }
        sweep.finish().await;
        result
    }

    async fn download(
        &self,
        request: &AcquisitionRequest,
        command: &CommandSpec,
        dir: &Path,
        prefix: &str,
        progress: &mut dyn ProgressSink,
    ) -> FetchResult<TempArtifact> {
        let outcome = self.runner.run(command, progress).await?;
        let classified = classify_failure(&outcome.stderr, &outcome.stdout);

        if !outcome.success() {
            let category = classified.unwrap_or(FailureCategory::Other);
            let diagnostic = diagnostic_excerpt(&outcome.stderr, &outcome.stdout);
            warn!(
                requester = request.requester_id,
                exit_code = outcome.exit_code,
                %category,
                %diagnostic,
                "Download failed"
            );
            return Err(FetchError::DownloadFailed {
                category,
                diagnostic,
            });
        }

        // The size cap aborts the download but still exits 0
        if classified == Some(FailureCategory::TooLarge) {
            return Err(FetchError::DownloadFailed {
                category: FailureCategory::TooLarge,
                diagnostic: diagnostic_excerpt(&outcome.stderr, &outcome.stdout),
            });
        }

        let found = {
            let dir = dir.to_path_buf();
            let prefix = prefix.to_string();
            tokio::task::spawn_blocking(move || find_by_prefix(&dir, &prefix))
                .await
                .map_err(|e| FetchError::Unexpected(format!("artifact scan task failed: {e}")))??
        };

        let Some(path) = found else {
            warn!(
                requester = request.requester_id,
                %prefix,
                "Downloader exited cleanly without an artifact"
            );
            return Err(match classified {
                Some(category) => FetchError::DownloadFailed {
                    category,
                    diagnostic: diagnostic_excerpt(&outcome.stderr, &outcome.stdout),
                },
                None => FetchError::ArtifactMissing {
                    prefix: prefix.to_string(),
                },
            });
        };

        let artifact = TempArtifact::new(&path);
        let size = tokio::fs::metadata(artifact.path()).await?.len();
        if size > self.max_filesize_bytes {
            warn!(
                requester = request.requester_id,
                size,
                limit = self.max_filesize_bytes,
                "Artifact exceeds size limit"
            );
            return Err(FetchError::DownloadFailed {
                category: FailureCategory::TooLarge,
                diagnostic: format!("artifact is {size} bytes, limit {}", self.max_filesize_bytes),
            });
        }

        info!(
            requester = request.requester_id,
            artifact = %path.display(),
            size,
            "Download complete"
        );
        Ok(artifact)
    }
}
