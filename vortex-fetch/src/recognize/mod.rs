//! Music recognition for downloaded media
//!
//! A short mono sample is cut from the media, sent to a recognition service
//! under a timeout, and the matched track is resolved to a source locator:
//! the service's own cross-reference when it has one, otherwise the best
//! result of a text search for "artist - title".

mod acoustid;
mod extract;
mod search;
mod shazam;

pub use acoustid::AcoustIdClient;
pub use extract::{AudioExtractor, SAMPLE_RATE};
pub use search::{parse_search_output, pick_candidate, SearchCandidate, SearchProvider, YtDlpSearch};
pub use shazam::ShazamCompatibleClient;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{FetchError, FetchResult};

/// Stands in for a title or artist the service did not report
const UNKNOWN: &str = "Unknown";

/// Raw answer of a recognition service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMatch {
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Links to the same track on other platforms
    pub cross_references: Vec<String>,
}

#[async_trait]
pub trait RecognitionService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Identify the track in a short audio sample; `None` when nothing matched
    async fn identify(&self, audio: &Path) -> FetchResult<Option<TrackMatch>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub title: String,
    pub artist: String,
    /// Where the full track can be downloaded from, if anywhere
    pub resolved_locator: Option<String>,
}

impl RecognitionResult {
    pub fn display_title(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Recognized(RecognitionResult),
    NotRecognized,
}

pub struct FingerprintRecognizer {
    extractor: AudioExtractor,
    service: Arc<dyn RecognitionService>,
    search: Arc<dyn SearchProvider>,
    work_dir: PathBuf,
    timeout: Duration,
    sample_seconds: u32,
}

impl FingerprintRecognizer {
    pub fn new(
        extractor: AudioExtractor,
        service: Arc<dyn RecognitionService>,
        search: Arc<dyn SearchProvider>,
        work_dir: impl Into<PathBuf>,
        timeout: Duration,
        sample_seconds: u32,
    ) -> Self {
        Self {
            extractor,
            service,
            search,
            work_dir: work_dir.into(),
            timeout,
            sample_seconds,
        }
    }

    /// Identify the music in `media`
    ///
    /// `prefix` is the owning request's file prefix; the temporary sample is
    /// written under it and removed before returning.
    pub async fn recognize(&self, media: &Path, prefix: &str) -> FetchResult<Recognition> {
        let sample_path = self.work_dir.join(format!("{prefix}sample.wav"));
        let sample = self
            .extractor
            .extract(media, sample_path, Some(self.sample_seconds))
            .await?;

        let identified =
            tokio::time::timeout(self.timeout, self.service.identify(sample.path())).await;
        let answer = match identified {
            Ok(answer) => answer,
            Err(_) => Err(FetchError::RecognitionTimeout(self.timeout)),
        };

        if let Err(e) = sample.release().await {
            warn!(error = %e, "Failed to remove recognition sample");
        }

        let Some(track) = answer? else {
            info!(service = self.service.name(), "No music identified");
            return Ok(Recognition::NotRecognized);
        };

        let title = non_empty(track.title).unwrap_or_else(|| UNKNOWN.to_string());
        let artist = non_empty(track.artist).unwrap_or_else(|| UNKNOWN.to_string());
        let resolved_locator = self
            .resolve_locator(&track.cross_references, &artist, &title)
            .await;

        info!(
            service = self.service.name(),
            %title,
            %artist,
            has_locator = resolved_locator.is_some(),
            "Music identified"
        );

        Ok(Recognition::Recognized(RecognitionResult {
            title,
            artist,
            resolved_locator,
        }))
    }

    async fn resolve_locator(
        &self,
        cross_references: &[String],
        artist: &str,
        title: &str,
    ) -> Option<String> {
        if let Some(link) = cross_references
            .iter()
            .find(|r| r.starts_with("https://") || r.starts_with("http://"))
        {
            return Some(link.clone());
        }

        let query = format!("{artist} - {title}");
        match self.search.search(&query).await {
            Ok(candidates) => pick_candidate(&candidates).map(|c| c.locator.clone()),
            Err(e) => {
                warn!(%query, error = %e, "Search for recognized track failed");
                None
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
