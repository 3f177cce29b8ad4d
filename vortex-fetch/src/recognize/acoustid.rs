//! AcoustID recognition backend
//!
//! Fingerprints the sample with Chromaprint's `fpcalc` and resolves the
//! fingerprint through the AcoustID lookup API with recording metadata.
//!
//! # API Reference
//! - Endpoint: https://api.acoustid.org/v2/lookup
//! - Documentation: https://acoustid.org/webservice

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{RecognitionService, TrackMatch};
use crate::acquire::diagnostic_excerpt;
use crate::error::{FetchError, FetchResult};
use crate::process::{CommandSpec, NoProgress, ProcessRunner};

/// AcoustID API endpoint
const ACOUSTID_API_URL: &str = "https://api.acoustid.org/v2/lookup";

/// Default timeout for AcoustID API requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Seconds of audio fed to the fingerprinter
const FINGERPRINT_LENGTH_SECS: u32 = 120;

/// AcoustID client
///
/// Returns the highest-scoring match at or above `min_score` that carries at
/// least one recording with a title.
pub struct AcoustIdClient {
    http_client: Client,
    runner: Arc<dyn ProcessRunner>,
    fpcalc: PathBuf,
    api_key: String,
    api_url: String,
    min_score: f64,
}

impl AcoustIdClient {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        fpcalc: impl Into<PathBuf>,
        api_key: String,
    ) -> FetchResult<Self> {
        let http_client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Unexpected(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            runner,
            fpcalc: fpcalc.into(),
            api_key,
            api_url: ACOUSTID_API_URL.to_string(),
            min_score: 0.6,
        })
    }

    /// Set minimum acceptable AcoustID score (default: 0.6)
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score.clamp(0.0, 1.0);
        self
    }

    /// Point lookups at another server
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    async fn fingerprint(&self, audio: &Path) -> FetchResult<Fingerprint> {
        let command = CommandSpec::new(&self.fpcalc)
            .arg("-json")
            .arg("-length")
            .arg(FINGERPRINT_LENGTH_SECS.to_string())
            .arg(audio.display().to_string());

        let outcome = self.runner.run(&command, &mut NoProgress).await?;
        if !outcome.success() {
            return Err(FetchError::RecognitionFailed(format!(
                "fpcalc failed: {}",
                diagnostic_excerpt(&outcome.stderr, &outcome.stdout)
            )));
        }

        serde_json::from_str(&outcome.stdout)
            .map_err(|e| {
                FetchError::RecognitionFailed(format!("Failed to parse fpcalc output: {e}"))
            })
    }

    async fn lookup(&self, fingerprint: &Fingerprint) -> FetchResult<Option<TrackMatch>> {
        debug!(
            fingerprint_length = fingerprint.fingerprint.len(),
            duration = fingerprint.duration,
            "Querying AcoustID API"
        );

        let duration = (fingerprint.duration.round() as u64).to_string();
        let response = self
            .http_client
            .post(&self.api_url)
            .form(&[
                ("client", self.api_key.as_str()),
                ("duration", duration.as_str()),
                ("fingerprint", fingerprint.fingerprint.as_str()),
                ("meta", "recordings"),
            ])
            .send()
            .await
            .map_err(|e| {
                FetchError::RecognitionFailed(format!("AcoustID API request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::RecognitionFailed(format!(
                "AcoustID API returned error {status}: {body}"
            )));
        }

        let acoustid_response: AcoustIdResponse = response.json().await.map_err(|e| {
            FetchError::RecognitionFailed(format!("Failed to parse AcoustID response: {e}"))
        })?;

        if acoustid_response.status != "ok" {
            return Err(FetchError::RecognitionFailed(format!(
                "AcoustID API error: {}",
                acoustid_response
                    .error
                    .map_or("Unknown error".to_string(), |e| e.message)
            )));
        }

        Ok(best_match(acoustid_response.results, self.min_score))
    }
}

#[async_trait]
impl RecognitionService for AcoustIdClient {
    fn name(&self) -> &'static str {
        "AcoustID"
    }

    async fn identify(&self, audio: &Path) -> FetchResult<Option<TrackMatch>> {
        let fingerprint = self.fingerprint(audio).await?;
        self.lookup(&fingerprint).await
    }
}

fn best_match(results: Vec<AcoustIdResult>, min_score: f64) -> Option<TrackMatch> {
    let mut candidates: Vec<AcoustIdResult> = results
        .into_iter()
        .filter(|r| r.score >= min_score)
        .collect();
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    candidates.into_iter().find_map(|result| {
        let recording = result
            .recordings
            .unwrap_or_default()
            .into_iter()
            .find(|r| r.title.as_deref().is_some_and(|t| !t.is_empty()))?;

        let artist = recording
            .artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        debug!(
            recording_mbid = %recording.id,
            acoustid_score = result.score,
            "AcoustID match found"
        );

        Some(TrackMatch {
            title: recording.title,
            artist: (!artist.is_empty()).then_some(artist),
            cross_references: Vec::new(),
        })
    })
}

// ============================================================================
// fpcalc / AcoustID Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Fingerprint {
    duration: f64,
    fingerprint: String,
}

#[derive(Debug, Deserialize)]
struct AcoustIdResponse {
    status: String,
    #[serde(default)]
    results: Vec<AcoustIdResult>,
    error: Option<AcoustIdError>,
}

#[derive(Debug, Deserialize)]
struct AcoustIdResult {
    score: f64,
    recordings: Option<Vec<AcoustIdRecording>>,
}

#[derive(Debug, Deserialize)]
struct AcoustIdRecording {
    id: String,
    title: Option<String>,
    #[serde(default)]
    artists: Vec<AcoustIdArtist>,
}

#[derive(Debug, Deserialize)]
struct AcoustIdArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AcoustIdError {
    message: String,
}

// ============================================================================
// Tests
// ============================================================================
