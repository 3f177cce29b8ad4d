//! Shazam-compatible recognition backend
//!
//! Posts the audio sample as multipart form data to an HTTP endpoint that
//! answers with Shazam-shaped JSON:
//!
//! ```json
//! { "track": { "title": "...", "subtitle": "...",
//!              "sections": [ { "type": "VIDEO", "youtubeurl": "..." } ] } }
//! ```
//!
//! A response without `track` means nothing was recognized.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{RecognitionService, TrackMatch};
use crate::error::{FetchError, FetchResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ShazamCompatibleClient {
    http_client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl ShazamCompatibleClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> FetchResult<Self> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("vortex-fetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Unexpected(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl RecognitionService for ShazamCompatibleClient {
    fn name(&self) -> &'static str {
        "Shazam"
    }

    async fn identify(&self, audio: &Path) -> FetchResult<Option<TrackMatch>> {
        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("sample.wav")
            .to_string();

        debug!(endpoint = %self.endpoint, bytes = bytes.len(), "Submitting sample for recognition");

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| FetchError::Unexpected(e.to_string()))?;
        let form = Form::new().part("file", part);

        let mut request = self.http_client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| {
                FetchError::RecognitionFailed(format!("recognition request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::RecognitionFailed(format!(
                "recognition service returned {status}: {body}"
            )));
        }

        let parsed: ShazamResponse = response.json().await.map_err(|e| {
            FetchError::RecognitionFailed(format!("Failed to parse recognition response: {e}"))
        })?;

        Ok(parsed.track.map(ShazamTrack::into_match))
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ShazamResponse {
    track: Option<ShazamTrack>,
}

#[derive(Debug, Deserialize)]
struct ShazamTrack {
    title: Option<String>,
    subtitle: Option<String>,
    #[serde(default)]
    sections: Vec<ShazamSection>,
}

#[derive(Debug, Deserialize)]
struct ShazamSection {
    youtubeurl: Option<String>,
}

impl ShazamTrack {
    fn into_match(self) -> TrackMatch {
        TrackMatch {
            title: self.title,
            artist: self.subtitle,
            cross_references: self
                .sections
                .into_iter()
                .filter_map(|s| s.youtubeurl)
                .collect(),
        }
    }
}
