//! Speech-to-text for uploaded audio, voice notes and video
//!
//! Transcripts are rendered one segment per line with `[mm:ss -> mm:ss]`
//! timestamps and split into message-sized chunks.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;

use crate::error::{FetchError, FetchResult};

/// Longest text a single chat message may carry
pub const MESSAGE_LIMIT: usize = 4096;

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    /// ISO 639-1 code when the service reports one
    pub language: String,
    pub text: String,
    pub segments: Vec<Segment>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> FetchResult<Transcript>;
}

/// OpenAI-compatible `audio/transcriptions` client
pub struct OpenAiTranscriber {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, audio: &Path) -> FetchResult<Transcript> {
        let url = format!("{}/audio/transcriptions", self.base_url);
        let audio_data = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();

        let file_part = multipart::Part::bytes(audio_data)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| FetchError::TranscriptionFailed(format!("mime: {}", e)))?;

        let form = multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .part("file", file_part);

        tracing::debug!(model = %self.model, "Sending audio for transcription");

        let mut request = self.client.post(&url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::TranscriptionFailed(format!("request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(FetchError::TranscriptionFailed(format!(
                "status {}: {}",
                status, body
            )));
        }

        let verbose: VerboseTranscription = response
            .json()
            .await
            .map_err(|e| FetchError::TranscriptionFailed(format!("body: {}", e)))?;

        let transcript = verbose.into_transcript();
        tracing::info!(
            language = %transcript.language,
            segments = transcript.segments.len(),
            chars = transcript.text.len(),
            "Transcription completed"
        );
        Ok(transcript)
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
}

impl VerboseTranscription {
    fn into_transcript(self) -> Transcript {
        Transcript {
            language: normalize_language(self.language.as_deref().unwrap_or("")),
            text: self.text.trim().to_string(),
            segments: self
                .segments
                .into_iter()
                .map(|s| Segment {
                    start: s.start,
                    end: s.end,
                    text: s.text.trim().to_string(),
                })
                .collect(),
        }
    }
}

/// Language names some services report instead of ISO codes
const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("english", "en"),
    ("russian", "ru"),
    ("uzbek", "uz"),
    ("ukrainian", "uk"),
    ("spanish", "es"),
    ("french", "fr"),
    ("german", "de"),
    ("italian", "it"),
    ("portuguese", "pt"),
    ("turkish", "tr"),
    ("kazakh", "kk"),
    ("arabic", "ar"),
    ("chinese", "zh"),
    ("japanese", "ja"),
];

/// Lower-case ISO 639-1 code for a reported language
pub fn normalize_language(language: &str) -> String {
    let lower = language.trim().to_lowercase();
    LANGUAGE_NAMES
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, code)| code.to_string())
        .unwrap_or(lower)
}

/// Accept `language` if the allow-list is empty or contains it
pub fn check_language(language: &str, allowed: &[String]) -> FetchResult<()> {
    if allowed.is_empty() || allowed.iter().any(|a| a.eq_ignore_ascii_case(language)) {
        Ok(())
    } else {
        Err(FetchError::UnsupportedLanguage(language.to_string()))
    }
}

/// `mm:ss`, rounded to the nearest second
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

pub fn format_transcript(segments: &[Segment]) -> String {
    segments
        .iter()
        .filter(|s| !s.text.is_empty())
        .map(|s| {
            format!(
                "`[{} -> {}]` {}",
                format_timestamp(s.start),
                format_timestamp(s.end),
                s.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split text into chunks of at most `limit` characters
///
/// Breaks after the last newline that fits when there is one, otherwise at
/// the character limit. Never splits inside a UTF-8 sequence.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let hard_end = rest
            .char_indices()
            .nth(limit)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        if hard_end == rest.len() {
            chunks.push(rest.to_string());
            break;
        }

        let end = match rest[..hard_end].rfind('\n') {
            Some(newline) if newline > 0 => newline + 1,
            _ => hard_end,
        };
        chunks.push(rest[..end].trim_end_matches('\n').to_string());
        rest = &rest[end..];
    }

    chunks
}

/// Where an upload lands in the downloads directory
pub fn upload_path(dir: &Path, prefix: &str, file_name: Option<&str>) -> PathBuf {
    let name = file_name
        .and_then(|n| Path::new(n).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("upload.bin");
    dir.join(format!("{prefix}{name}"))
}
