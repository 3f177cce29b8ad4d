//! Error types for vortex-fetch
//!
//! One enum covers every way a pipeline run can end badly. Classified
//! failures carry enough context for a specific user-facing message; the
//! remaining variants are faults reported with a generic apology.

use std::time::Duration;

use thiserror::Error;

use crate::acquire::FailureCategory;
use crate::transport::TransportError;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum FetchError {
    /// External executable could not be started
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Source is not an http(s) URL
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// Downloader reported success but produced no file
    #[error("Download finished but no artifact starts with {prefix}")]
    ArtifactMissing { prefix: String },

    /// Downloader failure mapped to a known category
    #[error("Download failed ({category}): {diagnostic}")]
    DownloadFailed {
        category: FailureCategory,
        diagnostic: String,
    },

    /// Transcoder could not produce the audio stream
    #[error("Audio extraction failed: {0}")]
    ExtractionFailed(String),

    /// Recognition service did not answer in time
    #[error("Recognition timed out after {0:?}")]
    RecognitionTimeout(Duration),

    /// Recognition service answered with an error
    #[error("Recognition service error: {0}")]
    RecognitionFailed(String),

    /// Secondary text search failed
    #[error("Search failed: {0}")]
    SearchFailed(String),

    /// Deferred job token unknown, expired or already used
    #[error("Deferred job token not found")]
    TokenNotFound,

    /// Transport refused the upload
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// Every upload attempt timed out
    #[error("Delivery gave up after {attempts} attempts")]
    DeliveryExhausted { attempts: u32 },

    /// Speech-to-text service error
    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    /// Detected language is not on the allow-list
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Audio tags could not be rewritten
    #[error("Tag rewrite failed: {0}")]
    TagWriteFailed(String),

    /// Chat transport error outside of file delivery
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else
    #[error("Unexpected fault: {0}")]
    Unexpected(String),
}

impl FetchError {
    /// Whether this failure is an expected, user-explainable condition
    ///
    /// Classified failures are logged at `warn`; everything else is a fault
    /// logged at `error` and answered with a generic apology.
    pub fn is_classified(&self) -> bool {
        matches!(
            self,
            FetchError::InvalidSource(_)
                | FetchError::ArtifactMissing { .. }
                | FetchError::DownloadFailed { .. }
                | FetchError::ExtractionFailed(_)
                | FetchError::RecognitionTimeout(_)
                | FetchError::TokenNotFound
                | FetchError::DeliveryFailed(_)
                | FetchError::DeliveryExhausted { .. }
                | FetchError::UnsupportedLanguage(_)
                | FetchError::TranscriptionFailed(_)
        )
    }
}

/// Result type for pipeline operations
pub type FetchResult<T> = Result<T, FetchError>;
