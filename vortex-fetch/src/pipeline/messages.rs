//! User-facing texts

use crate::acquire::FailureCategory;
use crate::error::FetchError;

pub const RECEIVED: &str = "Processing your request... Please wait.";
pub const DOWNLOADING: &str = "Downloading...";
pub const RECOGNIZING: &str = "Download complete! Identifying the music...";
pub const DELIVERED: &str = "Video sent.";
pub const DELIVERED_NOT_RECOGNIZED: &str = "Video sent. No music was identified in it.";
pub const DELIVERED_RECOGNITION_FAILED: &str =
    "Video sent. Music identification is unavailable right now.";
pub const OFFER_LABEL: &str = "Download song";
pub const SONG_CAPTION: &str = "#VortexFetch";

pub const OFFER_EXPIRED: &str = "This download link has expired or is invalid.";

pub const UPLOAD_RECEIVED: &str = "File received. Preparing transcription...";
pub const EXTRACTING_AUDIO: &str = "Extracting audio from the video...";
pub const TRANSCRIBING: &str = "Analyzing audio... This may take a while.";

pub const GENERIC_APOLOGY: &str =
    "Sorry, something unexpected went wrong while processing your request.";

pub const HELP: &str = "\
Send a link to a video (YouTube, Instagram and most other sites) and it comes back as a video file.
If the video contains music, a button lets you fetch the song as audio.
Send an audio file, voice message or video to get a timestamped transcript.";

pub fn downloading_song(display_title: &str) -> String {
    format!("Downloading \"{display_title}\"...")
}

pub fn song_delivered(display_title: &str) -> String {
    format!("Sent \"{display_title}\".")
}

pub fn delivered_with_offer(display_title: &str) -> String {
    format!("Video sent. Song found: {display_title}")
}

/// Match found but no downloadable source for it
pub fn delivered_without_source(display_title: &str) -> String {
    format!("Video sent. Song found: {display_title}\nNo download source was found for this song.")
}

pub fn transcript_header(language: &str) -> String {
    let language = if language.is_empty() { "unknown" } else { language };
    format!("Transcript (language: {language}):\n\n")
}

pub fn download_failure(category: FailureCategory) -> &'static str {
    match category {
        FailureCategory::UnsupportedSource => "This link is not supported.",
        FailureCategory::ContentUnavailable => {
            "This video is unavailable. It may be private or removed."
        }
        FailureCategory::TooLarge => "The file is too large to send.",
        FailureCategory::AuthenticationBlocked => {
            "The site requires sign-in or blocked the download. Please try again later."
        }
        FailureCategory::Other => "Could not download this video.",
    }
}

/// Final status text for a failed pipeline
pub fn for_error(err: &FetchError) -> String {
    match err {
        FetchError::InvalidSource(_) => "Please send a valid video link.".to_string(),
        FetchError::DownloadFailed { category, .. } => download_failure(*category).to_string(),
        FetchError::ArtifactMissing { .. } => {
            "The download finished but no file was produced.".to_string()
        }
        FetchError::ExtractionFailed(_) => "Could not extract audio from the file.".to_string(),
        FetchError::TokenNotFound => OFFER_EXPIRED.to_string(),
        FetchError::DeliveryFailed(_) => "The file could not be sent.".to_string(),
        FetchError::DeliveryExhausted { .. } => {
            "Sending the file timed out repeatedly. Please try again later.".to_string()
        }
        FetchError::UnsupportedLanguage(language) => {
            format!("Transcription is not available for this language ({language}).")
        }
        FetchError::TranscriptionFailed(_) => {
            "Could not transcribe this file, or no speech was detected.".to_string()
        }
        _ => GENERIC_APOLOGY.to_string(),
    }
}
