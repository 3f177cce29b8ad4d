//! Chat transport seam
//!
//! The bot framework itself lives outside this crate. Everything the
//! pipeline needs from it is expressed by [`ChatTransport`]: an editable
//! status message, plain text replies, file uploads and fetching files the
//! user uploaded.

mod console;

pub use console::ConsoleTransport;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// Chat (conversation) identifier
pub type ChatId = i64;

/// Reference to a sent status message that can be edited in place
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusHandle {
    pub chat_id: ChatId,
    pub message_id: i64,
}

/// Actionable button attached to a delivered artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub label: String,
    pub callback_data: String,
}

/// Metadata sent along with a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Video {
        caption: String,
        offer: Option<Offer>,
    },
    Audio {
        title: String,
        performer: String,
        caption: String,
    },
}

/// What kind of file the user uploaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Audio,
    Voice,
    Video,
}

/// File the user uploaded, addressed by the transport's own id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRef {
    pub file_id: String,
    pub file_name: Option<String>,
    pub kind: UploadKind,
}

/// Transport failures
///
/// Timeouts are transient and may be retried; rejections are permanent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport timed out: {0}")]
    Timeout(String),

    #[error("transport rejected request: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

/// Operations the pipeline needs from the chat platform
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a new status message and return a handle for later edits
    async fn send_status(&self, chat: ChatId, text: &str) -> Result<StatusHandle, TransportError>;

    /// Replace the text of an existing status message
    async fn edit_status(&self, handle: &StatusHandle, text: &str) -> Result<(), TransportError>;

    /// Send a plain text message
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<(), TransportError>;

    /// Upload a file with its metadata
    async fn send_file(
        &self,
        chat: ChatId,
        path: &Path,
        attachment: &Attachment,
    ) -> Result<(), TransportError>;

    /// Download a user upload to `dest`
    async fn fetch_upload(&self, upload: &UploadRef, dest: &Path) -> Result<(), TransportError>;
}
