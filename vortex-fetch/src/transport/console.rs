//! Terminal-backed transport used by the command-line binary
//!
//! Status messages are printed to stdout, delivered files are copied into an
//! output directory and offers are kept so the caller can act on them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use super::{Attachment, ChatId, ChatTransport, Offer, StatusHandle, TransportError, UploadRef};

pub struct ConsoleTransport {
    output_dir: PathBuf,
    next_message_id: AtomicI64,
    offers: Mutex<Vec<Offer>>,
}

impl ConsoleTransport {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            next_message_id: AtomicI64::new(1),
            offers: Mutex::new(Vec::new()),
        }
    }

    /// Offers attached to delivered files since the last call
    pub async fn take_offers(&self) -> Vec<Offer> {
        std::mem::take(&mut *self.offers.lock().await)
    }

    fn next_id(&self) -> i64 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    fn destination_for(&self, path: &Path, attachment: &Attachment) -> PathBuf {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let stem = match attachment {
            Attachment::Video { caption, .. } => caption.clone(),
            Attachment::Audio {
                title, performer, ..
            } => format!("{performer} - {title}"),
        };
        self.output_dir
            .join(format!("{}.{}", sanitize_file_name(&stem), extension))
    }
}

/// Replace characters that are not safe in file names
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn send_status(&self, chat: ChatId, text: &str) -> Result<StatusHandle, TransportError> {
        let handle = StatusHandle {
            chat_id: chat,
            message_id: self.next_id(),
        };
        println!("[{}] {}", handle.message_id, text);
        Ok(handle)
    }

    async fn edit_status(&self, handle: &StatusHandle, text: &str) -> Result<(), TransportError> {
        println!("[{}] {}", handle.message_id, text);
        Ok(())
    }

    async fn send_text(&self, _chat: ChatId, text: &str) -> Result<(), TransportError> {
        println!("{text}");
        Ok(())
    }

    async fn send_file(
        &self,
        _chat: ChatId,
        path: &Path,
        attachment: &Attachment,
    ) -> Result<(), TransportError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| TransportError::Rejected(e.to_string()))?;

        let dest = self.destination_for(path, attachment);
        tokio::fs::copy(path, &dest)
            .await
            .map_err(|e| {
                TransportError::Rejected(format!("copy to {} failed: {e}", dest.display()))
            })?;

        info!(dest = %dest.display(), "Saved delivered file");
        println!("Saved: {}", dest.display());

        if let Attachment::Video {
            offer: Some(offer), ..
        } = attachment
        {
            println!("Offer: {}", offer.label);
            self.offers.lock().await.push(offer.clone());
        }
        Ok(())
    }

    async fn fetch_upload(&self, upload: &UploadRef, dest: &Path) -> Result<(), TransportError> {
        // Uploads from the terminal are local paths
        tokio::fs::copy(&upload.file_id, dest)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Rejected(format!("read {} failed: {e}", upload.file_id)))
    }
}
