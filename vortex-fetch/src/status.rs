//! Editable per-request status message

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::FetchResult;
use crate::process::{ProgressSink, ProgressThrottle};
use crate::transport::{ChatId, ChatTransport, StatusHandle};

/// One status message per request, edited in place as the job advances
///
/// Identical consecutive texts are never re-sent. Progress readings pass
/// through a [`ProgressThrottle`] before they turn into edits.
pub struct StatusChannel {
    transport: Arc<dyn ChatTransport>,
    handle: StatusHandle,
    current: String,
    label: String,
    min_interval: Duration,
    throttle: ProgressThrottle,
}

impl StatusChannel {
    /// Send the initial status message
    pub async fn open(
        transport: Arc<dyn ChatTransport>,
        chat: ChatId,
        text: &str,
        min_interval: Duration,
    ) -> FetchResult<Self> {
        let handle = transport.send_status(chat, text).await?;
        Ok(Self {
            transport,
            handle,
            current: text.to_string(),
            label: String::new(),
            min_interval,
            throttle: ProgressThrottle::new(min_interval, Instant::now()),
        })
    }

    pub fn handle(&self) -> &StatusHandle {
        &self.handle
    }

    /// Text currently shown
    pub fn text(&self) -> &str {
        &self.current
    }

    /// Replace the status text
    ///
    /// Returns whether an edit was issued. Edit failures are logged and
    /// swallowed; the job keeps running.
    pub async fn set(&mut self, text: impl Into<String>) -> bool {
        let text = text.into();
        if text == self.current {
            debug!(message_id = self.handle.message_id, "Skipping identical status edit");
            return false;
        }

        match self.transport.edit_status(&self.handle, &text).await {
            Ok(()) => {
                self.current = text;
                true
            }
            Err(e) => {
                warn!(
                    message_id = self.handle.message_id,
                    error = %e,
                    "Failed to edit status message"
                );
                false
            }
        }
    }

    /// Show the terminal text of a request
    ///
    /// Falls back to a plain message when the status message cannot be
    /// edited.
    pub async fn finish(&mut self, text: impl Into<String>) {
        let text = text.into();
        if self.set(text.as_str()).await || self.current == text {
            return;
        }
        if let Err(e) = self.transport.send_text(self.handle.chat_id, &text).await {
            warn!(
                message_id = self.handle.message_id,
                error = %e,
                "Failed to send final status as a message"
            );
        }
    }

    /// Start reporting progress for a new download
    ///
    /// Progress lines render as `"{label} {pct}%"`.
    pub fn begin_progress(&mut self, label: impl Into<String>) {
        self.label = label.into();
        self.throttle = ProgressThrottle::new(self.min_interval, Instant::now());
    }
}

#[async_trait]
impl ProgressSink for StatusChannel {
    async fn on_progress(&mut self, percent: u8) {
        if self.throttle.accept(percent, Instant::now()) {
            let text = format!("{} {}%", self.label, percent);
            self.set(text).await;
        }
    }
}
