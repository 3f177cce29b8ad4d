//! Upload with retry on transport timeouts
//!
//! **Algorithm:**
//! 1. Attempt upload
//! 2. If acknowledged, return the attempt count
//! 3. If the transport timed out:
//!    a. If attempts remain: log WARN, back off, retry
//!    b. Otherwise: log ERROR, return `DeliveryExhausted`
//! 4. Any other rejection fails immediately with `DeliveryFailed`
//!
//! **Backoff:** starts at `initial_backoff`, multiplied after each retry,
//! capped at `max_backoff`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use vortex_common::config::DeliveryConfig;

use crate::error::{FetchError, FetchResult};
use crate::transport::{Attachment, ChatId, ChatTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            multiplier: 2,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: 2,
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Successful upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledged {
    pub attempts: u32,
}

pub struct UploadDeliverer {
    transport: Arc<dyn ChatTransport>,
    policy: RetryPolicy,
}

impl UploadDeliverer {
    pub fn new(transport: Arc<dyn ChatTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn deliver(
        &self,
        chat: ChatId,
        path: &Path,
        attachment: &Attachment,
    ) -> FetchResult<Acknowledged> {
        let start_time = Instant::now();
        let mut attempt = 0;
        let mut backoff = self.policy.initial_backoff;

        loop {
            attempt += 1;

            if attempt > 1 {
                tracing::debug!(chat, attempt, file = %path.display(), "Retrying upload");
            }

            match self.transport.send_file(chat, path, attachment).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(
                            chat,
                            attempt,
                            elapsed_ms = start_time.elapsed().as_millis(),
                            "Upload succeeded after retry"
                        );
                    }
                    return Ok(Acknowledged { attempts: attempt });
                }
                Err(err) if !err.is_transient() => {
                    // Rejections are not retried
                    tracing::warn!(chat, attempt, error = %err, "Upload rejected");
                    return Err(FetchError::DeliveryFailed(err.to_string()));
                }
                Err(err) => {
                    if attempt >= self.policy.max_attempts {
                        tracing::error!(
                            chat,
                            attempt,
                            elapsed_ms = start_time.elapsed().as_millis(),
                            error = %err,
                            "Upload failed: retry attempts exhausted"
                        );
                        return Err(FetchError::DeliveryExhausted { attempts: attempt });
                    }

                    tracing::warn!(
                        chat,
                        attempt,
                        backoff_ms = backoff.as_millis(),
                        error = %err,
                        "Upload timed out, will retry after backoff"
                    );

                    tokio::time::sleep(backoff).await;

                    backoff = (backoff * self.policy.multiplier).min(self.policy.max_backoff);
                }
            }
        }
    }
}
