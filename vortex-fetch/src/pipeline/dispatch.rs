//! Outermost fault boundary
//!
//! Each event is recorded in the user ledger, then its pipeline runs in a
//! task of its own. A panicking pipeline surfaces here as a `JoinError` and
//! is answered with a generic apology; other requests are unaffected.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{messages, Completion, Inbound, Pipeline};
use crate::ledger::{with_activity, UserLedger};
use crate::transport::ChatTransport;

pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    ledger: Arc<dyn UserLedger>,
    transport: Arc<dyn ChatTransport>,
}

impl Dispatcher {
    pub fn new(
        pipeline: Arc<Pipeline>,
        ledger: Arc<dyn UserLedger>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            pipeline,
            ledger,
            transport,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Handle one event; `None` when it ended in a failure (already reported to the user)
    pub async fn dispatch(&self, inbound: Inbound) -> Option<Completion> {
        let identity = inbound.identity().clone();
        let chat = inbound.chat();
        let kind = inbound.kind();
        let user = identity.user_id;

        with_activity(self.ledger.as_ref(), &identity, async move {
            let pipeline = Arc::clone(&self.pipeline);
            let task = tokio::spawn(async move { pipeline.handle(inbound).await });

            match task.await {
                Ok(Ok(completion)) => {
                    info!(user, kind, "Request completed");
                    Some(completion)
                }
                Ok(Err(err)) if err.is_classified() => {
                    warn!(user, kind, error = %err, "Request failed");
                    None
                }
                Ok(Err(err)) => {
                    error!(user, kind, error = %err, "Request failed with unexpected fault");
                    None
                }
                Err(join_error) => {
                    error!(
                        user,
                        kind,
                        error = %join_error,
                        "Request task panicked or was cancelled"
                    );
                    let apology = self.transport.send_text(chat, messages::GENERIC_APOLOGY).await;
                    if let Err(e) = apology {
                        warn!(user, error = %e, "Failed to send apology");
                    }
                    None
                }
            }
        })
        .await
    }

    /// Dispatch in the background so events are handled concurrently
    pub fn spawn(self: &Arc<Self>, inbound: Inbound) -> JoinHandle<Option<Completion>> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.dispatch(inbound).await })
    }
}
