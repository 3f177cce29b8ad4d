//! Per-user activity accounting
//!
//! Every inbound event is recorded against the sender before it is handled.
//! A failing ledger never blocks the request.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Who sent an inbound event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Identity {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait UserLedger: Send + Sync {
    async fn record_activity(&self, identity: &Identity) -> Result<(), LedgerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRecord {
    pub identity: Identity,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub events: u64,
}

/// In-memory ledger that also logs each event
#[derive(Default)]
pub struct LoggingLedger {
    records: Mutex<HashMap<i64, ActivityRecord>>,
}

impl LoggingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, user_id: i64) -> Option<ActivityRecord> {
        self.records.lock().await.get(&user_id).cloned()
    }

    pub async fn user_count(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl UserLedger for LoggingLedger {
    async fn record_activity(&self, identity: &Identity) -> Result<(), LedgerError> {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        let record = records
            .entry(identity.user_id)
            .or_insert_with(|| ActivityRecord {
                identity: identity.clone(),
                first_seen: now,
                last_seen: now,
                events: 0,
            });
        // Names change; keep the latest
        record.identity = identity.clone();
        record.last_seen = now;
        record.events += 1;

        debug!(
            user = identity.user_id,
            username = identity.username.as_deref().unwrap_or("-"),
            events = record.events,
            "Recorded user activity"
        );
        Ok(())
    }
}

/// Record `identity`, then run `next` regardless of the ledger outcome
pub async fn with_activity<F, T>(ledger: &dyn UserLedger, identity: &Identity, next: F) -> T
where
    F: Future<Output = T>,
{
    if let Err(e) = ledger.record_activity(identity).await {
        error!(user = identity.user_id, error = %e, "Failed to record user activity");
    }
    next.await
}
