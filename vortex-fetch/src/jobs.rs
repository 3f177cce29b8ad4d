//! Deferred jobs offered to the user as a button
//!
//! When a recognized track can be downloaded, the job is parked here under a
//! random token and the token travels in the button's callback data. A token
//! can be consumed exactly once. Registering a new job for the same origin
//! withdraws the previous token.
//!
//! The map sits behind a synchronous mutex that is never held across an
//! await, so [`PendingOffer`] can withdraw its token from `Drop`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;
use uuid::Uuid;

use crate::error::{FetchError, FetchResult};

/// Prefix of callback data that carries a deferred-job token
pub const CALLBACK_PREFIX: &str = "dl_song_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub title: String,
    pub artist: String,
    pub locator: String,
    /// Prefix of the request that produced this offer
    pub origin: String,
}

impl JobDescriptor {
    pub fn display_title(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

#[derive(Default)]
struct RegistryState {
    jobs: HashMap<String, JobDescriptor>,
    by_origin: HashMap<String, String>,
}

/// Token → job map shared by every request
#[derive(Default)]
pub struct DeferredJobRegistry {
    state: Mutex<RegistryState>,
}

impl DeferredJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Park a job and return its token
    pub async fn register(&self, descriptor: JobDescriptor) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let mut state = self.lock();

        if let Some(previous) = state
            .by_origin
            .insert(descriptor.origin.clone(), token.clone())
        {
            state.jobs.remove(&previous);
            debug!(origin = %descriptor.origin, "Superseded earlier offer");
        }
        state.jobs.insert(token.clone(), descriptor);

        token
    }

    /// Remove and return the job for `token`
    pub async fn consume(&self, token: &str) -> FetchResult<JobDescriptor> {
        self.take(token).ok_or(FetchError::TokenNotFound)
    }

    /// Drop a job without handing it out; `false` when it was already gone
    pub fn withdraw(&self, token: &str) -> bool {
        self.take(token).is_some()
    }

    fn take(&self, token: &str) -> Option<JobDescriptor> {
        let mut state = self.lock();
        let descriptor = state.jobs.remove(token)?;

        if state.by_origin.get(&descriptor.origin).map(String::as_str) == Some(token) {
            state.by_origin.remove(&descriptor.origin);
        }
        Some(descriptor)
    }

    pub async fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// A registered job whose offer has not reached the user yet
///
/// Withdrawn from the registry when dropped, unless [`confirm`](Self::confirm)
/// was called. Covers both failed deliveries and cancelled requests.
pub struct PendingOffer {
    registry: Arc<DeferredJobRegistry>,
    token: String,
    confirmed: bool,
}

impl PendingOffer {
    pub async fn register(registry: &Arc<DeferredJobRegistry>, descriptor: JobDescriptor) -> Self {
        let token = registry.register(descriptor).await;
        Self {
            registry: Arc::clone(registry),
            token,
            confirmed: false,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// The offer was delivered; keep the job for the button press
    pub fn confirm(mut self) -> String {
        self.confirmed = true;
        std::mem::take(&mut self.token)
    }
}

impl Drop for PendingOffer {
    fn drop(&mut self) {
        if !self.confirmed && self.registry.withdraw(&self.token) {
            debug!(token = %self.token, "Withdrew undelivered offer");
        }
    }
}

pub fn callback_data(token: &str) -> String {
    format!("{CALLBACK_PREFIX}{token}")
}

/// Token carried by callback data, if it is a deferred-job callback
pub fn parse_callback(data: &str) -> Option<&str> {
    data.strip_prefix(CALLBACK_PREFIX).filter(|t| !t.is_empty())
}
