//! Operation registry for export states.
//!
//! Each export id is written only by the task that registered it. Progress
//! never decreases and terminal states are final.

use crate::error::{ProgressError, Result};
use async_trait::async_trait;
use clinexport_core::{
    ExportError, ExportId, ExportOperationResult, ExportOperationState, ExportStatus, UserId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Callback notified with a snapshot after every state change.
pub type ProgressCallback = Arc<dyn Fn(&ExportOperationState) + Send + Sync>;

/// Filter for listing states.
#[derive(Debug, Clone, Default)]
pub struct StateFilter {
    /// Only this status
    pub status: Option<ExportStatus>,
    /// Only this user's exports
    pub user_id: Option<UserId>,
    /// Maximum results
    pub limit: Option<usize>,
}

impl StateFilter {
    fn matches(&self, state: &ExportOperationState) -> bool {
        if let Some(status) = self.status {
            if state.status != status {
                return false;
            }
        }
        if let Some(user) = &self.user_id {
            if &state.user_id != user {
                return false;
            }
        }
        true
    }
}

/// Tracks export operation states.
#[async_trait]
pub trait OperationRegistry: Send + Sync {
    /// Register a new export. Fails with [`ProgressError::Conflict`] if the id
    /// is already known, leaving the existing state untouched.
    async fn register(&self, state: ExportOperationState) -> Result<()>;

    /// Raise progress and set the message. Lower values are ignored; the
    /// first update moves the export to `processing`.
    async fn update_progress(
        &self,
        id: ExportId,
        progress: u8,
        message: &str,
    ) -> Result<ExportOperationState>;

    /// Mark the export completed with its result.
    async fn complete(&self, id: ExportId, result: ExportOperationResult) -> Result<ExportOperationState>;

    /// Mark the export failed.
    async fn fail(
        &self,
        id: ExportId,
        error: ExportError,
        result: ExportOperationResult,
    ) -> Result<ExportOperationState>;

    /// Current state.
    async fn get(&self, id: ExportId) -> Option<ExportOperationState>;

    /// States matching a filter, oldest first.
    async fn list(&self, filter: StateFilter) -> Vec<ExportOperationState>;

    /// Remove and return a terminal state. Running exports are left alone.
    async fn take_terminal(&self, id: ExportId) -> Option<ExportOperationState>;

    /// Subscribe to changes of one export. May be called before registration.
    async fn subscribe(&self, id: ExportId, callback: ProgressCallback);

    /// Drop terminal states that ended more than `ttl` ago, along with
    /// subscriptions older than `ttl` whose export was never registered.
    /// Returns how many states were removed.
    async fn evict_expired(&self, ttl: Duration) -> usize;

    /// Wait until the export reaches a terminal status, polling until
    /// `timeout`.
    async fn wait_for_completion(&self, id: ExportId, timeout: Duration) -> Option<ExportOperationState>;
}

/// In-memory registry.
pub struct InMemoryOperationRegistry {
    states: Arc<Mutex<HashMap<ExportId, ExportOperationState>>>,
    callbacks: Arc<Mutex<HashMap<ExportId, Subscribers>>>,
    poll_interval: Duration,
}

struct Subscribers {
    since: Instant,
    callbacks: Vec<ProgressCallback>,
}

impl InMemoryOperationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Use a custom polling interval for [`wait_for_completion`](OperationRegistry::wait_for_completion).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Apply `change` to a non-terminal state and notify subscribers.
    async fn mutate<F>(&self, id: ExportId, change: F) -> Result<ExportOperationState>
    where
        F: FnOnce(&mut ExportOperationState) + Send,
    {
        let snapshot = {
            let mut states = self.states.lock().await;
            let state = states.get_mut(&id).ok_or(ProgressError::NotFound(id))?;
            if state.status.is_terminal() {
                return Err(ProgressError::Terminal {
                    id,
                    status: state.status,
                });
            }
            change(state);
            state.last_update = chrono::Utc::now();
            state.clone()
        };
        self.notify(&snapshot).await;
        Ok(snapshot)
    }

    async fn notify(&self, state: &ExportOperationState) {
        let callbacks = self
            .callbacks
            .lock()
            .await
            .get(&state.export_id)
            .map(|s| s.callbacks.clone())
            .unwrap_or_default();
        for callback in callbacks {
            callback(state);
        }
    }
}

impl Default for InMemoryOperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationRegistry for InMemoryOperationRegistry {
    async fn register(&self, state: ExportOperationState) -> Result<()> {
        let id = state.export_id;
        {
            let mut states = self.states.lock().await;
            if states.contains_key(&id) {
                return Err(ProgressError::Conflict(id));
            }
            states.insert(id, state.clone());
        }
        debug!("Registered export {}", id);
        self.notify(&state).await;
        Ok(())
    }

    async fn update_progress(
        &self,
        id: ExportId,
        progress: u8,
        message: &str,
    ) -> Result<ExportOperationState> {
        let message = message.to_string();
        self.mutate(id, move |state| {
            state.status = ExportStatus::Processing;
            state.progress = state.progress.max(progress.min(100));
            state.status_message = message;
        })
        .await
    }

    async fn complete(&self, id: ExportId, result: ExportOperationResult) -> Result<ExportOperationState> {
        let state = self
            .mutate(id, move |state| {
                state.status = ExportStatus::Completed;
                state.progress = 100;
                state.status_message = "Export completed".to_string();
                state.end_time = Some(chrono::Utc::now());
                state.result = Some(result);
            })
            .await?;
        info!("Export {} completed", id);
        Ok(state)
    }

    async fn fail(
        &self,
        id: ExportId,
        error: ExportError,
        result: ExportOperationResult,
    ) -> Result<ExportOperationState> {
        let code = error.code();
        let state = self
            .mutate(id, move |state| {
                state.status = ExportStatus::Failed;
                state.status_message = format!("Export failed: {}", error.code());
                state.end_time = Some(chrono::Utc::now());
                state.error = Some(error);
                state.result = Some(result);
            })
            .await?;
        info!("Export {} failed ({})", id, code);
        Ok(state)
    }

    async fn get(&self, id: ExportId) -> Option<ExportOperationState> {
        self.states.lock().await.get(&id).cloned()
    }

    async fn list(&self, filter: StateFilter) -> Vec<ExportOperationState> {
        let states = self.states.lock().await;
        let mut results: Vec<_> = states.values().filter(|s| filter.matches(s)).cloned().collect();
        results.sort_by_key(|s| s.start_time);

        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        results
    }

    async fn take_terminal(&self, id: ExportId) -> Option<ExportOperationState> {
        let taken = {
            let mut states = self.states.lock().await;
            match states.get(&id) {
                Some(state) if state.status.is_terminal() => states.remove(&id),
                _ => None,
            }
        };
        if taken.is_some() {
            self.callbacks.lock().await.remove(&id);
        }
        taken
    }

    async fn subscribe(&self, id: ExportId, callback: ProgressCallback) {
        self.callbacks
            .lock()
            .await
            .entry(id)
            .or_insert_with(|| Subscribers {
                since: Instant::now(),
                callbacks: Vec::new(),
            })
            .callbacks
            .push(callback);
    }

    async fn evict_expired(&self, ttl: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(ttl) {
            Ok(ttl) => chrono::Utc::now() - ttl,
            Err(_) => return 0,
        };

        let mut states = self.states.lock().await;
        let evicted: Vec<ExportId> = states
            .values()
            .filter(|s| s.status.is_terminal() && s.end_time.map_or(false, |t| t <= cutoff))
            .map(|s| s.export_id)
            .collect();
        for id in &evicted {
            states.remove(id);
        }

        let mut callbacks = self.callbacks.lock().await;
        for id in &evicted {
            callbacks.remove(id);
        }
        // Subscribing ahead of registration is allowed, so only stale orphans go.
        let before = callbacks.len();
        callbacks.retain(|id, subs| states.contains_key(id) || subs.since.elapsed() < ttl);
        let orphans = before - callbacks.len();

        if !evicted.is_empty() || orphans > 0 {
            debug!(
                "Evicted {} expired export states and {} orphaned subscriptions",
                evicted.len(),
                orphans
            );
        }
        evicted.len()
    }

    async fn wait_for_completion(&self, id: ExportId, timeout: Duration) -> Option<ExportOperationState> {
        let start = Instant::now();

        while start.elapsed() < timeout {
            if let Some(state) = self.get(id).await {
                if state.status.is_terminal() {
                    return Some(state);
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        None
    }
}
