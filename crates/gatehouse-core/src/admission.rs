//! Concurrency-group admission control.
//!
//! At most one non-terminal run exists per [`ConcurrencyKey`]. Admitting an
//! event whose key already has an active run cancels that run first, then
//! registers the replacement, all under one lock, so two runs are never
//! active under the same key. The lock only covers this check-and-replace
//! step; job execution happens outside it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::event::{ConcurrencyKey, Event};
use crate::domain::run::PipelineRun;
use crate::error::Result;
use crate::obs;

/// Default number of runs remembered per key.
pub const DEFAULT_HISTORY_LIMIT: usize = 32;

#[derive(Default)]
struct AdmissionState {
    active: HashMap<ConcurrencyKey, Arc<PipelineRun>>,
    history: HashMap<ConcurrencyKey, Vec<Arc<PipelineRun>>>,
}

/// Admission controller: maps each key to its cancellable active run.
pub struct AdmissionController {
    state: Mutex<AdmissionState>,
    history_limit: usize,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionController {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Keep at most `limit` historical runs per key (at least one).
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            state: Mutex::new(AdmissionState::default()),
            history_limit: limit.max(1),
        }
    }

    /// Admit an event, superseding any active run under the same key.
    ///
    /// An event arriving after its key's previous run finished simply starts
    /// a fresh run; the key governs overlap, not recurrence.
    pub async fn admit(&self, event: Event) -> Result<Arc<PipelineRun>> {
        let key = ConcurrencyKey::from_event(&event)?;
        let run = Arc::new(PipelineRun::new(event, key.clone()));

        let mut state = self.state.lock().await;

        if let Some(prior) = state.active.remove(&key) {
            // Cancellation is issued before the replacement becomes active.
            if prior.cancel() {
                obs::emit_run_superseded(prior.id(), run.id(), &key);
            }
        }

        state.active.insert(key.clone(), Arc::clone(&run));
        let history = state.history.entry(key.clone()).or_default();
        history.push(Arc::clone(&run));
        if history.len() > self.history_limit {
            let excess = history.len() - self.history_limit;
            history.drain(..excess);
        }
        drop(state);

        obs::emit_run_admitted(run.id(), &key);
        Ok(run)
    }

    /// Forget a finished run's active slot. A no-op if a newer run already
    /// replaced it.
    pub async fn release(&self, run: &PipelineRun) {
        let mut state = self.state.lock().await;
        let is_current = state
            .active
            .get(run.key())
            .map(|active| active.id() == run.id())
            .unwrap_or(false);
        if is_current {
            state.active.remove(run.key());
        }
    }

    /// The non-terminal run for a key, if any.
    pub async fn active(&self, key: &ConcurrencyKey) -> Option<Arc<PipelineRun>> {
        let state = self.state.lock().await;
        state
            .active
            .get(key)
            .filter(|run| !run.is_terminal())
            .cloned()
    }

    /// Number of keys with a non-terminal run.
    pub async fn active_count(&self) -> usize {
        let state = self.state.lock().await;
        state.active.values().filter(|run| !run.is_terminal()).count()
    }

    /// Runs admitted under a key, oldest first.
    pub async fn history(&self, key: &ConcurrencyKey) -> Vec<Arc<PipelineRun>> {
        let state = self.state.lock().await;
        state.history.get(key).cloned().unwrap_or_default()
    }
}
