//! Structured observability hooks for pipeline lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `RunSpan` RAII guard
//! - Job-scoped spans, nested under the run span
//! - Emission functions for admission, supersession, job start/finish and verdicts
//!
//! Events are emitted at `info!` level, except supersession which is a `warn!`.

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::event::ConcurrencyKey;
use crate::domain::job::{Job, JobResult};
use crate::report::RunVerdict;

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// ```ignore
/// let _span = RunSpan::enter(run.id(), run.key());
/// // every tracing call below carries run_id and key
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run id and key.
    ///
    /// The guard is `!Send`; async code should attach [`RunSpan::span`]
    /// with `Instrument` instead.
    pub fn enter(run_id: Uuid, key: &ConcurrencyKey) -> Self {
        Self {
            _span: Self::span(run_id, key).entered(),
        }
    }

    /// The run-scoped span, not yet entered.
    pub fn span(run_id: Uuid, key: &ConcurrencyKey) -> tracing::Span {
        tracing::info_span!("gatehouse.run", run_id = %run_id, key = %key)
    }
}

/// Span for one job's execution.
pub fn job_span(job: &Job) -> tracing::Span {
    tracing::info_span!(
        "gatehouse.job",
        job = %job.label(),
        platform = %job.platform,
        check = %job.check,
    )
}

/// Emit event: a run was admitted under a concurrency key.
pub fn emit_run_admitted(run_id: Uuid, key: &ConcurrencyKey) {
    info!(event = "run.admitted", run_id = %run_id, key = %key, key_digest = %key.short_digest());
}

/// Emit event: an active run was cancelled because a newer event arrived.
pub fn emit_run_superseded(superseded: Uuid, by: Uuid, key: &ConcurrencyKey) {
    warn!(event = "run.superseded", run_id = %superseded, superseded_by = %by, key = %key);
}

/// Emit event: a job started executing.
pub fn emit_job_started(job: &Job) {
    info!(
        event = "job.started",
        run_id = %job.run_id,
        job = %job.label(),
        platform = %job.platform,
        check = %job.check,
    );
}

/// Emit event: a job reached a terminal status.
pub fn emit_job_finished(result: &JobResult) {
    info!(
        event = "job.finished",
        run_id = %result.run_id,
        job = %result.label(),
        status = %result.status,
        duration_ms = result.duration_ms,
    );
}

/// Emit event: the verdict for a run is known.
pub fn emit_run_verdict(run_id: Uuid, verdict: RunVerdict, jobs: usize, duration_ms: u64) {
    info!(
        event = "run.verdict",
        run_id = %run_id,
        verdict = %verdict,
        jobs = jobs,
        duration_ms = duration_ms,
    );
}
