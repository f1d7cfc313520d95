//! Pipeline runs: one admitted execution instance per event.
//!
//! A run owns its jobs and their results. Lifecycle and results are kept in
//! watch channels so waiters (the aggregator, the CLI) are woken on change
//! instead of polling.

use chrono::{DateTime, Utc};
use std::sync::OnceLock;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::domain::event::{ConcurrencyKey, Event};
use crate::domain::job::{Job, JobResult};
use crate::error::{CoreError, Result};

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Admitted, jobs not yet dispatched.
    Pending,
    /// Jobs are being dispatched or executed.
    Running,
    /// Every job reached a terminal status.
    Completed,
    /// Pre-empted by a newer event under the same key.
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Cancelled)
    }
}

/// One admitted execution instance.
#[derive(Debug)]
pub struct PipelineRun {
    id: Uuid,
    key: ConcurrencyKey,
    event: Event,
    admitted_at: DateTime<Utc>,
    cancel: CancellationToken,
    state: watch::Sender<RunState>,
    jobs: OnceLock<Vec<Job>>,
    results: watch::Sender<Vec<JobResult>>,
}

impl PipelineRun {
    /// Create a pending run for an event.
    pub fn new(event: Event, key: ConcurrencyKey) -> Self {
        let (state, _) = watch::channel(RunState::Pending);
        let (results, _) = watch::channel(Vec::new());
        Self {
            id: Uuid::new_v4(),
            key,
            event,
            admitted_at: Utc::now(),
            cancel: CancellationToken::new(),
            state,
            jobs: OnceLock::new(),
            results,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &ConcurrencyKey {
        &self.key
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn admitted_at(&self) -> DateTime<Utc> {
        self.admitted_at
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Subscribe to lifecycle changes.
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Move a pending run to running. No effect on any other state.
    pub fn mark_running(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == RunState::Pending {
                *state = RunState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Mark the run completed unless it already reached a terminal state.
    pub fn complete(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = RunState::Completed;
                true
            }
        })
    }

    /// Cancel a non-terminal run and signal every job token derived from it.
    ///
    /// Returns `false` when the run was already terminal.
    pub fn cancel(&self) -> bool {
        let transitioned = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = RunState::Cancelled;
                true
            }
        });
        if transitioned {
            self.cancel.cancel();
        }
        transitioned
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the run is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Token handed to a job; cancelled together with the run.
    pub fn job_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Attach the planned jobs. A run is planned exactly once.
    pub fn attach_jobs(&self, jobs: Vec<Job>) -> Result<()> {
        if let Some(foreign) = jobs.iter().find(|job| job.run_id != self.id) {
            return Err(CoreError::ForeignJob {
                job_id: foreign.id,
                job_run: foreign.run_id,
                run_id: self.id,
            });
        }
        self.jobs
            .set(jobs)
            .map_err(|_| CoreError::JobsAlreadyAttached(self.id))
    }

    /// Planned jobs, empty until the run is planned.
    pub fn jobs(&self) -> &[Job] {
        self.jobs.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Record a job outcome. Results for unknown jobs and duplicate results
    /// are ignored; returns whether the result was stored.
    pub fn record(&self, result: JobResult) -> bool {
        if !self.jobs().iter().any(|job| job.id == result.job_id) {
            return false;
        }
        self.results.send_if_modified(|results| {
            if results.iter().any(|r| r.job_id == result.job_id) {
                false
            } else {
                results.push(result);
                true
            }
        })
    }

    /// Snapshot of recorded results.
    pub fn results(&self) -> Vec<JobResult> {
        self.results.borrow().clone()
    }

    /// Subscribe to result updates.
    pub fn subscribe_results(&self) -> watch::Receiver<Vec<JobResult>> {
        self.results.subscribe()
    }

    /// Whether every planned job has a recorded result.
    pub fn all_jobs_finished(&self) -> bool {
        self.results.borrow().len() >= self.jobs().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobStatus;
    use crate::domain::platform::{CheckKind, Platform};

    fn run() -> PipelineRun {
        let event = Event::push("org/ws", "refs/heads/main", "abc", "ci");
        let key = ConcurrencyKey::from_event(&event).unwrap();
        PipelineRun::new(event, key)
    }

    #[test]
    fn test_lifecycle_transitions() {
        let run = run();
        assert_eq!(run.state(), RunState::Pending);
        assert!(run.mark_running());
        assert!(!run.mark_running());
        assert!(run.complete());
        assert!(run.is_terminal());
        assert!(!run.cancel(), "completed runs cannot be cancelled");
        assert_eq!(run.state(), RunState::Completed);
    }

    #[test]
    fn test_cancel_signals_job_tokens() {
        let run = run();
        let token = run.job_token();
        assert!(run.cancel());
        assert!(token.is_cancelled());
        assert_eq!(run.state(), RunState::Cancelled);
        assert!(!run.complete());
    }

    #[test]
    fn test_attach_jobs_once() {
        let run = run();
        let jobs = vec![Job::new(run.id(), Platform::Linux, CheckKind::BuildTest)];
        run.attach_jobs(jobs.clone()).unwrap();
        assert!(matches!(
            run.attach_jobs(jobs),
            Err(CoreError::JobsAlreadyAttached(_))
        ));
        assert_eq!(run.jobs().len(), 1);
    }

    #[test]
    fn test_attach_rejects_foreign_jobs() {
        let run = run();
        let foreign = Job::new(Uuid::new_v4(), Platform::Linux, CheckKind::BuildTest);
        assert!(matches!(
            run.attach_jobs(vec![foreign]),
            Err(CoreError::ForeignJob { .. })
        ));
    }

    #[test]
    fn test_record_ignores_duplicates_and_unknown_jobs() {
        let run = run();
        let job = Job::new(run.id(), Platform::Lint, CheckKind::FormatCheck);
        run.attach_jobs(vec![job.clone()]).unwrap();

        let stranger = Job::new(run.id(), Platform::Lint, CheckKind::MsrvCheck);
        assert!(!run.record(JobResult::passed(&stranger, "")));

        assert!(run.record(JobResult::passed(&job, "")));
        assert!(!run.record(JobResult::failed(&job, "late")));
        assert_eq!(run.results().len(), 1);
        assert_eq!(run.results()[0].status, JobStatus::Passed);
        assert!(run.all_jobs_finished());
    }
}
