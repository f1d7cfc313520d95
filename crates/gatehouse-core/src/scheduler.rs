//! Fan-out scheduling of platform x check-kind jobs.
//!
//! [`Scheduler::plan`] expands a run into its job matrix. Platform-specific
//! checks get one job per build platform; platform-agnostic checks get a
//! single job on the logical `lint` platform.
//!
//! [`Scheduler::dispatch`] runs the jobs concurrently through a
//! [`JobExecutor`], capped by a semaphore. Jobs start in submission order as
//! permits free up; jobs still queued when the run is cancelled are recorded
//! as cancelled without executing.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::domain::job::{Job, JobResult};
use crate::domain::platform::{CheckKind, Platform};
use crate::domain::run::PipelineRun;
use crate::error::{CoreError, Result};
use crate::obs;

/// Executes one job to a terminal result.
///
/// Implementations must observe `cancel` at their yield points and return a
/// `cancelled` result once it fires.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: Job, cancel: CancellationToken) -> JobResult;
}

/// Configuration for job dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of simultaneously running jobs.
    pub concurrency_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency(),
        }
    }
}

/// Host parallelism, falling back to 4 when it cannot be determined.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Fan-out scheduler.
///
/// Clones share one pool of permits, so the concurrency limit holds across
/// every run dispatched through the same scheduler.
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency_limit.max(1)));
        Self { config, permits }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Build the job matrix for a run and attach it.
    ///
    /// Duplicate platforms or checks are collapsed. `lint` in `platforms`
    /// is ignored for platform-specific checks.
    pub fn plan(
        run: &PipelineRun,
        platforms: &[Platform],
        checks: &[CheckKind],
    ) -> Result<Vec<Job>> {
        let platforms = dedup(platforms.iter().copied().filter(|p| *p != Platform::Lint));
        let checks = dedup(checks.iter().copied());

        let mut jobs = Vec::new();
        for platform in &platforms {
            for check in checks.iter().filter(|c| !c.is_platform_agnostic()) {
                jobs.push(Job::new(run.id(), *platform, *check));
            }
        }
        for check in checks.iter().filter(|c| c.is_platform_agnostic()) {
            jobs.push(Job::new(run.id(), Platform::Lint, *check));
        }

        if jobs.is_empty() {
            return Err(CoreError::EmptyPlan { run_id: run.id() });
        }

        run.attach_jobs(jobs.clone())?;
        debug!(run_id = %run.id(), jobs = jobs.len(), "Planned job matrix");
        Ok(jobs)
    }

    /// Execute every planned job of `run` and wait for all of them.
    ///
    /// Marks the run completed once every job has a result, unless it was
    /// cancelled in the meantime.
    pub async fn dispatch(&self, run: Arc<PipelineRun>, executor: Arc<dyn JobExecutor>) {
        run.mark_running();
        let mut tasks: Vec<(Job, JoinHandle<()>)> = Vec::new();

        for job in run.jobs().to_vec() {
            let permit = tokio::select! {
                biased;
                _ = run.cancelled() => None,
                permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                run.record(JobResult::cancelled(
                    &job,
                    "run superseded before the job started",
                ));
                continue;
            };

            let executor = Arc::clone(&executor);
            let owner = Arc::clone(&run);
            let cancel = run.job_token();
            let task_job = job.clone();
            let span = obs::job_span(&job);
            let handle = tokio::spawn(
                async move {
                    let _permit = permit;
                    obs::emit_job_started(&task_job);
                    let start = Instant::now();
                    let mut result = executor.execute(task_job, cancel).await;
                    if result.duration_ms == 0 {
                        result.duration_ms = start.elapsed().as_millis() as u64;
                    }
                    obs::emit_job_finished(&result);
                    owner.record(result);
                }
                .instrument(span),
            );
            tasks.push((job, handle));
        }

        for (job, handle) in tasks {
            if let Err(e) = handle.await {
                warn!(job = %job.label(), error = %e, "Job task aborted");
                run.record(JobResult::errored(&job, format!("job task aborted: {e}")));
            }
        }

        run.complete();
    }

    /// Plan `run` and dispatch it in the background.
    pub fn submit(
        &self,
        run: Arc<PipelineRun>,
        platforms: &[Platform],
        checks: &[CheckKind],
        executor: Arc<dyn JobExecutor>,
    ) -> Result<JoinHandle<()>> {
        Self::plan(&run, platforms, checks)?;
        let scheduler = self.clone();
        Ok(tokio::spawn(async move {
            scheduler.dispatch(run, executor).await
        }))
    }
}

fn dedup<T: PartialEq>(items: impl Iterator<Item = T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
