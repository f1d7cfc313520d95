//! Result aggregation: one authoritative verdict per run.

use chrono::Utc;

use crate::domain::job::JobStatus;
use crate::domain::run::PipelineRun;
use crate::obs;
use crate::report::{excerpt, JobRecord, RunReport, RunVerdict, DIAGNOSTIC_EXCERPT_BYTES};

/// Wait until every job of `run` has a terminal result, or the run is
/// cancelled, then apply the verdict rule and build the summary.
///
/// Waiting is driven by the run's watch channels; nothing polls.
pub async fn aggregate(run: &PipelineRun) -> RunReport {
    let total = run.jobs().len();
    let mut results_rx = run.subscribe_results();

    let finished = tokio::select! {
        biased;
        res = results_rx.wait_for(|results| results.len() >= total) => res.is_ok(),
        _ = run.cancelled() => false,
    };

    let results = run.results();
    let run_cancelled = !finished && run.is_cancelled();

    let jobs: Vec<JobRecord> = run
        .jobs()
        .iter()
        .map(|job| match results.iter().find(|r| r.job_id == job.id) {
            Some(result) => JobRecord {
                job_id: job.id,
                platform: job.platform,
                check: job.check,
                status: result.status,
                duration_ms: result.duration_ms,
                diagnostic: (result.status != JobStatus::Passed)
                    .then(|| excerpt(&result.diagnostics, DIAGNOSTIC_EXCERPT_BYTES)),
            },
            None => JobRecord {
                job_id: job.id,
                platform: job.platform,
                check: job.check,
                status: JobStatus::Cancelled,
                duration_ms: 0,
                diagnostic: Some("superseded by a newer change".to_string()),
            },
        })
        .collect();

    let statuses: Vec<JobStatus> = jobs.iter().map(|j| j.status).collect();
    let verdict = RunVerdict::decide(run_cancelled, &statuses);

    let finished_at = Utc::now();
    let duration_ms = (finished_at - run.admitted_at()).num_milliseconds().max(0) as u64;
    obs::emit_run_verdict(run.id(), verdict, jobs.len(), duration_ms);

    RunReport {
        run_id: run.id(),
        key: run.key().clone(),
        key_digest: run.key().digest(),
        verdict,
        jobs,
        admitted_at: run.admitted_at(),
        finished_at,
        duration_ms,
    }
}
