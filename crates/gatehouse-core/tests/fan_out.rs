//! Integration tests: admission -> fan-out -> aggregation with a fake executor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gatehouse_core::{
    aggregate, AdmissionController, CheckKind, Event, Job, JobExecutor, JobResult, JobStatus,
    Platform, RunState, RunVerdict, Scheduler, SchedulerConfig,
};
use tokio_util::sync::CancellationToken;

/// Executor that sleeps, tracks concurrency, and honours cancellation.
struct SleepyExecutor {
    delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
    fail_label: Option<String>,
}

impl SleepyExecutor {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            fail_label: None,
        }
    }

    fn failing(delay: Duration, label: &str) -> Self {
        Self {
            fail_label: Some(label.to_string()),
            ..Self::new(delay)
        }
    }
}

#[async_trait]
impl JobExecutor for SleepyExecutor {
    async fn execute(&self, job: Job, cancel: CancellationToken) -> JobResult {
        self.started.lock().unwrap().push(job.label());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = tokio::select! {
            _ = cancel.cancelled() => JobResult::cancelled(&job, "cancelled"),
            _ = tokio::time::sleep(self.delay) => {
                if self.fail_label.as_deref() == Some(job.label().as_str()) {
                    JobResult::failed(&job, "boom")
                } else {
                    JobResult::passed(&job, "ok")
                }
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn event(commit: &str) -> Event {
    Event::push("org/ws", "refs/heads/main", commit, "ci")
}

#[tokio::test]
async fn test_two_packages_all_pass() {
    let controller = AdmissionController::new();
    let scheduler = Scheduler::new(SchedulerConfig {
        concurrency_limit: 4,
    });
    let executor = Arc::new(SleepyExecutor::new(Duration::from_millis(5)));

    let run = controller.admit(event("aaa")).await.unwrap();
    let handle = scheduler
        .submit(
            Arc::clone(&run),
            &[Platform::MacOs, Platform::Windows],
            &CheckKind::ALL,
            executor,
        )
        .unwrap();

    let report = aggregate(&run).await;
    handle.await.unwrap();

    assert_eq!(report.verdict, RunVerdict::Passed);
    assert_eq!(report.jobs.len(), 4);
    assert_eq!(report.passed_count(), 4);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(run.state(), RunState::Completed);
}

#[tokio::test]
async fn test_concurrency_limit_and_submission_order() {
    let run_controller = AdmissionController::new();
    let scheduler = Scheduler::new(SchedulerConfig {
        concurrency_limit: 1,
    });
    let executor = Arc::new(SleepyExecutor::new(Duration::from_millis(5)));

    let run = run_controller.admit(event("aaa")).await.unwrap();
    let handle = scheduler
        .submit(
            Arc::clone(&run),
            &[Platform::Linux, Platform::MacOs, Platform::Windows],
            &CheckKind::ALL,
            Arc::clone(&executor) as Arc<dyn JobExecutor>,
        )
        .unwrap();
    aggregate(&run).await;
    handle.await.unwrap();

    assert_eq!(executor.peak.load(Ordering::SeqCst), 1);
    let started = executor.started.lock().unwrap().clone();
    let planned: Vec<String> = run.jobs().iter().map(Job::label).collect();
    assert_eq!(started, planned);
}

#[tokio::test]
async fn test_one_failure_does_not_abort_siblings() {
    let controller = AdmissionController::new();
    let scheduler = Scheduler::new(SchedulerConfig {
        concurrency_limit: 2,
    });
    let executor = Arc::new(SleepyExecutor::failing(
        Duration::from_millis(5),
        "lint/format-check",
    ));

    let run = controller.admit(event("aaa")).await.unwrap();
    let handle = scheduler
        .submit(Arc::clone(&run), &[Platform::Linux], &CheckKind::ALL, executor)
        .unwrap();
    let report = aggregate(&run).await;
    handle.await.unwrap();

    assert_eq!(report.verdict, RunVerdict::Failed);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.passed_count(), 2);
}

#[tokio::test]
async fn test_newer_event_supersedes_running_run() {
    let controller = AdmissionController::new();
    let scheduler = Scheduler::new(SchedulerConfig {
        concurrency_limit: 1,
    });

    let slow = Arc::new(SleepyExecutor::new(Duration::from_secs(30)));
    let first = controller.admit(event("aaa")).await.unwrap();
    let first_handle = scheduler
        .submit(
            Arc::clone(&first),
            &[Platform::MacOs, Platform::Windows],
            &CheckKind::ALL,
            slow,
        )
        .unwrap();

    // Let the first job start.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let first_report = tokio::spawn({
        let first = Arc::clone(&first);
        async move { aggregate(&first).await }
    });

    let fast = Arc::new(SleepyExecutor::new(Duration::from_millis(5)));
    let second = controller.admit(event("bbb")).await.unwrap();
    let second_handle = scheduler
        .submit(
            Arc::clone(&second),
            &[Platform::MacOs, Platform::Windows],
            &CheckKind::ALL,
            fast,
        )
        .unwrap();

    let first_report = first_report.await.unwrap();
    assert_eq!(first_report.verdict, RunVerdict::Cancelled);
    assert_eq!(first.state(), RunState::Cancelled);

    first_handle.await.unwrap();
    assert!(first
        .results()
        .iter()
        .all(|r| r.status == JobStatus::Cancelled));

    let second_report = aggregate(&second).await;
    second_handle.await.unwrap();
    assert_eq!(second_report.verdict, RunVerdict::Passed);
    assert_eq!(second_report.run_id, second.id());

    let history = controller.history(second.key()).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].state(), RunState::Cancelled);
}

#[tokio::test]
async fn test_concurrency_limit_spans_overlapping_runs() {
    let controller = AdmissionController::new();
    let scheduler = Scheduler::new(SchedulerConfig {
        concurrency_limit: 1,
    });
    let executor = Arc::new(SleepyExecutor::new(Duration::from_millis(100)));

    let run_a = controller
        .admit(Event::push("org/ws", "refs/heads/a", "aaa", "ci"))
        .await
        .unwrap();
    let run_b = controller
        .admit(Event::push("org/ws", "refs/heads/b", "bbb", "ci"))
        .await
        .unwrap();

    let handle_a = scheduler
        .submit(
            Arc::clone(&run_a),
            &[Platform::Linux],
            &[CheckKind::BuildTest],
            Arc::clone(&executor) as Arc<dyn JobExecutor>,
        )
        .unwrap();
    let handle_b = scheduler
        .submit(
            Arc::clone(&run_b),
            &[Platform::Linux],
            &[CheckKind::BuildTest],
            Arc::clone(&executor) as Arc<dyn JobExecutor>,
        )
        .unwrap();

    let (report_a, report_b) = tokio::join!(aggregate(&run_a), aggregate(&run_b));
    handle_a.await.unwrap();
    handle_b.await.unwrap();

    assert_eq!(report_a.verdict, RunVerdict::Passed);
    assert_eq!(report_b.verdict, RunVerdict::Passed);
    assert_eq!(executor.peak.load(Ordering::SeqCst), 1);
}
