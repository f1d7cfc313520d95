//! Run verdicts and machine-parsable summary reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::event::ConcurrencyKey;
use crate::domain::job::JobStatus;
use crate::domain::platform::{CheckKind, Platform};

/// Maximum diagnostic excerpt carried per job in a report, in bytes.
pub const DIAGNOSTIC_EXCERPT_BYTES: usize = 4000;

/// Exit code for a passed run.
pub const EXIT_PASSED: i32 = 0;
/// Exit code when a check found a defect.
pub const EXIT_CHECK_FAILURE: i32 = 1;
/// Exit code when the pipeline itself could not run a job.
pub const EXIT_INFRASTRUCTURE: i32 = 2;
/// Exit code for a run superseded by a newer event.
pub const EXIT_CANCELLED: i32 = 130;

/// Aggregate verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    Passed,
    Failed,
    Cancelled,
}

impl RunVerdict {
    /// Apply the all-must-pass rule.
    ///
    /// `run_cancelled` means the run was pre-empted before all jobs finished.
    pub fn decide(run_cancelled: bool, statuses: &[JobStatus]) -> Self {
        if run_cancelled {
            RunVerdict::Cancelled
        } else if statuses.iter().all(|s| *s == JobStatus::Passed) {
            RunVerdict::Passed
        } else {
            RunVerdict::Failed
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunVerdict::Passed => "passed",
            RunVerdict::Failed => "failed",
            RunVerdict::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One line of the summary: a job and how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub platform: Platform,
    pub check: CheckKind,
    pub status: JobStatus,
    pub duration_ms: u64,

    /// Excerpt of the diagnostics; only present for non-passing jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl JobRecord {
    pub fn label(&self) -> String {
        format!("{}/{}", self.platform, self.check)
    }
}

/// Summary of a finished (or cancelled) run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub key: ConcurrencyKey,
    pub key_digest: String,
    pub verdict: RunVerdict,
    pub jobs: Vec<JobRecord>,
    pub admitted_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    pub fn passed_count(&self) -> usize {
        self.count(JobStatus::Passed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(JobStatus::Failed)
    }

    pub fn errored_count(&self) -> usize {
        self.count(JobStatus::Errored)
    }

    /// Process exit code for downstream automation.
    ///
    /// Infrastructure errors win over check failures: an errored job means
    /// the verdict rests on incomplete evidence.
    pub fn exit_code(&self) -> i32 {
        match self.verdict {
            RunVerdict::Passed => EXIT_PASSED,
            RunVerdict::Cancelled => EXIT_CANCELLED,
            RunVerdict::Failed if self.errored_count() > 0 => EXIT_INFRASTRUCTURE,
            RunVerdict::Failed => EXIT_CHECK_FAILURE,
        }
    }

    /// Serialise the report as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Run {} ({})\n", self.run_id, self.key));
        out.push_str(&format!(
            "Verdict: {}\n",
            match self.verdict {
                RunVerdict::Passed => "✓ PASSED",
                RunVerdict::Failed => "✗ FAILED",
                RunVerdict::Cancelled => "⊘ CANCELLED (superseded by a newer change)",
            }
        ));
        out.push_str(&format!("Duration: {}ms\n\n", self.duration_ms));

        for job in &self.jobs {
            let mark = match job.status {
                JobStatus::Passed => "✓",
                JobStatus::Failed => "✗",
                JobStatus::Errored => "!",
                JobStatus::Cancelled => "⊘",
            };
            out.push_str(&format!(
                "  {} {} {} ({}ms)\n",
                mark,
                job.label(),
                job.status,
                job.duration_ms
            ));
            if let Some(diagnostic) = &job.diagnostic {
                for line in diagnostic.lines() {
                    out.push_str(&format!("      {}\n", line));
                }
            }
        }

        out.push_str(&format!(
            "\nSummary: {}/{} jobs passed, {} failed, {} errored\n",
            self.passed_count(),
            self.jobs.len(),
            self.failed_count(),
            self.errored_count()
        ));
        out
    }
}

/// Keep the tail of `text`, at most `max_bytes`, on a char boundary.
pub fn excerpt(text: &str, max_bytes: usize) -> String {
    let text = text.trim_end();
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &text[start..])
}
