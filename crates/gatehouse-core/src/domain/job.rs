//! Jobs and their outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::platform::{CheckKind, Platform};

/// What a job needs from the toolchain provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningNeeds {
    /// A build toolchain for the job's platform.
    pub toolchain: bool,

    /// The external code-generation compiler.
    pub codegen_compiler: bool,
}

impl ProvisioningNeeds {
    /// Default requirements for a check kind. Formatting never compiles
    /// anything, so it skips the code-generation compiler.
    pub fn for_check(check: CheckKind) -> Self {
        match check {
            CheckKind::BuildTest | CheckKind::MsrvCheck => Self {
                toolchain: true,
                codegen_compiler: true,
            },
            CheckKind::FormatCheck => Self {
                toolchain: true,
                codegen_compiler: false,
            },
        }
    }
}

/// One (platform, check-kind) unit of validation, owned by a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub run_id: Uuid,
    pub platform: Platform,
    pub check: CheckKind,
    pub needs: ProvisioningNeeds,
}

impl Job {
    pub fn new(run_id: Uuid, platform: Platform, check: CheckKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            platform,
            check,
            needs: ProvisioningNeeds::for_check(check),
        }
    }

    /// Human-readable label, e.g. `macos/build-test`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.platform, self.check)
    }
}

/// Terminal status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// The check found nothing wrong.
    Passed,

    /// The check found a real defect in the code.
    Failed,

    /// Superseded by a newer event.
    Cancelled,

    /// The pipeline could not run the check (provisioning, launch, timeout).
    Errored,
}

impl JobStatus {
    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Passed => "passed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Errored => "errored",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub run_id: Uuid,
    pub platform: Platform,
    pub check: CheckKind,
    pub status: JobStatus,

    /// Captured tool output or error description.
    pub diagnostics: String,

    pub duration_ms: u64,

    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    pub fn new(job: &Job, status: JobStatus, diagnostics: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            run_id: job.run_id,
            platform: job.platform,
            check: job.check,
            status,
            diagnostics: diagnostics.into(),
            duration_ms: 0,
            finished_at: Utc::now(),
        }
    }

    pub fn passed(job: &Job, diagnostics: impl Into<String>) -> Self {
        Self::new(job, JobStatus::Passed, diagnostics)
    }

    pub fn failed(job: &Job, diagnostics: impl Into<String>) -> Self {
        Self::new(job, JobStatus::Failed, diagnostics)
    }

    pub fn cancelled(job: &Job, diagnostics: impl Into<String>) -> Self {
        Self::new(job, JobStatus::Cancelled, diagnostics)
    }

    pub fn errored(job: &Job, diagnostics: impl Into<String>) -> Self {
        Self::new(job, JobStatus::Errored, diagnostics)
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Label of the job this result belongs to.
    pub fn label(&self) -> String {
        format!("{}/{}", self.platform, self.check)
    }
}
