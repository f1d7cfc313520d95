//! Error types for job execution and the end-to-end pipeline.

use gatehouse_core::{CoreError, JobStatus};
use gatehouse_inventory::DiscoveryError;
use std::path::PathBuf;
use thiserror::Error;
use toolchain_provisioner::ProvisioningError;

/// Errors raised while running a job or the pipeline around it.
///
/// A check that runs and finds a defect is not an error; it is a `failed`
/// outcome. These variants describe the cases where the check could not
/// give an answer.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Tool process could not be started or waited on
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Job exceeded its time budget
    #[error("{label} timed out after {secs} seconds")]
    Timeout { label: String, secs: u64 },

    /// Job was pre-empted by a newer run
    #[error("cancelled: superseded by a newer change")]
    Cancelled,

    /// Environment acquisition failed
    #[error("provisioning failed: {0}")]
    Provisioning(#[from] ProvisioningError),

    /// Workspace inventory failed; no jobs can be planned
    #[error("workspace discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Configuration file is unreadable or invalid
    #[error("invalid configuration {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// Planning or admission misuse
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl RunnerError {
    /// Job status this error is reported as.
    pub fn job_status(&self) -> JobStatus {
        match self {
            RunnerError::Cancelled => JobStatus::Cancelled,
            _ => JobStatus::Errored,
        }
    }
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;
