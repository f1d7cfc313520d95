//! Error taxonomy for admission and planning.

use uuid::Uuid;

/// Errors produced while admitting events or planning jobs.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("unknown check kind: {0}")]
    UnknownCheckKind(String),

    #[error("plan for run {run_id} contains no jobs")]
    EmptyPlan { run_id: Uuid },

    #[error("jobs already attached to run {0}")]
    JobsAlreadyAttached(Uuid),

    #[error("job {job_id} belongs to run {job_run}, not run {run_id}")]
    ForeignJob {
        job_id: Uuid,
        job_run: Uuid,
        run_id: Uuid,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_job_displays_both_runs() {
        let job_run = Uuid::new_v4();
        let run_id = Uuid::new_v4();
        let err = CoreError::ForeignJob {
            job_id: Uuid::new_v4(),
            job_run,
            run_id,
        };
        let msg = err.to_string();
        assert!(msg.contains(&job_run.to_string()));
        assert!(msg.contains(&run_id.to_string()));
    }

    #[test]
    fn test_unknown_platform_display() {
        let err = CoreError::UnknownPlatform("amiga".to_string());
        assert_eq!(err.to_string(), "unknown platform: amiga");
    }
}
