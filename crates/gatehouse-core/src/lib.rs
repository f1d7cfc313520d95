//! Gatehouse Core - validation pipeline orchestration
//!
//! Provides the pieces that sit between a change event and a verdict:
//! - Admission control keyed by concurrency group (last event wins)
//! - Fan-out of platform x check-kind jobs under a concurrency limit
//! - Aggregation of job outcomes into one authoritative verdict

pub mod admission;
pub mod aggregator;
pub mod domain;
pub mod error;
pub mod obs;
pub mod report;
pub mod scheduler;
pub mod telemetry;

// Re-export key types
pub use admission::AdmissionController;
pub use aggregator::aggregate;
pub use domain::event::{ConcurrencyKey, Event};
pub use domain::job::{Job, JobResult, JobStatus, ProvisioningNeeds};
pub use domain::platform::{CheckKind, Platform};
pub use domain::run::{PipelineRun, RunState};
pub use error::{CoreError, Result};
pub use report::{JobRecord, RunReport, RunVerdict};
pub use scheduler::{JobExecutor, Scheduler, SchedulerConfig};
pub use telemetry::init_tracing;

/// Gatehouse version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
