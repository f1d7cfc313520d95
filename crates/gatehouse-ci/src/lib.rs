//! Gatehouse CI - job execution and end-to-end validation
//!
//! Provides the job runner and the pipeline around it:
//! - Executes build-test, format-check and msrv-check jobs against a
//!   provisioned environment
//! - Supervises tool subprocesses under cancellation and timeouts
//! - Drives discovery, admission, fan-out and aggregation for each event

pub mod check;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod runner;
pub mod stage;

// Re-export key types
pub use check::{misformatted_files, CheckOutcome, JobRunner, RunnerSettings};
pub use config::{GatehouseConfig, CONFIG_FILE};
pub use error::{Result, RunnerError};
pub use pipeline::{ValidationPipeline, ValidationRequest};
pub use runner::{ProcessInvoker, ToolInvoker, ToolOutput};
pub use stage::{FormatScope, ToolCommand};
