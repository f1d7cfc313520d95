//! End-to-end validation: inventory, admission, fan-out, aggregation.

use gatehouse_core::obs::RunSpan;
use gatehouse_core::{
    aggregate, AdmissionController, CheckKind, ConcurrencyKey, Event, PipelineRun, Platform,
    RunReport, Scheduler, SchedulerConfig,
};
use gatehouse_inventory::{discover_packages, Inventory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use crate::check::{JobRunner, RunnerSettings};
use crate::config::GatehouseConfig;
use crate::error::Result;
use crate::runner::ToolInvoker;
use toolchain_provisioner::Provisioner;

/// What to validate for one event.
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub workspace_root: PathBuf,
    pub event: Event,
    pub platforms: Vec<Platform>,
    pub checks: Vec<CheckKind>,
}

impl ValidationRequest {
    /// Request covering the platforms and checks of `config`.
    pub fn from_config(workspace_root: &Path, event: Event, config: &GatehouseConfig) -> Self {
        Self {
            workspace_root: workspace_root.to_path_buf(),
            event,
            platforms: config.platforms.clone(),
            checks: config.checks.clone(),
        }
    }
}

/// Long-lived orchestrator shared across events.
///
/// One admission controller and one provisioner cache serve every run, so
/// overlapping events on the same line of work supersede each other and
/// toolchains installed for one run are reused by the next.
pub struct ValidationPipeline {
    admission: AdmissionController,
    scheduler: Scheduler,
    provisioner: Arc<Provisioner>,
    invoker: Arc<dyn ToolInvoker>,
    settings: RunnerSettings,
}

impl ValidationPipeline {
    pub fn new(
        config: &GatehouseConfig,
        provisioner: Arc<Provisioner>,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Self {
        let mut scheduler_config = SchedulerConfig::default();
        if let Some(limit) = config.concurrency {
            scheduler_config.concurrency_limit = limit;
        }
        Self {
            admission: AdmissionController::new(),
            scheduler: Scheduler::new(scheduler_config),
            provisioner,
            invoker,
            settings: RunnerSettings::from(config),
        }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Cancel the active run for `event`'s line of work, if there is one.
    pub async fn cancel(&self, event: &Event) -> bool {
        let Ok(key) = ConcurrencyKey::from_event(event) else {
            return false;
        };
        match self.admission.active(&key).await {
            Some(run) => run.cancel(),
            None => false,
        }
    }

    /// Validate one event end to end.
    ///
    /// A discovery error aborts before the event is admitted, so no jobs
    /// are planned and no earlier run is superseded by a run that could
    /// never start.
    pub async fn validate(&self, request: ValidationRequest) -> Result<RunReport> {
        let inventory = Arc::new(discover_packages(&request.workspace_root)?);
        self.validate_inventory(inventory, request).await
    }

    /// Validate against an already-discovered inventory.
    pub async fn validate_inventory(
        &self,
        inventory: Arc<Inventory>,
        request: ValidationRequest,
    ) -> Result<RunReport> {
        let run = self.admission.admit(request.event).await?;
        let result = self
            .execute(&run, inventory, &request.platforms, &request.checks)
            .instrument(RunSpan::span(run.id(), run.key()))
            .await;
        self.admission.release(&run).await;
        result
    }

    async fn execute(
        &self,
        run: &Arc<PipelineRun>,
        inventory: Arc<Inventory>,
        platforms: &[Platform],
        checks: &[CheckKind],
    ) -> Result<RunReport> {
        info!(
            run_id = %run.id(),
            key = %run.key(),
            packages = inventory.packages().len(),
            "Validating workspace"
        );

        let runner = Arc::new(JobRunner::new(
            inventory,
            Arc::clone(&self.provisioner),
            Arc::clone(&self.invoker),
            self.settings.clone(),
        ));

        let handle = match self
            .scheduler
            .submit(Arc::clone(run), platforms, checks, runner)
        {
            Ok(handle) => handle,
            Err(e) => {
                run.cancel();
                return Err(e.into());
            }
        };

        let report = aggregate(run).await;

        // Superseded runs report immediately; their jobs wind down in the
        // background once the cancellation reaches each tool.
        if !run.is_cancelled() {
            if let Err(e) = handle.await {
                warn!(run_id = %run.id(), error = %e, "Dispatch task failed");
            }
        }
        Ok(report)
    }
}
