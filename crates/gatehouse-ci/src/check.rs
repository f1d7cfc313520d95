//! Job runner: executes one validation job against a provisioned
//! environment and turns the outcome into a [`JobResult`].

use async_trait::async_trait;
use futures::future::join_all;
use gatehouse_core::{CheckKind, Job, JobExecutor, JobResult, JobStatus};
use gatehouse_inventory::{Inventory, Package};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use toolchain_provisioner::{Provisioner, ScopedEnvironment};
use tracing::{debug, info, warn};

use crate::config::GatehouseConfig;
use crate::error::{Result, RunnerError};
use crate::runner::{ToolInvoker, ToolOutput};
use crate::stage::{build_test_commands, format_commands, msrv_command, FormatScope, ToolCommand};

/// Outcome of a check that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub passed: bool,
    pub diagnostics: String,
}

impl CheckOutcome {
    fn passed(diagnostics: impl Into<String>) -> Self {
        Self {
            passed: true,
            diagnostics: diagnostics.into(),
        }
    }

    fn failed(diagnostics: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostics: diagnostics.into(),
        }
    }
}

/// Settings the runner reads from [`GatehouseConfig`].
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub format_scope: FormatScope,
    pub msrv_parallel: bool,
    pub msrv_check_command: String,
    /// `None` means no limit.
    pub job_timeout: Option<Duration>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from(&GatehouseConfig::default())
    }
}

impl From<&GatehouseConfig> for RunnerSettings {
    fn from(config: &GatehouseConfig) -> Self {
        Self {
            format_scope: config.format.scope,
            msrv_parallel: config.msrv.parallel,
            msrv_check_command: config.msrv.check_command.clone(),
            job_timeout: (config.job_timeout_secs > 0)
                .then(|| Duration::from_secs(config.job_timeout_secs)),
        }
    }
}

/// Executes jobs of one run against one workspace inventory.
pub struct JobRunner {
    inventory: Arc<Inventory>,
    provisioner: Arc<Provisioner>,
    invoker: Arc<dyn ToolInvoker>,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(
        inventory: Arc<Inventory>,
        provisioner: Arc<Provisioner>,
        invoker: Arc<dyn ToolInvoker>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            inventory,
            provisioner,
            invoker,
            settings,
        }
    }

    fn root(&self) -> &Path {
        self.inventory.root()
    }

    /// Run `job`'s check inside `env`.
    pub async fn run(
        &self,
        job: &Job,
        env: &ScopedEnvironment,
        cancel: &CancellationToken,
    ) -> Result<CheckOutcome> {
        match job.check {
            CheckKind::BuildTest => self.build_test(env, cancel).await,
            CheckKind::FormatCheck => self.format_check(env, cancel).await,
            CheckKind::MsrvCheck => self.msrv_check(env, cancel).await,
        }
    }

    async fn invoke(
        &self,
        command: ToolCommand,
        env: &ScopedEnvironment,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput> {
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }
        let command = command.with_envs(env.envs());
        self.invoker.invoke(&command, cancel).await
    }

    async fn build_test(
        &self,
        env: &ScopedEnvironment,
        cancel: &CancellationToken,
    ) -> Result<CheckOutcome> {
        let mut log = String::new();
        let cross = env.build_target();
        for command in build_test_commands(self.root(), env.toolchain(), cross.is_none()) {
            let label = command.label.clone();
            let output = self.invoke(command, env, cancel).await?;
            append_section(&mut log, &label, &output.combined());
            if !output.passed() {
                return Ok(CheckOutcome::failed(format!(
                    "{label} exited with code {}\n{log}",
                    output.exit_code
                )));
            }
        }
        if let Some(target) = cross {
            log.push_str(&format!("tests not executed: cross-compiled for {target}\n"));
        }
        Ok(CheckOutcome::passed(log))
    }

    async fn format_check(
        &self,
        env: &ScopedEnvironment,
        cancel: &CancellationToken,
    ) -> Result<CheckOutcome> {
        let commands = format_commands(
            self.root(),
            env.toolchain(),
            self.settings.format_scope,
            self.inventory.packages(),
        );

        let mut offending = BTreeSet::new();
        let mut failed_steps = Vec::new();
        let mut log = String::new();
        for command in commands {
            let label = command.label.clone();
            let output = self.invoke(command, env, cancel).await?;
            if !output.passed() {
                offending.extend(misformatted_files(&output.combined(), self.root()));
                failed_steps.push(label.clone());
                append_section(&mut log, &label, &output.combined());
            }
        }

        if failed_steps.is_empty() {
            return Ok(CheckOutcome::passed("all files formatted"));
        }

        let mut diagnostics = String::new();
        if offending.is_empty() {
            diagnostics.push_str(&format!("formatter failed: {}\n", failed_steps.join(", ")));
        } else {
            diagnostics.push_str("misformatted files:\n");
            for file in &offending {
                diagnostics.push_str(&format!("  {file}\n"));
            }
        }
        diagnostics.push_str(&log);
        Ok(CheckOutcome::failed(diagnostics))
    }

    async fn msrv_check(
        &self,
        env: &ScopedEnvironment,
        cancel: &CancellationToken,
    ) -> Result<CheckOutcome> {
        let order = self.inventory.topological_order()?;
        let packages: Vec<&Package> = order
            .iter()
            .filter_map(|name| self.inventory.package(name))
            .collect();

        let verdicts: Vec<Result<PackageVerdict>> = if self.settings.msrv_parallel {
            join_all(packages.iter().map(|p| self.msrv_package(p, env, cancel))).await
        } else {
            let mut verdicts = Vec::with_capacity(packages.len());
            for package in &packages {
                verdicts.push(self.msrv_package(package, env, cancel).await);
            }
            verdicts
        };

        let mut lines = Vec::with_capacity(verdicts.len());
        let mut any_failed = false;
        let mut first_error = None;
        for verdict in verdicts {
            match verdict {
                Ok(v) => {
                    any_failed |= v.failed;
                    lines.push(v.line);
                }
                Err(RunnerError::Cancelled) => return Err(RunnerError::Cancelled),
                Err(e) => {
                    lines.push(format!("error: {e}"));
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            warn!(error = %e, "msrv-check could not complete");
            return Err(e);
        }
        let diagnostics = lines.join("\n");
        Ok(if any_failed {
            CheckOutcome::failed(diagnostics)
        } else {
            CheckOutcome::passed(diagnostics)
        })
    }

    async fn msrv_package(
        &self,
        package: &Package,
        env: &ScopedEnvironment,
        cancel: &CancellationToken,
    ) -> Result<PackageVerdict> {
        let Some(declared) = package.rust_version else {
            return Ok(PackageVerdict::ok(format!(
                "{}: skipped (no rust-version declared)",
                package.name
            )));
        };
        let effective = self
            .inventory
            .effective_msrv(&package.name)
            .unwrap_or(declared);

        if declared < effective {
            return Ok(PackageVerdict::failed(format!(
                "{}: declares rust-version {declared} but its dependencies require {effective}",
                package.name
            )));
        }

        let toolchain = effective.toolchain();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunnerError::Cancelled),
            installed = env.ensure_toolchain(&toolchain) => installed?,
        }
        let command = msrv_command(
            self.root(),
            package,
            effective,
            &self.settings.msrv_check_command,
        );
        let output = self.invoke(command, env, cancel).await?;
        if output.passed() {
            debug!(package = %package.name, version = %effective, "msrv build ok");
            Ok(PackageVerdict::ok(format!("{}: ok at {effective}", package.name)))
        } else {
            Ok(PackageVerdict::failed(format!(
                "{}: build failed at declared minimum {effective}\n{}",
                package.name,
                output.combined()
            )))
        }
    }
}

struct PackageVerdict {
    failed: bool,
    line: String,
}

impl PackageVerdict {
    fn ok(line: String) -> Self {
        Self {
            failed: false,
            line,
        }
    }

    fn failed(line: String) -> Self {
        Self { failed: true, line }
    }
}

#[async_trait]
impl JobExecutor for JobRunner {
    async fn execute(&self, job: Job, cancel: CancellationToken) -> JobResult {
        let start = Instant::now();

        let provisioned = tokio::select! {
            biased;
            _ = cancel.cancelled() => return JobResult::cancelled(&job, RunnerError::Cancelled.to_string()),
            env = self.provisioner.provision(job.platform, job.needs) => env,
        };
        let env = match provisioned {
            Ok(env) => env,
            Err(e) => {
                warn!(job = %job.label(), error = %e, "Provisioning failed");
                return JobResult::errored(&job, RunnerError::Provisioning(e).to_string());
            }
        };

        let outcome = match self.settings.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run(&job, &env, &cancel)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(RunnerError::Timeout {
                    label: job.label(),
                    secs: limit.as_secs(),
                }),
            },
            None => self.run(&job, &env, &cancel).await,
        };

        if let Err(e) = env.release() {
            warn!(job = %job.label(), error = %e, "Environment teardown failed");
        }

        let result = match outcome {
            Ok(CheckOutcome {
                passed: true,
                diagnostics,
            }) => JobResult::passed(&job, diagnostics),
            Ok(CheckOutcome {
                passed: false,
                diagnostics,
            }) => JobResult::failed(&job, diagnostics),
            Err(e) => JobResult::new(&job, e.job_status(), e.to_string()),
        };
        if result.status == JobStatus::Errored {
            info!(job = %job.label(), "Job could not run: {}", result.diagnostics);
        }
        result.with_duration(start.elapsed().as_millis() as u64)
    }
}

/// Files reported by `rustfmt --check`, relative to `root` where possible.
///
/// rustfmt prints `Diff in <file>:<line>:` (older releases:
/// `Diff in <file> at line <n>:`) once per hunk.
pub fn misformatted_files(output: &str, root: &Path) -> BTreeSet<String> {
    static DIFF_LINE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = DIFF_LINE
        .get_or_init(|| Regex::new(r"(?m)^Diff in (.+?)(?::\d+:| at line \d+:)\s*$").ok())
    else {
        return BTreeSet::new();
    };

    re.captures_iter(output)
        .filter_map(|c| c.get(1))
        .map(|m| {
            let path = Path::new(m.as_str().trim());
            path.strip_prefix(root)
                .unwrap_or(path)
                .display()
                .to_string()
        })
        .collect()
}

fn append_section(log: &mut String, label: &str, body: &str) {
    if body.trim().is_empty() {
        return;
    }
    log.push_str(&format!("--- {label} ---\n{}\n", body.trim_end()));
}
