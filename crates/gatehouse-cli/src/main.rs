//! Gatehouse CLI - validation orchestrator for multi-package Cargo workspaces
//!
//! The `gatehouse` command admits change events and fans out build, format
//! and minimum-toolchain checks across platforms.
//!
//! ## Commands
//!
//! - `run`: Validate the workspace once and exit with the verdict
//! - `watch`: Validate every event read from stdin, newest change wins
//! - `inventory`: List packages with declared and effective MSRV
//! - `plan`: Print the job matrix without running it

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use gatehouse_ci::{GatehouseConfig, ProcessInvoker, ValidationPipeline, ValidationRequest};
use gatehouse_core::report::{EXIT_CANCELLED, EXIT_INFRASTRUCTURE, EXIT_PASSED};
use gatehouse_core::scheduler::default_concurrency;
use gatehouse_core::{
    CheckKind, ConcurrencyKey, Event, Job, PipelineRun, Platform, RunReport, Scheduler,
};
use gatehouse_inventory::{discover_packages, Inventory, RustVersion};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use toolchain_provisioner::Provisioner;
use tracing::{info, warn, Level};

/// Workflow name used for events synthesised from the local checkout.
const LOCAL_WORKFLOW: &str = "gatehouse";

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Validation orchestrator for multi-package Cargo workspaces", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "GATEHOUSE_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the workspace once
    ///
    /// Exits 0 when every job passed, 1 on check failures, 2 when the
    /// pipeline could not run, 130 when superseded or interrupted.
    Run {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Event payload (JSON); defaults to a push of the local checkout
        #[arg(long)]
        event: Option<PathBuf>,

        /// Report format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Validate each newline-delimited JSON event read from stdin
    Watch {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Report format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List workspace packages with declared and effective MSRV
    Inventory {
        /// Workspace root
        #[arg(long, default_value = ".")]
        workspace: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print the job matrix without running it
    Plan {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

/// Options shared by every command that builds a pipeline.
#[derive(Args, Debug, Clone)]
struct PipelineArgs {
    /// Workspace root
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Build platforms, comma separated (overrides gatehouse.toml)
    #[arg(long, value_delimiter = ',')]
    platforms: Vec<Platform>,

    /// Check kinds, comma separated (overrides gatehouse.toml)
    #[arg(long, value_delimiter = ',')]
    checks: Vec<CheckKind>,

    /// Maximum simultaneously running jobs
    #[arg(long, env = "GATEHOUSE_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Shared toolchain cache directory
    #[arg(long, env = "GATEHOUSE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    gatehouse_core::init_tracing(cli.json, level);

    let outcome = match cli.command {
        Commands::Run {
            pipeline,
            event,
            format,
        } => cmd_run(&pipeline, event.as_deref(), format).await,
        Commands::Watch { pipeline, format } => cmd_watch(&pipeline, format).await,
        Commands::Inventory { workspace, format } => cmd_inventory(&workspace, format),
        Commands::Plan { pipeline, format } => cmd_plan(&pipeline, format),
    };

    match outcome {
        Ok(EXIT_PASSED) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(EXIT_INFRASTRUCTURE)
        }
    }
}

/// Load `gatehouse.toml` and apply command-line overrides.
fn load_config(args: &PipelineArgs) -> Result<GatehouseConfig> {
    let mut config = GatehouseConfig::discover(&args.workspace).with_context(|| {
        format!(
            "Failed to load {}",
            GatehouseConfig::config_path(&args.workspace).display()
        )
    })?;

    if !args.platforms.is_empty() {
        anyhow::ensure!(
            !args.platforms.contains(&Platform::Lint),
            "lint is not a build platform; format-check and msrv-check run on it implicitly"
        );
        config.platforms = args.platforms.clone();
    }
    if !args.checks.is_empty() {
        config.checks = args.checks.clone();
    }
    if let Some(limit) = args.concurrency {
        anyhow::ensure!(limit > 0, "--concurrency must be at least 1");
        config.concurrency = Some(limit);
    }
    if let Some(dir) = &args.cache_dir {
        config.provisioner.cache_dir = dir.clone();
    }
    Ok(config)
}

fn build_pipeline(config: &GatehouseConfig) -> Result<ValidationPipeline> {
    let provisioner =
        Provisioner::new(config.provisioner.clone()).context("Failed to set up provisioner")?;
    let invoker = ProcessInvoker::new(config.cancel_grace());
    Ok(ValidationPipeline::new(
        config,
        Arc::new(provisioner),
        Arc::new(invoker),
    ))
}

/// Push event for the local checkout, keyed by the workspace directory name.
fn local_event(workspace: &Path) -> Result<Event> {
    let root = std::fs::canonicalize(workspace)
        .with_context(|| format!("Workspace not found: {}", workspace.display()))?;
    let repository = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workspace".to_string());
    Ok(Event::push(&repository, "local", "HEAD", LOCAL_WORKFLOW))
}

async fn read_event(path: &Path) -> Result<Event> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read event file {}", path.display()))?;
    Event::from_json(&raw).with_context(|| format!("Invalid event in {}", path.display()))
}

/// Validate the workspace once.
async fn cmd_run(args: &PipelineArgs, event_file: Option<&Path>, format: OutputFormat) -> Result<i32> {
    let config = load_config(args)?;
    let event = match event_file {
        Some(path) => read_event(path).await?,
        None => local_event(&args.workspace)?,
    };
    let pipeline = build_pipeline(&config)?;
    let request = ValidationRequest::from_config(&args.workspace, event.clone(), &config);

    let validation = pipeline.validate(request);
    tokio::pin!(validation);

    let finished = tokio::select! {
        result = &mut validation => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            warn!("Interrupted, cancelling run");
            pipeline.cancel(&event).await;
            validation.await
        }
    };

    let report = result.context("Validation aborted")?;
    print_report(&report, format)?;
    Ok(report.exit_code())
}

/// Validate every event from stdin until it closes.
///
/// Exits with the worst code among runs that were not superseded.
async fn cmd_watch(args: &PipelineArgs, format: OutputFormat) -> Result<i32> {
    let config = load_config(args)?;
    let pipeline = Arc::new(build_pipeline(&config)?);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut runs = JoinSet::new();
    let mut open = true;
    let mut worst = EXIT_PASSED;

    info!(workspace = %args.workspace.display(), "Watching stdin for events");

    while open || !runs.is_empty() {
        tokio::select! {
            line = lines.next_line(), if open => {
                let Some(line) = line.context("Failed to read event stream")? else {
                    open = false;
                    continue;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let event = match Event::from_json(line) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed event");
                        continue;
                    }
                };
                let request = ValidationRequest::from_config(&args.workspace, event, &config);
                let pipeline = Arc::clone(&pipeline);
                runs.spawn(async move { pipeline.validate(request).await });
            }
            Some(joined) = runs.join_next() => {
                let code = match joined {
                    Ok(Ok(report)) => {
                        print_report_line(&report, format)?;
                        report.exit_code()
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "Validation aborted");
                        EXIT_INFRASTRUCTURE
                    }
                    Err(e) => {
                        warn!(error = %e, "Validation task failed");
                        EXIT_INFRASTRUCTURE
                    }
                };
                if code != EXIT_CANCELLED {
                    worst = worst.max(code);
                }
            }
        }
    }

    Ok(worst)
}

fn print_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    Ok(())
}

/// One report per line for `watch`, so JSON output stays newline-delimited.
fn print_report_line(report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", serde_json::to_string(report)?),
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct PackageSummary {
    name: String,
    manifest_path: PathBuf,
    declared_msrv: Option<RustVersion>,
    effective_msrv: Option<RustVersion>,
    depends_on: Vec<String>,
}

fn summarize(inventory: &Inventory) -> Vec<PackageSummary> {
    inventory
        .packages()
        .iter()
        .map(|pkg| PackageSummary {
            name: pkg.name.clone(),
            manifest_path: pkg.manifest_path.clone(),
            declared_msrv: inventory.declared_msrv(&pkg.name),
            effective_msrv: inventory.effective_msrv(&pkg.name),
            depends_on: pkg.workspace_dependencies().map(str::to_string).collect(),
        })
        .collect()
}

/// List workspace packages.
fn cmd_inventory(workspace: &Path, format: OutputFormat) -> Result<i32> {
    let inventory = discover_packages(workspace)
        .with_context(|| format!("Failed to inventory {}", workspace.display()))?;
    let summaries = summarize(&inventory);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
        OutputFormat::Text => {
            println!("Workspace: {}", inventory.root().display());
            println!("{} package(s)\n", summaries.len());
            for pkg in &summaries {
                let declared = pkg
                    .declared_msrv
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let effective = pkg
                    .effective_msrv
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {:<24} rust-version {:<8} effective {:<8}",
                    pkg.name, declared, effective
                );
                if !pkg.depends_on.is_empty() {
                    println!("    depends on: {}", pkg.depends_on.join(", "));
                }
            }
        }
    }
    Ok(EXIT_PASSED)
}

#[derive(Debug, Serialize)]
struct PlanSummary {
    key: String,
    concurrency_limit: usize,
    jobs: Vec<Job>,
}

fn build_plan(args: &PipelineArgs) -> Result<PlanSummary> {
    let config = load_config(args)?;
    let event = local_event(&args.workspace)?;
    let key = ConcurrencyKey::from_event(&event)?;
    let run = PipelineRun::new(event, key.clone());
    let jobs = Scheduler::plan(&run, &config.platforms, &config.checks)
        .context("Failed to plan jobs")?;

    Ok(PlanSummary {
        key: key.to_string(),
        concurrency_limit: config.concurrency.unwrap_or_else(default_concurrency),
        jobs,
    })
}

/// Print the job matrix.
fn cmd_plan(args: &PipelineArgs, format: OutputFormat) -> Result<i32> {
    let plan = build_plan(args)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Text => {
            println!("Concurrency key: {}", plan.key);
            println!("Concurrency limit: {}", plan.concurrency_limit);
            println!("Jobs ({}):", plan.jobs.len());
            for job in &plan.jobs {
                let mut needs = Vec::new();
                if job.needs.toolchain {
                    needs.push(match job.check {
                        CheckKind::MsrvCheck => "per-package minimum toolchains".to_string(),
                        _ => "toolchain".to_string(),
                    });
                }
                if job.needs.codegen_compiler {
                    needs.push("codegen compiler".to_string());
                }
                println!("  {:<24} {}", job.label(), needs.join(", "));
            }
        }
    }
    Ok(EXIT_PASSED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_workspace() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Cargo.toml"),
            "[workspace]\nmembers = [\"core\", \"io\"]\n",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("core/src")).unwrap();
        fs::write(
            dir.path().join("core/Cargo.toml"),
            "[package]\nname = \"core\"\nversion = \"0.1.0\"\nrust-version = \"1.60\"\n",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("io/src")).unwrap();
        fs::write(
            dir.path().join("io/Cargo.toml"),
            "[package]\nname = \"io\"\nversion = \"0.1.0\"\nrust-version = \"1.56\"\n\n[dependencies]\ncore = { path = \"../core\" }\n",
        )
        .unwrap();
        dir
    }

    fn pipeline_args(workspace: &Path) -> PipelineArgs {
        PipelineArgs {
            workspace: workspace.to_path_buf(),
            platforms: Vec::new(),
            checks: Vec::new(),
            concurrency: None,
            cache_dir: None,
        }
    }

    #[test]
    fn test_run_parses_platform_and_check_lists() {
        let cli = Cli::try_parse_from([
            "gatehouse",
            "run",
            "--platforms",
            "macos,windows",
            "--checks",
            "fmt,msrv",
            "--concurrency",
            "2",
            "--format",
            "json",
        ])
        .unwrap();

        let Commands::Run {
            pipeline, format, ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(pipeline.platforms, vec![Platform::MacOs, Platform::Windows]);
        assert_eq!(
            pipeline.checks,
            vec![CheckKind::FormatCheck, CheckKind::MsrvCheck]
        );
        assert_eq!(pipeline.concurrency, Some(2));
        assert_eq!(format, OutputFormat::Json);
    }

    #[test]
    fn test_unknown_platform_rejected_by_parser() {
        let res = Cli::try_parse_from(["gatehouse", "run", "--platforms", "amiga"]);
        assert!(res.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["gatehouse", "inventory", "--verbose"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let dir = write_workspace();
        fs::write(
            dir.path().join("gatehouse.toml"),
            "platforms = [\"linux\"]\nconcurrency = 8\n",
        )
        .unwrap();

        let mut args = pipeline_args(dir.path());
        let config = load_config(&args).unwrap();
        assert_eq!(config.platforms, vec![Platform::Linux]);
        assert_eq!(config.concurrency, Some(8));

        args.platforms = vec![Platform::Windows];
        args.concurrency = Some(1);
        args.cache_dir = Some(dir.path().join("cache"));
        let config = load_config(&args).unwrap();
        assert_eq!(config.platforms, vec![Platform::Windows]);
        assert_eq!(config.concurrency, Some(1));
        assert_eq!(config.provisioner.cache_dir, dir.path().join("cache"));
    }

    #[test]
    fn test_zero_concurrency_override_rejected() {
        let dir = write_workspace();
        let mut args = pipeline_args(dir.path());
        args.concurrency = Some(0);
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_lint_platform_override_rejected() {
        let dir = write_workspace();
        let mut args = pipeline_args(dir.path());
        args.platforms = vec![Platform::Lint];
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_local_event_uses_directory_name() {
        let dir = write_workspace();
        let event = local_event(dir.path()).unwrap();
        let expected = dir.path().file_name().unwrap().to_string_lossy();
        assert_eq!(event.repository, expected);
        assert_eq!(event.workflow_name, LOCAL_WORKFLOW);
        assert!(!event.is_pull_request);
    }

    #[test]
    fn test_local_event_missing_workspace() {
        let dir = tempfile::tempdir().unwrap();
        assert!(local_event(&dir.path().join("absent")).is_err());
    }

    #[tokio::test]
    async fn test_read_event_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        fs::write(
            &path,
            r#"{"repository":"org/repo","ref":"refs/heads/main","headCommit":"abc","workflowName":"ci"}"#,
        )
        .unwrap();
        let event = read_event(&path).await.unwrap();
        assert_eq!(event.repository, "org/repo");
        assert_eq!(event.git_ref.as_deref(), Some("refs/heads/main"));
    }

    #[tokio::test]
    async fn test_read_event_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        fs::write(&path, "not json").unwrap();
        assert!(read_event(&path).await.is_err());
    }

    #[test]
    fn test_inventory_summary() {
        let dir = write_workspace();
        let inventory = discover_packages(dir.path()).unwrap();
        let summaries = summarize(&inventory);

        assert_eq!(summaries.len(), 2);
        let io = summaries.iter().find(|p| p.name == "io").unwrap();
        assert_eq!(io.declared_msrv.map(|v| v.to_string()).as_deref(), Some("1.56"));
        assert_eq!(io.effective_msrv.map(|v| v.to_string()).as_deref(), Some("1.60"));
        assert_eq!(io.depends_on, vec!["core".to_string()]);
    }

    #[test]
    fn test_inventory_command_fails_on_missing_workspace() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_inventory(dir.path(), OutputFormat::Text).is_err());
    }

    #[test]
    fn test_default_plan_has_build_and_lint_jobs() {
        let dir = write_workspace();
        let plan = build_plan(&pipeline_args(dir.path())).unwrap();

        // the host build platform plus the two platform-agnostic checks
        assert_eq!(plan.jobs.len(), 3);
        assert!(plan.jobs.iter().any(|j| j.platform == Platform::host()));
        let lint: Vec<_> = plan
            .jobs
            .iter()
            .filter(|j| j.platform == Platform::Lint)
            .collect();
        assert_eq!(lint.len(), 2);
        assert!(plan.concurrency_limit >= 1);
    }

    #[test]
    fn test_plan_respects_check_override() {
        let dir = write_workspace();
        let mut args = pipeline_args(dir.path());
        args.checks = vec![CheckKind::BuildTest];
        args.platforms = vec![Platform::MacOs];
        let plan = build_plan(&args).unwrap();
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].label(), "macos/build-test");
    }
}
