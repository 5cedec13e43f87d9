//! Command-line parsing and dispatch.

use std::error::Error as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use beamxfer_core::{DeferredPrune, Endpoint, PruneMethod, StorageLocation, TransferMethod};
use beamxfer_hpc::{ComputeContext, ComputeSite, get_compute_controller};
use beamxfer_transfer::{
    PruneRequest, TransferRequest, get_prune_controller, get_transfer_controller, run_deferred,
};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use crate::bootstrap::{init_logging, load_config};
use crate::context::{DeferredPrunes, RunContext};
use crate::error::{AppError, AppResult};
use crate::pipeline::{prune_method_for, run_pipeline, transfer_method_for};

/// Exit code when the command ran and its operation reported failure.
const EXIT_OPERATION_FAILED: i32 = 1;
/// Exit code when the command could not run.
const EXIT_ERROR: i32 = 2;
const SECONDS_PER_DAY: u64 = 86_400;

/// Parse the process arguments, run the command and return the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    match execute(cli).await {
        Ok(true) => 0,
        Ok(false) => EXIT_OPERATION_FAILED,
        Err(err) => {
            eprintln!("error: {}", display_chain(&err));
            error!(error = %err, operation = err.operation(), "command failed");
            EXIT_ERROR
        }
    }
}

fn display_chain(err: &AppError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

async fn execute(cli: Cli) -> AppResult<bool> {
    let config = load_config(cli.config.as_deref(), &cli.overlays)?;
    init_logging(&config)?;
    let run = RunContext::new(Arc::new(config));
    dispatch(cli.command, &run).await
}

/// Run one parsed command against `run`; `true` when its operation succeeded.
///
/// # Errors
///
/// Returns an error when the command cannot be wired up or a precondition fails.
pub async fn dispatch(command: Command, run: &RunContext) -> AppResult<bool> {
    match command {
        Command::Copy(args) => handle_copy(run, args).await,
        Command::Prune(args) => handle_prune(run, args).await,
        Command::RunDeferred(args) => handle_run_deferred(run, args).await,
        Command::Reconstruct(args) => handle_reconstruct(run, args).await,
        Command::Pipeline(args) => handle_pipeline(run, args).await,
        Command::Endpoints(args) => handle_endpoints(run, &args),
    }
}

/// Beamline data movement, pruning and reconstruction.
#[derive(Debug, Parser)]
#[command(name = "beamxfer", version, about = "Move, prune and reconstruct beamline data")]
pub struct Cli {
    /// Base configuration file.
    #[arg(long, global = true, env = "BEAMXFER_CONFIG")]
    pub config: Option<PathBuf>,
    /// Configuration files merged over the base, in order.
    #[arg(long = "config-overlay", global = true)]
    pub overlays: Vec<PathBuf>,
    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Copy a file or directory between two configured endpoints.
    Copy(CopyArgs),
    /// Delete a path from an endpoint, now or after a delay.
    Prune(PruneArgs),
    /// Run a deferred prune job document.
    RunDeferred(RunDeferredArgs),
    /// Reconstruct a raw scan already at the compute site.
    Reconstruct(ReconstructArgs),
    /// Copy, reconstruct, return and schedule prunes for a raw scan.
    Pipeline(PipelineArgs),
    /// List configured endpoints.
    Endpoints(EndpointsArgs),
}

/// Arguments for `copy`.
#[derive(Debug, Args)]
pub struct CopyArgs {
    /// Transfer method; inferred from the endpoint kinds when omitted.
    #[arg(long)]
    pub method: Option<TransferMethod>,
    /// Source endpoint name.
    #[arg(long)]
    pub source: String,
    /// Destination endpoint name.
    #[arg(long)]
    pub destination: String,
    /// Path relative to the source endpoint root.
    pub file_path: String,
}

/// Arguments for `prune`.
#[derive(Debug, Args)]
pub struct PruneArgs {
    /// Prune method; inferred from the source endpoint kind when omitted.
    #[arg(long)]
    pub method: Option<PruneMethod>,
    /// Endpoint to delete from.
    #[arg(long)]
    pub source: String,
    /// Endpoint that must still hold the path.
    #[arg(long)]
    pub check_endpoint: Option<String>,
    /// Days to wait before deleting.
    #[arg(long, default_value_t = 0)]
    pub days_from_now: u32,
    /// Only delete when the path was last modified at least this many days ago.
    #[arg(long)]
    pub older_than_days: Option<u32>,
    /// Path relative to the source endpoint root.
    pub file_path: String,
}

/// Arguments for `run-deferred`.
#[derive(Debug, Args)]
pub struct RunDeferredArgs {
    /// JSON job document written by the scheduler.
    #[arg(long)]
    pub job: PathBuf,
}

/// Arguments for `reconstruct`.
#[derive(Debug, Args)]
pub struct ReconstructArgs {
    /// Compute site.
    #[arg(long, default_value = "batch_queue")]
    pub site: ComputeSite,
    /// Skip the multi-resolution step.
    #[arg(long)]
    pub skip_multi_resolution: bool,
    /// Raw scan path relative to the compute site's raw root.
    pub file_path: String,
}

/// Arguments for `pipeline`.
#[derive(Debug, Args)]
pub struct PipelineArgs {
    /// Leave the scan at the beamline.
    #[arg(long)]
    pub export_controlled: bool,
    /// Raw scan path relative to the beamline's raw root.
    pub file_path: String,
}

/// Arguments for `endpoints`.
#[derive(Debug, Args)]
pub struct EndpointsArgs {
    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

fn endpoint<'a>(run: &'a RunContext, name: &str) -> AppResult<&'a Endpoint> {
    run.config()
        .endpoint(name)
        .map_err(|source| AppError::config("resolve_endpoint", source))
}

async fn handle_copy(run: &RunContext, args: CopyArgs) -> AppResult<bool> {
    let source = endpoint(run, &args.source)?;
    let destination = endpoint(run, &args.destination)?;
    let method = match args.method {
        Some(method) => method,
        None => transfer_method_for(source, destination)
            .map_err(|source| AppError::controller("transfer_method", source))?,
    };
    let ctx = run.transfer_context(method).await?;
    let controller = get_transfer_controller(method, &ctx)
        .map_err(|source| AppError::controller("transfer_controller", source))?;
    let outcome = controller
        .transfer(&TransferRequest::new(&args.file_path, source, destination))
        .await
        .map_err(|source| AppError::controller("transfer", source))?;
    info!(
        %method,
        source = source.name(),
        destination = destination.name(),
        file_path = %args.file_path,
        succeeded = outcome.succeeded,
        task_id = outcome.task_id.as_deref(),
        "copy finished"
    );
    Ok(outcome.succeeded)
}

async fn handle_prune(run: &RunContext, args: PruneArgs) -> AppResult<bool> {
    let source = endpoint(run, &args.source)?;
    let check = args
        .check_endpoint
        .as_deref()
        .map(|name| endpoint(run, name))
        .transpose()?;
    let method = args.method.unwrap_or_else(|| prune_method_for(source));
    let delay = Duration::from_secs(u64::from(args.days_from_now) * SECONDS_PER_DAY);

    let prunes = if delay.is_zero() {
        None
    } else {
        Some(run.deferred_prunes().await?)
    };
    let result = async {
        let scheduler = prunes.as_ref().map(DeferredPrunes::scheduler);
        let ctx = run.prune_context(method, check, scheduler).await?;
        let controller = get_prune_controller(method, &ctx)
            .map_err(|source| AppError::controller("prune_controller", source))?;
        let mut request = PruneRequest::new(&args.file_path, source).after(delay);
        if let Some(check) = check {
            request = request.check_against(check);
        }
        if let Some(days) = args.older_than_days {
            request = request.older_than(days);
        }
        controller
            .prune(&request)
            .await
            .map_err(|source| AppError::controller("prune", source))
    }
    .await;
    if let Some(prunes) = prunes {
        prunes.finish().await?;
    }
    result
}

async fn handle_run_deferred(run: &RunContext, args: RunDeferredArgs) -> AppResult<bool> {
    let text = tokio::fs::read_to_string(&args.job)
        .await
        .map_err(|source| AppError::io("read_job", args.job.clone(), source))?;
    let job: DeferredPrune =
        serde_json::from_str(&text).map_err(|source| AppError::json("decode_job", source))?;
    let ctx = run.prune_context(job.method, job.check_endpoint.as_ref(), None).await?;
    run_deferred(&job, &ctx)
        .await
        .map_err(|source| AppError::controller("run_deferred", source))
}

async fn handle_reconstruct(run: &RunContext, args: ReconstructArgs) -> AppResult<bool> {
    let ctx = run.compute_context(args.site).await?;
    let controller = get_compute_controller(args.site, &ctx)
        .map_err(|source| AppError::controller("compute_controller", source))?;
    if !controller.reconstruct(&args.file_path).await {
        return Ok(false);
    }
    if args.skip_multi_resolution {
        return Ok(true);
    }
    Ok(controller.build_multi_resolution(&args.file_path).await)
}

async fn handle_pipeline(run: &RunContext, args: PipelineArgs) -> AppResult<bool> {
    let settings = run
        .config()
        .pipeline
        .clone()
        .ok_or(AppError::MissingPipeline)?;
    let prunes = run.deferred_prunes().await?;
    let result = async {
        let ctx = run
            .transfer_context(TransferMethod::ManagedTransfer)
            .await?
            .with_scheduler(prunes.scheduler());
        let compute = if args.export_controlled {
            ComputeContext::new(ctx.config_handle())
        } else {
            let site: ComputeSite = settings
                .site
                .parse()
                .map_err(|source| AppError::controller("compute_site", source))?;
            run.compute_context(site).await?
        };
        run_pipeline(&args.file_path, args.export_controlled, &ctx, &compute).await
    }
    .await;
    prunes.finish().await?;
    Ok(result?.succeeded(settings.multi_resolution) || args.export_controlled)
}

fn handle_endpoints(run: &RunContext, args: &EndpointsArgs) -> AppResult<bool> {
    let endpoints = &run.config().endpoints;
    if args.json {
        let rendered = serde_json::to_string_pretty(endpoints)
            .map_err(|source| AppError::json("render_endpoints", source))?;
        println!("{rendered}");
        return Ok(true);
    }
    for (name, endpoint) in endpoints {
        println!(
            "{name:<28} {:<18} {}",
            endpoint.kind().as_str(),
            endpoint.root_path()
        );
    }
    Ok(true)
}
