//! Scan reconstruction workflow.
//!
//! Steps for a raw scan at `folder/scan.h5`:
//! 1. copy the raw file from the beamline to the compute site's raw collection
//! 2. reconstruct it, then build the multi-resolution copy when enabled
//! 3. copy `folder/recscan/` (and `folder/recscan.zarr/`) back to the beamline
//! 4. schedule retention prunes for every copy that was made
//!
//! A step that reports failure stops the steps after it; prunes are only scheduled for
//! copies that exist.

use beamxfer_config::{BeamlineConfig, PipelineSettings};
use beamxfer_core::{Endpoint, EndpointKind, PruneMethod, StorageLocation, TransferMethod};
use beamxfer_hpc::{ComputeContext, ComputeSite, ScanPath, get_compute_controller};
use beamxfer_transfer::{
    ControllerContext, PruneRequest, TransferRequest, get_prune_controller,
    get_transfer_controller,
};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

/// What a pipeline run got done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOutcome {
    /// Raw file reached the compute site.
    pub raw_copied: bool,
    /// Reconstruction finished.
    pub reconstructed: bool,
    /// Multi-resolution copy finished.
    pub multi_resolution: bool,
    /// Reconstruction output reached the destination.
    pub results_copied: bool,
    /// Prunes handed to the scheduler.
    pub prunes_scheduled: usize,
}

impl PipelineOutcome {
    /// Reconstruction, and the multi-resolution step when `multi_resolution` is set,
    /// both finished.
    #[must_use]
    pub const fn succeeded(&self, multi_resolution: bool) -> bool {
        self.reconstructed && (self.multi_resolution || !multi_resolution)
    }
}

/// Transfer method for copying from `source` to `destination`.
///
/// # Errors
///
/// Returns [`beamxfer_core::ControllerError::InvalidConfiguration`] for pairings no
/// controller handles.
pub fn transfer_method_for(
    source: &Endpoint,
    destination: &Endpoint,
) -> beamxfer_core::ControllerResult<TransferMethod> {
    match (source.kind(), destination.kind()) {
        (EndpointKind::FileSystem, EndpointKind::FileSystem) => Ok(TransferMethod::LocalCopy),
        (EndpointKind::ManagedTransfer, EndpointKind::ManagedTransfer) => {
            Ok(TransferMethod::ManagedTransfer)
        }
        (EndpointKind::FileSystem, EndpointKind::Archive) => {
            Ok(TransferMethod::FileSystemToArchive)
        }
        (EndpointKind::Archive, EndpointKind::FileSystem) => {
            Ok(TransferMethod::ArchiveToFileSystem)
        }
        (from, to) => Err(beamxfer_core::ControllerError::invalid_configuration(
            "transfer_method",
            "no transfer method for endpoint pairing",
            Some(format!("{} -> {}", from.as_str(), to.as_str())),
        )),
    }
}

/// Prune method that deletes from `endpoint`.
#[must_use]
pub const fn prune_method_for(endpoint: &Endpoint) -> PruneMethod {
    match endpoint.kind() {
        EndpointKind::FileSystem => PruneMethod::FileSystem,
        EndpointKind::ManagedTransfer => PruneMethod::ManagedTransfer,
        EndpointKind::Archive => PruneMethod::Archive,
    }
}

struct Stations<'a> {
    source: &'a Endpoint,
    compute_raw: &'a Endpoint,
    compute_scratch: &'a Endpoint,
    destination: &'a Endpoint,
}

impl<'a> Stations<'a> {
    fn resolve(config: &'a BeamlineConfig, settings: &PipelineSettings) -> AppResult<Self> {
        let endpoint = |name: &str| {
            config
                .endpoint(name)
                .map_err(|source| AppError::config("pipeline_endpoint", source))
        };
        Ok(Self {
            source: endpoint(&settings.source)?,
            compute_raw: endpoint(&settings.compute_raw)?,
            compute_scratch: endpoint(&settings.compute_scratch)?,
            destination: endpoint(&settings.destination)?,
        })
    }
}

/// Run the reconstruction workflow for the raw scan at `file_path`.
///
/// Export-controlled scans never leave the beamline; the run returns immediately.
///
/// # Errors
///
/// Returns an error when the `pipeline` section is missing or names unknown endpoints,
/// the scan path has no file name, or a controller cannot be built from the contexts.
/// Steps that run and fail are reported through [`PipelineOutcome`] instead.
pub async fn run_pipeline(
    file_path: &str,
    export_controlled: bool,
    ctx: &ControllerContext,
    compute: &ComputeContext,
) -> AppResult<PipelineOutcome> {
    let config = ctx.config();
    let settings = config.pipeline.as_ref().ok_or(AppError::MissingPipeline)?;
    let scan = ScanPath::parse(file_path).ok_or_else(|| AppError::InvalidScanPath {
        file_path: file_path.to_string(),
    })?;
    let stations = Stations::resolve(config, settings)?;
    let mut outcome = PipelineOutcome::default();

    if export_controlled {
        info!(file_path, "scan is export controlled; leaving it at the beamline");
        return Ok(outcome);
    }

    let raw = scan.raw_file("").trim_start_matches('/').to_string();
    outcome.raw_copied = copy(ctx, &raw, stations.source, stations.compute_raw).await?;
    if !outcome.raw_copied {
        warn!(file_path = %raw, "raw copy to the compute site failed; stopping");
        return Ok(outcome);
    }
    outcome.prunes_scheduled += schedule_prunes(
        ctx,
        &raw,
        &[
            (stations.compute_raw, Some(stations.source)),
            (stations.source, None),
        ],
    )
    .await?;

    let site: ComputeSite = settings
        .site
        .parse()
        .map_err(|source| AppError::controller("compute_site", source))?;
    let controller = get_compute_controller(site, compute)
        .map_err(|source| AppError::controller("compute_controller", source))?;
    outcome.reconstructed = controller.reconstruct(&raw).await;
    if !outcome.reconstructed {
        warn!(file_path = %raw, %site, "reconstruction failed; stopping");
        return Ok(outcome);
    }
    if settings.multi_resolution {
        outcome.multi_resolution = controller.build_multi_resolution(&raw).await;
        if !outcome.multi_resolution {
            warn!(file_path = %raw, %site, "multi-resolution build failed; stopping");
            return Ok(outcome);
        }
    }

    let mut outputs = vec![scan.reconstruction_relative()];
    if outcome.multi_resolution {
        outputs.push(format!("{}/", scan.multi_resolution_relative()));
    }
    outcome.results_copied = true;
    for output in &outputs {
        let copied = copy(ctx, output, stations.compute_scratch, stations.destination).await?;
        outcome.results_copied &= copied;
        if !copied {
            warn!(file_path = %output, "results copy failed; keeping the compute copy");
            continue;
        }
        let targets = [
            (stations.compute_scratch, Some(stations.destination)),
            (stations.destination, None),
        ];
        outcome.prunes_scheduled += schedule_prunes(ctx, output, &targets).await?;
    }

    info!(
        file_path,
        raw_copied = outcome.raw_copied,
        reconstructed = outcome.reconstructed,
        multi_resolution = outcome.multi_resolution,
        results_copied = outcome.results_copied,
        prunes_scheduled = outcome.prunes_scheduled,
        "pipeline finished"
    );
    Ok(outcome)
}

async fn copy(
    ctx: &ControllerContext,
    file_path: &str,
    source: &Endpoint,
    destination: &Endpoint,
) -> AppResult<bool> {
    let method = transfer_method_for(source, destination)
        .map_err(|err| AppError::controller("transfer_method", err))?;
    let controller = get_transfer_controller(method, ctx)
        .map_err(|source| AppError::controller("transfer_controller", source))?;
    controller
        .copy(&TransferRequest::new(file_path, source, destination))
        .await
        .map_err(|source| AppError::controller("transfer", source))
}

async fn schedule_prunes(
    ctx: &ControllerContext,
    file_path: &str,
    targets: &[(&Endpoint, Option<&Endpoint>)],
) -> AppResult<usize> {
    let mut scheduled = 0;
    for (endpoint, check) in targets {
        let delay = ctx.config().retention.delay_for(endpoint.name());
        if delay.is_zero() {
            debug!(endpoint = endpoint.name(), file_path, "no retention configured");
            continue;
        }
        let controller = get_prune_controller(prune_method_for(endpoint), ctx)
            .map_err(|source| AppError::controller("prune_controller", source))?;
        let mut request = PruneRequest::new(file_path, endpoint).after(delay);
        if let Some(check) = check {
            request = request.check_against(check);
        }
        let accepted = controller
            .prune(&request)
            .await
            .map_err(|source| AppError::controller("schedule_prune", source))?;
        if accepted {
            scheduled += 1;
        } else {
            warn!(endpoint = endpoint.name(), file_path, "prune was not scheduled");
        }
    }
    Ok(scheduled)
}
