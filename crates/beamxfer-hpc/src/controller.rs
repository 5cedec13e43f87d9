//! Compute controller selection.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use beamxfer_config::BeamlineConfig;
use beamxfer_core::{
    BatchBackend, ControllerError, ControllerResult, Endpoint, FlowBackend,
    ManagedTransferEndpoint,
};
use tracing::info;

use crate::batch::BatchQueueCompute;
use crate::flow::ManagedCompute;

/// Where reconstruction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeSite {
    /// Slurm batch queue reached through the superfacility API.
    BatchQueue,
    /// Managed compute endpoint driven by a flow.
    ManagedCompute,
}

impl ComputeSite {
    /// Every site, in declaration order.
    pub const ALL: [Self; 2] = [Self::BatchQueue, Self::ManagedCompute];

    /// Identifier used in configuration and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BatchQueue => "batch_queue",
            Self::ManagedCompute => "managed_compute",
        }
    }
}

impl fmt::Display for ComputeSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputeSite {
    type Err = ControllerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|site| site.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| {
                ControllerError::invalid_configuration(
                    "compute_site",
                    "unrecognized compute site",
                    Some(value.to_string()),
                )
            })
    }
}

/// Backends available to compute controllers.
#[derive(Clone)]
pub struct ComputeContext {
    /// Beamline configuration.
    pub config: Arc<BeamlineConfig>,
    /// Batch scheduler, required for [`ComputeSite::BatchQueue`].
    pub batch: Option<Arc<dyn BatchBackend>>,
    /// Flow service, required for [`ComputeSite::ManagedCompute`].
    pub flows: Option<Arc<dyn FlowBackend>>,
}

impl ComputeContext {
    /// Context without backends.
    #[must_use]
    pub const fn new(config: Arc<BeamlineConfig>) -> Self {
        Self {
            config,
            batch: None,
            flows: None,
        }
    }

    /// Attach a batch scheduler.
    #[must_use]
    pub fn with_batch(mut self, batch: Arc<dyn BatchBackend>) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Attach a flow service.
    #[must_use]
    pub fn with_flows(mut self, flows: Arc<dyn FlowBackend>) -> Self {
        self.flows = Some(flows);
        self
    }
}

/// Reconstruction strategy.
pub enum ComputeController {
    /// Batch queue jobs.
    BatchQueue(BatchQueueCompute),
    /// Managed compute flow runs.
    ManagedCompute(ManagedCompute),
}

impl ComputeController {
    /// Site this controller runs on.
    #[must_use]
    pub const fn site(&self) -> ComputeSite {
        match self {
            Self::BatchQueue(_) => ComputeSite::BatchQueue,
            Self::ManagedCompute(_) => ComputeSite::ManagedCompute,
        }
    }

    /// Reconstruct the scan at `file_path`.
    pub async fn reconstruct(&self, file_path: &str) -> bool {
        let succeeded = match self {
            Self::BatchQueue(controller) => controller.reconstruct(file_path).await,
            Self::ManagedCompute(controller) => controller.reconstruct(file_path).await,
        };
        info!(site = %self.site(), file_path, succeeded, "reconstruction finished");
        succeeded
    }

    /// Build the multi-resolution copy of the scan at `file_path`.
    pub async fn build_multi_resolution(&self, file_path: &str) -> bool {
        let succeeded = match self {
            Self::BatchQueue(controller) => controller.build_multi_resolution(file_path).await,
            Self::ManagedCompute(controller) => {
                controller.build_multi_resolution(file_path).await
            }
        };
        info!(site = %self.site(), file_path, succeeded, "multi-resolution finished");
        succeeded
    }
}

fn managed_endpoint(
    config: &BeamlineConfig,
    field: &'static str,
    name: &str,
) -> ControllerResult<ManagedTransferEndpoint> {
    match config.endpoint(name) {
        Ok(Endpoint::ManagedTransfer(endpoint)) => Ok(endpoint.clone()),
        Ok(_) => Err(ControllerError::invalid_configuration(
            field,
            "endpoint is not a managed collection",
            Some(name.to_string()),
        )),
        Err(_) => Err(ControllerError::invalid_configuration(
            field,
            "endpoint is not configured",
            Some(name.to_string()),
        )),
    }
}

/// Build the controller for `site` from `ctx`.
///
/// # Errors
///
/// Returns [`ControllerError::InvalidConfiguration`] when the site's backend or
/// settings are missing.
pub fn get_compute_controller(
    site: ComputeSite,
    ctx: &ComputeContext,
) -> ControllerResult<ComputeController> {
    match site {
        ComputeSite::BatchQueue => {
            let batch = ctx.batch.clone().ok_or_else(|| {
                ControllerError::invalid_configuration(
                    "batch",
                    "batch backend not configured",
                    None,
                )
            })?;
            Ok(ComputeController::BatchQueue(BatchQueueCompute::new(
                ctx.config.hpc.batch.clone(),
                batch,
            )))
        }
        ComputeSite::ManagedCompute => {
            let flows = ctx.flows.clone().ok_or_else(|| {
                ControllerError::invalid_configuration(
                    "flows",
                    "flow backend not configured",
                    None,
                )
            })?;
            let settings = ctx.config.hpc.compute.clone().ok_or_else(|| {
                ControllerError::invalid_configuration(
                    "hpc.compute",
                    "managed compute settings missing",
                    None,
                )
            })?;
            let scratch = managed_endpoint(
                &ctx.config,
                "hpc.compute.scratch_endpoint",
                &settings.scratch_endpoint,
            )?;
            let results = managed_endpoint(
                &ctx.config,
                "hpc.compute.results_endpoint",
                &settings.results_endpoint,
            )?;
            Ok(ComputeController::ManagedCompute(ManagedCompute::new(
                settings, scratch, results, flows,
            )))
        }
    }
}
