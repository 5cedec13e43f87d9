//! Backends and configuration handed to the controller factories.

use std::sync::Arc;

use beamxfer_config::BeamlineConfig;
use beamxfer_core::{
    BatchBackend, ControllerError, ControllerResult, DeferredScheduler, MetricsSink,
    TransferBackend,
};

/// Dependencies available to transfer and prune controllers for one workflow run.
///
/// Backends are optional; a factory asking for one that is not wired in reports
/// [`ControllerError::InvalidConfiguration`].
#[derive(Clone)]
pub struct ControllerContext {
    config: Arc<BeamlineConfig>,
    transfer: Option<Arc<dyn TransferBackend>>,
    batch: Option<Arc<dyn BatchBackend>>,
    scheduler: Option<Arc<dyn DeferredScheduler>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl ControllerContext {
    /// Context with configuration only.
    #[must_use]
    pub const fn new(config: Arc<BeamlineConfig>) -> Self {
        Self {
            config,
            transfer: None,
            batch: None,
            scheduler: None,
            metrics: None,
        }
    }

    /// Attach the managed transfer backend.
    #[must_use]
    pub fn with_transfer(mut self, transfer: Arc<dyn TransferBackend>) -> Self {
        self.transfer = Some(transfer);
        self
    }

    /// Attach the batch backend used for archive jobs.
    #[must_use]
    pub fn with_batch(mut self, batch: Arc<dyn BatchBackend>) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Attach the deferred prune scheduler.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn DeferredScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Attach a transfer metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Beamline configuration.
    #[must_use]
    pub fn config(&self) -> &BeamlineConfig {
        &self.config
    }

    /// Shared handle to the configuration.
    #[must_use]
    pub fn config_handle(&self) -> Arc<BeamlineConfig> {
        Arc::clone(&self.config)
    }

    /// Managed transfer backend.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidConfiguration`] when none is wired in.
    pub fn transfer_backend(&self) -> ControllerResult<Arc<dyn TransferBackend>> {
        self.transfer.clone().ok_or_else(|| {
            ControllerError::invalid_configuration(
                "transfer",
                "managed transfer backend not configured",
                None,
            )
        })
    }

    /// Managed transfer backend when wired in.
    #[must_use]
    pub fn optional_transfer_backend(&self) -> Option<Arc<dyn TransferBackend>> {
        self.transfer.clone()
    }

    /// Batch backend.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidConfiguration`] when none is wired in.
    pub fn batch_backend(&self) -> ControllerResult<Arc<dyn BatchBackend>> {
        self.batch.clone().ok_or_else(|| {
            ControllerError::invalid_configuration("batch", "batch backend not configured", None)
        })
    }

    /// Deferred prune scheduler when wired in.
    #[must_use]
    pub fn scheduler(&self) -> Option<Arc<dyn DeferredScheduler>> {
        self.scheduler.clone()
    }

    /// Transfer metrics sink when wired in.
    #[must_use]
    pub fn metrics(&self) -> Option<Arc<dyn MetricsSink>> {
        self.metrics.clone()
    }
}
