//! Service clients built on first use for one command invocation.

use std::sync::Arc;

use beamxfer_clients::{
    AccessTokenSource, ClientCredentials, GlobusFlowsClient, GlobusTransferClient,
    PrefectScheduler, SfapiClient, SfapiCredentials,
};
use beamxfer_config::BeamlineConfig;
use beamxfer_core::{
    BatchBackend, DeferredScheduler, Endpoint, EndpointKind, FlowBackend, MetricsSink,
    PruneMethod, TransferBackend, TransferMethod,
};
use beamxfer_hpc::{ComputeContext, ComputeSite};
use beamxfer_telemetry::{PushGatewayConfig, PushGatewaySink};
use beamxfer_transfer::{ControllerContext, LocalScheduler, spawn_prune_worker};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

/// Configuration plus lazily constructed backends.
///
/// Nothing talks to a remote service until a command needs it, so `endpoints` and local
/// copies work without credentials.
pub struct RunContext {
    config: Arc<BeamlineConfig>,
    tokens: OnceCell<Arc<dyn AccessTokenSource>>,
    transfer: OnceCell<Arc<dyn TransferBackend>>,
    batch: OnceCell<Arc<dyn BatchBackend>>,
    flows: OnceCell<Arc<dyn FlowBackend>>,
    metrics: OnceCell<Option<Arc<dyn MetricsSink>>>,
    scheduler: Option<Arc<dyn DeferredScheduler>>,
}

impl RunContext {
    /// Context over `config` with no backend built yet.
    #[must_use]
    pub fn new(config: Arc<BeamlineConfig>) -> Self {
        Self {
            config,
            tokens: OnceCell::new(),
            transfer: OnceCell::new(),
            batch: OnceCell::new(),
            flows: OnceCell::new(),
            metrics: OnceCell::new(),
            scheduler: None,
        }
    }

    /// Use `transfer` instead of the configured transfer service.
    #[must_use]
    pub fn with_transfer(mut self, transfer: Arc<dyn TransferBackend>) -> Self {
        self.transfer = OnceCell::new_with(Some(transfer));
        self
    }

    /// Use `batch` instead of the configured batch service.
    #[must_use]
    pub fn with_batch(mut self, batch: Arc<dyn BatchBackend>) -> Self {
        self.batch = OnceCell::new_with(Some(batch));
        self
    }

    /// Use `flows` instead of the configured flow service.
    #[must_use]
    pub fn with_flows(mut self, flows: Arc<dyn FlowBackend>) -> Self {
        self.flows = OnceCell::new_with(Some(flows));
        self
    }

    /// Use `metrics` regardless of the `metrics` section.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = OnceCell::new_with(Some(Some(metrics)));
        self
    }

    /// Use `scheduler` instead of the configured or in-process one.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn DeferredScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Beamline configuration.
    #[must_use]
    pub fn config(&self) -> &BeamlineConfig {
        &self.config
    }

    async fn tokens(&self) -> AppResult<Arc<dyn AccessTokenSource>> {
        self.tokens
            .get_or_try_init(|| async {
                let app = self
                    .config
                    .transfer_app()
                    .map_err(|source| AppError::config("transfer_app", source))?;
                let services = &self.config.services;
                let client = ClientCredentials::new(
                    &services.auth_api,
                    app.client_id.clone(),
                    app.client_secret.clone(),
                    services.request_timeout(),
                )
                .map_err(|source| AppError::client("auth_client", source))?;
                Ok::<Arc<dyn AccessTokenSource>, AppError>(Arc::new(client))
            })
            .await
            .cloned()
    }

    /// Managed transfer backend.
    ///
    /// # Errors
    ///
    /// Returns an error when the transfer app credentials are missing or a URL is invalid.
    pub async fn transfer_backend(&self) -> AppResult<Arc<dyn TransferBackend>> {
        self.transfer
            .get_or_try_init(|| async {
                let tokens = self.tokens().await?;
                let services = &self.config.services;
                let client = GlobusTransferClient::new(
                    &services.transfer_api,
                    tokens,
                    services.request_timeout(),
                )
                .map_err(|source| AppError::client("transfer_client", source))?;
                Ok::<Arc<dyn TransferBackend>, AppError>(Arc::new(client))
            })
            .await
            .cloned()
    }

    /// Batch backend reached through the superfacility API.
    ///
    /// # Errors
    ///
    /// Returns an error when the API credentials cannot be read or a URL is invalid.
    pub async fn batch_backend(&self) -> AppResult<Arc<dyn BatchBackend>> {
        self.batch
            .get_or_try_init(|| async {
                let credentials = SfapiCredentials::from_env()
                    .map_err(|source| AppError::client("sfapi_credentials", source))?;
                let services = &self.config.services;
                let client = SfapiClient::new(
                    &services.sfapi_api,
                    &services.sfapi_token_url,
                    services.sfapi_machine.clone(),
                    credentials,
                    services.request_timeout(),
                )
                .map_err(|source| AppError::client("sfapi_client", source))?;
                Ok::<Arc<dyn BatchBackend>, AppError>(Arc::new(client))
            })
            .await
            .cloned()
    }

    /// Managed flow backend.
    ///
    /// # Errors
    ///
    /// Returns an error when the transfer app credentials are missing or a URL is invalid.
    pub async fn flow_backend(&self) -> AppResult<Arc<dyn FlowBackend>> {
        self.flows
            .get_or_try_init(|| async {
                let tokens = self.tokens().await?;
                let services = &self.config.services;
                let client =
                    GlobusFlowsClient::new(&services.flows_api, tokens, services.request_timeout())
                        .map_err(|source| AppError::client("flows_client", source))?;
                Ok::<Arc<dyn FlowBackend>, AppError>(Arc::new(client))
            })
            .await
            .cloned()
    }

    /// Push gateway sink when metrics are enabled.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Telemetry`] when the sink cannot be built.
    pub async fn metrics_sink(&self) -> AppResult<Option<Arc<dyn MetricsSink>>> {
        self.metrics
            .get_or_try_init(|| async {
                let settings = &self.config.metrics;
                if !settings.enabled {
                    return Ok(None);
                }
                let push = PushGatewayConfig::resolve(
                    settings.pushgateway_url.as_deref(),
                    settings.job_name.as_deref(),
                    settings.instance.as_deref(),
                );
                let sink = PushGatewaySink::new(&push)
                    .map_err(|source| AppError::telemetry("pushgateway_sink", source))?;
                Ok::<Option<Arc<dyn MetricsSink>>, AppError>(Some(Arc::new(sink)))
            })
            .await
            .cloned()
    }

    /// Controller context carrying the backends `method` needs.
    ///
    /// # Errors
    ///
    /// Returns an error when a required backend cannot be built.
    pub async fn transfer_context(&self, method: TransferMethod) -> AppResult<ControllerContext> {
        let ctx = ControllerContext::new(Arc::clone(&self.config));
        Ok(match method {
            TransferMethod::LocalCopy => ctx,
            TransferMethod::ManagedTransfer => {
                let ctx = ctx.with_transfer(self.transfer_backend().await?);
                match self.metrics_sink().await? {
                    Some(sink) => ctx.with_metrics(sink),
                    None => ctx,
                }
            }
            TransferMethod::ArchiveToFileSystem | TransferMethod::FileSystemToArchive => {
                ctx.with_batch(self.batch_backend().await?)
            }
        })
    }

    /// Controller context for a prune by `method`, optionally checked against `check`.
    ///
    /// Delayed prunes also need `scheduler`.
    ///
    /// # Errors
    ///
    /// Returns an error when a required backend cannot be built.
    pub async fn prune_context(
        &self,
        method: PruneMethod,
        check: Option<&Endpoint>,
        scheduler: Option<Arc<dyn DeferredScheduler>>,
    ) -> AppResult<ControllerContext> {
        let mut ctx = ControllerContext::new(Arc::clone(&self.config));
        if let Some(scheduler) = scheduler {
            ctx = ctx.with_scheduler(scheduler);
        }
        let managed_check =
            check.is_some_and(|check| check.kind() == EndpointKind::ManagedTransfer);
        if method == PruneMethod::ManagedTransfer || managed_check {
            ctx = ctx.with_transfer(self.transfer_backend().await?);
        }
        if method == PruneMethod::Archive {
            ctx = ctx.with_batch(self.batch_backend().await?);
        }
        Ok(ctx)
    }

    /// Compute context carrying the backend `site` needs.
    ///
    /// # Errors
    ///
    /// Returns an error when the site's backend cannot be built.
    pub async fn compute_context(&self, site: ComputeSite) -> AppResult<ComputeContext> {
        let ctx = ComputeContext::new(Arc::clone(&self.config));
        Ok(match site {
            ComputeSite::BatchQueue => ctx.with_batch(self.batch_backend().await?),
            ComputeSite::ManagedCompute => ctx.with_flows(self.flow_backend().await?),
        })
    }

    /// Scheduler for delayed prunes.
    ///
    /// Prefers an injected scheduler, then the configured scheduler API. Without either,
    /// prunes are queued to a worker in this process.
    ///
    /// # Errors
    ///
    /// Returns an error when the scheduler client cannot be built.
    pub async fn deferred_prunes(&self) -> AppResult<DeferredPrunes> {
        if let Some(scheduler) = &self.scheduler {
            return Ok(DeferredPrunes {
                scheduler: Arc::clone(scheduler),
                worker: None,
            });
        }
        let settings = &self.config.scheduler;
        if let Some(api_url) = settings.api_url.as_deref() {
            let client = PrefectScheduler::new(
                api_url,
                settings.api_key.clone(),
                self.config.services.request_timeout(),
            )
            .map_err(|source| AppError::client("scheduler_client", source))?;
            return Ok(DeferredPrunes {
                scheduler: Arc::new(client),
                worker: None,
            });
        }
        warn!("no scheduler api configured; delayed prunes run in this process");
        let (scheduler, receiver) = LocalScheduler::channel();
        let worker = spawn_prune_worker(receiver, self.worker_context().await);
        Ok(DeferredPrunes {
            scheduler: Arc::new(scheduler),
            worker: Some(worker),
        })
    }

    async fn worker_context(&self) -> ControllerContext {
        let mut ctx = ControllerContext::new(Arc::clone(&self.config));
        match self.transfer_backend().await {
            Ok(transfer) => ctx = ctx.with_transfer(transfer),
            Err(err) => debug!(error = %err, "deferred prunes run without a transfer backend"),
        }
        match self.batch_backend().await {
            Ok(batch) => ctx = ctx.with_batch(batch),
            Err(err) => debug!(error = %err, "deferred prunes run without a batch backend"),
        }
        ctx
    }
}

/// Scheduler handle plus the in-process worker, when there is one.
pub struct DeferredPrunes {
    scheduler: Arc<dyn DeferredScheduler>,
    worker: Option<JoinHandle<()>>,
}

impl DeferredPrunes {
    /// Scheduler to attach to controller contexts.
    #[must_use]
    pub fn scheduler(&self) -> Arc<dyn DeferredScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Whether prunes run inside this process.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.worker.is_some()
    }

    /// Wait for in-process prunes to run.
    ///
    /// Every context holding [`DeferredPrunes::scheduler`] must be dropped first, or this
    /// never returns.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Worker`] when the worker task panicked.
    pub async fn finish(self) -> AppResult<()> {
        let Self { scheduler, worker } = self;
        drop(scheduler);
        if let Some(worker) = worker {
            info!("waiting for queued prunes");
            worker.await.map_err(|source| AppError::Worker { source })?;
        }
        Ok(())
    }
}
