//! In-process deferred prunes for runs without an external scheduler.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use beamxfer_core::{
    BackendError, BackendResult, DeferredPrune, DeferredScheduler, StorageLocation,
};
use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::context::ControllerContext;
use crate::prune::run_deferred;

/// Hands deferred prunes to a worker in this process.
///
/// Jobs are lost if the process exits before they run.
#[derive(Debug)]
pub struct LocalScheduler {
    sender: UnboundedSender<DeferredPrune>,
    issued: AtomicU64,
}

impl LocalScheduler {
    /// Scheduler and the receiver to hand to [`spawn_prune_worker`].
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<DeferredPrune>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                issued: AtomicU64::new(0),
            },
            receiver,
        )
    }
}

#[async_trait]
impl DeferredScheduler for LocalScheduler {
    async fn schedule(&self, job: &DeferredPrune) -> BackendResult<String> {
        self.sender
            .send(job.clone())
            .map_err(|err| BackendError::transport("schedule", err.to_string()))?;
        let id = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(format!("local-{id}"))
    }
}

/// Run each received prune at its `run_at`, each in its own task.
///
/// The worker exits once every sender is dropped and all pending prunes finished.
#[must_use]
pub fn spawn_prune_worker(
    mut receiver: UnboundedReceiver<DeferredPrune>,
    ctx: ControllerContext,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut running = JoinSet::new();
        while let Some(job) = receiver.recv().await {
            let ctx = ctx.clone();
            running.spawn(async move {
                let wait = (job.run_at - Utc::now()).to_std().unwrap_or_default();
                info!(
                    flow_run_name = %job.flow_run_name,
                    run_at = %job.run_at,
                    wait_secs = wait.as_secs(),
                    "deferred prune queued"
                );
                tokio::time::sleep(wait).await;
                match run_deferred(&job, &ctx).await {
                    Ok(deleted) => info!(
                        flow_run_name = %job.flow_run_name,
                        source = job.source.name(),
                        file_path = %job.file_path,
                        deleted,
                        "deferred prune finished"
                    ),
                    Err(err) => error!(
                        flow_run_name = %job.flow_run_name,
                        source = job.source.name(),
                        file_path = %job.file_path,
                        error = %err,
                        "deferred prune failed"
                    ),
                }
            });
        }
        while let Some(joined) = running.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "deferred prune task aborted");
            }
        }
    })
}
