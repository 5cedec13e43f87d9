//! Transfers between collections of the managed transfer service.
//!
//! # Design
//! - The source is looked up before submission; directories expand into one item per
//!   file so the destination mirrors the tree exactly.
//! - Lookup, submission and status failures are operational (`Ok(false)`); only
//!   non-retryable statuses and exhausted budgets reach the caller as errors.
//! - Metrics are best effort and never change the transfer result.

use std::path::Path;
use std::sync::Arc;

use beamxfer_core::{
    ControllerError, ControllerResult, Endpoint, ManagedTransferEndpoint, MetricsSink,
    PollPolicy, StorageLocation, SyncLevel, TransferBackend, TransferItem,
    TransferMetricsRecord, TransferSubmission,
};
use beamxfer_hpc::sanitize_name;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::remote::{find_remote_entry, list_files_recursive};
use crate::request::{TransferOutcome, TransferRequest};
use crate::task::wait_for_task;

struct MetricsReporter {
    sink: Arc<dyn MetricsSink>,
    machine: String,
}

/// Submits transfer tasks and waits for them.
pub struct ManagedTransferController {
    backend: Arc<dyn TransferBackend>,
    policy: PollPolicy,
    metrics: Option<MetricsReporter>,
}

struct Plan {
    items: Vec<TransferItem>,
    bytes: u64,
}

impl ManagedTransferController {
    /// Controller polling with `policy`.
    #[must_use]
    pub fn new(backend: Arc<dyn TransferBackend>, policy: PollPolicy) -> Self {
        Self {
            backend,
            policy,
            metrics: None,
        }
    }

    /// Report each transfer to `sink`, labelled with `machine`.
    #[must_use]
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>, machine: impl Into<String>) -> Self {
        self.metrics = Some(MetricsReporter {
            sink,
            machine: machine.into(),
        });
        self
    }

    /// Copy the request's path; `true` when the task succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Transfer`] when the task hits a non-retryable status
    /// or outlives the wait budget.
    pub async fn copy(&self, request: &TransferRequest<'_>) -> ControllerResult<bool> {
        Ok(self.transfer(request).await?.succeeded)
    }

    /// Copy the request's path and report the task that did it.
    ///
    /// # Errors
    ///
    /// Same as [`ManagedTransferController::copy`].
    pub async fn transfer(
        &self,
        request: &TransferRequest<'_>,
    ) -> ControllerResult<TransferOutcome> {
        let Some((source, destination)) = request.validated() else {
            return Ok(TransferOutcome::failed());
        };
        let (Endpoint::ManagedTransfer(src), Endpoint::ManagedTransfer(dst)) =
            (source, destination)
        else {
            warn!(
                source = source.name(),
                destination = destination.name(),
                "managed transfer needs two managed collections"
            );
            return Ok(TransferOutcome::failed());
        };

        let source_path = src.full_path(request.file_path);
        let destination_path = dst.full_path(request.file_path);
        let Some(plan) = self.plan(src, &source_path, &destination_path).await else {
            return Ok(TransferOutcome::failed());
        };

        let label = Path::new(request.file_path)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map_or_else(|| "transfer".to_string(), sanitize_name);
        let submission = TransferSubmission {
            source_endpoint: src.uuid.clone(),
            destination_endpoint: dst.uuid.clone(),
            label,
            sync_level: SyncLevel::Checksum,
            items: plan.items,
        };

        let started = Instant::now();
        let task_id = match self.backend.submit_transfer(&submission).await {
            Ok(task_id) => task_id,
            Err(err) => {
                warn!(
                    source = src.name(),
                    destination = dst.name(),
                    error = %err,
                    "transfer submission failed"
                );
                return Ok(TransferOutcome::failed());
            }
        };
        info!(
            task_id = %task_id,
            source = src.name(),
            destination = dst.name(),
            source_path = %source_path,
            destination_path = %destination_path,
            items = submission.items.len(),
            bytes = plan.bytes,
            "transfer submitted"
        );

        let result = wait_for_task(self.backend.as_ref(), &task_id, self.policy).await;
        let elapsed = started.elapsed();
        info!(
            task_id = %task_id,
            elapsed_ms = elapsed.as_millis(),
            succeeded = matches!(result, Ok(true)),
            "transfer finished"
        );
        self.report(&task_id, plan.bytes, elapsed.as_secs_f64(), &result)
            .await;
        result.map(|succeeded| TransferOutcome::finished(succeeded, task_id))
    }

    async fn plan(
        &self,
        src: &ManagedTransferEndpoint,
        source_path: &str,
        destination_path: &str,
    ) -> Option<Plan> {
        let backend = self.backend.as_ref();
        let entry = match find_remote_entry(backend, &src.uuid, source_path).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(source = src.name(), source_path, error = %err, "source lookup failed");
                return None;
            }
        };
        let Some(entry) = entry else {
            warn!(
                source = src.name(),
                source_path,
                "source not found; submitting as a single file"
            );
            return Some(Plan {
                items: vec![TransferItem::file(source_path, destination_path)],
                bytes: 0,
            });
        };
        if !entry.is_dir() {
            return Some(Plan {
                items: vec![TransferItem::file(source_path, destination_path)],
                bytes: entry.size,
            });
        }

        let files = match list_files_recursive(backend, &src.uuid, source_path).await {
            Ok(files) => files,
            Err(err) => {
                warn!(source = src.name(), source_path, error = %err, "source listing failed");
                return None;
            }
        };
        if files.is_empty() {
            return Some(Plan {
                items: vec![TransferItem {
                    source_path: source_path.to_string(),
                    destination_path: destination_path.to_string(),
                    recursive: true,
                }],
                bytes: 0,
            });
        }
        let root = source_path.trim_end_matches('/');
        let target = destination_path.trim_end_matches('/');
        let bytes = files.iter().map(|file| file.size).sum();
        let items = files
            .into_iter()
            .map(|file| {
                let suffix = file.path.strip_prefix(root).unwrap_or(&file.path);
                TransferItem::file(file.path.clone(), format!("{target}{suffix}"))
            })
            .collect();
        Some(Plan { items, bytes })
    }

    async fn report(
        &self,
        task_id: &str,
        bytes: u64,
        duration_seconds: f64,
        result: &Result<bool, ControllerError>,
    ) {
        let Some(reporter) = &self.metrics else {
            return;
        };
        let status = match result {
            Ok(true) => "succeeded",
            Ok(false) => "failed",
            Err(_) => "error",
        };
        #[allow(clippy::cast_precision_loss)]
        let transfer_speed = if duration_seconds > 0.0 {
            bytes as f64 / duration_seconds
        } else {
            0.0
        };
        let record = TransferMetricsRecord {
            timestamp: Utc::now(),
            bytes_transferred: bytes,
            duration_seconds,
            transfer_speed,
            status: status.to_string(),
            machine: reporter.machine.clone(),
            execution_id: task_id.to_string(),
        };
        if let Err(err) = reporter.sink.push(&record).await {
            warn!(task_id, error = %err, "transfer metrics push failed");
        }
    }
}
