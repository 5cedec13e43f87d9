//! Reconstruction through a managed compute flow.
//!
//! # Design
//! - One flow definition serves both steps: run a registered function, then move its
//!   output back with a transfer action.
//! - The run input names the function, its keyword arguments and the transfer-out pair.

use std::sync::Arc;

use beamxfer_config::ComputeSettings;
use beamxfer_core::{
    BackendError, FlowBackend, FlowRunStatus, ManagedTransferEndpoint, PollError, Probe,
    StorageLocation, poll_until,
};
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::scan::ScanPath;

/// Title used when the flow is deployed per run.
pub const FLOW_TITLE: &str = "Beamline reconstruction and transfer-out";

const COMPUTE_ACTION_URL: &str = "https://compute.actions.globus.org/fxap";
const TRANSFER_ACTION_URL: &str = "https://actions.globus.org/transfer/transfer";

/// Two-state flow: compute action, then transfer of the results.
#[must_use]
pub fn flow_definition() -> Value {
    json!({
        "Comment": "Run a reconstruction function and transfer its results",
        "StartAt": "Reconstruction",
        "States": {
            "Reconstruction": {
                "Comment": "Run the registered function on the compute endpoint",
                "Type": "Action",
                "ActionUrl": COMPUTE_ACTION_URL,
                "Parameters": {
                    "endpoint.$": "$.input.compute_endpoint_id",
                    "function.$": "$.input.compute_function_id",
                    "kwargs.$": "$.input.compute_function_kwargs"
                },
                "ResultPath": "$.ReconstructionOutput",
                "WaitTime": 3600,
                "Next": "TransferOut"
            },
            "TransferOut": {
                "Comment": "Transfer results to the beamline",
                "Type": "Action",
                "ActionUrl": TRANSFER_ACTION_URL,
                "Parameters": {
                    "source_endpoint_id.$": "$.input.source.id",
                    "destination_endpoint_id.$": "$.input.destination.id",
                    "transfer_items": [{
                        "source_path.$": "$.input.source.path",
                        "destination_path.$": "$.input.destination.path",
                        "recursive.$": "$.input.recursive"
                    }]
                },
                "ResultPath": "$.TransferFiles",
                "WaitTime": 300,
                "End": true
            }
        }
    })
}

/// Managed compute controller.
pub struct ManagedCompute {
    settings: ComputeSettings,
    scratch: ManagedTransferEndpoint,
    results: ManagedTransferEndpoint,
    flows: Arc<dyn FlowBackend>,
}

impl ManagedCompute {
    /// Controller running functions from `settings`; output moves from `scratch` to
    /// `results`.
    #[must_use]
    pub fn new(
        settings: ComputeSettings,
        scratch: ManagedTransferEndpoint,
        results: ManagedTransferEndpoint,
        flows: Arc<dyn FlowBackend>,
    ) -> Self {
        Self {
            settings,
            scratch,
            results,
            flows,
        }
    }

    fn allocation_path(&self, tail: &str) -> String {
        format!("{}/{tail}", self.settings.allocation_root.trim_end_matches('/'))
    }

    fn script_path(&self, script: &str) -> String {
        self.allocation_path(&format!("scripts/{script}"))
    }

    /// Run input for the reconstruction of `scan`.
    #[must_use]
    pub fn reconstruction_input(&self, scan: &ScanPath) -> Value {
        let kwargs = json!({
            "rundir": self.allocation_path("data/raw"),
            "script_path": self.script_path(&self.settings.recon_script),
            "h5_file_name": format!("{}.h5", scan.stem),
            "folder_path": scan.folder,
        });
        self.run_input(
            &self.settings.reconstruction_function_id,
            kwargs,
            &scan.reconstruction_relative(),
        )
    }

    /// Run input for the multi-resolution conversion of `scan`.
    #[must_use]
    pub fn multi_resolution_input(&self, scan: &ScanPath) -> Value {
        let kwargs = json!({
            "rundir": self.allocation_path("data/raw"),
            "script_path": self.script_path(&self.settings.multires_script),
            "recon_path": scan.reconstruction_dir(&self.allocation_path("data/scratch")),
            "raw_path": scan.raw_file(&self.allocation_path("data/raw")),
        });
        self.run_input(
            &self.settings.multires_function_id,
            kwargs,
            &scan.multi_resolution_relative(),
        )
    }

    fn run_input(&self, function_id: &str, kwargs: Value, output: &str) -> Value {
        json!({
            "source": {
                "id": self.scratch.uuid,
                "path": self.scratch.full_path(output),
            },
            "destination": {
                "id": self.results.uuid,
                "path": self.results.full_path(output),
            },
            "recursive": true,
            "compute_endpoint_id": self.settings.endpoint_id,
            "compute_function_id": function_id,
            "compute_function_kwargs": kwargs,
        })
    }

    /// Reconstruct `file_path`; `true` only when the run succeeds.
    pub async fn reconstruct(&self, file_path: &str) -> bool {
        let Some(scan) = ScanPath::parse(file_path) else {
            warn!(file_path, "reconstruction skipped: path has no file name");
            return false;
        };
        let label = format!("recon {}", scan.stem);
        self.run(&label, &self.reconstruction_input(&scan)).await
    }

    /// Build the multi-resolution copy of `file_path`.
    pub async fn build_multi_resolution(&self, file_path: &str) -> bool {
        let Some(scan) = ScanPath::parse(file_path) else {
            warn!(file_path, "multi-resolution skipped: path has no file name");
            return false;
        };
        let label = format!("multires {}", scan.stem);
        self.run(&label, &self.multi_resolution_input(&scan)).await
    }

    async fn flow_id(&self) -> Result<String, BackendError> {
        if let Some(flow_id) = &self.settings.flow_id {
            return Ok(flow_id.clone());
        }
        let flow_id = self.flows.deploy_flow(FLOW_TITLE, &flow_definition()).await?;
        info!(flow_id = %flow_id, "reconstruction flow deployed");
        Ok(flow_id)
    }

    async fn run(&self, label: &str, input: &Value) -> bool {
        let started = Instant::now();
        let run_id = match self.flow_id().await {
            Ok(flow_id) => match self.flows.start_run(&flow_id, label, input).await {
                Ok(run_id) => run_id,
                Err(err) => {
                    error!(label, flow_id = %flow_id, error = %err, "flow run could not start");
                    return false;
                }
            },
            Err(err) => {
                error!(label, error = %err, "flow deployment failed");
                return false;
            }
        };
        info!(label, run_id = %run_id, "flow run started");

        let flows = self.flows.as_ref();
        let run = run_id.as_str();
        let result = poll_until(
            self.settings.poll_policy(),
            move || async move {
                let status = flows.run_status(run).await?;
                Ok::<_, BackendError>(if status.is_terminal() {
                    Probe::Ready(status)
                } else {
                    Probe::Pending(status)
                })
            },
            |_| false,
        )
        .await;

        let elapsed_ms = started.elapsed().as_millis();
        match result {
            Ok(FlowRunStatus::Succeeded) => {
                info!(label, run_id = %run_id, elapsed_ms, "flow run succeeded");
                true
            }
            Ok(status) => {
                warn!(
                    label,
                    run_id = %run_id,
                    status = ?status,
                    elapsed_ms,
                    "flow run did not succeed"
                );
                false
            }
            Err(PollError::Check(err)) => {
                error!(label, run_id = %run_id, error = %err, "flow run status check failed");
                false
            }
            Err(PollError::TimedOut { last, waited }) => {
                warn!(
                    label,
                    run_id = %run_id,
                    last_status = ?last,
                    waited_secs = waited.as_secs(),
                    "flow run wait budget exhausted"
                );
                false
            }
            Err(PollError::NonRetryable(status)) => {
                warn!(label, run_id = %run_id, status = ?status, "flow run stopped");
                false
            }
        }
    }
}
