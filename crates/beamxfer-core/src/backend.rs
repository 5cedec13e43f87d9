//! Remote service traits and the DTOs they exchange.
//!
//! # Design
//! - Controllers depend only on these traits; HTTP adapters live elsewhere.
//! - Wire-facing enums keep the service spelling so adapters can decode directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::endpoint::Endpoint;
use crate::error::{BackendError, BackendResult};
use crate::method::PruneMethod;

/// Integrity check applied by the managed transfer service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncLevel {
    /// Skip files that already exist.
    Exists,
    /// Skip files with matching size.
    Size,
    /// Skip files with matching modification time.
    Mtime,
    /// Skip files with matching checksum.
    Checksum,
}

impl SyncLevel {
    /// Numeric level understood by the transfer service.
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::Exists => 0,
            Self::Size => 1,
            Self::Mtime => 2,
            Self::Checksum => 3,
        }
    }
}

/// One source/destination pair inside a transfer submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    /// Absolute source path.
    pub source_path: String,
    /// Absolute destination path.
    pub destination_path: String,
    /// Whether the item is a directory copied recursively by the service.
    pub recursive: bool,
}

impl TransferItem {
    /// Single-file item.
    #[must_use]
    pub fn file(source_path: impl Into<String>, destination_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            recursive: false,
        }
    }
}

/// Transfer task request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSubmission {
    /// Source collection identifier.
    pub source_endpoint: String,
    /// Destination collection identifier.
    pub destination_endpoint: String,
    /// Human-readable task label.
    pub label: String,
    /// Integrity level.
    pub sync_level: SyncLevel,
    /// Items to move.
    pub items: Vec<TransferItem>,
}

/// Delete task request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSubmission {
    /// Collection identifier.
    pub endpoint: String,
    /// Human-readable task label.
    pub label: String,
    /// Delete directories and their contents.
    pub recursive: bool,
    /// Absolute paths to delete.
    pub paths: Vec<String>,
}

/// Lifecycle status of a managed transfer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Running or queued.
    Active,
    /// Paused, usually waiting on credentials or an endpoint.
    Inactive,
    /// Finished successfully.
    Succeeded,
    /// Finished unsuccessfully.
    Failed,
}

impl TaskStatus {
    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }
}

/// Snapshot of a remote task returned by a status poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Remote task identifier.
    pub task_id: String,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Advisory detail such as `FILE_NOT_FOUND`.
    pub nice_status: Option<String>,
}

/// Type of a remote directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link.
    Link,
}

/// Entry returned by a directory listing or stat call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Base name.
    pub name: String,
    /// Entry type.
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Last modification time when reported.
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    /// Whether the entry is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// Managed transfer service operations.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// Submit a transfer task and return its identifier.
    async fn submit_transfer(&self, submission: &TransferSubmission) -> BackendResult<String>;

    /// Submit a delete task and return its identifier.
    async fn submit_delete(&self, submission: &DeleteSubmission) -> BackendResult<String>;

    /// Fetch the current status of a task.
    async fn task_status(&self, task_id: &str) -> BackendResult<TaskSnapshot>;

    /// Cancel a task.
    async fn cancel_task(&self, task_id: &str) -> BackendResult<()>;

    /// List a directory on a collection.
    async fn list_directory(&self, endpoint_id: &str, path: &str)
    -> BackendResult<Vec<RemoteEntry>>;

    /// Stat a single path. `Ok(None)` means the path does not exist.
    ///
    /// The default reports the operation as unsupported so callers fall back to listing.
    async fn stat(&self, endpoint_id: &str, path: &str) -> BackendResult<Option<RemoteEntry>> {
        let _ = (endpoint_id, path);
        Err(BackendError::Unsupported { operation: "stat" })
    }
}

/// Batch scheduler job states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Queued, not yet running.
    Pending,
    /// Running.
    Running,
    /// Finished with exit status zero.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Cancelled by a user or administrator.
    Cancelled,
    /// Hit its wall-clock limit.
    Timeout,
    /// Any other scheduler state, kept verbatim.
    Other(String),
}

impl JobState {
    /// Map a Slurm state string (`COMPLETED`, `CANCELLED by 123`, ...) onto a job state.
    #[must_use]
    pub fn from_slurm(state: &str) -> Self {
        let head = state
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .trim_end_matches('+')
            .to_ascii_uppercase();
        match head.as_str() {
            "PENDING" | "CONFIGURING" | "REQUEUED" | "RESIZING" | "SUSPENDED" => Self::Pending,
            "RUNNING" | "COMPLETING" | "STAGE_OUT" => Self::Running,
            "COMPLETED" => Self::Completed,
            "FAILED" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL" | "DEADLINE" | "PREEMPTED" => {
                Self::Failed
            }
            "CANCELLED" => Self::Cancelled,
            "TIMEOUT" => Self::Timeout,
            _ => Self::Other(state.to_string()),
        }
    }

    /// Whether the scheduler will not change this state again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }
}

/// Job status reported by a batch backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Scheduler state.
    pub state: JobState,
    /// Process exit code once known.
    pub exit_code: Option<i32>,
}

impl JobStatus {
    /// Status without an exit code.
    #[must_use]
    pub const fn new(state: JobState) -> Self {
        Self {
            state,
            exit_code: None,
        }
    }
}

/// Batch scheduler operations on a remote compute system.
#[async_trait]
pub trait BatchBackend: Send + Sync {
    /// Submit a job script and return the scheduler job identifier.
    async fn submit_job(&self, script: &str) -> BackendResult<String>;

    /// Fetch the current status of a job.
    async fn job_status(&self, job_id: &str) -> BackendResult<JobStatus>;
}

/// Lifecycle status of a managed flow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowRunStatus {
    /// Running.
    Active,
    /// Paused on a required action.
    Inactive,
    /// Finished successfully.
    Succeeded,
    /// Finished unsuccessfully.
    Failed,
    /// Stopped before finishing.
    Ended,
}

impl FlowRunStatus {
    /// Whether the run will not change status again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Ended)
    }
}

/// Managed flow service operations.
#[async_trait]
pub trait FlowBackend: Send + Sync {
    /// Register a flow definition and return its identifier.
    async fn deploy_flow(&self, title: &str, definition: &Value) -> BackendResult<String>;

    /// Start a run of `flow_id` with `body` as input and return the run identifier.
    async fn start_run(&self, flow_id: &str, label: &str, body: &Value) -> BackendResult<String>;

    /// Fetch the status of a run.
    async fn run_status(&self, run_id: &str) -> BackendResult<FlowRunStatus>;
}

/// Prune invocation handed to a deferred scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredPrune {
    /// Backend that performs the delete.
    pub method: PruneMethod,
    /// Endpoint-relative path to delete.
    pub file_path: String,
    /// Endpoint to delete from.
    pub source: Endpoint,
    /// Endpoint that must still hold the path when the prune runs.
    pub check_endpoint: Option<Endpoint>,
    /// Minimum age in days before deleting.
    pub older_than_days: Option<u32>,
    /// Target execution time.
    pub run_at: DateTime<Utc>,
    /// Run name shown by the scheduler.
    pub flow_run_name: String,
    /// Scheduler deployment that executes the prune.
    pub deployment: String,
}

impl DeferredPrune {
    /// Parameters as a JSON object, for schedulers that take keyword arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn parameters(&self) -> BackendResult<Value> {
        serde_json::to_value(self).map_err(|err| BackendError::decode("deferred_prune", err.to_string()))
    }
}

/// Deferred execution facility for prunes.
#[async_trait]
pub trait DeferredScheduler: Send + Sync {
    /// Register `job` to run at `job.run_at`; returns the scheduler's run identifier.
    async fn schedule(&self, job: &DeferredPrune) -> BackendResult<String>;
}

/// Flat record describing one finished transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferMetricsRecord {
    /// Completion time.
    pub timestamp: DateTime<Utc>,
    /// Bytes moved.
    pub bytes_transferred: u64,
    /// Wall-clock duration in seconds.
    pub duration_seconds: f64,
    /// Bytes per second.
    pub transfer_speed: f64,
    /// Outcome label (`succeeded`, `failed`, `error`).
    pub status: String,
    /// Label of the machine on the far side of the transfer.
    pub machine: String,
    /// Identifier correlating the record with its task.
    pub execution_id: String,
}

/// Destination for transfer metrics.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Deliver one record.
    async fn push(&self, record: &TransferMetricsRecord) -> BackendResult<()>;
}
