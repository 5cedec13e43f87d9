//! Waiting on managed transfer and delete tasks.

use beamxfer_core::{
    BackendError, ControllerResult, PollError, PollPolicy, Probe, TaskSnapshot, TaskStatus,
    TransferBackend, TransferError, poll_until,
};
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Advisory statuses that will not clear by waiting.
const NON_RETRYABLE: [&str; 2] = ["FILE_NOT_FOUND", "PERMISSION_DENIED"];

fn is_non_retryable(nice_status: &Option<String>) -> bool {
    nice_status
        .as_deref()
        .is_some_and(|status| NON_RETRYABLE.contains(&status))
}

/// Poll `task_id` until it finishes.
///
/// `Ok(true)` on `SUCCEEDED`, `Ok(false)` on `FAILED` or when a status check fails.
///
/// # Errors
///
/// Cancels the task and returns [`TransferError::NonRetryable`] on a non-retryable
/// advisory status; returns [`TransferError::TimedOut`] when `policy` runs out.
pub(crate) async fn wait_for_task(
    backend: &dyn TransferBackend,
    task_id: &str,
    policy: PollPolicy,
) -> ControllerResult<bool> {
    let started = Instant::now();
    let result = poll_until(
        policy,
        move || async move {
            let snapshot = backend.task_status(task_id).await?;
            Ok::<_, BackendError>(match snapshot.status {
                TaskStatus::Succeeded | TaskStatus::Failed => Probe::Ready(snapshot),
                TaskStatus::Active | TaskStatus::Inactive => Probe::Pending(snapshot.nice_status),
            })
        },
        is_non_retryable,
    )
    .await;

    let elapsed_ms = started.elapsed().as_millis();
    match result {
        Ok(TaskSnapshot {
            status: TaskStatus::Succeeded,
            ..
        }) => {
            info!(task_id, elapsed_ms, "task succeeded");
            Ok(true)
        }
        Ok(snapshot) => {
            warn!(
                task_id,
                status = snapshot.status.as_str(),
                nice_status = ?snapshot.nice_status,
                elapsed_ms,
                "task failed"
            );
            Ok(false)
        }
        Err(PollError::Check(err)) => {
            warn!(task_id, error = %err, elapsed_ms, "task status check failed");
            Ok(false)
        }
        Err(PollError::NonRetryable(nice_status)) => {
            let status = nice_status.unwrap_or_default();
            error!(task_id, nice_status = %status, "task hit a non-retryable status; cancelling");
            if let Err(err) = backend.cancel_task(task_id).await {
                warn!(task_id, error = %err, "task cancellation failed");
            }
            Err(TransferError::NonRetryable {
                task_id: task_id.to_string(),
                status,
            }
            .into())
        }
        Err(PollError::TimedOut { last, waited }) => {
            error!(
                task_id,
                waited_secs = waited.as_secs(),
                last_status = ?last,
                "task still running after wait budget"
            );
            Err(TransferError::TimedOut {
                task_id: task_id.to_string(),
                waited,
                last_status: last,
            }
            .into())
        }
    }
}
