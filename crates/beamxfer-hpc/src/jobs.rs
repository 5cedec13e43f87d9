//! Submit a batch job and wait for it to reach a terminal state.

use std::time::Duration;

use beamxfer_core::{
    BackendError, BackendResult, BatchBackend, JobState, JobStatus, PollError, PollPolicy, Probe,
    poll_until,
};
use tokio::time::Instant;
use tracing::{info, warn};

/// How a submitted job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Completed with exit status zero.
    Completed {
        /// Scheduler job identifier.
        job_id: String,
    },
    /// Reached any other terminal state, or completed with a non-zero exit status.
    Failed {
        /// Scheduler job identifier.
        job_id: String,
        /// Final scheduler state.
        state: JobState,
        /// Exit code when reported.
        exit_code: Option<i32>,
    },
    /// Still queued or running when the wait budget ran out.
    TimedOut {
        /// Scheduler job identifier.
        job_id: String,
        /// Time spent waiting.
        waited: Duration,
    },
}

impl JobOutcome {
    /// Whether the job completed successfully.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Scheduler job identifier.
    #[must_use]
    pub fn job_id(&self) -> &str {
        match self {
            Self::Completed { job_id }
            | Self::Failed { job_id, .. }
            | Self::TimedOut { job_id, .. } => job_id,
        }
    }

    fn from_terminal(job_id: &str, status: JobStatus) -> Self {
        let job_id = job_id.to_string();
        match (status.state, status.exit_code) {
            (JobState::Completed, None | Some(0)) => Self::Completed { job_id },
            (state, exit_code) => Self::Failed {
                job_id,
                state,
                exit_code,
            },
        }
    }
}

/// Submit `script` and wait for the job.
///
/// # Errors
///
/// Returns the backend error when submission or a status check fails.
pub async fn run_job(
    backend: &dyn BatchBackend,
    script: &str,
    policy: PollPolicy,
) -> BackendResult<JobOutcome> {
    let job_id = backend.submit_job(script).await?;
    info!(job_id = %job_id, "batch job submitted");
    wait_for_job(backend, &job_id, policy).await
}

/// Poll `job_id` until it is terminal or `policy` runs out.
///
/// # Errors
///
/// Returns the backend error when a status check fails.
pub async fn wait_for_job(
    backend: &dyn BatchBackend,
    job_id: &str,
    policy: PollPolicy,
) -> BackendResult<JobOutcome> {
    let started = Instant::now();
    let result = poll_until(
        policy,
        move || async move {
            let status = backend.job_status(job_id).await?;
            Ok::<_, BackendError>(if status.state.is_terminal() {
                Probe::Ready(status)
            } else {
                Probe::Pending(status.state)
            })
        },
        |_| false,
    )
    .await;

    let outcome = match result {
        Ok(status) => JobOutcome::from_terminal(job_id, status),
        Err(PollError::Check(err)) => {
            warn!(job_id, error = %err, "job status check failed");
            return Err(err);
        }
        Err(PollError::TimedOut { last, waited }) => {
            warn!(
                job_id,
                last_state = ?last,
                waited_secs = waited.as_secs(),
                "job wait budget exhausted"
            );
            JobOutcome::TimedOut {
                job_id: job_id.to_string(),
                waited,
            }
        }
        Err(PollError::NonRetryable(state)) => JobOutcome::Failed {
            job_id: job_id.to_string(),
            state,
            exit_code: None,
        },
    };

    match &outcome {
        JobOutcome::Completed { .. } => info!(
            job_id,
            elapsed_ms = started.elapsed().as_millis(),
            "batch job completed"
        ),
        JobOutcome::Failed {
            state, exit_code, ..
        } => warn!(job_id, state = ?state, exit_code = ?exit_code, "batch job failed"),
        JobOutcome::TimedOut { .. } => {}
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamxfer_test_support::FakeBatchBackend;

    fn policy() -> PollPolicy {
        PollPolicy::new(Duration::from_secs(1), Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn completed_job_with_zero_exit_succeeds() -> anyhow::Result<()> {
        let backend = FakeBatchBackend::new();
        backend.push_state(JobState::Pending, None);
        backend.push_state(JobState::Running, None);

        let outcome = run_job(&backend, "#!/bin/bash\n", policy()).await?;
        assert!(outcome.succeeded());
        assert_eq!(outcome.job_id(), "1001");
        assert_eq!(backend.scripts().len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn completed_with_nonzero_exit_is_failure() -> anyhow::Result<()> {
        let backend = FakeBatchBackend::new();
        backend.push_state(JobState::Completed, Some(2));

        let outcome = run_job(&backend, "#!/bin/bash\n", policy()).await?;
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                job_id: "1001".into(),
                state: JobState::Completed,
                exit_code: Some(2),
            }
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn pending_past_budget_times_out() -> anyhow::Result<()> {
        let backend = FakeBatchBackend::new();
        for _ in 0..10 {
            backend.push_state(JobState::Pending, None);
        }

        let outcome = run_job(&backend, "#!/bin/bash\n", policy()).await?;
        assert!(matches!(outcome, JobOutcome::TimedOut { .. }));
        assert!(!outcome.succeeded());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn submission_and_status_errors_propagate() {
        let backend = FakeBatchBackend::new();
        backend.fail_submissions();
        assert!(matches!(
            run_job(&backend, "#!/bin/bash\n", policy()).await,
            Err(BackendError::Transport { .. })
        ));

        let backend = FakeBatchBackend::new();
        backend.push_offline();
        assert!(wait_for_job(&backend, "77", policy()).await.is_err());
    }
}
