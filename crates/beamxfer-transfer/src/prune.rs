//! Deferred and immediate deletion with safety checks.
//!
//! # Design
//! - A positive delay only registers a [`DeferredPrune`]; every check runs when the
//!   prune executes, so deferred prunes see the state at their run time.
//! - Missing data at the source or the check endpoint is a
//!   [`ControllerError::PreconditionFailed`] and nothing is deleted.
//! - Archive prunes run their checks inside the `hsi` job and report them by exit code.

use std::io;
use std::path::Path;
use std::sync::Arc;

use beamxfer_core::{
    ControllerError, ControllerResult, DeferredPrune, DeleteSubmission, Endpoint, PruneMethod,
    StorageLocation, TransferBackend,
};
use beamxfer_hpc::{JobOutcome, sanitize_name, shell_quote};
use chrono::{TimeDelta, Utc};
use tokio::fs;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::archive::{ArchiveDirection, ArchiveTransferController};
use crate::context::ControllerContext;
use crate::locate::{Located, Lookup, locate};
use crate::request::PruneRequest;
use crate::task::wait_for_task;

/// Exit status of an archive prune job whose target is missing.
const EXIT_SOURCE_MISSING: i32 = 3;
/// Exit status of an archive prune job whose check copy is missing.
const EXIT_CHECK_MISSING: i32 = 4;

const SOURCE_MISSING: &str = "path not found at source";
const CHECK_MISSING: &str = "path not found at check endpoint";

/// Deletes data from one kind of endpoint.
pub enum PruneController {
    /// Paths on a mounted filesystem.
    FileSystem {
        /// Backends and configuration.
        ctx: ControllerContext,
    },
    /// Paths on a managed collection.
    ManagedTransfer {
        /// Backends and configuration.
        ctx: ControllerContext,
        /// Backend that runs delete tasks.
        backend: Arc<dyn TransferBackend>,
    },
    /// Paths in the tape archive.
    Archive {
        /// Backends and configuration.
        ctx: ControllerContext,
        /// Job runner for `hsi` scripts.
        jobs: ArchiveTransferController,
    },
}

/// Build the prune controller for `method`.
///
/// # Errors
///
/// Returns [`ControllerError::InvalidConfiguration`] when the backend `method` needs
/// is not in `ctx`.
pub fn get_prune_controller(
    method: PruneMethod,
    ctx: &ControllerContext,
) -> ControllerResult<PruneController> {
    let ctx = ctx.clone();
    Ok(match method {
        PruneMethod::FileSystem => PruneController::FileSystem { ctx },
        PruneMethod::ManagedTransfer => {
            let backend = ctx.transfer_backend()?;
            PruneController::ManagedTransfer { ctx, backend }
        }
        PruneMethod::Archive => {
            let jobs = ArchiveTransferController::new(
                ArchiveDirection::FromArchive,
                ctx.config().beamline_id.clone(),
                ctx.config().hpc.archive.clone(),
                ctx.batch_backend()?,
            );
            PruneController::Archive { ctx, jobs }
        }
    })
}

/// Execute a prune that was scheduled earlier.
///
/// # Errors
///
/// Same as [`PruneController::prune`] with no delay.
pub async fn run_deferred(
    job: &DeferredPrune,
    ctx: &ControllerContext,
) -> ControllerResult<bool> {
    info!(
        method = job.method.as_str(),
        source = job.source.name(),
        file_path = %job.file_path,
        flow_run_name = %job.flow_run_name,
        "running deferred prune"
    );
    let controller = get_prune_controller(job.method, ctx)?;
    let mut request = PruneRequest::new(&job.file_path, &job.source);
    request.check_endpoint = job.check_endpoint.as_ref();
    request.older_than_days = job.older_than_days;
    controller.prune(&request).await
}

impl PruneController {
    /// Prune method implemented by this controller.
    #[must_use]
    pub const fn method(&self) -> PruneMethod {
        match self {
            Self::FileSystem { .. } => PruneMethod::FileSystem,
            Self::ManagedTransfer { .. } => PruneMethod::ManagedTransfer,
            Self::Archive { .. } => PruneMethod::Archive,
        }
    }

    const fn ctx(&self) -> &ControllerContext {
        match self {
            Self::FileSystem { ctx }
            | Self::ManagedTransfer { ctx, .. }
            | Self::Archive { ctx, .. } => ctx,
        }
    }

    /// Delete the request's path now, or schedule it when a delay is set.
    ///
    /// Returns `true` once the delete finished or the deferred prune was registered.
    ///
    /// # Errors
    ///
    /// - [`ControllerError::PreconditionFailed`] when the path is missing at the source
    ///   or at the check endpoint.
    /// - [`ControllerError::InvalidConfiguration`] when a delay is requested without a
    ///   scheduler, or a check endpoint cannot be inspected.
    /// - [`ControllerError::Transfer`] when a managed delete task cannot finish.
    pub async fn prune(&self, request: &PruneRequest<'_>) -> ControllerResult<bool> {
        let Some(source) = request.validated() else {
            return Ok(false);
        };
        if !self.accepts(source) {
            warn!(
                method = self.method().as_str(),
                source = source.name(),
                "prune method does not match the source endpoint"
            );
            return Ok(false);
        }
        if !request.delay.is_zero() {
            return self.schedule(request, source).await;
        }

        let started = Instant::now();
        let result = match self {
            Self::Archive { jobs, .. } => self.prune_archive(jobs, request, source).await,
            Self::FileSystem { .. } | Self::ManagedTransfer { .. } => {
                self.prune_checked(request, source).await
            }
        };
        let elapsed_ms = started.elapsed().as_millis();
        match &result {
            Ok(deleted) => info!(
                method = self.method().as_str(),
                source = source.name(),
                check_endpoint = request.describe_check(),
                file_path = request.file_path,
                deleted,
                elapsed_ms,
                "prune finished"
            ),
            Err(err) => error!(
                method = self.method().as_str(),
                source = source.name(),
                check_endpoint = request.describe_check(),
                file_path = request.file_path,
                error = %err,
                elapsed_ms,
                "prune aborted"
            ),
        }
        result
    }

    const fn accepts(&self, source: &Endpoint) -> bool {
        matches!(
            (self, source),
            (Self::FileSystem { .. }, Endpoint::FileSystem(_))
                | (Self::ManagedTransfer { .. }, Endpoint::ManagedTransfer(_))
                | (Self::Archive { .. }, Endpoint::Archive(_))
        )
    }

    async fn schedule(
        &self,
        request: &PruneRequest<'_>,
        source: &Endpoint,
    ) -> ControllerResult<bool> {
        let scheduler = self.ctx().scheduler().ok_or_else(|| {
            ControllerError::invalid_configuration(
                "scheduler",
                "deferred prunes need a scheduler",
                None,
            )
        })?;
        let run_at = TimeDelta::from_std(request.delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .ok_or_else(|| {
                ControllerError::invalid_configuration(
                    "delay",
                    "prune delay out of range",
                    Some(format!("{}s", request.delay.as_secs())),
                )
            })?;
        let job = DeferredPrune {
            method: self.method(),
            file_path: request.file_path.to_string(),
            source: source.clone(),
            check_endpoint: request.check_endpoint.cloned(),
            older_than_days: request.older_than_days,
            run_at,
            flow_run_name: format!("prune_from_{}", source.name()),
            deployment: self.method().deployment_name(),
        };
        match scheduler.schedule(&job).await {
            Ok(run_id) => {
                info!(
                    run_id = %run_id,
                    deployment = %job.deployment,
                    source = source.name(),
                    check_endpoint = request.describe_check(),
                    file_path = request.file_path,
                    run_at = %run_at,
                    "prune scheduled"
                );
                Ok(true)
            }
            Err(err) => {
                warn!(
                    deployment = %job.deployment,
                    source = source.name(),
                    file_path = request.file_path,
                    error = %err,
                    "prune scheduling failed"
                );
                Ok(false)
            }
        }
    }

    async fn lookup(&self, endpoint: &Endpoint, file_path: &str) -> ControllerResult<Lookup> {
        let transfer = self.ctx().optional_transfer_backend();
        locate(endpoint, file_path, transfer.as_deref()).await
    }

    /// Steps 1 and 2 of the safe prune for endpoints inspectable from this host.
    async fn require_present(
        &self,
        endpoint: &Endpoint,
        file_path: &str,
        reason: &'static str,
    ) -> ControllerResult<Option<Located>> {
        match self.lookup(endpoint, file_path).await? {
            Lookup::Found(found) => Ok(Some(found)),
            Lookup::Missing => Err(ControllerError::precondition(
                endpoint.name(),
                endpoint.full_path(file_path),
                reason,
            )),
            Lookup::Failed => Ok(None),
        }
    }

    async fn prune_checked(
        &self,
        request: &PruneRequest<'_>,
        source: &Endpoint,
    ) -> ControllerResult<bool> {
        let Some(found) = self
            .require_present(source, request.file_path, SOURCE_MISSING)
            .await?
        else {
            return Ok(false);
        };
        if let Some(check) = request.check_endpoint
            && self
                .require_present(check, request.file_path, CHECK_MISSING)
                .await?
                .is_none()
        {
            return Ok(false);
        }
        if let Some(days) = request.older_than_days
            && !old_enough(&found, days)
        {
            info!(
                source = source.name(),
                file_path = request.file_path,
                older_than_days = days,
                modified = ?found.modified,
                "prune skipped: data is not old enough"
            );
            return Ok(false);
        }

        match (self, source) {
            (Self::ManagedTransfer { ctx, backend }, Endpoint::ManagedTransfer(collection)) => {
                let path = collection.full_path(request.file_path);
                let submission = DeleteSubmission {
                    endpoint: collection.uuid.clone(),
                    label: format!("prune_{}", label_for(request.file_path)),
                    recursive: true,
                    paths: vec![path.clone()],
                };
                let task_id = match backend.submit_delete(&submission).await {
                    Ok(task_id) => task_id,
                    Err(err) => {
                        warn!(
                            source = source.name(),
                            path = %path,
                            error = %err,
                            "delete submission failed"
                        );
                        return Ok(false);
                    }
                };
                info!(
                    task_id = %task_id,
                    source = source.name(),
                    path = %path,
                    "delete submitted"
                );
                let policy = ctx.config().transfer.poll_policy();
                wait_for_task(backend.as_ref(), &task_id, policy).await
            }
            (Self::FileSystem { .. }, Endpoint::FileSystem(_)) => {
                let path = source.full_path(request.file_path);
                let removed = if found.is_dir {
                    fs::remove_dir_all(&path).await
                } else {
                    fs::remove_file(&path).await
                };
                Ok(match removed {
                    Ok(()) => true,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => true,
                    Err(err) => {
                        warn!(
                            source = source.name(),
                            path = %path,
                            error = %err,
                            "delete failed"
                        );
                        false
                    }
                })
            }
            _ => Ok(false),
        }
    }

    async fn prune_archive(
        &self,
        jobs: &ArchiveTransferController,
        request: &PruneRequest<'_>,
        source: &Endpoint,
    ) -> ControllerResult<bool> {
        if let Some(days) = request.older_than_days {
            warn!(
                source = source.name(),
                file_path = request.file_path,
                older_than_days = days,
                "archive prunes cannot check data age; skipping"
            );
            return Ok(false);
        }
        let target = source.full_path(request.file_path);
        let mut body = format!(
            "if ! hsi -q ls {target} >/dev/null 2>&1; then\n  \
             echo \"missing at source: {target}\"\n  \
             exit {EXIT_SOURCE_MISSING}\n\
             fi\n",
            target = shell_quote(&target),
        );
        if let Some(check) = request.check_endpoint {
            let checked = shell_quote(&check.full_path(request.file_path));
            let test = match check {
                Endpoint::FileSystem(_) => format!("[ -e {checked} ]"),
                Endpoint::Archive(_) => format!("hsi -q ls {checked} >/dev/null 2>&1"),
                Endpoint::ManagedTransfer(_) => {
                    if self
                        .require_present(check, request.file_path, CHECK_MISSING)
                        .await?
                        .is_none()
                    {
                        return Ok(false);
                    }
                    String::new()
                }
            };
            if !test.is_empty() {
                body.push_str(&format!(
                    "if ! {test}; then\n  \
                     echo \"missing at check endpoint: {checked}\"\n  \
                     exit {EXIT_CHECK_MISSING}\n\
                     fi\n"
                ));
            }
        }
        body.push_str(&format!("hsi -q rm -R {}\n", shell_quote(&target)));
        let script = jobs
            .directives(&format!("prune_{}", request.file_path))
            .script(&body);

        match jobs.submit_job(&script).await {
            Ok(JobOutcome::Completed { job_id }) => {
                info!(job_id = %job_id, path = %target, "archive delete finished");
                Ok(true)
            }
            Ok(JobOutcome::Failed {
                exit_code: Some(EXIT_SOURCE_MISSING),
                ..
            }) => Err(ControllerError::precondition(source.name(), target, SOURCE_MISSING)),
            Ok(JobOutcome::Failed {
                exit_code: Some(EXIT_CHECK_MISSING),
                ..
            }) => {
                let check = request.check_endpoint.map_or_else(String::new, |check| {
                    check.full_path(request.file_path)
                });
                Err(ControllerError::precondition(
                    request.describe_check(),
                    check,
                    CHECK_MISSING,
                ))
            }
            Ok(JobOutcome::Failed {
                job_id,
                state,
                exit_code,
            }) => {
                warn!(
                    job_id = %job_id,
                    state = ?state,
                    exit_code = ?exit_code,
                    path = %target,
                    "archive delete failed"
                );
                Ok(false)
            }
            Ok(JobOutcome::TimedOut { job_id, waited }) => {
                warn!(
                    job_id = %job_id,
                    waited_secs = waited.as_secs(),
                    path = %target,
                    "archive delete still running after wait budget"
                );
                Ok(false)
            }
            Err(err) => {
                warn!(path = %target, error = %err, "archive delete job failed");
                Ok(false)
            }
        }
    }
}

fn label_for(file_path: &str) -> String {
    Path::new(file_path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map_or_else(|| "path".to_string(), sanitize_name)
}

fn old_enough(found: &Located, days: u32) -> bool {
    let Some(modified) = found.modified else {
        return false;
    };
    let age = Utc::now().signed_duration_since(modified);
    age >= TimeDelta::days(i64::from(days))
}
