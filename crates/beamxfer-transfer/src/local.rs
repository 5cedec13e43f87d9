//! Copies between paths mounted on the local host.
//!
//! # Design
//! - The copy program writes into a hidden staging sibling of the destination.
//! - Only a complete copy reaches the destination; failures remove the staging path.
//! - A staged directory is merged into an existing destination directory, so entries
//!   already there and absent from the source are kept.
//! - Any other existing destination is moved aside and restored if the swap fails.

use std::io;
use std::path::{Path, PathBuf};

use beamxfer_core::{ControllerResult, StorageLocation};
use tokio::fs;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::request::{TransferOutcome, TransferRequest};

/// Recursive copy through an external program (`cp -r` by default).
#[derive(Debug, Clone)]
pub struct LocalCopyController {
    program: String,
}

impl LocalCopyController {
    /// Controller running `program -r <src> <dst>`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Copy the request's path; `true` when the copy landed at the destination.
    ///
    /// # Errors
    ///
    /// Never fails; IO problems are logged and reported as `false`.
    pub async fn copy(&self, request: &TransferRequest<'_>) -> ControllerResult<bool> {
        Ok(self.transfer(request).await?.succeeded)
    }

    /// Copy the request's path and report the outcome.
    ///
    /// # Errors
    ///
    /// Never fails; IO problems are logged and reported as a failed outcome.
    pub async fn transfer(
        &self,
        request: &TransferRequest<'_>,
    ) -> ControllerResult<TransferOutcome> {
        let Some((source, destination)) = request.validated() else {
            return Ok(TransferOutcome::failed());
        };
        let source_path = source.full_path(request.file_path);
        let destination_path = PathBuf::from(destination.full_path(request.file_path));
        let started = Instant::now();
        info!(
            source = source.name(),
            destination = destination.name(),
            source_path = %source_path,
            destination_path = %destination_path.display(),
            "local copy started"
        );

        let succeeded = match self.copy_into_place(&source_path, &destination_path).await {
            Ok(true) => true,
            Ok(false) => false,
            Err(err) => {
                warn!(
                    destination_path = %destination_path.display(),
                    error = %err,
                    "local copy failed"
                );
                false
            }
        };
        info!(
            source = source.name(),
            destination = destination.name(),
            elapsed_ms = started.elapsed().as_millis(),
            succeeded,
            "local copy finished"
        );
        Ok(TransferOutcome {
            succeeded,
            task_id: None,
        })
    }

    async fn copy_into_place(&self, source: &str, destination: &Path) -> io::Result<bool> {
        let invalid = |detail: &str| io::Error::new(io::ErrorKind::InvalidInput, detail);
        let parent = destination
            .parent()
            .ok_or_else(|| invalid("destination has no parent"))?;
        let name = destination
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| invalid("destination has no name"))?;
        fs::create_dir_all(parent).await?;
        let staging = parent.join(format!(".{name}.partial-{}", Uuid::new_v4().simple()));

        let status = match Command::new(&self.program)
            .arg("-r")
            .arg(source)
            .arg(&staging)
            .status()
            .await
        {
            Ok(status) => status,
            Err(err) => {
                remove_path(&staging).await;
                return Err(err);
            }
        };
        if !status.success() {
            warn!(
                program = %self.program,
                exit_code = ?status.code(),
                source_path = source,
                "copy program exited unsuccessfully"
            );
            remove_path(&staging).await;
            return Ok(false);
        }

        let placed = self.place(&staging, destination, parent, name).await;
        remove_path(&staging).await;
        placed
    }

    async fn place(
        &self,
        staging: &Path,
        destination: &Path,
        parent: &Path,
        name: &str,
    ) -> io::Result<bool> {
        let existing = match fs::symlink_metadata(destination).await {
            Ok(existing) => existing,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                fs::rename(staging, destination).await?;
                return Ok(true);
            }
            Err(err) => return Err(err),
        };
        if existing.is_dir() && fs::symlink_metadata(staging).await?.is_dir() {
            return self.merge(staging, destination).await;
        }

        let previous = parent.join(format!(".{name}.previous-{}", Uuid::new_v4().simple()));
        fs::rename(destination, &previous).await?;
        if let Err(err) = fs::rename(staging, destination).await {
            if let Err(restore) = fs::rename(&previous, destination).await {
                warn!(
                    destination_path = %destination.display(),
                    previous_path = %previous.display(),
                    error = %restore,
                    "previous destination could not be restored"
                );
            }
            return Err(err);
        }
        remove_path(&previous).await;
        Ok(true)
    }

    async fn merge(&self, staging: &Path, destination: &Path) -> io::Result<bool> {
        let status = Command::new(&self.program)
            .arg("-r")
            .arg(staging.join("."))
            .arg(destination)
            .status()
            .await?;
        if !status.success() {
            warn!(
                program = %self.program,
                exit_code = ?status.code(),
                destination_path = %destination.display(),
                "merge into existing destination failed"
            );
        }
        Ok(status.success())
    }
}

async fn remove_existing(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path).await?.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    }
}

async fn remove_path(path: &Path) {
    match remove_existing(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "staging cleanup failed"),
    }
}
