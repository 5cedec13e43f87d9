//! Transfer controller selection.

use beamxfer_core::{ControllerResult, TransferMethod};

use crate::archive::{ArchiveDirection, ArchiveTransferController};
use crate::context::ControllerContext;
use crate::local::LocalCopyController;
use crate::managed::ManagedTransferController;
use crate::request::{TransferOutcome, TransferRequest};

/// Machine label used for metrics when the configuration names none.
const UNKNOWN_MACHINE: &str = "unknown";

/// One transfer strategy per endpoint pairing.
pub enum TransferController {
    /// Copy between mounted paths.
    LocalCopy(LocalCopyController),
    /// Managed collection to managed collection.
    ManagedTransfer(ManagedTransferController),
    /// Into or out of the tape archive.
    Archive(ArchiveTransferController),
}

impl TransferController {
    /// Method this controller implements.
    #[must_use]
    pub const fn method(&self) -> TransferMethod {
        match self {
            Self::LocalCopy(_) => TransferMethod::LocalCopy,
            Self::ManagedTransfer(_) => TransferMethod::ManagedTransfer,
            Self::Archive(controller) => controller.direction().method(),
        }
    }

    /// Copy the request's path; `true` on success.
    ///
    /// # Errors
    ///
    /// Only the managed variant fails, with [`beamxfer_core::ControllerError::Transfer`].
    pub async fn copy(&self, request: &TransferRequest<'_>) -> ControllerResult<bool> {
        match self {
            Self::LocalCopy(controller) => controller.copy(request).await,
            Self::ManagedTransfer(controller) => controller.copy(request).await,
            Self::Archive(controller) => controller.copy(request).await,
        }
    }

    /// Copy the request's path and report the task or job that did it.
    ///
    /// # Errors
    ///
    /// Same as [`TransferController::copy`].
    pub async fn transfer(
        &self,
        request: &TransferRequest<'_>,
    ) -> ControllerResult<TransferOutcome> {
        match self {
            Self::LocalCopy(controller) => controller.transfer(request).await,
            Self::ManagedTransfer(controller) => controller.transfer(request).await,
            Self::Archive(controller) => controller.transfer(request).await,
        }
    }
}

/// Build the transfer controller for `method`.
///
/// # Errors
///
/// Returns [`beamxfer_core::ControllerError::InvalidConfiguration`] when the backend
/// `method` needs is not in `ctx`.
pub fn get_transfer_controller(
    method: TransferMethod,
    ctx: &ControllerContext,
) -> ControllerResult<TransferController> {
    let config = ctx.config();
    Ok(match method {
        TransferMethod::LocalCopy => TransferController::LocalCopy(LocalCopyController::new(
            config.transfer.local_copy_program.clone(),
        )),
        TransferMethod::ManagedTransfer => {
            let mut controller = ManagedTransferController::new(
                ctx.transfer_backend()?,
                config.transfer.poll_policy(),
            );
            if let Some(sink) = ctx.metrics() {
                let machine = config
                    .transfer
                    .machine_label
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_MACHINE.to_string());
                controller = controller.with_metrics(sink, machine);
            }
            TransferController::ManagedTransfer(controller)
        }
        TransferMethod::ArchiveToFileSystem | TransferMethod::FileSystemToArchive => {
            let direction = if method == TransferMethod::FileSystemToArchive {
                ArchiveDirection::ToArchive
            } else {
                ArchiveDirection::FromArchive
            };
            TransferController::Archive(ArchiveTransferController::new(
                direction,
                config.beamline_id.clone(),
                config.hpc.archive.clone(),
                ctx.batch_backend()?,
            ))
        }
    })
}
