//! Per-call transfer and prune requests.

use std::time::Duration;

use beamxfer_core::{Endpoint, StorageLocation};
use tracing::warn;

/// Copy of one endpoint-relative path between two endpoints.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    /// Endpoint-relative path of a file or directory.
    pub file_path: &'a str,
    /// Endpoint holding the data.
    pub source: Option<&'a Endpoint>,
    /// Endpoint receiving the data.
    pub destination: Option<&'a Endpoint>,
}

impl<'a> TransferRequest<'a> {
    /// Request with both endpoints present.
    #[must_use]
    pub const fn new(file_path: &'a str, source: &'a Endpoint, destination: &'a Endpoint) -> Self {
        Self {
            file_path,
            source: Some(source),
            destination: Some(destination),
        }
    }

    /// Endpoints when the request is usable; logs why it is not otherwise.
    pub(crate) fn validated(&self) -> Option<(&'a Endpoint, &'a Endpoint)> {
        if self.file_path.trim().is_empty() {
            warn!("transfer rejected: empty file path");
            return None;
        }
        match (self.source, self.destination) {
            (Some(source), Some(destination)) => Some((source, destination)),
            _ => {
                warn!(
                    file_path = self.file_path,
                    has_source = self.source.is_some(),
                    has_destination = self.destination.is_some(),
                    "transfer rejected: missing endpoint"
                );
                None
            }
        }
    }
}

/// Result of a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Whether the data arrived.
    pub succeeded: bool,
    /// Remote task or job identifier, for audit logs.
    pub task_id: Option<String>,
}

impl TransferOutcome {
    /// Failure before any remote work was started.
    #[must_use]
    pub const fn failed() -> Self {
        Self {
            succeeded: false,
            task_id: None,
        }
    }

    /// Outcome of remote work identified by `task_id`.
    #[must_use]
    pub const fn finished(succeeded: bool, task_id: String) -> Self {
        Self {
            succeeded,
            task_id: Some(task_id),
        }
    }
}

/// Deletion of one endpoint-relative path, now or after `delay`.
#[derive(Debug, Clone, Copy)]
pub struct PruneRequest<'a> {
    /// Endpoint-relative path of a file or directory.
    pub file_path: &'a str,
    /// Endpoint to delete from.
    pub source: Option<&'a Endpoint>,
    /// Endpoint that must still hold the same path.
    pub check_endpoint: Option<&'a Endpoint>,
    /// Wait before deleting; zero deletes now.
    pub delay: Duration,
    /// Only delete data last modified more than this many days ago.
    pub older_than_days: Option<u32>,
}

impl<'a> PruneRequest<'a> {
    /// Immediate prune of `file_path` from `source`.
    #[must_use]
    pub const fn new(file_path: &'a str, source: &'a Endpoint) -> Self {
        Self {
            file_path,
            source: Some(source),
            check_endpoint: None,
            delay: Duration::ZERO,
            older_than_days: None,
        }
    }

    /// Require the path to exist at `check_endpoint` before deleting.
    #[must_use]
    pub const fn check_against(mut self, check_endpoint: &'a Endpoint) -> Self {
        self.check_endpoint = Some(check_endpoint);
        self
    }

    /// Defer the prune.
    #[must_use]
    pub const fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Skip data modified within the last `days` days.
    #[must_use]
    pub const fn older_than(mut self, days: u32) -> Self {
        self.older_than_days = Some(days);
        self
    }

    pub(crate) fn validated(&self) -> Option<&'a Endpoint> {
        if self.file_path.trim().is_empty() {
            warn!("prune rejected: empty file path");
            return None;
        }
        if self.source.is_none() {
            warn!(file_path = self.file_path, "prune rejected: missing source endpoint");
        }
        self.source
    }

    pub(crate) fn describe_check(&self) -> &str {
        self.check_endpoint.map_or("", StorageLocation::name)
    }
}
