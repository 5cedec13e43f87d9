//! # Design
//!
//! - Keep operational failures (`Ok(false)`) apart from configuration and operator errors (`Err`).
//! - Constant error messages; context travels in fields.
//! - Backend errors stay transport-agnostic so adapters can box their own sources.

use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// Result alias for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Result alias for remote backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Result alias for endpoint (de)serialization.
pub type EndpointResult<T> = Result<T, EndpointError>;

/// Remote task outcomes that must reach the caller loudly.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The remote task reported a status that will not resolve by waiting.
    #[error("remote task reported a non-retryable status")]
    NonRetryable {
        /// Remote task identifier.
        task_id: String,
        /// Advisory status reported by the backend.
        status: String,
    },
    /// The wait budget ran out while the task was still in progress.
    #[error("remote task did not finish within the wait budget")]
    TimedOut {
        /// Remote task identifier.
        task_id: String,
        /// Time spent waiting.
        waited: Duration,
        /// Last advisory status observed, if any.
        last_status: Option<String>,
    },
}

/// Errors surfaced by transfer, prune and compute controllers.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Controller selection or wiring was invalid.
    #[error("invalid controller configuration")]
    InvalidConfiguration {
        /// Setting or argument that failed.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// A remote task ended in a state the caller must see.
    #[error("transfer failed")]
    Transfer {
        /// Underlying transfer error.
        #[from]
        source: TransferError,
    },
    /// A safe-prune precondition did not hold; nothing was deleted.
    #[error("prune precondition violated")]
    PreconditionFailed {
        /// Endpoint on which the check ran.
        endpoint: String,
        /// Absolute path that was checked.
        path: String,
        /// Static reason for the failure.
        reason: &'static str,
    },
}

impl ControllerError {
    /// Build an invalid configuration error.
    #[must_use]
    pub fn invalid_configuration(
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidConfiguration {
            field,
            reason,
            value,
        }
    }

    /// Build a precondition failure for `path` on `endpoint`.
    #[must_use]
    pub fn precondition(
        endpoint: impl Into<String>,
        path: impl Into<String>,
        reason: &'static str,
    ) -> Self {
        Self::PreconditionFailed {
            endpoint: endpoint.into(),
            path: path.into(),
            reason,
        }
    }
}

/// Errors raised by remote service adapters.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request never produced a usable response.
    #[error("backend transport failure")]
    Transport {
        /// Operation that failed.
        operation: &'static str,
        /// Underlying client error.
        source: Box<dyn StdError + Send + Sync>,
    },
    /// The service answered with an error status.
    #[error("backend rejected request")]
    Rejected {
        /// Operation that failed.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Service error code when provided.
        code: Option<String>,
        /// Service error message when provided.
        message: Option<String>,
    },
    /// The response body did not match the expected shape.
    #[error("backend response could not be decoded")]
    Decode {
        /// Operation that failed.
        operation: &'static str,
        /// Description of the mismatch.
        detail: String,
    },
    /// Credentials could not be obtained.
    #[error("backend credentials unavailable")]
    Credentials {
        /// Credential source that failed.
        source_name: &'static str,
        /// Description of the failure.
        detail: String,
    },
    /// The backend does not implement the operation.
    #[error("backend operation unsupported")]
    Unsupported {
        /// Operation that is unsupported.
        operation: &'static str,
    },
}

impl BackendError {
    /// Wrap a client error as a transport failure.
    pub fn transport(
        operation: &'static str,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            operation,
            source: source.into(),
        }
    }

    /// Build a decode failure.
    pub fn decode(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::Decode {
            operation,
            detail: detail.into(),
        }
    }

    /// Whether the backend reported the target as missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Rejected { status: 404, .. })
    }
}

/// Errors raised while converting endpoints to and from plain mappings.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Serialization failed.
    #[error("endpoint could not be encoded")]
    Encode {
        /// Underlying serde error.
        source: serde_json::Error,
    },
    /// Serialization produced something other than a mapping.
    #[error("endpoint did not encode to a mapping")]
    NotAMapping,
    /// The mapping did not describe a known endpoint.
    #[error("endpoint mapping could not be decoded")]
    Decode {
        /// Underlying serde error.
        source: serde_json::Error,
    },
}
