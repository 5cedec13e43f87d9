//! # Design
//!
//! - Centralize command-level errors for bootstrap, wiring and workflows.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for command operations.
pub type AppResult<T> = Result<T, AppError>;

/// Command-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded or resolved.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: beamxfer_config::ConfigError,
    },
    /// A service client could not be built.
    #[error("client construction failed")]
    Client {
        /// Operation identifier.
        operation: &'static str,
        /// Source client error.
        source: beamxfer_clients::ClientError,
    },
    /// Logging or metrics could not be initialised.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: beamxfer_telemetry::TelemetryError,
    },
    /// A controller rejected its configuration or a precondition failed.
    #[error("controller operation failed")]
    Controller {
        /// Operation identifier.
        operation: &'static str,
        /// Source controller error.
        source: beamxfer_core::ControllerError,
    },
    /// A local file could not be read.
    #[error("filesystem operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// A JSON document could not be decoded or encoded.
    #[error("json operation failed")]
    Json {
        /// Operation identifier.
        operation: &'static str,
        /// Source JSON error.
        source: serde_json::Error,
    },
    /// The deferred prune worker panicked or was cancelled.
    #[error("deferred prune worker failed")]
    Worker {
        /// Source join error.
        source: tokio::task::JoinError,
    },
    /// The configuration has no `pipeline` section.
    #[error("pipeline settings missing")]
    MissingPipeline,
    /// A scan path had no usable folder or file stem.
    #[error("scan path is not usable")]
    InvalidScanPath {
        /// Path as given.
        file_path: String,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: beamxfer_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn client(
        operation: &'static str,
        source: beamxfer_clients::ClientError,
    ) -> Self {
        Self::Client { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: beamxfer_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn controller(
        operation: &'static str,
        source: beamxfer_core::ControllerError,
    ) -> Self {
        Self::Controller { operation, source }
    }

    pub(crate) const fn io(operation: &'static str, path: PathBuf, source: io::Error) -> Self {
        Self::Io {
            operation,
            path,
            source,
        }
    }

    pub(crate) const fn json(operation: &'static str, source: serde_json::Error) -> Self {
        Self::Json { operation, source }
    }

    /// Operation identifier, when the variant carries one.
    #[must_use]
    pub const fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Config { operation, .. }
            | Self::Client { operation, .. }
            | Self::Telemetry { operation, .. }
            | Self::Controller { operation, .. }
            | Self::Io { operation, .. }
            | Self::Json { operation, .. } => Some(*operation),
            Self::Worker { .. } | Self::MissingPipeline | Self::InvalidScanPath { .. } => None,
        }
    }
}
