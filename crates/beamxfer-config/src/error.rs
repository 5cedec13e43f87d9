//! Configuration loading and validation errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Structured errors emitted while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration file was supplied.
    #[error("no configuration layers supplied")]
    NoLayers,

    /// A configuration file could not be read.
    #[error("failed to read configuration file '{}'", path.display())]
    Read {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },

    /// A configuration layer was not valid YAML.
    #[error("failed to parse configuration file '{}'", path.display())]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },

    /// The merged document did not match the configuration schema.
    #[error("configuration does not match the expected schema")]
    Schema {
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },

    /// Environment interpolation could not be prepared.
    #[error("environment interpolation pattern failed to compile")]
    Pattern {
        /// Underlying regex error.
        source: regex::Error,
    },

    /// Field contained an invalid value.
    #[error("invalid value for '{field}' in '{section}': {message}")]
    InvalidField {
        /// Section that failed validation.
        section: String,
        /// Field that failed validation.
        field: String,
        /// Human-readable error description.
        message: String,
    },

    /// An endpoint name was not present in the endpoint table.
    #[error("unknown endpoint '{name}'")]
    UnknownEndpoint {
        /// Requested endpoint name.
        name: String,
    },

    /// An application credential name was not configured.
    #[error("unknown application credentials '{name}'")]
    UnknownApp {
        /// Requested application name.
        name: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        section: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            section: section.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}
