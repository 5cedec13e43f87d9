//! Errors raised while constructing service clients.
//!
//! Request-time failures are reported as [`beamxfer_core::BackendError`] so controllers see
//! one error type regardless of the adapter.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for client construction.
pub type ClientResult<T> = Result<T, ClientError>;

/// Client construction failures.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A configured base URL did not parse.
    #[error("invalid service url")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Underlying parse error.
        source: url::ParseError,
    },
    /// The HTTP client could not be built.
    #[error("failed to build http client")]
    HttpClient {
        /// Underlying reqwest error.
        source: reqwest::Error,
    },
    /// A required environment variable was not set.
    #[error("required environment variable is not set")]
    MissingEnv {
        /// Variable name.
        name: &'static str,
    },
    /// A credential file could not be read.
    #[error("failed to read credential file")]
    CredentialFile {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// The private key was not a usable RSA PEM key.
    #[error("invalid signing key")]
    SigningKey {
        /// Underlying key error.
        source: jsonwebtoken::errors::Error,
    },
}
