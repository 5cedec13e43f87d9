#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic, clippy::nursery)]

//! Logging and transfer metrics for beamline data movement.
//!
//! Layout: `init.rs` (tracing subscriber), `metrics.rs` (prometheus registry),
//! `push.rs` (push gateway sink), `error.rs`.

pub mod error;
pub mod init;
pub mod metrics;
pub mod push;

pub use error::{Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::TransferMetrics;
pub use push::{PushGatewayConfig, PushGatewaySink};
