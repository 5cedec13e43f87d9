#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic, clippy::nursery)]

//! Command-line wiring for beamline data movement, pruning and reconstruction.
//!
//! Layout: `cli.rs` (argument parsing and dispatch), `bootstrap.rs` (configuration and
//! logging), `context.rs` (lazily built service clients), `pipeline.rs` (scan
//! reconstruction workflow), `error.rs`.

pub mod bootstrap;
pub mod cli;
pub mod context;
pub mod error;
pub mod pipeline;

pub use bootstrap::{init_logging, load_config};
pub use cli::run;
pub use context::{DeferredPrunes, RunContext};
pub use error::{AppError, AppResult};
pub use pipeline::{PipelineOutcome, prune_method_for, run_pipeline, transfer_method_for};
