#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic, clippy::nursery)]

//! Job submission helper: batch scripts, job waits and reconstruction controllers.
//!
//! Layout: `slurm.rs` (directive rendering and quoting), `jobs.rs` (submit and wait),
//! `scan.rs` (scan path naming), `batch.rs` (batch queue reconstruction), `flow.rs`
//! (managed compute flow), `controller.rs` (site selection).

pub mod batch;
pub mod controller;
pub mod flow;
pub mod jobs;
pub mod scan;
pub mod slurm;

pub use batch::BatchQueueCompute;
pub use controller::{ComputeContext, ComputeController, ComputeSite, get_compute_controller};
pub use flow::{ManagedCompute, flow_definition};
pub use jobs::{JobOutcome, run_job, wait_for_job};
pub use scan::ScanPath;
pub use slurm::{SlurmDirectives, sanitize_name, shell_quote};
