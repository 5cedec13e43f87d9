#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic, clippy::nursery)]

//! Transfer and prune controllers over local, managed and archive endpoints.
//!
//! Layout: `request.rs` (per-call requests and outcomes), `context.rs` (injected
//! backends), `local.rs`, `managed.rs` and `archive.rs` (transfer strategies),
//! `controller.rs` (transfer factory), `prune.rs` (safe prunes and their factory),
//! `scheduler.rs` (in-process deferred prunes). `remote.rs`, `locate.rs` and `task.rs`
//! are internal lookup and wait helpers.

pub mod archive;
pub mod context;
pub mod controller;
pub mod local;
mod locate;
pub mod managed;
pub mod prune;
mod remote;
pub mod request;
pub mod scheduler;
mod task;

pub use archive::{ArchiveDirection, ArchiveTransferController};
pub use context::ControllerContext;
pub use controller::{TransferController, get_transfer_controller};
pub use local::LocalCopyController;
pub use managed::ManagedTransferController;
pub use prune::{PruneController, get_prune_controller, run_deferred};
pub use request::{PruneRequest, TransferOutcome, TransferRequest};
pub use scheduler::{LocalScheduler, spawn_prune_worker};
