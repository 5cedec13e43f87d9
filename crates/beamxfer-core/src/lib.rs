#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic, clippy::nursery)]

//! Shared vocabulary for beamline data movement.
//!
//! Layout: `endpoint.rs` (storage locations), `method.rs` (controller selectors),
//! `backend.rs` (remote service traits and wire DTOs), `poll.rs` (poll-until primitive),
//! `error.rs` (controller and backend errors).

pub mod backend;
pub mod endpoint;
pub mod error;
pub mod method;
pub mod poll;

pub use backend::{
    BatchBackend, DeferredPrune, DeferredScheduler, DeleteSubmission, EntryKind, FlowBackend,
    FlowRunStatus, JobState, JobStatus, MetricsSink, RemoteEntry, SyncLevel, TaskSnapshot,
    TaskStatus, TransferBackend, TransferItem, TransferMetricsRecord, TransferSubmission,
};
pub use endpoint::{
    ArchiveEndpoint, Endpoint, EndpointKind, FileSystemEndpoint, ManagedTransferEndpoint,
    StorageLocation, join_endpoint_path,
};
pub use error::{
    BackendError, BackendResult, ControllerError, ControllerResult, EndpointError,
    EndpointResult, TransferError,
};
pub use method::{PruneMethod, TransferMethod};
pub use poll::{PollError, PollPolicy, Probe, poll_until};
