#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic, clippy::nursery)]

//! Shared test helpers used across controller and workflow suites.
//! Layout: fixtures.rs (endpoints and configuration), fakes.rs (in-memory backends).

pub mod fakes;
pub mod fixtures;

pub use fakes::{
    FakeBatchBackend, FakeFlowBackend, FakeTransferBackend, RecordingMetricsSink,
    RecordingScheduler, StartedRun,
};
