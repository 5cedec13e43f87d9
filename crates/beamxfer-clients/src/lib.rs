#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic, clippy::nursery)]

//! HTTP adapters for the remote services behind the controller traits.
//!
//! Layout: `session.rs` (request plumbing), `auth.rs` (client credentials tokens),
//! `transfer.rs` (managed transfer), `flows.rs` (managed flows), `sfapi.rs` (batch jobs
//! through the superfacility API), `prefect.rs` (deferred prune scheduling), `error.rs`.

pub mod auth;
pub mod error;
pub mod flows;
pub mod prefect;
mod session;
pub mod sfapi;
pub mod transfer;

pub use auth::{AccessTokenSource, ClientCredentials, StaticToken};
pub use error::{ClientError, ClientResult};
pub use flows::GlobusFlowsClient;
pub use prefect::PrefectScheduler;
pub use sfapi::{SfapiClient, SfapiCredentials};
pub use transfer::{GlobusTransferClient, TRANSFER_SCOPE};
