#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic, clippy::nursery)]

//! Beamline configuration loading.
//!
//! Layout: `loader.rs` (layered YAML files), `expand.rs` (`$VAR` interpolation),
//! `model.rs` (typed sections and endpoint resolution), `error.rs`.

pub mod error;
pub mod expand;
pub mod loader;
pub mod model;

pub use error::{ConfigError, ConfigResult};
pub use expand::expand_env_vars;
pub use loader::{CONFIG_PATH_ENV, ConfigLoader};
pub use model::{
    AppCredentials, ArchiveSettings, BatchSettings, BeamlineConfig, ComputeSettings, HpcSettings,
    LogSettings, MetricsSettings, PipelineSettings, RetentionSettings, SchedulerSettings,
    ServiceSettings, TransferSettings,
};
