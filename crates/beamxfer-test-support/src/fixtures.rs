//! Endpoint and configuration fixtures.

use std::time::Duration;

use beamxfer_config::{BeamlineConfig, ConfigResult};
use beamxfer_core::{
    ArchiveEndpoint, Endpoint, FileSystemEndpoint, ManagedTransferEndpoint, PollPolicy,
};

/// Beamline configuration shared by controller and workflow suites.
///
/// Managed collections: `data832_raw`, `data832_scratch`, `nersc832_alsdev_raw`,
/// `nersc832_alsdev_scratch`. Filesystem: `nersc832_cfs`. Archive: `hpss_als`.
pub const SAMPLE_CONFIG: &str = r#"
beamline_id: "832"
globus:
  globus_endpoints:
    data832_raw:
      root_path: /data/raw
      uri: data832.lbl.gov
      uuid: 00000000-0000-0000-0000-000000000832
    data832_scratch:
      root_path: /data/scratch/globus_share
      uri: data832.lbl.gov
      uuid: 00000000-0000-0000-0000-000000000833
    nersc832_alsdev_raw:
      root_path: /global/cfs/cdirs/als/data_mover/8.3.2/raw
      uri: nersc.gov
      uuid: 00000000-0000-0000-0000-0000000000a1
    nersc832_alsdev_scratch:
      root_path: /pscratch/sd/a/alsdev/8.3.2/scratch
      uri: nersc.gov
      uuid: 00000000-0000-0000-0000-0000000000a2
  globus_apps:
    als_transfer:
      client_id: test-client
      client_secret: test-secret
filesystem_endpoints:
  nersc832_cfs:
    root_path: /global/cfs/cdirs/als/data_mover/8.3.2
archive_endpoints:
  hpss_als:
    root_path: /home/a/alsdev/data_mover
transfer:
  poll_interval_secs: 1
  max_wait_secs: 30
  machine_label: nersc
retention:
  data832_raw: 14
  nersc832_alsdev_scratch: 7
hpc:
  batch:
    poll_interval_secs: 1
    max_wait_secs: 60
  archive:
    poll_interval_secs: 1
    max_wait_secs: 60
pipeline:
  source: data832_raw
  compute_raw: nersc832_alsdev_raw
  compute_scratch: nersc832_alsdev_scratch
  destination: data832_scratch
"#;

/// Parse [`SAMPLE_CONFIG`].
///
/// # Errors
///
/// Returns an error if the sample no longer matches the configuration schema.
pub fn sample_config() -> ConfigResult<BeamlineConfig> {
    BeamlineConfig::from_yaml_str(SAMPLE_CONFIG)
}

/// Managed collection endpoint.
#[must_use]
pub fn managed_endpoint(name: &str, root_path: &str, uuid: &str) -> Endpoint {
    ManagedTransferEndpoint::new(name, root_path, uuid, "test.example").into()
}

/// Local filesystem endpoint.
#[must_use]
pub fn filesystem_endpoint(name: &str, root_path: &str) -> Endpoint {
    FileSystemEndpoint::new(name, root_path).into()
}

/// Tape archive endpoint.
#[must_use]
pub fn archive_endpoint(name: &str, root_path: &str) -> Endpoint {
    ArchiveEndpoint::new(name, root_path).into()
}

/// Poll policy for paused-clock tests.
#[must_use]
pub const fn quick_poll() -> PollPolicy {
    PollPolicy::new(Duration::from_secs(1), Duration::from_secs(10))
}
