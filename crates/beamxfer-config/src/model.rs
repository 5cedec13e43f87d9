//! Typed configuration sections and endpoint resolution.
//!
//! # Design
//! - `ConfigDocument` mirrors the YAML layout; `BeamlineConfig` is the validated view.
//! - Every section has defaults so a minimal file only needs endpoints.
//! - Endpoint names are unique across the managed, filesystem and archive tables.

use std::collections::BTreeMap;
use std::time::Duration;

use beamxfer_core::{
    ArchiveEndpoint, Endpoint, FileSystemEndpoint, ManagedTransferEndpoint, PollPolicy,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Application client credentials for the managed transfer service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCredentials {
    /// OAuth client identifier.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
}

/// Transfer wait and local copy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Seconds between task status checks.
    pub poll_interval_secs: u64,
    /// Wait budget for a transfer or delete task.
    pub max_wait_secs: u64,
    /// Program used by the local copy controller, invoked as `<program> -r <src> <dst>`.
    pub local_copy_program: String,
    /// Machine label attached to transfer metrics.
    pub machine_label: Option<String>,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_wait_secs: 600,
            local_copy_program: "cp".to_string(),
            machine_label: None,
        }
    }
}

impl TransferSettings {
    /// Poll policy for managed transfer and delete tasks.
    #[must_use]
    pub const fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.max_wait_secs),
        )
    }
}

/// Days to keep data at each endpoint before pruning, keyed by endpoint name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetentionSettings {
    /// Retention in days per endpoint.
    pub days: BTreeMap<String, u32>,
}

impl RetentionSettings {
    /// Prune delay for an endpoint; zero when no retention is configured.
    #[must_use]
    pub fn delay_for(&self, endpoint: &str) -> Duration {
        self.days
            .get(endpoint)
            .map_or(Duration::ZERO, |days| Duration::from_secs(u64::from(*days) * 86_400))
    }
}

/// Batch queue reconstruction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Quality of service.
    pub qos: String,
    /// Allocation account.
    pub account: String,
    /// Node constraint.
    pub constraint: String,
    /// Node count.
    pub nodes: u32,
    /// Tasks per node.
    pub ntasks_per_node: u32,
    /// CPUs per task.
    pub cpus_per_task: u32,
    /// Wall clock limit for reconstruction.
    pub time_limit: String,
    /// Wall clock limit for multi-resolution conversion.
    pub multires_time_limit: String,
    /// Request exclusive nodes.
    pub exclusive: bool,
    /// Container image.
    pub image: String,
    /// Scratch root mounted into the container.
    pub scratch_root: String,
    /// Directory holding the reconstruction scripts.
    pub scripts_dir: String,
    /// Reconstruction entry point.
    pub recon_script: String,
    /// Multi-resolution entry point.
    pub multires_script: String,
    /// Seconds between job status checks.
    pub poll_interval_secs: u64,
    /// Wait budget for a job, including queue time.
    pub max_wait_secs: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            qos: "preempt".to_string(),
            account: "als".to_string(),
            constraint: "cpu".to_string(),
            nodes: 1,
            ntasks_per_node: 1,
            cpus_per_task: 64,
            time_limit: "00:15:00".to_string(),
            multires_time_limit: "00:15:00".to_string(),
            exclusive: true,
            image: "registry.nersc.gov/als/tomorecon_nersc_mpi_hdf5:latest".to_string(),
            scratch_root: "/pscratch/sd/a/alsdev/8.3.2".to_string(),
            scripts_dir: "/global/cfs/cdirs/als/data_mover/8.3.2/tomography_scripts".to_string(),
            recon_script: "sfapi_reconstruction.py".to_string(),
            multires_script: "tiff_to_zarr.py".to_string(),
            poll_interval_secs: 30,
            max_wait_secs: 4 * 3600,
        }
    }
}

impl BatchSettings {
    /// Poll policy for batch jobs.
    #[must_use]
    pub const fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.max_wait_secs),
        )
    }
}

/// Managed compute (flow) reconstruction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeSettings {
    /// Compute endpoint that runs the functions.
    pub endpoint_id: String,
    /// Registered reconstruction function.
    pub reconstruction_function_id: String,
    /// Registered multi-resolution function.
    pub multires_function_id: String,
    /// Pre-deployed flow; a new flow is deployed per run when absent.
    #[serde(default)]
    pub flow_id: Option<String>,
    /// Allocation root on the compute site.
    pub allocation_root: String,
    /// Endpoint holding reconstruction output on the compute site.
    pub scratch_endpoint: String,
    /// Endpoint receiving reconstruction output.
    pub results_endpoint: String,
    /// Reconstruction entry point.
    #[serde(default = "default_globus_recon_script")]
    pub recon_script: String,
    /// Multi-resolution entry point.
    #[serde(default = "default_multires_script")]
    pub multires_script: String,
    /// Seconds between run status checks.
    #[serde(default = "default_compute_interval")]
    pub poll_interval_secs: u64,
    /// Wait budget for a run.
    #[serde(default = "default_compute_budget")]
    pub max_wait_secs: u64,
}

fn default_globus_recon_script() -> String {
    "globus_reconstruction.py".to_string()
}

fn default_multires_script() -> String {
    "tiff_to_zarr.py".to_string()
}

const fn default_compute_interval() -> u64 {
    10
}

const fn default_compute_budget() -> u64 {
    2 * 3600
}

impl ComputeSettings {
    /// Poll policy for flow runs.
    #[must_use]
    pub const fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.max_wait_secs),
        )
    }
}

/// Tape archive job settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Root directory for archive job logs; the beamline id is appended.
    pub log_root: String,
    /// Quality of service.
    pub qos: String,
    /// Allocation account.
    pub account: String,
    /// Node constraint.
    pub constraint: String,
    /// Wall clock limit.
    pub time_limit: String,
    /// Filesystem licenses requested.
    pub licenses: String,
    /// Memory request.
    pub mem: String,
    /// Seconds between job status checks.
    pub poll_interval_secs: u64,
    /// Wait budget for an archive job.
    pub max_wait_secs: u64,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            log_root: "/global/cfs/cdirs/als/data_mover/hpss_transfer_logs".to_string(),
            qos: "xfer".to_string(),
            account: "als".to_string(),
            constraint: "cron".to_string(),
            time_limit: "12:00:00".to_string(),
            licenses: "SCRATCH".to_string(),
            mem: "20GB".to_string(),
            poll_interval_secs: 60,
            max_wait_secs: 12 * 3600,
        }
    }
}

impl ArchiveSettings {
    /// Poll policy for archive jobs.
    #[must_use]
    pub const fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.max_wait_secs),
        )
    }
}

/// Compute-side settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HpcSettings {
    /// Batch queue reconstruction.
    pub batch: BatchSettings,
    /// Managed compute reconstruction.
    pub compute: Option<ComputeSettings>,
    /// Tape archive jobs.
    pub archive: ArchiveSettings,
}

/// Remote service locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Managed transfer API base URL.
    pub transfer_api: String,
    /// Managed flows API base URL.
    pub flows_api: String,
    /// Auth service base URL.
    pub auth_api: String,
    /// Application credentials used for transfer and flow calls.
    pub transfer_app: String,
    /// Superfacility API base URL.
    pub sfapi_api: String,
    /// Superfacility token endpoint.
    pub sfapi_token_url: String,
    /// Compute system addressed through the superfacility API.
    pub sfapi_machine: String,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            transfer_api: "https://transfer.api.globus.org/v0.10".to_string(),
            flows_api: "https://flows.globus.org".to_string(),
            auth_api: "https://auth.globus.org".to_string(),
            transfer_app: "als_transfer".to_string(),
            sfapi_api: "https://api.nersc.gov/api/v1.2".to_string(),
            sfapi_token_url: "https://oidc.nersc.gov/c2id/token".to_string(),
            sfapi_machine: "perlmutter".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl ServiceSettings {
    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Deferred prune scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Workflow engine API; deferred prunes run in-process when absent.
    pub api_url: Option<String>,
    /// Bearer token for the workflow engine API.
    pub api_key: Option<String>,
}

/// Transfer metrics push settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Enable the metrics side channel.
    pub enabled: bool,
    /// Push gateway URL; falls back to the environment.
    pub pushgateway_url: Option<String>,
    /// Job label; falls back to the environment.
    pub job_name: Option<String>,
    /// Instance label; falls back to the environment.
    pub instance: Option<String>,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    /// `json` or `pretty`; inferred from the build when absent.
    pub format: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
        }
    }
}

/// Reconstruction pipeline wiring, by endpoint name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Beamline endpoint holding new raw data.
    pub source: String,
    /// Raw data landing zone at the compute site.
    pub compute_raw: String,
    /// Reconstruction output at the compute site.
    pub compute_scratch: String,
    /// Beamline endpoint receiving reconstructions.
    pub destination: String,
    /// `batch_queue` or `managed_compute`.
    #[serde(default = "default_site")]
    pub site: String,
    /// Build the multi-resolution copy after reconstruction.
    #[serde(default = "default_true")]
    pub multi_resolution: bool,
}

fn default_site() -> String {
    "batch_queue".to_string()
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct ManagedEndpointDocument {
    uuid: String,
    uri: String,
    root_path: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PathEndpointDocument {
    root_path: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct GlobusDocument {
    globus_endpoints: BTreeMap<String, ManagedEndpointDocument>,
    globus_apps: BTreeMap<String, AppCredentials>,
}

/// Raw YAML layout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ConfigDocument {
    beamline_id: Option<String>,
    globus: GlobusDocument,
    filesystem_endpoints: BTreeMap<String, PathEndpointDocument>,
    archive_endpoints: BTreeMap<String, PathEndpointDocument>,
    transfer: TransferSettings,
    retention: RetentionSettings,
    hpc: HpcSettings,
    services: ServiceSettings,
    scheduler: SchedulerSettings,
    metrics: MetricsSettings,
    logging: LogSettings,
    pipeline: Option<PipelineSettings>,
}

/// Validated configuration for one workflow invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeamlineConfig {
    /// Beamline identifier used to namespace archive paths and logs.
    pub beamline_id: String,
    /// Endpoint table keyed by configuration name.
    pub endpoints: BTreeMap<String, Endpoint>,
    /// Application credentials keyed by name.
    pub apps: BTreeMap<String, AppCredentials>,
    /// Transfer settings.
    pub transfer: TransferSettings,
    /// Retention (prune delay) table.
    pub retention: RetentionSettings,
    /// Compute settings.
    pub hpc: HpcSettings,
    /// Remote service locations.
    pub services: ServiceSettings,
    /// Deferred prune scheduler.
    pub scheduler: SchedulerSettings,
    /// Transfer metrics.
    pub metrics: MetricsSettings,
    /// Logging.
    pub logging: LogSettings,
    /// Reconstruction pipeline wiring.
    pub pipeline: Option<PipelineSettings>,
}

impl BeamlineConfig {
    /// Parse and validate a single YAML document without interpolation.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not match the schema or fails validation.
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let document: ConfigDocument =
            serde_yaml::from_str(yaml).map_err(|source| ConfigError::Schema { source })?;
        document.resolve()
    }

    /// Look up an endpoint by configuration name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEndpoint`] when the name is not configured.
    pub fn endpoint(&self, name: &str) -> ConfigResult<&Endpoint> {
        self.endpoints
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEndpoint {
                name: name.to_string(),
            })
    }

    /// Look up application credentials by name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownApp`] when the name is not configured.
    pub fn app(&self, name: &str) -> ConfigResult<&AppCredentials> {
        self.apps.get(name).ok_or_else(|| ConfigError::UnknownApp {
            name: name.to_string(),
        })
    }

    /// Credentials named by `services.transfer_app`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownApp`] when those credentials are missing.
    pub fn transfer_app(&self) -> ConfigResult<&AppCredentials> {
        self.app(&self.services.transfer_app)
    }
}

impl ConfigDocument {
    pub(crate) fn resolve(self) -> ConfigResult<BeamlineConfig> {
        let beamline_id = self
            .beamline_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ConfigError::invalid("root", "beamline_id", "must be set"))?;

        let mut endpoints = BTreeMap::new();
        for (key, doc) in self.globus.globus_endpoints {
            validate_root("globus_endpoints", &key, &doc.root_path)?;
            if doc.uuid.trim().is_empty() {
                return Err(ConfigError::invalid("globus_endpoints", key, "uuid must be set"));
            }
            let name = doc.name.unwrap_or_else(|| key.clone());
            let endpoint = ManagedTransferEndpoint::new(name, doc.root_path, doc.uuid, doc.uri);
            insert_unique(&mut endpoints, "globus_endpoints", key, endpoint.into())?;
        }
        for (key, doc) in self.filesystem_endpoints {
            validate_root("filesystem_endpoints", &key, &doc.root_path)?;
            let name = doc.name.unwrap_or_else(|| key.clone());
            let endpoint = FileSystemEndpoint::new(name, doc.root_path);
            insert_unique(&mut endpoints, "filesystem_endpoints", key, endpoint.into())?;
        }
        for (key, doc) in self.archive_endpoints {
            validate_root("archive_endpoints", &key, &doc.root_path)?;
            let name = doc.name.unwrap_or_else(|| key.clone());
            let endpoint = ArchiveEndpoint::new(name, doc.root_path);
            insert_unique(&mut endpoints, "archive_endpoints", key, endpoint.into())?;
        }

        if self.transfer.poll_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "transfer",
                "poll_interval_secs",
                "must be greater than zero",
            ));
        }
        for name in self.retention.days.keys() {
            if !endpoints.contains_key(name) {
                return Err(ConfigError::invalid(
                    "retention",
                    name.as_str(),
                    "names an unknown endpoint",
                ));
            }
        }
        if let Some(pipeline) = &self.pipeline {
            for (field, name) in [
                ("source", &pipeline.source),
                ("compute_raw", &pipeline.compute_raw),
                ("compute_scratch", &pipeline.compute_scratch),
                ("destination", &pipeline.destination),
            ] {
                if !endpoints.contains_key(name) {
                    return Err(ConfigError::invalid(
                        "pipeline",
                        field,
                        format!("unknown endpoint '{name}'"),
                    ));
                }
            }
        }

        Ok(BeamlineConfig {
            beamline_id,
            endpoints,
            apps: self.globus.globus_apps,
            transfer: self.transfer,
            retention: self.retention,
            hpc: self.hpc,
            services: self.services,
            scheduler: self.scheduler,
            metrics: self.metrics,
            logging: self.logging,
            pipeline: self.pipeline,
        })
    }
}

fn validate_root(section: &str, key: &str, root_path: &str) -> ConfigResult<()> {
    if root_path.starts_with('/') {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            section,
            format!("{key}.root_path"),
            format!("'{root_path}' is not absolute"),
        ))
    }
}

fn insert_unique(
    endpoints: &mut BTreeMap<String, Endpoint>,
    section: &str,
    key: String,
    endpoint: Endpoint,
) -> ConfigResult<()> {
    if endpoints.contains_key(&key) {
        return Err(ConfigError::invalid(
            section,
            key,
            "endpoint name is defined more than once",
        ));
    }
    endpoints.insert(key, endpoint);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamxfer_core::{EndpointKind, StorageLocation};

    const SAMPLE: &str = r#"
beamline_id: "832"
globus:
  globus_endpoints:
    test_endpoint:
      root_path: /data
      uri: test.example
      uuid: "12345"
      name: test_endpoint
  globus_apps:
    als_transfer:
      client_id: client
      client_secret: secret
filesystem_endpoints:
  nersc832_cfs:
    root_path: /global/cfs/cdirs/als/data_mover/8.3.2
archive_endpoints:
  hpss_als:
    root_path: /home/a/alsdev/data_mover
retention:
  test_endpoint: 14
"#;

    #[test]
    fn resolves_endpoints_from_every_table() -> anyhow::Result<()> {
        let config = BeamlineConfig::from_yaml_str(SAMPLE)?;
        assert_eq!(config.beamline_id, "832");

        let managed = config.endpoint("test_endpoint")?;
        assert_eq!(managed.kind(), EndpointKind::ManagedTransfer);
        assert_eq!(managed.root_path(), "/data");
        assert_eq!(managed.uuid(), Some("12345"));
        assert_eq!(managed.uri(), Some("test.example"));

        assert_eq!(
            config.endpoint("nersc832_cfs")?.kind(),
            EndpointKind::FileSystem
        );
        assert_eq!(config.endpoint("hpss_als")?.name(), "hpss_als");
        assert_eq!(config.transfer_app()?.client_id, "client");
        Ok(())
    }

    #[test]
    fn defaults_fill_missing_sections() -> anyhow::Result<()> {
        let config = BeamlineConfig::from_yaml_str(SAMPLE)?;
        assert_eq!(config.transfer.poll_policy(), PollPolicy::default());
        assert_eq!(config.hpc.batch.qos, "preempt");
        assert_eq!(config.hpc.archive.qos, "xfer");
        assert!(config.hpc.compute.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.retention.delay_for("test_endpoint"),
            Duration::from_secs(14 * 86_400)
        );
        assert_eq!(config.retention.delay_for("nersc832_cfs"), Duration::ZERO);
        Ok(())
    }

    #[test]
    fn unknown_names_are_reported() -> anyhow::Result<()> {
        let config = BeamlineConfig::from_yaml_str(SAMPLE)?;
        assert!(matches!(
            config.endpoint("missing"),
            Err(ConfigError::UnknownEndpoint { .. })
        ));
        assert!(matches!(
            config.app("nobody"),
            Err(ConfigError::UnknownApp { .. })
        ));
        Ok(())
    }

    #[test]
    fn relative_roots_are_rejected() {
        let yaml = "beamline_id: x\nfilesystem_endpoints:\n  bad:\n    root_path: data\n";
        assert!(matches!(
            BeamlineConfig::from_yaml_str(yaml),
            Err(ConfigError::InvalidField { field, .. }) if field == "bad.root_path"
        ));
    }

    #[test]
    fn duplicate_endpoint_names_are_rejected() {
        let yaml = r"
beamline_id: x
filesystem_endpoints:
  shared:
    root_path: /a
archive_endpoints:
  shared:
    root_path: /b
";
        assert!(matches!(
            BeamlineConfig::from_yaml_str(yaml),
            Err(ConfigError::InvalidField { section, .. }) if section == "archive_endpoints"
        ));
    }

    #[test]
    fn retention_and_pipeline_must_reference_known_endpoints() {
        let yaml = "beamline_id: x\nretention:\n  ghost: 3\n";
        assert!(matches!(
            BeamlineConfig::from_yaml_str(yaml),
            Err(ConfigError::InvalidField { section, .. }) if section == "retention"
        ));

        let yaml = r"
beamline_id: x
filesystem_endpoints:
  a:
    root_path: /a
pipeline:
  source: a
  compute_raw: a
  compute_scratch: a
  destination: nowhere
";
        assert!(matches!(
            BeamlineConfig::from_yaml_str(yaml),
            Err(ConfigError::InvalidField { field, .. }) if field == "destination"
        ));
    }

    #[test]
    fn missing_beamline_id_is_rejected() {
        assert!(matches!(
            BeamlineConfig::from_yaml_str("filesystem_endpoints: {}\n"),
            Err(ConfigError::InvalidField { field, .. }) if field == "beamline_id"
        ));
    }
}
