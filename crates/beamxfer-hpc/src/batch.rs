//! Reconstruction through the batch queue of a remote compute system.
//!
//! Each step renders one Slurm script that runs the reconstruction container with
//! `podman-hpc`, submits it and waits for the job.

use std::sync::Arc;

use beamxfer_config::BatchSettings;
use beamxfer_core::BatchBackend;
use tracing::{error, info, warn};

use crate::jobs::run_job;
use crate::scan::ScanPath;
use crate::slurm::{SlurmDirectives, sanitize_name, shell_quote};

/// Batch queue compute controller.
pub struct BatchQueueCompute {
    settings: BatchSettings,
    backend: Arc<dyn BatchBackend>,
}

impl BatchQueueCompute {
    /// Controller submitting through `backend` with `settings`.
    #[must_use]
    pub fn new(settings: BatchSettings, backend: Arc<dyn BatchBackend>) -> Self {
        Self { settings, backend }
    }

    fn directives(&self, job_name: String, time_limit: &str) -> SlurmDirectives {
        let logs = format!("{}/logs", self.settings.scratch_root.trim_end_matches('/'));
        SlurmDirectives {
            qos: self.settings.qos.clone(),
            account: self.settings.account.clone(),
            constraint: self.settings.constraint.clone(),
            time_limit: time_limit.to_string(),
            job_name,
            output: format!("{logs}/%x_%j.out"),
            error: format!("{logs}/%x_%j.err"),
            nodes: Some(self.settings.nodes),
            ntasks_per_node: Some(self.settings.ntasks_per_node),
            cpus_per_task: Some(self.settings.cpus_per_task),
            licenses: None,
            mem: None,
            exclusive: self.settings.exclusive,
        }
    }

    fn container_command(&self, script: &str, arguments: &[String]) -> String {
        let scripts_dir = self.settings.scripts_dir.trim_end_matches('/');
        let scratch = shell_quote(&self.settings.scratch_root);
        let args: Vec<String> = arguments.iter().map(|arg| shell_quote(arg)).collect();
        format!(
            "date\n\
             srun podman-hpc run \\\n  \
             --volume {mount}:/alsuser/{script} \\\n  \
             --volume {scratch}:/alsdata \\\n  \
             --volume {scratch}:/alsuser/ \\\n  \
             {image} \\\n  \
             python {script} {args}\n\
             date\n",
            mount = shell_quote(&format!("{scripts_dir}/{script}")),
            image = shell_quote(&self.settings.image),
            args = args.join(" "),
        )
    }

    /// Script for the reconstruction of `scan`.
    #[must_use]
    pub fn reconstruction_script(&self, scan: &ScanPath) -> String {
        let script = &self.settings.recon_script;
        let directives = self.directives(
            format!("tomo_recon_{}", sanitize_name(&scan.stem)),
            &self.settings.time_limit,
        );
        directives.script(
            &self.container_command(script, &[scan.stem.clone(), scan.folder.clone()]),
        )
    }

    /// Script for the multi-resolution conversion of `scan`.
    #[must_use]
    pub fn multi_resolution_script(&self, scan: &ScanPath) -> String {
        let script = &self.settings.multires_script;
        let directives = self.directives(
            format!("tomo_multires_{}", sanitize_name(&scan.stem)),
            &self.settings.multires_time_limit,
        );
        let arguments = [
            scan.reconstruction_dir("/alsdata/scratch"),
            "--raw_file".to_string(),
            scan.raw_file("/alsdata/raw"),
        ];
        directives.script(&self.container_command(script, &arguments))
    }

    /// Reconstruct `file_path`; `true` only when the job completes successfully.
    pub async fn reconstruct(&self, file_path: &str) -> bool {
        let Some(scan) = ScanPath::parse(file_path) else {
            warn!(file_path, "reconstruction skipped: path has no file name");
            return false;
        };
        self.submit("reconstruction", &self.reconstruction_script(&scan))
            .await
    }

    /// Build the multi-resolution copy of `file_path`.
    pub async fn build_multi_resolution(&self, file_path: &str) -> bool {
        let Some(scan) = ScanPath::parse(file_path) else {
            warn!(file_path, "multi-resolution skipped: path has no file name");
            return false;
        };
        self.submit("multi_resolution", &self.multi_resolution_script(&scan))
            .await
    }

    async fn submit(&self, step: &'static str, script: &str) -> bool {
        info!(step, "submitting batch job");
        match run_job(self.backend.as_ref(), script, self.settings.poll_policy()).await {
            Ok(outcome) => {
                info!(
                    step,
                    job_id = outcome.job_id(),
                    succeeded = outcome.succeeded(),
                    "batch step finished"
                );
                outcome.succeeded()
            }
            Err(err) => {
                error!(step, error = %err, "batch step failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamxfer_core::JobState;
    use beamxfer_test_support::FakeBatchBackend;

    fn settings() -> BatchSettings {
        BatchSettings {
            poll_interval_secs: 1,
            max_wait_secs: 10,
            ..BatchSettings::default()
        }
    }

    fn controller(backend: &Arc<FakeBatchBackend>) -> BatchQueueCompute {
        BatchQueueCompute::new(settings(), backend.clone())
    }

    #[test]
    fn reconstruction_script_mounts_the_entry_point() -> anyhow::Result<()> {
        let backend = Arc::new(FakeBatchBackend::new());
        let scan = ScanPath::parse("20241216_mice/scan_0001.h5")
            .ok_or_else(|| anyhow::anyhow!("unparsed"))?;
        let script = controller(&backend).reconstruction_script(&scan);

        assert!(script.starts_with("#!/bin/bash\n#SBATCH --qos=preempt\n"));
        assert!(script.contains("#SBATCH --job-name=tomo_recon_scan_0001\n"));
        assert!(script.contains("#SBATCH --output=/pscratch/sd/a/alsdev/8.3.2/logs/%x_%j.out\n"));
        assert!(script.contains(
            "--volume /global/cfs/cdirs/als/data_mover/8.3.2/tomography_scripts/sfapi_reconstruction.py:/alsuser/sfapi_reconstruction.py"
        ));
        assert!(script.contains("python sfapi_reconstruction.py scan_0001 20241216_mice\n"));
        assert!(!script.contains("login"));
        Ok(())
    }

    #[test]
    fn multi_resolution_script_points_at_reconstruction_output() -> anyhow::Result<()> {
        let backend = Arc::new(FakeBatchBackend::new());
        let scan = ScanPath::parse("20241216_mice/scan_0001.h5")
            .ok_or_else(|| anyhow::anyhow!("unparsed"))?;
        let script = controller(&backend).multi_resolution_script(&scan);

        assert!(script.contains(
            "python tiff_to_zarr.py /alsdata/scratch/20241216_mice/recscan_0001/ --raw_file /alsdata/raw/20241216_mice/scan_0001.h5"
        ));
        assert!(script.contains("#SBATCH --job-name=tomo_multires_scan_0001\n"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn reconstruct_reports_job_outcome() {
        let backend = Arc::new(FakeBatchBackend::new());
        backend.push_state(JobState::Running, None);
        assert!(controller(&backend).reconstruct("42/scan.h5").await);

        let failing = Arc::new(FakeBatchBackend::new());
        failing.push_state(JobState::Failed, Some(1));
        assert!(!controller(&failing).reconstruct("42/scan.h5").await);
    }

    #[tokio::test(start_paused = true)]
    async fn submission_errors_become_false() {
        let backend = Arc::new(FakeBatchBackend::new());
        backend.fail_submissions();
        assert!(!controller(&backend).build_multi_resolution("42/scan.h5").await);
        assert!(!controller(&backend).reconstruct("").await);
    }
}
