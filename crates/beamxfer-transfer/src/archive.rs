//! Tape archive movement through transfer-queue batch jobs.
//!
//! # Design
//! - The controller only renders scripts; `hsi` and `htar` run on the archive-side host.
//! - Archived data is namespaced `<archive root>/<beamline>/raw/<proposal>`.
//! - The job id doubles as the task id in transfer outcomes.

use std::path::Path;
use std::sync::Arc;

use beamxfer_config::ArchiveSettings;
use beamxfer_core::{
    ArchiveEndpoint, BackendResult, BatchBackend, ControllerResult, Endpoint, StorageLocation,
    TransferMethod,
};
use beamxfer_hpc::{JobOutcome, SlurmDirectives, run_job, sanitize_name, shell_quote};
use tracing::{info, warn};

use crate::request::{TransferOutcome, TransferRequest};

/// Which way data moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveDirection {
    /// Filesystem into the archive.
    ToArchive,
    /// Archive back to a filesystem.
    FromArchive,
}

impl ArchiveDirection {
    /// Transfer method implementing this direction.
    #[must_use]
    pub const fn method(self) -> TransferMethod {
        match self {
            Self::ToArchive => TransferMethod::FileSystemToArchive,
            Self::FromArchive => TransferMethod::ArchiveToFileSystem,
        }
    }
}

/// How data leaves the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Restore<'a> {
    File,
    Bundle,
    Members(&'a [String]),
}

fn is_bundle(path: &str) -> bool {
    Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tar"))
}

fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Parent folder of a relative path, or the path itself when it has no parent.
fn proposal_of(file_path: &str) -> &str {
    let trimmed = file_path.trim_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, _)) => base_name(parent),
        None => trimmed,
    }
}

fn parent_of(file_path: &str) -> &str {
    file_path
        .trim_matches('/')
        .rsplit_once('/')
        .map_or("", |(parent, _)| parent)
}

/// Moves data in or out of the tape archive.
pub struct ArchiveTransferController {
    direction: ArchiveDirection,
    beamline_id: String,
    settings: ArchiveSettings,
    backend: Arc<dyn BatchBackend>,
}

impl ArchiveTransferController {
    /// Controller for `direction`, submitting jobs through `backend`.
    #[must_use]
    pub fn new(
        direction: ArchiveDirection,
        beamline_id: impl Into<String>,
        settings: ArchiveSettings,
        backend: Arc<dyn BatchBackend>,
    ) -> Self {
        Self {
            direction,
            beamline_id: beamline_id.into(),
            settings,
            backend,
        }
    }

    /// Direction this controller moves data.
    #[must_use]
    pub const fn direction(&self) -> ArchiveDirection {
        self.direction
    }

    fn log_dir(&self) -> String {
        format!(
            "{}/{}",
            self.settings.log_root.trim_end_matches('/'),
            self.beamline_id
        )
    }

    pub(crate) fn directives(&self, job_name: &str) -> SlurmDirectives {
        let logs = self.log_dir();
        let name = sanitize_name(job_name);
        SlurmDirectives {
            qos: self.settings.qos.clone(),
            account: self.settings.account.clone(),
            constraint: self.settings.constraint.clone(),
            time_limit: self.settings.time_limit.clone(),
            job_name: name.clone(),
            output: format!("{logs}/{name}_%j.out"),
            error: format!("{logs}/{name}_%j.err"),
            nodes: None,
            ntasks_per_node: None,
            cpus_per_task: None,
            licenses: Some(self.settings.licenses.clone()),
            mem: Some(self.settings.mem.clone()),
            exclusive: false,
        }
    }

    pub(crate) async fn submit(&self, label: &str, script: &str) -> Option<TransferOutcome> {
        match run_job(self.backend.as_ref(), script, self.settings.poll_policy()).await {
            Ok(outcome) => {
                info!(
                    label,
                    job_id = outcome.job_id(),
                    succeeded = outcome.succeeded(),
                    "archive job finished"
                );
                Some(TransferOutcome::finished(
                    outcome.succeeded(),
                    outcome.job_id().to_string(),
                ))
            }
            Err(err) => {
                warn!(label, error = %err, "archive job failed");
                None
            }
        }
    }

    pub(crate) async fn submit_job(&self, script: &str) -> BackendResult<JobOutcome> {
        run_job(self.backend.as_ref(), script, self.settings.poll_policy()).await
    }

    /// Archive directory for `file_path`: `<root>/<beamline>/raw/<proposal>`.
    #[must_use]
    pub fn archive_dir(&self, archive: &ArchiveEndpoint, file_path: &str) -> String {
        archive.full_path(&format!(
            "{}/raw/{}",
            self.beamline_id,
            proposal_of(file_path)
        ))
    }

    /// Script storing `file_path` from `source` into `archive`.
    #[must_use]
    pub fn store_script(
        &self,
        source: &Endpoint,
        archive: &ArchiveEndpoint,
        file_path: &str,
    ) -> String {
        let source_path = source.full_path(file_path);
        let name = base_name(&source_path);
        let parent = Path::new(&source_path).parent().map_or_else(
            || "/".to_string(),
            |parent| parent.to_string_lossy().into_owned(),
        );
        let target_dir = self.archive_dir(archive, file_path);
        let body = format!(
            "echo \"storing {src} into {dir}\"\n\
             hsi -q mkdir -p {dir}\n\
             if [ -d {src} ]; then\n  \
             htar -cvf {bundle} -C {parent} {name}\n\
             else\n  \
             hsi -q cput -p {src} : {file}\n\
             fi\n",
            src = shell_quote(&source_path),
            dir = shell_quote(&target_dir),
            bundle = shell_quote(&format!("{target_dir}/{name}.tar")),
            parent = shell_quote(&parent),
            name = shell_quote(name),
            file = shell_quote(&format!("{target_dir}/{name}")),
        );
        self.directives(&format!("archive_{file_path}")).script(&body)
    }

    fn restore_script(
        &self,
        archive: &ArchiveEndpoint,
        destination: &Endpoint,
        file_path: &str,
        mode: &Restore<'_>,
    ) -> String {
        let archive_path = archive.full_path(file_path);
        let target_dir = destination.full_path(parent_of(file_path));
        let name = base_name(&archive_path);
        let archived = shell_quote(&archive_path);
        let command = match mode {
            Restore::File => format!(
                "hsi -q get {} : {archived}",
                shell_quote(&format!("{}/{name}", target_dir.trim_end_matches('/')))
            ),
            Restore::Bundle => format!("htar -xvf {archived}"),
            Restore::Members(members) => {
                let members: Vec<String> =
                    members.iter().map(|member| shell_quote(member)).collect();
                format!("htar -xvf {archived} -Hnostage {}", members.join(" "))
            }
        };
        let body = format!(
            "echo \"restoring {archived} into {dir}\"\n\
             mkdir -p {dir}\n\
             cd {dir}\n\
             {command}\n",
            dir = shell_quote(&target_dir),
        );
        self.directives(&format!("restore_{file_path}")).script(&body)
    }

    fn endpoints<'a>(
        &self,
        request: &TransferRequest<'a>,
    ) -> Option<(&'a Endpoint, &'a ArchiveEndpoint, &'a Endpoint)> {
        let (source, destination) = request.validated()?;
        let resolved = match (self.direction, source, destination) {
            (ArchiveDirection::ToArchive, other, Endpoint::Archive(archive))
                if !matches!(other, Endpoint::Archive(_)) =>
            {
                Some((other, archive, destination))
            }
            (ArchiveDirection::FromArchive, Endpoint::Archive(archive), other)
                if !matches!(other, Endpoint::Archive(_)) =>
            {
                Some((source, archive, other))
            }
            _ => None,
        };
        if resolved.is_none() {
            warn!(
                direction = ?self.direction,
                source = source.name(),
                destination = destination.name(),
                "archive transfer needs exactly one archive endpoint on the matching side"
            );
        }
        resolved
    }

    /// Copy the request's path; `true` when the job completed.
    ///
    /// # Errors
    ///
    /// Never fails; job problems are logged and reported as `false`.
    pub async fn copy(&self, request: &TransferRequest<'_>) -> ControllerResult<bool> {
        Ok(self.transfer(request).await?.succeeded)
    }

    /// Copy the request's path and report the job that did it.
    ///
    /// # Errors
    ///
    /// Never fails; job problems are logged and reported as a failed outcome.
    pub async fn transfer(
        &self,
        request: &TransferRequest<'_>,
    ) -> ControllerResult<TransferOutcome> {
        let Some((source, archive, destination)) = self.endpoints(request) else {
            return Ok(TransferOutcome::failed());
        };
        let script = match self.direction {
            ArchiveDirection::ToArchive => self.store_script(source, archive, request.file_path),
            ArchiveDirection::FromArchive => {
                let mode = if is_bundle(request.file_path) {
                    Restore::Bundle
                } else {
                    Restore::File
                };
                self.restore_script(archive, destination, request.file_path, &mode)
            }
        };
        info!(
            direction = ?self.direction,
            source = source.name(),
            destination = destination.name(),
            file_path = request.file_path,
            "archive transfer submitted"
        );
        Ok(self
            .submit(request.file_path, &script)
            .await
            .unwrap_or_else(TransferOutcome::failed))
    }

    /// Restore only `members` of the bundle at the request's path.
    ///
    /// # Errors
    ///
    /// Never fails; a request that is not a bundle restore is logged and reported as
    /// `false`.
    pub async fn copy_members(
        &self,
        request: &TransferRequest<'_>,
        members: &[String],
    ) -> ControllerResult<bool> {
        if self.direction != ArchiveDirection::FromArchive || !is_bundle(request.file_path) {
            warn!(
                file_path = request.file_path,
                "member restore needs a bundle in the archive"
            );
            return Ok(false);
        }
        let Some((_, archive, destination)) = self.endpoints(request) else {
            return Ok(false);
        };
        let mode = if members.is_empty() {
            Restore::Bundle
        } else {
            Restore::Members(members)
        };
        let script = self.restore_script(archive, destination, request.file_path, &mode);
        Ok(self
            .submit(request.file_path, &script)
            .await
            .is_some_and(|outcome| outcome.succeeded))
    }

    /// List `path` on `archive`; returns where the listing was written.
    ///
    /// Bundles are listed with `htar -tvf`; anything else with `hsi ls`.
    ///
    /// # Errors
    ///
    /// Never fails; job problems are logged and reported as `None`.
    pub async fn list_contents(
        &self,
        archive: &Endpoint,
        path: &str,
        recursive: bool,
    ) -> ControllerResult<Option<String>> {
        let Endpoint::Archive(archive) = archive else {
            warn!(endpoint = archive.name(), "listing needs an archive endpoint");
            return Ok(None);
        };
        let target = shell_quote(&archive.full_path(path));
        let command = if is_bundle(path) {
            format!("htar -tvf {target}")
        } else if recursive {
            format!("hsi -q ls -R {target}")
        } else {
            format!("hsi -q ls -l {target}")
        };
        let job_name = sanitize_name(&format!("list_{path}"));
        let script = self.directives(&job_name).script(&command);
        let Some(outcome) = self.submit(path, &script).await else {
            return Ok(None);
        };
        let Some(job_id) = outcome.task_id.filter(|_| outcome.succeeded) else {
            return Ok(None);
        };
        Ok(Some(format!("{}/{job_name}_{job_id}.out", self.log_dir())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamxfer_core::{FileSystemEndpoint, JobState};
    use beamxfer_test_support::FakeBatchBackend;

    fn settings() -> ArchiveSettings {
        ArchiveSettings {
            log_root: "/global/cfs/cdirs/als/data_mover/hpss_transfer_logs".into(),
            poll_interval_secs: 1,
            max_wait_secs: 10,
            ..ArchiveSettings::default()
        }
    }

    fn controller(
        direction: ArchiveDirection,
        backend: &Arc<FakeBatchBackend>,
    ) -> ArchiveTransferController {
        ArchiveTransferController::new(direction, "832", settings(), backend.clone())
    }

    fn cfs() -> Endpoint {
        FileSystemEndpoint::new("nersc832_cfs", "/global/cfs/cdirs/als/data_mover/8.3.2").into()
    }

    fn hpss() -> Endpoint {
        ArchiveEndpoint::new("hpss_als", "/home/a/alsdev/data_mover").into()
    }

    #[test]
    fn proposals_come_from_parent_folder() {
        assert_eq!(proposal_of("raw/BLS-00564_dyparkinson/scan.h5"), "BLS-00564_dyparkinson");
        assert_eq!(proposal_of("/BLS-00564_dyparkinson/"), "BLS-00564_dyparkinson");
        assert_eq!(parent_of("832/raw/p/bundle.tar"), "832/raw/p");
        assert_eq!(parent_of("bundle.tar"), "");
    }

    #[tokio::test(start_paused = true)]
    async fn store_bundles_directories_under_the_proposal() -> anyhow::Result<()> {
        let backend = Arc::new(FakeBatchBackend::new());
        let (source, archive) = (cfs(), hpss());
        let request = TransferRequest::new("raw/BLS-00564/scan_0001", &source, &archive);

        let outcome = controller(ArchiveDirection::ToArchive, &backend)
            .transfer(&request)
            .await?;
        assert!(outcome.succeeded);
        assert_eq!(outcome.task_id.as_deref(), Some("1001"));

        let script = &backend.scripts()[0];
        assert!(script.contains("#SBATCH --qos=xfer\n"));
        assert!(script.contains("#SBATCH --licenses=SCRATCH\n"));
        assert!(script.contains(
            "#SBATCH --output=/global/cfs/cdirs/als/data_mover/hpss_transfer_logs/832/archive_raw_BLS-00564_scan_0001_%j.out\n"
        ));
        assert!(script.contains("hsi -q mkdir -p /home/a/alsdev/data_mover/832/raw/BLS-00564\n"));
        assert!(script.contains(
            "htar -cvf /home/a/alsdev/data_mover/832/raw/BLS-00564/scan_0001.tar -C /global/cfs/cdirs/als/data_mover/8.3.2/raw/BLS-00564 scan_0001\n"
        ));
        assert!(script.contains(
            "hsi -q cput -p /global/cfs/cdirs/als/data_mover/8.3.2/raw/BLS-00564/scan_0001 : /home/a/alsdev/data_mover/832/raw/BLS-00564/scan_0001\n"
        ));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn restore_picks_mode_from_path() -> anyhow::Result<()> {
        let backend = Arc::new(FakeBatchBackend::new());
        let (archive, destination) = (hpss(), cfs());
        let restorer = controller(ArchiveDirection::FromArchive, &backend);

        let bundle = TransferRequest::new("832/raw/BLS-00564/scan_0001.tar", &archive, &destination);
        assert!(restorer.copy(&bundle).await?);
        let single = TransferRequest::new("832/raw/BLS-00564/scan_0002.h5", &archive, &destination);
        assert!(restorer.copy(&single).await?);
        let members = vec!["scan_0001/a.tif".to_string(), "scan_0001/b.tif".to_string()];
        assert!(restorer.copy_members(&bundle, &members).await?);

        let scripts = backend.scripts();
        assert!(scripts[0].contains("cd /global/cfs/cdirs/als/data_mover/8.3.2/832/raw/BLS-00564\n"));
        assert!(scripts[0].contains("htar -xvf /home/a/alsdev/data_mover/832/raw/BLS-00564/scan_0001.tar\n"));
        assert!(scripts[1].contains(
            "hsi -q get /global/cfs/cdirs/als/data_mover/8.3.2/832/raw/BLS-00564/scan_0002.h5 : /home/a/alsdev/data_mover/832/raw/BLS-00564/scan_0002.h5\n"
        ));
        assert!(scripts[2].contains("-Hnostage scan_0001/a.tif scan_0001/b.tif\n"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_endpoint_kinds_and_failed_jobs_are_false() -> anyhow::Result<()> {
        let backend = Arc::new(FakeBatchBackend::new());
        let (source, archive) = (cfs(), hpss());
        let backwards = TransferRequest::new("raw/p/scan", &archive, &source);
        assert!(!controller(ArchiveDirection::ToArchive, &backend).copy(&backwards).await?);
        assert!(backend.scripts().is_empty());

        backend.push_state(JobState::Failed, Some(1));
        let forwards = TransferRequest::new("raw/p/scan", &source, &archive);
        let outcome = controller(ArchiveDirection::ToArchive, &backend)
            .transfer(&forwards)
            .await?;
        assert!(!outcome.succeeded);
        assert_eq!(outcome.task_id.as_deref(), Some("1001"));

        let restorer = controller(ArchiveDirection::FromArchive, &backend);
        let not_bundle = TransferRequest::new("832/raw/p/scan.h5", &archive, &source);
        assert!(!restorer.copy_members(&not_bundle, &["a".to_string()]).await?);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn listings_report_their_log_file() -> anyhow::Result<()> {
        let backend = Arc::new(FakeBatchBackend::new());
        let lister = controller(ArchiveDirection::FromArchive, &backend);

        let written = lister.list_contents(&hpss(), "832/raw/BLS-00564", true).await?;
        assert_eq!(
            written.as_deref(),
            Some("/global/cfs/cdirs/als/data_mover/hpss_transfer_logs/832/list_832_raw_BLS-00564_1001.out")
        );
        let bundle = lister
            .list_contents(&hpss(), "832/raw/BLS-00564/scan.tar", false)
            .await?;
        assert!(bundle.is_some());

        let scripts = backend.scripts();
        assert!(scripts[0].contains("hsi -q ls -R /home/a/alsdev/data_mover/832/raw/BLS-00564\n"));
        assert!(scripts[1].contains("htar -tvf /home/a/alsdev/data_mover/832/raw/BLS-00564/scan.tar\n"));
        assert_eq!(lister.list_contents(&cfs(), "x", false).await?, None);
        Ok(())
    }
}
