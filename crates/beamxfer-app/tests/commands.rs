use std::path::Path;
use std::sync::Arc;

use beamxfer_app::RunContext;
use beamxfer_app::cli::{Command, CopyArgs, EndpointsArgs, PruneArgs, RunDeferredArgs, dispatch};
use beamxfer_config::BeamlineConfig;
use beamxfer_core::PruneMethod;
use serde_json::json;
use tempfile::TempDir;

struct Stations {
    beamline: TempDir,
    cfs: TempDir,
    run: RunContext,
}

fn stations() -> anyhow::Result<Stations> {
    let beamline = tempfile::tempdir()?;
    let cfs = tempfile::tempdir()?;
    let yaml = format!(
        r#"
beamline_id: "832"
filesystem_endpoints:
  beamline:
    root_path: {}
  cfs:
    root_path: {}
"#,
        beamline.path().display(),
        cfs.path().display()
    );
    let config = BeamlineConfig::from_yaml_str(&yaml)?;
    Ok(Stations {
        beamline,
        cfs,
        run: RunContext::new(Arc::new(config)),
    })
}

fn write(root: &Path, relative: &str) -> anyhow::Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, b"projection")?;
    Ok(())
}

#[tokio::test]
async fn copy_infers_a_local_copy_between_filesystems() -> anyhow::Result<()> {
    let s = stations()?;
    write(s.beamline.path(), "42/scan.h5")?;

    let copied = dispatch(
        Command::Copy(CopyArgs {
            method: None,
            source: "beamline".into(),
            destination: "cfs".into(),
            file_path: "42".into(),
        }),
        &s.run,
    )
    .await?;
    assert!(copied);
    assert_eq!(std::fs::read(s.cfs.path().join("42/scan.h5"))?, b"projection");
    Ok(())
}

#[tokio::test]
async fn prune_now_deletes_only_after_the_check_passes() -> anyhow::Result<()> {
    let s = stations()?;
    write(s.beamline.path(), "42/scan.h5")?;
    let prune = |file_path: &str| {
        Command::Prune(PruneArgs {
            method: None,
            source: "beamline".into(),
            check_endpoint: Some("cfs".into()),
            days_from_now: 0,
            older_than_days: None,
            file_path: file_path.into(),
        })
    };

    assert!(dispatch(prune("42/scan.h5"), &s.run).await.is_err());
    assert!(s.beamline.path().join("42/scan.h5").exists());

    write(s.cfs.path(), "42/scan.h5")?;
    assert!(dispatch(prune("42/scan.h5"), &s.run).await?);
    assert!(!s.beamline.path().join("42/scan.h5").exists());
    Ok(())
}

#[tokio::test]
async fn deferred_job_documents_run_their_prune() -> anyhow::Result<()> {
    let s = stations()?;
    write(s.beamline.path(), "old.h5")?;
    let source = s.run.config().endpoint("beamline")?.clone();
    let job = json!({
        "method": PruneMethod::FileSystem,
        "file_path": "old.h5",
        "source": source,
        "check_endpoint": null,
        "older_than_days": null,
        "run_at": "2024-12-16T00:00:00Z",
        "flow_run_name": "prune_from_beamline",
        "deployment": PruneMethod::FileSystem.deployment_name(),
    });
    let job_path = s.cfs.path().join("job.json");
    std::fs::write(&job_path, serde_json::to_vec(&job)?)?;

    let deleted = dispatch(
        Command::RunDeferred(RunDeferredArgs { job: job_path }),
        &s.run,
    )
    .await?;
    assert!(deleted);
    assert!(!s.beamline.path().join("old.h5").exists());
    Ok(())
}

#[tokio::test]
async fn unknown_endpoints_and_missing_jobs_are_errors() -> anyhow::Result<()> {
    let s = stations()?;
    let copy = Command::Copy(CopyArgs {
        method: None,
        source: "beamline".into(),
        destination: "nowhere".into(),
        file_path: "42".into(),
    });
    assert!(dispatch(copy, &s.run).await.is_err());

    let missing = Command::RunDeferred(RunDeferredArgs {
        job: s.cfs.path().join("absent.json"),
    });
    assert!(dispatch(missing, &s.run).await.is_err());

    assert!(dispatch(Command::Endpoints(EndpointsArgs { json: true }), &s.run).await?);
    Ok(())
}
