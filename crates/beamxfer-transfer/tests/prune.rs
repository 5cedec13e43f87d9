use std::sync::Arc;
use std::time::Duration;

use beamxfer_core::{ControllerError, DeferredPrune, Endpoint, PruneMethod};
use beamxfer_test_support::fixtures::{
    archive_endpoint, filesystem_endpoint, managed_endpoint, sample_config,
};
use beamxfer_test_support::{FakeBatchBackend, FakeTransferBackend, RecordingScheduler};
use beamxfer_transfer::{ControllerContext, PruneRequest, get_prune_controller, run_deferred};
use chrono::{TimeDelta, Utc};

const SPOT: &str = "spot-uuid";
const NERSC: &str = "nersc-uuid";

struct Harness {
    backend: Arc<FakeTransferBackend>,
    scheduler: Arc<RecordingScheduler>,
    ctx: ControllerContext,
    spot: Endpoint,
    nersc: Endpoint,
}

fn harness() -> anyhow::Result<Harness> {
    let backend = Arc::new(FakeTransferBackend::new());
    let scheduler = Arc::new(RecordingScheduler::new());
    let ctx = ControllerContext::new(Arc::new(sample_config()?))
        .with_transfer(backend.clone())
        .with_scheduler(scheduler.clone());
    Ok(Harness {
        backend,
        scheduler,
        ctx,
        spot: managed_endpoint("spot832", "/data", SPOT),
        nersc: managed_endpoint("nersc832", "/global/raw", NERSC),
    })
}

fn is_precondition(result: &Result<bool, ControllerError>, expected_endpoint: &str) -> bool {
    matches!(
        result,
        Err(ControllerError::PreconditionFailed { endpoint, .. }) if endpoint == expected_endpoint
    )
}

#[tokio::test(start_paused = true)]
async fn managed_prune_deletes_once_the_copy_is_confirmed() -> anyhow::Result<()> {
    let h = harness()?;
    h.backend.add_file(SPOT, "/data/42/mice.jpg", 1);
    h.backend.add_file(NERSC, "/global/raw/42/mice.jpg", 1);
    let prune = get_prune_controller(PruneMethod::ManagedTransfer, &h.ctx)?;

    let request = PruneRequest::new("42/mice.jpg", &h.spot).check_against(&h.nersc);
    assert!(prune.prune(&request).await?);

    let deletes = h.backend.deletes();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].endpoint, SPOT);
    assert_eq!(deletes[0].label, "prune_mice");
    assert!(deletes[0].recursive);
    assert_eq!(deletes[0].paths, ["/data/42/mice.jpg"]);
    assert!(!h.backend.contains(SPOT, "/data/42/mice.jpg"));
    assert!(h.backend.contains(NERSC, "/global/raw/42/mice.jpg"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn missing_source_or_copy_aborts_without_deleting() -> anyhow::Result<()> {
    let h = harness()?;
    let prune = get_prune_controller(PruneMethod::ManagedTransfer, &h.ctx)?;

    let request = PruneRequest::new("42/mice.jpg", &h.spot).check_against(&h.nersc);
    let result = prune.prune(&request).await;
    assert!(is_precondition(&result, "spot832"));

    h.backend.add_file(SPOT, "/data/42/mice.jpg", 1);
    let result = prune.prune(&request).await;
    assert!(is_precondition(&result, "nersc832"));

    assert!(h.backend.deletes().is_empty());
    assert!(h.backend.contains(SPOT, "/data/42/mice.jpg"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn lookup_failures_and_invalid_requests_are_false() -> anyhow::Result<()> {
    let h = harness()?;
    let prune = get_prune_controller(PruneMethod::ManagedTransfer, &h.ctx)?;

    assert!(!prune.prune(&PruneRequest::new("", &h.spot)).await?);
    let unsourced = PruneRequest {
        source: None,
        ..PruneRequest::new("42/mice.jpg", &h.spot)
    };
    assert!(!prune.prune(&unsourced).await?);

    let local = filesystem_endpoint("local", "/tmp");
    assert!(!prune.prune(&PruneRequest::new("42/mice.jpg", &local)).await?);

    h.backend.fail_listings();
    assert!(!prune.prune(&PruneRequest::new("42/mice.jpg", &h.spot)).await?);
    assert!(h.backend.deletes().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn recent_data_is_kept() -> anyhow::Result<()> {
    let h = harness()?;
    h.backend
        .add_file_modified(SPOT, "/data/new.h5", 1, Utc::now() - TimeDelta::days(1));
    h.backend
        .add_file_modified(SPOT, "/data/old.h5", 1, Utc::now() - TimeDelta::days(30));
    h.backend.add_file(SPOT, "/data/undated.h5", 1);
    let prune = get_prune_controller(PruneMethod::ManagedTransfer, &h.ctx)?;

    assert!(!prune.prune(&PruneRequest::new("new.h5", &h.spot).older_than(7)).await?);
    assert!(!prune.prune(&PruneRequest::new("undated.h5", &h.spot).older_than(7)).await?);
    assert!(prune.prune(&PruneRequest::new("old.h5", &h.spot).older_than(7)).await?);

    let deleted: Vec<_> = h.backend.deletes().into_iter().flat_map(|d| d.paths).collect();
    assert_eq!(deleted, ["/data/old.h5"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn delayed_prunes_are_scheduled_not_run() -> anyhow::Result<()> {
    let h = harness()?;
    let prune = get_prune_controller(PruneMethod::ManagedTransfer, &h.ctx)?;
    let request = PruneRequest::new("42/mice.jpg", &h.spot)
        .check_against(&h.nersc)
        .after(Duration::from_secs(14 * 24 * 3600));

    let before = Utc::now();
    assert!(prune.prune(&request).await?);
    assert!(h.backend.deletes().is_empty());

    let jobs = h.scheduler.jobs();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.method, PruneMethod::ManagedTransfer);
    assert_eq!(job.deployment, "prune_managed_transfer/prune_managed_transfer");
    assert_eq!(job.flow_run_name, "prune_from_spot832");
    assert_eq!(job.file_path, "42/mice.jpg");
    assert_eq!(job.check_endpoint.as_ref(), Some(&h.nersc));
    assert!(job.run_at >= before + TimeDelta::days(14));

    h.scheduler.go_offline();
    assert!(!prune.prune(&request).await?);

    let unscheduled = ControllerContext::new(Arc::new(sample_config()?))
        .with_transfer(h.backend.clone());
    let prune = get_prune_controller(PruneMethod::ManagedTransfer, &unscheduled)?;
    assert!(matches!(
        prune.prune(&request).await,
        Err(ControllerError::InvalidConfiguration { field: "scheduler", .. })
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn mismatched_method_is_refused_before_scheduling() -> anyhow::Result<()> {
    let h = harness()?;
    let local = filesystem_endpoint("beamline", "/tmp/beamline");
    let prune = get_prune_controller(PruneMethod::ManagedTransfer, &h.ctx)?;
    let request = PruneRequest::new("42/mice.jpg", &local).after(Duration::from_secs(3600));

    assert!(!prune.prune(&request).await?);
    assert!(h.scheduler.jobs().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn deferred_jobs_re_check_when_they_run() -> anyhow::Result<()> {
    let h = harness()?;
    h.backend.add_file(SPOT, "/data/42/mice.jpg", 1);
    let job = DeferredPrune {
        method: PruneMethod::ManagedTransfer,
        file_path: "42/mice.jpg".into(),
        source: h.spot.clone(),
        check_endpoint: Some(h.nersc.clone()),
        older_than_days: None,
        run_at: Utc::now(),
        flow_run_name: "prune_from_spot832".into(),
        deployment: PruneMethod::ManagedTransfer.deployment_name(),
    };

    assert!(is_precondition(&run_deferred(&job, &h.ctx).await, "nersc832"));
    h.backend.add_file(NERSC, "/global/raw/42/mice.jpg", 1);
    assert!(run_deferred(&job, &h.ctx).await?);
    assert!(h.scheduler.jobs().is_empty());
    Ok(())
}

#[tokio::test]
async fn filesystem_prune_with_failing_check_keeps_the_data() -> anyhow::Result<()> {
    let source_dir = tempfile::tempdir()?;
    let check_dir = tempfile::tempdir()?;
    std::fs::create_dir_all(source_dir.path().join("42"))?;
    std::fs::write(source_dir.path().join("42/mice.jpg"), b"x")?;
    let source = filesystem_endpoint("beamline", &source_dir.path().to_string_lossy());
    let check = filesystem_endpoint("cfs", &check_dir.path().to_string_lossy());
    let ctx = ControllerContext::new(Arc::new(sample_config()?));
    let prune = get_prune_controller(PruneMethod::FileSystem, &ctx)?;

    let request = PruneRequest::new("42", &source).check_against(&check);
    assert!(is_precondition(&prune.prune(&request).await, "cfs"));
    assert!(source_dir.path().join("42/mice.jpg").exists());

    std::fs::create_dir_all(check_dir.path().join("42"))?;
    assert!(prune.prune(&request).await?);
    assert!(!source_dir.path().join("42").exists());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn archive_prunes_check_inside_the_job() -> anyhow::Result<()> {
    let batch = Arc::new(FakeBatchBackend::new());
    let ctx = ControllerContext::new(Arc::new(sample_config()?)).with_batch(batch.clone());
    let prune = get_prune_controller(PruneMethod::Archive, &ctx)?;
    let hpss = archive_endpoint("hpss_als", "/home/a/alsdev/data_mover");
    let cfs = filesystem_endpoint("nersc832_cfs", "/global/cfs/cdirs/als/data_mover/8.3.2");
    let request = PruneRequest::new("832/raw/p/scan.tar", &hpss).check_against(&cfs);

    assert!(prune.prune(&request).await?);
    let script = &batch.scripts()[0];
    assert!(script.contains(
        "if ! hsi -q ls /home/a/alsdev/data_mover/832/raw/p/scan.tar >/dev/null 2>&1; then\n"
    ));
    assert!(script.contains("exit 3\n"));
    assert!(script.contains(
        "if ! [ -e /global/cfs/cdirs/als/data_mover/8.3.2/832/raw/p/scan.tar ]; then\n"
    ));
    assert!(script.contains("exit 4\n"));
    assert!(script.ends_with("hsi -q rm -R /home/a/alsdev/data_mover/832/raw/p/scan.tar\n"));

    batch.finish_with_exit_code(4);
    assert!(is_precondition(&prune.prune(&request).await, "nersc832_cfs"));
    batch.finish_with_exit_code(3);
    assert!(is_precondition(&prune.prune(&request).await, "hpss_als"));
    batch.finish_with_exit_code(1);
    assert!(!prune.prune(&request).await?);

    let submitted = batch.scripts().len();
    assert!(!prune.prune(&request.older_than(30)).await?);
    assert_eq!(batch.scripts().len(), submitted);
    Ok(())
}
