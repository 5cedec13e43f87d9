use std::sync::Arc;

use beamxfer_app::{AppError, PipelineOutcome, run_pipeline};
use beamxfer_core::{PruneMethod, StorageLocation, TaskStatus, TransferItem};
use beamxfer_hpc::ComputeContext;
use beamxfer_test_support::fixtures::sample_config;
use beamxfer_test_support::{FakeBatchBackend, FakeTransferBackend, RecordingScheduler};
use beamxfer_transfer::{ControllerContext, run_deferred};

const DATA832_RAW: &str = "00000000-0000-0000-0000-000000000832";
const DATA832_SCRATCH: &str = "00000000-0000-0000-0000-000000000833";
const NERSC_RAW: &str = "00000000-0000-0000-0000-0000000000a1";
const NERSC_SCRATCH: &str = "00000000-0000-0000-0000-0000000000a2";
const SCAN: &str = "20241216_mice/scan_0001.h5";

struct Harness {
    transfer: Arc<FakeTransferBackend>,
    batch: Arc<FakeBatchBackend>,
    scheduler: Arc<RecordingScheduler>,
    ctx: ControllerContext,
    compute: ComputeContext,
}

fn harness() -> anyhow::Result<Harness> {
    let config = Arc::new(sample_config()?);
    let transfer = Arc::new(FakeTransferBackend::new());
    let batch = Arc::new(FakeBatchBackend::new());
    let scheduler = Arc::new(RecordingScheduler::new());
    transfer.add_file(DATA832_RAW, "/data/raw/20241216_mice/scan_0001.h5", 4096);
    let ctx = ControllerContext::new(Arc::clone(&config))
        .with_transfer(transfer.clone())
        .with_scheduler(scheduler.clone());
    let compute = ComputeContext::new(config).with_batch(batch.clone());
    Ok(Harness {
        transfer,
        batch,
        scheduler,
        ctx,
        compute,
    })
}

#[tokio::test(start_paused = true)]
async fn full_run_reconstructs_returns_results_and_schedules_retention() -> anyhow::Result<()> {
    let h = harness()?;

    let outcome = run_pipeline(SCAN, false, &h.ctx, &h.compute).await?;
    assert_eq!(
        outcome,
        PipelineOutcome {
            raw_copied: true,
            reconstructed: true,
            multi_resolution: true,
            results_copied: true,
            prunes_scheduled: 3,
        }
    );
    assert!(outcome.succeeded(true));

    let submissions = h.transfer.submissions();
    assert_eq!(submissions.len(), 3);
    assert_eq!(submissions[0].source_endpoint, DATA832_RAW);
    assert_eq!(submissions[0].destination_endpoint, NERSC_RAW);
    assert_eq!(
        submissions[0].items,
        [TransferItem::file(
            "/data/raw/20241216_mice/scan_0001.h5",
            "/global/cfs/cdirs/als/data_mover/8.3.2/raw/20241216_mice/scan_0001.h5"
        )]
    );
    for returned in &submissions[1..] {
        assert_eq!(returned.source_endpoint, NERSC_SCRATCH);
        assert_eq!(returned.destination_endpoint, DATA832_SCRATCH);
    }
    assert_eq!(h.batch.scripts().len(), 2);

    let jobs = h.scheduler.jobs();
    let targets: Vec<_> = jobs
        .iter()
        .map(|job| {
            (
                job.flow_run_name.as_str(),
                job.file_path.as_str(),
                job.check_endpoint.as_ref().map(StorageLocation::name),
            )
        })
        .collect();
    assert_eq!(
        targets,
        [
            ("prune_from_data832_raw", SCAN, None),
            (
                "prune_from_nersc832_alsdev_scratch",
                "20241216_mice/recscan_0001/",
                Some("data832_scratch"),
            ),
            (
                "prune_from_nersc832_alsdev_scratch",
                "20241216_mice/recscan_0001.zarr/",
                Some("data832_scratch"),
            ),
        ]
    );
    assert!(jobs.iter().all(|job| job.method == PruneMethod::ManagedTransfer));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn beamline_raw_prune_runs_after_the_compute_copy_is_gone() -> anyhow::Result<()> {
    let h = harness()?;
    run_pipeline(SCAN, false, &h.ctx, &h.compute).await?;
    let jobs = h.scheduler.jobs();
    let raw_job = jobs
        .iter()
        .find(|job| job.flow_run_name == "prune_from_data832_raw")
        .ok_or_else(|| anyhow::anyhow!("raw prune was not scheduled"))?;
    let compute_copy = "/global/cfs/cdirs/als/data_mover/8.3.2/raw/20241216_mice/scan_0001.h5";
    assert!(!h.transfer.contains(NERSC_RAW, compute_copy));

    assert!(run_deferred(raw_job, &h.ctx).await?);
    assert!(!h.transfer.contains(DATA832_RAW, "/data/raw/20241216_mice/scan_0001.h5"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_raw_copy_stops_before_compute() -> anyhow::Result<()> {
    let h = harness()?;
    h.transfer.push_status(TaskStatus::Failed, Some("PERMISSION_DENIED"));

    let outcome = run_pipeline(SCAN, false, &h.ctx, &h.compute).await?;
    assert_eq!(outcome, PipelineOutcome::default());
    assert!(!outcome.succeeded(true));
    assert!(h.batch.scripts().is_empty());
    assert!(h.scheduler.jobs().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_reconstruction_keeps_only_the_raw_prune() -> anyhow::Result<()> {
    let h = harness()?;
    h.batch.finish_with_exit_code(1);

    let outcome = run_pipeline(SCAN, false, &h.ctx, &h.compute).await?;
    assert!(outcome.raw_copied);
    assert!(!outcome.reconstructed);
    assert!(!outcome.results_copied);
    assert_eq!(outcome.prunes_scheduled, 1);
    assert_eq!(h.batch.scripts().len(), 1);
    assert_eq!(h.transfer.submissions().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn export_controlled_scans_stay_put() -> anyhow::Result<()> {
    let h = harness()?;
    let outcome = run_pipeline(SCAN, true, &h.ctx, &h.compute).await?;
    assert_eq!(outcome, PipelineOutcome::default());
    assert!(h.transfer.submissions().is_empty());
    assert!(h.batch.scripts().is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_settings_and_bad_paths_are_errors() -> anyhow::Result<()> {
    let h = harness()?;
    assert!(matches!(
        run_pipeline("", false, &h.ctx, &h.compute).await,
        Err(AppError::InvalidScanPath { .. })
    ));

    let mut config = sample_config()?;
    config.pipeline = None;
    let ctx = ControllerContext::new(Arc::new(config));
    assert!(matches!(
        run_pipeline(SCAN, false, &ctx, &h.compute).await,
        Err(AppError::MissingPipeline)
    ));
    Ok(())
}
