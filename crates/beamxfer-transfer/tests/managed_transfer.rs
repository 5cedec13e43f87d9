use std::sync::Arc;

use beamxfer_core::{Endpoint, SyncLevel, TaskStatus, TransferItem};
use beamxfer_test_support::FakeTransferBackend;
use beamxfer_test_support::RecordingMetricsSink;
use beamxfer_test_support::fixtures::{filesystem_endpoint, managed_endpoint, quick_poll};
use beamxfer_transfer::{ManagedTransferController, TransferOutcome, TransferRequest};

const SPOT: &str = "00000000-0000-0000-0000-00000000a001";
const CFS: &str = "00000000-0000-0000-0000-00000000a002";

fn endpoints() -> (Endpoint, Endpoint) {
    (
        managed_endpoint("spot832", "/data", SPOT),
        managed_endpoint("nersc832", "/global/cfs/cdirs/als/raw", CFS),
    )
}

fn controller(backend: &Arc<FakeTransferBackend>) -> ManagedTransferController {
    ManagedTransferController::new(backend.clone(), quick_poll())
}

#[tokio::test(start_paused = true)]
async fn single_file_submits_one_checksummed_item() -> anyhow::Result<()> {
    let backend = Arc::new(FakeTransferBackend::new());
    backend.add_file(SPOT, "/data/42/mice.jpg", 2048);
    let (source, destination) = endpoints();

    let outcome = controller(&backend)
        .transfer(&TransferRequest::new("/42/mice.jpg", &source, &destination))
        .await?;
    assert_eq!(outcome, TransferOutcome::finished(true, "task-1".into()));

    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 1);
    let submission = &submissions[0];
    assert_eq!(submission.source_endpoint, SPOT);
    assert_eq!(submission.destination_endpoint, CFS);
    assert_eq!(submission.label, "mice");
    assert_eq!(submission.sync_level, SyncLevel::Checksum);
    assert_eq!(
        submission.items,
        [TransferItem::file(
            "/data/42/mice.jpg",
            "/global/cfs/cdirs/als/raw/42/mice.jpg"
        )]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn directories_expand_to_one_item_per_file() -> anyhow::Result<()> {
    let backend = Arc::new(FakeTransferBackend::new());
    backend.add_file(SPOT, "/data/42/a.tif", 10);
    backend.add_file(SPOT, "/data/42/sub/b.tif", 20);
    backend.disable_stat();
    let (source, destination) = endpoints();

    assert!(
        controller(&backend)
            .copy(&TransferRequest::new("42", &source, &destination))
            .await?
    );
    let items = &backend.submissions()[0].items;
    assert_eq!(
        items,
        &[
            TransferItem::file("/data/42/a.tif", "/global/cfs/cdirs/als/raw/42/a.tif"),
            TransferItem::file("/data/42/sub/b.tif", "/global/cfs/cdirs/als/raw/42/sub/b.tif"),
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn missing_source_is_still_submitted() -> anyhow::Result<()> {
    let backend = Arc::new(FakeTransferBackend::new());
    let (source, destination) = endpoints();
    backend.push_status(TaskStatus::Failed, None);

    assert!(
        !controller(&backend)
            .copy(&TransferRequest::new("42/ghost.h5", &source, &destination))
            .await?
    );
    assert_eq!(backend.submissions()[0].items.len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn operational_failures_are_false() -> anyhow::Result<()> {
    let backend = Arc::new(FakeTransferBackend::new());
    let (source, destination) = endpoints();
    let local = filesystem_endpoint("local", "/tmp");

    let mixed = TransferRequest::new("42/mice.jpg", &local, &destination);
    assert!(!controller(&backend).copy(&mixed).await?);
    let empty = TransferRequest::new("  ", &source, &destination);
    assert!(!controller(&backend).copy(&empty).await?);
    assert!(backend.submissions().is_empty());

    backend.fail_listings();
    let request = TransferRequest::new("42/mice.jpg", &source, &destination);
    assert_eq!(controller(&backend).transfer(&request).await?, TransferOutcome::failed());

    let offline = Arc::new(FakeTransferBackend::new());
    offline.fail_submissions();
    assert!(!controller(&offline).copy(&request).await?);

    let flaky = Arc::new(FakeTransferBackend::new());
    flaky.push_status_offline();
    assert!(!controller(&flaky).copy(&request).await?);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn metrics_are_reported_and_never_change_the_result() -> anyhow::Result<()> {
    let backend = Arc::new(FakeTransferBackend::new());
    backend.add_file(SPOT, "/data/42/mice.jpg", 4096);
    backend.push_status(TaskStatus::Active, None);
    let sink = Arc::new(RecordingMetricsSink::new());
    sink.go_offline();
    let (source, destination) = endpoints();

    let controller = controller(&backend).with_metrics(sink.clone(), "nersc");
    assert!(
        controller
            .copy(&TransferRequest::new("42/mice.jpg", &source, &destination))
            .await?
    );

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].bytes_transferred, 4096);
    assert_eq!(records[0].status, "succeeded");
    assert_eq!(records[0].machine, "nersc");
    assert_eq!(records[0].execution_id, "task-1");
    assert!(records[0].duration_seconds >= 1.0);
    Ok(())
}
