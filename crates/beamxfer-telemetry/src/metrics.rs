//! Prometheus registry for transfer metrics.
//!
//! # Design
//! - Collectors are registered once in `new()`; recording never fails.
//! - Gauges hold the most recent transfer so a push gateway sees one sample per push.

use std::sync::Arc;

use beamxfer_core::TransferMetricsRecord;
use prometheus::{Encoder, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::{Result, TelemetryError};

/// Prometheus-backed registry of transfer gauges.
#[derive(Clone)]
pub struct TransferMetrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    request_count: IntGaugeVec,
    total_bytes: IntGauge,
    file_bytes: IntGaugeVec,
    speed: GaugeVec,
    duration: GaugeVec,
}

impl TransferMetrics {
    /// Construct a registry with the transfer collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector cannot be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let request_count = IntGaugeVec::new(
            Opts::new("transfer_request_count", "Transfers recorded per execution"),
            &["execution_id"],
        )
        .map_err(|source| collector("transfer_request_count", source))?;
        let total_bytes = IntGauge::with_opts(Opts::new(
            "transfer_total_bytes",
            "Bytes moved by the most recent transfer",
        ))
        .map_err(|source| collector("transfer_total_bytes", source))?;
        let file_bytes = IntGaugeVec::new(
            Opts::new("transfer_file_bytes", "Bytes moved by outcome"),
            &["status"],
        )
        .map_err(|source| collector("transfer_file_bytes", source))?;
        let speed = GaugeVec::new(
            Opts::new(
                "transfer_speed_bytes_per_second",
                "Throughput of the most recent transfer",
            ),
            &["machine"],
        )
        .map_err(|source| collector("transfer_speed_bytes_per_second", source))?;
        let duration = GaugeVec::new(
            Opts::new(
                "transfer_time_seconds",
                "Wall-clock duration of the most recent transfer",
            ),
            &["machine"],
        )
        .map_err(|source| collector("transfer_time_seconds", source))?;

        register(&registry, "transfer_request_count", request_count.clone())?;
        register(&registry, "transfer_total_bytes", total_bytes.clone())?;
        register(&registry, "transfer_file_bytes", file_bytes.clone())?;
        register(&registry, "transfer_speed_bytes_per_second", speed.clone())?;
        register(&registry, "transfer_time_seconds", duration.clone())?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                request_count,
                total_bytes,
                file_bytes,
                speed,
                duration,
            }),
        })
    }

    /// Record one finished transfer.
    pub fn observe(&self, record: &TransferMetricsRecord) {
        let bytes = i64::try_from(record.bytes_transferred).unwrap_or(i64::MAX);
        self.inner
            .request_count
            .with_label_values(&[record.execution_id.as_str()])
            .inc();
        self.inner.total_bytes.set(bytes);
        self.inner
            .file_bytes
            .with_label_values(&[record.status.as_str()])
            .set(bytes);
        self.inner
            .speed
            .with_label_values(&[record.machine.as_str()])
            .set(record.transfer_speed);
        self.inner
            .duration
            .with_label_values(&[record.machine.as_str()])
            .set(record.duration_seconds);
    }

    /// Render the registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or are not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }
}

fn collector(name: &'static str, source: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricsCollector { name, source }
}

fn register<C>(registry: &Registry, name: &'static str, collector: C) -> Result<()>
where
    C: prometheus::core::Collector + 'static,
{
    registry
        .register(Box::new(collector))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record() -> TransferMetricsRecord {
        TransferMetricsRecord {
            timestamp: Utc::now(),
            bytes_transferred: 4096,
            duration_seconds: 2.0,
            transfer_speed: 2048.0,
            status: "succeeded".into(),
            machine: "nersc".into(),
            execution_id: "task-1".into(),
        }
    }

    #[test]
    fn observed_records_render_with_labels() -> anyhow::Result<()> {
        let metrics = TransferMetrics::new()?;
        metrics.observe(&record());
        let rendered = metrics.render()?;
        assert!(rendered.contains("transfer_total_bytes 4096"));
        assert!(rendered.contains("transfer_file_bytes{status=\"succeeded\"} 4096"));
        assert!(rendered.contains("transfer_speed_bytes_per_second{machine=\"nersc\"} 2048"));
        assert!(rendered.contains("transfer_request_count{execution_id=\"task-1\"} 1"));
        Ok(())
    }

    #[test]
    fn registries_are_independent() -> anyhow::Result<()> {
        let first = TransferMetrics::new()?;
        let second = TransferMetrics::new()?;
        first.observe(&record());
        assert!(!second.render()?.contains("task-1"));
        Ok(())
    }
}
