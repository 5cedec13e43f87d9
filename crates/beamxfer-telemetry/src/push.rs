//! Push gateway delivery for transfer metrics.
//!
//! # Design
//! - Each push replaces the `job`/`instance` group with the current registry contents.
//! - Failures are reported to the caller, who logs and moves on.

use std::time::Duration;

use async_trait::async_trait;
use beamxfer_core::{BackendError, BackendResult, MetricsSink, TransferMetricsRecord};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use tracing::debug;

use crate::error::{Result, TelemetryError};
use crate::metrics::TransferMetrics;

const DEFAULT_GATEWAY_URL: &str = "http://localhost:9091";
const DEFAULT_JOB_NAME: &str = "nersc_transfer";
const DEFAULT_INSTANCE: &str = "data_transfer";
const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Where and under which grouping labels metrics are pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushGatewayConfig {
    /// Gateway base URL.
    pub base_url: String,
    /// `job` grouping label.
    pub job: String,
    /// `instance` grouping label.
    pub instance: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl PushGatewayConfig {
    /// Resolve settings, falling back to `PUSHGATEWAY_URL`, `JOB_NAME` and `INSTANCE_LABEL`,
    /// then to built-in defaults.
    #[must_use]
    pub fn resolve(base_url: Option<&str>, job: Option<&str>, instance: Option<&str>) -> Self {
        Self::resolve_with(base_url, job, instance, |name| std::env::var(name).ok())
    }

    fn resolve_with<F>(
        base_url: Option<&str>,
        job: Option<&str>,
        instance: Option<&str>,
        env: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |value: Option<&str>, var: &str, fallback: &str| {
            value
                .map(str::to_string)
                .or_else(|| env(var))
                .unwrap_or_else(|| fallback.to_string())
        };
        Self {
            base_url: pick(base_url, "PUSHGATEWAY_URL", DEFAULT_GATEWAY_URL),
            job: pick(job, "JOB_NAME", DEFAULT_JOB_NAME),
            instance: pick(instance, "INSTANCE_LABEL", DEFAULT_INSTANCE),
            timeout: Duration::from_secs(5),
        }
    }

    fn push_url(&self) -> Result<Url> {
        let raw = format!(
            "{}/metrics/job/{}/instance/{}",
            self.base_url.trim_end_matches('/'),
            self.job,
            self.instance
        );
        Url::parse(&raw).map_err(|source| TelemetryError::GatewayUrl { url: raw, source })
    }
}

/// Metrics sink that records into a registry and pushes it to a gateway.
#[derive(Clone)]
pub struct PushGatewaySink {
    client: Client,
    url: Url,
    metrics: TransferMetrics,
}

impl PushGatewaySink {
    /// Build a sink with its own registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the registry cannot be built, or the HTTP
    /// client cannot be constructed.
    pub fn new(config: &PushGatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|source| TelemetryError::HttpClient { source })?;
        Ok(Self {
            client,
            url: config.push_url()?,
            metrics: TransferMetrics::new()?,
        })
    }

    /// Registry backing this sink.
    #[must_use]
    pub const fn metrics(&self) -> &TransferMetrics {
        &self.metrics
    }
}

#[async_trait]
impl MetricsSink for PushGatewaySink {
    async fn push(&self, record: &TransferMetricsRecord) -> BackendResult<()> {
        self.metrics.observe(record);
        let body = self
            .metrics
            .render()
            .map_err(|err| BackendError::decode("push_metrics", err.to_string()))?;
        let response = self
            .client
            .put(self.url.clone())
            .header(CONTENT_TYPE, TEXT_FORMAT)
            .body(body)
            .send()
            .await
            .map_err(|err| BackendError::transport("push_metrics", err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Rejected {
                operation: "push_metrics",
                status: status.as_u16(),
                code: None,
                message: response.text().await.ok(),
            });
        }
        debug!(
            url = %self.url,
            bytes = record.bytes_transferred,
            status = %record.status,
            "transfer metrics pushed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use httpmock::MockServer;
    use httpmock::prelude::*;

    fn record(status: &str) -> TransferMetricsRecord {
        TransferMetricsRecord {
            timestamp: Utc::now(),
            bytes_transferred: 1_000,
            duration_seconds: 4.0,
            transfer_speed: 250.0,
            status: status.into(),
            machine: "alcf".into(),
            execution_id: "task-9".into(),
        }
    }

    fn config(base_url: String) -> PushGatewayConfig {
        PushGatewayConfig {
            base_url,
            job: "nersc_transfer".into(),
            instance: "data_transfer".into(),
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn resolve_prefers_explicit_then_environment_then_defaults() {
        let env = |name: &str| (name == "JOB_NAME").then(|| "from_env".to_string());
        let resolved = PushGatewayConfig::resolve_with(Some("http://gw:9091"), None, None, env);
        assert_eq!(resolved.base_url, "http://gw:9091");
        assert_eq!(resolved.job, "from_env");
        assert_eq!(resolved.instance, DEFAULT_INSTANCE);
    }

    #[tokio::test]
    async fn push_puts_text_exposition_to_grouping_path() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/metrics/job/nersc_transfer/instance/data_transfer")
                .header("content-type", TEXT_FORMAT)
                .body_includes("transfer_total_bytes 1000");
            then.status(200);
        });

        let sink = PushGatewaySink::new(&config(server.base_url()))?;
        sink.push(&record("succeeded")).await?;

        mock.assert();
        Ok(())
    }

    #[tokio::test]
    async fn gateway_errors_are_returned() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(PUT);
            then.status(503).body("unavailable");
        });

        let sink = PushGatewaySink::new(&config(server.base_url()))?;
        let err = sink.push(&record("failed")).await;

        mock.assert();
        assert!(matches!(
            err,
            Err(BackendError::Rejected { status: 503, .. })
        ));
        Ok(())
    }

    #[test]
    fn invalid_gateway_url_is_rejected() {
        let result = PushGatewaySink::new(&config("not a url".into()));
        assert!(matches!(result, Err(TelemetryError::GatewayUrl { .. })));
    }
}
