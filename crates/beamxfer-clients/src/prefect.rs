//! Deferred prune scheduling through a Prefect server.
//!
//! A prune deployment is resolved by name and a flow run is created in the `SCHEDULED`
//! state at the prune's target time. The deployment runs `beamxfer run-deferred`
//! with the serialized prune as its parameters.

use std::time::Duration;

use async_trait::async_trait;
use beamxfer_core::{BackendResult, DeferredPrune, DeferredScheduler};
use chrono::SecondsFormat;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::ClientResult;
use crate::session::{base_url, build_http, send_json, service_url};

#[derive(Debug, Deserialize)]
struct Identified {
    id: String,
}

/// Prefect API client that schedules prune runs.
pub struct PrefectScheduler {
    http: Client,
    base: String,
    api_key: Option<String>,
}

impl PrefectScheduler {
    /// Scheduler for the API at `api_url`, authenticating with `api_key` when set.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is invalid or the HTTP client cannot be built.
    pub fn new(api_url: &str, api_key: Option<String>, timeout: Duration) -> ClientResult<Self> {
        Ok(Self {
            http: build_http(timeout)?,
            base: base_url(api_url)?,
            api_key,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl DeferredScheduler for PrefectScheduler {
    async fn schedule(&self, job: &DeferredPrune) -> BackendResult<String> {
        let lookup = service_url(
            "schedule",
            &self.base,
            &format!("deployments/name/{}", job.deployment),
        )?;
        let deployment: Identified =
            send_json("schedule", self.authorize(self.http.get(lookup))).await?;

        let create = service_url(
            "schedule",
            &self.base,
            &format!("deployments/{}/create_flow_run", deployment.id),
        )?;
        let body = json!({
            "name": job.flow_run_name,
            "parameters": job.parameters()?,
            "state": {
                "type": "SCHEDULED",
                "state_details": {
                    "scheduled_time": job.run_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                },
            },
        });
        let run: Identified =
            send_json("schedule", self.authorize(self.http.post(create)).json(&body)).await?;
        info!(
            run_id = %run.id,
            deployment = %job.deployment,
            run_at = %job.run_at,
            path = %job.file_path,
            "prune scheduled"
        );
        Ok(run.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamxfer_core::{FileSystemEndpoint, PruneMethod};
    use chrono::{TimeZone, Utc};
    use httpmock::MockServer;
    use httpmock::prelude::*;

    fn job() -> anyhow::Result<DeferredPrune> {
        let run_at = Utc
            .with_ymd_and_hms(2030, 1, 2, 3, 4, 5)
            .single()
            .ok_or_else(|| anyhow::anyhow!("invalid timestamp"))?;
        Ok(DeferredPrune {
            method: PruneMethod::FileSystem,
            file_path: "42/mice.jpg".into(),
            source: FileSystemEndpoint::new("nersc832_cfs", "/global/cfs").into(),
            check_endpoint: None,
            older_than_days: None,
            run_at,
            flow_run_name: "prune_from_nersc832_cfs".into(),
            deployment: PruneMethod::FileSystem.deployment_name(),
        })
    }

    #[tokio::test]
    async fn schedule_creates_a_scheduled_run_on_the_named_deployment() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let lookup = server.mock(|when, then| {
            when.method(GET)
                .path("/api/deployments/name/prune_filesystem/prune_filesystem")
                .header("authorization", "Bearer key");
            then.status(200).json_body(json!({"id": "dep-1"}));
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/api/deployments/dep-1/create_flow_run")
                .body_includes(r#""type":"SCHEDULED""#)
                .body_includes(r#""scheduled_time":"2030-01-02T03:04:05Z""#)
                .body_includes(r#""file_path":"42/mice.jpg""#);
            then.status(201).json_body(json!({"id": "run-9"}));
        });

        let scheduler = PrefectScheduler::new(
            &server.url("/api"),
            Some("key".into()),
            Duration::from_secs(5),
        )?;
        assert_eq!(scheduler.schedule(&job()?).await?, "run-9");

        lookup.assert();
        create.assert();
        Ok(())
    }

    #[tokio::test]
    async fn missing_deployment_is_rejected() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET);
            then.status(404).json_body(json!({"detail": "Deployment not found"}));
        });

        let scheduler = PrefectScheduler::new(&server.base_url(), None, Duration::from_secs(5))?;
        let err = scheduler.schedule(&job()?).await;
        assert!(err.is_err_and(|err| err.is_not_found()));
        Ok(())
    }
}
