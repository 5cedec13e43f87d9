//! Managed flows service adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beamxfer_core::{BackendResult, FlowBackend, FlowRunStatus};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::auth::AccessTokenSource;
use crate::error::ClientResult;
use crate::session::{base_url, build_http, send_json, service_url};

const FLOWS_SERVICE: &str = "eec9b274-0c81-4334-bdc2-54e90e689b9a";

fn manage_flows_scope() -> String {
    format!("https://auth.globus.org/scopes/{FLOWS_SERVICE}/manage_flows")
}

fn run_status_scope() -> String {
    format!("https://auth.globus.org/scopes/{FLOWS_SERVICE}/run_status")
}

/// Scope a caller needs to start runs of `flow_id`.
#[must_use]
pub fn flow_scope(flow_id: &str) -> String {
    format!(
        "https://auth.globus.org/scopes/{flow_id}/flow_{}_user",
        flow_id.replace('-', "_")
    )
}

/// Flows API client.
pub struct GlobusFlowsClient {
    http: Client,
    base: String,
    tokens: Arc<dyn AccessTokenSource>,
}

#[derive(Debug, Deserialize)]
struct FlowCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunStarted {
    run_id: String,
}

#[derive(Debug, Deserialize)]
struct RunDocument {
    status: FlowRunStatus,
}

impl GlobusFlowsClient {
    /// Client for the flows API at `flows_api`.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is invalid or the HTTP client cannot be built.
    pub fn new(
        flows_api: &str,
        tokens: Arc<dyn AccessTokenSource>,
        timeout: Duration,
    ) -> ClientResult<Self> {
        Ok(Self {
            http: build_http(timeout)?,
            base: base_url(flows_api)?,
            tokens,
        })
    }
}

#[async_trait]
impl FlowBackend for GlobusFlowsClient {
    async fn deploy_flow(&self, title: &str, definition: &Value) -> BackendResult<String> {
        let url = service_url("deploy_flow", &self.base, "flows")?;
        let token = self.tokens.token(&manage_flows_scope()).await?;
        let body = json!({
            "title": title,
            "definition": definition,
            "input_schema": {},
        });
        let created: FlowCreated = send_json(
            "deploy_flow",
            self.http.post(url).bearer_auth(token).json(&body),
        )
        .await?;
        debug!(flow_id = %created.id, title, "flow deployed");
        Ok(created.id)
    }

    async fn start_run(&self, flow_id: &str, label: &str, body: &Value) -> BackendResult<String> {
        let url = service_url("start_run", &self.base, &format!("flows/{flow_id}/run"))?;
        let token = self.tokens.token(&flow_scope(flow_id)).await?;
        let request = json!({"body": body, "label": label});
        let started: RunStarted = send_json(
            "start_run",
            self.http.post(url).bearer_auth(token).json(&request),
        )
        .await?;
        debug!(flow_id, run_id = %started.run_id, "flow run started");
        Ok(started.run_id)
    }

    async fn run_status(&self, run_id: &str) -> BackendResult<FlowRunStatus> {
        let url = service_url("run_status", &self.base, &format!("runs/{run_id}"))?;
        let token = self.tokens.token(&run_status_scope()).await?;
        let run: RunDocument =
            send_json("run_status", self.http.get(url).bearer_auth(token)).await?;
        Ok(run.status)
    }
}
