//! Managed transfer service adapter (Globus Transfer API v0.10).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beamxfer_core::{
    BackendError, BackendResult, DeleteSubmission, EntryKind, RemoteEntry, TaskSnapshot,
    TaskStatus, TransferBackend, TransferSubmission,
};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::auth::AccessTokenSource;
use crate::error::ClientResult;
use crate::session::{base_url, build_http, send, send_json, service_url};

/// Scope granting full access to the transfer API.
pub const TRANSFER_SCOPE: &str = "urn:globus:auth:scope:transfer.api.globus.org:all";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// Transfer API client.
pub struct GlobusTransferClient {
    http: Client,
    base: String,
    tokens: Arc<dyn AccessTokenSource>,
}

#[derive(Debug, Deserialize)]
struct SubmissionId {
    value: String,
}

#[derive(Debug, Deserialize)]
struct TaskAccepted {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskDocument {
    task_id: String,
    status: TaskStatus,
    #[serde(default)]
    nice_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntryDocument {
    name: String,
    #[serde(rename = "type")]
    kind: EntryKind,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    last_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(rename = "DATA", default)]
    data: Vec<EntryDocument>,
}

impl EntryDocument {
    fn into_entry(self) -> RemoteEntry {
        let last_modified = self.last_modified.as_deref().and_then(parse_timestamp);
        RemoteEntry {
            name: self.name,
            kind: self.kind,
            size: self.size.unwrap_or_default(),
            last_modified,
        }
    }
}

/// Listing timestamps look like `2022-11-01 23:17:43+00:00`.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|stamp| stamp.with_timezone(&Utc))
}

impl GlobusTransferClient {
    /// Client for the transfer API at `transfer_api`.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is invalid or the HTTP client cannot be built.
    pub fn new(
        transfer_api: &str,
        tokens: Arc<dyn AccessTokenSource>,
        timeout: Duration,
    ) -> ClientResult<Self> {
        Ok(Self {
            http: build_http(timeout)?,
            base: base_url(transfer_api)?,
            tokens,
        })
    }

    async fn bearer(&self) -> BackendResult<String> {
        self.tokens.token(TRANSFER_SCOPE).await
    }

    async fn submission_id(&self) -> BackendResult<String> {
        let url = service_url("submission_id", &self.base, "submission_id")?;
        let token = self.bearer().await?;
        let id: SubmissionId =
            send_json("submission_id", self.http.get(url).bearer_auth(token)).await?;
        Ok(id.value)
    }
}

#[async_trait]
impl TransferBackend for GlobusTransferClient {
    async fn submit_transfer(&self, submission: &TransferSubmission) -> BackendResult<String> {
        let submission_id = self.submission_id().await?;
        let items: Vec<_> = submission
            .items
            .iter()
            .map(|item| {
                json!({
                    "DATA_TYPE": "transfer_item",
                    "source_path": item.source_path,
                    "destination_path": item.destination_path,
                    "recursive": item.recursive,
                })
            })
            .collect();
        let body = json!({
            "DATA_TYPE": "transfer",
            "submission_id": submission_id,
            "source_endpoint": submission.source_endpoint,
            "destination_endpoint": submission.destination_endpoint,
            "label": submission.label,
            "sync_level": submission.sync_level.level(),
            "verify_checksum": true,
            "DATA": items,
        });

        let url = service_url("submit_transfer", &self.base, "transfer")?;
        let token = self.bearer().await?;
        let accepted: TaskAccepted = send_json(
            "submit_transfer",
            self.http.post(url).bearer_auth(token).json(&body),
        )
        .await?;
        debug!(task_id = %accepted.task_id, items = submission.items.len(), "transfer accepted");
        Ok(accepted.task_id)
    }

    async fn submit_delete(&self, submission: &DeleteSubmission) -> BackendResult<String> {
        let submission_id = self.submission_id().await?;
        let items: Vec<_> = submission
            .paths
            .iter()
            .map(|path| json!({"DATA_TYPE": "delete_item", "path": path}))
            .collect();
        let body = json!({
            "DATA_TYPE": "delete",
            "submission_id": submission_id,
            "endpoint": submission.endpoint,
            "label": submission.label,
            "recursive": submission.recursive,
            "DATA": items,
        });

        let url = service_url("submit_delete", &self.base, "delete")?;
        let token = self.bearer().await?;
        let accepted: TaskAccepted = send_json(
            "submit_delete",
            self.http.post(url).bearer_auth(token).json(&body),
        )
        .await?;
        debug!(task_id = %accepted.task_id, paths = submission.paths.len(), "delete accepted");
        Ok(accepted.task_id)
    }

    async fn task_status(&self, task_id: &str) -> BackendResult<TaskSnapshot> {
        let url = service_url("task_status", &self.base, &format!("task/{task_id}"))?;
        let token = self.bearer().await?;
        let task: TaskDocument =
            send_json("task_status", self.http.get(url).bearer_auth(token)).await?;
        Ok(TaskSnapshot {
            task_id: task.task_id,
            status: task.status,
            nice_status: task.nice_status,
        })
    }

    async fn cancel_task(&self, task_id: &str) -> BackendResult<()> {
        let url = service_url("cancel_task", &self.base, &format!("task/{task_id}/cancel"))?;
        let token = self.bearer().await?;
        send("cancel_task", self.http.post(url).bearer_auth(token)).await?;
        Ok(())
    }

    async fn list_directory(
        &self,
        endpoint_id: &str,
        path: &str,
    ) -> BackendResult<Vec<RemoteEntry>> {
        let url = service_url(
            "list_directory",
            &self.base,
            &format!("operation/endpoint/{endpoint_id}/ls"),
        )?;
        let token = self.bearer().await?;
        let listing: Listing = send_json(
            "list_directory",
            self.http.get(url).bearer_auth(token).query(&[("path", path)]),
        )
        .await?;
        Ok(listing
            .data
            .into_iter()
            .map(EntryDocument::into_entry)
            .collect())
    }

    async fn stat(&self, endpoint_id: &str, path: &str) -> BackendResult<Option<RemoteEntry>> {
        let url = service_url(
            "stat",
            &self.base,
            &format!("operation/endpoint/{endpoint_id}/stat"),
        )?;
        let token = self.bearer().await?;
        let result: BackendResult<EntryDocument> = send_json(
            "stat",
            self.http.get(url).bearer_auth(token).query(&[("path", path)]),
        )
        .await;
        match result {
            Ok(entry) => Ok(Some(entry.into_entry())),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}
