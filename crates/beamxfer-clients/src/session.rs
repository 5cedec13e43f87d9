//! Request plumbing shared by every adapter.

use std::time::Duration;

use beamxfer_core::{BackendError, BackendResult};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ClientError, ClientResult};

pub(crate) fn build_http(timeout: Duration) -> ClientResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|source| ClientError::HttpClient { source })
}

/// Validate a base URL and return it without a trailing slash.
pub(crate) fn base_url(raw: &str) -> ClientResult<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    Url::parse(trimmed).map_err(|source| ClientError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    Ok(trimmed.to_string())
}

/// `base` joined with `path`, keeping any path prefix the base carries.
pub(crate) fn service_url(
    operation: &'static str,
    base: &str,
    path: &str,
) -> BackendResult<Url> {
    let raw = format!("{base}/{}", path.trim_start_matches('/'));
    Url::parse(&raw).map_err(|err| BackendError::decode(operation, format!("{raw}: {err}")))
}

/// Send `request`; non-success statuses become [`BackendError::Rejected`].
pub(crate) async fn send(operation: &'static str, request: RequestBuilder) -> BackendResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|err| BackendError::transport(operation, err))?;
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(rejection(operation, response).await)
    }
}

/// Send `request` and decode a JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    operation: &'static str,
    request: RequestBuilder,
) -> BackendResult<T> {
    let response = send(operation, request).await?;
    response
        .json::<T>()
        .await
        .map_err(|err| BackendError::decode(operation, err.to_string()))
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<Value>,
}

async fn rejection(operation: &'static str, response: Response) -> BackendError {
    let status = response.status().as_u16();
    let bytes = response.bytes().await.unwrap_or_default();
    let body = serde_json::from_slice::<ErrorBody>(&bytes).unwrap_or_default();
    let message = body
        .message
        .or_else(|| {
            body.detail.map(|detail| match detail {
                Value::String(text) => text,
                other => other.to_string(),
            })
        })
        .or_else(|| {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            (!text.is_empty()).then_some(text)
        });
    BackendError::Rejected {
        operation,
        status,
        code: body.code,
        message,
    }
}
