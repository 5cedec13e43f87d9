//! OAuth2 client credentials for the managed transfer and flows services.
//!
//! # Design
//! - Tokens are cached per scope and refreshed a minute before they expire.
//! - Adapters ask for a token on every call; only the cache decides when to hit the network.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use beamxfer_core::{BackendError, BackendResult};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ClientResult;
use crate::session::{base_url, build_http, send_json, service_url};

const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Source of bearer tokens for a scope.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// Bearer token valid for `scope`.
    async fn token(&self, scope: &str) -> BackendResult<String>;
}

/// Fixed token, for development and tests.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap a token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn token(&self, _scope: &str) -> BackendResult<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    pub(crate) fn issued(response: &TokenResponse) -> Self {
        Self {
            access_token: response.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        }
    }

    /// Token value while it is outside the refresh margin.
    pub(crate) fn usable(&self) -> Option<&str> {
        (self.expires_at > Instant::now() + REFRESH_MARGIN).then_some(self.access_token.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
    #[serde(default = "default_expiry")]
    pub(crate) expires_in: u64,
}

const fn default_expiry() -> u64 {
    3600
}

/// Confidential client that exchanges its id and secret for scoped tokens.
pub struct ClientCredentials {
    http: Client,
    auth_base: String,
    client_id: String,
    client_secret: String,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl ClientCredentials {
    /// Client for the auth service at `auth_api`.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is invalid or the HTTP client cannot be built.
    pub fn new(
        auth_api: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> ClientResult<Self> {
        Ok(Self {
            http: build_http(timeout)?,
            auth_base: base_url(auth_api)?,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cache: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl AccessTokenSource for ClientCredentials {
    async fn token(&self, scope: &str) -> BackendResult<String> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.get(scope).and_then(CachedToken::usable) {
            return Ok(token.to_string());
        }

        let url = service_url("token", &self.auth_base, "v2/oauth2/token")?;
        let request = self
            .http
            .post(url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials"), ("scope", scope)]);
        let response: TokenResponse = send_json("token", request).await.map_err(|err| {
            BackendError::Credentials {
                source_name: "client_credentials",
                detail: err.to_string(),
            }
        })?;

        debug!(scope, expires_in = response.expires_in, "access token issued");
        cache.insert(scope.to_string(), CachedToken::issued(&response));
        Ok(response.access_token)
    }
}
