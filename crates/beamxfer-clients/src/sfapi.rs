//! Batch job adapter for the NERSC Superfacility API.
//!
//! # Design
//! - Authentication is an OAuth2 client-credentials grant with an RS256 JWT client assertion.
//! - Job submission is asynchronous on the service side: the submit call returns a task that
//!   resolves to the Slurm job id, so `submit_job` polls the task before returning.
//! - A job can be missing from `sacct` right after submission; that reads as pending.

use std::io;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use beamxfer_core::{
    BackendError, BackendResult, BatchBackend, JobState, JobStatus, PollError, PollPolicy,
    Probe, poll_until,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{CachedToken, TokenResponse};
use crate::error::{ClientError, ClientResult};
use crate::session::{base_url, build_http, send_json, service_url};

/// Environment variable naming the file that holds the client id.
pub const CLIENT_ID_PATH_ENV: &str = "PATH_NERSC_CLIENT_ID";
/// Environment variable naming the file that holds the PEM private key.
pub const PRIVATE_KEY_PATH_ENV: &str = "PATH_NERSC_PRI_KEY";

const ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 300;
const SUBMIT_POLL: PollPolicy = PollPolicy::new(Duration::from_secs(2), Duration::from_secs(120));

/// Client id and signing key registered with the superfacility API.
pub struct SfapiCredentials {
    client_id: String,
    key: EncodingKey,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    jti: String,
}

impl SfapiCredentials {
    /// Credentials from an in-memory client id and PEM key.
    ///
    /// # Errors
    ///
    /// Returns an error when the key is not an RSA PEM key.
    pub fn from_pem(client_id: impl Into<String>, pem: &[u8]) -> ClientResult<Self> {
        let key =
            EncodingKey::from_rsa_pem(pem).map_err(|source| ClientError::SigningKey { source })?;
        Ok(Self {
            client_id: client_id.into().trim().to_string(),
            key,
        })
    }

    /// Credentials from a client id file and a PEM key file.
    ///
    /// # Errors
    ///
    /// Returns an error when either file cannot be read or the key is unusable.
    pub fn from_files(client_id_path: &Path, key_path: &Path) -> ClientResult<Self> {
        let client_id = std::fs::read_to_string(client_id_path).map_err(|source| {
            ClientError::CredentialFile {
                path: client_id_path.to_path_buf(),
                source,
            }
        })?;
        let pem = std::fs::read(key_path).map_err(|source| ClientError::CredentialFile {
            path: key_path.to_path_buf(),
            source,
        })?;
        Self::from_pem(client_id, &pem)
    }

    /// Credentials from the files named by `PATH_NERSC_CLIENT_ID` and `PATH_NERSC_PRI_KEY`.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable is unset or the files are unusable.
    pub fn from_env() -> ClientResult<Self> {
        let client_id_path = std::env::var_os(CLIENT_ID_PATH_ENV).ok_or(ClientError::MissingEnv {
            name: CLIENT_ID_PATH_ENV,
        })?;
        let key_path = std::env::var_os(PRIVATE_KEY_PATH_ENV).ok_or(ClientError::MissingEnv {
            name: PRIVATE_KEY_PATH_ENV,
        })?;
        Self::from_files(Path::new(&client_id_path), Path::new(&key_path))
    }

    fn assertion(&self, audience: &str) -> BackendResult<String> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_id,
            sub: &self.client_id,
            aud: audience,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
            jti: Uuid::new_v4().to_string(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key).map_err(|err| {
            BackendError::Credentials {
                source_name: "sfapi_assertion",
                detail: err.to_string(),
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct SubmitAccepted {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskDocument {
    status: String,
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResult {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    jobid: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobsDocument {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Vec<JobRow>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobRow {
    state: String,
    #[serde(default)]
    exitcode: Option<String>,
}

/// Slurm exit codes are reported as `<exit>:<signal>`.
fn parse_exit_code(raw: &str) -> Option<i32> {
    raw.split(':').next()?.trim().parse().ok()
}

/// Superfacility API client bound to one machine.
pub struct SfapiClient {
    http: Client,
    base: String,
    token_url: String,
    machine: String,
    credentials: SfapiCredentials,
    token: Mutex<Option<CachedToken>>,
    submit_poll: PollPolicy,
}

impl SfapiClient {
    /// Client for `machine` behind the API at `sfapi_api`.
    ///
    /// # Errors
    ///
    /// Returns an error when a URL is invalid or the HTTP client cannot be built.
    pub fn new(
        sfapi_api: &str,
        token_url: &str,
        machine: impl Into<String>,
        credentials: SfapiCredentials,
        timeout: Duration,
    ) -> ClientResult<Self> {
        Ok(Self {
            http: build_http(timeout)?,
            base: base_url(sfapi_api)?,
            token_url: base_url(token_url)?,
            machine: machine.into(),
            credentials,
            token: Mutex::new(None),
            submit_poll: SUBMIT_POLL,
        })
    }

    /// Override how long `submit_job` waits for the job id.
    #[must_use]
    pub fn with_submit_poll(mut self, policy: PollPolicy) -> Self {
        self.submit_poll = policy;
        self
    }

    async fn bearer(&self) -> BackendResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().and_then(CachedToken::usable) {
            return Ok(token.to_string());
        }
        let assertion = self.credentials.assertion(&self.token_url)?;
        let form = [
            ("grant_type", "client_credentials"),
            ("client_assertion_type", ASSERTION_TYPE),
            ("client_assertion", assertion.as_str()),
        ];
        let response: TokenResponse =
            send_json("sfapi_token", self.http.post(&self.token_url).form(&form))
                .await
                .map_err(|err| BackendError::Credentials {
                    source_name: "sfapi_token",
                    detail: err.to_string(),
                })?;
        *cached = Some(CachedToken::issued(&response));
        Ok(response.access_token)
    }

    async fn submit_task(&self, task_id: &str) -> BackendResult<Probe<String, String>> {
        let url = service_url("submit_job", &self.base, &format!("tasks/{task_id}"))?;
        let token = self.bearer().await?;
        let task: TaskDocument =
            send_json("submit_job", self.http.get(url).bearer_auth(token)).await?;
        if !task.status.eq_ignore_ascii_case("completed") {
            return Ok(Probe::Pending(task.status));
        }
        let raw = task.result.unwrap_or_default();
        let result: SubmitResult = serde_json::from_str(&raw)
            .map_err(|err| BackendError::decode("submit_job", err.to_string()))?;
        let failed = result
            .status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case("error"));
        match result.jobid {
            Some(job_id) if !failed => Ok(Probe::Ready(job_id)),
            _ => Err(BackendError::Rejected {
                operation: "submit_job",
                status: 200,
                code: result.status,
                message: result.error,
            }),
        }
    }
}

#[async_trait]
impl BatchBackend for SfapiClient {
    async fn submit_job(&self, script: &str) -> BackendResult<String> {
        let url = service_url(
            "submit_job",
            &self.base,
            &format!("compute/jobs/{}", self.machine),
        )?;
        let token = self.bearer().await?;
        let accepted: SubmitAccepted = send_json(
            "submit_job",
            self.http
                .post(url)
                .bearer_auth(token)
                .form(&[("job", script), ("isPath", "false")]),
        )
        .await?;
        debug!(task_id = %accepted.task_id, machine = %self.machine, "job submission accepted");

        let job_id = poll_until(
            self.submit_poll,
            || self.submit_task(&accepted.task_id),
            |_| false,
        )
        .await
        .map_err(|err| match err {
            PollError::Check(err) => err,
            PollError::NonRetryable(status) | PollError::TimedOut { last: status, .. } => {
                BackendError::transport(
                    "submit_job",
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("submission task still {status}"),
                    ),
                )
            }
        })?;
        info!(job_id = %job_id, machine = %self.machine, "job submitted");
        Ok(job_id)
    }

    async fn job_status(&self, job_id: &str) -> BackendResult<JobStatus> {
        let url = service_url(
            "job_status",
            &self.base,
            &format!("compute/jobs/{}/{job_id}", self.machine),
        )?;
        let token = self.bearer().await?;
        let jobs: JobsDocument = send_json(
            "job_status",
            self.http
                .get(url)
                .bearer_auth(token)
                .query(&[("sacct", "true")]),
        )
        .await?;

        if let Some(row) = jobs.output.into_iter().next() {
            return Ok(JobStatus {
                state: JobState::from_slurm(&row.state),
                exit_code: row.exitcode.as_deref().and_then(parse_exit_code),
            });
        }
        let errored = jobs
            .status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case("error"));
        let not_found = jobs
            .error
            .as_deref()
            .is_none_or(|message| message.to_ascii_lowercase().contains("not found"));
        if errored && !not_found {
            return Err(BackendError::Rejected {
                operation: "job_status",
                status: 200,
                code: jobs.status,
                message: jobs.error,
            });
        }
        Ok(JobStatus::new(JobState::Pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use httpmock::prelude::*;
    use serde_json::json;

    const TEST_KEY: &[u8] = include_bytes!("../tests/fixtures/sfapi_test_key.pem");

    fn client(server: &MockServer) -> anyhow::Result<SfapiClient> {
        let credentials = SfapiCredentials::from_pem("client-123\n", TEST_KEY)?;
        Ok(SfapiClient::new(
            &server.url("/api/v1.2"),
            &server.url("/token"),
            "perlmutter",
            credentials,
            Duration::from_secs(5),
        )?
        .with_submit_poll(PollPolicy::new(
            Duration::from_millis(10),
            Duration::from_secs(2),
        )))
    }

    fn token_mock(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("grant_type=client_credentials")
                .body_includes("client_assertion=");
            then.status(200)
                .json_body(json!({"access_token": "sf-token", "expires_in": 600}));
        })
    }

    #[test]
    fn exit_codes_drop_the_signal() {
        assert_eq!(parse_exit_code("0:0"), Some(0));
        assert_eq!(parse_exit_code("2:15"), Some(2));
        assert_eq!(parse_exit_code("junk"), None);
    }

    #[test]
    fn non_rsa_keys_are_rejected() {
        let result = SfapiCredentials::from_pem("id", b"not a key");
        assert!(matches!(result, Err(ClientError::SigningKey { .. })));
    }

    #[tokio::test]
    async fn submit_resolves_the_job_id_through_the_task() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let token = token_mock(&server);
        let submit = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1.2/compute/jobs/perlmutter")
                .header("authorization", "Bearer sf-token")
                .body_includes("isPath=false");
            then.status(200)
                .json_body(json!({"task_id": "77", "status": "OK", "error": null}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/v1.2/tasks/77");
            then.status(200).json_body(json!({
                "id": "77",
                "status": "completed",
                "result": "{\"status\": \"ok\", \"jobid\": \"4242\", \"error\": null}"
            }));
        });

        let job_id = client(&server)?.submit_job("#!/bin/bash\necho hi\n").await?;
        assert_eq!(job_id, "4242");
        token.assert_calls(1);
        submit.assert();
        Ok(())
    }

    #[tokio::test]
    async fn sacct_rows_map_to_job_states() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        token_mock(&server);
        server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1.2/compute/jobs/perlmutter/4242")
                .query_param("sacct", "true");
            then.status(200).json_body(json!({
                "status": "OK",
                "output": [{"jobid": "4242", "state": "FAILED", "exitcode": "1:0"}],
                "error": null
            }));
        });

        let status = client(&server)?.job_status("4242").await?;
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.exit_code, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_job_right_after_submit_is_pending() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        token_mock(&server);
        server.mock(|when, then| {
            when.method(GET).path("/api/v1.2/compute/jobs/perlmutter/4243");
            then.status(200).json_body(json!({
                "status": "ERROR",
                "output": [],
                "error": "Job not found: 4243"
            }));
        });

        let status = client(&server)?.job_status("4243").await?;
        assert_eq!(status.state, JobState::Pending);
        Ok(())
    }
}
