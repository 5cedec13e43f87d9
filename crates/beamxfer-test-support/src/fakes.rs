//! In-memory backends that record what controllers ask of them.
//!
//! Each fake answers from a script; once the script runs dry it falls back to a success
//! answer so tests only spell out the interesting part.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use beamxfer_core::{
    BackendError, BackendResult, BatchBackend, DeferredPrune, DeferredScheduler,
    DeleteSubmission, EntryKind, FlowBackend, FlowRunStatus, JobState, JobStatus, MetricsSink,
    RemoteEntry, TaskSnapshot, TaskStatus, TransferBackend, TransferMetricsRecord,
    TransferSubmission,
};
use chrono::{DateTime, Utc};
use serde_json::Value;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn offline(operation: &'static str) -> BackendError {
    BackendError::transport(
        operation,
        io::Error::new(io::ErrorKind::ConnectionRefused, "fake backend offline"),
    )
}

fn parent_and_name(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => ("/".to_string(), trimmed.to_string()),
    }
}

fn normalize_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

enum ScriptedTask {
    Status(TaskStatus, Option<String>),
    Offline,
}

#[derive(Default)]
struct TransferState {
    // endpoint id -> absolute path -> entry
    tree: HashMap<String, BTreeMap<String, RemoteEntry>>,
    script: VecDeque<ScriptedTask>,
    submissions: Vec<TransferSubmission>,
    deletes: Vec<DeleteSubmission>,
    cancelled: Vec<String>,
    status_calls: usize,
    stat_unsupported: bool,
    submit_offline: bool,
    listing_offline: bool,
    next_task: usize,
}

/// Managed transfer backend backed by an in-memory directory tree.
#[derive(Default)]
pub struct FakeTransferBackend {
    state: Mutex<TransferState>,
}

impl FakeTransferBackend {
    /// Empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file (and its parent directories) to `endpoint_id`.
    pub fn add_file(&self, endpoint_id: &str, path: &str, size: u64) {
        self.insert(endpoint_id, path, EntryKind::File, size, None);
    }

    /// Add a file with a known modification time.
    pub fn add_file_modified(
        &self,
        endpoint_id: &str,
        path: &str,
        size: u64,
        modified: DateTime<Utc>,
    ) {
        self.insert(endpoint_id, path, EntryKind::File, size, Some(modified));
    }

    /// Add a directory (and its parents) to `endpoint_id`.
    pub fn add_dir(&self, endpoint_id: &str, path: &str) {
        self.insert(endpoint_id, path, EntryKind::Dir, 0, None);
    }

    fn insert(
        &self,
        endpoint_id: &str,
        path: &str,
        kind: EntryKind,
        size: u64,
        modified: Option<DateTime<Utc>>,
    ) {
        let mut state = lock(&self.state);
        let tree = state.tree.entry(endpoint_id.to_string()).or_default();
        let path = normalize_dir(path);
        let (mut parent, name) = parent_and_name(&path);
        tree.insert(
            path,
            RemoteEntry {
                name,
                kind,
                size,
                last_modified: modified,
            },
        );
        while parent != "/" {
            let (next, name) = parent_and_name(&parent);
            tree.entry(parent).or_insert(RemoteEntry {
                name,
                kind: EntryKind::Dir,
                size: 0,
                last_modified: None,
            });
            parent = next;
        }
    }

    /// Queue a status answer for the next `task_status` call.
    pub fn push_status(&self, status: TaskStatus, nice_status: Option<&str>) {
        lock(&self.state)
            .script
            .push_back(ScriptedTask::Status(status, nice_status.map(str::to_string)));
    }

    /// Queue a transport failure for the next `task_status` call.
    pub fn push_status_offline(&self) {
        lock(&self.state).script.push_back(ScriptedTask::Offline);
    }

    /// Answer `stat` as unsupported so callers fall back to listings.
    pub fn disable_stat(&self) {
        lock(&self.state).stat_unsupported = true;
    }

    /// Fail every submission with a transport error.
    pub fn fail_submissions(&self) {
        lock(&self.state).submit_offline = true;
    }

    /// Fail every listing and stat with a transport error.
    pub fn fail_listings(&self) {
        lock(&self.state).listing_offline = true;
    }

    /// Transfers submitted so far.
    #[must_use]
    pub fn submissions(&self) -> Vec<TransferSubmission> {
        lock(&self.state).submissions.clone()
    }

    /// Deletes submitted so far.
    #[must_use]
    pub fn deletes(&self) -> Vec<DeleteSubmission> {
        lock(&self.state).deletes.clone()
    }

    /// Tasks cancelled so far.
    #[must_use]
    pub fn cancelled(&self) -> Vec<String> {
        lock(&self.state).cancelled.clone()
    }

    /// Number of `task_status` calls answered.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        lock(&self.state).status_calls
    }

    /// Whether `path` is present on `endpoint_id`.
    #[must_use]
    pub fn contains(&self, endpoint_id: &str, path: &str) -> bool {
        lock(&self.state)
            .tree
            .get(endpoint_id)
            .is_some_and(|tree| tree.contains_key(&normalize_dir(path)))
    }

    fn next_task_id(state: &mut TransferState) -> String {
        state.next_task += 1;
        format!("task-{}", state.next_task)
    }
}

#[async_trait]
impl TransferBackend for FakeTransferBackend {
    async fn submit_transfer(&self, submission: &TransferSubmission) -> BackendResult<String> {
        let mut state = lock(&self.state);
        if state.submit_offline {
            return Err(offline("submit_transfer"));
        }
        state.submissions.push(submission.clone());
        Ok(Self::next_task_id(&mut state))
    }

    async fn submit_delete(&self, submission: &DeleteSubmission) -> BackendResult<String> {
        let mut state = lock(&self.state);
        if state.submit_offline {
            return Err(offline("submit_delete"));
        }
        state.deletes.push(submission.clone());
        if let Some(tree) = state.tree.get_mut(&submission.endpoint) {
            for path in &submission.paths {
                let path = normalize_dir(path);
                let prefix = format!("{path}/");
                tree.retain(|key, _| key != &path && !key.starts_with(&prefix));
            }
        }
        Ok(Self::next_task_id(&mut state))
    }

    async fn task_status(&self, task_id: &str) -> BackendResult<TaskSnapshot> {
        let mut state = lock(&self.state);
        state.status_calls += 1;
        match state.script.pop_front() {
            Some(ScriptedTask::Offline) => Err(offline("task_status")),
            Some(ScriptedTask::Status(status, nice_status)) => Ok(TaskSnapshot {
                task_id: task_id.to_string(),
                status,
                nice_status,
            }),
            None => Ok(TaskSnapshot {
                task_id: task_id.to_string(),
                status: TaskStatus::Succeeded,
                nice_status: None,
            }),
        }
    }

    async fn cancel_task(&self, task_id: &str) -> BackendResult<()> {
        lock(&self.state).cancelled.push(task_id.to_string());
        Ok(())
    }

    async fn list_directory(
        &self,
        endpoint_id: &str,
        path: &str,
    ) -> BackendResult<Vec<RemoteEntry>> {
        let state = lock(&self.state);
        if state.listing_offline {
            return Err(offline("list_directory"));
        }
        let dir = normalize_dir(path);
        let tree = state.tree.get(endpoint_id);
        let is_dir = dir == "/" || tree.and_then(|tree| tree.get(&dir)).is_some_and(RemoteEntry::is_dir);
        if !is_dir {
            return Err(BackendError::Rejected {
                operation: "list_directory",
                status: 404,
                code: Some("ClientError.NotFound".to_string()),
                message: None,
            });
        }
        Ok(tree
            .map(|tree| {
                tree.iter()
                    .filter(|(key, _)| parent_and_name(key).0 == dir)
                    .map(|(_, entry)| entry.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn stat(&self, endpoint_id: &str, path: &str) -> BackendResult<Option<RemoteEntry>> {
        let state = lock(&self.state);
        if state.stat_unsupported {
            return Err(BackendError::Unsupported { operation: "stat" });
        }
        if state.listing_offline {
            return Err(offline("stat"));
        }
        Ok(state
            .tree
            .get(endpoint_id)
            .and_then(|tree| tree.get(&normalize_dir(path)))
            .cloned())
    }
}

#[derive(Default)]
struct BatchState {
    scripts: Vec<String>,
    statuses: VecDeque<BackendResult<JobStatus>>,
    submit_offline: bool,
    exit_code: Option<i32>,
}

/// Batch backend that captures rendered scripts.
#[derive(Default)]
pub struct FakeBatchBackend {
    state: Mutex<BatchState>,
}

impl FakeBatchBackend {
    /// Backend whose jobs complete immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a state for the next `job_status` call.
    pub fn push_state(&self, state: JobState, exit_code: Option<i32>) {
        lock(&self.state)
            .statuses
            .push_back(Ok(JobStatus { state, exit_code }));
    }

    /// Queue a transport failure for the next `job_status` call.
    pub fn push_offline(&self) {
        lock(&self.state)
            .statuses
            .push_back(Err(offline("job_status")));
    }

    /// Exit code reported once the script runs dry.
    pub fn finish_with_exit_code(&self, exit_code: i32) {
        lock(&self.state).exit_code = Some(exit_code);
    }

    /// Fail every submission.
    pub fn fail_submissions(&self) {
        lock(&self.state).submit_offline = true;
    }

    /// Scripts submitted so far.
    #[must_use]
    pub fn scripts(&self) -> Vec<String> {
        lock(&self.state).scripts.clone()
    }
}

#[async_trait]
impl BatchBackend for FakeBatchBackend {
    async fn submit_job(&self, script: &str) -> BackendResult<String> {
        let mut state = lock(&self.state);
        if state.submit_offline {
            return Err(offline("submit_job"));
        }
        state.scripts.push(script.to_string());
        Ok(format!("{}", 1000 + state.scripts.len()))
    }

    async fn job_status(&self, _job_id: &str) -> BackendResult<JobStatus> {
        let mut state = lock(&self.state);
        let exit_code = state.exit_code;
        state.statuses.pop_front().unwrap_or_else(|| {
            let job_state = match exit_code {
                Some(code) if code != 0 => JobState::Failed,
                _ => JobState::Completed,
            };
            Ok(JobStatus {
                state: job_state,
                exit_code: Some(exit_code.unwrap_or(0)),
            })
        })
    }
}

/// Flow run started through [`FakeFlowBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct StartedRun {
    /// Flow identifier.
    pub flow_id: String,
    /// Run label.
    pub label: String,
    /// Run input.
    pub body: Value,
}

#[derive(Default)]
struct FlowState {
    deployed: Vec<(String, Value)>,
    runs: Vec<StartedRun>,
    statuses: VecDeque<FlowRunStatus>,
    start_offline: bool,
}

/// Flow backend that records deployments and runs.
#[derive(Default)]
pub struct FakeFlowBackend {
    state: Mutex<FlowState>,
}

impl FakeFlowBackend {
    /// Backend whose runs succeed immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a status for the next `run_status` call.
    pub fn push_status(&self, status: FlowRunStatus) {
        lock(&self.state).statuses.push_back(status);
    }

    /// Fail every run start.
    pub fn fail_runs(&self) {
        lock(&self.state).start_offline = true;
    }

    /// Flow definitions deployed so far.
    #[must_use]
    pub fn deployed(&self) -> Vec<(String, Value)> {
        lock(&self.state).deployed.clone()
    }

    /// Runs started so far.
    #[must_use]
    pub fn runs(&self) -> Vec<StartedRun> {
        lock(&self.state).runs.clone()
    }
}

#[async_trait]
impl FlowBackend for FakeFlowBackend {
    async fn deploy_flow(&self, title: &str, definition: &Value) -> BackendResult<String> {
        let mut state = lock(&self.state);
        state.deployed.push((title.to_string(), definition.clone()));
        Ok(format!("flow-{}", state.deployed.len()))
    }

    async fn start_run(&self, flow_id: &str, label: &str, body: &Value) -> BackendResult<String> {
        let mut state = lock(&self.state);
        if state.start_offline {
            return Err(offline("start_run"));
        }
        state.runs.push(StartedRun {
            flow_id: flow_id.to_string(),
            label: label.to_string(),
            body: body.clone(),
        });
        Ok(format!("run-{}", state.runs.len()))
    }

    async fn run_status(&self, _run_id: &str) -> BackendResult<FlowRunStatus> {
        Ok(lock(&self.state)
            .statuses
            .pop_front()
            .unwrap_or(FlowRunStatus::Succeeded))
    }
}

/// Deferred scheduler that keeps every job it is handed.
#[derive(Default)]
pub struct RecordingScheduler {
    jobs: Mutex<Vec<DeferredPrune>>,
    offline: Mutex<bool>,
}

impl RecordingScheduler {
    /// Scheduler that accepts every job.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every job with a transport error.
    pub fn go_offline(&self) {
        *lock(&self.offline) = true;
    }

    /// Jobs scheduled so far.
    #[must_use]
    pub fn jobs(&self) -> Vec<DeferredPrune> {
        lock(&self.jobs).clone()
    }
}

#[async_trait]
impl DeferredScheduler for RecordingScheduler {
    async fn schedule(&self, job: &DeferredPrune) -> BackendResult<String> {
        if *lock(&self.offline) {
            return Err(offline("schedule"));
        }
        let mut jobs = lock(&self.jobs);
        jobs.push(job.clone());
        Ok(format!("deferred-{}", jobs.len()))
    }
}

/// Metrics sink that keeps every record.
#[derive(Default)]
pub struct RecordingMetricsSink {
    records: Mutex<Vec<TransferMetricsRecord>>,
    offline: Mutex<bool>,
}

impl RecordingMetricsSink {
    /// Sink that accepts every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every push with a transport error, after recording it.
    pub fn go_offline(&self) {
        *lock(&self.offline) = true;
    }

    /// Records pushed so far.
    #[must_use]
    pub fn records(&self) -> Vec<TransferMetricsRecord> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl MetricsSink for RecordingMetricsSink {
    async fn push(&self, record: &TransferMetricsRecord) -> BackendResult<()> {
        lock(&self.records).push(record.clone());
        if *lock(&self.offline) {
            return Err(offline("push_metrics"));
        }
        Ok(())
    }
}
