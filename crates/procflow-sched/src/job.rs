//! Job types and the job state machine.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{SchedError, SchedResult};

/// Identifier the external batch scheduler assigned to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteJobId(pub u64);

impl std::fmt::Display for RemoteJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a job within a run: the owning set plus the job type.
///
/// Job types are unique within a year set, so this pair is unique per run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub set_number: u32,
    pub job_type: String,
}

impl JobKey {
    pub fn new(set_number: u32, job_type: impl Into<String>) -> Self {
        Self {
            set_number,
            job_type: job_type.into(),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "set{}/{}", self.set_number, self.job_type)
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Passed static validation, not launched yet.
    Valid,
    /// Failed static validation; never scheduled.
    Invalid,
    /// Launch attempted but required input is not local yet.
    WaitingOnInput,
    /// Accepted by the batch scheduler.
    Submitted,
    /// Queued in the batch scheduler.
    Pending,
    /// Running in the batch scheduler.
    Running,
    /// Finished and passed post-validation.
    Completed,
    /// Failed remotely or failed post-validation.
    Failed,
}

impl JobStatus {
    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Invalid
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Re-entering the current non-terminal state is allowed so repeated
    /// scheduler reports of the same state are harmless.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            Completed | Failed | Invalid => false,
            Valid => matches!(next, Submitted | WaitingOnInput | Completed | Failed),
            WaitingOnInput => matches!(next, WaitingOnInput | Submitted | Completed | Failed),
            Submitted => matches!(next, Pending | Running | Completed | Failed),
            Pending | Running => matches!(next, Pending | Running | Completed | Failed),
        }
    }

    /// Get a human-readable status name.
    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Valid => "Valid",
            JobStatus::Invalid => "Invalid",
            JobStatus::WaitingOnInput => "WaitingOnInput",
            JobStatus::Submitted => "Submitted",
            JobStatus::Pending => "Pending",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What happened when a job was asked to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// The expected output already exists; nothing to run.
    AlreadyComplete,
    /// Required input is not local yet; ask again later.
    NeedsInput,
    /// Submitted to the batch scheduler under this identifier.
    Submitted(RemoteJobId),
}

/// Behavior of one job type.
///
/// Implementations must be safe to call repeatedly: `execute` is retried
/// while input is missing and `postvalidate` may run more than once.
#[async_trait]
pub trait JobPayload: Send + Sync {
    /// Try to launch the job.
    async fn execute(&self) -> SchedResult<ExecuteOutcome>;

    /// Check that the job produced its expected output.
    async fn postvalidate(&self) -> bool;

    /// Directory of browsable output to hand to the host hook, if any.
    fn hosted_output(&self) -> Option<PathBuf> {
        None
    }
}

/// Opaque per-job settings from configuration.
pub type JobSettings = std::collections::BTreeMap<String, String>;

/// Mutable part of a job, guarded by the job's lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    /// Current status.
    pub status: JobStatus,

    /// Remote identifier, once submitted.
    pub remote_id: Option<RemoteJobId>,

    /// When the monitor started working on the job.
    pub start_time: Option<DateTime<Utc>>,

    /// When the job reached a terminal remote state.
    pub end_time: Option<DateTime<Utc>>,

    /// Set by the dispatcher when a monitor task has been assigned.
    pub claimed: bool,
}

/// One schedulable unit of work inside a year set.
pub struct Job {
    /// Unique key within the run.
    pub key: JobKey,

    /// Job types in the same set that must complete first.
    pub depends_on: Vec<String>,

    /// Configuration bag handed through to the payload and hosting rules.
    pub settings: JobSettings,

    payload: Arc<dyn JobPayload>,
    state: RwLock<JobState>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("key", &self.key)
            .field("depends_on", &self.depends_on)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Job {
    /// Create a job that passed static validation.
    pub fn new(key: JobKey, payload: Arc<dyn JobPayload>) -> Self {
        Self::with_status(key, payload, JobStatus::Valid)
    }

    /// Create a job that failed static validation.
    pub fn invalid(key: JobKey, payload: Arc<dyn JobPayload>) -> Self {
        Self::with_status(key, payload, JobStatus::Invalid)
    }

    fn with_status(key: JobKey, payload: Arc<dyn JobPayload>, status: JobStatus) -> Self {
        Self {
            key,
            depends_on: Vec::new(),
            settings: JobSettings::new(),
            payload,
            state: RwLock::new(JobState {
                status,
                remote_id: None,
                start_time: None,
                end_time: None,
                claimed: false,
            }),
        }
    }

    /// Add a dependency on a sibling job type.
    pub fn depends_on(mut self, job_type: impl Into<String>) -> Self {
        self.depends_on.push(job_type.into());
        self
    }

    /// Add multiple dependencies.
    pub fn depends_on_all(mut self, job_types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on.extend(job_types.into_iter().map(Into::into));
        self
    }

    /// Attach configuration settings.
    pub fn with_settings(mut self, settings: JobSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The job type, e.g. `climo`.
    pub fn job_type(&self) -> &str {
        &self.key.job_type
    }

    /// The job's behavior.
    pub fn payload(&self) -> &Arc<dyn JobPayload> {
        &self.payload
    }

    /// Current status.
    pub async fn status(&self) -> JobStatus {
        self.state.read().await.status
    }

    /// Copy of the full mutable state.
    pub async fn state(&self) -> JobState {
        self.state.read().await.clone()
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// Returns whether the status actually changed.
    pub async fn transition(&self, next: JobStatus) -> SchedResult<bool> {
        let mut state = self.state.write().await;
        if !state.status.can_transition_to(next) {
            return Err(SchedError::InvalidTransition {
                job: self.key.to_string(),
                from: state.status.to_string(),
                to: next.to_string(),
            });
        }
        let changed = state.status != next;
        state.status = next;
        Ok(changed)
    }

    /// Claim the job for a monitor task.
    ///
    /// Succeeds once, and only while the job is `Valid`. The status is left
    /// alone: a claimed job still reads `Valid`, in the state file too, until
    /// its monitor records the outcome of `execute`. Only the `claimed` flag
    /// keeps a second dispatch from spawning it again.
    pub async fn try_claim(&self) -> bool {
        let mut state = self.state.write().await;
        if state.status != JobStatus::Valid || state.claimed {
            return false;
        }
        state.claimed = true;
        true
    }

    /// Record the start of monitoring.
    pub async fn mark_started(&self) {
        self.state.write().await.start_time = Some(Utc::now());
    }

    /// Record the end of the remote run.
    pub async fn mark_ended(&self) {
        self.state.write().await.end_time = Some(Utc::now());
    }

    /// Record the remote identifier.
    pub async fn set_remote_id(&self, id: RemoteJobId) {
        self.state.write().await.remote_id = Some(id);
    }
}
