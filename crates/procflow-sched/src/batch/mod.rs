//! Batch scheduler integration.
//!
//! The supervisor core only ever asks a scheduler for the state of a remote
//! job ([`BatchScheduler`]). Submission ([`BatchSubmitter`]) is used by job
//! payloads. SLURM and PBS adapters implement both.

pub mod pbs;
pub mod slurm;

use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{SchedError, SchedResult};
use crate::job::RemoteJobId;

pub use pbs::{PbsAdapter, PbsConfig, PbsJobInfo, PbsState};
pub use slurm::{SlurmAdapter, SlurmConfig, SlurmJobInfo, SlurmState};

/// Scheduler-neutral state of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteJobState {
    Running,
    Pending,
    Failed,
    Completed,
    /// Empty or unrecognized answer; ask again later.
    Unknown,
}

impl std::fmt::Display for RemoteJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RemoteJobState::Running => "RUNNING",
            RemoteJobState::Pending => "PENDING",
            RemoteJobState::Failed => "FAILED",
            RemoteJobState::Completed => "COMPLETED",
            RemoteJobState::Unknown => "UNKNOWN",
        };
        write!(f, "{name}")
    }
}

/// Point-in-time state queries against a batch scheduler.
#[async_trait]
pub trait BatchScheduler: Send + Sync {
    /// Short scheduler name for logs.
    fn name(&self) -> &'static str;

    /// Current state of a remote job.
    async fn job_state(&self, id: RemoteJobId) -> SchedResult<RemoteJobState>;
}

/// Submission of batch scripts.
#[async_trait]
pub trait BatchSubmitter: Send + Sync {
    /// Submit a script and return the scheduler's identifier for it.
    async fn submit(&self, script: &Path) -> SchedResult<RemoteJobId>;
}

/// Which scheduler a run talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    #[default]
    Slurm,
    Pbs,
}

impl std::str::FromStr for SchedulerKind {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "slurm" => Ok(SchedulerKind::Slurm),
            "pbs" => Ok(SchedulerKind::Pbs),
            other => Err(SchedError::config(format!("Unknown scheduler: {other}"))),
        }
    }
}

impl std::fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerKind::Slurm => write!(f, "slurm"),
            SchedulerKind::Pbs => write!(f, "pbs"),
        }
    }
}

/// Query and submit handles onto one adapter.
#[derive(Clone)]
pub struct BatchHandles {
    pub scheduler: Arc<dyn BatchScheduler>,
    pub submitter: Arc<dyn BatchSubmitter>,
}

impl BatchHandles {
    fn from_adapter<T: BatchScheduler + BatchSubmitter + 'static>(adapter: T) -> Self {
        let adapter = Arc::new(adapter);
        Self {
            scheduler: adapter.clone(),
            submitter: adapter,
        }
    }
}

/// Build the adapter for `kind`, in mock mode when `mock` is set.
pub async fn connect(
    kind: SchedulerKind,
    slurm: SlurmConfig,
    pbs: PbsConfig,
    mock: bool,
) -> SchedResult<BatchHandles> {
    Ok(match (kind, mock) {
        (SchedulerKind::Slurm, false) => BatchHandles::from_adapter(SlurmAdapter::new(slurm).await?),
        (SchedulerKind::Slurm, true) => BatchHandles::from_adapter(SlurmAdapter::mock(slurm)),
        (SchedulerKind::Pbs, false) => BatchHandles::from_adapter(PbsAdapter::new(pbs).await?),
        (SchedulerKind::Pbs, true) => BatchHandles::from_adapter(PbsAdapter::mock(pbs)),
    })
}

/// Run a scheduler command with piped output, bounded by `timeout`.
///
/// Spawn failures go through `on_error` so each adapter reports them under
/// its own error variant.
pub(crate) async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
    on_error: impl Fn(String) -> SchedError,
) -> SchedResult<Output> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(on_error(e.to_string())),
        Err(_) => Err(SchedError::Timeout(format!(
            "{program} timed out after {}s",
            timeout.as_secs()
        ))),
    }
}
