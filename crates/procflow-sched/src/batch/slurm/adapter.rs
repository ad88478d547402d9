//! SLURM adapter for script submission and job tracking.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::fs;
use tracing::debug;

use crate::batch::slurm::parser;
use crate::batch::{BatchScheduler, BatchSubmitter, RemoteJobState, run_command};
use crate::error::{SchedError, SchedResult};
use crate::job::RemoteJobId;

/// SLURM job state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlurmState {
    Pending,
    Running,
    Completing,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    NodeFail,
    Preempted,
    OutOfMemory,
    Unknown(String),
}

impl SlurmState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SlurmState::Completed
                | SlurmState::Failed
                | SlurmState::Timeout
                | SlurmState::Cancelled
                | SlurmState::NodeFail
                | SlurmState::OutOfMemory
        )
    }

    /// Check if this represents a successful completion.
    pub fn is_success(&self) -> bool {
        matches!(self, SlurmState::Completed)
    }

    /// Collapse onto the scheduler-neutral state.
    ///
    /// A job that is still completing counts as running; preempted jobs are
    /// requeued and count as pending.
    pub fn to_remote(&self) -> RemoteJobState {
        match self {
            SlurmState::Pending | SlurmState::Preempted => RemoteJobState::Pending,
            SlurmState::Running | SlurmState::Completing => RemoteJobState::Running,
            SlurmState::Completed => RemoteJobState::Completed,
            SlurmState::Failed
            | SlurmState::Timeout
            | SlurmState::Cancelled
            | SlurmState::NodeFail
            | SlurmState::OutOfMemory => RemoteJobState::Failed,
            SlurmState::Unknown(_) => RemoteJobState::Unknown,
        }
    }
}

/// Information about a SLURM job.
#[derive(Debug, Clone)]
pub struct SlurmJobInfo {
    /// SLURM job ID.
    pub job_id: String,

    /// Job name.
    pub name: String,

    /// Current state.
    pub state: SlurmState,

    /// Reason for current state (e.g., "Resources" for pending).
    pub reason: Option<String>,

    /// Exit code (for completed jobs).
    pub exit_code: Option<i32>,
}

/// Configuration for SLURM adapter.
#[derive(Debug, Clone)]
pub struct SlurmConfig {
    /// SLURM partition to submit to; the cluster default when unset.
    pub partition: Option<String>,

    /// SLURM account for billing.
    pub account: Option<String>,

    /// Working directory for batch scripts and their logs.
    pub work_dir: PathBuf,

    /// Upper bound on any single SLURM command.
    pub command_timeout: Duration,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            partition: None,
            account: None,
            work_dir: PathBuf::from("/tmp/procflow-jobs"),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Adapter for SLURM HPC scheduler.
pub struct SlurmAdapter {
    config: SlurmConfig,
    /// Whether to use mock mode (for testing).
    mock_mode: bool,
    /// Mock job counter for generating fake job IDs.
    mock_counter: AtomicU64,
    /// States reported in mock mode; unknown ids report completed.
    mock_states: Mutex<FxHashMap<u64, SlurmState>>,
}

impl SlurmAdapter {
    /// Create a new SLURM adapter with the given configuration.
    pub async fn new(config: SlurmConfig) -> SchedResult<Self> {
        fs::create_dir_all(&config.work_dir).await?;

        Ok(Self {
            config,
            mock_mode: false,
            mock_counter: AtomicU64::new(1000),
            mock_states: Mutex::new(FxHashMap::default()),
        })
    }

    /// Create a new SLURM adapter in mock mode (for testing).
    pub fn mock(config: SlurmConfig) -> Self {
        Self {
            config,
            mock_mode: true,
            mock_counter: AtomicU64::new(1000),
            mock_states: Mutex::new(FxHashMap::default()),
        }
    }

    /// Adapter configuration.
    pub fn config(&self) -> &SlurmConfig {
        &self.config
    }

    /// Set the state a mock adapter reports for `id`.
    pub fn set_mock_state(&self, id: RemoteJobId, state: SlurmState) {
        self.mock_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.0, state);
    }

    /// Get the status of a SLURM job.
    ///
    /// Returns `None` when neither `scontrol` nor `sacct` knows the job.
    pub async fn status(&self, slurm_job_id: &str) -> SchedResult<Option<SlurmJobInfo>> {
        if self.mock_mode {
            let state = slurm_job_id
                .parse::<u64>()
                .ok()
                .and_then(|id| {
                    self.mock_states
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get(&id)
                        .cloned()
                })
                .unwrap_or(SlurmState::Completed);
            return Ok(Some(SlurmJobInfo {
                job_id: slurm_job_id.to_string(),
                name: "mock_job".to_string(),
                state,
                reason: None,
                exit_code: Some(0),
            }));
        }

        if let Some(info) = self.run_scontrol(slurm_job_id).await? {
            return Ok(Some(info));
        }

        self.run_sacct(slurm_job_id).await
    }

    /// Run sbatch command.
    async fn run_sbatch(&self, script_path: &Path) -> SchedResult<RemoteJobId> {
        let mut args: Vec<String> = Vec::new();
        if let Some(partition) = &self.config.partition {
            args.push(format!("--partition={partition}"));
        }
        if let Some(account) = &self.config.account {
            args.push(format!("--account={account}"));
        }
        args.push(format!("--chdir={}", self.config.work_dir.display()));
        args.push(script_path.display().to_string());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self.command("sbatch", &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SchedError::SlurmSubmitError(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = parser::parse_sbatch_output(&stdout)?;
        job_id
            .parse()
            .map(RemoteJobId)
            .map_err(|_| SchedError::SlurmSubmitError(format!("non-numeric job id: {job_id}")))
    }

    /// Run scontrol to get the state of a job the controller still knows.
    async fn run_scontrol(&self, slurm_job_id: &str) -> SchedResult<Option<SlurmJobInfo>> {
        let output = self
            .command("scontrol", &["show", "job", slurm_job_id])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if parser::is_unknown_job_error(&stderr) {
                return Ok(None);
            }
            return Err(SchedError::SlurmCommandError {
                command: "scontrol".to_string(),
                message: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parser::parse_scontrol_output(&stdout))
    }

    /// Run sacct command to get completed job status.
    async fn run_sacct(&self, slurm_job_id: &str) -> SchedResult<Option<SlurmJobInfo>> {
        let output = self
            .command(
                "sacct",
                &["-j", slurm_job_id, "-o", "JobID,JobName,State,ExitCode", "-P"],
            )
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        parser::parse_sacct_output(&stdout)
    }

    async fn command(&self, program: &str, args: &[&str]) -> SchedResult<std::process::Output> {
        run_command(program, args, self.config.command_timeout, |message| {
            SchedError::SlurmCommandError {
                command: program.to_string(),
                message,
            }
        })
        .await
    }
}

#[async_trait]
impl BatchScheduler for SlurmAdapter {
    fn name(&self) -> &'static str {
        "slurm"
    }

    async fn job_state(&self, id: RemoteJobId) -> SchedResult<RemoteJobState> {
        let info = self.status(&id.to_string()).await?;
        let state = info
            .map(|info| info.state.to_remote())
            .unwrap_or(RemoteJobState::Unknown);
        debug!(job_id = %id, %state, "SLURM job state");
        Ok(state)
    }
}

#[async_trait]
impl BatchSubmitter for SlurmAdapter {
    async fn submit(&self, script: &Path) -> SchedResult<RemoteJobId> {
        if self.mock_mode {
            return Ok(RemoteJobId(self.mock_counter.fetch_add(1, Ordering::SeqCst)));
        }
        self.run_sbatch(script).await
    }
}
