//! PBS adapter for script submission and job tracking.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::fs;
use tracing::debug;

use crate::batch::pbs::parser;
use crate::batch::{BatchScheduler, BatchSubmitter, RemoteJobState, run_command};
use crate::error::{SchedError, SchedResult};
use crate::job::RemoteJobId;

/// PBS job state.
///
/// PBS uses single-letter state codes:
/// - Q: Queued (waiting in queue)
/// - R: Running
/// - E: Exiting (job completing)
/// - C: Completed (Torque)
/// - F: Finished (PBS Pro)
/// - H: Held
/// - W: Waiting (delayed start)
/// - S: Suspended
/// - T: Being moved to new location
/// - B: Array job has at least one subjob running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PbsState {
    /// Job is queued and waiting for resources.
    Queued,
    /// Job is currently running.
    Running,
    /// Job is exiting (finishing up).
    Exiting,
    /// Job has finished; the exit status decides success.
    Completed,
    /// Job is held and will not run until released.
    Held,
    /// Job is waiting for scheduled start time.
    Waiting,
    /// Job has been suspended.
    Suspended,
    /// Job is being moved to another location.
    Transit,
    /// Array job with subjobs running.
    ArrayRunning,
    /// Job failed.
    Failed,
    /// Unknown state.
    Unknown(String),
}

impl PbsState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PbsState::Completed | PbsState::Failed)
    }

    /// Convert to state code character.
    pub fn to_code(&self) -> &'static str {
        match self {
            PbsState::Queued => "Q",
            PbsState::Running => "R",
            PbsState::Exiting => "E",
            PbsState::Completed => "C",
            PbsState::Held => "H",
            PbsState::Waiting => "W",
            PbsState::Suspended => "S",
            PbsState::Transit => "T",
            PbsState::ArrayRunning => "B",
            PbsState::Failed => "F",
            PbsState::Unknown(_) => "?",
        }
    }
}

/// Information about a PBS job.
#[derive(Debug, Clone)]
pub struct PbsJobInfo {
    /// PBS job ID (e.g., "12345.pbs-server").
    pub job_id: String,

    /// Job name.
    pub name: String,

    /// Current state.
    pub state: PbsState,

    /// Queue the job is in.
    pub queue: Option<String>,

    /// Exit status (for finished jobs).
    pub exit_status: Option<i32>,

    /// Wall time used.
    pub walltime_used: Option<String>,
}

impl PbsJobInfo {
    /// Collapse onto the scheduler-neutral state.
    ///
    /// A finished job with a non-zero exit status counts as failed.
    pub fn to_remote(&self) -> RemoteJobState {
        match &self.state {
            PbsState::Queued
            | PbsState::Held
            | PbsState::Waiting
            | PbsState::Suspended
            | PbsState::Transit => RemoteJobState::Pending,
            PbsState::Running | PbsState::Exiting | PbsState::ArrayRunning => {
                RemoteJobState::Running
            }
            PbsState::Completed => match self.exit_status {
                Some(code) if code != 0 => RemoteJobState::Failed,
                _ => RemoteJobState::Completed,
            },
            PbsState::Failed => RemoteJobState::Failed,
            PbsState::Unknown(_) => RemoteJobState::Unknown,
        }
    }
}

/// Configuration for PBS adapter.
#[derive(Debug, Clone)]
pub struct PbsConfig {
    /// PBS queue to submit to; the server default when unset.
    pub queue: Option<String>,

    /// Account string for job accounting.
    pub account: Option<String>,

    /// Working directory for batch scripts and their logs.
    pub work_dir: PathBuf,

    /// PBS server hostname (optional, used for mock job IDs).
    pub server: Option<String>,

    /// Upper bound on any single PBS command.
    pub command_timeout: Duration,
}

impl Default for PbsConfig {
    fn default() -> Self {
        Self {
            queue: None,
            account: None,
            work_dir: PathBuf::from("/tmp/procflow-jobs"),
            server: None,
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Adapter for PBS HPC scheduler.
pub struct PbsAdapter {
    config: PbsConfig,
    /// Whether to use mock mode (for testing).
    mock_mode: bool,
    /// Mock job counter for generating fake job IDs.
    mock_counter: AtomicU64,
    /// Jobs reported in mock mode; unknown ids report a clean finish.
    mock_jobs: Mutex<FxHashMap<u64, (PbsState, Option<i32>)>>,
}

impl PbsAdapter {
    /// Create a new PBS adapter with the given configuration.
    pub async fn new(config: PbsConfig) -> SchedResult<Self> {
        fs::create_dir_all(&config.work_dir).await?;

        Ok(Self {
            config,
            mock_mode: false,
            mock_counter: AtomicU64::new(1000),
            mock_jobs: Mutex::new(FxHashMap::default()),
        })
    }

    /// Create a new PBS adapter in mock mode (for testing).
    pub fn mock(config: PbsConfig) -> Self {
        Self {
            config,
            mock_mode: true,
            mock_counter: AtomicU64::new(1000),
            mock_jobs: Mutex::new(FxHashMap::default()),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &PbsConfig {
        &self.config
    }

    /// Set the state and exit status a mock adapter reports for `id`.
    pub fn set_mock_state(&self, id: RemoteJobId, state: PbsState, exit_status: Option<i32>) {
        self.mock_jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.0, (state, exit_status));
    }

    /// Get the status of a PBS job.
    ///
    /// Returns `None` when neither `qstat -f` nor `qstat -xf` knows the job.
    pub async fn status(&self, pbs_job_id: &str) -> SchedResult<Option<PbsJobInfo>> {
        if self.mock_mode {
            let (state, exit_status) = parser::numeric_job_id(pbs_job_id)
                .and_then(|id| {
                    self.mock_jobs
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get(&id)
                        .cloned()
                })
                .unwrap_or((PbsState::Completed, Some(0)));
            return Ok(Some(PbsJobInfo {
                job_id: pbs_job_id.to_string(),
                name: "mock_job".to_string(),
                state,
                queue: self.config.queue.clone(),
                exit_status,
                walltime_used: None,
            }));
        }

        if let Some(info) = self.run_qstat(pbs_job_id, "-f").await? {
            return Ok(Some(info));
        }

        // qstat -xf shows finished jobs too (PBS Pro feature)
        self.run_qstat(pbs_job_id, "-xf").await
    }

    /// Run qsub command.
    async fn run_qsub(&self, script_path: &Path) -> SchedResult<RemoteJobId> {
        let mut args: Vec<String> = Vec::new();
        if let Some(queue) = &self.config.queue {
            args.extend(["-q".to_string(), queue.clone()]);
        }
        if let Some(account) = &self.config.account {
            args.extend(["-A".to_string(), account.clone()]);
        }
        args.push(script_path.display().to_string());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self.command("qsub", &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SchedError::PbsSubmitError(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = parser::parse_qsub_output(&stdout)?;
        parser::numeric_job_id(&job_id)
            .map(RemoteJobId)
            .ok_or_else(|| SchedError::PbsSubmitError(format!("non-numeric job id: {job_id}")))
    }

    /// Run qstat with `flag` (`-f` or `-xf`) to get job status.
    async fn run_qstat(&self, pbs_job_id: &str, flag: &str) -> SchedResult<Option<PbsJobInfo>> {
        let output = self.command("qstat", &[flag, pbs_job_id]).await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if parser::is_unknown_job_error(&stderr) {
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parser::parse_qstat_full_output(&stdout)
    }

    async fn command(&self, program: &str, args: &[&str]) -> SchedResult<std::process::Output> {
        run_command(program, args, self.config.command_timeout, |message| {
            SchedError::PbsCommandError {
                command: program.to_string(),
                message,
            }
        })
        .await
    }
}

#[async_trait]
impl BatchScheduler for PbsAdapter {
    fn name(&self) -> &'static str {
        "pbs"
    }

    async fn job_state(&self, id: RemoteJobId) -> SchedResult<RemoteJobState> {
        let info = self.status(&id.to_string()).await?;
        let state = info
            .map(|info| info.to_remote())
            .unwrap_or(RemoteJobState::Unknown);
        debug!(job_id = %id, %state, "PBS job state");
        Ok(state)
    }
}

#[async_trait]
impl BatchSubmitter for PbsAdapter {
    async fn submit(&self, script: &Path) -> SchedResult<RemoteJobId> {
        if self.mock_mode {
            return Ok(RemoteJobId(self.mock_counter.fetch_add(1, Ordering::SeqCst)));
        }
        self.run_qsub(script).await
    }
}
