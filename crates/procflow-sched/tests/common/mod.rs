//! Scripted doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use procflow_sched::{
    BatchScheduler, DataCategory, DataReadiness, EventLog, ExecuteOutcome, Job, JobFactory,
    JobKey, JobPayload, MonitorEnv, OutputHost, RemoteJobId, RemoteJobState, RunContext,
    SchedError, SchedResult, StatusGrid, Timings, YearSet,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Scheduler that answers from a per-job script.
///
/// `None` in a script is a failed query. The last entry repeats; jobs with
/// no script report `Completed`.
#[derive(Default)]
pub struct ScriptedScheduler {
    scripts: Mutex<HashMap<u64, VecDeque<Option<RemoteJobState>>>>,
    queries: AtomicUsize,
}

impl ScriptedScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, id: u64, states: impl IntoIterator<Item = Option<RemoteJobState>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(id, states.into_iter().collect());
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchScheduler for ScriptedScheduler {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn job_state(&self, id: RemoteJobId) -> SchedResult<RemoteJobState> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().unwrap();
        let next = match scripts.get_mut(&id.0) {
            Some(script) if script.len() > 1 => script.pop_front().flatten(),
            Some(script) => script.front().copied().flatten(),
            None => Some(RemoteJobState::Completed),
        };
        next.ok_or_else(|| SchedError::SlurmCommandError {
            command: "scontrol".to_string(),
            message: "slurm_load_jobs error: Socket timed out".to_string(),
        })
    }
}

/// Payload with a fixed launch outcome.
pub struct ScriptedPayload {
    outcome: ExecuteOutcome,
    valid: bool,
    executions: AtomicUsize,
}

impl ScriptedPayload {
    pub fn submits(id: u64) -> Arc<Self> {
        Self::with(ExecuteOutcome::Submitted(RemoteJobId(id)), true)
    }

    pub fn already_complete() -> Arc<Self> {
        Self::with(ExecuteOutcome::AlreadyComplete, true)
    }

    pub fn needs_input() -> Arc<Self> {
        Self::with(ExecuteOutcome::NeedsInput, true)
    }

    pub fn with(outcome: ExecuteOutcome, valid: bool) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            valid,
            executions: AtomicUsize::new(0),
        })
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobPayload for ScriptedPayload {
    async fn execute(&self) -> SchedResult<ExecuteOutcome> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome)
    }

    async fn postvalidate(&self) -> bool {
        self.valid
    }
}

/// Host that accepts everything.
pub struct NullHost;

#[async_trait]
impl OutputHost for NullHost {
    async fn host(&self, job_type: &str, _source: &Path) -> SchedResult<String> {
        Ok(format!("https://example.org/{job_type}"))
    }
}

/// Job factory backed by a closure.
pub struct FnFactory<F>(pub F);

impl<F> JobFactory for FnFactory<F>
where
    F: Fn(&YearSet) -> Vec<Job> + Send + Sync,
{
    fn create_jobs(&self, set: &YearSet) -> Vec<Job> {
        (self.0)(set)
    }
}

pub fn job(set: &YearSet, job_type: &str, payload: Arc<dyn JobPayload>) -> Job {
    Job::new(JobKey::new(set.set_number, job_type), payload)
}

pub fn timings() -> Timings {
    Timings {
        unit: Duration::from_secs(1),
        ..Timings::default()
    }
}

pub fn env(scheduler: Arc<ScriptedScheduler>) -> MonitorEnv {
    MonitorEnv {
        scheduler,
        host: Arc::new(NullHost),
        events: Arc::new(EventLog::new()),
        timings: timings(),
        cancel: CancellationToken::new(),
    }
}

/// Mark every month of `[first, last]` ready for `atm`.
pub fn fill(grid: &StatusGrid, first: i32, last: i32) {
    let atm = DataCategory::new("atm");
    for year in first..=last {
        for month in 1..=12 {
            grid.set(&atm, year, month, DataReadiness::DataReady);
        }
    }
}

pub fn context(
    state_path: PathBuf,
    sets: Vec<Arc<YearSet>>,
    scheduler: Arc<ScriptedScheduler>,
    factory: impl JobFactory + 'static,
) -> RunContext {
    let env = env(scheduler);
    RunContext {
        sets,
        grid: Arc::new(StatusGrid::new()),
        events: Arc::clone(&env.events),
        env,
        primary: DataCategory::new("atm"),
        factory: Arc::new(factory),
        state_path,
        run_id: Uuid::new_v4(),
    }
}

/// Let spawned monitors run until they block.
pub async fn idle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
