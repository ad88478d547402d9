//! Dependency resolution and monitor dispatch.

use std::future::Future;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::job::{Job, JobKey, JobStatus};
use crate::monitor::{MonitorEnv, MonitorExit, monitor_job};
use crate::year_set::{SetStatus, YearSet};

/// Live monitor tasks, at most one per job.
#[derive(Debug, Default)]
pub struct MonitorPool {
    tasks: FxHashMap<JobKey, JoinHandle<MonitorExit>>,
    spawned: usize,
}

impl MonitorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` for `key` unless a task for it is still running.
    pub fn spawn<F>(&mut self, key: JobKey, task: F) -> bool
    where
        F: Future<Output = MonitorExit> + Send + 'static,
    {
        if self
            .tasks
            .get(&key)
            .is_some_and(|handle| !handle.is_finished())
        {
            return false;
        }
        self.tasks.insert(key, tokio::spawn(task));
        self.spawned += 1;
        true
    }

    /// Number of tasks ever spawned.
    pub fn spawn_count(&self) -> usize {
        self.spawned
    }

    /// Number of tasks still running.
    pub fn live(&self) -> usize {
        self.tasks.values().filter(|handle| !handle.is_finished()).count()
    }

    /// Collect finished tasks and return how each ended.
    pub async fn reap(&mut self) -> Vec<(JobKey, MonitorExit)> {
        let finished: Vec<JobKey> = self
            .tasks
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();

        let mut exits = Vec::with_capacity(finished.len());
        for key in finished {
            if let Some(handle) = self.tasks.remove(&key) {
                if let Some(exit) = Self::join(&key, handle).await {
                    exits.push((key, exit));
                }
            }
        }
        exits
    }

    /// Wait for every task to end.
    pub async fn join_all(&mut self) -> Vec<(JobKey, MonitorExit)> {
        let mut exits = Vec::with_capacity(self.tasks.len());
        for (key, handle) in self.tasks.drain() {
            if let Some(exit) = Self::join(&key, handle).await {
                exits.push((key, exit));
            }
        }
        exits
    }

    async fn join(key: &JobKey, handle: JoinHandle<MonitorExit>) -> Option<MonitorExit> {
        match handle.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                error!(job = %key, error = %e, "Monitor task panicked");
                None
            }
        }
    }
}

/// The first dependency of `job` without a `Completed` sibling.
pub async fn unmet_dependency<'a>(job: &'a Job, set: &YearSet) -> Option<&'a str> {
    for dep in &job.depends_on {
        let done = match set.job(dep) {
            Some(sibling) => sibling.status().await == JobStatus::Completed,
            None => false,
        };
        if !done {
            return Some(dep.as_str());
        }
    }
    None
}

/// Spawns monitors for jobs whose dependencies are met.
#[derive(Debug, Default)]
pub struct Dispatcher {
    pool: MonitorPool,
    reported_invalid: FxHashSet<JobKey>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self) -> &MonitorPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut MonitorPool {
        &mut self.pool
    }

    /// Start every eligible `Valid` job of every `DataReady` or `Running` set.
    ///
    /// Safe to call every tick: a job is claimed before its monitor is
    /// spawned, so it is never started twice. Returns how many monitors
    /// were spawned.
    pub async fn dispatch(&mut self, sets: &[Arc<YearSet>], env: &MonitorEnv) -> usize {
        let mut spawned = 0;

        for set in sets {
            let status = set.status().await;
            if !matches!(status, SetStatus::DataReady | SetStatus::Running) {
                continue;
            }

            for job in set.jobs() {
                if let Some(dep) = unmet_dependency(job, set).await {
                    info!("{} is waiting on {}", job.job_type(), dep);
                    continue;
                }

                match job.status().await {
                    JobStatus::Valid => {
                        if !job.try_claim().await {
                            continue;
                        }
                        let task = monitor_job(Arc::clone(job), Arc::clone(set), env.clone());
                        if self.pool.spawn(job.key.clone(), task) {
                            debug!(job = %job.key, "Monitor spawned");
                            set.mark_running().await;
                            spawned += 1;
                        }
                    }
                    JobStatus::Invalid => {
                        if self.reported_invalid.insert(job.key.clone()) {
                            error!(
                                job = %job.key,
                                "{} for year_set {} is invalid and will not run",
                                job.job_type(),
                                set.set_number
                            );
                        }
                    }
                    _ => {}
                }
            }
        }

        spawned
    }
}
