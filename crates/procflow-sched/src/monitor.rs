//! Per-job monitor task.
//!
//! A monitor launches its job, waits for missing input, then polls the
//! batch scheduler until the job reaches a terminal state. Every wait is
//! split into one-unit steps that race the shared cancellation token.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchScheduler, RemoteJobState};
use crate::completion::handle_completed_job;
use crate::events::EventLog;
use crate::hosting::OutputHost;
use crate::job::{ExecuteOutcome, Job, JobStatus, RemoteJobId};
use crate::year_set::YearSet;

/// Wait intervals, in multiples of `unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    /// Length of one time unit.
    pub unit: Duration,
    /// Between scheduler polls.
    pub poll_units: u32,
    /// Between launch attempts while input is missing.
    pub input_wait_units: u32,
    /// After a failed scheduler query.
    pub query_retry_units: u32,
    /// After an empty or unrecognized scheduler answer.
    pub unknown_state_units: u32,
    /// Between supervisor ticks.
    pub loop_delay_units: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            poll_units: 10,
            input_wait_units: 60,
            query_retry_units: 1,
            unknown_state_units: 5,
            loop_delay_units: 10,
        }
    }
}

/// Shared collaborators of every monitor task.
#[derive(Clone)]
pub struct MonitorEnv {
    pub scheduler: Arc<dyn BatchScheduler>,
    pub host: Arc<dyn OutputHost>,
    pub events: Arc<EventLog>,
    pub timings: Timings,
    pub cancel: CancellationToken,
}

/// How a monitor task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The job reached this status and monitoring is over.
    Finished(JobStatus),
    /// The run was cancelled; the remote job was left alone.
    Cancelled,
}

/// Sleep for `units` time units, one unit at a time.
///
/// Returns `true` as soon as `cancel` fires.
pub async fn cancellable_sleep(units: u32, unit: Duration, cancel: &CancellationToken) -> bool {
    for _ in 0..units {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return true,
            _ = tokio::time::sleep(unit) => {}
        }
    }
    cancel.is_cancelled()
}

/// Drive one job from launch to a terminal state.
pub async fn monitor_job(job: Arc<Job>, set: Arc<YearSet>, env: MonitorEnv) -> MonitorExit {
    let job_type = job.job_type().to_string();
    job.mark_started().await;
    debug!(job = %job.key, "Monitor starting");

    let remote_id = loop {
        if env.cancel.is_cancelled() {
            return MonitorExit::Cancelled;
        }

        match job.payload().execute().await {
            Ok(ExecuteOutcome::AlreadyComplete) => {
                info!(job = %job.key, "Output already present, validating");
                return MonitorExit::Finished(handle_completed_job(&job, &set, &env).await);
            }
            Ok(ExecuteOutcome::NeedsInput) => {
                apply(&job, JobStatus::WaitingOnInput).await;
                if wait(&env, env.timings.input_wait_units).await {
                    return MonitorExit::Cancelled;
                }
            }
            Ok(ExecuteOutcome::Submitted(id)) => break id,
            Err(e) => {
                error!(job = %job.key, error = %e, "Launch failed");
                fail_job(
                    &job,
                    &set,
                    &env,
                    format!("{job_type} failed to launch: {e}"),
                )
                .await;
                return MonitorExit::Finished(JobStatus::Failed);
            }
        }
    };

    job.set_remote_id(remote_id).await;
    apply(&job, JobStatus::Submitted).await;
    env.events.publish(
        format!("Submitted {job_type} for year_set {}", set.set_number),
        Some(job.key.clone()),
    );

    poll_until_done(&job, &set, &env, remote_id).await
}

async fn poll_until_done(
    job: &Job,
    set: &YearSet,
    env: &MonitorEnv,
    remote_id: RemoteJobId,
) -> MonitorExit {
    loop {
        if env.cancel.is_cancelled() {
            return MonitorExit::Cancelled;
        }

        match job.status().await {
            JobStatus::Invalid => return MonitorExit::Finished(JobStatus::Invalid),
            JobStatus::Failed => {
                set.mark_failed().await;
                return MonitorExit::Finished(JobStatus::Failed);
            }
            JobStatus::Completed => {
                return MonitorExit::Finished(handle_completed_job(job, set, env).await);
            }
            _ => {}
        }

        let state = match env.scheduler.job_state(remote_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(job = %job.key, job_id = %remote_id, error = %e, "Scheduler query failed, retrying");
                if wait(env, env.timings.query_retry_units).await {
                    return MonitorExit::Cancelled;
                }
                continue;
            }
        };

        let next = match state {
            RemoteJobState::Running => JobStatus::Running,
            RemoteJobState::Pending => JobStatus::Pending,
            RemoteJobState::Failed => {
                job.mark_ended().await;
                fail_job(job, set, env, format!("Job {remote_id} has failed")).await;
                return MonitorExit::Finished(JobStatus::Failed);
            }
            RemoteJobState::Completed => {
                job.mark_ended().await;
                return MonitorExit::Finished(handle_completed_job(job, set, env).await);
            }
            RemoteJobState::Unknown => {
                debug!(job = %job.key, job_id = %remote_id, "No state reported yet");
                if wait(env, env.timings.unknown_state_units).await {
                    return MonitorExit::Cancelled;
                }
                continue;
            }
        };

        if apply(job, next).await {
            info!(
                "{}: {} status changed to {}",
                job.job_type(),
                remote_id,
                next
            );
        }

        if wait(env, env.timings.poll_units).await {
            return MonitorExit::Cancelled;
        }
    }
}

/// Mark a job failed, publish why, and fail its set.
pub(crate) async fn fail_job(job: &Job, set: &YearSet, env: &MonitorEnv, message: String) {
    if job.state().await.end_time.is_none() {
        job.mark_ended().await;
    }
    apply(job, JobStatus::Failed).await;
    env.events.publish(message, Some(job.key.clone()));
    set.mark_failed().await;
}

/// Take a transition, logging a refused one. Returns whether status changed.
pub(crate) async fn apply(job: &Job, next: JobStatus) -> bool {
    match job.transition(next).await {
        Ok(changed) => changed,
        Err(e) => {
            error!(job = %job.key, error = %e, "Refused status change");
            false
        }
    }
}

async fn wait(env: &MonitorEnv, units: u32) -> bool {
    cancellable_sleep(units, env.timings.unit, &env.cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_sleep_runs_full_interval() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        assert!(!cancellable_sleep(10, Duration::from_secs(1), &cancel).await);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_sleep_stops_within_one_unit() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        assert!(cancellable_sleep(60, Duration::from_secs(1), &cancel).await);
        assert!(start.elapsed() <= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_cancelled_token_returns_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(cancellable_sleep(1000, Duration::from_secs(3600), &cancel).await);
    }

    #[test]
    fn test_default_timings() {
        let timings = Timings::default();
        assert_eq!(timings.poll_units, 10);
        assert_eq!(timings.input_wait_units, 60);
        assert_eq!(timings.unknown_state_units, 5);
    }
}
