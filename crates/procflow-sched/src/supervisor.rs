//! Top-level supervisor loop.
//!
//! Each tick recomputes readiness from the status grid, dispatches eligible
//! jobs, collects finished monitors and writes the state file. The loop ends
//! when every year set is terminal or the run is cancelled.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::batch::BatchHandles;
use crate::config::{ConfigJobFactory, RunConfig};
use crate::dispatch::Dispatcher;
use crate::error::{SchedError, SchedResult};
use crate::events::EventLog;
use crate::grid::{DataCategory, StatusGrid};
use crate::hosting::OutputHost;
use crate::monitor::{MonitorEnv, MonitorExit, cancellable_sleep};
use crate::readiness::{JobFactory, check_year_sets};
use crate::snapshot::write_state;
use crate::year_set::{SetStatus, YearSet, build_year_sets};

/// Aggregate verdict over every year set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverallStatus {
    StillRunning,
    OneOrMoreFailed,
    AllCompleted,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OverallStatus::StillRunning => "still running",
            OverallStatus::OneOrMoreFailed => "one or more year sets failed",
            OverallStatus::AllCompleted => "all year sets completed",
        };
        write!(f, "{s}")
    }
}

/// Fold set statuses into the run verdict.
///
/// Still running while any set is neither `Completed` nor `Failed`. An empty
/// run counts as completed.
pub fn overall_from(statuses: impl IntoIterator<Item = SetStatus>) -> OverallStatus {
    let mut any_failed = false;
    for status in statuses {
        match status {
            SetStatus::Completed => {}
            SetStatus::Failed => any_failed = true,
            _ => return OverallStatus::StillRunning,
        }
    }
    if any_failed {
        OverallStatus::OneOrMoreFailed
    } else {
        OverallStatus::AllCompleted
    }
}

/// Current run verdict.
pub async fn overall_status(sets: &[Arc<YearSet>]) -> OverallStatus {
    let mut statuses = Vec::with_capacity(sets.len());
    for set in sets {
        statuses.push(set.status().await);
    }
    overall_from(statuses)
}

/// Everything a run shares, built once at startup.
pub struct RunContext {
    pub sets: Vec<Arc<YearSet>>,
    pub grid: Arc<StatusGrid>,
    pub events: Arc<EventLog>,
    pub env: MonitorEnv,
    pub primary: DataCategory,
    pub factory: Arc<dyn JobFactory>,
    pub state_path: PathBuf,
    pub run_id: Uuid,
}

impl RunContext {
    /// Assemble a context from a validated configuration.
    pub fn from_config(
        config: &RunConfig,
        batch: BatchHandles,
        host: Arc<dyn OutputHost>,
        cancel: CancellationToken,
    ) -> Self {
        let sim = &config.simulation;
        let events = Arc::new(EventLog::new());
        let factory = Arc::new(ConfigJobFactory::new(config, batch.submitter));

        Self {
            sets: build_year_sets(sim.start_year, sim.end_year, sim.year_set_length),
            grid: Arc::new(StatusGrid::new()),
            events: Arc::clone(&events),
            env: MonitorEnv {
                scheduler: batch.scheduler,
                host,
                events,
                timings: config.timings(),
                cancel,
            },
            primary: config.primary_category(),
            factory,
            state_path: config.output.state_path.clone(),
            run_id: Uuid::new_v4(),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.env.cancel
    }

    /// Write the state file. Failures are logged.
    pub async fn snapshot(&self) {
        write_state(&self.state_path, &self.sets, &self.events, self.run_id).await;
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every set is terminal.
    Finished(OverallStatus),
    /// The cancellation token fired first.
    Cancelled,
}

/// Owns the tick loop and the monitor pool.
pub struct Supervisor {
    ctx: Arc<RunContext>,
    dispatcher: Dispatcher,
}

impl Supervisor {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self {
            ctx,
            dispatcher: Dispatcher::new(),
        }
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// One pass: readiness, dispatch, reap, snapshot.
    pub async fn tick(&mut self) -> OverallStatus {
        let ctx = &self.ctx;

        let ready = check_year_sets(&ctx.sets, &ctx.grid, &ctx.primary, ctx.factory.as_ref()).await;
        if !ready.is_empty() {
            debug!(sets = ?ready, "Year sets became ready");
        }

        if !ctx.env.cancel.is_cancelled() {
            let spawned = self.dispatcher.dispatch(&ctx.sets, &ctx.env).await;
            if spawned > 0 {
                debug!(spawned, "Monitors dispatched");
            }
        }

        for (key, exit) in self.dispatcher.pool_mut().reap().await {
            debug!(job = %key, ?exit, "Monitor finished");
        }

        ctx.snapshot().await;
        overall_status(&ctx.sets).await
    }

    /// Readiness and snapshot only; nothing is dispatched.
    pub async fn survey(&self) -> OverallStatus {
        let ctx = &self.ctx;
        check_year_sets(&ctx.sets, &ctx.grid, &ctx.primary, ctx.factory.as_ref()).await;
        ctx.snapshot().await;
        overall_status(&ctx.sets).await
    }

    /// Tick until every set is terminal or the run is cancelled.
    ///
    /// On either exit the monitor pool is joined and a final state file is
    /// written. Remote jobs are never cancelled.
    pub async fn run(mut self) -> RunOutcome {
        let ctx = Arc::clone(&self.ctx);
        let timings = ctx.env.timings;
        info!(
            run_id = %ctx.run_id,
            year_sets = ctx.sets.len(),
            primary = %ctx.primary,
            "Supervisor starting"
        );

        let outcome = loop {
            if ctx.env.cancel.is_cancelled() {
                break RunOutcome::Cancelled;
            }

            let status = self.tick().await;
            if status != OverallStatus::StillRunning {
                info!("Run finished: {}", status);
                // Stop monitors still polling siblings of a failed set.
                ctx.env.cancel.cancel();
                break RunOutcome::Finished(status);
            }

            if cancellable_sleep(timings.loop_delay_units, timings.unit, &ctx.env.cancel).await {
                break RunOutcome::Cancelled;
            }
        };

        if outcome == RunOutcome::Cancelled {
            info!(live = self.dispatcher.pool().live(), "Cancellation requested, waiting for monitors");
        }
        for (key, exit) in self.dispatcher.pool_mut().join_all().await {
            if exit == MonitorExit::Cancelled {
                warn!(job = %key, "Monitor stopped before the job finished");
            }
        }

        ctx.snapshot().await;
        outcome
    }
}

/// Run a supervisor on its own task and survive a panic inside a tick.
///
/// A panic cancels the shared token so detached monitors stop, writes a
/// best-effort state file and surfaces as [`SchedError::Internal`].
pub async fn run_guarded(ctx: Arc<RunContext>) -> SchedResult<RunOutcome> {
    let task = tokio::spawn(Supervisor::new(Arc::clone(&ctx)).run());
    match task.await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            let reason = if e.is_panic() {
                "supervisor panicked"
            } else {
                "supervisor task was aborted"
            };
            error!(run_id = %ctx.run_id, error = %e, "Supervisor stopped unexpectedly");
            ctx.env.cancel.cancel();
            ctx.snapshot().await;
            Err(SchedError::Internal(format!("{reason}: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_from() {
        use SetStatus::*;
        assert_eq!(overall_from([Completed, Completed]), OverallStatus::AllCompleted);
        assert_eq!(overall_from([Completed, Failed]), OverallStatus::OneOrMoreFailed);
        assert_eq!(overall_from([Failed, Running]), OverallStatus::StillRunning);
        assert_eq!(overall_from([NoData, Completed]), OverallStatus::StillRunning);
        assert_eq!(overall_from([Completed, PartialData]), OverallStatus::StillRunning);
        assert_eq!(overall_from(Vec::new()), OverallStatus::AllCompleted);
    }

    #[tokio::test]
    async fn test_overall_status_reads_sets() {
        let a = Arc::new(YearSet::new(1, 1, 5));
        let b = Arc::new(YearSet::new(2, 6, 10));
        assert_eq!(overall_status(&[a.clone(), b.clone()]).await, OverallStatus::StillRunning);

        a.mark_failed().await;
        b.mark_failed().await;
        assert_eq!(overall_status(&[a, b]).await, OverallStatus::OneOrMoreFailed);
    }
}
