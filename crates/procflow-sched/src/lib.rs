//! Post-processing supervisor for multi-year climate simulation output.
//!
//! This crate waits for simulation output to become locally available,
//! groups the simulated years into fixed-length year sets, and drives a
//! dependency-ordered set of batch jobs per year set through SLURM or PBS
//! until every set completes or fails.
//!
//! # Overview
//!
//! 1. **Tracking**: the [`LocalTracker`] marks files found on disk in the
//!    [`StatusGrid`]
//! 2. **Readiness**: each tick derives a [`SetStatus`] per [`YearSet`] from
//!    the grid and creates the set's jobs once it is `DataReady`
//! 3. **Dispatch**: jobs whose dependencies have completed get a monitor task
//! 4. **Monitoring**: a monitor launches its job and polls the batch
//!    scheduler until the job is `Completed` or `Failed`
//! 5. **Completion**: output is validated, hosted, and the set re-evaluated
//!
//! # Supported Schedulers
//!
//! | Scheduler | Query | Submit |
//! |-----------|-------|--------|
//! | SLURM | scontrol, sacct | sbatch |
//! | PBS/Torque | qstat -f, qstat -xf | qsub |
//!
//! # Example
//!
//! ```ignore
//! use procflow_sched::{InPlaceHost, RunConfig, RunContext, Supervisor, batch};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = RunConfig::load("procflow.yaml")?;
//! let handles = batch::connect(
//!     config.scheduler.kind,
//!     config.slurm_config(),
//!     config.pbs_config(),
//!     false,
//! )
//! .await?;
//! let host = Arc::new(InPlaceHost::new(config.output.host_url.clone()));
//! let ctx = RunContext::from_config(&config, handles, host, CancellationToken::new());
//!
//! let outcome = Supervisor::new(Arc::new(ctx)).run().await;
//! ```

pub mod batch;
pub mod completion;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod grid;
pub mod hosting;
pub mod job;
pub mod monitor;
pub mod payload;
pub mod readiness;
pub mod snapshot;
pub mod supervisor;
pub mod tracker;
pub mod year_set;

// Re-exports
pub use batch::{
    BatchHandles, BatchScheduler, BatchSubmitter, PbsAdapter, PbsConfig, RemoteJobState,
    SchedulerKind, SlurmAdapter, SlurmConfig,
};
pub use completion::handle_completed_job;
pub use config::{ConfigJobFactory, JobConfig, RunConfig};
pub use dispatch::{Dispatcher, MonitorPool, unmet_dependency};
pub use error::{SchedError, SchedResult};
pub use events::{Event, EventGroup, EventLog};
pub use grid::{DataCategory, DataReadiness, GridKey, StatusGrid, expected_keys};
pub use hosting::{InPlaceHost, OutputHost};
pub use job::{
    ExecuteOutcome, Job, JobKey, JobPayload, JobSettings, JobState, JobStatus, RemoteJobId,
};
pub use monitor::{MonitorEnv, MonitorExit, Timings, monitor_job};
pub use payload::{ScriptJob, render_template};
pub use readiness::{JobFactory, check_year_sets, classify};
pub use supervisor::{
    OverallStatus, RunContext, RunOutcome, Supervisor, overall_from, overall_status, run_guarded,
};
pub use tracker::{CategorySource, LocalTracker};
pub use year_set::{SetStatus, YearSet, build_year_sets, partition_years};
