//! PBS (Portable Batch System) integration.
//!
//! Covers PBS Pro, OpenPBS and Torque. Job states are read with `qstat -f`,
//! and finished jobs with `qstat -xf`. Scripts are submitted with `qsub`.

mod adapter;
pub mod parser;

pub use adapter::{PbsAdapter, PbsConfig, PbsJobInfo, PbsState};
