//! SLURM integration.
//!
//! Job states are read with `scontrol show job`, falling back to `sacct`
//! once a job has aged out of the controller. Scripts are submitted with
//! `sbatch`.

mod adapter;
pub mod parser;

pub use adapter::{SlurmAdapter, SlurmConfig, SlurmJobInfo, SlurmState};
