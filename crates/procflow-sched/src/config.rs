//! Run configuration.
//!
//! Supports loading configuration from:
//! 1. Configuration files (YAML)
//! 2. Environment variables (with PROCFLOW_ prefix)
//! 3. .env files
//!
//! Configuration precedence (highest to lowest):
//! 1. Environment variables
//! 2. Configuration file
//! 3. Default values

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::batch::{BatchSubmitter, PbsConfig, SchedulerKind, SlurmConfig};
use crate::error::{SchedError, SchedResult};
use crate::grid::DataCategory;
use crate::job::{Job, JobKey, JobSettings};
use crate::monitor::Timings;
use crate::payload::{ScriptJob, render_template, template_variables};
use crate::readiness::JobFactory;
use crate::tracker::CategorySource;
use crate::year_set::YearSet;

/// Complete run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Simulation being post-processed.
    pub simulation: SimulationConfig,

    /// Input data locations.
    pub data: DataConfig,

    /// Batch scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Wait intervals.
    #[serde(default)]
    pub timing: TimingConfig,

    /// State file and hosting.
    #[serde(default)]
    pub output: OutputConfig,

    /// Job declarations, in the order jobs are created for each year set.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Case name, available to templates as `test_casename`.
    pub case: String,

    /// First simulated year.
    pub start_year: i32,

    /// Last simulated year.
    pub end_year: i32,

    /// Years per year set.
    #[serde(default = "default_year_set_length")]
    pub year_set_length: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Category whose monthly files gate scheduling.
    #[serde(default = "default_primary_category")]
    pub primary_category: String,

    /// Local directory per category.
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Directory holding the files.
    pub dir: PathBuf,

    /// Whether file names carry a `YYYY-MM` stamp.
    #[serde(default = "default_true")]
    pub dated: bool,

    /// Only file names containing this substring are tracked.
    #[serde(default)]
    pub pattern: Option<String>,

    /// Names required for undated categories.
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// `slurm` or `pbs`.
    #[serde(rename = "type", default)]
    pub kind: SchedulerKind,

    /// Account charged for jobs.
    #[serde(default)]
    pub account: Option<String>,

    /// SLURM partition.
    #[serde(default)]
    pub partition: Option<String>,

    /// PBS queue.
    #[serde(default)]
    pub queue: Option<String>,

    /// Where rendered scripts and job logs go.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Upper bound on any scheduler command, in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Length of one time unit in milliseconds.
    #[serde(default = "default_unit_ms")]
    pub unit_ms: u64,

    #[serde(default = "default_poll_units")]
    pub poll_units: u32,

    #[serde(default = "default_input_wait_units")]
    pub input_wait_units: u32,

    #[serde(default = "default_query_retry_units")]
    pub query_retry_units: u32,

    #[serde(default = "default_unknown_state_units")]
    pub unknown_state_units: u32,

    /// Delay between supervisor ticks, in units.
    #[serde(default = "default_loop_delay_units")]
    pub loop_delay_units: u32,

    /// Seconds between local file scans.
    #[serde(default = "default_tracker_interval")]
    pub tracker_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Human-readable state file.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Base URL hosted output is served under.
    #[serde(default)]
    pub host_url: Option<String>,
}

/// One declared job type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job type, unique within the run.
    #[serde(rename = "type")]
    pub job_type: String,

    /// Job types of the same year set that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Batch script template.
    #[serde(default)]
    pub script: Option<PathBuf>,

    /// Input paths (templates) that must exist before submission.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Output paths (templates) checked by post-validation.
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Free-form settings, available to templates.
    #[serde(default)]
    pub settings: JobSettings,

    /// Disabled jobs are not created.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions

fn default_year_set_length() -> u32 {
    5
}

fn default_primary_category() -> String {
    "atm".to_string()
}

fn default_true() -> bool {
    true
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("procflow-jobs")
}

fn default_command_timeout() -> u64 {
    30
}

fn default_unit_ms() -> u64 {
    1000
}

fn default_poll_units() -> u32 {
    10
}

fn default_input_wait_units() -> u32 {
    60
}

fn default_query_retry_units() -> u32 {
    1
}

fn default_unknown_state_units() -> u32 {
    5
}

fn default_loop_delay_units() -> u32 {
    10
}

fn default_tracker_interval() -> u64 {
    60
}

fn default_state_path() -> PathBuf {
    PathBuf::from("run_state.txt")
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kind: SchedulerKind::default(),
            account: None,
            partition: None,
            queue: None,
            work_dir: default_work_dir(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            unit_ms: default_unit_ms(),
            poll_units: default_poll_units(),
            input_wait_units: default_input_wait_units(),
            query_retry_units: default_query_retry_units(),
            unknown_state_units: default_unknown_state_units(),
            loop_delay_units: default_loop_delay_units(),
            tracker_interval_secs: default_tracker_interval(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            host_url: None,
        }
    }
}

impl RunConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SchedResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SchedError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(contents: &str) -> SchedResult<Self> {
        Ok(serde_yaml_ng::from_str(contents)?)
    }

    /// Load with the following precedence:
    /// 1. Load .env file if it exists
    /// 2. Load from file
    /// 3. Apply environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> SchedResult<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_file(path)?.merge_env();
        config.validate()?;
        Ok(config)
    }

    /// Merge environment variables into this configuration.
    ///
    /// Only variables that are set override the loaded values.
    pub fn merge_env(mut self) -> Self {
        if let Ok(v) = std::env::var("PROCFLOW_STATE_PATH") {
            self.output.state_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PROCFLOW_LOOP_DELAY") {
            if let Ok(val) = v.parse() {
                self.timing.loop_delay_units = val;
            }
        }
        if let Ok(v) = std::env::var("PROCFLOW_SCHEDULER") {
            match v.parse() {
                Ok(kind) => self.scheduler.kind = kind,
                Err(e) => warn!(error = %e, "Ignoring PROCFLOW_SCHEDULER"),
            }
        }
        self
    }

    /// Check the configuration for errors that make a run impossible.
    ///
    /// Problems confined to one job type (unknown dependency, dependency
    /// cycle, missing script) are not errors here; those jobs are created
    /// `Invalid` instead. See [`RunConfig::invalid_jobs`].
    pub fn validate(&self) -> SchedResult<()> {
        let sim = &self.simulation;
        if sim.end_year < sim.start_year {
            return Err(SchedError::config(format!(
                "end_year {} is before start_year {}",
                sim.end_year, sim.start_year
            )));
        }
        if sim.year_set_length == 0 {
            return Err(SchedError::config("year_set_length must be at least 1"));
        }
        if self.timing.unit_ms == 0 {
            return Err(SchedError::config("timing.unit_ms must be at least 1"));
        }

        if !self.data.categories.contains_key(&self.data.primary_category) {
            return Err(SchedError::config(format!(
                "primary category {} has no data directory",
                self.data.primary_category
            )));
        }
        if self
            .data
            .categories
            .get(&self.data.primary_category)
            .is_some_and(|c| !c.dated)
        {
            return Err(SchedError::config(format!(
                "primary category {} must be date-stamped",
                self.data.primary_category
            )));
        }

        let mut seen = FxHashSet::default();
        for job in &self.jobs {
            if job.job_type.is_empty() {
                return Err(SchedError::config("job type must not be empty"));
            }
            if !seen.insert(job.job_type.as_str()) {
                return Err(SchedError::config(format!(
                    "job type {} is declared twice",
                    job.job_type
                )));
            }
        }

        Ok(())
    }

    /// Enabled job declarations.
    pub fn enabled_jobs(&self) -> impl Iterator<Item = &JobConfig> {
        self.jobs.iter().filter(|job| job.enabled)
    }

    /// Job types that fail static validation, with the reason.
    pub fn invalid_jobs(&self) -> FxHashMap<String, String> {
        let jobs: Vec<&JobConfig> = self.enabled_jobs().collect();
        let mut invalid = FxHashMap::default();

        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let indices: Vec<NodeIndex> = jobs
            .iter()
            .map(|job| graph.add_node(job.job_type.as_str()))
            .collect();
        let nodes: FxHashMap<&str, NodeIndex> = jobs
            .iter()
            .map(|job| job.job_type.as_str())
            .zip(indices.iter().copied())
            .collect();

        for (job, &to) in jobs.iter().zip(&indices) {
            if job.script.is_none() {
                invalid.insert(job.job_type.clone(), "no script template".to_string());
            }
            for dep in &job.depends_on {
                match nodes.get(dep.as_str()) {
                    Some(&from) => {
                        graph.add_edge(from, to, ());
                    }
                    None => {
                        invalid.insert(
                            job.job_type.clone(),
                            SchedError::InvalidDependency(dep.clone()).to_string(),
                        );
                    }
                }
            }
        }

        for component in tarjan_scc(&graph) {
            let cyclic = component.len() > 1
                || component
                    .first()
                    .is_some_and(|&n| graph.contains_edge(n, n));
            if !cyclic {
                continue;
            }
            let mut names: Vec<&str> = component.iter().map(|&n| graph[n]).collect();
            names.sort_unstable();
            let reason = SchedError::DependencyCycle(names.join(", ")).to_string();
            for name in names {
                invalid.insert(name.to_string(), reason.clone());
            }
        }

        invalid
    }

    /// Wait intervals.
    pub fn timings(&self) -> Timings {
        let t = &self.timing;
        Timings {
            unit: Duration::from_millis(t.unit_ms),
            poll_units: t.poll_units,
            input_wait_units: t.input_wait_units,
            query_retry_units: t.query_retry_units,
            unknown_state_units: t.unknown_state_units,
            loop_delay_units: t.loop_delay_units,
        }
    }

    /// Category gating scheduling.
    pub fn primary_category(&self) -> DataCategory {
        DataCategory::new(self.data.primary_category.clone())
    }

    /// Sources for the local file tracker.
    pub fn category_sources(&self) -> Vec<CategorySource> {
        self.data
            .categories
            .iter()
            .map(|(name, cat)| {
                let source = if cat.dated {
                    CategorySource::dated(name.as_str(), cat.dir.clone())
                } else {
                    CategorySource::undated(name.as_str(), cat.dir.clone(), cat.files.clone())
                };
                match &cat.pattern {
                    Some(pattern) => source.with_pattern(pattern.clone()),
                    None => source,
                }
            })
            .collect()
    }

    pub fn slurm_config(&self) -> SlurmConfig {
        SlurmConfig {
            partition: self.scheduler.partition.clone(),
            account: self.scheduler.account.clone(),
            work_dir: self.scheduler.work_dir.clone(),
            command_timeout: Duration::from_secs(self.scheduler.command_timeout_secs),
        }
    }

    pub fn pbs_config(&self) -> PbsConfig {
        PbsConfig {
            queue: self.scheduler.queue.clone(),
            account: self.scheduler.account.clone(),
            work_dir: self.scheduler.work_dir.clone(),
            server: None,
            command_timeout: Duration::from_secs(self.scheduler.command_timeout_secs),
        }
    }
}

/// Creates [`ScriptJob`]s from the job declarations.
pub struct ConfigJobFactory {
    case: String,
    jobs: Vec<JobConfig>,
    invalid: FxHashMap<String, String>,
    script_dir: PathBuf,
    submitter: Arc<dyn BatchSubmitter>,
}

impl ConfigJobFactory {
    pub fn new(config: &RunConfig, submitter: Arc<dyn BatchSubmitter>) -> Self {
        Self {
            case: config.simulation.case.clone(),
            jobs: config.enabled_jobs().cloned().collect(),
            invalid: config.invalid_jobs(),
            script_dir: config.scheduler.work_dir.join("scripts"),
            submitter,
        }
    }

    fn build(&self, set: &YearSet, decl: &JobConfig) -> Job {
        let key = JobKey::new(set.set_number, decl.job_type.clone());

        let mut settings = decl.settings.clone();
        settings
            .entry("test_casename".to_string())
            .or_insert_with(|| self.case.clone());
        let vars = template_variables(set, &decl.job_type, &settings);

        let render_all = |paths: &[String]| -> SchedResult<Vec<PathBuf>> {
            paths
                .iter()
                .map(|p| render_template(p, &vars).map(PathBuf::from))
                .collect()
        };

        let mut reason = self.invalid.get(&decl.job_type).cloned();
        let inputs = render_all(&decl.inputs).unwrap_or_else(|e| {
            reason.get_or_insert_with(|| e.to_string());
            Vec::new()
        });
        let outputs = render_all(&decl.outputs).unwrap_or_else(|e| {
            reason.get_or_insert_with(|| e.to_string());
            Vec::new()
        });

        let template = decl.script.clone().unwrap_or_default();
        let payload = Arc::new(
            ScriptJob::new(key.clone(), template, &self.script_dir, Arc::clone(&self.submitter))
                .with_variables(vars)
                .with_inputs(inputs)
                .with_outputs(outputs),
        );

        let job = match reason {
            Some(reason) => {
                error!(job = %key, %reason, "Job failed validation");
                Job::invalid(key, payload)
            }
            None => Job::new(key, payload),
        };
        job.depends_on_all(decl.depends_on.iter().cloned())
            .with_settings(settings)
    }
}

impl JobFactory for ConfigJobFactory {
    fn create_jobs(&self, set: &YearSet) -> Vec<Job> {
        self.jobs.iter().map(|decl| self.build(set, decl)).collect()
    }
}
