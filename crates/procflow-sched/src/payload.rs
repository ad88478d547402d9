//! Generic batch-script job payload.
//!
//! A [`ScriptJob`] renders a `%%name%%` template into a batch script and
//! submits it. Declared outputs make the job skippable when they already
//! exist, and declared inputs hold it in `WaitingOnInput` until present.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::batch::BatchSubmitter;
use crate::error::{SchedError, SchedResult};
use crate::job::{ExecuteOutcome, JobKey, JobPayload};
use crate::year_set::YearSet;

/// Template delimiter.
pub const DELIMITER: &str = "%%";

/// Variables available to every template of a job.
///
/// Job settings come first; the set-derived `start_year`, `end_year`,
/// `set_number` and `job_type` cannot be overridden by them.
pub fn template_variables(
    set: &YearSet,
    job_type: &str,
    settings: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut vars = settings.clone();
    vars.insert("start_year".to_string(), set.start_year.to_string());
    vars.insert("end_year".to_string(), set.end_year.to_string());
    vars.insert("start_year4".to_string(), format!("{:04}", set.start_year));
    vars.insert("end_year4".to_string(), format!("{:04}", set.end_year));
    vars.insert("set_number".to_string(), set.set_number.to_string());
    vars.insert("job_type".to_string(), job_type.to_string());
    vars
}

/// Replace every `%%name%%` in `template` with its value from `vars`.
///
/// Names are ASCII letters, digits and underscores. A `%%` that does not
/// open a valid name is copied through. Unknown names are an error.
pub fn render_template(template: &str, vars: &BTreeMap<String, String>) -> SchedResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find(DELIMITER) {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + DELIMITER.len()..];

        let name_len = after_open
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after_open.len());
        let name = &after_open[..name_len];

        if !name.is_empty() && after_open[name_len..].starts_with(DELIMITER) {
            let value = vars
                .get(name)
                .ok_or_else(|| SchedError::TemplateError(format!("undefined variable {name}")))?;
            out.push_str(value);
            rest = &after_open[name_len + DELIMITER.len()..];
        } else {
            out.push_str(DELIMITER);
            rest = after_open;
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// A job that submits a rendered batch script.
pub struct ScriptJob {
    key: JobKey,
    template: PathBuf,
    script_dir: PathBuf,
    variables: BTreeMap<String, String>,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    submitter: Arc<dyn BatchSubmitter>,
}

impl ScriptJob {
    pub fn new(
        key: JobKey,
        template: impl Into<PathBuf>,
        script_dir: impl Into<PathBuf>,
        submitter: Arc<dyn BatchSubmitter>,
    ) -> Self {
        Self {
            key,
            template: template.into(),
            script_dir: script_dir.into(),
            variables: BTreeMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            submitter,
        }
    }

    /// Variables for the script template.
    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    /// Files that must exist before the script is submitted.
    pub fn with_inputs(mut self, inputs: Vec<PathBuf>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Files the script is expected to produce.
    pub fn with_outputs(mut self, outputs: Vec<PathBuf>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Where the rendered script is written.
    pub fn script_path(&self) -> PathBuf {
        let extension = self
            .template
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("sh");
        self.script_dir.join(format!(
            "{}_set{}.{}",
            self.key.job_type, self.key.set_number, extension
        ))
    }

    async fn all_exist(paths: &[PathBuf]) -> bool {
        for path in paths {
            if !exists(path).await {
                return false;
            }
        }
        true
    }

    async fn first_missing(paths: &[PathBuf]) -> Option<&Path> {
        for path in paths {
            if !exists(path).await {
                return Some(path);
            }
        }
        None
    }
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

#[async_trait]
impl JobPayload for ScriptJob {
    async fn execute(&self) -> SchedResult<ExecuteOutcome> {
        if !self.outputs.is_empty() && Self::all_exist(&self.outputs).await {
            debug!(job = %self.key, "Outputs already present");
            return Ok(ExecuteOutcome::AlreadyComplete);
        }

        if let Some(missing) = Self::first_missing(&self.inputs).await {
            debug!(job = %self.key, input = %missing.display(), "Input not present yet");
            return Ok(ExecuteOutcome::NeedsInput);
        }

        let template = fs::read_to_string(&self.template).await.map_err(|e| {
            SchedError::TemplateError(format!("cannot read {}: {e}", self.template.display()))
        })?;
        let script = render_template(&template, &self.variables)?;

        fs::create_dir_all(&self.script_dir).await?;
        let script_path = self.script_path();
        fs::write(&script_path, script).await?;

        let id = self.submitter.submit(&script_path).await?;
        Ok(ExecuteOutcome::Submitted(id))
    }

    async fn postvalidate(&self) -> bool {
        match Self::first_missing(&self.outputs).await {
            Some(missing) => {
                warn!(job = %self.key, output = %missing.display(), "Expected output missing");
                false
            }
            None => true,
        }
    }
}
