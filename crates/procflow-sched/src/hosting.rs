//! Hosting of browsable diagnostic output.
//!
//! After a job completes, its output directory is handed to an
//! [`OutputHost`]. Hosting failures are reported through the event log and
//! never fail the job.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{SchedError, SchedResult};
use crate::job::Job;
use crate::payload::{render_template, template_variables};
use crate::year_set::YearSet;

/// Publishes a directory of output and returns where it can be browsed.
#[async_trait]
pub trait OutputHost: Send + Sync {
    async fn host(&self, job_type: &str, source: &Path) -> SchedResult<String>;
}

/// Host that serves output where it already is.
///
/// With a base URL, the last path component of the source is appended to
/// it; otherwise a `file://` URL of the source is reported.
#[derive(Debug, Clone, Default)]
pub struct InPlaceHost {
    base_url: Option<String>,
}

impl InPlaceHost {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }
}

#[async_trait]
impl OutputHost for InPlaceHost {
    async fn host(&self, job_type: &str, source: &Path) -> SchedResult<String> {
        let is_dir = tokio::fs::metadata(source)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(SchedError::HostingError(format!(
                "no image source for {job_type} at {}",
                source.display()
            )));
        }

        let url = match (&self.base_url, source.file_name()) {
            (Some(base), Some(name)) => format!("{base}/{}", name.to_string_lossy()),
            _ => format!("file://{}", source.display()),
        };
        Ok(url)
    }
}

/// Directory of browsable output for a completed job, if it has one.
///
/// A `host_source` setting wins; it may use the same `%%name%%` variables
/// as script templates.
pub fn output_source_dir(job: &Job, set: &YearSet) -> SchedResult<Option<PathBuf>> {
    if let Some(path) = job.payload().hosted_output() {
        return Ok(Some(path));
    }

    let settings = &job.settings;
    if let Some(source) = settings.get("host_source") {
        let vars = template_variables(set, job.job_type(), settings);
        return Ok(Some(PathBuf::from(render_template(source, &vars)?)));
    }

    let setting = |name: &str| {
        settings.get(name).ok_or_else(|| {
            SchedError::HostingError(format!("{} is missing setting {name}", job.key))
        })
    };

    let dir = match job.job_type() {
        "coupled_diags" => Path::new(setting("coupled_project_dir")?).join(format!(
            "coupled_diagnostics_{}-obs",
            setting("test_casename")?
        )),
        "amwg" => Path::new(setting("test_path_diag")?).join("..").join(format!(
            "{:04}-{:04}{}-obs",
            set.start_year,
            set.end_year,
            setting("test_casename")?
        )),
        "acme_diags" | "e3sm_diags" => PathBuf::from(setting("results_dir")?),
        _ => return Ok(None),
    };
    Ok(Some(dir))
}

/// Page to link for a hosted job.
pub fn index_url(job_type: &str, url: &str) -> String {
    match job_type {
        "acme_diags" | "e3sm_diags" => format!("{url}/viewer/index.html"),
        _ => format!("{url}/index.html"),
    }
}
