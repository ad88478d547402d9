//! Completion handling: post-validation, hosting, and the set verdict.

use tracing::{error, info, warn};

use crate::error::SchedError;
use crate::hosting::{index_url, output_source_dir};
use crate::job::{Job, JobStatus};
use crate::monitor::{MonitorEnv, apply, fail_job};
use crate::year_set::YearSet;

/// Finish a job whose remote run (or pre-existing output) is done.
///
/// The job only becomes `Completed` after its output validates. Returns the
/// job's final status.
pub async fn handle_completed_job(job: &Job, set: &YearSet, env: &MonitorEnv) -> JobStatus {
    let job_type = job.job_type();

    if !job.payload().postvalidate().await {
        error!(job = %job.key, "Post-validation failed");
        fail_job(
            job,
            set,
            env,
            format!("{job_type} completed but does not have expected output, setting status to failed"),
        )
        .await;
        return JobStatus::Failed;
    }

    if !apply(job, JobStatus::Completed).await {
        return job.status().await;
    }
    info!(job = %job.key, "Job completed");

    host_output(job, set, env).await;

    let verdict = set.settle().await;
    info!(set = set.set_number, status = %verdict, "Year set re-evaluated");
    JobStatus::Completed
}

async fn host_output(job: &Job, set: &YearSet, env: &MonitorEnv) {
    let job_type = job.job_type();
    let source = match output_source_dir(job, set) {
        Ok(Some(source)) => source,
        Ok(None) => return,
        Err(e) => {
            warn!(job = %job.key, error = %e, "Cannot compute hosting source");
            env.events
                .publish(format!("{job_type} hosting failed: {}", reason(&e)), Some(job.key.clone()));
            return;
        }
    };

    info!(job = %job.key, source = %source.display(), "Setting up local hosting for {}", job_type);
    match env.host.host(job_type, &source).await {
        Ok(url) => env.events.publish(
            format!("{job_type} hosted at {}", index_url(job_type, &url)),
            Some(job.key.clone()),
        ),
        Err(e) => {
            warn!(job = %job.key, error = %e, "Hosting failed");
            env.events
                .publish(format!("{job_type} hosting failed: {}", reason(&e)), Some(job.key.clone()));
        }
    }
}

fn reason(e: &SchedError) -> String {
    match e {
        SchedError::HostingError(reason) => reason.clone(),
        other => other.to_string(),
    }
}
