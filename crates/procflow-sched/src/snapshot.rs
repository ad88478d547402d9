//! Human-readable run state file.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::error::SchedResult;
use crate::events::{EventGroup, EventLog};
use crate::year_set::YearSet;

/// Render the state of every set followed by the event log.
///
/// Events are listed in three blocks: general, transfer-related, then
/// hosting-related, each in publication order.
pub async fn render(
    sets: &[Arc<YearSet>],
    events: &EventLog,
    run_id: Uuid,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Execution state as of {}", now.format("%d %b %Y %H:%M:%S UTC"));
    let _ = writeln!(out, "Running under process {} (run {})", std::process::id(), run_id);
    out.push('\n');

    for set in sets {
        let _ = writeln!(
            out,
            "Year_set {}: {} - {}",
            set.set_number, set.start_year, set.end_year
        );
        let _ = writeln!(out, "status: {}", set.status().await);
        for job in set.jobs() {
            let state = job.state().await;
            let id = state
                .remote_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(out, "  >   {} -- {}: {}", job.job_type(), id, state.status);
        }
        out.push('\n');
    }

    let events = events.snapshot();
    for group in [EventGroup::General, EventGroup::Transfer, EventGroup::Hosting] {
        out.push('\n');
        for event in events.iter().filter(|event| event.group() == group) {
            let _ = writeln!(
                out,
                "{} {}",
                event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                event.message
            );
        }
    }

    out
}

/// Write `contents` to `path` through a temporary file and a rename.
pub async fn write_atomic(path: &Path, contents: &str) -> SchedResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Render and write the state file. Failures are logged, never returned.
pub async fn write_state(path: &Path, sets: &[Arc<YearSet>], events: &EventLog, run_id: Uuid) {
    let contents = render(sets, events, run_id, Utc::now()).await;
    if let Err(e) = write_atomic(path, &contents).await {
        warn!(path = %path.display(), error = %e, "Failed to write state file");
    }
}
