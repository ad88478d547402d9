//! Run command implementation.
//!
//! Supervises one simulation until every year set is terminal or the
//! process is interrupted.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use procflow_sched::{
    InPlaceHost, LocalTracker, OverallStatus, RunContext, RunOutcome, Supervisor, batch,
    run_guarded,
};

use super::common::{load_config, styled_status};

/// Exit code after an interrupt.
const EXIT_INTERRUPTED: i32 = 130;

/// Execute the run command. Returns the process exit code.
pub async fn execute(
    config_path: Option<&Path>,
    state: Option<&Path>,
    dry_run: bool,
    mock: bool,
) -> Result<i32> {
    let mut config = load_config(config_path)?;
    if let Some(state) = state {
        config.output.state_path = state.to_path_buf();
    }

    let handles = batch::connect(
        config.scheduler.kind,
        config.slurm_config(),
        config.pbs_config(),
        mock || dry_run,
    )
    .await
    .with_context(|| format!("Failed to set up {} adapter", config.scheduler.kind))?;

    let cancel = CancellationToken::new();
    let host = Arc::new(InPlaceHost::new(config.output.host_url.clone()));
    let ctx = Arc::new(RunContext::from_config(&config, handles, host, cancel.clone()));

    let tracker = Arc::new(LocalTracker::new(
        Arc::clone(&ctx.grid),
        config.category_sources(),
        config.simulation.end_year,
    ));
    tracker.scan().await;

    println!(
        "{} Supervising {} ({} year sets, run {})",
        style("→").cyan().bold(),
        style(&config.simulation.case).bold(),
        ctx.sets.len(),
        style(ctx.run_id).dim()
    );
    println!(
        "  State file: {}",
        style(config.output.state_path.display()).dim()
    );

    if dry_run {
        Supervisor::new(Arc::clone(&ctx)).survey().await;
        println!();
        for set in &ctx.sets {
            println!(
                "  Year_set {:>3}: {:>5} - {:<5} {}",
                set.set_number,
                set.start_year,
                set.end_year,
                styled_status(set.status().await)
            );
        }
        return Ok(0);
    }

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, waiting for monitors to stop");
            signal_cancel.cancel();
        }
    });

    let tracker_task = tokio::spawn(Arc::clone(&tracker).run(
        Duration::from_secs(config.timing.tracker_interval_secs),
        cancel.clone(),
    ));

    let result = run_guarded(Arc::clone(&ctx)).await;
    cancel.cancel();
    if let Err(e) = tracker_task.await {
        warn!(error = %e, "Local file tracker ended abnormally");
    }
    let outcome = result.context("Supervisor stopped on an internal error")?;
    info!(?outcome, "Supervisor stopped");

    let code = match outcome {
        RunOutcome::Finished(OverallStatus::AllCompleted) => {
            println!("{} All year sets completed", style("✓").green().bold());
            0
        }
        RunOutcome::Finished(status) => {
            println!("{} {}", style("✗").red().bold(), status);
            1
        }
        RunOutcome::Cancelled => {
            println!("{} Interrupted; remote jobs were left running", style("!").yellow().bold());
            EXIT_INTERRUPTED
        }
    };
    Ok(code)
}
