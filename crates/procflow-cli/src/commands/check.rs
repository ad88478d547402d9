//! Check command implementation.
//!
//! Validates a configuration and prints the year sets, the local data found
//! so far and the verdict of every declared job.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use console::style;

use procflow_sched::{DataCategory, DataReadiness, LocalTracker, StatusGrid, partition_years};

use super::common::load_config;

/// Execute the check command.
pub async fn execute(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let sim = &config.simulation;

    println!(
        "{} {} ({} - {}, {} year sets of {} years)",
        style("→").cyan().bold(),
        style(&sim.case).bold(),
        sim.start_year,
        sim.end_year,
        partition_years(sim.start_year, sim.end_year, sim.year_set_length).len(),
        sim.year_set_length
    );
    println!();

    println!("{}", style("Year sets:").bold());
    for (number, start, end) in partition_years(sim.start_year, sim.end_year, sim.year_set_length)
    {
        println!("  {number:>4}  {start:>5} - {end:<5}");
    }
    println!();

    let grid = Arc::new(StatusGrid::new());
    LocalTracker::new(Arc::clone(&grid), config.category_sources(), sim.end_year)
        .scan()
        .await;

    println!("{}", style("Data:").bold());
    for (name, category) in &config.data.categories {
        let primary = if *name == config.data.primary_category {
            style(" (primary)").dim().to_string()
        } else {
            String::new()
        };
        let counts = grid.summary(&DataCategory::new(name.as_str()));
        let count = |readiness: DataReadiness| counts.get(&readiness).copied().unwrap_or(0);
        println!(
            "  {:<12} {}{}  {} ready, {} partial",
            name,
            category.dir.display(),
            primary,
            style(count(DataReadiness::DataReady)).green(),
            style(count(DataReadiness::PartialData)).yellow()
        );
    }
    println!();

    let invalid = config.invalid_jobs();
    println!("{}", style("Jobs:").bold());
    for job in config.enabled_jobs() {
        let deps = if job.depends_on.is_empty() {
            String::new()
        } else {
            format!(" after {}", job.depends_on.join(", "))
        };
        match invalid.get(&job.job_type) {
            Some(reason) => println!(
                "  {:<16} {}{}  {}",
                job.job_type,
                style("Invalid").red(),
                deps,
                style(reason).dim()
            ),
            None => println!("  {:<16} {}{}", job.job_type, style("Valid").green(), deps),
        }
    }

    if !invalid.is_empty() {
        println!();
        println!(
            "{} {} job type(s) will never run",
            style("!").yellow().bold(),
            invalid.len()
        );
    }

    Ok(())
}
