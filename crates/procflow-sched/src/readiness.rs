//! Derives year-set status from the status grid.

use std::sync::Arc;

use tracing::{debug, info};

use crate::grid::{DataCategory, DataReadiness, StatusGrid};
use crate::job::Job;
use crate::year_set::{SetStatus, YearSet};

/// Creates the jobs of a year set once its input is ready.
pub trait JobFactory: Send + Sync {
    /// Jobs for `set`, in declaration order.
    fn create_jobs(&self, set: &YearSet) -> Vec<Job>;
}

/// Classify a span from the readiness of each of its months.
///
/// All `DataReady` gives `DataReady`. Otherwise any month that is not
/// `NoData` gives `PartialData`, and all `NoData` gives `NoData`. An empty
/// span is `NoData`.
pub fn classify(months: impl IntoIterator<Item = DataReadiness>) -> SetStatus {
    let mut seen = false;
    let mut all_ready = true;
    let mut any_present = false;
    for value in months {
        seen = true;
        all_ready &= value == DataReadiness::DataReady;
        any_present |= value.is_present();
    }

    if seen && all_ready {
        SetStatus::DataReady
    } else if any_present {
        SetStatus::PartialData
    } else {
        SetStatus::NoData
    }
}

/// Readiness of a set's span for one category.
pub fn span_readiness(grid: &StatusGrid, category: &DataCategory, set: &YearSet) -> SetStatus {
    classify(
        (set.start_year..=set.end_year)
            .flat_map(|year| (1..=12).map(move |month| grid.get(category, year, month))),
    )
}

/// Recompute the status of every pre-run set.
///
/// Sets that are `Running`, `Completed` or `Failed` are skipped. A set that
/// becomes `DataReady` gets its jobs from `factory`, unless it already has
/// them. Returns the numbers of the sets that reached `DataReady` on this
/// call.
pub async fn check_year_sets(
    sets: &[Arc<YearSet>],
    grid: &StatusGrid,
    primary: &DataCategory,
    factory: &dyn JobFactory,
) -> Vec<u32> {
    let mut newly_ready = Vec::new();

    for set in sets {
        let before = set.status().await;
        if !before.is_pre_run() {
            continue;
        }

        let verdict = span_readiness(grid, primary, set);
        let after = set.apply_readiness(verdict).await;

        if after == SetStatus::DataReady && !set.has_jobs() {
            let jobs = factory.create_jobs(set);
            debug!(set = set.set_number, jobs = jobs.len(), "Creating jobs");
            set.install_jobs(jobs);
        }

        if after != before {
            info!(
                set = set.set_number,
                start = set.start_year,
                end = set.end_year,
                "Year set {} -> {}",
                before,
                after
            );
            if after == SetStatus::DataReady {
                newly_ready.push(set.set_number);
            }
        }
    }

    newly_ready
}
