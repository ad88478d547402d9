//! Year sets: contiguous year spans processed as one unit.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::job::{Job, JobStatus};

/// Status of a year set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetStatus {
    /// No input for the span is available.
    NoData,
    /// Some input for the span is available or in flight.
    PartialData,
    /// All input for the span is local.
    DataReady,
    /// At least one job of the set has been launched.
    Running,
    /// A job of the set failed.
    Failed,
    /// Every job of the set completed.
    Completed,
}

impl SetStatus {
    /// Whether the readiness evaluator still owns this status.
    pub fn is_pre_run(&self) -> bool {
        matches!(
            self,
            SetStatus::NoData | SetStatus::PartialData | SetStatus::DataReady
        )
    }

    /// Completed or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SetStatus::Completed | SetStatus::Failed)
    }

    fn data_rank(&self) -> u8 {
        match self {
            SetStatus::NoData => 0,
            SetStatus::PartialData => 1,
            SetStatus::DataReady => 2,
            _ => 3,
        }
    }

    /// Get a human-readable status name.
    pub fn name(&self) -> &'static str {
        match self {
            SetStatus::NoData => "NoData",
            SetStatus::PartialData => "PartialData",
            SetStatus::DataReady => "DataReady",
            SetStatus::Running => "Running",
            SetStatus::Failed => "Failed",
            SetStatus::Completed => "Completed",
        }
    }
}

impl std::fmt::Display for SetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One year span of work and the jobs that process it.
#[derive(Debug)]
pub struct YearSet {
    /// 1-based ordinal.
    pub set_number: u32,

    /// First year of the span (inclusive).
    pub start_year: i32,

    /// Last year of the span (inclusive).
    pub end_year: i32,

    /// Aggregate status. The lock also serializes completion handlers.
    status: Mutex<SetStatus>,

    /// Jobs in declaration order, installed once.
    jobs: OnceLock<Vec<Arc<Job>>>,
}

impl YearSet {
    /// Create a set with no jobs yet.
    pub fn new(set_number: u32, start_year: i32, end_year: i32) -> Self {
        Self {
            set_number,
            start_year,
            end_year,
            status: Mutex::new(SetStatus::NoData),
            jobs: OnceLock::new(),
        }
    }

    /// Create a set carrying its jobs from the start.
    pub fn with_jobs(set_number: u32, start_year: i32, end_year: i32, jobs: Vec<Job>) -> Self {
        let set = Self::new(set_number, start_year, end_year);
        set.install_jobs(jobs);
        set
    }

    /// Current status.
    pub async fn status(&self) -> SetStatus {
        *self.status.lock().await
    }

    /// Jobs in declaration order; empty until installed.
    pub fn jobs(&self) -> &[Arc<Job>] {
        self.jobs.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether jobs have been installed.
    pub fn has_jobs(&self) -> bool {
        self.jobs.get().is_some()
    }

    /// Install the set's jobs. Only the first call has an effect.
    pub fn install_jobs(&self, jobs: Vec<Job>) -> bool {
        self.jobs
            .set(jobs.into_iter().map(Arc::new).collect())
            .is_ok()
    }

    /// Find a job by type.
    pub fn job(&self, job_type: &str) -> Option<&Arc<Job>> {
        self.jobs().iter().find(|job| job.job_type() == job_type)
    }

    /// Apply a readiness verdict.
    ///
    /// Ignored once the set is running or finished, and never lowers the
    /// data status. Returns the resulting status.
    pub async fn apply_readiness(&self, verdict: SetStatus) -> SetStatus {
        let mut status = self.status.lock().await;
        if status.is_pre_run() && verdict.is_pre_run() && verdict.data_rank() > status.data_rank()
        {
            *status = verdict;
        }
        *status
    }

    /// Move a `DataReady` set to `Running`. Returns whether it changed.
    pub async fn mark_running(&self) -> bool {
        let mut status = self.status.lock().await;
        if *status == SetStatus::DataReady {
            *status = SetStatus::Running;
            return true;
        }
        false
    }

    /// Record a job failure against the set.
    pub async fn mark_failed(&self) {
        let mut status = self.status.lock().await;
        if *status != SetStatus::Completed {
            *status = SetStatus::Failed;
        }
    }

    /// Recompute the aggregate status from the jobs.
    ///
    /// Any failed job makes the set `Failed`; all completed makes it
    /// `Completed`; otherwise it stays `Running`. `Failed` is never
    /// overwritten.
    pub async fn settle(&self) -> SetStatus {
        let mut status = self.status.lock().await;
        if *status == SetStatus::Failed {
            return SetStatus::Failed;
        }

        let mut all_completed = true;
        for job in self.jobs() {
            match job.status().await {
                JobStatus::Failed => {
                    *status = SetStatus::Failed;
                    return SetStatus::Failed;
                }
                JobStatus::Completed => {}
                _ => all_completed = false,
            }
        }

        *status = if all_completed {
            SetStatus::Completed
        } else {
            SetStatus::Running
        };
        *status
    }
}

/// Split `[first_year, last_year]` into consecutive spans of `length` years.
///
/// The final span is shorter when the range does not divide evenly. Spans
/// are numbered from 1.
pub fn partition_years(first_year: i32, last_year: i32, length: u32) -> Vec<(u32, i32, i32)> {
    let mut spans = Vec::new();
    if length == 0 || last_year < first_year {
        return spans;
    }

    let mut start = first_year;
    let mut number = 1;
    while start <= last_year {
        let end = (start + length as i32 - 1).min(last_year);
        spans.push((number, start, end));
        start = end + 1;
        number += 1;
    }
    spans
}

/// Build the run's year sets from the simulation range.
pub fn build_year_sets(first_year: i32, last_year: i32, length: u32) -> Vec<Arc<YearSet>> {
    partition_years(first_year, last_year, length)
        .into_iter()
        .map(|(number, start, end)| Arc::new(YearSet::new(number, start, end)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::tests::job;

    #[test]
    fn test_partition_years() {
        assert_eq!(
            partition_years(1, 10, 5),
            vec![(1, 1, 5), (2, 6, 10)]
        );
        assert_eq!(
            partition_years(2000, 2004, 2),
            vec![(1, 2000, 2001), (2, 2002, 2003), (3, 2004, 2004)]
        );
        assert!(partition_years(5, 1, 2).is_empty());
        assert!(partition_years(1, 5, 0).is_empty());
    }

    #[tokio::test]
    async fn test_readiness_never_downgrades() {
        let set = YearSet::new(1, 2000, 2001);
        assert_eq!(set.apply_readiness(SetStatus::PartialData).await, SetStatus::PartialData);
        assert_eq!(set.apply_readiness(SetStatus::NoData).await, SetStatus::PartialData);
        assert_eq!(set.apply_readiness(SetStatus::DataReady).await, SetStatus::DataReady);
        assert_eq!(set.apply_readiness(SetStatus::PartialData).await, SetStatus::DataReady);

        assert!(set.mark_running().await);
        assert!(!set.mark_running().await);
        assert_eq!(set.apply_readiness(SetStatus::DataReady).await, SetStatus::Running);
    }

    #[tokio::test]
    async fn test_jobs_installed_once() {
        let set = YearSet::new(1, 2000, 2001);
        assert!(!set.has_jobs());
        assert!(set.jobs().is_empty());
        assert!(set.install_jobs(vec![job(1, "climo")]));
        assert!(!set.install_jobs(vec![job(1, "climo"), job(1, "amwg")]));
        assert_eq!(set.jobs().len(), 1);
        assert!(set.job("climo").is_some());
        assert!(set.job("amwg").is_none());
    }

    #[tokio::test]
    async fn test_settle() {
        let set = YearSet::with_jobs(1, 1, 5, vec![job(1, "climo"), job(1, "amwg")]);
        set.apply_readiness(SetStatus::DataReady).await;
        set.mark_running().await;

        let climo = set.job("climo").unwrap();
        climo.transition(JobStatus::Completed).await.unwrap();
        assert_eq!(set.settle().await, SetStatus::Running);

        let amwg = set.job("amwg").unwrap();
        amwg.transition(JobStatus::Completed).await.unwrap();
        assert_eq!(set.settle().await, SetStatus::Completed);
    }

    #[tokio::test]
    async fn test_failed_is_sticky() {
        let set = YearSet::with_jobs(1, 1, 5, vec![job(1, "climo"), job(1, "amwg")]);
        set.apply_readiness(SetStatus::DataReady).await;
        set.mark_running().await;
        set.mark_failed().await;

        for job in set.jobs() {
            job.transition(JobStatus::Completed).await.unwrap();
        }
        assert_eq!(set.settle().await, SetStatus::Failed);
        assert_eq!(set.status().await, SetStatus::Failed);
    }
}
