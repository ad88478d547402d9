//! Local file tracking.
//!
//! Scans one directory per data category and marks the files it finds in
//! the status grid. Date-stamped history files fill their (year, month)
//! cell; other files (restarts, stream definitions) are tracked by name
//! under year 0, month 0.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SchedResult;
use crate::grid::{DataCategory, DataReadiness, StatusGrid, year_month_from_filename};

/// Where one category's files live locally.
#[derive(Debug, Clone)]
pub struct CategorySource {
    pub category: DataCategory,

    /// Directory holding the files.
    pub dir: PathBuf,

    /// Whether file names carry a `YYYY-MM` stamp.
    pub dated: bool,

    /// Only file names containing this substring are considered.
    pub pattern: Option<String>,

    /// For undated categories, the names that must all be present.
    pub expected_files: Vec<String>,
}

impl CategorySource {
    pub fn dated(category: impl Into<DataCategory>, dir: impl Into<PathBuf>) -> Self {
        Self {
            category: category.into(),
            dir: dir.into(),
            dated: true,
            pattern: None,
            expected_files: Vec::new(),
        }
    }

    pub fn undated(
        category: impl Into<DataCategory>,
        dir: impl Into<PathBuf>,
        expected_files: Vec<String>,
    ) -> Self {
        Self {
            category: category.into(),
            dir: dir.into(),
            dated: false,
            pattern: None,
            expected_files,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

/// Populates the status grid from files already on disk.
pub struct LocalTracker {
    grid: Arc<StatusGrid>,
    sources: Vec<CategorySource>,
    last_year: i32,
    names: Mutex<FxHashMap<(DataCategory, i32, u32), String>>,
}

impl LocalTracker {
    /// Track `sources` into `grid`. Dated files past `last_year` are ignored.
    pub fn new(grid: Arc<StatusGrid>, sources: Vec<CategorySource>, last_year: i32) -> Self {
        Self {
            grid,
            sources,
            last_year,
            names: Mutex::new(FxHashMap::default()),
        }
    }

    /// Local file name recorded for a cell.
    pub fn file_name(&self, category: &DataCategory, year: i32, month: u32) -> Option<String> {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(category.clone(), year, month))
            .cloned()
    }

    /// Scan every source once. Returns the number of cells that changed.
    ///
    /// A missing or unreadable directory is logged and skipped; the next
    /// scan tries again.
    pub async fn scan(&self) -> usize {
        let mut changed = 0;
        for source in &self.sources {
            match self.scan_source(source).await {
                Ok(n) => changed += n,
                Err(e) => warn!(
                    category = %source.category,
                    dir = %source.dir.display(),
                    error = %e,
                    "Cannot list input directory"
                ),
            }
        }
        changed
    }

    async fn scan_source(&self, source: &CategorySource) -> SchedResult<usize> {
        let mut entries = fs::read_dir(&source.dir).await?;
        let mut changed = 0;
        let mut seen = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            // Follows symlinks; input directories are often link farms.
            let Ok(meta) = fs::metadata(entry.path()).await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(pattern) = &source.pattern {
                if !name.contains(pattern.as_str()) {
                    continue;
                }
            }
            let readiness = if meta.len() == 0 {
                DataReadiness::PartialData
            } else {
                DataReadiness::DataReady
            };

            if source.dated {
                let Some((year, month)) = year_month_from_filename(&name) else {
                    debug!(file = %name, "Skipping file without date stamp");
                    continue;
                };
                if year > self.last_year {
                    continue;
                }
                if self.mark(&source.category, year, month, readiness) {
                    changed += 1;
                }
                self.record(&source.category, year, month, name);
            } else {
                seen.push((name, readiness));
            }
        }

        if !source.dated {
            let readiness = undated_readiness(&source.expected_files, &seen);
            if self.mark(&source.category, 0, 0, readiness) {
                changed += 1;
            }
            if let Some((name, _)) = seen.first() {
                self.record(&source.category, 0, 0, name.clone());
            }
        }

        Ok(changed)
    }

    /// Set a cell unless a transfer is in flight for it.
    fn mark(&self, category: &DataCategory, year: i32, month: u32, value: DataReadiness) -> bool {
        let current = self.grid.get(category, year, month);
        if current == DataReadiness::InTransit || current == value || !value.is_present() {
            return false;
        }
        self.grid.set(category, year, month, value);
        true
    }

    fn record(&self, category: &DataCategory, year: i32, month: u32, name: String) {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((category.clone(), year, month), name);
    }

    /// Rescan every `interval` until `cancel` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!(
            categories = self.sources.len(),
            interval_secs = interval.as_secs(),
            "Local file tracker starting"
        );

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Local file tracker shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    let changed = self.scan().await;
                    if changed > 0 {
                        debug!(changed, "Status grid updated");
                    }
                }
            }
        }
    }
}

fn undated_readiness(expected: &[String], seen: &[(String, DataReadiness)]) -> DataReadiness {
    if expected.is_empty() {
        return if seen.iter().any(|(_, r)| *r == DataReadiness::DataReady) {
            DataReadiness::DataReady
        } else if seen.is_empty() {
            DataReadiness::NoData
        } else {
            DataReadiness::PartialData
        };
    }

    let mut all_ready = true;
    let mut any = false;
    for name in expected {
        match seen.iter().find(|(seen_name, _)| seen_name == name) {
            Some((_, DataReadiness::DataReady)) => any = true,
            Some(_) => {
                any = true;
                all_ready = false;
            }
            None => all_ready = false,
        }
    }

    match (all_ready, any) {
        (true, _) => DataReadiness::DataReady,
        (false, true) => DataReadiness::PartialData,
        (false, false) => DataReadiness::NoData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &std::path::Path, name: &str, contents: &[u8]) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[tokio::test]
    async fn test_scan_dated_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "case.cam.h0.0001-01.nc", b"x");
        touch(dir.path(), "case.cam.h0.0001-02.nc", b"");
        touch(dir.path(), "case.cam.h0.0009-01.nc", b"x");
        touch(dir.path(), "case.clm2.h0.0001-03.nc", b"x");
        touch(dir.path(), "README", b"x");

        let grid = Arc::new(StatusGrid::new());
        let atm = DataCategory::new("atm");
        let tracker = LocalTracker::new(
            Arc::clone(&grid),
            vec![CategorySource::dated("atm", dir.path()).with_pattern("cam.h0")],
            5,
        );

        assert_eq!(tracker.scan().await, 2);
        assert_eq!(grid.get(&atm, 1, 1), DataReadiness::DataReady);
        assert_eq!(grid.get(&atm, 1, 2), DataReadiness::PartialData);
        assert_eq!(grid.get(&atm, 1, 3), DataReadiness::NoData);
        assert_eq!(grid.get(&atm, 9, 1), DataReadiness::NoData);
        assert_eq!(
            tracker.file_name(&atm, 1, 1).as_deref(),
            Some("case.cam.h0.0001-01.nc")
        );

        assert_eq!(tracker.scan().await, 0);
    }

    #[tokio::test]
    async fn test_in_transit_is_not_overridden() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "case.cam.h0.0001-01.nc", b"partial");

        let grid = Arc::new(StatusGrid::new());
        let atm = DataCategory::new("atm");
        grid.set(&atm, 1, 1, DataReadiness::InTransit);

        let tracker = LocalTracker::new(
            Arc::clone(&grid),
            vec![CategorySource::dated("atm", dir.path())],
            5,
        );
        tracker.scan().await;
        assert_eq!(grid.get(&atm, 1, 1), DataReadiness::InTransit);
    }

    #[tokio::test]
    async fn test_undated_files_need_every_expected_name() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "streams.ocean", b"x");

        let grid = Arc::new(StatusGrid::new());
        let streams = DataCategory::new("streams");
        let tracker = LocalTracker::new(
            Arc::clone(&grid),
            vec![CategorySource::undated(
                "streams",
                dir.path(),
                vec!["streams.ocean".to_string(), "streams.cice".to_string()],
            )],
            5,
        );

        tracker.scan().await;
        assert_eq!(grid.get(&streams, 0, 0), DataReadiness::PartialData);

        touch(dir.path(), "streams.cice", b"x");
        tracker.scan().await;
        assert_eq!(grid.get(&streams, 0, 0), DataReadiness::DataReady);
    }

    #[tokio::test]
    async fn test_missing_directory_is_skipped() {
        let grid = Arc::new(StatusGrid::new());
        let tracker = LocalTracker::new(
            grid,
            vec![CategorySource::dated("atm", "/nonexistent/procflow/atm")],
            5,
        );
        assert_eq!(tracker.scan().await, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "case.cam.h0.0002-07.nc", b"x");

        let grid = Arc::new(StatusGrid::new());
        let tracker = Arc::new(LocalTracker::new(
            Arc::clone(&grid),
            vec![CategorySource::dated("atm", dir.path())],
            5,
        ));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&tracker).run(Duration::from_secs(30), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(
            grid.get(&DataCategory::new("atm"), 2, 7),
            DataReadiness::DataReady
        );
    }
}
