//! Per-(category, year, month) readiness tracking for input files.
//!
//! The grid is written by the file-tracking subsystem and read by the
//! readiness evaluator. A key that was never set reads as
//! [`DataReadiness::NoData`]; absence and `NoData` are the same thing.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// A class of input file, e.g. `atm`, `ice`, `ocn`, `rest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataCategory(pub String);

impl DataCategory {
    /// Create a category tag.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DataCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DataCategory {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How far a single expected file has progressed towards local availability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataReadiness {
    /// Nothing local and nothing in flight.
    #[default]
    NoData,
    /// A transfer for this file is in progress.
    InTransit,
    /// The file exists locally but is incomplete.
    PartialData,
    /// The file is fully available on local disk.
    DataReady,
}

impl DataReadiness {
    /// Whether this value is distinguishable from "nothing at all".
    pub fn is_present(&self) -> bool {
        !matches!(self, DataReadiness::NoData)
    }
}

impl std::fmt::Display for DataReadiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataReadiness::NoData => "NoData",
            DataReadiness::InTransit => "InTransit",
            DataReadiness::PartialData => "PartialData",
            DataReadiness::DataReady => "DataReady",
        };
        write!(f, "{name}")
    }
}

/// Key into the grid.
///
/// Files that are not date-stamped (restart archives, stream definitions)
/// are tracked under year 0, month 0 with their file name carried by the
/// tracker instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridKey {
    pub category: DataCategory,
    pub year: i32,
    pub month: u32,
}

impl GridKey {
    pub fn new(category: impl Into<DataCategory>, year: i32, month: u32) -> Self {
        Self {
            category: category.into(),
            year,
            month,
        }
    }
}

impl std::fmt::Display for GridKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.category, self.year, self.month)
    }
}

/// Readiness of every expected input file for one run.
#[derive(Debug, Default)]
pub struct StatusGrid {
    cells: RwLock<rustc_hash::FxHashMap<GridKey, DataReadiness>>,
}

impl StatusGrid {
    /// Create an empty grid.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up one cell. Missing keys read as `NoData`.
    pub fn get(&self, category: &DataCategory, year: i32, month: u32) -> DataReadiness {
        let key = GridKey {
            category: category.clone(),
            year,
            month,
        };
        self.cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied()
            .unwrap_or_default()
    }

    /// Set one cell.
    pub fn set(&self, category: &DataCategory, year: i32, month: u32, value: DataReadiness) {
        let key = GridKey {
            category: category.clone(),
            year,
            month,
        };
        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        if value == DataReadiness::NoData {
            cells.remove(&key);
        } else {
            cells.insert(key, value);
        }
    }

    /// Count the cells of `category` currently in each readiness state.
    pub fn summary(&self, category: &DataCategory) -> rustc_hash::FxHashMap<DataReadiness, usize> {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts = rustc_hash::FxHashMap::default();
        for (key, value) in cells.iter() {
            if &key.category == category {
                *counts.entry(*value).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Whether every listed key is `DataReady`.
    pub fn all_ready<'a>(&self, keys: impl IntoIterator<Item = &'a GridKey>) -> bool {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        keys.into_iter()
            .all(|key| cells.get(key) == Some(&DataReadiness::DataReady))
    }
}

/// The monthly keys the transfer subsystem has to satisfy for a year range.
pub fn expected_keys(categories: &[DataCategory], start_year: i32, end_year: i32) -> Vec<GridKey> {
    let mut keys = Vec::new();
    for category in categories {
        for year in start_year..=end_year {
            for month in 1..=12 {
                keys.push(GridKey::new(category.clone(), year, month));
            }
        }
    }
    keys
}

/// Extract the `YYYY-MM` stamp of a model history file name.
///
/// `case.cam.h0.0001-02.nc` yields `Some((1, 2))`. The stamp must follow a
/// `.` and the month must be in `1..=12`.
pub fn year_month_from_filename(filename: &str) -> Option<(i32, u32)> {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    let bytes = name.as_bytes();

    // Pattern: '.' DDDD '-' DD
    for start in 0..bytes.len() {
        if bytes[start] != b'.' || start + 8 > bytes.len() {
            continue;
        }
        let digits = &bytes[start + 1..start + 5];
        if !digits.iter().all(u8::is_ascii_digit) || bytes[start + 5] != b'-' {
            continue;
        }
        let month_digits = &bytes[start + 6..start + 8];
        if !month_digits.iter().all(u8::is_ascii_digit) {
            continue;
        }
        let year = name[start + 1..start + 5].parse().ok()?;
        let month: u32 = name[start + 6..start + 8].parse().ok()?;
        if (1..=12).contains(&month) {
            return Some((year, month));
        }
    }
    None
}
