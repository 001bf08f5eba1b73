//! Wall-clock history of past runs, used to notice when a test becomes slower.
//!
//! The file is JSON, keyed by test name, with two parallel arrays per test:
//!
//! ```json
//! { "Sod-x": { "runtimes": [12.1, 11.9], "dates": ["2024-05-02", "2024-05-01"] } }
//! ```
//!
//! Both arrays are newest first.  Nothing is ever pruned; evaluation only looks at the newest few entries.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Unable to write performance history {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unable to serialize performance history: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TimingRecord {
    pub runtimes: Vec<f64>,
    pub dates: Vec<String>,
}

impl TimingRecord {
    pub fn len(&self) -> usize {
        self.runtimes.len().min(self.dates.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The outcome of comparing a run against its history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceVerdict {
    /// Current time divided by the historical mean.
    pub ratio: f64,

    /// Positive when the run was faster than average.
    pub percentage: f64,
    pub meets_threshold: bool,

    /// How many past runs the mean was taken over.
    pub samples: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PerformanceHistory {
    records: BTreeMap<String, TimingRecord>,
}

impl PerformanceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load history from `path`.
    ///
    /// History is advisory, so a missing or malformed file is treated as empty rather than as an error.
    pub fn load(path: &Path) -> PerformanceHistory {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No performance history at {}", path.display());
                return PerformanceHistory::new();
            }
            Err(e) => {
                log::warn!(
                    "Unable to read performance history {}: {e}",
                    path.display()
                );
                return PerformanceHistory::new();
            }
        };

        match serde_json::from_str::<BTreeMap<String, TimingRecord>>(&text) {
            Ok(records) => PerformanceHistory { records },
            Err(e) => {
                log::warn!(
                    "Performance history {} is malformed, starting over: {e}",
                    path.display()
                );
                PerformanceHistory::new()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), HistoryError> {
        let text = serde_json::to_string_pretty(&self.records)?;
        std::fs::write(path, text).map_err(|source| HistoryError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Record a run.  It becomes the newest entry.
    pub fn record(&mut self, test: &str, seconds: f64, run_id: &str) {
        let rec = self.records.entry(test.to_string()).or_default();
        rec.runtimes.insert(0, seconds);
        rec.dates.insert(0, run_id.to_string());
    }

    pub fn get(&self, test: &str) -> Option<&TimingRecord> {
        self.records.get(test)
    }

    pub fn tests(&self) -> impl Iterator<Item = (&str, &TimingRecord)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Compare `current` against the mean of the newest `window` runs of `test`.
    ///
    /// Returns `None` if there is nothing to compare against.
    pub fn evaluate(
        &self,
        test: &str,
        current: f64,
        threshold: f64,
        window: usize,
    ) -> Option<PerformanceVerdict> {
        let rec = self.records.get(test)?;
        let samples = window.min(rec.len());
        if samples == 0 {
            return None;
        }

        let mean = rec.runtimes[..samples].iter().sum::<f64>() / samples as f64;
        if mean == 0.0 {
            return None;
        }

        let ratio = current / mean;
        Some(PerformanceVerdict {
            ratio,
            percentage: 100.0 * (1.0 - ratio),
            meets_threshold: ratio < threshold,
            samples,
        })
    }
}
