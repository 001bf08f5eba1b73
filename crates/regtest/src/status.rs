//! Per-test status files.
//!
//! Every test that reaches the end of its lifecycle leaves two files in the run's web directory: `{name}.status`,
//! holding one of a fixed set of marker strings which downstream scripts grep for, and `{name}.status.json`, the
//! structured record.  [TestStatus] is the closed set of markers; the literal strings only exist in this file.
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compare::StructuralError;
use crate::history::PerformanceVerdict;

const BENCHMARKS_UPDATED_PREFIX: &str = "benchmarks updated.  New file:  ";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, derive_more::IsVariant)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TestStatus {
    Passed,
    PassedSlowly,
    Failed,
    Crashed,
    CompileFailed,
    BenchmarksUpdated { file: String },
    BenchmarksFailed,
}

impl TestStatus {
    pub fn marker(&self) -> String {
        match self {
            TestStatus::Passed => "PASSED".to_string(),
            TestStatus::PassedSlowly => "PASSED SLOWLY".to_string(),
            TestStatus::Failed => "FAILED".to_string(),
            TestStatus::Crashed => "CRASHED".to_string(),
            TestStatus::CompileFailed => "COMPILE FAILED".to_string(),
            TestStatus::BenchmarksUpdated { file } => format!("{BENCHMARKS_UPDATED_PREFIX}{file}"),
            TestStatus::BenchmarksFailed => "benchmarks failed".to_string(),
        }
    }

    pub fn from_marker(text: &str) -> Option<TestStatus> {
        let text = text.trim_end_matches(['\n', '\r']);
        if let Some(file) = text.strip_prefix(BENCHMARKS_UPDATED_PREFIX) {
            return Some(TestStatus::BenchmarksUpdated {
                file: file.to_string(),
            });
        }

        let ret = match text.trim() {
            "PASSED SLOWLY" => TestStatus::PassedSlowly,
            "PASSED" => TestStatus::Passed,
            "COMPILE FAILED" => TestStatus::CompileFailed,
            "CRASHED" => TestStatus::Crashed,
            "FAILED" => TestStatus::Failed,
            "benchmarks failed" => TestStatus::BenchmarksFailed,
            _ => return None,
        };
        Some(ret)
    }

    /// Does this status count toward the suite's failure count?
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            TestStatus::Failed
                | TestStatus::Crashed
                | TestStatus::CompileFailed
                | TestStatus::BenchmarksFailed
        )
    }

    pub fn is_benchmark_status(&self) -> bool {
        self.is_benchmarks_updated() || self.is_benchmarks_failed()
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.marker())
    }
}

/// The structured record written next to the marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub name: String,
    pub status: TestStatus,
    pub dim: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(with = "seconds")]
    pub build_time: Duration,
    #[serde(with = "seconds")]
    pub wall_time: Duration,

    #[serde(default)]
    pub compared_artifact: Option<String>,
    #[serde(default)]
    pub nlevels: Option<u32>,
    #[serde(default)]
    pub mpi_procs: Option<u32>,
    #[serde(default)]
    pub omp_threads: Option<u32>,
    #[serde(default)]
    pub compile_only: bool,
    #[serde(default)]
    pub restart: bool,
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default)]
    pub run_command: Option<String>,
    #[serde(default)]
    pub structural_errors: Vec<StructuralError>,
    #[serde(default)]
    pub performance: Option<PerformanceVerdict>,
    #[serde(default)]
    pub job_info: Vec<(String, String)>,
    #[serde(default)]
    pub lifecycle: Vec<String>,
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::try_from_secs_f64(secs).unwrap_or_default())
    }
}

pub fn marker_path(web_dir: &Path, test: &str) -> PathBuf {
    web_dir.join(format!("{test}.status"))
}

pub fn record_path(web_dir: &Path, test: &str) -> PathBuf {
    web_dir.join(format!("{test}.status.json"))
}

/// Write both status files for a test.
pub fn write_status(web_dir: &Path, record: &StatusRecord) -> std::io::Result<()> {
    std::fs::write(
        marker_path(web_dir, &record.name),
        format!("{}\n", record.status.marker()),
    )?;
    let json = serde_json::to_string_pretty(record).map_err(std::io::Error::other)?;
    std::fs::write(record_path(web_dir, &record.name), json)
}

/// Read a test's marker.  `None` if the file is missing or holds something unrecognized.
pub fn read_marker(web_dir: &Path, test: &str) -> Option<TestStatus> {
    let text = std::fs::read_to_string(marker_path(web_dir, test)).ok()?;
    TestStatus::from_marker(&text)
}

pub fn read_record(web_dir: &Path, test: &str) -> Option<StatusRecord> {
    let text = std::fs::read_to_string(record_path(web_dir, test)).ok()?;
    match serde_json::from_str(&text) {
        Ok(r) => Some(r),
        Err(e) => {
            log::warn!("Ignoring malformed status record for {test}: {e}");
            None
        }
    }
}
