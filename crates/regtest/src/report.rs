//! Suite-level reporting, and reading back what earlier runs reported.
//!
//! Per-test status files are written as tests finish (see [crate::status]).  After the loop, the aggregator reads them
//! back, so that the suite summary only ever reflects what is on disk.  That is also what makes it possible to rebuild
//! a summary for a run whose suite crashed part way through.
//!
//! Earlier runs are found by scanning the web root for directories whose names start with `20` (the run ids are dates)
//! and which carry a run status file.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::status::{read_marker, read_record, StatusRecord, TestStatus};

/// Run directories start with this, since run ids are dates.
pub const RUN_DIR_PREFIX: &str = "20";

pub const SUMMARY_FILE: &str = "summary.json";

/// The outcome of a whole suite run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum SuiteStatus {
    #[display(fmt = "ALL PASSED")]
    AllPassed,
    #[display(fmt = "SOME FAILED")]
    SomeFailed,
    #[display(fmt = "ALL FAILED")]
    AllFailed,
    #[display(fmt = "BENCHMARKS UPDATED")]
    BenchmarksUpdated,
}

impl SuiteStatus {
    pub fn from_marker(text: &str) -> Option<SuiteStatus> {
        let ret = match text.trim() {
            "ALL PASSED" => SuiteStatus::AllPassed,
            "SOME FAILED" => SuiteStatus::SomeFailed,
            "ALL FAILED" => SuiteStatus::AllFailed,
            "BENCHMARKS UPDATED" => SuiteStatus::BenchmarksUpdated,
            _ => return None,
        };
        Some(ret)
    }

    /// Work out the suite status from the statuses of its tests.
    pub fn from_tests<'s>(statuses: impl IntoIterator<Item = &'s TestStatus>, making_benchmarks: bool) -> SuiteStatus {
        if making_benchmarks {
            return SuiteStatus::BenchmarksUpdated;
        }

        let (mut total, mut failed) = (0, 0);
        for s in statuses {
            total += 1;
            if s.counts_as_failure() {
                failed += 1;
            }
        }

        if failed == 0 {
            SuiteStatus::AllPassed
        } else if failed == total {
            SuiteStatus::AllFailed
        } else {
            SuiteStatus::SomeFailed
        }
    }
}

/// One row of the summary table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub name: String,
    pub dim: u8,
    pub compared_artifact: Option<String>,
    pub nlevels: Option<u32>,
    pub mpi_procs: Option<u32>,
    pub omp_threads: Option<u32>,
    pub compile_only: bool,
    pub restart: bool,
    pub build_seconds: f64,
    pub wall_seconds: f64,
    pub status: TestStatus,
    #[serde(default)]
    pub job_info: Vec<(String, String)>,
}

impl From<&StatusRecord> for SummaryRow {
    fn from(r: &StatusRecord) -> Self {
        SummaryRow {
            name: r.name.clone(),
            dim: r.dim,
            compared_artifact: r.compared_artifact.clone(),
            nlevels: r.nlevels,
            mpi_procs: r.mpi_procs,
            omp_threads: r.omp_threads,
            compile_only: r.compile_only,
            restart: r.restart,
            build_seconds: r.build_time.as_secs_f64(),
            wall_seconds: r.wall_time.as_secs_f64(),
            status: r.status.clone(),
            job_info: r.job_info.clone(),
        }
    }
}

impl SummaryRow {
    /// A row for a test whose structured record is gone, from its marker alone.
    fn from_marker(name: &str, status: TestStatus) -> Self {
        SummaryRow {
            name: name.to_string(),
            dim: 0,
            compared_artifact: None,
            nlevels: None,
            mpi_procs: None,
            omp_threads: None,
            compile_only: false,
            restart: false,
            build_seconds: 0.0,
            wall_seconds: 0.0,
            status,
            job_info: vec![],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepoSummary {
    pub name: String,
    pub branch: Option<String>,
    pub hash: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub suite_name: String,
    pub run_id: String,
    pub status: SuiteStatus,
    pub num_failed: usize,
    pub note: Option<String>,
    pub benchmark_comment: Option<String>,
    pub repositories: Vec<RepoSummary>,
    pub tests: Vec<SummaryRow>,
}

impl RunSummary {
    /// Build the summary of a run from the records of the tests which ran, in that order.
    pub fn from_records(suite_name: &str, run_id: &str, records: &[StatusRecord], making_benchmarks: bool) -> Self {
        let rows = records.iter().map(SummaryRow::from).collect();
        Self::from_rows(suite_name, run_id, rows, making_benchmarks)
    }

    /// Rebuild a summary from whatever status files a web directory holds.
    pub fn rebuild(suite_name: &str, run_id: &str, web_dir: &Path) -> std::io::Result<Self> {
        let tests = test_names_in(web_dir, run_id)?;
        let rows = tests
            .iter()
            .filter_map(|n| read_marker(web_dir, n).map(|s| (n, s)))
            .map(|(n, s)| {
                read_record(web_dir, n)
                    .map(|r| SummaryRow::from(&r))
                    .unwrap_or_else(|| SummaryRow::from_marker(n, s))
            })
            .collect::<Vec<_>>();
        let making_benchmarks = !rows.is_empty() && rows.iter().all(|r| r.status.is_benchmark_status());
        Ok(Self::from_rows(suite_name, run_id, rows, making_benchmarks))
    }

    fn from_rows(suite_name: &str, run_id: &str, tests: Vec<SummaryRow>, making_benchmarks: bool) -> Self {
        let status = SuiteStatus::from_tests(tests.iter().map(|r| &r.status), making_benchmarks);
        let num_failed = tests.iter().filter(|r| r.status.counts_as_failure()).count();
        RunSummary {
            suite_name: suite_name.to_string(),
            run_id: run_id.to_string(),
            status,
            num_failed,
            note: None,
            benchmark_comment: None,
            repositories: vec![],
            tests,
        }
    }

    pub fn num_passed(&self) -> usize {
        self.tests.len() - self.num_failed
    }

    /// Write the run status file and the JSON summary into the run's web directory.
    pub fn write(&self, web_dir: &Path) -> std::io::Result<()> {
        std::fs::write(run_status_path(web_dir, &self.run_id), format!("{}\n", self.status))?;
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(web_dir.join(SUMMARY_FILE), json)
    }
}

pub fn run_status_path(web_dir: &Path, run_id: &str) -> PathBuf {
    web_dir.join(format!("{run_id}.status"))
}

/// The file at the web root which says how the latest run of a branch went.
pub fn branch_status_path(web_root: &Path, branch: &str) -> PathBuf {
    web_root.join(format!("suite.{branch}.status"))
}

pub fn write_branch_status(
    web_root: &Path,
    branch: &str,
    repo: &str,
    num_failed: usize,
    hash: &str,
) -> std::io::Result<()> {
    std::fs::write(
        branch_status_path(web_root, branch),
        format!("{repo}; num failed: {num_failed}; source hash: {hash}"),
    )
}

/// Names of the tests with a marker in `web_dir`, sorted.
fn test_names_in(web_dir: &Path, run_id: &str) -> std::io::Result<Vec<String>> {
    let run_status = format!("{run_id}.status");
    let mut ret = vec![];
    for e in std::fs::read_dir(web_dir)? {
        let e = e?;
        let Ok(file) = e.file_name().into_string() else {
            continue;
        };
        if file == run_status {
            continue;
        }
        if let Some(name) = file.strip_suffix(".status") {
            ret.push(name.to_string());
        }
    }
    ret.sort();
    Ok(ret)
}

/// Every earlier run under a web root, oldest first, with the status of each test.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunHistory {
    runs: BTreeMap<String, BTreeMap<String, TestStatus>>,
}

impl RunHistory {
    pub fn scan(web_root: &Path) -> std::io::Result<RunHistory> {
        let mut runs = BTreeMap::new();
        for e in std::fs::read_dir(web_root)? {
            let e = e?;
            let Ok(run_id) = e.file_name().into_string() else {
                continue;
            };
            if !run_id.starts_with(RUN_DIR_PREFIX) || !e.path().is_dir() {
                continue;
            }
            let dir = e.path();
            if !run_status_path(&dir, &run_id).is_file() {
                continue;
            }

            let tests = test_names_in(&dir, &run_id)?
                .into_iter()
                .filter_map(|t| read_marker(&dir, &t).map(|s| (t, s)))
                .collect();
            runs.insert(run_id, tests);
        }
        Ok(RunHistory { runs })
    }

    pub fn runs(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, TestStatus>)> {
        self.runs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn last_run(&self) -> Option<&str> {
        self.runs.keys().next_back().map(|k| k.as_str())
    }

    /// Tests which failed in the given run, sorted by name.
    pub fn failed_tests(&self, run_id: &str) -> Vec<String> {
        self.runs
            .get(run_id)
            .map(|tests| {
                tests
                    .iter()
                    .filter(|(_, s)| s.counts_as_failure())
                    .map(|(t, _)| t.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every test which appears in any run, sorted.  With `active`, only those still in the suite.
    pub fn all_tests(&self, active: Option<&[String]>) -> Vec<String> {
        let mut ret = self
            .runs
            .values()
            .flat_map(|t| t.keys())
            .filter(|t| active.map(|a| a.contains(*t)).unwrap_or(true))
            .cloned()
            .collect::<Vec<_>>();
        ret.sort();
        ret.dedup();
        ret
    }
}
