//! Where a suite run puts things on disk.
//!
//! Under the suite's top directory:
//!
//! - `{suite}-tests/{date}[-NNN]/{test}/`: the scratch output of each test, one directory per run.  A temporary run
//!   uses `TEMP_RUN` instead of the date and is wiped first.
//! - `{suite}-benchmarks/`: the benchmark store and the performance history.
//!
//! And under the web root, one directory per run with the same name as the output directory, holding everything
//! meant for humans: logs, status files, and the summary.  If no web root is configured, a temporary one is made
//! under the top directory and removed when the layout is dropped.
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::config::SuiteConfig;
use crate::error::{Result, SuiteError};

/// Runs on the same day get a numbered suffix, up to this many.
pub const MAX_RUNS_PER_DAY: u32 = 100;

pub const TEMP_RUN_ID: &str = "TEMP_RUN";

#[derive(Debug)]
pub struct RunLayout {
    pub run_id: String,
    pub output_dir: PathBuf,
    pub web_root: PathBuf,
    pub web_dir: PathBuf,
    pub bench_dir: PathBuf,
    pub history_file: PathBuf,
    pub temporary: bool,

    /// Keeps a temporary web root alive for as long as the layout is.
    temp_web_root: Option<tempfile::TempDir>,
}

pub fn tests_root(config: &SuiteConfig) -> PathBuf {
    config
        .main
        .test_top_dir
        .join(format!("{}-tests", config.main.suite_name))
}

pub fn bench_dir(config: &SuiteConfig) -> PathBuf {
    config
        .main
        .test_top_dir
        .join(format!("{}-benchmarks", config.main.suite_name))
}

pub fn history_file(config: &SuiteConfig) -> PathBuf {
    bench_dir(config).join(format!("{}.json", config.main.wallclock_file))
}

/// Ensure `path` is an existing directory.
pub fn check_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(SuiteError::invalid_directory(path))
    }
}

fn mkdir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| SuiteError::io(path, e))
}

/// Pick the run id for `date` given the runs already present in `root`.
pub fn next_run_id(root: &Path, date: NaiveDate) -> String {
    let base = date.format("%Y-%m-%d").to_string();
    let mut candidate = base.clone();
    for i in 1..MAX_RUNS_PER_DAY {
        if !root.join(&candidate).exists() {
            break;
        }
        candidate = format!("{base}-{i:03}");
    }
    candidate
}

impl RunLayout {
    /// Create the directories for a new run.
    ///
    /// The benchmark directory must already exist unless benchmarks are being made.
    pub fn create(
        config: &SuiteConfig,
        temporary: bool,
        making_benchmarks: bool,
        date: NaiveDate,
    ) -> Result<RunLayout> {
        let top = &config.main.test_top_dir;
        check_dir(top)?;

        let bench = bench_dir(config);
        if !bench.is_dir() {
            if making_benchmarks {
                mkdir(&bench)?;
            } else {
                return Err(SuiteError::missing_benchmarks(bench));
            }
        }

        let (web_root, temp_web_root) = match &config.main.web_top_dir {
            Some(w) if !w.as_os_str().is_empty() => {
                check_dir(w)?;
                (w.clone(), None)
            }
            _ => {
                let t = tempfile::Builder::new()
                    .prefix("web-")
                    .tempdir_in(top)
                    .map_err(|e| SuiteError::io(top, e))?;
                log::info!(
                    "No web directory configured, using {}",
                    t.path().display()
                );
                (t.path().to_path_buf(), Some(t))
            }
        };

        let root = tests_root(config);
        mkdir(&root)?;

        let run_id = if temporary {
            TEMP_RUN_ID.to_string()
        } else {
            next_run_id(&root, date)
        };

        let output_dir = root.join(&run_id);
        let web_dir = web_root.join(&run_id);
        if temporary {
            for d in [&output_dir, &web_dir] {
                crate::benchmark::remove_any(d).map_err(|e| SuiteError::io(d, e))?;
            }
        }
        mkdir(&output_dir)?;
        mkdir(&web_dir)?;

        if let Some(src) = &config.source_file {
            if let Some(name) = src.file_name() {
                let dest = web_dir.join(name);
                if let Err(e) = std::fs::copy(src, &dest) {
                    log::warn!("Unable to copy {} to {}: {e}", src.display(), dest.display());
                }
            }
        }

        log::info!("Testing directory is {}", output_dir.display());

        Ok(RunLayout {
            run_id,
            output_dir,
            web_root,
            web_dir,
            history_file: history_file(config),
            bench_dir: bench,
            temporary,
            temp_web_root,
        })
    }

    /// The private scratch directory of a test.
    pub fn test_dir(&self, test: &str) -> PathBuf {
        self.output_dir.join(test)
    }

    /// A file for humans, in this run's web directory.
    pub fn web_file(&self, name: &str) -> PathBuf {
        self.web_dir.join(name)
    }

    pub fn has_temporary_web_root(&self) -> bool {
        self.temp_web_root.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(top: &Path, web: Option<&Path>) -> SuiteConfig {
        let web = web
            .map(|w| format!("  web_top_dir: {}\n", w.display()))
            .unwrap_or_default();
        SuiteConfig::from_yaml_str(&format!(
            "main:\n  suite_name: Castro\n  test_top_dir: {}\n{web}repos:\n  - name: AMReX\n    dir: /amrex\n  - name: source\n    dir: /castro\ntests: []\n",
            top.display()
        ))
        .unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
    }

    #[test]
    fn same_day_runs_get_suffixes() {
        let top = tempfile::tempdir().unwrap();
        let web = tempfile::tempdir().unwrap();
        let cfg = config(top.path(), Some(web.path()));

        let first = RunLayout::create(&cfg, false, true, date()).unwrap();
        let second = RunLayout::create(&cfg, false, false, date()).unwrap();
        let third = RunLayout::create(&cfg, false, false, date()).unwrap();

        assert_eq!(first.run_id, "2024-05-02");
        assert_eq!(second.run_id, "2024-05-02-001");
        assert_eq!(third.run_id, "2024-05-02-002");
        assert!(second.output_dir.ends_with("Castro-tests/2024-05-02-001"));
        assert!(web.path().join("2024-05-02-001").is_dir());
        assert_eq!(
            first.history_file,
            top.path().join("Castro-benchmarks/wallclock_history.json")
        );
    }

    #[test]
    fn missing_benchmarks_are_fatal_in_normal_mode() {
        let top = tempfile::tempdir().unwrap();
        let cfg = config(top.path(), None);
        let err = RunLayout::create(&cfg, false, false, date()).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn temporary_runs_are_wiped() {
        let top = tempfile::tempdir().unwrap();
        let web = tempfile::tempdir().unwrap();
        let cfg = config(top.path(), Some(web.path()));

        let l = RunLayout::create(&cfg, true, true, date()).unwrap();
        assert_eq!(l.run_id, TEMP_RUN_ID);
        std::fs::write(l.output_dir.join("leftover"), "").unwrap();

        let l = RunLayout::create(&cfg, true, false, date()).unwrap();
        assert!(!l.output_dir.join("leftover").exists());
    }

    #[test]
    fn temporary_web_root_goes_away() {
        let top = tempfile::tempdir().unwrap();
        let cfg = config(top.path(), None);
        let l = RunLayout::create(&cfg, false, true, date()).unwrap();
        assert!(l.has_temporary_web_root());
        let root = l.web_root.clone();
        assert!(root.is_dir());
        drop(l);
        assert!(!root.exists());
    }
}
