//! The per-test lifecycle.
//!
//! [Orchestrator::run_test] drives one test through:
//!
//! ```text
//! PENDING -> BUILDING -> BUILT -> STAGING -> STAGED -> RUNNING -> RAN
//!     [-> RESTARTING -> RESTAGE -> RERUNNING] -> COMPARING -> PASSED -> ANALYSING -> ARCHIVING -> REPORTED
//! ```
//!
//! Each stage lives in its own file as an `impl Orchestrator` block.  Stages which can end the test return
//! `Result<_, StageError>`; the driver here records the error on the test, skips to archiving and reporting, and
//! returns normally.  Nothing that goes wrong with one test escapes this module: the suite always moves on to the
//! next test.
//!
//! Stages that are purely advisory (analysis, archiving, copying logs for humans) log warnings and carry on.
use std::path::{Path, PathBuf};

use crate::benchmark::BenchmarkStore;
use crate::collaborators::BuildSystem;
use crate::compare::ComparisonTools;
use crate::config::SuiteConfig;
use crate::error::{Stage, StageError};
use crate::history::PerformanceHistory;
use crate::layout::RunLayout;
use crate::model::{files, RunMode, SuiteOverrides, TestCase};
use crate::status::{StatusRecord, TestStatus};

mod analysis;
mod archive;
mod build;
mod compare;
mod publish;
mod restart;
mod run;
mod stage;
pub mod state;

pub use build::{build_flags, realclean_flags};
pub(crate) use compare::resolve_output;
pub use run::{restart_command, run_command};
pub use state::{LifecycleState, LifecycleTrace};

/// How tests are run, beyond what the suite file says.
#[derive(Clone, Debug, Default)]
pub struct RunSettings {
    pub overrides: SuiteOverrides,
    pub mode: RunMode,
    pub temporary: bool,

    /// Options for valgrind, if runs should go through it.
    pub valgrind: Option<String>,
}

pub type StageResult<T = ()> = Result<T, StageError>;

/// Everything a test needs from the suite while it runs.
pub struct Orchestrator<'a> {
    pub config: &'a SuiteConfig,
    pub layout: &'a RunLayout,
    pub settings: &'a RunSettings,
    pub build: &'a dyn BuildSystem,
    pub tools: &'a ComparisonTools,
    pub bench: &'a BenchmarkStore,
    pub history: &'a mut PerformanceHistory,
}

impl<'a> Orchestrator<'a> {
    /// Run one test to completion and write its status.
    ///
    /// `reclean` says whether the build directory must be cleaned first.  The returned record is the verdict even if
    /// writing it to the web directory failed.
    pub fn run_test(&mut self, test: &mut TestCase, reclean: bool) -> StatusRecord {
        log::info!("Working on test {}", test.name());

        let test_dir = self.layout.test_dir(test.name());
        if let Err(e) = self.lifecycle(test, &test_dir, reclean) {
            log::error!("{}: {e}", test.name());
            test.state.failure = Some(e);
        }

        let name = test.name().to_string();
        // A test which never built has nothing worth archiving.
        if test.state.compiled && test_dir.is_dir() {
            test.state.trace.enter(&name, LifecycleState::Archiving);
            self.archive(test, &test_dir);
        }

        let status = test.status(&self.settings.overrides);
        test.state.trace.enter(&name, LifecycleState::Reported);
        self.report(test, status)
    }

    fn lifecycle(&mut self, test: &mut TestCase, test_dir: &Path, reclean: bool) -> StageResult {
        std::fs::create_dir_all(test_dir).map_err(|e| {
            StageError::new(
                Stage::Staging,
                format!("unable to create {}: {e}", test_dir.display()),
            )
        })?;

        self.build_test(test, test_dir, reclean)?;
        if test.is_compile_only(&self.settings.overrides) {
            return Ok(());
        }

        self.stage_files(test, test_dir)?;
        self.run(test, test_dir)?;
        if test.is_restart() {
            self.restart(test, test_dir)?;
        }
        self.check_performance(test);

        match &self.settings.mode {
            RunMode::Normal => {
                self.compare(test, test_dir);
                self.analyse(test, test_dir);
                self.record_runtime(test);
                self.publish(test, test_dir);
            }
            RunMode::MakeBenchmarks { .. } | RunMode::CopyBenchmarks { .. } => {
                self.store_benchmark(test, test_dir)?;
            }
        }

        Ok(())
    }

    fn check_performance(&mut self, test: &mut TestCase) {
        let Some(perf) = test.performance(&self.settings.overrides) else {
            return;
        };
        let seconds = test.state.run_duration.as_secs_f64();
        let Some(verdict) =
            self.history
                .evaluate(test.name(), seconds, perf.threshold, perf.runs_to_average)
        else {
            log::info!("{}: no previous runs to compare performance against", test.name());
            return;
        };

        if !verdict.meets_threshold {
            let direction = if verdict.percentage < 0.0 {
                "slower"
            } else {
                "faster"
            };
            log::warn!(
                "{} ran {:.1}% {direction} than the average of the past {} runs",
                test.name(),
                verdict.percentage.abs(),
                verdict.samples
            );
        }
        test.state.performance = Some(verdict);
    }

    fn record_runtime(&mut self, test: &TestCase) {
        if !test.should_record_runtime(
            &self.settings.overrides,
            &self.settings.mode,
            self.settings.temporary,
        ) {
            return;
        }

        self.history.record(
            test.name(),
            test.state.run_duration.as_secs_f64(),
            &self.layout.run_id,
        );
        // Saved after every test so that a crash of the suite loses nothing.
        if let Err(e) = self.history.save(&self.layout.history_file) {
            log::warn!("{e}");
        }
    }

    fn report(&self, test: &TestCase, status: TestStatus) -> StatusRecord {
        let record = StatusRecord {
            name: test.name().to_string(),
            status,
            dim: test.spec.dim,
            message: test.state.failure.as_ref().map(|e| e.to_string()),
            build_time: test.state.build_duration,
            wall_time: test.state.run_duration,
            compared_artifact: test.state.compare_file_used.clone(),
            nlevels: test.state.nlevels,
            mpi_procs: test.spec.parallel.mpi_procs,
            omp_threads: test.spec.parallel.omp_threads,
            compile_only: test.is_compile_only(&self.settings.overrides),
            restart: test.is_restart(),
            build_command: test.state.build_command.clone(),
            run_command: test.state.run_command.clone(),
            structural_errors: test
                .state
                .compare_result
                .as_ref()
                .map(|c| c.structural_errors.clone())
                .unwrap_or_default(),
            performance: test.state.performance.clone(),
            job_info: test.state.job_info.clone(),
            lifecycle: test.state.trace.to_strings(),
        };

        if let Err(e) = crate::status::write_status(&self.layout.web_dir, &record) {
            log::error!("Unable to write the status of {}: {e}", test.name());
        }
        record
    }

    /// Copy a file for humans into the web directory.  Failure is only a warning.
    fn to_web(&self, source: &Path, name: &str) -> bool {
        let dest = self.layout.web_file(name);
        match std::fs::copy(source, &dest) {
            Ok(_) => true,
            Err(e) => {
                log::warn!(
                    "Unable to copy {} to {}: {e}",
                    source.display(),
                    dest.display()
                );
                false
            }
        }
    }

    /// Copy run output and any backtraces into the web directory.  Used when a test ends early.
    fn publish_run_output(&self, test: &mut TestCase, test_dir: &Path) {
        let name = test.name().to_string();
        self.to_web(&test_dir.join(files::run_out(&name)), &files::run_out(&name));
        let err = test_dir.join(files::err_out(&name));
        if err.is_file() {
            test.state.has_stderr = self.to_web(&err, &files::err_out(&name));
        }
    }

    fn source_root_for(&self, test: &TestCase) -> PathBuf {
        test.spec
            .extra_build_repo
            .as_deref()
            .and_then(|r| self.config.repo(r))
            .unwrap_or_else(|| self.config.source_repo())
            .dir
            .clone()
    }
}
