//! The test case model: one configured test plus everything learned about it while it runs.
//!
//! Nothing here does I/O.  Suite-wide overrides from the command line are never folded into the per-test
//! configuration; they are passed into every query instead, so that a [TestSpec] always says what the suite file
//! says.
use std::path::PathBuf;
use std::time::Duration;

use crate::compare::{ComparisonResult, Tolerances};
use crate::config::{PerformanceSpec, TestKind, TestSpec};
use crate::error::StageError;
use crate::history::PerformanceVerdict;
use crate::lifecycle::state::LifecycleTrace;
use crate::status::TestStatus;

/// Command-line options which override the suite file for every test.
#[derive(Clone, Debug, Default, PartialEq, derive_builder::Builder)]
#[builder(pattern = "owned", default)]
pub struct SuiteOverrides {
    /// Only build; treat every test as compile-only.
    pub compile_only: bool,
    pub skip_comparison: bool,

    #[builder(setter(strip_option))]
    pub tolerance: Option<f64>,
    #[builder(setter(strip_option))]
    pub abs_tolerance: Option<f64>,
    #[builder(setter(strip_option))]
    pub particle_tolerance: Option<f64>,

    /// Turn performance checking on for every test with these parameters.
    #[builder(setter(strip_option))]
    pub performance: Option<PerformanceSpec>,
}

/// What a suite run is for.
#[derive(Clone, Debug, Default, PartialEq, derive_more::IsVariant)]
pub enum RunMode {
    /// Compare against benchmarks.
    #[default]
    Normal,

    /// Store output as the new benchmarks.  The comment explains why.
    MakeBenchmarks { comment: String },

    /// Install the output of the last run's failures as benchmarks without running anything.
    CopyBenchmarks { comment: String },
}

impl RunMode {
    pub fn comment(&self) -> Option<&str> {
        match self {
            RunMode::Normal => None,
            RunMode::MakeBenchmarks { comment } | RunMode::CopyBenchmarks { comment } => Some(comment),
        }
    }
}

/// Everything learned about a test while running it.
///
/// Defaults describe a test which has not been built.
#[derive(Debug, Default)]
pub struct TestState {
    pub compiled: bool,
    pub build_command: Option<String>,
    pub build_duration: Duration,

    pub executable: Option<PathBuf>,
    pub run_command: Option<String>,
    pub return_code: Option<i32>,
    pub run_duration: Duration,
    pub has_stderr: bool,

    /// Backtrace files, as copied into the web directory.
    pub backtraces: Vec<String>,

    /// The plotfile or output file the run produced, relative to the test's directory.
    pub output_artifact: Option<String>,

    /// For restart tests, the first run's last plotfile after it was renamed out of the way.
    pub original_output: Option<String>,

    /// What the comparison was actually done against.
    pub compare_file_used: Option<String>,
    pub compare_result: Option<ComparisonResult>,
    pub nlevels: Option<u32>,

    pub analysis_result: Option<bool>,
    pub png_file: Option<String>,
    pub job_info: Vec<(String, String)>,

    pub performance: Option<PerformanceVerdict>,

    /// The stage error which ended the lifecycle early, if any.
    pub failure: Option<StageError>,

    /// Set instead of a comparison when benchmarks are being made.
    pub benchmark_status: Option<TestStatus>,
    pub trace: LifecycleTrace,
}

#[derive(Debug)]
pub struct TestCase {
    pub spec: TestSpec,
    pub state: TestState,
}

impl TestCase {
    pub fn new(spec: TestSpec) -> Self {
        TestCase {
            spec,
            state: TestState {
                trace: LifecycleTrace::new(),
                ..Default::default()
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn is_compile_only(&self, overrides: &SuiteOverrides) -> bool {
        overrides.compile_only || self.spec.kind.is_compile_only()
    }

    pub fn is_script(&self) -> bool {
        self.spec.kind.is_script()
    }

    pub fn is_self_test(&self) -> bool {
        self.spec.kind.is_self_test()
    }

    pub fn is_restart(&self) -> bool {
        self.spec.restart.is_some()
    }

    pub fn comparison_skipped(&self, overrides: &SuiteOverrides) -> bool {
        // Self tests are judged by their marker even when plotfile comparison is off.
        if self.is_self_test() {
            return false;
        }
        overrides.skip_comparison || !self.spec.comparison.enabled
    }

    pub fn tolerances(&self, overrides: &SuiteOverrides) -> Tolerances {
        Tolerances {
            relative: overrides.tolerance.or(self.spec.comparison.tolerance),
            absolute: overrides.abs_tolerance.or(self.spec.comparison.abs_tolerance),
        }
    }

    pub fn particle_tolerance(&self, overrides: &SuiteOverrides) -> Option<f64> {
        overrides
            .particle_tolerance
            .or(self.spec.comparison.particle_tolerance)
    }

    /// Performance parameters, if performance should be checked at all.
    pub fn performance(&self, overrides: &SuiteOverrides) -> Option<PerformanceSpec> {
        if let Some(p) = &overrides.performance {
            return Some(PerformanceSpec {
                check: true,
                ..p.clone()
            });
        }
        self.spec
            .performance
            .check
            .then(|| self.spec.performance.clone())
    }

    pub fn compare_successful(&self) -> bool {
        self.state
            .compare_result
            .as_ref()
            .map(|c| c.success)
            .unwrap_or(false)
    }

    pub fn is_passed(&self, overrides: &SuiteOverrides) -> bool {
        if self.is_compile_only(overrides) {
            return self.state.compiled;
        }

        let compared = self.comparison_skipped(overrides) || self.compare_successful();
        let analysed = self.spec.analysis.is_none() || self.state.analysis_result == Some(true);
        self.state.compiled && self.state.failure.is_none() && compared && analysed
    }

    pub fn has_crashed(&self) -> bool {
        if !self.state.backtraces.is_empty() {
            return true;
        }
        self.is_script() && self.state.return_code.is_some_and(|c| c != 0)
    }

    /// Should this run's wall time go into the performance history?
    pub fn should_record_runtime(&self, overrides: &SuiteOverrides, mode: &RunMode, temporary: bool) -> bool {
        self.is_passed(overrides) && !self.is_compile_only(overrides) && !temporary && mode.is_normal()
    }

    /// The final status of a test which went through the lifecycle.
    pub fn status(&self, overrides: &SuiteOverrides) -> TestStatus {
        if let Some(s) = &self.state.benchmark_status {
            return s.clone();
        }
        if !self.state.compiled {
            return TestStatus::CompileFailed;
        }
        if self.is_compile_only(overrides) {
            return TestStatus::Passed;
        }
        if self.has_crashed() {
            return TestStatus::Crashed;
        }
        if !self.is_passed(overrides) {
            return TestStatus::Failed;
        }

        let slow = self
            .state
            .performance
            .as_ref()
            .is_some_and(|p| !p.meets_threshold);
        if slow {
            TestStatus::PassedSlowly
        } else {
            TestStatus::Passed
        }
    }

    /// The text file a script test is judged by, relative to its directory.
    pub fn script_output(&self) -> String {
        self.spec
            .comparison
            .output_file
            .clone()
            .unwrap_or_else(|| format!("{}.run.out", self.spec.name))
    }

    pub fn success_marker(&self) -> Option<&str> {
        match &self.spec.kind {
            TestKind::SelfTest { success_marker } => Some(success_marker),
            _ => None,
        }
    }
}

/// Names of the files a test writes, relative to its own directory.
pub mod files {
    pub fn run_out(test: &str) -> String {
        format!("{test}.run.out")
    }

    pub fn err_out(test: &str) -> String {
        format!("{test}.err.out")
    }

    pub fn compare_out(test: &str) -> String {
        format!("{test}.compare.out")
    }

    pub fn analysis_out(test: &str) -> String {
        format!("{test}.analysis.out")
    }

    pub fn make_out(test: &str) -> String {
        format!("{test}.make.out")
    }
}
