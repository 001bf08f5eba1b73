//! Whole-suite runs against a fake build system, fake repositories, and shell scripts standing in for the simulation
//! and `fcompare`.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use pretty_assertions::assert_eq;

use regtest::collaborators::{BuildOutcome, BuildRequest, BuildSystem, VersionControl};
use regtest::compare::ComparisonTools;
use regtest::flags::CompileFlags;
use regtest::lifecycle::RunSettings;
use regtest::model::SuiteOverrides;
use regtest::process::CommandError;
use regtest::selection::Selection;
use regtest::status::{read_marker, read_record, TestStatus};
use regtest::{RunOptions, Suite, SuiteConfig};

/// Writes plotfiles and a checkpoint named after its `amr.plot_file=` and `amr.check_file=` arguments.
const SIMULATION: &str = r#"#!/bin/sh
for a in "$@"; do
  case "$a" in
    amr.plot_file=*) p="${a#amr.plot_file=}" ;;
    amr.check_file=*) c="${a#amr.check_file=}" ;;
  esac
done
mkdir -p "${p}00000" "${p}00010" "${c}00005"
echo density > "${p}00010/Header"
echo "step 10 done"
"#;

const CRASHING_SIMULATION: &str = r#"#!/bin/sh
echo "segfault" > Backtrace.0
exit 1
"#;

/// Like [SIMULATION], but never writes a checkpoint.
const NO_CHECKPOINT_SIMULATION: &str = r#"#!/bin/sh
for a in "$@"; do
  case "$a" in
    amr.plot_file=*) p="${a#amr.plot_file=}" ;;
  esac
done
mkdir -p "${p}00000" "${p}00010"
echo density > "${p}00010/Header"
"#;

/// Writes output but exits with an error and no backtrace.
const FAILING_SIMULATION: &str = r#"#!/bin/sh
mkdir -p Sod_plt00010
echo "step 10 done"
exit 3
"#;

fn script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Builds succeed by dropping a simulation script into the build directory, except in directories named in `fail`.
///
/// `programs` replaces the default simulation for the named build directories.
struct FakeMake {
    fail: Vec<&'static str>,
    programs: Vec<(&'static str, &'static str)>,
}

impl BuildSystem for FakeMake {
    fn build(&self, request: &BuildRequest) -> Result<BuildOutcome, CommandError> {
        let dir_name = request.dir.file_name().unwrap().to_string_lossy().to_string();
        if let Some(log) = &request.log_path {
            std::fs::write(log, format!("make in {dir_name}\n")).unwrap();
        }

        let exit_code = if self.fail.contains(&dir_name.as_str()) {
            2
        } else {
            let body = self
                .programs
                .iter()
                .find(|(d, _)| *d == dir_name)
                .map(|(_, b)| *b)
                .unwrap_or(SIMULATION);
            script(&request.dir.join("main.ex"), body);
            0
        };

        Ok(BuildOutcome {
            command_line: format!("make {}", request.options),
            exit_code,
            duration: Duration::from_millis(1),
        })
    }

    fn realclean(&self, _dir: &Path, _options: &CompileFlags) -> Result<(), CommandError> {
        Ok(())
    }

    fn find_executable(&self, dir: &Path) -> Option<PathBuf> {
        let exe = dir.join("main.ex");
        exe.is_file().then_some(exe)
    }
}

struct FakeRepo {
    name: String,
}

impl VersionControl for FakeRepo {
    fn name(&self) -> &str {
        &self.name
    }

    fn branch(&self) -> Option<String> {
        Some("development".into())
    }

    fn update(&mut self, _log_dir: &Path) -> regtest::Result<String> {
        Ok(format!("{}-hash", self.name))
    }

    fn current_hash(&self) -> regtest::Result<String> {
        Ok(format!("{}-hash", self.name))
    }

    fn changelog(&self, _dest_dir: &Path) -> regtest::Result<()> {
        Ok(())
    }

    fn restore(&mut self) -> regtest::Result<()> {
        Ok(())
    }
}

struct Fixture {
    _scratch: tempfile::TempDir,
    top: PathBuf,
    web: PathBuf,
    source: PathBuf,
    fcompare: PathBuf,
}

impl Fixture {
    fn new(build_dirs: &[&str]) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();

        let scratch = tempfile::tempdir().unwrap();
        let root = scratch.path().to_path_buf();
        let top = root.join("tests");
        let web = root.join("web");
        let source = root.join("Castro");
        for d in [&top, &web, &root.join("amrex"), &top.join("Castro-benchmarks")] {
            std::fs::create_dir_all(d).unwrap();
        }
        for b in build_dirs {
            let dir = source.join("Exec").join(b);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("inputs"), "max_step = 10\n").unwrap();
        }

        let fcompare = root.join("fcompare.ex");
        script(&fcompare, "#!/bin/sh\necho 'variable  absolute error  relative error'\nexit 0\n");

        Fixture {
            _scratch: scratch,
            top,
            web,
            source,
            fcompare,
        }
    }

    fn config(&self, tests: &str) -> SuiteConfig {
        let yaml = format!(
            "main:\n  suite_name: Castro\n  test_top_dir: {}\n  web_top_dir: {}\nrepos:\n  - name: AMReX\n    dir: {}\n  - name: source\n    dir: {}\n    build: true\ntests:\n{tests}",
            self.top.display(),
            self.web.display(),
            self.top.parent().unwrap().join("amrex").display(),
            self.source.display(),
        );
        SuiteConfig::from_yaml_str(&yaml).unwrap()
    }

    fn benchmark(&self, entry: &str) {
        let dir = self.top.join("Castro-benchmarks").join(entry);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Header"), "density\n").unwrap();
    }

    fn suite(&self, config: SuiteConfig, options: RunOptions, make: FakeMake) -> Suite {
        Suite::new(config, options)
            .with_build_system(Box::new(make))
            .with_repositories(vec![
                Box::new(FakeRepo { name: "AMReX".into() }),
                Box::new(FakeRepo { name: "source".into() }),
            ])
            .with_tools(ComparisonTools::new(&self.fcompare))
    }

    fn web_dir(&self) -> PathBuf {
        self.web.join("2024-05-02")
    }

    fn test_dir(&self, test: &str) -> PathBuf {
        self.top.join("Castro-tests").join("2024-05-02").join(test)
    }
}

fn options() -> RunOptions {
    RunOptions {
        date: NaiveDate::from_ymd_opt(2024, 5, 2),
        ..Default::default()
    }
}

fn make() -> FakeMake {
    FakeMake {
        fail: vec![],
        programs: vec![],
    }
}

fn running(dir: &'static str, program: &'static str) -> FakeMake {
    FakeMake {
        fail: vec![],
        programs: vec![(dir, program)],
    }
}

const SOD: &str = "  - name: Sod\n    dim: 1\n    build_dir: Exec/Sod\n    input_file: inputs\n";
const SEDOV: &str = "  - name: Sedov\n    dim: 2\n    build_dir: Exec/Sedov\n    input_file: inputs\n";

#[test]
fn passing_test_is_reported() {
    let fx = Fixture::new(&["Sod"]);
    fx.benchmark("Sod_plt00010");

    let outcome = fx.suite(fx.config(SOD), options(), make()).run().unwrap();

    assert_eq!(outcome.num_failed(), 0);
    assert_eq!(read_marker(&fx.web_dir(), "Sod"), Some(TestStatus::Passed));
    let record = read_record(&fx.web_dir(), "Sod").unwrap();
    assert_eq!(record.compared_artifact.as_deref(), Some("Sod_plt00010"));
    assert!(std::fs::read_to_string(fx.web.join("suite.development.status"))
        .unwrap()
        .contains("num failed: 0"));
}

#[test]
fn build_failure_skips_everything_after() {
    let fx = Fixture::new(&["Sod"]);
    fx.benchmark("Sod_plt00010");

    let make = FakeMake {
        fail: vec!["Sod"],
        programs: vec![],
    };
    let outcome = fx.suite(fx.config(SOD), options(), make).run().unwrap();

    assert_eq!(outcome.num_failed(), 1);
    assert_eq!(read_marker(&fx.web_dir(), "Sod"), Some(TestStatus::CompileFailed));
    assert!(!fx.test_dir("Sod").join("Sod.run.out").exists());

    let lifecycle = read_record(&fx.web_dir(), "Sod").unwrap().lifecycle;
    assert_eq!(lifecycle, vec!["PENDING", "BUILDING", "FAILED_BUILD", "REPORTED"]);
}

#[test]
fn one_failure_among_two_tests() {
    let fx = Fixture::new(&["Sod", "Sedov"]);
    fx.benchmark("Sod_plt00010");
    fx.benchmark("Sedov_plt00010");

    let make = FakeMake {
        fail: vec!["Sedov"],
        programs: vec![],
    };
    let config = fx.config(&format!("{SOD}{SEDOV}"));
    let outcome = fx.suite(config, options(), make).run().unwrap();

    assert_eq!(outcome.num_failed(), 1);
    assert_eq!(read_marker(&fx.web_dir(), "Sod"), Some(TestStatus::Passed));
    assert_eq!(read_marker(&fx.web_dir(), "Sedov"), Some(TestStatus::CompileFailed));
    assert_eq!(outcome.summary.tests.len(), 2);
}

#[test]
fn missing_benchmark_fails_the_test() {
    let fx = Fixture::new(&["Sod"]);

    let outcome = fx.suite(fx.config(SOD), options(), make()).run().unwrap();

    assert_eq!(outcome.num_failed(), 1);
    assert_eq!(read_marker(&fx.web_dir(), "Sod"), Some(TestStatus::Failed));
    let record = read_record(&fx.web_dir(), "Sod").unwrap();
    assert!(record.structural_errors.iter().any(|e| e.is_no_benchmark()));
}

#[test]
fn crashed_run_is_never_restarted() {
    let fx = Fixture::new(&["Sod"]);
    let config = fx.config(&format!("{SOD}    restart_test: true\n    restart_file_num: 5\n"));
    let outcome = fx
        .suite(config, options(), running("Sod", CRASHING_SIMULATION))
        .run()
        .unwrap();

    assert_eq!(outcome.num_failed(), 1);
    assert_eq!(read_marker(&fx.web_dir(), "Sod"), Some(TestStatus::Crashed));
    let lifecycle = read_record(&fx.web_dir(), "Sod").unwrap().lifecycle;
    assert!(lifecycle.contains(&"FAILED_RESTART".to_string()));
    assert!(!lifecycle.contains(&"RERUNNING".to_string()));
}

#[test]
fn restart_compares_against_the_first_run() {
    let fx = Fixture::new(&["Sod"]);
    let config = fx.config(&format!("{SOD}    restart_test: true\n    restart_file_num: 5\n"));

    // No benchmark: a restart test is judged against its own first run.
    let outcome = fx.suite(config, options(), make()).run().unwrap();

    assert_eq!(outcome.num_failed(), 0);
    assert_eq!(read_marker(&fx.web_dir(), "Sod"), Some(TestStatus::Passed));
    assert!(fx.test_dir("Sod").join("orig_Sod_plt00010").is_dir());
    let run_out = std::fs::read_to_string(fx.test_dir("Sod").join("Sod.run.out")).unwrap();
    assert_eq!(run_out.matches("step 10 done").count(), 2);
}

#[test]
fn slow_runs_only_change_the_qualifier() {
    let fx = Fixture::new(&["Sod"]);
    fx.benchmark("Sod_plt00010");
    std::fs::write(
        fx.top.join("Castro-benchmarks").join("wallclock_history.json"),
        r#"{ "Sod": { "runtimes": [1e-9, 1e-9], "dates": ["2024-05-01", "2024-04-30"] } }"#,
    )
    .unwrap();

    let mut opts = options();
    opts.settings = RunSettings {
        overrides: SuiteOverrides {
            performance: Some(regtest::config::PerformanceSpec {
                check: true,
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    };
    let outcome = fx.suite(fx.config(SOD), opts, make()).run().unwrap();

    assert_eq!(outcome.num_failed(), 0);
    assert_eq!(read_marker(&fx.web_dir(), "Sod"), Some(TestStatus::PassedSlowly));
    let perf = read_record(&fx.web_dir(), "Sod").unwrap().performance.unwrap();
    assert!(!perf.meets_threshold);
    assert_eq!(perf.samples, 2);
}

#[test]
fn selecting_nothing_is_rejected_before_anything_runs() {
    let fx = Fixture::new(&["Sod"]);
    let mut opts = options();
    opts.selection = Selection {
        dim: Some(3),
        ..Default::default()
    };

    let err = fx.suite(fx.config(SOD), opts, make()).run().unwrap_err();

    assert!(err.is_no_tests());
    assert!(!fx.top.join("Castro-tests").exists());
}

#[test]
fn making_benchmarks_stores_the_output() {
    let fx = Fixture::new(&["Sod"]);
    std::fs::remove_dir_all(fx.top.join("Castro-benchmarks")).unwrap();

    let mut opts = options();
    opts.settings.mode = regtest::model::RunMode::MakeBenchmarks {
        comment: "new hydro solver".into(),
    };
    let outcome = fx.suite(fx.config(SOD), opts, make()).run().unwrap();

    assert_eq!(outcome.num_failed(), 0);
    assert_eq!(
        read_marker(&fx.web_dir(), "Sod"),
        Some(TestStatus::BenchmarksUpdated {
            file: "Sod_plt00010".into()
        })
    );
    assert!(fx.top.join("Castro-benchmarks").join("Sod_plt00010").join("Header").is_file());
    assert_eq!(outcome.summary.benchmark_comment.as_deref(), Some("new hydro solver"));
}

#[test]
fn missing_link_file_fails_staging() {
    let fx = Fixture::new(&["Sod"]);
    fx.benchmark("Sod_plt00010");
    let config = fx.config(&format!("{SOD}    link_files: [missing.dat]\n"));

    let outcome = fx.suite(config, options(), make()).run().unwrap();

    assert_eq!(outcome.num_failed(), 1);
    let record = read_record(&fx.web_dir(), "Sod").unwrap();
    assert_eq!(record.status, TestStatus::Failed);
    assert!(record.lifecycle.contains(&"FAILED_STAGE".to_string()));
    assert!(!record.lifecycle.contains(&"RUNNING".to_string()));
    assert!(record.message.unwrap().contains("missing.dat"));
}

#[test]
fn self_tests_look_for_their_marker() {
    let fx = Fixture::new(&["Sod", "Sedov"]);
    let tests = format!(
        "{SOD}    self_test: true\n    st_success_string: step 10 done\n{SEDOV}    self_test: true\n    st_success_string: all converged\n"
    );

    // No benchmarks: self tests never need them.
    let outcome = fx.suite(fx.config(&tests), options(), make()).run().unwrap();

    assert_eq!(outcome.num_failed(), 1);
    assert_eq!(read_marker(&fx.web_dir(), "Sod"), Some(TestStatus::Passed));
    assert_eq!(read_marker(&fx.web_dir(), "Sedov"), Some(TestStatus::Failed));
    let log = std::fs::read_to_string(fx.test_dir("Sedov").join("Sedov.compare.out")).unwrap();
    assert_eq!(log, "SELF TEST FAILED\n");
}

#[test]
fn script_tests_are_diffed_against_their_benchmark() {
    let fx = Fixture::new(&["Sod", "Sedov"]);
    for b in ["Sod", "Sedov"] {
        script(
            &fx.source.join("Exec").join(b).join("check.sh"),
            "#!/bin/sh\necho \"mass $1\" > result.txt\n",
        );
    }
    let bench = fx.top.join("Castro-benchmarks");
    std::fs::write(bench.join("Sod_result.txt"), "mass 1.0\n").unwrap();
    std::fs::write(bench.join("Sedov_result.txt"), "mass 1.0\n").unwrap();

    let tests = format!(
        "{SOD}    run_as_script: check.sh\n    script_args: \"1.0\"\n    output_file: result.txt\n{SEDOV}    run_as_script: check.sh\n    script_args: \"2.0\"\n    output_file: result.txt\n"
    );
    let outcome = fx.suite(fx.config(&tests), options(), make()).run().unwrap();

    assert_eq!(outcome.num_failed(), 1);
    assert_eq!(read_marker(&fx.web_dir(), "Sod"), Some(TestStatus::Passed));
    assert_eq!(read_marker(&fx.web_dir(), "Sedov"), Some(TestStatus::Failed));
    let record = read_record(&fx.web_dir(), "Sod").unwrap();
    assert_eq!(record.compared_artifact.as_deref(), Some("result.txt"));
}

#[test]
fn nonzero_exit_fails_when_not_ignored() {
    let fx = Fixture::new(&["Sod"]);
    fx.benchmark("Sod_plt00010");
    let config = fx.config(&format!("{SOD}    ignore_return_code: false\n"));

    let outcome = fx
        .suite(config, options(), running("Sod", FAILING_SIMULATION))
        .run()
        .unwrap();

    assert_eq!(outcome.num_failed(), 1);
    let record = read_record(&fx.web_dir(), "Sod").unwrap();
    assert_eq!(record.status, TestStatus::Failed);
    assert!(record.message.unwrap().contains("run exited with code 3"));
    assert!(record.lifecycle.contains(&"FAILED_RUN".to_string()));
    assert!(!record.lifecycle.contains(&"COMPARING".to_string()));
}

#[test]
fn restart_without_checkpoint_is_not_attempted() {
    let fx = Fixture::new(&["Sod"]);
    let config = fx.config(&format!("{SOD}    restart_test: true\n    restart_file_num: 5\n"));

    let outcome = fx
        .suite(config, options(), running("Sod", NO_CHECKPOINT_SIMULATION))
        .run()
        .unwrap();

    assert_eq!(outcome.num_failed(), 1);
    let record = read_record(&fx.web_dir(), "Sod").unwrap();
    assert_eq!(record.status, TestStatus::Failed);
    assert!(record.message.unwrap().contains("Restart test not possible"));
    assert!(record.lifecycle.contains(&"FAILED_RESTART".to_string()));
    assert!(!record.lifecycle.contains(&"RERUNNING".to_string()));
    assert!(!fx.test_dir("Sod").join("orig_Sod_plt00010").exists());
}

#[test]
fn nan_on_a_coarse_level_fails_the_comparison() {
    let fx = Fixture::new(&["Sod"]);
    fx.benchmark("Sod_plt00010");
    script(
        &fx.fcompare,
        "#!/bin/sh\necho ' level = 0'\necho ' density  NaN  NaN'\necho ' level = 1'\necho ' density  1.0e-14  1.0e-14'\nexit 0\n",
    );
    let config = fx.config(&format!("{SOD}    tolerance: 1.0e-10\n"));

    let outcome = fx.suite(config, options(), make()).run().unwrap();

    assert_eq!(outcome.num_failed(), 1);
    let record = read_record(&fx.web_dir(), "Sod").unwrap();
    assert_eq!(record.status, TestStatus::Failed);
    assert!(record.structural_errors.iter().any(|e| e.is_nan_present()));
}
