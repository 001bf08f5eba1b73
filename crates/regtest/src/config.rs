//! The suite file.
//!
//! A suite is described by a YAML file with three top-level keys: `main` (suite-wide settings), `repos` (the git
//! repositories involved) and `tests` (an ordered list of tests).  Parsing happens in two steps: serde reads the file
//! into the `Raw*` types, which mirror the file and are full of defaults, then [SuiteConfig::from_raw] validates them
//! into the typed configuration the rest of the crate uses.  Anything which would be rejected later is rejected here,
//! before a single test runs.
//!
//! A minimal file looks like:
//!
//! ```yaml
//! main:
//!   suite_name: Castro
//!   test_top_dir: /scratch/regtests
//! repos:
//!   - name: AMReX
//!     dir: /src/amrex
//!   - name: source
//!     dir: /src/Castro
//!     build: true
//! tests:
//!   - name: Sod-x
//!     build_dir: Exec/hydro_tests/Sod
//!     input_file: inputs-sod-x
//!     dim: 1
//!     tolerance: 1.0e-10
//! ```
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::flags::{CompileFlags, FlagParseError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unable to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unable to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Test {test}: {reason}")]
    InvalidTest { test: String, reason: String },

    #[error("Test {0} is defined more than once")]
    DuplicateTest(String),

    #[error("{0}")]
    Invalid(String),
}

fn invalid_test(test: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidTest {
        test: test.to_string(),
        reason: reason.into(),
    }
}

/// Which of the framework's build systems the tests are built with.
///
/// This decides the spelling of build flags, the executable name, and the run-time options for plotfile naming.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq, derive_more::IsVariant)]
pub enum SourceTree {
    #[default]
    #[serde(rename = "C_Src")]
    CSrc,
    #[serde(rename = "F_Src")]
    FSrc,
    /// Tests which live in the framework repository itself.  Built like `C_Src`.
    #[serde(rename = "AMReX", alias = "amrex")]
    Amrex,
}

impl SourceTree {
    pub fn is_fortran(&self) -> bool {
        matches!(self, SourceTree::FSrc)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawSuite {
    pub main: RawMain,
    pub repos: Vec<RawRepo>,
    pub tests: Vec<RawTest>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RawMain {
    pub suite_name: String,
    pub sub_title: String,
    pub source_tree: SourceTree,
    pub test_top_dir: PathBuf,
    pub web_top_dir: Option<PathBuf>,
    pub wallclock_file: String,
    pub make: String,
    pub num_make_jobs: u32,
    pub comp: String,
    pub fcomp: String,
    pub add_to_c_make_command: String,
    pub add_to_f_make_command: String,
    pub mpi_command: String,
    pub mpi_host: String,
    pub purge_output: bool,
    pub plot_file_name: String,
    pub global_add_to_exec_string: String,
    pub summary_job_info_fields: Vec<String>,
    pub report_active_tests_only: bool,
    pub default_branch: String,
    pub tools: ToolPaths,
}

impl Default for RawMain {
    fn default() -> Self {
        RawMain {
            suite_name: "testDefault".to_string(),
            sub_title: String::new(),
            source_tree: SourceTree::default(),
            test_top_dir: PathBuf::new(),
            web_top_dir: None,
            wallclock_file: "wallclock_history".to_string(),
            make: "make".to_string(),
            num_make_jobs: 1,
            comp: "g++".to_string(),
            fcomp: "gfortran".to_string(),
            add_to_c_make_command: String::new(),
            add_to_f_make_command: String::new(),
            mpi_command: String::new(),
            mpi_host: String::new(),
            purge_output: false,
            plot_file_name: "amr.plot_file".to_string(),
            global_add_to_exec_string: String::new(),
            summary_job_info_fields: vec![],
            report_active_tests_only: false,
            default_branch: "development".to_string(),
            tools: ToolPaths::default(),
        }
    }
}

/// Explicit locations of the comparison tools.
///
/// Any tool not given here is built from the framework's `Tools/` directory at suite start.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub fcompare: Option<PathBuf>,
    pub fboxinfo: Option<PathBuf>,
    pub fsnapshot: Option<PathBuf>,
    pub particle_compare: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawRepo {
    pub name: String,
    pub dir: PathBuf,
    pub branch: Option<String>,
    pub hash: Option<String>,
    pub pr: Option<u32>,
    pub build: bool,
    pub comp_string: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RawTest {
    pub name: String,
    pub build_dir: PathBuf,
    pub extra_build_dir: Option<String>,
    pub target: String,
    pub input_file: Option<PathBuf>,
    pub probin_file: Option<PathBuf>,
    pub aux_files: Vec<PathBuf>,
    pub link_files: Vec<PathBuf>,
    pub dim: u8,
    pub restart_test: bool,
    pub restart_file_num: Option<u32>,
    pub use_mpi: bool,
    pub numprocs: Option<u32>,
    pub use_omp: bool,
    pub numthreads: Option<u32>,
    pub debug: bool,
    pub acc: bool,
    pub compile_test: bool,
    pub self_test: bool,
    pub st_success_string: Option<String>,
    pub run_as_script: Option<PathBuf>,
    pub script_args: String,
    pub add_to_compile_string: String,
    pub ignore_global_make_additions: bool,
    pub runtime_params: String,
    pub custom_run_cmd: Option<String>,
    pub do_comparison: bool,
    pub tolerance: Option<f64>,
    pub abs_tolerance: Option<f64>,
    pub particle_tolerance: Option<f64>,
    pub compare_particles: bool,
    pub particle_types: String,
    pub compare_file: Option<String>,
    pub output_file: Option<String>,
    pub diff_dir: Option<PathBuf>,
    pub diff_opts: String,
    pub do_vis: bool,
    pub vis_var: String,
    pub analysis_routine: Option<PathBuf>,
    pub analysis_main_args: String,
    pub analysis_output_image: Option<PathBuf>,
    pub check_performance: bool,
    pub performance_threshold: f64,
    pub runs_to_average: usize,
    pub ignore_return_code: bool,
    pub keywords: Vec<String>,
}

impl Default for RawTest {
    fn default() -> Self {
        RawTest {
            name: String::new(),
            build_dir: PathBuf::new(),
            extra_build_dir: None,
            target: String::new(),
            input_file: None,
            probin_file: None,
            aux_files: vec![],
            link_files: vec![],
            dim: 0,
            restart_test: false,
            restart_file_num: None,
            use_mpi: false,
            numprocs: None,
            use_omp: false,
            numthreads: None,
            debug: false,
            acc: false,
            compile_test: false,
            self_test: false,
            st_success_string: None,
            run_as_script: None,
            script_args: String::new(),
            add_to_compile_string: String::new(),
            ignore_global_make_additions: false,
            runtime_params: String::new(),
            custom_run_cmd: None,
            do_comparison: true,
            tolerance: None,
            abs_tolerance: None,
            particle_tolerance: None,
            compare_particles: false,
            particle_types: String::new(),
            compare_file: None,
            output_file: None,
            diff_dir: None,
            diff_opts: String::new(),
            do_vis: false,
            vis_var: String::new(),
            analysis_routine: None,
            analysis_main_args: String::new(),
            analysis_output_image: None,
            check_performance: false,
            performance_threshold: 1.2,
            runs_to_average: 5,
            ignore_return_code: true,
            keywords: vec![],
        }
    }
}

/// The validated suite.
#[derive(Clone, Debug)]
pub struct SuiteConfig {
    pub main: RawMain,
    pub repos: Vec<RepoConfig>,

    /// In the order given in the file.
    pub tests: Vec<TestSpec>,

    /// The suite file itself, copied into every run's web directory.
    pub source_file: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct RepoConfig {
    pub name: String,
    pub dir: PathBuf,
    pub branch: Option<String>,
    pub hash: Option<String>,
    pub pr: Option<u32>,

    /// Does this repository contain build directories?
    pub build: bool,

    /// Extra make options needed when building in this repository, with `@self@` and `@source@` already substituted.
    pub comp_flags: CompileFlags,
}

/// What sort of test this is.  A test is exactly one of these.
#[derive(Clone, Debug, PartialEq, derive_more::IsVariant)]
pub enum TestKind {
    /// Build, run, compare plotfiles against a benchmark.
    Standard,

    /// Only check that the code compiles.
    CompileOnly,

    /// The run reports its own success by printing a marker to stdout.
    SelfTest { success_marker: String },

    /// A script is run in place of the simulation, and its declared output is diffed as text.
    Script { script: PathBuf, args: String },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Parallelism {
    /// Number of MPI processes, if the test runs under MPI.
    pub mpi_procs: Option<u32>,

    /// Number of OpenMP threads, if the test uses OpenMP.
    pub omp_threads: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComparisonSpec {
    pub enabled: bool,
    pub tolerance: Option<f64>,
    pub abs_tolerance: Option<f64>,
    pub particle_tolerance: Option<f64>,

    /// Particle species to compare.  Empty means no particle comparison.
    pub particle_types: Vec<String>,
    pub compare_file: Option<String>,
    pub output_file: Option<String>,
    pub diff_dir: Option<PathBuf>,
    pub diff_opts: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisSpec {
    /// Relative to the repository the test is built in.
    pub routine: PathBuf,
    pub args: String,
    pub output_image: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PerformanceSpec {
    pub check: bool,
    pub threshold: f64,
    pub runs_to_average: usize,
}

impl Default for PerformanceSpec {
    fn default() -> Self {
        PerformanceSpec {
            check: false,
            threshold: 1.2,
            runs_to_average: 5,
        }
    }
}

/// One validated test definition.
#[derive(Clone, Debug, PartialEq)]
pub struct TestSpec {
    pub name: String,
    pub kind: TestKind,
    pub dim: u8,

    /// Relative to the source repository, or the extra repository if one is named.
    pub build_dir: PathBuf,
    pub extra_build_repo: Option<String>,
    pub target: String,
    pub input_file: Option<PathBuf>,
    pub probin_file: Option<PathBuf>,
    pub aux_files: Vec<PathBuf>,
    pub link_files: Vec<PathBuf>,

    /// Checkpoint number to restart from, for restart tests.
    pub restart: Option<u32>,
    pub parallel: Parallelism,
    pub debug: bool,
    pub acc: bool,
    pub compile_flags: CompileFlags,
    pub ignore_global_make_additions: bool,
    pub runtime_params: String,
    pub custom_run_command: Option<String>,
    pub comparison: ComparisonSpec,

    /// Variable to visualize, if visualization was requested.
    pub vis_var: Option<String>,
    pub analysis: Option<AnalysisSpec>,
    pub performance: PerformanceSpec,
    pub ignore_return_code: bool,
    pub keywords: Vec<String>,
}

impl SuiteConfig {
    pub fn load(path: &Path) -> Result<SuiteConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawSuite = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let mut ret = Self::from_raw(raw)?;
        ret.source_file = Some(path.to_path_buf());
        Ok(ret)
    }

    pub fn from_yaml_str(text: &str) -> Result<SuiteConfig, ConfigError> {
        let raw: RawSuite = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<string>"),
            source,
        })?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawSuite) -> Result<SuiteConfig, ConfigError> {
        if raw.main.test_top_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("main.test_top_dir must be set".into()));
        }
        if raw.main.num_make_jobs == 0 {
            return Err(ConfigError::Invalid("main.num_make_jobs must be at least 1".into()));
        }

        let repos = validate_repos(&raw.repos, raw.main.source_tree)?;

        let mut seen = HashSet::new();
        let mut tests = Vec::with_capacity(raw.tests.len());
        for t in raw.tests.iter() {
            if !seen.insert(t.name.clone()) {
                return Err(ConfigError::DuplicateTest(t.name.clone()));
            }
            tests.push(validate_test(t, &repos)?);
        }

        Ok(SuiteConfig {
            main: raw.main,
            repos,
            tests,
            source_file: None,
        })
    }

    pub fn repo(&self, name: &str) -> Option<&RepoConfig> {
        self.repos.iter().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn amrex(&self) -> &RepoConfig {
        // Validation guarantees this repository exists.
        self.repo("AMReX")
            .unwrap_or_else(|| unreachable!("validated suites always have an AMReX repo"))
    }

    /// The repository tests are built in unless they name an extra one.
    pub fn source_repo(&self) -> &RepoConfig {
        if self.main.source_tree.is_amrex() {
            return self.amrex();
        }
        self.repo("source").unwrap_or_else(|| self.amrex())
    }

    /// Directory a test is built in.
    pub fn build_dir_for(&self, test: &TestSpec) -> PathBuf {
        let root = test
            .extra_build_repo
            .as_deref()
            .and_then(|r| self.repo(r))
            .unwrap_or_else(|| self.source_repo());
        root.dir.join(&test.build_dir)
    }

    pub fn test(&self, name: &str) -> Option<&TestSpec> {
        self.tests.iter().find(|t| t.name == name)
    }
}

fn validate_repos(raw: &[RawRepo], source_tree: SourceTree) -> Result<Vec<RepoConfig>, ConfigError> {
    let amrex = raw
        .iter()
        .find(|r| r.name.eq_ignore_ascii_case("AMReX"))
        .ok_or_else(|| ConfigError::Invalid("an AMReX repository must be configured".into()))?;
    let source_dir = raw
        .iter()
        .find(|r| r.name == "source")
        .map(|r| r.dir.clone())
        .unwrap_or_else(|| amrex.dir.clone());

    if !source_tree.is_amrex() && !raw.iter().any(|r| r.name == "source") {
        return Err(ConfigError::Invalid(
            "a `source` repository is required unless main.source_tree is AMReX".into(),
        ));
    }

    let mut names = HashSet::new();
    let mut ret = vec![];
    for r in raw.iter() {
        if r.name.is_empty() {
            return Err(ConfigError::Invalid("every repository needs a name".into()));
        }
        if !names.insert(r.name.to_lowercase()) {
            return Err(ConfigError::Invalid(format!(
                "repository {} is defined more than once",
                r.name
            )));
        }
        if r.hash.is_some() && r.pr.is_some() {
            return Err(ConfigError::Invalid(format!(
                "repository {}: specify at most one of hash and pr",
                r.name
            )));
        }

        let comp_flags = match &r.comp_string {
            None => CompileFlags::new(),
            Some(s) => {
                let substituted = s
                    .replace("@self@", &r.dir.to_string_lossy())
                    .replace("@source@", &source_dir.to_string_lossy());
                CompileFlags::parse(&substituted).map_err(|e: FlagParseError| {
                    ConfigError::Invalid(format!("repository {}: comp_string: {e}", r.name))
                })?
            }
        };

        ret.push(RepoConfig {
            name: r.name.clone(),
            dir: r.dir.clone(),
            branch: r.branch.clone(),
            hash: r.hash.clone(),
            pr: r.pr,
            build: r.build,
            comp_flags,
        });
    }

    Ok(ret)
}

fn classify(t: &RawTest) -> Result<TestKind, ConfigError> {
    let requested = [t.compile_test, t.self_test, t.run_as_script.is_some()]
        .iter()
        .filter(|x| **x)
        .count();
    if requested > 1 {
        return Err(invalid_test(
            &t.name,
            "compile_test, self_test and run_as_script are mutually exclusive",
        ));
    }

    if t.compile_test {
        return Ok(TestKind::CompileOnly);
    }

    if t.self_test {
        let success_marker = t
            .st_success_string
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid_test(&t.name, "self tests need st_success_string"))?;
        return Ok(TestKind::SelfTest { success_marker });
    }

    if let Some(script) = &t.run_as_script {
        return Ok(TestKind::Script {
            script: script.clone(),
            args: t.script_args.clone(),
        });
    }

    Ok(TestKind::Standard)
}

fn positive_count(test: &str, what: &str, value: Option<u32>) -> Result<u32, ConfigError> {
    match value {
        Some(v) if v >= 1 => Ok(v),
        _ => Err(invalid_test(test, format!("{what} must be at least 1"))),
    }
}

fn validate_test(t: &RawTest, repos: &[RepoConfig]) -> Result<TestSpec, ConfigError> {
    if t.name.is_empty() {
        return Err(ConfigError::Invalid("every test needs a name".into()));
    }
    if t.name.contains('/') || t.name.contains(char::is_whitespace) {
        return Err(invalid_test(&t.name, "test names may not contain `/` or whitespace"));
    }
    if !(1..=3).contains(&t.dim) {
        return Err(invalid_test(&t.name, "dim must be 1, 2, or 3"));
    }

    let kind = classify(t)?;

    let restart = if t.restart_test {
        if !kind.is_standard() {
            return Err(invalid_test(
                &t.name,
                "restart tests cannot be compile-only, self tests, or script tests",
            ));
        }
        let Some(n) = t.restart_file_num else {
            return Err(invalid_test(&t.name, "restart tests need restart_file_num"));
        };
        Some(n)
    } else {
        None
    };

    if let Some(extra) = &t.extra_build_dir {
        if !repos.iter().any(|r| r.name.eq_ignore_ascii_case(extra)) {
            return Err(invalid_test(
                &t.name,
                format!("extra_build_dir names unknown repository {extra}"),
            ));
        }
    }

    for (what, tol) in [
        ("tolerance", t.tolerance),
        ("abs_tolerance", t.abs_tolerance),
        ("particle_tolerance", t.particle_tolerance),
    ] {
        if let Some(v) = tol {
            if !(v >= 0.0) {
                return Err(invalid_test(&t.name, format!("{what} must be a non-negative number")));
            }
        }
    }

    if t.check_performance && !(t.performance_threshold > 0.0) {
        return Err(invalid_test(&t.name, "performance_threshold must be positive"));
    }
    if t.check_performance && t.runs_to_average == 0 {
        return Err(invalid_test(&t.name, "runs_to_average must be at least 1"));
    }

    let parallel = Parallelism {
        mpi_procs: if t.use_mpi {
            Some(positive_count(&t.name, "numprocs", t.numprocs)?)
        } else {
            None
        },
        omp_threads: if t.use_omp {
            Some(positive_count(&t.name, "numthreads", t.numthreads)?)
        } else {
            None
        },
    };

    let compile_flags = CompileFlags::parse(&t.add_to_compile_string)
        .map_err(|e| invalid_test(&t.name, format!("add_to_compile_string: {e}")))?;

    let particle_types = if t.compare_particles {
        let types = t
            .particle_types
            .split_whitespace()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if types.is_empty() {
            return Err(invalid_test(&t.name, "compare_particles needs particle_types"));
        }
        types
    } else {
        vec![]
    };

    let non_empty = |s: &Option<String>| s.clone().filter(|x| !x.trim().is_empty());

    Ok(TestSpec {
        name: t.name.clone(),
        kind,
        dim: t.dim,
        build_dir: t.build_dir.clone(),
        extra_build_repo: t.extra_build_dir.clone(),
        target: t.target.clone(),
        input_file: t.input_file.clone(),
        probin_file: t.probin_file.clone(),
        aux_files: t.aux_files.clone(),
        link_files: t.link_files.clone(),
        restart,
        parallel,
        debug: t.debug,
        acc: t.acc,
        compile_flags,
        ignore_global_make_additions: t.ignore_global_make_additions,
        runtime_params: t.runtime_params.clone(),
        custom_run_command: non_empty(&t.custom_run_cmd),
        comparison: ComparisonSpec {
            enabled: t.do_comparison,
            tolerance: t.tolerance,
            abs_tolerance: t.abs_tolerance,
            particle_tolerance: t.particle_tolerance,
            particle_types,
            compare_file: non_empty(&t.compare_file),
            output_file: non_empty(&t.output_file),
            diff_dir: t.diff_dir.clone().filter(|d| !d.as_os_str().is_empty()),
            diff_opts: t.diff_opts.clone(),
        },
        vis_var: if t.do_vis {
            Some(t.vis_var.clone())
        } else {
            None
        },
        analysis: t.analysis_routine.as_ref().map(|routine| AnalysisSpec {
            routine: routine.clone(),
            args: t.analysis_main_args.clone(),
            output_image: t.analysis_output_image.clone(),
        }),
        performance: PerformanceSpec {
            check: t.check_performance,
            threshold: t.performance_threshold,
            runs_to_average: t.runs_to_average,
        },
        ignore_return_code: t.ignore_return_code,
        keywords: t.keywords.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HEADER: &str = r#"
main:
  suite_name: Castro
  test_top_dir: /tmp/regtest
repos:
  - name: AMReX
    dir: /src/amrex
  - name: source
    dir: /src/Castro
    build: true
    comp_string: CASTRO_HOME=@self@ AMREX_HOME=@source@/../amrex
"#;

    fn parse(tests: &str) -> Result<SuiteConfig, ConfigError> {
        SuiteConfig::from_yaml_str(&format!("{HEADER}tests:\n{tests}"))
    }

    #[test]
    fn parses_a_standard_test_with_defaults() {
        let suite = parse(
            r#"
  - name: Sod-x
    build_dir: Exec/hydro_tests/Sod
    input_file: inputs-sod-x
    dim: 1
    tolerance: 1.0e-10
"#,
        )
        .unwrap();

        assert_eq!(suite.main.suite_name, "Castro");
        assert_eq!(suite.main.plot_file_name, "amr.plot_file");
        let t = &suite.tests[0];
        assert_eq!(t.kind, TestKind::Standard);
        assert_eq!(t.comparison.tolerance, Some(1e-10));
        assert!(t.comparison.enabled);
        assert_eq!(t.performance, PerformanceSpec::default());
        assert!(t.ignore_return_code);
        assert_eq!(
            suite.build_dir_for(t),
            PathBuf::from("/src/Castro/Exec/hydro_tests/Sod")
        );
    }

    #[test]
    fn substitutes_repository_placeholders() {
        let suite = SuiteConfig::from_yaml_str(&format!("{HEADER}tests: []\n")).unwrap();
        let source = suite.source_repo();
        assert_eq!(source.comp_flags.get("CASTRO_HOME"), Some("/src/Castro"));
        assert_eq!(
            source.comp_flags.get("AMREX_HOME"),
            Some("/src/Castro/../amrex")
        );
    }

    #[test]
    fn kinds_are_mutually_exclusive() {
        let err = parse(
            r#"
  - name: both
    dim: 2
    compile_test: true
    self_test: true
    st_success_string: ok
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTest { .. }));
    }

    #[test]
    fn restart_requires_a_standard_test() {
        let err = parse(
            r#"
  - name: script-restart
    dim: 2
    run_as_script: run.sh
    restart_test: true
    restart_file_num: 10
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("restart tests cannot be"));

        let ok = parse(
            r#"
  - name: restart
    dim: 2
    restart_test: true
    restart_file_num: 10
"#,
        )
        .unwrap();
        assert_eq!(ok.tests[0].restart, Some(10));
    }

    #[test]
    fn self_tests_need_a_marker() {
        assert!(parse(
            r#"
  - name: st
    dim: 3
    self_test: true
"#
        )
        .is_err());

        let suite = parse(
            r#"
  - name: st
    dim: 3
    self_test: true
    st_success_string: "Integration test passed"
"#,
        )
        .unwrap();
        assert_eq!(
            suite.tests[0].kind,
            TestKind::SelfTest {
                success_marker: "Integration test passed".into()
            }
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = parse(
            r#"
  - name: a
    dim: 1
  - name: a
    dim: 2
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTest(n) if n == "a"));
    }

    #[test]
    fn mpi_needs_processes() {
        assert!(parse(
            r#"
  - name: mpi
    dim: 3
    use_mpi: true
"#
        )
        .is_err());
        let suite = parse(
            r#"
  - name: mpi
    dim: 3
    use_mpi: true
    numprocs: 4
    use_omp: true
    numthreads: 2
"#,
        )
        .unwrap();
        assert_eq!(
            suite.tests[0].parallel,
            Parallelism {
                mpi_procs: Some(4),
                omp_threads: Some(2)
            }
        );
    }

    #[test]
    fn negative_tolerances_are_rejected() {
        assert!(parse(
            r#"
  - name: neg
    dim: 1
    tolerance: -1.0
"#
        )
        .is_err());
    }

    #[test]
    fn test_order_is_preserved() {
        let suite = parse(
            r#"
  - name: zeta
    dim: 1
  - name: alpha
    dim: 1
"#,
        )
        .unwrap();
        let names = suite.tests.iter().map(|t| t.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn amrex_repository_is_required() {
        let err = SuiteConfig::from_yaml_str(
            r#"
main:
  test_top_dir: /tmp
  source_tree: AMReX
repos: []
tests: []
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("AMReX"));
    }
}
