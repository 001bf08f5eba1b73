//! Definition of the Clap command line.
//!
//! This is big; we opt to pull it out.
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "regtest", about = "Regression testing for AMReX codes")]
pub struct CliArgs {
    #[clap(subcommand)]
    pub command: Command,

    /// More output.  May be repeated.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also write the log to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a suite.
    Run(RunArgs),

    /// List the tests a run would cover.
    List(ListArgs),

    /// Take the output of the last run's failures as the new benchmarks, without running anything.
    CopyBenchmarks(CopyBenchmarksArgs),

    /// Show how tests did over earlier runs.
    History(HistoryArgs),

    /// Show the report of a run, rebuilding it from the status files if asked.
    ViewStatus(ViewStatusArgs),
}

#[derive(Debug, Parser)]
pub struct SuiteArgs {
    /// The suite file.
    pub suite_file: PathBuf,
}

#[derive(Debug, Parser)]
pub struct FilterArgs {
    /// Run only this test.
    #[arg(long)]
    pub single_test: Option<String>,

    /// Run only these tests, in this order.  Comma separated.
    #[arg(long, value_delimiter = ',')]
    pub tests: Vec<String>,

    /// Run only tests of this dimensionality.
    #[arg(short = 'd', long)]
    pub dim: Option<u8>,

    /// Run only tests with this keyword.
    #[arg(long)]
    pub keyword: Option<String>,

    /// If specified, filter tests with this glob pattern.
    #[arg(long)]
    pub pattern: Option<String>,

    /// Run only the tests that failed in the last run.
    #[arg(long)]
    pub redo_failed: bool,
}

#[derive(Debug, Parser)]
pub struct ToleranceArgs {
    /// Relative tolerance for every test, replacing the suite file's.
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Absolute tolerance for every test, replacing the suite file's.
    #[arg(long)]
    pub abs_tolerance: Option<f64>,

    /// Particle tolerance for every test, replacing the suite file's.
    #[arg(long)]
    pub particle_tolerance: Option<f64>,
}

#[derive(Debug, Parser)]
pub struct RepoArgs {
    /// Repositories not to update: None, All, or a comma separated list of names.
    #[arg(long, default_value = "None", value_delimiter = ',')]
    pub no_update: Vec<String>,

    #[arg(long)]
    pub source_branch: Option<String>,

    #[arg(long)]
    pub source_hash: Option<String>,

    /// Test this pull request of the source repository.
    #[arg(long)]
    pub source_pr: Option<u32>,

    /// Test this pull request of AMReX.
    #[arg(long)]
    pub amrex_pr: Option<u32>,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    #[command(flatten)]
    pub suite: SuiteArgs,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub tolerances: ToleranceArgs,

    #[command(flatten)]
    pub repos: RepoArgs,

    /// Store the output as the new benchmarks instead of comparing.  The comment says why.
    #[arg(long, value_name = "COMMENT")]
    pub make_benchmarks: Option<String>,

    /// Only build the tests.
    #[arg(long)]
    pub compile_only: bool,

    /// Run the tests but don't compare their output.
    #[arg(long)]
    pub skip_comparison: bool,

    /// Check every test's run time against its history.
    #[arg(long)]
    pub check_performance: bool,

    /// A run counts as slow at this multiple of the average.
    #[arg(long, default_value_t = 1.2, requires = "check_performance")]
    pub performance_threshold: f64,

    /// How many earlier runs to average.
    #[arg(long, default_value_t = 5, requires = "check_performance")]
    pub runs_to_average: usize,

    /// Run every test under valgrind, with these options.
    #[arg(long, num_args = 0..=1, default_missing_value = "", value_name = "OPTIONS")]
    pub valgrind: Option<String>,

    /// A scratch run: output goes to a temporary directory which is wiped first, and no history is kept.
    #[arg(long)]
    pub temp: bool,

    /// A note to show at the top of the report.
    #[arg(long)]
    pub note: Option<String>,
}

/// List all tests, optionally constrained by a filter.
#[derive(Debug, Parser)]
pub struct ListArgs {
    #[command(flatten)]
    pub suite: SuiteArgs,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Debug, Parser)]
pub struct CopyBenchmarksArgs {
    #[command(flatten)]
    pub suite: SuiteArgs,

    /// Why the benchmarks changed.
    pub comment: String,

    /// Copy only these of the failed tests.  Comma separated.
    #[arg(long, value_delimiter = ',')]
    pub tests: Vec<String>,

    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Debug, Parser)]
pub struct HistoryArgs {
    #[command(flatten)]
    pub suite: SuiteArgs,

    /// Show at most this many runs, newest first.
    #[arg(long, default_value_t = 10)]
    pub runs: usize,
}

#[derive(Debug, Parser)]
pub struct ViewStatusArgs {
    #[command(flatten)]
    pub suite: SuiteArgs,

    /// The run to show.  The latest if not given.
    pub run_id: Option<String>,

    /// Rebuild the summary from the status files, for runs which died before writing one.
    #[arg(long)]
    pub rebuild: bool,
}
