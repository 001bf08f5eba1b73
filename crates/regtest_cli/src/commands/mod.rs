mod copy_benchmarks;
mod history;
mod list;
mod run;
mod view_status;

use anyhow::Context;
use regtest::selection::Selection;
use regtest::SuiteConfig;

use crate::cli_args::{self, FilterArgs, SuiteArgs};

/// Figure out what command to run, then run it.
///
/// Returns what the process should exit with before capping: the number of failed tests for commands that run
/// anything, and zero otherwise.
pub fn dispatch_command(args: &cli_args::CliArgs) -> anyhow::Result<usize> {
    match &args.command {
        cli_args::Command::Run(r) => run::run(args, r),
        cli_args::Command::List(l) => list::list(args, l),
        cli_args::Command::CopyBenchmarks(c) => copy_benchmarks::copy_benchmarks(args, c),
        cli_args::Command::History(h) => history::history(args, h),
        cli_args::Command::ViewStatus(v) => view_status::view_status(args, v),
    }
}

fn load_suite(args: &SuiteArgs) -> anyhow::Result<SuiteConfig> {
    SuiteConfig::load(&args.suite_file)
        .with_context(|| format!("Loading suite {}", args.suite_file.display()))
}

fn selection(filter: &FilterArgs) -> Selection {
    Selection {
        single_test: filter.single_test.clone(),
        tests: filter.tests.clone(),
        dim: filter.dim,
        keyword: filter.keyword.clone(),
        pattern: filter.pattern.clone(),
        redo_failed: filter.redo_failed,
    }
}
