use anyhow::Context;
use regtest::config::PerformanceSpec;
use regtest::lifecycle::RunSettings;
use regtest::model::{RunMode, SuiteOverrides};
use regtest::{RunOptions, Suite};

use crate::cli_args::{CliArgs, RunArgs};

fn overrides(args: &RunArgs) -> SuiteOverrides {
    SuiteOverrides {
        compile_only: args.compile_only,
        skip_comparison: args.skip_comparison,
        tolerance: args.tolerances.tolerance,
        abs_tolerance: args.tolerances.abs_tolerance,
        particle_tolerance: args.tolerances.particle_tolerance,
        performance: args.check_performance.then(|| PerformanceSpec {
            check: true,
            threshold: args.performance_threshold,
            runs_to_average: args.runs_to_average,
        }),
    }
}

fn run_options(args: &RunArgs) -> RunOptions {
    let mode = match &args.make_benchmarks {
        Some(comment) => RunMode::MakeBenchmarks {
            comment: comment.clone(),
        },
        None => RunMode::Normal,
    };

    RunOptions {
        settings: RunSettings {
            overrides: overrides(args),
            mode,
            temporary: args.temp,
            valgrind: args.valgrind.clone(),
        },
        selection: super::selection(&args.filter),
        note: args.note.clone(),
        no_update: args.repos.no_update.clone(),
        source_branch: args.repos.source_branch.clone(),
        source_hash: args.repos.source_hash.clone(),
        source_pr: args.repos.source_pr,
        amrex_pr: args.repos.amrex_pr,
        date: None,
    }
}

pub fn run(_top_args: &CliArgs, run_args: &RunArgs) -> anyhow::Result<usize> {
    let config = super::load_suite(&run_args.suite)?;
    let outcome = Suite::new(config, run_options(run_args))
        .run()
        .context("Running the suite")?;
    Ok(outcome.num_failed())
}
