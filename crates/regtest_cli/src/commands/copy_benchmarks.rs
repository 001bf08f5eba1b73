use anyhow::Context;
use regtest::lifecycle::RunSettings;
use regtest::model::RunMode;
use regtest::selection::Selection;
use regtest::{RunOptions, Suite};

use crate::cli_args::{CliArgs, CopyBenchmarksArgs};

pub fn copy_benchmarks(_top_args: &CliArgs, args: &CopyBenchmarksArgs) -> anyhow::Result<usize> {
    let config = super::load_suite(&args.suite)?;
    let options = RunOptions {
        settings: RunSettings {
            mode: RunMode::CopyBenchmarks {
                comment: args.comment.clone(),
            },
            ..Default::default()
        },
        selection: Selection {
            tests: args.tests.clone(),
            ..Default::default()
        },
        note: args.note.clone(),
        ..Default::default()
    };

    let outcome = Suite::new(config, options)
        .run()
        .context("Copying benchmarks")?;
    Ok(outcome.num_failed())
}
