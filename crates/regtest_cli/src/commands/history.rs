use anyhow::Context;
use itertools::Itertools;
use regtest::report::RunHistory;

use crate::cli_args::{CliArgs, HistoryArgs};

pub fn history(_top_args: &CliArgs, args: &HistoryArgs) -> anyhow::Result<usize> {
    let config = super::load_suite(&args.suite)?;
    let Some(web_root) = config.main.web_top_dir.as_deref() else {
        anyhow::bail!("{} has no web directory, so no history", args.suite.suite_file.display());
    };
    let history = RunHistory::scan(web_root)
        .with_context(|| format!("Reading earlier runs in {}", web_root.display()))?;

    let runs = history.runs().collect::<Vec<_>>();
    for (run_id, tests) in runs.into_iter().rev().take(args.runs) {
        let failed = tests
            .iter()
            .filter(|(_, s)| s.counts_as_failure())
            .map(|(t, _)| t.as_str())
            .collect::<Vec<_>>();
        println!(
            "{run_id}: {} passed, {} failed",
            tests.len() - failed.len(),
            failed.len()
        );
        if !failed.is_empty() {
            println!("  {}", failed.iter().join(" "));
        }
    }
    Ok(0)
}
