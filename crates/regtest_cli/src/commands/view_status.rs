use anyhow::Context;
use regtest::report::{RunHistory, RunSummary, SUMMARY_FILE};
use regtest::reporter::report_run;

use crate::cli_args::{CliArgs, ViewStatusArgs};

pub fn view_status(_top_args: &CliArgs, args: &ViewStatusArgs) -> anyhow::Result<usize> {
    let config = super::load_suite(&args.suite)?;
    let Some(web_root) = config.main.web_top_dir.as_deref() else {
        anyhow::bail!("{} has no web directory", args.suite.suite_file.display());
    };

    let run_id = match &args.run_id {
        Some(r) => r.clone(),
        None => RunHistory::scan(web_root)
            .with_context(|| format!("Reading earlier runs in {}", web_root.display()))?
            .last_run()
            .map(str::to_string)
            .context("There are no runs to show")?,
    };

    let summary = if args.rebuild {
        regtest::suite::rebuild_report(&config, &run_id)?
    } else {
        let path = web_root.join(&run_id).join(SUMMARY_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<RunSummary>(&text)
                .with_context(|| format!("Parsing {}", path.display()))?,
            Err(_) => {
                log::info!("{run_id} has no summary; rebuilding it from status files");
                RunSummary::rebuild(&config.main.suite_name, &run_id, &web_root.join(&run_id))
                    .with_context(|| format!("Reading the status files of {run_id}"))?
            }
        }
    };

    println!("{}", report_run(&summary));
    Ok(0)
}
