use anyhow::Context;
use regtest::report::RunHistory;

use crate::cli_args::{CliArgs, ListArgs};

pub fn list(_top_args: &CliArgs, list_args: &ListArgs) -> anyhow::Result<usize> {
    let config = super::load_suite(&list_args.suite)?;
    let selection = super::selection(&list_args.filter);

    let previous_failures = match (&config.main.web_top_dir, selection.needs_previous_failures()) {
        (Some(web_root), true) => {
            let history = RunHistory::scan(web_root)
                .with_context(|| format!("Reading earlier runs in {}", web_root.display()))?;
            Some(
                history
                    .last_run()
                    .map(|r| history.failed_tests(r))
                    .unwrap_or_default(),
            )
        }
        (None, true) => Some(vec![]),
        (_, false) => None,
    };

    for t in selection.apply(&config, previous_failures.as_deref())? {
        println!("{} ({}d, {:?})", t.name, t.dim, t.kind);
    }
    Ok(0)
}
