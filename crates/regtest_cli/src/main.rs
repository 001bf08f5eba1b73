//! The `regtest` command.
//!
//! `regtest run suite.yaml` runs a suite and exits with the number of failed tests, capped at 255, so that cron jobs
//! and CI can tell a clean run from a dirty one without reading the report.  The other subcommands look at a suite
//! without running it, or at the results of earlier runs.
mod cli_args;
mod commands;
mod log_handler;

fn main() -> anyhow::Result<()> {
    use clap::Parser;

    let args = cli_args::CliArgs::parse();
    log_handler::install_log_handler(args.verbose, args.log_file.as_deref())?;

    let failed = commands::dispatch_command(&args)?;
    std::process::exit(failed.min(255) as i32);
}
