//! A log handler which writes to stderr at the requested verbosity, and everything down to debug into a log file if
//! one was asked for.
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use anyhow::Context;
use log::Level;

// Times are relative to the start of the run, which is when the log handler is installed.
lazy_static::lazy_static! {
    static ref EPOCH: Instant = Instant::now();
}

struct LogHandlerState {
    file: Option<File>,
}

struct LogHandler {
    console: Level,
    file_level: Level,
    state: Mutex<LogHandlerState>,
}

fn console_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::Info,
        1 => Level::Debug,
        _ => Level::Trace,
    }
}

pub fn install_log_handler(verbose: u8, log_file: Option<&Path>) -> anyhow::Result<()> {
    let file = log_file
        .map(|p| File::create(p).with_context(|| format!("Unable to open log file {}", p.display())))
        .transpose()?;

    let console = console_level(verbose);
    let file_level = console.max(Level::Debug);
    let max = if file.is_some() { file_level } else { console };

    let handler = LogHandler {
        console,
        file_level,
        state: Mutex::new(LogHandlerState { file }),
    };

    lazy_static::initialize(&EPOCH);
    log::set_max_level(max.to_level_filter());
    log::set_boxed_logger(Box::new(handler)).context("Unable to install logger")?;
    log::debug!("Logger installed");
    Ok(())
}

impl log::Log for LogHandler {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.console || metadata.level() <= self.file_level
    }

    fn flush(&self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(f) = state.file.as_mut() {
                let _ = f.flush();
            }
        }
    }

    fn log(&self, record: &log::Record) {
        let since_epoch = Instant::now() - *EPOCH;
        let since_epoch = chrono::TimeDelta::from_std(since_epoch).unwrap_or(chrono::TimeDelta::zero());

        let message = format!(
            "{since_epoch}: {}: {} (at target {} line {})",
            record.level(),
            record.args(),
            record.target(),
            record.line().unwrap_or(0)
        );

        if record.level() <= self.console {
            eprintln!("{message}");
        }

        if record.level() > self.file_level {
            return;
        }
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if let Some(f) = state.file.as_mut() {
            // Nowhere to report a failure to log.
            let _ = writeln!(f, "{message}");
        }
    }
}
