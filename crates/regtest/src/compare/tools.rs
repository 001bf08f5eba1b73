//! Running the external comparison tools.
//!
//! Every invocation appends to the test's comparison log with the command line at the top of its section, so the log
//! reads as a transcript of what was compared and how.
use std::path::{Path, PathBuf};

use crate::compare::{judge, parse_report, ComparisonResult, Tolerances};
use crate::process::{quote_path, Capture, CommandError, CommandSpec};

/// Locations of the comparison executables for a suite.
#[derive(Clone, Debug)]
pub struct ComparisonTools {
    pub fcompare: PathBuf,
    pub fboxinfo: Option<PathBuf>,
    pub fsnapshot: Option<PathBuf>,
    pub particle_compare: Option<PathBuf>,
}

fn tol_arg(tol: Option<f64>, flag: &str) -> String {
    match tol {
        Some(t) => format!(" {flag} {t:e}"),
        None => String::new(),
    }
}

impl ComparisonTools {
    pub fn new(fcompare: impl Into<PathBuf>) -> Self {
        ComparisonTools {
            fcompare: fcompare.into(),
            fboxinfo: None,
            fsnapshot: None,
            particle_compare: None,
        }
    }

    /// Numerically compare two plotfiles.
    pub fn compare_plotfiles(
        &self,
        benchmark: &Path,
        candidate: &Path,
        tolerances: &Tolerances,
        cwd: &Path,
        log: &Path,
    ) -> Result<ComparisonResult, CommandError> {
        let command = format!(
            "{} --abort_if_not_all_found -n 0{}{} {} {}",
            quote_path(&self.fcompare),
            tol_arg(tolerances.relative, "-r"),
            tol_arg(tolerances.absolute, "-a"),
            quote_path(benchmark),
            quote_path(candidate),
        );
        let outcome = CommandSpec::new(command, cwd)
            .stdout_to(Capture::Append(log.to_path_buf()))
            .record_command(true)
            .run()?;

        let report = parse_report(&format!("{}\n{}", outcome.stdout, outcome.stderr));
        let result = judge(&report, tolerances, outcome.success());
        log::debug!(
            "fcompare exited with {} and the comparison {}",
            outcome.code(),
            if result.success { "passed" } else { "failed" }
        );
        Ok(result)
    }

    /// Compare one particle species between two plotfiles.
    pub fn compare_particles(
        &self,
        benchmark: &Path,
        candidate: &Path,
        particle_type: &str,
        tolerance: Option<f64>,
        cwd: &Path,
        log: &Path,
    ) -> Result<ComparisonResult, CommandError> {
        let Some(tool) = &self.particle_compare else {
            log::warn!("No particle comparison tool is configured, particle comparison fails");
            return Ok(ComparisonResult::failed());
        };

        let command = format!(
            "{}{} {} {} {}",
            quote_path(tool),
            tol_arg(tolerance, "-r"),
            quote_path(benchmark),
            quote_path(candidate),
            particle_type,
        );
        let outcome = CommandSpec::new(command, cwd)
            .stdout_to(Capture::Append(log.to_path_buf()))
            .record_command(true)
            .run()?;

        // The exit code is the verdict, but structural problems are still worth surfacing.
        let report = parse_report(&format!("{}\n{}", outcome.stdout, outcome.stderr));
        let mut result = ComparisonResult {
            success: outcome.success(),
            structural_errors: report.structural_errors,
            ..Default::default()
        };
        if result.has_structural_errors() {
            result.success = false;
        }
        Ok(result)
    }

    /// Recursively diff two directories.  Passes iff diff exits with 0.
    pub fn diff_dirs(
        &self,
        benchmark: &Path,
        candidate: &Path,
        options: &str,
        cwd: &Path,
        log: &Path,
    ) -> Result<ComparisonResult, CommandError> {
        let opts = if options.trim().is_empty() {
            String::new()
        } else {
            format!(" {}", options.trim())
        };
        let command = format!(
            "diff{opts} -r {} {}",
            quote_path(benchmark),
            quote_path(candidate)
        );
        let outcome = CommandSpec::new(command, cwd)
            .stdout_to(Capture::Append(log.to_path_buf()))
            .record_command(true)
            .run()?;

        if outcome.success() {
            append_line(log, "\ndiff was SUCCESSFUL");
            Ok(ComparisonResult::passed())
        } else {
            Ok(ComparisonResult::failed())
        }
    }

    /// Diff two text files.  Passes iff diff prints nothing.
    pub fn diff_files(
        &self,
        benchmark: &Path,
        candidate: &Path,
        cwd: &Path,
        log: &Path,
    ) -> Result<ComparisonResult, CommandError> {
        let command = format!("diff {} {}", quote_path(benchmark), quote_path(candidate));
        let outcome = CommandSpec::new(command, cwd)
            .stdout_to(Capture::Append(log.to_path_buf()))
            .record_command(true)
            .run()?;

        if outcome.stdout.trim().is_empty() && outcome.code() < 2 {
            Ok(ComparisonResult::passed())
        } else {
            Ok(ComparisonResult::failed())
        }
    }

    /// Number of refinement levels in a plotfile, if `fboxinfo` is available and cooperates.
    pub fn levels(&self, plotfile: &Path, cwd: &Path) -> Option<u32> {
        let tool = self.fboxinfo.as_ref()?;
        let command = format!("{} -l {}", quote_path(tool), quote_path(plotfile));
        match CommandSpec::new(command, cwd).run() {
            Ok(o) if o.success() => parse_levels(&o.stdout),
            Ok(o) => {
                log::warn!("fboxinfo exited with {}", o.code());
                None
            }
            Err(e) => {
                log::warn!("{e}");
                None
            }
        }
    }
}

/// `fboxinfo -l` prints a line like ` levels = 3`.  Take the last number.
fn parse_levels(text: &str) -> Option<u32> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .last()?
        .parse()
        .ok()
}

fn append_line(path: &Path, line: &str) {
    use std::io::Write;

    let res = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut f| writeln!(f, "{line}"));
    if let Err(e) = res {
        log::warn!("Unable to append to {}: {e}", path.display());
    }
}
