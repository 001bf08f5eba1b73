//! Human-readable reports of tests and runs, for the console.
//!
//! Formatting here is to strings and so cannot fail, but unwrap is annoying so we put that behind a function and unwrap
//! once at the top.  Returned strings have no trailing newline, which lets everything inside use `writeln`.
use std::fmt::{Result, Write};

use indenter::indented;

use crate::compare::ComparisonResult;
use crate::history::PerformanceVerdict;
use crate::model::TestCase;
use crate::report::RunSummary;
use crate::status::TestStatus;

fn strip(dest: String) -> String {
    match dest.strip_suffix('\n') {
        Some(s) => s.to_string(),
        None => dest,
    }
}

/// Report the outcome of one test.
pub fn report_test(test: &TestCase, status: &TestStatus) -> String {
    let mut dest = String::new();
    report_test_fallible(&mut dest, test, status).expect("This is formatting to strings and should never fail");
    strip(dest)
}

fn report_test_fallible(mut dest: &mut dyn Write, test: &TestCase, status: &TestStatus) -> Result {
    writeln!(dest, "{}: {status}", test.name())?;

    if let Some(f) = &test.state.failure {
        writeln!(indented(&mut dest).with_str("  "), "{f}")?;
    }
    if let Some(c) = &test.state.compare_result {
        if !c.success {
            report_comparison(&mut indented(&mut dest).with_str("  "), c)?;
        }
    }
    if let Some(p) = &test.state.performance {
        report_performance(&mut indented(&mut dest).with_str("  "), p)?;
    }
    if !test.state.backtraces.is_empty() {
        let mut ind = indented(&mut dest).with_str("  ");
        writeln!(ind, "Backtraces:")?;
        for b in test.state.backtraces.iter() {
            writeln!(indented(&mut ind).with_str("  "), "{b}")?;
        }
    }
    Ok(())
}

fn report_comparison(mut dest: &mut dyn Write, result: &ComparisonResult) -> Result {
    for s in result.structural_errors.iter() {
        writeln!(dest, "{s}")?;
    }
    for v in result.missing_variables.iter() {
        writeln!(dest, "variable {v} not present")?;
    }

    let highlighted = result.highlighted().collect::<Vec<_>>();
    if !highlighted.is_empty() {
        writeln!(dest, "Variables with differences:")?;
        for (var, err) in highlighted {
            writeln!(
                indented(&mut dest).with_str("  "),
                "{var}: absolute {:e}, relative {:e}",
                err.absolute,
                err.relative
            )?;
        }
    }
    Ok(())
}

fn report_performance(dest: &mut dyn Write, verdict: &PerformanceVerdict) -> Result {
    let direction = if verdict.percentage < 0.0 { "slower" } else { "faster" };
    writeln!(
        dest,
        "{:.1}% {direction} than the average of {} earlier runs{}",
        verdict.percentage.abs(),
        verdict.samples,
        if verdict.meets_threshold {
            ""
        } else {
            " (over threshold)"
        }
    )
}

/// Report a whole run.
pub fn report_run(summary: &RunSummary) -> String {
    let mut dest = String::new();
    report_run_fallible(&mut dest, summary).expect("This is formatting to strings and should never fail");
    strip(dest)
}

fn report_run_fallible(mut dest: &mut dyn Write, summary: &RunSummary) -> Result {
    writeln!(
        dest,
        "{} run {}: {} ({} passed, {} failed)",
        summary.suite_name,
        summary.run_id,
        summary.status,
        summary.num_passed(),
        summary.num_failed
    )?;

    if let Some(note) = &summary.note {
        writeln!(indented(&mut dest).with_str("  "), "Note: {note}")?;
    }
    if let Some(comment) = &summary.benchmark_comment {
        writeln!(indented(&mut dest).with_str("  "), "Benchmarks: {comment}")?;
    }
    for r in summary.repositories.iter() {
        writeln!(
            indented(&mut dest).with_str("  "),
            "{}: {} {}",
            r.name,
            r.branch.as_deref().unwrap_or("-"),
            r.hash.as_deref().unwrap_or("-")
        )?;
    }

    let failed = summary
        .tests
        .iter()
        .filter(|t| t.status.counts_as_failure())
        .collect::<Vec<_>>();
    if !failed.is_empty() {
        writeln!(dest, "Failed tests:")?;
        for t in failed {
            writeln!(indented(&mut dest).with_str("  "), "{}: {}", t.name, t.status)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::{StructuralError, VariableError};
    use crate::config::SuiteConfig;
    use crate::error::{Stage, StageError};
    use pretty_assertions::assert_eq;

    fn case() -> TestCase {
        let yaml = "main:\n  test_top_dir: /tmp\nrepos:\n  - name: AMReX\n    dir: /amrex\n  - name: source\n    dir: /src\ntests:\n  - name: Sod-x\n    dim: 1\n";
        TestCase::new(SuiteConfig::from_yaml_str(yaml).unwrap().tests.remove(0))
    }

    #[test]
    fn passing_tests_are_one_line() {
        assert_eq!(report_test(&case(), &TestStatus::Passed), "Sod-x: PASSED");
    }

    #[test]
    fn failures_are_indented() {
        let mut t = case();
        t.state.failure = Some(StageError::new(Stage::Staging, "link file x does not exist"));
        let mut c = ComparisonResult::failed();
        c.structural_errors.push(StructuralError::NoBenchmark);
        c.per_variable_errors
            .insert("density".into(), VariableError::new(1e-3, 2e-3));
        t.state.compare_result = Some(c);

        let report = report_test(&t, &TestStatus::Failed);
        let lines = report.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "Sod-x: FAILED");
        assert_eq!(lines[1], "  staging failed: link file x does not exist");
        assert!(lines[2].starts_with("  "));
        assert!(report.contains("    density: absolute 1e-3, relative 2e-3"));
        assert!(!report.ends_with('\n'));
    }
}
