//! Comparison of test output against benchmarks.
//!
//! The numbers come from external tools: `fcompare` for plotfiles, `particle_compare` for particle data, and plain
//! `diff` for everything else.  [tools] runs them and [parse] turns their reports into a [ComparisonResult].  The
//! verdict itself is [judge], which is pure and is where tolerances are applied.
//!
//! Tolerances which are not configured mean "whatever the tool does by default", never "anything goes".  In that
//! case the tool's exit code is the verdict.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod parse;
pub mod tools;

pub use parse::{parse_report, ErrorRow, ParsedReport};
pub use tools::ComparisonTools;

/// Relative errors above this are called out in reports.  Purely cosmetic.
pub const HIGHLIGHT_THRESHOLD: f64 = 1e-6;

/// Something about the shape of the output which prevents a numeric comparison.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::IsVariant,
)]
#[serde(rename_all = "snake_case")]
pub enum StructuralError {
    #[display(fmt = "number of boxes do not match")]
    BoxCountMismatch,
    #[display(fmt = "grids do not match")]
    GridMismatch,
    #[display(fmt = "number of variables do not match")]
    VariableCountMismatch,
    #[display(fmt = "no corresponding benchmark found")]
    NoBenchmark,
    #[display(fmt = "Particle data headers do not agree")]
    ParticleHeaderMismatch,
    #[display(fmt = "NaN present")]
    NanPresent,
}

impl StructuralError {
    pub const ALL: [StructuralError; 6] = [
        StructuralError::BoxCountMismatch,
        StructuralError::GridMismatch,
        StructuralError::VariableCountMismatch,
        StructuralError::NoBenchmark,
        StructuralError::ParticleHeaderMismatch,
        StructuralError::NanPresent,
    ];

    /// The text the tools print when they hit this error.
    pub fn marker(&self) -> &'static str {
        match self {
            StructuralError::BoxCountMismatch => "number of boxes do not match",
            StructuralError::GridMismatch => "grids do not match",
            StructuralError::VariableCountMismatch => "number of variables do not match",
            StructuralError::NoBenchmark => "no corresponding benchmark found",
            StructuralError::ParticleHeaderMismatch => "Particle data headers do not agree",
            StructuralError::NanPresent => "NaN present",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableError {
    pub absolute: f64,
    pub relative: f64,
}

impl VariableError {
    pub fn new(absolute: f64, relative: f64) -> Self {
        VariableError { absolute, relative }
    }

    pub fn needs_highlight(&self) -> bool {
        self.relative.abs() > HIGHLIGHT_THRESHOLD
    }

    pub fn is_zero(&self) -> bool {
        self.absolute == 0.0 && self.relative == 0.0
    }

    pub fn is_nan(&self) -> bool {
        self.absolute.is_nan() || self.relative.is_nan()
    }

    /// Elementwise maximum, used to fold levels together.  A NaN on any level wins.
    fn max(self, other: VariableError) -> VariableError {
        VariableError {
            absolute: nan_max(self.absolute, other.absolute),
            relative: nan_max(self.relative, other.relative),
        }
    }
}

fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Tolerances {
    pub relative: Option<f64>,
    pub absolute: Option<f64>,
}

impl Tolerances {
    pub fn is_unset(&self) -> bool {
        self.relative.is_none() && self.absolute.is_none()
    }

    /// Does a variable with this error pass?
    ///
    /// Only meaningful when at least one tolerance is set.
    pub fn accepts(&self, err: &VariableError) -> bool {
        if err.is_zero() {
            return true;
        }

        let rel_ok = self.relative.is_some_and(|t| err.relative.abs() < t);
        let abs_ok = self.absolute.is_some_and(|t| err.absolute.abs() <= t);
        rel_ok || abs_ok
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub success: bool,

    /// Per variable, the worst error over all levels.
    pub per_variable_errors: BTreeMap<String, VariableError>,
    pub structural_errors: Vec<StructuralError>,

    /// Variables present in only one of the two files.
    pub missing_variables: Vec<String>,
}

impl ComparisonResult {
    pub fn passed() -> Self {
        ComparisonResult {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed() -> Self {
        ComparisonResult::default()
    }

    pub fn no_benchmark() -> Self {
        ComparisonResult {
            success: false,
            structural_errors: vec![StructuralError::NoBenchmark],
            ..Default::default()
        }
    }

    /// Fold another comparison of the same test into this one.  Both must succeed.
    pub fn and(mut self, other: ComparisonResult) -> ComparisonResult {
        self.success = self.success && other.success;
        for (name, err) in other.per_variable_errors {
            let slot = self.per_variable_errors.entry(name).or_default();
            *slot = slot.max(err);
        }
        for s in other.structural_errors {
            if !self.structural_errors.contains(&s) {
                self.structural_errors.push(s);
            }
        }
        self.missing_variables.extend(other.missing_variables);
        self
    }

    pub fn has_structural_errors(&self) -> bool {
        !self.structural_errors.is_empty()
    }

    /// Variables whose relative error is large enough to call out.
    pub fn highlighted(&self) -> impl Iterator<Item = (&str, &VariableError)> {
        self.per_variable_errors
            .iter()
            .filter(|(_, e)| e.needs_highlight())
            .map(|(n, e)| (n.as_str(), e))
    }
}

/// Decide a comparison from a parsed tool report.
///
/// `tool_succeeded` is the tool's exit status.  It decides the verdict when no tolerance is configured, and a tool
/// which failed without producing any rows is a failure regardless.
pub fn judge(report: &ParsedReport, tolerances: &Tolerances, tool_succeeded: bool) -> ComparisonResult {
    let mut per_variable_errors: BTreeMap<String, VariableError> = BTreeMap::new();
    for row in report.rows.iter() {
        per_variable_errors
            .entry(row.variable.clone())
            .and_modify(|e| *e = e.max(row.error))
            .or_insert(row.error);
    }

    let mut structural_errors = report.structural_errors.clone();
    let nan_row = report.rows.iter().any(|r| r.error.is_nan());
    let has_nan = nan_row || !report.nan_variables.is_empty();
    if has_nan && !structural_errors.contains(&StructuralError::NanPresent) {
        structural_errors.push(StructuralError::NanPresent);
    }

    let success = if !structural_errors.is_empty() || !report.missing_variables.is_empty() {
        false
    } else if tolerances.is_unset() || (report.rows.is_empty() && !tool_succeeded) {
        tool_succeeded
    } else {
        per_variable_errors.values().all(|e| tolerances.accepts(e))
    };

    ComparisonResult {
        success,
        per_variable_errors,
        structural_errors,
        missing_variables: report.missing_variables.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn report_with(variable: &str, abs: f64, rel: f64) -> ParsedReport {
        ParsedReport {
            rows: vec![ErrorRow {
                level: Some(0),
                variable: variable.to_string(),
                error: VariableError::new(abs, rel),
            }],
            ..Default::default()
        }
    }

    fn rel(t: f64) -> Tolerances {
        Tolerances {
            relative: Some(t),
            absolute: None,
        }
    }

    #[test]
    fn sod_density_just_above_tolerance_fails() {
        let report = report_with("density", 3.1e-12, 2e-10);
        let result = judge(&report, &rel(1e-10), false);

        assert!(!result.success);
        assert!(result.structural_errors.is_empty());
        assert_eq!(result.per_variable_errors["density"].relative, 2e-10);
    }

    #[test]
    fn absolute_tolerance_rescues_a_variable() {
        let report = report_with("pressure", 1e-14, 0.5);
        let tols = Tolerances {
            relative: Some(1e-10),
            absolute: Some(1e-12),
        };
        assert!(judge(&report, &tols, false).success);
    }

    #[test]
    fn per_variable_error_is_max_over_levels() {
        let report = ParsedReport {
            rows: vec![
                ErrorRow {
                    level: Some(0),
                    variable: "density".into(),
                    error: VariableError::new(1.0, 1e-12),
                },
                ErrorRow {
                    level: Some(1),
                    variable: "density".into(),
                    error: VariableError::new(0.5, 1e-8),
                },
            ],
            ..Default::default()
        };
        let result = judge(&report, &rel(1e-9), true);
        assert_eq!(
            result.per_variable_errors["density"],
            VariableError::new(1.0, 1e-8)
        );
        assert!(!result.success);
    }

    #[test]
    fn structural_errors_fail_regardless_of_exit_code() {
        let report = ParsedReport {
            structural_errors: vec![StructuralError::GridMismatch],
            ..Default::default()
        };
        let result = judge(&report, &Tolerances::default(), true);
        assert!(!result.success);
        assert!(result.has_structural_errors());
    }

    #[test]
    fn nan_forces_failure() {
        let report = ParsedReport {
            nan_variables: vec!["Temp".into()],
            ..Default::default()
        };
        let result = judge(&report, &rel(1.0), true);
        assert!(!result.success);
        assert_eq!(result.structural_errors, vec![StructuralError::NanPresent]);
    }

    #[test]
    fn nan_on_one_level_is_not_hidden_by_another() {
        let report = parse_report(" level = 0\n density  NaN  NaN\n level = 1\n density  1.0e-14  1.0e-14\n");
        let result = judge(&report, &rel(1e-10), true);
        assert!(!result.success);
        assert!(result.per_variable_errors["density"].is_nan());
        assert_eq!(result.structural_errors, vec![StructuralError::NanPresent]);
    }

    #[test]
    fn without_tolerances_the_tool_decides() {
        let report = report_with("density", 1.0, 1.0);
        assert!(judge(&report, &Tolerances::default(), true).success);
        assert!(!judge(&report, &Tolerances::default(), false).success);
    }

    #[test]
    fn and_combines_results() {
        let a = ComparisonResult::passed();
        let b = ComparisonResult::no_benchmark();
        let c = a.and(b);
        assert!(!c.success);
        assert_eq!(c.structural_errors, vec![StructuralError::NoBenchmark]);
    }

    #[test]
    fn highlighting() {
        assert!(VariableError::new(0.0, 2e-6).needs_highlight());
        assert!(VariableError::new(0.0, -2e-6).needs_highlight());
        assert!(!VariableError::new(10.0, 1e-6).needs_highlight());
    }

    proptest! {
        #[test]
        fn tolerance_monotonicity(e in 1e-16f64..1.0, t in 1e-16f64..1.0) {
            let report = report_with("density", 1.0, e);
            let result = judge(&report, &rel(t), false);
            prop_assert_eq!(result.success, t > e);
        }

        #[test]
        fn equal_tolerance_fails(e in 1e-16f64..1.0) {
            let report = report_with("density", 1.0, e);
            prop_assert!(!judge(&report, &rel(e), true).success);
        }

        #[test]
        fn identical_output_passes_any_tolerance(t in 0.0f64..1.0) {
            let report = report_with("density", 0.0, 0.0);
            prop_assert!(judge(&report, &rel(t), true).success);
        }
    }
}
