//! Parsing of comparison tool reports.
//!
//! `fcompare` prints a table of the form:
//!
//! ```text
//!             variable name            absolute error            relative error
//!                                         (||A - B||)         (||A - B||/||A||)
//!  ----------------------------------------------------------------------------
//!  level = 0
//!  density                                 1.2e-12                   2.0e-10
//!  Temp                                 NaN present
//! ```
//!
//! Columns are separated by runs of at least two spaces, which is what lets variable names contain single spaces.
//! Anything after a line starting with `diff ` is the output of a plain text diff and is not part of the table.
use crate::compare::{StructuralError, VariableError};

#[derive(Clone, Debug, PartialEq)]
pub struct ErrorRow {
    pub level: Option<u32>,
    pub variable: String,
    pub error: VariableError,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedReport {
    pub rows: Vec<ErrorRow>,
    pub structural_errors: Vec<StructuralError>,
    pub nan_variables: Vec<String>,
    pub missing_variables: Vec<String>,
}

fn fields(line: &str) -> Vec<&str> {
    line.split("  ")
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect()
}

fn parse_level(line: &str) -> Option<u32> {
    let rest = line.trim().strip_prefix("level")?;
    rest.trim_start_matches([' ', '=']).trim().parse().ok()
}

pub fn parse_report(text: &str) -> ParsedReport {
    let mut ret = ParsedReport::default();
    let mut level = None;

    for line in text.lines() {
        for s in StructuralError::ALL {
            // NaN is reported per variable below.
            if s.is_nan_present() {
                continue;
            }
            if line.contains(s.marker()) && !ret.structural_errors.contains(&s) {
                ret.structural_errors.push(s);
            }
        }

        let trimmed = line.trim();
        if trimmed.starts_with("diff ") {
            break;
        }
        if trimmed.starts_with("level ") || trimmed.starts_with("level=") {
            level = parse_level(trimmed);
            continue;
        }
        if trimmed.starts_with("-----") || trimmed.starts_with("<<<") {
            continue;
        }

        let f = fields(line);
        match f.as_slice() {
            [name, what] if what.contains("NaN present") => ret.nan_variables.push(name.to_string()),
            [name, what] if what.contains("variable not present") => {
                ret.missing_variables.push(name.to_string())
            }
            [name, abs, rel, ..] if !name.starts_with("variable") => {
                let (Ok(absolute), Ok(relative)) = (abs.parse::<f64>(), rel.parse::<f64>()) else {
                    continue;
                };
                ret.rows.push(ErrorRow {
                    level,
                    variable: name.to_string(),
                    error: VariableError::new(absolute, relative),
                });
            }
            _ => {}
        }
    }

    if text.contains("NaN present") && ret.nan_variables.is_empty() {
        ret.structural_errors.push(StructuralError::NanPresent);
    }

    ret
}
