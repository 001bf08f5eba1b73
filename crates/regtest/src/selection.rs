//! Choosing which of the configured tests a run covers.
//!
//! Filters compose: a test runs only if every filter given accepts it.  The order of the suite file is kept, except
//! that an explicit list of test names is run in the order given.
use globset::{Glob, GlobMatcher};

use crate::config::{SuiteConfig, TestSpec};
use crate::error::{Result, SuiteError};

#[derive(Clone, Debug, Default, PartialEq, derive_builder::Builder)]
#[builder(pattern = "owned", default)]
pub struct Selection {
    #[builder(setter(into, strip_option))]
    pub single_test: Option<String>,

    /// Names of tests to run.  Conflicts with `single_test`.
    #[builder(setter(into))]
    pub tests: Vec<String>,

    #[builder(setter(strip_option))]
    pub dim: Option<u8>,

    #[builder(setter(into, strip_option))]
    pub keyword: Option<String>,

    /// Glob over test names.
    #[builder(setter(into, strip_option))]
    pub pattern: Option<String>,

    /// Only run what failed in the last run.
    pub redo_failed: bool,
}

impl Selection {
    /// Does this selection restrict to the last run's failures?
    pub fn needs_previous_failures(&self) -> bool {
        self.redo_failed
    }

    fn glob(&self) -> Result<Option<GlobMatcher>> {
        self.pattern
            .as_deref()
            .map(|p| {
                Glob::new(p)
                    .map(|g| g.compile_matcher())
                    .map_err(|e| SuiteError::selection(format!("invalid test pattern {p}: {e}")))
            })
            .transpose()
    }

    /// Apply the selection to a suite.
    ///
    /// `previous_failures` restricts the run to those tests when given.  It is how redoing failures and copying
    /// benchmarks are both expressed.  Selecting nothing is an error.
    pub fn apply<'c>(
        &self,
        config: &'c SuiteConfig,
        previous_failures: Option<&[String]>,
    ) -> Result<Vec<&'c TestSpec>> {
        if self.single_test.is_some() && !self.tests.is_empty() {
            return Err(SuiteError::selection(
                "specify tests either by single test or by a list of tests, not both",
            ));
        }
        let glob = self.glob()?;

        let accepted = |t: &TestSpec| {
            previous_failures.map(|f| f.contains(&t.name)).unwrap_or(true)
                && self.dim.map(|d| t.dim == d).unwrap_or(true)
                && self
                    .keyword
                    .as_ref()
                    .map(|k| t.keywords.contains(k))
                    .unwrap_or(true)
                && glob.as_ref().map(|g| g.is_match(&t.name)).unwrap_or(true)
        };

        let named = match &self.single_test {
            Some(s) => std::slice::from_ref(s),
            None => self.tests.as_slice(),
        };

        let selected = if named.is_empty() {
            config.tests.iter().filter(|t| accepted(t)).collect::<Vec<_>>()
        } else {
            let mut ret = vec![];
            for n in named {
                let Some(t) = config.test(n) else {
                    return Err(SuiteError::selection(format!("{n} is not a valid test")));
                };
                if accepted(t) {
                    ret.push(t);
                }
            }
            ret
        };

        if selected.is_empty() {
            return Err(SuiteError::no_tests());
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn suite() -> SuiteConfig {
        SuiteConfig::from_yaml_str(
            r#"
main:
  test_top_dir: /tmp
repos:
  - name: AMReX
    dir: /amrex
  - name: source
    dir: /src
tests:
  - name: Sod-x
    dim: 1
    keywords: [hydro]
  - name: Sedov-2d
    dim: 2
    keywords: [hydro, gravity]
  - name: reacting-bubble
    dim: 2
  - name: toy-flame
    dim: 1
"#,
        )
        .unwrap()
    }

    fn names(tests: Vec<&TestSpec>) -> Vec<&str> {
        tests.into_iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn no_filters_selects_everything_in_order() {
        let cfg = suite();
        let got = Selection::default().apply(&cfg, None).unwrap();
        assert_eq!(names(got), vec!["Sod-x", "Sedov-2d", "reacting-bubble", "toy-flame"]);
    }

    #[test]
    fn filters_compose() {
        let cfg = suite();
        let sel = SelectionBuilder::default()
            .dim(2)
            .keyword("hydro")
            .build()
            .unwrap();
        assert_eq!(names(sel.apply(&cfg, None).unwrap()), vec!["Sedov-2d"]);

        let sel = SelectionBuilder::default().pattern("S*").build().unwrap();
        assert_eq!(names(sel.apply(&cfg, None).unwrap()), vec!["Sod-x", "Sedov-2d"]);
    }

    #[test]
    fn explicit_lists() {
        let cfg = suite();
        let sel = SelectionBuilder::default()
            .tests(vec!["toy-flame".to_string(), "Sod-x".to_string()])
            .build()
            .unwrap();
        assert_eq!(names(sel.apply(&cfg, None).unwrap()), vec!["toy-flame", "Sod-x"]);

        let sel = SelectionBuilder::default().single_test("nope").build().unwrap();
        assert!(sel.apply(&cfg, None).is_err());

        let sel = SelectionBuilder::default()
            .single_test("Sod-x")
            .tests(vec!["toy-flame".to_string()])
            .build()
            .unwrap();
        assert!(sel.apply(&cfg, None).is_err());
    }

    #[test]
    fn previous_failures_restrict() {
        let cfg = suite();
        let failed = vec!["reacting-bubble".to_string()];
        let sel = Selection {
            redo_failed: true,
            ..Default::default()
        };
        assert!(sel.needs_previous_failures());
        assert_eq!(
            names(sel.apply(&cfg, Some(&failed)).unwrap()),
            vec!["reacting-bubble"]
        );
    }

    #[test]
    fn empty_selection_is_rejected() {
        let cfg = suite();
        let sel = SelectionBuilder::default().dim(3).build().unwrap();
        assert!(sel.apply(&cfg, None).unwrap_err().is_no_tests());
        assert!(Selection::default().apply(&cfg, Some(&[])).unwrap_err().is_no_tests());
    }
}
