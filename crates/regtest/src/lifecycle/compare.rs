use std::path::{Path, PathBuf};

use crate::benchmark::BenchmarkStore;
use crate::compare::ComparisonResult;
use crate::discovery::latest_plotfile;
use crate::error::{Stage, StageError};
use crate::lifecycle::restart::original_name;
use crate::lifecycle::{LifecycleState, Orchestrator, StageResult};
use crate::model::{files, TestCase};
use crate::status::TestStatus;

/// What a test produced, and the benchmark entry it is compared against or stored as.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Resolved {
    /// Relative to the test's directory.
    pub(crate) output: String,
    pub(crate) entry: String,
}

fn write_note(path: &Path, text: &str) {
    if let Err(e) = std::fs::write(path, text) {
        log::warn!("Unable to write {}: {e}", path.display());
    }
}

/// Find the output a test is judged by.  `None` if the run didn't produce it.
pub(crate) fn resolve_output(test: &TestCase, test_dir: &Path) -> Option<Resolved> {
    let name = test.name();
    let comparison = &test.spec.comparison;

    let resolved = if test.is_script() {
        let output = test.script_output();
        let entry = match &comparison.output_file {
            Some(f) => format!("{name}_{f}"),
            None => output.clone(),
        };
        Resolved { output, entry }
    } else if let Some(f) = &comparison.output_file {
        Resolved {
            output: f.clone(),
            entry: format!("{name}_{f}"),
        }
    } else if let Some(f) = &comparison.compare_file {
        Resolved {
            output: f.clone(),
            entry: f.clone(),
        }
    } else {
        let latest = latest_plotfile(test_dir, name).unwrap_or_else(|e| {
            log::warn!("Unable to look for plotfiles in {}: {e}", test_dir.display());
            None
        })?;
        Resolved {
            output: latest.clone(),
            entry: latest,
        }
    };

    if test_dir.join(&resolved.output).exists() {
        Some(resolved)
    } else {
        log::warn!("{name}: output {} was not found", resolved.output);
        None
    }
}

impl<'a> Orchestrator<'a> {
    pub(super) fn compare(&mut self, test: &mut TestCase, test_dir: &Path) {
        let name = test.name().to_string();
        let log = test_dir.join(files::compare_out(&name));

        if let Some(marker) = test.success_marker().map(str::to_string) {
            test.state.trace.enter(&name, LifecycleState::Comparing);
            let found = match std::fs::read_to_string(test_dir.join(files::run_out(&name))) {
                Ok(text) => text.lines().any(|l| l.contains(marker.as_str())),
                Err(e) => {
                    log::warn!("{name}: no output file found: {e}");
                    false
                }
            };
            write_note(
                &log,
                if found {
                    "SELF TEST SUCCESSFUL\n"
                } else {
                    "SELF TEST FAILED\n"
                },
            );
            test.state.compare_result = Some(if found {
                ComparisonResult::passed()
            } else {
                ComparisonResult::failed()
            });
            self.finish_comparison(test);
            return;
        }

        let resolved = resolve_output(test, test_dir);
        if let Some(r) = &resolved {
            test.state.output_artifact = Some(r.output.clone());
            if !test.is_script() {
                test.state.nlevels = self.tools.levels(Path::new(&r.output), test_dir);
            }
        }

        if test.comparison_skipped(&self.settings.overrides) {
            log::info!("{name}: comparison skipped");
            return;
        }
        test.state.trace.enter(&name, LifecycleState::Comparing);

        let mut result = match &resolved {
            None => {
                write_note(
                    &log,
                    "WARNING: run did not produce any output\n         unable to do a comparison\n",
                );
                ComparisonResult::failed()
            }
            Some(r) => {
                test.state.compare_file_used = Some(r.output.clone());
                let bench = match &test.state.original_output {
                    Some(orig) => Some(test_dir.join(orig)),
                    None => self.bench.fetch(&r.entry),
                };
                match bench {
                    None => {
                        log::warn!("{name}: no corresponding benchmark found");
                        write_note(
                            &log,
                            "WARNING: no corresponding benchmark found\n         unable to do a comparison\n",
                        );
                        ComparisonResult::no_benchmark()
                    }
                    Some(bench) => self.run_comparison(test, &bench, &r.output, test_dir, &log),
                }
            }
        };

        if let Some(diff_dir) = &test.spec.comparison.diff_dir {
            let bench = if test.is_restart() {
                test_dir.join(original_name(&diff_dir.to_string_lossy()))
            } else {
                self.bench
                    .path_for(&BenchmarkStore::diff_dir_entry(&name, diff_dir))
            };
            log::info!("{name}: diffing {}", diff_dir.display());
            let diffed = self
                .tools
                .diff_dirs(
                    &bench,
                    diff_dir,
                    &test.spec.comparison.diff_opts,
                    test_dir,
                    &log,
                )
                .unwrap_or_else(|e| {
                    log::error!("{name}: {e}");
                    ComparisonResult::failed()
                });
            result = result.and(diffed);
        }

        for (var, err) in result.highlighted() {
            log::info!(
                "{name}: {var} differs, absolute {:e} relative {:e}",
                err.absolute,
                err.relative
            );
        }
        test.state.compare_result = Some(result);
        self.finish_comparison(test);
    }

    fn run_comparison(
        &self,
        test: &TestCase,
        bench: &Path,
        output: &str,
        test_dir: &Path,
        log: &Path,
    ) -> ComparisonResult {
        let name = test.name();
        let candidate = PathBuf::from(output);
        log::info!("{name}: comparing {output} against {}", bench.display());

        let first = if test.is_script() {
            self.tools.diff_files(bench, &candidate, test_dir, log)
        } else {
            self.tools.compare_plotfiles(
                bench,
                &candidate,
                &test.tolerances(&self.settings.overrides),
                test_dir,
                log,
            )
        };
        let mut result = first.unwrap_or_else(|e| {
            log::error!("{name}: {e}");
            ComparisonResult::failed()
        });

        if !test.is_script() {
            let tolerance = test.particle_tolerance(&self.settings.overrides);
            for ptype in test.spec.comparison.particle_types.iter() {
                let particles = self
                    .tools
                    .compare_particles(bench, &candidate, ptype, tolerance, test_dir, log)
                    .unwrap_or_else(|e| {
                        log::error!("{name}: {e}");
                        ComparisonResult::failed()
                    });
                result = result.and(particles);
            }
        }
        result
    }

    fn finish_comparison(&self, test: &mut TestCase) {
        let name = test.name().to_string();
        let slow = test
            .state
            .performance
            .as_ref()
            .is_some_and(|p| !p.meets_threshold);
        let state = match (test.compare_successful(), slow) {
            (false, _) => LifecycleState::FailedCompare,
            (true, false) => LifecycleState::Passed,
            (true, true) => LifecycleState::PassedSlowly,
        };
        test.state.trace.enter(&name, state);
    }

    /// Store a test's output as its new benchmark.
    pub(super) fn store_benchmark(&mut self, test: &mut TestCase, test_dir: &Path) -> StageResult {
        let name = test.name().to_string();
        if !test.spec.comparison.enabled {
            return Ok(());
        }
        test.state.trace.enter(&name, LifecycleState::StoringBenchmark);

        let Some(resolved) = resolve_output(test, test_dir) else {
            test.state.benchmark_status = Some(TestStatus::BenchmarksFailed);
            self.publish_run_output(test, test_dir);
            return Err(StageError::new(
                Stage::BenchmarkStore,
                "runtime failure during benchmark creation",
            ));
        };
        test.state.output_artifact = Some(resolved.output.clone());

        if let Err(e) = self
            .bench
            .update(&resolved.entry, &test_dir.join(&resolved.output))
        {
            test.state.benchmark_status = Some(TestStatus::BenchmarksFailed);
            return Err(StageError::new(
                Stage::BenchmarkStore,
                format!("unable to store {}: {e}", resolved.entry),
            ));
        }
        log::warn!("{name}: new benchmark file: {}", resolved.entry);

        if let Some(diff_dir) = &test.spec.comparison.diff_dir {
            let entry = BenchmarkStore::diff_dir_entry(&name, diff_dir);
            if let Err(e) = self.bench.update(&entry, &test_dir.join(diff_dir)) {
                test.state.benchmark_status = Some(TestStatus::BenchmarksFailed);
                return Err(StageError::new(
                    Stage::BenchmarkStore,
                    format!("unable to store {entry}: {e}"),
                ));
            }
            log::info!("{name}: new diff dir: {entry}");
        }

        test.state.benchmark_status = Some(TestStatus::BenchmarksUpdated {
            file: resolved.entry,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SuiteConfig;
    use pretty_assertions::assert_eq;

    fn case(extra: &str) -> TestCase {
        let yaml = format!(
            "main:\n  test_top_dir: /tmp\nrepos:\n  - name: AMReX\n    dir: /amrex\n  - name: source\n    dir: /src\ntests:\n  - name: Sod-x\n    dim: 1\n{extra}"
        );
        TestCase::new(SuiteConfig::from_yaml_str(&yaml).unwrap().tests.remove(0))
    }

    #[test]
    fn plotfile_output_is_its_own_entry() {
        let dir = tempfile::tempdir().unwrap();
        for p in ["Sod-x_plt00000", "Sod-x_plt00020"] {
            std::fs::create_dir(dir.path().join(p)).unwrap();
        }
        assert_eq!(
            resolve_output(&case(""), dir.path()),
            Some(Resolved {
                output: "Sod-x_plt00020".into(),
                entry: "Sod-x_plt00020".into(),
            })
        );
    }

    #[test]
    fn declared_output_files_are_prefixed_in_the_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("results.txt"), "1\n").unwrap();
        let t = case("    run_as_script: run.sh\n    output_file: results.txt\n");
        assert_eq!(
            resolve_output(&t, dir.path()),
            Some(Resolved {
                output: "results.txt".into(),
                entry: "Sod-x_results.txt".into(),
            })
        );
    }

    #[test]
    fn missing_output_resolves_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_output(&case(""), dir.path()), None);
        let t = case("    compare_file: Sod-x_plt00100\n");
        assert_eq!(resolve_output(&t, dir.path()), None);
    }

    #[test]
    fn scripts_default_to_their_stdout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Sod-x.run.out"), "ok\n").unwrap();
        let t = case("    run_as_script: run.sh\n");
        assert_eq!(
            resolve_output(&t, dir.path()).map(|r| r.entry),
            Some("Sod-x.run.out".to_string())
        );
    }
}
