use std::path::Path;

use crate::discovery::{checkpoint_name, latest_plotfile};
use crate::error::{Stage, StageError};
use crate::lifecycle::run::restart_command;
use crate::lifecycle::{LifecycleState, Orchestrator, StageResult};
use crate::model::TestCase;

/// The name a restart test's first output is kept under while the rerun happens.
pub fn original_name(name: &str) -> String {
    format!("orig_{name}")
}

impl<'a> Orchestrator<'a> {
    /// Move the first run's output aside and rerun from a checkpoint.  The rerun's output is later compared against
    /// the first run's, not against the benchmark.
    pub(super) fn restart(&mut self, test: &mut TestCase, test_dir: &Path) -> StageResult {
        let name = test.name().to_string();
        let Some(checkpoint) = test.spec.restart else {
            return Ok(());
        };
        test.state.trace.enter(&name, LifecycleState::Restarting);

        let last = latest_plotfile(test_dir, &name).unwrap_or_else(|e| {
            log::warn!("Unable to look for plotfiles in {}: {e}", test_dir.display());
            None
        });
        let last = match last {
            Some(last) if test.state.backtraces.is_empty() => last,
            _ => {
                let problem = if test.state.backtraces.is_empty() {
                    "did not produce output"
                } else {
                    "produced backtraces"
                };
                test.state.trace.enter(&name, LifecycleState::FailedRestart);
                self.publish_run_output(test, test_dir);
                return Err(StageError::new(
                    Stage::Restart,
                    format!("test {problem}.  Restart test not possible"),
                ));
            }
        };

        let chk = checkpoint_name(&name, checkpoint);
        if !test_dir.join(&chk).exists() {
            test.state.trace.enter(&name, LifecycleState::FailedRestart);
            self.publish_run_output(test, test_dir);
            return Err(StageError::new(
                Stage::Restart,
                format!("test did not produce checkpoint {chk}.  Restart test not possible"),
            ));
        }

        test.state.trace.enter(&name, LifecycleState::Restage);
        let orig = original_name(&last);
        rename(test_dir, &last, &orig)?;
        test.state.original_output = Some(orig);
        if let Some(diff_dir) = &test.spec.comparison.diff_dir {
            let diff_dir = diff_dir.to_string_lossy();
            rename(test_dir, &diff_dir, &original_name(&diff_dir))?;
        }

        test.state.trace.enter(&name, LifecycleState::Rerunning);
        log::info!("Restarting from {chk}");
        let exe = test
            .state
            .executable
            .as_ref()
            .and_then(|e| e.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let command = restart_command(self.config, &test.spec, &exe, checkpoint);
        let code = self.execute(test, test_dir, &command, true)?;

        if code != 0 && !test.spec.ignore_return_code {
            test.state.trace.enter(&name, LifecycleState::FailedRestart);
            self.publish_run_output(test, test_dir);
            return Err(StageError::new(
                Stage::Restart,
                format!("rerun exited with code {code}"),
            ));
        }
        Ok(())
    }
}

fn rename(dir: &Path, from: &str, to: &str) -> StageResult {
    std::fs::rename(dir.join(from), dir.join(to)).map_err(|e| {
        StageError::new(
            Stage::Restart,
            format!("unable to rename {from} to {to}: {e}"),
        )
    })
}
