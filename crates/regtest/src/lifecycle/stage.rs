use std::path::{Path, PathBuf};

use crate::error::{Stage, StageError};
use crate::lifecycle::{LifecycleState, Orchestrator, StageResult};
use crate::model::TestCase;

#[derive(Copy, Clone, Debug, derive_more::Display)]
enum Action {
    #[display(fmt = "copy")]
    Copy,
    #[display(fmt = "move")]
    Move,
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr, StageError> {
    path.file_name().ok_or_else(|| {
        StageError::new(
            Stage::Staging,
            format!("{} does not name a file", path.display()),
        )
    })
}

/// Rename, falling back to copy-and-delete when the rename crosses filesystems.
fn move_file(source: &Path, dest: &Path) -> std::io::Result<()> {
    if std::fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    std::fs::copy(source, dest)?;
    std::fs::remove_file(source)
}

#[cfg(unix)]
fn symlink(source: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, link)
}

#[cfg(not(unix))]
fn symlink(source: &Path, link: &Path) -> std::io::Result<()> {
    crate::benchmark::copy_any(source, link)
}

impl<'a> Orchestrator<'a> {
    /// Put everything the run needs into the test's private directory.
    pub(super) fn stage_files(&mut self, test: &mut TestCase, test_dir: &Path) -> StageResult {
        let name = test.name().to_string();
        test.state.trace.enter(&name, LifecycleState::Staging);

        let res = self.stage_inner(test, test_dir);
        match &res {
            Ok(()) => test.state.trace.enter(&name, LifecycleState::Staged),
            Err(_) => test.state.trace.enter(&name, LifecycleState::FailedStage),
        }
        res
    }

    fn stage_inner(&self, test: &mut TestCase, test_dir: &Path) -> StageResult {
        let build_dir = self.config.build_dir_for(&test.spec);

        let mut needed: Vec<(PathBuf, Action)> = vec![];
        match &test.state.executable {
            Some(exe) => needed.push((exe.clone(), Action::Move)),
            None if !test.is_script() && test.spec.custom_run_command.is_none() => {
                return Err(StageError::new(
                    Stage::Staging,
                    format!("no executable found in {}", build_dir.display()),
                ));
            }
            None => {}
        }
        if let crate::config::TestKind::Script { script, .. } = &test.spec.kind {
            needed.push((build_dir.join(script), Action::Copy));
        }
        for f in test
            .spec
            .input_file
            .iter()
            .chain(test.spec.probin_file.iter())
            .chain(test.spec.aux_files.iter())
        {
            needed.push((build_dir.join(f), Action::Copy));
        }

        for (source, action) in needed {
            let dest = test_dir.join(file_name(&source)?);
            let res = match action {
                Action::Copy => std::fs::copy(&source, &dest).map(|_| ()),
                Action::Move => move_file(&source, &dest),
            };
            if let Err(e) = res {
                return Err(StageError::new(
                    Stage::Staging,
                    format!("unable to {action} file {}: {e}", source.display()),
                ));
            }
            log::debug!("{action} {} -> {}", source.display(), dest.display());
        }

        if let Some(exe) = &test.state.executable {
            test.state.executable = Some(test_dir.join(file_name(exe)?));
        }

        for l in test.spec.link_files.iter() {
            let source = build_dir.join(l);
            if !source.exists() {
                return Err(StageError::new(
                    Stage::Staging,
                    format!("link file {} does not exist", source.display()),
                ));
            }
            let source = std::fs::canonicalize(&source).unwrap_or(source);
            let link = test_dir.join(file_name(l)?);
            symlink(&source, &link).map_err(|e| {
                StageError::new(
                    Stage::Staging,
                    format!("unable to symlink link file {}: {e}", l.display()),
                )
            })?;
        }

        Ok(())
    }
}
