use std::path::Path;

use crate::config::{SuiteConfig, TestKind, TestSpec};
use crate::discovery::{backtraces, checkpoint_name};
use crate::error::{Stage, StageError};
use crate::lifecycle::{LifecycleState, Orchestrator, StageResult};
use crate::model::{files, TestCase};
use crate::process::{Capture, CommandSpec};

fn input_name(spec: &TestSpec) -> String {
    spec.input_file
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn join_nonempty<'s>(parts: impl IntoIterator<Item = &'s str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The simulation's own command line, before valgrind or MPI.
///
/// `restart_from` is the checkpoint number when rerunning a restart test.
fn simulation_command(config: &SuiteConfig, spec: &TestSpec, exe: &str, restart_from: Option<u32>) -> String {
    let name = &spec.name;
    let exe = format!("./{exe}");
    let input = input_name(spec);

    let (naming, checkpoints) = if config.main.source_tree.is_fortran() {
        let naming = format!("--plot_base_name {name}_plt --check_base_name {name}_chk");
        let checkpoints = match (restart_from, spec.restart) {
            (Some(n), _) => format!("--chk_int 0 --restart {n}"),
            (None, Some(_)) => String::new(),
            (None, None) => "--chk_int 0".to_string(),
        };
        (naming, checkpoints)
    } else {
        let naming = format!(
            "{}={name}_plt amr.check_file={name}_chk",
            config.main.plot_file_name
        );
        let checkpoints = match (restart_from, spec.restart) {
            (Some(n), _) => format!(
                "amr.checkpoint_files_output=0 amr.restart={}",
                checkpoint_name(name, n)
            ),
            (None, Some(n)) => format!("amr.checkpoint_files_output=1 amr.check_int={n}"),
            (None, None) => "amr.checkpoint_files_output=0".to_string(),
        };
        (naming, checkpoints)
    };

    join_nonempty([
        exe.as_str(),
        input.as_str(),
        naming.as_str(),
        checkpoints.as_str(),
        config.main.global_add_to_exec_string.as_str(),
        spec.runtime_params.as_str(),
    ])
}

/// Wrap a command in the suite's MPI template, if the test runs under MPI.
fn wrap_mpi(config: &SuiteConfig, spec: &TestSpec, command: String) -> String {
    match spec.parallel.mpi_procs {
        Some(n) if !spec.kind.is_script() => config
            .main
            .mpi_command
            .replace("@host@", &config.main.mpi_host)
            .replace("@nprocs@", &n.to_string())
            .replace("@command@", &command),
        _ => command,
    }
}

/// The full command line of a test's first run.
pub fn run_command(config: &SuiteConfig, spec: &TestSpec, exe: &str, valgrind: Option<&str>) -> String {
    let mut command = simulation_command(config, spec, exe, None);
    if let Some(opts) = valgrind {
        command = join_nonempty(["valgrind", opts, command.as_str()]);
    }
    if let TestKind::Script { script, args } = &spec.kind {
        let script = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        command = join_nonempty([format!("./{script}").as_str(), args.as_str()]);
    }
    if let Some(custom) = &spec.custom_run_command {
        command = custom.clone();
    }
    wrap_mpi(config, spec, command)
}

/// The command line which reruns a restart test from its checkpoint.
pub fn restart_command(config: &SuiteConfig, spec: &TestSpec, exe: &str, checkpoint: u32) -> String {
    wrap_mpi(config, spec, simulation_command(config, spec, exe, Some(checkpoint)))
}

impl<'a> Orchestrator<'a> {
    pub(super) fn run(&mut self, test: &mut TestCase, test_dir: &Path) -> StageResult {
        let name = test.name().to_string();
        test.state.trace.enter(&name, LifecycleState::Running);

        let exe = test
            .state
            .executable
            .as_ref()
            .and_then(|e| e.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let command = run_command(
            self.config,
            &test.spec,
            &exe,
            self.settings.valgrind.as_deref(),
        );

        let code = self.execute(test, test_dir, &command, false)?;

        if test.has_crashed() {
            test.state.trace.enter(&name, LifecycleState::Crashed);
        } else {
            test.state.trace.enter(&name, LifecycleState::Ran);
        }

        if code != 0 && !test.spec.ignore_return_code {
            test.state.trace.enter(&name, LifecycleState::FailedRun);
            self.publish_run_output(test, test_dir);
            return Err(StageError::new(Stage::Run, format!("run exited with code {code}")));
        }
        Ok(())
    }

    /// Run one command line of a test, capturing its output into the test's files.  Returns the exit code.
    ///
    /// With `append`, stdout is added to an existing `run.out` rather than replacing it.
    pub(super) fn execute(
        &self,
        test: &mut TestCase,
        test_dir: &Path,
        command: &str,
        append: bool,
    ) -> Result<i32, StageError> {
        let name = test.name().to_string();
        log::info!("{command}");

        let run_out = test_dir.join(files::run_out(&name));
        let mut spec = CommandSpec::new(command, test_dir).stdout_to(if append {
            Capture::Append(run_out)
        } else {
            Capture::File(run_out)
        });
        if !test.is_script() {
            spec = spec.stderr_to(Capture::File(test_dir.join(files::err_out(&name))));
        }
        if let Some(n) = test.spec.parallel.omp_threads {
            spec = spec.env("OMP_NUM_THREADS", n.to_string());
        }

        let outcome = spec
            .run()
            .map_err(|e| StageError::new(Stage::Run, e.to_string()))?;

        test.state.run_command = Some(command.to_string());
        test.state.return_code = outcome.exit_code;
        test.state.run_duration += outcome.duration;
        if !outcome.success() {
            log::warn!("{name} exited with {}", outcome.code());
        }

        self.collect_backtraces(test, test_dir);
        Ok(outcome.code())
    }

    /// Record backtrace files a crash left behind and copy them for humans.
    fn collect_backtraces(&self, test: &mut TestCase, test_dir: &Path) {
        let found = match backtraces(test_dir) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("Unable to look for backtraces in {}: {e}", test_dir.display());
                return;
            }
        };

        for b in found {
            let published = format!("{}.{b}", test.name());
            if test.state.backtraces.contains(&published) {
                continue;
            }
            log::warn!("{} left a backtrace: {b}", test.name());
            self.to_web(&test_dir.join(&b), &published);
            test.state.backtraces.push(published);
        }
    }
}
