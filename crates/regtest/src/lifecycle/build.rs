use std::path::Path;
use std::time::Instant;

use crate::collaborators::BuildRequest;
use crate::config::{RepoConfig, SuiteConfig, TestSpec};
use crate::error::{Stage, StageError};
use crate::flags::{c_flag, f_flag, CompileFlags};
use crate::lifecycle::{LifecycleState, Orchestrator, StageResult};
use crate::model::{files, TestCase};

/// Flags every build in the suite gets: those of extra repositories which contain build directories.
fn extra_repo_flags(config: &SuiteConfig) -> CompileFlags {
    let mut ret = CompileFlags::new();
    for r in config.repos.iter() {
        let special = r.name.eq_ignore_ascii_case("AMReX") || r.name == "source";
        if r.build && !special {
            ret.merge(&r.comp_flags);
        }
    }
    ret
}

/// The make options for a test.  Later sources win: suite-wide, then test parallelism and dimension, then
/// repository strings, then the test's own additions.
pub fn build_flags(config: &SuiteConfig, test: &TestSpec) -> CompileFlags {
    let mut flags = extra_repo_flags(config);

    if config.main.source_tree.is_fortran() {
        flags.set("NDEBUG", f_flag(!test.debug));
        flags.set("ACC", f_flag(test.acc));
        flags.set("MPI", f_flag(test.parallel.mpi_procs.is_some()));
        flags.set("OMP", f_flag(test.parallel.omp_threads.is_some()));
    } else {
        flags.set("DEBUG", c_flag(test.debug));
        flags.set("USE_ACC", c_flag(test.acc));
        flags.set("USE_MPI", c_flag(test.parallel.mpi_procs.is_some()));
        flags.set("USE_OMP", c_flag(test.parallel.omp_threads.is_some()));
        flags.set("DIM", test.dim.to_string());
    }

    if let Some(extra) = test.extra_build_repo.as_deref().and_then(|r| config.repo(r)) {
        flags.merge(&extra.comp_flags);
    }
    if let Some(source) = config.repo("source") {
        flags.merge(&source.comp_flags);
    }
    flags.merge(&test.compile_flags);
    flags
}

/// Options for `make realclean` in a repository.
pub fn realclean_flags(config: &SuiteConfig, repo: &RepoConfig) -> CompileFlags {
    let mut flags = extra_repo_flags(config);
    if repo.build {
        flags.merge(&repo.comp_flags);
    }
    flags
}

impl<'a> Orchestrator<'a> {
    pub(super) fn build_test(&mut self, test: &mut TestCase, test_dir: &Path, reclean: bool) -> StageResult {
        let name = test.name().to_string();
        test.state.trace.enter(&name, LifecycleState::Building);

        let build_dir = self.config.build_dir_for(&test.spec);
        if reclean {
            log::info!("Re-making clean in {}", build_dir.display());
            let repo = test
                .spec
                .extra_build_repo
                .as_deref()
                .and_then(|r| self.config.repo(r))
                .unwrap_or_else(|| self.config.source_repo());
            if let Err(e) = self
                .build
                .realclean(&build_dir, &realclean_flags(self.config, repo))
            {
                log::warn!("{e}");
            }
        }

        let mut request = BuildRequest::new(&build_dir, build_flags(self.config, &test.spec));
        request.target = test.spec.target.clone();
        if test.spec.ignore_global_make_additions {
            request.make_additions = Some(String::new());
        }
        let make_out = test_dir.join(files::make_out(&name));
        request.log_path = Some(make_out.clone());

        let start = Instant::now();
        let outcome = self.build.build(&request);
        test.state.build_duration = start.elapsed();

        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                test.state.trace.enter(&name, LifecycleState::FailedBuild);
                return Err(StageError::new(Stage::Build, e.to_string()));
            }
        };
        test.state.build_command = Some(outcome.command_line.clone());

        if make_out.is_file() {
            self.to_web(&make_out, &files::make_out(&name));
        }

        if !outcome.success() {
            test.state.trace.enter(&name, LifecycleState::FailedBuild);
            return Err(StageError::new(
                Stage::Build,
                format!("compilation failed with exit code {}", outcome.exit_code),
            ));
        }

        test.state.compiled = true;
        test.state.executable = self.build.find_executable(&build_dir);
        test.state.trace.enter(&name, LifecycleState::Built);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn suite(tree: &str, test: &str) -> SuiteConfig {
        SuiteConfig::from_yaml_str(&format!(
            r#"
main:
  test_top_dir: /tmp
  source_tree: {tree}
repos:
  - name: AMReX
    dir: /amrex
  - name: source
    dir: /castro
    build: true
    comp_string: CASTRO_HOME=@self@
  - name: Microphysics
    dir: /micro
    build: true
    comp_string: MICROPHYSICS_HOME=@self@
tests:
  - name: t
{test}
"#
        ))
        .unwrap()
    }

    #[test]
    fn c_flags_in_order() {
        let cfg = suite(
            "C_Src",
            "    dim: 2\n    use_mpi: true\n    numprocs: 4\n    add_to_compile_string: DIM=3 NETWORK_DIR=aprox13\n",
        );
        assert_eq!(
            build_flags(&cfg, &cfg.tests[0]).to_string(),
            "MICROPHYSICS_HOME=/micro DEBUG=FALSE USE_ACC=FALSE USE_MPI=TRUE USE_OMP=FALSE DIM=3 CASTRO_HOME=/castro NETWORK_DIR=aprox13"
        );
    }

    #[test]
    fn fortran_flags() {
        let cfg = suite("F_Src", "    dim: 2\n    debug: true\n");
        let flags = build_flags(&cfg, &cfg.tests[0]);
        assert_eq!(flags.get("NDEBUG"), Some(""));
        assert_eq!(flags.get("MPI"), Some(""));
        assert_eq!(flags.get("DIM"), None);
    }

    #[test]
    fn realclean_uses_the_repository_string() {
        let cfg = suite("C_Src", "    dim: 1\n");
        let flags = realclean_flags(&cfg, cfg.source_repo());
        assert_eq!(flags.get("CASTRO_HOME"), Some("/castro"));
        assert_eq!(flags.get("MICROPHYSICS_HOME"), Some("/micro"));
    }
}
