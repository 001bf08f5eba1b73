use std::path::{Path, PathBuf};

use crate::collaborators::{BuildOutcome, BuildRequest, BuildSystem};
use crate::config::{RawMain, SourceTree};
use crate::discovery::most_recent_file;
use crate::flags::CompileFlags;
use crate::process::{quote_path, Capture, CommandError, CommandSpec};

/// The framework's GNU make build system.
#[derive(Clone, Debug)]
pub struct MakeBuild {
    pub make: String,
    pub jobs: u32,
    pub amrex_dir: PathBuf,
    pub source_tree: SourceTree,
    pub comp: String,
    pub fcomp: String,
    pub c_additions: String,
    pub f_additions: String,
}

impl MakeBuild {
    pub fn from_config(main: &RawMain, amrex_dir: &Path) -> Self {
        MakeBuild {
            make: main.make.clone(),
            jobs: main.num_make_jobs,
            amrex_dir: amrex_dir.to_path_buf(),
            source_tree: main.source_tree,
            comp: main.comp.clone(),
            fcomp: main.fcomp.clone(),
            c_additions: main.add_to_c_make_command.clone(),
            f_additions: main.add_to_f_make_command.clone(),
        }
    }

    /// The make command line for a request.
    pub fn command_line(&self, request: &BuildRequest) -> String {
        let amrex = quote_path(&self.amrex_dir);
        let parts = if self.source_tree.is_fortran() {
            let additions = request
                .make_additions
                .clone()
                .unwrap_or_else(|| self.f_additions.clone());
            vec![
                format!("{} -j{}", self.make, self.jobs),
                format!("AMREX_HOME={amrex}"),
                format!("COMP={}", self.fcomp),
                additions,
                request.options.to_string(),
                request.target.clone(),
            ]
        } else {
            let additions = request
                .make_additions
                .clone()
                .unwrap_or_else(|| self.c_additions.clone());
            vec![
                format!("{} -j{}", self.make, self.jobs),
                format!("AMREX_HOME={amrex}"),
                request.options.to_string(),
                format!("COMP={}", self.comp),
                additions,
                request.target.clone(),
            ]
        };

        parts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl BuildSystem for MakeBuild {
    fn build(&self, request: &BuildRequest) -> Result<BuildOutcome, CommandError> {
        let command_line = self.command_line(request);
        log::info!("{command_line}");

        let mut spec = CommandSpec::new(&command_line, &request.dir);
        if let Some(log) = &request.log_path {
            spec = spec.stdout_to(Capture::File(log.clone()));
        }
        let outcome = spec.run()?;
        if !outcome.success() {
            log::warn!("Build failed in {}", request.dir.display());
        }

        Ok(BuildOutcome {
            command_line,
            exit_code: outcome.code(),
            duration: outcome.duration,
        })
    }

    fn realclean(&self, dir: &Path, options: &CompileFlags) -> Result<(), CommandError> {
        let command = format!(
            "{} AMREX_HOME={} {options} realclean",
            self.make,
            quote_path(&self.amrex_dir)
        );
        let outcome = CommandSpec::new(command, dir).run()?;
        if !outcome.success() {
            log::warn!("make realclean failed in {}", dir.display());
        }
        Ok(())
    }

    fn find_executable(&self, dir: &Path) -> Option<PathBuf> {
        let found = if self.source_tree.is_fortran() {
            most_recent_file(dir, |n| n.starts_with("main") && n.ends_with(".exe"))
        } else {
            most_recent_file(dir, |n| n.ends_with(".ex"))
        };
        match found {
            Ok(f) => f,
            Err(e) => {
                log::warn!("Unable to look for an executable in {}: {e}", dir.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make(tree: SourceTree) -> MakeBuild {
        MakeBuild {
            make: "make".into(),
            jobs: 4,
            amrex_dir: PathBuf::from("/src/amrex"),
            source_tree: tree,
            comp: "gnu".into(),
            fcomp: "gfortran".into(),
            c_additions: "USE_CUDA=FALSE".into(),
            f_additions: String::new(),
        }
    }

    #[test]
    fn c_command_line() {
        let mut req = BuildRequest::new(
            "/src/Castro/Exec/Sod",
            CompileFlags::parse("DEBUG=FALSE DIM=1").unwrap(),
        );
        assert_eq!(
            make(SourceTree::CSrc).command_line(&req),
            "make -j4 AMREX_HOME=/src/amrex DEBUG=FALSE DIM=1 COMP=gnu USE_CUDA=FALSE"
        );

        req.make_additions = Some(String::new());
        req.target = "programs=fcompare".into();
        assert_eq!(
            make(SourceTree::CSrc).command_line(&req),
            "make -j4 AMREX_HOME=/src/amrex DEBUG=FALSE DIM=1 COMP=gnu programs=fcompare"
        );
    }

    #[test]
    fn f_command_line() {
        let req = BuildRequest::new("/x", CompileFlags::new().with("MPI", "t"));
        assert_eq!(
            make(SourceTree::FSrc).command_line(&req),
            "make -j4 AMREX_HOME=/src/amrex COMP=gfortran MPI=t"
        );
    }

    #[test]
    fn finds_the_newest_executable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Castro1d.gnu.ex"), "").unwrap();
        std::fs::write(dir.path().join("inputs"), "").unwrap();
        let exe = make(SourceTree::CSrc).find_executable(dir.path()).unwrap();
        assert!(exe.ends_with("Castro1d.gnu.ex"));
        assert_eq!(make(SourceTree::FSrc).find_executable(dir.path()), None);
    }
}
