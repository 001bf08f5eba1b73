//! The outside world: version control and the build system.
//!
//! Both are traits so that the orchestrator can be driven against fakes.  The real implementations shell out to `git`
//! and `make` and treat them as black boxes.
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::flags::CompileFlags;
use crate::process::CommandError;

pub mod git;
pub mod make;

pub use git::GitRepo;
pub use make::MakeBuild;

pub trait VersionControl {
    /// The repository's name in the suite file.
    fn name(&self) -> &str;

    /// The branch being tested, for reporting.
    fn branch(&self) -> Option<String>;

    /// Fetch, check out the wanted revision, and pull.  Returns the resulting hash.
    ///
    /// `log_dir` receives the output of the git commands.
    fn update(&mut self, log_dir: &Path) -> Result<String>;

    fn current_hash(&self) -> Result<String>;

    /// Write the change log into `dest_dir`.
    fn changelog(&self, dest_dir: &Path) -> Result<()>;

    /// Go back to whatever was checked out before [VersionControl::update].
    fn restore(&mut self) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct BuildRequest {
    pub dir: PathBuf,
    pub target: String,
    pub options: CompileFlags,

    /// Replaces the suite-wide make additions when set.  Tools are built with none.
    pub make_additions: Option<String>,
    pub log_path: Option<PathBuf>,
}

impl BuildRequest {
    pub fn new(dir: impl Into<PathBuf>, options: CompileFlags) -> Self {
        BuildRequest {
            dir: dir.into(),
            target: String::new(),
            options,
            make_additions: None,
            log_path: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BuildOutcome {
    pub command_line: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl BuildOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub trait BuildSystem {
    fn build(&self, request: &BuildRequest) -> Result<BuildOutcome, CommandError>;

    fn realclean(&self, dir: &Path, options: &CompileFlags) -> Result<(), CommandError>;

    /// The executable a build in `dir` most recently produced.
    fn find_executable(&self, dir: &Path) -> Option<PathBuf>;
}
