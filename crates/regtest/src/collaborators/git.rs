use std::path::{Path, PathBuf};

use crate::collaborators::VersionControl;
use crate::config::RepoConfig;
use crate::error::{Result, SuiteError};
use crate::process::{Capture, CommandOutcome, CommandSpec};

/// A git checkout the suite tests against.
#[derive(Clone, Debug)]
pub struct GitRepo {
    name: String,
    dir: PathBuf,
    branch_wanted: Option<String>,
    hash_wanted: Option<String>,
    pr_wanted: Option<u32>,

    /// What was checked out before we touched it.
    branch_orig: Option<String>,
}

impl GitRepo {
    pub fn from_config(repo: &RepoConfig) -> Self {
        GitRepo {
            name: repo.name.clone(),
            dir: repo.dir.clone(),
            branch_wanted: repo
                .branch
                .as_ref()
                .map(|b| b.trim_matches('"').to_string()),
            hash_wanted: repo.hash.clone().filter(|h| !h.is_empty()),
            pr_wanted: repo.pr,
            branch_orig: None,
        }
    }

    fn git(&self, args: &str) -> Result<CommandOutcome> {
        Ok(CommandSpec::new(format!("git {args}"), &self.dir).run()?)
    }

    fn git_logged(&self, args: &str, log: &Path) -> Result<CommandOutcome> {
        Ok(CommandSpec::new(format!("git {args}"), &self.dir)
            .stdout_to(Capture::Append(log.to_path_buf()))
            .record_command(true)
            .run()?)
    }

    fn must(&self, outcome: CommandOutcome) -> Result<CommandOutcome> {
        if outcome.success() {
            Ok(outcome)
        } else {
            Err(SuiteError::version_control(
                &self.name,
                format!(
                    "`{}` exited with {}: {}",
                    outcome.command_line,
                    outcome.code(),
                    outcome.stderr.trim()
                ),
            ))
        }
    }
}

impl VersionControl for GitRepo {
    fn name(&self) -> &str {
        &self.name
    }

    fn branch(&self) -> Option<String> {
        if let Some(pr) = self.pr_wanted {
            return Some(format!("pr-{pr}"));
        }
        self.branch_wanted.clone().or_else(|| self.branch_orig.clone())
    }

    fn update(&mut self, log_dir: &Path) -> Result<String> {
        let log = log_dir.join(format!("git.{}.out", self.name));

        let head = self.must(self.git("rev-parse --abbrev-ref HEAD")?)?;
        let orig = head.stdout.trim().to_string();
        self.branch_orig = Some(orig.clone());

        log::info!("git fetch in {}", self.dir.display());
        self.must(self.git_logged("fetch", &log)?)?;

        if let Some(pr) = self.pr_wanted {
            log::info!("Fetching PR {pr}");
            self.must(self.git_logged(&format!("fetch origin pull/{pr}/head:pr-{pr}"), &log)?)?;
            self.must(self.git_logged(&format!("checkout pr-{pr}"), &log)?)?;
        } else if let Some(hash) = &self.hash_wanted {
            log::info!("git checkout {hash}");
            self.must(self.git_logged(&format!("checkout {hash}"), &log)?)?;
        } else if let Some(branch) = self.branch_wanted.clone().filter(|b| *b != orig) {
            log::info!("git checkout {branch} in {}", self.dir.display());
            self.must(self.git_logged(&format!("checkout {branch}"), &log)?)?;
        } else {
            self.branch_wanted = Some(orig);
        }

        if self.pr_wanted.is_none() && self.hash_wanted.is_none() {
            log::info!("git pull in {}", self.dir.display());
            self.must(self.git_logged("pull", &log)?)?;
        }

        self.current_hash()
    }

    fn current_hash(&self) -> Result<String> {
        let out = self.must(self.git("rev-parse HEAD")?)?;
        Ok(out.stdout.trim().to_string())
    }

    fn changelog(&self, dest_dir: &Path) -> Result<()> {
        let dest = dest_dir.join(format!("ChangeLog.{}", self.name));
        let out = CommandSpec::new("git log --name-only", &self.dir)
            .stdout_to(Capture::File(dest))
            .run()?;
        self.must(out).map(|_| ())
    }

    fn restore(&mut self) -> Result<()> {
        let Some(orig) = self.branch_orig.clone() else {
            return Ok(());
        };
        log::info!("git checkout {orig} in {}", self.dir.display());
        self.must(self.git(&format!("checkout {orig}"))?)?;

        if let Some(pr) = self.pr_wanted {
            log::info!("Removing pr-{pr}");
            self.must(self.git(&format!("branch -D pr-{pr}"))?)?;
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::flags::CompileFlags;

    fn sh(dir: &Path, cmd: &str) {
        let out = CommandSpec::new(format!("sh -c '{cmd}'"), dir).run().unwrap();
        assert!(out.success(), "{cmd}: {}", out.stderr);
    }

    fn has_git() -> bool {
        CommandSpec::new("git --version", ".")
            .run()
            .map(|o| o.success())
            .unwrap_or(false)
    }

    #[test]
    fn reports_hash_and_restores_branch() {
        if !has_git() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        sh(d, "git init -q -b main . && git config user.email a@b && git config user.name t");
        sh(d, "echo 1 > f && git add f && git commit -qm one");
        let first = CommandSpec::new("git rev-parse HEAD", d).run().unwrap().stdout;
        sh(d, "echo 2 > f && git commit -qam two");

        let mut repo = GitRepo::from_config(&RepoConfig {
            name: "source".into(),
            dir: d.to_path_buf(),
            branch: None,
            hash: Some(first.trim().to_string()),
            pr: None,
            build: true,
            comp_flags: CompileFlags::new(),
        });

        assert_eq!(repo.branch(), None);

        // There is no remote to fetch from, so check out by hand.
        repo.branch_orig = Some("main".into());
        sh(d, &format!("git checkout -q {}", first.trim()));
        assert_eq!(repo.current_hash().unwrap(), first.trim());
        assert_eq!(repo.branch().as_deref(), Some("main"));
        repo.restore().unwrap();
        let now = CommandSpec::new("git rev-parse --abbrev-ref HEAD", d)
            .run()
            .unwrap()
            .stdout;
        assert_eq!(now.trim(), "main");
    }
}
