//! Blocking subprocess execution.
//!
//! Every external tool the suite touches (make, git, the simulation executables, the comparison tools, tar) goes
//! through [CommandSpec::run].  The working directory is always explicit: nothing in this crate changes the current
//! directory of the process, so the directory a command runs in is visible at the call site.
//!
//! There is deliberately no timeout.  A hung test hangs the suite.
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process as proc;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Unable to parse command line `{0}`")]
    Parse(String),

    #[error("Empty command line")]
    Empty,

    #[error("Unable to run `{command}` in {}: {source}", cwd.display())]
    Spawn {
        command: String,
        cwd: PathBuf,
        source: std::io::Error,
    },

    #[error("Unable to record output of `{command}` to {}: {source}", path.display())]
    Capture {
        command: String,
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Where a stream of a subprocess ends up, in addition to being returned in memory.
#[derive(Clone, Debug)]
pub enum Capture {
    /// Only keep the output in memory.
    Memory,

    /// Truncate the file and write the stream to it.
    File(PathBuf),

    /// Append the stream to the file.
    Append(PathBuf),
}

/// A command line to run, with everything it needs spelled out.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    /// The full command line.  Split with shell quoting rules, but not run through a shell.
    pub command_line: String,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub stdout: Capture,

    /// If `None`, stderr goes wherever stdout goes.
    pub stderr: Option<Capture>,

    /// Write the command line itself as the first line of the stdout capture file.
    pub record_command: bool,
}

/// What happened when a command ran.
#[derive(Clone, Debug)]
pub struct CommandOutcome {
    pub command_line: String,

    /// `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The exit code, with death by signal folded into a generic failure code.
    pub fn code(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }
}

impl CommandSpec {
    pub fn new(command_line: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        CommandSpec {
            command_line: command_line.into(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            stdout: Capture::Memory,
            stderr: None,
            record_command: false,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdout_to(mut self, capture: Capture) -> Self {
        self.stdout = capture;
        self
    }

    pub fn stderr_to(mut self, capture: Capture) -> Self {
        self.stderr = Some(capture);
        self
    }

    pub fn record_command(mut self, record: bool) -> Self {
        self.record_command = record;
        self
    }

    /// Run to completion, blocking.
    ///
    /// A non-zero exit is not an error here; callers decide what exit codes mean.  Errors are reserved for not being
    /// able to start the process or not being able to write its output where we were asked to.
    pub fn run(&self) -> Result<CommandOutcome, CommandError> {
        let argv = split_command_line(&self.command_line)?;

        log::debug!("Running `{}` in {}", self.command_line, self.cwd.display());

        let mut command = proc::Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(&self.cwd)
            .envs(&self.env)
            .stdin(proc::Stdio::null());

        let start = Instant::now();
        let output = command.output().map_err(|source| CommandError::Spawn {
            command: self.command_line.clone(),
            cwd: self.cwd.clone(),
            source,
        })?;
        let duration = start.elapsed();

        let outcome = CommandOutcome {
            command_line: self.command_line.clone(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration,
        };

        self.write_captures(&outcome)?;
        Ok(outcome)
    }

    fn write_captures(&self, outcome: &CommandOutcome) -> Result<(), CommandError> {
        let stdout_file = open_capture(&self.stdout).map_err(|(path, source)| self.capture_error(path, source))?;

        if let Some((path, mut file)) = stdout_file {
            let mut write = || -> std::io::Result<()> {
                if self.record_command {
                    writeln!(file, "{}", self.command_line)?;
                }
                file.write_all(outcome.stdout.as_bytes())?;
                if self.stderr.is_none() {
                    file.write_all(outcome.stderr.as_bytes())?;
                }
                Ok(())
            };
            write().map_err(|e| self.capture_error(path, e))?;
        }

        // Separate stderr files are only created when there is something to put in them, so that the presence of the
        // file means the process wrote to stderr.
        if let Some(capture) = &self.stderr {
            if !outcome.stderr.trim().is_empty() {
                if let Some((path, mut file)) =
                    open_capture(capture).map_err(|(path, source)| self.capture_error(path, source))?
                {
                    file.write_all(outcome.stderr.as_bytes())
                        .map_err(|e| self.capture_error(path, e))?;
                }
            }
        }

        Ok(())
    }

    fn capture_error(&self, path: PathBuf, source: std::io::Error) -> CommandError {
        CommandError::Capture {
            command: self.command_line.clone(),
            path,
            source,
        }
    }
}

fn open_capture(capture: &Capture) -> Result<Option<(PathBuf, File)>, (PathBuf, std::io::Error)> {
    let (path, append) = match capture {
        Capture::Memory => return Ok(None),
        Capture::File(p) => (p, false),
        Capture::Append(p) => (p, true),
    };

    OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map(|f| Some((path.clone(), f)))
        .map_err(|e| (path.clone(), e))
}

/// Split a command line the way a POSIX shell would, without running a shell.
pub fn split_command_line(command_line: &str) -> Result<Vec<String>, CommandError> {
    let parts =
        shlex::split(command_line).ok_or_else(|| CommandError::Parse(command_line.to_string()))?;
    if parts.is_empty() {
        return Err(CommandError::Empty);
    }
    Ok(parts)
}

/// Make a path suitable for splicing into a command line.
pub fn quote_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    shlex::try_quote(&s)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| s.into_owned())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_exit_code_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = CommandSpec::new("sh -c 'echo hello; echo oops >&2; exit 3'", dir.path())
            .run()
            .unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.success());
        assert_eq!(outcome.stdout, "hello\n");
        assert_eq!(outcome.stderr, "oops\n");
    }

    #[test]
    fn runs_in_the_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();

        let outcome = CommandSpec::new("ls", dir.path()).run().unwrap();
        assert!(outcome.stdout.contains("marker.txt"));
    }

    #[test]
    fn records_command_and_merges_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        CommandSpec::new("sh -c 'echo a; echo b >&2'", dir.path())
            .stdout_to(Capture::File(out.clone()))
            .record_command(true)
            .run()
            .unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "sh -c 'echo a; echo b >&2'\na\nb\n");
    }

    #[test]
    fn empty_stderr_does_not_create_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = dir.path().join("err.txt");
        CommandSpec::new("true", dir.path())
            .stderr_to(Capture::File(err.clone()))
            .run()
            .unwrap();
        assert!(!err.exists());
    }

    #[test]
    fn environment_is_passed() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = CommandSpec::new("sh -c 'echo $OMP_NUM_THREADS'", dir.path())
            .env("OMP_NUM_THREADS", "4")
            .run()
            .unwrap();
        assert_eq!(outcome.stdout.trim(), "4");
    }

    #[test]
    fn unbalanced_quotes_are_rejected() {
        assert!(matches!(
            split_command_line("echo 'oops"),
            Err(CommandError::Parse(_))
        ));
        assert!(matches!(split_command_line("   "), Err(CommandError::Empty)));
    }
}
