use std::path::PathBuf;

use crate::config::ConfigError;
use crate::history::HistoryError;
use crate::process::CommandError;

#[derive(Debug, derive_more::Display, derive_more::IsVariant)]
enum SuiteErrorPayload {
    #[display(fmt = "Invalid configuration: {}", _0)]
    Config(ConfigError),

    #[display(fmt = "{} is not a valid directory", "_0.display()")]
    InvalidDirectory(PathBuf),

    #[display(fmt = "No valid tests selected")]
    NoTests,

    #[display(fmt = "{}", _0)]
    Selection(String),

    #[display(fmt = "Version control failed for {repo}: {reason}")]
    VersionControl { repo: String, reason: String },

    #[display(fmt = "Unable to continue, tool {tool} could not be built")]
    ToolBuild { tool: String },

    #[display(fmt = "Benchmark directory {} does not exist", "_0.display()")]
    MissingBenchmarks(PathBuf),

    #[display(fmt = "While preparing {}: {source}", "path.display()")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[display(fmt = "{}", _0)]
    Command(CommandError),

    #[display(fmt = "{}", _0)]
    History(HistoryError),
}

/// An error which aborts the whole suite.
///
/// Everything which can go wrong for a single test is a [StageError] instead, and never escapes the per-test
/// lifecycle.
#[derive(Debug, thiserror::Error)]
#[error("{payload}")]
pub struct SuiteError {
    payload: SuiteErrorPayload,
}

macro_rules! conv {
    ($variant: ident, $from_err: path) => {
        impl From<$from_err> for SuiteError {
            fn from(value: $from_err) -> SuiteError {
                SuiteError {
                    payload: SuiteErrorPayload::$variant(value),
                }
            }
        }
    };
}

conv!(Config, ConfigError);
conv!(Command, CommandError);
conv!(History, HistoryError);

impl SuiteError {
    pub fn invalid_directory(path: impl Into<PathBuf>) -> Self {
        SuiteError {
            payload: SuiteErrorPayload::InvalidDirectory(path.into()),
        }
    }

    pub fn no_tests() -> Self {
        SuiteError {
            payload: SuiteErrorPayload::NoTests,
        }
    }

    pub fn selection(message: impl Into<String>) -> Self {
        SuiteError {
            payload: SuiteErrorPayload::Selection(message.into()),
        }
    }

    pub fn version_control(repo: impl Into<String>, reason: impl Into<String>) -> Self {
        SuiteError {
            payload: SuiteErrorPayload::VersionControl {
                repo: repo.into(),
                reason: reason.into(),
            },
        }
    }

    pub fn tool_build(tool: impl Into<String>) -> Self {
        SuiteError {
            payload: SuiteErrorPayload::ToolBuild { tool: tool.into() },
        }
    }

    pub fn missing_benchmarks(path: impl Into<PathBuf>) -> Self {
        SuiteError {
            payload: SuiteErrorPayload::MissingBenchmarks(path.into()),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SuiteError {
            payload: SuiteErrorPayload::Io {
                path: path.into(),
                source,
            },
        }
    }

    /// Was the suite rejected because nothing was selected to run?
    pub fn is_no_tests(&self) -> bool {
        self.payload.is_no_tests()
    }

    /// Was the suite rejected because its configuration is invalid?
    pub fn is_config(&self) -> bool {
        self.payload.is_config()
    }
}

/// The stage of the per-test lifecycle at which a test was abandoned.
#[derive(Copy, Clone, Debug, Eq, PartialEq, derive_more::Display)]
pub enum Stage {
    #[display(fmt = "build")]
    Build,
    #[display(fmt = "staging")]
    Staging,
    #[display(fmt = "run")]
    Run,
    #[display(fmt = "restart")]
    Restart,
    #[display(fmt = "benchmark update")]
    BenchmarkStore,
}

/// A failure which ends one test but lets the suite continue.
///
/// The message is what ends up on the status record, so it should name the file or command involved.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {message}")]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        StageError {
            stage,
            message: message.into(),
        }
    }
}

pub type Result<T, E = SuiteError> = std::result::Result<T, E>;
