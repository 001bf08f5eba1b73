//! Regression testing for AMReX-based simulation codes.
//!
//! A suite file names the repositories under test and a list of tests.  A run brings the repositories up to date,
//! then builds, runs, and checks each selected test against its stored benchmark, and writes what happened as status
//! files and a summary that the web pages are made from.  See [suite::Suite] for the entry point and
//! [lifecycle::Orchestrator] for what happens to a single test.
pub mod benchmark;
pub mod collaborators;
pub mod compare;
pub mod config;
pub mod discovery;
pub mod error;
pub mod flags;
pub mod history;
pub mod layout;
pub mod lifecycle;
pub mod model;
pub mod process;
pub mod report;
pub mod reporter;
pub mod selection;
pub mod status;
pub mod suite;

pub use config::SuiteConfig;
pub use error::{Result, SuiteError};
pub use suite::{RunOptions, RunOptionsBuilder, Suite, SuiteOutcome};
