/// The states a test passes through.  A test only moves forward; the trace of states it visited ends up in its status
/// record.
#[derive(Copy, Clone, Debug, Eq, PartialEq, derive_more::Display, derive_more::IsVariant)]
pub enum LifecycleState {
    #[display(fmt = "PENDING")]
    Pending,
    #[display(fmt = "BUILDING")]
    Building,
    #[display(fmt = "FAILED_BUILD")]
    FailedBuild,
    #[display(fmt = "BUILT")]
    Built,
    #[display(fmt = "STAGING")]
    Staging,
    #[display(fmt = "FAILED_STAGE")]
    FailedStage,
    #[display(fmt = "STAGED")]
    Staged,
    #[display(fmt = "RUNNING")]
    Running,
    #[display(fmt = "CRASHED")]
    Crashed,
    #[display(fmt = "RAN")]
    Ran,
    #[display(fmt = "FAILED_RUN")]
    FailedRun,
    #[display(fmt = "RESTARTING")]
    Restarting,
    #[display(fmt = "RESTAGE")]
    Restage,
    #[display(fmt = "RERUNNING")]
    Rerunning,
    #[display(fmt = "FAILED_RESTART")]
    FailedRestart,
    #[display(fmt = "COMPARING")]
    Comparing,
    #[display(fmt = "STORING_BENCHMARK")]
    StoringBenchmark,
    #[display(fmt = "FAILED_COMPARE")]
    FailedCompare,
    #[display(fmt = "PASSED")]
    Passed,
    #[display(fmt = "PASSED_SLOWLY")]
    PassedSlowly,
    #[display(fmt = "ANALYSING")]
    Analysing,
    #[display(fmt = "ARCHIVING")]
    Archiving,
    #[display(fmt = "REPORTED")]
    Reported,
}

impl LifecycleState {
    /// States after which nothing but archiving and reporting happens.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            LifecycleState::FailedBuild
                | LifecycleState::FailedStage
                | LifecycleState::FailedRun
                | LifecycleState::FailedRestart
        )
    }
}

/// The ordered record of states a test went through.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LifecycleTrace {
    states: Vec<LifecycleState>,
}

impl LifecycleTrace {
    pub fn new() -> Self {
        LifecycleTrace {
            states: vec![LifecycleState::Pending],
        }
    }

    pub fn enter(&mut self, test: &str, state: LifecycleState) {
        log::debug!("{test}: {state}");
        self.states.push(state);
    }

    pub fn current(&self) -> LifecycleState {
        self.states
            .last()
            .copied()
            .unwrap_or(LifecycleState::Pending)
    }

    pub fn visited(&self, state: LifecycleState) -> bool {
        self.states.contains(&state)
    }

    pub fn states(&self) -> &[LifecycleState] {
        &self.states
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.states.iter().map(|s| s.to_string()).collect()
    }
}
