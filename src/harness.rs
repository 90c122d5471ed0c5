//! Statically registered synchronization scenarios and run accounting.
//!
//! Scenarios are plain function pointers in an explicit registry, and the
//! pass/fail/skip totals live in a [`RunStats`] value passed through the
//! run; there is no runtime discovery and no ambient global state.

/// Result of one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The scenario ran and every check held.
    Passed,
    /// The scenario ran and a check failed.
    Failed(String),
    /// The scenario did not apply and was skipped.
    Skipped(String),
}

/// A named scenario with a statically registered entry point.
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    /// Scenario name, used in logs and reports.
    pub name: &'static str,
    /// Entry point.
    pub run: fn() -> Outcome,
}

/// Explicit pass/fail/skip accumulator for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    passed: u32,
    failed: u32,
    skipped: u32,
}

impl RunStats {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one scenario's outcome, logging it.
    pub fn record(&mut self, name: &str, outcome: &Outcome) {
        match outcome {
            Outcome::Passed => {
                tracing::info!(scenario = name, "passed");
                self.passed += 1;
            }
            Outcome::Failed(reason) => {
                tracing::error!(scenario = name, %reason, "failed");
                self.failed += 1;
            }
            Outcome::Skipped(reason) => {
                tracing::warn!(scenario = name, %reason, "skipped");
                self.skipped += 1;
            }
        }
    }

    /// Number of scenarios that passed.
    #[must_use]
    pub const fn passed(&self) -> u32 {
        self.passed
    }

    /// Number of scenarios that failed.
    #[must_use]
    pub const fn failed(&self) -> u32 {
        self.failed
    }

    /// Number of scenarios that were skipped.
    #[must_use]
    pub const fn skipped(&self) -> u32 {
        self.skipped
    }

    /// Total number of scenarios recorded.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.passed + self.failed + self.skipped
    }

    /// Whether no scenario failed (skips do not count as failures).
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Run every registered scenario in order, recording into `stats`.
pub fn run_scenarios(scenarios: &[Scenario], stats: &mut RunStats) {
    for scenario in scenarios {
        tracing::info!(scenario = scenario.name, "running");
        let outcome = (scenario.run)();
        stats.record(scenario.name, &outcome);
    }
}
