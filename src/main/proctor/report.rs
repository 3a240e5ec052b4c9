//! The outcome of a run, and its rendering as a human-readable report.

use std::fmt;
use std::fmt::Write;

use crate::scenario::{Failure, FailureKind, MatchOutcome};

/// The overall outcome of a run. Each verdict has its own closing line in the report.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    AllPassed,
    /// Some event failed without the handler crashing.
    Failed,
    /// The handler crashed while events were still pending.
    Crashed,
    /// Every event passed, but the handler crashed afterwards.
    CrashedAfterCompletion,
    /// Every event passed, but the handler did something unexpected afterwards.
    Unexpected,
}

impl Verdict {
    fn summary(&self) -> &'static str {
        match self {
            Self::AllPassed => "All tests passed!",
            Self::Failed => "Some tests failed. See the failures above for details.",
            Self::Crashed => {
                "Your code crashed before I could run all the tests. The error is shown above."
            }
            Self::CrashedAfterCompletion => {
                "Every test passed, but your code crashed afterwards. The error is shown above."
            }
            Self::Unexpected => {
                "Your code didn't crash, but something unexpected happened. \
                 You may want to run with a lower log level to see what happened."
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventResult {
    pub description: String,
    /// What the event expected, for diagnostics.
    pub expected: String,
    pub outcome: MatchOutcome,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub passed: usize,
    pub failed: usize,
    pub not_attempted: usize,
}

/// Everything that happened during one run of a scenario.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionResult {
    pub scenario: String,
    /// One entry per scenario event, in scenario order.
    pub events: Vec<EventResult>,
    /// Problems not tied to any event, such as output after the scenario completed.
    pub anomalies: Vec<Failure>,
}

impl ExecutionResult {
    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for event in &self.events {
            match event.outcome {
                MatchOutcome::Passed => counts.passed += 1,
                MatchOutcome::Failed(_) => counts.failed += 1,
                MatchOutcome::NotAttempted => counts.not_attempted += 1,
            }
        }
        counts
    }

    pub fn verdict(&self) -> Verdict {
        let is_crash = |f: &Failure| f.kind == FailureKind::HandlerCrash;
        let mut event_failures = self.events.iter().filter_map(|e| e.outcome.failure());

        if event_failures.any(is_crash) {
            Verdict::Crashed
        } else if self.events.iter().any(|e| !e.outcome.is_passed()) {
            Verdict::Failed
        } else if self.anomalies.iter().any(is_crash) {
            Verdict::CrashedAfterCompletion
        } else if !self.anomalies.is_empty() {
            Verdict::Unexpected
        } else {
            Verdict::AllPassed
        }
    }

    /// Every failure recorded for this run, event failures first.
    pub fn failures(&self) -> impl Iterator<Item = &Failure> + '_ {
        self.events
            .iter()
            .filter_map(|e| e.outcome.failure())
            .chain(self.anomalies.iter())
    }

    pub fn crashed(&self) -> bool {
        self.failures().any(|f| f.kind == FailureKind::HandlerCrash)
    }

    /// The full report. Rendering does not depend on anything but `self`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        // writing to a String can't fail
        let _ = self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) -> fmt::Result {
        let counts = self.counts();
        writeln!(
            out,
            "Results for test scenario {}: {} passed, {} failed, {} not attempted",
            self.scenario, counts.passed, counts.failed, counts.not_attempted
        )?;

        let numbered = |outcome: fn(&MatchOutcome) -> bool| {
            self.events
                .iter()
                .enumerate()
                .filter(move |(_, e)| outcome(&e.outcome))
        };

        if counts.passed > 0 {
            writeln!(out, "\nPassed:")?;
            for (i, event) in numbered(|o| matches!(o, MatchOutcome::Passed)) {
                writeln!(out, "{:<3} {}", i + 1, event.description)?;
            }
        }

        if counts.failed > 0 {
            writeln!(out, "\nFailed:")?;
            for (_, event) in numbered(|o| matches!(o, MatchOutcome::Failed(_))) {
                writeln!(out, "    {}", event.description)?;
                if let Some(failure) = event.outcome.failure() {
                    for line in failure.message.lines() {
                        writeln!(out, "        {line}")?;
                    }
                }
                writeln!(out, "        Expected event: {}", event.expected)?;
            }
        }

        if counts.not_attempted > 0 {
            writeln!(out, "\nNot attempted (couldn't test because of prior failure):")?;
            for (i, event) in numbered(|o| matches!(o, MatchOutcome::NotAttempted)) {
                writeln!(out, "{:<3} {}", i + 1, event.description)?;
            }
        }

        if !self.anomalies.is_empty() {
            writeln!(out, "\nAfter all events completed:")?;
            for anomaly in &self.anomalies {
                for line in anomaly.message.lines() {
                    writeln!(out, "    {line}")?;
                }
            }
        }

        writeln!(out)?;
        writeln!(out, "{}", self.verdict().summary())
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
