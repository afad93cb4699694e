//! Outcomes of best-effort sub-steps and of a whole build.

use std::sync::Arc;

use anyhow::Result;
use camino::Utf8PathBuf;

use super::progress::{BuildEvent, BuildObserver};

/// Result of one named best-effort operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub name: String,
    /// Error text when the operation failed.
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Every best-effort operation attempted during one phase, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub phase: &'static str,
    pub steps: Vec<StepOutcome>,
}

impl StepReport {
    pub fn new(phase: &'static str) -> Self {
        Self {
            phase,
            steps: Vec::new(),
        }
    }

    pub fn outcome(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| !s.succeeded())
    }
}

/// Runs best-effort operations, recording each outcome and reporting
/// failures to the observer instead of propagating them.
pub struct BestEffort {
    observer: Arc<dyn BuildObserver>,
    report: StepReport,
}

impl BestEffort {
    pub fn new(phase: &'static str, observer: Arc<dyn BuildObserver>) -> Self {
        Self {
            observer,
            report: StepReport::new(phase),
        }
    }

    /// Runs `op`; returns true if it succeeded.
    pub fn attempt<F>(&mut self, name: impl Into<String>, op: F) -> bool
    where
        F: FnOnce() -> Result<()>,
    {
        let name = name.into();
        let error = op().err().map(|e| format!("{:#}", e));
        if let Some(ref message) = error {
            self.observer.notify(&BuildEvent::StepFailed {
                phase: self.report.phase,
                step: name.clone(),
                error: message.clone(),
            });
        }
        let succeeded = error.is_none();
        self.report.steps.push(StepOutcome { name, error });
        succeeded
    }

    pub fn finish(self) -> StepReport {
        self.report
    }
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub iso: Utf8PathBuf,
    pub reports: Vec<StepReport>,
}

impl BuildOutcome {
    /// Report of the given phase, if it ran best-effort operations.
    pub fn report(&self, phase: &str) -> Option<&StepReport> {
        self.reports.iter().find(|r| r.phase == phase)
    }

    /// All degraded sub-steps as `(phase, step)` pairs.
    pub fn degraded_steps(&self) -> Vec<(&'static str, &str)> {
        self.reports
            .iter()
            .flat_map(|r| r.failures().map(move |s| (r.phase, s.name.as_str())))
            .collect()
    }
}
