//! Per-node results and the run report.

use futures::{Stream, StreamExt};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::error::ActionError;
use crate::model::{LifecycleState, Outputs};
use crate::planner::ActionType;

/// How a plan entry ended.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// The action completed; for no-ops, the recorded outputs.
    Succeeded {
        /// Outputs reported by the handler.
        outputs: Outputs,
    },
    /// The handler failed, panicked or could not be called.
    Failed {
        /// What went wrong.
        error: ActionError,
        /// The resource is best-effort; the run is not failed by it.
        tolerated: bool,
    },
    /// A prerequisite failed, so the action was never attempted.
    Blocked {
        /// Name of the failed entry this one transitively waits on.
        blocked_by: String,
    },
    /// The run was cancelled before the action started.
    Cancelled,
}

impl NodeOutcome {
    /// Short lowercase label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Blocked { .. } => "blocked",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true if the action completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded { .. } => write!(f, "succeeded"),
            Self::Failed {
                error,
                tolerated: true,
            } => write!(f, "failed (tolerated): {error}"),
            Self::Failed { error, .. } => write!(f, "failed: {error}"),
            Self::Blocked { blocked_by } => write!(f, "blocked by {blocked_by}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of one plan entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Resource name.
    pub name: String,
    /// Resource type.
    pub resource_type: String,
    /// Planned action.
    pub action: ActionType,
    /// Lifecycle state at the end of the run.
    pub state: LifecycleState,
    /// Outcome.
    pub outcome: NodeOutcome,
    /// Sanitized inputs the action was applied with (successful actions only).
    pub applied_inputs: Option<Outputs>,
    /// Time spent in the handler.
    pub duration: Duration,
}

/// Ledger of a finished run.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Results in the order they were produced.
    pub results: Vec<ExecutionResult>,
    /// Entries that succeeded, no-ops included.
    pub succeeded: usize,
    /// Entries that failed and were not best-effort.
    pub failed: usize,
    /// Best-effort entries that failed.
    pub tolerated: usize,
    /// Entries blocked by a failure.
    pub blocked: usize,
    /// Entries never started because of cancellation.
    pub cancelled: usize,
}

impl ApplyReport {
    /// Drains an apply stream into a report.
    pub async fn collect<S>(stream: S) -> Self
    where
        S: Stream<Item = ExecutionResult>,
    {
        let mut report = Self::default();
        let mut stream = std::pin::pin!(stream);
        while let Some(result) = stream.next().await {
            report.push(result);
        }
        report
    }

    /// Adds one result.
    pub fn push(&mut self, result: ExecutionResult) {
        match &result.outcome {
            NodeOutcome::Succeeded { .. } => self.succeeded += 1,
            NodeOutcome::Failed {
                tolerated: true, ..
            } => self.tolerated += 1,
            NodeOutcome::Failed { .. } => self.failed += 1,
            NodeOutcome::Blocked { .. } => self.blocked += 1,
            NodeOutcome::Cancelled => self.cancelled += 1,
        }
        self.results.push(result);
    }

    /// Returns the result for a resource.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// A run succeeds when nothing failed untolerated and nothing was cancelled.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    /// Number of results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if the plan had no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Names of entries that failed untolerated.
    #[must_use]
    pub fn failures(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, NodeOutcome::Failed { tolerated: false, .. }))
            .map(|r| r.name.as_str())
            .collect()
    }
}

/// Serializable summary used by `--json` output.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    /// Entries that succeeded.
    pub succeeded: usize,
    /// Entries that failed.
    pub failed: usize,
    /// Best-effort failures.
    pub tolerated: usize,
    /// Entries blocked by a failure.
    pub blocked: usize,
    /// Entries cancelled.
    pub cancelled: usize,
}

impl From<&ApplyReport> for ReportSummary {
    fn from(report: &ApplyReport) -> Self {
        Self {
            succeeded: report.succeeded,
            failed: report.failed,
            tolerated: report.tolerated,
            blocked: report.blocked,
            cancelled: report.cancelled,
        }
    }
}
