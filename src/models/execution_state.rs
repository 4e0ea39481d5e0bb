//! Execution status and failure taxonomy shared by every result row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status for DAG runs, operators, and artifacts.
///
/// Transitions are monotone forward: Registered -> Pending -> Running ->
/// {Succeeded, Failed, Canceled}. `Unknown` is reserved for rows whose
/// backing job can no longer be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Registered,
    Pending,
    Running,
    Canceled,
    Failed,
    Succeeded,
    Unknown,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Canceled | ExecutionStatus::Failed | ExecutionStatus::Succeeded
        )
    }
}

/// How a failure should propagate through the DAG.
///
/// `System` and `UserFatal` stop orchestration; `UserNonFatal` (for example a
/// warning-severity check that did not pass) lets the run continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    System,
    UserFatal,
    UserNonFatal,
}

impl FailureType {
    pub fn stops_execution(self) -> bool {
        !matches!(self, FailureType::UserNonFatal)
    }
}

/// Error payload attached to a failed execution state.
///
/// `context` is the raw detail (worker traceback, backend response);
/// `tip` is the message shown to the operator's author.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecError {
    pub context: String,
    pub tip: String,
}

impl ExecError {
    pub fn new(context: impl Into<String>, tip: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            tip: tip.into(),
        }
    }
}

/// Tip attached when the engine itself hit an unexpected condition.
pub const TIP_UNKNOWN_INTERNAL: &str =
    "An unexpected error occurred within the orchestration engine. Please contact support.";

/// Timestamps recorded as the state machine advances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTimestamps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Full execution state persisted as a JSON blob on every result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<FailureType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_logs: Vec<String>,
    #[serde(default)]
    pub timestamps: ExecutionTimestamps,
}

impl ExecutionState {
    pub fn registered() -> Self {
        Self {
            status: ExecutionStatus::Registered,
            failure_type: None,
            error: None,
            user_logs: Vec::new(),
            timestamps: ExecutionTimestamps {
                registered_at: Some(Utc::now()),
                ..Default::default()
            },
        }
    }

    pub fn pending() -> Self {
        let mut state = Self::registered();
        state.status = ExecutionStatus::Pending;
        state.timestamps.pending_at = Some(Utc::now());
        state
    }

    pub fn running(&mut self) {
        self.status = ExecutionStatus::Running;
        self.timestamps.running_at = Some(Utc::now());
    }

    pub fn succeeded(&mut self) {
        self.status = ExecutionStatus::Succeeded;
        self.timestamps.finished_at = Some(Utc::now());
    }

    pub fn canceled(&mut self) {
        self.status = ExecutionStatus::Canceled;
        self.timestamps.finished_at = Some(Utc::now());
    }

    pub fn failed(&mut self, failure_type: FailureType, error: ExecError) {
        self.status = ExecutionStatus::Failed;
        self.failure_type = Some(failure_type);
        self.error = Some(error);
        self.timestamps.finished_at = Some(Utc::now());
    }

    /// System failure raised by the engine rather than user code.
    pub fn system_failure(context: impl Into<String>) -> Self {
        let mut state = Self::pending();
        state.failed(
            FailureType::System,
            ExecError::new(context, TIP_UNKNOWN_INTERNAL),
        );
        state
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when this state must halt the rest of the DAG.
    pub fn blocks_execution(&self) -> bool {
        self.status == ExecutionStatus::Failed
            && self
                .failure_type
                .map(FailureType::stops_execution)
                .unwrap_or(true)
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::registered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Canceled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
    }

    #[test]
    fn non_fatal_failure_does_not_block() {
        let mut state = ExecutionState::pending();
        state.failed(FailureType::UserNonFatal, ExecError::default());
        assert!(state.is_terminal());
        assert!(!state.blocks_execution());

        let mut fatal = ExecutionState::pending();
        fatal.failed(FailureType::UserFatal, ExecError::default());
        assert!(fatal.blocks_execution());
    }

    #[test]
    fn state_round_trips_through_json() {
        let state = ExecutionState::system_failure("boom");
        let raw = serde_json::to_string(&state).unwrap();
        let back: ExecutionState = serde_json::from_str(&raw).unwrap();
        assert_eq!(state, back);
    }
}
