//! Approval and execution state machines

use super::EngineError;
use crate::mapper::{ExecutionMode, MappedCommand};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    AutoApproved,
    Rejected,
}

impl ApprovalStatus {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalStatus::Approved | ApprovalStatus::AutoApproved)
    }

    /// Decisions are final: only `Pending` may move, and only to a decided state
    pub fn can_transition_to(&self, next: ApprovalStatus) -> bool {
        match (self, next) {
            (ApprovalStatus::Pending, ApprovalStatus::Pending) => false,
            (ApprovalStatus::Pending, _) => true,
            (ApprovalStatus::Approved, _)
            | (ApprovalStatus::AutoApproved, _)
            | (ApprovalStatus::Rejected, _) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    /// Only used by nested rollback results
    Rollback,
    RollbackCompleted,
    RollbackFailed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Timeout
                | ExecutionStatus::Cancelled
                | ExecutionStatus::RollbackCompleted
                | ExecutionStatus::RollbackFailed
        )
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Cancelled) => true,
            (Running, Completed) | (Running, Failed) | (Running, Timeout) | (Running, Cancelled) => true,
            (Rollback, RollbackCompleted) | (Rollback, RollbackFailed) => true,
            (Pending, _) | (Running, _) | (Rollback, _) => false,
            (Completed, _) | (Failed, _) | (Timeout, _) | (Cancelled, _) => false,
            (RollbackCompleted, _) | (RollbackFailed, _) => false,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Timeout => "TIMEOUT",
            ExecutionStatus::Cancelled => "CANCELLED",
            ExecutionStatus::Rollback => "ROLLBACK",
            ExecutionStatus::RollbackCompleted => "ROLLBACK_COMPLETED",
            ExecutionStatus::RollbackFailed => "ROLLBACK_FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one command run; immutable once terminal
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub command_id: String,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub rollback: Option<Box<ExecutionResult>>,
}

impl ExecutionResult {
    pub fn pending(command_id: impl Into<String>) -> Self {
        Self::with_status(command_id, ExecutionStatus::Pending)
    }

    pub fn rollback(command_id: impl Into<String>) -> Self {
        let mut r = Self::with_status(command_id, ExecutionStatus::Rollback);
        r.started_at = Some(Utc::now());
        r
    }

    fn with_status(command_id: impl Into<String>, status: ExecutionStatus) -> Self {
        Self {
            command_id: command_id.into(),
            status,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            started_at: None,
            finished_at: None,
            error: None,
            rollback: None,
        }
    }

    /// Validated transition; stamps start and end times
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                id: self.command_id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        if next == ExecutionStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(s), Some(e)) => Some((e - s).num_milliseconds()),
            _ => None,
        }
    }
}

/// Engine-side wrapper around a submitted command
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub command: MappedCommand,
    pub approval: ApprovalStatus,
    pub approved_by: Option<String>,
    pub approval_reason: Option<String>,
    pub approval_time: Option<DateTime<Utc>>,
    /// Tracked only; the engine never retries on its own
    pub retry_count: u32,
    pub dependencies_met: bool,
    pub conditions_met: bool,
    /// Operator release for manual-mode commands
    pub released: bool,
    pub submitted_at: DateTime<Utc>,
    pub result: ExecutionResult,
}

impl ExecutionContext {
    pub fn new(command: MappedCommand) -> Self {
        let result = ExecutionResult::pending(command.id());
        Self {
            command,
            approval: ApprovalStatus::Pending,
            approved_by: None,
            approval_reason: None,
            approval_time: None,
            retry_count: 0,
            dependencies_met: false,
            conditions_met: false,
            released: false,
            submitted_at: Utc::now(),
            result,
        }
    }

    pub fn transition_approval(
        &mut self,
        next: ApprovalStatus,
        user: &str,
        reason: &str,
    ) -> Result<(), EngineError> {
        if !self.approval.can_transition_to(next) {
            return Err(EngineError::AlreadyDecided {
                id: self.command.id().to_string(),
                status: self.approval,
            });
        }
        self.approval = next;
        self.approved_by = Some(user.to_string());
        self.approval_reason = Some(reason.to_string());
        self.approval_time = Some(Utc::now());
        Ok(())
    }

    /// Approved, not started, gates satisfied, and not waiting on an operator
    pub fn is_ready(&self) -> bool {
        self.approval.is_approved()
            && self.result.status == ExecutionStatus::Pending
            && (self.command.mode() != ExecutionMode::Manual || self.released)
            && self.dependencies_met
            && self.conditions_met
    }
}
