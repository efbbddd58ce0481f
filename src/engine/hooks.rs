//! Engine callback hooks

use super::audit::AuditEntry;
use super::state::{ExecutionContext, ExecutionStatus};
use crate::mapper::MappedCommand;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionTimeout,
    ExecutionCancelled,
    RollbackStarted,
    RollbackCompleted,
    RollbackFailed,
}

impl NotificationKind {
    pub fn for_status(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Pending | ExecutionStatus::Running => NotificationKind::ExecutionStarted,
            ExecutionStatus::Completed => NotificationKind::ExecutionCompleted,
            ExecutionStatus::Failed => NotificationKind::ExecutionFailed,
            ExecutionStatus::Timeout => NotificationKind::ExecutionTimeout,
            ExecutionStatus::Cancelled => NotificationKind::ExecutionCancelled,
            ExecutionStatus::Rollback => NotificationKind::RollbackStarted,
            ExecutionStatus::RollbackCompleted => NotificationKind::RollbackCompleted,
            ExecutionStatus::RollbackFailed => NotificationKind::RollbackFailed,
        }
    }
}

/// Execution lifecycle event
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub event_type: NotificationKind,
    pub command_id: String,
    pub status: ExecutionStatus,
    pub timestamp: DateTime<Utc>,
}

pub type ApprovalCallback =
    Arc<dyn Fn(&MappedCommand, &ExecutionContext) -> anyhow::Result<()> + Send + Sync>;
pub type NotificationCallback = Arc<dyn Fn(&Notification) -> anyhow::Result<()> + Send + Sync>;
pub type AuditCallback = Arc<dyn Fn(&AuditEntry) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct EngineHooks {
    pub approval: Vec<ApprovalCallback>,
    pub notification: Vec<NotificationCallback>,
    pub audit: Vec<AuditCallback>,
}
