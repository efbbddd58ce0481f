//! Hash-chained audit trail

use crate::history::RingBuffer;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    CommandSubmitted,
    CommandAutoApproved,
    CommandApproved,
    CommandRejected,
    CommandReleased,
    CommandCancelRequested,
    CommandStarted,
    CommandCompleted,
    CommandFailed,
    CommandTimeout,
    CommandCancelled,
    RollbackStarted,
    RollbackCompleted,
    RollbackFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CommandSubmitted => "COMMAND_SUBMITTED",
            AuditAction::CommandAutoApproved => "COMMAND_AUTO_APPROVED",
            AuditAction::CommandApproved => "COMMAND_APPROVED",
            AuditAction::CommandRejected => "COMMAND_REJECTED",
            AuditAction::CommandReleased => "COMMAND_RELEASED",
            AuditAction::CommandCancelRequested => "COMMAND_CANCEL_REQUESTED",
            AuditAction::CommandStarted => "COMMAND_STARTED",
            AuditAction::CommandCompleted => "COMMAND_COMPLETED",
            AuditAction::CommandFailed => "COMMAND_FAILED",
            AuditAction::CommandTimeout => "COMMAND_TIMEOUT",
            AuditAction::CommandCancelled => "COMMAND_CANCELLED",
            AuditAction::RollbackStarted => "ROLLBACK_STARTED",
            AuditAction::RollbackCompleted => "ROLLBACK_COMPLETED",
            AuditAction::RollbackFailed => "ROLLBACK_FAILED",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub command_id: String,
    pub details: serde_json::Value,
    pub prev_hash: String,
    pub hash: String,
}

impl AuditEntry {
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(self.timestamp.timestamp_micros().to_be_bytes());
        hasher.update(self.action.as_str().as_bytes());
        hasher.update(self.command_id.as_bytes());
        hasher.update(self.details.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Issues entries with strictly increasing timestamps and a SHA-256 chain
pub struct AuditTrail {
    sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
    last_hash: String,
    recent: RingBuffer<AuditEntry>,
}

impl AuditTrail {
    pub fn new(capacity: usize) -> Self {
        Self {
            sequence: 0,
            last_timestamp: None,
            last_hash: GENESIS_HASH.to_string(),
            recent: RingBuffer::new(capacity),
        }
    }

    pub fn record(
        &mut self,
        action: AuditAction,
        command_id: &str,
        details: serde_json::Value,
    ) -> AuditEntry {
        // microsecond precision, bumped on clock ties or a clock going backwards
        let mut timestamp =
            DateTime::<Utc>::from_timestamp_micros(Utc::now().timestamp_micros()).unwrap_or_else(Utc::now);
        if let Some(last) = self.last_timestamp {
            if timestamp <= last {
                timestamp = last + Duration::microseconds(1);
            }
        }

        self.sequence += 1;
        let mut entry = AuditEntry {
            sequence: self.sequence,
            timestamp,
            action,
            command_id: command_id.to_string(),
            details,
            prev_hash: self.last_hash.clone(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();

        self.last_timestamp = Some(timestamp);
        self.last_hash = entry.hash.clone();
        self.recent.push(entry.clone());
        entry
    }

    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.recent.recent(limit)
    }

    pub fn len(&self) -> u64 {
        self.sequence
    }

    pub fn is_empty(&self) -> bool {
        self.sequence == 0
    }
}

/// Check that entries (oldest first) link up and hash correctly
pub fn verify_chain(entries: &[AuditEntry]) -> bool {
    let mut prev: Option<&AuditEntry> = None;
    for entry in entries {
        if entry.compute_hash() != entry.hash {
            return false;
        }
        if let Some(p) = prev {
            if entry.prev_hash != p.hash || entry.timestamp <= p.timestamp || entry.sequence != p.sequence + 1 {
                return false;
            }
        }
        prev = Some(entry);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timestamps_strictly_increase() {
        let mut trail = AuditTrail::new(100);
        let entries: Vec<_> = (0..50)
            .map(|i| trail.record(AuditAction::CommandSubmitted, &format!("c{}", i), json!({})))
            .collect();
        for pair in entries.windows(2) {
            assert!(pair[1].timestamp > pair[0].timestamp);
        }
        assert_eq!(entries[0].prev_hash, GENESIS_HASH);
        assert!(verify_chain(&entries));
    }

    #[test]
    fn test_tampering_detected() {
        let mut trail = AuditTrail::new(10);
        trail.record(AuditAction::CommandSubmitted, "a", json!({"x": 1}));
        trail.record(AuditAction::CommandApproved, "a", json!({"user": "ops"}));
        let mut entries = trail.recent(10);
        assert!(verify_chain(&entries));
        entries[1].details = json!({"user": "mallory"});
        assert!(!verify_chain(&entries));
    }
}
