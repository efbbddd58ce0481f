//! SQLite store for audit entries and decisions

use crate::agent::{Decision, DecisionCallback};
use crate::engine::audit::{self, AuditAction, AuditEntry};
use crate::engine::hooks::AuditCallback;
use chrono::SecondsFormat;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct Database {
    conn: Connection,
    /// Audit chains restart with every engine; entries are grouped per session
    session: String,
}

/// Decision row as stored
#[derive(Debug, Clone)]
pub struct StoredDecision {
    pub decision_id: String,
    pub timestamp: String,
    pub summary: String,
    pub risk_level: String,
    pub confidence: f64,
    pub auto_execute: bool,
    pub commands: usize,
}

impl Database {
    /// Open or create the database
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self::with_connection(conn);
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self::with_connection(conn);
        db.initialize()?;
        Ok(db)
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            session: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Initialize database schema
    fn initialize(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                action TEXT NOT NULL,
                command_id TEXT NOT NULL,
                details TEXT NOT NULL,
                prev_hash TEXT NOT NULL,
                hash TEXT NOT NULL,
                UNIQUE (session, sequence)
            );

            CREATE TABLE IF NOT EXISTS decisions (
                decision_id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                summary TEXT NOT NULL,
                risk_level TEXT NOT NULL,
                confidence REAL NOT NULL,
                auto_execute INTEGER NOT NULL,
                commands INTEGER NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_command ON audit_entries(command_id);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_entries(timestamp);
            CREATE INDEX IF NOT EXISTS idx_decisions_timestamp ON decisions(timestamp);
            "#,
        )?;

        info!("Database initialized");
        Ok(())
    }

    pub fn store_audit(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO audit_entries (session, sequence, timestamp, action, command_id, details, prev_hash, hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                self.session,
                entry.sequence as i64,
                entry.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                entry.action.as_str(),
                entry.command_id,
                entry.details.to_string(),
                entry.prev_hash,
                entry.hash,
            ],
        )?;
        Ok(())
    }

    pub fn store_decision(&self, decision: &Decision) -> anyhow::Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO decisions (decision_id, timestamp, summary, risk_level, confidence, auto_execute, commands, payload)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                decision.decision_id,
                decision.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                decision.finding.summary,
                decision.finding.risk_level.as_str(),
                decision.confidence,
                decision.auto_execute,
                decision.mapped_commands.len() as i64,
                serde_json::to_string(decision)?,
            ],
        )?;
        Ok(())
    }

    /// Most recent audit entries across sessions, oldest first
    pub fn recent_audit(&self, limit: usize) -> anyhow::Result<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT sequence, timestamp, action, command_id, details, prev_hash, hash
            FROM audit_entries
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;
        let mut entries: Vec<AuditEntry> = stmt
            .query_map([limit as i64], row_to_entry)?
            .filter_map(|r| r.ok())
            .flatten()
            .collect();
        entries.reverse();
        Ok(entries)
    }

    pub fn recent_decisions(&self, limit: usize) -> anyhow::Result<Vec<StoredDecision>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT decision_id, timestamp, summary, risk_level, confidence, auto_execute, commands
            FROM decisions
            ORDER BY timestamp DESC
            LIMIT ?1
            "#,
        )?;
        let decisions = stmt
            .query_map([limit as i64], |row| {
                Ok(StoredDecision {
                    decision_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    summary: row.get(2)?,
                    risk_level: row.get(3)?,
                    confidence: row.get(4)?,
                    auto_execute: row.get(5)?,
                    commands: row.get::<_, i64>(6)? as usize,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(decisions)
    }

    /// Re-verify the hash chain of every stored session
    pub fn verify_chain(&self) -> anyhow::Result<bool> {
        let sessions: Vec<String> = self
            .conn
            .prepare("SELECT DISTINCT session FROM audit_entries")?
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        let mut stmt = self.conn.prepare(
            r#"
            SELECT sequence, timestamp, action, command_id, details, prev_hash, hash
            FROM audit_entries
            WHERE session = ?1
            ORDER BY sequence
            "#,
        )?;
        for session in sessions {
            let rows = stmt
                .query_map([&session], row_to_entry)?
                .collect::<Result<Vec<_>, _>>()?;
            let total = rows.len();
            let entries: Vec<AuditEntry> = rows.into_iter().flatten().collect();
            if entries.len() != total || !audit::verify_chain(&entries) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Clean up old entries
    pub fn cleanup(&self, retention_days: u32) -> anyhow::Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days as i64);
        let cutoff = cutoff.to_rfc3339_opts(SecondsFormat::Micros, true);

        let audits = self
            .conn
            .execute("DELETE FROM audit_entries WHERE timestamp < ?1", [&cutoff])?;
        let decisions = self
            .conn
            .execute("DELETE FROM decisions WHERE timestamp < ?1", [&cutoff])?;

        info!("Cleaned up {} audit and {} decision records", audits, decisions);
        Ok(audits + decisions)
    }
}

/// `Ok(None)` for rows that no longer parse
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<AuditEntry>> {
    let sequence: i64 = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let action: String = row.get(2)?;
    let details: String = row.get(4)?;

    let Ok(timestamp) = chrono::DateTime::parse_from_rfc3339(&timestamp) else {
        return Ok(None);
    };
    let Some(action) = parse_action(&action) else {
        return Ok(None);
    };
    let Ok(details) = serde_json::from_str(&details) else {
        return Ok(None);
    };

    Ok(Some(AuditEntry {
        sequence: sequence as u64,
        timestamp: timestamp.with_timezone(&chrono::Utc),
        action,
        command_id: row.get(3)?,
        details,
        prev_hash: row.get(5)?,
        hash: row.get(6)?,
    }))
}

fn parse_action(s: &str) -> Option<AuditAction> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
}

/// Engine audit sink writing every entry to the store
pub fn audit_callback(db: Arc<Mutex<Database>>) -> AuditCallback {
    Arc::new(move |entry: &AuditEntry| -> anyhow::Result<()> {
        let db = db.lock().unwrap_or_else(|e| e.into_inner());
        db.store_audit(entry)
    })
}

/// Agent decision sink
pub fn decision_callback(db: Arc<Mutex<Database>>) -> DecisionCallback {
    Arc::new(move |decision: &Decision| -> anyhow::Result<()> {
        let db = db.lock().unwrap_or_else(|e| e.into_inner());
        db.store_decision(decision)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::audit::AuditTrail;
    use serde_json::json;

    #[test]
    fn test_audit_round_trip_keeps_chain() {
        let db = Database::open_in_memory().unwrap();
        let mut trail = AuditTrail::new(10);
        for action in [
            AuditAction::CommandSubmitted,
            AuditAction::CommandAutoApproved,
            AuditAction::CommandStarted,
            AuditAction::CommandCompleted,
        ] {
            let entry = trail.record(action, "log_incident_1", json!({ "n": 1 }));
            db.store_audit(&entry).unwrap();
        }

        let stored = db.recent_audit(10).unwrap();
        assert_eq!(stored, trail.recent(10));
        assert!(db.verify_chain().unwrap());
        assert_eq!(db.recent_audit(2).unwrap()[1].action, AuditAction::CommandCompleted);
    }

    #[test]
    fn test_tampered_row_fails_verification() {
        let db = Database::open_in_memory().unwrap();
        let mut trail = AuditTrail::new(10);
        for i in 0..3 {
            db.store_audit(&trail.record(AuditAction::CommandSubmitted, &format!("c{}", i), json!({})))
                .unwrap();
        }
        db.conn
            .execute("UPDATE audit_entries SET command_id = 'forged' WHERE sequence = 2", [])
            .unwrap();
        assert!(!db.verify_chain().unwrap());
    }

    #[test]
    fn test_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("responder.db");
        let db = Database::open(&path).unwrap();
        let mut trail = AuditTrail::new(4);
        db.store_audit(&trail.record(AuditAction::CommandSubmitted, "a", json!({}))).unwrap();
        drop(db);

        let reopened = Database::open(&path).unwrap();
        assert_eq!(reopened.recent_audit(10).unwrap().len(), 1);
        assert_eq!(reopened.cleanup(30).unwrap(), 0);
    }
}
