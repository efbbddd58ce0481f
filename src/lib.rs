//! Falco Responder Library
//!
//! Turns security findings into decisions, decisions into safe commands,
//! and commands into audited executions.

pub mod agent;
pub mod alerts;
pub mod config;
pub mod db;
pub mod engine;
pub mod history;
pub mod mapper;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk level of a finding or command
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Informational, just logged
    #[default]
    Info,
    Low,
    Medium,
    High,
    /// Critical, needs immediate response
    #[serde(alias = "severe")]
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 5] = [
        RiskLevel::Info,
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Info => "info",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// High or critical
    pub fn is_severe(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Info => write!(f, "INFO"),
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(RiskLevel::Info),
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" | "severe" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: Option<u32>,
    pub name: Option<String>,
    pub cmdline: Option<String>,
}

/// Network connection; `dest` is `host:port`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub dest: Option<String>,
    pub proto: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: Option<String>,
    pub permissions: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: Option<String>,
}

/// Entities a finding refers to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityContext {
    pub process: Option<ProcessInfo>,
    pub connection: Option<ConnectionInfo>,
    pub file: Option<FileInfo>,
    pub service: Option<ServiceInfo>,
}

/// A structured analysis result for one security event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default)]
    pub event_id: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub risk_level: RiskLevel,
    /// In [0, 1]
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub remediation_steps: Vec<String>,
    #[serde(default)]
    pub ioc_indicators: Vec<String>,
    #[serde(default)]
    pub context: EntityContext,
}

impl Finding {
    pub fn new(summary: impl Into<String>, risk_level: RiskLevel, confidence: f64) -> Self {
        Self {
            event_id: None,
            summary: summary.into(),
            risk_level,
            confidence: clamp_confidence(confidence),
            remediation_steps: Vec::new(),
            ioc_indicators: Vec::new(),
            context: EntityContext::default(),
        }
    }

    pub fn with_remediation(mut self, step: impl Into<String>) -> Self {
        self.remediation_steps.push(step.into());
        self
    }

    pub fn with_process(mut self, pid: u32, name: impl Into<String>) -> Self {
        self.context.process = Some(ProcessInfo {
            pid: Some(pid),
            name: Some(name.into()),
            cmdline: None,
        });
        self
    }

    pub fn with_connection(mut self, dest: impl Into<String>) -> Self {
        self.context.connection = Some(ConnectionInfo {
            dest: Some(dest.into()),
            proto: None,
            source: None,
        });
        self
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.context.file = Some(FileInfo {
            path: Some(path.into()),
            permissions: None,
        });
        self
    }

    pub fn with_service(mut self, name: impl Into<String>) -> Self {
        self.context.service = Some(ServiceInfo {
            name: Some(name.into()),
        });
        self
    }

    /// Clamp confidence into [0, 1]; NaN becomes 0
    pub fn normalize(&mut self) {
        self.confidence = clamp_confidence(self.confidence);
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Raw event handed to the analysis collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SecurityEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Wrap an already-analyzed finding
    pub fn from_finding(finding: &Finding) -> Self {
        let payload = serde_json::json!({ "finding": finding });
        let mut event = Self::new("finding", payload);
        if let Some(ref id) = finding.event_id {
            event.id = id.clone();
        }
        event
    }
}

/// Truncate to at most `max` bytes on a char boundary, appending "..."
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering_and_alias() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::Low > RiskLevel::Info);
        let parsed: RiskLevel = serde_json::from_str("\"severe\"").unwrap();
        assert_eq!(parsed, RiskLevel::Critical);
        assert_eq!("High".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert_eq!(RiskLevel::Medium.to_string(), "MEDIUM");
    }

    #[test]
    fn test_finding_confidence_clamped() {
        let f = Finding::new("x", RiskLevel::Low, 1.7);
        assert_eq!(f.confidence, 1.0);
        let mut f: Finding = serde_json::from_value(serde_json::json!({
            "summary": "y",
            "confidence": -0.3
        }))
        .unwrap();
        f.normalize();
        assert_eq!(f.confidence, 0.0);
        assert_eq!(f.risk_level, RiskLevel::Info);
    }

    #[test]
    fn test_truncate_char_boundary() {
        assert_eq!(truncate("héllo", 2), "h...");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
