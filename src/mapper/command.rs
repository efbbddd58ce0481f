//! Mapped command data contract

use super::safety::SafetyChecker;
use super::MappingError;
use crate::RiskLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Command category, mirrors the template catalog grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCategory {
    Process,
    Network,
    Firewall,
    File,
    Backup,
    Service,
    Monitoring,
    Log,
    Notification,
    Custom,
}

impl std::fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandCategory::Process => "process",
            CommandCategory::Network => "network",
            CommandCategory::Firewall => "firewall",
            CommandCategory::File => "file",
            CommandCategory::Backup => "backup",
            CommandCategory::Service => "service",
            CommandCategory::Monitoring => "monitoring",
            CommandCategory::Log => "log",
            CommandCategory::Notification => "notification",
            CommandCategory::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

/// Dispatch priority. Ordered so that `Critical` is the greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn from_risk(risk: RiskLevel) -> Self {
        match risk {
            RiskLevel::Critical => Priority::Critical,
            RiskLevel::High => Priority::High,
            RiskLevel::Medium => Priority::Medium,
            RiskLevel::Low => Priority::Low,
            RiskLevel::Info => Priority::Info,
        }
    }

    /// Queue rank: critical=1 ... info=5
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 1,
            Priority::High => 2,
            Priority::Medium => 3,
            Priority::Low => 4,
            Priority::Info => 5,
        }
    }

    /// Sort weight: critical=5 ... info=1
    pub fn weight(&self) -> u8 {
        6 - self.rank()
    }

    pub fn is_severe(&self) -> bool {
        matches!(self, Priority::High | Priority::Critical)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Info => write!(f, "info"),
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Immediate,
    Scheduled,
    Manual,
    Conditional,
}

impl ExecutionMode {
    pub fn weight(&self) -> u8 {
        match self {
            ExecutionMode::Immediate => 4,
            ExecutionMode::Conditional => 3,
            ExecutionMode::Scheduled => 2,
            ExecutionMode::Manual => 1,
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Immediate => write!(f, "immediate"),
            ExecutionMode::Scheduled => write!(f, "scheduled"),
            ExecutionMode::Manual => write!(f, "manual"),
            ExecutionMode::Conditional => write!(f, "conditional"),
        }
    }
}

/// A check against a finished process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Criterion {
    ExitCodeZero,
    NoStderr,
    StdoutContains(String),
    StderrContains(String),
}

impl Criterion {
    pub fn holds(&self, exit_code: Option<i32>, stdout: &str, stderr: &str) -> bool {
        match self {
            Criterion::ExitCodeZero => exit_code == Some(0),
            Criterion::NoStderr => stderr.trim().is_empty(),
            Criterion::StdoutContains(s) => stdout.contains(s.as_str()),
            Criterion::StderrContains(s) => stderr.contains(s.as_str()),
        }
    }
}

/// A concrete, safety-checked command.
///
/// The command and rollback strings can only be set through constructors
/// that run a [`SafetyChecker`], so every instance in circulation has passed it.
#[derive(Debug, Clone, Serialize)]
pub struct MappedCommand {
    id: String,
    template: String,
    category: CommandCategory,
    priority: Priority,
    mode: ExecutionMode,
    command: String,
    description: String,
    risk_level: RiskLevel,
    requires_sudo: bool,
    timeout_secs: u64,
    rollback: Option<String>,
    conditions: Vec<String>,
    dependencies: Vec<String>,
    success_criteria: Vec<Criterion>,
    failure_criteria: Vec<Criterion>,
    created_at: DateTime<Utc>,
}

impl MappedCommand {
    /// Build a command after checking `command` with `checker`.
    ///
    /// Defaults: medium priority, manual mode, no elevation, 60s timeout,
    /// success when the exit code is zero.
    pub fn new(
        checker: &SafetyChecker,
        template: impl Into<String>,
        category: CommandCategory,
        command: impl Into<String>,
        risk_level: RiskLevel,
    ) -> Result<Self, MappingError> {
        let template = template.into();
        let command = command.into();
        checker.check(&command)?;

        let now = Utc::now();
        Ok(Self {
            id: generate_id(&template, now),
            template,
            category,
            priority: Priority::Medium,
            mode: ExecutionMode::Manual,
            command,
            description: String::new(),
            risk_level,
            requires_sudo: false,
            timeout_secs: 60,
            rollback: None,
            conditions: Vec::new(),
            dependencies: Vec::new(),
            success_criteria: vec![Criterion::ExitCodeZero],
            failure_criteria: Vec::new(),
            created_at: now,
        })
    }

    /// Attach a rollback command; it must pass the same checker.
    pub fn with_rollback(
        mut self,
        checker: &SafetyChecker,
        rollback: impl Into<String>,
    ) -> Result<Self, MappingError> {
        let rollback = rollback.into();
        checker.check(&rollback)?;
        self.rollback = Some(rollback);
        Ok(self)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_sudo(mut self, requires_sudo: bool) -> Self {
        self.requires_sudo = requires_sudo;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<String>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_criteria(mut self, success: Vec<Criterion>, failure: Vec<Criterion>) -> Self {
        self.success_criteria = success;
        self.failure_criteria = failure;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn category(&self) -> CommandCategory {
        self.category
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn requires_sudo(&self) -> bool {
        self.requires_sudo
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn rollback(&self) -> Option<&str> {
        self.rollback.as_deref()
    }

    pub fn conditions(&self) -> &[String] {
        &self.conditions
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn success_criteria(&self) -> &[Criterion] {
        &self.success_criteria
    }

    pub fn failure_criteria(&self) -> &[Criterion] {
        &self.failure_criteria
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Every success criterion holds and no failure criterion does
    pub fn criteria_met(&self, exit_code: Option<i32>, stdout: &str, stderr: &str) -> bool {
        self.success_criteria
            .iter()
            .all(|c| c.holds(exit_code, stdout, stderr))
            && !self
                .failure_criteria
                .iter()
                .any(|c| c.holds(exit_code, stdout, stderr))
    }
}

fn generate_id(template: &str, now: DateTime<Utc>) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", template, now.format("%Y%m%d_%H%M%S_%6f"), &uuid[..8])
}
