//! Decision policy: auto-execute gate, reasoning, risk assessment, recommendations

use super::{AgentConfig, AgentMode};
use crate::mapper::MappedCommand;
use crate::{Finding, RiskLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const MAX_RECOMMENDATIONS: usize = 10;
/// Below this the risk assessment flags the decision's confidence
pub const LOW_CONFIDENCE: f64 = 0.8;

/// Highest finding risk the agent will act on by itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskTolerance {
    pub fn permits(&self, risk: RiskLevel) -> bool {
        match self {
            RiskTolerance::Low => matches!(risk, RiskLevel::Info | RiskLevel::Low),
            RiskTolerance::Medium => risk != RiskLevel::Critical,
            RiskTolerance::High => true,
        }
    }
}

pub fn should_auto_execute(
    mode: AgentMode,
    finding: &Finding,
    commands: &[MappedCommand],
    config: &AgentConfig,
) -> bool {
    mode == AgentMode::Auto
        && finding.confidence >= config.auto_execute_threshold
        && !commands.iter().any(|c| c.risk_level().is_severe())
        && !commands
            .iter()
            .any(|c| c.requires_sudo() && c.risk_level() != RiskLevel::Low)
        && config.risk_tolerance.permits(finding.risk_level)
}

pub fn reasoning(finding: &Finding, commands: &[MappedCommand], mode: AgentMode) -> String {
    let mut parts = vec![
        format!("Analysis: {}", finding.summary),
        format!("Risk level: {}", finding.risk_level),
        format!("Confidence: {:.2}", finding.confidence),
    ];
    if commands.is_empty() {
        parts.push("No suitable response command found".to_string());
    } else {
        let categories: BTreeSet<String> = commands.iter().map(|c| c.category().to_string()).collect();
        parts.push(format!(
            "Proposing {} command(s): {}",
            commands.len(),
            categories.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }
    parts.push(
        match mode {
            AgentMode::Auto => "Auto mode: high-confidence responses run automatically",
            AgentMode::SemiAuto => "Semi-auto mode: execution requires human approval",
            AgentMode::Learning => "Learning mode: observing only",
            AgentMode::Passive => "Passive mode: analysis only",
        }
        .to_string(),
    );
    parts.join("; ")
}

pub fn assess_risk(finding: &Finding, commands: &[MappedCommand]) -> String {
    let mut factors = Vec::new();
    if finding.risk_level.is_severe() {
        factors.push(format!("threat risk {}", finding.risk_level.as_str()));
    }
    let severe = commands.iter().filter(|c| c.risk_level().is_severe()).count();
    if severe > 0 {
        factors.push(format!("{} high-risk command(s)", severe));
    }
    let elevated = commands.iter().filter(|c| c.requires_sudo()).count();
    if elevated > 0 {
        factors.push(format!("{} command(s) need elevated privileges", elevated));
    }
    if finding.confidence < LOW_CONFIDENCE {
        factors.push(format!("low confidence {:.2}", finding.confidence));
    }

    if factors.is_empty() {
        "Low-risk decision".to_string()
    } else {
        format!("Risk factors: {}", factors.join("; "))
    }
}

pub fn recommended_actions(finding: &Finding, commands: &[MappedCommand]) -> Vec<String> {
    let mut actions = finding.remediation_steps.clone();
    for cmd in commands {
        let label = if cmd.priority().is_severe() {
            "Execute now"
        } else {
            "Consider"
        };
        actions.push(format!("{}: {}", label, cmd.description()));
    }
    if finding.risk_level.is_severe() {
        actions.push("Increase monitoring of the affected systems and network".to_string());
        actions.push("Notify the security team for manual investigation".to_string());
    }
    actions.truncate(MAX_RECOMMENDATIONS);
    actions
}
