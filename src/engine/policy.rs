//! Auto-approval policy

use super::EngineConfig;
use crate::mapper::{MappedCommand, Priority};
use crate::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    AutoApprove(&'static str),
    RequireApproval(&'static str),
}

impl PolicyDecision {
    pub fn is_auto(&self) -> bool {
        matches!(self, PolicyDecision::AutoApprove(_))
    }

    pub fn reason(&self) -> &'static str {
        match self {
            PolicyDecision::AutoApprove(r) | PolicyDecision::RequireApproval(r) => r,
        }
    }
}

/// Evaluated top to bottom; the elevation rule overrides every approval rule
pub fn evaluate(config: &EngineConfig, cmd: &MappedCommand) -> PolicyDecision {
    if cmd.requires_sudo() && cmd.risk_level() != RiskLevel::Low {
        return PolicyDecision::RequireApproval("elevated command above low risk");
    }
    if cmd.risk_level() == RiskLevel::Low && config.auto_approve_low_risk {
        return PolicyDecision::AutoApprove("low risk");
    }
    if cmd.priority() == Priority::Info && config.auto_approve_info {
        return PolicyDecision::AutoApprove("informational priority");
    }
    if cmd.priority().is_severe() && config.require_approval_high_risk {
        return PolicyDecision::RequireApproval("high priority requires approval");
    }
    if cmd.risk_level().is_severe() && config.require_approval_critical {
        return PolicyDecision::RequireApproval("high risk requires approval");
    }
    PolicyDecision::AutoApprove("no approval rule applies")
}
