//! Command Mapper
//!
//! Translates a [`Finding`] into an ordered list of sanitized, safety-checked
//! commands:
//! 1. keyword rules select templates, filled from the finding's entities
//! 2. labelled fragments in remediation text become manual custom commands
//! 3. an incident log entry (and an alert for severe findings) is always added

pub mod command;
pub mod rules;
pub mod safety;
pub mod templates;

use crate::history::RingBuffer;
use crate::{truncate, Finding, RiskLevel};
use chrono::{Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub use command::{CommandCategory, Criterion, ExecutionMode, MappedCommand, Priority};
pub use rules::{default_rules, MappingRule, RuleCategory};
pub use safety::{SafetyChecker, SafetyViolation};
pub use templates::{all_templates, CommandTemplate};

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("unknown template: {0}")]
    UnknownTemplate(String),
    #[error("missing parameter `{param}` for template {template}")]
    MissingParameter { template: String, param: String },
    #[error("unsafe command rejected: {0}")]
    Unsafe(#[from] SafetyViolation),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub max_commands: usize,
    pub max_command_length: usize,
    pub history_capacity: usize,
    pub quarantine_dir: String,
    pub backup_dir: String,
    pub log_service: String,
    pub log_since: String,
    pub logrotate_config: String,
    pub default_permissions: String,
    /// Added to the built-in denylist
    pub extra_denied: Vec<String>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            max_commands: 10,
            max_command_length: safety::DEFAULT_MAX_LENGTH,
            history_capacity: 1000,
            quarantine_dir: "/var/quarantine".to_string(),
            backup_dir: "/var/backups/security".to_string(),
            log_service: "falco".to_string(),
            log_since: "1 hour ago".to_string(),
            logrotate_config: "/etc/logrotate.conf".to_string(),
            default_permissions: "000".to_string(),
            extra_denied: Vec::new(),
        }
    }
}

/// Caller-supplied mapping context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingContext {
    /// Forces immediate mode for findings below high risk
    pub auto_execute: bool,
    /// Extra template parameters; values derived from the finding win
    pub params: HashMap<String, String>,
}

/// Outcome of [`CommandMapper::validate_command`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapperStatistics {
    pub total_commands: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    pub by_mode: BTreeMap<String, usize>,
    pub by_risk: BTreeMap<String, usize>,
}

pub struct CommandMapper {
    catalog: Vec<CommandTemplate>,
    rules: Vec<RuleCategory>,
    checker: SafetyChecker,
    extractors: Vec<Regex>,
    config: MapperConfig,
    history: Mutex<RingBuffer<MappedCommand>>,
}

impl Default for CommandMapper {
    fn default() -> Self {
        Self::new(MapperConfig::default())
    }
}

impl CommandMapper {
    pub fn new(config: MapperConfig) -> Self {
        let checker = SafetyChecker::new(config.max_command_length)
            .with_extra_denied(config.extra_denied.iter().cloned());
        let extractors = [
            r"(?i)\b(?:run|execute|use command)\s+`([^`]+)`",
            r"(?i)\bcommand:\s*([^\n]+)",
            r"(?i)\bexecute:\s*([^\n]+)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();

        Self {
            catalog: all_templates(),
            rules: default_rules(),
            checker,
            extractors,
            history: Mutex::new(RingBuffer::new(config.history_capacity)),
            config,
        }
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn checker(&self) -> &SafetyChecker {
        &self.checker
    }

    pub fn templates(&self) -> &[CommandTemplate] {
        &self.catalog
    }

    pub fn template(&self, name: &str) -> Option<&CommandTemplate> {
        self.catalog.iter().find(|t| t.name == name)
    }

    /// Map a finding to commands. Never fails as a whole: candidates that
    /// cannot be built are logged and skipped.
    pub fn map(&self, finding: &Finding, ctx: &MappingContext) -> Vec<MappedCommand> {
        let base_priority = Priority::from_risk(finding.risk_level);
        let params = self.extract_params(finding, ctx);

        let text = format!("{} {}", finding.summary, finding.remediation_steps.join(" ")).to_lowercase();
        let mut candidates = Vec::new();

        for category in &self.rules {
            for rule in category.rules.iter().filter(|r| r.matches(&text)) {
                debug!("Rule matched in {}: {:?}", category.name, rule.keywords);
                for name in rule.templates {
                    match self.build(name, &params, rule.priority, rule.mode) {
                        Ok(cmd) => candidates.push(cmd),
                        Err(e) => warn!("Skipping {}: {}", name, e),
                    }
                }
            }
        }

        candidates.extend(self.custom_commands(finding, base_priority));

        match self.build("log_incident", &params, Priority::Low, ExecutionMode::Immediate) {
            Ok(cmd) => candidates.push(cmd),
            Err(e) => warn!("Skipping log_incident: {}", e),
        }
        if finding.risk_level.is_severe() {
            match self.build("send_alert", &params, Priority::High, ExecutionMode::Immediate) {
                Ok(cmd) => candidates.push(cmd),
                Err(e) => warn!("Skipping send_alert: {}", e),
            }
        }

        let mut seen = HashSet::new();
        candidates.retain(|c| seen.insert(c.command().to_string()));
        candidates.truncate(self.config.max_commands);
        sort_commands(&mut candidates);

        if let Ok(mut history) = self.history.lock() {
            for cmd in &candidates {
                history.push(cmd.clone());
            }
        }

        info!("Mapped {} command(s) for {} finding", candidates.len(), finding.risk_level);
        candidates
    }

    fn build(
        &self,
        name: &str,
        params: &HashMap<String, String>,
        priority: Priority,
        mode: ExecutionMode,
    ) -> Result<MappedCommand, MappingError> {
        let template = self
            .template(name)
            .ok_or_else(|| MappingError::UnknownTemplate(name.to_string()))?;
        let rendered = template.render(params)?;

        let mut cmd = MappedCommand::new(
            &self.checker,
            template.name,
            template.category,
            rendered,
            template.risk_level,
        )?
        .with_priority(priority)
        .with_mode(mode)
        .with_description(template.description)
        .with_sudo(template.requires_sudo)
        .with_timeout(template.timeout_secs);

        if let Some(rollback) = template.render_rollback(params)? {
            cmd = cmd.with_rollback(&self.checker, rollback)?;
        }
        Ok(cmd)
    }

    fn custom_commands(&self, finding: &Finding, priority: Priority) -> Vec<MappedCommand> {
        let mut out = Vec::new();
        for (i, step) in finding.remediation_steps.iter().enumerate() {
            if step.chars().count() <= 10 {
                continue;
            }
            let Some(raw) = self.extract_command(step) else {
                continue;
            };
            match MappedCommand::new(
                &self.checker,
                format!("custom_{}", i),
                CommandCategory::Custom,
                raw,
                RiskLevel::Medium,
            ) {
                Ok(cmd) => out.push(
                    cmd.with_priority(priority)
                        .with_mode(ExecutionMode::Manual)
                        .with_sudo(true)
                        .with_timeout(60)
                        .with_description(format!("Custom remediation: {}", truncate(step, 50))),
                ),
                Err(e) => warn!("Dropping custom command from remediation step {}: {}", i, e),
            }
        }
        out
    }

    fn extract_command(&self, text: &str) -> Option<String> {
        self.extractors.iter().find_map(|re| {
            re.captures(text)
                .map(|c| c[1].trim().to_string())
                .filter(|s| !s.is_empty())
        })
    }

    /// Template parameters: config defaults, then context, then finding entities
    fn extract_params(&self, finding: &Finding, ctx: &MappingContext) -> HashMap<String, String> {
        let now = Utc::now();
        let mut p: HashMap<String, String> = HashMap::new();
        let set = |p: &mut HashMap<String, String>, k: &str, v: String| {
            p.insert(k.to_string(), v);
        };

        set(&mut p, "quarantine_dir", self.config.quarantine_dir.clone());
        set(&mut p, "backup_dir", self.config.backup_dir.clone());
        set(&mut p, "log_service", self.config.log_service.clone());
        set(&mut p, "since_time", self.config.log_since.clone());
        set(&mut p, "logrotate_config", self.config.logrotate_config.clone());
        set(&mut p, "permissions", self.config.default_permissions.clone());
        set(&mut p, "protocol", "tcp".to_string());
        set(&mut p, "timestamp", now.to_rfc3339());
        set(&mut p, "timestamp_compact", now.format("%Y%m%d_%H%M%S").to_string());

        let mut details = format!(
            "risk={} confidence={:.2} summary={}",
            finding.risk_level.as_str(),
            finding.confidence,
            truncate(&finding.summary, 200)
        );
        if let Some(ref id) = finding.event_id {
            details.push_str(&format!(" event={}", truncate(id, 64)));
        }
        set(&mut p, "incident_details", details);
        set(&mut p, "subject", format!("{} security finding", finding.risk_level));
        set(&mut p, "message", truncate(&finding.summary, 200));

        p.extend(ctx.params.iter().map(|(k, v)| (k.clone(), v.clone())));

        let entities = &finding.context;
        if let Some(ref proc_) = entities.process {
            if let Some(pid) = proc_.pid {
                set(&mut p, "pid", pid.to_string());
            }
            if let Some(ref name) = proc_.name {
                set(&mut p, "process_name", name.clone());
            }
        }
        if let Some(ref conn) = entities.connection {
            if let Some(ref dest) = conn.dest {
                set(&mut p, "destination", dest.clone());
                match dest.rsplit_once(':') {
                    Some((host, port)) if !host.is_empty() => {
                        set(&mut p, "ip_address", host.trim_matches(|c| c == '[' || c == ']').to_string());
                        if !port.is_empty() {
                            set(&mut p, "port", port.to_string());
                        }
                    }
                    _ => set(&mut p, "ip_address", dest.clone()),
                }
            }
            if let Some(ref proto) = conn.proto {
                set(&mut p, "protocol", proto.to_lowercase());
            }
        }
        if let Some(ref file) = entities.file {
            if let Some(ref path) = file.path {
                set(&mut p, "file_path", path.clone());
                if let Some(name) = std::path::Path::new(path).file_name() {
                    set(&mut p, "filename", name.to_string_lossy().into_owned());
                }
            }
            if let Some(ref perms) = file.permissions {
                set(&mut p, "permissions", perms.clone());
            }
        }
        let service = entities
            .service
            .as_ref()
            .and_then(|s| s.name.clone())
            .or_else(|| entities.process.as_ref().and_then(|pr| pr.name.clone()));
        if let Some(name) = service {
            set(&mut p, "service_name", name);
        }

        p
    }

    /// Re-check a command without mutating it
    pub fn validate_command(&self, cmd: &MappedCommand) -> CommandValidation {
        let mut v = CommandValidation {
            valid: true,
            ..Default::default()
        };

        if let Err(e) = self.checker.check(cmd.command()) {
            v.valid = false;
            v.errors.push(format!("Safety check failed: {}", e));
        }
        let unresolved = templates::placeholders(cmd.command());
        if !unresolved.is_empty() {
            v.valid = false;
            v.errors.push(format!("Unresolved parameters: {}", unresolved.join(", ")));
        }
        if let Some(rb) = cmd.rollback() {
            if let Err(e) = self.checker.check(rb) {
                v.valid = false;
                v.errors.push(format!("Rollback safety check failed: {}", e));
            }
        }

        if cmd.requires_sudo() {
            v.warnings.push("Command requires elevated privileges".to_string());
        }
        if cmd.risk_level().is_severe() {
            v.warnings.push(format!("{} risk command", cmd.risk_level()));
            v.recommendations.push("Have an operator review before execution".to_string());
        }
        if cmd.risk_level() >= RiskLevel::Medium && cmd.rollback().is_none() {
            v.warnings.push("No rollback command for a medium or higher risk command".to_string());
            v.recommendations.push("Prepare a manual recovery plan".to_string());
        }

        v
    }

    /// Most recent mapped commands, oldest first
    pub fn history(&self, limit: usize) -> Vec<MappedCommand> {
        self.history
            .lock()
            .map(|h| h.recent(limit))
            .unwrap_or_default()
    }

    pub fn statistics(&self) -> MapperStatistics {
        let mut stats = MapperStatistics::default();
        let Ok(history) = self.history.lock() else {
            return stats;
        };
        for cmd in history.iter() {
            stats.total_commands += 1;
            *stats.by_category.entry(cmd.category().to_string()).or_default() += 1;
            *stats.by_priority.entry(cmd.priority().to_string()).or_default() += 1;
            *stats.by_mode.entry(cmd.mode().to_string()).or_default() += 1;
            *stats.by_risk.entry(cmd.risk_level().as_str().to_string()).or_default() += 1;
        }
        stats
    }

    /// Drop history entries older than `older_than`; returns how many were removed
    pub fn clear_history(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let Ok(mut history) = self.history.lock() else {
            return 0;
        };
        let before = history.len();
        history.retain(|c| c.created_at() >= cutoff);
        let removed = before - history.len();
        info!("Cleared {} mapped command(s) from history", removed);
        removed
    }
}

/// Default urgency for a finding. Rule matches carry their own mode and
/// custom commands are always manual, so this is advisory.
pub fn base_mode(risk: RiskLevel, ctx: &MappingContext) -> ExecutionMode {
    if risk.is_severe() || ctx.auto_execute {
        ExecutionMode::Immediate
    } else if risk == RiskLevel::Medium {
        ExecutionMode::Conditional
    } else {
        ExecutionMode::Manual
    }
}

/// Stable sort by priority, then execution mode, then id
pub fn sort_commands(commands: &mut [MappedCommand]) {
    commands.sort_by(|a, b| {
        b.priority()
            .weight()
            .cmp(&a.priority().weight())
            .then_with(|| b.mode().weight().cmp(&a.mode().weight()))
            .then_with(|| a.id().cmp(b.id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn malware_finding() -> Finding {
        Finding::new("Malware beacon from cryptominer", RiskLevel::Critical, 0.92)
            .with_process(4242, "xmrig")
            .with_connection("203.0.113.7:4444")
            .with_file("/tmp/xmrig")
    }

    #[test]
    fn test_malware_rule_fills_entities() {
        let mapper = CommandMapper::default();
        let cmds = mapper.map(&malware_finding(), &MappingContext::default());
        let rendered: Vec<_> = cmds.iter().map(|c| c.command().to_string()).collect();
        assert!(rendered.contains(&"kill -9 4242".to_string()), "{:?}", rendered);
        assert!(rendered.contains(&"iptables -A INPUT -s 203.0.113.7 -j DROP".to_string()));
        assert!(rendered.contains(&"mv /tmp/xmrig /var/quarantine/xmrig.quarantine".to_string()));
        let block = cmds.iter().find(|c| c.template() == "block_ip").unwrap();
        assert_eq!(block.rollback(), Some("iptables -D INPUT -s 203.0.113.7 -j DROP"));
    }

    #[test]
    fn test_generic_commands_always_present() {
        let mapper = CommandMapper::default();
        let low = mapper.map(&Finding::new("routine", RiskLevel::Low, 0.8), &MappingContext::default());
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].template(), "log_incident");
        assert_eq!(low[0].priority(), Priority::Low);
        assert_eq!(low[0].mode(), ExecutionMode::Immediate);

        let high = mapper.map(&Finding::new("odd", RiskLevel::High, 0.8), &MappingContext::default());
        let names: Vec<_> = high.iter().map(|c| c.template()).collect();
        assert_eq!(names, vec!["send_alert", "log_incident"]);
    }

    #[test]
    fn test_missing_entities_drop_candidates() {
        let mapper = CommandMapper::default();
        let finding = Finding::new("rootkit found", RiskLevel::Critical, 0.9);
        let cmds = mapper.map(&finding, &MappingContext::default());
        assert!(cmds.iter().all(|c| c.template() != "kill_process"));
        assert!(cmds.iter().any(|c| c.template() == "log_incident"));
    }

    #[test]
    fn test_custom_command_extraction() {
        let mapper = CommandMapper::default();
        let finding = Finding::new("odd login", RiskLevel::Medium, 0.8)
            .with_remediation("Run `journalctl -u sshd --no-pager` to review")
            .with_remediation("Please run `rm -rf /var/log` to clean up")
            .with_remediation("short");
        let cmds = mapper.map(&finding, &MappingContext::default());
        let custom: Vec<_> = cmds
            .iter()
            .filter(|c| c.category() == CommandCategory::Custom)
            .collect();
        assert_eq!(custom.len(), 1);
        assert_eq!(custom[0].command(), "journalctl -u sshd --no-pager");
        assert_eq!(custom[0].mode(), ExecutionMode::Manual);
        assert!(custom[0].requires_sudo());
    }

    #[test]
    fn test_context_params_and_auto_execute() {
        let mapper = CommandMapper::default();
        let mut ctx = MappingContext {
            auto_execute: true,
            ..Default::default()
        };
        ctx.params.insert("pid".into(), "1".into());
        let finding = Finding::new("suspicious process spawned", RiskLevel::Medium, 0.8)
            .with_process(777, "nc");
        let cmds = mapper.map(&finding, &ctx);
        let suspend = cmds.iter().find(|c| c.template() == "suspend_process").unwrap();
        // finding entity wins over context
        assert_eq!(suspend.command(), "kill -STOP 777");
        assert_eq!(suspend.mode(), ExecutionMode::Conditional);
    }

    #[test]
    fn test_base_mode_from_risk_and_context() {
        let auto = MappingContext {
            auto_execute: true,
            ..Default::default()
        };
        let plain = MappingContext::default();
        assert_eq!(base_mode(RiskLevel::Critical, &plain), ExecutionMode::Immediate);
        assert_eq!(base_mode(RiskLevel::High, &plain), ExecutionMode::Immediate);
        assert_eq!(base_mode(RiskLevel::Medium, &plain), ExecutionMode::Conditional);
        assert_eq!(base_mode(RiskLevel::Low, &plain), ExecutionMode::Manual);
        assert_eq!(base_mode(RiskLevel::Info, &plain), ExecutionMode::Manual);
        assert_eq!(base_mode(RiskLevel::Low, &auto), ExecutionMode::Immediate);
    }

    #[test]
    fn test_cap_and_order() {
        let config = MapperConfig {
            max_commands: 3,
            ..Default::default()
        };
        let mapper = CommandMapper::new(config);
        let finding = malware_finding().with_remediation("data exfiltration suspected");
        let cmds = mapper.map(&finding, &MappingContext::default());
        assert_eq!(cmds.len(), 3);
        for pair in cmds.windows(2) {
            assert!(pair[0].priority() >= pair[1].priority());
        }
    }

    #[test]
    fn test_duplicates_removed() {
        let mapper = CommandMapper::default();
        // malware and exfiltration rules both emit block_ip and kill_process
        let finding = malware_finding().with_remediation("stop data exfiltration");
        let cmds = mapper.map(&finding, &MappingContext::default());
        let kills = cmds.iter().filter(|c| c.command() == "kill -9 4242").count();
        assert_eq!(kills, 1);
    }

    #[test]
    fn test_validate_command_warnings() {
        let mapper = CommandMapper::default();
        let cmds = mapper.map(&malware_finding(), &MappingContext::default());
        let kill = cmds.iter().find(|c| c.template() == "kill_process").unwrap();
        let v = mapper.validate_command(kill);
        assert!(v.valid);
        assert!(v.warnings.iter().any(|w| w.contains("elevated")));
        assert!(v.warnings.iter().any(|w| w.contains("rollback")));

        let odd = MappedCommand::new(mapper.checker(), "t", CommandCategory::Custom, "echo {pid}", RiskLevel::Low)
            .unwrap();
        let v = mapper.validate_command(&odd);
        assert!(!v.valid);
        assert!(v.errors[0].contains("pid"));
    }

    #[test]
    fn test_statistics_and_clear_history() {
        let mapper = CommandMapper::default();
        mapper.map(&malware_finding(), &MappingContext::default());
        let stats = mapper.statistics();
        assert!(stats.total_commands >= 4);
        assert!(stats.by_category.contains_key("log"));
        assert_eq!(mapper.clear_history(Duration::hours(1)), 0);
        assert_eq!(mapper.clear_history(Duration::zero() - Duration::seconds(5)), stats.total_commands);
        assert!(mapper.history(10).is_empty());
    }

    #[test]
    fn test_ipv6_and_portless_destinations() {
        let mapper = CommandMapper::default();
        let finding = Finding::new("port scan", RiskLevel::High, 0.9).with_connection("[2001:db8::1]:22");
        let cmds = mapper.map(&finding, &MappingContext::default());
        let block = cmds.iter().find(|c| c.template() == "block_ip").unwrap();
        assert_eq!(block.command(), "iptables -A INPUT -s 2001:db8::1 -j DROP");

        let finding = Finding::new("port scan", RiskLevel::High, 0.9).with_connection("198.51.100.2");
        let cmds = mapper.map(&finding, &MappingContext::default());
        assert!(cmds.iter().any(|c| c.command() == "iptables -A INPUT -s 198.51.100.2 -j DROP"));
        assert!(cmds.iter().all(|c| c.template() != "block_port"));
    }
}
