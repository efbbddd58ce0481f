//! Built-in command template catalog

use super::command::CommandCategory;
use super::safety::sanitize_param;
use super::MappingError;
use crate::RiskLevel;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// A static catalog entry; `{param}` placeholders are filled at mapping time
#[derive(Debug, Clone, Serialize)]
pub struct CommandTemplate {
    pub name: &'static str,
    pub category: CommandCategory,
    pub template: &'static str,
    pub description: &'static str,
    pub required_params: &'static [&'static str],
    pub optional_params: &'static [&'static str],
    pub risk_level: RiskLevel,
    pub requires_sudo: bool,
    pub timeout_secs: u64,
    pub rollback: Option<&'static str>,
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder regex is valid"))
}

/// Names of all `{param}` placeholders in a string
pub fn placeholders(s: &str) -> Vec<String> {
    placeholder_re()
        .captures_iter(s)
        .map(|c| c[1].to_string())
        .collect()
}

impl CommandTemplate {
    pub fn render(&self, params: &HashMap<String, String>) -> Result<String, MappingError> {
        self.render_str(self.template, params)
    }

    pub fn render_rollback(&self, params: &HashMap<String, String>) -> Result<Option<String>, MappingError> {
        self.rollback
            .map(|r| self.render_str(r, params))
            .transpose()
    }

    /// Substitute sanitized values; a placeholder with no value is an error
    fn render_str(&self, template: &str, params: &HashMap<String, String>) -> Result<String, MappingError> {
        if let Some(missing) = placeholders(template)
            .into_iter()
            .find(|p| !params.contains_key(p))
        {
            return Err(MappingError::MissingParameter {
                template: self.name.to_string(),
                param: missing,
            });
        }

        let rendered = placeholder_re().replace_all(template, |caps: &Captures| {
            params
                .get(&caps[1])
                .map(|v| sanitize_param(v))
                .unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

/// Get all registered command templates
pub fn all_templates() -> Vec<CommandTemplate> {
    vec![
        // Process control
        CommandTemplate {
            name: "kill_process",
            category: CommandCategory::Process,
            template: "kill -9 {pid}",
            description: "Force-terminate a process by PID",
            required_params: &["pid"],
            optional_params: &[],
            risk_level: RiskLevel::Medium,
            requires_sudo: true,
            timeout_secs: 10,
            rollback: None,
        },
        CommandTemplate {
            name: "kill_process_by_name",
            category: CommandCategory::Process,
            template: "pkill -f {process_name}",
            description: "Terminate processes matching a name",
            required_params: &["process_name"],
            optional_params: &[],
            risk_level: RiskLevel::Medium,
            requires_sudo: true,
            timeout_secs: 15,
            rollback: None,
        },
        CommandTemplate {
            name: "suspend_process",
            category: CommandCategory::Process,
            template: "kill -STOP {pid}",
            description: "Suspend a process",
            required_params: &["pid"],
            optional_params: &[],
            risk_level: RiskLevel::Low,
            requires_sudo: true,
            timeout_secs: 5,
            rollback: Some("kill -CONT {pid}"),
        },
        // Firewall
        CommandTemplate {
            name: "block_ip",
            category: CommandCategory::Firewall,
            template: "iptables -A INPUT -s {ip_address} -j DROP",
            description: "Drop inbound traffic from an IP address",
            required_params: &["ip_address"],
            optional_params: &[],
            risk_level: RiskLevel::Medium,
            requires_sudo: true,
            timeout_secs: 10,
            rollback: Some("iptables -D INPUT -s {ip_address} -j DROP"),
        },
        CommandTemplate {
            name: "block_port",
            category: CommandCategory::Firewall,
            template: "iptables -A INPUT -p {protocol} --dport {port} -j DROP",
            description: "Drop inbound traffic to a port",
            required_params: &["port"],
            optional_params: &["protocol"],
            risk_level: RiskLevel::Medium,
            requires_sudo: true,
            timeout_secs: 10,
            rollback: Some("iptables -D INPUT -p {protocol} --dport {port} -j DROP"),
        },
        // Network
        CommandTemplate {
            name: "disconnect_connection",
            category: CommandCategory::Network,
            template: "ss -K dst {destination}",
            description: "Kill sockets connected to a destination",
            required_params: &["destination"],
            optional_params: &[],
            risk_level: RiskLevel::Medium,
            requires_sudo: true,
            timeout_secs: 10,
            rollback: None,
        },
        // File
        CommandTemplate {
            name: "quarantine_file",
            category: CommandCategory::File,
            template: "mv {file_path} {quarantine_dir}/{filename}.quarantine",
            description: "Move a file into quarantine",
            required_params: &["file_path", "filename"],
            optional_params: &["quarantine_dir"],
            risk_level: RiskLevel::Medium,
            requires_sudo: true,
            timeout_secs: 15,
            rollback: Some("mv {quarantine_dir}/{filename}.quarantine {file_path}"),
        },
        CommandTemplate {
            name: "change_file_permissions",
            category: CommandCategory::File,
            template: "chmod {permissions} {file_path}",
            description: "Restrict file permissions",
            required_params: &["file_path"],
            optional_params: &["permissions"],
            risk_level: RiskLevel::Low,
            requires_sudo: true,
            timeout_secs: 10,
            rollback: None,
        },
        // Backup. The timestamp is a parameter, never a shell substitution.
        CommandTemplate {
            name: "backup_file",
            category: CommandCategory::Backup,
            template: "cp -p {file_path} {backup_dir}/{filename}.backup.{timestamp_compact}",
            description: "Copy a file aside before touching it",
            required_params: &["file_path", "filename"],
            optional_params: &["backup_dir", "timestamp_compact"],
            risk_level: RiskLevel::Low,
            requires_sudo: false,
            timeout_secs: 30,
            rollback: None,
        },
        // Service
        CommandTemplate {
            name: "stop_service",
            category: CommandCategory::Service,
            template: "systemctl stop {service_name}",
            description: "Stop a system service",
            required_params: &["service_name"],
            optional_params: &[],
            risk_level: RiskLevel::High,
            requires_sudo: true,
            timeout_secs: 30,
            rollback: Some("systemctl start {service_name}"),
        },
        CommandTemplate {
            name: "restart_service",
            category: CommandCategory::Service,
            template: "systemctl restart {service_name}",
            description: "Restart a system service",
            required_params: &["service_name"],
            optional_params: &[],
            risk_level: RiskLevel::Medium,
            requires_sudo: true,
            timeout_secs: 60,
            rollback: None,
        },
        CommandTemplate {
            name: "disable_service",
            category: CommandCategory::Service,
            template: "systemctl disable {service_name}",
            description: "Disable a system service at boot",
            required_params: &["service_name"],
            optional_params: &[],
            risk_level: RiskLevel::High,
            requires_sudo: true,
            timeout_secs: 20,
            rollback: Some("systemctl enable {service_name}"),
        },
        // Monitoring
        CommandTemplate {
            name: "monitor_process",
            category: CommandCategory::Monitoring,
            template: "pgrep -a -f {process_name}",
            description: "List processes matching a name",
            required_params: &["process_name"],
            optional_params: &[],
            risk_level: RiskLevel::Low,
            requires_sudo: false,
            timeout_secs: 10,
            rollback: None,
        },
        CommandTemplate {
            name: "monitor_network",
            category: CommandCategory::Monitoring,
            template: "ss -tuln sport = :{port}",
            description: "Show listening sockets on a port",
            required_params: &["port"],
            optional_params: &[],
            risk_level: RiskLevel::Low,
            requires_sudo: false,
            timeout_secs: 10,
            rollback: None,
        },
        // Logs
        CommandTemplate {
            name: "collect_logs",
            category: CommandCategory::Log,
            template: "journalctl -u {log_service} --since {since_time} --no-pager",
            description: "Collect recent logs for a service",
            required_params: &[],
            optional_params: &["log_service", "since_time"],
            risk_level: RiskLevel::Low,
            requires_sudo: false,
            timeout_secs: 30,
            rollback: None,
        },
        CommandTemplate {
            name: "rotate_logs",
            category: CommandCategory::Log,
            template: "logrotate -f {logrotate_config}",
            description: "Force a log rotation",
            required_params: &[],
            optional_params: &["logrotate_config"],
            risk_level: RiskLevel::Low,
            requires_sudo: true,
            timeout_secs: 30,
            rollback: None,
        },
        CommandTemplate {
            name: "log_incident",
            category: CommandCategory::Log,
            template: "logger -p auth.warning -t security-incident {timestamp} {incident_details}",
            description: "Record the incident in the system log",
            required_params: &[],
            optional_params: &["timestamp", "incident_details"],
            risk_level: RiskLevel::Low,
            requires_sudo: false,
            timeout_secs: 5,
            rollback: None,
        },
        // Notification
        CommandTemplate {
            name: "send_alert",
            category: CommandCategory::Notification,
            template: "logger -p auth.alert -t falco-alert {subject} {message}",
            description: "Raise a security alert",
            required_params: &[],
            optional_params: &["subject", "message"],
            risk_level: RiskLevel::Low,
            requires_sudo: false,
            timeout_secs: 10,
            rollback: None,
        },
    ]
}
