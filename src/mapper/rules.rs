//! Keyword rules linking finding text to templates

use super::command::{ExecutionMode, Priority};

/// Matches when any keyword is a case-insensitive substring of the finding text
#[derive(Debug, Clone)]
pub struct MappingRule {
    pub keywords: &'static [&'static str],
    pub templates: &'static [&'static str],
    pub priority: Priority,
    pub mode: ExecutionMode,
}

impl MappingRule {
    /// `text` must already be lowercased
    pub fn matches(&self, text: &str) -> bool {
        self.keywords.iter().any(|k| text.contains(&k.to_lowercase()))
    }
}

#[derive(Debug, Clone)]
pub struct RuleCategory {
    pub name: &'static str,
    pub rules: Vec<MappingRule>,
}

/// Built-in rule table, evaluated in order
pub fn default_rules() -> Vec<RuleCategory> {
    vec![
        RuleCategory {
            name: "high_risk",
            rules: vec![
                MappingRule {
                    keywords: &["malware", "trojan", "backdoor", "rootkit"],
                    templates: &["kill_process", "quarantine_file", "block_ip"],
                    priority: Priority::Critical,
                    mode: ExecutionMode::Immediate,
                },
                MappingRule {
                    keywords: &["unauthorized access", "privilege escalation"],
                    templates: &["kill_process", "disable_service", "send_alert"],
                    priority: Priority::High,
                    mode: ExecutionMode::Immediate,
                },
            ],
        },
        RuleCategory {
            name: "network_threat",
            rules: vec![
                MappingRule {
                    keywords: &["suspicious connection", "port scan", "ddos"],
                    templates: &["block_ip", "block_port", "disconnect_connection"],
                    priority: Priority::High,
                    mode: ExecutionMode::Immediate,
                },
                MappingRule {
                    keywords: &["data exfiltration", "c2 communication"],
                    templates: &["block_ip", "kill_process", "collect_logs"],
                    priority: Priority::Critical,
                    mode: ExecutionMode::Immediate,
                },
            ],
        },
        RuleCategory {
            name: "process_anomaly",
            rules: vec![
                MappingRule {
                    keywords: &["suspicious process", "unknown binary"],
                    templates: &["suspend_process", "quarantine_file", "monitor_process"],
                    priority: Priority::Medium,
                    mode: ExecutionMode::Conditional,
                },
                MappingRule {
                    keywords: &["cpu spike", "memory leak"],
                    templates: &["monitor_process", "restart_service"],
                    priority: Priority::Medium,
                    mode: ExecutionMode::Scheduled,
                },
            ],
        },
        RuleCategory {
            name: "file_threat",
            rules: vec![
                MappingRule {
                    keywords: &["file modification", "unauthorized write"],
                    templates: &["backup_file", "change_file_permissions", "quarantine_file"],
                    priority: Priority::Medium,
                    mode: ExecutionMode::Immediate,
                },
                MappingRule {
                    keywords: &["ransomware", "file encryption"],
                    templates: &["kill_process", "quarantine_file", "stop_service"],
                    priority: Priority::Critical,
                    mode: ExecutionMode::Immediate,
                },
            ],
        },
        RuleCategory {
            name: "service_anomaly",
            rules: vec![
                MappingRule {
                    keywords: &["service failure", "service crash"],
                    templates: &["restart_service", "collect_logs", "monitor_process"],
                    priority: Priority::Medium,
                    mode: ExecutionMode::Immediate,
                },
                MappingRule {
                    keywords: &["service compromise", "service hijack"],
                    templates: &["stop_service", "disable_service", "send_alert"],
                    priority: Priority::High,
                    mode: ExecutionMode::Immediate,
                },
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::templates::all_templates;

    #[test]
    fn test_rules_reference_known_templates() {
        let names: Vec<_> = all_templates().iter().map(|t| t.name).collect();
        for cat in default_rules() {
            for rule in &cat.rules {
                for t in rule.templates {
                    assert!(names.contains(t), "{} references unknown template {}", cat.name, t);
                }
            }
        }
    }

    #[test]
    fn test_keyword_match_is_substring() {
        let rules = default_rules();
        let malware = &rules[0].rules[0];
        assert!(malware.matches("detected a rootkit in /lib"));
        assert!(malware.matches("antimalware scan"));
        assert!(!malware.matches("routine cron job"));
    }
}
