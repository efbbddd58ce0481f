//! Layered settings: defaults, then YAML file, then `RESPONDER__*` env vars

use crate::agent::AgentConfig;
use crate::engine::EngineConfig;
use crate::mapper::MapperConfig;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "RESPONDER";
const HOME_DIR: &str = ".falco-responder";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub agent: AgentConfig,
    pub engine: EngineConfig,
    pub mapper: MapperConfig,
    pub alerts: AlertConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub telegram: Option<TelegramConfig>,
    pub slack: Option<SlackConfig>,
    pub discord: Option<DiscordConfig>,
}

impl AlertConfig {
    pub fn is_empty(&self) -> bool {
        self.telegram.is_none() && self.slack.is_none() && self.discord.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub webhook_url: String,
}

/// Persistent audit and decision store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_audit_enabled() -> bool {
    true
}
fn default_db_path() -> String {
    format!("~/{}/responder.db", HOME_DIR)
}
fn default_retention_days() -> u32 {
    90
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            db_path: default_db_path(),
            retention_days: default_retention_days(),
        }
    }
}

impl AuditConfig {
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }
}

/// `~/.falco-responder/config.yaml`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(HOME_DIR).join("config.yaml")
}

pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().unwrap_or_default().join(rest),
        None => PathBuf::from(path),
    }
}

impl Settings {
    /// Load settings. An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        let settings: Settings = config::Config::builder()
            .add_source(config::File::from(file.as_path()).format(config::FileFormat::Yaml).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to load config from {}", file.display()))?
            .try_deserialize()
            .context("invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let unit = |name: &str, v: f64| -> anyhow::Result<()> {
            if !(0.0..=1.0).contains(&v) {
                bail!("{} must be within [0, 1], got {}", name, v);
            }
            Ok(())
        };
        unit("agent.decision_threshold", self.agent.decision_threshold)?;
        unit("agent.auto_execute_threshold", self.agent.auto_execute_threshold)?;
        if self.engine.max_concurrent == 0 {
            bail!("engine.max_concurrent must be at least 1");
        }
        if self.agent.queue_capacity == 0 {
            bail!("agent.queue_capacity must be at least 1");
        }
        if self.mapper.max_commands == 0 {
            bail!("mapper.max_commands must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yaml_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "agent:\n  mode: auto\n  risk_tolerance: high\nengine:\n  dry_run: true\n  max_concurrent: 2\nalerts:\n  slack:\n    webhook_url: https://hooks.example/x"
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.agent.mode, crate::agent::AgentMode::Auto);
        assert_eq!(settings.agent.risk_tolerance, crate::agent::policy::RiskTolerance::High);
        assert!(settings.engine.dry_run);
        assert_eq!(settings.engine.max_concurrent, 2);
        // untouched fields keep their defaults
        assert_eq!(settings.engine.cancel_grace_secs, 5);
        assert_eq!(settings.mapper.max_commands, 10);
        assert!(settings.alerts.slack.is_some());
        assert!(settings.alerts.telegram.is_none());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        assert!(Settings::load(Some(Path::new("/nonexistent/responder.yaml"))).is_err());
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());
        settings.agent.decision_threshold = 1.5;
        assert!(settings.validate().is_err());
        settings.agent.decision_threshold = 0.7;
        settings.engine.max_concurrent = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/var/lib/x.db"), PathBuf::from("/var/lib/x.db"));
        assert!(expand_home("~/x.db").ends_with("x.db"));
        assert!(AuditConfig::default().resolved_db_path().ends_with(".falco-responder/responder.db"));
    }
}
