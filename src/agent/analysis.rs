//! Analysis collaborators

use crate::{Finding, RiskLevel, SecurityEvent};
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::Value;

/// Turns a raw event into a structured finding
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, event: &SecurityEvent) -> anyhow::Result<Finding>;
}

/// Reads a finding that was analyzed upstream and embedded in the event.
///
/// Accepts `{"finding": {...}}` or a bare finding object as payload.
/// Proactive hunting events are summarized into a finding of their own.
pub struct EmbeddedFindingAnalyzer;

#[async_trait]
impl Analyzer for EmbeddedFindingAnalyzer {
    async fn analyze(&self, event: &SecurityEvent) -> anyhow::Result<Finding> {
        let mut finding = if event.event_type == super::hunting::HUNTING_EVENT_TYPE {
            summarize_hunt(&event.payload)
        } else {
            let raw = match event.payload.get("finding") {
                Some(inner) => inner.clone(),
                None if event.payload.get("summary").is_some() => event.payload.clone(),
                None => bail!("event {} carries no finding", event.id),
            };
            serde_json::from_value::<Finding>(raw)
                .with_context(|| format!("malformed finding in event {}", event.id))?
        };
        if finding.event_id.is_none() {
            finding.event_id = Some(event.id.clone());
        }
        finding.normalize();
        Ok(finding)
    }
}

fn summarize_hunt(payload: &Value) -> Finding {
    let results = payload.get("hunting_results").unwrap_or(payload);
    let list = |key: &str| -> Vec<Value> {
        results
            .get(key)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    };
    let anomalies = list("anomaly_patterns");
    let chains = list("behavior_anomalies");

    let score = anomalies
        .iter()
        .chain(chains.iter())
        .filter_map(|v| v.get("risk_score").or_else(|| v.get("confidence")))
        .filter_map(|v| v.as_f64())
        .fold(0.0_f64, f64::max);
    let risk = if score >= 0.9 {
        RiskLevel::High
    } else {
        RiskLevel::Medium
    };

    let mut finding = Finding::new(
        format!(
            "Proactive hunting found {} anomalous pattern(s) and {} suspicious behavior chain(s)",
            anomalies.len(),
            chains.len()
        ),
        risk,
        score,
    );
    finding.remediation_steps.push("Review the hunting results and correlate with recent alerts".to_string());
    finding
}
