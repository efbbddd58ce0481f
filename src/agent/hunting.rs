//! Proactive threat hunting

use crate::SecurityEvent;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub const HUNTING_EVENT_TYPE: &str = "proactive_hunting";
pub const HUNT_WINDOW: Duration = Duration::from_secs(24 * 3600);
pub const MIN_ANOMALY_CONFIDENCE: f64 = 0.7;
pub const MIN_CHAIN_LENGTH: usize = 3;
/// Behavior chains must score strictly above this
pub const CHAIN_RISK_THRESHOLD: f64 = 0.7;

#[async_trait]
pub trait GraphAnomalySource: Send + Sync {
    async fn find_anomalies(&self, window: Duration, min_confidence: f64) -> anyhow::Result<Vec<Value>>;
}

#[async_trait]
pub trait BehaviorChainSource: Send + Sync {
    async fn extract_behavior_chains(&self, window: Duration, min_length: usize) -> anyhow::Result<Vec<Value>>;
}

#[derive(Clone, Default)]
pub struct HuntingSources {
    pub graph: Option<Arc<dyn GraphAnomalySource>>,
    pub behavior: Option<Arc<dyn BehaviorChainSource>>,
}

impl HuntingSources {
    pub fn is_empty(&self) -> bool {
        self.graph.is_none() && self.behavior.is_none()
    }
}

/// Run one hunt; returns the event to feed back into the agent, if anything was found
pub async fn hunt(sources: &HuntingSources) -> Option<SecurityEvent> {
    info!("🔎 Running proactive threat hunt");

    let anomalies = match &sources.graph {
        Some(graph) => graph
            .find_anomalies(HUNT_WINDOW, MIN_ANOMALY_CONFIDENCE)
            .await
            .unwrap_or_else(|e| {
                error!("Graph anomaly hunt failed: {}", e);
                Vec::new()
            }),
        None => Vec::new(),
    };

    let chains: Vec<Value> = match &sources.behavior {
        Some(behavior) => behavior
            .extract_behavior_chains(HUNT_WINDOW, MIN_CHAIN_LENGTH)
            .await
            .unwrap_or_else(|e| {
                error!("Behavior chain hunt failed: {}", e);
                Vec::new()
            })
            .into_iter()
            .filter(|c| c.get("risk_score").and_then(|v| v.as_f64()).unwrap_or(0.0) > CHAIN_RISK_THRESHOLD)
            .collect(),
        None => Vec::new(),
    };

    if anomalies.is_empty() && chains.is_empty() {
        info!("Threat hunt complete, nothing found");
        return None;
    }

    let now = Utc::now();
    info!(
        "Threat hunt found {} anomalies and {} risky behavior chains",
        anomalies.len(),
        chains.len()
    );
    let mut event = SecurityEvent::new(
        HUNTING_EVENT_TYPE,
        json!({
            "hunting_results": {
                "timestamp": now.to_rfc3339(),
                "anomaly_patterns": anomalies,
                "behavior_anomalies": chains,
                "ioc_matches": [],
            }
        }),
    );
    event.id = format!("hunt_{}", now.format("%Y%m%d_%H%M%S"));
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedChains(Vec<Value>);

    #[async_trait]
    impl BehaviorChainSource for FixedChains {
        async fn extract_behavior_chains(&self, _w: Duration, min_length: usize) -> anyhow::Result<Vec<Value>> {
            assert_eq!(min_length, MIN_CHAIN_LENGTH);
            Ok(self.0.clone())
        }
    }

    struct BrokenGraph;

    #[async_trait]
    impl GraphAnomalySource for BrokenGraph {
        async fn find_anomalies(&self, _w: Duration, _c: f64) -> anyhow::Result<Vec<Value>> {
            anyhow::bail!("graph store unreachable")
        }
    }

    #[tokio::test]
    async fn test_only_risky_chains_are_reported() {
        let sources = HuntingSources {
            graph: Some(Arc::new(BrokenGraph)),
            behavior: Some(Arc::new(FixedChains(vec![
                json!({ "id": "a", "risk_score": 0.7 }),
                json!({ "id": "b", "risk_score": 0.71 }),
                json!({ "id": "c" }),
            ]))),
        };
        let event = hunt(&sources).await.unwrap();
        assert_eq!(event.event_type, HUNTING_EVENT_TYPE);
        assert!(event.id.starts_with("hunt_"));
        let chains = &event.payload["hunting_results"]["behavior_anomalies"];
        assert_eq!(chains.as_array().map(|a| a.len()), Some(1));
        assert_eq!(chains[0]["id"], "b");
    }

    #[tokio::test]
    async fn test_nothing_found_yields_no_event() {
        let sources = HuntingSources {
            graph: Some(Arc::new(BrokenGraph)),
            behavior: Some(Arc::new(FixedChains(vec![json!({ "risk_score": 0.2 })]))),
        };
        assert!(hunt(&sources).await.is_none());
        assert!(hunt(&HuntingSources::default()).await.is_none());
    }
}
