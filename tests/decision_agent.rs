use async_trait::async_trait;
use falco_responder::agent::analysis::{Analyzer, EmbeddedFindingAnalyzer};
use falco_responder::agent::hunting::{BehaviorChainSource, HuntingSources};
use falco_responder::agent::metrics::AgentMetrics;
use falco_responder::agent::policy::RiskTolerance;
use falco_responder::agent::{
    Alert, AlertKind, AgentConfig, AgentError, AgentMode, AgentState, Decision, DecisionAgent,
};
use falco_responder::engine::{ApprovalStatus, EngineConfig, ExecutionEngine, ExecutionStatus};
use falco_responder::mapper::CommandMapper;
use falco_responder::{Finding, RiskLevel, SecurityEvent};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn test_config(mode: AgentMode) -> AgentConfig {
    AgentConfig {
        mode,
        workers: 2,
        poll_timeout_ms: 20,
        metrics_interval_secs: 1,
        stop_timeout_secs: 2,
        ..Default::default()
    }
}

fn dry_run_engine() -> Arc<ExecutionEngine> {
    Arc::new(ExecutionEngine::new(EngineConfig {
        dry_run: true,
        dry_run_delay_ms: 10,
        poll_interval_ms: 20,
        shutdown_timeout_secs: 2,
        ..Default::default()
    }))
}

fn build_agent(config: AgentConfig) -> Arc<DecisionAgent> {
    DecisionAgent::new(
        config,
        CommandMapper::default(),
        dry_run_engine(),
        Arc::new(EmbeddedFindingAnalyzer),
    )
}

fn collect_alerts(agent: &DecisionAgent) -> Arc<Mutex<Vec<Alert>>> {
    let alerts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&alerts);
    agent.on_alert(Arc::new(move |alert: &Alert| -> anyhow::Result<()> {
        sink.lock().unwrap().push(alert.clone());
        Ok(())
    }));
    alerts
}

async fn wait_for_decisions(agent: &DecisionAgent, count: usize) -> Vec<Decision> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let decisions = agent.decision_history(100);
        if decisions.len() >= count {
            return decisions;
        }
        assert!(tokio::time::Instant::now() < deadline, "only {} decision(s)", decisions.len());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn c2_finding() -> Finding {
    Finding::new("Suspicious connection to known beacon host", RiskLevel::High, 0.85)
        .with_process(4242, "beacon")
        .with_connection("203.0.113.7:4444")
}

#[tokio::test]
async fn test_semi_auto_high_risk_waits_for_review() {
    let agent = build_agent(test_config(AgentMode::SemiAuto));
    let alerts = collect_alerts(&agent);

    let decision = agent
        .process(SecurityEvent::from_finding(&c2_finding()))
        .await
        .expect("confident finding yields a decision");

    assert!(!decision.auto_execute);
    assert!(!decision.mapped_commands.is_empty());
    assert_eq!(decision.submitted.len(), decision.mapped_commands.len());
    assert!(decision.reasoning.contains("Semi-auto mode"));
    assert!(decision.risk_assessment.contains("threat risk high"));

    // every command waits for a human, including the low-risk ones
    for id in &decision.submitted {
        let ctx = agent.execution_status(id).unwrap();
        assert_eq!(ctx.approval, ApprovalStatus::Pending, "{}", id);
    }
    assert_eq!(agent.pending_approvals().len(), decision.submitted.len());

    let alerts = alerts.lock().unwrap();
    let approvals = alerts.iter().filter(|a| a.kind == AlertKind::ApprovalRequest).count();
    assert_eq!(approvals, decision.submitted.len());
    let severe: Vec<_> = alerts
        .iter()
        .filter(|a| a.kind == AlertKind::HighSeverityDecision)
        .collect();
    assert_eq!(severe.len(), 1);
    assert_eq!(severe[0].subject_id, decision.decision_id);
}

#[tokio::test]
async fn test_auto_mode_runs_confident_low_risk_response() {
    let agent = build_agent(test_config(AgentMode::Auto));
    agent.start().unwrap();

    let finding = Finding::new("Routine audit note from the host agent", RiskLevel::Low, 0.95);
    agent.submit_finding(&finding).unwrap();

    let decision = wait_for_decisions(&agent, 1).await.remove(0);
    assert!(decision.auto_execute);
    assert!(!decision.submitted.is_empty());
    assert_eq!(decision.submitted.len(), decision.mapped_commands.len());
    assert!(decision.mapped_commands.iter().all(|c| c.risk_level() == RiskLevel::Low));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    for id in &decision.submitted {
        loop {
            let ctx = agent.execution_status(id).unwrap();
            assert_eq!(ctx.approval, ApprovalStatus::AutoApproved);
            if ctx.result.status == ExecutionStatus::Completed {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "{} is {}", id, ctx.result.status);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    // completion notifications land right after the status flips
    let expected = decision.submitted.len() as u64;
    while agent.metrics().successful_responses < expected {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let metrics = agent.metrics();
    assert_eq!(metrics.total_events_processed, 1);
    assert_eq!(metrics.total_decisions_made, 1);
    assert_eq!(metrics.total_commands_executed, expected);
    assert_eq!(metrics.successful_responses, expected);

    agent.stop().await;
    assert_eq!(agent.state(), AgentState::Stopped);
}

#[tokio::test]
async fn test_elevated_command_blocks_auto_execution() {
    let mut config = test_config(AgentMode::Auto);
    config.risk_tolerance = RiskTolerance::High;
    let agent = build_agent(config);

    let finding = Finding::new("CPU spike in worker process", RiskLevel::Medium, 0.95)
        .with_process(812, "worker");
    let decision = agent
        .process(SecurityEvent::from_finding(&finding))
        .await
        .unwrap();

    let elevated = decision
        .mapped_commands
        .iter()
        .find(|c| c.requires_sudo() && c.risk_level() == RiskLevel::Medium)
        .cloned()
        .expect("restart_service is mapped");
    assert!(!decision.auto_execute);
    assert!(decision.submitted.is_empty());

    let id = agent.engine().submit(elevated).unwrap();
    assert_eq!(agent.execution_status(&id).unwrap().approval, ApprovalStatus::Pending);
}

#[tokio::test]
async fn test_operator_approves_through_agent() {
    let agent = build_agent(test_config(AgentMode::SemiAuto));
    agent.start().unwrap();
    let decision = agent.process(SecurityEvent::from_finding(&c2_finding())).await.unwrap();

    let (first, rest) = decision.submitted.split_first().unwrap();
    agent.approve_command(first, "oncall", "confirmed").unwrap();
    for id in rest {
        agent.reject_command(id, "oncall", "not needed").unwrap();
    }
    assert!(matches!(
        agent.approve_command(first, "oncall", "twice"),
        Err(AgentError::Engine(_))
    ));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = agent.execution_status(first).unwrap().result.status;
        if status.is_terminal() {
            break;
        }
        // manual-mode commands still need a release
        if status == ExecutionStatus::Pending && agent.engine().release(first, "oncall").is_ok() {
            continue;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(agent.execution_status(first).unwrap().result.status, ExecutionStatus::Completed);
    for id in rest {
        assert_eq!(agent.execution_status(id).unwrap().result.status, ExecutionStatus::Cancelled);
    }
    assert!(agent.pending_approvals().is_empty());
    agent.stop().await;
}

#[tokio::test]
async fn test_full_queue_rejects_instead_of_blocking() {
    let mut config = test_config(AgentMode::Passive);
    config.queue_capacity = 1;
    let agent = build_agent(config);

    let finding = Finding::new("Routine audit note", RiskLevel::Low, 0.9);
    assert!(matches!(agent.submit_finding(&finding), Err(AgentError::NotRunning)));

    agent.start().unwrap();
    agent.pause().unwrap();
    agent.submit_finding(&finding).unwrap();
    assert!(matches!(agent.submit_finding(&finding), Err(AgentError::QueueFull)));
    assert_eq!(agent.status().queued_events, 1);

    agent.resume().unwrap();
    wait_for_decisions(&agent, 1).await;
    assert!(agent.submit_finding(&finding).is_ok());
    wait_for_decisions(&agent, 2).await;

    agent.stop().await;
    assert!(matches!(agent.submit_finding(&finding), Err(AgentError::NotRunning)));
}

struct FlakyAnalyzer;

#[async_trait]
impl Analyzer for FlakyAnalyzer {
    async fn analyze(&self, event: &SecurityEvent) -> anyhow::Result<Finding> {
        if event.event_type == "broken" {
            anyhow::bail!("analysis backend unavailable");
        }
        EmbeddedFindingAnalyzer.analyze(event).await
    }
}

#[tokio::test]
async fn test_analysis_failure_drops_event_only() {
    let agent = DecisionAgent::new(
        test_config(AgentMode::Passive),
        CommandMapper::default(),
        dry_run_engine(),
        Arc::new(FlakyAnalyzer),
    );
    assert!(agent.process(SecurityEvent::new("broken", json!({}))).await.is_none());
    assert!(agent
        .process(SecurityEvent::new("finding", json!({ "no": "finding" })))
        .await
        .is_none());

    let ok = Finding::new("Unknown binary executed from /tmp", RiskLevel::Medium, 0.8);
    assert!(agent.process(SecurityEvent::from_finding(&ok)).await.is_some());
    let metrics = agent.metrics();
    assert_eq!(metrics.total_events_processed, 3);
    assert_eq!(metrics.total_decisions_made, 1);
}

#[tokio::test]
async fn test_failing_callbacks_do_not_stop_decisions() {
    let agent = build_agent(test_config(AgentMode::Passive));
    agent.on_decision(Arc::new(|_d: &Decision| -> anyhow::Result<()> {
        Err(anyhow::anyhow!("store offline"))
    }));
    agent.on_alert(Arc::new(|_a: &Alert| -> anyhow::Result<()> {
        Err(anyhow::anyhow!("webhook offline"))
    }));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    agent.on_decision(Arc::new(move |d: &Decision| -> anyhow::Result<()> {
        sink.lock().unwrap().push(d.decision_id.clone());
        Ok(())
    }));

    let decision = agent.process(SecurityEvent::from_finding(&c2_finding())).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![decision.decision_id.clone()]);
    assert_eq!(agent.decision_history(10).len(), 1);
}

struct RiskyChains;

#[async_trait]
impl BehaviorChainSource for RiskyChains {
    async fn extract_behavior_chains(&self, _window: Duration, _min_length: usize) -> anyhow::Result<Vec<Value>> {
        Ok(vec![
            json!({ "chain": ["curl", "chmod", "exec"], "risk_score": 0.95 }),
            json!({ "chain": ["ls", "cat", "grep"], "risk_score": 0.2 }),
        ])
    }
}

#[tokio::test]
async fn test_hunting_results_become_decisions() {
    let mut config = test_config(AgentMode::Passive);
    config.enable_proactive_hunting = true;
    let agent = build_agent(config);
    agent.set_hunting_sources(HuntingSources {
        graph: None,
        behavior: Some(Arc::new(RiskyChains)),
    });
    agent.start().unwrap();
    assert_eq!(agent.status().tasks, 2 + 2);

    let decision = wait_for_decisions(&agent, 1).await.remove(0);
    assert!(decision.finding.summary.contains("1 suspicious behavior chain"));
    assert_eq!(decision.finding.risk_level, RiskLevel::High);
    assert!(decision.finding.event_id.as_deref().unwrap_or("").starts_with("hunt_"));
    assert!(decision.submitted.is_empty());
    agent.stop().await;
}

#[tokio::test]
async fn test_lifecycle_and_metrics_callback() {
    let agent = build_agent(test_config(AgentMode::SemiAuto));
    let ticks = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&ticks);
    agent.on_metrics(Arc::new(move |_m: &AgentMetrics| -> anyhow::Result<()> {
        *counter.lock().unwrap() += 1;
        Ok(())
    }));

    assert!(agent.pause().is_err());
    agent.start().unwrap();
    assert!(matches!(agent.start(), Err(AgentError::AlreadyRunning(AgentState::Running))));
    let status = agent.status();
    assert_eq!(status.state, AgentState::Running);
    assert_eq!(status.queue_capacity, 1000);
    assert!(status.started_at.is_some());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(*ticks.lock().unwrap() >= 1);

    agent.pause().unwrap();
    assert_eq!(agent.state(), AgentState::Paused);
    agent.resume().unwrap();
    agent.stop().await;
    agent.stop().await;
    assert_eq!(agent.state(), AgentState::Stopped);
    assert_eq!(agent.status().engine.state, falco_responder::engine::EngineState::Stopped);

    // restart after a clean stop
    agent.start().unwrap();
    agent.stop().await;
}
