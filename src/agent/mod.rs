//! Decision Agent
//!
//! Pulls events off a bounded queue, has them analyzed, maps confident
//! findings to commands and decides whether the engine may run them
//! without a human in the loop.

pub mod analysis;
pub mod feedback;
pub mod hunting;
pub mod metrics;
pub mod policy;

use crate::engine::hooks::Notification;
use crate::engine::{merge_json, EngineError, EngineStatus, ExecutionContext, ExecutionEngine, ExecutionStatus};
use crate::history::RingBuffer;
use crate::mapper::{CommandMapper, MappedCommand, MappingContext};
use crate::{Finding, RiskLevel, SecurityEvent};
use analysis::Analyzer;
use chrono::{DateTime, Utc};
use feedback::{Feedback, FeedbackLog, FeedbackOutcome};
use hunting::HuntingSources;
use metrics::AgentMetrics;
use policy::RiskTolerance;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent is not running")]
    NotRunning,
    #[error("agent is already {0:?}")]
    AlreadyRunning(AgentState),
    #[error("event queue is full")]
    QueueFull,
    #[error("operation not allowed while {0:?}")]
    InvalidState(AgentState),
    #[error("learning is disabled")]
    LearningDisabled,
    #[error("invalid config update: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Stopped,
    Starting,
    Running,
    Paused,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Analyze only
    Passive,
    /// Require approval
    #[default]
    SemiAuto,
    /// May self-execute
    Auto,
    /// Observe only, record feedback
    Learning,
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Passive => write!(f, "passive"),
            AgentMode::SemiAuto => write!(f, "semi_auto"),
            AgentMode::Auto => write!(f, "auto"),
            AgentMode::Learning => write!(f, "learning"),
        }
    }
}

impl std::str::FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "passive" => Ok(AgentMode::Passive),
            "semi_auto" | "semiauto" => Ok(AgentMode::SemiAuto),
            "auto" => Ok(AgentMode::Auto),
            "learning" => Ok(AgentMode::Learning),
            other => Err(format!("unknown agent mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub mode: AgentMode,
    /// Worker loops pulling from the event queue
    pub workers: usize,
    pub queue_capacity: usize,
    pub decision_threshold: f64,
    pub auto_execute_threshold: f64,
    pub decision_history: usize,
    pub enable_learning: bool,
    pub risk_tolerance: RiskTolerance,
    pub response_time_target_secs: f64,
    pub enable_proactive_hunting: bool,
    pub hunting_interval_minutes: u64,
    pub metrics_interval_secs: u64,
    pub poll_timeout_ms: u64,
    pub stop_timeout_secs: u64,
    /// In semi-auto mode, queue non-auto commands for human review
    pub semi_auto_submit: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: AgentMode::SemiAuto,
            workers: 5,
            queue_capacity: 1000,
            decision_threshold: 0.7,
            auto_execute_threshold: 0.9,
            decision_history: 1000,
            enable_learning: true,
            risk_tolerance: RiskTolerance::Medium,
            response_time_target_secs: 30.0,
            enable_proactive_hunting: false,
            hunting_interval_minutes: 60,
            metrics_interval_secs: 60,
            poll_timeout_ms: 1000,
            stop_timeout_secs: 10,
            semi_auto_submit: true,
        }
    }
}

/// One finding's handling
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub decision_id: String,
    pub finding: Finding,
    pub mapped_commands: Vec<MappedCommand>,
    pub reasoning: String,
    pub confidence: f64,
    pub risk_assessment: String,
    pub recommended_actions: Vec<String>,
    pub auto_execute: bool,
    /// Engine ids of the commands that were handed over
    pub submitted: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ApprovalRequest,
    HighSeverityDecision,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    /// Command id for approval requests, decision id otherwise
    pub subject_id: String,
    pub title: String,
    pub detail: String,
    pub risk_level: RiskLevel,
    pub requires_sudo: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub state: AgentState,
    pub mode: AgentMode,
    pub uptime_hours: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub queued_events: usize,
    pub queue_capacity: usize,
    pub tasks: usize,
    pub engine: EngineStatus,
}

pub type DecisionCallback = Arc<dyn Fn(&Decision) -> anyhow::Result<()> + Send + Sync>;
pub type AlertCallback = Arc<dyn Fn(&Alert) -> anyhow::Result<()> + Send + Sync>;
pub type MetricsCallback = Arc<dyn Fn(&AgentMetrics) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone, Default)]
struct AgentCallbacks {
    decision: Vec<DecisionCallback>,
    alert: Vec<AlertCallback>,
    metrics: Vec<MetricsCallback>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<SecurityEvent>>>;

pub struct DecisionAgent {
    config: RwLock<AgentConfig>,
    state: Mutex<AgentState>,
    mode: Mutex<AgentMode>,
    mapper: CommandMapper,
    engine: Arc<ExecutionEngine>,
    analyzer: Arc<dyn Analyzer>,
    hunting: Mutex<HuntingSources>,
    sender: Mutex<Option<mpsc::Sender<SecurityEvent>>>,
    metrics: Mutex<AgentMetrics>,
    started: Mutex<Option<(Instant, DateTime<Utc>)>>,
    decisions: Mutex<RingBuffer<Decision>>,
    feedback: Mutex<FeedbackLog>,
    callbacks: Mutex<AgentCallbacks>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DecisionAgent {
    /// Build the agent and register it on the engine's approval and
    /// notification hooks
    pub fn new(
        config: AgentConfig,
        mapper: CommandMapper,
        engine: Arc<ExecutionEngine>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<DecisionAgent>| {
            let on_approval = weak.clone();
            engine.on_approval(Arc::new(move |cmd: &MappedCommand, ctx: &ExecutionContext| -> anyhow::Result<()> {
                if let Some(agent) = on_approval.upgrade() {
                    agent.handle_approval_request(cmd, ctx);
                }
                Ok(())
            }));
            let on_notification = weak.clone();
            engine.on_notification(Arc::new(move |n: &Notification| -> anyhow::Result<()> {
                if let Some(agent) = on_notification.upgrade() {
                    agent.handle_notification(n);
                }
                Ok(())
            }));

            let (shutdown, _) = watch::channel(false);
            Self {
                mode: Mutex::new(config.mode),
                decisions: Mutex::new(RingBuffer::new(config.decision_history)),
                config: RwLock::new(config),
                state: Mutex::new(AgentState::Stopped),
                mapper,
                engine,
                analyzer,
                hunting: Mutex::new(HuntingSources::default()),
                sender: Mutex::new(None),
                metrics: Mutex::new(AgentMetrics::default()),
                started: Mutex::new(None),
                feedback: Mutex::new(FeedbackLog::default()),
                callbacks: Mutex::new(AgentCallbacks::default()),
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }
        })
    }

    pub fn set_hunting_sources(&self, sources: HuntingSources) {
        *lock(&self.hunting) = sources;
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn mapper(&self) -> &CommandMapper {
        &self.mapper
    }

    pub fn config(&self) -> AgentConfig {
        self.config.read().map(|c| c.clone()).unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn state(&self) -> AgentState {
        *lock(&self.state)
    }

    pub fn mode(&self) -> AgentMode {
        *lock(&self.mode)
    }

    pub fn on_decision(&self, cb: DecisionCallback) {
        lock(&self.callbacks).decision.push(cb);
    }

    pub fn on_alert(&self, cb: AlertCallback) {
        lock(&self.callbacks).alert.push(cb);
    }

    pub fn on_metrics(&self, cb: MetricsCallback) {
        lock(&self.callbacks).metrics.push(cb);
    }

    /// Start the engine and spawn the worker, metrics and hunting loops
    pub fn start(self: &Arc<Self>) -> Result<(), AgentError> {
        {
            let mut state = lock(&self.state);
            match *state {
                AgentState::Stopped | AgentState::Error => *state = AgentState::Starting,
                other => return Err(AgentError::AlreadyRunning(other)),
            }
        }
        info!("🤖 Starting decision agent");

        match self.engine.start() {
            Ok(()) | Err(EngineError::AlreadyRunning) => {}
            Err(e) => {
                error!("Failed to start decision agent: {}", e);
                *lock(&self.state) = AgentState::Error;
                return Err(e.into());
            }
        }

        let cfg = self.config();
        let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
        let rx: SharedReceiver = Arc::new(tokio::sync::Mutex::new(rx));
        *lock(&self.sender) = Some(tx);
        *lock(&self.started) = Some((Instant::now(), Utc::now()));
        self.shutdown.send_replace(false);

        {
            let mut tasks = lock(&self.tasks);
            for i in 0..cfg.workers.max(1) {
                let agent = Arc::clone(self);
                let rx = Arc::clone(&rx);
                tasks.push(tokio::spawn(agent.worker_loop(i, rx, self.shutdown.subscribe())));
            }
            tasks.push(tokio::spawn(Arc::clone(self).metrics_loop(self.shutdown.subscribe())));
            if cfg.enable_proactive_hunting {
                tasks.push(tokio::spawn(Arc::clone(self).hunting_loop(self.shutdown.subscribe())));
            }
        }

        *lock(&self.state) = AgentState::Running;
        info!(
            "✅ Decision agent running ({} workers, mode: {})",
            cfg.workers.max(1),
            self.mode()
        );
        Ok(())
    }

    /// Signal the loops, join them with a bound, then stop the engine
    pub async fn stop(&self) {
        if self.state() == AgentState::Stopped || self.shutdown.send_replace(true) {
            return;
        }
        info!("Stopping decision agent...");
        lock(&self.sender).take();

        let bound = Duration::from_secs(self.config().stop_timeout_secs);
        let deadline = tokio::time::Instant::now() + bound;
        let tasks: Vec<_> = lock(&self.tasks).drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                warn!("Agent task did not stop in time, aborting");
                task.abort();
            }
        }

        self.engine.stop().await;
        self.refresh_uptime();
        *lock(&self.state) = AgentState::Stopped;
        info!("Decision agent stopped");
    }

    pub fn pause(&self) -> Result<(), AgentError> {
        let mut state = lock(&self.state);
        match *state {
            AgentState::Running => {
                *state = AgentState::Paused;
                info!("⏸️ Decision agent paused");
                Ok(())
            }
            other => Err(AgentError::InvalidState(other)),
        }
    }

    pub fn resume(&self) -> Result<(), AgentError> {
        let mut state = lock(&self.state);
        match *state {
            AgentState::Paused => {
                *state = AgentState::Running;
                info!("▶️ Decision agent resumed");
                Ok(())
            }
            other => Err(AgentError::InvalidState(other)),
        }
    }

    /// Queue an event without waiting for its analysis; full queues are
    /// rejected rather than waited on
    pub fn submit(&self, event: SecurityEvent) -> Result<(), AgentError> {
        let sender = lock(&self.sender).clone().ok_or(AgentError::NotRunning)?;
        match sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(ev)) => {
                warn!("Event queue full, rejecting event {}", ev.id);
                Err(AgentError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(AgentError::NotRunning),
        }
    }

    pub fn submit_finding(&self, finding: &Finding) -> Result<(), AgentError> {
        self.submit(SecurityEvent::from_finding(finding))
    }

    async fn worker_loop(self: Arc<Self>, index: usize, rx: SharedReceiver, shutdown: watch::Receiver<bool>) {
        debug!("Event worker {} started", index);
        let poll = Duration::from_millis(self.config().poll_timeout_ms.max(10));
        loop {
            if *shutdown.borrow() {
                break;
            }
            if self.state() == AgentState::Paused {
                tokio::time::sleep(poll).await;
                continue;
            }
            let next = {
                let mut rx = rx.lock().await;
                tokio::time::timeout(poll, rx.recv()).await
            };
            match next {
                Ok(Some(event)) => {
                    self.process(event).await;
                }
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        debug!("Event worker {} stopped", index);
    }

    async fn metrics_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config().metrics_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.refresh_uptime();
                    let snapshot = self.metrics();
                    let callbacks = lock(&self.callbacks).metrics.clone();
                    for cb in callbacks {
                        if let Err(e) = cb(&snapshot) {
                            error!("Metrics callback failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn hunting_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("🔎 Proactive hunting enabled");
        loop {
            if self.state() == AgentState::Running {
                let sources = lock(&self.hunting).clone();
                if let Some(event) = hunting::hunt(&sources).await {
                    if let Err(e) = self.submit(event) {
                        warn!("Could not queue hunting results: {}", e);
                    }
                }
            }
            let period = Duration::from_secs(self.config().hunting_interval_minutes.max(1) * 60);
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(period) => {}
            }
        }
    }

    /// Run one event through analysis and decision, updating metrics,
    /// history and callbacks
    pub async fn process(&self, event: SecurityEvent) -> Option<Decision> {
        let started = Instant::now();
        let decision = self.decide(&event).await;
        let elapsed = started.elapsed().as_secs_f64();

        let target = self.config().response_time_target_secs;
        if elapsed > target {
            warn!("⏱️ Event {} took {:.1}s (target {:.1}s)", event.id, elapsed, target);
        }

        {
            let mut metrics = lock(&self.metrics);
            metrics.record_event(elapsed);
            if let Some(ref d) = decision {
                metrics.record_decision(d.confidence);
                if d.auto_execute {
                    metrics.total_commands_executed += d.submitted.len() as u64;
                }
            }
        }

        let decision = decision?;
        lock(&self.decisions).push(decision.clone());

        let callbacks = lock(&self.callbacks).clone();
        for cb in &callbacks.decision {
            if let Err(e) = cb(&decision) {
                error!("Decision callback failed for {}: {}", decision.decision_id, e);
            }
        }
        if decision.finding.risk_level.is_severe() {
            let alert = Alert {
                kind: AlertKind::HighSeverityDecision,
                subject_id: decision.decision_id.clone(),
                title: decision.finding.summary.clone(),
                detail: decision.risk_assessment.clone(),
                risk_level: decision.finding.risk_level,
                requires_sudo: decision.mapped_commands.iter().any(|c| c.requires_sudo()),
                timestamp: Utc::now(),
            };
            self.fire_alert(&alert, &callbacks.alert);
        }
        Some(decision)
    }

    async fn decide(&self, event: &SecurityEvent) -> Option<Decision> {
        debug!("Analyzing event {} ({})", event.id, event.event_type);
        let finding = match self.analyzer.analyze(event).await {
            Ok(mut f) => {
                f.normalize();
                f
            }
            Err(e) => {
                warn!("Analysis failed for event {}, skipping: {}", event.id, e);
                return None;
            }
        };

        let cfg = self.config();
        if finding.confidence < cfg.decision_threshold {
            info!(
                "Confidence too low ({:.2} < {:.2}) for event {}, no decision",
                finding.confidence, cfg.decision_threshold, event.id
            );
            return None;
        }

        let mode = self.mode();
        let ctx = MappingContext {
            auto_execute: mode == AgentMode::Auto,
            ..Default::default()
        };
        let commands = self.mapper.map(&finding, &ctx);
        let auto_execute = policy::should_auto_execute(mode, &finding, &commands, &cfg);

        let now = Utc::now();
        let mut decision = Decision {
            decision_id: format!(
                "decision_{}_{}",
                now.format("%Y%m%d_%H%M%S_%6f"),
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            ),
            reasoning: policy::reasoning(&finding, &commands, mode),
            risk_assessment: policy::assess_risk(&finding, &commands),
            recommended_actions: policy::recommended_actions(&finding, &commands),
            confidence: finding.confidence,
            auto_execute,
            submitted: Vec::new(),
            timestamp: now,
            mapped_commands: commands,
            finding,
        };

        if !decision.mapped_commands.is_empty() {
            if auto_execute {
                decision.submitted = self.hand_over(&decision, false);
            } else if mode == AgentMode::SemiAuto && cfg.semi_auto_submit {
                decision.submitted = self.hand_over(&decision, true);
            }
        }

        info!(
            "🧠 Decision {}: confidence {:.2}, auto-execute {}",
            decision.decision_id, decision.confidence, auto_execute
        );
        Some(decision)
    }

    fn hand_over(&self, decision: &Decision, review: bool) -> Vec<String> {
        let mut ids = Vec::new();
        for cmd in &decision.mapped_commands {
            let result = if review {
                self.engine.submit_for_review(cmd.clone())
            } else {
                self.engine.submit(cmd.clone())
            };
            match result {
                Ok(id) => ids.push(id),
                Err(e) => error!("Failed to submit {} for {}: {}", cmd.id(), decision.decision_id, e),
            }
        }
        info!(
            "Handed {} of {} command(s) from {} to the engine",
            ids.len(),
            decision.mapped_commands.len(),
            decision.decision_id
        );
        ids
    }

    fn handle_approval_request(&self, command: &MappedCommand, _ctx: &ExecutionContext) {
        info!("📨 Approval requested for {}", command.id());
        let alert = Alert {
            kind: AlertKind::ApprovalRequest,
            subject_id: command.id().to_string(),
            title: command.description().to_string(),
            detail: command.command().to_string(),
            risk_level: command.risk_level(),
            requires_sudo: command.requires_sudo(),
            timestamp: Utc::now(),
        };
        let callbacks = lock(&self.callbacks).alert.clone();
        self.fire_alert(&alert, &callbacks);
    }

    fn handle_notification(&self, notification: &Notification) {
        debug!("Execution {} -> {}", notification.command_id, notification.status);
        let mut metrics = lock(&self.metrics);
        match notification.status {
            ExecutionStatus::Completed => metrics.successful_responses += 1,
            ExecutionStatus::Failed | ExecutionStatus::Timeout => metrics.failed_responses += 1,
            _ => {}
        }
    }

    fn fire_alert(&self, alert: &Alert, callbacks: &[AlertCallback]) {
        for cb in callbacks {
            if let Err(e) = cb(alert) {
                error!("Alert callback failed for {}: {}", alert.subject_id, e);
            }
        }
    }

    fn refresh_uptime(&self) {
        if let Some((started, _)) = *lock(&self.started) {
            lock(&self.metrics).uptime_hours = started.elapsed().as_secs_f64() / 3600.0;
        }
    }

    pub fn status(&self) -> AgentStatus {
        let (queued_events, queue_capacity) = match lock(&self.sender).as_ref() {
            Some(tx) => (tx.max_capacity() - tx.capacity(), tx.max_capacity()),
            None => (0, self.config().queue_capacity),
        };
        let state = self.state();
        if matches!(state, AgentState::Running | AgentState::Paused) {
            self.refresh_uptime();
        }
        AgentStatus {
            state,
            mode: self.mode(),
            uptime_hours: lock(&self.metrics).uptime_hours,
            started_at: lock(&self.started).map(|(_, at)| at),
            queued_events,
            queue_capacity,
            tasks: lock(&self.tasks).len(),
            engine: self.engine.status(),
        }
    }

    pub fn metrics(&self) -> AgentMetrics {
        lock(&self.metrics).snapshot()
    }

    pub fn decision_history(&self, limit: usize) -> Vec<Decision> {
        lock(&self.decisions).recent(limit)
    }

    pub fn approve_command(&self, id: &str, user: &str, reason: &str) -> Result<(), AgentError> {
        Ok(self.engine.approve(id, user, reason)?)
    }

    pub fn reject_command(&self, id: &str, user: &str, reason: &str) -> Result<(), AgentError> {
        Ok(self.engine.reject(id, user, reason)?)
    }

    pub fn cancel_command(&self, id: &str, reason: &str) -> Result<(), AgentError> {
        Ok(self.engine.cancel(id, reason)?)
    }

    pub fn pending_approvals(&self) -> Vec<ExecutionContext> {
        self.engine.pending_approvals()
    }

    pub fn execution_status(&self, id: &str) -> Option<ExecutionContext> {
        self.engine.execution_status(id)
    }

    /// Auto turns the engine's low-risk and info auto-approval on, Passive turns it off
    pub fn set_mode(&self, mode: AgentMode) {
        let old = std::mem::replace(&mut *lock(&self.mode), mode);
        match mode {
            AgentMode::Auto => self.engine.set_auto_approval(true, true),
            AgentMode::Passive => self.engine.set_auto_approval(false, false),
            AgentMode::SemiAuto | AgentMode::Learning => {}
        }
        info!("Agent mode changed: {} -> {}", old, mode);
    }

    /// Merge a JSON object into the config; queue and worker sizes apply on next start
    pub fn update_config(&self, patch: serde_json::Value) -> Result<AgentConfig, AgentError> {
        let merged = merge_json(&self.config(), patch).map_err(AgentError::InvalidConfig)?;
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = merged.clone();
        info!("Agent config updated");
        Ok(merged)
    }

    pub fn provide_feedback(&self, decision_id: &str, feedback: Feedback) -> Result<FeedbackOutcome, AgentError> {
        if !self.config().enable_learning {
            return Err(AgentError::LearningDisabled);
        }
        let outcome = lock(&self.feedback).record(decision_id, feedback);
        {
            let mut metrics = lock(&self.metrics);
            match outcome {
                FeedbackOutcome::Success => metrics.successful_responses += 1,
                FeedbackOutcome::FalsePositive => metrics.false_positives += 1,
                FeedbackOutcome::FalseNegative => metrics.false_negatives += 1,
                FeedbackOutcome::Neutral => {}
            }
        }
        info!("Feedback recorded for {}: {:?}", decision_id, outcome);
        Ok(outcome)
    }

    pub fn feedback(&self, limit: usize) -> Vec<feedback::FeedbackEntry> {
        lock(&self.feedback).recent(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use analysis::EmbeddedFindingAnalyzer;

    fn agent(config: AgentConfig) -> Arc<DecisionAgent> {
        let engine = Arc::new(ExecutionEngine::new(EngineConfig {
            dry_run: true,
            dry_run_delay_ms: 10,
            ..Default::default()
        }));
        DecisionAgent::new(config, CommandMapper::default(), engine, Arc::new(EmbeddedFindingAnalyzer))
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("semi-auto".parse::<AgentMode>(), Ok(AgentMode::SemiAuto));
        assert_eq!("AUTO".parse::<AgentMode>(), Ok(AgentMode::Auto));
        assert!("yolo".parse::<AgentMode>().is_err());
    }

    #[test]
    fn test_submit_requires_running_agent() {
        let a = agent(AgentConfig::default());
        let f = Finding::new("x", RiskLevel::Low, 0.9);
        assert!(matches!(a.submit_finding(&f), Err(AgentError::NotRunning)));
        assert!(matches!(a.pause(), Err(AgentError::InvalidState(AgentState::Stopped))));
    }

    #[tokio::test]
    async fn test_low_confidence_emits_no_decision() {
        let a = agent(AgentConfig::default());
        let f = Finding::new("Odd login", RiskLevel::High, 0.69);
        assert!(a.process(SecurityEvent::from_finding(&f)).await.is_none());
        let m = a.metrics();
        assert_eq!(m.total_events_processed, 1);
        assert_eq!(m.total_decisions_made, 0);
        assert!(a.decision_history(10).is_empty());
    }

    #[tokio::test]
    async fn test_passive_mode_submits_nothing() {
        let a = agent(AgentConfig {
            mode: AgentMode::Passive,
            ..Default::default()
        });
        let f = Finding::new("Suspicious process", RiskLevel::Low, 0.95);
        let d = a.process(SecurityEvent::from_finding(&f)).await.unwrap();
        assert!(!d.auto_execute);
        assert!(d.submitted.is_empty());
        assert_eq!(a.engine().statistics().queued, 0);
    }

    #[test]
    fn test_set_mode_adjusts_engine_auto_approval() {
        let a = agent(AgentConfig::default());
        a.set_mode(AgentMode::Passive);
        assert!(!a.engine().config().auto_approve_low_risk);
        assert!(!a.engine().config().auto_approve_info);
        a.set_mode(AgentMode::Auto);
        assert!(a.engine().config().auto_approve_low_risk);
        assert_eq!(a.mode(), AgentMode::Auto);
    }

    #[test]
    fn test_feedback_counters() {
        let a = agent(AgentConfig::default());
        let fp = Feedback {
            false_positive: true,
            ..Default::default()
        };
        assert_eq!(a.provide_feedback("d1", fp).unwrap(), FeedbackOutcome::FalsePositive);
        a.provide_feedback(
            "d2",
            Feedback {
                correct: true,
                ..Default::default()
            },
        )
        .unwrap();
        let m = a.metrics();
        assert_eq!((m.successful_responses, m.false_positives), (1, 1));
        assert!((m.precision - 0.5).abs() < 1e-9);
        assert_eq!(a.feedback(10).len(), 2);

        a.update_config(serde_json::json!({ "enable_learning": false })).unwrap();
        assert!(matches!(
            a.provide_feedback("d3", Feedback::default()),
            Err(AgentError::LearningDisabled)
        ));
    }

    #[test]
    fn test_update_config_rejects_bad_values() {
        let a = agent(AgentConfig::default());
        assert!(a.update_config(serde_json::json!({ "risk_tolerance": "reckless" })).is_err());
        assert!(a.update_config(serde_json::json!([1, 2])).is_err());
        assert_eq!(a.config().risk_tolerance, RiskTolerance::Medium);
    }
}
