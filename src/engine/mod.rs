//! Execution Engine
//!
//! Priority-queued, concurrency-limited, approval-gated command runner.
//! Mutable state is split into one mutex per map, each held only for the
//! mutation itself. When more than one is needed they are taken in the
//! order queue, contexts, running.

pub mod audit;
pub mod hooks;
pub mod policy;
pub mod queue;
pub mod runner;
pub mod state;

use crate::mapper::{ExecutionMode, MappedCommand};
use crate::truncate;
use audit::{AuditAction, AuditEntry, AuditTrail};
use chrono::Utc;
use hooks::{ApprovalCallback, AuditCallback, EngineHooks, Notification, NotificationCallback, NotificationKind};
use policy::PolicyDecision;
use queue::CommandQueue;
use runner::{ProcessOutput, RunOutcome, StopReason};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use state::{ApprovalStatus, ExecutionContext, ExecutionResult, ExecutionStatus};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("command {0} not found")]
    NotFound(String),
    #[error("command {0} has already been submitted")]
    DuplicateCommand(String),
    #[error("approval for {id} already decided ({status:?})")]
    AlreadyDecided { id: String, status: ApprovalStatus },
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },
    #[error("command {id} cannot be cancelled while {status}")]
    NotCancellable { id: String, status: ExecutionStatus },
    #[error("command {id} cannot be released: {reason}")]
    NotReleasable { id: String, reason: String },
    #[error("engine is already running")]
    AlreadyRunning,
    #[error("no async runtime available: {0}")]
    NoRuntime(String),
    #[error("invalid config update: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub auto_approve_low_risk: bool,
    pub auto_approve_info: bool,
    pub require_approval_high_risk: bool,
    pub require_approval_critical: bool,
    pub max_concurrent: usize,
    /// Upper bound applied to every command's own timeout
    pub max_execution_secs: u64,
    pub cancel_grace_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub cleanup_interval_secs: u64,
    pub retention_hours: i64,
    pub enable_rollback: bool,
    pub rollback_timeout_secs: u64,
    /// Also roll back commands that timed out
    pub rollback_on_timeout: bool,
    pub dry_run: bool,
    pub dry_run_delay_ms: u64,
    pub elevation_wrapper: String,
    pub audit_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_approve_low_risk: true,
            auto_approve_info: true,
            require_approval_high_risk: true,
            require_approval_critical: true,
            max_concurrent: 5,
            max_execution_secs: 300,
            cancel_grace_secs: 5,
            shutdown_timeout_secs: 30,
            poll_interval_ms: 200,
            cleanup_interval_secs: 3600,
            retention_hours: 24,
            enable_rollback: true,
            rollback_timeout_secs: 60,
            rollback_on_timeout: false,
            dry_run: false,
            dry_run_delay_ms: 2000,
            elevation_wrapper: "sudo -n".to_string(),
            audit_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Stopped,
    Running,
    Stopping,
    Error,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatistics {
    pub total_executed: u64,
    pub successful: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub rollbacks_performed: u64,
    pub auto_approved: u64,
    pub manual_approved: u64,
    pub rejected: u64,
    pub queued: usize,
    pub running: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub dry_run: bool,
    pub queued: usize,
    pub running: usize,
    pub tracked: usize,
    pub pending_approvals: usize,
}

/// Extra gate for conditional-mode commands.
///
/// Evaluated while the engine holds its queue locks; implementations must
/// be quick and must not call back into the engine.
pub trait ConditionEvaluator: Send + Sync {
    fn conditions_met(&self, command: &MappedCommand) -> bool;
}

/// Treats every condition as satisfied
pub struct AlwaysSatisfied;

impl ConditionEvaluator for AlwaysSatisfied {
    fn conditions_met(&self, _command: &MappedCommand) -> bool {
        true
    }
}

struct RunningCommand {
    deadline: Instant,
    stop: Option<oneshot::Sender<StopReason>>,
    handle: Option<JoinHandle<()>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct ExecutionEngine {
    config: RwLock<EngineConfig>,
    state: Mutex<EngineState>,
    queue: Mutex<CommandQueue>,
    contexts: Mutex<HashMap<String, ExecutionContext>>,
    running: Mutex<HashMap<String, RunningCommand>>,
    stats: Mutex<EngineStatistics>,
    audit: Mutex<AuditTrail>,
    hooks: Mutex<EngineHooks>,
    conditions: Arc<dyn ConditionEvaluator>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            audit: Mutex::new(AuditTrail::new(config.audit_capacity)),
            config: RwLock::new(config),
            state: Mutex::new(EngineState::Stopped),
            queue: Mutex::new(CommandQueue::new()),
            contexts: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            stats: Mutex::new(EngineStatistics::default()),
            hooks: Mutex::new(EngineHooks::default()),
            conditions: Arc::new(AlwaysSatisfied),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.conditions = evaluator;
        self
    }

    pub fn config(&self) -> EngineConfig {
        self.config.read().map(|c| c.clone()).unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Merge a JSON object into the current config
    pub fn update_config(&self, patch: serde_json::Value) -> Result<EngineConfig, EngineError> {
        let current = self.config();
        let merged = merge_json(&current, patch).map_err(EngineError::InvalidConfig)?;
        let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
        *guard = merged.clone();
        info!("Execution engine config updated");
        Ok(merged)
    }

    pub fn set_auto_approval(&self, low_risk: bool, info: bool) {
        let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
        guard.auto_approve_low_risk = low_risk;
        guard.auto_approve_info = info;
    }

    pub fn on_approval(&self, cb: ApprovalCallback) {
        lock(&self.hooks).approval.push(cb);
    }

    pub fn on_notification(&self, cb: NotificationCallback) {
        lock(&self.hooks).notification.push(cb);
    }

    /// Audit sinks run in record order and must not call back into the engine
    pub fn on_audit(&self, cb: AuditCallback) {
        lock(&self.hooks).audit.push(cb);
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.state)
    }

    /// Spawn the monitor and cleanup loops on the current tokio runtime
    pub fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        if *state == EngineState::Running {
            return Err(EngineError::AlreadyRunning);
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(e) => {
                *state = EngineState::Error;
                error!("Execution engine failed to start: {}", e);
                return Err(EngineError::NoRuntime(e.to_string()));
            }
        };

        self.shutdown.send_replace(false);
        let mut tasks = lock(&self.tasks);
        tasks.push(runtime.spawn(Arc::clone(self).monitor_loop(self.shutdown.subscribe())));
        tasks.push(runtime.spawn(Arc::clone(self).cleanup_loop(self.shutdown.subscribe())));
        *state = EngineState::Running;

        let cfg = self.config();
        info!(
            "⚙️ Execution engine started (max concurrent: {}, dry run: {})",
            cfg.max_concurrent, cfg.dry_run
        );
        Ok(())
    }

    /// Cancel queued work, give in-flight commands a bounded time to finish,
    /// force-cancel the rest, then join the loops.
    pub async fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if matches!(*state, EngineState::Stopped | EngineState::Stopping) {
                return;
            }
            *state = EngineState::Stopping;
        }
        info!("Stopping execution engine...");
        self.shutdown.send_replace(true);
        let cfg = self.config();

        let queued = lock(&self.queue).drain();
        for id in queued {
            self.cancel_pending(&id, "engine shutdown");
        }

        let deadline = Instant::now() + Duration::from_secs(cfg.shutdown_timeout_secs);
        self.wait_idle(deadline).await;

        let stragglers: Vec<_> = {
            let mut running = lock(&self.running);
            running
                .iter_mut()
                .filter_map(|(id, r)| r.stop.take().map(|tx| (id.clone(), tx)))
                .collect()
        };
        for (id, tx) in stragglers {
            warn!("Force-cancelling {} on shutdown", id);
            let _ = tx.send(StopReason::Cancelled("engine shutdown".to_string()));
        }
        let grace = Duration::from_secs(cfg.cancel_grace_secs + 2);
        self.wait_idle(Instant::now() + grace).await;

        let workers: Vec<_> = lock(&self.running)
            .drain()
            .filter_map(|(_, r)| r.handle)
            .collect();
        for h in workers {
            h.abort();
        }
        let loops: Vec<_> = lock(&self.tasks).drain(..).collect();
        for mut h in loops {
            if tokio::time::timeout(Duration::from_secs(2), &mut h).await.is_err() {
                h.abort();
            }
        }

        *lock(&self.state) = EngineState::Stopped;
        info!("Execution engine stopped");
    }

    async fn wait_idle(&self, deadline: Instant) {
        while !lock(&self.running).is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn submit(&self, command: MappedCommand) -> Result<String, EngineError> {
        let decision = policy::evaluate(&self.config(), &command);
        self.enqueue(command, decision)
    }

    /// Submit without consulting the auto-approval policy
    pub fn submit_for_review(&self, command: MappedCommand) -> Result<String, EngineError> {
        self.enqueue(command, PolicyDecision::RequireApproval("operator review requested"))
    }

    fn enqueue(&self, command: MappedCommand, decision: PolicyDecision) -> Result<String, EngineError> {
        let id = command.id().to_string();
        let rank = command.priority().rank();
        let details = json!({
            "command": command.command(),
            "priority": command.priority(),
            "execution_mode": command.mode(),
            "risk_level": command.risk_level(),
            "requires_sudo": command.requires_sudo(),
        });

        let snapshot = {
            let mut queue = lock(&self.queue);
            let mut contexts = lock(&self.contexts);
            if contexts.contains_key(&id) {
                return Err(EngineError::DuplicateCommand(id));
            }
            let mut ctx = ExecutionContext::new(command);
            ctx.dependencies_met = dependencies_met(&ctx.command, &contexts);
            ctx.conditions_met =
                ctx.command.mode() != ExecutionMode::Conditional || self.conditions.conditions_met(&ctx.command);
            if decision.is_auto() {
                ctx.transition_approval(ApprovalStatus::AutoApproved, "system", decision.reason())?;
            }
            let snapshot = ctx.clone();
            contexts.insert(id.clone(), ctx);
            queue.push(rank, id.clone());
            snapshot
        };

        self.audit(AuditAction::CommandSubmitted, &id, details);
        if decision.is_auto() {
            lock(&self.stats).auto_approved += 1;
            self.audit(AuditAction::CommandAutoApproved, &id, json!({ "reason": decision.reason() }));
        } else {
            info!("📝 {} awaits approval: {}", id, decision.reason());
            self.request_approval(&snapshot);
        }
        Ok(id)
    }

    pub fn approve(&self, id: &str, user: &str, reason: &str) -> Result<(), EngineError> {
        {
            let mut contexts = lock(&self.contexts);
            let ctx = contexts.get_mut(id).ok_or_else(|| EngineError::NotFound(id.to_string()))?;
            // a cancelled command stays cancelled
            if ctx.result.status != ExecutionStatus::Pending {
                return Err(EngineError::InvalidTransition {
                    id: id.to_string(),
                    from: ctx.result.status.to_string(),
                    to: "APPROVED".to_string(),
                });
            }
            ctx.transition_approval(ApprovalStatus::Approved, user, reason)?;
        }
        lock(&self.stats).manual_approved += 1;
        info!("✅ {} approved by {}", id, user);
        self.audit(AuditAction::CommandApproved, id, json!({ "user": user, "reason": reason }));
        Ok(())
    }

    /// Reject a pending approval; the queued execution is cancelled with it
    pub fn reject(&self, id: &str, user: &str, reason: &str) -> Result<(), EngineError> {
        {
            let mut queue = lock(&self.queue);
            let mut contexts = lock(&self.contexts);
            let ctx = contexts.get_mut(id).ok_or_else(|| EngineError::NotFound(id.to_string()))?;
            if !ctx.approval.can_transition_to(ApprovalStatus::Rejected) {
                return Err(EngineError::AlreadyDecided {
                    id: id.to_string(),
                    status: ctx.approval,
                });
            }
            ctx.result.transition(ExecutionStatus::Cancelled)?;
            ctx.transition_approval(ApprovalStatus::Rejected, user, reason)?;
            ctx.result.error = Some(format!("rejected by {}: {}", user, reason));
            queue.remove(id);
        }
        {
            let mut stats = lock(&self.stats);
            stats.rejected += 1;
            stats.cancelled += 1;
        }
        info!("🚫 {} rejected by {}", id, user);
        self.audit(AuditAction::CommandRejected, id, json!({ "user": user, "reason": reason }));
        self.audit(AuditAction::CommandCancelled, id, json!({ "reason": "rejected" }));
        self.notify(id, ExecutionStatus::Cancelled);
        Ok(())
    }

    /// Cancel a queued command, or signal a running one
    pub fn cancel(&self, id: &str, reason: &str) -> Result<(), EngineError> {
        let status = {
            let contexts = lock(&self.contexts);
            contexts
                .get(id)
                .map(|c| c.result.status)
                .ok_or_else(|| EngineError::NotFound(id.to_string()))?
        };

        match status {
            ExecutionStatus::Pending => {
                if self.cancel_pending(id, reason) {
                    Ok(())
                } else {
                    self.cancel(id, reason)
                }
            }
            ExecutionStatus::Running => {
                let sender = lock(&self.running).get_mut(id).and_then(|r| r.stop.take());
                match sender {
                    Some(tx) => {
                        let _ = tx.send(StopReason::Cancelled(reason.to_string()));
                        info!("🛑 Cancel requested for running {}", id);
                        self.audit(AuditAction::CommandCancelRequested, id, json!({ "reason": reason }));
                        Ok(())
                    }
                    None => Err(EngineError::NotCancellable {
                        id: id.to_string(),
                        status,
                    }),
                }
            }
            other => Err(EngineError::NotCancellable {
                id: id.to_string(),
                status: other,
            }),
        }
    }

    /// Returns false if the command was no longer pending
    fn cancel_pending(&self, id: &str, reason: &str) -> bool {
        {
            let mut queue = lock(&self.queue);
            let mut contexts = lock(&self.contexts);
            let Some(ctx) = contexts.get_mut(id) else {
                return false;
            };
            if ctx.result.transition(ExecutionStatus::Cancelled).is_err() {
                return false;
            }
            ctx.result.error = Some(reason.to_string());
            queue.remove(id);
        }
        lock(&self.stats).cancelled += 1;
        self.audit(AuditAction::CommandCancelled, id, json!({ "reason": reason }));
        self.notify(id, ExecutionStatus::Cancelled);
        true
    }

    /// Let an approved manual-mode command be dispatched
    pub fn release(&self, id: &str, user: &str) -> Result<(), EngineError> {
        {
            let mut contexts = lock(&self.contexts);
            let ctx = contexts.get_mut(id).ok_or_else(|| EngineError::NotFound(id.to_string()))?;
            let refuse = |reason: &str| EngineError::NotReleasable {
                id: id.to_string(),
                reason: reason.to_string(),
            };
            if ctx.command.mode() != ExecutionMode::Manual {
                return Err(refuse("not a manual-mode command"));
            }
            if !ctx.approval.is_approved() {
                return Err(refuse("not approved"));
            }
            if ctx.result.status != ExecutionStatus::Pending {
                return Err(refuse("already started or finished"));
            }
            if ctx.released {
                return Err(refuse("already released"));
            }
            ctx.released = true;
        }
        self.audit(AuditAction::CommandReleased, id, json!({ "user": user }));
        Ok(())
    }

    pub fn execution_status(&self, id: &str) -> Option<ExecutionContext> {
        lock(&self.contexts).get(id).cloned()
    }

    /// Contexts awaiting a human decision, in dispatch order
    pub fn pending_approvals(&self) -> Vec<ExecutionContext> {
        let contexts = lock(&self.contexts);
        let mut pending: Vec<_> = contexts
            .values()
            .filter(|c| c.approval == ApprovalStatus::Pending && c.result.status == ExecutionStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.command
                .priority()
                .rank()
                .cmp(&b.command.priority().rank())
                .then_with(|| a.command.id().cmp(b.command.id()))
        });
        pending
    }

    pub fn statistics(&self) -> EngineStatistics {
        let queued = lock(&self.queue).len();
        let running = lock(&self.running).len();
        let mut stats = lock(&self.stats).clone();
        stats.queued = queued;
        stats.running = running;
        stats
    }

    pub fn status(&self) -> EngineStatus {
        let queued = lock(&self.queue).len();
        let (tracked, pending_approvals) = {
            let contexts = lock(&self.contexts);
            let pending = contexts
                .values()
                .filter(|c| c.approval == ApprovalStatus::Pending && c.result.status == ExecutionStatus::Pending)
                .count();
            (contexts.len(), pending)
        };
        EngineStatus {
            state: self.state(),
            dry_run: self.config().dry_run,
            queued,
            running: lock(&self.running).len(),
            tracked,
            pending_approvals,
        }
    }

    pub fn recent_audit(&self, limit: usize) -> Vec<AuditEntry> {
        lock(&self.audit).recent(limit)
    }

    /// Drop terminal contexts that finished before `max_age` ago
    pub fn purge_expired(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut contexts = lock(&self.contexts);
        let running = lock(&self.running);
        let before = contexts.len();
        contexts.retain(|id, ctx| {
            let expired = ctx.result.status.is_terminal()
                && ctx.result.finished_at.map(|t| t < cutoff).unwrap_or(false)
                && !running.contains_key(id);
            !expired
        });
        before - contexts.len()
    }

    async fn monitor_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        debug!("Engine monitor loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.enforce_timeouts();
            self.dispatch_ready();

            let interval = Duration::from_millis(self.config().poll_interval_ms.max(10));
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
        debug!("Engine monitor loop exited");
    }

    async fn cleanup_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let cfg = self.config();
            let interval = Duration::from_secs(cfg.cleanup_interval_secs.max(1));
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    let purged = self.purge_expired(chrono::Duration::hours(cfg.retention_hours));
                    if purged > 0 {
                        info!("🧹 Purged {} expired execution context(s)", purged);
                    }
                }
            }
        }
    }

    fn enforce_timeouts(&self) {
        let now = Instant::now();
        let expired: Vec<_> = {
            let mut running = lock(&self.running);
            running
                .iter_mut()
                .filter(|(_, r)| now >= r.deadline)
                .filter_map(|(id, r)| r.stop.take().map(|tx| (id.clone(), tx)))
                .collect()
        };
        for (id, tx) in expired {
            warn!("⏱️ {} exceeded its timeout, terminating", id);
            let _ = tx.send(StopReason::Timeout);
        }
    }

    /// Dispatch ready commands, highest priority first, up to the concurrency limit
    fn dispatch_ready(self: &Arc<Self>) {
        let cfg = self.config();
        loop {
            let next = {
                let mut queue = lock(&self.queue);
                let mut contexts = lock(&self.contexts);
                let mut running = lock(&self.running);
                if running.len() >= cfg.max_concurrent || queue.is_empty() {
                    break;
                }

                let mut chosen = None;
                for id in queue.ids() {
                    let Some(ctx) = contexts.get(&id) else {
                        queue.remove(&id);
                        continue;
                    };
                    let deps = dependencies_met(&ctx.command, &contexts);
                    let conds = ctx.command.mode() != ExecutionMode::Conditional
                        || self.conditions.conditions_met(&ctx.command);
                    if let Some(ctx) = contexts.get_mut(&id) {
                        ctx.dependencies_met = deps;
                        ctx.conditions_met = conds;
                        if ctx.is_ready() {
                            chosen = Some(id);
                            break;
                        }
                    }
                }
                let Some(id) = chosen else {
                    break;
                };
                let Some(ctx) = contexts.get_mut(&id) else {
                    break;
                };
                if let Err(e) = ctx.result.transition(ExecutionStatus::Running) {
                    error!("Cannot start {}: {}", id, e);
                    queue.remove(&id);
                    continue;
                }
                queue.remove(&id);

                let secs = ctx.command.timeout_secs().min(cfg.max_execution_secs).max(1);
                let (tx, rx) = oneshot::channel();
                running.insert(
                    id.clone(),
                    RunningCommand {
                        deadline: Instant::now() + Duration::from_secs(secs),
                        stop: Some(tx),
                        handle: None,
                    },
                );
                (id, ctx.command.clone(), rx)
            };

            let (id, command, rx) = next;
            info!("▶️ Executing {}: {}", id, truncate(command.command(), 80));
            self.audit(
                AuditAction::CommandStarted,
                &id,
                json!({ "command": command.command(), "dry_run": cfg.dry_run }),
            );
            self.notify(&id, ExecutionStatus::Running);

            let engine = Arc::clone(self);
            let worker_id = id.clone();
            let handle = tokio::spawn(async move { engine.execute(worker_id, command, rx).await });
            if let Some(r) = lock(&self.running).get_mut(&id) {
                r.handle = Some(handle);
            }
        }
    }

    async fn execute(self: Arc<Self>, id: String, command: MappedCommand, stop: oneshot::Receiver<StopReason>) {
        let cfg = self.config();
        let line = runner::command_line(command.command(), command.requires_sudo(), &cfg.elevation_wrapper);
        let grace = Duration::from_secs(cfg.cancel_grace_secs);

        let output = if cfg.dry_run {
            runner::simulate(&line, Duration::from_millis(cfg.dry_run_delay_ms), stop).await
        } else {
            runner::run(&line, None, grace, stop).await
        };
        if let Some(r) = lock(&self.running).get_mut(&id) {
            r.stop = None;
        }

        let (status, error) = classify(&command, &output, cfg.dry_run);
        let action = match status {
            ExecutionStatus::Completed => AuditAction::CommandCompleted,
            ExecutionStatus::Timeout => AuditAction::CommandTimeout,
            ExecutionStatus::Cancelled => AuditAction::CommandCancelled,
            _ => AuditAction::CommandFailed,
        };

        let duration_ms = {
            let mut contexts = lock(&self.contexts);
            match contexts.get_mut(&id) {
                Some(ctx) => {
                    ctx.result.exit_code = output.exit_code;
                    ctx.result.stdout = output.stdout.clone();
                    ctx.result.stderr = output.stderr.clone();
                    ctx.result.error = error.clone();
                    if let Err(e) = ctx.result.transition(status) {
                        error!("{}", e);
                    }
                    ctx.result.duration_ms()
                }
                None => None,
            }
        };

        {
            let mut stats = lock(&self.stats);
            stats.total_executed += 1;
            match status {
                ExecutionStatus::Completed => stats.successful += 1,
                ExecutionStatus::Timeout => stats.timed_out += 1,
                ExecutionStatus::Cancelled => stats.cancelled += 1,
                _ => stats.failed += 1,
            }
        }

        match status {
            ExecutionStatus::Completed => info!("✅ {} completed", id),
            _ => warn!("❌ {} finished as {}: {}", id, status, error.as_deref().unwrap_or("-")),
        }
        self.audit(
            action,
            &id,
            json!({
                "exit_code": output.exit_code,
                "duration_ms": duration_ms,
                "error": error,
                "stderr": truncate(&output.stderr, 500),
            }),
        );
        self.notify(&id, status);

        let wants_rollback = cfg.enable_rollback
            && command.rollback().is_some()
            && (status == ExecutionStatus::Failed
                || (status == ExecutionStatus::Timeout && cfg.rollback_on_timeout));
        if wants_rollback {
            self.rollback(&id, &command, &cfg).await;
        }

        lock(&self.running).remove(&id);
    }

    async fn rollback(&self, id: &str, command: &MappedCommand, cfg: &EngineConfig) {
        let Some(rollback) = command.rollback() else {
            return;
        };
        let line = runner::command_line(rollback, command.requires_sudo(), &cfg.elevation_wrapper);

        if let Some(ctx) = lock(&self.contexts).get_mut(id) {
            ctx.result.rollback = Some(Box::new(ExecutionResult::rollback(id)));
        }
        info!("↩️ Rolling back {}", id);
        self.audit(AuditAction::RollbackStarted, id, json!({ "command": rollback }));
        self.notify(id, ExecutionStatus::Rollback);

        // no one cancels a rollback; keep the sender alive until it ends
        let (_keep, rx) = oneshot::channel();
        let limit = Duration::from_secs(cfg.rollback_timeout_secs.max(1));
        let output = if cfg.dry_run {
            runner::simulate(&line, Duration::from_millis(cfg.dry_run_delay_ms).min(limit), rx).await
        } else {
            runner::run(&line, Some(limit), Duration::from_secs(cfg.cancel_grace_secs), rx).await
        };

        let succeeded = output.outcome == RunOutcome::Exited && output.exit_code == Some(0);
        let status = if succeeded {
            ExecutionStatus::RollbackCompleted
        } else {
            ExecutionStatus::RollbackFailed
        };
        let error = match (&output.outcome, succeeded) {
            (_, true) => None,
            (RunOutcome::TimedOut, _) => Some("rollback timed out".to_string()),
            (RunOutcome::SpawnFailed(e), _) => Some(e.clone()),
            _ => Some(format!("rollback exited with {:?}", output.exit_code)),
        };

        if let Some(nested) = lock(&self.contexts)
            .get_mut(id)
            .and_then(|ctx| ctx.result.rollback.as_mut())
        {
            nested.exit_code = output.exit_code;
            nested.stdout = output.stdout.clone();
            nested.stderr = output.stderr.clone();
            nested.error = error.clone();
            if let Err(e) = nested.transition(status) {
                error!("{}", e);
            }
        }
        lock(&self.stats).rollbacks_performed += 1;

        let action = if succeeded {
            AuditAction::RollbackCompleted
        } else {
            AuditAction::RollbackFailed
        };
        self.audit(action, id, json!({ "exit_code": output.exit_code, "error": error }));
        self.notify(id, status);
    }

    fn audit(&self, action: AuditAction, id: &str, details: serde_json::Value) {
        let sinks = lock(&self.hooks).audit.clone();
        let mut trail = lock(&self.audit);
        let entry = trail.record(action, id, details);
        info!("AUDIT: {} - {} - {}", entry.action, entry.command_id, entry.details);
        for sink in sinks {
            if let Err(e) = sink(&entry) {
                error!("Audit callback failed for {}: {}", id, e);
            }
        }
    }

    fn notify(&self, id: &str, status: ExecutionStatus) {
        let callbacks = lock(&self.hooks).notification.clone();
        if callbacks.is_empty() {
            return;
        }
        let notification = Notification {
            event_type: NotificationKind::for_status(status),
            command_id: id.to_string(),
            status,
            timestamp: Utc::now(),
        };
        for cb in callbacks {
            if let Err(e) = cb(&notification) {
                error!("Notification callback failed for {}: {}", id, e);
            }
        }
    }

    fn request_approval(&self, ctx: &ExecutionContext) {
        let callbacks = lock(&self.hooks).approval.clone();
        for cb in callbacks {
            if let Err(e) = cb(&ctx.command, ctx) {
                error!("Approval callback failed for {}: {}", ctx.command.id(), e);
            }
        }
    }
}

/// Every dependency id is known and completed
fn dependencies_met(command: &MappedCommand, contexts: &HashMap<String, ExecutionContext>) -> bool {
    command.dependencies().iter().all(|dep| {
        contexts
            .get(dep)
            .map(|c| c.result.status == ExecutionStatus::Completed)
            .unwrap_or(false)
    })
}

fn classify(command: &MappedCommand, output: &ProcessOutput, dry_run: bool) -> (ExecutionStatus, Option<String>) {
    match &output.outcome {
        RunOutcome::Stopped(StopReason::Timeout) | RunOutcome::TimedOut => (
            ExecutionStatus::Timeout,
            Some(format!("timed out after {}s", command.timeout_secs())),
        ),
        RunOutcome::Stopped(StopReason::Cancelled(reason)) => {
            (ExecutionStatus::Cancelled, Some(format!("cancelled: {}", reason)))
        }
        RunOutcome::SpawnFailed(e) => (ExecutionStatus::Failed, Some(e.clone())),
        RunOutcome::Exited if dry_run => (ExecutionStatus::Completed, None),
        RunOutcome::Exited => {
            if output.exit_code == Some(0)
                && command.criteria_met(output.exit_code, &output.stdout, &output.stderr)
            {
                (ExecutionStatus::Completed, None)
            } else if output.exit_code == Some(0) {
                (ExecutionStatus::Failed, Some("success criteria not met".to_string()))
            } else {
                (
                    ExecutionStatus::Failed,
                    Some(format!("exited with {:?}", output.exit_code)),
                )
            }
        }
    }
}

/// Overlay a JSON object onto a serializable config
pub(crate) fn merge_json<T>(current: &T, patch: serde_json::Value) -> Result<T, String>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    let serde_json::Value::Object(patch) = patch else {
        return Err("config update must be a JSON object".to_string());
    };
    let mut base = serde_json::to_value(current).map_err(|e| e.to_string())?;
    if let serde_json::Value::Object(ref mut map) = base {
        for (k, v) in patch {
            if !map.contains_key(&k) {
                return Err(format!("unknown config key `{}`", k));
            }
            map.insert(k, v);
        }
    }
    serde_json::from_value(base).map_err(|e| e.to_string())
}
