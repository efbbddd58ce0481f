//! Start command - runs the responder in the foreground

use anyhow::Context;
use falco_responder::agent::analysis::EmbeddedFindingAnalyzer;
use falco_responder::agent::{AgentMode, DecisionAgent};
use falco_responder::alerts::Alerter;
use falco_responder::config::Settings;
use falco_responder::db::{self, Database};
use falco_responder::engine::ExecutionEngine;
use falco_responder::mapper::CommandMapper;
use falco_responder::{truncate, Finding};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const PID_FILE: &str = "/tmp/falco-responder.pid";
const HEARTBEAT: Duration = Duration::from_secs(300);

pub struct StartOptions {
    pub config: Option<PathBuf>,
    pub findings: Option<PathBuf>,
    pub dry_run: bool,
    pub mode: Option<AgentMode>,
}

pub async fn run(opts: StartOptions) -> anyhow::Result<()> {
    if is_running() {
        println!("⚠️  falco-responder is already running!");
        return Ok(());
    }

    let mut settings = Settings::load(opts.config.as_deref())?;
    if opts.dry_run {
        settings.engine.dry_run = true;
    }
    if let Some(mode) = opts.mode {
        settings.agent.mode = mode;
    }

    write_pid()?;
    let _pid_guard = scopeguard::guard((), |_| remove_pid());

    let engine = Arc::new(ExecutionEngine::new(settings.engine.clone()));
    let mapper = CommandMapper::new(settings.mapper.clone());
    let agent = DecisionAgent::new(
        settings.agent.clone(),
        mapper,
        Arc::clone(&engine),
        Arc::new(EmbeddedFindingAnalyzer),
    );

    if settings.audit.enabled {
        let path = settings.audit.resolved_db_path();
        let database = Database::open(&path)
            .with_context(|| format!("failed to open audit store {}", path.display()))?;
        if let Err(e) = database.cleanup(settings.audit.retention_days) {
            warn!("Audit store cleanup failed: {}", e);
        }
        let database = Arc::new(Mutex::new(database));
        engine.on_audit(db::audit_callback(Arc::clone(&database)));
        agent.on_decision(db::decision_callback(database));
        info!("🗄️  Audit store: {}", path.display());
    }

    let alerter = Arc::new(Alerter::new(settings.alerts.clone()));
    if alerter.has_channels() {
        info!("📱 Alerts enabled");
        agent.on_alert(alerter.callback());
    } else {
        warn!("⚠️  No alert channels configured (alerts.telegram / alerts.slack / alerts.discord)");
    }

    agent.start()?;
    info!(
        "✅ falco-responder started in {} mode{}",
        settings.agent.mode,
        if settings.engine.dry_run { " (dry run)" } else { "" }
    );

    let (tx, mut rx) = mpsc::channel::<Finding>(100);
    let source = opts.findings.clone();
    let reader = tokio::spawn(async move {
        if let Err(e) = read_findings(source, tx).await {
            error!("Finding input error: {}", e);
        }
    });

    let mut feeding = true;
    let mut heartbeat = tokio::time::interval(HEARTBEAT);
    heartbeat.tick().await;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            finding = rx.recv(), if feeding => {
                match finding {
                    Some(finding) => {
                        info!("📥 Finding: {} [{}]", truncate(&finding.summary, 60), finding.risk_level);
                        if let Err(e) = agent.submit_finding(&finding) {
                            warn!("Finding dropped: {}", e);
                        }
                    }
                    None => {
                        feeding = false;
                        info!("Finding input closed; press Ctrl-C to stop");
                    }
                }
            }
            _ = heartbeat.tick() => {
                let status = agent.status();
                info!(
                    "💓 Heartbeat - {} queued events, {} queued / {} running commands, {} awaiting approval",
                    status.queued_events,
                    status.engine.queued,
                    status.engine.running,
                    status.engine.pending_approvals
                );
            }
            _ = &mut ctrl_c => {
                info!("🛑 Shutting down...");
                break;
            }
        }
    }

    reader.abort();
    agent.stop().await;

    let metrics = agent.metrics();
    info!(
        "Processed {} events, made {} decisions, auto-executed {} commands",
        metrics.total_events_processed, metrics.total_decisions_made, metrics.total_commands_executed
    );
    info!(
        "Accuracy {:.2}, precision {:.2}, recall {:.2}",
        metrics.accuracy, metrics.precision, metrics.recall
    );
    Ok(())
}

async fn read_findings(path: Option<PathBuf>, tx: mpsc::Sender<Finding>) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            forward_findings(BufReader::new(file), tx).await
        }
        None => forward_findings(BufReader::new(tokio::io::stdin()), tx).await,
    }
}

/// One JSON finding per line; blank lines and `#` comments are skipped
async fn forward_findings<R>(reader: R, tx: mpsc::Sender<Finding>) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<Finding>(line) {
            Ok(mut finding) => {
                finding.normalize();
                if tx.send(finding).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("Skipping line {}: {}", line_no, e),
        }
    }
    debug!("Read {} input lines", line_no);
    Ok(())
}

pub fn is_running() -> bool {
    read_pid()
        .map(|pid| unsafe { libc::kill(pid, 0) == 0 })
        .unwrap_or(false)
}

pub fn read_pid() -> Option<i32> {
    fs::read_to_string(PID_FILE).ok()?.trim().parse::<i32>().ok()
}

fn write_pid() -> anyhow::Result<()> {
    let pid = std::process::id();
    fs::write(PID_FILE, pid.to_string())?;
    Ok(())
}

fn remove_pid() {
    let _ = fs::remove_file(PID_FILE);
}
