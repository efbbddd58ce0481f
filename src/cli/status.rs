//! Status and audit commands - read the PID file and the audit store

use super::start::{is_running, read_pid};
use falco_responder::config::Settings;
use falco_responder::db::Database;
use falco_responder::truncate;
use std::path::Path;

pub async fn run(config: Option<&Path>) -> anyhow::Result<()> {
    println!("🛡️ falco-responder Status");
    println!("─────────────────");

    match read_pid().filter(|_| is_running()) {
        Some(pid) => println!("Status: 🟢 Running (pid {})", pid),
        None => {
            println!("Status: 🔴 Stopped");
            println!("\nRun 'falco-responder start' to start the responder");
        }
    }

    let settings = Settings::load(config)?;
    println!("Mode:    {}", settings.agent.mode);
    println!("Dry run: {}", settings.engine.dry_run);

    let Some(db) = open_store(&settings)? else {
        return Ok(());
    };

    let decisions = db.recent_decisions(5)?;
    if decisions.is_empty() {
        println!("\nNo decisions recorded yet");
    } else {
        println!("\nRecent decisions:");
        for d in decisions {
            println!(
                "  {} [{}] {:.2} {} cmd(s){} - {}",
                d.timestamp,
                d.risk_level.to_uppercase(),
                d.confidence,
                d.commands,
                if d.auto_execute { " auto" } else { "" },
                truncate(&d.summary, 60)
            );
        }
    }
    Ok(())
}

pub async fn audit(config: Option<&Path>, limit: usize, verify: bool) -> anyhow::Result<()> {
    let settings = Settings::load(config)?;
    let Some(db) = open_store(&settings)? else {
        return Ok(());
    };

    let entries = db.recent_audit(limit)?;
    if entries.is_empty() {
        println!("No audit entries");
    }
    for e in &entries {
        println!(
            "#{:<5} {} {:<28} {} {}",
            e.sequence,
            e.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            e.action.as_str(),
            e.command_id,
            truncate(&e.details.to_string(), 80)
        );
    }

    if verify {
        if db.verify_chain()? {
            println!("\n🔐 Audit chain intact");
        } else {
            println!("\n🚨 Audit chain verification FAILED");
            std::process::exit(1);
        }
    }
    Ok(())
}

fn open_store(settings: &Settings) -> anyhow::Result<Option<Database>> {
    if !settings.audit.enabled {
        println!("\nAudit store disabled");
        return Ok(None);
    }
    let path = settings.audit.resolved_db_path();
    if !path.exists() {
        println!("\nNo audit store at {}", path.display());
        return Ok(None);
    }
    Ok(Some(Database::open(&path)?))
}
