//! Map command - dry mapping of a finding file

use anyhow::Context;
use falco_responder::config::Settings;
use falco_responder::mapper::{base_mode, CommandMapper, MappingContext};
use falco_responder::Finding;
use std::path::Path;

pub async fn run(file: &Path, config: Option<&Path>, auto_execute: bool, json: bool) -> anyhow::Result<()> {
    let settings = Settings::load(config)?;
    let content = std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    // YAML parsing also covers JSON input
    let mut finding: Finding =
        serde_yaml::from_str(&content).with_context(|| format!("invalid finding in {}", file.display()))?;
    finding.normalize();

    let mapper = CommandMapper::new(settings.mapper);
    let ctx = MappingContext {
        auto_execute,
        ..Default::default()
    };
    let commands = mapper.map(&finding, &ctx);

    if json {
        println!("{}", serde_json::to_string_pretty(&commands)?);
        return Ok(());
    }

    println!("🔎 {} [{}] confidence {:.2}", finding.summary, finding.risk_level, finding.confidence);
    println!("   base mode: {}", base_mode(finding.risk_level, &ctx));
    if commands.is_empty() {
        println!("\nNo response commands mapped");
        return Ok(());
    }

    for (i, cmd) in commands.iter().enumerate() {
        let validation = mapper.validate_command(cmd);
        println!(
            "\n{}. {} ({}, {} priority, {} mode, risk {})",
            i + 1,
            cmd.id(),
            cmd.category(),
            cmd.priority(),
            cmd.mode(),
            cmd.risk_level()
        );
        println!("   $ {}", cmd.command());
        if let Some(rollback) = cmd.rollback() {
            println!("   ↩ {}", rollback);
        }
        if cmd.requires_sudo() {
            println!("   🔑 requires elevated privileges");
        }
        if !cmd.dependencies().is_empty() {
            println!("   after: {}", cmd.dependencies().join(", "));
        }
        let mark = if validation.valid { "✅" } else { "❌" };
        println!("   {} {}", mark, cmd.description());
        for e in &validation.errors {
            println!("   error: {}", e);
        }
        for w in &validation.warnings {
            println!("   warning: {}", w);
        }
        for r in &validation.recommendations {
            println!("   hint: {}", r);
        }
    }
    Ok(())
}
