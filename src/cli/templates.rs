//! Templates command - lists the command catalog

use falco_responder::mapper::templates::all_templates;
use falco_responder::mapper::CommandCategory;

pub fn run() {
    let templates = all_templates();
    println!("📋 Command templates ({})", templates.len());

    let mut current: Option<CommandCategory> = None;
    let mut sorted = templates;
    sorted.sort_by_key(|t| t.category);
    for t in sorted {
        if current != Some(t.category) {
            println!("\n[{}]", t.category);
            current = Some(t.category);
        }
        let sudo = if t.requires_sudo { " 🔑" } else { "" };
        println!("  {:<24} {:<8}{} {}", t.name, t.risk_level.as_str(), sudo, t.description);
        println!("  {:<24} $ {}", "", t.template);
        if !t.required_params.is_empty() {
            println!("  {:<24} params: {}", "", t.required_params.join(", "));
        }
    }
}
