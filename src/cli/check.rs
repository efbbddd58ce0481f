//! Check command - runs the safety checker on a command line

use falco_responder::mapper::SafetyChecker;

pub fn run(command: &str) -> anyhow::Result<()> {
    let checker = SafetyChecker::default();
    match checker.check(command) {
        Ok(()) => {
            println!("✅ Command passes safety checks");
            Ok(())
        }
        Err(violation) => {
            println!("❌ Unsafe command: {}", violation);
            std::process::exit(1);
        }
    }
}
