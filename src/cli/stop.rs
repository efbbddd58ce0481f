//! Stop command - signals the running responder

use super::start::{is_running, read_pid, PID_FILE};
use std::time::Duration;
use tracing::info;

const STOP_WAIT: Duration = Duration::from_secs(30);

pub async fn run() -> anyhow::Result<()> {
    let Some(pid) = read_pid().filter(|_| is_running()) else {
        println!("🔴 falco-responder is not running");
        let _ = std::fs::remove_file(PID_FILE);
        return Ok(());
    };

    info!("Stopping falco-responder (pid {})...", pid);
    // SIGINT takes the same path as Ctrl-C in the foreground
    if unsafe { libc::kill(pid, libc::SIGINT) } != 0 {
        anyhow::bail!("failed to signal pid {}: {}", pid, std::io::Error::last_os_error());
    }

    let deadline = tokio::time::Instant::now() + STOP_WAIT;
    while is_running() {
        if tokio::time::Instant::now() >= deadline {
            println!("⚠️  falco-responder did not exit within {}s", STOP_WAIT.as_secs());
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    println!("✅ falco-responder stopped");
    Ok(())
}
