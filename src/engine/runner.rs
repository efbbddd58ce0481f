//! Subprocess execution with process-group signalling

use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Captured output is cut at this many bytes per stream
const MAX_CAPTURE: usize = 64 * 1024;
/// How long to wait for pipe readers once the process is gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a running command was stopped from outside
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Cancelled(String),
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Exited,
    TimedOut,
    Stopped(StopReason),
    SpawnFailed(String),
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub outcome: RunOutcome,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    fn failed(message: String) -> Self {
        Self {
            outcome: RunOutcome::SpawnFailed(message),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

pub fn is_privileged() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Prefix with the elevation wrapper when needed and not already root
pub fn command_line(command: &str, requires_sudo: bool, wrapper: &str) -> String {
    if requires_sudo && !is_privileged() && !wrapper.trim().is_empty() {
        format!("{} {}", wrapper.trim(), command)
    } else {
        command.to_string()
    }
}

/// Resolve when a stop is requested; a dropped sender never resolves
async fn stop_requested(rx: &mut oneshot::Receiver<StopReason>) -> StopReason {
    match rx.await {
        Ok(reason) => reason,
        Err(_) => std::future::pending().await,
    }
}

/// Run `sh -c line` in its own process group.
///
/// `timeout` of `None` leaves timing to the caller, which stops the run
/// through `stop` instead.
pub async fn run(
    line: &str,
    timeout: Option<Duration>,
    grace: Duration,
    mut stop: oneshot::Receiver<StopReason>,
) -> ProcessOutput {
    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(line)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
    {
        Ok(c) => c,
        Err(e) => return ProcessOutput::failed(format!("failed to spawn: {}", e)),
    };

    let pgid = child.id();
    debug!("Spawned `{}` as process group {:?}", line, pgid);

    let stdout = child.stdout.take().map(|s| tokio::spawn(read_capped(s)));
    let stderr = child.stderr.take().map(|s| tokio::spawn(read_capped(s)));

    let timer = async {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    let (outcome, status) = tokio::select! {
        res = child.wait() => match res {
            Ok(status) => (RunOutcome::Exited, Some(status)),
            Err(e) => (RunOutcome::SpawnFailed(format!("wait failed: {}", e)), None),
        },
        _ = timer => {
            let status = terminate_group(&mut child, pgid, grace).await;
            (RunOutcome::TimedOut, status)
        }
        reason = stop_requested(&mut stop) => {
            let status = terminate_group(&mut child, pgid, grace).await;
            (RunOutcome::Stopped(reason), status)
        }
    };

    ProcessOutput {
        outcome,
        exit_code: status.and_then(|s| s.code()),
        stdout: collect(stdout).await,
        stderr: collect(stderr).await,
    }
}

/// Dry run: wait out the simulated delay (or a stop) and report success
pub async fn simulate(line: &str, delay: Duration, mut stop: oneshot::Receiver<StopReason>) -> ProcessOutput {
    tokio::select! {
        _ = tokio::time::sleep(delay) => ProcessOutput {
            outcome: RunOutcome::Exited,
            exit_code: Some(0),
            stdout: format!("[dry-run] {}", line),
            stderr: String::new(),
        },
        reason = stop_requested(&mut stop) => ProcessOutput {
            outcome: RunOutcome::Stopped(reason),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        },
    }
}

/// SIGTERM the group, wait `grace`, then SIGKILL whatever is left
async fn terminate_group(child: &mut Child, pgid: Option<u32>, grace: Duration) -> Option<ExitStatus> {
    if let Some(pgid) = pgid {
        signal_group(pgid, libc::SIGTERM);
    }
    let status = match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        _ => {
            warn!("Process group {:?} ignored SIGTERM, killing", pgid);
            None
        }
    };
    if let Some(pgid) = pgid {
        signal_group(pgid, libc::SIGKILL);
    }
    match status {
        Some(s) => Some(s),
        None => {
            let _ = child.start_kill();
            child.wait().await.ok()
        }
    }
}

fn signal_group(pgid: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    unsafe {
        libc::killpg(pgid, signal);
    }
}

async fn read_capped<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = MAX_CAPTURE.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn collect(handle: Option<tokio::task::JoinHandle<String>>) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
        Ok(Ok(s)) => s,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never() -> oneshot::Receiver<StopReason> {
        let (tx, rx) = oneshot::channel();
        // keep the sender alive for the test's duration
        std::mem::forget(tx);
        rx
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let out = run("echo hello; echo oops 1>&2; exit 3", None, Duration::from_secs(1), never()).await;
        assert_eq!(out.outcome, RunOutcome::Exited);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_timeout_kills_group() {
        let start = std::time::Instant::now();
        let out = run(
            "sleep 30",
            Some(Duration::from_millis(200)),
            Duration::from_secs(1),
            never(),
        )
        .await;
        assert_eq!(out.outcome, RunOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stop_request() {
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move { run("sleep 30", None, Duration::from_secs(1), rx).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(StopReason::Cancelled("test".into())).unwrap();
        let out = handle.await.unwrap();
        assert_eq!(out.outcome, RunOutcome::Stopped(StopReason::Cancelled("test".into())));
    }

    #[tokio::test]
    async fn test_simulate_succeeds() {
        let out = simulate("kill -9 1", Duration::from_millis(10), never()).await;
        assert_eq!(out.exit_code, Some(0));
        assert!(out.stdout.contains("kill -9 1"));
    }

    #[test]
    fn test_command_line_wrapper() {
        let line = command_line("iptables -L", true, "sudo -n");
        if is_privileged() {
            assert_eq!(line, "iptables -L");
        } else {
            assert_eq!(line, "sudo -n iptables -L");
        }
        assert_eq!(command_line("ls", false, "sudo -n"), "ls");
    }
}
