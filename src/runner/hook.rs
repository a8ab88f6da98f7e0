//! Subprocess execution primitive: run an argument vector with a given
//! environment and working directory, stream its output to the log, and
//! hand back the exit code plus captured output.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::TaskError;

use super::types::ExecutionResult;

/// Runs one subprocess at a time and remembers the live child's pid so a
/// watchdog can signal it from another thread.
#[derive(Debug, Clone, Default)]
pub struct SubprocessHook {
    child_pid: Arc<Mutex<Option<u32>>>,
}

impl SubprocessHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `argv` with exactly `env` as its environment, in `cwd`, and
    /// wait for it. Stdout and stderr are merged line-by-line into the
    /// captured output and echoed to the log as they arrive.
    ///
    /// On unix the child gets its own session (and thus process group),
    /// so a group-wide interrupt reaches any processes the tool forks.
    pub async fn run_command(
        &self,
        argv: &[String],
        env: &HashMap<String, String>,
        cwd: &Path,
    ) -> Result<ExecutionResult, TaskError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| TaskError::Spawn("empty argument vector".to_string()))?;
        info!(program = %program, cwd = %cwd.display(), "running command: {}", argv.join(" "));

        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .envs(env)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use nix::unistd::setsid;
            unsafe {
                command.pre_exec(|| {
                    setsid()?;
                    Ok(())
                });
            }
        }

        let mut child = command
            .spawn()
            .map_err(|e| TaskError::Spawn(format!("{program}: {e}")))?;

        self.set_pid(child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TaskError::Spawn("no stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TaskError::Spawn("no stderr".to_string()))?;

        let (line_tx, mut line_rx) = mpsc::channel::<String>(1024);
        let out_task = tokio::spawn(pump_lines(stdout, line_tx.clone()));
        let err_task = tokio::spawn(pump_lines(stderr, line_tx));

        let mut lines = Vec::new();
        while let Some(line) = line_rx.recv().await {
            info!(target: "dbt", "{}", line);
            lines.push(line);
        }

        let status = child.wait().await;
        self.set_pid(None);
        out_task.await.ok();
        err_task.await.ok();

        let status = status?;
        Ok(ExecutionResult {
            exit_code: status.code().unwrap_or(-1),
            output: lines.join("\n"),
        })
    }

    /// Interrupt the whole process group of the running subprocess, so
    /// the tool can forward cancellation to any live warehouse queries
    /// before exiting. No-op when nothing is running.
    pub fn interrupt_group(&self) {
        let Some(pid) = self.current_pid() else {
            return;
        };
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            info!(pid, "sending SIGINT to process group");
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGINT) {
                warn!(pid, "failed to interrupt process group: {e}");
            }
        }
        #[cfg(not(unix))]
        {
            warn!(pid, "process-group interrupt not supported on this platform");
        }
    }

    /// Graceful terminate delivered to the subprocess only. No-op when
    /// nothing is running.
    pub fn send_sigterm(&self) {
        let Some(pid) = self.current_pid() else {
            return;
        };
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            info!(pid, "sending SIGTERM to process");
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(pid, "failed to terminate process: {e}");
            }
        }
        #[cfg(not(unix))]
        {
            warn!(pid, "terminate signal not supported on this platform");
        }
    }

    fn current_pid(&self) -> Option<u32> {
        self.child_pid.lock().ok().and_then(|guard| *guard)
    }

    fn set_pid(&self, pid: Option<u32>) {
        if let Ok(mut guard) = self.child_pid.lock() {
            *guard = pid;
        }
    }
}

async fn pump_lines(reader: impl AsyncRead + Unpin, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}
