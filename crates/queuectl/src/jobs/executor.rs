use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Exited { code: i32 },
    Signaled { signal: i32 },
    TimedOut { after: Duration },
    SpawnFailed { message: String },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded)
    }

    pub fn exit_code(&self) -> Option<i64> {
        match self {
            ExecutionOutcome::Succeeded => Some(0),
            ExecutionOutcome::Exited { code } => Some(i64::from(*code)),
            _ => None,
        }
    }

    /// Operator-facing reason for a failed attempt.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ExecutionOutcome::Succeeded => None,
            ExecutionOutcome::Exited { code } => Some(format!("exited with code {code}")),
            ExecutionOutcome::Signaled { signal } => Some(format!("terminated by signal {signal}")),
            ExecutionOutcome::TimedOut { after } => {
                Some(format!("timed out after {}s", after.as_secs_f64()))
            }
            ExecutionOutcome::SpawnFailed { message } => Some(format!("failed to start: {message}")),
        }
    }
}

/// Runs job commands through a shell, one child per attempt.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: String,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
        }
    }
}

impl CommandExecutor {
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Run `command` with combined stdout/stderr written to `log_path`
    /// (truncated first). The child and its whole process group are killed
    /// if it is still running after `timeout`.
    pub async fn run(&self, command: &str, log_path: &Path, timeout: Duration) -> ExecutionOutcome {
        let (stdout, stderr) = match open_log(log_path) {
            Ok(files) => files,
            Err(err) => {
                return ExecutionOutcome::SpawnFailed {
                    message: format!("cannot open log {}: {err}", log_path.display()),
                }
            }
        };

        let mut cmd = std::process::Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        // own process group so a timeout can take down everything the command spawned
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut cmd = Command::from(cmd);
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                return ExecutionOutcome::SpawnFailed {
                    message: err.to_string(),
                }
            }
        };

        let started = Instant::now();
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "command exited");
                classify(status)
            }
            Ok(Err(err)) => {
                terminate_group(&mut child).await;
                ExecutionOutcome::SpawnFailed {
                    message: format!("wait failed: {err}"),
                }
            }
            Err(_) => {
                terminate_group(&mut child).await;
                append_note(
                    log_path,
                    &format!("[queuectl] attempt killed after {}s timeout", timeout.as_secs_f64()),
                );
                ExecutionOutcome::TimedOut { after: timeout }
            }
        }
    }
}

fn open_log(path: &Path) -> std::io::Result<(File, File)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    // both streams share one file description, so writes interleave in order
    let dup = file.try_clone()?;
    Ok((file, dup))
}

fn append_note(path: &Path, note: &str) {
    let res = OpenOptions::new()
        .append(true)
        .open(path)
        .and_then(|mut f| writeln!(f, "{note}"));
    if let Err(err) = res {
        warn!(path = %path.display(), error = %err, "failed to append to job log");
    }
}

fn classify(status: ExitStatus) -> ExecutionOutcome {
    if status.success() {
        return ExecutionOutcome::Succeeded;
    }
    if let Some(code) = status.code() {
        return ExecutionOutcome::Exited { code };
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExecutionOutcome::Signaled { signal };
        }
    }
    ExecutionOutcome::Exited { code: -1 }
}

async fn terminate_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // the child leads its own group, so its pid is the group id
            let pgid = pid as libc::pid_t;
            // SAFETY: killpg only sends a signal; an already-gone group yields ESRCH.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
    if let Err(err) = child.kill().await {
        debug!(error = %err, "child already exited");
    }
}
