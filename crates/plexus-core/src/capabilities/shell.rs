//! Shell capability - gated command execution with a timeout and an output ceiling.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::safety::{self, PathPolicy};
use super::{opt_str_arg, str_arg, Args, Capability, CapabilitySchema, ParamType};
use crate::config::CapabilityLimits;
use crate::error::CapabilityError;

/// Captured output of a finished command.
#[derive(Debug)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Run a shell command after the safety gate approves it.
pub struct ExecuteCommand {
    schema: CapabilitySchema,
    policy: PathPolicy,
    timeout: Duration,
    max_output: usize,
}

impl ExecuteCommand {
    pub fn new(limits: &CapabilityLimits) -> Self {
        Self {
            schema: CapabilitySchema::new(
                "execute_command",
                "Execute a shell command and return stdout, stderr and the exit code. \
                 Destructive commands are refused.",
            )
            .param("command", ParamType::String, "Command line passed to the shell", true)
            .param("cwd", ParamType::String, "Working directory for the command", false),
            policy: PathPolicy::from_limits(limits),
            timeout: Duration::from_secs(limits.shell_timeout_secs),
            max_output: limits.max_shell_output_bytes,
        }
    }
}

#[async_trait]
impl Capability for ExecuteCommand {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn invoke(&self, args: Args) -> Result<Map<String, Value>, CapabilityError> {
        let command = str_arg(&args, "command")?;
        if command.trim().is_empty() {
            return Err(CapabilityError::invalid("command", "must not be empty"));
        }
        safety::check_command(command)?;

        let cwd = match opt_str_arg(&args, "cwd") {
            Some(dir) => Some(self.policy.check_path(dir)?),
            None => None,
        };

        let output = run_shell(command, cwd, self.timeout, self.max_output).await?;

        let mut payload = Map::new();
        payload.insert("command".into(), json!(command));
        payload.insert("stdout".into(), json!(output.stdout));
        payload.insert("stderr".into(), json!(output.stderr));
        payload.insert("exitCode".into(), json!(output.exit_code));
        Ok(payload)
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Spawn `command` and collect its output. The child is killed when the
/// timeout elapses or when combined output exceeds `max_output` bytes.
pub async fn run_shell(
    command: &str,
    cwd: Option<PathBuf>,
    timeout: Duration,
    max_output: usize,
) -> Result<ShellOutput, CapabilityError> {
    let mut cmd = shell_command(command);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| CapabilityError::Execution(format!("Failed to spawn shell: {}", e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CapabilityError::Execution("Failed to capture stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| CapabilityError::Execution("Failed to capture stderr".into()))?;

    tracing::info!(command = %command, "Running shell command");

    let used = AtomicUsize::new(0);
    let collect = async {
        let (out, err) = tokio::try_join!(
            read_limited(stdout, &used, max_output),
            read_limited(stderr, &used, max_output)
        )?;
        let status = child.wait().await?;
        Ok::<_, CapabilityError>((out, err, status))
    };

    let outcome = tokio::time::timeout(timeout, collect).await;
    match outcome {
        Ok(Ok((out, err, status))) => Ok(ShellOutput {
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
            exit_code: status.code(),
        }),
        Ok(Err(e)) => {
            let _ = child.kill().await;
            tracing::warn!(command = %command, error = %e, "Shell command aborted");
            Err(e)
        }
        Err(_) => {
            let _ = child.kill().await;
            tracing::warn!(command = %command, timeout_secs = timeout.as_secs(), "Shell command timed out");
            Err(CapabilityError::Timeout(timeout.as_secs()))
        }
    }
}

async fn read_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    used: &AtomicUsize,
    limit: usize,
) -> Result<Vec<u8>, CapabilityError> {
    let mut captured = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(captured);
        }
        let total = used.fetch_add(n, Ordering::SeqCst) + n;
        if total > limit {
            return Err(CapabilityError::OutputTooLarge { limit });
        }
        captured.extend_from_slice(&chunk[..n]);
    }
}
