use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::Invocation;
use crate::registry::Agent;

/// Captured process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    /// `-1` when the process ended without a status code (signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Executes agent invocations.
///
/// The dispatcher owns timeouts: a `run` future may be dropped at any await
/// point and must not leave work behind when it is.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Whether the agent's command can be launched at all.
    async fn probe(&self, agent: &Agent) -> bool;

    async fn run(&self, invocation: &Invocation) -> io::Result<CapturedOutput>;
}

/// Runs agents as local subprocesses.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    workdir: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run agents with `dir` as their current directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: Some(dir.into()),
        }
    }
}

#[async_trait]
impl AgentRunner for ProcessRunner {
    async fn probe(&self, agent: &Agent) -> bool {
        match &self.workdir {
            Some(dir) if agent.command.contains('/') => {
                which::which_in(&agent.command, std::env::var_os("PATH"), dir).is_ok()
            }
            _ => which::which(&agent.command).is_ok(),
        }
    }

    async fn run(&self, invocation: &Invocation) -> io::Result<CapturedOutput> {
        let agent = &invocation.agent;
        let payload = invocation.payload();
        let stdin_payload = agent.stdin_payload(&payload);

        let mut cmd = Command::new(&agent.command);
        cmd.args(agent.command_args(&payload))
            .stdin(if stdin_payload.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        debug!(agent = %agent.name, command = %agent.command, "spawning agent");
        let mut child = cmd.spawn()?;

        if let (Some(input), Some(mut stdin)) = (stdin_payload, child.stdin.take()) {
            let bytes = input.as_bytes().to_vec();
            // Fed concurrently so a chatty child cannot deadlock on full pipes.
            tokio::spawn(async move {
                if stdin.write_all(&bytes).await.is_ok() {
                    let _ = stdin.shutdown().await;
                }
            });
        }

        let output = child.wait_with_output().await?;
        Ok(CapturedOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
