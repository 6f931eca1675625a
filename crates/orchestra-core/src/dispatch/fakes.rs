//! In-process [`AgentRunner`] for tests.
//!
//! `ScriptedRunner` answers each invocation from a closure, so tests can
//! shape replies per agent and purpose without spawning processes.

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{AgentRunner, CapturedOutput, Invocation};
use crate::registry::Agent;

/// What a scripted agent does for one invocation.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    delay: Duration,
    outcome: ScriptedOutcome,
}

#[derive(Debug, Clone)]
enum ScriptedOutcome {
    Output(CapturedOutput),
    IoError(String),
}

impl ScriptedReply {
    /// Exit 0 with `stdout`.
    pub fn respond(stdout: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: ScriptedOutcome::Output(CapturedOutput {
                exit_code: 0,
                stdout: stdout.into(),
                stderr: String::new(),
            }),
        }
    }

    /// Exit with `code` and `stderr`.
    pub fn exit(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: ScriptedOutcome::Output(CapturedOutput {
                exit_code: code,
                stdout: String::new(),
                stderr: stderr.into(),
            }),
        }
    }

    /// Fail the run with an i/o error.
    pub fn io_error(message: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: ScriptedOutcome::IoError(message.into()),
        }
    }

    /// Sleep for `delay` before replying.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Script = dyn Fn(&Invocation) -> ScriptedReply + Send + Sync;

/// Closure-driven runner that records every invocation it receives.
#[derive(Clone)]
pub struct ScriptedRunner {
    script: Arc<Script>,
    unavailable: HashSet<String>,
    calls: Arc<Mutex<Vec<Invocation>>>,
}

impl ScriptedRunner {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&Invocation) -> ScriptedReply + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            unavailable: HashSet::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Agents whose probe fails.
    pub fn with_unavailable<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.unavailable
            .extend(names.into_iter().map(|n| n.as_ref().to_ascii_lowercase()));
        self
    }

    /// Invocations that reached `run`, in start order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    async fn probe(&self, agent: &Agent) -> bool {
        !self.unavailable.contains(&agent.name.to_ascii_lowercase())
    }

    async fn run(&self, invocation: &Invocation) -> io::Result<CapturedOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }
        let reply = (self.script)(invocation);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        match reply.outcome {
            ScriptedOutcome::Output(output) => Ok(output),
            ScriptedOutcome::IoError(message) => Err(io::Error::new(io::ErrorKind::Other, message)),
        }
    }
}
