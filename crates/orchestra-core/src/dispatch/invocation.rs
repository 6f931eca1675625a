use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ContextBundle;
use crate::registry::Agent;
use crate::solution::SolutionId;

/// Why an agent is being invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Purpose {
    Generate,
    Evaluate { solution: SolutionId, author: String },
    Clarify,
}

impl Purpose {
    pub fn label(&self) -> &'static str {
        match self {
            Purpose::Generate => "generate",
            Purpose::Evaluate { .. } => "evaluate",
            Purpose::Clarify => "clarify",
        }
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One planned agent call, before it starts.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub agent: Agent,
    pub purpose: Purpose,
    pub prompt: String,
    pub context: Option<Arc<ContextBundle>>,
    pub timeout: Duration,
}

impl DispatchRequest {
    pub fn new(agent: Agent, purpose: Purpose, prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent,
            purpose,
            prompt: prompt.into(),
            context: None,
            timeout,
        }
    }

    pub fn with_context(mut self, context: Option<Arc<ContextBundle>>) -> Self {
        self.context = context;
        self
    }
}

/// A running agent call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub agent: Agent,
    pub purpose: Purpose,
    pub prompt: String,
    pub context: Option<Arc<ContextBundle>>,
    pub started_at: DateTime<Utc>,
    pub timeout: Duration,
}

impl Invocation {
    pub(crate) fn start(request: DispatchRequest) -> Self {
        Self {
            agent: request.agent,
            purpose: request.purpose,
            prompt: request.prompt,
            context: request.context,
            started_at: Utc::now(),
            timeout: request.timeout,
        }
    }

    /// Text delivered to the agent: rendered context, then the request.
    pub fn payload(&self) -> String {
        match &self.context {
            Some(context) => format!("{}## Request\n{}\n", context.render(), self.prompt),
            None => self.prompt.clone(),
        }
    }
}

/// Output captured from a successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    pub agent: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
    pub started_at: DateTime<Utc>,
}

/// Per-invocation failure. Never fatal on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchFailure {
    #[error("unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("timed out after {limit_ms} ms")]
    Timeout { limit_ms: u64 },

    #[error("exited with status {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("i/o failure: {message}")]
    Io { message: String },
}

/// Outcome for one requested agent.
#[derive(Debug, Clone)]
pub struct DispatchEntry {
    pub agent: String,
    pub purpose: Purpose,
    pub result: Result<RawResponse, DispatchFailure>,
}

impl DispatchEntry {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.result, Err(DispatchFailure::Unavailable { .. }))
    }
}
