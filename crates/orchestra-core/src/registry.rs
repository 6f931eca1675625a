//! Agent registry and invocation descriptors.
//!
//! The registry is an ordered list: registration order is the tie-break of
//! last resort in ranking and the order in which dispatch results are
//! reported, so it must be stable across runs.

use serde::{Deserialize, Serialize};

use crate::error::{OrchestraError, Result};

/// Placeholder substituted with the rendered payload in argument templates.
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// How the prompt payload reaches the agent process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptDelivery {
    /// Payload is written to stdin, which is then closed.
    #[default]
    Stdin,
    /// Payload replaces [`PROMPT_PLACEHOLDER`] in the argument template.
    Argument,
}

/// What an agent may be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default = "enabled")]
    pub generate: bool,
    #[serde(default = "enabled")]
    pub evaluate: bool,
}

fn enabled() -> bool {
    true
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            generate: true,
            evaluate: true,
        }
    }
}

/// A known external agent. Immutable once the registry is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique name (case-insensitive).
    pub name: String,
    /// Executable name or path.
    pub command: String,
    /// Argument template.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub delivery: PromptDelivery,
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl Agent {
    /// Stdin-fed agent with no extra arguments.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            delivery: PromptDelivery::Stdin,
            capabilities: Capabilities::default(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delivery(mut self, delivery: PromptDelivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Arguments for one invocation carrying `payload`.
    ///
    /// With stdin delivery the template is passed through untouched.
    pub fn command_args(&self, payload: &str) -> Vec<String> {
        match self.delivery {
            PromptDelivery::Stdin => self.args.clone(),
            PromptDelivery::Argument => {
                let mut args: Vec<String> = self
                    .args
                    .iter()
                    .map(|a| a.replace(PROMPT_PLACEHOLDER, payload))
                    .collect();
                if !self.args.iter().any(|a| a.contains(PROMPT_PLACEHOLDER)) {
                    args.push(payload.to_string());
                }
                args
            }
        }
    }

    /// Bytes to feed on stdin, if this agent reads its prompt there.
    pub fn stdin_payload<'a>(&self, payload: &'a str) -> Option<&'a str> {
        match self.delivery {
            PromptDelivery::Stdin => Some(payload),
            PromptDelivery::Argument => None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OrchestraError::Config("agent name must not be empty".into()));
        }
        if self.command.trim().is_empty() {
            return Err(OrchestraError::Config(format!(
                "agent {} has an empty command",
                self.name
            )));
        }
        Ok(())
    }
}

/// Agents known out of the box when no table is configured.
pub fn builtin_agents() -> Vec<Agent> {
    vec![
        Agent::new("claude", "claude").with_args(["-p"]),
        Agent::new("gemini", "gemini")
            .with_args(["-p", PROMPT_PLACEHOLDER])
            .with_delivery(PromptDelivery::Argument),
        Agent::new("codex", "codex")
            .with_args(["exec", PROMPT_PLACEHOLDER])
            .with_delivery(PromptDelivery::Argument),
    ]
}

/// Ordered, read-only-after-load set of agents.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, preserving the iteration order.
    pub fn from_agents(agents: impl IntoIterator<Item = Agent>) -> Result<Self> {
        let mut registry = Self::new();
        for agent in agents {
            registry.register(agent)?;
        }
        Ok(registry)
    }

    /// Append an agent. Names are unique ignoring ASCII case.
    pub fn register(&mut self, agent: Agent) -> Result<()> {
        agent.validate()?;
        if self.position(&agent.name).is_some() {
            return Err(OrchestraError::DuplicateAgent(agent.name));
        }
        self.agents.push(agent);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Agent> {
        self.position(name).map(|i| &self.agents[i])
    }

    /// Registration index of `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.agents
            .iter()
            .position(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
