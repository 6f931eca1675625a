//! Orchestrator configuration.
//!
//! Loaded from an optional `orchestra.toml`, then overridden from the
//! environment. Every field has a default so an empty file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::ContextConfig;
use crate::error::{OrchestraError, Result};
use crate::registry::{builtin_agents, Agent, AgentRegistry};

/// File looked up in the working directory when no path is given.
pub const CONFIG_FILE_NAME: &str = "orchestra.toml";

const ENV_PREFIX: &str = "ORCHESTRA_";
const CUSTOM_PREFIX: &str = "ORCHESTRA_CUSTOM_CLI_";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestraConfig {
    /// Per-invocation budget for generation.
    pub timeout_secs: u64,
    /// Per-invocation budget for peer evaluation.
    pub eval_timeout_secs: u64,
    /// Backup root, relative to the working directory unless absolute.
    pub backup_dir: PathBuf,
    /// Backups retained by automatic pruning after an apply.
    pub keep_backups: usize,
    /// Characters of rendered solution shown to an evaluator.
    pub eval_char_budget: usize,
    /// Agents used when a run names none. Empty means every registered agent.
    pub enabled_agents: Vec<String>,
    /// Evaluators asked in addition to the solution authors.
    pub extra_evaluators: Vec<String>,
    pub context: ContextConfig,
    /// Agent table. Empty means the built-in agents.
    pub agents: Vec<Agent>,
}

impl Default for OrchestraConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            eval_timeout_secs: 60,
            backup_dir: PathBuf::from(".orchestra/backups"),
            keep_backups: 10,
            eval_char_budget: 4000,
            enabled_agents: Vec::new(),
            extra_evaluators: Vec::new(),
            context: ContextConfig::default(),
            agents: Vec::new(),
        }
    }
}

impl OrchestraConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| OrchestraError::Config(e.to_string()))
    }

    /// Load the file (explicit path, or `orchestra.toml` under `workdir` if
    /// present) and apply process environment overrides.
    pub fn load(workdir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::read_file(path)?,
            None => {
                let default_path = workdir.join(CONFIG_FILE_NAME);
                if default_path.is_file() {
                    Self::read_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(std::env::vars())?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            OrchestraError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "loaded config file");
        Self::from_toml_str(&text)
    }

    /// Apply `ORCHESTRA_*` overrides from `vars`.
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut vars: Vec<(String, String)> = vars
            .into_iter()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        // Custom agents register in a stable order regardless of env order.
        vars.sort();

        for (key, value) in vars {
            match key.as_str() {
                "ORCHESTRA_TIMEOUT_SECS" => self.timeout_secs = parse_number(&key, &value)?,
                "ORCHESTRA_EVAL_TIMEOUT_SECS" => {
                    self.eval_timeout_secs = parse_number(&key, &value)?
                }
                "ORCHESTRA_KEEP_BACKUPS" => self.keep_backups = parse_number(&key, &value)?,
                "ORCHESTRA_BACKUP_DIR" => self.backup_dir = PathBuf::from(value),
                "ORCHESTRA_AGENTS" => {
                    let value = value.trim();
                    self.enabled_agents = if value.eq_ignore_ascii_case("auto") {
                        Vec::new()
                    } else {
                        split_list(value)
                    };
                }
                _ => {
                    if let Some(name) = key.strip_prefix(CUSTOM_PREFIX) {
                        self.add_custom_agent(name, &value)?;
                    } else if let Some(name) = key
                        .strip_prefix(ENV_PREFIX)
                        .and_then(|rest| rest.strip_suffix("_CLI"))
                    {
                        self.override_command(name, &value);
                    }
                }
            }
        }
        Ok(())
    }

    fn ensure_agent_table(&mut self) {
        if self.agents.is_empty() {
            self.agents = builtin_agents();
        }
    }

    fn override_command(&mut self, name: &str, command: &str) {
        self.ensure_agent_table();
        if let Some(agent) = self
            .agents
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
        {
            debug!(agent = %agent.name, command = %command, "command overridden from env");
            agent.command = command.trim().to_string();
        }
    }

    fn add_custom_agent(&mut self, name: &str, command: &str) -> Result<()> {
        let name = name.to_ascii_lowercase();
        let command = command.trim();
        if name.is_empty() || command.is_empty() {
            return Err(OrchestraError::Config(format!(
                "custom agent {name:?} needs a name and a command"
            )));
        }
        self.ensure_agent_table();
        if self.agents.iter().any(|a| a.name.eq_ignore_ascii_case(&name)) {
            return Err(OrchestraError::DuplicateAgent(name));
        }
        self.agents.push(Agent::new(name, command));
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn eval_timeout(&self) -> Duration {
        Duration::from_secs(self.eval_timeout_secs)
    }

    /// Absolute backup root for `workdir`.
    pub fn backup_root(&self, workdir: &Path) -> PathBuf {
        if self.backup_dir.is_absolute() {
            self.backup_dir.clone()
        } else {
            workdir.join(&self.backup_dir)
        }
    }

    /// Registry built from the agent table (built-ins if empty).
    pub fn registry(&self) -> Result<AgentRegistry> {
        if self.agents.is_empty() {
            AgentRegistry::from_agents(builtin_agents())
        } else {
            AgentRegistry::from_agents(self.agents.iter().cloned())
        }
    }

    /// Agents a run uses when the caller names none.
    pub fn default_selection(&self, registry: &AgentRegistry) -> Vec<String> {
        if self.enabled_agents.is_empty() {
            registry
                .iter()
                .filter(|a| a.capabilities.generate)
                .map(|a| a.name.clone())
                .collect()
        } else {
            self.enabled_agents.clone()
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| OrchestraError::Config(format!("{key} must be a non-negative integer, got {value:?}")))
}

/// Split a comma separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
