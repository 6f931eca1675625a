//! End-to-end orchestration: dispatch, parse, rank, then apply on selection.
//!
//! All shared state travels in an explicit [`OrchestraContext`]; nothing is
//! global. Ranking never applies anything by itself: the caller picks one
//! [`Selection`] from the [`QueryOutcome`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::apply::{ApplyEngine, ApplyOptions, ApplyReport};
use crate::backup::BackupManager;
use crate::clarify;
use crate::config::OrchestraConfig;
use crate::context::ContextBundle;
use crate::dispatch::{AgentRunner, Dispatcher, ProcessRunner};
use crate::error::{OrchestraError, Result};
use crate::evaluator::{PeerOutcome, RankedSolution, Ranker};
use crate::obs::QuerySpan;
use crate::registry::AgentRegistry;
use crate::solution::{Solution, SolutionId};
use crate::workspace::Workspace;

/// Shared, read-only state for one orchestrator.
#[derive(Clone)]
pub struct OrchestraContext {
    pub registry: Arc<AgentRegistry>,
    pub config: Arc<OrchestraConfig>,
    pub workspace: Workspace,
    pub runner: Arc<dyn AgentRunner>,
}

impl OrchestraContext {
    pub fn new(
        workspace: Workspace,
        config: OrchestraConfig,
        registry: AgentRegistry,
        runner: Arc<dyn AgentRunner>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            config: Arc::new(config),
            workspace,
            runner,
        }
    }

    /// Load configuration for `workdir` and run agents as subprocesses there.
    pub fn load(workdir: &Path, config_path: Option<&Path>) -> Result<Self> {
        let config = OrchestraConfig::load(workdir, config_path)?;
        let registry = config.registry()?;
        Ok(Self::new(
            Workspace::new(workdir),
            config,
            registry,
            Arc::new(ProcessRunner::in_dir(workdir)),
        ))
    }

    pub fn backups(&self) -> BackupManager {
        BackupManager::new(self.config.backup_root(self.workspace.root()), self.workspace.clone())
    }
}

/// Per-run knobs; unset fields fall back to configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub agents: Option<Vec<String>>,
    pub timeout: Option<Duration>,
    pub include_context: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            agents: None,
            timeout: None,
            include_context: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Dispatch,
    Parse,
    Resolve,
    Evaluate,
}

/// Non-fatal problem recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub agent: String,
    pub stage: Stage,
    pub message: String,
}

/// One row of the ranking shown to whoever selects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionSummary {
    pub rank: usize,
    pub id: SolutionId,
    pub agent: String,
    pub score: Option<f64>,
    pub elapsed_ms: u64,
    pub operations: String,
    /// `"<kind> <path> (+a -d)"` per operation.
    pub files: Vec<String>,
    pub rejected: usize,
    /// `"<evaluator>: <score or failure>"` per evaluator asked.
    pub evaluations: Vec<String>,
}

/// Everything a query produced, ranked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub query_id: String,
    pub prompt: String,
    pub ranked: Vec<RankedSolution>,
    pub annotations: Vec<Annotation>,
}

impl QueryOutcome {
    pub fn summaries(&self) -> Vec<SolutionSummary> {
        self.ranked.iter().map(summarize).collect()
    }

    pub fn solution(&self, id: SolutionId) -> Option<&Solution> {
        self.ranked
            .iter()
            .map(|r| &r.solution)
            .find(|s| s.id == id)
    }

    /// Resolve a full id, an id prefix of at least 4 chars, or an agent name.
    pub fn find(&self, selector: &str) -> Option<&Solution> {
        let selector = selector.trim();
        if let Ok(id) = selector.parse::<SolutionId>() {
            return self.solution(id);
        }
        let by_agent = self
            .ranked
            .iter()
            .map(|r| &r.solution)
            .find(|s| s.agent.eq_ignore_ascii_case(selector));
        if by_agent.is_some() || selector.len() < 4 {
            return by_agent;
        }
        let prefix = selector.to_ascii_lowercase().replace('-', "");
        let mut matches = self
            .ranked
            .iter()
            .map(|r| &r.solution)
            .filter(|s| s.id.0.simple().to_string().starts_with(&prefix));
        match (matches.next(), matches.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }
}

fn summarize(ranked: &RankedSolution) -> SolutionSummary {
    let s = &ranked.solution;
    SolutionSummary {
        rank: ranked.rank,
        id: s.id,
        agent: s.agent.clone(),
        score: s.score,
        elapsed_ms: s.elapsed_ms(),
        operations: s.operation_summary(),
        files: s
            .operations
            .iter()
            .map(|op| match &op.diff {
                Some(d) => format!("{} {} (+{} -{})", op.kind, op.path, d.additions, d.deletions),
                None => format!("{} {}", op.kind, op.path),
            })
            .collect(),
        rejected: s.rejected.len(),
        evaluations: s
            .evaluation
            .iter()
            .map(|peer| match &peer.outcome {
                PeerOutcome::Scored { score } => format!("{}: {score:.0}", peer.evaluator),
                PeerOutcome::Failed { failure } => format!("{}: {failure}", peer.evaluator),
                PeerOutcome::Unparseable { .. } => format!("{}: no score in reply", peer.evaluator),
            })
            .collect(),
    }
}

/// The operator's decision for a ranked outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Apply(SolutionId),
    Cancel,
}

/// Wires registry, dispatcher, parser, ranker and apply engine together.
pub struct Orchestrator {
    ctx: OrchestraContext,
    dispatcher: Dispatcher,
}

impl Orchestrator {
    pub fn new(ctx: OrchestraContext) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&ctx.registry), Arc::clone(&ctx.runner));
        Self { ctx, dispatcher }
    }

    pub fn context(&self) -> &OrchestraContext {
        &self.ctx
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Dispatch `prompt`, parse every response and rank the solutions.
    #[instrument(skip_all, fields(query_id = tracing::field::Empty))]
    pub async fn generate(&self, prompt: &str, options: RunOptions) -> Result<QueryOutcome> {
        let query_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("query_id", query_id.as_str());

        let config = &self.ctx.config;
        let agents = options
            .agents
            .unwrap_or_else(|| config.default_selection(&self.ctx.registry));
        let timeout = options.timeout.unwrap_or_else(|| config.timeout());

        let context = if options.include_context && config.context.enabled {
            match ContextBundle::collect(self.ctx.workspace.root(), &config.context) {
                Ok(bundle) => Some(Arc::new(bundle)),
                Err(e) => {
                    warn!(error = %e, "context collection failed, sending prompt alone");
                    None
                }
            }
        } else {
            None
        };

        let entries = self.dispatcher.dispatch(&agents, prompt, context, timeout).await?;

        let mut annotations = Vec::new();
        let mut solutions = Vec::new();
        for entry in entries {
            match entry.result {
                Ok(response) => {
                    let index = self.ctx.registry.position(&entry.agent).unwrap_or(usize::MAX);
                    let solution = Solution::from_response(&self.ctx.workspace, index, response);
                    annotate_solution(&solution, &mut annotations);
                    solutions.push(solution);
                }
                Err(failure) => annotations.push(Annotation {
                    agent: entry.agent,
                    stage: Stage::Dispatch,
                    message: failure.to_string(),
                }),
            }
        }

        let ranker = Ranker::new(
            self.dispatcher.clone(),
            config.eval_timeout(),
            config.eval_char_budget,
        );
        let ranked = ranker.rank(prompt, solutions, &config.extra_evaluators).await;
        for r in &ranked {
            for peer in &r.solution.evaluation {
                let message = match &peer.outcome {
                    PeerOutcome::Scored { .. } => continue,
                    PeerOutcome::Failed { failure } => format!("evaluating {}: {failure}", r.solution.agent),
                    PeerOutcome::Unparseable { excerpt } => {
                        format!("evaluating {}: no score in reply {excerpt:?}", r.solution.agent)
                    }
                };
                annotations.push(Annotation {
                    agent: peer.evaluator.clone(),
                    stage: Stage::Evaluate,
                    message,
                });
            }
        }

        info!(solutions = ranked.len(), annotations = annotations.len(), "query ranked");
        Ok(QueryOutcome {
            query_id,
            prompt: prompt.to_string(),
            ranked,
            annotations,
        })
    }

    /// Act on the operator's selection. `Cancel` changes nothing.
    ///
    /// A successful real apply prunes old backups down to `keep_backups`,
    /// never below the backup it just took.
    pub fn resolve_selection(
        &self,
        outcome: &QueryOutcome,
        selection: Selection,
        options: ApplyOptions,
    ) -> Result<Option<ApplyReport>> {
        let _span = QuerySpan::enter(&outcome.query_id);
        let id = match selection {
            Selection::Cancel => {
                info!("selection cancelled");
                return Ok(None);
            }
            Selection::Apply(id) => id,
        };
        let solution = outcome
            .solution(id)
            .ok_or_else(|| OrchestraError::SolutionNotFound(id.to_string()))?;

        let backups = self.ctx.backups();
        let engine = ApplyEngine::new(self.ctx.workspace.clone(), backups.clone());
        let report = engine.apply(solution, options)?;

        if !report.dry_run {
            if let Err(e) = backups.prune(self.ctx.config.keep_backups.max(1)) {
                warn!(error = %e, "backup pruning failed");
            }
        }
        Ok(Some(report))
    }

    /// Ask `agent` for clarifying questions about `prompt`.
    pub async fn clarify(&self, agent: &str, prompt: &str, max: usize) -> Result<Vec<String>> {
        clarify::request_questions(&self.dispatcher, agent, prompt, self.ctx.config.timeout(), max).await
    }
}

fn annotate_solution(solution: &Solution, annotations: &mut Vec<Annotation>) {
    for region in &solution.skipped {
        annotations.push(Annotation {
            agent: solution.agent.clone(),
            stage: Stage::Parse,
            message: format!("line {}: {}", region.line, region.reason),
        });
    }
    for rejected in &solution.rejected {
        annotations.push(Annotation {
            agent: solution.agent.clone(),
            stage: Stage::Resolve,
            message: format!("{}: {}", rejected.path, rejected.reason),
        });
    }
    if solution.operations.is_empty() {
        annotations.push(Annotation {
            agent: solution.agent.clone(),
            stage: Stage::Parse,
            message: "no file operations found".to_string(),
        });
    }
}
