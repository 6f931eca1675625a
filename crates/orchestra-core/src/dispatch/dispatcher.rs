use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use super::{
    AgentRunner, DispatchEntry, DispatchFailure, DispatchRequest, Invocation, Purpose, RawResponse,
};
use crate::context::ContextBundle;
use crate::error::{OrchestraError, Result};
use crate::obs;
use crate::registry::AgentRegistry;

/// Concurrent fan-out of agent invocations.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    runner: Arc<dyn AgentRunner>,
}

impl Dispatcher {
    pub fn new(registry: Arc<AgentRegistry>, runner: Arc<dyn AgentRunner>) -> Self {
        Self { registry, runner }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Send `prompt` to every named agent for generation.
    ///
    /// Returns one entry per distinct requested name, in registration order
    /// with unknown names last. Fails with `NoAgentsAvailable` when nothing
    /// was requested or every requested agent is unavailable.
    #[instrument(skip(self, prompt, context), fields(agents = agents.len()))]
    pub async fn dispatch(
        &self,
        agents: &[String],
        prompt: &str,
        context: Option<Arc<ContextBundle>>,
        timeout: Duration,
    ) -> Result<Vec<DispatchEntry>> {
        let requested = dedupe(agents);
        if requested.is_empty() {
            return Err(OrchestraError::NoAgentsAvailable { requested });
        }

        let mut known: Vec<(usize, String)> = Vec::new();
        let mut unknown: Vec<String> = Vec::new();
        for name in &requested {
            match self.registry.position(name) {
                Some(index) => known.push((index, name.clone())),
                None => unknown.push(name.clone()),
            }
        }
        known.sort_by_key(|(index, _)| *index);

        let mut requests = Vec::new();
        let mut slots: Vec<Slot> = Vec::new();
        for (_, name) in known {
            let Some(agent) = self.registry.get(&name) else {
                continue;
            };
            if !agent.capabilities.generate {
                slots.push(Slot::Ready(unavailable(&agent.name, "agent cannot generate")));
                continue;
            }
            slots.push(Slot::Pending(requests.len()));
            requests.push(
                DispatchRequest::new(agent.clone(), Purpose::Generate, prompt, timeout)
                    .with_context(context.clone()),
            );
        }
        for name in unknown {
            slots.push(Slot::Ready(unavailable(&name, "not registered")));
        }

        let mut results: Vec<Option<DispatchEntry>> = self
            .dispatch_requests(requests)
            .await
            .into_iter()
            .map(Some)
            .collect();
        let entries: Vec<DispatchEntry> = slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Ready(entry) => Some(entry),
                Slot::Pending(i) => results.get_mut(i).and_then(Option::take),
            })
            .collect();

        if entries.iter().all(DispatchEntry::is_unavailable) {
            return Err(OrchestraError::NoAgentsAvailable { requested });
        }
        Ok(entries)
    }

    /// Run every request concurrently; entries come back in request order.
    ///
    /// Each request is probed first; an unlaunchable command is reported as
    /// `Unavailable` without running. Every request gets its own timeout.
    pub async fn dispatch_requests(&self, requests: Vec<DispatchRequest>) -> Vec<DispatchEntry> {
        if let Some(first) = requests.first() {
            obs::emit_dispatch_started(first.purpose.label(), requests.len());
        }

        let mut labels: Vec<(String, Purpose)> = Vec::with_capacity(requests.len());
        let mut tasks: Vec<JoinHandle<DispatchEntry>> = Vec::with_capacity(requests.len());
        for request in requests {
            let runner = Arc::clone(&self.runner);
            labels.push((request.agent.name.clone(), request.purpose.clone()));
            tasks.push(tokio::spawn(execute(runner, request)));
        }

        let joined = futures::future::join_all(tasks).await;
        let mut entries = Vec::with_capacity(joined.len());
        for ((agent, purpose), joined) in labels.into_iter().zip(joined) {
            let entry = match joined {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(agent = %agent, error = %e, "dispatch task aborted");
                    DispatchEntry {
                        agent,
                        purpose,
                        result: Err(DispatchFailure::Io {
                            message: format!("task failed: {e}"),
                        }),
                    }
                }
            };
            entries.push(entry);
        }
        entries
    }
}

enum Slot {
    Ready(DispatchEntry),
    Pending(usize),
}

fn unavailable(agent: &str, reason: &str) -> DispatchEntry {
    let failure = DispatchFailure::Unavailable {
        reason: reason.to_string(),
    };
    obs::emit_agent_failed(agent, Purpose::Generate.label(), &failure);
    DispatchEntry {
        agent: agent.to_string(),
        purpose: Purpose::Generate,
        result: Err(failure),
    }
}

/// Drop blank and case-insensitively repeated names, keeping first spelling.
fn dedupe(agents: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in agents {
        let name = name.trim();
        if name.is_empty() || out.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            continue;
        }
        out.push(name.to_string());
    }
    out
}

async fn execute(runner: Arc<dyn AgentRunner>, request: DispatchRequest) -> DispatchEntry {
    let agent = request.agent.name.clone();
    let purpose = request.purpose.clone();

    if !runner.probe(&request.agent).await {
        let failure = DispatchFailure::Unavailable {
            reason: format!("command not found: {}", request.agent.command),
        };
        obs::emit_agent_failed(&agent, purpose.label(), &failure);
        return DispatchEntry {
            agent,
            purpose,
            result: Err(failure),
        };
    }

    let invocation = Invocation::start(request);
    let limit = invocation.timeout;
    let clock = Instant::now();
    let outcome = tokio::time::timeout(limit, runner.run(&invocation)).await;
    let elapsed_ms = clock.elapsed().as_millis() as u64;

    let result = match outcome {
        Err(_) => Err(DispatchFailure::Timeout {
            limit_ms: limit.as_millis() as u64,
        }),
        Ok(Err(e)) => Err(DispatchFailure::Io {
            message: e.to_string(),
        }),
        Ok(Ok(output)) if output.exit_code != 0 => Err(DispatchFailure::NonZeroExit {
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        }),
        Ok(Ok(output)) => Ok(RawResponse {
            agent: agent.clone(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            elapsed_ms,
            started_at: invocation.started_at,
        }),
    };

    match &result {
        Ok(response) => {
            obs::emit_agent_finished(&agent, purpose.label(), elapsed_ms, response.stdout.len())
        }
        Err(failure) => obs::emit_agent_failed(&agent, purpose.label(), failure),
    }

    DispatchEntry {
        agent,
        purpose,
        result,
    }
}
