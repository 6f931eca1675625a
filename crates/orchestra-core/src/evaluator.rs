//! Peer evaluation and ranking.
//!
//! Every solution is shown to every evaluator except its author. Each
//! (solution, evaluator) pair is an independent dispatch with the evaluation
//! timeout, so a slow judge only costs its own score. Ranking waits for
//! every pair to finish or fail before ordering anything.

use std::cmp::Ordering;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::context::truncate_chars;
use crate::dispatch::{DispatchFailure, DispatchRequest, Dispatcher, Purpose};
use crate::obs;
use crate::registry::{Agent, AgentRegistry};
use crate::solution::Solution;

/// Result of asking one evaluator about one solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeerOutcome {
    Scored { score: f64 },
    Failed { failure: DispatchFailure },
    /// The evaluator answered without a usable number.
    Unparseable { excerpt: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerScore {
    pub evaluator: String,
    pub outcome: PeerOutcome,
}

impl PeerScore {
    pub fn score(&self) -> Option<f64> {
        match self.outcome {
            PeerOutcome::Scored { score } => Some(score),
            _ => None,
        }
    }
}

/// A solution with its 1-based position in the final order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedSolution {
    pub rank: usize,
    pub solution: Solution,
}

/// Runs the peer-evaluation round.
pub struct Ranker {
    dispatcher: Dispatcher,
    timeout: Duration,
    char_budget: usize,
}

impl Ranker {
    pub fn new(dispatcher: Dispatcher, timeout: Duration, char_budget: usize) -> Self {
        Self {
            dispatcher,
            timeout,
            char_budget,
        }
    }

    /// Score `solutions` and return them in rank order.
    #[instrument(skip_all, fields(solutions = solutions.len()))]
    pub async fn rank(
        &self,
        prompt: &str,
        mut solutions: Vec<Solution>,
        extra_evaluators: &[String],
    ) -> Vec<RankedSolution> {
        let pool = evaluator_pool(self.dispatcher.registry(), &solutions, extra_evaluators);
        debug!(
            evaluators = ?pool.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
            "evaluator pool"
        );

        let mut requests = Vec::new();
        for solution in &solutions {
            let eval_prompt = evaluation_prompt(prompt, solution, self.char_budget);
            for evaluator in &pool {
                if evaluator.name.eq_ignore_ascii_case(&solution.agent) {
                    continue;
                }
                requests.push(DispatchRequest::new(
                    evaluator.clone(),
                    Purpose::Evaluate {
                        solution: solution.id,
                        author: solution.agent.clone(),
                    },
                    eval_prompt.clone(),
                    self.timeout,
                ));
            }
        }

        for entry in self.dispatcher.dispatch_requests(requests).await {
            let Purpose::Evaluate { solution: id, author } = &entry.purpose else {
                continue;
            };
            let Some(solution) = solutions.iter_mut().find(|s| s.id == *id) else {
                continue;
            };
            let outcome = match entry.result {
                Ok(response) => match extract_score(&response.stdout) {
                    Some(score) => {
                        obs::emit_evaluation_scored(&entry.agent, author, score);
                        PeerOutcome::Scored { score }
                    }
                    None => PeerOutcome::Unparseable {
                        excerpt: truncate_chars(response.stdout.trim(), 200).0,
                    },
                },
                Err(failure) => PeerOutcome::Failed { failure },
            };
            solution.evaluation.push(PeerScore {
                evaluator: entry.agent,
                outcome,
            });
        }

        for solution in &mut solutions {
            solution.score = mean(solution.evaluation.iter().filter_map(PeerScore::score));
        }
        rank_solutions(solutions)
    }
}

/// Authors plus extra names, in registration order, restricted to agents
/// that can evaluate.
pub fn evaluator_pool(
    registry: &AgentRegistry,
    solutions: &[Solution],
    extra_evaluators: &[String],
) -> Vec<Agent> {
    registry
        .iter()
        .filter(|agent| agent.capabilities.evaluate)
        .filter(|agent| {
            solutions.iter().any(|s| s.agent.eq_ignore_ascii_case(&agent.name))
                || extra_evaluators.iter().any(|n| n.eq_ignore_ascii_case(&agent.name))
        })
        .cloned()
        .collect()
}

fn mean(scores: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = scores.fold((0.0, 0usize), |(sum, count), s| (sum + s, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Scored before unscored, higher score, faster generation, registry order.
pub fn compare_solutions(a: &Solution, b: &Solution) -> Ordering {
    let by_score = match (a.score, b.score) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_score
        .then_with(|| a.elapsed_ms().cmp(&b.elapsed_ms()))
        .then_with(|| a.registry_index.cmp(&b.registry_index))
}

/// Sort and number solutions from 1.
pub fn rank_solutions(mut solutions: Vec<Solution>) -> Vec<RankedSolution> {
    solutions.sort_by(compare_solutions);
    solutions
        .into_iter()
        .enumerate()
        .map(|(idx, solution)| RankedSolution {
            rank: idx + 1,
            solution,
        })
        .collect()
}

/// Prompt asking a peer to score `solution` against the original request.
pub fn evaluation_prompt(prompt: &str, solution: &Solution, char_budget: usize) -> String {
    let (mut rendered, truncated) = truncate_chars(&solution.render(), char_budget);
    if truncated {
        rendered.push_str("\n... (truncated)\n");
    }
    if solution.operations.is_empty() {
        rendered = "(no file changes were proposed)\n".to_string();
    }
    format!(
        "You are reviewing a proposed solution to a coding task.\n\n\
         ## Task\n{prompt}\n\n\
         ## Proposed changes ({summary})\n{rendered}\n\
         Rate how well the proposed changes solve the task on a scale from 0 to 100, \
         considering correctness, completeness and code quality.\n\
         Reply with the score on the first line as `Score: NN/100`, then a short justification.\n",
        summary = solution.operation_summary(),
    )
}

fn pattern(cell: &'static OnceLock<Option<Regex>>, src: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(src).ok()).as_ref()
}

/// Pull a 0-100 score out of an evaluator's reply.
///
/// Tries `NN/100`, then `score: NN`, then the first standalone number.
/// Values are clamped into range.
pub fn extract_score(text: &str) -> Option<f64> {
    static OUT_OF_100: OnceLock<Option<Regex>> = OnceLock::new();
    static LABELLED: OnceLock<Option<Regex>> = OnceLock::new();
    static BARE: OnceLock<Option<Regex>> = OnceLock::new();

    let candidates = [
        pattern(&OUT_OF_100, r"(\d+(?:\.\d+)?)\s*/\s*100\b"),
        pattern(&LABELLED, r"(?i)\bscore\b\s*(?:is|of)?\s*[:=]?\s*(\d+(?:\.\d+)?)"),
        pattern(&BARE, r"\b(\d+(?:\.\d+)?)\b"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::dispatch::RawResponse;
    use crate::solution::{FileOperation, SolutionId};

    fn solution(agent: &str, index: usize, elapsed_ms: u64, score: Option<f64>) -> Solution {
        Solution {
            id: SolutionId::new(),
            agent: agent.into(),
            registry_index: index,
            operations: vec![FileOperation::create("a.rs", "fn a() {}\n")],
            rejected: vec![],
            skipped: vec![],
            response: RawResponse {
                agent: agent.into(),
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                elapsed_ms,
                started_at: Utc::now(),
            },
            score,
            evaluation: vec![],
        }
    }

    #[test]
    fn test_extract_score_formats() {
        assert_eq!(extract_score("Score: 85/100\nGood work."), Some(85.0));
        assert_eq!(extract_score("I rate this 72 / 100"), Some(72.0));
        assert_eq!(extract_score("Overall score: 64. Solid."), Some(64.0));
        assert_eq!(extract_score("3 issues, but overall 90"), Some(3.0));
        assert_eq!(extract_score("150/100 amazing"), Some(100.0));
        assert_eq!(extract_score("Score: 77.5"), Some(77.5));
        assert_eq!(extract_score("no idea"), None);
        assert_eq!(extract_score(""), None);
    }

    #[test]
    fn test_order_scored_first_then_time_then_registry() {
        let ranked = rank_solutions(vec![
            solution("none", 0, 10, None),
            solution("slow", 1, 900, Some(80.0)),
            solution("fast", 2, 100, Some(80.0)),
            solution("best", 3, 5000, Some(95.0)),
            solution("tie-late", 5, 100, Some(80.0)),
        ]);
        let order: Vec<_> = ranked.iter().map(|r| r.solution.agent.as_str()).collect();
        assert_eq!(order, vec!["best", "fast", "tie-late", "slow", "none"]);
        let ranks: Vec<_> = ranked.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_mean_excludes_nothing_when_empty() {
        assert_eq!(mean(std::iter::empty()), None);
        assert_eq!(mean([60.0, 90.0].into_iter()), Some(75.0));
    }

    #[test]
    fn test_evaluation_prompt_truncates() {
        let mut s = solution("a", 0, 1, None);
        s.operations = vec![FileOperation::create("big.rs", "x".repeat(10_000))];
        let prompt = evaluation_prompt("build it", &s, 500);
        assert!(prompt.contains("## Task\nbuild it"));
        assert!(prompt.contains("... (truncated)"));
        assert!(prompt.len() < 2_000);
    }
}
