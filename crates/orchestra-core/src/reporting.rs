use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::apply::ApplyReport;
use crate::pipeline::{Annotation, QueryOutcome, SolutionSummary};

/// Persisted record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub query_id: String,
    pub prompt: String,
    pub ranking: Vec<SolutionSummary>,
    pub annotations: Vec<Annotation>,
    pub applied: Option<ApplyReport>,
}

impl RunArtifact {
    pub fn from_outcome(outcome: &QueryOutcome, applied: Option<ApplyReport>) -> Self {
        Self {
            schema_version: "1".to_string(),
            generated_at: Utc::now(),
            query_id: outcome.query_id.clone(),
            prompt: outcome.prompt.clone(),
            ranking: outcome.summaries(),
            annotations: outcome.annotations.clone(),
            applied,
        }
    }
}

/// Write the artifact as pretty JSON.
pub fn write_run_artifact(path: &Path, artifact: &RunArtifact) -> Result<()> {
    let content = serde_json::to_string_pretty(artifact).context("serialize run artifact")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
    }
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render the ranking as markdown.
pub fn render_ranking_md(summaries: &[SolutionSummary], annotations: &[Annotation]) -> String {
    let mut out = String::new();
    out.push_str("# Ranking\n\n");
    if summaries.is_empty() {
        out.push_str("No solutions were produced.\n");
    } else {
        out.push_str("| rank | id | agent | score | time | changes | rejected |\n");
        out.push_str("|---:|---|---|---:|---:|---|---:|\n");
        for s in summaries {
            let score = s
                .score
                .map(|v| format!("{v:.1}"))
                .unwrap_or_else(|| "n/a".to_string());
            out.push_str(&format!(
                "| {} | `{}` | {} | {} | {:.1}s | {} | {} |\n",
                s.rank,
                s.id.short(),
                s.agent,
                score,
                s.elapsed_ms as f64 / 1000.0,
                s.operations,
                s.rejected
            ));
        }

        for s in summaries {
            out.push_str(&format!("\n## {}. {} (`{}`)\n", s.rank, s.agent, s.id.short()));
            for file in &s.files {
                out.push_str(&format!("- {file}\n"));
            }
            if !s.evaluations.is_empty() {
                out.push_str("\nEvaluations:\n");
                for e in &s.evaluations {
                    out.push_str(&format!("- {e}\n"));
                }
            }
        }
    }

    if !annotations.is_empty() {
        out.push_str("\n## Notes\n");
        for a in annotations {
            out.push_str(&format!(
                "- {} [{}]: {}\n",
                a.agent,
                serde_json::to_value(a.stage)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                a.message
            ));
        }
    }
    out
}

/// Write the markdown ranking to `path`.
pub fn write_ranking_md(path: &Path, summaries: &[SolutionSummary], annotations: &[Annotation]) -> Result<()> {
    std::fs::write(path, render_ranking_md(summaries, annotations))
        .with_context(|| format!("write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;
    use crate::solution::SolutionId;

    fn summary(rank: usize, agent: &str, score: Option<f64>) -> SolutionSummary {
        SolutionSummary {
            rank,
            id: SolutionId::new(),
            agent: agent.into(),
            score,
            elapsed_ms: 1500,
            operations: "1 create, 0 modify, 0 delete".into(),
            files: vec!["create src/a.rs (+3 -0)".into()],
            rejected: 0,
            evaluations: vec!["other: 80".into()],
        }
    }

    #[test]
    fn test_render_ranking_md() {
        let md = render_ranking_md(
            &[summary(1, "claude", Some(80.0)), summary(2, "gemini", None)],
            &[Annotation {
                agent: "codex".into(),
                stage: Stage::Dispatch,
                message: "timed out after 100 ms".into(),
            }],
        );
        assert!(md.contains("| 1 |"));
        assert!(md.contains("| claude | 80.0 | 1.5s |"));
        assert!(md.contains("| gemini | n/a |"));
        assert!(md.contains("- codex [dispatch]: timed out after 100 ms"));
        assert!(md.contains("- create src/a.rs (+3 -0)"));
    }

    #[test]
    fn test_render_empty_ranking() {
        let md = render_ranking_md(&[], &[]);
        assert!(md.contains("No solutions were produced."));
    }

    #[test]
    fn test_write_run_artifact_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = QueryOutcome {
            query_id: "q1".into(),
            prompt: "do it".into(),
            ranked: vec![],
            annotations: vec![],
        };
        let path = dir.path().join("reports/run.json");
        write_run_artifact(&path, &RunArtifact::from_outcome(&outcome, None)).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["query_id"], "q1");
        assert_eq!(value["schema_version"], "1");
    }
}
