//! Orchestra - multi-agent code generation CLI
//!
//! The `orchestra` command sends one request to several coding agents,
//! ranks their answers by peer review and applies the chosen solution.
//!
//! ## Commands
//!
//! - `agents`: List registered agents and whether they can be launched
//! - `run`: Dispatch a request, print the ranking, optionally apply one
//! - `clarify`: Ask an agent for clarifying questions about a request
//! - `backup`: List, restore or prune apply backups

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use orchestra_core::config::split_list;
use orchestra_core::{
    write_ranking_md, write_run_artifact, AgentRunner, ApplyOptions, ApplyReport, BackupId,
    OrchestraContext, Orchestrator, QueryOutcome, RunArtifact, RunOptions, Selection,
};

#[derive(Parser)]
#[command(name = "orchestra")]
#[command(author = "Stevedores Org")]
#[command(version = orchestra_core::VERSION)]
#[command(about = "Multi-agent code generation orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (default: orchestra.toml in the working directory)
    #[arg(long, global = true, env = "ORCHESTRA_CONFIG")]
    config: Option<PathBuf>,

    /// Working directory agents run in and solutions apply to
    #[arg(long, global = true, default_value = ".")]
    workdir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered agents and whether their command is on PATH
    Agents,

    /// Dispatch a request to the agents and rank their solutions
    Run {
        /// The coding request
        prompt: String,

        /// Comma-separated agent names (default: every enabled agent)
        #[arg(short, long)]
        agents: Option<String>,

        /// Per-agent generation timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Send the request without the project context bundle
        #[arg(long)]
        no_context: bool,

        /// Apply this solution (id, id prefix or agent name)
        #[arg(short, long)]
        select: Option<String>,

        /// With --select, show what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Write a report; `.md` gives markdown, anything else JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Ask one agent for clarifying questions about a request
    Clarify {
        /// The coding request
        prompt: String,

        /// Agent to ask
        #[arg(short, long, default_value = "claude")]
        agent: String,

        /// Maximum number of questions
        #[arg(short, long, default_value_t = orchestra_core::clarify::DEFAULT_MAX_QUESTIONS)]
        max: usize,
    },

    /// Manage apply backups
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
}

#[derive(Subcommand)]
enum BackupAction {
    /// List backups, newest first
    List,

    /// Restore every file recorded in a backup
    Restore {
        /// Backup id
        id: String,

        /// Delete the backup after a complete restore
        #[arg(long)]
        discard: bool,
    },

    /// Delete all but the newest backups
    Prune {
        /// Number of backups to keep
        #[arg(short, long)]
        keep: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    orchestra_core::init_tracing(cli.json, level);

    let ctx = OrchestraContext::load(&cli.workdir, cli.config.as_deref())
        .with_context(|| format!("Failed to load configuration for {:?}", cli.workdir))?;

    match cli.command {
        Commands::Agents => cmd_agents(&ctx).await,
        Commands::Run {
            prompt,
            agents,
            timeout,
            no_context,
            select,
            dry_run,
            report,
        } => {
            let options = RunOptions {
                agents: agents.as_deref().map(split_list),
                timeout: timeout.map(Duration::from_secs),
                include_context: !no_context,
            };
            cmd_run(ctx, &prompt, options, select.as_deref(), dry_run, report.as_deref()).await
        }
        Commands::Clarify { prompt, agent, max } => cmd_clarify(ctx, &prompt, &agent, max).await,
        Commands::Backup { action } => match action {
            BackupAction::List => cmd_backup_list(&ctx),
            BackupAction::Restore { id, discard } => cmd_backup_restore(&ctx, &id, discard),
            BackupAction::Prune { keep } => cmd_backup_prune(&ctx, keep),
        },
    }
}

async fn cmd_agents(ctx: &OrchestraContext) -> Result<()> {
    let enabled = ctx.config.default_selection(&ctx.registry);
    for agent in ctx.registry.iter() {
        let found = ctx.runner.probe(agent).await;
        let mut roles = Vec::new();
        if agent.capabilities.generate {
            roles.push("generate");
        }
        if agent.capabilities.evaluate {
            roles.push("evaluate");
        }
        println!(
            "{:<12} {:<24} {:<18} {}{}",
            agent.name,
            agent.command,
            roles.join(","),
            if found { "available" } else { "not found" },
            if enabled.iter().any(|n| n.eq_ignore_ascii_case(&agent.name)) {
                ""
            } else {
                " (disabled)"
            }
        );
    }
    Ok(())
}

async fn cmd_run(
    ctx: OrchestraContext,
    prompt: &str,
    options: RunOptions,
    select: Option<&str>,
    dry_run: bool,
    report: Option<&Path>,
) -> Result<()> {
    let orchestrator = Orchestrator::new(ctx);
    let outcome = orchestrator
        .generate(prompt, options)
        .await
        .context("Dispatch failed")?;

    print_ranking(&outcome);

    let selection = match select {
        Some(selector) => match outcome.find(selector) {
            Some(solution) => Selection::Apply(solution.id),
            None => bail!("No solution matches '{}'", selector),
        },
        None => {
            if dry_run {
                bail!("--dry-run needs --select");
            }
            println!();
            println!("No solution selected; nothing was changed.");
            Selection::Cancel
        }
    };

    let applied = orchestrator
        .resolve_selection(&outcome, selection, ApplyOptions { dry_run })
        .context("Apply failed")?;
    if let Some(report) = &applied {
        print_apply(report);
    }

    if let Some(path) = report {
        if path.extension().is_some_and(|ext| ext == "md") {
            write_ranking_md(path, &outcome.summaries(), &outcome.annotations)?;
        } else {
            write_run_artifact(path, &RunArtifact::from_outcome(&outcome, applied))?;
        }
        info!(path = ?path, "report written");
    }
    Ok(())
}

fn print_ranking(outcome: &QueryOutcome) {
    let summaries = outcome.summaries();
    if summaries.is_empty() {
        println!("No solutions were produced.");
    }
    for s in &summaries {
        let score = s
            .score
            .map(|v| format!("{:.1}", v))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "#{} {} [{}] score {} ({:.1}s) {}",
            s.rank,
            s.agent,
            s.id.short(),
            score,
            s.elapsed_ms as f64 / 1000.0,
            s.operations
        );
        for file in &s.files {
            println!("    {}", file);
        }
        if s.rejected > 0 {
            println!("    {} operation(s) rejected", s.rejected);
        }
    }
    if !outcome.annotations.is_empty() {
        println!();
        for a in &outcome.annotations {
            println!("note: {} ({:?}): {}", a.agent, a.stage, a.message);
        }
    }
}

fn print_apply(report: &ApplyReport) {
    println!();
    if report.dry_run {
        println!(
            "Dry run for {} ({} file(s), +{} -{}):",
            report.plan.agent,
            report.plan.operations.len(),
            report.plan.additions(),
            report.plan.deletions()
        );
        for op in &report.plan.operations {
            match &op.diff {
                Some(diff) => print!("{}", diff.unified),
                None => println!("{} {}", op.kind, op.path),
            }
        }
        return;
    }
    println!(
        "Applied {} file(s) from {}",
        report.applied.len(),
        report.plan.agent
    );
    for path in &report.applied {
        println!("    {}", path);
    }
    if let Some(backup) = &report.backup {
        println!("Backup: {} (orchestra backup restore {})", backup, backup);
    }
}

async fn cmd_clarify(ctx: OrchestraContext, prompt: &str, agent: &str, max: usize) -> Result<()> {
    let orchestrator = Orchestrator::new(ctx);
    let questions = orchestrator
        .clarify(agent, prompt, max)
        .await
        .context("Clarification failed")?;
    if questions.is_empty() {
        println!("No clarifying questions.");
    }
    for (idx, question) in questions.iter().enumerate() {
        println!("{}. {}", idx + 1, question);
    }
    Ok(())
}

fn cmd_backup_list(ctx: &OrchestraContext) -> Result<()> {
    let manifests = ctx.backups().list().context("Failed to list backups")?;
    if manifests.is_empty() {
        println!("No backups found.");
    }
    for m in manifests {
        println!(
            "{}  {}  {} file(s){}",
            m.id,
            m.created_at.format("%Y-%m-%d %H:%M:%S"),
            m.entries.len(),
            m.agent.map(|a| format!("  from {}", a)).unwrap_or_default()
        );
    }
    Ok(())
}

fn cmd_backup_restore(ctx: &OrchestraContext, id: &str, discard: bool) -> Result<()> {
    let backups = ctx.backups();
    let backup = backups
        .load(id)
        .with_context(|| format!("Failed to load backup {}", id))?;
    let report = backups
        .restore(&backup, discard)
        .with_context(|| format!("Failed to restore backup {}", id))?;
    println!("Restored {} file(s) from {}", report.restored.len(), report.backup);
    for failure in &report.failed {
        println!("    failed: {}: {}", failure.path, failure.reason);
    }
    if !report.is_complete() {
        bail!("{} file(s) could not be restored", report.failed.len());
    }
    Ok(())
}

fn cmd_backup_prune(ctx: &OrchestraContext, keep: usize) -> Result<()> {
    let removed: Vec<BackupId> = ctx.backups().prune(keep).context("Failed to prune backups")?;
    println!("Removed {} backup(s)", removed.len());
    for id in removed {
        println!("    {}", id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "orchestra",
            "--workdir",
            "/tmp/project",
            "run",
            "add a cache",
            "--agents",
            "claude,gemini",
            "--select",
            "claude",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.workdir, PathBuf::from("/tmp/project"));
        match cli.command {
            Commands::Run {
                prompt,
                agents,
                select,
                dry_run,
                no_context,
                ..
            } => {
                assert_eq!(prompt, "add a cache");
                assert_eq!(agents.as_deref(), Some("claude,gemini"));
                assert_eq!(select.as_deref(), Some("claude"));
                assert!(dry_run);
                assert!(!no_context);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parses_backup_prune() {
        let cli = Cli::try_parse_from(["orchestra", "backup", "prune", "--keep", "3"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Backup {
                action: BackupAction::Prune { keep: 3 }
            }
        ));
    }
}
