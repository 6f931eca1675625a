//! Orchestra Core Library
//!
//! Dispatches a coding request to several external agent CLIs at once,
//! parses their answers into file operations, ranks the solutions by peer
//! evaluation and applies the selected one behind a restorable backup.

pub mod apply;
pub mod backup;
pub mod cas;
pub mod clarify;
pub mod config;
pub mod context;
pub mod diff;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod fs_writer;
pub mod obs;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod reporting;
pub mod solution;
pub mod telemetry;
pub mod workspace;

pub use apply::{ApplyEngine, ApplyError, ApplyOptions, ApplyPlan, ApplyReport, PartialApply};
pub use backup::{
    Backup, BackupError, BackupId, BackupLabel, BackupManager, BackupManifest, RestoreReport,
};
pub use cas::fs::FsBlobStore;
pub use cas::{BlobStore, CasError, Digest};
pub use config::{OrchestraConfig, CONFIG_FILE_NAME};
pub use context::{ContextBundle, ContextConfig, ProjectType};
pub use diff::{apply_unified, diff_text, unified_diff, FileDiff, LineDiff};
pub use dispatch::{
    AgentRunner, DispatchEntry, DispatchFailure, DispatchRequest, Dispatcher, Invocation,
    ProcessRunner, Purpose, RawResponse,
};
pub use error::{OrchestraError, Result};
pub use evaluator::{PeerOutcome, PeerScore, RankedSolution, Ranker};
pub use fs_writer::{AtomicFileWriter, FileWriter};
pub use parser::{parse_response, render_blocks, Intent, ParseOutcome, ParsedBlock};
pub use pipeline::{
    Annotation, OrchestraContext, Orchestrator, QueryOutcome, RunOptions, Selection,
    SolutionSummary, Stage,
};
pub use registry::{builtin_agents, Agent, AgentRegistry, Capabilities, PromptDelivery};
pub use reporting::{render_ranking_md, write_ranking_md, write_run_artifact, RunArtifact};
pub use solution::{FileOperation, OperationKind, Solution, SolutionId};
pub use telemetry::init_tracing;
pub use workspace::Workspace;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
