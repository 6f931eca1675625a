//! Solutions: one agent's parsed response resolved against the workspace.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff::FileDiff;
use crate::dispatch::RawResponse;
use crate::evaluator::PeerScore;
use crate::parser::{self, Intent, ParsedBlock, SkippedRegion};
use crate::workspace::Workspace;

/// Unique solution identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SolutionId(pub Uuid);

impl SolutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 hex chars, enough to select from a ranking.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SolutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SolutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SolutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Modify,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Create => "create",
            OperationKind::Modify => "modify",
            OperationKind::Delete => "delete",
        })
    }
}

/// A resolved change to one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOperation {
    pub kind: OperationKind,
    /// Normalized path relative to the workspace root.
    pub path: String,
    /// Full proposed content; `None` for deletions.
    pub content: Option<String>,
    pub language: Option<String>,
    /// Diff against the workspace at resolution time.
    pub diff: Option<FileDiff>,
}

impl FileOperation {
    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Create,
            path: path.into(),
            content: Some(content.into()),
            language: None,
            diff: None,
        }
    }

    pub fn modify(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Modify,
            path: path.into(),
            content: Some(content.into()),
            language: None,
            diff: None,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Delete,
            path: path.into(),
            content: None,
            language: None,
            diff: None,
        }
    }
}

/// A parsed block that could not become an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedOperation {
    pub path: String,
    pub intent: Intent,
    pub reason: String,
}

/// One agent's proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub id: SolutionId,
    pub agent: String,
    /// Author's registration index; final ranking tie-break.
    pub registry_index: usize,
    pub operations: Vec<FileOperation>,
    pub rejected: Vec<RejectedOperation>,
    /// Fenced regions the parser could not attribute to a file.
    pub skipped: Vec<SkippedRegion>,
    pub response: RawResponse,
    /// Mean peer score; `None` until at least one evaluator answered.
    pub score: Option<f64>,
    pub evaluation: Vec<PeerScore>,
}

impl Solution {
    /// Parse `response` and resolve every block against `workspace`.
    pub fn from_response(workspace: &Workspace, registry_index: usize, response: RawResponse) -> Self {
        let outcome = parser::parse_response(&response.stdout);
        let (operations, rejected) = resolve(workspace, outcome.blocks);
        Self {
            id: SolutionId::new(),
            agent: response.agent.clone(),
            registry_index,
            operations,
            rejected,
            skipped: outcome.skipped,
            response,
            score: None,
            evaluation: Vec::new(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.response.elapsed_ms
    }

    pub fn count(&self, kind: OperationKind) -> usize {
        self.operations.iter().filter(|op| op.kind == kind).count()
    }

    /// `"2 create, 1 modify, 0 delete"`.
    pub fn operation_summary(&self) -> String {
        format!(
            "{} create, {} modify, {} delete",
            self.count(OperationKind::Create),
            self.count(OperationKind::Modify),
            self.count(OperationKind::Delete)
        )
    }

    /// Canonical text rendering of the operations.
    pub fn render(&self) -> String {
        let blocks: Vec<ParsedBlock> = self
            .operations
            .iter()
            .map(|op| ParsedBlock {
                path: op.path.clone(),
                intent: match op.kind {
                    OperationKind::Create => Intent::Create,
                    OperationKind::Modify => Intent::Modify,
                    OperationKind::Delete => Intent::Delete,
                },
                content: op.content.clone(),
                language: op.language.clone(),
            })
            .collect();
        parser::render_blocks(&blocks)
    }
}

/// Turn parsed blocks into operations.
///
/// Unspecified intent becomes Modify when the target exists and Create
/// otherwise. An explicit verb that contradicts the filesystem is rejected,
/// never converted.
pub fn resolve(
    workspace: &Workspace,
    blocks: Vec<ParsedBlock>,
) -> (Vec<FileOperation>, Vec<RejectedOperation>) {
    let mut resolved: Vec<Result<FileOperation, RejectedOperation>> = Vec::new();
    for block in blocks {
        resolved.push(resolve_block(workspace, block));
    }

    // Distinct raw spellings can normalize to one path; keep the last.
    let mut last: HashMap<String, usize> = HashMap::new();
    for (idx, item) in resolved.iter().enumerate() {
        if let Ok(op) = item {
            last.insert(op.path.clone(), idx);
        }
    }

    let mut operations = Vec::new();
    let mut rejected = Vec::new();
    for (idx, item) in resolved.into_iter().enumerate() {
        match item {
            Ok(op) if last.get(&op.path) == Some(&idx) => operations.push(op),
            Ok(_) => {}
            Err(r) => rejected.push(r),
        }
    }
    (operations, rejected)
}

fn resolve_block(workspace: &Workspace, block: ParsedBlock) -> Result<FileOperation, RejectedOperation> {
    let reject = |reason: String| RejectedOperation {
        path: block.path.clone(),
        intent: block.intent,
        reason,
    };

    let path = Workspace::normalize(&block.path).map_err(|e| reject(e.to_string()))?;
    let target = workspace.confine(&path).map_err(|e| reject(e.to_string()))?;
    if target.is_dir() {
        return Err(reject("target is a directory".to_string()));
    }
    let exists = target.exists();

    let kind = match (block.intent, exists) {
        (Intent::Unspecified, true) | (Intent::Modify, true) => OperationKind::Modify,
        (Intent::Unspecified, false) | (Intent::Create, false) => OperationKind::Create,
        (Intent::Delete, true) => OperationKind::Delete,
        (Intent::Create, true) => return Err(reject("file already exists".to_string())),
        (Intent::Modify, false) | (Intent::Delete, false) => {
            return Err(reject("file does not exist".to_string()))
        }
    };

    let mut op = FileOperation {
        kind,
        path,
        content: match kind {
            OperationKind::Delete => None,
            _ => Some(block.content.clone().unwrap_or_default()),
        },
        language: block.language.clone(),
        diff: None,
    };
    let diff = FileDiff::for_operation(workspace, &op).map_err(|e| reject(format!("cannot read current content: {e}")))?;
    op.diff = Some(diff);
    Ok(op)
}
