//! Transactional application of a chosen solution.
//!
//! Sequence: plan (validate paths, recompute diffs), snapshot every touched
//! path, then mutate one file at a time in Delete, Modify, Create order. The
//! first failing step stops the run, the snapshot is restored and directories
//! the run created are removed again if they are empty.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::backup::{BackupError, BackupId, BackupLabel, BackupManager};
use crate::diff::FileDiff;
use crate::fs_writer::{AtomicFileWriter, FileWriter};
use crate::obs;
use crate::solution::{FileOperation, OperationKind, Solution, SolutionId};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOptions {
    /// Compute and return the plan without touching the filesystem.
    pub dry_run: bool,
}

/// Operations in execution order with diffs against the current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyPlan {
    pub solution: SolutionId,
    pub agent: String,
    pub operations: Vec<FileOperation>,
}

impl ApplyPlan {
    pub fn paths(&self) -> Vec<String> {
        self.operations.iter().map(|op| op.path.clone()).collect()
    }

    pub fn additions(&self) -> usize {
        self.operations
            .iter()
            .filter_map(|op| op.diff.as_ref())
            .map(|d| d.additions)
            .sum()
    }

    pub fn deletions(&self) -> usize {
        self.operations
            .iter()
            .filter_map(|op| op.diff.as_ref())
            .map(|d| d.deletions)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub plan: ApplyPlan,
    /// Paths mutated, in execution order. Empty for a dry run.
    pub applied: Vec<String>,
    /// Snapshot taken before mutation. `None` for a dry run.
    pub backup: Option<BackupId>,
    pub dry_run: bool,
}

/// State left behind by a failed apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialApply {
    pub failed_path: String,
    pub cause: String,
    pub backup: BackupId,
    /// Paths returned to their snapshot state.
    pub reverted: Vec<String>,
    /// Mutated paths whose restore failed and still hold new content.
    pub still_applied: Vec<String>,
    /// Every path the restore could not bring back.
    pub unreverted: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("cannot apply {path}: {reason}")]
    Plan { path: String, reason: String },

    #[error("backup failed, nothing was changed: {0}")]
    Backup(#[from] BackupError),

    #[error("writing {} failed ({}); all changes were rolled back", .0.failed_path, .0.cause)]
    RolledBack(PartialApply),

    #[error(
        "writing {} failed ({}) and rollback could not restore: {} (backup {})",
        .0.failed_path,
        .0.cause,
        .0.unreverted.join(", "),
        .0.backup
    )]
    Unrecoverable(PartialApply),
}

fn kind_order(kind: OperationKind) -> u8 {
    match kind {
        OperationKind::Delete => 0,
        OperationKind::Modify => 1,
        OperationKind::Create => 2,
    }
}

/// Applies solutions inside one workspace.
#[derive(Clone)]
pub struct ApplyEngine {
    workspace: Workspace,
    backups: BackupManager,
    writer: Arc<dyn FileWriter>,
}

impl ApplyEngine {
    pub fn new(workspace: Workspace, backups: BackupManager) -> Self {
        Self::with_writer(workspace, backups, Arc::new(AtomicFileWriter))
    }

    pub fn with_writer(workspace: Workspace, backups: BackupManager, writer: Arc<dyn FileWriter>) -> Self {
        Self {
            workspace,
            backups,
            writer,
        }
    }

    /// Validate `solution` against the current filesystem.
    pub fn plan(&self, solution: &Solution) -> Result<ApplyPlan, ApplyError> {
        let mut operations = Vec::with_capacity(solution.operations.len());
        for op in &solution.operations {
            let plan_err = |reason: String| ApplyError::Plan {
                path: op.path.clone(),
                reason,
            };
            let normalized = Workspace::normalize(&op.path).map_err(|e| plan_err(e.to_string()))?;
            if normalized != op.path {
                return Err(plan_err(format!("path is not normalized (expected {normalized})")));
            }
            let target = self.workspace.confine(&op.path).map_err(|e| plan_err(e.to_string()))?;
            if target.is_dir() {
                return Err(plan_err("target is a directory".into()));
            }
            match (op.kind, target.exists()) {
                (OperationKind::Create, true) => return Err(plan_err("file already exists".into())),
                (OperationKind::Modify | OperationKind::Delete, false) => {
                    return Err(plan_err("file no longer exists".into()))
                }
                _ => {}
            }
            if op.kind != OperationKind::Delete && op.content.is_none() {
                return Err(plan_err("operation has no content".into()));
            }

            let mut planned = op.clone();
            planned.diff = Some(
                FileDiff::for_operation(&self.workspace, op)
                    .map_err(|e| plan_err(format!("cannot read current content: {e}")))?,
            );
            operations.push(planned);
        }
        operations.sort_by_key(|op| kind_order(op.kind));

        Ok(ApplyPlan {
            solution: solution.id,
            agent: solution.agent.clone(),
            operations,
        })
    }

    /// Apply `solution`, rolling back on the first failure.
    #[instrument(skip(self, solution), fields(solution = %solution.id, agent = %solution.agent))]
    pub fn apply(&self, solution: &Solution, options: ApplyOptions) -> Result<ApplyReport, ApplyError> {
        let plan = self.plan(solution)?;
        if options.dry_run {
            obs::emit_apply_finished(0, true);
            return Ok(ApplyReport {
                plan,
                applied: Vec::new(),
                backup: None,
                dry_run: true,
            });
        }

        let backup = self.backups.snapshot(
            &plan.paths(),
            BackupLabel {
                solution_id: Some(solution.id),
                agent: Some(solution.agent.clone()),
            },
        )?;

        let mut applied = Vec::with_capacity(plan.operations.len());
        let mut created_dirs = Vec::new();
        for op in &plan.operations {
            let target = self.workspace.join(&op.path);
            if op.kind != OperationKind::Delete {
                created_dirs.extend(self.missing_parents(&target));
            }
            if let Err(e) = self.execute(&target, op) {
                return Err(self.roll_back(&backup, &op.path, e, &applied, created_dirs));
            }
            debug!(path = %op.path, kind = %op.kind, "applied");
            applied.push(op.path.clone());
        }

        obs::emit_apply_finished(applied.len(), false);
        Ok(ApplyReport {
            plan,
            applied,
            backup: Some(backup.id().clone()),
            dry_run: false,
        })
    }

    fn execute(&self, target: &Path, op: &FileOperation) -> io::Result<()> {
        match op.kind {
            OperationKind::Delete => self.writer.remove(target),
            OperationKind::Create | OperationKind::Modify => {
                let content = op.content.as_deref().unwrap_or_default();
                self.writer.write(target, content.as_bytes())
            }
        }
    }

    /// Directories between the workspace root and `target` that a write
    /// would have to create, deepest first.
    fn missing_parents(&self, target: &Path) -> Vec<PathBuf> {
        target
            .ancestors()
            .skip(1)
            .take_while(|dir| *dir != self.workspace.root() && !dir.exists())
            .map(Path::to_path_buf)
            .collect()
    }

    fn roll_back(
        &self,
        backup: &crate::backup::Backup,
        failed_path: &str,
        cause: io::Error,
        applied: &[String],
        mut created_dirs: Vec<PathBuf>,
    ) -> ApplyError {
        let (reverted, unreverted) = match self.backups.restore(backup, false) {
            Ok(report) => (
                report.restored,
                report.failed.into_iter().map(|f| f.path).collect::<Vec<_>>(),
            ),
            Err(e) => {
                warn!(backup_id = %backup.id(), error = %e, "restore could not start");
                (
                    Vec::new(),
                    backup
                        .manifest
                        .entries
                        .iter()
                        .map(|entry| entry.path.clone())
                        .collect(),
                )
            }
        };
        // Only empty directories go; anything a restore left behind stays.
        created_dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
        for dir in &created_dirs {
            if fs::remove_dir(dir).is_ok() {
                debug!(dir = %dir.display(), "removed directory created by apply");
            }
        }

        let still_applied = applied
            .iter()
            .filter(|p| unreverted.contains(p))
            .cloned()
            .collect();

        obs::emit_apply_rolled_back(failed_path, reverted.len(), unreverted.len());
        let partial = PartialApply {
            failed_path: failed_path.to_string(),
            cause: cause.to_string(),
            backup: backup.id().clone(),
            reverted,
            still_applied,
            unreverted,
        };
        if partial.unreverted.is_empty() {
            ApplyError::RolledBack(partial)
        } else {
            ApplyError::Unrecoverable(partial)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;
    use crate::dispatch::RawResponse;

    /// Fails every write whose target file name matches.
    struct FailOn {
        name: &'static str,
        seen: Mutex<usize>,
    }

    impl FileWriter for FailOn {
        fn write(&self, path: &Path, content: &[u8]) -> io::Result<()> {
            if path.file_name().is_some_and(|n| n == self.name) {
                *self.seen.lock().unwrap() += 1;
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            AtomicFileWriter.write(path, content)
        }

        fn remove(&self, path: &Path) -> io::Result<()> {
            AtomicFileWriter.remove(path)
        }
    }

    fn solution(operations: Vec<FileOperation>) -> Solution {
        Solution {
            id: SolutionId::new(),
            agent: "tester".into(),
            registry_index: 0,
            operations,
            rejected: vec![],
            skipped: vec![],
            response: RawResponse {
                agent: "tester".into(),
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                elapsed_ms: 1,
                started_at: Utc::now(),
            },
            score: None,
            evaluation: vec![],
        }
    }

    fn setup() -> (tempfile::TempDir, Workspace, BackupManager) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path().join("work"));
        fs::create_dir_all(ws.root()).unwrap();
        let backups = BackupManager::new(dir.path().join("backups"), ws.clone());
        (dir, ws, backups)
    }

    #[test]
    fn test_apply_orders_delete_modify_create() {
        let (_dir, ws, backups) = setup();
        fs::write(ws.join("old.rs"), "old\n").unwrap();
        fs::write(ws.join("lib.rs"), "v1\n").unwrap();
        let engine = ApplyEngine::new(ws.clone(), backups);

        let report = engine
            .apply(
                &solution(vec![
                    FileOperation::create("src/new.rs", "new\n"),
                    FileOperation::modify("lib.rs", "v2\n"),
                    FileOperation::delete("old.rs"),
                ]),
                ApplyOptions::default(),
            )
            .unwrap();
        assert_eq!(report.applied, vec!["old.rs", "lib.rs", "src/new.rs"]);
        assert!(report.backup.is_some());
        assert!(!ws.join("old.rs").exists());
        assert_eq!(fs::read_to_string(ws.join("lib.rs")).unwrap(), "v2\n");
        assert_eq!(fs::read_to_string(ws.join("src/new.rs")).unwrap(), "new\n");
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let (_dir, ws, backups) = setup();
        fs::write(ws.join("lib.rs"), "v1\n").unwrap();
        let engine = ApplyEngine::new(ws.clone(), backups.clone());
        let report = engine
            .apply(
                &solution(vec![FileOperation::modify("lib.rs", "v2\n")]),
                ApplyOptions { dry_run: true },
            )
            .unwrap();
        assert!(report.dry_run);
        assert!(report.applied.is_empty());
        assert_eq!(report.plan.additions(), 1);
        assert_eq!(report.plan.deletions(), 1);
        assert_eq!(fs::read_to_string(ws.join("lib.rs")).unwrap(), "v1\n");
        assert!(backups.list().unwrap().is_empty());
    }

    #[test]
    fn test_plan_error_aborts_before_backup() {
        let (_dir, ws, backups) = setup();
        let engine = ApplyEngine::new(ws, backups.clone());
        let err = engine
            .apply(
                &solution(vec![FileOperation::modify("missing.rs", "x")]),
                ApplyOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ApplyError::Plan { .. }));
        assert!(backups.list().unwrap().is_empty());
    }

    #[test]
    fn test_failure_rolls_back_everything() {
        let (_dir, ws, backups) = setup();
        fs::write(ws.join("a.rs"), "a1\n").unwrap();
        fs::write(ws.join("b.rs"), "b1\n").unwrap();
        let writer = Arc::new(FailOn {
            name: "c.rs",
            seen: Mutex::new(0),
        });
        let engine = ApplyEngine::with_writer(ws.clone(), backups, writer.clone());

        let err = engine
            .apply(
                &solution(vec![
                    FileOperation::modify("a.rs", "a2\n"),
                    FileOperation::modify("b.rs", "b2\n"),
                    FileOperation::create("c.rs", "c\n"),
                ]),
                ApplyOptions::default(),
            )
            .unwrap_err();
        match err {
            ApplyError::RolledBack(partial) => {
                assert_eq!(partial.failed_path, "c.rs");
                assert_eq!(partial.reverted.len(), 3);
                assert!(partial.unreverted.is_empty());
            }
            other => panic!("expected RolledBack, got {other:?}"),
        }
        assert_eq!(*writer.seen.lock().unwrap(), 1);
        assert_eq!(fs::read_to_string(ws.join("a.rs")).unwrap(), "a1\n");
        assert_eq!(fs::read_to_string(ws.join("b.rs")).unwrap(), "b1\n");
        assert!(!ws.join("c.rs").exists());
    }

    #[test]
    fn test_rollback_removes_directories_it_created() {
        let (_dir, ws, backups) = setup();
        fs::create_dir_all(ws.join("src")).unwrap();
        fs::write(ws.join("src/keep.rs"), "k\n").unwrap();
        let engine = ApplyEngine::with_writer(
            ws.clone(),
            backups,
            Arc::new(FailOn {
                name: "z.rs",
                seen: Mutex::new(0),
            }),
        );

        let err = engine
            .apply(
                &solution(vec![
                    FileOperation::create("new/dir/a.rs", "a\n"),
                    FileOperation::create("src/fresh/b.rs", "b\n"),
                    FileOperation::create("z.rs", "z\n"),
                ]),
                ApplyOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ApplyError::RolledBack(_)));
        assert!(!ws.join("new").exists());
        assert!(!ws.join("src/fresh").exists());
        assert!(ws.join("src/keep.rs").is_file());
        assert!(ws.root().is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_plan_rejects_symlink_out_of_workspace() {
        let (dir, ws, backups) = setup();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, ws.join("link")).unwrap();
        let engine = ApplyEngine::new(ws, backups.clone());

        let err = engine
            .apply(
                &solution(vec![FileOperation::create("link/evil.rs", "x\n")]),
                ApplyOptions::default(),
            )
            .unwrap_err();
        match err {
            ApplyError::Plan { path, reason } => {
                assert_eq!(path, "link/evil.rs");
                assert!(reason.contains("outside the working directory"));
            }
            other => panic!("expected Plan, got {other:?}"),
        }
        assert!(!outside.join("evil.rs").exists());
        assert!(backups.list().unwrap().is_empty());
    }

    #[test]
    fn test_unrecoverable_names_paths() {
        let (dir, ws, _) = setup();
        fs::write(ws.join("a.rs"), "a1\n").unwrap();
        fs::write(ws.join("b.rs"), "b1\n").unwrap();
        // Restore cannot write a.rs back.
        let backups = BackupManager::with_writer(
            dir.path().join("backups"),
            ws.clone(),
            Arc::new(FailOn {
                name: "a.rs",
                seen: Mutex::new(0),
            }),
        );
        let engine = ApplyEngine::with_writer(
            ws.clone(),
            backups,
            Arc::new(FailOn {
                name: "b.rs",
                seen: Mutex::new(0),
            }),
        );

        let err = engine
            .apply(
                &solution(vec![
                    FileOperation::modify("a.rs", "a2\n"),
                    FileOperation::modify("b.rs", "b2\n"),
                ]),
                ApplyOptions::default(),
            )
            .unwrap_err();
        let message = err.to_string();
        match err {
            ApplyError::Unrecoverable(partial) => {
                assert_eq!(partial.unreverted, vec!["a.rs"]);
                assert_eq!(partial.still_applied, vec!["a.rs"]);
                assert_eq!(partial.reverted, vec!["b.rs"]);
            }
            other => panic!("expected Unrecoverable, got {other:?}"),
        }
        assert!(message.contains("a.rs"));
        assert_eq!(fs::read_to_string(ws.join("a.rs")).unwrap(), "a2\n");
    }

    #[test]
    fn test_backup_failure_leaves_files_untouched() {
        let (dir, ws, _) = setup();
        fs::write(ws.join("a.rs"), "a1\n").unwrap();
        // A regular file where the backup root directory should go.
        fs::write(dir.path().join("blocked"), "").unwrap();
        let backups = BackupManager::new(dir.path().join("blocked"), ws.clone());
        let engine = ApplyEngine::new(ws.clone(), backups);

        let err = engine
            .apply(
                &solution(vec![FileOperation::modify("a.rs", "a2\n")]),
                ApplyOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ApplyError::Backup(_)));
        assert_eq!(fs::read_to_string(ws.join("a.rs")).unwrap(), "a1\n");
    }
}
