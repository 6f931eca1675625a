//! Pre-apply snapshots of target files.
//!
//! Layout under the backup root:
//!
//! ```text
//! <root>/<id>/manifest.json
//! <root>/<id>/objects/<2 hex>/<62 hex>
//! <root>/.<id>.partial/          staging, never listed
//! ```
//!
//! A snapshot reads every target before writing anything, stages objects and
//! manifest in a hidden directory, then renames it into place.

mod error;
mod manifest;

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

pub use error::{BackupError, Result};
pub use manifest::{BackupEntry, BackupId, BackupLabel, BackupManifest, MANIFEST_FILE, SCHEMA_VERSION};

use manifest::next_created_at;

use crate::cas::fs::FsBlobStore;
use crate::cas::BlobStore;
use crate::fs_writer::{AtomicFileWriter, FileWriter};
use crate::obs;
use crate::workspace::Workspace;

/// A committed backup.
#[derive(Debug, Clone)]
pub struct Backup {
    pub dir: PathBuf,
    pub manifest: BackupManifest,
}

impl Backup {
    pub fn id(&self) -> &BackupId {
        &self.manifest.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreFailure {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub backup: BackupId,
    pub restored: Vec<String>,
    pub failed: Vec<RestoreFailure>,
    /// Whether the backup directory was removed afterwards.
    pub discarded: bool,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Creates, restores and prunes backups for one workspace.
#[derive(Clone)]
pub struct BackupManager {
    root: PathBuf,
    workspace: Workspace,
    writer: Arc<dyn FileWriter>,
}

impl BackupManager {
    pub fn new(root: impl Into<PathBuf>, workspace: Workspace) -> Self {
        Self::with_writer(root, workspace, Arc::new(AtomicFileWriter))
    }

    /// Use `writer` for restore mutations.
    pub fn with_writer(root: impl Into<PathBuf>, workspace: Workspace, writer: Arc<dyn FileWriter>) -> Self {
        Self {
            root: root.into(),
            workspace,
            writer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot `paths` (relative to the workspace).
    #[instrument(skip(self, paths, label), fields(paths = paths.len()))]
    pub fn snapshot(&self, paths: &[String], label: BackupLabel) -> Result<Backup> {
        // Phase 1: read everything. A read failure aborts before any write.
        let mut seen = HashSet::new();
        let mut captured: Vec<(String, Option<Vec<u8>>)> = Vec::new();
        for raw in paths {
            let path = Workspace::normalize(raw).map_err(|e| BackupError::InvalidPath {
                path: raw.clone(),
                reason: e.to_string(),
            })?;
            if !seen.insert(path.clone()) {
                continue;
            }
            let content = match fs::read(self.workspace.join(&path)) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(source) => return Err(BackupError::Read { path, source }),
            };
            captured.push((path, content));
        }

        // Phase 2: stage and commit.
        let created_at = next_created_at(Utc::now());
        let mut id = BackupId::generate(created_at);
        while self.root.join(id.as_str()).exists() {
            id = BackupId::generate(created_at);
        }
        let write_err = |source: io::Error| BackupError::Write {
            id: id.to_string(),
            source,
        };
        fs::create_dir_all(&self.root).map_err(write_err)?;
        let staging = self.root.join(format!(".{id}.partial"));
        fs::create_dir(&staging).map_err(write_err)?;

        let manifest = match self.stage(&staging, &id, created_at, label, captured) {
            Ok(manifest) => manifest,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        let dir = self.root.join(id.as_str());
        if let Err(source) = fs::rename(&staging, &dir) {
            let _ = fs::remove_dir_all(&staging);
            return Err(BackupError::Write {
                id: id.to_string(),
                source,
            });
        }

        obs::emit_backup_created(id.as_str(), manifest.entries.len());
        Ok(Backup { dir, manifest })
    }

    fn stage(
        &self,
        staging: &Path,
        id: &BackupId,
        created_at: chrono::DateTime<Utc>,
        label: BackupLabel,
        captured: Vec<(String, Option<Vec<u8>>)>,
    ) -> Result<BackupManifest> {
        let store = FsBlobStore::open(staging)?;
        let mut entries = Vec::with_capacity(captured.len());
        for (path, content) in captured {
            let entry = match content {
                Some(bytes) => BackupEntry {
                    path,
                    existed: true,
                    digest: Some(store.put(&bytes)?),
                    size: bytes.len() as u64,
                },
                None => BackupEntry {
                    path,
                    existed: false,
                    digest: None,
                    size: 0,
                },
            };
            entries.push(entry);
        }

        let manifest = BackupManifest {
            schema_version: SCHEMA_VERSION.to_string(),
            id: id.clone(),
            solution_id: label.solution_id,
            agent: label.agent,
            created_at,
            entries,
        };
        let json = serde_json::to_vec_pretty(&manifest).map_err(|e| BackupError::Write {
            id: id.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        fs::write(staging.join(MANIFEST_FILE), json).map_err(|source| BackupError::Write {
            id: id.to_string(),
            source,
        })?;
        Ok(manifest)
    }

    /// Put every recorded path back to its snapshot state.
    ///
    /// Keeps going past individual failures. With `discard`, the backup is
    /// deleted only if every path was restored.
    #[instrument(skip(self, backup), fields(backup_id = %backup.id()))]
    pub fn restore(&self, backup: &Backup, discard: bool) -> Result<RestoreReport> {
        let store = FsBlobStore::open(&backup.dir)?;
        let mut restored = Vec::new();
        let mut failed = Vec::new();

        for entry in &backup.manifest.entries {
            match self.restore_entry(&store, entry) {
                Ok(()) => restored.push(entry.path.clone()),
                Err(reason) => {
                    warn!(path = %entry.path, reason = %reason, "restore failed");
                    failed.push(RestoreFailure {
                        path: entry.path.clone(),
                        reason,
                    });
                }
            }
        }

        let discarded = discard && failed.is_empty();
        if discarded {
            self.delete(backup.id())?;
        }
        debug!(restored = restored.len(), failed = failed.len(), "restore finished");
        Ok(RestoreReport {
            backup: backup.id().clone(),
            restored,
            failed,
            discarded,
        })
    }

    fn restore_entry(&self, store: &FsBlobStore, entry: &BackupEntry) -> std::result::Result<(), String> {
        let path = Workspace::normalize(&entry.path).map_err(|e| e.to_string())?;
        let target = self.workspace.confine(&path).map_err(|e| e.to_string())?;
        if !entry.existed {
            return self.writer.remove(&target).map_err(|e| e.to_string());
        }
        let digest = entry
            .digest
            .ok_or_else(|| "manifest entry has no digest".to_string())?;
        let bytes = store.get(&digest).map_err(|e| e.to_string())?;
        self.writer.write(&target, &bytes).map_err(|e| e.to_string())
    }

    /// Manifests, newest first. Staging directories and unreadable
    /// manifests are skipped.
    pub fn list(&self) -> Result<Vec<BackupManifest>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(BackupError::Write {
                    id: self.root.display().to_string(),
                    source,
                })
            }
        };

        let mut manifests = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = BackupId::parse(&name) else {
                continue;
            };
            if !entry.path().is_dir() {
                continue;
            }
            match BackupManifest::read(&entry.path(), &id) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => warn!(backup_id = %id, error = %e, "skipping unreadable backup"),
            }
        }
        manifests.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
        Ok(manifests)
    }

    pub fn load(&self, id: &str) -> Result<Backup> {
        let parsed = BackupId::parse(id).ok_or_else(|| BackupError::NotFound(id.to_string()))?;
        let dir = self.root.join(parsed.as_str());
        if !dir.is_dir() {
            return Err(BackupError::NotFound(id.to_string()));
        }
        let manifest = BackupManifest::read(&dir, &parsed)?;
        Ok(Backup { dir, manifest })
    }

    pub fn delete(&self, id: &BackupId) -> Result<()> {
        let dir = self.root.join(id.as_str());
        if !dir.is_dir() {
            return Err(BackupError::NotFound(id.to_string()));
        }
        fs::remove_dir_all(&dir).map_err(|source| BackupError::Write {
            id: id.to_string(),
            source,
        })
    }

    /// Delete all but the `keep` newest backups, oldest first.
    pub fn prune(&self, keep: usize) -> Result<Vec<BackupId>> {
        let manifests = self.list()?;
        let mut deleted = Vec::new();
        for manifest in manifests.into_iter().skip(keep).rev() {
            self.delete(&manifest.id)?;
            deleted.push(manifest.id);
        }
        if !deleted.is_empty() {
            debug!(deleted = deleted.len(), keep = keep, "pruned backups");
        }
        Ok(deleted)
    }
}
