use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{BackupError, Result};
use crate::cas::Digest;
use crate::solution::SolutionId;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SCHEMA_VERSION: &str = "1";

static LAST_ISSUED_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Creation time for a new backup, strictly later than every time handed
/// out before it in this process.
pub(crate) fn next_created_at(now: DateTime<Utc>) -> DateTime<Utc> {
    let wanted = now.timestamp_micros();
    let bump = |last: i64| wanted.max(last.saturating_add(1));
    let previous = match LAST_ISSUED_MICROS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(bump(last))
    }) {
        Ok(last) | Err(last) => last,
    };
    now + chrono::Duration::microseconds(bump(previous) - wanted)
}

/// Backup identifier: UTC timestamp to the microsecond plus a random suffix.
///
/// Lexicographic order is creation order when the timestamp comes from
/// `next_created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(String);

impl BackupId {
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", now.format("%Y%m%dT%H%M%S%6fZ"), &suffix[..6]))
    }

    /// Accept `s` if it could name a backup directory.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = !s.is_empty()
            && !s.starts_with('.')
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optional provenance recorded with a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupLabel {
    pub solution_id: Option<SolutionId>,
    pub agent: Option<String>,
}

/// State of one path at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub path: String,
    /// Whether the file existed; restore deletes it if not.
    pub existed: bool,
    pub digest: Option<Digest>,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub schema_version: String,
    pub id: BackupId,
    pub solution_id: Option<SolutionId>,
    pub agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<BackupEntry>,
}

impl BackupManifest {
    pub(crate) fn read(dir: &Path, id: &BackupId) -> Result<Self> {
        let corrupt = |reason: String| BackupError::CorruptManifest {
            id: id.to_string(),
            reason,
        };
        let bytes = std::fs::read(dir.join(MANIFEST_FILE)).map_err(|e| corrupt(e.to_string()))?;
        let manifest: Self = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if manifest.schema_version != SCHEMA_VERSION {
            return Err(corrupt(format!(
                "unsupported schema version {}",
                manifest.schema_version
            )));
        }
        if manifest.id != *id {
            return Err(corrupt(format!("manifest names backup {}", manifest.id)));
        }
        Ok(manifest)
    }
}
