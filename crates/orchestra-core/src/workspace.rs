//! Working-directory confinement.
//!
//! Every path an agent proposes is relative text. [`Workspace::normalize`]
//! turns it into a canonical `/`-separated relative path or rejects it; only
//! normalized paths are ever joined onto the root, and
//! [`Workspace::confine`] checks the joined path against symlinks that lead
//! out of it.

use std::path::{Component, Path, PathBuf};

use crate::error::{OrchestraError, Result};

/// The declared working directory all file operations are confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalize a proposed relative path.
    ///
    /// Backslashes become `/`, `.` segments and repeated separators are
    /// dropped. Absolute paths, drive prefixes, `..` segments and paths that
    /// normalize to nothing are rejected.
    pub fn normalize(raw: &str) -> Result<String> {
        let invalid = |reason: &str| OrchestraError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        let unified = raw.trim().replace('\\', "/");
        if unified.is_empty() {
            return Err(invalid("empty path"));
        }
        if unified.starts_with('/') || Path::new(&unified).is_absolute() {
            return Err(invalid("absolute paths are not allowed"));
        }
        if unified.split('/').next().is_some_and(|s| s.len() == 2 && s.ends_with(':')) {
            return Err(invalid("drive-qualified paths are not allowed"));
        }

        let mut parts = Vec::new();
        for component in Path::new(&unified).components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(invalid("escapes the working directory"));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("absolute paths are not allowed"));
                }
            }
        }
        if parts.is_empty() {
            return Err(invalid("empty path"));
        }
        Ok(parts.join("/"))
    }

    /// Join an already normalized relative path.
    pub fn join(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Join a normalized path and check that it stays under the root once
    /// symlinks are followed.
    ///
    /// The deepest part of the joined path that exists is canonicalized; the
    /// rest does not exist yet and will be created as plain directories.
    pub fn confine(&self, rel: &str) -> Result<PathBuf> {
        let invalid = |reason: String| OrchestraError::InvalidPath {
            path: rel.to_string(),
            reason,
        };
        let root = self
            .root
            .canonicalize()
            .map_err(|e| invalid(format!("working directory is not accessible: {e}")))?;

        let target = self.join(rel);
        let existing = target
            .ancestors()
            .find(|candidate| candidate.symlink_metadata().is_ok())
            .ok_or_else(|| invalid("working directory is not accessible".to_string()))?;
        let real = existing
            .canonicalize()
            .map_err(|e| invalid(format!("cannot resolve {}: {e}", existing.display())))?;
        if !real.starts_with(&root) {
            return Err(invalid("resolves outside the working directory".to_string()));
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_cleans_separators() {
        assert_eq!(Workspace::normalize("./src//lib.rs").unwrap(), "src/lib.rs");
        assert_eq!(Workspace::normalize("src\\util\\mod.rs").unwrap(), "src/util/mod.rs");
        assert_eq!(Workspace::normalize("  README.md ").unwrap(), "README.md");
    }

    #[test]
    fn test_normalize_rejects_escapes() {
        for raw in ["../secret", "src/../../x", "/etc/passwd", "C:\\win.ini", "", ".", "./"] {
            assert!(
                matches!(Workspace::normalize(raw), Err(OrchestraError::InvalidPath { .. })),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_confine_allows_paths_not_yet_created() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let ws = Workspace::new(dir.path());
        assert_eq!(ws.confine("src/new/mod.rs").unwrap(), dir.path().join("src/new/mod.rs"));
        assert_eq!(ws.confine("top.rs").unwrap(), dir.path().join("top.rs"));
    }

    #[cfg(unix)]
    #[test]
    fn test_confine_follows_internal_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();
        assert!(Workspace::new(dir.path()).confine("alias/x.rs").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_confine_rejects_symlinked_dir_leaving_root() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, work.join("link")).unwrap();
        std::fs::write(outside.join("present.rs"), "x").unwrap();

        let ws = Workspace::new(&work);
        for rel in ["link/evil.rs", "link/deeper/evil.rs", "link/present.rs", "link"] {
            match ws.confine(rel) {
                Err(OrchestraError::InvalidPath { reason, .. }) => {
                    assert!(reason.contains("outside"), "{rel}: {reason}")
                }
                other => panic!("{rel} should be rejected, got {other:?}"),
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_confine_rejects_file_symlink_leaving_root() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(dir.path().join("secret.txt"), work.join("notes.txt")).unwrap();
        assert!(Workspace::new(&work).confine("notes.txt").is_err());
    }
}
