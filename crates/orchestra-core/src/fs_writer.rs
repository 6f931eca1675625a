//! File mutation seam used by apply and restore.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Writes and removes files on behalf of the apply engine and backup restore.
///
/// Tests substitute implementations that fail on chosen paths.
pub trait FileWriter: Send + Sync {
    /// Replace `path` with `content`, creating parent directories.
    fn write(&self, path: &Path, content: &[u8]) -> io::Result<()>;

    /// Remove `path`. Removing a missing file succeeds.
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Temp file in the target directory, fsync, then rename over the target.
#[derive(Debug, Default, Clone, Copy)]
pub struct AtomicFileWriter;

impl FileWriter for AtomicFileWriter {
    fn write(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
