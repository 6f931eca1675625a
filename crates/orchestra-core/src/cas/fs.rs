use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{BlobStore, CasError, Digest, Result};

/// The `objects/` directory of one backup.
///
/// An object lives at `objects/<hex[..2]>/<hex[2..]>` and is written once;
/// every read is checked against its digest before the bytes are handed
/// back for a restore.
pub struct FsBlobStore {
    objects: PathBuf,
}

impl FsBlobStore {
    /// Open the store under a backup (or staging) directory, creating
    /// `objects/` if it is missing.
    pub fn open(backup_dir: impl AsRef<Path>) -> Result<Self> {
        let objects = backup_dir.as_ref().join("objects");
        fs::create_dir_all(&objects)?;
        Ok(Self { objects })
    }

    fn locate(&self, digest: &Digest) -> (PathBuf, PathBuf) {
        let hex = digest.to_hex();
        let shard = self.objects.join(&hex[..2]);
        let object = shard.join(&hex[2..]);
        (shard, object)
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, data: &[u8]) -> Result<Digest> {
        let digest = Digest::compute(data);
        let (shard, object) = self.locate(&digest);
        if object.is_file() {
            return Ok(digest);
        }

        fs::create_dir_all(&shard)?;
        let mut staged = NamedTempFile::new_in(&shard)?;
        staged.write_all(data)?;
        staged.as_file().sync_all()?;
        staged.persist(&object).map_err(|e| e.error)?;
        Ok(digest)
    }

    fn get(&self, digest: &Digest) -> Result<Vec<u8>> {
        let (_, object) = self.locate(digest);
        let data = match fs::read(&object) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(CasError::NotFound(*digest)),
            Err(e) => return Err(CasError::Io(e)),
        };

        let actual = Digest::compute(&data);
        if actual == *digest {
            Ok(data)
        } else {
            Err(CasError::Corrupt {
                expected: *digest,
                actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staging() -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path().join(".backup.partial")).unwrap();
        (dir, store)
    }

    fn object_file(dir: &tempfile::TempDir, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        dir.path()
            .join(".backup.partial/objects")
            .join(&hex[..2])
            .join(&hex[2..])
    }

    #[test]
    fn test_source_file_survives_until_restore() {
        let (dir, store) = staging();
        let original = b"fn main() {\n    println!(\"v1\");\n}\n";
        let digest = store.put(original).unwrap();
        assert!(object_file(&dir, &digest).is_file());

        // The committed backup reopens the same directory later.
        let reopened = FsBlobStore::open(dir.path().join(".backup.partial")).unwrap();
        assert_eq!(reopened.get(&digest).unwrap(), original);
    }

    #[test]
    fn test_files_with_equal_content_share_an_object() {
        let (dir, store) = staging();
        let license = b"Apache-2.0\n";
        let first = store.put(license).unwrap();
        let second = store.put(license).unwrap();
        assert_eq!(first, second);

        let shard = object_file(&dir, &first).parent().unwrap().to_path_buf();
        assert_eq!(fs::read_dir(shard).unwrap().count(), 1);
    }

    #[test]
    fn test_binary_and_empty_payloads() {
        let (_dir, store) = staging();
        let png_header = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0xff];
        let payloads: [&[u8]; 2] = [&png_header, b""];
        for payload in payloads {
            let digest = store.put(payload).unwrap();
            assert_eq!(store.get(&digest).unwrap(), payload);
        }
    }

    #[test]
    fn test_digest_not_in_this_backup() {
        let (_dir, store) = staging();
        store.put(b"recorded").unwrap();
        let other = Digest::compute(b"belongs to another backup");
        assert!(matches!(store.get(&other), Err(CasError::NotFound(d)) if d == other));
    }

    #[test]
    fn test_truncated_object_is_refused() {
        let (dir, store) = staging();
        let digest = store.put(b"struct Config { port: u16 }\n").unwrap();
        fs::write(object_file(&dir, &digest), b"struct Config {").unwrap();

        match store.get(&digest) {
            Err(CasError::Corrupt { expected, actual }) => {
                assert_eq!(expected, digest);
                assert_eq!(actual, Digest::compute(b"struct Config {"));
            }
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }
}
