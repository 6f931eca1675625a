//! Content-addressed blob storage for backup payloads.
//!
//! Each backup owns a private store; manifest entries reference prior file
//! content by [`Digest`].

pub mod fs;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};
use thiserror::Error;

/// SHA-256 digest used as a content address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Compute the SHA-256 digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hash);
        Self(bytes)
    }

    /// Hex-encoded string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl FromStr for Digest {
    type Err = CasError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| CasError::InvalidDigest(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CasError::InvalidDigest(s.to_string()))?;
        Ok(Self(arr))
    }
}

// Manifests store digests as hex strings.
impl Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors from blob store operations.
#[derive(Debug, Error)]
pub enum CasError {
    #[error("blob not found: {0}")]
    NotFound(Digest),

    #[error("blob {expected} is corrupt (content hashes to {actual})")]
    Corrupt { expected: Digest, actual: Digest },

    #[error("invalid digest hex: {0}")]
    InvalidDigest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CasError>;

/// Content-addressed blob store interface.
pub trait BlobStore: Send + Sync {
    /// Store `data` and return its digest. Deduplicates automatically.
    fn put(&self, data: &[u8]) -> Result<Digest>;

    /// Retrieve the blob for `digest`, verifying its content hash.
    fn get(&self, digest: &Digest) -> Result<Vec<u8>>;
}
