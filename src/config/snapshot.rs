//! Raw configuration snapshots.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// One fetched instance of the configuration content.
///
/// Two snapshots are equal iff their bytes are identical; the version is a
/// SHA-256 of the content and only used for logging.
#[derive(Clone)]
pub struct RawConfigSnapshot {
    bytes: Arc<[u8]>,
    version: Arc<str>,
}

impl RawConfigSnapshot {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let version = format!("{:x}", Sha256::digest(&bytes));
        Self {
            bytes: bytes.into(),
            version: version.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Full content hash.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// First 12 hex characters of the content hash.
    pub fn short_version(&self) -> &str {
        &self.version[..12]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for RawConfigSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for RawConfigSnapshot {}

impl fmt::Debug for RawConfigSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawConfigSnapshot")
            .field("version", &self.short_version())
            .field("len", &self.len())
            .finish()
    }
}
