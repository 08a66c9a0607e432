use std::fmt;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Cache lookup key derived from a source path string.
///
/// The same path string always yields the same key. Paths are not
/// canonicalized, so `D:\games\x` and `d:/games/x` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey(String);

impl SourceKey {
    pub fn for_path(path: &Path) -> Self {
        let digest = Sha256::digest(path.to_string_lossy().as_bytes());
        Self(hex::encode(digest))
    }

    /// Wrap an already-computed hex digest (e.g. read back from the registry file).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
