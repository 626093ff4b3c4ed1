//! File signatures for cache invalidation
//!
//! A signature is the first 8 hex characters of SHA-256 over
//! `mtime|size|path`. Only file metadata is read, never the content, so
//! generation cost does not depend on file size.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::warn;

/// Length of a signature in hex characters
pub const SIGNATURE_LEN: usize = 8;

/// Short cache-invalidation token for a source file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileSignature(String);

impl FileSignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a signature found in a cache file name
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == SIGNATURE_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(s.to_ascii_lowercase()))
        } else {
            None
        }
    }
}

impl fmt::Display for FileSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives and checks file signatures
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSignatureService;

impl FileSignatureService {
    /// Signature for the file's current metadata.
    ///
    /// Never fails: when the file cannot be stat'ed the signature is derived
    /// from the path alone and invalidation is degraded for that file.
    pub fn generate(&self, path: &Path) -> FileSignature {
        self.try_generate(path).unwrap_or_else(|e| {
            warn!(
                path = %path.display(),
                "{} (using path-only signature, cache invalidation degraded)",
                e
            );
            Self::digest(&path.display().to_string())
        })
    }

    /// Signature from file metadata, or `SignatureUnavailable` if the file
    /// cannot be stat'ed
    pub fn try_generate(&self, path: &Path) -> Result<FileSignature> {
        let meta = std::fs::metadata(path).map_err(|e| Error::SignatureUnavailable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mtime_nanos = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(Self::digest(&format!("{}|{}|{}", mtime_nanos, meta.len(), path.display())))
    }

    /// Recompute the signature and compare against `expected`
    pub fn validate(&self, path: &Path, expected: &FileSignature) -> bool {
        self.generate(path) == *expected
    }

    fn digest(input: &str) -> FileSignature {
        let hash = Sha256::digest(input.as_bytes());
        let hex = format!("{:x}", hash);
        FileSignature(hex[..SIGNATURE_LEN].to_string())
    }
}
