//! Content fingerprints used by the bundled backends.
//!
//! A fingerprint is the lowercase hex SHA-256 digest of an object's body. The pipeline treats
//! fingerprints as opaque strings and only compares them for equality, so other backends are
//! free to use their native checksum (e.g. an ETag).

use sha2::{Digest, Sha256};

/// Incremental fingerprint computation over body chunks.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    hasher: Sha256,
    len: u64,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Number of bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Fingerprint of an in-memory body.
pub fn fingerprint(data: &[u8]) -> String {
    let mut fp = Fingerprinter::new();
    fp.update(data);
    fp.finish()
}
