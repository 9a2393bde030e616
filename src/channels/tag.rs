/*!
 * Integrity Tags
 * Incremental SHA-256 digests over channel traffic
 */

use sha2::{Digest, Sha256};

/// Incremental checksum context owned by a channel or a manifest
#[derive(Debug, Clone, Default)]
pub struct IntegrityTag {
    ctx: Sha256,
}

impl IntegrityTag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the digest; empty input is ignored
    pub fn update(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.ctx.update(data);
    }

    /// Hex digest of everything fed so far; the context stays usable
    pub fn digest(&self) -> String {
        hex::encode(self.ctx.clone().finalize())
    }
}
