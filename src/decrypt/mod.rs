//! Decryption gate for secret-bearing documents.
//!
//! Documents fetched from the configuration repository may be encrypted
//! with SOPS. The gate detects ciphertext heuristically and recovers the
//! plaintext by delegating to the external `sops` binary; no cryptography
//! is implemented here.

pub mod error;
pub mod sops;

pub use error::DecryptError;
pub use sops::SopsDecryptor;

use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait Decryptor: Send + Sync {
    /// Whether the file at `path` looks encrypted. Never fails: any I/O
    /// problem means the document must be readable as-is, so it reports
    /// "not encrypted".
    fn is_encrypted(&self, path: &Path) -> bool;

    /// Decrypt the file at `path`, returning the plaintext. Partial output
    /// from a failed or timed-out run is never returned as success.
    async fn decrypt(&self, path: &Path) -> Result<String, DecryptError>;
}
