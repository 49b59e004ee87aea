//! SOPS-backed decryptor using age keys.
//!
//! Invokes the `sops` CLI through the subprocess layer; the age private key
//! reaches the tool only through the `SOPS_AGE_KEY` environment variable of
//! the child process and is never written to disk or logged.
//!
//! Failure classification inspects the tool's stderr for two known message
//! fragments. sops offers no structured error contract, so this table is
//! fragile against message-format changes in the tool; anything unmatched
//! falls back to a generic wrapped failure.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::time::Duration;

use crate::subprocess::{ExitStatus, ProcessCommandBuilder, ProcessError, SubprocessManager};

use super::error::DecryptError;
use super::Decryptor;

const SOPS_AGE_KEY_ENV: &str = "SOPS_AGE_KEY";
const SOPS_COMMAND: &str = "sops";
const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// SOPS metadata block: a `sops:` key at the start of a line.
static SOPS_METADATA_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*sops\s*:").unwrap());
/// Inline encrypted value: `ENC[ALGORITHM, data:...]`.
static ENCRYPTED_VALUE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"ENC\[[^\]]+\]").unwrap());

pub struct SopsDecryptor {
    private_key: String,
    timeout_seconds: u64,
    subprocess: SubprocessManager,
}

impl SopsDecryptor {
    /// Create a decryptor with the default 60 second execution timeout.
    /// Fails fast when the key material is empty or whitespace-only.
    pub fn new(private_key: &str, subprocess: SubprocessManager) -> Result<Self, DecryptError> {
        Self::with_timeout(private_key, DEFAULT_TIMEOUT_SECONDS, subprocess)
    }

    pub fn with_timeout(
        private_key: &str,
        timeout_seconds: u64,
        subprocess: SubprocessManager,
    ) -> Result<Self, DecryptError> {
        let private_key = private_key.trim();
        if private_key.is_empty() {
            return Err(DecryptError::InvalidKey);
        }
        Ok(Self {
            private_key: private_key.to_string(),
            timeout_seconds,
            subprocess,
        })
    }

    /// Apply the two detection heuristics to document text. Either signal
    /// alone is sufficient; some encrypted documents carry only inline
    /// `ENC[...]` markers without the metadata block.
    pub fn is_encrypted_content(content: &str) -> bool {
        SOPS_METADATA_PATTERN.is_match(content) || ENCRYPTED_VALUE_PATTERN.is_match(content)
    }

    async fn execute_sops_decrypt(&self, path: &Path) -> Result<String, DecryptError> {
        let command = ProcessCommandBuilder::new(SOPS_COMMAND)
            .arg("--decrypt")
            .arg(&path.to_string_lossy())
            .env(SOPS_AGE_KEY_ENV, &self.private_key)
            .timeout(Duration::from_secs(self.timeout_seconds))
            .build();

        let output = self
            .subprocess
            .runner()
            .run(command)
            .await
            .map_err(|e| match e {
                ProcessError::DrainInterrupted(_) => DecryptError::Interrupted,
                other => DecryptError::Process(other),
            })?;

        match output.status {
            ExitStatus::Success => {
                tracing::debug!("Successfully decrypted file: {}", path.display());
                Ok(output.stdout)
            }
            ExitStatus::Timeout => Err(DecryptError::Timeout(self.timeout_seconds)),
            status => {
                let message = if output.stderr.is_empty() {
                    output.stdout
                } else {
                    output.stderr
                };
                Err(Self::classify_failure(
                    path,
                    status.code().unwrap_or(-1),
                    message,
                ))
            }
        }
    }

    /// Known sops failure messages, matched by substring.
    fn classify_failure(path: &Path, code: i32, stderr: String) -> DecryptError {
        if stderr.contains("metadata not found") {
            DecryptError::NotEncrypted(path.to_path_buf())
        } else if stderr.contains("no decryption key") {
            DecryptError::NoUsableKey
        } else {
            DecryptError::CommandFailed { code, stderr }
        }
    }
}

#[async_trait]
impl Decryptor for SopsDecryptor {
    fn is_encrypted(&self, path: &Path) -> bool {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(
                    "Failed to check whether {} is encrypted: {}",
                    path.display(),
                    e
                );
                return false;
            }
        };

        let encrypted = Self::is_encrypted_content(&content);
        if encrypted {
            tracing::debug!("File {} detected as SOPS-encrypted", path.display());
        }
        encrypted
    }

    async fn decrypt(&self, path: &Path) -> Result<String, DecryptError> {
        if !path.exists() {
            return Err(DecryptError::FileNotFound(path.to_path_buf()));
        }
        if !path.is_file() {
            return Err(DecryptError::NotRegularFile(path.to_path_buf()));
        }

        tracing::debug!("Decrypting file: {}", path.display());
        self.execute_sops_decrypt(path).await
    }
}
