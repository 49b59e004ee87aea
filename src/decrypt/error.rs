use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("Decryption key cannot be empty")]
    InvalidKey,

    #[error("File does not exist: {0}")]
    FileNotFound(PathBuf),

    #[error("Path is not a regular file: {0}")]
    NotRegularFile(PathBuf),

    #[error("File is not encrypted or already decrypted: {0}")]
    NotEncrypted(PathBuf),

    #[error("No valid decryption key found; check that the age private key is correctly configured")]
    NoUsableKey,

    #[error("Decryption timed out after {0} seconds")]
    Timeout(u64),

    #[error("Interrupted while draining decryption tool output")]
    Interrupted,

    #[error("sops exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    #[error("Failed to run sops: {0}")]
    Process(#[from] crate::subprocess::ProcessError),
}
