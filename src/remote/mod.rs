//! Remote document fetcher.
//!
//! The resolver only needs read access to a fixed ref: enumerate
//! subdirectories of the deployment tree and fetch raw file content at
//! fixed relative paths. Both capabilities sit behind [`RepositoryClient`]
//! so the pipeline can be tested against [`InMemoryRepository`].

pub mod gitlab;
pub mod mock;

pub use gitlab::GitLabClient;
pub use mock::InMemoryRepository;

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Names of the immediate subdirectories of `path` at the configured ref.
    async fn list_directories(&self, path: &str) -> Result<Vec<String>>;

    /// Raw content of the file at `path`, or `None` when the file does not
    /// exist. Absence is a probe result, not an error.
    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>>;
}
