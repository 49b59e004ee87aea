use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::Result;

use super::RepositoryClient;

/// In-memory repository for tests: file content keyed by repository path,
/// directory listings derived from the stored paths. Read counts are
/// recorded so tests can assert how often the remote was hit.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    reads: Arc<Mutex<HashMap<String, usize>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.into());
    }

    pub fn remove_file(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    /// How many times `read_file` was called for `path`.
    pub fn read_count(&self, path: &str) -> usize {
        self.reads.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RepositoryClient for InMemoryRepository {
    async fn list_directories(&self, path: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let files = self.files.lock().unwrap();
        let mut names: Vec<String> = Vec::new();
        for key in files.keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                if let Some((first, _)) = rest.split_once('/') {
                    if !names.iter().any(|n| n == first) {
                        names.push(first.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        *self
            .reads
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_insert(0) += 1;
        Ok(self.files.lock().unwrap().get(path).cloned())
    }
}
