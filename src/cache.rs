//! Resolution cache.
//!
//! Maps environment identifier to the resolved environment. Population is
//! single-flight per identifier: concurrent first lookups for one id share
//! a `tokio::sync::OnceCell` inserted atomically into the map, so the
//! expensive fetch/decrypt/parse sequence runs once while unrelated ids
//! resolve in parallel. Entries leave the cache only through explicit
//! invalidation; there is no background expiry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::error::Result;
use crate::model::Environment;

type Cell = Arc<OnceCell<Arc<Environment>>>;

#[derive(Default)]
pub struct ResolutionCache {
    entries: RwLock<HashMap<Uuid, Cell>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached environment, if already resolved.
    pub fn get(&self, id: Uuid) -> Option<Arc<Environment>> {
        self.entries
            .read()
            .unwrap()
            .get(&id)
            .and_then(|cell| cell.get().cloned())
    }

    /// Every currently cached environment, for cross-environment queries.
    pub fn environments(&self) -> Vec<Arc<Environment>> {
        self.entries
            .read()
            .unwrap()
            .values()
            .filter_map(|cell| cell.get().cloned())
            .collect()
    }

    /// Return the cached environment for `id`, resolving it through
    /// `resolve` on first access. A resolution yielding `None` (the
    /// location turned out not to be an environment) is not cached.
    pub async fn get_or_resolve<F, Fut>(&self, id: Uuid, resolve: F) -> Result<Option<Arc<Environment>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Environment>>>,
    {
        let cell = {
            let mut entries = self.entries.write().unwrap();
            Arc::clone(entries.entry(id).or_default())
        };

        if let Some(env) = cell.get() {
            return Ok(Some(Arc::clone(env)));
        }

        enum Miss {
            NotAnEnvironment,
            Failed(crate::error::Error),
        }

        let result = cell
            .get_or_try_init(|| async {
                match resolve().await {
                    Ok(Some(environment)) => Ok(Arc::new(environment)),
                    Ok(None) => Err(Miss::NotAnEnvironment),
                    Err(e) => Err(Miss::Failed(e)),
                }
            })
            .await;

        match result {
            Ok(env) => Ok(Some(Arc::clone(env))),
            Err(Miss::NotAnEnvironment) => {
                self.remove_uninitialized(id);
                Ok(None)
            }
            Err(Miss::Failed(e)) => {
                self.remove_uninitialized(id);
                Err(e)
            }
        }
    }

    /// Drop the entry for `id` so the next lookup resolves afresh.
    pub fn invalidate(&self, id: Uuid) {
        self.entries.write().unwrap().remove(&id);
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    /// A failed resolution must not pin an empty cell in the map, or a
    /// later lookup would race against stale state after `invalidate`.
    fn remove_uninitialized(&self, id: Uuid) {
        let mut entries = self.entries.write().unwrap();
        if let Some(cell) = entries.get(&id) {
            if cell.get().is_none() {
                entries.remove(&id);
            }
        }
    }
}
