//! Lazy per-key model cache.
//!
//! Each key owns a `OnceCell`; the map lock is held only while the cell is
//! looked up or registered, so one key's model load never blocks another
//! key. Concurrent first requests for the same key wait on the same cell and
//! the factory runs at most once at a time. A failed factory leaves the cell
//! empty and the next request retries from scratch.
//!
//! Entries are never evicted. This suits a small, bounded set of languages;
//! deployments with hundreds of languages would need an eviction policy.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

use crate::error::Result;

pub struct ModelCache<K, V> {
    entries: RwLock<HashMap<K, Arc<OnceCell<Arc<V>>>>>,
}

impl<K, V> Default for ModelCache<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> ModelCache<K, V>
where
    K: Eq + Hash + Ord + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the resident model for `key`, building it with `factory` on first use.
    pub async fn get_or_create<F, Fut>(&self, key: K, factory: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let cell = {
            let guard = self.entries.read().await;
            guard.get(&key).cloned()
        };

        let cell = match cell {
            Some(cell) => cell,
            None => {
                let mut guard = self.entries.write().await;
                guard
                    .entry(key)
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone()
            }
        };

        let model = cell
            .get_or_try_init(|| async move { factory().await.map(Arc::new) })
            .await?;

        Ok(model.clone())
    }

    /// Keys whose model has been fully constructed.
    pub async fn list_keys(&self) -> BTreeSet<K> {
        let guard = self.entries.read().await;
        guard
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Drop every resident model. Requests already holding a model keep it alive
    /// until they finish.
    pub async fn clear(&self) {
        let mut guard = self.entries.write().await;
        guard.clear();
    }
}
