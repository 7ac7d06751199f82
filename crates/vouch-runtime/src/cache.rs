//! Bounded-staleness catalog cache.
//!
//! Stages read the catalog through one shared [`CatalogSnapshot`] that is
//! reloaded at most once per TTL. Applying a proposal invalidates it. If a
//! reload fails the last good snapshot is served instead.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use parking_lot::RwLock;

use vouch_core::CatalogSnapshot;

use crate::store::{CatalogStore, StoreError};

pub struct CatalogCache {
    store: Arc<dyn CatalogStore>,
    cache: Cache<(), Arc<CatalogSnapshot>>,
    last_good: RwLock<Option<Arc<CatalogSnapshot>>>,
}

impl CatalogCache {
    pub fn new(store: Arc<dyn CatalogStore>, ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(1).time_to_live(ttl).build();

        Self {
            store,
            cache,
            last_good: RwLock::new(None),
        }
    }

    /// Current catalog, loading it if the cached copy expired.
    ///
    /// Concurrent callers share a single load.
    pub async fn snapshot(&self) -> Result<Arc<CatalogSnapshot>, StoreError> {
        let store = Arc::clone(&self.store);
        let loaded = self
            .cache
            .try_get_with((), async move { store.snapshot().await.map(Arc::new) })
            .await;

        match loaded {
            Ok(snapshot) => {
                *self.last_good.write() = Some(Arc::clone(&snapshot));
                Ok(snapshot)
            }
            Err(e) => match self.last_good.read().clone() {
                Some(stale) => {
                    tracing::warn!(error = %e, "catalog reload failed, serving last good snapshot");
                    Ok(stale)
                }
                None => Err(StoreError::Unavailable(e.to_string())),
            },
        }
    }

    /// Drop the cached snapshot so the next read reloads.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
        tracing::debug!("catalog cache invalidated");
    }
}

impl std::fmt::Debug for CatalogCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogCache")
            .field("has_last_good", &self.last_good.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::FlakyStore;
    use crate::store::InMemoryCatalogStore;
    use vouch_core::CanonicalItem;

    fn flaky() -> Arc<FlakyStore> {
        let inner = InMemoryCatalogStore::from_yaml(
            r#"
canonical_items:
  - id: "chair"
    name: "Office Chair"
"#,
        )
        .unwrap();
        Arc::new(FlakyStore::new(inner))
    }

    #[tokio::test]
    async fn test_snapshot_is_cached_until_invalidated() {
        let store = flaky();
        let cache = CatalogCache::new(store.clone(), Duration::from_secs(300));

        assert_eq!(cache.snapshot().await.unwrap().canonical_items().len(), 1);
        cache.snapshot().await.unwrap();
        assert_eq!(store.catalog_reads(), 1);

        store
            .insert_canonical_item(CanonicalItem {
                id: "desk".to_string(),
                name: "Standing Desk".to_string(),
                category: String::new(),
                description: None,
            })
            .await
            .unwrap();
        assert_eq!(cache.snapshot().await.unwrap().canonical_items().len(), 1);

        cache.invalidate();
        assert_eq!(cache.snapshot().await.unwrap().canonical_items().len(), 2);
        assert_eq!(store.catalog_reads(), 2);
    }

    #[tokio::test]
    async fn test_falls_back_to_last_good() {
        let store = flaky();
        let cache = CatalogCache::new(store.clone(), Duration::from_secs(300));
        cache.snapshot().await.unwrap();

        store.fail_reads(true);
        cache.invalidate();
        let snapshot = cache.snapshot().await.unwrap();
        assert!(snapshot.canonical_item("chair").is_some());
    }

    #[tokio::test]
    async fn test_cold_failure_is_an_error() {
        let store = flaky();
        store.fail_reads(true);
        let cache = CatalogCache::new(store, Duration::from_secs(300));
        assert!(matches!(
            cache.snapshot().await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
