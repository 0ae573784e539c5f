use crate::model::ReleaseCatalog;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Caller-owned cache of full release catalogs keyed by release tag.
///
/// Entries never expire on their own; a cached catalog is correct only
/// until it is invalidated and reloaded.
#[derive(Debug, Default)]
pub struct ReleaseCache {
    entries: Arc<RwLock<HashMap<String, Arc<ReleaseCatalog>>>>,
}

impl ReleaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a catalog from cache if present
    pub async fn get(&self, tag: &str) -> Option<Arc<ReleaseCatalog>> {
        let entries = self.entries.read().await;
        entries.get(tag).cloned()
    }

    /// Put a catalog into cache, replacing any previous entry for its tag
    pub async fn put(&self, catalog: ReleaseCatalog) -> Arc<ReleaseCatalog> {
        let catalog = Arc::new(catalog);
        let mut entries = self.entries.write().await;
        entries.insert(catalog.tag.clone(), catalog.clone());
        catalog
    }

    /// Remove a catalog from cache
    pub async fn invalidate(&self, tag: &str) -> bool {
        let mut entries = self.entries.write().await;
        entries.remove(tag).is_some()
    }

    /// Clear the entire cache
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(tag: &str) -> ReleaseCatalog {
        ReleaseCatalog::new(1, tag, false, Vec::new())
    }

    #[tokio::test]
    async fn test_cache_basic_operations() {
        let cache = ReleaseCache::new();

        cache.put(catalog("CMSSW_1_0_0")).await;

        let cached = cache.get("CMSSW_1_0_0").await;
        assert!(cached.is_some());
        assert_eq!(cached.unwrap().tag, "CMSSW_1_0_0");

        assert!(cache.invalidate("CMSSW_1_0_0").await);
        assert!(cache.get("CMSSW_1_0_0").await.is_none());
        assert!(!cache.invalidate("CMSSW_1_0_0").await);
    }

    #[tokio::test]
    async fn test_cache_clear() {
        let cache = ReleaseCache::new();
        cache.put(catalog("A")).await;
        cache.put(catalog("B")).await;
        assert!(cache.get("A").await.is_some());

        cache.clear().await;
        assert!(cache.get("A").await.is_none());
        assert!(cache.get("B").await.is_none());
    }
}
