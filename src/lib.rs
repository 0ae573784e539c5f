pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod seed;
pub mod store;

use std::sync::Arc;

pub use catalog::{DirectoryManager, TemplateCatalog};
pub use error::{ConfDbError, ConsistencyWarning, Loaded, Result};
pub use graph::{GraphLoader, GraphPersister, SaveRequest};
pub use model::*;
pub use store::{MemoryStore, PostgresStore, ReleaseCache, Store};

/// Entry point tying a store to the type registry and an optional release
/// catalog cache.
pub struct ConfDb<S: Store + ?Sized> {
    store: Arc<S>,
    registry: TypeRegistry,
    releases: Option<ReleaseCache>,
}

impl<S: Store + ?Sized> ConfDb<S> {
    /// Reads the type registry and starts with release caching enabled.
    pub async fn open(store: Arc<S>) -> Result<Self> {
        let registry = store
            .type_registry()
            .await
            .map_err(ConfDbError::store("load type registry"))?;
        Ok(Self {
            store,
            registry,
            releases: Some(ReleaseCache::new()),
        })
    }

    pub fn with_release_cache(mut self, enabled: bool) -> Self {
        self.releases = enabled.then(ReleaseCache::new);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn directories(&self) -> DirectoryManager<'_, S> {
        DirectoryManager::new(&*self.store)
    }

    pub fn catalog(&self) -> TemplateCatalog<'_, S> {
        TemplateCatalog::new(&*self.store, &self.registry)
    }

    /// Full catalog of a release, served from the cache when present.
    /// Cached catalogs are returned without the warnings of their load.
    pub async fn release(&self, tag: &str) -> Result<Loaded<Arc<ReleaseCatalog>>> {
        if let Some(cache) = &self.releases {
            if let Some(catalog) = cache.get(tag).await {
                log::debug!("Release {} served from cache", tag);
                return Ok(Loaded::new(catalog, Vec::new()));
            }
        }
        let Loaded { value, warnings } = self.catalog().load_release(tag).await?;
        let catalog = match &self.releases {
            Some(cache) => cache.put(value).await,
            None => Arc::new(value),
        };
        Ok(Loaded::new(catalog, warnings))
    }

    /// Like `release`, but a missing release is an integrity violation of
    /// the configuration that names it.
    async fn release_of(&self, operation: &'static str, tag: &str) -> Result<Loaded<Arc<ReleaseCatalog>>> {
        match self.release(tag).await {
            Err(ConfDbError::NotFound { entity, .. }) => Err(ConfDbError::integrity(
                operation,
                format!("{} does not exist", entity),
            )),
            other => other,
        }
    }

    /// Drops a cached release so the next access reloads it.
    pub async fn invalidate_release(&self, tag: &str) -> bool {
        match &self.releases {
            Some(cache) => cache.invalidate(tag).await,
            None => false,
        }
    }

    /// Drops every cached release.
    pub async fn clear_releases(&self) {
        if let Some(cache) = &self.releases {
            cache.clear().await;
            log::debug!("Release cache cleared");
        }
    }

    /// Loads a configuration version against the full catalog of its
    /// release. Warnings of both loads are returned together.
    pub async fn load_configuration(&self, configuration_id: Id) -> Result<Loaded<Configuration>> {
        const OP: &str = "load configuration";
        let row = self
            .store
            .get_configuration(configuration_id)
            .await
            .map_err(ConfDbError::store(OP))?
            .ok_or_else(|| ConfDbError::not_found(OP, format!("configuration {}", configuration_id)))?;
        let Loaded { value: release, mut warnings } = self.release_of(OP, &row.release_tag).await?;
        let loaded = GraphLoader::new(&*self.store, &self.registry)
            .load(configuration_id, &release)
            .await?;
        warnings.extend(loaded.warnings);
        Ok(Loaded::new(loaded.value, warnings))
    }

    /// Loads a configuration against only the templates it references.
    pub async fn load_configuration_partial(&self, configuration_id: Id) -> Result<Loaded<Configuration>> {
        let Loaded { value: release, mut warnings } =
            self.catalog().load_partial_release(configuration_id).await?;
        let loaded = GraphLoader::new(&*self.store, &self.registry)
            .load(configuration_id, &release)
            .await?;
        warnings.extend(loaded.warnings);
        Ok(Loaded::new(loaded.value, warnings))
    }

    /// Loads `dir/name[/Vn]`, the latest version when none is given.
    pub async fn load_configuration_by_name(&self, full_name: &str) -> Result<Loaded<Configuration>> {
        let id = self.directories().resolve_configuration_id(full_name).await?;
        self.load_configuration(id).await
    }

    /// Saves the graph as a new version of its name.
    pub async fn save_configuration(
        &self,
        config: &mut Configuration,
        request: &SaveRequest,
    ) -> Result<ConfigurationVersion> {
        let release = self.release_of("save configuration", &config.release_tag).await?.value;
        GraphPersister::new(&*self.store, &self.registry)
            .save(config, &release, request)
            .await
    }
}
