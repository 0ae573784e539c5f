use crate::model::{Id, TypeRegistry};
use crate::store::rows::{
    ConfigurationRow, DirectoryRow, LockRow, ReleaseRow, StagedConfiguration, StagedTemplates,
    WriteBatch,
};
use anyhow::Result;

/// Source of globally unique identities.
#[async_trait::async_trait]
pub trait IdentityStore: Send + Sync {
    /// Allocates one fresh identity. Identities are never reused, even when
    /// the surrounding transaction rolls back.
    async fn allocate_id(&self) -> Result<Id>;

    /// Allocates `count` fresh identities in ascending order.
    async fn allocate_ids(&self, count: usize) -> Result<Vec<Id>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(self.allocate_id().await?);
        }
        Ok(ids)
    }
}

#[async_trait::async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn list_directories(&self) -> Result<Vec<DirectoryRow>>;
    async fn get_directory(&self, id: Id) -> Result<Option<DirectoryRow>>;
    async fn insert_directory(&self, parent_id: Id, name: &str) -> Result<DirectoryRow>;
    /// Deletes the directory if it has no child directories and no
    /// configurations. Returns false when it was not empty or not found.
    async fn delete_empty_directory(&self, id: Id) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// All configuration versions, ordered by directory, name and version.
    async fn list_configurations(&self) -> Result<Vec<ConfigurationRow>>;
    async fn get_configuration(&self, id: Id) -> Result<Option<ConfigurationRow>>;
    async fn list_versions(&self, directory_id: Id, name: &str) -> Result<Vec<ConfigurationRow>>;
    async fn latest_version(&self, directory_id: Id, name: &str) -> Result<Option<i32>>;
}

#[async_trait::async_trait]
pub trait LockStore: Send + Sync {
    async fn list_locks(&self) -> Result<Vec<LockRow>>;
    async fn get_lock(&self, directory_id: Id, name: &str) -> Result<Option<LockRow>>;
    /// Inserts the lock unless one exists. Returns false if it already did.
    async fn insert_lock(&self, lock: &LockRow) -> Result<bool>;
    async fn delete_lock(&self, directory_id: Id, name: &str) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait ReleaseStore: Send + Sync {
    async fn list_releases(&self) -> Result<Vec<ReleaseRow>>;
    async fn release_by_tag(&self, tag: &str) -> Result<Option<ReleaseRow>>;
    async fn release_by_id(&self, id: Id) -> Result<Option<ReleaseRow>>;
    async fn type_registry(&self) -> Result<TypeRegistry>;
}

/// Consumer side of the external staging step.
#[async_trait::async_trait]
pub trait StagingStore: Send + Sync {
    async fn stage_release(&self, release_id: Id) -> Result<StagedTemplates>;
    async fn stage_configuration_templates(&self, configuration_id: Id) -> Result<StagedTemplates>;
    async fn stage_template(&self, release_id: Id, name: &str) -> Result<StagedTemplates>;
    async fn stage_configuration(&self, configuration_id: Id) -> Result<StagedConfiguration>;
}

#[async_trait::async_trait]
pub trait WriteStore: Send + Sync {
    /// Applies the whole batch atomically; on error nothing is written.
    async fn commit(&self, batch: &WriteBatch) -> Result<()>;
}

/// Combined trait for stores that implement all operations
pub trait Store:
    IdentityStore + DirectoryStore + ConfigurationStore + LockStore + ReleaseStore + StagingStore + WriteStore + Send + Sync
{
}
