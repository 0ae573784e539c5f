use anyhow::{anyhow, bail, Context, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::codec;
use crate::model::{Id, Parameter, Template, TemplateKind, TypeRegistry};
use crate::store::rows::{
    ConfigurationRow, DirectoryRow, EdgeKind, EdgeRow, EntityRow, EntryRow, InstanceRow,
    InstanceRowKind, LockRow, PackageRow, ParameterInsert, ParameterRow, ReleaseRow,
    StagedConfiguration, StagedTemplates, StreamEntryRow, SubsystemRow, TemplateRow,
    TemplateRowKind, ValueInsert, WriteBatch, WriteStage,
};
use crate::store::traits::{
    ConfigurationStore, DirectoryStore, IdentityStore, LockStore, ReleaseStore, StagingStore,
    Store, WriteStore,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    directories: Vec<DirectoryRow>,
    configurations: Vec<ConfigurationRow>,
    locks: Vec<LockRow>,
    releases: Vec<ReleaseRow>,
    subsystems: Vec<SubsystemRow>,
    packages: Vec<PackageRow>,
    templates: BTreeMap<Id, TemplateRow>,
    release_templates: Vec<(Id, Id)>,
    entities: BTreeMap<Id, EntityRow>,
    parameters: BTreeMap<Id, ParameterInsert>,
    values: Vec<ValueInsert>,
    edges: Vec<EdgeRow>,
}

impl Tables {
    fn exists(&self, id: Id) -> bool {
        self.entities.contains_key(&id)
            || self.parameters.contains_key(&id)
            || self.templates.contains_key(&id)
            || self.configurations.iter().any(|c| c.id == id)
    }

    fn apply(&mut self, batch: &WriteBatch, fail_stage: Option<&str>) -> Result<()> {
        let config = &batch.configuration;
        if self.exists(config.id) {
            bail!("duplicate key: configuration id {}", config.id);
        }
        if !self.directories.iter().any(|d| d.id == config.directory_id) {
            bail!("foreign key violation: directory {} does not exist", config.directory_id);
        }
        if !self.releases.iter().any(|r| r.id == config.release_id) {
            bail!("foreign key violation: release {} does not exist", config.release_id);
        }
        if self.configurations.iter().any(|c| {
            c.directory_id == config.directory_id && c.name == config.name && c.version == config.version
        }) {
            bail!(
                "unique violation: {} version {} already exists",
                config.name,
                config.version
            );
        }
        self.configurations.push(config.clone());

        for stage in &batch.stages {
            self.apply_stage(stage, fail_stage)
                .with_context(|| format!("stage '{}'", stage.name))?;
        }
        Ok(())
    }

    fn apply_stage(&mut self, stage: &WriteStage, fail_stage: Option<&str>) -> Result<()> {
        if fail_stage == Some(stage.name.as_str()) {
            bail!("simulated write failure");
        }
        for entity in &stage.entities {
            if self.exists(entity.id()) {
                bail!("duplicate key: {} id {}", entity.table(), entity.id());
            }
            self.entities.insert(entity.id(), entity.clone());
        }
        for parameter in &stage.parameters {
            if self.exists(parameter.id) {
                bail!("duplicate key: {} id {}", parameter.table(), parameter.id);
            }
            self.parameters.insert(parameter.id, parameter.clone());
        }
        for value in &stage.values {
            if !self.parameters.contains_key(&value.row.parameter_id) {
                bail!(
                    "foreign key violation: value for unknown parameter {}",
                    value.row.parameter_id
                );
            }
            self.values.push(value.clone());
        }
        for edge in &stage.edges {
            if !self.exists(edge.parent_id) || !self.exists(edge.child_id) {
                bail!(
                    "foreign key violation: {} ({}, {})",
                    edge.kind.table(),
                    edge.parent_id,
                    edge.child_id
                );
            }
            self.edges.push(edge.clone());
        }
        Ok(())
    }

    fn parameter_edges(&self) -> HashMap<Id, Vec<&EdgeRow>> {
        let mut by_parent: HashMap<Id, Vec<&EdgeRow>> = HashMap::new();
        for edge in self.edges.iter().filter(|e| e.kind == EdgeKind::Parameter) {
            by_parent.entry(edge.parent_id).or_default().push(edge);
        }
        by_parent
    }

    fn collect_parameters(
        &self,
        owner: Id,
        by_parent: &HashMap<Id, Vec<&EdgeRow>>,
        values_by_id: &HashMap<Id, Vec<&ValueInsert>>,
        parameters: &mut Vec<ParameterRow>,
        values: &mut Vec<crate::store::rows::ValueRow>,
    ) {
        let Some(edges) = by_parent.get(&owner) else {
            return;
        };
        for edge in edges {
            let Some(parameter) = self.parameters.get(&edge.child_id) else {
                continue;
            };
            parameters.push(ParameterRow {
                id: parameter.id,
                type_id: parameter.type_id,
                name: parameter.name.clone(),
                tracked: parameter.tracked,
                hex: parameter.hex,
                position: edge.position,
                parent_id: owner,
            });
            if let Some(rows) = values_by_id.get(&parameter.id) {
                values.extend(rows.iter().map(|v| v.row.clone()));
            }
            self.collect_parameters(parameter.id, by_parent, values_by_id, parameters, values);
        }
    }

    fn values_by_id(&self) -> HashMap<Id, Vec<&ValueInsert>> {
        let mut grouped: HashMap<Id, Vec<&ValueInsert>> = HashMap::new();
        for value in &self.values {
            grouped.entry(value.row.parameter_id).or_default().push(value);
        }
        grouped
    }

    fn stage_templates(&self, template_ids: &[Id]) -> StagedTemplates {
        let mut staged = StagedTemplates::default();
        let by_parent = self.parameter_edges();
        let values_by_id = self.values_by_id();

        let mut package_ids = HashSet::new();
        for id in template_ids {
            let Some(template) = self.templates.get(id) else {
                continue;
            };
            package_ids.insert(template.package_id);
            staged.templates.push(template.clone());
            self.collect_parameters(
                template.id,
                &by_parent,
                &values_by_id,
                &mut staged.parameters,
                &mut staged.values,
            );
        }

        let mut subsystem_ids = HashSet::new();
        for package in self.packages.iter().filter(|p| package_ids.contains(&p.id)) {
            subsystem_ids.insert(package.subsystem_id);
            staged.packages.push(package.clone());
        }
        staged.subsystems = self
            .subsystems
            .iter()
            .filter(|s| subsystem_ids.contains(&s.id))
            .cloned()
            .collect();
        staged
    }

    fn release_template_ids(&self, release_id: Id) -> Vec<Id> {
        self.release_templates
            .iter()
            .filter(|(r, _)| *r == release_id)
            .map(|(_, t)| *t)
            .collect()
    }
}

fn instance_row(edge: &EdgeRow, tables: &Tables) -> Option<InstanceRow> {
    let kind = match edge.kind {
        EdgeKind::ConfigurationPSet => InstanceRowKind::PSet,
        EdgeKind::ConfigurationEDSource => InstanceRowKind::EDSource,
        EdgeKind::ConfigurationESSource => InstanceRowKind::ESSource,
        EdgeKind::ConfigurationESModule => InstanceRowKind::ESModule,
        EdgeKind::ConfigurationService => InstanceRowKind::Service,
        EdgeKind::ConfigurationModule => InstanceRowKind::Module,
        EdgeKind::ConfigurationPath => InstanceRowKind::Path,
        EdgeKind::ConfigurationSequence => InstanceRowKind::Sequence,
        EdgeKind::ConfigurationStream => InstanceRowKind::Stream,
        _ => return None,
    };

    let row = |template_id: Option<Id>, name: &str, flag: bool| InstanceRow {
        id: edge.child_id,
        template_id,
        kind,
        name: name.to_string(),
        flag,
        position: edge.position,
    };

    if kind == InstanceRowKind::PSet {
        let set = tables.parameters.get(&edge.child_id)?;
        return Some(row(None, &set.name, set.tracked));
    }

    match tables.entities.get(&edge.child_id)? {
        EntityRow::EDSource { template_id, .. } | EntityRow::Service { template_id, .. } => {
            Some(row(Some(*template_id), "", false))
        }
        EntityRow::ESSource { template_id, name, .. } | EntityRow::ESModule { template_id, name, .. } => {
            Some(row(Some(*template_id), name, edge.flag))
        }
        EntityRow::Module { template_id, name, .. } => Some(row(Some(*template_id), name, false)),
        EntityRow::Path { name, end_path, .. } => Some(row(None, name, *end_path)),
        EntityRow::Sequence { name, .. } => Some(row(None, name, false)),
        EntityRow::Stream { label, .. } => Some(row(None, label, false)),
    }
}

/// In-process store holding every table in memory.
///
/// Implements the staging contract itself and applies write batches
/// all-or-nothing. Used by tests and for local experimentation.
#[derive(Debug)]
pub struct MemoryStore {
    next_id: AtomicI64,
    registry: TypeRegistry,
    tables: RwLock<Tables>,
    fail_stage: Mutex<Option<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store containing only the root directory.
    pub fn new() -> Self {
        let store = Self {
            next_id: AtomicI64::new(1),
            registry: TypeRegistry::standard(),
            tables: RwLock::new(Tables::default()),
            fail_stage: Mutex::new(None),
        };
        let root = DirectoryRow {
            id: store.next_id(),
            parent_id: None,
            name: "/".to_string(),
            created_at: chrono::Utc::now(),
        };
        store.tables.write().directories.push(root);
        store
    }

    fn next_id(&self) -> Id {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn root_directory_id(&self) -> Id {
        self.tables
            .read()
            .directories
            .iter()
            .find(|d| d.parent_id.is_none())
            .map(|d| d.id)
            .unwrap_or_default()
    }

    /// Peeks at the next identity without consuming it.
    pub fn peek_next_id(&self) -> Id {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn add_release(&self, tag: &str) -> ReleaseRow {
        let release = ReleaseRow {
            id: self.next_id(),
            tag: tag.to_string(),
        };
        self.tables.write().releases.push(release.clone());
        release
    }

    pub fn add_subsystem(&self, name: &str) -> SubsystemRow {
        let subsystem = SubsystemRow {
            id: self.next_id(),
            name: name.to_string(),
        };
        self.tables.write().subsystems.push(subsystem.clone());
        subsystem
    }

    pub fn add_package(&self, subsystem_id: Id, name: &str) -> PackageRow {
        let package = PackageRow {
            id: self.next_id(),
            subsystem_id,
            name: name.to_string(),
        };
        self.tables.write().packages.push(package.clone());
        package
    }

    /// Registers a template with its default parameters in a release.
    pub fn add_template(
        &self,
        release_id: Id,
        package_id: Id,
        kind: TemplateKind,
        name: &str,
        cvs_tag: &str,
        parameters: Vec<Parameter>,
    ) -> Result<Template> {
        let id = self.next_id();
        let (row_kind, type_id) = match kind {
            TemplateKind::EDSource => (TemplateRowKind::EDSource, None),
            TemplateKind::ESSource => (TemplateRowKind::ESSource, None),
            TemplateKind::ESModule => (TemplateRowKind::ESModule, None),
            TemplateKind::Service => (TemplateRowKind::Service, None),
            TemplateKind::Module(module_type) => (
                TemplateRowKind::Module,
                Some(
                    self.registry
                        .module_type_id(module_type)
                        .ok_or_else(|| anyhow!("module type {} not registered", module_type))?,
                ),
            ),
        };

        let mut stage = WriteStage::new("template");
        let mut ids = std::iter::repeat_with(|| self.next_id());
        codec::flatten(id, &parameters, &self.registry, &mut ids, &mut stage)
            .map_err(|e| anyhow!(e))?;

        let mut tables = self.tables.write();
        if !tables.packages.iter().any(|p| p.id == package_id) {
            bail!("package {} does not exist", package_id);
        }
        tables.templates.insert(
            id,
            TemplateRow {
                id,
                kind: row_kind,
                type_id,
                name: name.to_string(),
                cvs_tag: cvs_tag.to_string(),
                package_id,
            },
        );
        tables.release_templates.push((release_id, id));
        for parameter in stage.parameters {
            tables.parameters.insert(parameter.id, parameter);
        }
        tables.values.extend(stage.values);
        tables.edges.extend(stage.edges);

        Ok(Template {
            id,
            kind,
            name: name.to_string(),
            cvs_tag: cvs_tag.to_string(),
            parameters,
        })
    }

    /// Makes an existing template part of another release.
    pub fn attach_template(&self, release_id: Id, template_id: Id) {
        self.tables.write().release_templates.push((release_id, template_id));
    }

    /// Makes `commit` fail when it reaches the named stage.
    pub fn fail_at_stage(&self, stage: Option<&str>) {
        *self.fail_stage.lock() = stage.map(str::to_string);
    }

    /// Finds a parameter placed directly under `owner` by name.
    pub fn parameter_id(&self, owner: Id, name: &str) -> Option<Id> {
        let tables = self.tables.read();
        tables
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Parameter && e.parent_id == owner)
            .filter_map(|e| tables.parameters.get(&e.child_id))
            .find(|p| p.name == name)
            .map(|p| p.id)
    }

    /// Deletes the value rows of a parameter, returning how many went.
    pub fn remove_values(&self, parameter_id: Id) -> usize {
        let mut tables = self.tables.write();
        let before = tables.values.len();
        tables.values.retain(|v| v.row.parameter_id != parameter_id);
        before - tables.values.len()
    }

    /// Deletes the placement of a parameter, leaving a position gap.
    pub fn remove_parameter_placement(&self, parameter_id: Id) -> bool {
        let mut tables = self.tables.write();
        let before = tables.edges.len();
        tables
            .edges
            .retain(|e| !(e.kind == EdgeKind::Parameter && e.child_id == parameter_id));
        before != tables.edges.len()
    }

    pub fn entity_count(&self) -> usize {
        self.tables.read().entities.len()
    }

    pub fn parameter_count(&self) -> usize {
        self.tables.read().parameters.len()
    }

    pub fn edge_count(&self, kind: EdgeKind) -> usize {
        self.tables.read().edges.iter().filter(|e| e.kind == kind).count()
    }

    pub fn configuration_count(&self) -> usize {
        self.tables.read().configurations.len()
    }
}

#[async_trait::async_trait]
impl IdentityStore for MemoryStore {
    async fn allocate_id(&self) -> Result<Id> {
        Ok(self.next_id())
    }
}

#[async_trait::async_trait]
impl DirectoryStore for MemoryStore {
    async fn list_directories(&self) -> Result<Vec<DirectoryRow>> {
        Ok(self.tables.read().directories.clone())
    }

    async fn get_directory(&self, id: Id) -> Result<Option<DirectoryRow>> {
        Ok(self.tables.read().directories.iter().find(|d| d.id == id).cloned())
    }

    async fn insert_directory(&self, parent_id: Id, name: &str) -> Result<DirectoryRow> {
        let mut tables = self.tables.write();
        if !tables.directories.iter().any(|d| d.id == parent_id) {
            bail!("parent directory {} does not exist", parent_id);
        }
        if tables
            .directories
            .iter()
            .any(|d| d.parent_id == Some(parent_id) && d.name == name)
        {
            bail!("directory '{}' already exists under {}", name, parent_id);
        }
        let row = DirectoryRow {
            id: self.next_id(),
            parent_id: Some(parent_id),
            name: name.to_string(),
            created_at: chrono::Utc::now(),
        };
        tables.directories.push(row.clone());
        Ok(row)
    }

    async fn delete_empty_directory(&self, id: Id) -> Result<bool> {
        let mut tables = self.tables.write();
        let has_children = tables.directories.iter().any(|d| d.parent_id == Some(id));
        let has_configurations = tables.configurations.iter().any(|c| c.directory_id == id);
        if has_children || has_configurations {
            return Ok(false);
        }
        let before = tables.directories.len();
        tables.directories.retain(|d| d.id != id);
        Ok(before != tables.directories.len())
    }
}

#[async_trait::async_trait]
impl ConfigurationStore for MemoryStore {
    async fn list_configurations(&self) -> Result<Vec<ConfigurationRow>> {
        let mut rows = self.tables.read().configurations.clone();
        rows.sort_by(|a, b| {
            (a.directory_id, &a.name, a.version).cmp(&(b.directory_id, &b.name, b.version))
        });
        Ok(rows)
    }

    async fn get_configuration(&self, id: Id) -> Result<Option<ConfigurationRow>> {
        Ok(self
            .tables
            .read()
            .configurations
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn list_versions(&self, directory_id: Id, name: &str) -> Result<Vec<ConfigurationRow>> {
        let mut rows: Vec<ConfigurationRow> = self
            .tables
            .read()
            .configurations
            .iter()
            .filter(|c| c.directory_id == directory_id && c.name == name)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.version);
        Ok(rows)
    }

    async fn latest_version(&self, directory_id: Id, name: &str) -> Result<Option<i32>> {
        Ok(self
            .tables
            .read()
            .configurations
            .iter()
            .filter(|c| c.directory_id == directory_id && c.name == name)
            .map(|c| c.version)
            .max())
    }
}

#[async_trait::async_trait]
impl LockStore for MemoryStore {
    async fn list_locks(&self) -> Result<Vec<LockRow>> {
        Ok(self.tables.read().locks.clone())
    }

    async fn get_lock(&self, directory_id: Id, name: &str) -> Result<Option<LockRow>> {
        Ok(self
            .tables
            .read()
            .locks
            .iter()
            .find(|l| l.directory_id == directory_id && l.name == name)
            .cloned())
    }

    async fn insert_lock(&self, lock: &LockRow) -> Result<bool> {
        let mut tables = self.tables.write();
        if tables
            .locks
            .iter()
            .any(|l| l.directory_id == lock.directory_id && l.name == lock.name)
        {
            return Ok(false);
        }
        tables.locks.push(lock.clone());
        Ok(true)
    }

    async fn delete_lock(&self, directory_id: Id, name: &str) -> Result<bool> {
        let mut tables = self.tables.write();
        let before = tables.locks.len();
        tables
            .locks
            .retain(|l| !(l.directory_id == directory_id && l.name == name));
        Ok(before != tables.locks.len())
    }
}

#[async_trait::async_trait]
impl ReleaseStore for MemoryStore {
    async fn list_releases(&self) -> Result<Vec<ReleaseRow>> {
        Ok(self.tables.read().releases.clone())
    }

    async fn release_by_tag(&self, tag: &str) -> Result<Option<ReleaseRow>> {
        Ok(self.tables.read().releases.iter().find(|r| r.tag == tag).cloned())
    }

    async fn release_by_id(&self, id: Id) -> Result<Option<ReleaseRow>> {
        Ok(self.tables.read().releases.iter().find(|r| r.id == id).cloned())
    }

    async fn type_registry(&self) -> Result<TypeRegistry> {
        Ok(self.registry.clone())
    }
}

#[async_trait::async_trait]
impl StagingStore for MemoryStore {
    async fn stage_release(&self, release_id: Id) -> Result<StagedTemplates> {
        let tables = self.tables.read();
        let ids = tables.release_template_ids(release_id);
        Ok(tables.stage_templates(&ids))
    }

    async fn stage_configuration_templates(&self, configuration_id: Id) -> Result<StagedTemplates> {
        let tables = self.tables.read();
        let config = tables
            .configurations
            .iter()
            .find(|c| c.id == configuration_id)
            .ok_or_else(|| anyhow!("configuration {} does not exist", configuration_id))?;
        let in_release: HashSet<Id> = tables.release_template_ids(config.release_id).into_iter().collect();

        let mut ids = Vec::new();
        for edge in tables.edges.iter().filter(|e| e.parent_id == configuration_id) {
            let template_id = match tables.entities.get(&edge.child_id) {
                Some(EntityRow::EDSource { template_id, .. })
                | Some(EntityRow::ESSource { template_id, .. })
                | Some(EntityRow::ESModule { template_id, .. })
                | Some(EntityRow::Service { template_id, .. })
                | Some(EntityRow::Module { template_id, .. }) => *template_id,
                _ => continue,
            };
            if in_release.contains(&template_id) && !ids.contains(&template_id) {
                ids.push(template_id);
            }
        }
        Ok(tables.stage_templates(&ids))
    }

    async fn stage_template(&self, release_id: Id, name: &str) -> Result<StagedTemplates> {
        let tables = self.tables.read();
        let ids: Vec<Id> = tables
            .release_template_ids(release_id)
            .into_iter()
            .filter(|id| tables.templates.get(id).map(|t| t.name == name).unwrap_or(false))
            .collect();
        Ok(tables.stage_templates(&ids))
    }

    async fn stage_configuration(&self, configuration_id: Id) -> Result<StagedConfiguration> {
        let tables = self.tables.read();
        if !tables.configurations.iter().any(|c| c.id == configuration_id) {
            bail!("configuration {} does not exist", configuration_id);
        }

        let mut staged = StagedConfiguration::default();
        for edge in tables.edges.iter().filter(|e| e.parent_id == configuration_id) {
            if let Some(row) = instance_row(edge, &tables) {
                staged.instances.push(row);
            }
        }
        staged.instances.sort_by_key(|r| (r.kind, r.position));

        let by_parent = tables.parameter_edges();
        let values_by_id = tables.values_by_id();
        let mut containers = HashSet::new();
        let mut streams = HashSet::new();
        for row in &staged.instances {
            match row.kind {
                InstanceRowKind::Path | InstanceRowKind::Sequence => {
                    containers.insert(row.id);
                }
                InstanceRowKind::Stream => {
                    streams.insert(row.id);
                }
                _ => tables.collect_parameters(
                    row.id,
                    &by_parent,
                    &values_by_id,
                    &mut staged.parameters,
                    &mut staged.values,
                ),
            }
        }

        for edge in tables.edges.iter().filter(|e| containers.contains(&e.parent_id)) {
            let Some(kind) = edge.kind.entry_kind() else {
                continue;
            };
            let entry = EntryRow {
                owner_id: edge.parent_id,
                child_id: edge.child_id,
                position: edge.position,
                kind,
            };
            match edge.kind {
                EdgeKind::SequenceSequence | EdgeKind::SequenceModule => staged.sequence_entries.push(entry),
                _ => staged.path_entries.push(entry),
            }
        }
        staged.sequence_entries.sort_by_key(|e| (e.owner_id, e.position));
        staged.path_entries.sort_by_key(|e| (e.owner_id, e.position));

        staged.stream_entries = tables
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::StreamPath && streams.contains(&e.parent_id))
            .map(|e| StreamEntryRow {
                stream_id: e.parent_id,
                path_id: e.child_id,
                position: e.position,
            })
            .collect();
        staged.stream_entries.sort_by_key(|e| (e.stream_id, e.position));

        Ok(staged)
    }
}

#[async_trait::async_trait]
impl WriteStore for MemoryStore {
    async fn commit(&self, batch: &WriteBatch) -> Result<()> {
        let fail_stage = self.fail_stage.lock().clone();
        let mut tables = self.tables.write();
        let mut working = tables.clone();
        working.apply(batch, fail_stage.as_deref())?;
        *tables = working;
        log::debug!(
            "Committed configuration {} ({} rows)",
            batch.configuration.id,
            batch.row_count()
        );
        Ok(())
    }
}

impl Store for MemoryStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocated_ids_are_distinct_and_increasing() {
        let store = MemoryStore::new();
        let a = store.allocate_id().await.unwrap();
        let b = store.allocate_id().await.unwrap();
        let more = store.allocate_ids(3).await.unwrap();
        assert!(a < b);
        assert_eq!(more, vec![b + 1, b + 2, b + 3]);
    }

    #[tokio::test]
    async fn lock_insert_is_exclusive() {
        let store = MemoryStore::new();
        let root = store.root_directory_id();
        let alice = LockRow { directory_id: root, name: "cfg".into(), user: "alice".into() };
        let bob = LockRow { user: "bob".into(), ..alice.clone() };

        assert!(store.insert_lock(&alice).await.unwrap());
        assert!(!store.insert_lock(&bob).await.unwrap());
        assert_eq!(store.get_lock(root, "cfg").await.unwrap().unwrap().user, "alice");
        assert!(store.delete_lock(root, "cfg").await.unwrap());
        assert!(store.get_lock(root, "cfg").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_empty_directory_is_not_deleted() {
        let store = MemoryStore::new();
        let root = store.root_directory_id();
        let group = store.insert_directory(root, "Group").await.unwrap();
        store.insert_directory(group.id, "Sub").await.unwrap();

        assert!(!store.delete_empty_directory(group.id).await.unwrap());
        assert!(store.insert_directory(root, "Group").await.is_err());
    }
}
