use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::catalog::{ConfigurationPath, DirectoryManager};
use crate::codec::{flatten, identities_needed};
use crate::error::{ConfDbError, Result};
use crate::graph::digest::{graph_digests, instance_digest, pset_digest, GraphDigests};
use crate::model::{
    first_unset_tracked, join_path, Configuration, ConfigurationVersion, Id, Instance, InstanceKind,
    ParameterType, Reference, ReleaseCatalog, StoredIdentity, TypeRegistry,
};
use crate::store::rows::{
    ConfigurationRow, EdgeKind, EdgeRow, EntityRow, ParameterInsert, WriteBatch, WriteStage,
};
use crate::store::Store;

const SAVE: &str = "save configuration";
const NO_CHILDREN: &[Id] = &[];

/// Caller supplied metadata of a new version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveRequest {
    pub creator: String,
    pub process_name: String,
    pub comment: String,
}

impl SaveRequest {
    pub fn new(creator: impl Into<String>, process_name: impl Into<String>) -> Self {
        Self {
            creator: creator.into(),
            process_name: process_name.into(),
            comment: String::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

/// Identity decision for one entity: the stored id when the entity is
/// unchanged, and the content digest it will carry after the save.
#[derive(Debug, Clone)]
struct Planned {
    reused: Option<Id>,
    digest: String,
}

#[derive(Debug, Default)]
struct Plan {
    psets: Vec<Planned>,
    edsources: Vec<Planned>,
    essources: Vec<Planned>,
    esmodules: Vec<Planned>,
    services: Vec<Planned>,
    modules: Vec<Planned>,
    paths: Vec<Planned>,
    sequences: Vec<Planned>,
    streams: Vec<Planned>,
}

impl Plan {
    fn all(&self) -> impl Iterator<Item = &Planned> {
        self.psets
            .iter()
            .chain(&self.edsources)
            .chain(&self.essources)
            .chain(&self.esmodules)
            .chain(&self.services)
            .chain(&self.modules)
            .chain(&self.paths)
            .chain(&self.sequences)
            .chain(&self.streams)
    }

    fn reused_count(&self) -> usize {
        self.all().filter(|p| p.reused.is_some()).count()
    }
}

/// Decides which stored identities survive. A container is only reused when
/// its digest is unchanged and its entries reuse exactly the ids its stored
/// edges point at. No stored id is handed out twice.
struct ReusePlanner<'a> {
    config: &'a Configuration,
    digests: &'a GraphDigests,
    claimed: HashSet<Id>,
    modules: HashMap<&'a str, Option<Id>>,
    sequences: HashMap<&'a str, Option<Id>>,
    paths: HashMap<&'a str, Option<Id>>,
}

impl<'a> ReusePlanner<'a> {
    fn new(config: &'a Configuration, digests: &'a GraphDigests) -> Self {
        Self {
            config,
            digests,
            claimed: HashSet::new(),
            modules: HashMap::new(),
            sequences: HashMap::new(),
            paths: HashMap::new(),
        }
    }

    fn claim(&mut self, stored: &Option<StoredIdentity>, digest: &str, children: Option<&[Id]>) -> Option<Id> {
        let stored = stored.as_ref()?;
        let same_children = children.is_some_and(|ids| ids == stored.children.as_slice());
        if same_children && stored.matches(digest) && self.claimed.insert(stored.id) {
            Some(stored.id)
        } else {
            None
        }
    }

    fn instance(&mut self, instance: &'a Instance) -> Planned {
        let digest = instance_digest(instance);
        let reused = self.claim(&instance.stored, &digest, Some(NO_CHILDREN));
        Planned { reused, digest }
    }

    /// Reused id of an entry, `None` when the entry is written anew.
    fn entry_id(&mut self, entry: &'a Reference) -> Option<Id> {
        match entry {
            Reference::Module(name) => self.modules.get(name.as_str()).copied().flatten(),
            Reference::Sequence(name) => self.sequence(name),
            Reference::Path(name) => self.path(name),
        }
    }

    fn entry_ids(&mut self, entries: &'a [Reference]) -> Option<Vec<Id>> {
        entries.iter().map(|e| self.entry_id(e)).collect()
    }

    fn sequence(&mut self, name: &'a str) -> Option<Id> {
        if let Some(decision) = self.sequences.get(name) {
            return *decision;
        }
        let config = self.config;
        let sequence = config.sequence(name)?;
        let children = self.entry_ids(&sequence.entries);
        let digests = self.digests;
        let digest = digests.sequences.get(name).map(String::as_str).unwrap_or_default();
        let decision = self.claim(&sequence.stored, digest, children.as_deref());
        self.sequences.insert(name, decision);
        decision
    }

    fn path(&mut self, name: &'a str) -> Option<Id> {
        if let Some(decision) = self.paths.get(name) {
            return *decision;
        }
        let config = self.config;
        let path = config.path(name)?;
        let children = self.entry_ids(&path.entries);
        let digests = self.digests;
        let digest = digests.paths.get(name).map(String::as_str).unwrap_or_default();
        let decision = self.claim(&path.stored, digest, children.as_deref());
        self.paths.insert(name, decision);
        decision
    }

    fn plan(mut self) -> Plan {
        let config = self.config;
        let digests = self.digests;
        let mut plan = Plan::default();

        for pset in &config.psets {
            let digest = pset_digest(&pset.set);
            let reused = self.claim(&pset.stored, &digest, Some(NO_CHILDREN));
            plan.psets.push(Planned { reused, digest });
        }
        plan.edsources = config.edsources.iter().map(|i| self.instance(i)).collect();
        plan.essources = config.essources.iter().map(|i| self.instance(i)).collect();
        plan.esmodules = config.esmodules.iter().map(|i| self.instance(i)).collect();
        plan.services = config.services.iter().map(|i| self.instance(i)).collect();
        for module in &config.modules {
            let planned = self.instance(module);
            self.modules.insert(module.name.as_str(), planned.reused);
            plan.modules.push(planned);
        }

        for sequence in &config.sequences {
            let reused = self.sequence(&sequence.name);
            let digest = digests.sequences.get(&sequence.name).cloned().unwrap_or_default();
            plan.sequences.push(Planned { reused, digest });
        }
        for path in &config.paths {
            let reused = self.path(&path.name);
            let digest = digests.paths.get(&path.name).cloned().unwrap_or_default();
            plan.paths.push(Planned { reused, digest });
        }
        for stream in &config.streams {
            let digest = digests.streams.get(&stream.label).cloned().unwrap_or_default();
            let children: Option<Vec<Id>> = stream
                .paths
                .iter()
                .map(|p| self.paths.get(p.as_str()).copied().flatten())
                .collect();
            let reused = self.claim(&stream.stored, &digest, children.as_deref());
            plan.streams.push(Planned { reused, digest });
        }
        plan
    }
}

/// Number of identities the batch draws: the configuration row plus every
/// entity that is not reused, with its parameter subtree.
fn identities_required(config: &Configuration, plan: &Plan) -> usize {
    let fresh = |planned: &Planned| planned.reused.is_none();
    let instances = |list: &[Instance], planned: &[Planned]| -> usize {
        list.iter()
            .zip(planned)
            .filter(|(_, p)| fresh(p))
            .map(|(i, _)| 1 + identities_needed(&i.parameters))
            .sum()
    };

    1 + config
        .psets
        .iter()
        .zip(&plan.psets)
        .filter(|(_, p)| fresh(p))
        .map(|(s, _)| 1 + identities_needed(&s.set.parameters))
        .sum::<usize>()
        + instances(&config.edsources, &plan.edsources)
        + instances(&config.essources, &plan.essources)
        + instances(&config.esmodules, &plan.esmodules)
        + instances(&config.services, &plan.services)
        + instances(&config.modules, &plan.modules)
        + plan.paths.iter().filter(|p| fresh(p)).count()
        + plan.sequences.iter().filter(|p| fresh(p)).count()
        + plan.streams.iter().filter(|p| fresh(p)).count()
}

/// Identities assigned to every entity by the batch builder.
#[derive(Debug, Default)]
struct Assigned {
    psets: Vec<Id>,
    edsources: Vec<Id>,
    essources: Vec<Id>,
    esmodules: Vec<Id>,
    services: Vec<Id>,
    modules: Vec<Id>,
    paths: Vec<Id>,
    sequences: Vec<Id>,
    streams: Vec<Id>,
}

struct BatchBuilder<'a, I: Iterator<Item = Id>> {
    config: &'a Configuration,
    plan: &'a Plan,
    registry: &'a TypeRegistry,
    ids: I,
    configuration_id: Id,
    assigned: Assigned,
}

impl<'a, I: Iterator<Item = Id>> BatchBuilder<'a, I> {
    fn next_id(&mut self, what: &str) -> Result<Id> {
        self.ids.next().ok_or_else(|| {
            ConfDbError::integrity(SAVE, format!("identity batch exhausted at {}", what))
        })
    }

    fn identity(&mut self, planned: &Planned, what: &str) -> Result<Id> {
        match planned.reused {
            Some(id) => Ok(id),
            None => self.next_id(what),
        }
    }

    fn psets(&mut self) -> Result<WriteStage> {
        let mut stage = WriteStage::new("psets");
        let config = self.config;
        let plan = self.plan;
        for (position, (pset, planned)) in config.psets.iter().zip(&plan.psets).enumerate() {
            let id = self.identity(planned, &pset.set.name)?;
            if planned.reused.is_none() {
                let type_id = self.registry.parameter_type_id(ParameterType::PSet).ok_or_else(|| {
                    ConfDbError::integrity(SAVE, "parameter type PSet is not registered")
                })?;
                stage.parameters.push(ParameterInsert {
                    id,
                    type_id,
                    parameter_type: ParameterType::PSet,
                    name: pset.set.name.clone(),
                    tracked: pset.set.tracked,
                    hex: false,
                });
                flatten(id, &pset.set.parameters, self.registry, &mut self.ids, &mut stage)?;
            }
            stage.edges.push(EdgeRow::new(
                EdgeKind::ConfigurationPSet,
                self.configuration_id,
                id,
                position,
            ));
            self.assigned.psets.push(id);
        }
        Ok(stage)
    }

    fn instances(
        &mut self,
        name: &str,
        list: &'a [Instance],
        planned: &'a [Planned],
        edge: EdgeKind,
    ) -> Result<(WriteStage, Vec<Id>)> {
        let mut stage = WriteStage::new(name);
        let mut ids = Vec::with_capacity(list.len());
        for (position, (instance, planned)) in list.iter().zip(planned).enumerate() {
            let id = self.identity(planned, &instance.name)?;
            if planned.reused.is_none() {
                stage.entities.push(entity_row(instance, id));
                flatten(id, &instance.parameters, self.registry, &mut self.ids, &mut stage)?;
            }
            stage.edges.push(
                EdgeRow::new(edge, self.configuration_id, id, position).with_flag(instance.kind.preferred()),
            );
            ids.push(id);
        }
        Ok((stage, ids))
    }

    fn paths_and_sequences(&mut self) -> Result<WriteStage> {
        let mut stage = WriteStage::new("paths_and_sequences");
        let config = self.config;
        let plan = self.plan;
        for (position, (path, planned)) in config.paths.iter().zip(&plan.paths).enumerate() {
            let id = self.identity(planned, &path.name)?;
            if planned.reused.is_none() {
                stage.entities.push(EntityRow::Path {
                    id,
                    name: path.name.clone(),
                    end_path: path.end_path,
                });
            }
            stage
                .edges
                .push(EdgeRow::new(EdgeKind::ConfigurationPath, self.configuration_id, id, position));
            self.assigned.paths.push(id);
        }
        for (position, (sequence, planned)) in config.sequences.iter().zip(&plan.sequences).enumerate() {
            let id = self.identity(planned, &sequence.name)?;
            if planned.reused.is_none() {
                stage.entities.push(EntityRow::Sequence {
                    id,
                    name: sequence.name.clone(),
                });
            }
            stage.edges.push(EdgeRow::new(
                EdgeKind::ConfigurationSequence,
                self.configuration_id,
                id,
                position,
            ));
            self.assigned.sequences.push(id);
        }
        Ok(stage)
    }

    /// Entry rows of new paths and sequences. Reused containers keep the
    /// rows written by the version that created them.
    fn references(&self) -> Result<WriteStage> {
        let mut stage = WriteStage::new("references");
        let modules: HashMap<&str, Id> = self
            .config
            .modules
            .iter()
            .map(|m| m.name.as_str())
            .zip(self.assigned.modules.iter().copied())
            .collect();
        let sequences: HashMap<&str, Id> = self
            .config
            .sequences
            .iter()
            .map(|s| s.name.as_str())
            .zip(self.assigned.sequences.iter().copied())
            .collect();
        let paths: HashMap<&str, Id> = self
            .config
            .paths
            .iter()
            .map(|p| p.name.as_str())
            .zip(self.assigned.paths.iter().copied())
            .collect();

        let target = |owner: &str, entry: &Reference| -> Result<Id> {
            let found = match entry {
                Reference::Module(name) => modules.get(name.as_str()),
                Reference::Sequence(name) => sequences.get(name.as_str()),
                Reference::Path(name) => paths.get(name.as_str()),
            };
            found
                .copied()
                .ok_or_else(|| ConfDbError::integrity(SAVE, format!("{} references unknown {}", owner, entry)))
        };

        for ((path, planned), &id) in self
            .config
            .paths
            .iter()
            .zip(&self.plan.paths)
            .zip(&self.assigned.paths)
        {
            if planned.reused.is_some() {
                continue;
            }
            let owner = format!("path '{}'", path.name);
            for (position, entry) in path.entries.iter().enumerate() {
                let kind = match entry {
                    Reference::Module(_) => EdgeKind::PathModule,
                    Reference::Sequence(_) => EdgeKind::PathSequence,
                    Reference::Path(_) => EdgeKind::PathPath,
                };
                stage
                    .edges
                    .push(EdgeRow::new(kind, id, target(&owner, entry)?, position));
            }
        }
        for ((sequence, planned), &id) in self
            .config
            .sequences
            .iter()
            .zip(&self.plan.sequences)
            .zip(&self.assigned.sequences)
        {
            if planned.reused.is_some() {
                continue;
            }
            let owner = format!("sequence '{}'", sequence.name);
            for (position, entry) in sequence.entries.iter().enumerate() {
                let kind = match entry {
                    Reference::Module(_) => EdgeKind::SequenceModule,
                    Reference::Sequence(_) => EdgeKind::SequenceSequence,
                    Reference::Path(_) => {
                        return Err(ConfDbError::integrity(
                            SAVE,
                            format!("{} cannot reference {}", owner, entry),
                        ))
                    }
                };
                stage
                    .edges
                    .push(EdgeRow::new(kind, id, target(&owner, entry)?, position));
            }
        }
        Ok(stage)
    }

    fn streams(&mut self) -> Result<WriteStage> {
        let mut stage = WriteStage::new("streams");
        let config = self.config;
        let plan = self.plan;
        let paths: HashMap<&str, Id> = config
            .paths
            .iter()
            .map(|p| p.name.as_str())
            .zip(self.assigned.paths.iter().copied())
            .collect();
        for (position, (stream, planned)) in config.streams.iter().zip(&plan.streams).enumerate() {
            let id = self.identity(planned, &stream.label)?;
            if planned.reused.is_none() {
                stage.entities.push(EntityRow::Stream {
                    id,
                    label: stream.label.clone(),
                });
                for (i, path) in stream.paths.iter().enumerate() {
                    let path_id = paths.get(path.as_str()).copied().ok_or_else(|| {
                        ConfDbError::integrity(
                            SAVE,
                            format!("stream '{}' references unknown path '{}'", stream.label, path),
                        )
                    })?;
                    stage.edges.push(EdgeRow::new(EdgeKind::StreamPath, id, path_id, i));
                }
            }
            stage.edges.push(EdgeRow::new(
                EdgeKind::ConfigurationStream,
                self.configuration_id,
                id,
                position,
            ));
            self.assigned.streams.push(id);
        }
        Ok(stage)
    }

    /// Emits the stages in write order.
    fn build(mut self, row: ConfigurationRow) -> Result<(WriteBatch, Assigned)> {
        let config = self.config;
        let plan = self.plan;
        let mut batch = WriteBatch::new(row);

        batch.stages.push(self.psets()?);
        let (stage, ids) = self.instances(
            "edsources",
            &config.edsources,
            &plan.edsources,
            EdgeKind::ConfigurationEDSource,
        )?;
        batch.stages.push(stage);
        self.assigned.edsources = ids;
        let (stage, ids) = self.instances(
            "essources",
            &config.essources,
            &plan.essources,
            EdgeKind::ConfigurationESSource,
        )?;
        batch.stages.push(stage);
        self.assigned.essources = ids;
        let (stage, ids) = self.instances(
            "esmodules",
            &config.esmodules,
            &plan.esmodules,
            EdgeKind::ConfigurationESModule,
        )?;
        batch.stages.push(stage);
        self.assigned.esmodules = ids;
        let (stage, ids) = self.instances(
            "services",
            &config.services,
            &plan.services,
            EdgeKind::ConfigurationService,
        )?;
        batch.stages.push(stage);
        self.assigned.services = ids;

        batch.stages.push(self.paths_and_sequences()?);
        let (stage, ids) = self.instances(
            "modules",
            &config.modules,
            &plan.modules,
            EdgeKind::ConfigurationModule,
        )?;
        batch.stages.push(stage);
        self.assigned.modules = ids;

        batch.stages.push(self.references()?);
        batch.stages.push(self.streams()?);
        Ok((batch, self.assigned))
    }
}

fn entity_row(instance: &Instance, id: Id) -> EntityRow {
    let template_id = instance.template_id;
    let name = instance.name.clone();
    match instance.kind {
        InstanceKind::EDSource => EntityRow::EDSource { id, template_id },
        InstanceKind::ESSource { .. } => EntityRow::ESSource { id, template_id, name },
        InstanceKind::ESModule { .. } => EntityRow::ESModule { id, template_id, name },
        InstanceKind::Service => EntityRow::Service { id, template_id },
        InstanceKind::Module => EntityRow::Module { id, template_id, name },
    }
}

fn check_unique<'n>(kind: &str, names: impl Iterator<Item = &'n str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfDbError::integrity(
                SAVE,
                format!("duplicate {} name '{}'", kind, name),
            ));
        }
    }
    Ok(())
}

/// Everything that can be checked without touching the store. Returns the
/// container digests of the graph.
pub fn validate(config: &Configuration, release: &ReleaseCatalog) -> Result<GraphDigests> {
    if !ConfigurationPath::is_valid_name(&config.name) {
        return Err(ConfDbError::integrity(
            SAVE,
            format!("invalid configuration name '{}'", config.name),
        ));
    }
    if config.release_tag != release.tag {
        return Err(ConfDbError::integrity(
            SAVE,
            format!(
                "configuration {} targets release '{}' but catalog is '{}'",
                config.name, config.release_tag, release.tag
            ),
        ));
    }

    let groups: [(&str, &[Instance]); 5] = [
        ("EDSource", config.edsources.as_slice()),
        ("ESSource", config.essources.as_slice()),
        ("ESModule", config.esmodules.as_slice()),
        ("Service", config.services.as_slice()),
        ("Module", config.modules.as_slice()),
    ];
    for (label, instances) in groups {
        for instance in instances {
            if instance.kind.label() != label {
                return Err(ConfDbError::integrity(
                    SAVE,
                    format!("{} '{}' listed among {} instances", instance.kind, instance.name, label),
                ));
            }
            let template = release.template(instance.template_id).ok_or_else(|| {
                ConfDbError::integrity(
                    SAVE,
                    format!(
                        "{} '{}' uses template {} which is not in release '{}'",
                        instance.kind, instance.name, instance.template_id, release.tag
                    ),
                )
            })?;
            if !instance.kind.accepts(template.kind) {
                return Err(ConfDbError::integrity(
                    SAVE,
                    format!(
                        "{} '{}' uses {} template '{}'",
                        instance.kind, instance.name, template.kind, template.name
                    ),
                ));
            }
            if let Some(parameter) = first_unset_tracked(&instance.parameters) {
                return Err(ConfDbError::integrity(
                    SAVE,
                    format!(
                        "tracked parameter '{}' of {} '{}' has no value",
                        parameter, instance.kind, instance.name
                    ),
                ));
            }
        }
    }
    for pset in &config.psets {
        if let Some(parameter) = first_unset_tracked(&pset.set.parameters) {
            return Err(ConfDbError::integrity(
                SAVE,
                format!("tracked parameter '{}' of pset '{}' has no value", parameter, pset.set.name),
            ));
        }
    }

    check_unique("pset", config.psets.iter().map(|p| p.set.name.as_str()))?;
    check_unique("ESSource", config.essources.iter().map(|i| i.name.as_str()))?;
    check_unique("ESModule", config.esmodules.iter().map(|i| i.name.as_str()))?;
    check_unique("module", config.modules.iter().map(|i| i.name.as_str()))?;
    check_unique("path", config.paths.iter().map(|p| p.name.as_str()))?;
    check_unique("sequence", config.sequences.iter().map(|s| s.name.as_str()))?;
    check_unique("stream", config.streams.iter().map(|s| s.label.as_str()))?;

    graph_digests(config)
}

/// Writes configuration graphs as new versions.
pub struct GraphPersister<'a, S: ?Sized> {
    store: &'a S,
    registry: &'a TypeRegistry,
}

impl<'a, S: Store + ?Sized> GraphPersister<'a, S> {
    pub fn new(store: &'a S, registry: &'a TypeRegistry) -> Self {
        Self { store, registry }
    }

    /// Saves `config` as the next version of its name in its directory.
    ///
    /// Nothing is written unless validation passes, and the graph's stored
    /// identities are only updated once the store committed the batch.
    pub async fn save(
        &self,
        config: &mut Configuration,
        release: &ReleaseCatalog,
        request: &SaveRequest,
    ) -> Result<ConfigurationVersion> {
        let digests = validate(config, release)?;

        let directory = match DirectoryManager::new(self.store).directory_path(config.directory_id).await {
            Ok(path) => path,
            Err(ConfDbError::NotFound { .. }) => {
                return Err(ConfDbError::integrity(
                    SAVE,
                    format!("directory {} of configuration {} does not exist", config.directory_id, config.name),
                ))
            }
            Err(e) => return Err(e),
        };

        let plan = ReusePlanner::new(config, &digests).plan();
        let version = self
            .store
            .latest_version(config.directory_id, &config.name)
            .await
            .map_err(ConfDbError::store(SAVE))?
            .unwrap_or(0)
            + 1;
        let descriptor = format!("{}/V{}", join_path(&directory, &config.name), version);

        let needed = identities_required(config, &plan);
        let ids = self
            .store
            .allocate_ids(needed)
            .await
            .map_err(ConfDbError::Allocation)?;
        let mut ids = ids.into_iter();
        let configuration_id = ids
            .next()
            .ok_or_else(|| ConfDbError::Allocation(anyhow::anyhow!("allocator returned no identities")))?;

        let row = ConfigurationRow {
            id: configuration_id,
            release_id: release.release_id,
            release_tag: release.tag.clone(),
            directory_id: config.directory_id,
            name: config.name.clone(),
            version,
            created_at: Utc::now(),
            creator: request.creator.clone(),
            process_name: request.process_name.clone(),
            description: request.comment.clone(),
        };

        let builder = BatchBuilder {
            config,
            plan: &plan,
            registry: self.registry,
            ids,
            configuration_id,
            assigned: Assigned::default(),
        };
        let (batch, assigned) = builder.build(row)?;
        log::debug!(
            "Writing {}: {} rows, {} entities reused",
            descriptor,
            batch.row_count(),
            plan.reused_count()
        );

        self.store
            .commit(&batch)
            .await
            .map_err(|source| ConfDbError::Transaction {
                operation: SAVE,
                context: descriptor.clone(),
                source,
            })?;

        apply_identities(config, &plan, &assigned);
        let saved = ConfigurationVersion::from(&batch.configuration);
        config.version = Some(saved.clone());
        log::info!(
            "Saved {} ({} identities drawn, {} reused)",
            descriptor,
            needed,
            plan.reused_count()
        );
        Ok(saved)
    }
}

fn apply_identities(config: &mut Configuration, plan: &Plan, assigned: &Assigned) {
    fn stamp<'x, T: 'x>(
        items: impl Iterator<Item = &'x mut T>,
        planned: &[Planned],
        ids: &[Id],
        slot: impl Fn(&mut T) -> &mut Option<StoredIdentity>,
    ) {
        for ((item, planned), id) in items.zip(planned).zip(ids) {
            *slot(item) = Some(StoredIdentity::new(*id, planned.digest.clone()));
        }
    }

    stamp(config.psets.iter_mut(), &plan.psets, &assigned.psets, |p| &mut p.stored);
    stamp(config.edsources.iter_mut(), &plan.edsources, &assigned.edsources, |i| &mut i.stored);
    stamp(config.essources.iter_mut(), &plan.essources, &assigned.essources, |i| &mut i.stored);
    stamp(config.esmodules.iter_mut(), &plan.esmodules, &assigned.esmodules, |i| &mut i.stored);
    stamp(config.services.iter_mut(), &plan.services, &assigned.services, |i| &mut i.stored);
    stamp(config.modules.iter_mut(), &plan.modules, &assigned.modules, |i| &mut i.stored);
    stamp(config.paths.iter_mut(), &plan.paths, &assigned.paths, |p| &mut p.stored);
    stamp(config.sequences.iter_mut(), &plan.sequences, &assigned.sequences, |s| &mut s.stored);
    stamp(config.streams.iter_mut(), &plan.streams, &assigned.streams, |s| &mut s.stored);

    fn ids_by_name<'n>(names: impl Iterator<Item = &'n String>, ids: &[Id]) -> HashMap<String, Id> {
        names.cloned().zip(ids.iter().copied()).collect()
    }

    let modules = ids_by_name(config.modules.iter().map(|m| &m.name), &assigned.modules);
    let sequences = ids_by_name(config.sequences.iter().map(|s| &s.name), &assigned.sequences);
    let paths = ids_by_name(config.paths.iter().map(|p| &p.name), &assigned.paths);
    let entry_ids = |entries: &[Reference]| -> Vec<Id> {
        entries
            .iter()
            .filter_map(|entry| match entry {
                Reference::Module(name) => modules.get(name).copied(),
                Reference::Sequence(name) => sequences.get(name).copied(),
                Reference::Path(name) => paths.get(name).copied(),
            })
            .collect()
    };

    for sequence in &mut config.sequences {
        let children = entry_ids(&sequence.entries);
        if let Some(stored) = sequence.stored.as_mut() {
            stored.children = children;
        }
    }
    for path in &mut config.paths {
        let children = entry_ids(&path.entries);
        if let Some(stored) = path.stored.as_mut() {
            stored.children = children;
        }
    }
    for stream in &mut config.streams {
        let children: Vec<Id> = stream.paths.iter().filter_map(|p| paths.get(p).copied()).collect();
        if let Some(stored) = stream.stored.as_mut() {
            stored.children = children;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModuleType, Parameter, ParameterValue, Path, Sequence, Template, TemplateKind};
    use crate::store::MemoryStore;

    fn seeded() -> (MemoryStore, ReleaseCatalog, Template) {
        let store = MemoryStore::new();
        let release = store.add_release("REL");
        let subsystem = store.add_subsystem("Sub");
        let package = store.add_package(subsystem.id, "Pkg");
        let template = store
            .add_template(
                release.id,
                package.id,
                TemplateKind::Module(ModuleType::EDProducer),
                "Producer",
                "V1",
                vec![Parameter::tracked("gain", ParameterValue::Double(Some(1.0)))],
            )
            .unwrap();
        let catalog = ReleaseCatalog::new(
            release.id,
            "REL",
            false,
            vec![crate::model::SoftwareSubsystem {
                id: subsystem.id,
                name: subsystem.name,
                packages: vec![crate::model::SoftwarePackage {
                    id: package.id,
                    name: package.name,
                    templates: vec![template.clone()],
                }],
            }],
        );
        (store, catalog, template)
    }

    #[tokio::test]
    async fn invalid_graph_draws_no_identities() {
        let (store, release, template) = seeded();
        let registry = TypeRegistry::standard();
        let mut config = Configuration::new(store.root_directory_id(), "cfg", "REL");
        config.modules.push(Instance::from_template(&template, "a"));
        config.paths.push(Path::new("p", vec![Reference::Module("a".into())]));
        config.sequences.push(Sequence::new("s", vec![Reference::Path("p".into())]));

        let before = store.peek_next_id();
        let err = GraphPersister::new(&store, &registry)
            .save(&mut config, &release, &SaveRequest::new("me", "HLT"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfDbError::Integrity { .. }));
        assert_eq!(store.peek_next_id(), before);
        assert_eq!(store.configuration_count(), 0);
    }

    #[test]
    fn duplicate_module_names_are_rejected() {
        let (store, release, template) = seeded();
        let mut config = Configuration::new(store.root_directory_id(), "cfg", "REL");
        config.modules.push(Instance::from_template(&template, "a"));
        config.modules.push(Instance::from_template(&template, "a"));

        let err = validate(&config, &release).unwrap_err();
        assert!(err.to_string().contains("duplicate module name 'a'"));
    }

    #[test]
    fn version_like_configuration_name_is_rejected() {
        let (store, release, _template) = seeded();
        let config = Configuration::new(store.root_directory_id(), "V3", "REL");
        let err = validate(&config, &release).unwrap_err();
        assert!(err.to_string().contains("invalid configuration name 'V3'"));
    }

    #[test]
    fn tracked_parameter_without_value_is_rejected() {
        let (store, release, template) = seeded();
        let mut config = Configuration::new(store.root_directory_id(), "cfg", "REL");
        let mut module = Instance::from_template(&template, "a");
        module.set_parameter("gain", ParameterValue::Double(None));
        config.modules.push(module);

        let err = validate(&config, &release).unwrap_err();
        assert!(err.to_string().contains("gain"));
    }

    #[tokio::test]
    async fn versions_increase_and_identities_are_stamped() {
        let (store, release, template) = seeded();
        let registry = TypeRegistry::standard();
        let persister = GraphPersister::new(&store, &registry);
        let mut config = Configuration::new(store.root_directory_id(), "cfg", "REL");
        config.modules.push(Instance::from_template(&template, "a"));
        config.paths.push(Path::new("p", vec![Reference::Module("a".into())]));

        let v1 = persister
            .save(&mut config, &release, &SaveRequest::new("me", "HLT"))
            .await
            .unwrap();
        let module_id = config.modules[0].id().unwrap();
        let path_id = config.paths[0].stored.as_ref().unwrap().id;

        let v2 = persister
            .save(&mut config, &release, &SaveRequest::new("me", "HLT").with_comment("again"))
            .await
            .unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(v2.comment, "again");
        assert_eq!(config.modules[0].id(), Some(module_id));
        assert_eq!(config.paths[0].stored.as_ref().unwrap().id, path_id);
        assert_eq!(config.version.as_ref().unwrap().id, v2.id);
        assert_eq!(config.paths[0].stored.as_ref().unwrap().children, vec![module_id]);
    }

    #[tokio::test]
    async fn path_is_rewritten_when_an_entry_points_at_another_id() {
        let (store, release, template) = seeded();
        let registry = TypeRegistry::standard();
        let persister = GraphPersister::new(&store, &registry);
        let request = SaveRequest::new("me", "HLT");

        let mut other = Configuration::new(store.root_directory_id(), "other", "REL");
        other.modules.push(Instance::from_template(&template, "a"));
        persister.save(&mut other, &release, &request).await.unwrap();

        let mut config = Configuration::new(store.root_directory_id(), "cfg", "REL");
        config.modules.push(Instance::from_template(&template, "a"));
        config.paths.push(Path::new("p", vec![Reference::Module("a".into())]));
        persister.save(&mut config, &release, &request).await.unwrap();
        let path_id = config.paths[0].stored.as_ref().unwrap().id;

        config.modules[0] = other.modules[0].clone();
        persister.save(&mut config, &release, &request).await.unwrap();

        let path = config.paths[0].stored.as_ref().unwrap();
        assert_ne!(path.id, path_id);
        assert_eq!(path.children, vec![other.modules[0].id().unwrap()]);
    }
}
