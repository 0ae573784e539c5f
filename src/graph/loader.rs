use std::collections::{HashMap, HashSet};

use crate::codec::{DecodeMode, ParameterIndex};
use crate::error::{ConfDbError, ConsistencyWarning, Loaded, Result, WarningSink};
use crate::graph::digest::{graph_digests, instance_digest, pset_digest};
use crate::model::{
    Configuration, ConfigurationVersion, GlobalPSet, Id, Instance, InstanceKind, ParameterSet, Path,
    Reference, ReleaseCatalog, Sequence, Stream, StoredIdentity, TypeRegistry,
};
use crate::store::rows::{ConfigurationRow, EntryKind, EntryRow, InstanceRow, InstanceRowKind, StagedConfiguration};
use crate::store::Store;

const LOAD: &str = "load configuration";

/// Reconstructs configuration graphs from staged row-sets.
pub struct GraphLoader<'a, S: ?Sized> {
    store: &'a S,
    registry: &'a TypeRegistry,
}

impl<'a, S: Store + ?Sized> GraphLoader<'a, S> {
    pub fn new(store: &'a S, registry: &'a TypeRegistry) -> Self {
        Self { store, registry }
    }

    /// Loads one configuration version against a full or partial catalog of
    /// its release.
    pub async fn load(&self, configuration_id: Id, release: &ReleaseCatalog) -> Result<Loaded<Configuration>> {
        let row = self
            .store
            .get_configuration(configuration_id)
            .await
            .map_err(ConfDbError::store(LOAD))?
            .ok_or_else(|| ConfDbError::not_found(LOAD, format!("configuration {}", configuration_id)))?;

        let directory = self
            .store
            .get_directory(row.directory_id)
            .await
            .map_err(ConfDbError::store(LOAD))?;
        if directory.is_none() {
            return Err(ConfDbError::integrity(
                LOAD,
                format!(
                    "parent directory {} of configuration {} does not exist",
                    row.directory_id, row.name
                ),
            ));
        }

        let staged = self
            .store
            .stage_configuration(configuration_id)
            .await
            .map_err(ConfDbError::store(LOAD))?;

        let loaded = assemble(&row, release, &staged, self.registry)?;
        log::info!(
            "Loaded {} V{}: {} modules, {} paths, {} sequences, {} warnings",
            row.name,
            row.version,
            loaded.value.modules.len(),
            loaded.value.paths.len(),
            loaded.value.sequences.len(),
            loaded.warnings.len()
        );
        Ok(loaded)
    }
}

fn placeholder(id: Id) -> Option<StoredIdentity> {
    Some(StoredIdentity::new(id, String::new()))
}

/// Names of the phase-one entities by persisted identity.
#[derive(Default)]
struct Targets {
    modules: HashMap<Id, String>,
    sequences: HashMap<Id, String>,
    paths: HashMap<Id, String>,
}

impl Targets {
    fn resolve(&self, entry: &EntryRow) -> Option<Reference> {
        match entry.kind {
            EntryKind::Module => self.modules.get(&entry.child_id).cloned().map(Reference::Module),
            EntryKind::Sequence => self.sequences.get(&entry.child_id).cloned().map(Reference::Sequence),
            EntryKind::Path => self.paths.get(&entry.child_id).cloned().map(Reference::Path),
        }
    }
}

/// Builds the graph in three phases: materialize instances, wire sequence
/// and path entries, attach streams.
pub fn assemble(
    row: &ConfigurationRow,
    release: &ReleaseCatalog,
    staged: &StagedConfiguration,
    registry: &TypeRegistry,
) -> Result<Loaded<Configuration>> {
    if release.tag != row.release_tag || release.release_id != row.release_id {
        return Err(ConfDbError::integrity(
            LOAD,
            format!(
                "configuration {} belongs to release '{}' but catalog is '{}'",
                row.name, row.release_tag, release.tag
            ),
        ));
    }

    let mut sink = WarningSink::default();
    let index = ParameterIndex::new(registry, &staged.parameters, &staged.values);
    let mut config = Configuration::new(row.directory_id, row.name.clone(), row.release_tag.clone());
    config.version = Some(ConfigurationVersion::from(row));

    let mut targets = Targets::default();
    let mut sequence_slots: HashMap<Id, usize> = HashMap::new();
    let mut path_slots: HashMap<Id, usize> = HashMap::new();
    let mut stream_slots: HashMap<Id, usize> = HashMap::new();
    // Entities whose loaded content differs from their persisted rows.
    let mut repaired: HashSet<Id> = HashSet::new();

    for instance in &staged.instances {
        match instance.kind {
            InstanceRowKind::PSet => {
                let owner = format!("pset '{}'", instance.name);
                match index.unflatten(instance.id, DecodeMode::Strict) {
                    Ok(decoded) => {
                        if decoded.missing > 0 {
                            sink.push(ConsistencyWarning::MissingParameters { owner, count: decoded.missing });
                            repaired.insert(instance.id);
                        }
                        config.psets.push(GlobalPSet {
                            stored: placeholder(instance.id),
                            set: ParameterSet::new(instance.name.clone(), instance.flag, decoded.parameters),
                        });
                    }
                    Err(ConfDbError::Integrity { detail, .. }) => sink.push(ConsistencyWarning::InstanceDropped {
                        instance: owner,
                        reason: detail,
                    }),
                    Err(e) => return Err(e),
                }
            }
            InstanceRowKind::EDSource => {
                let kind = InstanceKind::EDSource;
                if let Some(materialized) = materialize(instance, kind, release, &index, &mut sink, &mut repaired)? {
                    config.edsources.push(materialized);
                }
            }
            InstanceRowKind::ESSource => {
                let kind = InstanceKind::ESSource { preferred: instance.flag };
                if let Some(materialized) = materialize(instance, kind, release, &index, &mut sink, &mut repaired)? {
                    config.essources.push(materialized);
                }
            }
            InstanceRowKind::ESModule => {
                let kind = InstanceKind::ESModule { preferred: instance.flag };
                if let Some(materialized) = materialize(instance, kind, release, &index, &mut sink, &mut repaired)? {
                    config.esmodules.push(materialized);
                }
            }
            InstanceRowKind::Service => {
                let kind = InstanceKind::Service;
                if let Some(materialized) = materialize(instance, kind, release, &index, &mut sink, &mut repaired)? {
                    config.services.push(materialized);
                }
            }
            InstanceRowKind::Module => {
                let kind = InstanceKind::Module;
                if let Some(materialized) = materialize(instance, kind, release, &index, &mut sink, &mut repaired)? {
                    targets.modules.insert(instance.id, materialized.name.clone());
                    config.modules.push(materialized);
                }
            }
            InstanceRowKind::Path => {
                targets.paths.insert(instance.id, instance.name.clone());
                path_slots.insert(instance.id, config.paths.len());
                config.paths.push(Path {
                    stored: placeholder(instance.id),
                    name: instance.name.clone(),
                    end_path: instance.flag,
                    entries: Vec::new(),
                });
            }
            InstanceRowKind::Sequence => {
                targets.sequences.insert(instance.id, instance.name.clone());
                sequence_slots.insert(instance.id, config.sequences.len());
                config.sequences.push(Sequence {
                    stored: placeholder(instance.id),
                    name: instance.name.clone(),
                    entries: Vec::new(),
                });
            }
            InstanceRowKind::Stream => {
                stream_slots.insert(instance.id, config.streams.len());
                config.streams.push(Stream {
                    stored: placeholder(instance.id),
                    label: instance.name.clone(),
                    paths: Vec::new(),
                });
            }
        }
    }

    for (owner_id, entries) in wire("sequence", &staged.sequence_entries, &targets.sequences, &targets, &mut sink, &mut repaired) {
        if let Some(&slot) = sequence_slots.get(&owner_id) {
            config.sequences[slot].entries = entries;
        }
    }
    for (owner_id, entries) in wire("path", &staged.path_entries, &targets.paths, &targets, &mut sink, &mut repaired) {
        if let Some(&slot) = path_slots.get(&owner_id) {
            config.paths[slot].entries = entries;
        }
    }

    for entry in &staged.stream_entries {
        let Some(&slot) = stream_slots.get(&entry.stream_id) else {
            sink.push(ConsistencyWarning::UnresolvedReference {
                owner: format!("configuration {}", row.name),
                kind: "stream",
                target: entry.stream_id,
            });
            continue;
        };
        match targets.paths.get(&entry.path_id) {
            Some(path) => config.streams[slot].paths.push(path.clone()),
            None => {
                let owner = format!("stream '{}'", config.streams[slot].label);
                sink.push(ConsistencyWarning::UnresolvedReference {
                    owner,
                    kind: "path",
                    target: entry.path_id,
                });
                repaired.insert(entry.stream_id);
            }
        }
    }

    record_digests(&mut config, &stored_children(staged), &repaired)?;
    Ok(sink.finish(config))
}

/// Phase one for a single instance row. `None` when the instance had to be
/// dropped; an unresolved template is fatal.
fn materialize(
    row: &InstanceRow,
    kind: InstanceKind,
    release: &ReleaseCatalog,
    index: &ParameterIndex<'_>,
    sink: &mut WarningSink,
    repaired: &mut HashSet<Id>,
) -> Result<Option<Instance>> {
    let template = row
        .template_id
        .and_then(|id| release.template(id))
        .ok_or_else(|| {
            ConfDbError::integrity(
                LOAD,
                format!(
                    "{} '{}' refers to template {:?} not in release '{}'",
                    kind, row.name, row.template_id, release.tag
                ),
            )
        })?;
    if !kind.accepts(template.kind) {
        return Err(ConfDbError::integrity(
            LOAD,
            format!("{} '{}' refers to {} template '{}'", kind, row.name, template.kind, template.name),
        ));
    }

    let name = if kind.is_named() {
        row.name.clone()
    } else {
        template.name.clone()
    };
    let owner = format!("{} '{}'", kind, name);

    match index.unflatten(row.id, DecodeMode::Strict) {
        Ok(decoded) => {
            if decoded.missing > 0 {
                sink.push(ConsistencyWarning::MissingParameters {
                    owner,
                    count: decoded.missing,
                });
                repaired.insert(row.id);
            }
            Ok(Some(Instance {
                stored: placeholder(row.id),
                kind,
                name,
                template_id: template.id,
                parameters: decoded.parameters,
            }))
        }
        Err(ConfDbError::Integrity { detail, .. }) => {
            sink.push(ConsistencyWarning::InstanceDropped {
                instance: owner,
                reason: detail,
            });
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Phase two: walks entries in (owner, position) order, checking each
/// position against the running count of its owner.
fn wire(
    label: &str,
    entries: &[EntryRow],
    owners: &HashMap<Id, String>,
    targets: &Targets,
    sink: &mut WarningSink,
    repaired: &mut HashSet<Id>,
) -> Vec<(Id, Vec<Reference>)> {
    let mut ordered: Vec<&EntryRow> = entries.iter().collect();
    ordered.sort_by_key(|e| (e.owner_id, e.position));

    let mut wired: Vec<(Id, Vec<Reference>)> = Vec::new();
    let mut count = 0usize;
    for entry in ordered {
        let Some(owner_name) = owners.get(&entry.owner_id) else {
            sink.push(ConsistencyWarning::UnresolvedReference {
                owner: format!("{} entries", label),
                kind: "owner",
                target: entry.owner_id,
            });
            continue;
        };
        if wired.last().map(|(id, _)| *id) != Some(entry.owner_id) {
            wired.push((entry.owner_id, Vec::new()));
            count = 0;
        }
        let owner = format!("{} '{}'", label, owner_name);
        if entry.position != count as i32 {
            sink.push(ConsistencyWarning::PositionSkew {
                owner: owner.clone(),
                expected: count,
                found: entry.position,
            });
            repaired.insert(entry.owner_id);
        }
        count += 1;

        let reference = match (label, entry.kind) {
            ("sequence", EntryKind::Path) => None,
            _ => targets.resolve(entry),
        };
        match reference {
            Some(reference) => {
                if let Some((_, list)) = wired.last_mut() {
                    list.push(reference);
                }
            }
            None => {
                sink.push(ConsistencyWarning::UnresolvedReference {
                    owner,
                    kind: entry.kind.name(),
                    target: entry.child_id,
                });
                repaired.insert(entry.owner_id);
            }
        }
    }
    wired
}

/// Persisted entry ids of every path, sequence and stream, in position
/// order, including entries that did not resolve.
fn stored_children(staged: &StagedConfiguration) -> HashMap<Id, Vec<Id>> {
    let mut placed: HashMap<Id, Vec<(i32, Id)>> = HashMap::new();
    for entry in staged.sequence_entries.iter().chain(&staged.path_entries) {
        placed
            .entry(entry.owner_id)
            .or_default()
            .push((entry.position, entry.child_id));
    }
    for entry in &staged.stream_entries {
        placed
            .entry(entry.stream_id)
            .or_default()
            .push((entry.position, entry.path_id));
    }
    placed
        .into_iter()
        .map(|(owner, mut entries)| {
            entries.sort_by_key(|(position, _)| *position);
            (owner, entries.into_iter().map(|(_, id)| id).collect())
        })
        .collect()
}

/// Fills in the content digests and stored entry ids of every loaded
/// entity. Repaired entities get an empty digest so the next save writes
/// them anew.
fn record_digests(
    config: &mut Configuration,
    children: &HashMap<Id, Vec<Id>>,
    repaired: &HashSet<Id>,
) -> Result<()> {
    let digests = graph_digests(config)?;

    let set_digest = |stored: &mut Option<StoredIdentity>, digest: &str| {
        if let Some(stored) = stored {
            stored.digest = if repaired.contains(&stored.id) {
                String::new()
            } else {
                digest.to_string()
            };
            stored.children = children.get(&stored.id).cloned().unwrap_or_default();
        }
    };

    for pset in &mut config.psets {
        let digest = pset_digest(&pset.set);
        set_digest(&mut pset.stored, &digest);
    }
    for instance in config
        .edsources
        .iter_mut()
        .chain(config.essources.iter_mut())
        .chain(config.esmodules.iter_mut())
        .chain(config.services.iter_mut())
        .chain(config.modules.iter_mut())
    {
        let digest = instance_digest(instance);
        set_digest(&mut instance.stored, &digest);
    }
    for path in &mut config.paths {
        if let Some(digest) = digests.paths.get(&path.name) {
            set_digest(&mut path.stored, digest);
        }
    }
    for sequence in &mut config.sequences {
        if let Some(digest) = digests.sequences.get(&sequence.name) {
            set_digest(&mut sequence.stored, digest);
        }
    }
    for stream in &mut config.streams {
        if let Some(digest) = digests.streams.get(&stream.label) {
            set_digest(&mut stream.stored, digest);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModuleType, SoftwarePackage, SoftwareSubsystem, Template, TemplateKind};
    use chrono::Utc;

    fn release() -> ReleaseCatalog {
        let template = |id, name: &str| Template {
            id,
            kind: TemplateKind::Module(ModuleType::EDProducer),
            name: name.to_string(),
            cvs_tag: "V1".into(),
            parameters: vec![],
        };
        ReleaseCatalog::new(
            1,
            "REL",
            false,
            vec![SoftwareSubsystem {
                id: 2,
                name: "Sub".into(),
                packages: vec![SoftwarePackage {
                    id: 3,
                    name: "Pkg".into(),
                    templates: vec![template(10, "Producer")],
                }],
            }],
        )
    }

    fn config_row() -> ConfigurationRow {
        ConfigurationRow {
            id: 100,
            release_id: 1,
            release_tag: "REL".into(),
            directory_id: 1,
            name: "cfg".into(),
            version: 1,
            created_at: Utc::now(),
            creator: "test".into(),
            process_name: "HLT".into(),
            description: String::new(),
        }
    }

    fn instance(id: Id, kind: InstanceRowKind, name: &str, position: i32) -> InstanceRow {
        InstanceRow {
            id,
            template_id: matches!(kind, InstanceRowKind::Module).then_some(10),
            kind,
            name: name.into(),
            flag: false,
            position,
        }
    }

    fn entry(owner_id: Id, child_id: Id, position: i32, kind: EntryKind) -> EntryRow {
        EntryRow { owner_id, child_id, position, kind }
    }

    #[test]
    fn forward_references_are_wired_after_materialization() {
        let staged = StagedConfiguration {
            instances: vec![
                instance(201, InstanceRowKind::Module, "a", 0),
                instance(202, InstanceRowKind::Module, "b", 1),
                instance(301, InstanceRowKind::Path, "p1", 0),
                instance(302, InstanceRowKind::Path, "p2", 1),
                instance(401, InstanceRowKind::Sequence, "s", 0),
            ],
            sequence_entries: vec![entry(401, 202, 0, EntryKind::Module)],
            path_entries: vec![
                entry(301, 302, 0, EntryKind::Path),
                entry(301, 401, 1, EntryKind::Sequence),
                entry(302, 201, 0, EntryKind::Module),
            ],
            ..Default::default()
        };
        let registry = TypeRegistry::standard();
        let loaded = assemble(&config_row(), &release(), &staged, &registry).unwrap();
        assert!(loaded.is_clean(), "{:?}", loaded.warnings);

        let config = loaded.value;
        assert_eq!(
            config.path("p1").unwrap().entries,
            vec![Reference::Path("p2".into()), Reference::Sequence("s".into())]
        );
        assert_eq!(config.sequence("s").unwrap().entries, vec![Reference::Module("b".into())]);
        assert_eq!(config.module("a").unwrap().id(), Some(201));
        let p1 = config.path("p1").unwrap().stored.as_ref().unwrap();
        assert!(!p1.digest.is_empty());
        assert_eq!(p1.children, vec![302, 401]);
    }

    #[test]
    fn skew_and_dangling_entries_are_warnings() {
        let staged = StagedConfiguration {
            instances: vec![
                instance(201, InstanceRowKind::Module, "a", 0),
                instance(301, InstanceRowKind::Path, "p", 0),
            ],
            path_entries: vec![
                entry(301, 201, 0, EntryKind::Module),
                entry(301, 999, 1, EntryKind::Module),
                entry(301, 201, 5, EntryKind::Module),
            ],
            ..Default::default()
        };
        let registry = TypeRegistry::standard();
        let loaded = assemble(&config_row(), &release(), &staged, &registry).unwrap();

        assert_eq!(loaded.value.path("p").unwrap().entries.len(), 2);
        assert_eq!(loaded.warnings.len(), 2);
        assert!(matches!(loaded.warnings[0], ConsistencyWarning::UnresolvedReference { target: 999, .. }));
        assert!(matches!(
            loaded.warnings[1],
            ConsistencyWarning::PositionSkew { expected: 2, found: 5, .. }
        ));
    }

    #[test]
    fn repaired_containers_never_match_their_stored_digest() {
        let staged = StagedConfiguration {
            instances: vec![
                instance(201, InstanceRowKind::Module, "a", 0),
                instance(301, InstanceRowKind::Path, "p", 0),
                instance(302, InstanceRowKind::Path, "q", 1),
            ],
            path_entries: vec![
                entry(301, 201, 0, EntryKind::Module),
                entry(301, 999, 1, EntryKind::Module),
                entry(302, 201, 0, EntryKind::Module),
            ],
            ..Default::default()
        };
        let registry = TypeRegistry::standard();
        let config = assemble(&config_row(), &release(), &staged, &registry).unwrap().value;

        let p = config.path("p").unwrap().stored.as_ref().unwrap();
        assert!(p.digest.is_empty());
        assert_eq!(p.children, vec![201, 999]);
        let q = config.path("q").unwrap().stored.as_ref().unwrap();
        assert!(!q.digest.is_empty());
        assert_eq!(q.children, vec![201]);
        assert!(!config.module("a").unwrap().stored.as_ref().unwrap().digest.is_empty());
    }

    #[test]
    fn unresolved_template_is_fatal() {
        let mut bad = instance(201, InstanceRowKind::Module, "a", 0);
        bad.template_id = Some(77);
        let staged = StagedConfiguration {
            instances: vec![bad],
            ..Default::default()
        };
        let registry = TypeRegistry::standard();
        let err = assemble(&config_row(), &release(), &staged, &registry).unwrap_err();
        assert!(matches!(err, ConfDbError::Integrity { .. }));
    }

    #[test]
    fn release_mismatch_is_fatal() {
        let mut row = config_row();
        row.release_tag = "OTHER".into();
        let registry = TypeRegistry::standard();
        let err = assemble(&row, &release(), &StagedConfiguration::default(), &registry).unwrap_err();
        assert!(err.to_string().contains("OTHER"));
    }
}
