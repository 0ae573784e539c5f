//! Flat row shapes exchanged with the store: directory and configuration
//! metadata, the staging row-sets read by the catalog and loader, and the
//! write batch produced by the persister.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Id, ParameterType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryRow {
    pub id: Id,
    pub parent_id: Option<Id>,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationRow {
    pub id: Id,
    pub release_id: Id,
    pub release_tag: String,
    pub directory_id: Id,
    pub name: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub creator: String,
    pub process_name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRow {
    pub directory_id: Id,
    pub name: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRow {
    pub id: Id,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsystemRow {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRow {
    pub id: Id,
    pub subsystem_id: Id,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateRowKind {
    EDSource,
    ESSource,
    ESModule,
    Service,
    Module,
}

impl TemplateRowKind {
    pub fn name(&self) -> &'static str {
        match self {
            TemplateRowKind::EDSource => "EDSource",
            TemplateRowKind::ESSource => "ESSource",
            TemplateRowKind::ESModule => "ESModule",
            TemplateRowKind::Service => "Service",
            TemplateRowKind::Module => "Module",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "EDSource" => Some(TemplateRowKind::EDSource),
            "ESSource" => Some(TemplateRowKind::ESSource),
            "ESModule" => Some(TemplateRowKind::ESModule),
            "Service" => Some(TemplateRowKind::Service),
            "Module" => Some(TemplateRowKind::Module),
            _ => None,
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            TemplateRowKind::EDSource => "edsource_templates",
            TemplateRowKind::ESSource => "essource_templates",
            TemplateRowKind::ESModule => "esmodule_templates",
            TemplateRowKind::Service => "service_templates",
            TemplateRowKind::Module => "module_templates",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRow {
    pub id: Id,
    pub kind: TemplateRowKind,
    /// Module type id, modules only.
    pub type_id: Option<Id>,
    pub name: String,
    pub cvs_tag: String,
    pub package_id: Id,
}

/// Parameter node (leaf or set) with its position under `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRow {
    pub id: Id,
    pub type_id: Id,
    pub name: String,
    pub tracked: bool,
    /// Hex display of integer leaves, kept on the node so empty vectors
    /// retain it.
    pub hex: bool,
    pub position: i32,
    pub parent_id: Id,
}

/// Storage class of a leaf value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

/// One value row. `position` is set for vector elements only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRow {
    pub parameter_id: Id,
    pub position: Option<i32>,
    pub value: StoredValue,
    pub hex: bool,
}

/// Templates of a release (or of a configuration) as produced by the
/// staging step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagedTemplates {
    pub subsystems: Vec<SubsystemRow>,
    pub packages: Vec<PackageRow>,
    pub templates: Vec<TemplateRow>,
    pub parameters: Vec<ParameterRow>,
    pub values: Vec<ValueRow>,
}

/// Discriminator of a staged instance row. Declaration order is the order
/// in which the staging step returns rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InstanceRowKind {
    PSet,
    EDSource,
    ESSource,
    ESModule,
    Service,
    Module,
    Path,
    Sequence,
    Stream,
}

impl InstanceRowKind {
    pub fn name(&self) -> &'static str {
        match self {
            InstanceRowKind::PSet => "PSet",
            InstanceRowKind::EDSource => "EDSource",
            InstanceRowKind::ESSource => "ESSource",
            InstanceRowKind::ESModule => "ESModule",
            InstanceRowKind::Service => "Service",
            InstanceRowKind::Module => "Module",
            InstanceRowKind::Path => "Path",
            InstanceRowKind::Sequence => "Sequence",
            InstanceRowKind::Stream => "Stream",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PSet" => Some(InstanceRowKind::PSet),
            "EDSource" => Some(InstanceRowKind::EDSource),
            "ESSource" => Some(InstanceRowKind::ESSource),
            "ESModule" => Some(InstanceRowKind::ESModule),
            "Service" => Some(InstanceRowKind::Service),
            "Module" => Some(InstanceRowKind::Module),
            "Path" => Some(InstanceRowKind::Path),
            "Sequence" => Some(InstanceRowKind::Sequence),
            "Stream" => Some(InstanceRowKind::Stream),
            _ => None,
        }
    }
}

/// Instance row of a staged configuration. `flag` is the preferred flag of
/// ES sources and modules, the end-path flag of paths and the tracked flag
/// of global parameter sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRow {
    pub id: Id,
    pub template_id: Option<Id>,
    pub kind: InstanceRowKind,
    pub name: String,
    pub flag: bool,
    pub position: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Module,
    Sequence,
    Path,
}

impl EntryKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntryKind::Module => "module",
            EntryKind::Sequence => "sequence",
            EntryKind::Path => "path",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "module" => Some(EntryKind::Module),
            "sequence" => Some(EntryKind::Sequence),
            "path" => Some(EntryKind::Path),
            _ => None,
        }
    }
}

/// Path or sequence entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRow {
    pub owner_id: Id,
    pub child_id: Id,
    pub position: i32,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntryRow {
    pub stream_id: Id,
    pub path_id: Id,
    pub position: i32,
}

/// Row-sets of one configuration as produced by the staging step.
///
/// Instances are ordered by kind then position; entries by owner then
/// position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagedConfiguration {
    pub instances: Vec<InstanceRow>,
    pub parameters: Vec<ParameterRow>,
    pub values: Vec<ValueRow>,
    pub sequence_entries: Vec<EntryRow>,
    pub path_entries: Vec<EntryRow>,
    pub stream_entries: Vec<StreamEntryRow>,
}

/// Row of an entity table written by the persister.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityRow {
    EDSource { id: Id, template_id: Id },
    ESSource { id: Id, template_id: Id, name: String },
    ESModule { id: Id, template_id: Id, name: String },
    Service { id: Id, template_id: Id },
    Module { id: Id, template_id: Id, name: String },
    Path { id: Id, name: String, end_path: bool },
    Sequence { id: Id, name: String },
    Stream { id: Id, label: String },
}

impl EntityRow {
    pub fn id(&self) -> Id {
        match self {
            EntityRow::EDSource { id, .. }
            | EntityRow::ESSource { id, .. }
            | EntityRow::ESModule { id, .. }
            | EntityRow::Service { id, .. }
            | EntityRow::Module { id, .. }
            | EntityRow::Path { id, .. }
            | EntityRow::Sequence { id, .. }
            | EntityRow::Stream { id, .. } => *id,
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            EntityRow::EDSource { .. } => "edsources",
            EntityRow::ESSource { .. } => "essources",
            EntityRow::ESModule { .. } => "esmodules",
            EntityRow::Service { .. } => "services",
            EntityRow::Module { .. } => "modules",
            EntityRow::Path { .. } => "paths",
            EntityRow::Sequence { .. } => "sequences",
            EntityRow::Stream { .. } => "streams",
        }
    }
}

/// Parameter node written by the codec. Its placement is a separate
/// `EdgeKind::Parameter` edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInsert {
    pub id: Id,
    pub type_id: Id,
    pub parameter_type: ParameterType,
    pub name: String,
    pub tracked: bool,
    pub hex: bool,
}

impl ParameterInsert {
    pub fn table(&self) -> &'static str {
        match self.parameter_type {
            ParameterType::PSet => "parameter_sets",
            ParameterType::VPSet => "vector_parameter_sets",
            _ => "parameters",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueInsert {
    pub parameter_type: ParameterType,
    pub row: ValueRow,
}

/// Association tables, all shaped `(parent_id, child_id, position[, flag])`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeKind {
    ConfigurationPSet,
    ConfigurationEDSource,
    ConfigurationESSource,
    ConfigurationESModule,
    ConfigurationService,
    ConfigurationPath,
    ConfigurationSequence,
    ConfigurationModule,
    ConfigurationStream,
    PathPath,
    PathSequence,
    PathModule,
    SequenceSequence,
    SequenceModule,
    StreamPath,
    Parameter,
}

impl EdgeKind {
    pub fn table(&self) -> &'static str {
        match self {
            EdgeKind::ConfigurationPSet => "configuration_pset_assoc",
            EdgeKind::ConfigurationEDSource => "configuration_edsource_assoc",
            EdgeKind::ConfigurationESSource => "configuration_essource_assoc",
            EdgeKind::ConfigurationESModule => "configuration_esmodule_assoc",
            EdgeKind::ConfigurationService => "configuration_service_assoc",
            EdgeKind::ConfigurationPath => "configuration_path_assoc",
            EdgeKind::ConfigurationSequence => "configuration_sequence_assoc",
            EdgeKind::ConfigurationModule => "configuration_module_assoc",
            EdgeKind::ConfigurationStream => "configuration_stream_assoc",
            EdgeKind::PathPath => "path_path_assoc",
            EdgeKind::PathSequence => "path_sequence_assoc",
            EdgeKind::PathModule => "path_module_assoc",
            EdgeKind::SequenceSequence => "sequence_sequence_assoc",
            EdgeKind::SequenceModule => "sequence_module_assoc",
            EdgeKind::StreamPath => "stream_path_assoc",
            EdgeKind::Parameter => "parameter_assoc",
        }
    }

    pub fn has_flag(&self) -> bool {
        matches!(
            self,
            EdgeKind::ConfigurationESSource | EdgeKind::ConfigurationESModule
        )
    }

    /// Entry kind of a path or sequence edge.
    pub fn entry_kind(&self) -> Option<EntryKind> {
        match self {
            EdgeKind::PathPath => Some(EntryKind::Path),
            EdgeKind::PathSequence | EdgeKind::SequenceSequence => Some(EntryKind::Sequence),
            EdgeKind::PathModule | EdgeKind::SequenceModule => Some(EntryKind::Module),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRow {
    pub kind: EdgeKind,
    pub parent_id: Id,
    pub child_id: Id,
    pub position: i32,
    pub flag: bool,
}

impl EdgeRow {
    pub fn new(kind: EdgeKind, parent_id: Id, child_id: Id, position: usize) -> Self {
        Self {
            kind,
            parent_id,
            child_id,
            position: position as i32,
            flag: false,
        }
    }

    pub fn with_flag(mut self, flag: bool) -> Self {
        self.flag = flag;
        self
    }
}

/// Rows of one persister stage. Within a stage entities are written
/// before parameters, values and edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteStage {
    pub name: String,
    pub entities: Vec<EntityRow>,
    pub parameters: Vec<ParameterInsert>,
    pub values: Vec<ValueInsert>,
    pub edges: Vec<EdgeRow>,
}

impl WriteStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.parameters.is_empty()
            && self.values.is_empty()
            && self.edges.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.entities.len() + self.parameters.len() + self.values.len() + self.edges.len()
    }
}

/// Everything one save writes, applied by the store in a single
/// transaction: the configuration row first, then the stages in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub configuration: ConfigurationRow,
    pub stages: Vec<WriteStage>,
}

impl WriteBatch {
    pub fn new(configuration: ConfigurationRow) -> Self {
        Self {
            configuration,
            stages: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        1 + self.stages.iter().map(WriteStage::row_count).sum::<usize>()
    }
}
