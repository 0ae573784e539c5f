use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Globally unique identity drawn from the shared identity table.
pub type Id = i64;

/// Identity of a persisted entity together with the content digest it had
/// when it was last loaded or saved.
///
/// An empty digest marks content that differs from its persisted rows and
/// never matches. Containers also record the ids their stored entries
/// point at, in position order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredIdentity {
    pub id: Id,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Id>,
}

impl StoredIdentity {
    pub fn new(id: Id, digest: impl Into<String>) -> Self {
        Self {
            id,
            digest: digest.into(),
            children: Vec::new(),
        }
    }

    /// True when `digest` still matches the recorded content.
    pub fn matches(&self, digest: &str) -> bool {
        !self.digest.is_empty() && self.digest == digest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModuleType {
    EDProducer,
    EDFilter,
    EDAnalyzer,
    HLTProducer,
    HLTFilter,
    OutputModule,
}

impl ModuleType {
    pub const ALL: [ModuleType; 6] = [
        ModuleType::EDProducer,
        ModuleType::EDFilter,
        ModuleType::EDAnalyzer,
        ModuleType::HLTProducer,
        ModuleType::HLTFilter,
        ModuleType::OutputModule,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModuleType::EDProducer => "EDProducer",
            ModuleType::EDFilter => "EDFilter",
            ModuleType::EDAnalyzer => "EDAnalyzer",
            ModuleType::HLTProducer => "HLTProducer",
            ModuleType::HLTFilter => "HLTFilter",
            ModuleType::OutputModule => "OutputModule",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Concrete type of a parameter, leaf or composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParameterType {
    Bool,
    Int32,
    VInt32,
    UInt32,
    VUInt32,
    Double,
    VDouble,
    String,
    VString,
    EventId,
    VEventId,
    InputTag,
    VInputTag,
    FileInPath,
    PSet,
    VPSet,
}

impl ParameterType {
    pub const ALL: [ParameterType; 16] = [
        ParameterType::Bool,
        ParameterType::Int32,
        ParameterType::VInt32,
        ParameterType::UInt32,
        ParameterType::VUInt32,
        ParameterType::Double,
        ParameterType::VDouble,
        ParameterType::String,
        ParameterType::VString,
        ParameterType::EventId,
        ParameterType::VEventId,
        ParameterType::InputTag,
        ParameterType::VInputTag,
        ParameterType::FileInPath,
        ParameterType::PSet,
        ParameterType::VPSet,
    ];

    /// Name as stored in the `parameter_types` table.
    pub fn name(&self) -> &'static str {
        match self {
            ParameterType::Bool => "bool",
            ParameterType::Int32 => "int32",
            ParameterType::VInt32 => "vint32",
            ParameterType::UInt32 => "uint32",
            ParameterType::VUInt32 => "vuint32",
            ParameterType::Double => "double",
            ParameterType::VDouble => "vdouble",
            ParameterType::String => "string",
            ParameterType::VString => "vstring",
            ParameterType::EventId => "EventID",
            ParameterType::VEventId => "VEventID",
            ParameterType::InputTag => "InputTag",
            ParameterType::VInputTag => "VInputTag",
            ParameterType::FileInPath => "FileInPath",
            ParameterType::PSet => "PSet",
            ParameterType::VPSet => "VPSet",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            ParameterType::VInt32
                | ParameterType::VUInt32
                | ParameterType::VDouble
                | ParameterType::VString
                | ParameterType::VEventId
                | ParameterType::VInputTag
        )
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, ParameterType::PSet | ParameterType::VPSet)
    }

    /// Value table holding leaves of this type, `None` for composites.
    pub fn value_table(&self) -> Option<&'static str> {
        match self {
            ParameterType::Bool => Some("bool_values"),
            ParameterType::Int32 => Some("int32_values"),
            ParameterType::VInt32 => Some("vint32_values"),
            ParameterType::UInt32 => Some("uint32_values"),
            ParameterType::VUInt32 => Some("vuint32_values"),
            ParameterType::Double => Some("double_values"),
            ParameterType::VDouble => Some("vdouble_values"),
            ParameterType::String => Some("string_values"),
            ParameterType::VString => Some("vstring_values"),
            ParameterType::EventId => Some("eventid_values"),
            ParameterType::VEventId => Some("veventid_values"),
            ParameterType::InputTag => Some("inputtag_values"),
            ParameterType::VInputTag => Some("vinputtag_values"),
            ParameterType::FileInPath => Some("fileinpath_values"),
            ParameterType::PSet | ParameterType::VPSet => None,
        }
    }

    pub fn has_hex_flag(&self) -> bool {
        matches!(
            self,
            ParameterType::Int32 | ParameterType::VInt32 | ParameterType::UInt32 | ParameterType::VUInt32
        )
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Maps module-type and parameter-type names to their row ids.
///
/// Loaded once from the store and handed to the template catalog and the
/// parameter codec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeRegistry {
    module_types: HashMap<ModuleType, Id>,
    module_types_by_id: HashMap<Id, ModuleType>,
    parameter_types: HashMap<ParameterType, Id>,
    parameter_types_by_id: HashMap<Id, ParameterType>,
}

impl TypeRegistry {
    /// Builds the registry from `(id, name)` rows. Unknown names are skipped.
    pub fn from_rows(
        module_rows: impl IntoIterator<Item = (Id, String)>,
        parameter_rows: impl IntoIterator<Item = (Id, String)>,
    ) -> Self {
        let mut registry = Self::default();
        for (id, name) in module_rows {
            match ModuleType::from_name(&name) {
                Some(module_type) => registry.register_module_type(module_type, id),
                None => log::warn!("Ignoring unknown module type '{}' (id {})", name, id),
            }
        }
        for (id, name) in parameter_rows {
            match ParameterType::from_name(&name) {
                Some(parameter_type) => registry.register_parameter_type(parameter_type, id),
                None => log::warn!("Ignoring unknown parameter type '{}' (id {})", name, id),
            }
        }
        registry
    }

    /// Registry with ids assigned in declaration order starting at 1, as
    /// seeded by the schema migration.
    pub fn standard() -> Self {
        Self::from_rows(
            ModuleType::ALL
                .iter()
                .enumerate()
                .map(|(i, t)| (i as Id + 1, t.name().to_string())),
            ParameterType::ALL
                .iter()
                .enumerate()
                .map(|(i, t)| (i as Id + 1, t.name().to_string())),
        )
    }

    fn register_module_type(&mut self, module_type: ModuleType, id: Id) {
        self.module_types.insert(module_type, id);
        self.module_types_by_id.insert(id, module_type);
    }

    fn register_parameter_type(&mut self, parameter_type: ParameterType, id: Id) {
        self.parameter_types.insert(parameter_type, id);
        self.parameter_types_by_id.insert(id, parameter_type);
    }

    pub fn module_type_id(&self, module_type: ModuleType) -> Option<Id> {
        self.module_types.get(&module_type).copied()
    }

    pub fn module_type(&self, id: Id) -> Option<ModuleType> {
        self.module_types_by_id.get(&id).copied()
    }

    pub fn parameter_type_id(&self, parameter_type: ParameterType) -> Option<Id> {
        self.parameter_types.get(&parameter_type).copied()
    }

    pub fn parameter_type(&self, id: Id) -> Option<ParameterType> {
        self.parameter_types_by_id.get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_round_trips_names() {
        let registry = TypeRegistry::standard();
        for t in ParameterType::ALL {
            let id = registry.parameter_type_id(t).unwrap();
            assert_eq!(registry.parameter_type(id), Some(t));
        }
        for t in ModuleType::ALL {
            let id = registry.module_type_id(t).unwrap();
            assert_eq!(registry.module_type(id), Some(t));
        }
    }

    #[test]
    fn unknown_type_names_are_skipped() {
        let registry = TypeRegistry::from_rows(
            vec![(1, "EDProducer".to_string()), (2, "Looper".to_string())],
            vec![(7, "vbool".to_string())],
        );
        assert_eq!(registry.module_type(1), Some(ModuleType::EDProducer));
        assert_eq!(registry.module_type(2), None);
        assert_eq!(registry.parameter_type(7), None);
    }
}
