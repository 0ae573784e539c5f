use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::common::{Id, ModuleType};
use super::parameter::Parameter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateKind {
    EDSource,
    ESSource,
    ESModule,
    Service,
    Module(ModuleType),
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateKind::EDSource => f.write_str("EDSource"),
            TemplateKind::ESSource => f.write_str("ESSource"),
            TemplateKind::ESModule => f.write_str("ESModule"),
            TemplateKind::Service => f.write_str("Service"),
            TemplateKind::Module(t) => write!(f, "Module({})", t),
        }
    }
}

/// Schema definition for one kind of instance, scoped to a release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: Id,
    pub kind: TemplateKind,
    pub name: String,
    pub cvs_tag: String,
    pub parameters: Vec<Parameter>,
}

impl Template {
    pub fn module_type(&self) -> Option<ModuleType> {
        match self.kind {
            TemplateKind::Module(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftwarePackage {
    pub id: Id,
    pub name: String,
    pub templates: Vec<Template>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftwareSubsystem {
    pub id: Id,
    pub name: String,
    pub packages: Vec<SoftwarePackage>,
}

/// Templates of one release tag grouped by subsystem and package.
///
/// A partial catalog only carries the templates referenced by one
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseCatalog {
    pub release_id: Id,
    pub tag: String,
    pub partial: bool,
    pub subsystems: Vec<SoftwareSubsystem>,
    #[serde(skip)]
    index: HashMap<Id, (usize, usize, usize)>,
}

impl ReleaseCatalog {
    pub fn new(release_id: Id, tag: impl Into<String>, partial: bool, subsystems: Vec<SoftwareSubsystem>) -> Self {
        let mut index = HashMap::new();
        for (s, subsystem) in subsystems.iter().enumerate() {
            for (p, package) in subsystem.packages.iter().enumerate() {
                for (t, template) in package.templates.iter().enumerate() {
                    index.insert(template.id, (s, p, t));
                }
            }
        }
        Self {
            release_id,
            tag: tag.into(),
            partial,
            subsystems,
            index,
        }
    }

    pub fn template(&self, id: Id) -> Option<&Template> {
        let (s, p, t) = *self.index.get(&id)?;
        Some(&self.subsystems[s].packages[p].templates[t])
    }

    /// Name of the package that holds the template.
    pub fn package_of(&self, id: Id) -> Option<&str> {
        let (s, p, _) = *self.index.get(&id)?;
        Some(&self.subsystems[s].packages[p].name)
    }

    pub fn find_template(&self, name: &str) -> Option<&Template> {
        self.templates().find(|t| t.name == name)
    }

    pub fn contains(&self, id: Id) -> bool {
        self.index.contains_key(&id)
    }

    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        self.subsystems
            .iter()
            .flat_map(|s| s.packages.iter())
            .flat_map(|p| p.templates.iter())
    }

    pub fn template_count(&self) -> usize {
        self.index.len()
    }
}
