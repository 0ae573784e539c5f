use serde::{Deserialize, Serialize};
use std::fmt;

use super::common::{Id, StoredIdentity};
use super::parameter::{Parameter, ParameterSet};
use super::template::{Template, TemplateKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceKind {
    EDSource,
    ESSource { preferred: bool },
    ESModule { preferred: bool },
    Service,
    Module,
}

impl InstanceKind {
    /// Instance kind matching a template kind, not preferred.
    pub fn for_template(kind: TemplateKind) -> Self {
        match kind {
            TemplateKind::EDSource => InstanceKind::EDSource,
            TemplateKind::ESSource => InstanceKind::ESSource { preferred: false },
            TemplateKind::ESModule => InstanceKind::ESModule { preferred: false },
            TemplateKind::Service => InstanceKind::Service,
            TemplateKind::Module(_) => InstanceKind::Module,
        }
    }

    pub fn preferred(&self) -> bool {
        match self {
            InstanceKind::ESSource { preferred } | InstanceKind::ESModule { preferred } => *preferred,
            _ => false,
        }
    }

    /// Whether the instance name is stored or taken from the template.
    pub fn is_named(&self) -> bool {
        matches!(
            self,
            InstanceKind::ESSource { .. } | InstanceKind::ESModule { .. } | InstanceKind::Module
        )
    }

    pub fn accepts(&self, template: TemplateKind) -> bool {
        matches!(
            (self, template),
            (InstanceKind::EDSource, TemplateKind::EDSource)
                | (InstanceKind::ESSource { .. }, TemplateKind::ESSource)
                | (InstanceKind::ESModule { .. }, TemplateKind::ESModule)
                | (InstanceKind::Service, TemplateKind::Service)
                | (InstanceKind::Module, TemplateKind::Module(_))
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            InstanceKind::EDSource => "EDSource",
            InstanceKind::ESSource { .. } => "ESSource",
            InstanceKind::ESModule { .. } => "ESModule",
            InstanceKind::Service => "Service",
            InstanceKind::Module => "Module",
        }
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A parameterized use of one template inside a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub stored: Option<StoredIdentity>,
    pub kind: InstanceKind,
    pub name: String,
    pub template_id: Id,
    pub parameters: Vec<Parameter>,
}

impl Instance {
    /// New unsaved instance carrying a copy of the template's parameters.
    pub fn from_template(template: &Template, name: impl Into<String>) -> Self {
        let kind = InstanceKind::for_template(template.kind);
        let name = if kind.is_named() {
            name.into()
        } else {
            template.name.clone()
        };
        Self {
            stored: None,
            kind,
            name,
            template_id: template.id,
            parameters: template.parameters.clone(),
        }
    }

    pub fn id(&self) -> Option<Id> {
        self.stored.as_ref().map(|s| s.id)
    }

    /// Declaration-ordered parameters.
    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Replaces the value of a top-level parameter, returning false when no
    /// such parameter exists.
    pub fn set_parameter(&mut self, name: &str, value: super::parameter::ParameterValue) -> bool {
        match self.parameters.iter_mut().find(|p| p.name == name) {
            Some(parameter) => {
                parameter.value = value;
                true
            }
            None => false,
        }
    }
}

/// Parameter set bound directly to a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalPSet {
    pub stored: Option<StoredIdentity>,
    pub set: ParameterSet,
}

impl GlobalPSet {
    pub fn new(set: ParameterSet) -> Self {
        Self { stored: None, set }
    }
}
