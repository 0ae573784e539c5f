use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::common::{Id, StoredIdentity};
use super::instance::{GlobalPSet, Instance};

/// Entry of a path or sequence, naming the referenced entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reference {
    Module(String),
    Sequence(String),
    Path(String),
}

impl Reference {
    pub fn name(&self) -> &str {
        match self {
            Reference::Module(n) | Reference::Sequence(n) | Reference::Path(n) => n,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Module(n) => write!(f, "module:{}", n),
            Reference::Sequence(n) => write!(f, "sequence:{}", n),
            Reference::Path(n) => write!(f, "path:{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub stored: Option<StoredIdentity>,
    pub name: String,
    pub end_path: bool,
    pub entries: Vec<Reference>,
}

impl Path {
    pub fn new(name: impl Into<String>, entries: Vec<Reference>) -> Self {
        Self {
            stored: None,
            name: name.into(),
            end_path: false,
            entries,
        }
    }

    pub fn end_path(name: impl Into<String>, entries: Vec<Reference>) -> Self {
        Self {
            end_path: true,
            ..Self::new(name, entries)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub stored: Option<StoredIdentity>,
    pub name: String,
    pub entries: Vec<Reference>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, entries: Vec<Reference>) -> Self {
        Self {
            stored: None,
            name: name.into(),
            entries,
        }
    }
}

/// Named group of output paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub stored: Option<StoredIdentity>,
    pub label: String,
    pub paths: Vec<String>,
}

impl Stream {
    pub fn new(label: impl Into<String>, paths: Vec<String>) -> Self {
        Self {
            stored: None,
            label: label.into(),
            paths,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationVersion {
    pub id: Id,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub creator: String,
    pub release_tag: String,
    pub process_name: String,
    pub comment: String,
}

/// In-memory configuration graph.
///
/// Entities refer to each other by name; identities live in `stored` and
/// are only set by loading or saving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub directory_id: Id,
    pub name: String,
    pub release_tag: String,
    /// Version this graph was loaded from or last saved as.
    pub version: Option<ConfigurationVersion>,
    pub psets: Vec<GlobalPSet>,
    pub edsources: Vec<Instance>,
    pub essources: Vec<Instance>,
    pub esmodules: Vec<Instance>,
    pub services: Vec<Instance>,
    pub modules: Vec<Instance>,
    pub paths: Vec<Path>,
    pub sequences: Vec<Sequence>,
    pub streams: Vec<Stream>,
}

impl Configuration {
    pub fn new(directory_id: Id, name: impl Into<String>, release_tag: impl Into<String>) -> Self {
        Self {
            directory_id,
            name: name.into(),
            release_tag: release_tag.into(),
            version: None,
            psets: Vec::new(),
            edsources: Vec::new(),
            essources: Vec::new(),
            esmodules: Vec::new(),
            services: Vec::new(),
            modules: Vec::new(),
            paths: Vec::new(),
            sequences: Vec::new(),
            streams: Vec::new(),
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter()
    }

    pub fn sequences(&self) -> impl Iterator<Item = &Sequence> {
        self.sequences.iter()
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter()
    }

    pub fn modules(&self) -> impl Iterator<Item = &Instance> {
        self.modules.iter()
    }

    pub fn module(&self, name: &str) -> Option<&Instance> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn module_mut(&mut self, name: &str) -> Option<&mut Instance> {
        self.modules.iter_mut().find(|m| m.name == name)
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.paths.iter().find(|p| p.name == name)
    }

    pub fn sequence(&self, name: &str) -> Option<&Sequence> {
        self.sequences.iter().find(|s| s.name == name)
    }

    pub fn stream(&self, label: &str) -> Option<&Stream> {
        self.streams.iter().find(|s| s.label == label)
    }

    pub fn pset(&self, name: &str) -> Option<&GlobalPSet> {
        self.psets.iter().find(|p| p.set.name == name)
    }
}
