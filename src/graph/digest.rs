//! Content digests deciding whether a persisted entity is unchanged.
//!
//! Path and sequence digests fold in the digests of everything they
//! reference, so a changed module changes every container above it.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::{ConfDbError, Result};
use crate::model::{Configuration, Instance, Parameter, ParameterSet, ParameterValue, Reference};

fn hash_parameters(hasher: &mut Sha256, parameters: &[Parameter]) {
    for parameter in parameters {
        hasher.update(format!(
            "param:{}:{}:{}\n",
            parameter.name,
            parameter.tracked,
            parameter.parameter_type()
        ));
        match &parameter.value {
            ParameterValue::PSet(children) => {
                hasher.update("begin\n");
                hash_parameters(hasher, children);
                hasher.update("end\n");
            }
            ParameterValue::VPSet(sets) => {
                for set in sets {
                    hasher.update(format!("set:{}:{}\n", set.name, set.tracked));
                    hash_parameters(hasher, &set.parameters);
                    hasher.update("end\n");
                }
            }
            leaf => hasher.update(format!("value:{:?}\n", leaf)),
        }
    }
}

/// Digest of an instance. The preferred flag lives on the association row
/// and is not part of the content.
pub fn instance_digest(instance: &Instance) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("kind:{}\n", instance.kind.label()));
    if instance.kind.is_named() {
        hasher.update(format!("name:{}\n", instance.name));
    }
    hasher.update(format!("template:{}\n", instance.template_id));
    hash_parameters(&mut hasher, &instance.parameters);
    hex::encode(hasher.finalize())
}

pub fn pset_digest(set: &ParameterSet) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("pset:{}:{}\n", set.name, set.tracked));
    hash_parameters(&mut hasher, &set.parameters);
    hex::encode(hasher.finalize())
}

/// Digests of every module, sequence, path and stream of a configuration,
/// keyed by name (label for streams).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphDigests {
    pub modules: HashMap<String, String>,
    pub sequences: HashMap<String, String>,
    pub paths: HashMap<String, String>,
    pub streams: HashMap<String, String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

struct Walker<'a> {
    config: &'a Configuration,
    digests: GraphDigests,
    sequence_marks: HashMap<&'a str, Mark>,
    path_marks: HashMap<&'a str, Mark>,
}

const DIGEST: &str = "digest configuration";

impl<'a> Walker<'a> {
    fn entry_digest(&mut self, owner: &str, entry: &'a Reference) -> Result<String> {
        match entry {
            Reference::Module(name) => self.digests.modules.get(name).cloned().ok_or_else(|| {
                ConfDbError::integrity(DIGEST, format!("{} references unknown module '{}'", owner, name))
            }),
            Reference::Sequence(name) => self.sequence(name, owner),
            Reference::Path(name) => self.path(name, owner),
        }
    }

    fn sequence(&mut self, name: &'a str, referrer: &str) -> Result<String> {
        match self.sequence_marks.get(name) {
            Some(Mark::Done) => return Ok(self.digests.sequences[name].clone()),
            Some(Mark::Visiting) => {
                return Err(ConfDbError::integrity(
                    DIGEST,
                    format!("sequence '{}' is part of a reference cycle", name),
                ))
            }
            None => {}
        }
        let config = self.config;
        let sequence = config.sequence(name).ok_or_else(|| {
            ConfDbError::integrity(DIGEST, format!("{} references unknown sequence '{}'", referrer, name))
        })?;
        self.sequence_marks.insert(name, Mark::Visiting);

        let owner = format!("sequence '{}'", name);
        let mut hasher = Sha256::new();
        hasher.update(format!("sequence:{}\n", sequence.name));
        for entry in &sequence.entries {
            if let Reference::Path(target) = entry {
                return Err(ConfDbError::integrity(
                    DIGEST,
                    format!("{} cannot reference path '{}'", owner, target),
                ));
            }
            let child = self.entry_digest(&owner, entry)?;
            hasher.update(format!("{}:{}\n", entry, child));
        }
        let digest = hex::encode(hasher.finalize());

        self.sequence_marks.insert(name, Mark::Done);
        self.digests.sequences.insert(name.to_string(), digest.clone());
        Ok(digest)
    }

    fn path(&mut self, name: &'a str, referrer: &str) -> Result<String> {
        match self.path_marks.get(name) {
            Some(Mark::Done) => return Ok(self.digests.paths[name].clone()),
            Some(Mark::Visiting) => {
                return Err(ConfDbError::integrity(
                    DIGEST,
                    format!("path '{}' is part of a reference cycle", name),
                ))
            }
            None => {}
        }
        let config = self.config;
        let path = config.path(name).ok_or_else(|| {
            ConfDbError::integrity(DIGEST, format!("{} references unknown path '{}'", referrer, name))
        })?;
        self.path_marks.insert(name, Mark::Visiting);

        let owner = format!("path '{}'", name);
        let mut hasher = Sha256::new();
        hasher.update(format!("path:{}:{}\n", path.name, path.end_path));
        for entry in &path.entries {
            let child = self.entry_digest(&owner, entry)?;
            hasher.update(format!("{}:{}\n", entry, child));
        }
        let digest = hex::encode(hasher.finalize());

        self.path_marks.insert(name, Mark::Done);
        self.digests.paths.insert(name.to_string(), digest.clone());
        Ok(digest)
    }
}

/// Computes all container digests, failing on unresolved references, paths
/// inside sequences and reference cycles.
pub fn graph_digests(config: &Configuration) -> Result<GraphDigests> {
    let mut walker = Walker {
        config,
        digests: GraphDigests::default(),
        sequence_marks: HashMap::new(),
        path_marks: HashMap::new(),
    };
    for module in &config.modules {
        walker
            .digests
            .modules
            .insert(module.name.clone(), instance_digest(module));
    }
    for sequence in &config.sequences {
        walker.sequence(&sequence.name, "configuration")?;
    }
    for path in &config.paths {
        walker.path(&path.name, "configuration")?;
    }
    for stream in &config.streams {
        let mut hasher = Sha256::new();
        hasher.update(format!("stream:{}\n", stream.label));
        for path in &stream.paths {
            let digest = walker.digests.paths.get(path).ok_or_else(|| {
                ConfDbError::integrity(
                    DIGEST,
                    format!("stream '{}' references unknown path '{}'", stream.label, path),
                )
            })?;
            hasher.update(format!("path:{}:{}\n", path, digest));
        }
        walker
            .digests
            .streams
            .insert(stream.label.clone(), hex::encode(hasher.finalize()));
    }
    Ok(walker.digests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstanceKind, Path, Sequence};

    fn module(name: &str, value: i32) -> Instance {
        Instance {
            stored: None,
            kind: InstanceKind::Module,
            name: name.to_string(),
            template_id: 7,
            parameters: vec![Parameter::tracked(
                "n",
                ParameterValue::Int32 { value: Some(value), hex: false },
            )],
        }
    }

    fn config() -> Configuration {
        let mut config = Configuration::new(1, "cfg", "REL");
        config.modules = vec![module("a", 1), module("b", 2), module("c", 3)];
        config.sequences = vec![Sequence::new("S", vec![Reference::Module("c".into())])];
        config.paths = vec![Path::new(
            "P",
            vec![
                Reference::Module("a".into()),
                Reference::Sequence("S".into()),
                Reference::Module("b".into()),
            ],
        )];
        config
    }

    #[test]
    fn module_change_propagates_to_containers() {
        let before = graph_digests(&config()).unwrap();

        let mut changed = config();
        changed.modules[2] = module("c", 30);
        let after = graph_digests(&changed).unwrap();

        assert_eq!(before.modules["a"], after.modules["a"]);
        assert_ne!(before.modules["c"], after.modules["c"]);
        assert_ne!(before.sequences["S"], after.sequences["S"]);
        assert_ne!(before.paths["P"], after.paths["P"]);
    }

    #[test]
    fn preferred_flag_is_not_content() {
        let mut a = module("es", 1);
        a.kind = InstanceKind::ESModule { preferred: false };
        let mut b = a.clone();
        b.kind = InstanceKind::ESModule { preferred: true };
        assert_eq!(instance_digest(&a), instance_digest(&b));
    }

    #[test]
    fn cycles_are_rejected() {
        let mut config = config();
        config.paths.push(Path::new("Q", vec![Reference::Path("R".into())]));
        config.paths.push(Path::new("R", vec![Reference::Path("Q".into())]));
        let err = graph_digests(&config).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn sequences_cannot_hold_paths() {
        let mut config = config();
        config.sequences.push(Sequence::new("T", vec![Reference::Path("P".into())]));
        assert!(graph_digests(&config).is_err());
    }
}
