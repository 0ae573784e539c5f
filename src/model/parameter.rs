use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::common::ParameterType;

/// Run/luminosity-block/event triple. Text form is `run:event` or
/// `run:lumi:event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventId {
    pub run: u32,
    pub lumi: Option<u32>,
    pub event: u64,
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lumi {
            Some(lumi) => write!(f, "{}:{}:{}", self.run, lumi, self.event),
            None => write!(f, "{}:{}", self.run, self.event),
        }
    }
}

impl FromStr for EventId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(':').collect();
        let bad = || format!("invalid EventID '{}'", s);
        match fields.as_slice() {
            [run, event] => Ok(EventId {
                run: run.parse().map_err(|_| bad())?,
                lumi: None,
                event: event.parse().map_err(|_| bad())?,
            }),
            [run, lumi, event] => Ok(EventId {
                run: run.parse().map_err(|_| bad())?,
                lumi: Some(lumi.parse().map_err(|_| bad())?),
                event: event.parse().map_err(|_| bad())?,
            }),
            _ => Err(bad()),
        }
    }
}

/// Product label with optional instance and process names. Text form is
/// `label[:instance[:process]]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputTag {
    pub label: String,
    pub instance: String,
    pub process: String,
}

impl InputTag {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }
}

impl fmt::Display for InputTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)?;
        if !self.instance.is_empty() || !self.process.is_empty() {
            write!(f, ":{}", self.instance)?;
        }
        if !self.process.is_empty() {
            write!(f, ":{}", self.process)?;
        }
        Ok(())
    }
}

impl FromStr for InputTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.splitn(3, ':');
        let label = fields.next().unwrap_or_default().to_string();
        if label.is_empty() && !s.is_empty() {
            return Err(format!("invalid InputTag '{}'", s));
        }
        Ok(InputTag {
            label,
            instance: fields.next().unwrap_or_default().to_string(),
            process: fields.next().unwrap_or_default().to_string(),
        })
    }
}

/// A named node in a parameter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub tracked: bool,
    pub value: ParameterValue,
}

/// Composite parameter container; elements of a `VPSet` are usually unnamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub name: String,
    pub tracked: bool,
    pub parameters: Vec<Parameter>,
}

/// Leaf scalars are optional (unset is representable), vectors are always
/// set and may be empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ParameterValue {
    Bool(Option<bool>),
    Int32 { value: Option<i32>, hex: bool },
    VInt32 { values: Vec<i32>, hex: bool },
    UInt32 { value: Option<u32>, hex: bool },
    VUInt32 { values: Vec<u32>, hex: bool },
    Double(Option<f64>),
    VDouble(Vec<f64>),
    String(Option<String>),
    VString(Vec<String>),
    EventId(Option<EventId>),
    VEventId(Vec<EventId>),
    InputTag(Option<InputTag>),
    VInputTag(Vec<InputTag>),
    FileInPath(Option<String>),
    PSet(Vec<Parameter>),
    VPSet(Vec<ParameterSet>),
}

impl ParameterValue {
    pub fn parameter_type(&self) -> ParameterType {
        match self {
            ParameterValue::Bool(_) => ParameterType::Bool,
            ParameterValue::Int32 { .. } => ParameterType::Int32,
            ParameterValue::VInt32 { .. } => ParameterType::VInt32,
            ParameterValue::UInt32 { .. } => ParameterType::UInt32,
            ParameterValue::VUInt32 { .. } => ParameterType::VUInt32,
            ParameterValue::Double(_) => ParameterType::Double,
            ParameterValue::VDouble(_) => ParameterType::VDouble,
            ParameterValue::String(_) => ParameterType::String,
            ParameterValue::VString(_) => ParameterType::VString,
            ParameterValue::EventId(_) => ParameterType::EventId,
            ParameterValue::VEventId(_) => ParameterType::VEventId,
            ParameterValue::InputTag(_) => ParameterType::InputTag,
            ParameterValue::VInputTag(_) => ParameterType::VInputTag,
            ParameterValue::FileInPath(_) => ParameterType::FileInPath,
            ParameterValue::PSet(_) => ParameterType::PSet,
            ParameterValue::VPSet(_) => ParameterType::VPSet,
        }
    }

    /// Whether a value is present. Vectors and composites always are.
    pub fn is_set(&self) -> bool {
        match self {
            ParameterValue::Bool(v) => v.is_some(),
            ParameterValue::Int32 { value, .. } => value.is_some(),
            ParameterValue::UInt32 { value, .. } => value.is_some(),
            ParameterValue::Double(v) => v.is_some(),
            ParameterValue::String(v) | ParameterValue::FileInPath(v) => v.is_some(),
            ParameterValue::EventId(v) => v.is_some(),
            ParameterValue::InputTag(v) => v.is_some(),
            ParameterValue::VInt32 { .. }
            | ParameterValue::VUInt32 { .. }
            | ParameterValue::VDouble(_)
            | ParameterValue::VString(_)
            | ParameterValue::VEventId(_)
            | ParameterValue::VInputTag(_)
            | ParameterValue::PSet(_)
            | ParameterValue::VPSet(_) => true,
        }
    }

    /// Hex display flag of integer values, false for every other type.
    pub fn hex(&self) -> bool {
        match self {
            ParameterValue::Int32 { hex, .. }
            | ParameterValue::UInt32 { hex, .. }
            | ParameterValue::VInt32 { hex, .. }
            | ParameterValue::VUInt32 { hex, .. } => *hex,
            _ => false,
        }
    }

    /// Unset value of the given leaf type, empty for vectors and composites.
    pub fn unset(parameter_type: ParameterType) -> Self {
        match parameter_type {
            ParameterType::Bool => ParameterValue::Bool(None),
            ParameterType::Int32 => ParameterValue::Int32 { value: None, hex: false },
            ParameterType::VInt32 => ParameterValue::VInt32 { values: Vec::new(), hex: false },
            ParameterType::UInt32 => ParameterValue::UInt32 { value: None, hex: false },
            ParameterType::VUInt32 => ParameterValue::VUInt32 { values: Vec::new(), hex: false },
            ParameterType::Double => ParameterValue::Double(None),
            ParameterType::VDouble => ParameterValue::VDouble(Vec::new()),
            ParameterType::String => ParameterValue::String(None),
            ParameterType::VString => ParameterValue::VString(Vec::new()),
            ParameterType::EventId => ParameterValue::EventId(None),
            ParameterType::VEventId => ParameterValue::VEventId(Vec::new()),
            ParameterType::InputTag => ParameterValue::InputTag(None),
            ParameterType::VInputTag => ParameterValue::VInputTag(Vec::new()),
            ParameterType::FileInPath => ParameterValue::FileInPath(None),
            ParameterType::PSet => ParameterValue::PSet(Vec::new()),
            ParameterType::VPSet => ParameterValue::VPSet(Vec::new()),
        }
    }
}

impl Parameter {
    pub fn new(name: impl Into<String>, tracked: bool, value: ParameterValue) -> Self {
        Self {
            name: name.into(),
            tracked,
            value,
        }
    }

    pub fn tracked(name: impl Into<String>, value: ParameterValue) -> Self {
        Self::new(name, true, value)
    }

    pub fn untracked(name: impl Into<String>, value: ParameterValue) -> Self {
        Self::new(name, false, value)
    }

    pub fn parameter_type(&self) -> ParameterType {
        self.value.parameter_type()
    }

    pub fn is_set(&self) -> bool {
        self.value.is_set()
    }

    /// Nested parameters of a `PSet`, empty for everything else.
    pub fn children(&self) -> &[Parameter] {
        match &self.value {
            ParameterValue::PSet(children) => children,
            _ => &[],
        }
    }
}

impl ParameterSet {
    pub fn new(name: impl Into<String>, tracked: bool, parameters: Vec<Parameter>) -> Self {
        Self {
            name: name.into(),
            tracked,
            parameters,
        }
    }

    /// Looks up a direct child by name.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Finds the first tracked leaf without a value, depth first, returning its
/// dotted path.
pub fn first_unset_tracked(parameters: &[Parameter]) -> Option<String> {
    for parameter in parameters {
        match &parameter.value {
            ParameterValue::PSet(children) => {
                if let Some(path) = first_unset_tracked(children) {
                    return Some(format!("{}.{}", parameter.name, path));
                }
            }
            ParameterValue::VPSet(sets) => {
                for (i, set) in sets.iter().enumerate() {
                    if let Some(path) = first_unset_tracked(&set.parameters) {
                        return Some(format!("{}[{}].{}", parameter.name, i, path));
                    }
                }
            }
            _ if parameter.tracked && !parameter.is_set() => return Some(parameter.name.clone()),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_text_forms() {
        let short: EventId = "1:42".parse().unwrap();
        assert_eq!(short, EventId { run: 1, lumi: None, event: 42 });
        assert_eq!(short.to_string(), "1:42");

        let long: EventId = "3:7:99".parse().unwrap();
        assert_eq!(long.lumi, Some(7));
        assert_eq!(long.to_string(), "3:7:99");

        assert!("x:1".parse::<EventId>().is_err());
        assert!("1".parse::<EventId>().is_err());
    }

    #[test]
    fn input_tag_text_forms() {
        let tag: InputTag = "hltTracks".parse().unwrap();
        assert_eq!(tag, InputTag::new("hltTracks"));
        assert_eq!(tag.to_string(), "hltTracks");

        let full: InputTag = "raw::HLT".parse().unwrap();
        assert_eq!(full.instance, "");
        assert_eq!(full.process, "HLT");
        assert_eq!(full.to_string(), "raw::HLT");

        let inst: InputTag = "digis:ecal".parse().unwrap();
        assert_eq!(inst.to_string(), "digis:ecal");
    }

    #[test]
    fn first_unset_tracked_reports_nested_path() {
        let params = vec![
            Parameter::untracked("verbose", ParameterValue::Bool(None)),
            Parameter::tracked(
                "cuts",
                ParameterValue::PSet(vec![Parameter::tracked("ptMin", ParameterValue::Double(None))]),
            ),
        ];
        assert_eq!(first_unset_tracked(&params), Some("cuts.ptMin".to_string()));

        let ok = vec![Parameter::untracked("verbose", ParameterValue::Bool(None))];
        assert_eq!(first_unset_tracked(&ok), None);
    }
}
