//! Flattening of parameter trees into typed rows and reconstruction of
//! trees from staged rows.

use std::collections::{HashMap, HashSet};

use crate::error::{ConfDbError, Result};
use crate::model::{
    EventId, Id, InputTag, Parameter, ParameterSet, ParameterType, ParameterValue, TypeRegistry,
};
use crate::store::rows::{
    EdgeKind, EdgeRow, ParameterInsert, ParameterRow, StoredValue, ValueInsert, ValueRow,
    WriteStage,
};

const FLATTEN: &str = "flatten parameters";
const UNFLATTEN: &str = "unflatten parameters";

/// Number of identities `flatten` draws for `parameters`, counting nested
/// sets and skipping untracked leaves without a value.
pub fn identities_needed(parameters: &[Parameter]) -> usize {
    parameters
        .iter()
        .filter(|p| p.is_set() || p.tracked)
        .map(|p| {
            1 + match &p.value {
                ParameterValue::PSet(children) => identities_needed(children),
                ParameterValue::VPSet(sets) => sets
                    .iter()
                    .map(|s| 1 + identities_needed(&s.parameters))
                    .sum(),
                _ => 0,
            }
        })
        .sum()
}

/// Writes `parameters` under `owner` into `stage`, drawing one identity per
/// written node from `ids`.
///
/// Positions are dense over the written parameters. Untracked parameters
/// without a value are skipped; a tracked one is an integrity error.
pub fn flatten(
    owner: Id,
    parameters: &[Parameter],
    registry: &TypeRegistry,
    ids: &mut impl Iterator<Item = Id>,
    stage: &mut WriteStage,
) -> Result<()> {
    let mut position = 0usize;
    for parameter in parameters {
        if !parameter.is_set() {
            if parameter.tracked {
                return Err(ConfDbError::integrity(
                    FLATTEN,
                    format!("tracked parameter '{}' of owner {} has no value", parameter.name, owner),
                ));
            }
            continue;
        }

        let id = write_node(
            owner,
            position,
            parameter.parameter_type(),
            &parameter.name,
            parameter.tracked,
            parameter.value.hex(),
            registry,
            ids,
            stage,
        )?;
        position += 1;

        match &parameter.value {
            ParameterValue::PSet(children) => flatten(id, children, registry, ids, stage)?,
            ParameterValue::VPSet(sets) => {
                for (i, set) in sets.iter().enumerate() {
                    let set_id = write_node(
                        id,
                        i,
                        ParameterType::PSet,
                        &set.name,
                        set.tracked,
                        false,
                        registry,
                        ids,
                        stage,
                    )?;
                    flatten(set_id, &set.parameters, registry, ids, stage)?;
                }
            }
            leaf => {
                let parameter_type = leaf.parameter_type();
                for row in encode_leaf(id, leaf) {
                    stage.values.push(ValueInsert { parameter_type, row });
                }
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_node(
    owner: Id,
    position: usize,
    parameter_type: ParameterType,
    name: &str,
    tracked: bool,
    hex: bool,
    registry: &TypeRegistry,
    ids: &mut impl Iterator<Item = Id>,
    stage: &mut WriteStage,
) -> Result<Id> {
    let id = ids.next().ok_or_else(|| {
        ConfDbError::integrity(FLATTEN, format!("no identity left for parameter '{}'", name))
    })?;
    let type_id = registry.parameter_type_id(parameter_type).ok_or_else(|| {
        ConfDbError::integrity(FLATTEN, format!("parameter type {} is not registered", parameter_type))
    })?;
    stage.parameters.push(ParameterInsert {
        id,
        type_id,
        parameter_type,
        name: name.to_string(),
        tracked,
        hex,
    });
    stage
        .edges
        .push(EdgeRow::new(EdgeKind::Parameter, owner, id, position));
    Ok(id)
}

fn scalar(parameter_id: Id, value: StoredValue, hex: bool) -> ValueRow {
    ValueRow {
        parameter_id,
        position: None,
        value,
        hex,
    }
}

fn element(parameter_id: Id, position: usize, value: StoredValue, hex: bool) -> ValueRow {
    ValueRow {
        parameter_id,
        position: Some(position as i32),
        value,
        hex,
    }
}

fn encode_leaf(id: Id, value: &ParameterValue) -> Vec<ValueRow> {
    match value {
        ParameterValue::Bool(v) => v.iter().map(|b| scalar(id, StoredValue::Bool(*b), false)).collect(),
        ParameterValue::Int32 { value, hex } => value
            .iter()
            .map(|v| scalar(id, StoredValue::Int(*v as i64), *hex))
            .collect(),
        ParameterValue::UInt32 { value, hex } => value
            .iter()
            .map(|v| scalar(id, StoredValue::Int(*v as i64), *hex))
            .collect(),
        ParameterValue::Double(v) => v.iter().map(|d| scalar(id, StoredValue::Real(*d), false)).collect(),
        ParameterValue::String(v) | ParameterValue::FileInPath(v) => v
            .iter()
            .map(|s| scalar(id, StoredValue::Text(s.clone()), false))
            .collect(),
        ParameterValue::EventId(v) => v
            .iter()
            .map(|e| scalar(id, StoredValue::Text(e.to_string()), false))
            .collect(),
        ParameterValue::InputTag(v) => v
            .iter()
            .map(|t| scalar(id, StoredValue::Text(t.to_string()), false))
            .collect(),
        ParameterValue::VInt32 { values, hex } => values
            .iter()
            .enumerate()
            .map(|(i, v)| element(id, i, StoredValue::Int(*v as i64), *hex))
            .collect(),
        ParameterValue::VUInt32 { values, hex } => values
            .iter()
            .enumerate()
            .map(|(i, v)| element(id, i, StoredValue::Int(*v as i64), *hex))
            .collect(),
        ParameterValue::VDouble(values) => values
            .iter()
            .enumerate()
            .map(|(i, v)| element(id, i, StoredValue::Real(*v), false))
            .collect(),
        ParameterValue::VString(values) => values
            .iter()
            .enumerate()
            .map(|(i, v)| element(id, i, StoredValue::Text(v.clone()), false))
            .collect(),
        ParameterValue::VEventId(values) => values
            .iter()
            .enumerate()
            .map(|(i, v)| element(id, i, StoredValue::Text(v.to_string()), false))
            .collect(),
        ParameterValue::VInputTag(values) => values
            .iter()
            .enumerate()
            .map(|(i, v)| element(id, i, StoredValue::Text(v.to_string()), false))
            .collect(),
        ParameterValue::PSet(_) | ParameterValue::VPSet(_) => Vec::new(),
    }
}

/// How a tracked leaf without value rows is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Instances: a tracked leaf must carry a value.
    Strict,
    /// Templates: unset tracked leaves are schema entries without default.
    Lenient,
}

/// Decoded parameter list with the number of position gaps found.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub parameters: Vec<Parameter>,
    pub missing: usize,
}

/// Staged parameter and value rows grouped by parent and position.
pub struct ParameterIndex<'a> {
    registry: &'a TypeRegistry,
    children: HashMap<Id, Vec<&'a ParameterRow>>,
    values: HashMap<Id, Vec<&'a ValueRow>>,
}

impl<'a> ParameterIndex<'a> {
    pub fn new(registry: &'a TypeRegistry, parameters: &'a [ParameterRow], values: &'a [ValueRow]) -> Self {
        let mut children: HashMap<Id, Vec<&ParameterRow>> = HashMap::new();
        for row in parameters {
            children.entry(row.parent_id).or_default().push(row);
        }
        for rows in children.values_mut() {
            rows.sort_by_key(|r| r.position);
        }

        let mut grouped: HashMap<Id, Vec<&ValueRow>> = HashMap::new();
        for row in values {
            grouped.entry(row.parameter_id).or_default().push(row);
        }
        for rows in grouped.values_mut() {
            rows.sort_by_key(|r| r.position.unwrap_or(0));
        }

        Self {
            registry,
            children,
            values: grouped,
        }
    }

    /// Rebuilds the parameter tree below `owner`.
    ///
    /// A position gap leaves its slot absent and is counted in
    /// `Decoded::missing`. In strict mode a tracked leaf without value fails
    /// the whole owner.
    pub fn unflatten(&self, owner: Id, mode: DecodeMode) -> Result<Decoded> {
        let mut missing = 0;
        let mut visiting = HashSet::new();
        let parameters = self.decode_children(owner, mode, &mut missing, &mut visiting)?;
        Ok(Decoded { parameters, missing })
    }

    fn decode_children(
        &self,
        owner: Id,
        mode: DecodeMode,
        missing: &mut usize,
        visiting: &mut HashSet<Id>,
    ) -> Result<Vec<Parameter>> {
        if !visiting.insert(owner) {
            return Err(ConfDbError::integrity(
                UNFLATTEN,
                format!("parameter {} is its own ancestor", owner),
            ));
        }

        let rows = self.children.get(&owner).map(Vec::as_slice).unwrap_or(&[]);
        let mut parameters = Vec::with_capacity(rows.len());
        let mut expected = 0i32;
        for row in rows {
            if row.position > expected {
                *missing += (row.position - expected) as usize;
            }
            expected = row.position.max(expected) + 1;
            parameters.push(self.decode_row(row, mode, missing, visiting)?);
        }

        visiting.remove(&owner);
        Ok(parameters)
    }

    fn decode_row(
        &self,
        row: &ParameterRow,
        mode: DecodeMode,
        missing: &mut usize,
        visiting: &mut HashSet<Id>,
    ) -> Result<Parameter> {
        let parameter_type = self.registry.parameter_type(row.type_id).ok_or_else(|| {
            ConfDbError::integrity(
                UNFLATTEN,
                format!("parameter '{}' has unknown type id {}", row.name, row.type_id),
            )
        })?;

        let value = match parameter_type {
            ParameterType::PSet => {
                ParameterValue::PSet(self.decode_children(row.id, mode, missing, visiting)?)
            }
            ParameterType::VPSet => {
                let elements = self.children.get(&row.id).map(Vec::as_slice).unwrap_or(&[]);
                let mut sets = Vec::with_capacity(elements.len());
                let mut expected = 0i32;
                for element in elements {
                    if element.position > expected {
                        *missing += (element.position - expected) as usize;
                    }
                    expected = element.position.max(expected) + 1;
                    sets.push(ParameterSet {
                        name: element.name.clone(),
                        tracked: element.tracked,
                        parameters: self.decode_children(element.id, mode, missing, visiting)?,
                    });
                }
                ParameterValue::VPSet(sets)
            }
            leaf => {
                let values = self.values.get(&row.id).map(Vec::as_slice).unwrap_or(&[]);
                decode_leaf(leaf, row.hex, values).map_err(|detail| {
                    ConfDbError::integrity(UNFLATTEN, format!("parameter '{}': {}", row.name, detail))
                })?
            }
        };

        if mode == DecodeMode::Strict && row.tracked && !value.is_set() {
            return Err(ConfDbError::integrity(
                UNFLATTEN,
                format!("tracked parameter '{}' (id {}) has no value", row.name, row.id),
            ));
        }

        Ok(Parameter {
            name: row.name.clone(),
            tracked: row.tracked,
            value,
        })
    }
}

fn as_int(value: &StoredValue) -> std::result::Result<i64, String> {
    match value {
        StoredValue::Int(v) => Ok(*v),
        other => Err(format!("expected integer, found {:?}", other)),
    }
}

fn as_real(value: &StoredValue) -> std::result::Result<f64, String> {
    match value {
        StoredValue::Real(v) => Ok(*v),
        StoredValue::Int(v) => Ok(*v as f64),
        other => Err(format!("expected real, found {:?}", other)),
    }
}

fn as_text(value: &StoredValue) -> std::result::Result<String, String> {
    match value {
        StoredValue::Text(v) => Ok(v.clone()),
        other => Err(format!("expected text, found {:?}", other)),
    }
}

fn as_i32(value: &StoredValue) -> std::result::Result<i32, String> {
    let v = as_int(value)?;
    i32::try_from(v).map_err(|_| format!("{} out of int32 range", v))
}

fn as_u32(value: &StoredValue) -> std::result::Result<u32, String> {
    let v = as_int(value)?;
    u32::try_from(v).map_err(|_| format!("{} out of uint32 range", v))
}

fn decode_leaf(
    parameter_type: ParameterType,
    hex: bool,
    values: &[&ValueRow],
) -> std::result::Result<ParameterValue, String> {
    let first = values.first().map(|r| &r.value);
    let each = |f: fn(&StoredValue) -> std::result::Result<String, String>| {
        values.iter().map(|r| f(&r.value)).collect::<std::result::Result<Vec<_>, _>>()
    };

    let value = match parameter_type {
        ParameterType::Bool => ParameterValue::Bool(match first {
            Some(StoredValue::Bool(b)) => Some(*b),
            Some(other) => return Err(format!("expected bool, found {:?}", other)),
            None => None,
        }),
        ParameterType::Int32 => ParameterValue::Int32 {
            value: first.map(as_i32).transpose()?,
            hex,
        },
        ParameterType::UInt32 => ParameterValue::UInt32 {
            value: first.map(as_u32).transpose()?,
            hex,
        },
        ParameterType::Double => ParameterValue::Double(first.map(as_real).transpose()?),
        ParameterType::String => ParameterValue::String(first.map(as_text).transpose()?),
        ParameterType::FileInPath => ParameterValue::FileInPath(first.map(as_text).transpose()?),
        ParameterType::EventId => ParameterValue::EventId(
            first.map(as_text).transpose()?.map(|s| s.parse::<EventId>()).transpose()?,
        ),
        ParameterType::InputTag => ParameterValue::InputTag(
            first.map(as_text).transpose()?.map(|s| s.parse::<InputTag>()).transpose()?,
        ),
        ParameterType::VInt32 => ParameterValue::VInt32 {
            values: values.iter().map(|r| as_i32(&r.value)).collect::<std::result::Result<_, _>>()?,
            hex,
        },
        ParameterType::VUInt32 => ParameterValue::VUInt32 {
            values: values.iter().map(|r| as_u32(&r.value)).collect::<std::result::Result<_, _>>()?,
            hex,
        },
        ParameterType::VDouble => ParameterValue::VDouble(
            values.iter().map(|r| as_real(&r.value)).collect::<std::result::Result<_, _>>()?,
        ),
        ParameterType::VString => ParameterValue::VString(each(as_text)?),
        ParameterType::VEventId => ParameterValue::VEventId(
            each(as_text)?
                .iter()
                .map(|s| s.parse::<EventId>())
                .collect::<std::result::Result<_, _>>()?,
        ),
        ParameterType::VInputTag => ParameterValue::VInputTag(
            each(as_text)?
                .iter()
                .map(|s| s.parse::<InputTag>())
                .collect::<std::result::Result<_, _>>()?,
        ),
        ParameterType::PSet | ParameterType::VPSet => {
            return Err(format!("{} is not a leaf type", parameter_type))
        }
    };
    Ok(value)
}

/// Converts the rows of a write stage into the staged form read back by
/// `ParameterIndex`, resolving each node's position from its edge.
pub fn staged_rows(stage: &WriteStage) -> (Vec<ParameterRow>, Vec<ValueRow>) {
    let placement: HashMap<Id, &EdgeRow> = stage
        .edges
        .iter()
        .filter(|e| e.kind == EdgeKind::Parameter)
        .map(|e| (e.child_id, e))
        .collect();
    let parameters = stage
        .parameters
        .iter()
        .filter_map(|p| {
            placement.get(&p.id).map(|edge| ParameterRow {
                id: p.id,
                type_id: p.type_id,
                name: p.name.clone(),
                tracked: p.tracked,
                hex: p.hex,
                position: edge.position,
                parent_id: edge.parent_id,
            })
        })
        .collect();
    let values = stage.values.iter().map(|v| v.row.clone()).collect();
    (parameters, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Parameter> {
        vec![
            Parameter::tracked("enabled", ParameterValue::Bool(Some(true))),
            Parameter::tracked("mask", ParameterValue::UInt32 { value: Some(0xff), hex: true }),
            Parameter::untracked("debug", ParameterValue::Bool(None)),
            Parameter::tracked("thresholds", ParameterValue::VDouble(vec![0.5, 1.5, 2.5])),
            Parameter::tracked(
                "src",
                ParameterValue::InputTag(Some(InputTag {
                    label: "hltTracks".into(),
                    instance: "".into(),
                    process: "HLT".into(),
                })),
            ),
            Parameter::tracked(
                "cuts",
                ParameterValue::PSet(vec![
                    Parameter::tracked("ptMin", ParameterValue::Double(Some(2.0))),
                    Parameter::tracked("first", ParameterValue::EventId(Some(EventId { run: 1, lumi: None, event: 5 }))),
                ]),
            ),
            Parameter::tracked(
                "bins",
                ParameterValue::VPSet(vec![
                    ParameterSet::new("", true, vec![Parameter::tracked("lo", ParameterValue::Int32 { value: Some(-3), hex: false })]),
                    ParameterSet::new("", true, vec![Parameter::tracked("lo", ParameterValue::Int32 { value: Some(4), hex: false })]),
                ]),
            ),
        ]
    }

    fn flatten_sample(params: &[Parameter]) -> WriteStage {
        let registry = TypeRegistry::standard();
        let mut stage = WriteStage::new("test");
        let mut ids = 100..;
        flatten(1, params, &registry, &mut ids, &mut stage).unwrap();
        stage
    }

    #[test]
    fn flatten_skips_untracked_unset_and_keeps_positions_dense() {
        let params = sample();
        let stage = flatten_sample(&params);

        assert_eq!(stage.parameters.len(), identities_needed(&params));
        assert!(stage.parameters.iter().all(|p| p.name != "debug"));

        let top: Vec<i32> = stage
            .edges
            .iter()
            .filter(|e| e.parent_id == 1)
            .map(|e| e.position)
            .collect();
        assert_eq!(top, vec![0, 1, 2, 3, 4, 5]);

        let mask = stage.parameters.iter().find(|p| p.name == "mask").unwrap();
        let mask_row = stage.values.iter().find(|v| v.row.parameter_id == mask.id).unwrap();
        assert!(mask_row.row.hex);
        assert_eq!(mask_row.row.value, StoredValue::Int(255));
    }

    #[test]
    fn flatten_rejects_tracked_unset() {
        let registry = TypeRegistry::standard();
        let mut stage = WriteStage::new("test");
        let params = vec![Parameter::tracked("ptMin", ParameterValue::Double(None))];
        let err = flatten(1, &params, &registry, &mut (1..), &mut stage).unwrap_err();
        assert!(matches!(err, ConfDbError::Integrity { .. }));
    }

    #[test]
    fn unflatten_restores_tree() {
        let params = sample();
        let stage = flatten_sample(&params);
        let (rows, values) = staged_rows(&stage);
        let registry = TypeRegistry::standard();
        let index = ParameterIndex::new(&registry, &rows, &values);

        let decoded = index.unflatten(1, DecodeMode::Strict).unwrap();
        let expected: Vec<Parameter> = params.into_iter().filter(|p| p.name != "debug").collect();
        assert_eq!(decoded.parameters, expected);
        assert_eq!(decoded.missing, 0);
    }

    #[test]
    fn empty_hex_vector_keeps_its_flag() {
        let params = vec![
            Parameter::tracked("masks", ParameterValue::VUInt32 { values: vec![], hex: true }),
            Parameter::tracked("offsets", ParameterValue::VInt32 { values: vec![], hex: false }),
        ];
        let stage = flatten_sample(&params);
        assert!(stage.values.is_empty());
        assert!(stage.parameters[0].hex);

        let (rows, values) = staged_rows(&stage);
        let registry = TypeRegistry::standard();
        let decoded = ParameterIndex::new(&registry, &rows, &values)
            .unflatten(1, DecodeMode::Strict)
            .unwrap();
        assert_eq!(decoded.parameters, params);
    }

    #[test]
    fn unflatten_counts_position_gaps() {
        let registry = TypeRegistry::standard();
        let bool_id = registry.parameter_type_id(ParameterType::Bool).unwrap();
        let rows = vec![
            ParameterRow { id: 10, type_id: bool_id, name: "a".into(), tracked: false, hex: false, position: 0, parent_id: 1 },
            ParameterRow { id: 11, type_id: bool_id, name: "c".into(), tracked: false, hex: false, position: 2, parent_id: 1 },
        ];
        let values = vec![
            ValueRow { parameter_id: 10, position: None, value: StoredValue::Bool(true), hex: false },
            ValueRow { parameter_id: 11, position: None, value: StoredValue::Bool(false), hex: false },
        ];
        let index = ParameterIndex::new(&registry, &rows, &values);
        let decoded = index.unflatten(1, DecodeMode::Strict).unwrap();
        assert_eq!(decoded.parameters.len(), 2);
        assert_eq!(decoded.missing, 1);
    }

    #[test]
    fn missing_value_is_fatal_only_when_tracked() {
        let registry = TypeRegistry::standard();
        let int_id = registry.parameter_type_id(ParameterType::Int32).unwrap();
        let untracked = vec![ParameterRow { id: 10, type_id: int_id, name: "n".into(), tracked: false, hex: false, position: 0, parent_id: 1 }];
        let index = ParameterIndex::new(&registry, &untracked, &[]);
        let decoded = index.unflatten(1, DecodeMode::Strict).unwrap();
        assert_eq!(decoded.parameters[0].value, ParameterValue::Int32 { value: None, hex: false });

        let tracked = vec![ParameterRow { id: 10, type_id: int_id, name: "n".into(), tracked: true, hex: false, position: 0, parent_id: 1 }];
        let index = ParameterIndex::new(&registry, &tracked, &[]);
        assert!(index.unflatten(1, DecodeMode::Strict).is_err());
        assert!(index.unflatten(1, DecodeMode::Lenient).is_ok());
    }
}
