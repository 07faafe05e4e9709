//! Structural diff between prototypes.
//!
//! The tree is keyed by field name. Dicts expand per key and record lists
//! (`tags`, `attrs`, any list of tuples) expand per record identity, down to
//! `max_depth`; below that values are compared whole.
//!
//! [`Slot::Absent`] is what separates "the new prototype does not mention
//! this field" from "the new prototype clears it". With `implicit_keep` the
//! former yields KEEP, which is what makes instance updates safe.

use std::collections::BTreeMap;
use std::fmt;

use crate::prototype::entity::{prototype_from_entity, EntityRecord};
use crate::prototype::errors::ProtoError;
use crate::prototype::normalize::normalize;
use crate::prototype::types::{Prototype, RawPrototype};
use crate::prototype::value::{Slot, Value};

pub const DEFAULT_DIFF_MAX_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiffInstruction {
    Keep,
    Add,
    Remove,
    Update,
    /// Only produced by [`flatten_diff`]: clear the field, then apply the new value.
    Replace,
}

impl fmt::Display for DiffInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiffInstruction::Keep => "KEEP",
            DiffInstruction::Add => "ADD",
            DiffInstruction::Remove => "REMOVE",
            DiffInstruction::Update => "UPDATE",
            DiffInstruction::Replace => "REPLACE",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiffNode {
    Leaf {
        old: Slot,
        new: Slot,
        instruction: DiffInstruction,
    },
    Branch(BTreeMap<String, DiffNode>),
}

impl DiffNode {
    fn leaf(old: Slot, new: Slot, instruction: DiffInstruction) -> Self {
        DiffNode::Leaf {
            old,
            new,
            instruction,
        }
    }

    /// The instruction of a leaf.
    pub fn instruction(&self) -> Option<DiffInstruction> {
        match self {
            DiffNode::Leaf { instruction, .. } => Some(*instruction),
            DiffNode::Branch(_) => None,
        }
    }

    /// Child node of a branch.
    pub fn get(&self, key: &str) -> Option<&DiffNode> {
        match self {
            DiffNode::Branch(children) => children.get(key),
            DiffNode::Leaf { .. } => None,
        }
    }

    /// Every leaf instruction under this node.
    pub fn instructions(&self) -> Vec<DiffInstruction> {
        let mut out = Vec::new();
        self.collect_instructions(&mut out);
        out
    }

    fn collect_instructions(&self, out: &mut Vec<DiffInstruction>) {
        match self {
            DiffNode::Leaf { instruction, .. } => out.push(*instruction),
            DiffNode::Branch(children) => {
                for child in children.values() {
                    child.collect_instructions(out);
                }
            }
        }
    }
}

/// Diff keyed by top-level field name.
pub type DiffTree = BTreeMap<String, DiffNode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    pub max_depth: usize,
    /// Normalize both sides first.
    pub homogenize: bool,
    /// A field the new side does not mention is KEEP instead of REMOVE.
    pub implicit_keep: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_DIFF_MAX_DEPTH,
            homogenize: false,
            implicit_keep: false,
        }
    }
}

/// Compare two raw prototypes.
pub fn diff(old: &RawPrototype, new: &RawPrototype, options: &DiffOptions) -> Result<DiffTree, ProtoError> {
    if options.homogenize {
        let old = homogenize(old)?;
        let new = homogenize(new)?;
        return diff_maps(&old, &new, options);
    }
    diff_maps(old, new, options)
}

/// Compare two canonical prototypes.
pub fn diff_prototypes(old: &Prototype, new: &Prototype, options: &DiffOptions) -> Result<DiffTree, ProtoError> {
    diff(&old.to_raw(), &new.to_raw(), options)
}

/// Normalized form of `raw` without a synthesized key, so two keyless
/// prototypes do not differ by a random key.
fn homogenize(raw: &RawPrototype) -> Result<RawPrototype, ProtoError> {
    let mut canonical = normalize(raw, &[])?.to_raw();
    if !raw.contains_key("prototype_key") {
        canonical.remove("prototype_key");
    }
    Ok(canonical)
}

fn diff_maps(old: &RawPrototype, new: &RawPrototype, options: &DiffOptions) -> Result<DiffTree, ProtoError> {
    let mut tree = DiffTree::new();
    for key in old.keys().chain(new.keys()) {
        if tree.contains_key(key) {
            continue;
        }
        let node = diff_slots(
            Slot::from_option(old.get(key)),
            Slot::from_option(new.get(key)),
            1,
            options,
        )?;
        tree.insert(key.clone(), node);
    }
    Ok(tree)
}

#[derive(PartialEq)]
enum Shape {
    Absent,
    Dict,
    Sequence,
    Scalar(&'static str),
}

fn shape(slot: &Slot) -> Shape {
    match slot {
        Slot::Absent => Shape::Absent,
        Slot::Present(Value::Dict(_)) => Shape::Dict,
        Slot::Present(Value::List(_)) | Slot::Present(Value::Tuple(_)) => Shape::Sequence,
        Slot::Present(other) => Shape::Scalar(other.type_name()),
    }
}

fn diff_slots(old: Slot, new: Slot, depth: usize, options: &DiffOptions) -> Result<DiffNode, ProtoError> {
    use DiffInstruction::*;

    // empty and absent compare equal
    if !old.is_truthy() && !new.is_truthy() {
        return Ok(DiffNode::leaf(old, new, Keep));
    }

    let expand = depth < options.max_depth;
    if shape(&old) != shape(&new) {
        if old.is_truthy() && !new.is_truthy() {
            if options.implicit_keep && new == Slot::Absent {
                return Ok(DiffNode::leaf(old, Slot::Absent, Keep));
            }
            if expand {
                if let Some(parts) = split_parts(old.value())? {
                    let branch = parts
                        .into_iter()
                        .map(|(k, v)| (k, DiffNode::leaf(Slot::Present(v), Slot::Absent, Remove)))
                        .collect();
                    return Ok(DiffNode::Branch(branch));
                }
            }
            return Ok(DiffNode::leaf(old, new, Remove));
        }
        if !old.is_truthy() && new.is_truthy() {
            if expand {
                if let Some(parts) = split_parts(new.value())? {
                    let branch = parts
                        .into_iter()
                        .map(|(k, v)| (k, DiffNode::leaf(Slot::Absent, Slot::Present(v), Add)))
                        .collect();
                    return Ok(DiffNode::Branch(branch));
                }
            }
            return Ok(DiffNode::leaf(old, new, Add));
        }
        return Ok(DiffNode::leaf(old, new, Update));
    }

    if expand {
        if let (Some(old_parts), Some(new_parts)) = (split_parts(old.value())?, split_parts(new.value())?) {
            let mut branch = BTreeMap::new();
            for key in old_parts.keys().chain(new_parts.keys()) {
                if branch.contains_key(key) {
                    continue;
                }
                let node = diff_slots(
                    Slot::from_option(old_parts.get(key)),
                    Slot::from_option(new_parts.get(key)),
                    depth + 1,
                    options,
                )?;
                branch.insert(key.clone(), node);
            }
            return Ok(DiffNode::Branch(branch));
        }
    }

    if old == new {
        Ok(DiffNode::leaf(old, new, Keep))
    } else {
        Ok(DiffNode::leaf(old, new, Update))
    }
}

/// Children of a dict (by key) or a record list (by record identity).
/// `None` for scalars.
fn split_parts(value: Option<&Value>) -> Result<Option<BTreeMap<String, Value>>, ProtoError> {
    match value {
        Some(Value::Dict(map)) => Ok(Some(map.clone())),
        Some(Value::List(items)) | Some(Value::Tuple(items)) => {
            let mut parts = BTreeMap::new();
            for item in items {
                let identity = item.record_identity().ok_or_else(|| {
                    ProtoError::MalformedRecord(format!("record {} has no identity", item.repr()))
                })?;
                parts.insert(identity, item.clone());
            }
            Ok(Some(parts))
        }
        _ => Ok(None),
    }
}

/// One instruction per top-level field.
pub fn flatten_diff(tree: &DiffTree) -> BTreeMap<String, DiffInstruction> {
    use DiffInstruction::*;

    tree.iter()
        .map(|(field, node)| {
            let instructions = node.instructions();
            let root = if instructions.iter().all(|i| *i == Keep) {
                Keep
            } else if instructions.iter().all(|i| matches!(i, Add | Update)) {
                Update
            } else if instructions.iter().all(|i| *i == Remove) {
                Remove
            } else if instructions.contains(&Remove) {
                Replace
            } else {
                Update
            };
            (field.clone(), root)
        })
        .collect()
}

/// Diff a live entity against `prototype` (new side).
///
/// Returns the tree and the prototype reverse-engineered from the entity
/// (old side). `implicit_keep` is forced on: fields the prototype does not
/// mention are left alone.
pub fn diff_against_entity(
    prototype: &Prototype,
    entity: &EntityRecord,
    options: &DiffOptions,
) -> Result<(DiffTree, Prototype), ProtoError> {
    let from_entity = prototype_from_entity(entity);
    let options = DiffOptions {
        implicit_keep: true,
        ..*options
    };
    let tree = diff(&from_entity.to_raw(), &prototype.to_raw(), &options)?;
    Ok((tree, from_entity))
}

/// Human-readable lines, one per changed leaf (all leaves with `verbose`).
pub fn describe_diff(tree: &DiffTree, verbose: bool) -> Vec<String> {
    fn walk(path: &str, node: &DiffNode, verbose: bool, out: &mut Vec<String>) {
        match node {
            DiffNode::Leaf {
                old,
                new,
                instruction,
            } => {
                if verbose || *instruction != DiffInstruction::Keep {
                    out.push(format!("{}: {} -> {} [{}]", path, old, new, instruction));
                }
            }
            DiffNode::Branch(children) => {
                for (key, child) in children {
                    walk(&format!("{}.{}", path, key), child, verbose, out);
                }
            }
        }
    }

    let mut out = Vec::new();
    for (field, node) in tree {
        walk(field, node, verbose, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prototype::types::{AttrSpec, TagSpec};
    use DiffInstruction::*;

    fn raw(pairs: &[(&str, Value)]) -> RawPrototype {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn attr(name: &str, value: &str) -> Value {
        Value::Tuple(vec![Value::str(name), Value::str(value), Value::None, Value::str("")])
    }

    fn sample() -> RawPrototype {
        raw(&[
            ("prototype_key", Value::str("goblin")),
            ("key", Value::str("goblin grunt")),
            ("attrs", Value::List(vec![attr("a", "1"), attr("b", "2")])),
            ("tags", Value::List(vec![Value::str("green")])),
            ("stats", Value::Dict(raw(&[("hp", Value::Int(3))]))),
        ])
    }

    fn all_leaves_keep(node: &DiffNode) -> bool {
        match node {
            DiffNode::Leaf {
                old,
                new,
                instruction,
            } => *instruction == Keep && old == new,
            DiffNode::Branch(children) => children.values().all(all_leaves_keep),
        }
    }

    #[test]
    fn test_self_diff_is_all_keep() {
        let p = sample();
        let tree = diff(&p, &p, &DiffOptions::default()).unwrap();
        assert!(tree.values().all(all_leaves_keep));
        assert!(flatten_diff(&tree).values().all(|i| *i == Keep));
    }

    #[test]
    fn test_record_add_expands_per_identity() {
        let old = raw(&[("attrs", Value::List(vec![attr("a", "1")]))]);
        let new = raw(&[("attrs", Value::List(vec![attr("a", "1"), attr("b", "2")]))]);
        let tree = diff(&old, &new, &DiffOptions::default()).unwrap();
        let attrs = &tree["attrs"];
        assert_eq!(attrs.get("a").and_then(DiffNode::instruction), Some(Keep));
        assert_eq!(attrs.get("b").and_then(DiffNode::instruction), Some(Add));
        assert_eq!(flatten_diff(&tree)["attrs"], Update);
    }

    #[test]
    fn test_absent_field_remove_vs_implicit_keep() {
        let old = sample();
        let mut new = sample();
        new.remove("key");
        new.remove("attrs");

        let tree = diff(&old, &new, &DiffOptions::default()).unwrap();
        assert_eq!(tree["key"].instruction(), Some(Remove));
        assert_eq!(tree["attrs"].get("a").and_then(DiffNode::instruction), Some(Remove));
        assert_eq!(flatten_diff(&tree)["attrs"], Remove);

        let keep = DiffOptions {
            implicit_keep: true,
            ..Default::default()
        };
        let tree = diff(&old, &new, &keep).unwrap();
        assert_eq!(tree["key"].instruction(), Some(Keep));
        assert_eq!(tree["attrs"].instruction(), Some(Keep));
    }

    #[test]
    fn test_explicit_empty_is_not_implicit() {
        let old = sample();
        let mut new = sample();
        new.insert("key".into(), Value::str(""));
        let keep = DiffOptions {
            implicit_keep: true,
            ..Default::default()
        };
        let tree = diff(&old, &new, &keep).unwrap();
        assert_eq!(tree["key"].instruction(), Some(Remove));
    }

    #[test]
    fn test_empty_and_absent_diff_as_keep() {
        let old = raw(&[("aliases", Value::List(vec![]))]);
        let tree = diff(&old, &RawPrototype::new(), &DiffOptions::default()).unwrap();
        assert_eq!(tree["aliases"].instruction(), Some(Keep));
    }

    #[test]
    fn test_mixed_remove_flattens_to_replace() {
        let old = raw(&[("attrs", Value::List(vec![attr("a", "1"), attr("b", "2")]))]);
        let new = raw(&[("attrs", Value::List(vec![attr("a", "9")]))]);
        let tree = diff(&old, &new, &DiffOptions::default()).unwrap();
        assert_eq!(tree["attrs"].get("a").and_then(DiffNode::instruction), Some(Update));
        assert_eq!(tree["attrs"].get("b").and_then(DiffNode::instruction), Some(Remove));
        assert_eq!(flatten_diff(&tree)["attrs"], Replace);
    }

    #[test]
    fn test_max_depth_compares_whole_values() {
        let old = raw(&[("stats", Value::Dict(raw(&[("hp", Value::Int(3))])))]);
        let new = raw(&[("stats", Value::Dict(raw(&[("hp", Value::Int(4))])))]);
        let shallow = DiffOptions {
            max_depth: 1,
            ..Default::default()
        };
        let tree = diff(&old, &new, &shallow).unwrap();
        assert_eq!(tree["stats"].instruction(), Some(Update));

        let tree = diff(&old, &new, &DiffOptions::default()).unwrap();
        assert_eq!(tree["stats"].get("hp").and_then(DiffNode::instruction), Some(Update));
    }

    #[test]
    fn test_empty_record_is_malformed() {
        let old = raw(&[("attrs", Value::List(vec![Value::Tuple(vec![])]))]);
        let new = raw(&[("attrs", Value::List(vec![attr("a", "1")]))]);
        assert!(matches!(
            diff(&old, &new, &DiffOptions::default()),
            Err(ProtoError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_homogenize_ignores_shape_differences() {
        let old = raw(&[
            ("typeclass", Value::str("T")),
            ("tags", Value::List(vec![Value::str("green")])),
        ]);
        let new = raw(&[
            ("typeclass", Value::str("T")),
            (
                "tags",
                Value::List(vec![Value::Tuple(vec![Value::str("green"), Value::None, Value::None])]),
            ),
        ]);
        let options = DiffOptions {
            homogenize: true,
            ..Default::default()
        };
        let tree = diff(&old, &new, &options).unwrap();
        assert!(flatten_diff(&tree).values().all(|i| *i == Keep));
    }

    #[test]
    fn test_diff_against_entity_keeps_unmentioned_fields() {
        let mut entity = EntityRecord::new("#7", "goblin grunt", "T");
        entity.add_alias("grunt");
        entity.set_attr(AttrSpec::new("hp", Value::Int(3)));
        entity.add_tag(TagSpec::new("green", None, None));

        let proto = Prototype::new("goblin")
            .with_typeclass("T")
            .with_key("goblin boss");
        let (tree, from_entity) =
            diff_against_entity(&proto, &entity, &DiffOptions::default()).unwrap();
        let flat = flatten_diff(&tree);
        assert_eq!(flat["aliases"], Keep);
        assert_eq!(flat["attrs"], Keep);
        assert_eq!(flat["tags"], Keep);
        assert_eq!(flat["key"], Update);
        assert_eq!(flat["typeclass"], Keep);
        assert!(from_entity.prototype_key.unwrap().starts_with("From-Object-"));
    }
}
