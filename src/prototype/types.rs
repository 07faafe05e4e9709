use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::prototype::errors::ProtoError;
use crate::prototype::records::{Keyed, RecordMap};
use crate::prototype::value::Value;

/// Tag category stamped on every spawned entity so instances can be found by template.
pub const PROTOTYPE_TAG_CATEGORY: &str = "from_prototype";

/// Entity class used when nothing in the chain names one.
pub const DEFAULT_BASE_TYPECLASS: &str = "typeclasses.objects.Object";

/// Lock clauses ensured on every validated prototype.
pub const DEFAULT_PROTOTYPE_LOCKS: &str = "spawn:all();edit:all()";

/// Prefix routing a field to the non-persistent attribute side channel.
pub const NDB_PREFIX: &str = "ndb_";

pub const PROTOTYPE_SCHEMA_VERSION: u8 = 1;

/// Loosely shaped prototype as written by hand or read from JSON.
pub type RawPrototype = BTreeMap<String, Value>;

/// Template-management fields; never applied to spawned entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    PrototypeKey,
    PrototypeDesc,
    PrototypeTags,
    PrototypeLocks,
    PrototypeParent,
}

/// Fields that drive entity construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructionField {
    Typeclass,
    Key,
    Aliases,
    Location,
    Home,
    Destination,
    Permissions,
    Locks,
    Tags,
    Attrs,
    Exec,
}

/// Classification of a top-level prototype key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Meta(MetaField),
    Construction(ConstructionField),
    /// `ndb_<name>`: routed to non-persistent attributes.
    NonPersistent(String),
    /// Caller-reserved key kept at the top level by the normalizer.
    Reserved(String),
    /// Anything else; becomes a plain attribute.
    SimpleAttribute(String),
}

const META_FIELDS: &[(&str, MetaField)] = &[
    ("prototype_key", MetaField::PrototypeKey),
    ("prototype_desc", MetaField::PrototypeDesc),
    ("prototype_tags", MetaField::PrototypeTags),
    ("prototype_locks", MetaField::PrototypeLocks),
    ("prototype_parent", MetaField::PrototypeParent),
];

const CONSTRUCTION_FIELDS: &[(&str, ConstructionField)] = &[
    ("typeclass", ConstructionField::Typeclass),
    ("key", ConstructionField::Key),
    ("aliases", ConstructionField::Aliases),
    ("location", ConstructionField::Location),
    ("home", ConstructionField::Home),
    ("destination", ConstructionField::Destination),
    ("permissions", ConstructionField::Permissions),
    ("locks", ConstructionField::Locks),
    ("tags", ConstructionField::Tags),
    ("attrs", ConstructionField::Attrs),
    ("exec", ConstructionField::Exec),
];

impl MetaField {
    pub fn name(self) -> &'static str {
        META_FIELDS
            .iter()
            .find(|(_, f)| *f == self)
            .map(|(n, _)| *n)
            .unwrap_or("prototype_key")
    }
}

impl ConstructionField {
    pub fn name(self) -> &'static str {
        CONSTRUCTION_FIELDS
            .iter()
            .find(|(_, f)| *f == self)
            .map(|(n, _)| *n)
            .unwrap_or("key")
    }
}

impl FieldKind {
    pub fn classify(key: &str, custom_reserved: &[String]) -> FieldKind {
        if let Some((_, meta)) = META_FIELDS.iter().find(|(n, _)| *n == key) {
            return FieldKind::Meta(*meta);
        }
        if let Some((_, field)) = CONSTRUCTION_FIELDS.iter().find(|(n, _)| *n == key) {
            return FieldKind::Construction(*field);
        }
        if let Some(name) = key.strip_prefix(NDB_PREFIX) {
            if !name.is_empty() {
                return FieldKind::NonPersistent(name.to_string());
            }
        }
        if custom_reserved.iter().any(|r| r == key) {
            return FieldKind::Reserved(key.to_string());
        }
        FieldKind::SimpleAttribute(key.to_string())
    }

    pub fn is_meta(key: &str) -> bool {
        META_FIELDS.iter().any(|(n, _)| *n == key)
    }
}

/// `(tagname, category, data)` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSpec {
    pub name: String,
    pub category: Option<String>,
    pub data: Option<String>,
}

impl TagSpec {
    pub fn new(name: &str, category: Option<&str>, data: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            category: category.map(str::to_string),
            data: data.map(str::to_string),
        }
    }

    /// Accepts a bare string or a 1..=3 element tuple/list.
    pub fn from_value(value: &Value) -> Result<Self, ProtoError> {
        match value {
            Value::Str(name) => Ok(TagSpec::new(name, None, None)),
            Value::List(items) | Value::Tuple(items) if (1..=3).contains(&items.len()) => {
                let name = items[0].to_string();
                let category = items.get(1).and_then(optional_text);
                let data = items.get(2).and_then(optional_text);
                Ok(TagSpec {
                    name,
                    category,
                    data,
                })
            }
            other => Err(ProtoError::MalformedRecord(format!(
                "tag must be a string or (name, category, data), got {}",
                other.repr()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Tuple(vec![
            Value::Str(self.name.clone()),
            opt_value(&self.category),
            opt_value(&self.data),
        ])
    }
}

impl Keyed for TagSpec {
    fn identity(&self) -> (String, Option<String>) {
        (self.name.clone(), self.category.clone())
    }
}

/// `(attrname, value, category, lockstring)` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrSpec {
    pub name: String,
    pub value: Value,
    pub category: Option<String>,
    pub lock: String,
}

impl AttrSpec {
    pub fn new(name: &str, value: Value) -> Self {
        Self {
            name: name.to_string(),
            value,
            category: None,
            lock: String::new(),
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_lock(mut self, lock: &str) -> Self {
        self.lock = lock.to_string();
        self
    }

    /// Accepts a 2..=4 element tuple/list.
    pub fn from_value(value: &Value) -> Result<Self, ProtoError> {
        match value {
            Value::List(items) | Value::Tuple(items) if (2..=4).contains(&items.len()) => {
                Ok(AttrSpec {
                    name: items[0].to_string(),
                    value: items[1].clone(),
                    category: items.get(2).and_then(optional_text),
                    lock: items.get(3).and_then(optional_text).unwrap_or_default(),
                })
            }
            other => Err(ProtoError::MalformedRecord(format!(
                "attribute must be (name, value, category, lock), got {}",
                other.repr()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Tuple(vec![
            Value::Str(self.name.clone()),
            self.value.clone(),
            opt_value(&self.category),
            Value::Str(self.lock.clone()),
        ])
    }
}

impl Keyed for AttrSpec {
    fn identity(&self) -> (String, Option<String>) {
        (self.name.clone(), self.category.clone())
    }
}

fn optional_text(value: &Value) -> Option<String> {
    match value {
        Value::None => None,
        Value::Str(s) if s.is_empty() => None,
        other => Some(other.to_string()),
    }
}

fn opt_value(text: &Option<String>) -> Value {
    match text {
        Some(s) => Value::Str(s.clone()),
        None => Value::None,
    }
}

/// One entry of `prototype_parent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParentRef {
    Key(String),
    Inline(Box<Prototype>),
}

impl ParentRef {
    /// Name used in messages and as the identity marker in cycle detection.
    pub fn label(&self) -> String {
        match self {
            ParentRef::Key(key) => key.to_ascii_lowercase(),
            ParentRef::Inline(proto) => format!("<inline {}>", proto.display_name()),
        }
    }
}

/// Canonical prototype. Every field is optional so that "not mentioned" stays
/// distinguishable from "present but empty".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prototype {
    pub prototype_key: Option<String>,
    pub prototype_desc: Option<String>,
    pub prototype_tags: Option<Vec<String>>,
    pub prototype_locks: Option<String>,
    pub prototype_parent: Option<Vec<ParentRef>>,
    pub typeclass: Option<String>,
    pub key: Option<Value>,
    pub aliases: Option<Value>,
    pub location: Option<Value>,
    pub home: Option<Value>,
    pub destination: Option<Value>,
    pub permissions: Option<Value>,
    pub locks: Option<Value>,
    pub tags: Option<RecordMap<TagSpec>>,
    pub attrs: Option<RecordMap<AttrSpec>>,
    pub exec: Option<Value>,
    /// Non-persistent attributes, keyed without the `ndb_` prefix.
    pub ndb: BTreeMap<String, Value>,
    /// Caller-reserved keys the normalizer kept at the top level.
    pub extra: BTreeMap<String, Value>,
}

impl Prototype {
    pub fn new(prototype_key: &str) -> Self {
        Self {
            prototype_key: Some(prototype_key.to_string()),
            ..Default::default()
        }
    }

    pub fn with_typeclass(mut self, typeclass: &str) -> Self {
        self.typeclass = Some(typeclass.to_string());
        self
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(Value::str(key));
        self
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.prototype_parent
            .get_or_insert_with(Vec::new)
            .push(ParentRef::Key(parent.to_string()));
        self
    }

    pub fn with_tag(mut self, tag: TagSpec) -> Self {
        self.tags.get_or_insert_with(RecordMap::new).insert(tag);
        self
    }

    pub fn with_attr(mut self, attr: AttrSpec) -> Self {
        self.attrs.get_or_insert_with(RecordMap::new).insert(attr);
        self
    }

    /// Identifying name for messages: the key, or a placeholder for unnamed prototypes.
    pub fn display_name(&self) -> String {
        self.prototype_key
            .clone()
            .unwrap_or_else(|| "<unnamed>".to_string())
    }

    pub fn parents(&self) -> &[ParentRef] {
        self.prototype_parent.as_deref().unwrap_or(&[])
    }

    pub fn has_exec(&self) -> bool {
        self.exec.as_ref().map(Value::is_truthy).unwrap_or(false)
    }

    /// Canonical field map; only set fields are included.
    pub fn to_raw(&self) -> RawPrototype {
        let mut raw = RawPrototype::new();
        if let Some(k) = &self.prototype_key {
            raw.insert("prototype_key".into(), Value::str(k.clone()));
        }
        if let Some(d) = &self.prototype_desc {
            raw.insert("prototype_desc".into(), Value::str(d.clone()));
        }
        if let Some(t) = &self.prototype_tags {
            raw.insert("prototype_tags".into(), Value::list_of_strings(t.clone()));
        }
        if let Some(l) = &self.prototype_locks {
            raw.insert("prototype_locks".into(), Value::str(l.clone()));
        }
        if let Some(parents) = &self.prototype_parent {
            let mut entries: Vec<Value> = parents
                .iter()
                .map(|p| match p {
                    ParentRef::Key(k) => Value::str(k.clone()),
                    ParentRef::Inline(proto) => Value::Dict(proto.to_raw()),
                })
                .collect();
            let value = if entries.len() == 1 {
                entries.remove(0)
            } else {
                Value::List(entries)
            };
            raw.insert("prototype_parent".into(), value);
        }
        if let Some(t) = &self.typeclass {
            raw.insert("typeclass".into(), Value::str(t.clone()));
        }
        let scalars = [
            ("key", &self.key),
            ("aliases", &self.aliases),
            ("location", &self.location),
            ("home", &self.home),
            ("destination", &self.destination),
            ("permissions", &self.permissions),
            ("locks", &self.locks),
            ("exec", &self.exec),
        ];
        for (name, value) in scalars {
            if let Some(v) = value {
                raw.insert(name.into(), v.clone());
            }
        }
        if let Some(tags) = &self.tags {
            raw.insert(
                "tags".into(),
                Value::List(tags.iter().map(TagSpec::to_value).collect()),
            );
        }
        if let Some(attrs) = &self.attrs {
            raw.insert(
                "attrs".into(),
                Value::List(attrs.iter().map(AttrSpec::to_value).collect()),
            );
        }
        for (name, value) in &self.ndb {
            raw.insert(format!("{}{}", NDB_PREFIX, name), value.clone());
        }
        for (name, value) in &self.extra {
            raw.insert(name.clone(), value.clone());
        }
        raw
    }

    /// Value of one top-level field by name, in canonical shape.
    pub fn field(&self, name: &str) -> Option<Value> {
        self.to_raw().remove(name)
    }

    pub fn to_json(&self) -> serde_json::Value {
        Value::Dict(self.to_raw()).to_json()
    }
}

/// Stored row wrapping a prototype with its schema version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPrototype {
    pub prototype: Prototype,
    pub schema_version: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_fields() {
        let reserved = vec!["npc_sheet".to_string()];
        assert_eq!(
            FieldKind::classify("prototype_parent", &reserved),
            FieldKind::Meta(MetaField::PrototypeParent)
        );
        assert_eq!(
            FieldKind::classify("home", &reserved),
            FieldKind::Construction(ConstructionField::Home)
        );
        assert_eq!(
            FieldKind::classify("ndb_cache", &reserved),
            FieldKind::NonPersistent("cache".into())
        );
        assert_eq!(
            FieldKind::classify("npc_sheet", &reserved),
            FieldKind::Reserved("npc_sheet".into())
        );
        assert_eq!(
            FieldKind::classify("resists", &reserved),
            FieldKind::SimpleAttribute("resists".into())
        );
        assert_eq!(MetaField::PrototypeLocks.name(), "prototype_locks");
        assert_eq!(ConstructionField::Destination.name(), "destination");
    }

    #[test]
    fn test_tag_from_value_shapes() {
        let bare = TagSpec::from_value(&Value::str("shiny")).unwrap();
        assert_eq!(bare, TagSpec::new("shiny", None, None));

        let full = TagSpec::from_value(&Value::Tuple(vec![
            Value::str("red"),
            Value::str("colour"),
            Value::str("bright"),
        ]))
        .unwrap();
        assert_eq!(full.category.as_deref(), Some("colour"));

        assert!(TagSpec::from_value(&Value::Int(4)).is_err());
    }

    #[test]
    fn test_attr_from_value_requires_value() {
        assert!(AttrSpec::from_value(&Value::Tuple(vec![Value::str("hp")])).is_err());
        let attr = AttrSpec::from_value(&Value::List(vec![
            Value::str("hp"),
            Value::Int(10),
            Value::None,
            Value::str(""),
        ]))
        .unwrap();
        assert_eq!(attr, AttrSpec::new("hp", Value::Int(10)));
    }

    #[test]
    fn test_to_raw_skips_unset_fields() {
        let proto = Prototype::new("goblin").with_typeclass("T");
        let raw = proto.to_raw();
        assert_eq!(raw.len(), 2);
        assert!(!raw.contains_key("tags"));
    }
}
