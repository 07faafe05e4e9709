//! The narrow entity model spawned prototypes turn into.
//!
//! Only what the engine needs is modelled: core fields, aliases,
//! permissions, a lock string, tags and attributes. Non-persistent attributes
//! live in memory only and are never written to the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::prototype::normalize::short_time_hash;
use crate::prototype::records::RecordMap;
use crate::prototype::types::{
    AttrSpec, Prototype, TagSpec, DEFAULT_PROTOTYPE_LOCKS, PROTOTYPE_TAG_CATEGORY,
};
use crate::prototype::value::Value;

pub const ENTITY_SCHEMA_VERSION: u8 = 1;

/// Prefix of prototype keys built by [`prototype_from_entity`].
pub const FROM_ENTITY_KEY_PREFIX: &str = "From-Object";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// `#N` reference.
    pub id: String,
    pub key: String,
    pub typeclass: String,
    pub location: Option<String>,
    pub home: Option<String>,
    pub destination: Option<String>,
    pub aliases: Vec<String>,
    pub permissions: Vec<String>,
    pub locks: String,
    pub tags: RecordMap<TagSpec>,
    pub attributes: RecordMap<AttrSpec>,
    #[serde(skip)]
    pub nattributes: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl EntityRecord {
    pub fn new(id: &str, key: &str, typeclass: &str) -> Self {
        Self {
            id: id.to_string(),
            key: key.to_string(),
            typeclass: typeclass.to_string(),
            location: None,
            home: None,
            destination: None,
            aliases: Vec::new(),
            permissions: Vec::new(),
            locks: String::new(),
            tags: RecordMap::new(),
            attributes: RecordMap::new(),
            nattributes: BTreeMap::new(),
            created_at: Utc::now(),
            schema_version: ENTITY_SCHEMA_VERSION,
        }
    }

    pub fn set_key(&mut self, key: &str) {
        self.key = key.to_string();
    }

    pub fn add_alias(&mut self, alias: &str) {
        if !self.aliases.iter().any(|a| a.eq_ignore_ascii_case(alias)) {
            self.aliases.push(alias.to_string());
        }
    }

    pub fn add_permission(&mut self, permission: &str) {
        if !self.permissions.iter().any(|p| p.eq_ignore_ascii_case(permission)) {
            self.permissions.push(permission.to_string());
        }
    }

    /// Add lock clauses; a clause for an access type already present replaces it.
    pub fn add_locks(&mut self, lockstring: &str) {
        let mut clauses: Vec<(String, String)> = split_locks(&self.locks);
        for (access, rest) in split_locks(lockstring) {
            match clauses.iter_mut().find(|(a, _)| *a == access) {
                Some(existing) => existing.1 = rest,
                None => clauses.push((access, rest)),
            }
        }
        self.locks = clauses
            .into_iter()
            .map(|(a, r)| format!("{}:{}", a, r))
            .collect::<Vec<_>>()
            .join(";");
    }

    pub fn add_tag(&mut self, tag: TagSpec) {
        self.tags.insert(tag);
    }

    pub fn has_tag(&self, name: &str, category: Option<&str>) -> bool {
        self.tags.iter().any(|t| {
            t.name.eq_ignore_ascii_case(name) && t.category.as_deref() == category
        })
    }

    pub fn remove_tag(&mut self, name: &str, category: Option<&str>) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| {
            !(t.name.eq_ignore_ascii_case(name) && t.category.as_deref() == category)
        });
        before != self.tags.len()
    }

    pub fn remove_tags_in_category(&mut self, category: &str) {
        self.tags.retain(|t| t.category.as_deref() != Some(category));
    }

    /// Drop every tag except the template markers.
    pub fn clear_tags(&mut self) {
        self.tags
            .retain(|t| t.category.as_deref() == Some(PROTOTYPE_TAG_CATEGORY));
    }

    pub fn set_attr(&mut self, attr: AttrSpec) {
        self.attributes.insert(attr);
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name, None).map(|a| &a.value)
    }

    pub fn del_attr(&mut self, name: &str, category: Option<&str>) -> bool {
        self.attributes.remove(name, category).is_some()
    }

    pub fn set_nattr(&mut self, name: &str, value: Value) {
        self.nattributes.insert(name.to_string(), value);
    }

    /// Prototype keys this entity was spawned from.
    pub fn prototype_keys(&self) -> Vec<String> {
        self.tags
            .iter()
            .filter(|t| t.category.as_deref() == Some(PROTOTYPE_TAG_CATEGORY))
            .map(|t| t.name.clone())
            .collect()
    }
}

fn split_locks(lockstring: &str) -> Vec<(String, String)> {
    lockstring
        .split(';')
        .filter_map(|clause| clause.split_once(':'))
        .map(|(a, r)| (a.trim().to_string(), r.trim().to_string()))
        .filter(|(a, _)| !a.is_empty())
        .collect()
}

/// Reverse-engineer a prototype from a live entity.
///
/// Only fields the entity actually has set are included, and template marker
/// tags are left out so the result can be diffed against the template the
/// entity came from.
pub fn prototype_from_entity(entity: &EntityRecord) -> Prototype {
    let mut proto = Prototype::new(&format!(
        "{}-{}-{}",
        FROM_ENTITY_KEY_PREFIX,
        entity.key,
        short_time_hash()
    ));
    proto.prototype_desc = Some(format!("Built from {}", entity.key));
    proto.prototype_locks = Some(DEFAULT_PROTOTYPE_LOCKS.to_string());
    proto.key = Some(Value::str(entity.key.clone()));
    proto.typeclass = Some(entity.typeclass.clone());
    proto.location = entity.location.clone().map(Value::Str);
    proto.home = entity.home.clone().map(Value::Str);
    proto.destination = entity.destination.clone().map(Value::Str);
    if !entity.aliases.is_empty() {
        proto.aliases = Some(Value::list_of_strings(entity.aliases.clone()));
    }
    if !entity.permissions.is_empty() {
        proto.permissions = Some(Value::list_of_strings(entity.permissions.clone()));
    }
    if !entity.locks.is_empty() {
        proto.locks = Some(Value::str(entity.locks.clone()));
    }
    let tags: RecordMap<TagSpec> = entity
        .tags
        .iter()
        .filter(|t| t.category.as_deref() != Some(PROTOTYPE_TAG_CATEGORY))
        .cloned()
        .collect();
    if !tags.is_empty() {
        proto.tags = Some(tags);
    }
    if !entity.attributes.is_empty() {
        proto.attrs = Some(entity.attributes.clone());
    }
    proto
}
