//! Prototype lookup by key.
//!
//! Validation, flattening and spawning only need to fetch a prototype by its
//! (case-insensitive) key. [`PrototypeSource`] is that seam: the sled store
//! implements it, and so does [`PrototypeLibrary`], the in-memory map used
//! for read-only module prototypes and for explicit parent overrides.

use std::collections::BTreeMap;

use crate::prototype::errors::ProtoError;
use crate::prototype::types::Prototype;

pub trait PrototypeSource {
    /// Fetch a prototype by exact key (case-insensitive).
    fn get_prototype(&self, key: &str) -> Result<Option<Prototype>, ProtoError>;

    /// Resolve a user-supplied key to exactly one prototype.
    fn find_prototype(&self, key: &str) -> Result<Prototype, ProtoError> {
        self.get_prototype(key)?
            .ok_or_else(|| ProtoError::NotFound(format!("prototype: {}", key)))
    }
}

/// In-memory prototypes keyed by lower-cased `prototype_key`.
#[derive(Debug, Clone, Default)]
pub struct PrototypeLibrary {
    prototypes: BTreeMap<String, Prototype>,
}

impl PrototypeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a prototype; returns false when it has no `prototype_key`.
    pub fn insert(&mut self, prototype: Prototype) -> bool {
        let Some(key) = prototype.prototype_key.as_ref() else {
            return false;
        };
        self.prototypes.insert(key.to_ascii_lowercase(), prototype);
        true
    }

    pub fn with(mut self, prototype: Prototype) -> Self {
        self.insert(prototype);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Prototype> {
        self.prototypes.get(&key.to_ascii_lowercase())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.prototypes.contains_key(&key.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prototype> {
        self.prototypes.values()
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    /// Copy every entry of `other` into this library, `other` winning on clashes.
    pub fn extend(&mut self, other: &PrototypeLibrary) {
        for (key, proto) in &other.prototypes {
            self.prototypes.insert(key.clone(), proto.clone());
        }
    }
}

impl FromIterator<Prototype> for PrototypeLibrary {
    fn from_iter<I: IntoIterator<Item = Prototype>>(iter: I) -> Self {
        let mut library = PrototypeLibrary::new();
        for proto in iter {
            library.insert(proto);
        }
        library
    }
}

impl PrototypeSource for PrototypeLibrary {
    fn get_prototype(&self, key: &str) -> Result<Option<Prototype>, ProtoError> {
        Ok(self.get(key).cloned())
    }
}

/// Explicit override library consulted before a fallback source.
pub struct Layered<'a> {
    overrides: Option<&'a PrototypeLibrary>,
    fallback: Option<&'a dyn PrototypeSource>,
}

impl<'a> Layered<'a> {
    pub fn new(overrides: Option<&'a PrototypeLibrary>, fallback: Option<&'a dyn PrototypeSource>) -> Self {
        Self {
            overrides,
            fallback,
        }
    }
}

impl PrototypeSource for Layered<'_> {
    fn get_prototype(&self, key: &str) -> Result<Option<Prototype>, ProtoError> {
        if let Some(found) = self.overrides.and_then(|lib| lib.get(key)) {
            return Ok(Some(found.clone()));
        }
        match self.fallback {
            Some(source) => source.get_prototype(key),
            None => Ok(None),
        }
    }
}
