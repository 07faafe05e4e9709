//! Identity-keyed record collections for `tags` and `attrs`.
//!
//! Records are kept in insertion order but addressed by `(name, category)`.
//! Inserting a record whose identity already exists drops the old record and
//! appends the new one, so a child prototype's tag always replaces its
//! parent's tag of the same identity instead of sitting next to it.

use serde::{Deserialize, Serialize};

/// Something that can live in a [`RecordMap`].
pub trait Keyed {
    fn identity(&self) -> (String, Option<String>);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordMap<T> {
    records: Vec<T>,
}

impl<T> Default for RecordMap<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<T: Keyed> RecordMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by identity. Replaced records move to the end.
    pub fn insert(&mut self, record: T) {
        let id = record.identity();
        self.records.retain(|existing| existing.identity() != id);
        self.records.push(record);
    }

    /// Merge `other` on top of `self`; records in `other` win on identity clashes.
    pub fn merge(&mut self, other: &RecordMap<T>)
    where
        T: Clone,
    {
        for record in &other.records {
            self.insert(record.clone());
        }
    }

    pub fn get(&self, name: &str, category: Option<&str>) -> Option<&T> {
        self.records
            .iter()
            .find(|r| r.identity() == (name.to_string(), category.map(str::to_string)))
    }

    pub fn remove(&mut self, name: &str, category: Option<&str>) -> Option<T> {
        let id = (name.to_string(), category.map(str::to_string));
        let pos = self.records.iter().position(|r| r.identity() == id)?;
        Some(self.records.remove(pos))
    }

    pub fn retain<F: FnMut(&T) -> bool>(&mut self, f: F) {
        self.records.retain(f);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.records
    }

    pub fn into_vec(self) -> Vec<T> {
        self.records
    }
}

impl<T: Keyed> FromIterator<T> for RecordMap<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut map = RecordMap::new();
        for record in iter {
            map.insert(record);
        }
        map
    }
}

impl<'a, T> IntoIterator for &'a RecordMap<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
