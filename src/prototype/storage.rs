use std::path::{Path, PathBuf};

use log::{debug, info};
use sled::IVec;

use crate::prototype::entity::{EntityRecord, ENTITY_SCHEMA_VERSION};
use crate::prototype::errors::ProtoError;
use crate::prototype::exec::ExecRunner;
use crate::prototype::library::{PrototypeLibrary, PrototypeSource};
use crate::prototype::locks::{Actor, LockChecker, LockFuncChecker};
use crate::prototype::registry::TypeclassRegistry;
use crate::prototype::spawner::{EntityWorld, SpawnBundle};
use crate::prototype::types::{
    Prototype, StoredPrototype, PROTOTYPE_SCHEMA_VERSION, PROTOTYPE_TAG_CATEGORY,
};
use crate::prototype::validate::{ensure_default_locks, validate, ValidateOptions};
use crate::prototype::value::Value;

const TREE_PROTOTYPES: &str = "prototypes";
const TREE_ENTITIES: &str = "entities";

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct ProtoStoreBuilder {
    path: PathBuf,
    modules: PrototypeLibrary,
    typeclasses: TypeclassRegistry,
}

impl ProtoStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            modules: PrototypeLibrary::new(),
            typeclasses: TypeclassRegistry::with_stock(),
        }
    }

    /// Read-only prototypes defined outside the database.
    pub fn with_module_prototypes(mut self, modules: PrototypeLibrary) -> Self {
        self.modules = modules;
        self
    }

    pub fn with_typeclasses(mut self, typeclasses: TypeclassRegistry) -> Self {
        self.typeclasses = typeclasses;
        self
    }

    pub fn open(self) -> Result<ProtoStore, ProtoError> {
        let path_ref = self.path.as_path();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let prototypes = db.open_tree(TREE_PROTOTYPES)?;
        let entities = db.open_tree(TREE_ENTITIES)?;
        Ok(ProtoStore {
            db,
            prototypes,
            entities,
            modules: self.modules,
            typeclasses: self.typeclasses,
            locks: LockFuncChecker,
        })
    }
}

/// Sled-backed template store and entity world.
pub struct ProtoStore {
    db: sled::Db,
    prototypes: sled::Tree,
    entities: sled::Tree,
    modules: PrototypeLibrary,
    typeclasses: TypeclassRegistry,
    locks: LockFuncChecker,
}

impl ProtoStore {
    /// Open (or create) a store at `path` with no module prototypes.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ProtoError> {
        ProtoStoreBuilder::new(path.as_ref()).open()
    }

    fn prototype_key(key: &str) -> Vec<u8> {
        format!("prototypes:{}", key.to_ascii_lowercase()).into_bytes()
    }

    fn entity_key(id: &str) -> Vec<u8> {
        format!("entities:{}", id.trim_start_matches('#')).into_bytes()
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ProtoError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(bytes: IVec) -> Result<T, ProtoError> {
        Ok(bincode::deserialize::<T>(&bytes)?)
    }

    fn decode_prototype(bytes: IVec) -> Result<Prototype, ProtoError> {
        let row: StoredPrototype = Self::deserialize(bytes)?;
        if row.schema_version != PROTOTYPE_SCHEMA_VERSION {
            return Err(ProtoError::SchemaMismatch {
                entity: "prototype",
                expected: PROTOTYPE_SCHEMA_VERSION,
                found: row.schema_version,
            });
        }
        Ok(row.prototype)
    }

    fn decode_entity(bytes: IVec) -> Result<EntityRecord, ProtoError> {
        let record: EntityRecord = Self::deserialize(bytes)?;
        if record.schema_version != ENTITY_SCHEMA_VERSION {
            return Err(ProtoError::SchemaMismatch {
                entity: "entity",
                expected: ENTITY_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(record)
    }

    /// Module prototypes can be read and spawned but never edited here.
    pub fn is_read_only(&self, key: &str) -> bool {
        self.modules.contains(key)
    }

    pub fn module_prototypes(&self) -> &PrototypeLibrary {
        &self.modules
    }

    /// Prototype stored in the database (module prototypes are not consulted).
    pub fn get_db_prototype(&self, key: &str) -> Result<Option<Prototype>, ProtoError> {
        match self.prototypes.get(Self::prototype_key(key))? {
            Some(bytes) => Ok(Some(Self::decode_prototype(bytes)?)),
            None => Ok(None),
        }
    }

    fn db_prototypes(&self) -> Result<Vec<Prototype>, ProtoError> {
        let mut out = Vec::new();
        for entry in self.prototypes.scan_prefix(b"prototypes:") {
            let (_, bytes) = entry?;
            out.push(Self::decode_prototype(bytes)?);
        }
        Ok(out)
    }

    /// Save (create or overwrite) a database prototype.
    ///
    /// Validation is lenient: an incomplete prototype can be saved and
    /// finished later, but a broken parent chain cannot.
    pub fn save_prototype(&self, prototype: Prototype, actor: &Actor) -> Result<Prototype, ProtoError> {
        let Some(key) = prototype.prototype_key.clone() else {
            return Err(ProtoError::Validation {
                name: "[UNSET]".to_string(),
                errors: vec!["Prototype lacks a `prototype_key`.".to_string()],
            });
        };
        if self.is_read_only(&key) {
            return Err(ProtoError::PermissionDenied(format!(
                "{} is a read-only prototype defined outside the database",
                key
            )));
        }
        if let Some(existing) = self.get_db_prototype(&key)? {
            let lockstring = existing.prototype_locks.clone().unwrap_or_default();
            if !self.locks.check_lock(actor, &lockstring, "edit") {
                return Err(ProtoError::PermissionDenied(format!(
                    "no edit access to prototype {}",
                    key
                )));
            }
        }

        let mut prototype = prototype;
        match validate(
            &mut prototype,
            None,
            self,
            &self.typeclasses,
            ValidateOptions::lenient(),
        ) {
            Ok(()) => {}
            Err(err) if err.is_warning() => {
                debug!("saving {} despite: {}", key, err);
                ensure_default_locks(&mut prototype);
            }
            Err(err) => return Err(err),
        }

        let row = StoredPrototype {
            prototype: prototype.clone(),
            schema_version: PROTOTYPE_SCHEMA_VERSION,
        };
        self.prototypes
            .insert(Self::prototype_key(&key), Self::serialize(&row)?)?;
        self.prototypes.flush()?;
        info!(
            "PROTO_SAVE: {} saved by {}",
            key,
            actor.id.as_deref().unwrap_or("operator")
        );
        Ok(prototype)
    }

    /// Search module and database prototypes.
    ///
    /// A key matches exactly (case-insensitive) first and falls back to a
    /// substring match. Every given tag must be among the prototype's
    /// `prototype_tags`. Module prototypes shadow database ones with the same key.
    pub fn search_prototypes(&self, key: Option<&str>, tags: &[String]) -> Result<Vec<Prototype>, ProtoError> {
        let mut all: Vec<Prototype> = self.modules.iter().cloned().collect();
        for proto in self.db_prototypes()? {
            let shadowed = proto
                .prototype_key
                .as_deref()
                .is_some_and(|k| self.modules.contains(k));
            if !shadowed {
                all.push(proto);
            }
        }

        all.retain(|proto| {
            let have = proto.prototype_tags.as_deref().unwrap_or(&[]);
            tags.iter()
                .all(|wanted| have.iter().any(|t| t.eq_ignore_ascii_case(wanted)))
        });

        let Some(query) = key else {
            all.sort_by_key(|p| p.display_name().to_ascii_lowercase());
            return Ok(all);
        };
        let query = query.to_ascii_lowercase();
        let key_of = |p: &Prototype| p.prototype_key.as_deref().unwrap_or("").to_ascii_lowercase();

        let exact: Vec<Prototype> = all.iter().filter(|p| key_of(p) == query).cloned().collect();
        if !exact.is_empty() {
            return Ok(exact);
        }
        let mut fuzzy: Vec<Prototype> = all.into_iter().filter(|p| key_of(p).contains(&query)).collect();
        fuzzy.sort_by_key(|p| key_of(p));
        Ok(fuzzy)
    }

    /// Delete a database prototype. Returns false when there was nothing to delete.
    pub fn delete_prototype(&self, key: &str, actor: &Actor) -> Result<bool, ProtoError> {
        if self.is_read_only(key) {
            return Err(ProtoError::PermissionDenied(format!(
                "{} is a read-only prototype defined outside the database",
                key
            )));
        }
        let Some(existing) = self.get_db_prototype(key)? else {
            return Ok(false);
        };
        let lockstring = existing.prototype_locks.unwrap_or_default();
        if !self.locks.check_lock(actor, &lockstring, "edit") {
            return Err(ProtoError::PermissionDenied(format!(
                "no edit access to prototype {}",
                key
            )));
        }
        self.prototypes.remove(Self::prototype_key(key))?;
        self.prototypes.flush()?;
        info!(
            "PROTO_SAVE: {} deleted by {}",
            key,
            actor.id.as_deref().unwrap_or("operator")
        );
        Ok(true)
    }

    /// Whether `actor` passes the prototype's `access_type` lock (`spawn` or `edit`).
    pub fn check_permission(&self, key: &str, access_type: &str, actor: &Actor) -> Result<bool, ProtoError> {
        let proto = self.find_prototype(key)?;
        if access_type == "edit" && self.is_read_only(&proto.display_name()) {
            return Ok(false);
        }
        let lockstring = proto.prototype_locks.unwrap_or_default();
        Ok(self.locks.check_lock(actor, &lockstring, access_type))
    }

    pub fn list_entities(&self) -> Result<Vec<EntityRecord>, ProtoError> {
        let mut out = Vec::new();
        for entry in self.entities.scan_prefix(b"entities:") {
            let (_, bytes) = entry?;
            out.push(Self::decode_entity(bytes)?);
        }
        Ok(out)
    }

    fn next_entity_id(&self) -> Result<String, ProtoError> {
        Ok(format!("#{}", self.db.generate_id()? + 1))
    }

    /// Create a bare entity outside of spawning (rooms to spawn into, tests).
    pub fn create_bare_entity(&self, key: &str, typeclass: &str) -> Result<EntityRecord, ProtoError> {
        let entity = EntityRecord::new(&self.next_entity_id()?, key, typeclass);
        self.save_entity(&entity)?;
        Ok(entity)
    }
}

fn reference_id(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::EntityRef(id)) | Some(Value::Str(id)) if !id.is_empty() => Some(id.clone()),
        _ => None,
    }
}

impl PrototypeSource for ProtoStore {
    fn get_prototype(&self, key: &str) -> Result<Option<Prototype>, ProtoError> {
        if let Some(found) = self.modules.get(key) {
            return Ok(Some(found.clone()));
        }
        self.get_db_prototype(key)
    }

    fn find_prototype(&self, key: &str) -> Result<Prototype, ProtoError> {
        let mut matches = self.search_prototypes(Some(key), &[])?;
        match matches.len() {
            0 => Err(ProtoError::NotFound(format!("prototype: {}", key))),
            1 => Ok(matches.remove(0)),
            _ => Err(ProtoError::Ambiguous {
                query: key.to_string(),
                matches: matches.iter().map(Prototype::display_name).collect(),
            }),
        }
    }
}

impl EntityWorld for ProtoStore {
    fn create_entity(&self, bundle: &SpawnBundle, exec: &ExecRunner) -> Result<EntityRecord, ProtoError> {
        let mut entity = EntityRecord::new(
            &self.next_entity_id()?,
            &bundle.core.key,
            &bundle.core.typeclass,
        );
        entity.location = reference_id(&bundle.core.location);
        entity.home = reference_id(&bundle.core.home);
        entity.destination = reference_id(&bundle.core.destination);

        for permission in &bundle.permissions {
            entity.add_permission(permission);
        }
        if !bundle.lockstring.is_empty() {
            entity.add_locks(&bundle.lockstring);
        }
        for alias in &bundle.aliases {
            entity.add_alias(alias);
        }
        for attr in &bundle.attributes {
            entity.set_attr(attr.clone());
        }
        for tag in &bundle.tags {
            entity.add_tag(tag.clone());
        }
        for (name, value) in &bundle.nattributes {
            entity.set_nattr(name, value.clone());
        }
        exec.run(&mut entity, &bundle.exec)?;

        self.save_entity(&entity)?;
        Ok(entity)
    }

    fn find_instances(&self, prototype_key: &str) -> Result<Vec<EntityRecord>, ProtoError> {
        Ok(self
            .list_entities()?
            .into_iter()
            .filter(|e| e.has_tag(prototype_key, Some(PROTOTYPE_TAG_CATEGORY)))
            .collect())
    }

    fn resolve_reference(&self, value: &Value) -> Result<Value, ProtoError> {
        let text = match value {
            Value::EntityRef(_) => return Ok(value.clone()),
            Value::Int(n) => format!("#{}", n),
            Value::Str(s) => s.trim().to_string(),
            other => {
                return Err(ProtoError::MalformedRecord(format!(
                    "{} is not an entity reference",
                    other.repr()
                )))
            }
        };

        let is_dbref = text
            .strip_prefix('#')
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
        if is_dbref {
            return match self.entities.get(Self::entity_key(&text))? {
                Some(_) => Ok(Value::EntityRef(text)),
                None => Err(ProtoError::NotFound(format!("entity: {}", text))),
            };
        }

        let matches: Vec<EntityRecord> = self
            .list_entities()?
            .into_iter()
            .filter(|e| {
                e.key.eq_ignore_ascii_case(&text)
                    || e.aliases.iter().any(|a| a.eq_ignore_ascii_case(&text))
            })
            .collect();
        match matches.as_slice() {
            [] => Err(ProtoError::NotFound(format!("entity: {}", text))),
            [one] => Ok(Value::EntityRef(one.id.clone())),
            many => Err(ProtoError::Ambiguous {
                query: text,
                matches: many.iter().map(|e| e.id.clone()).collect(),
            }),
        }
    }

    fn get_entity(&self, id: &str) -> Result<EntityRecord, ProtoError> {
        let Some(bytes) = self.entities.get(Self::entity_key(id))? else {
            return Err(ProtoError::NotFound(format!("entity: {}", id)));
        };
        Self::decode_entity(bytes)
    }

    fn save_entity(&self, entity: &EntityRecord) -> Result<(), ProtoError> {
        let mut record = entity.clone();
        record.schema_version = ENTITY_SCHEMA_VERSION;
        self.entities
            .insert(Self::entity_key(&record.id), Self::serialize(&record)?)?;
        self.entities.flush()?;
        Ok(())
    }

    fn delete_entity(&self, id: &str) -> Result<(), ProtoError> {
        if self.entities.remove(Self::entity_key(id))?.is_none() {
            return Err(ProtoError::NotFound(format!("entity: {}", id)));
        }
        self.entities.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prototype::types::TagSpec;
    use tempfile::TempDir;

    #[test]
    fn store_round_trip_prototype() {
        let dir = TempDir::new().expect("tempdir");
        let store = ProtoStoreBuilder::new(dir.path()).open().expect("store");
        let proto = Prototype::new("Chest").with_typeclass("typeclasses.objects.Object");
        let saved = store.save_prototype(proto, &Actor::operator()).expect("save");
        assert_eq!(saved.prototype_locks.as_deref(), Some("spawn:all();edit:all()"));

        let fetched = store.get_prototype("chest").expect("get").expect("present");
        assert_eq!(fetched, saved);
        drop(store);

        let reopened = ProtoStoreBuilder::new(dir.path()).open().expect("reopen");
        assert!(reopened.get_db_prototype("CHEST").expect("get").is_some());
    }

    #[test]
    fn entity_ids_are_unique_and_persisted() {
        let dir = TempDir::new().expect("tempdir");
        let store = ProtoStoreBuilder::new(dir.path()).open().expect("store");
        let a = store.create_bare_entity("Limbo", "typeclasses.rooms.Room").expect("a");
        let mut b = store.create_bare_entity("Hall", "typeclasses.rooms.Room").expect("b");
        assert_ne!(a.id, b.id);

        b.add_tag(TagSpec::new("hall", Some(PROTOTYPE_TAG_CATEGORY), None));
        store.save_entity(&b).expect("save");
        let found = store.find_instances("HALL").expect("find");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, b.id);
    }

    #[test]
    fn delete_entity_removes_row() {
        let dir = TempDir::new().expect("tempdir");
        let store = ProtoStoreBuilder::new(dir.path()).open().expect("store");
        let crate_box = store.create_bare_entity("crate", "typeclasses.objects.Object").expect("crate");
        store.delete_entity(&crate_box.id).expect("delete");
        assert!(matches!(store.get_entity(&crate_box.id), Err(ProtoError::NotFound(_))));
        assert!(matches!(store.delete_entity(&crate_box.id), Err(ProtoError::NotFound(_))));
    }

    #[test]
    fn resolve_reference_by_id_and_key() {
        let dir = TempDir::new().expect("tempdir");
        let store = ProtoStoreBuilder::new(dir.path()).open().expect("store");
        let limbo = store.create_bare_entity("Limbo", "typeclasses.rooms.Room").expect("limbo");

        let by_id = store.resolve_reference(&Value::str(limbo.id.clone())).expect("id");
        assert_eq!(by_id, Value::EntityRef(limbo.id.clone()));
        let by_key = store.resolve_reference(&Value::str("limbo")).expect("key");
        assert_eq!(by_key, by_id);
        assert_eq!(store.resolve_reference(&by_id).expect("idempotent"), by_id);
        assert!(matches!(
            store.resolve_reference(&Value::str("#999")),
            Err(ProtoError::NotFound(_))
        ));
    }
}
