//! Shared fixtures for integration tests.

use protospawn::prototype::{
    Actor, EntityRecord, ProtoStore, ProtoStoreBuilder, Prototype, PrototypeLibrary, RawPrototype,
    Value,
};
use tempfile::TempDir;

pub const OBJECT: &str = "typeclasses.objects.Object";

/// Throwaway store; keep the `TempDir` alive for as long as the store is used.
pub fn setup_store() -> (TempDir, ProtoStore) {
    let temp_dir = TempDir::new().expect("tempdir");
    let store = ProtoStoreBuilder::new(temp_dir.path()).open().expect("store");
    (temp_dir, store)
}

#[allow(dead_code)]
pub fn setup_store_with_modules(modules: PrototypeLibrary) -> (TempDir, ProtoStore) {
    let temp_dir = TempDir::new().expect("tempdir");
    let store = ProtoStoreBuilder::new(temp_dir.path())
        .with_module_prototypes(modules)
        .open()
        .expect("store");
    (temp_dir, store)
}

#[allow(dead_code)]
pub fn raw(pairs: &[(&str, Value)]) -> RawPrototype {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[allow(dead_code)]
pub fn save(store: &ProtoStore, prototype: Prototype) -> Prototype {
    store
        .save_prototype(prototype, &Actor::operator())
        .expect("save prototype")
}

#[allow(dead_code)]
pub fn room(store: &ProtoStore, key: &str) -> EntityRecord {
    store
        .create_bare_entity(key, "typeclasses.rooms.Room")
        .expect("room")
}
