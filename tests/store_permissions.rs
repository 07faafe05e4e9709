//! Template store: locks, read-only module prototypes and search.

mod common;

use common::{save, setup_store, setup_store_with_modules, OBJECT};
use protospawn::prototype::{
    Actor, ProtoError, ProtoStore, Prototype, PrototypeLibrary, PrototypeSource,
};

fn tagged(key: &str, tags: &[&str]) -> Prototype {
    let mut proto = Prototype::new(key).with_typeclass(OBJECT);
    proto.prototype_tags = Some(tags.iter().map(|t| t.to_string()).collect());
    proto
}

fn reopen(path: &std::path::Path) -> ProtoStore {
    ProtoStore::open(path).expect("reopen")
}

#[test]
fn test_saved_prototype_survives_reopen() {
    let (temp, store) = setup_store();
    let saved = save(&store, Prototype::new("Lantern").with_typeclass(OBJECT));
    assert_eq!(saved.prototype_locks.as_deref(), Some("spawn:all();edit:all()"));
    drop(store);

    let store = reopen(temp.path());
    let found = store.get_prototype("lantern").unwrap().unwrap();
    assert_eq!(found.prototype_key.as_deref(), Some("Lantern"));
    assert_eq!(found.typeclass.as_deref(), Some(OBJECT));
}

#[test]
fn test_edit_lock_guards_overwrite_and_delete() {
    let (_temp, store) = setup_store();
    let mut guarded = Prototype::new("throne").with_typeclass(OBJECT);
    guarded.prototype_locks = Some("spawn:all();edit:perm(Admin)".to_string());
    save(&store, guarded.clone());

    let builder = Actor::new(Some("#5"), &["Builder"]);
    let err = store.save_prototype(guarded.clone(), &builder).unwrap_err();
    assert!(matches!(err, ProtoError::PermissionDenied(_)));
    let err = store.delete_prototype("throne", &builder).unwrap_err();
    assert!(matches!(err, ProtoError::PermissionDenied(_)));

    assert!(store.check_permission("throne", "spawn", &builder).unwrap());
    assert!(!store.check_permission("throne", "edit", &builder).unwrap());

    // Developer outranks Admin
    let developer = Actor::new(Some("#1"), &["Developer"]);
    assert!(store.check_permission("throne", "edit", &developer).unwrap());
    assert!(store.delete_prototype("throne", &developer).unwrap());
    assert!(store.get_prototype("throne").unwrap().is_none());
    assert!(!store.delete_prototype("throne", &developer).unwrap());
}

#[test]
fn test_module_prototypes_are_read_only() {
    let modules: PrototypeLibrary = vec![tagged("well", &["village"])].into_iter().collect();
    let (_temp, store) = setup_store_with_modules(modules);

    assert!(store.is_read_only("WELL"));
    let err = store
        .save_prototype(tagged("well", &[]), &Actor::operator())
        .unwrap_err();
    assert!(matches!(err, ProtoError::PermissionDenied(_)));
    let err = store.delete_prototype("well", &Actor::operator()).unwrap_err();
    assert!(matches!(err, ProtoError::PermissionDenied(_)));
    assert!(!store
        .check_permission("well", "edit", &Actor::operator())
        .unwrap());
    assert!(store
        .check_permission("well", "spawn", &Actor::operator())
        .unwrap());

    // a partial query resolving to the module prototype is still read-only
    assert!(!store
        .check_permission("wel", "edit", &Actor::operator())
        .unwrap());

    // still readable and searchable
    let found = store.find_prototype("well").unwrap();
    assert_eq!(found.prototype_tags, Some(vec!["village".to_string()]));
}

#[test]
fn test_search_exact_then_fuzzy_with_tags() {
    let (_temp, store) = setup_store();
    save(&store, tagged("sword", &["weapon"]));
    save(&store, tagged("longsword", &["weapon", "rare"]));
    save(&store, tagged("swordfish", &["food"]));

    let exact = store.search_prototypes(Some("SWORD"), &[]).unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].prototype_key.as_deref(), Some("sword"));

    let fuzzy = store.search_prototypes(Some("swor"), &[]).unwrap();
    let keys: Vec<_> = fuzzy.iter().map(Prototype::display_name).collect();
    assert_eq!(keys, vec!["longsword", "sword", "swordfish"]);

    let rare = store
        .search_prototypes(Some("swor"), &["rare".to_string()])
        .unwrap();
    assert_eq!(rare.len(), 1);
    assert_eq!(rare[0].display_name(), "longsword");

    let all = store.search_prototypes(None, &["weapon".to_string()]).unwrap();
    assert_eq!(all.len(), 2);

    assert!(matches!(
        store.find_prototype("swor"),
        Err(ProtoError::Ambiguous { .. })
    ));
    assert!(matches!(
        store.find_prototype("axe"),
        Err(ProtoError::NotFound(_))
    ));
}

#[test]
fn test_save_rejects_missing_parent_but_keeps_incomplete() {
    let (_temp, store) = setup_store();
    let orphan = Prototype::new("orphan").with_parent("nowhere");
    let err = store
        .save_prototype(orphan, &Actor::operator())
        .unwrap_err();
    assert!(matches!(err, ProtoError::Validation { .. }));

    // no typeclass yet: allowed, to be finished later
    let draft = save(&store, Prototype::new("draft"));
    assert!(draft.typeclass.is_none());
}
