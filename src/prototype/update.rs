//! Propagating prototype changes to already spawned entities.

use log::{debug, info, warn};

use crate::prototype::diff::{diff_against_entity, flatten_diff, DiffInstruction, DiffOptions, DiffTree};
use crate::prototype::entity::EntityRecord;
use crate::prototype::errors::ProtoError;
use crate::prototype::flatten::flatten;
use crate::prototype::library::PrototypeSource;
use crate::prototype::protfunc::{evaluate, ProtFuncContext};
use crate::prototype::registry::Registry;
use crate::prototype::spawner::EntityWorld;
use crate::prototype::types::{
    AttrSpec, FieldKind, Prototype, TagSpec, PROTOTYPE_TAG_CATEGORY,
};
use crate::prototype::value::Value;

/// Outcome of [`batch_update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Ids of entities that were modified and saved.
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
    /// `(id, error)` for entities with at least one field that could not be applied.
    pub failures: Vec<(String, String)>,
}

impl BatchReport {
    /// Number of entities actually changed.
    pub fn count(&self) -> usize {
        self.changed.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions<'a> {
    /// Precomputed diff; estimated from the first entity when absent.
    pub diff: Option<&'a DiffTree>,
    /// Entities to update; all instances of the prototype when absent.
    pub entities: Option<Vec<EntityRecord>>,
    /// Also act on fields the new prototype does not mention.
    pub exact: bool,
    pub caller: Option<String>,
}

/// Apply `prototype` to every entity spawned from it.
///
/// Fields are applied per top-level instruction: KEEP leaves the entity
/// alone, ADD and UPDATE add, REPLACE clears then adds, REMOVE clears.
/// Unless `exact` is set, fields the prototype does not mention are never
/// touched. Every processed entity ends up tagged with the prototype key and
/// saved, even when some of its fields failed; those entities are reported
/// under `failures`.
pub fn batch_update(
    prototype: &Prototype,
    registry: &Registry,
    templates: &dyn PrototypeSource,
    world: &dyn EntityWorld,
    options: BatchOptions<'_>,
) -> Result<BatchReport, ProtoError> {
    let flat = flatten(prototype, templates)?;
    let prototype_key = flat
        .prototype_key
        .clone()
        .ok_or_else(|| ProtoError::Validation {
            name: "<unnamed>".into(),
            errors: vec!["Prototype lacks a `prototype_key`.".into()],
        })?;

    let entities = match options.entities {
        Some(entities) => entities,
        None => world.find_instances(&prototype_key)?,
    };
    let mut report = BatchReport::default();
    if entities.is_empty() {
        debug!("no instances of {} to update", prototype_key);
        return Ok(report);
    }

    let estimated;
    let tree = match options.diff {
        Some(tree) => tree,
        None => {
            let (tree, _) = diff_against_entity(&flat, &entities[0], &DiffOptions::default())?;
            estimated = tree;
            &estimated
        }
    };
    let instructions: Vec<(String, DiffInstruction)> = flatten_diff(tree)
        .into_iter()
        .filter(|(field, instruction)| {
            *instruction != DiffInstruction::Keep && !FieldKind::is_meta(field) && field != "exec"
        })
        .collect();

    let ctx = ProtFuncContext::new(&registry.functions)
        .with_caller(options.caller.clone())
        .with_prototype(&flat);
    let new_raw = flat.to_raw();
    let applier = Applier {
        registry,
        world,
        ctx: &ctx,
        flat: &flat,
        new_raw: &new_raw,
        exact: options.exact,
    };

    for mut entity in entities {
        let before = entity.clone();
        let mut errors = Vec::new();
        // a failing field does not stop the remaining ones
        for (field, instruction) in &instructions {
            if let Err(err) = applier.apply(&mut entity, field, *instruction) {
                errors.push(format!("{}: {}", field, err));
            }
        }

        if entity.prototype_keys() != [prototype_key.as_str()] {
            entity.remove_tags_in_category(PROTOTYPE_TAG_CATEGORY);
            entity.add_tag(TagSpec::new(&prototype_key, Some(PROTOTYPE_TAG_CATEGORY), None));
        }

        let saved = if entity == before {
            Ok(false)
        } else {
            world.save_entity(&entity).map(|()| true)
        };

        match (saved, errors.is_empty()) {
            (Err(err), _) => report.failures.push((entity.id.clone(), err.to_string())),
            (Ok(_), false) => {
                let reason = errors.join("; ");
                warn!("update of {} from {} failed: {}", entity.id, prototype_key, reason);
                report.failures.push((entity.id.clone(), reason));
            }
            (Ok(true), true) => report.changed.push(entity.id.clone()),
            (Ok(false), true) => report.unchanged.push(entity.id.clone()),
        }
    }

    info!(
        "BATCH_UPDATE: prototype={} changed={} unchanged={} failed={}",
        prototype_key,
        report.changed.len(),
        report.unchanged.len(),
        report.failures.len()
    );
    Ok(report)
}

struct Applier<'a> {
    registry: &'a Registry,
    world: &'a dyn EntityWorld,
    ctx: &'a ProtFuncContext<'a>,
    flat: &'a Prototype,
    new_raw: &'a std::collections::BTreeMap<String, Value>,
    exact: bool,
}

impl Applier<'_> {
    fn apply(&self, entity: &mut EntityRecord, field: &str, instruction: DiffInstruction) -> Result<(), ProtoError> {
        match instruction {
            DiffInstruction::Keep => Ok(()),
            DiffInstruction::Remove => {
                self.clear(entity, field);
                Ok(())
            }
            DiffInstruction::Add | DiffInstruction::Update | DiffInstruction::Replace => {
                let Some(value) = self.new_raw.get(field) else {
                    if self.exact {
                        self.clear(entity, field);
                    }
                    return Ok(());
                };
                if instruction == DiffInstruction::Replace {
                    self.clear(entity, field);
                }
                self.assign(entity, field, value)
            }
        }
    }

    fn assign(&self, entity: &mut EntityRecord, field: &str, value: &Value) -> Result<(), ProtoError> {
        match field {
            "key" => {
                let key = evaluate(value, self.ctx)?;
                if key.is_truthy() {
                    entity.set_key(&key.to_string());
                }
            }
            "typeclass" => entity.typeclass = value.to_string(),
            "location" => entity.location = self.reference(value)?,
            "home" => entity.home = self.reference(value)?,
            "destination" => entity.destination = self.reference(value)?,
            "permissions" => {
                for permission in evaluate(value, self.ctx)?.to_string_list() {
                    entity.add_permission(&permission);
                }
            }
            "aliases" => {
                for alias in evaluate(value, self.ctx)?.to_string_list() {
                    entity.add_alias(&alias);
                }
            }
            "locks" => entity.add_locks(&evaluate(value, self.ctx)?.to_string()),
            "tags" => {
                for tag in self.flat.tags.iter().flatten() {
                    let name = evaluate(&Value::str(tag.name.clone()), self.ctx)?.to_string();
                    entity.add_tag(TagSpec {
                        name,
                        ..tag.clone()
                    });
                }
            }
            "attrs" => {
                for attr in self.flat.attrs.iter().flatten() {
                    entity.set_attr(AttrSpec {
                        value: evaluate(&attr.value, self.ctx)?,
                        ..attr.clone()
                    });
                }
            }
            other => match FieldKind::classify(other, &self.registry.custom_reserved_keys) {
                // non-persistent values are never part of the stored entity
                FieldKind::NonPersistent(_) => {}
                _ => entity.set_attr(AttrSpec::new(other, evaluate(value, self.ctx)?)),
            },
        }
        Ok(())
    }

    fn clear(&self, entity: &mut EntityRecord, field: &str) {
        match field {
            // an entity always keeps a name
            "key" => {}
            "typeclass" => entity.typeclass = self.registry.base_typeclass.clone(),
            "location" => entity.location = None,
            "home" => entity.home = None,
            "destination" => entity.destination = None,
            "permissions" => entity.permissions.clear(),
            "aliases" => entity.aliases.clear(),
            "locks" => entity.locks.clear(),
            "tags" => entity.clear_tags(),
            "attrs" => entity.attributes.clear(),
            other => match FieldKind::classify(other, &self.registry.custom_reserved_keys) {
                FieldKind::NonPersistent(name) => {
                    entity.nattributes.remove(&name);
                }
                _ => {
                    entity.del_attr(other, None);
                }
            },
        }
    }

    fn reference(&self, value: &Value) -> Result<Option<String>, ProtoError> {
        let value = evaluate(value, self.ctx)?;
        if !value.is_truthy() {
            return Ok(None);
        }
        match self.world.resolve_reference(&value)? {
            Value::EntityRef(id) => Ok(Some(id)),
            other => Ok(Some(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prototype::exec::ExecRunner;
    use crate::prototype::library::PrototypeLibrary;
    use crate::prototype::spawner::SpawnBundle;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MemoryWorld {
        entities: RefCell<BTreeMap<String, EntityRecord>>,
    }

    impl MemoryWorld {
        fn with(entities: Vec<EntityRecord>) -> Self {
            let world = Self::default();
            for e in entities {
                world.entities.borrow_mut().insert(e.id.clone(), e);
            }
            world
        }
    }

    impl EntityWorld for MemoryWorld {
        fn create_entity(&self, _bundle: &SpawnBundle, _exec: &ExecRunner) -> Result<EntityRecord, ProtoError> {
            Err(ProtoError::Internal("not used".into()))
        }

        fn find_instances(&self, prototype_key: &str) -> Result<Vec<EntityRecord>, ProtoError> {
            Ok(self
                .entities
                .borrow()
                .values()
                .filter(|e| e.has_tag(prototype_key, Some(PROTOTYPE_TAG_CATEGORY)))
                .cloned()
                .collect())
        }

        fn resolve_reference(&self, value: &Value) -> Result<Value, ProtoError> {
            let id = value.to_string();
            if self.entities.borrow().contains_key(&id) {
                Ok(Value::EntityRef(id))
            } else {
                Err(ProtoError::NotFound(id))
            }
        }

        fn get_entity(&self, id: &str) -> Result<EntityRecord, ProtoError> {
            self.entities
                .borrow()
                .get(id)
                .cloned()
                .ok_or_else(|| ProtoError::NotFound(id.to_string()))
        }

        fn save_entity(&self, entity: &EntityRecord) -> Result<(), ProtoError> {
            self.entities
                .borrow_mut()
                .insert(entity.id.clone(), entity.clone());
            Ok(())
        }

        fn delete_entity(&self, id: &str) -> Result<(), ProtoError> {
            self.entities
                .borrow_mut()
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| ProtoError::NotFound(id.to_string()))
        }
    }

    fn goblin(id: &str) -> EntityRecord {
        let mut e = EntityRecord::new(id, "goblin", "typeclasses.objects.Object");
        e.add_tag(TagSpec::new("goblin", Some(PROTOTYPE_TAG_CATEGORY), None));
        e.set_attr(AttrSpec::new("hp", Value::Int(3)));
        e.add_alias("gob");
        e
    }

    #[test]
    fn test_update_changes_only_mentioned_fields() {
        let world = MemoryWorld::with(vec![goblin("#1"), goblin("#2")]);
        let registry = Registry::standard();
        let templates = PrototypeLibrary::new();
        let proto = Prototype::new("goblin")
            .with_typeclass("typeclasses.objects.Object")
            .with_key("goblin")
            .with_attr(AttrSpec::new("hp", Value::Int(3)))
            .with_attr(AttrSpec::new("strength", Value::Int(5)));

        let report =
            batch_update(&proto, &registry, &templates, &world, BatchOptions::default()).unwrap();
        assert_eq!(report.count(), 2);
        assert!(report.failures.is_empty());

        let e = world.get_entity("#1").unwrap();
        assert_eq!(e.attr("strength"), Some(&Value::Int(5)));
        assert_eq!(e.attr("hp"), Some(&Value::Int(3)));
        // aliases are not mentioned by the prototype
        assert_eq!(e.aliases, vec!["gob".to_string()]);
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let world = MemoryWorld::with(vec![goblin("#1")]);
        let registry = Registry::standard();
        let templates = PrototypeLibrary::new();
        let proto = Prototype::new("goblin")
            .with_key("goblin")
            .with_attr(AttrSpec::new("hp", Value::Int(9)));

        let first =
            batch_update(&proto, &registry, &templates, &world, BatchOptions::default()).unwrap();
        assert_eq!(first.changed, vec!["#1".to_string()]);
        let second =
            batch_update(&proto, &registry, &templates, &world, BatchOptions::default()).unwrap();
        assert_eq!(second.count(), 0);
        assert_eq!(second.unchanged, vec!["#1".to_string()]);
    }

    #[test]
    fn test_implicit_diff_keeps_instance_only_attrs() {
        let mut e = goblin("#1");
        e.set_attr(AttrSpec::new("mana", Value::Int(2)));
        let world = MemoryWorld::with(vec![e]);
        let registry = Registry::standard();
        let templates = PrototypeLibrary::new();
        let proto = Prototype::new("goblin").with_attr(AttrSpec::new("hp", Value::Int(4)));

        batch_update(&proto, &registry, &templates, &world, BatchOptions::default()).unwrap();
        let e = world.get_entity("#1").unwrap();
        assert_eq!(e.attr("hp"), Some(&Value::Int(4)));
        assert_eq!(e.attr("mana"), Some(&Value::Int(2)));
        assert_eq!(e.aliases, vec!["gob".to_string()]);
    }

    #[test]
    fn test_explicit_diff_replaces_and_removes() {
        let mut e = goblin("#1");
        e.set_attr(AttrSpec::new("mana", Value::Int(2)));
        let world = MemoryWorld::with(vec![e.clone()]);
        let registry = Registry::standard();
        let templates = PrototypeLibrary::new();
        let proto = Prototype::new("goblin").with_attr(AttrSpec::new("hp", Value::Int(4)));

        let tree = crate::prototype::diff::diff_prototypes(
            &crate::prototype::entity::prototype_from_entity(&e),
            &proto,
            &DiffOptions::default(),
        )
        .unwrap();
        assert_eq!(flatten_diff(&tree)["attrs"], DiffInstruction::Replace);

        let options = BatchOptions {
            diff: Some(&tree),
            ..Default::default()
        };
        batch_update(&proto, &registry, &templates, &world, options).unwrap();
        let e = world.get_entity("#1").unwrap();
        assert_eq!(e.attr("hp"), Some(&Value::Int(4)));
        assert!(e.attr("mana").is_none());
        assert!(e.aliases.is_empty());
        assert_eq!(e.key, "goblin");
        assert_eq!(e.prototype_keys(), vec!["goblin".to_string()]);
    }

    #[test]
    fn test_bad_reference_is_recorded_as_failure() {
        let world = MemoryWorld::with(vec![goblin("#1")]);
        let registry = Registry::standard();
        let templates = PrototypeLibrary::new();
        let mut proto = Prototype::new("goblin");
        proto.location = Some(Value::str("#404"));

        let report =
            batch_update(&proto, &registry, &templates, &world, BatchOptions::default()).unwrap();
        assert_eq!(report.count(), 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "#1");
    }

    #[test]
    fn test_failed_field_still_retags_and_saves_the_rest() {
        let world = MemoryWorld::with(vec![goblin("#1")]);
        let registry = Registry::standard();
        let templates = PrototypeLibrary::new();
        let mut proto = Prototype::new("hobgoblin").with_key("hobgoblin");
        proto.location = Some(Value::str("#404"));

        let options = BatchOptions {
            entities: Some(vec![world.get_entity("#1").unwrap()]),
            ..Default::default()
        };
        let report = batch_update(&proto, &registry, &templates, &world, options).unwrap();
        assert_eq!(report.count(), 0);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].1.starts_with("location"));

        let e = world.get_entity("#1").unwrap();
        assert_eq!(e.prototype_keys(), vec!["hobgoblin".to_string()]);
        assert_eq!(e.key, "hobgoblin");
        assert!(e.location.is_none());
    }

    #[test]
    fn test_added_field_is_applied() {
        let world = MemoryWorld::with(vec![goblin("#1"), goblin("#2")]);
        world
            .save_entity(&EntityRecord::new("#50", "cave", "typeclasses.rooms.Room"))
            .unwrap();
        let registry = Registry::standard();
        let templates = PrototypeLibrary::new();
        let mut proto = Prototype::new("goblin").with_key("goblin");
        proto.home = Some(Value::str("#50"));

        let (tree, _) = diff_against_entity(
            &proto,
            &world.get_entity("#1").unwrap(),
            &DiffOptions::default(),
        )
        .unwrap();
        assert_eq!(tree["home"].instruction(), Some(DiffInstruction::Add));
        assert_eq!(flatten_diff(&tree)["home"], DiffInstruction::Update);

        let report =
            batch_update(&proto, &registry, &templates, &world, BatchOptions::default()).unwrap();
        assert_eq!(report.count(), 2);
        for id in ["#1", "#2"] {
            assert_eq!(world.get_entity(id).unwrap().home.as_deref(), Some("#50"));
        }
    }

    #[test]
    fn test_explicit_entities_are_retagged() {
        let stray = EntityRecord::new("#9", "rock", "typeclasses.objects.Object");
        let world = MemoryWorld::with(vec![stray.clone()]);
        let registry = Registry::standard();
        let templates = PrototypeLibrary::new();
        let proto = Prototype::new("boulder").with_key("boulder");

        let options = BatchOptions {
            entities: Some(vec![stray]),
            ..Default::default()
        };
        let report = batch_update(&proto, &registry, &templates, &world, options).unwrap();
        assert_eq!(report.count(), 1);
        let e = world.get_entity("#9").unwrap();
        assert_eq!(e.key, "boulder");
        assert_eq!(e.prototype_keys(), vec!["boulder".to_string()]);
    }
}
