//! Inheritance resolution.
//!
//! Parents are flattened depth-first and merged left to right, so a later
//! parent overrides an earlier one and the prototype itself overrides all of
//! them. Plain fields are replaced wholesale; `tags` and `attrs` merge by
//! `(name, category)` identity through [`RecordMap::merge`].

use log::trace;

use crate::prototype::errors::ProtoError;
use crate::prototype::library::PrototypeSource;
use crate::prototype::records::RecordMap;
use crate::prototype::types::{ParentRef, Prototype};

/// Resolve every `prototype_parent` of `prototype` into one self-contained
/// prototype. The result has no `prototype_parent` and keeps the input's own
/// `prototype_key`.
pub fn flatten(prototype: &Prototype, parents: &dyn PrototypeSource) -> Result<Prototype, ProtoError> {
    let mut path = Vec::new();
    let mut flat = resolve(prototype, parents, &mut path)?;
    flat.prototype_key = prototype.prototype_key.clone();
    Ok(flat)
}

fn resolve(
    prototype: &Prototype,
    parents: &dyn PrototypeSource,
    path: &mut Vec<String>,
) -> Result<Prototype, ProtoError> {
    let mut working = Prototype::default();

    for parent in prototype.parents() {
        let label = parent.label();
        let flat_parent = match parent {
            // an inline value is owned by its child, so only keyed parents can loop
            ParentRef::Inline(inline) => {
                trace!("flatten: {} <- {}", prototype.display_name(), label);
                resolve(inline, parents, path)?
            }
            ParentRef::Key(key) => {
                if path.contains(&label) {
                    return Err(ProtoError::Validation {
                        name: prototype.display_name(),
                        errors: vec![format!("{} has infinite nesting of prototypes.", label)],
                    });
                }
                let resolved = parents.get_prototype(key)?.ok_or_else(|| {
                    ProtoError::NotFound(format!(
                        "prototype_parent '{}' of {}",
                        key,
                        prototype.display_name()
                    ))
                })?;
                trace!("flatten: {} <- {}", prototype.display_name(), label);

                path.push(label);
                let flat_parent = resolve(&resolved, parents, path);
                path.pop();
                flat_parent?
            }
        };
        merge_onto(&mut working, &flat_parent);
    }

    merge_onto(&mut working, prototype);
    working.prototype_parent = None;
    Ok(working)
}

/// Lay `layer` on top of `working`: set fields replace, record fields merge.
fn merge_onto(working: &mut Prototype, layer: &Prototype) {
    fn take<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
        if let Some(v) = value {
            *slot = Some(v.clone());
        }
    }

    take(&mut working.prototype_key, &layer.prototype_key);
    take(&mut working.prototype_desc, &layer.prototype_desc);
    take(&mut working.prototype_tags, &layer.prototype_tags);
    take(&mut working.prototype_locks, &layer.prototype_locks);
    take(&mut working.typeclass, &layer.typeclass);
    take(&mut working.key, &layer.key);
    take(&mut working.aliases, &layer.aliases);
    take(&mut working.location, &layer.location);
    take(&mut working.home, &layer.home);
    take(&mut working.destination, &layer.destination);
    take(&mut working.permissions, &layer.permissions);
    take(&mut working.locks, &layer.locks);
    take(&mut working.exec, &layer.exec);

    if let Some(tags) = &layer.tags {
        working.tags.get_or_insert_with(RecordMap::new).merge(tags);
    }
    if let Some(attrs) = &layer.attrs {
        working.attrs.get_or_insert_with(RecordMap::new).merge(attrs);
    }
    for (name, value) in &layer.ndb {
        working.ndb.insert(name.clone(), value.clone());
    }
    for (name, value) in &layer.extra {
        working.extra.insert(name.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prototype::library::PrototypeLibrary;
    use crate::prototype::types::{AttrSpec, TagSpec};
    use crate::prototype::value::Value;

    fn goblins() -> PrototypeLibrary {
        PrototypeLibrary::new()
            .with(
                Prototype::new("GOBLIN")
                    .with_typeclass("T")
                    .with_key("goblin grunt")
                    .with_attr(AttrSpec::new("resists", Value::list_of_strings(["cold", "poison"])))
                    .with_attr(AttrSpec::new("attacks", Value::list_of_strings(["fists"]))),
            )
            .with(
                Prototype::new("GOBLIN_WIZARD")
                    .with_parent("GOBLIN")
                    .with_key("goblin wizard")
                    .with_attr(AttrSpec::new("attacks", Value::list_of_strings(["fire bolt"]))),
            )
            .with(
                Prototype::new("ARCHWIZARD")
                    .with_attr(AttrSpec::new("attacks", Value::list_of_strings(["archwizard staff"]))),
            )
    }

    fn attr(proto: &Prototype, name: &str) -> Value {
        proto.attrs.as_ref().unwrap().get(name, None).unwrap().value.clone()
    }

    #[test]
    fn test_child_overrides_parent() {
        let archer = Prototype::new("GOBLIN_ARCHER")
            .with_parent("GOBLIN")
            .with_key("goblin archer")
            .with_attr(AttrSpec::new("attacks", Value::list_of_strings(["short bow"])));
        let flat = flatten(&archer, &goblins()).unwrap();

        assert_eq!(flat.key, Some(Value::str("goblin archer")));
        assert_eq!(attr(&flat, "attacks"), Value::list_of_strings(["short bow"]));
        assert_eq!(attr(&flat, "resists"), Value::list_of_strings(["cold", "poison"]));
        assert_eq!(flat.typeclass.as_deref(), Some("T"));
        assert!(flat.prototype_parent.is_none());
        assert_eq!(flat.prototype_key.as_deref(), Some("GOBLIN_ARCHER"));
    }

    #[test]
    fn test_rightmost_parent_wins() {
        let archwizard = Prototype::new("GOBLIN_ARCHWIZARD")
            .with_key("goblin archwizard")
            .with_parent("GOBLIN_WIZARD")
            .with_parent("ARCHWIZARD");
        let flat = flatten(&archwizard, &goblins()).unwrap();
        assert_eq!(
            attr(&flat, "attacks"),
            Value::list_of_strings(["archwizard staff"])
        );
        assert_eq!(flat.key, Some(Value::str("goblin archwizard")));
    }

    #[test]
    fn test_tags_merge_by_identity() {
        let lib = PrototypeLibrary::new().with(
            Prototype::new("base")
                .with_typeclass("T")
                .with_tag(TagSpec::new("foo", Some("catA"), Some("olddata")))
                .with_tag(TagSpec::new("bar", None, None)),
        );
        let child = Prototype::new("child")
            .with_parent("base")
            .with_tag(TagSpec::new("foo", Some("catA"), Some("newdata")));
        let flat = flatten(&child, &lib).unwrap();
        assert_eq!(
            flat.tags.unwrap().into_vec(),
            vec![
                TagSpec::new("bar", None, None),
                TagSpec::new("foo", Some("catA"), Some("newdata")),
            ]
        );
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let archer = Prototype::new("GOBLIN_ARCHER").with_parent("GOBLIN");
        let lib = goblins();
        let once = flatten(&archer, &lib).unwrap();
        let twice = flatten(&once, &lib).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_inline_parent_needs_no_lookup() {
        let mut inline = Prototype::default();
        inline.typeclass = Some("T".into());
        inline.location = Some(Value::str("#2"));
        let mut proto = Prototype::new("placed");
        proto.prototype_parent = Some(vec![ParentRef::Inline(Box::new(inline))]);
        let flat = flatten(&proto, &PrototypeLibrary::new()).unwrap();
        assert_eq!(flat.location, Some(Value::str("#2")));
    }

    #[test]
    fn test_nested_inline_parents() {
        let mut inner = Prototype::default();
        inner.typeclass = Some("T".into());
        inner.home = Some(Value::str("#1"));
        let mut mid = Prototype::default();
        mid.key = Some(Value::str("lamp"));
        mid.prototype_parent = Some(vec![ParentRef::Inline(Box::new(inner))]);
        let mut proto = Prototype::new("top");
        proto.prototype_parent = Some(vec![ParentRef::Inline(Box::new(mid))]);

        let flat = flatten(&proto, &PrototypeLibrary::new()).unwrap();
        assert_eq!(flat.typeclass.as_deref(), Some("T"));
        assert_eq!(flat.home, Some(Value::str("#1")));
        assert_eq!(flat.key, Some(Value::str("lamp")));
        assert_eq!(flat.prototype_key.as_deref(), Some("top"));
    }

    #[test]
    fn test_keyed_cycle_through_inline_parent_fails() {
        let mut inline = Prototype::default();
        inline.prototype_parent = Some(vec![ParentRef::Key("a".into())]);
        let mut a = Prototype::new("a");
        a.prototype_parent = Some(vec![ParentRef::Inline(Box::new(inline))]);
        let lib = PrototypeLibrary::new().with(a);

        let child = Prototype::new("child").with_parent("a");
        assert!(matches!(
            flatten(&child, &lib),
            Err(ProtoError::Validation { .. })
        ));
    }

    #[test]
    fn test_missing_parent_and_cycles_fail() {
        let orphan = Prototype::new("orphan").with_parent("nobody");
        assert!(matches!(
            flatten(&orphan, &PrototypeLibrary::new()),
            Err(ProtoError::NotFound(_))
        ));

        let lib = PrototypeLibrary::new()
            .with(Prototype::new("a").with_parent("b"))
            .with(Prototype::new("b").with_parent("a"));
        let a = lib.get("a").cloned().unwrap();
        assert!(matches!(
            flatten(&a, &lib),
            Err(ProtoError::Validation { .. })
        ));
    }
}
