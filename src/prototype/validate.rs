//! Prototype validation
//!
//! Walks the `prototype_parent` chain looking for the mistakes that would make
//! a prototype unusable:
//! - a parent that names itself, directly or through other parents (fails at once)
//! - a parent that cannot be found
//! - no `typeclass` anywhere in the chain (hard error for final templates,
//!   warning for mixins)
//! - a `typeclass` that does not resolve
//!
//! Hard errors and warnings are collected separately and reported together
//! once the walk is back at the top level.

use log::debug;

use crate::prototype::errors::ProtoError;
use crate::prototype::library::PrototypeSource;
use crate::prototype::registry::TypeclassRegistry;
use crate::prototype::types::{ParentRef, Prototype};

/// How a prototype is about to be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateOptions {
    /// The prototype will be spawned as a final object (not only mixed in).
    pub is_base: bool,
    /// Enforce typeclass and key requirements.
    pub strict: bool,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            is_base: true,
            strict: true,
        }
    }
}

impl ValidateOptions {
    pub fn mixin() -> Self {
        Self {
            is_base: false,
            strict: true,
        }
    }

    pub fn lenient() -> Self {
        Self {
            is_base: true,
            strict: false,
        }
    }
}

#[derive(Default)]
struct Walk {
    /// identity markers of the prototypes on the current path
    visited: Vec<String>,
    depth: usize,
    typeclass_found: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Validate `prototype` and its parent chain.
///
/// On success the prototype's `prototype_locks` is completed with default
/// `spawn` and `edit` clauses.
pub fn validate(
    prototype: &mut Prototype,
    name: Option<&str>,
    parents: &dyn PrototypeSource,
    typeclasses: &TypeclassRegistry,
    options: ValidateOptions,
) -> Result<(), ProtoError> {
    let label = name
        .map(str::to_ascii_lowercase)
        .or_else(|| prototype.prototype_key.as_ref().map(|k| k.to_ascii_lowercase()));
    let display = label.clone().unwrap_or_else(|| "[UNSET]".to_string());

    let mut walk = Walk::default();
    if options.strict && label.is_none() {
        walk.errors.push("Prototype lacks a `prototype_key`.".to_string());
    }

    if let Err(cycle) = walk_chain(prototype, label, parents, typeclasses, options, &mut walk) {
        return Err(ProtoError::Validation {
            name: display,
            errors: vec![cycle],
        });
    }

    if options.strict && options.is_base && !walk.typeclass_found {
        walk.errors.push(format!(
            "Prototype {} has no `typeclass` defined anywhere in its parent chain. \
             Add `typeclass`, or a `prototype_parent` pointing to a prototype with a typeclass.",
            display
        ));
    }

    if !walk.errors.is_empty() {
        dedup(&mut walk.errors);
        return Err(ProtoError::Validation {
            name: display,
            errors: walk.errors,
        });
    }
    if !walk.warnings.is_empty() {
        dedup(&mut walk.warnings);
        return Err(ProtoError::Warning {
            name: display,
            warnings: walk.warnings,
        });
    }

    ensure_default_locks(prototype);
    debug!("validated prototype {}", display);
    Ok(())
}

/// Depth-first over the parent chain. `Err` means a cycle was found and the
/// walk must stop.
fn walk_chain(
    proto: &Prototype,
    label: Option<String>,
    parents: &dyn PrototypeSource,
    typeclasses: &TypeclassRegistry,
    options: ValidateOptions,
    walk: &mut Walk,
) -> Result<(), String> {
    let display = label.clone().unwrap_or_else(|| "[UNSET]".to_string());

    if options.strict && proto.typeclass.is_none() && proto.prototype_parent.is_none() {
        if options.is_base && walk.depth == 0 {
            walk.errors.push(format!(
                "Prototype {} requires `typeclass` or `prototype_parent`.",
                display
            ));
        } else if walk.depth == 0 {
            walk.warnings.push(format!(
                "Prototype {} can only be used as a mixin since it lacks `typeclass` or `prototype_parent` keys.",
                display
            ));
        }
    }

    if let Some(typeclass) = &proto.typeclass {
        walk.typeclass_found = true;
        if let Err(err) = typeclasses.resolve(typeclass) {
            walk.errors.push(format!(
                "Prototype {} is based on typeclass {}, which could not be imported: {}",
                display, typeclass, err
            ));
        }
    }

    let marker = identity_marker(proto, label.as_deref());
    if walk.visited.contains(&marker) {
        return Err(format!("{} has infinite nesting of prototypes.", display));
    }

    for parent in proto.parents() {
        let (parent_proto, parent_label) = match parent {
            ParentRef::Inline(inline) => (inline.as_ref().clone(), inline.prototype_key.clone()),
            ParentRef::Key(key) => {
                let key = key.to_ascii_lowercase();
                if label.as_deref() == Some(key.as_str()) {
                    return Err(format!("Prototype {} tries to parent itself.", display));
                }
                match parents.get_prototype(&key) {
                    Ok(Some(found)) => (found, Some(key)),
                    Ok(None) => {
                        walk.errors.push(format!(
                            "Prototype {}'s `prototype_parent` (named '{}') was not found.",
                            display, key
                        ));
                        continue;
                    }
                    Err(err) => {
                        walk.errors.push(format!(
                            "Prototype {}'s `prototype_parent` '{}' could not be loaded: {}",
                            display, key, err
                        ));
                        continue;
                    }
                }
            }
        };

        walk.visited.push(marker.clone());
        walk.depth += 1;
        let result = walk_chain(&parent_proto, parent_label, parents, typeclasses, options, walk);
        walk.visited.pop();
        walk.depth -= 1;
        result?;
    }
    Ok(())
}

/// Keyed prototypes are identified by key; inline ones by their address.
fn identity_marker(proto: &Prototype, label: Option<&str>) -> String {
    match label {
        Some(l) => l.to_string(),
        None => format!("{:p}", proto),
    }
}

fn dedup(messages: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    messages.retain(|m| seen.insert(m.clone()));
}

/// Make sure `prototype_locks` carries `spawn` and `edit` clauses.
pub fn ensure_default_locks(prototype: &mut Prototype) {
    let existing = prototype.prototype_locks.clone().unwrap_or_default();
    let mut clauses: Vec<(String, String)> = existing
        .split(';')
        .filter_map(|clause| clause.split_once(':'))
        .map(|(kind, rest)| (kind.trim().to_string(), rest.trim().to_string()))
        .collect();
    for access in ["spawn", "edit"] {
        if !clauses.iter().any(|(kind, _)| kind == access) {
            clauses.push((access.to_string(), "all()".to_string()));
        }
    }
    let joined: Vec<String> = clauses
        .into_iter()
        .map(|(kind, rest)| format!("{}:{}", kind, rest))
        .collect();
    prototype.prototype_locks = Some(joined.join(";"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prototype::library::PrototypeLibrary;
    use crate::prototype::types::DEFAULT_BASE_TYPECLASS;

    fn typeclasses() -> TypeclassRegistry {
        TypeclassRegistry::with_stock()
    }

    #[test]
    fn test_valid_prototype_gets_default_locks() {
        let mut proto = Prototype::new("chest").with_typeclass(DEFAULT_BASE_TYPECLASS);
        let lib = PrototypeLibrary::new();
        validate(&mut proto, None, &lib, &typeclasses(), ValidateOptions::default()).unwrap();
        assert_eq!(proto.prototype_locks.as_deref(), Some("spawn:all();edit:all()"));
    }

    #[test]
    fn test_existing_lock_clause_is_kept() {
        let mut proto = Prototype::new("chest");
        proto.prototype_locks = Some("edit:perm(Builder)".to_string());
        ensure_default_locks(&mut proto);
        assert_eq!(
            proto.prototype_locks.as_deref(),
            Some("edit:perm(Builder);spawn:all()")
        );
    }

    #[test]
    fn test_missing_typeclass_is_error_for_base_and_warning_for_mixin() {
        let lib = PrototypeLibrary::new();
        let mut proto = Prototype::new("fragment");
        let err = validate(&mut proto, None, &lib, &typeclasses(), ValidateOptions::default())
            .unwrap_err();
        assert!(matches!(err, ProtoError::Validation { .. }));
        assert!(err.to_string().contains("fragment"));

        let err = validate(&mut proto, None, &lib, &typeclasses(), ValidateOptions::mixin())
            .unwrap_err();
        assert!(err.is_warning());
    }

    #[test]
    fn test_self_parent_is_rejected() {
        let lib = PrototypeLibrary::new();
        let mut proto = Prototype::new("ouroboros").with_parent("OUROBOROS");
        let err = validate(&mut proto, None, &lib, &typeclasses(), ValidateOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("parent itself"));
    }

    #[test]
    fn test_transitive_cycle_is_rejected() {
        let lib = PrototypeLibrary::new()
            .with(Prototype::new("a").with_parent("b"))
            .with(Prototype::new("b").with_parent("a"));
        let mut proto = lib.get("a").cloned().unwrap();
        let err = validate(&mut proto, None, &lib, &typeclasses(), ValidateOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("infinite nesting"));
    }

    #[test]
    fn test_nested_inline_parents_validate() {
        let mut inner = Prototype::default();
        inner.typeclass = Some(DEFAULT_BASE_TYPECLASS.to_string());
        let mut mid = Prototype::default();
        mid.prototype_parent = Some(vec![ParentRef::Inline(Box::new(inner))]);
        let mut proto = Prototype::new("top");
        proto.prototype_parent = Some(vec![ParentRef::Inline(Box::new(mid))]);

        let lib = PrototypeLibrary::new();
        validate(&mut proto, None, &lib, &typeclasses(), ValidateOptions::default()).unwrap();
    }

    #[test]
    fn test_missing_parent_is_reported() {
        let lib = PrototypeLibrary::new();
        let mut proto = Prototype::new("orphan").with_parent("nobody");
        let err = validate(&mut proto, None, &lib, &typeclasses(), ValidateOptions::default())
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("'nobody' was not found") || text.contains("(named 'nobody')"));
    }

    #[test]
    fn test_typeclass_found_in_parent_chain() {
        let lib = PrototypeLibrary::new()
            .with(Prototype::new("goblin").with_typeclass(DEFAULT_BASE_TYPECLASS));
        let mut proto = Prototype::new("goblin_archer").with_parent("goblin");
        validate(&mut proto, None, &lib, &typeclasses(), ValidateOptions::default()).unwrap();
    }

    #[test]
    fn test_unresolvable_typeclass() {
        let lib = PrototypeLibrary::new();
        let mut proto = Prototype::new("ghost").with_typeclass("typeclasses.nowhere.Ghost");
        let err = validate(&mut proto, None, &lib, &typeclasses(), ValidateOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("could not be imported"));
    }

    #[test]
    fn test_lenient_mode_skips_typeclass_requirement() {
        let lib = PrototypeLibrary::new();
        let mut proto = Prototype::new("fragment");
        validate(&mut proto, None, &lib, &typeclasses(), ValidateOptions::lenient()).unwrap();
    }
}
