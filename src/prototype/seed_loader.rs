//! Prototype files
//!
//! Module prototypes are read from JSON files listed in the config. A file
//! holds either an array of prototype objects or an object mapping
//! prototype keys to prototype objects. In the mapping form the map key is
//! used when the object has no `prototype_key` of its own.

use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::prototype::errors::ProtoError;
use crate::prototype::library::PrototypeLibrary;
use crate::prototype::normalize::normalize_with_base;
use crate::prototype::types::{Prototype, RawPrototype};
use crate::prototype::validate::ensure_default_locks;
use crate::prototype::value::Value;

/// Load and normalize every prototype in one JSON file.
pub fn load_prototypes_from_json<P: AsRef<Path>>(
    path: P,
    custom_reserved: &[String],
    base_typeclass: &str,
) -> Result<Vec<Prototype>, ProtoError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let json: serde_json::Value = serde_json::from_str(&contents).map_err(|e| {
        ProtoError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to parse {}: {}", path.display(), e),
        ))
    })?;

    let raws: Vec<RawPrototype> = match json {
        serde_json::Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| raw_object(item, path, &format!("entry {}", i)))
            .collect::<Result<_, _>>()?,
        serde_json::Value::Object(map) => {
            let mut raws = Vec::with_capacity(map.len());
            for (key, item) in &map {
                let mut raw = raw_object(item, path, key)?;
                raw.entry("prototype_key".to_string())
                    .or_insert_with(|| Value::str(key.clone()));
                raws.push(raw);
            }
            raws
        }
        _ => {
            return Err(ProtoError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "{}: expected an array or an object of prototypes",
                    path.display()
                ),
            )))
        }
    };

    raws.iter()
        .map(|raw| normalize_with_base(raw, custom_reserved, base_typeclass))
        .collect()
}

fn raw_object(item: &serde_json::Value, path: &Path, label: &str) -> Result<RawPrototype, ProtoError> {
    match Value::from_json(item) {
        Value::Dict(map) => Ok(map),
        other => Err(ProtoError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "{} ({}): prototype must be an object, got {}",
                path.display(),
                label,
                other.type_name()
            ),
        ))),
    }
}

/// Build the read-only module library from every configured file.
///
/// Prototypes without `prototype_locks` get the default locks. When two
/// files define the same key the later file wins.
pub fn load_module_library(
    paths: &[PathBuf],
    custom_reserved: &[String],
    base_typeclass: &str,
) -> Result<PrototypeLibrary, ProtoError> {
    let mut library = PrototypeLibrary::new();
    for path in paths {
        let prototypes = load_prototypes_from_json(path, custom_reserved, base_typeclass)?;
        let count = prototypes.len();
        for mut prototype in prototypes {
            ensure_default_locks(&mut prototype);
            let key = prototype.display_name();
            if library.contains(&key) {
                warn!("module prototype {} redefined in {}", key, path.display());
            }
            library.insert(prototype);
        }
        info!("Loaded {} module prototypes from {}", count, path.display());
    }
    Ok(library)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prototype::types::DEFAULT_BASE_TYPECLASS;
    use tempfile::TempDir;

    #[test]
    fn test_load_array_and_mapping_forms() {
        let dir = TempDir::new().expect("tempdir");
        let array = dir.path().join("mobs.json");
        fs::write(
            &array,
            r#"[{"prototype_key": "goblin", "key": "goblin", "tags": ["green", ["mob", "kind"]], "hp": 5}]"#,
        )
        .unwrap();
        let mapping = dir.path().join("items.json");
        fs::write(&mapping, r#"{"sword": {"key": "a sword"}}"#).unwrap();

        let mobs = load_prototypes_from_json(&array, &[], DEFAULT_BASE_TYPECLASS).unwrap();
        assert_eq!(mobs.len(), 1);
        let goblin = &mobs[0];
        assert_eq!(goblin.tags.as_ref().unwrap().len(), 2);
        assert_eq!(
            goblin.attrs.as_ref().unwrap().get("hp", None).map(|a| &a.value),
            Some(&Value::Int(5))
        );

        let items = load_prototypes_from_json(&mapping, &[], DEFAULT_BASE_TYPECLASS).unwrap();
        assert_eq!(items[0].prototype_key.as_deref(), Some("sword"));
        assert_eq!(items[0].typeclass.as_deref(), Some(DEFAULT_BASE_TYPECLASS));
    }

    #[test]
    fn test_module_library_adds_default_locks() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("mobs.json");
        fs::write(&path, r#"[{"prototype_key": "rat"}]"#).unwrap();

        let library = load_module_library(&[path], &[], DEFAULT_BASE_TYPECLASS).unwrap();
        let rat = library.get("RAT").unwrap();
        assert_eq!(rat.prototype_locks.as_deref(), Some("spawn:all();edit:all()"));
    }

    #[test]
    fn test_bad_files_are_invalid_data() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "[1, 2]").unwrap();
        let err = load_prototypes_from_json(&path, &[], DEFAULT_BASE_TYPECLASS).unwrap_err();
        assert!(matches!(err, ProtoError::Io(ref e) if e.kind() == std::io::ErrorKind::InvalidData));

        fs::write(&path, "not json").unwrap();
        assert!(load_prototypes_from_json(&path, &[], DEFAULT_BASE_TYPECLASS).is_err());
    }
}
