//! Startup registries.
//!
//! Built once from configuration and then passed by reference into the
//! evaluator, validator and spawner. Nothing here is global or mutable after
//! construction.

use std::collections::BTreeSet;

use crate::config::SpawnerConfig;
use crate::prototype::protfunc::FunctionRegistry;
use crate::prototype::types::DEFAULT_BASE_TYPECLASS;

/// Typeclasses shipped with every world.
pub const STOCK_TYPECLASSES: &[&str] = &[
    DEFAULT_BASE_TYPECLASS,
    "typeclasses.characters.Character",
    "typeclasses.rooms.Room",
    "typeclasses.exits.Exit",
];

/// Set of entity class paths a prototype's `typeclass` may name.
#[derive(Debug, Clone, Default)]
pub struct TypeclassRegistry {
    known: BTreeSet<String>,
}

impl TypeclassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stock() -> Self {
        let mut registry = Self::new();
        for path in STOCK_TYPECLASSES {
            registry.register(path);
        }
        registry
    }

    pub fn register(&mut self, path: &str) {
        self.known.insert(path.trim().to_string());
    }

    pub fn resolve(&self, path: &str) -> Result<&str, String> {
        self.known
            .get(path.trim())
            .map(String::as_str)
            .ok_or_else(|| format!("typeclass '{}' could not be resolved", path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.known.contains(path.trim())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.known.iter().map(String::as_str)
    }
}

/// Everything the engine needs that is decided at startup.
#[derive(Debug)]
pub struct Registry {
    pub functions: FunctionRegistry,
    pub typeclasses: TypeclassRegistry,
    pub base_typeclass: String,
    /// Reserved keys kept at the top level instead of becoming attributes.
    pub custom_reserved_keys: Vec<String>,
}

impl Registry {
    pub fn new(functions: FunctionRegistry, typeclasses: TypeclassRegistry) -> Self {
        Self {
            functions,
            typeclasses,
            base_typeclass: DEFAULT_BASE_TYPECLASS.to_string(),
            custom_reserved_keys: Vec::new(),
        }
    }

    /// Builtin functions and stock typeclasses.
    pub fn standard() -> Self {
        Self::new(FunctionRegistry::with_builtins(), TypeclassRegistry::with_stock())
    }

    pub fn from_config(config: &SpawnerConfig) -> Self {
        let mut typeclasses = TypeclassRegistry::with_stock();
        typeclasses.register(&config.base_typeclass);
        for path in &config.typeclasses {
            typeclasses.register(path);
        }
        Self {
            functions: FunctionRegistry::with_builtins(),
            typeclasses,
            base_typeclass: config.base_typeclass.clone(),
            custom_reserved_keys: config.reserved_keys.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_typeclasses_resolve() {
        let registry = TypeclassRegistry::with_stock();
        assert!(registry.resolve(DEFAULT_BASE_TYPECLASS).is_ok());
        assert!(registry.resolve("typeclasses.nope.Nope").is_err());
    }

    #[test]
    fn test_from_config_registers_extras() {
        let mut config = SpawnerConfig::default();
        config.typeclasses.push("typeclasses.mobs.Goblin".to_string());
        let registry = Registry::from_config(&config);
        assert!(registry.typeclasses.contains("typeclasses.mobs.Goblin"));
        assert!(registry.functions.contains("randint"));
    }
}
