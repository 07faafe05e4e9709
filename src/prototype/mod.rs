//! Prototype engine: inheritable entity templates and the machinery that
//! turns them into live entities.
//!
//! Data flows normalize → validate → flatten → evaluate → spawn. Diffing and
//! batch updates propagate template edits to entities already spawned.

pub mod diff;
pub mod entity;
pub mod errors;
pub mod exec;
pub mod flatten;
pub mod library;
pub mod locks;
pub mod normalize;
pub mod protfunc;
pub mod records;
pub mod registry;
pub mod seed_loader;
pub mod spawner;
pub mod storage;
pub mod types;
pub mod update;
pub mod validate;
pub mod value;

pub use diff::{
    describe_diff, diff, diff_against_entity, diff_prototypes, flatten_diff, DiffInstruction,
    DiffNode, DiffOptions, DiffTree,
};
pub use entity::{prototype_from_entity, EntityRecord};
pub use errors::ProtoError;
pub use exec::ExecRunner;
pub use flatten::flatten;
pub use library::{Layered, PrototypeLibrary, PrototypeSource};
pub use locks::{Actor, LockChecker, LockFuncChecker};
pub use normalize::{normalize, normalize_with_base};
pub use protfunc::{evaluate, evaluate_for_testing, FunctionRegistry, ProtFuncContext};
pub use registry::{Registry, TypeclassRegistry};
pub use seed_loader::{load_module_library, load_prototypes_from_json};
pub use spawner::{
    authorize_exec, EntityWorld, SpawnBundle, SpawnInput, SpawnOptions, SpawnOutcome, Spawner,
};
pub use storage::{ProtoStore, ProtoStoreBuilder};
pub use update::{batch_update, BatchOptions, BatchReport};
pub use validate::{ensure_default_locks, validate, ValidateOptions};
pub use value::{Slot, Value};
pub use types::*;
