//! # protospawn - prototype engine for multi-user text worlds
//!
//! Builders describe game entities (rooms, items, creatures) as declarative
//! *prototypes*: field maps that may inherit from other prototypes, embed
//! small function calls in their values, and be stored, searched and
//! permission-checked. The engine turns prototypes into live entities and
//! keeps those entities in sync when the template changes.
//!
//! ## Features
//!
//! - **Normalization and validation**: loose field maps become canonical prototypes; parent chains are checked for cycles, missing parents and typeclasses.
//! - **Inheritance**: multiple parents merge left to right, with identity-keyed merging of tags and attributes.
//! - **Embedded functions**: `$name(args)` calls in field values are evaluated at spawn time through an explicit function registry.
//! - **Spawning**: batches are fully validated before any entity is created.
//! - **Diffs and batch updates**: template changes propagate to spawned instances without clobbering per-instance state.
//! - **Storage**: sled-backed prototype store and entity world, with lock-string permissions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use protospawn::prototype::{
//!     Actor, ProtoStore, Prototype, Registry, SpawnInput, SpawnOptions, Spawner,
//! };
//!
//! fn main() -> Result<(), protospawn::prototype::ProtoError> {
//!     let store = ProtoStore::open("data/protospawn")?;
//!     let goblin = Prototype::new("goblin")
//!         .with_typeclass("typeclasses.objects.Object")
//!         .with_key("goblin");
//!     store.save_prototype(goblin, &Actor::operator())?;
//!
//!     let registry = Registry::standard();
//!     let spawner = Spawner::new(&registry, &store, &store);
//!     let outcome = spawner.spawn(&[SpawnInput::from("goblin")], &SpawnOptions::default())?;
//!     println!("spawned {}", outcome.entities()[0].id);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`prototype`] - the engine: values, normalization, validation, flattening, spawning, diffs, updates and storage
//! - [`config`] - TOML configuration
//! - [`logutil`] - single-line log previews

pub mod config;
pub mod logutil;
pub mod prototype;
