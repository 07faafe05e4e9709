//! Spawning entities from prototypes.
//!
//! Every input goes through the same pipeline: resolve to a prototype,
//! normalize, validate as a final (base) object, flatten, then evaluate each
//! construction field into a [`SpawnBundle`]. All bundles are built before
//! anything is created, so a bad prototype anywhere in the batch creates
//! nothing. If creation itself fails part-way (an `exec` snippet erroring,
//! say), the entities already created for the batch are deleted again.

use log::{info, warn};
use uuid::Uuid;

use crate::prototype::entity::EntityRecord;
use crate::prototype::errors::ProtoError;
use crate::prototype::exec::ExecRunner;
use crate::prototype::flatten::flatten;
use crate::prototype::library::{Layered, PrototypeLibrary, PrototypeSource};
use crate::prototype::locks::Actor;
use crate::prototype::normalize::normalize_with_base;
use crate::prototype::protfunc::{evaluate, ProtFuncContext};
use crate::prototype::registry::Registry;
use crate::prototype::types::{
    AttrSpec, Prototype, RawPrototype, TagSpec, PROTOTYPE_TAG_CATEGORY,
};
use crate::prototype::validate::{validate, ValidateOptions};
use crate::prototype::value::Value;

/// Prefix of the placeholder name given to entities whose prototype has no `key`.
pub const SPAWNED_KEY_PREFIX: &str = "Spawned";

/// Creation, lookup and reference resolution for entities.
pub trait EntityWorld {
    /// Construct an entity from `bundle`: core fields first, then permissions,
    /// locks, aliases, attributes, tags and non-persistent attributes, then
    /// the exec snippets. The entity is persisted before it is returned.
    fn create_entity(&self, bundle: &SpawnBundle, exec: &ExecRunner) -> Result<EntityRecord, ProtoError>;

    /// Entities tagged `(prototype_key, "from_prototype")`.
    fn find_instances(&self, prototype_key: &str) -> Result<Vec<EntityRecord>, ProtoError>;

    /// Turn a reference (`#N`, an entity key, or an already resolved
    /// [`Value::EntityRef`]) into an [`Value::EntityRef`].
    fn resolve_reference(&self, value: &Value) -> Result<Value, ProtoError>;

    fn get_entity(&self, id: &str) -> Result<EntityRecord, ProtoError>;

    fn save_entity(&self, entity: &EntityRecord) -> Result<(), ProtoError>;

    /// Remove an entity; used to undo a batch that failed part-way.
    fn delete_entity(&self, id: &str) -> Result<(), ProtoError>;
}

/// What to spawn.
#[derive(Debug, Clone)]
pub enum SpawnInput {
    /// Stored prototype key.
    Key(String),
    Raw(RawPrototype),
    Prototype(Prototype),
}

impl From<&str> for SpawnInput {
    fn from(key: &str) -> Self {
        SpawnInput::Key(key.to_string())
    }
}

impl From<Prototype> for SpawnInput {
    fn from(prototype: Prototype) -> Self {
        SpawnInput::Prototype(prototype)
    }
}

impl From<RawPrototype> for SpawnInput {
    fn from(raw: RawPrototype) -> Self {
        SpawnInput::Raw(raw)
    }
}

#[derive(Debug, Clone)]
pub struct SpawnOptions<'a> {
    /// `#N` of the spawning entity, visible to embedded functions.
    pub caller: Option<String>,
    /// Parent prototypes consulted before the template store.
    pub prototype_parents: Option<&'a PrototypeLibrary>,
    /// Build the bundles but create nothing.
    pub only_validate: bool,
    pub raise_on_bad_function: bool,
    /// Home for entities whose prototype names none.
    pub default_home: Option<String>,
}

impl Default for SpawnOptions<'_> {
    fn default() -> Self {
        Self {
            caller: None,
            prototype_parents: None,
            only_validate: false,
            raise_on_bad_function: true,
            default_home: None,
        }
    }
}

/// Core construction fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreFields {
    pub key: String,
    pub typeclass: String,
    pub location: Option<Value>,
    pub home: Option<Value>,
    pub destination: Option<Value>,
}

/// Everything needed to construct one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnBundle {
    pub prototype_key: String,
    pub core: CoreFields,
    pub permissions: Vec<String>,
    pub lockstring: String,
    pub aliases: Vec<String>,
    pub nattributes: Vec<(String, Value)>,
    pub attributes: Vec<AttrSpec>,
    pub tags: Vec<TagSpec>,
    pub exec: Vec<String>,
}

#[derive(Debug)]
pub enum SpawnOutcome {
    Created(Vec<EntityRecord>),
    Validated(Vec<SpawnBundle>),
}

impl SpawnOutcome {
    pub fn entities(&self) -> &[EntityRecord] {
        match self {
            SpawnOutcome::Created(entities) => entities,
            SpawnOutcome::Validated(_) => &[],
        }
    }

    pub fn bundles(&self) -> &[SpawnBundle] {
        match self {
            SpawnOutcome::Validated(bundles) => bundles,
            SpawnOutcome::Created(_) => &[],
        }
    }
}

pub struct Spawner<'a> {
    registry: &'a Registry,
    templates: &'a dyn PrototypeSource,
    world: &'a dyn EntityWorld,
    exec: ExecRunner,
}

impl<'a> Spawner<'a> {
    pub fn new(
        registry: &'a Registry,
        templates: &'a dyn PrototypeSource,
        world: &'a dyn EntityWorld,
    ) -> Self {
        Self {
            registry,
            templates,
            world,
            exec: ExecRunner::new(),
        }
    }

    /// Spawn one entity per input, in input order.
    pub fn spawn(&self, inputs: &[SpawnInput], options: &SpawnOptions<'_>) -> Result<SpawnOutcome, ProtoError> {
        let parents = Layered::new(options.prototype_parents, Some(self.templates));

        let mut bundles = Vec::with_capacity(inputs.len());
        for input in inputs {
            let mut prototype = self.resolve_input(input, &parents)?;
            validate(
                &mut prototype,
                None,
                &parents,
                &self.registry.typeclasses,
                ValidateOptions::default(),
            )?;
            let flat = flatten(&prototype, &parents)?;
            bundles.push(self.build_bundle(&flat, options)?);
        }

        if options.only_validate {
            return Ok(SpawnOutcome::Validated(bundles));
        }

        let mut created: Vec<EntityRecord> = Vec::with_capacity(bundles.len());
        for bundle in &bundles {
            let entity = match self.world.create_entity(bundle, &self.exec) {
                Ok(entity) => entity,
                Err(err) => {
                    self.roll_back(&created);
                    return Err(err);
                }
            };
            info!(
                "SPAWN: {} '{}' from prototype {} by {}",
                entity.id,
                entity.key,
                bundle.prototype_key,
                options.caller.as_deref().unwrap_or("system")
            );
            created.push(entity);
        }
        Ok(SpawnOutcome::Created(created))
    }

    /// Undo the entities of a batch whose later member could not be created.
    fn roll_back(&self, created: &[EntityRecord]) {
        for entity in created.iter().rev() {
            match self.world.delete_entity(&entity.id) {
                Ok(()) => info!("SPAWN: {} rolled back", entity.id),
                Err(err) => warn!("SPAWN: could not roll back {}: {}", entity.id, err),
            }
        }
    }

    fn resolve_input(&self, input: &SpawnInput, parents: &Layered<'_>) -> Result<Prototype, ProtoError> {
        let reserved = &self.registry.custom_reserved_keys;
        let base = &self.registry.base_typeclass;
        match input {
            SpawnInput::Key(key) => {
                let found = match parents.get_prototype(key)? {
                    Some(found) => found,
                    None => self.templates.find_prototype(key)?,
                };
                normalize_with_base(&found.to_raw(), reserved, base)
            }
            SpawnInput::Raw(raw) => normalize_with_base(raw, reserved, base),
            SpawnInput::Prototype(proto) => normalize_with_base(&proto.to_raw(), reserved, base),
        }
    }

    fn build_bundle(&self, flat: &Prototype, options: &SpawnOptions<'_>) -> Result<SpawnBundle, ProtoError> {
        let prototype_key = flat
            .prototype_key
            .clone()
            .ok_or_else(|| ProtoError::Internal("flattened prototype lost its key".into()))?;
        let ctx = ProtFuncContext::new(&self.registry.functions)
            .with_caller(options.caller.clone())
            .with_prototype(flat)
            .raising(options.raise_on_bad_function);
        let eval = |value: &Option<Value>| -> Result<Option<Value>, ProtoError> {
            value.as_ref().map(|v| evaluate(v, &ctx)).transpose()
        };

        let key = match eval(&flat.key)? {
            Some(v) if v.is_truthy() => v.to_string(),
            _ => placeholder_key(),
        };
        let typeclass = flat
            .typeclass
            .clone()
            .unwrap_or_else(|| self.registry.base_typeclass.clone());
        let location = self.reference(eval(&flat.location)?)?;
        let destination = self.reference(eval(&flat.destination)?)?;
        let home = match eval(&flat.home)? {
            Some(v) if v.is_truthy() => self.reference(Some(v))?,
            _ => self.default_home(options.default_home.as_deref()),
        };

        let permissions = eval(&flat.permissions)?
            .map(|v| v.to_string_list())
            .unwrap_or_default();
        let aliases = eval(&flat.aliases)?
            .map(|v| v.to_string_list())
            .unwrap_or_default();
        let lockstring = match eval(&flat.locks)? {
            Some(v) if v.is_truthy() => v.to_string(),
            _ => String::new(),
        };

        let mut tags = Vec::new();
        for tag in flat.tags.iter().flatten() {
            let name = evaluate(&Value::str(tag.name.clone()), &ctx)?.to_string();
            tags.push(TagSpec {
                name,
                category: tag.category.clone(),
                data: tag.data.clone(),
            });
        }
        tags.push(TagSpec::new(&prototype_key, Some(PROTOTYPE_TAG_CATEGORY), None));

        let mut attributes = Vec::new();
        for attr in flat.attrs.iter().flatten() {
            attributes.push(AttrSpec {
                value: evaluate(&attr.value, &ctx)?,
                ..attr.clone()
            });
        }
        for (name, value) in &flat.extra {
            attributes.push(AttrSpec::new(name, evaluate(value, &ctx)?));
        }

        let mut nattributes = Vec::new();
        for (name, value) in &flat.ndb {
            nattributes.push((name.clone(), evaluate(value, &ctx)?));
        }

        let exec = eval(&flat.exec)?
            .map(|v| v.to_string_list())
            .unwrap_or_default();

        Ok(SpawnBundle {
            prototype_key,
            core: CoreFields {
                key,
                typeclass,
                location,
                home,
                destination,
            },
            permissions,
            lockstring,
            aliases,
            nattributes,
            attributes,
            tags,
            exec,
        })
    }

    fn reference(&self, value: Option<Value>) -> Result<Option<Value>, ProtoError> {
        match value {
            Some(v) if v.is_truthy() => Ok(Some(self.world.resolve_reference(&v)?)),
            _ => Ok(None),
        }
    }

    /// A missing default home is tolerated: the entity simply has none.
    fn default_home(&self, default_home: Option<&str>) -> Option<Value> {
        let home = default_home?;
        match self.world.resolve_reference(&Value::str(home)) {
            Ok(resolved) => Some(resolved),
            Err(err) => {
                warn!("default home {} unavailable: {}", home, err);
                None
            }
        }
    }
}

fn placeholder_key() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{}", SPAWNED_KEY_PREFIX, &id[..8])
}

/// Gate for prototypes carrying `exec`: the actor must hold `exec_permission`.
///
/// Called by the front end before spawning; the spawner itself never checks.
pub fn authorize_exec(prototype: &Prototype, actor: &Actor, exec_permission: &str) -> Result<(), ProtoError> {
    if !prototype.has_exec() || actor.has_permission(exec_permission) {
        return Ok(());
    }
    Err(ProtoError::PermissionDenied(format!(
        "prototype {} runs exec snippets; {} permission required",
        prototype.display_name(),
        exec_permission
    )))
}
