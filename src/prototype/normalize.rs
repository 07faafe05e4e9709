//! Prototype normalization
//!
//! Turns a loosely shaped [`RawPrototype`] into the canonical [`Prototype`]:
//! - unrecognized top-level keys become `(key, value, None, "")` attributes
//! - bare-string tags become `(tag, None, None)`
//! - a missing `prototype_key` is synthesized
//! - a prototype with neither `typeclass` nor `prototype_parent` gets the base typeclass
//!
//! The input is never modified.

use chrono::Utc;
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::prototype::errors::ProtoError;
use crate::prototype::records::RecordMap;
use crate::prototype::types::{
    AttrSpec, ConstructionField, FieldKind, MetaField, ParentRef, Prototype, RawPrototype,
    TagSpec, DEFAULT_BASE_TYPECLASS,
};
use crate::prototype::value::Value;

const KEY_HASH: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Prefix of synthesized prototype keys.
pub const SYNTHETIC_KEY_PREFIX: &str = "prototype-";

/// Normalize with the stock base typeclass.
pub fn normalize(raw: &RawPrototype, custom_reserved: &[String]) -> Result<Prototype, ProtoError> {
    normalize_with_base(raw, custom_reserved, DEFAULT_BASE_TYPECLASS)
}

/// Normalize, defaulting `typeclass` to `base_typeclass` for parentless prototypes.
pub fn normalize_with_base(
    raw: &RawPrototype,
    custom_reserved: &[String],
    base_typeclass: &str,
) -> Result<Prototype, ProtoError> {
    let mut proto = Prototype::default();
    let mut loose_attrs = Vec::new();

    for (name, value) in raw {
        match FieldKind::classify(name, custom_reserved) {
            FieldKind::Meta(meta) => apply_meta(&mut proto, meta, value, custom_reserved, base_typeclass)?,
            FieldKind::Construction(field) => apply_construction(&mut proto, field, value)?,
            FieldKind::NonPersistent(short) => {
                proto.ndb.insert(short, value.clone());
            }
            FieldKind::Reserved(key) => {
                proto.extra.insert(key, value.clone());
            }
            FieldKind::SimpleAttribute(key) => loose_attrs.push(AttrSpec::new(&key, value.clone())),
        }
    }

    if !loose_attrs.is_empty() {
        let attrs = proto.attrs.get_or_insert_with(RecordMap::new);
        for attr in loose_attrs {
            attrs.insert(attr);
        }
    }

    if proto.prototype_key.is_none() {
        proto.prototype_key = Some(synthesize_prototype_key());
    }

    if proto.typeclass.is_none() && proto.prototype_parent.is_none() {
        proto.typeclass = Some(base_typeclass.to_string());
    }

    Ok(proto)
}

/// Prefix plus a short hash of the current time. Collisions are unlikely, not impossible.
pub fn synthesize_prototype_key() -> String {
    format!("{}{}", SYNTHETIC_KEY_PREFIX, short_time_hash())
}

/// Seven hex characters derived from the current time.
pub fn short_time_hash() -> String {
    let now = Utc::now();
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros() * 1000);
    let hash = KEY_HASH.checksum(nanos.to_string().as_bytes());
    let hex = format!("{:08x}", hash);
    hex[..7].to_string()
}

fn text(value: &Value, field: &str) -> Result<String, ProtoError> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(value.to_string()),
        other => Err(ProtoError::MalformedRecord(format!(
            "{} must be text, got {}",
            field,
            other.repr()
        ))),
    }
}

fn apply_meta(
    proto: &mut Prototype,
    meta: MetaField,
    value: &Value,
    custom_reserved: &[String],
    base_typeclass: &str,
) -> Result<(), ProtoError> {
    match meta {
        MetaField::PrototypeKey => {
            if value.is_truthy() {
                proto.prototype_key = Some(text(value, "prototype_key")?);
            }
        }
        MetaField::PrototypeDesc => proto.prototype_desc = Some(text(value, "prototype_desc")?),
        MetaField::PrototypeTags => proto.prototype_tags = Some(value.to_string_list()),
        MetaField::PrototypeLocks => proto.prototype_locks = Some(text(value, "prototype_locks")?),
        MetaField::PrototypeParent => {
            let parents = parse_parents(value, custom_reserved, base_typeclass)?;
            if !parents.is_empty() {
                proto.prototype_parent = Some(parents);
            }
        }
    }
    Ok(())
}

fn parse_parents(
    value: &Value,
    custom_reserved: &[String],
    base_typeclass: &str,
) -> Result<Vec<ParentRef>, ProtoError> {
    let one = |v: &Value| -> Result<ParentRef, ProtoError> {
        match v {
            Value::Str(key) => Ok(ParentRef::Key(key.clone())),
            Value::Dict(map) => {
                let mut inline = RawPrototype::new();
                for (k, v) in map {
                    inline.insert(k.clone(), v.clone());
                }
                let parsed = normalize_inline(&inline, custom_reserved, base_typeclass)?;
                Ok(ParentRef::Inline(Box::new(parsed)))
            }
            other => Err(ProtoError::MalformedRecord(format!(
                "prototype_parent entries must be keys or prototypes, got {}",
                other.repr()
            ))),
        }
    };
    match value {
        Value::None => Ok(Vec::new()),
        Value::List(items) | Value::Tuple(items) => items.iter().map(one).collect(),
        other => Ok(vec![one(other)?]),
    }
}

/// Inline parents keep no synthesized key: they are identified by their contents.
fn normalize_inline(
    raw: &RawPrototype,
    custom_reserved: &[String],
    base_typeclass: &str,
) -> Result<Prototype, ProtoError> {
    let had_key = raw.contains_key("prototype_key");
    let mut proto = normalize_with_base(raw, custom_reserved, base_typeclass)?;
    if !had_key {
        proto.prototype_key = None;
    }
    if !raw.contains_key("typeclass") {
        // mixins inherit their typeclass from whatever they are mixed into
        proto.typeclass = None;
    }
    Ok(proto)
}

fn apply_construction(
    proto: &mut Prototype,
    field: ConstructionField,
    value: &Value,
) -> Result<(), ProtoError> {
    match field {
        ConstructionField::Typeclass => {
            if value.is_truthy() {
                proto.typeclass = Some(text(value, "typeclass")?);
            }
        }
        ConstructionField::Tags => {
            let tags = match value {
                Value::None => RecordMap::new(),
                Value::Tuple(items) if is_single_tag(items) => {
                    std::iter::once(TagSpec::from_value(value)?).collect()
                }
                Value::List(items) | Value::Tuple(items) => items
                    .iter()
                    .map(TagSpec::from_value)
                    .collect::<Result<_, _>>()?,
                single => std::iter::once(TagSpec::from_value(single)?).collect(),
            };
            proto.tags = Some(tags);
        }
        ConstructionField::Attrs => {
            let attrs = match value {
                Value::None => RecordMap::new(),
                Value::List(items) | Value::Tuple(items) => items
                    .iter()
                    .map(AttrSpec::from_value)
                    .collect::<Result<_, _>>()?,
                other => {
                    return Err(ProtoError::MalformedRecord(format!(
                        "attrs must be a list of records, got {}",
                        other.repr()
                    )))
                }
            };
            proto.attrs = Some(attrs);
        }
        ConstructionField::Key => proto.key = Some(value.clone()),
        ConstructionField::Aliases => proto.aliases = Some(value.clone()),
        ConstructionField::Location => proto.location = Some(value.clone()),
        ConstructionField::Home => proto.home = Some(value.clone()),
        ConstructionField::Destination => proto.destination = Some(value.clone()),
        ConstructionField::Permissions => proto.permissions = Some(value.clone()),
        ConstructionField::Locks => proto.locks = Some(value.clone()),
        ConstructionField::Exec => proto.exec = Some(value.clone()),
    }
    Ok(())
}

/// A flat tuple such as `("red", "colour")` is one tag, not two.
fn is_single_tag(items: &[Value]) -> bool {
    (1..=3).contains(&items.len()) && items.iter().all(|v| !v.is_sequence())
}
