//! Post-creation snippets (`exec`).
//!
//! Snippets run against the freshly created entity only, one action call per
//! line, e.g. `set_attr('hp', 10)` or `add_tag('undead', 'race')`. Nothing
//! outside the entity is reachable from a snippet.

use log::debug;

use crate::logutil::escape_log;
use crate::prototype::entity::EntityRecord;
use crate::prototype::errors::ProtoError;
use crate::prototype::protfunc::parse_literal;
use crate::prototype::protfunc::parser::{scan, ArgPart, Call, Segment};
use crate::prototype::types::{AttrSpec, TagSpec};
use crate::prototype::value::Value;

/// Actions a snippet may call.
pub const EXEC_ACTIONS: &[&str] = &[
    "set_attr",
    "del_attr",
    "add_tag",
    "remove_tag",
    "set_key",
    "add_alias",
    "set_desc",
];

/// Runs `exec` snippets in the restricted entity namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecRunner;

impl ExecRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run every snippet in order; the first failing line aborts.
    pub fn run(&self, entity: &mut EntityRecord, snippets: &[String]) -> Result<(), ProtoError> {
        if !snippets.is_empty() {
            debug!("exec on {}: {}", entity.id, escape_log(&snippets.join("\n")));
        }
        for snippet in snippets {
            for line in snippet.lines().map(str::trim) {
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                self.run_line(entity, line)?;
            }
        }
        Ok(())
    }

    fn run_line(&self, entity: &mut EntityRecord, line: &str) -> Result<(), ProtoError> {
        let call = parse_action(line)?;
        let args = call
            .args
            .iter()
            .map(|arg| match arg.sole_part() {
                Some(ArgPart::Quoted { text, .. }) => Ok(Value::Str(text.clone())),
                Some(ArgPart::Text(text)) => Ok(parse_literal(text.trim())
                    .unwrap_or_else(|_| Value::str(text.trim().to_string()))),
                Some(ArgPart::Call(inner)) => Err(ProtoError::Expression(format!(
                    "exec: nested call {} is not allowed",
                    inner.source
                ))),
                None => Err(ProtoError::Expression(format!(
                    "exec: malformed argument in {}",
                    line
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        match (call.name.as_str(), args.as_slice()) {
            ("set_attr", [name, value]) => {
                entity.set_attr(AttrSpec::new(&name.to_string(), value.clone()));
            }
            ("del_attr", [name]) => {
                entity.del_attr(&name.to_string(), None);
            }
            ("add_tag", [name]) => entity.add_tag(TagSpec::new(&name.to_string(), None, None)),
            ("add_tag", [name, category]) => entity.add_tag(TagSpec::new(
                &name.to_string(),
                Some(&category.to_string()),
                None,
            )),
            ("remove_tag", [name]) => {
                entity.remove_tag(&name.to_string(), None);
            }
            ("set_key", [key]) => entity.set_key(&key.to_string()),
            ("add_alias", [alias]) => entity.add_alias(&alias.to_string()),
            ("set_desc", [desc]) => entity.set_attr(AttrSpec::new("desc", desc.clone())),
            (name, args) if EXEC_ACTIONS.contains(&name) => {
                return Err(ProtoError::Expression(format!(
                    "exec: {} does not take {} argument(s)",
                    name,
                    args.len()
                )))
            }
            (name, _) => {
                return Err(ProtoError::Expression(format!(
                    "exec: '{}' is not an allowed action",
                    name
                )))
            }
        }
        Ok(())
    }
}

/// A line must be exactly one `action(args)` call.
fn parse_action(line: &str) -> Result<Call, ProtoError> {
    let source = format!("${}", line.trim_end_matches(';'));
    match scan(&source).as_slice() {
        [Segment::Call(call)] => Ok(call.clone()),
        _ => Err(ProtoError::Expression(format!(
            "exec: '{}' is not a single action call",
            line
        ))),
    }
}
