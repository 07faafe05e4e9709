//! Embedded function calls ("protfuncs") inside prototype field values.
//!
//! Evaluation is a two-phase pipeline:
//! 1. [`parser::scan`] finds `$name(args)` calls and the evaluator rewrites
//!    them innermost-first by looking each name up in a [`FunctionRegistry`].
//! 2. The substituted result is coerced with the allow-listed
//!    [`literal::parse_literal`]; if that fails the text is kept as-is.
//!
//! ## Examples
//! ```
//! use protospawn::prototype::protfunc::{evaluate, FunctionRegistry, ProtFuncContext};
//! use protospawn::prototype::value::Value;
//!
//! let registry = FunctionRegistry::with_builtins();
//! let ctx = ProtFuncContext::new(&registry);
//! let result = evaluate(&Value::str("$add(1, 2)"), &ctx).unwrap();
//! assert_eq!(result, Value::Int(3));
//! ```

pub mod builtins;
pub mod literal;
pub mod parser;

use std::cell::Cell;
use std::collections::HashMap;

use log::debug;

use crate::prototype::errors::ProtoError;
use crate::prototype::types::Prototype;
use crate::prototype::value::Value;
pub use literal::parse_literal;
use parser::{Arg, ArgPart, Call, Segment};

/// Sentinel substituted for calls that could not be evaluated in non-raising mode.
pub const UNKNOWN_FUNCTION_MARKER: &str = "<UNKNOWN>";

/// Maximum nesting of calls (and of `$protkey` indirections).
pub const MAX_NESTING_DEPTH: u8 = 10;

/// Signature of every embedded function.
pub type ProtFunc =
    Box<dyn Fn(&[Value], &ProtFuncContext<'_>) -> Result<Value, String> + Send + Sync>;

/// Explicit table of callable functions, built once at startup.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, ProtFunc>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with [`builtins::register_builtins`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtins::register_builtins(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value], &ProtFuncContext<'_>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions
            .insert(name.to_ascii_lowercase(), Box::new(func));
    }

    pub fn get(&self, name: &str) -> Option<&ProtFunc> {
        self.functions.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

/// Context handed to every function call.
pub struct ProtFuncContext<'a> {
    pub registry: &'a FunctionRegistry,
    /// Id of the entity doing the spawning, if any.
    pub caller: Option<String>,
    /// Prototype being spawned (for `$protkey`).
    pub prototype: Option<&'a Prototype>,
    pub raise_on_bad_function: bool,
    depth: Cell<u8>,
}

impl<'a> ProtFuncContext<'a> {
    pub fn new(registry: &'a FunctionRegistry) -> Self {
        Self {
            registry,
            caller: None,
            prototype: None,
            raise_on_bad_function: true,
            depth: Cell::new(0),
        }
    }

    pub fn with_caller(mut self, caller: Option<String>) -> Self {
        self.caller = caller;
        self
    }

    pub fn with_prototype(mut self, prototype: &'a Prototype) -> Self {
        self.prototype = Some(prototype);
        self
    }

    pub fn raising(mut self, raise_on_bad_function: bool) -> Self {
        self.raise_on_bad_function = raise_on_bad_function;
        self
    }

    /// Run `f` one nesting level deeper, failing once [`MAX_NESTING_DEPTH`] is reached.
    pub fn nested<T>(&self, f: impl FnOnce() -> Result<T, String>) -> Result<T, String> {
        let depth = self.depth.get();
        if depth >= MAX_NESTING_DEPTH {
            return Err(format!(
                "expression nested deeper than {} levels",
                MAX_NESTING_DEPTH
            ));
        }
        self.depth.set(depth + 1);
        let result = f();
        self.depth.set(depth);
        result
    }
}

/// Evaluate every embedded call in `value`.
///
/// Non-string values are returned unchanged. Strings without calls are
/// returned unchanged too, so bare references such as `#12` stay text.
pub fn evaluate(value: &Value, ctx: &ProtFuncContext<'_>) -> Result<Value, ProtoError> {
    let Value::Str(text) = value else {
        return Ok(value.clone());
    };
    evaluate_text(text, ctx)
        .map(|(value, _)| value)
        .map_err(ProtoError::Expression)
}

/// Preview mode: never fails. Returns an error message (evaluation error, or
/// a result that looked like a literal but did not parse) next to the best
/// result that could be produced without raising.
pub fn evaluate_for_testing(value: &Value, ctx: &ProtFuncContext<'_>) -> (Option<String>, Value) {
    let Value::Str(text) = value else {
        return (None, value.clone());
    };
    let strict = ProtFuncContext {
        registry: ctx.registry,
        caller: ctx.caller.clone(),
        prototype: ctx.prototype,
        raise_on_bad_function: true,
        depth: Cell::new(0),
    };
    match evaluate_text(text, &strict) {
        Ok((value, literal_error)) => (literal_error, value),
        Err(err) => {
            let lenient = ProtFuncContext {
                raise_on_bad_function: false,
                ..strict
            };
            let fallback = evaluate_text(text, &lenient)
                .map(|(v, _)| v)
                .unwrap_or_else(|_| value.clone());
            (Some(err), fallback)
        }
    }
}

/// Returns the evaluated value plus a note when literal coercion was attempted and failed.
fn evaluate_text(
    text: &str,
    ctx: &ProtFuncContext<'_>,
) -> Result<(Value, Option<String>), String> {
    let segments = parser::scan(text);
    if !segments.iter().any(|s| matches!(s, Segment::Call(_))) {
        return Ok((Value::Str(text.to_string()), None));
    }

    // A string that is exactly one call yields the call's value directly.
    if let [Segment::Call(call)] = segments.as_slice() {
        let value = eval_call(call, ctx)?;
        return Ok(coerce(value));
    }

    let mut out = String::new();
    for segment in &segments {
        match segment {
            Segment::Text(t) => out.push_str(t),
            Segment::Call(call) => out.push_str(&eval_call(call, ctx)?.to_string()),
        }
    }
    Ok(coerce(Value::Str(out)))
}

fn coerce(value: Value) -> (Value, Option<String>) {
    let Value::Str(text) = &value else {
        return (value, None);
    };
    match parse_literal(text) {
        Ok(parsed) => (parsed, None),
        Err(err) => {
            let trimmed = text.trim_start();
            let looked_literal = trimmed.starts_with(['[', '{', '(', '\'', '"']);
            let note = looked_literal.then(|| format!("kept as text, not a literal: {}", err));
            (value, note)
        }
    }
}

fn eval_call(call: &Call, ctx: &ProtFuncContext<'_>) -> Result<Value, String> {
    let Some(func) = ctx.registry.get(&call.name) else {
        if ctx.raise_on_bad_function {
            return Err(format!("unknown function '${}' in {}", call.name, call.source));
        }
        debug!("protfunc: unknown function {} left inert", call.source);
        return Ok(Value::str(UNKNOWN_FUNCTION_MARKER));
    };

    let args = ctx.nested(|| {
        call.args
            .iter()
            .map(|arg| eval_arg(arg, ctx))
            .collect::<Result<Vec<_>, _>>()
    })?;

    match func(&args, ctx) {
        Ok(value) => Ok(value),
        Err(err) if ctx.raise_on_bad_function => Err(format!("{}: {}", call.source, err)),
        Err(err) => {
            debug!("protfunc: {} failed ({}), left inert", call.source, err);
            Ok(Value::str(UNKNOWN_FUNCTION_MARKER))
        }
    }
}

fn eval_arg(arg: &Arg, ctx: &ProtFuncContext<'_>) -> Result<Value, String> {
    match arg.sole_part() {
        Some(ArgPart::Call(call)) => return eval_call(call, ctx),
        Some(ArgPart::Quoted { text, triple: false }) => return Ok(Value::Str(text.clone())),
        Some(ArgPart::Quoted { text, triple: true }) => {
            return Ok(parse_literal(text).unwrap_or_else(|_| Value::Str(text.clone())));
        }
        _ => {}
    }

    // Mixed argument: substitute nested calls, re-quote strings, then coerce.
    let mut out = String::new();
    for part in &arg.parts {
        match part {
            ArgPart::Text(t) => out.push_str(t),
            ArgPart::Quoted { text, .. } => out.push_str(&Value::Str(text.clone()).repr()),
            ArgPart::Call(call) => out.push_str(&eval_call(call, ctx)?.repr()),
        }
    }
    let trimmed = out.trim();
    Ok(parse_literal(trimmed).unwrap_or_else(|_| Value::Str(trimmed.to_string())))
}
