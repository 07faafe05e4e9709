//! Standard function set available to every prototype.
//!
//! | call | result |
//! |------|--------|
//! | `$random()` / `$random(a, b)` | float in `[0, 1)`, or a number between `a` and `b` |
//! | `$randint(a, b)` | integer in `[a, b]` |
//! | `$choice(list)` | one element of the list |
//! | `$left_justify(text)` and friends | text padded to the display width |
//! | `$protkey(name)` | evaluated value of another field of this prototype |
//! | `$add/$sub/$mult/$div(a, b)` | arithmetic (add and mult also work on text and lists) |
//! | `$toint(x)` | integer conversion |
//! | `$eval(text)` | literal parse of `text` |
//! | `$obj(#N)` / `$dbref(#N)` / `$objlist(...)` | entity references |

use rand::seq::SliceRandom;
use rand::Rng;

use super::{evaluate, parse_literal, FunctionRegistry, ProtFuncContext};
use crate::prototype::value::Value;

/// Width used by the justify functions when none is given.
pub const DEFAULT_WIDTH: usize = 78;

/// Longest string `$mult` may build.
pub const MAX_REPEAT_LEN: usize = 64 * 1024;

pub fn register_builtins(registry: &mut FunctionRegistry) {
    registry.register("random", random);
    registry.register("randint", randint);
    registry.register("choice", choice);
    registry.register("left_justify", |args, _| justify(args, Align::Left));
    registry.register("right_justify", |args, _| justify(args, Align::Right));
    registry.register("center_justify", |args, _| justify(args, Align::Center));
    registry.register("full_justify", |args, _| justify(args, Align::Full));
    registry.register("protkey", protkey);
    registry.register("add", add);
    registry.register("sub", |args, _| arithmetic(args, "sub", |a, b| a - b, |a, b| a.checked_sub(b)));
    registry.register("mult", mult);
    registry.register("div", div);
    registry.register("toint", toint);
    registry.register("eval", eval);
    registry.register("obj", obj);
    registry.register("dbref", dbref);
    registry.register("objlist", objlist);
}

fn expect_args(args: &[Value], name: &str, min: usize, max: usize) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        if min == max {
            return Err(format!("{} takes {} argument(s), got {}", name, min, args.len()));
        }
        return Err(format!(
            "{} takes {}-{} arguments, got {}",
            name,
            min,
            max,
            args.len()
        ));
    }
    Ok(())
}

fn random(args: &[Value], _: &ProtFuncContext<'_>) -> Result<Value, String> {
    expect_args(args, "random", 0, 2)?;
    let mut rng = rand::thread_rng();
    match args {
        [] => Ok(Value::Float(rng.gen::<f64>())),
        [Value::Int(hi)] => bounded_int(&mut rng, 0, *hi),
        [Value::Int(lo), Value::Int(hi)] => bounded_int(&mut rng, *lo, *hi),
        _ => {
            let (lo, hi) = match args {
                [hi] => (0.0, number(hi, "random")?),
                [lo, hi] => (number(lo, "random")?, number(hi, "random")?),
                _ => unreachable!("arity checked above"),
            };
            if lo > hi {
                return Err("random: lower bound above upper bound".to_string());
            }
            Ok(Value::Float(lo + rng.gen::<f64>() * (hi - lo)))
        }
    }
}

fn randint(args: &[Value], _: &ProtFuncContext<'_>) -> Result<Value, String> {
    expect_args(args, "randint", 2, 2)?;
    let lo = integer(&args[0], "randint")?;
    let hi = integer(&args[1], "randint")?;
    bounded_int(&mut rand::thread_rng(), lo, hi)
}

fn bounded_int(rng: &mut impl Rng, lo: i64, hi: i64) -> Result<Value, String> {
    if lo > hi {
        return Err(format!("empty range {}..={}", lo, hi));
    }
    Ok(Value::Int(rng.gen_range(lo..=hi)))
}

fn choice(args: &[Value], _: &ProtFuncContext<'_>) -> Result<Value, String> {
    let items: Vec<Value> = match args {
        [Value::List(items)] | [Value::Tuple(items)] => items.clone(),
        [Value::Str(text)] => match parse_literal(text) {
            Ok(Value::List(items)) | Ok(Value::Tuple(items)) => items,
            _ => text.split(',').map(|s| Value::str(s.trim())).collect(),
        },
        [] => return Err("choice needs something to choose from".to_string()),
        many => many.to_vec(),
    };
    items
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or_else(|| "choice: nothing to choose from".to_string())
}

#[derive(Clone, Copy)]
enum Align {
    Left,
    Right,
    Center,
    Full,
}

fn justify(args: &[Value], align: Align) -> Result<Value, String> {
    expect_args(args, "justify", 1, 2)?;
    let text = args[0].to_string();
    let width = match args.get(1) {
        Some(w) => usize::try_from(integer(w, "justify")?).map_err(|_| "negative width")?,
        None => DEFAULT_WIDTH,
    };
    let text = text.trim();
    let len = text.chars().count();
    if len >= width {
        return Ok(Value::str(text));
    }
    let pad = width - len;
    let out = match align {
        Align::Left => format!("{}{}", text, " ".repeat(pad)),
        Align::Right => format!("{}{}", " ".repeat(pad), text),
        Align::Center => {
            let left = pad / 2;
            format!("{}{}{}", " ".repeat(left), text, " ".repeat(pad - left))
        }
        Align::Full => full_justify_line(text, width),
    };
    Ok(Value::Str(out))
}

/// Spread the words of `text` so the line fills `width` exactly.
fn full_justify_line(text: &str, width: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 2 {
        return format!("{:<width$}", text, width = width);
    }
    let letters: usize = words.iter().map(|w| w.chars().count()).sum();
    let gaps = words.len() - 1;
    let spaces = width.saturating_sub(letters);
    let base = spaces / gaps;
    let mut extra = spaces % gaps;
    let mut out = String::with_capacity(width);
    for (i, word) in words.iter().enumerate() {
        out.push_str(word);
        if i < gaps {
            let n = base + usize::from(extra > 0);
            extra = extra.saturating_sub(1);
            out.push_str(&" ".repeat(n.max(1)));
        }
    }
    out
}

fn protkey(args: &[Value], ctx: &ProtFuncContext<'_>) -> Result<Value, String> {
    expect_args(args, "protkey", 1, 1)?;
    let name = args[0].to_string();
    let prototype = ctx
        .prototype
        .ok_or_else(|| "protkey used outside of a prototype".to_string())?;
    let value = prototype
        .field(&name)
        .ok_or_else(|| format!("prototype has no field '{}'", name))?;
    ctx.nested(|| evaluate(&value, ctx).map_err(|e| e.to_string()))
}

fn number(value: &Value, name: &str) -> Result<f64, String> {
    match value {
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("{}: '{}' is not a number", name, s)),
        other => other
            .as_float()
            .ok_or_else(|| format!("{}: {} is not a number", name, other.repr())),
    }
}

fn integer(value: &Value, name: &str) -> Result<i64, String> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Float(f) => Ok(f.trunc() as i64),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("{}: '{}' is not an integer", name, s)),
        other => Err(format!("{}: {} is not an integer", name, other.repr())),
    }
}

fn arithmetic(
    args: &[Value],
    name: &str,
    float_op: fn(f64, f64) -> f64,
    int_op: fn(i64, i64) -> Option<i64>,
) -> Result<Value, String> {
    expect_args(args, name, 2, 2)?;
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b)
            .map(Value::Int)
            .ok_or_else(|| format!("{}: integer overflow", name)),
        (a, b) => Ok(Value::Float(float_op(number(a, name)?, number(b, name)?))),
    }
}

fn add(args: &[Value], _: &ProtFuncContext<'_>) -> Result<Value, String> {
    expect_args(args, "add", 2, 2)?;
    match (&args[0], &args[1]) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        (Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().chain(b).cloned().collect())),
        (Value::Tuple(a), Value::Tuple(b)) => {
            Ok(Value::Tuple(a.iter().chain(b).cloned().collect()))
        }
        _ => arithmetic(args, "add", |a, b| a + b, |a, b| a.checked_add(b)),
    }
}

fn mult(args: &[Value], _: &ProtFuncContext<'_>) -> Result<Value, String> {
    expect_args(args, "mult", 2, 2)?;
    match (&args[0], &args[1]) {
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
            let times = usize::try_from(*n).unwrap_or(0);
            match s.len().checked_mul(times) {
                Some(len) if len <= MAX_REPEAT_LEN => Ok(Value::Str(s.repeat(times))),
                _ => Err(format!(
                    "mult: result longer than {} bytes",
                    MAX_REPEAT_LEN
                )),
            }
        }
        _ => arithmetic(args, "mult", |a, b| a * b, |a, b| a.checked_mul(b)),
    }
}

fn div(args: &[Value], _: &ProtFuncContext<'_>) -> Result<Value, String> {
    expect_args(args, "div", 2, 2)?;
    let a = number(&args[0], "div")?;
    let b = number(&args[1], "div")?;
    if b == 0.0 {
        return Err("div: division by zero".to_string());
    }
    Ok(Value::Float(a / b))
}

fn toint(args: &[Value], _: &ProtFuncContext<'_>) -> Result<Value, String> {
    expect_args(args, "toint", 1, 1)?;
    match &args[0] {
        Value::Str(s) => match s.trim().parse::<f64>() {
            Ok(f) => Ok(Value::Int(f.round() as i64)),
            Err(_) => Err(format!("toint: '{}' is not a number", s)),
        },
        Value::Float(f) => Ok(Value::Int(f.round() as i64)),
        other => integer(other, "toint").map(Value::Int),
    }
}

fn eval(args: &[Value], _: &ProtFuncContext<'_>) -> Result<Value, String> {
    expect_args(args, "eval", 1, 1)?;
    match &args[0] {
        Value::Str(s) => Ok(parse_literal(s).unwrap_or_else(|_| Value::Str(s.clone()))),
        other => Ok(other.clone()),
    }
}

fn as_dbref(value: &Value) -> Option<String> {
    match value {
        Value::EntityRef(id) => Some(id.clone()),
        Value::Int(n) if *n >= 0 => Some(format!("#{}", n)),
        Value::Str(s) => {
            let s = s.trim();
            let digits = s.strip_prefix('#')?;
            (!digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
                .then(|| s.to_string())
        }
        _ => None,
    }
}

/// `$obj(#N)`: an entity reference. Non-dbref text is passed through for the
/// reference resolver to match by key.
fn obj(args: &[Value], _: &ProtFuncContext<'_>) -> Result<Value, String> {
    expect_args(args, "obj", 1, 1)?;
    Ok(match as_dbref(&args[0]) {
        Some(id) => Value::EntityRef(id),
        None => args[0].clone(),
    })
}

fn dbref(args: &[Value], _: &ProtFuncContext<'_>) -> Result<Value, String> {
    expect_args(args, "dbref", 1, 1)?;
    as_dbref(&args[0])
        .map(Value::EntityRef)
        .ok_or_else(|| format!("dbref: {} is not a #dbref", args[0].repr()))
}

fn objlist(args: &[Value], ctx: &ProtFuncContext<'_>) -> Result<Value, String> {
    let flat: Vec<Value> = args
        .iter()
        .flat_map(|a| match a {
            Value::List(items) | Value::Tuple(items) => items.clone(),
            other => vec![other.clone()],
        })
        .collect();
    flat.iter()
        .map(|v| obj(std::slice::from_ref(v), ctx))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::List)
}
