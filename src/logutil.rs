//! Helpers for writing prototype fields and `exec` snippets into logs.

use crate::prototype::value::Value;

const MAX_PREVIEW: usize = 300;

/// Render `s` as one log line. Line breaks, tabs and backslashes come out as
/// their backslash escapes, and anything past `MAX_PREVIEW` characters is cut
/// off with a trailing ellipsis.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Single-line preview of a field value. Strings are shown bare, everything
/// else as its literal.
pub fn preview(value: &Value) -> String {
    match value {
        Value::Str(s) => escape_log(s),
        other => escape_log(&other.repr()),
    }
}
