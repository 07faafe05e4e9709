/// Safe literal parser
///
/// Converts text that looks like a literal into a [`Value`]. Only data is
/// accepted: numbers, quoted strings, `True`/`False`/`None`, and lists,
/// tuples and dicts of those. Nothing is ever executed.
///
/// **Supported Syntax:**
/// - Numbers: `42`, `-3`, `2.5`, `1e3`
/// - Strings: `'single'`, `"double"`, `'''triple'''`
/// - Containers: `[1, 2]`, `(1, 'a')`, `(1,)`, `{'hp': 10}`
use crate::prototype::value::Value;
use std::collections::BTreeMap;

/// Maximum container nesting accepted by the parser.
pub const MAX_LITERAL_DEPTH: usize = 32;

/// Parse the whole of `text` as a single literal.
pub fn parse_literal(text: &str) -> Result<Value, String> {
    let mut parser = LiteralParser::new(text);
    parser.skip_whitespace();
    let value = parser.parse_value(0)?;
    parser.skip_whitespace();
    if parser.current().is_some() {
        return Err(format!(
            "Unexpected trailing input at position {}",
            parser.position
        ));
    }
    Ok(value)
}

struct LiteralParser {
    input: Vec<char>,
    position: usize,
}

impl LiteralParser {
    fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        self.position += 1;
        ch
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        self.skip_whitespace();
        match self.advance() {
            Some(ch) if ch == expected => Ok(()),
            Some(ch) => Err(format!("Expected '{}', found '{}'", expected, ch)),
            None => Err(format!("Expected '{}', found end of input", expected)),
        }
    }

    fn parse_value(&mut self, depth: usize) -> Result<Value, String> {
        if depth > MAX_LITERAL_DEPTH {
            return Err("Literal nested too deeply".to_string());
        }
        self.skip_whitespace();
        match self.current() {
            None => Err("Expected a value, found end of input".to_string()),
            Some('[') => {
                self.advance();
                let items = self.parse_items(']', depth)?;
                Ok(Value::List(items.0))
            }
            Some('(') => {
                self.advance();
                let (mut items, trailing_comma) = self.parse_items(')', depth)?;
                if items.len() == 1 && !trailing_comma {
                    // parenthesized expression, not a tuple
                    Ok(items.remove(0))
                } else {
                    Ok(Value::Tuple(items))
                }
            }
            Some('{') => {
                self.advance();
                self.parse_dict(depth)
            }
            Some('"') | Some('\'') => Ok(Value::Str(self.read_string()?)),
            Some(ch) if ch.is_ascii_digit() || ch == '-' || ch == '+' || ch == '.' => {
                self.read_number()
            }
            Some(ch) if ch.is_alphabetic() => {
                let word = self.read_word();
                match word.as_str() {
                    "True" | "true" => Ok(Value::Bool(true)),
                    "False" | "false" => Ok(Value::Bool(false)),
                    "None" | "null" => Ok(Value::None),
                    _ => Err(format!("Unknown name '{}'", word)),
                }
            }
            Some(ch) => Err(format!("Unexpected character: '{}'", ch)),
        }
    }

    /// Comma separated values up to `close`. Returns whether a trailing comma was seen.
    fn parse_items(&mut self, close: char, depth: usize) -> Result<(Vec<Value>, bool), String> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            self.skip_whitespace();
            if self.current() == Some(close) {
                self.advance();
                return Ok((items, trailing_comma));
            }
            items.push(self.parse_value(depth + 1)?);
            trailing_comma = false;
            self.skip_whitespace();
            match self.advance() {
                Some(',') => trailing_comma = true,
                Some(ch) if ch == close => return Ok((items, false)),
                Some(ch) => return Err(format!("Expected ',' or '{}', found '{}'", close, ch)),
                None => return Err(format!("Unterminated container, expected '{}'", close)),
            }
        }
    }

    fn parse_dict(&mut self, depth: usize) -> Result<Value, String> {
        let mut map = BTreeMap::new();
        loop {
            self.skip_whitespace();
            if self.current() == Some('}') {
                self.advance();
                return Ok(Value::Dict(map));
            }
            let key = match self.parse_value(depth + 1)? {
                Value::List(_) | Value::Dict(_) => {
                    return Err("Dict keys must be scalars".to_string());
                }
                other => other.to_string(),
            };
            self.expect(':')?;
            let value = self.parse_value(depth + 1)?;
            map.insert(key, value);
            self.skip_whitespace();
            match self.advance() {
                Some(',') => {}
                Some('}') => return Ok(Value::Dict(map)),
                Some(ch) => return Err(format!("Expected ',' or '}}', found '{}'", ch)),
                None => return Err("Unterminated dict".to_string()),
            }
        }
    }

    fn read_string(&mut self) -> Result<String, String> {
        let quote = self
            .advance()
            .ok_or_else(|| "Expected a string".to_string())?;
        let triple = self.current() == Some(quote) && self.peek(1) == Some(quote);
        if triple {
            self.advance();
            self.advance();
        }
        let mut result = String::new();

        while let Some(ch) = self.current() {
            if ch == quote {
                if !triple {
                    self.advance();
                    return Ok(result);
                }
                if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    self.position += 3;
                    return Ok(result);
                }
                result.push(ch);
                self.advance();
            } else if ch == '\\' {
                self.advance();
                if let Some(escaped) = self.advance() {
                    match escaped {
                        'n' => result.push('\n'),
                        't' => result.push('\t'),
                        '\\' => result.push('\\'),
                        '"' => result.push('"'),
                        '\'' => result.push('\''),
                        _ => {
                            result.push('\\');
                            result.push(escaped);
                        }
                    }
                }
            } else {
                result.push(ch);
                self.advance();
            }
        }

        Err("Unterminated string literal".to_string())
    }

    fn read_word(&mut self) -> String {
        let mut result = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    fn read_number(&mut self) -> Result<Value, String> {
        let mut text = String::new();
        if let Some(sign @ ('-' | '+')) = self.current() {
            text.push(sign);
            self.advance();
        }
        let mut is_float = false;
        while let Some(ch) = self.current() {
            match ch {
                '0'..='9' | '_' => {
                    if ch != '_' {
                        text.push(ch);
                    }
                }
                '.' => {
                    is_float = true;
                    text.push(ch);
                }
                'e' | 'E' => {
                    is_float = true;
                    text.push(ch);
                    if let Some(sign @ ('-' | '+')) = self.peek(1) {
                        self.advance();
                        text.push(sign);
                    }
                }
                _ => break,
            }
            self.advance();
        }
        if is_float {
            text.parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("Invalid number '{}'", text))
        } else {
            text.parse::<i64>()
                .map(Value::Int)
                .map_err(|_| format!("Invalid number '{}'", text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(parse_literal("42"), Ok(Value::Int(42)));
        assert_eq!(parse_literal(" -3 "), Ok(Value::Int(-3)));
        assert_eq!(parse_literal("2.5"), Ok(Value::Float(2.5)));
        assert_eq!(parse_literal("True"), Ok(Value::Bool(true)));
        assert_eq!(parse_literal("None"), Ok(Value::None));
        assert_eq!(parse_literal("'hi there'"), Ok(Value::str("hi there")));
    }

    #[test]
    fn test_containers() {
        assert_eq!(
            parse_literal("[1, 'a', (2,)]"),
            Ok(Value::List(vec![
                Value::Int(1),
                Value::str("a"),
                Value::Tuple(vec![Value::Int(2)]),
            ]))
        );
        assert_eq!(parse_literal("(5)"), Ok(Value::Int(5)));
        assert_eq!(parse_literal("()"), Ok(Value::Tuple(vec![])));

        let dict = parse_literal("{'hp': 10, 'name': \"orc\"}").unwrap();
        match dict {
            Value::Dict(map) => {
                assert_eq!(map.get("hp"), Some(&Value::Int(10)));
                assert_eq!(map.get("name"), Some(&Value::str("orc")));
            }
            other => panic!("expected dict, got {:?}", other),
        }
    }

    #[test]
    fn test_triple_quoted_string() {
        assert_eq!(parse_literal("'''[1,2,3]'''"), Ok(Value::str("[1,2,3]")));
    }

    #[test]
    fn test_rejects_code_and_garbage() {
        assert!(parse_literal("__import__('os')").is_err());
        assert!(parse_literal("hello world").is_err());
        assert!(parse_literal("[1, 2").is_err());
        assert!(parse_literal("#12").is_err());
        assert!(parse_literal("1 2").is_err());
    }
}
