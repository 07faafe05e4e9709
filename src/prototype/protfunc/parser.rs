/// Scanner for embedded function calls
///
/// Splits a field string into plain text and `$name(arg, ...)` calls. Calls
/// may nest inside arguments; the evaluator walks the resulting tree
/// innermost-first.
///
/// **Supported Syntax:**
/// - Calls: `$randint(1, 6)`, `$add($randint(1, 6), 2)`
/// - Quoted arguments: `$left_justify('  text')`, `$choice('''['a', 'b']''')`
/// - Escapes: `\$` produces a literal dollar sign
/// - Anything else, including bare `#12` references, is plain text
use std::fmt;

/// One piece of a scanned template.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Call(Call),
}

/// A parsed `$name(args)` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Arg>,
    /// Original text of the call, used in error messages.
    pub source: String,
}

/// One argument: a mix of raw text, quoted strings and nested calls.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arg {
    pub parts: Vec<ArgPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgPart {
    Text(String),
    Quoted { text: String, triple: bool },
    Call(Call),
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Arg {
    /// The single meaningful part of this argument, ignoring surrounding whitespace.
    pub fn sole_part(&self) -> Option<&ArgPart> {
        let mut meaningful = self.parts.iter().filter(|p| match p {
            ArgPart::Text(t) => !t.trim().is_empty(),
            _ => true,
        });
        let first = meaningful.next()?;
        if meaningful.next().is_some() {
            None
        } else {
            Some(first)
        }
    }

    fn is_blank(&self) -> bool {
        self.parts.iter().all(|p| match p {
            ArgPart::Text(t) => t.trim().is_empty(),
            _ => false,
        })
    }
}

/// Returns true when `text` contains at least one well-formed call.
pub fn contains_call(text: &str) -> bool {
    scan(text).iter().any(|s| matches!(s, Segment::Call(_)))
}

/// Scan a template into segments. Never fails: malformed calls stay as text.
pub fn scan(text: &str) -> Vec<Segment> {
    let mut scanner = Scanner::new(text);
    scanner.scan_segments()
}

struct Scanner {
    input: Vec<char>,
    position: usize,
}

impl Scanner {
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

    fn scan_segments(&mut self) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut text = String::new();

        while let Some(ch) = self.current() {
            if ch == '\\' && self.peek(1) == Some('$') {
                self.position += 2;
                text.push('$');
                continue;
            }
            if ch == '$' {
                let start = self.position;
                if let Some(call) = self.try_call() {
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Call(call));
                    continue;
                }
                self.position = start;
            }
            text.push(ch);
            self.advance();
        }

        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        segments
    }

    fn read_identifier(&mut self) -> String {
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

    /// Attempt to parse a call at the current `$`. On failure the caller rewinds.
    fn try_call(&mut self) -> Option<Call> {
        let start = self.position;
        self.advance(); // consume '$'
        match self.current() {
            Some(ch) if ch.is_alphabetic() || ch == '_' => {}
            _ => return None,
        }
        let name = self.read_identifier();
        if self.current() != Some('(') {
            return None;
        }
        self.advance(); // consume '('

        let mut args = Vec::new();
        let mut arg = Arg::default();
        let mut text = String::new();
        // open brackets inside the current argument (lists, dicts, tuples)
        let mut nesting: Vec<char> = Vec::new();

        loop {
            let ch = self.current()?;
            match ch {
                '\\' if self.peek(1) == Some('$') => {
                    self.position += 2;
                    text.push('$');
                }
                '$' => {
                    let before = self.position;
                    if let Some(call) = self.try_call() {
                        flush_text(&mut arg, &mut text);
                        arg.parts.push(ArgPart::Call(call));
                    } else {
                        self.position = before + 1;
                        text.push('$');
                    }
                }
                '\'' | '"' => {
                    flush_text(&mut arg, &mut text);
                    let (quoted, triple) = self.read_quoted()?;
                    arg.parts.push(ArgPart::Quoted {
                        text: quoted,
                        triple,
                    });
                }
                '(' | '[' | '{' => {
                    nesting.push(ch);
                    text.push(ch);
                    self.advance();
                }
                ')' | ']' | '}' if !nesting.is_empty() => {
                    nesting.pop();
                    text.push(ch);
                    self.advance();
                }
                ')' => {
                    self.advance();
                    flush_text(&mut arg, &mut text);
                    if !(args.is_empty() && arg.is_blank()) {
                        args.push(arg);
                    }
                    let source: String = self.input[start..self.position].iter().collect();
                    return Some(Call { name, args, source });
                }
                ',' if nesting.is_empty() => {
                    self.advance();
                    flush_text(&mut arg, &mut text);
                    args.push(std::mem::take(&mut arg));
                }
                _ => {
                    text.push(ch);
                    self.advance();
                }
            }
        }
    }

    /// Read a quoted argument, returning its raw inner text. Escapes are kept
    /// verbatim except for escaped quotes.
    fn read_quoted(&mut self) -> Option<(String, bool)> {
        let quote = self.advance()?;
        let triple = self.current() == Some(quote) && self.peek(1) == Some(quote);
        if triple {
            self.position += 2;
        }
        let mut result = String::new();
        loop {
            let ch = self.current()?;
            if ch == '\\' {
                self.advance();
                let escaped = self.advance()?;
                if escaped != quote {
                    result.push('\\');
                }
                result.push(escaped);
                continue;
            }
            if ch == quote {
                if !triple {
                    self.advance();
                    return Some((result, false));
                }
                if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    self.position += 3;
                    return Some((result, true));
                }
            }
            result.push(ch);
            self.advance();
        }
    }
}

fn flush_text(arg: &mut Arg, text: &mut String) {
    if !text.is_empty() {
        arg.parts.push(ArgPart::Text(std::mem::take(text)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only_call(text: &str) -> Call {
        match scan(text).as_slice() {
            [Segment::Call(call)] => call.clone(),
            other => panic!("expected a single call, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_text_has_no_calls() {
        assert_eq!(scan("a goblin"), vec![Segment::Text("a goblin".into())]);
        assert!(!contains_call("#12"));
        assert!(!contains_call("costs $5"));
        assert!(!contains_call("$broken(1, 2"));
    }

    #[test]
    fn test_simple_call_args() {
        let call = only_call("$add(1, 2)");
        assert_eq!(call.name, "add");
        assert_eq!(call.args.len(), 2);
        assert_eq!(call.source, "$add(1, 2)");
    }

    #[test]
    fn test_empty_call_has_no_args() {
        let call = only_call("$random()");
        assert!(call.args.is_empty());
    }

    #[test]
    fn test_nested_call_is_an_arg_part() {
        let call = only_call("$add($randint(1, 6), 2)");
        assert_eq!(call.args.len(), 2);
        match call.args[0].sole_part() {
            Some(ArgPart::Call(inner)) => assert_eq!(inner.name, "randint"),
            other => panic!("expected nested call, got {:?}", other),
        }
    }

    #[test]
    fn test_commas_inside_literals_do_not_split() {
        let call = only_call("$choice([1, 2, 3])");
        assert_eq!(call.args.len(), 1);
        let call = only_call("$left_justify('a, b')");
        assert_eq!(call.args.len(), 1);
    }

    #[test]
    fn test_text_around_calls() {
        let segments = scan("You see $randint(1, 3) coins");
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::Text("You see ".into()));
        assert_eq!(segments[2], Segment::Text(" coins".into()));
    }

    #[test]
    fn test_escaped_dollar() {
        assert_eq!(scan("\\$add(1,2)"), vec![Segment::Text("$add(1,2)".into())]);
    }
}
