//! Lock strings
//!
//! A lock string is a `;`-separated list of `access_type:expression` clauses,
//! for example `spawn:all();edit:perm(Builder) or id(#3)`.
//!
//! **Supported Syntax:**
//! - Functions: `all()`, `none()`, `false()`, `true()`, `perm(Name)`, `id(#N)`
//! - Operators: `not`, `and`, `or`, parentheses
//!
//! An access type with no clause is allowed. A clause that does not parse is
//! denied.

use log::warn;

/// Permission hierarchy, lowest first. Holding a level grants every level below it.
pub const PERMISSION_HIERARCHY: &[&str] = &["Player", "Helper", "Builder", "Admin", "Developer"];

/// Whoever is asking for access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    /// `#N` of the entity acting, if any.
    pub id: Option<String>,
    pub permissions: Vec<String>,
}

impl Actor {
    pub fn new(id: Option<&str>, permissions: &[&str]) -> Self {
        Self {
            id: id.map(str::to_string),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Actor used by operator tooling: no id, top permission.
    pub fn operator() -> Self {
        Self::new(None, &["Developer"])
    }

    /// Whether the actor holds `permission`, directly or through the hierarchy.
    pub fn has_permission(&self, permission: &str) -> bool {
        if self
            .permissions
            .iter()
            .any(|p| p.eq_ignore_ascii_case(permission))
        {
            return true;
        }
        let Some(wanted) = hierarchy_rank(permission) else {
            return false;
        };
        self.permissions
            .iter()
            .filter_map(|p| hierarchy_rank(p))
            .any(|held| held >= wanted)
    }
}

fn hierarchy_rank(permission: &str) -> Option<usize> {
    PERMISSION_HIERARCHY
        .iter()
        .position(|p| p.eq_ignore_ascii_case(permission.trim()))
}

/// Authorization seam used by the template store and the CLI.
pub trait LockChecker {
    fn check_lock(&self, actor: &Actor, lockstring: &str, access_type: &str) -> bool;
}

/// Default checker for the lock function language above.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockFuncChecker;

impl LockChecker for LockFuncChecker {
    fn check_lock(&self, actor: &Actor, lockstring: &str, access_type: &str) -> bool {
        let Some(expression) = find_clause(lockstring, access_type) else {
            return true;
        };
        match parse_expression(&expression) {
            Ok(ast) => ast.eval(actor),
            Err(err) => {
                warn!(
                    "lock clause '{}:{}' could not be parsed: {}",
                    access_type, expression, err
                );
                false
            }
        }
    }
}

fn find_clause(lockstring: &str, access_type: &str) -> Option<String> {
    lockstring
        .split(';')
        .filter_map(|clause| clause.split_once(':'))
        .find(|(kind, _)| kind.trim().eq_ignore_ascii_case(access_type))
        .map(|(_, expr)| expr.trim().to_string())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Arg(String),
    LeftParen,
    RightParen,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
enum LockNode {
    Func { name: String, args: Vec<String> },
    Not(Box<LockNode>),
    And(Box<LockNode>, Box<LockNode>),
    Or(Box<LockNode>, Box<LockNode>),
}

impl LockNode {
    fn eval(&self, actor: &Actor) -> bool {
        match self {
            LockNode::Not(inner) => !inner.eval(actor),
            LockNode::And(a, b) => a.eval(actor) && b.eval(actor),
            LockNode::Or(a, b) => a.eval(actor) || b.eval(actor),
            LockNode::Func { name, args } => match name.as_str() {
                "all" | "true" => true,
                "none" | "false" => false,
                "perm" => args.iter().any(|p| actor.has_permission(p)),
                "id" | "dbref" => {
                    let Some(id) = actor.id.as_deref() else {
                        return false;
                    };
                    let id = id.trim_start_matches('#');
                    args.iter().any(|a| a.trim().trim_start_matches('#') == id)
                }
                other => {
                    warn!("unknown lock function '{}', denying", other);
                    false
                }
            },
        }
    }
}

/// Splits a clause expression into identifiers, parentheses and raw call arguments.
struct Tokenizer {
    input: Vec<char>,
    position: usize,
    /// true right after `name(`, where raw arguments are read
    in_args: bool,
}

impl Tokenizer {
    fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            in_args: false,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        self.position += 1;
        ch
    }

    fn tokenize(mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        let mut last_was_ident = false;
        loop {
            if self.in_args {
                let mut raw = String::new();
                while let Some(ch) = self.current() {
                    if ch == ')' {
                        break;
                    }
                    raw.push(ch);
                    self.advance();
                }
                if self.current().is_none() {
                    return Err("unclosed '('".to_string());
                }
                for arg in raw.split(',').map(str::trim).filter(|a| !a.is_empty()) {
                    tokens.push(Token::Arg(arg.to_string()));
                }
                self.in_args = false;
                continue;
            }

            while self.current().is_some_and(char::is_whitespace) {
                self.advance();
            }
            let Some(ch) = self.current() else {
                tokens.push(Token::Eof);
                return Ok(tokens);
            };
            match ch {
                '(' => {
                    self.advance();
                    self.in_args = last_was_ident;
                    last_was_ident = false;
                    tokens.push(Token::LeftParen);
                }
                ')' => {
                    self.advance();
                    last_was_ident = false;
                    tokens.push(Token::RightParen);
                }
                c if c.is_alphanumeric() || c == '_' => {
                    let mut ident = String::new();
                    while let Some(c) = self.current() {
                        if c.is_alphanumeric() || c == '_' {
                            ident.push(c);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    let ident = ident.to_ascii_lowercase();
                    last_was_ident = !matches!(ident.as_str(), "not" | "and" | "or");
                    tokens.push(Token::Ident(ident));
                }
                other => return Err(format!("unexpected character '{}'", other)),
            }
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.current(), Token::Ident(k) if k == keyword)
    }

    fn parse_or(&mut self) -> Result<LockNode, String> {
        let mut left = self.parse_and()?;
        while self.is_keyword("or") {
            self.advance();
            let right = self.parse_and()?;
            left = LockNode::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<LockNode, String> {
        let mut left = self.parse_unary()?;
        while self.is_keyword("and") {
            self.advance();
            let right = self.parse_unary()?;
            left = LockNode::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<LockNode, String> {
        if self.is_keyword("not") {
            self.advance();
            return Ok(LockNode::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<LockNode, String> {
        match self.current().clone() {
            Token::LeftParen => {
                self.advance();
                let inner = self.parse_or()?;
                if *self.current() != Token::RightParen {
                    return Err("expected ')'".to_string());
                }
                self.advance();
                Ok(inner)
            }
            Token::Ident(name) => {
                self.advance();
                if *self.current() != Token::LeftParen {
                    return Err(format!("expected '(' after {}", name));
                }
                self.advance();
                let mut args = Vec::new();
                while let Token::Arg(arg) = self.current().clone() {
                    args.push(arg);
                    self.advance();
                }
                if *self.current() != Token::RightParen {
                    return Err(format!("expected ')' closing {}(", name));
                }
                self.advance();
                Ok(LockNode::Func { name, args })
            }
            other => Err(format!("unexpected token {:?}", other)),
        }
    }
}

fn parse_expression(expression: &str) -> Result<LockNode, String> {
    let tokens = Tokenizer::new(expression).tokenize()?;
    let mut parser = Parser {
        tokens,
        position: 0,
    };
    let node = parser.parse_or()?;
    if *parser.current() != Token::Eof {
        return Err(format!("trailing input in '{}'", expression));
    }
    Ok(node)
}
