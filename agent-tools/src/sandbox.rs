//! Restricted evaluation of user-authored argument strings.
//!
//! An argument string such as `path="notes.md", limit=2 * 50, reader()` is split
//! on top-level commas. Each part is either `identifier = expression` (a keyword
//! argument) or a bare expression (a positional argument). Expressions follow a
//! deliberately small grammar:
//!
//! ```text
//! expr     := additive
//! additive := term (("+" | "-") term)*
//! term     := unary (("*" | "/") unary)*
//! unary    := "-" unary | "+" unary | postfix
//! postfix  := primary ("[" expr "]")*
//! primary  := number | string | True | False | None
//!           | name "(" args? ")" | name
//!           | "(" expr ")" | "[" items? "]" | "{" pairs? "}"
//! ```
//!
//! The only names in scope are the capabilities held by the registry. Every
//! part is parsed before anything is evaluated, and any failure discards the
//! whole argument string.

use std::panic::{self, AssertUnwindSafe};

use agent_primitives::{ResolvedArguments, is_identifier};
use serde_json::{Map, Number, Value};
use tracing::{debug, error};

use crate::error::{ToolError, ToolResult, panic_message};
use crate::registry::CapabilityRegistry;

/// Longest argument string accepted, in characters.
pub const MAX_ARGUMENT_LENGTH: usize = 1000;

/// Deepest expression nesting accepted by the parser.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Evaluates argument strings against the capabilities of a registry.
#[derive(Debug, Clone, Copy)]
pub struct ExpressionSandbox<'r> {
    registry: &'r CapabilityRegistry,
}

impl<'r> ExpressionSandbox<'r> {
    /// Creates a sandbox whose namespace is the given registry.
    #[must_use]
    pub const fn new(registry: &'r CapabilityRegistry) -> Self {
        Self { registry }
    }

    /// Parses and evaluates an argument string.
    ///
    /// `None` and blank input produce empty arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::MalformedArgument`] when the input is too long,
    /// contains an unsupported construct or an undefined name, or when a
    /// capability call inside it fails. No argument is returned in that case.
    pub fn parse(&self, input: Option<&str>) -> ToolResult<ResolvedArguments> {
        let Some(input) = input.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(ResolvedArguments::new());
        };

        let parts = parse_argument_list(input).inspect_err(|err| {
            error!(input, error = %err, "rejected argument string");
        })?;

        let mut args = ResolvedArguments::new();
        for part in parts {
            match part {
                Argument::Positional(expr) => {
                    let value = self.eval(&expr)?;
                    args = args.with_positional(value);
                }
                Argument::Keyword(name, expr) => {
                    let value = self.eval(&expr)?;
                    args.insert_keyword(name, value);
                }
            }
        }
        debug!(input, positional = args.positional().len(), keyword = args.keyword().len(), "parsed arguments");
        Ok(args)
    }

    /// Evaluates a single expression.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::MalformedArgument`] under the same conditions as
    /// [`ExpressionSandbox::parse`].
    pub fn evaluate(&self, expression: &str) -> ToolResult<Value> {
        check_length(expression)?;
        let tokens = tokenize(expression)?;
        let expr = Parser::new(&tokens).parse_complete()?;
        self.eval(&expr)
    }

    fn eval(&self, expr: &Expr) -> ToolResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => Err(if self.registry.contains(name) {
                ToolError::malformed(format!("capability `{name}` must be called, e.g. `{name}()`"))
            } else {
                ToolError::malformed(format!("name `{name}` is not defined"))
            }),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<ToolResult<Vec<_>>>()
                .map(Value::Array),
            Expr::Dict(pairs) => {
                let mut object = Map::new();
                for (key, value) in pairs {
                    let Value::String(key) = self.eval(key)? else {
                        return Err(ToolError::malformed("dictionary keys must be strings"));
                    };
                    object.insert(key, self.eval(value)?);
                }
                Ok(Value::Object(object))
            }
            Expr::Negate(inner) => negate(self.eval(inner)?),
            Expr::Binary(op, lhs, rhs) => binary(*op, self.eval(lhs)?, self.eval(rhs)?),
            Expr::Index(target, index) => subscript(self.eval(target)?, &self.eval(index)?),
            Expr::Call {
                callee,
                positional,
                keyword,
            } => {
                let handle = self
                    .registry
                    .get_capability(callee)
                    .ok_or_else(|| ToolError::malformed(format!("name `{callee}` is not defined")))?;

                let mut args = ResolvedArguments::new();
                for expr in positional {
                    args = args.with_positional(self.eval(expr)?);
                }
                for (name, expr) in keyword {
                    args.insert_keyword(name.clone(), self.eval(expr)?);
                }

                panic::catch_unwind(AssertUnwindSafe(|| handle.invoke(args)))
                    .unwrap_or_else(|payload| {
                        Err(ToolError::construction(format!(
                            "`{callee}` panicked: {}",
                            panic_message(payload.as_ref())
                        )))
                    })
                    .map_err(|err| {
                        ToolError::malformed(format!("error evaluating `{callee}(...)`: {err}"))
                    })
            }
        }
    }
}

#[derive(Debug)]
enum Argument {
    Positional(Expr),
    Keyword(String, Expr),
}

fn check_length(input: &str) -> ToolResult<()> {
    let length = input.chars().count();
    if length > MAX_ARGUMENT_LENGTH {
        return Err(ToolError::malformed(format!(
            "input is {length} characters long, maximum allowed is {MAX_ARGUMENT_LENGTH}"
        )));
    }
    Ok(())
}

/// Parses every top-level part of the argument string without evaluating it.
fn parse_argument_list(input: &str) -> ToolResult<Vec<Argument>> {
    check_length(input)?;
    let tokens = tokenize(input)?;

    let mut arguments = Vec::new();
    for part in split_top_level(&tokens)? {
        if part.is_empty() {
            continue;
        }
        let assignments = top_level_positions(part, &Token::Assign);
        let argument = match assignments.as_slice() {
            [] => Argument::Positional(Parser::new(part).parse_complete()?),
            [1] => match &part[0] {
                Token::Name(key) if is_identifier(key) => {
                    let value = &part[2..];
                    if value.is_empty() {
                        return Err(ToolError::malformed(format!("keyword `{key}` has no value")));
                    }
                    Argument::Keyword(key.clone(), Parser::new(value).parse_complete()?)
                }
                other => {
                    return Err(ToolError::malformed(format!(
                        "invalid keyword `{other}`, must be a valid identifier"
                    )));
                }
            },
            [_] => {
                return Err(ToolError::malformed(
                    "keyword arguments must have the form `name=value`",
                ));
            }
            _ => {
                return Err(ToolError::malformed(
                    "malformed argument, use `key=value` for keyword arguments",
                ));
            }
        };
        arguments.push(argument);
    }
    Ok(arguments)
}

fn split_top_level(tokens: &[Token]) -> ToolResult<Vec<&[Token]>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::LParen | Token::LBracket | Token::LBrace => depth += 1,
            Token::RParen | Token::RBracket | Token::RBrace => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ToolError::malformed(format!("unbalanced `{token}`")))?;
            }
            Token::Comma if depth == 0 => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ToolError::malformed("unclosed bracket"));
    }
    parts.push(&tokens[start..]);
    Ok(parts)
}

fn top_level_positions(tokens: &[Token], needle: &Token) -> Vec<usize> {
    let mut depth = 0usize;
    let mut positions = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::LParen | Token::LBracket | Token::LBrace => depth += 1,
            Token::RParen | Token::RBracket | Token::RBrace => depth = depth.saturating_sub(1),
            t if depth == 0 && t == needle => positions.push(i),
            _ => {}
        }
    }
    positions
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Name(v) => f.write_str(v),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::LBracket => f.write_str("["),
            Self::RBracket => f.write_str("]"),
            Self::LBrace => f.write_str("{"),
            Self::RBrace => f.write_str("}"),
            Self::Comma => f.write_str(","),
            Self::Colon => f.write_str(":"),
            Self::Assign => f.write_str("="),
            Self::Plus => f.write_str("+"),
            Self::Minus => f.write_str("-"),
            Self::Star => f.write_str("*"),
            Self::Slash => f.write_str("/"),
        }
    }
}

fn tokenize(input: &str) -> ToolResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '=' => Token::Assign,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '"' | '\'' => {
                chars.next();
                tokens.push(Token::Str(lex_string(&mut chars, c)?));
                continue;
            }
            c if c.is_ascii_digit() => {
                tokens.push(lex_number(input, start, &mut chars)?);
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                tokens.push(lex_name(input, start, &mut chars));
                continue;
            }
            other => {
                return Err(ToolError::malformed(format!(
                    "unsupported character `{other}` at offset {start}"
                )));
            }
        };
        chars.next();
        tokens.push(token);
    }
    Ok(tokens)
}

type Chars<'a> = std::iter::Peekable<std::str::CharIndices<'a>>;

fn lex_string(chars: &mut Chars<'_>, quote: char) -> ToolResult<String> {
    let mut out = String::new();
    while let Some((_, c)) = chars.next() {
        match c {
            c if c == quote => return Ok(out),
            '\\' => match chars.next().map(|(_, c)| c) {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some(c @ ('\\' | '\'' | '"')) => out.push(c),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => break,
            },
            c => out.push(c),
        }
    }
    Err(ToolError::malformed("unterminated string literal"))
}

fn lex_number(input: &str, start: usize, chars: &mut Chars<'_>) -> ToolResult<Token> {
    let mut end = start;
    let mut is_float = false;
    let mut prev = '\0';
    while let Some(&(i, c)) = chars.peek() {
        let accept = match c {
            '0'..='9' | '_' => true,
            '.' if !is_float => {
                is_float = true;
                true
            }
            'e' | 'E' => {
                is_float = true;
                true
            }
            '+' | '-' => matches!(prev, 'e' | 'E'),
            _ => false,
        };
        if !accept {
            break;
        }
        prev = c;
        end = i + c.len_utf8();
        chars.next();
    }

    let literal: String = input[start..end].chars().filter(|c| *c != '_').collect();
    let invalid = || ToolError::malformed(format!("invalid number literal `{}`", &input[start..end]));
    if is_float {
        literal.parse::<f64>().map(Token::Float).map_err(|_| invalid())
    } else {
        literal.parse::<i64>().map(Token::Int).map_err(|_| invalid())
    }
}

fn lex_name(input: &str, start: usize, chars: &mut Chars<'_>) -> Token {
    let mut end = start;
    let mut after_dot = false;
    while let Some(&(i, c)) = chars.peek() {
        let accept = if c == '.' {
            // A dot only continues the name when an identifier follows it.
            let mut lookahead = input[i + 1..].chars();
            let continues = matches!(lookahead.next(), Some(n) if n.is_ascii_alphabetic() || n == '_');
            !after_dot && continues
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };
        if !accept {
            break;
        }
        after_dot = c == '.';
        end = i + c.len_utf8();
        chars.next();
    }
    Token::Name(input[start..end].to_owned())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Negate(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Call {
        callee: String,
        positional: Vec<Expr>,
        keyword: Vec<(String, Expr)>,
    },
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    depth: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn parse_complete(mut self) -> ToolResult<Expr> {
        if self.tokens.is_empty() {
            return Err(ToolError::malformed("empty expression"));
        }
        let expr = self.expr()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(ToolError::malformed(format!("unexpected `{token}`"))),
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> ToolResult<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ToolError::malformed(format!(
                "expected `{expected}`, found `{token}`"
            ))),
            None => Err(ToolError::malformed(format!(
                "expected `{expected}`, found end of input"
            ))),
        }
    }

    fn expr(&mut self) -> ToolResult<Expr> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ToolError::malformed("expression is nested too deeply"));
        }
        let expr = self.additive();
        self.depth -= 1;
        expr
    }

    fn additive(&mut self) -> ToolResult<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> ToolResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> ToolResult<Expr> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Negate(Box::new(self.nested_unary()?)));
        }
        if self.eat(&Token::Plus) {
            return self.nested_unary();
        }
        self.postfix()
    }

    fn nested_unary(&mut self) -> ToolResult<Expr> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ToolError::malformed("expression is nested too deeply"));
        }
        let expr = self.unary();
        self.depth -= 1;
        expr
    }

    fn postfix(&mut self) -> ToolResult<Expr> {
        let mut expr = self.primary()?;
        while self.eat(&Token::LBracket) {
            let index = self.expr()?;
            self.expect(&Token::RBracket)?;
            expr = Expr::Index(Box::new(expr), Box::new(index));
        }
        if let Some(Token::LParen) = self.peek() {
            return Err(ToolError::malformed("only capabilities can be called"));
        }
        Ok(expr)
    }

    fn primary(&mut self) -> ToolResult<Expr> {
        let Some(token) = self.next() else {
            return Err(ToolError::malformed("unexpected end of input"));
        };
        match token {
            Token::Int(v) => Ok(Expr::Literal(Value::from(*v))),
            Token::Float(v) => Ok(Expr::Literal(float(*v)?)),
            Token::Str(v) => Ok(Expr::Literal(Value::String(v.clone()))),
            Token::Name(name) => match name.as_str() {
                "True" | "true" => Ok(Expr::Literal(Value::Bool(true))),
                "False" | "false" => Ok(Expr::Literal(Value::Bool(false))),
                "None" | "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.eat(&Token::LParen) => self.call(name.clone()),
                _ => Ok(Expr::Name(name.clone())),
            },
            Token::LParen => {
                let expr = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => {
                let items = self.sequence(&Token::RBracket, Self::expr)?;
                Ok(Expr::List(items))
            }
            Token::LBrace => {
                let pairs = self.sequence(&Token::RBrace, |p| {
                    let key = p.expr()?;
                    p.expect(&Token::Colon)?;
                    Ok((key, p.expr()?))
                })?;
                Ok(Expr::Dict(pairs))
            }
            other => Err(ToolError::malformed(format!("unexpected `{other}`"))),
        }
    }

    /// Parses comma-separated items up to `close`, allowing a trailing comma.
    fn sequence<T>(
        &mut self,
        close: &Token,
        mut item: impl FnMut(&mut Self) -> ToolResult<T>,
    ) -> ToolResult<Vec<T>> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(item(self)?);
            if !self.eat(&Token::Comma) {
                self.expect(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn call(&mut self, callee: String) -> ToolResult<Expr> {
        let mut positional = Vec::new();
        let mut keyword: Vec<(String, Expr)> = Vec::new();
        let args = self.sequence(&Token::RParen, |p| {
            let is_keyword = matches!(
                (p.peek(), p.tokens.get(p.pos + 1)),
                (Some(Token::Name(name)), Some(Token::Assign)) if is_identifier(name)
            );
            if is_keyword {
                let Some(Token::Name(name)) = p.next() else {
                    unreachable!("checked above");
                };
                p.pos += 1;
                Ok((Some(name.clone()), p.expr()?))
            } else {
                Ok((None, p.expr()?))
            }
        })?;

        for (name, expr) in args {
            match name {
                Some(name) => {
                    if keyword.iter().any(|(existing, _)| *existing == name) {
                        return Err(ToolError::malformed(format!(
                            "keyword argument `{name}` repeated in call to `{callee}`"
                        )));
                    }
                    keyword.push((name, expr));
                }
                None if !keyword.is_empty() => {
                    return Err(ToolError::malformed(format!(
                        "positional argument follows keyword argument in call to `{callee}`"
                    )));
                }
                None => positional.push(expr),
            }
        }

        Ok(Expr::Call {
            callee,
            positional,
            keyword,
        })
    }
}

fn float(value: f64) -> ToolResult<Value> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| ToolError::malformed("result is not a finite number"))
}

fn negate(value: Value) -> ToolResult<Value> {
    if let Some(v) = value.as_i64() {
        return v
            .checked_neg()
            .map(Value::from)
            .ok_or_else(|| ToolError::malformed("integer overflow"));
    }
    match value.as_f64() {
        Some(v) if value.is_number() => float(-v),
        _ => Err(ToolError::malformed(format!(
            "bad operand for unary `-`: {}",
            type_name(&value)
        ))),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> ToolResult<Value> {
    match (op, lhs, rhs) {
        (BinaryOp::Add, Value::String(mut a), Value::String(b)) => {
            a.push_str(&b);
            Ok(Value::String(a))
        }
        (BinaryOp::Add, Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (op, Value::Number(a), Value::Number(b)) => arithmetic(op, &a, &b),
        (op, a, b) => Err(ToolError::malformed(format!(
            "unsupported operand types for {op:?}: {} and {}",
            type_name(&a),
            type_name(&b)
        ))),
    }
}

fn arithmetic(op: BinaryOp, a: &Number, b: &Number) -> ToolResult<Value> {
    let overflow = || ToolError::malformed("integer overflow");
    if op == BinaryOp::Div {
        let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
            return Err(ToolError::malformed("invalid division operands"));
        };
        if y == 0.0 {
            return Err(ToolError::malformed("division by zero"));
        }
        return float(x / y);
    }

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let result = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Div => unreachable!("handled above"),
        };
        return result.map(Value::from).ok_or_else(overflow);
    }

    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return Err(overflow());
    };
    float(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => unreachable!("handled above"),
    })
}

fn subscript(target: Value, index: &Value) -> ToolResult<Value> {
    match (target, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n
                .as_i64()
                .ok_or_else(|| ToolError::malformed("list indices must be integers"))?;
            let len = i64::try_from(items.len()).map_err(|_| ToolError::malformed("list too large"))?;
            let resolved = if i < 0 { len + i } else { i };
            usize::try_from(resolved)
                .ok()
                .and_then(|i| items.into_iter().nth(i))
                .ok_or_else(|| ToolError::malformed(format!("list index {i} out of range")))
        }
        (Value::Object(mut map), Value::String(key)) => map
            .remove(key)
            .ok_or_else(|| ToolError::malformed(format!("key `{key}` not found"))),
        (target, index) => Err(ToolError::malformed(format!(
            "cannot index {} with {}",
            type_name(&target),
            type_name(index)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "None",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::registry::CapabilityModule;
    use serde_json::json;

    fn registry() -> CapabilityRegistry {
        let module = CapabilityModule::new()
            .with("foo", |_args: ResolvedArguments| -> ToolResult<Value> {
                Ok(json!("foo-result"))
            })
            .with("add", |args: ResolvedArguments| -> ToolResult<Value> {
                let a = args.require(0, "a")?.as_i64().unwrap_or_default();
                let b = args.require(1, "b")?.as_i64().unwrap_or_default();
                Ok(json!(a + b))
            })
            .with("fail", |_args: ResolvedArguments| -> ToolResult<Value> {
                Err(ToolError::construction("boom"))
            })
            .with("explode", |_args: ResolvedArguments| -> ToolResult<Value> {
                panic!("nested capability exploded")
            });
        let mut registry = CapabilityRegistry::new();
        registry.register_modules([(module, "tools")]).unwrap();
        registry
    }

    #[test]
    fn parses_keywords_and_calls() {
        let registry = registry();
        let sandbox = ExpressionSandbox::new(&registry);
        let args = sandbox.parse(Some("a=1, b=2.5, foo()")).unwrap();

        assert_eq!(args.keyword().get("a"), Some(&json!(1)));
        assert_eq!(args.keyword().get("b"), Some(&json!(2.5)));
        assert_eq!(args.positional(), [json!("foo-result")]);
    }

    #[test]
    fn empty_input_yields_no_arguments() {
        let registry = registry();
        let sandbox = ExpressionSandbox::new(&registry);
        assert!(sandbox.parse(None).unwrap().is_empty());
        assert!(sandbox.parse(Some("   ")).unwrap().is_empty());
    }

    #[test]
    fn nested_commas_stay_inside_their_value() {
        let registry = registry();
        let sandbox = ExpressionSandbox::new(&registry);
        let args = sandbox
            .parse(Some(r#"tools.add(2, b=3), items=[1, "a,b"], opts={"k": [1, 2]}"#))
            .unwrap();

        assert_eq!(args.positional(), [json!(5)]);
        assert_eq!(args.keyword().get("items"), Some(&json!([1, "a,b"])));
        assert_eq!(args.keyword().get("opts"), Some(&json!({"k": [1, 2]})));
    }

    #[test]
    fn evaluates_literals_and_operators() {
        let registry = registry();
        let sandbox = ExpressionSandbox::new(&registry);
        assert_eq!(sandbox.evaluate("2 * (3 + 4) - -1").unwrap(), json!(15));
        assert_eq!(sandbox.evaluate("7 / 2").unwrap(), json!(3.5));
        assert_eq!(sandbox.evaluate("'ab' + \"cd\"").unwrap(), json!("abcd"));
        assert_eq!(sandbox.evaluate("[1, 2] + [3]").unwrap(), json!([1, 2, 3]));
        assert_eq!(sandbox.evaluate("[10, 20, 30][-1]").unwrap(), json!(30));
        assert_eq!(sandbox.evaluate("{'a': True}['a']").unwrap(), json!(true));
        assert_eq!(sandbox.evaluate("None").unwrap(), Value::Null);
        assert_eq!(sandbox.evaluate("'tab\\there'").unwrap(), json!("tab\there"));
        assert_eq!(sandbox.evaluate("1_000").unwrap(), json!(1000));
    }

    #[test]
    fn rejects_disallowed_constructs() {
        let registry = registry();
        let sandbox = ExpressionSandbox::new(&registry);
        let inputs = [
            "__import__('os')",
            "open('/etc/passwd')",
            "a=1, b=exec('x')",
            "foo().__class__",
            "x = y = 1",
            "lambda: 1",
            "a=1; b=2",
            "1 if True else 2",
            "foo",
            "foo()()",
            "1 == 1",
            "'unterminated",
            "(1, 2",
            "1 / 0",
            "2-key=1",
            "a=",
        ];
        for input in inputs {
            let err = sandbox
                .parse(Some(input))
                .expect_err(&format!("`{input}` should be rejected"));
            assert!(matches!(err, ToolError::MalformedArgument { .. }), "{input}: {err}");
        }
    }

    #[test]
    fn failure_never_partially_applies() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let module = CapabilityModule::new().with(
            "count",
            move |_args: ResolvedArguments| -> ToolResult<Value> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            },
        );
        let mut registry = CapabilityRegistry::new();
        registry.register_modules([(module, "tools")]).unwrap();
        let sandbox = ExpressionSandbox::new(&registry);

        // The syntax error in the last part is found before any call runs.
        let err = sandbox.parse(Some("count(), count(), x=$"));
        assert!(err.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn capability_errors_abort_the_parse() {
        let registry = registry();
        let sandbox = ExpressionSandbox::new(&registry);
        let err = sandbox.parse(Some("a=1, fail()")).expect_err("call fails");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn panicking_capability_becomes_malformed_argument() {
        let registry = registry();
        let sandbox = ExpressionSandbox::new(&registry);
        let err = sandbox
            .parse(Some("a=1, b=[explode()]"))
            .expect_err("nested call panics");
        assert!(matches!(err, ToolError::MalformedArgument { .. }));
        assert!(err.to_string().contains("nested capability exploded"));
    }

    #[test]
    fn oversized_input_is_rejected() {
        let registry = registry();
        let sandbox = ExpressionSandbox::new(&registry);
        let input = format!("a='{}'", "x".repeat(MAX_ARGUMENT_LENGTH));
        let err = sandbox.parse(Some(&input)).expect_err("too long");
        assert!(err.to_string().contains("maximum allowed"));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let registry = registry();
        let sandbox = ExpressionSandbox::new(&registry);
        let input = format!("{}1{}", "[".repeat(40), "]".repeat(40));
        assert!(sandbox.parse(Some(&input)).is_err());
        let input = format!("{}1", "-".repeat(40));
        assert!(sandbox.parse(Some(&input)).is_err());
    }
}
