//! Interpreter for the Go `text/template` syntax used by policy templates:
//! - field access on `.` and on variables (`$`, `$name.Field`)
//! - `if`/`else if`/`else`, `with` and `range` blocks, each closed by `{{end}}`
//! - variable declaration (`$x := ...`), assignment (`$x = ...`) and
//!   `range $i, $x := ...` bindings
//! - pipelines (`.Name | printf "%q"`)
//! - the `not`, `eq`, `ne`, `and`, `or`, `len`, `index` and `printf` functions
//! - comments and `{{-`/`-}}` trim markers
//!
//! Missing fields evaluate to null, which renders as the empty string and is
//! falsy.

use serde_json::{Number, Value};

use crate::error::{Result, TokenError};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Action { body: String, line: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Not,
    Eq,
    Ne,
    Len,
    Index,
    Printf,
}

impl Func {
    fn name(self) -> &'static str {
        match self {
            Self::Not => "not",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Len => "len",
            Self::Index => "index",
            Self::Printf => "printf",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    /// Field path relative to `.`; empty for `.` itself.
    Dot(Vec<String>),
    Var(String, Vec<String>),
    Literal(Value),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Call {
        func: Func,
        args: Vec<Expr>,
        line: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Output(Expr),
    Declare {
        name: String,
        value: Expr,
    },
    Assign {
        name: String,
        value: Expr,
    },
    If {
        decl: Option<String>,
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    With {
        decl: Option<String>,
        value: Expr,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Range {
        key: Option<String>,
        elem: Option<String>,
        value: Expr,
        body: Vec<Node>,
        otherwise: Vec<Node>,
        line: usize,
    },
}

/// A parsed template, ready to be executed against any number of contexts.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let segments = scan(source)?;
        let mut parser = Parser {
            segments,
            pos: 0,
            vars: vec!["$".to_string()],
        };
        let (nodes, terminator) = parser.parse_block(false)?;
        debug_assert!(matches!(terminator, Terminator::Eof));
        Ok(Self { nodes })
    }

    /// Render against `context`, which is also bound to `$`.
    ///
    /// # Errors
    ///
    /// Fails when a function rejects its arguments (an out-of-range `index`,
    /// `len` of a scalar) or `range` is given a value it cannot iterate.
    pub fn execute(&self, context: &Value) -> Result<String> {
        let mut exec = Exec {
            vars: vec![("$".to_string(), context.clone())],
        };
        let mut out = String::new();
        exec.run(&self.nodes, context, &mut out)?;
        Ok(out)
    }
}

fn scan(source: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut line = 1;
    let mut trim_next = false;

    while let Some(start) = rest.find("{{") {
        let raw_text = &rest[..start];
        line += raw_text.matches('\n').count();
        let action_line = line;

        let mut after_open = &rest[start + 2..];
        let trim_left = after_open.starts_with('-')
            && after_open[1..].starts_with(|c: char| c.is_ascii_whitespace());
        if trim_left {
            after_open = &after_open[1..];
        }

        let close = find_close(after_open).ok_or_else(|| {
            TokenError::template_syntax(format!("line {action_line}: unclosed action"))
        })?;
        let mut body = &after_open[..close];
        line += body.matches('\n').count();
        let trim_right = body.len() >= 2
            && body.ends_with('-')
            && body[..body.len() - 1].ends_with(|c: char| c.is_ascii_whitespace());
        if trim_right {
            body = &body[..body.len() - 1];
        }

        let mut text = if trim_next { raw_text.trim_start() } else { raw_text };
        if trim_left {
            text = text.trim_end();
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text.to_string()));
        }

        let trimmed = body.trim();
        if trimmed.starts_with("/*") {
            if !trimmed.ends_with("*/") {
                return Err(TokenError::template_syntax(format!(
                    "line {action_line}: unclosed comment"
                )));
            }
        } else {
            segments.push(Segment::Action {
                body: trimmed.to_string(),
                line: action_line,
            });
        }

        trim_next = trim_right;
        rest = &after_open[close + 2..];
    }

    let tail = if trim_next { rest.trim_start() } else { rest };
    if !tail.is_empty() {
        segments.push(Segment::Text(tail.to_string()));
    }
    Ok(segments)
}

// Index of the closing `}}`, ignoring braces inside quoted strings and comments.
fn find_close(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let trimmed_offset = s.len() - s.trim_start().len();
    if s[trimmed_offset..].starts_with("/*") {
        let end = s[trimmed_offset..].find("*/")? + trimmed_offset + 2;
        return s[end..].find("}}").map(|i| i + end);
    }

    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(Vec<String>),
    Var(String, Vec<String>),
    Literal(Value),
    Ident(String),
    LParen,
    RParen,
    Pipe,
    Comma,
    Declare,
    Assign,
}

fn tokenize(body: &str, line: usize) -> Result<Vec<Token>> {
    let err = |msg: String| TokenError::template_syntax(format!("line {line}: {msg}"));
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    // Consumes `.A.B` chains starting at `i`.
    let field_chain = |i: &mut usize| {
        let mut path = Vec::new();
        while *i < chars.len()
            && chars[*i] == '.'
            && chars.get(*i + 1).is_some_and(|c| is_ident_char(*c))
        {
            *i += 1;
            let start = *i;
            while *i < chars.len() && is_ident_char(chars[*i]) {
                *i += 1;
            }
            path.push(chars[start..*i].iter().collect::<String>());
        }
        path
    };

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c == '|' {
            tokens.push(Token::Pipe);
            i += 1;
        } else if c == ',' {
            tokens.push(Token::Comma);
            i += 1;
        } else if c == ':' && chars.get(i + 1) == Some(&'=') {
            tokens.push(Token::Declare);
            i += 2;
        } else if c == '=' {
            tokens.push(Token::Assign);
            i += 1;
        } else if c == '$' {
            let start = i;
            i += 1;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            let path = field_chain(&mut i);
            tokens.push(Token::Var(name, path));
        } else if c == '.' {
            let path = field_chain(&mut i);
            if path.is_empty() {
                i += 1;
                if chars.get(i) == Some(&'.') {
                    return Err(err("empty field name".to_string()));
                }
            }
            tokens.push(Token::Field(path));
        } else if c == '"' {
            let mut value = String::new();
            i += 1;
            loop {
                let Some(&c) = chars.get(i) else {
                    return Err(err("unterminated quoted string".to_string()));
                };
                i += 1;
                match c {
                    '"' => break,
                    '\\' => {
                        let escaped = chars
                            .get(i)
                            .ok_or_else(|| err("unterminated quoted string".to_string()))?;
                        i += 1;
                        value.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => *other,
                        });
                    }
                    other => value.push(other),
                }
            }
            tokens.push(Token::Literal(Value::String(value)));
        } else if c == '`' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|&c| c == '`')
                .ok_or_else(|| err("unterminated raw string".to_string()))?;
            tokens.push(Token::Literal(Value::String(
                chars[start..start + end].iter().collect(),
            )));
            i = start + end + 1;
        } else if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            tokens.push(Token::Literal(parse_number(&literal).ok_or_else(|| {
                err(format!("bad number syntax: {literal:?}"))
            })?));
        } else if is_ident_char(c) {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(match word.as_str() {
                "true" => Token::Literal(Value::Bool(true)),
                "false" => Token::Literal(Value::Bool(false)),
                "nil" => Token::Literal(Value::Null),
                _ => Token::Ident(word),
            });
        } else {
            return Err(err(format!("unexpected character {c:?} in action")));
        }
    }
    Ok(tokens)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn parse_number(literal: &str) -> Option<Value> {
    if let Ok(i) = literal.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    literal
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

enum Terminator {
    Eof,
    End,
    Else(Option<Expr>),
}

struct Parser {
    segments: Vec<Segment>,
    pos: usize,
    /// Variables in scope, innermost last.
    vars: Vec<String>,
}

impl Parser {
    /// Parse nodes up to `{{end}}`, `{{else}}` or EOF. Variables declared
    /// inside the block go out of scope when it ends.
    fn parse_block(&mut self, in_block: bool) -> Result<(Vec<Node>, Terminator)> {
        let mark = self.vars.len();
        let result = self.parse_nodes(in_block);
        self.vars.truncate(mark);
        result
    }

    fn parse_nodes(&mut self, in_block: bool) -> Result<(Vec<Node>, Terminator)> {
        let mut nodes = Vec::new();
        while let Some(segment) = self.segments.get(self.pos).cloned() {
            self.pos += 1;
            let (body, line) = match segment {
                Segment::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Segment::Action { body, line } => (body, line),
            };

            let tokens = tokenize(&body, line)?;
            let err = |msg: &str| TokenError::template_syntax(format!("line {line}: {msg}"));
            match tokens.as_slice() {
                [] => return Err(err("missing value for command")),
                [Token::Ident(kw), rest @ ..] if kw == "if" => {
                    let (decl, condition) = self.control_pipeline(rest, line, 1)?;
                    nodes.push(self.parse_if(decl.into_iter().next(), condition, line)?);
                }
                [Token::Ident(kw), rest @ ..] if kw == "with" => {
                    let (decl, value) = self.control_pipeline(rest, line, 1)?;
                    nodes.push(self.parse_with(decl.into_iter().next(), value, line)?);
                }
                [Token::Ident(kw), rest @ ..] if kw == "range" => {
                    let (decl, value) = self.control_pipeline(rest, line, 2)?;
                    nodes.push(self.parse_range(decl, value, line)?);
                }
                [Token::Ident(kw), rest @ ..] if kw == "end" => {
                    if !in_block || !rest.is_empty() {
                        return Err(err("unexpected {{end}}"));
                    }
                    return Ok((nodes, Terminator::End));
                }
                [Token::Ident(kw), rest @ ..] if kw == "else" => {
                    if !in_block {
                        return Err(err("unexpected {{else}}"));
                    }
                    let chained = match rest {
                        [] => None,
                        [Token::Ident(kw), cond @ ..] if kw == "if" => Some(self.pipeline(cond, line)?),
                        _ => return Err(err("unexpected token after else")),
                    };
                    return Ok((nodes, Terminator::Else(chained)));
                }
                [Token::Var(name, path), Token::Declare, rest @ ..] if path.is_empty() => {
                    let value = self.pipeline(rest, line)?;
                    self.vars.push(name.clone());
                    nodes.push(Node::Declare {
                        name: name.clone(),
                        value,
                    });
                }
                [Token::Var(name, path), Token::Assign, rest @ ..] if path.is_empty() => {
                    if !self.vars.contains(name) {
                        return Err(err(&format!("undefined variable {name:?}")));
                    }
                    let value = self.pipeline(rest, line)?;
                    nodes.push(Node::Assign {
                        name: name.clone(),
                        value,
                    });
                }
                _ => nodes.push(Node::Output(self.pipeline(&tokens, line)?)),
            }
        }
        Ok((nodes, Terminator::Eof))
    }

    fn pipeline(&self, tokens: &[Token], line: usize) -> Result<Expr> {
        ExprParser {
            tokens,
            pos: 0,
            line,
            vars: &self.vars,
        }
        .parse_pipeline()
    }

    /// Split an optional `$x :=` or `$i, $x :=` declaration off a control
    /// action. The declared names are not yet in scope for the pipeline.
    fn control_pipeline(
        &self,
        tokens: &[Token],
        line: usize,
        max_vars: usize,
    ) -> Result<(Vec<String>, Expr)> {
        let (decl, rest) = match tokens {
            [Token::Var(a, pa), Token::Comma, Token::Var(b, pb), Token::Declare, rest @ ..]
                if max_vars >= 2 && pa.is_empty() && pb.is_empty() =>
            {
                (vec![a.clone(), b.clone()], rest)
            }
            [Token::Var(a, pa), Token::Declare, rest @ ..] if pa.is_empty() => {
                (vec![a.clone()], rest)
            }
            _ => (Vec::new(), tokens),
        };
        Ok((decl, self.pipeline(rest, line)?))
    }

    fn missing_end(line: usize) -> TokenError {
        TokenError::template_syntax(format!("line {line}: unexpected EOF: missing {{{{end}}}}"))
    }

    /// Body of a final `{{else}}`, which must be closed by `{{end}}`.
    fn parse_else_tail(&mut self, line: usize) -> Result<Vec<Node>> {
        let (otherwise, terminator) = self.parse_block(true)?;
        match terminator {
            Terminator::End => Ok(otherwise),
            Terminator::Else(_) => Err(TokenError::template_syntax(format!(
                "line {line}: {{{{else}}}} after final {{{{else}}}}"
            ))),
            Terminator::Eof => Err(Self::missing_end(line)),
        }
    }

    /// Body and optional `{{else}}` of a `with` or `range` block.
    fn parse_body_and_else(&mut self, keyword: &str, line: usize) -> Result<(Vec<Node>, Vec<Node>)> {
        let (body, terminator) = self.parse_block(true)?;
        let otherwise = match terminator {
            Terminator::End => Vec::new(),
            Terminator::Else(None) => self.parse_else_tail(line)?,
            Terminator::Else(Some(_)) => {
                return Err(TokenError::template_syntax(format!(
                    "line {line}: {{{{else if}}}} is not allowed in {{{{{keyword}}}}}"
                )))
            }
            Terminator::Eof => return Err(Self::missing_end(line)),
        };
        Ok((body, otherwise))
    }

    fn parse_if(&mut self, decl: Option<String>, condition: Expr, line: usize) -> Result<Node> {
        let mark = self.vars.len();
        self.vars.extend(decl.clone());
        let mut branches = Vec::new();
        let mut condition = condition;
        let otherwise = loop {
            let (body, terminator) = self.parse_block(true)?;
            branches.push((condition, body));
            match terminator {
                Terminator::End => break Vec::new(),
                Terminator::Else(Some(next)) => condition = next,
                Terminator::Else(None) => break self.parse_else_tail(line)?,
                Terminator::Eof => return Err(Self::missing_end(line)),
            }
        };
        self.vars.truncate(mark);
        Ok(Node::If {
            decl,
            branches,
            otherwise,
        })
    }

    fn parse_with(&mut self, decl: Option<String>, value: Expr, line: usize) -> Result<Node> {
        let mark = self.vars.len();
        self.vars.extend(decl.clone());
        let (body, otherwise) = self.parse_body_and_else("with", line)?;
        self.vars.truncate(mark);
        Ok(Node::With {
            decl,
            value,
            body,
            otherwise,
        })
    }

    fn parse_range(&mut self, decl: Vec<String>, value: Expr, line: usize) -> Result<Node> {
        let mark = self.vars.len();
        self.vars.extend(decl.iter().cloned());
        let (body, otherwise) = self.parse_body_and_else("range", line)?;
        self.vars.truncate(mark);

        // A single variable binds the element, two bind key and element.
        let mut decl = decl.into_iter();
        let (key, elem) = match (decl.next(), decl.next()) {
            (Some(key), Some(elem)) => (Some(key), Some(elem)),
            (elem, _) => (None, elem),
        };
        Ok(Node::Range {
            key,
            elem,
            value,
            body,
            otherwise,
            line,
        })
    }
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    line: usize,
    vars: &'a [String],
}

impl ExprParser<'_> {
    fn error(&self, msg: impl std::fmt::Display) -> TokenError {
        TokenError::template_syntax(format!("line {}: {msg}", self.line))
    }

    fn parse_pipeline(mut self) -> Result<Expr> {
        let expr = self.parse_pipe()?;
        if let Some(token) = self.tokens.get(self.pos) {
            return Err(self.error(format!("unexpected {token:?} in command")));
        }
        Ok(expr)
    }

    // command ( '|' command )*; each stage receives the previous result as
    // its final argument.
    fn parse_pipe(&mut self) -> Result<Expr> {
        let mut expr = self.parse_command(None)?;
        while self.tokens.get(self.pos) == Some(&Token::Pipe) {
            self.pos += 1;
            expr = self.parse_command(Some(expr))?;
        }
        Ok(expr)
    }

    fn parse_command(&mut self, piped: Option<Expr>) -> Result<Expr> {
        match self.tokens.get(self.pos) {
            None | Some(Token::Pipe) => Err(self.error("missing value for command")),
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                let mut args = Vec::new();
                while let Some(token) = self.tokens.get(self.pos) {
                    if matches!(token, Token::RParen | Token::Pipe) {
                        break;
                    }
                    args.push(self.parse_term()?);
                }
                args.extend(piped);
                self.call(&name, args)
            }
            Some(_) if piped.is_some() => {
                Err(self.error("non executable command in pipeline stage"))
            }
            Some(_) => self.parse_term(),
        }
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| self.error("missing value"))?;
        self.pos += 1;
        match token {
            Token::Field(path) => Ok(Expr::Dot(path)),
            Token::Var(name, path) => {
                if !self.vars.contains(&name) {
                    return Err(self.error(format!("undefined variable {name:?}")));
                }
                Ok(Expr::Var(name, path))
            }
            Token::Literal(value) => Ok(Expr::Literal(value)),
            Token::LParen => {
                let inner = self.parse_pipe()?;
                if self.tokens.get(self.pos) != Some(&Token::RParen) {
                    return Err(self.error("unclosed left paren"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Token::Ident(name) => Err(self.error(format!(
                "function {name:?} must be called inside parentheses when used as an argument"
            ))),
            other => Err(self.error(format!("unexpected {other:?} in operand"))),
        }
    }

    fn call(&self, name: &str, args: Vec<Expr>) -> Result<Expr> {
        let (func, min, exact) = match name {
            "and" | "or" => {
                if args.is_empty() {
                    return Err(self.error(format!(
                        "wrong number of args for {name}: want at least 1 got 0"
                    )));
                }
                return Ok(if name == "and" {
                    Expr::And(args)
                } else {
                    Expr::Or(args)
                });
            }
            "not" => (Func::Not, 1, true),
            "eq" => (Func::Eq, 2, false),
            "ne" => (Func::Ne, 2, true),
            "len" => (Func::Len, 1, true),
            "index" => (Func::Index, 1, false),
            "printf" => (Func::Printf, 1, false),
            other => return Err(self.error(format!("function {other:?} not defined"))),
        };
        let got = args.len();
        if got < min || (exact && got != min) {
            let want = if exact {
                min.to_string()
            } else {
                format!("at least {min}")
            };
            return Err(self.error(format!(
                "wrong number of args for {name}: want {want} got {got}"
            )));
        }
        Ok(Expr::Call {
            func,
            args,
            line: self.line,
        })
    }
}

struct Exec {
    /// Bound variables, innermost last; `$` is the root context.
    vars: Vec<(String, Value)>,
}

impl Exec {
    fn run(&mut self, nodes: &[Node], dot: &Value, out: &mut String) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output(expr) => write_value(&self.eval(expr, dot)?, out),
                Node::Declare { name, value } => {
                    let value = self.eval(value, dot)?;
                    self.vars.push((name.clone(), value));
                }
                Node::Assign { name, value } => {
                    let value = self.eval(value, dot)?;
                    let slot = self
                        .vars
                        .iter_mut()
                        .rev()
                        .find(|(n, _)| n == name)
                        .ok_or_else(|| undefined_variable(name))?;
                    slot.1 = value;
                }
                Node::If {
                    decl,
                    branches,
                    otherwise,
                } => {
                    let mark = self.vars.len();
                    let mut chosen = otherwise;
                    for (idx, (condition, body)) in branches.iter().enumerate() {
                        let value = self.eval(condition, dot)?;
                        let hit = truthy(&value);
                        if idx == 0 {
                            if let Some(name) = decl {
                                self.vars.push((name.clone(), value));
                            }
                        }
                        if hit {
                            chosen = body;
                            break;
                        }
                    }
                    self.run_scoped(chosen, dot, out)?;
                    self.vars.truncate(mark);
                }
                Node::With {
                    decl,
                    value,
                    body,
                    otherwise,
                } => {
                    let mark = self.vars.len();
                    let value = self.eval(value, dot)?;
                    if let Some(name) = decl {
                        self.vars.push((name.clone(), value.clone()));
                    }
                    if truthy(&value) {
                        self.run_scoped(body, &value, out)?;
                    } else {
                        self.run_scoped(otherwise, dot, out)?;
                    }
                    self.vars.truncate(mark);
                }
                Node::Range {
                    key,
                    elem,
                    value,
                    body,
                    otherwise,
                    line,
                } => {
                    let collection = self.eval(value, dot)?;
                    let iterations = self.range(&collection, key, elem, body, out, *line)?;
                    if iterations == 0 {
                        self.run_scoped(otherwise, dot, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn run_scoped(&mut self, nodes: &[Node], dot: &Value, out: &mut String) -> Result<()> {
        let mark = self.vars.len();
        let result = self.run(nodes, dot, out);
        self.vars.truncate(mark);
        result
    }

    /// Execute `body` once per element; maps iterate in key order and
    /// non-negative integers count up from zero. Returns the iteration count.
    fn range(
        &mut self,
        collection: &Value,
        key: &Option<String>,
        elem: &Option<String>,
        body: &[Node],
        out: &mut String,
        line: usize,
    ) -> Result<usize> {
        let mut iteration = |exec: &mut Self, k: Value, v: &Value| {
            let mark = exec.vars.len();
            if let Some(name) = key {
                exec.vars.push((name.clone(), k));
            }
            if let Some(name) = elem {
                exec.vars.push((name.clone(), v.clone()));
            }
            let result = exec.run(body, v, out);
            exec.vars.truncate(mark);
            result
        };

        match collection {
            Value::Null => Ok(0),
            Value::Array(items) => {
                for (idx, item) in items.iter().enumerate() {
                    iteration(self, Value::from(idx), item)?;
                }
                Ok(items.len())
            }
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                for &(k, v) in &entries {
                    iteration(self, Value::String(k.clone()), v)?;
                }
                Ok(entries.len())
            }
            Value::Number(n) if n.as_u64().is_some() => {
                let count = n.as_u64().unwrap_or_default();
                for idx in 0..count {
                    let v = Value::from(idx);
                    iteration(self, v.clone(), &v)?;
                }
                Ok(usize::try_from(count).unwrap_or(usize::MAX))
            }
            other => Err(TokenError::template_execution(format!(
                "line {line}: range can't iterate over {}",
                display(other)
            ))),
        }
    }

    fn eval(&self, expr: &Expr, dot: &Value) -> Result<Value> {
        match expr {
            Expr::Dot(path) => Ok(lookup(dot, path)),
            Expr::Var(name, path) => {
                let (_, value) = self
                    .vars
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .ok_or_else(|| undefined_variable(name))?;
                Ok(lookup(value, path))
            }
            Expr::Literal(value) => Ok(value.clone()),
            Expr::And(args) => self.short_circuit(args, dot, false),
            Expr::Or(args) => self.short_circuit(args, dot, true),
            Expr::Call { func, args, line } => {
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg, dot))
                    .collect::<Result<Vec<_>>>()?;
                call(*func, &values).map_err(|msg| {
                    TokenError::template_execution(format!(
                        "line {line}: error calling {}: {msg}",
                        func.name()
                    ))
                })
            }
        }
    }

    // Returns the first argument whose truthiness equals `stop_on`, else the last.
    fn short_circuit(&self, args: &[Expr], dot: &Value, stop_on: bool) -> Result<Value> {
        let mut last = Value::Null;
        for arg in args {
            last = self.eval(arg, dot)?;
            if truthy(&last) == stop_on {
                break;
            }
        }
        Ok(last)
    }
}

fn undefined_variable(name: &str) -> TokenError {
    TokenError::template_execution(format!("undefined variable {name:?}"))
}

fn lookup(value: &Value, path: &[String]) -> Value {
    path.iter()
        .try_fold(value, |value, key| value.get(key))
        .cloned()
        .unwrap_or(Value::Null)
}

// Arity is checked at parse time.
fn call(func: Func, args: &[Value]) -> std::result::Result<Value, String> {
    match func {
        Func::Not => Ok(Value::Bool(!truthy(&args[0]))),
        Func::Eq => Ok(Value::Bool(
            args[1..].iter().any(|rhs| values_equal(&args[0], rhs)),
        )),
        Func::Ne => Ok(Value::Bool(!values_equal(&args[0], &args[1]))),
        Func::Len => match &args[0] {
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
            Value::String(s) => Ok(Value::from(s.len())),
            other => Err(format!("len of {}", type_name(other))),
        },
        Func::Index => args[1..].iter().try_fold(args[0].clone(), |item, key| index(&item, key)),
        Func::Printf => match &args[0] {
            Value::String(format) => Ok(Value::String(sprintf(format, &args[1..]))),
            other => Err(format!("format must be a string, got {}", type_name(other))),
        },
    }
}

fn index(item: &Value, key: &Value) -> std::result::Result<Value, String> {
    match (item, key) {
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| items.get(i))
            .cloned()
            .ok_or_else(|| format!("index out of range: {n}")),
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Null, _) => Err("index of untyped nil".to_string()),
        (item, key) => Err(format!(
            "can't index item of type {} with {}",
            type_name(item),
            type_name(key)
        )),
    }
}

/// Go-style formatting for the `%s %v %d %q %t %f %%` verbs.
fn sprintf(format: &str, args: &[Value]) -> String {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = args.next() else {
            out.push_str(&format!("%!{verb}(MISSING)"));
            continue;
        };
        match (verb, arg) {
            ('s' | 'v', value) => out.push_str(&display(value)),
            ('d', Value::Number(n)) if n.is_i64() || n.is_u64() => out.push_str(&n.to_string()),
            ('q', Value::String(_)) => out.push_str(&arg.to_string()),
            ('t', Value::Bool(b)) => out.push_str(&b.to_string()),
            ('f', Value::Number(n)) => {
                out.push_str(&format!("{:.6}", n.as_f64().unwrap_or_default()));
            }
            (verb, value) => out.push_str(&format!("%!{verb}({})", display(value))),
        }
    }
    let extra: Vec<String> = args.map(display).collect();
    if !extra.is_empty() {
        out.push_str(&format!("%!(EXTRA {})", extra.join(", ")));
    }
    out
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn display(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}
