//! Condition expressions used by the `if` filter of overlay rules.
//!
//! An expression is split into words (runs of characters that are not
//! whitespace, quotes, parentheses or commas), quoted string literals and
//! punctuation. Each word that is not an operator is looked up through a
//! resolver callback:
//! - no value: the word stays as written (a number, `true`/`false`, or a
//!   symbol that evaluates to its own name)
//! - a plain value: the value is used
//! - a predicate: the predicate is called with the word itself as its only
//!   argument, so `debug and linux` calls each predicate with its own name
//!
//! The rewritten token stream is then evaluated by a small recursive-descent
//! grammar. No other names or functions are reachable.

use crate::error::{ConfigError, Result};
use std::fmt;
use std::rc::Rc;

/// Operators recognized by default.
pub const DEFAULT_OPERATORS: &[&str] = &[
    "and", "or", "not", "in", "==", "!=", "<", "<=", ">", ">=", "+", "-", "*", "/", "%",
];

/// Value produced while evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "'{s}'"),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

/// Deepest nesting of groups, unary operators and operator chains.
const MAX_DEPTH: usize = 64;

/// Callable invoked with the identifier it was referenced by.
pub type Predicate = Rc<dyn Fn(&str) -> Value>;

/// What a resolver returns for a name.
#[derive(Clone)]
pub enum Resolved {
    Value(Value),
    Func(Predicate),
}

impl Resolved {
    pub fn func(f: impl Fn(&str) -> Value + 'static) -> Self {
        Resolved::Func(Rc::new(f))
    }
}

/// Evaluate `expr`, resolving names through `resolve`.
///
/// Only words listed in `operators` act as operators; any other operator
/// word is treated like an ordinary name.
pub fn evaluate<F>(expr: &str, resolve: F, operators: &[&str]) -> Result<Value>
where
    F: Fn(&str) -> Option<Resolved>,
{
    let raw = lex(expr)?;
    let items = raw
        .into_iter()
        .map(|token| Item::rewrite(token, &resolve, operators))
        .collect();
    let mut parser = Parser {
        expr,
        items,
        pos: 0,
        depth: 0,
    };
    let ast = parser.parse()?;
    ast.eval(expr)
}

/// Evaluate with [`DEFAULT_OPERATORS`] and reduce the result to its truthiness.
pub fn evaluate_condition<F>(expr: &str, resolve: F) -> Result<bool>
where
    F: Fn(&str) -> Option<Resolved>,
{
    evaluate(expr, resolve, DEFAULT_OPERATORS).map(|v| v.is_truthy())
}

// ---------------------------------------------------------------------------
// Lexer

#[derive(Debug, Clone, PartialEq)]
enum Raw {
    Word(String),
    Str(String),
    LParen,
    RParen,
    Comma,
}

fn lex(expr: &str) -> Result<Vec<(Raw, usize)>> {
    let mut tokens = Vec::new();
    let mut chars = expr.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push((Raw::LParen, pos));
            }
            ')' => {
                chars.next();
                tokens.push((Raw::RParen, pos));
            }
            ',' => {
                chars.next();
                tokens.push((Raw::Comma, pos));
            }
            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                text.push(escaped);
                            }
                        }
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => text.push(ch),
                    }
                }
                if !closed {
                    return Err(syntax(expr, pos, "unterminated string literal"));
                }
                tokens.push((Raw::Str(text), pos));
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '(' | ')' | ',' | '\'' | '"') {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push((Raw::Word(word), pos));
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Rewriting

enum Tok {
    Op(String),
    Lit(Value),
    Call(Predicate, String),
    LParen,
    RParen,
    Comma,
}

struct Item {
    tok: Tok,
    pos: usize,
}

impl Item {
    fn rewrite<F>((raw, pos): (Raw, usize), resolve: &F, operators: &[&str]) -> Item
    where
        F: Fn(&str) -> Option<Resolved>,
    {
        let tok = match raw {
            Raw::LParen => Tok::LParen,
            Raw::RParen => Tok::RParen,
            Raw::Comma => Tok::Comma,
            Raw::Str(s) => Tok::Lit(Value::Str(s)),
            Raw::Word(word) if operators.contains(&word.as_str()) => Tok::Op(word),
            Raw::Word(word) => match resolve(&word) {
                Some(Resolved::Value(v)) => Tok::Lit(v),
                Some(Resolved::Func(f)) => Tok::Call(f, word),
                None => Tok::Lit(literal(&word)),
            },
        };
        Item { tok, pos }
    }
}

/// An unresolved word: number, boolean, or a symbol standing for its own name.
fn literal(word: &str) -> Value {
    if let Ok(i) = word.parse::<i64>() {
        return Value::Int(i);
    }
    match word {
        "true" | "True" => Value::Bool(true),
        "false" | "False" => Value::Bool(false),
        _ => Value::Str(word.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Parser

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

enum Expr {
    Lit(Value),
    Call(Predicate, String),
    List(Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
}

struct Parser<'a> {
    expr: &'a str,
    items: Vec<Item>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn parse(&mut self) -> Result<Expr> {
        if self.items.is_empty() {
            return Err(syntax(self.expr, 0, "empty expression"));
        }
        let expr = self.parse_or()?;
        if let Some(item) = self.items.get(self.pos) {
            return Err(syntax(self.expr, item.pos, "unexpected token"));
        }
        Ok(expr)
    }

    fn peek_op(&self) -> Option<&str> {
        match self.items.get(self.pos) {
            Some(Item {
                tok: Tok::Op(op), ..
            }) => Some(op.as_str()),
            _ => None,
        }
    }

    fn peek_op_at(&self, offset: usize) -> Option<&str> {
        match self.items.get(self.pos + offset) {
            Some(Item {
                tok: Tok::Op(op), ..
            }) => Some(op.as_str()),
            _ => None,
        }
    }

    fn here(&self) -> usize {
        self.items
            .get(self.pos)
            .map(|i| i.pos)
            .unwrap_or(self.expr.len())
    }

    /// Every tree level costs a stack frame when evaluated and dropped.
    fn nest(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(syntax(self.expr, self.here(), "expression is nested too deeply"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_and()?;
        while self.peek_op() == Some("or") {
            self.nest()?;
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_not()?;
        while self.peek_op() == Some("and") {
            self.nest()?;
            self.pos += 1;
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.peek_op() == Some("not") {
            self.nest()?;
            self.pos += 1;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let lhs = self.parse_sum()?;
        let op = match self.peek_op() {
            Some("==") => BinOp::Eq,
            Some("!=") => BinOp::Ne,
            Some("<") => BinOp::Lt,
            Some("<=") => BinOp::Le,
            Some(">") => BinOp::Gt,
            Some(">=") => BinOp::Ge,
            Some("in") => BinOp::In,
            Some("not") if self.peek_op_at(1) == Some("in") => {
                self.pos += 1;
                BinOp::NotIn
            }
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_sum()?;
        Ok(Expr::Bin(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_sum(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek_op() {
                Some("+") => BinOp::Add,
                Some("-") => BinOp::Sub,
                _ => {
                    self.depth = base;
                    return Ok(lhs);
                }
            };
            self.nest()?;
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_op() {
                Some("*") => BinOp::Mul,
                Some("/") => BinOp::Div,
                Some("%") => BinOp::Rem,
                _ => {
                    self.depth = base;
                    return Ok(lhs);
                }
            };
            self.nest()?;
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek_op() == Some("-") {
            self.nest()?;
            self.pos += 1;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let at = self.here();
        let Some(item) = self.items.get(self.pos) else {
            return Err(syntax(self.expr, at, "unexpected end of expression"));
        };
        let expr = match &item.tok {
            Tok::Lit(v) => Expr::Lit(v.clone()),
            Tok::Call(f, name) => Expr::Call(Rc::clone(f), name.clone()),
            Tok::LParen => {
                self.nest()?;
                self.pos += 1;
                let group = self.parse_group(at)?;
                self.depth -= 1;
                return Ok(group);
            }
            Tok::Op(op) => {
                return Err(syntax(self.expr, at, &format!("unexpected operator '{op}'")));
            }
            Tok::RParen => return Err(syntax(self.expr, at, "unexpected ')'")),
            Tok::Comma => return Err(syntax(self.expr, at, "unexpected ','")),
        };
        self.pos += 1;
        Ok(expr)
    }

    /// Parenthesized expression or comma-separated list; `(` already consumed.
    fn parse_group(&mut self, open: usize) -> Result<Expr> {
        let mut elems = Vec::new();
        let mut is_list = false;
        loop {
            if matches!(self.items.get(self.pos).map(|i| &i.tok), Some(Tok::RParen)) {
                self.pos += 1;
                break;
            }
            elems.push(self.parse_or()?);
            match self.items.get(self.pos).map(|i| &i.tok) {
                Some(Tok::Comma) => {
                    is_list = true;
                    self.pos += 1;
                }
                Some(Tok::RParen) => {
                    self.pos += 1;
                    break;
                }
                Some(_) => return Err(syntax(self.expr, self.here(), "expected ',' or ')'")),
                None => return Err(syntax(self.expr, open, "unclosed '('")),
            }
        }
        if !is_list && elems.len() == 1 {
            Ok(elems.remove(0))
        } else {
            Ok(Expr::List(elems))
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation

impl Expr {
    fn eval(&self, src: &str) -> Result<Value> {
        match self {
            Expr::Lit(v) => Ok(v.clone()),
            Expr::Call(f, name) => Ok(f(name)),
            Expr::List(items) => items
                .iter()
                .map(|e| e.eval(src))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Expr::Not(inner) => Ok(Value::Bool(!inner.eval(src)?.is_truthy())),
            Expr::Neg(inner) => match inner.eval(src)? {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| eval_error(src, "integer overflow".to_string())),
                other => Err(eval_error(
                    src,
                    format!("bad operand type for unary -: '{}'", other.type_name()),
                )),
            },
            Expr::And(lhs, rhs) => {
                let l = lhs.eval(src)?;
                if l.is_truthy() { rhs.eval(src) } else { Ok(l) }
            }
            Expr::Or(lhs, rhs) => {
                let l = lhs.eval(src)?;
                if l.is_truthy() { Ok(l) } else { rhs.eval(src) }
            }
            Expr::Bin(op, lhs, rhs) => binary(src, *op, lhs.eval(src)?, rhs.eval(src)?),
        }
    }
}

fn binary(src: &str, op: BinOp, l: Value, r: Value) -> Result<Value> {
    use Value::*;

    let unsupported = |l: &Value, r: &Value, sym: &str| {
        eval_error(
            src,
            format!(
                "unsupported operand types for {sym}: '{}' and '{}'",
                l.type_name(),
                r.type_name()
            ),
        )
    };

    match op {
        BinOp::Eq => Ok(Bool(l == r)),
        BinOp::Ne => Ok(Bool(l != r)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = match (&l, &r) {
                (Int(a), Int(b)) => a.cmp(b),
                (Str(a), Str(b)) => a.cmp(b),
                _ => return Err(unsupported(&l, &r, "comparison")),
            };
            Ok(Bool(match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        BinOp::In | BinOp::NotIn => {
            let found = match (&l, &r) {
                (Str(needle), Str(hay)) => hay.contains(needle.as_str()),
                (x, List(items)) => items.contains(x),
                _ => return Err(unsupported(&l, &r, "in")),
            };
            Ok(Bool(if op == BinOp::In { found } else { !found }))
        }
        BinOp::Add => match (l, r) {
            (Int(a), Int(b)) => a
                .checked_add(b)
                .map(Int)
                .ok_or_else(|| eval_error(src, "integer overflow".into())),
            (Str(a), Str(b)) => Ok(Str(a + &b)),
            (List(mut a), List(b)) => {
                a.extend(b);
                Ok(List(a))
            }
            (l, r) => Err(unsupported(&l, &r, "+")),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
            let (Int(a), Int(b)) = (&l, &r) else {
                return Err(unsupported(&l, &r, "arithmetic"));
            };
            let (a, b) = (*a, *b);
            if matches!(op, BinOp::Div | BinOp::Rem) && b == 0 {
                return Err(eval_error(src, "division by zero".into()));
            }
            let result = match op {
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => a.checked_div_euclid(b),
                _ => a.checked_rem_euclid(b),
            };
            result
                .map(Int)
                .ok_or_else(|| eval_error(src, "integer overflow".into()))
        }
    }
}

fn syntax(expr: &str, location: usize, message: &str) -> ConfigError {
    ConfigError::ExpressionSyntax {
        expr: expr.to_string(),
        location,
        message: message.to_string(),
    }
}

fn eval_error(expr: &str, message: String) -> ConfigError {
    ConfigError::Expression {
        expr: expr.to_string(),
        message,
    }
}
