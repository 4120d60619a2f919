//! A small, sandboxed expression language for guard conditions and attribute assignments.
//!
//! Expressions can only see the names bound in a [`Scope`] and call the handful of functions
//! listed in [`FUNCTIONS`]; there is no way to reach anything else. Grammar, loosest binding first:
//!
//! ```text
//! or      := and (("or" | "||") and)*
//! and     := not (("and" | "&&") not)*
//! not     := ("not" | "!") not | cmp
//! cmp     := sum (("==" | "!=" | "<" | "<=" | ">" | ">=") sum)*
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/" | "%") unary)*
//! unary   := "-" unary | primary
//! primary := number | string | true | false | null | ident | ident "(" args ")" | "(" or ")"
//! ```
//!
//! An assignment is `ident "=" or`.
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{
    Distribution,
    Normal,
};
use tf_core::errors::EvaluationError;

use crate::value::Value;

/// Functions callable from expressions. Anything else is rejected.
pub const FUNCTIONS: &[&str] = &["randint", "uniform", "normal", "choice", "min", "max", "abs", "round"];

/// Read access to the bindings an expression may reference.
pub trait Scope {
    /// Current value bound to `name`, or `None` if the name is not declared.
    fn lookup(&self, name: &str) -> Option<&Value>;
}

impl Scope for BTreeMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Boolean negation.
    Not,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`, always produces a float.
    Div,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `and`, short-circuiting.
    And,
    /// `or`, short-circuiting.
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "and",
            Self::Or => "or",
        };
        write!(f, "{s}")
    }
}

/// Parsed expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// A constant.
    Literal(Value),
    /// A reference to a bound name.
    Ident(String),
    /// A unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// A binary operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// A call to one of the [`FUNCTIONS`].
    Call(String, Vec<Expr>),
}

/// `name = expression`, the form of an event-attribute declaration on a transition.
#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    /// Attribute being assigned.
    pub name: String,
    /// Right-hand side.
    pub expr: Expr,
}

/// Parse a standalone expression.
///
/// # Errors
/// Returns [`EvaluationError::Parse`] if `src` is not a complete expression.
pub fn parse(src: &str) -> Result<Expr, EvaluationError> {
    let mut parser = Parser::new(src)?;
    let expr = parser.or()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse an `name = expression` assignment.
///
/// # Errors
/// Returns [`EvaluationError::Parse`] if `src` is not an identifier followed by `=` and a complete
/// expression.
pub fn parse_assignment(src: &str) -> Result<Assignment, EvaluationError> {
    let mut parser = Parser::new(src)?;
    let name = match parser.advance() {
        (_, Tok::Ident(name)) if !is_keyword(&name) => name,
        (offset, _) => return Err(parse_error(offset, "expected attribute name")),
    };
    match parser.advance() {
        (_, Tok::Assign) => (),
        (offset, _) => return Err(parse_error(offset, "expected '=' after attribute name")),
    }
    let expr = parser.or()?;
    parser.expect_end()?;
    Ok(Assignment { name, expr })
}

impl Expr {
    /// Evaluate against `scope`, drawing any randomness from `rng`.
    ///
    /// # Errors
    /// Fails on unbound names, unknown functions, bad function arguments, unsupported operand
    /// types and division by zero.
    pub fn evaluate<S, R>(&self, scope: &S, rng: &mut R) -> Result<Value, EvaluationError>
    where
        S: Scope + ?Sized,
        R: Rng + ?Sized,
    {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Ident(name) => {
                scope.lookup(name).cloned().ok_or_else(|| EvaluationError::UnknownIdentifier(name.clone()))
            },
            Self::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!inner.evaluate(scope, rng)?.is_truthy())),
            Self::Unary(UnaryOp::Neg, inner) => match inner.evaluate(scope, rng)? {
                Value::Int(i) => Ok(i.checked_neg().map_or(Value::Float(-(i as f64)), Value::Int)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(mismatch("-", &other, &Value::Null)),
            },
            Self::Binary(BinaryOp::And, lhs, rhs) => {
                Ok(Value::Bool(lhs.evaluate(scope, rng)?.is_truthy() && rhs.evaluate(scope, rng)?.is_truthy()))
            },
            Self::Binary(BinaryOp::Or, lhs, rhs) => {
                Ok(Value::Bool(lhs.evaluate(scope, rng)?.is_truthy() || rhs.evaluate(scope, rng)?.is_truthy()))
            },
            Self::Binary(op, lhs, rhs) => {
                let l = lhs.evaluate(scope, rng)?;
                let r = rhs.evaluate(scope, rng)?;
                binary(*op, &l, &r)
            },
            Self::Call(name, args) => call(name, args, scope, rng),
        }
    }
}

/// Apply a non-short-circuiting binary operator.
#[allow(clippy::cast_precision_loss)]
fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvaluationError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(l.loosely_equals(r))),
        BinaryOp::Ne => Ok(Value::Bool(!l.loosely_equals(r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            // Nothing orders against a value that hasn't been computed yet.
            if matches!(l, Value::Null) || matches!(r, Value::Null) {
                return Ok(Value::Bool(false));
            }
            let ord = l.partial_order(r).ok_or_else(|| mismatch(&op.to_string(), l, r))?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        },
        BinaryOp::Add => match (l, r) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (Value::Int(a), Value::Int(b)) => Ok(a.checked_add(*b).map_or(Value::Float(*a as f64 + *b as f64), Value::Int)),
            _ => float_op(op, l, r, |a, b| a + b),
        },
        BinaryOp::Sub => match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(a.checked_sub(*b).map_or(Value::Float(*a as f64 - *b as f64), Value::Int)),
            _ => float_op(op, l, r, |a, b| a - b),
        },
        BinaryOp::Mul => match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(a.checked_mul(*b).map_or(Value::Float(*a as f64 * *b as f64), Value::Int)),
            _ => float_op(op, l, r, |a, b| a * b),
        },
        BinaryOp::Div => {
            if r.as_f64() == Some(0.0) {
                return Err(EvaluationError::DivisionByZero);
            }
            float_op(op, l, r, |a, b| a / b)
        },
        BinaryOp::Rem => match (l, r) {
            (Value::Int(_), Value::Int(0)) => Err(EvaluationError::DivisionByZero),
            (Value::Int(a), Value::Int(b)) => {
                Ok(a.checked_rem_euclid(*b).map_or(Value::Float((*a as f64).rem_euclid(*b as f64)), Value::Int))
            },
            _ => {
                if r.as_f64() == Some(0.0) {
                    return Err(EvaluationError::DivisionByZero);
                }
                float_op(op, l, r, f64::rem_euclid)
            },
        },
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators are evaluated in Expr::evaluate"),
    }
}

/// Apply `f` to both operands as floats, failing if either is not numeric.
fn float_op(op: BinaryOp, l: &Value, r: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value, EvaluationError> {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
        _ => Err(mismatch(&op.to_string(), l, r)),
    }
}

/// Build a type mismatch error for `op` applied to `l` and `r`.
fn mismatch(op: &str, l: &Value, r: &Value) -> EvaluationError {
    EvaluationError::TypeMismatch { op: op.into(), lhs: l.type_name().into(), rhs: r.type_name().into() }
}

/// Build a bad-arguments error for `function`.
fn bad_args(function: &str, message: impl Into<String>) -> EvaluationError {
    EvaluationError::BadArguments { function: function.into(), message: message.into() }
}

/// Evaluate a whitelisted function call.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn call<S, R>(name: &str, args: &[Expr], scope: &S, rng: &mut R) -> Result<Value, EvaluationError>
where
    S: Scope + ?Sized,
    R: Rng + ?Sized,
{
    if !FUNCTIONS.contains(&name) {
        return Err(EvaluationError::UnknownFunction(name.into()));
    }
    let args = args.iter().map(|a| a.evaluate(scope, rng)).collect::<Result<Vec<_>, _>>()?;

    match (name, args.as_slice()) {
        ("randint", [Value::Int(lo), Value::Int(hi)]) => {
            if lo > hi {
                return Err(bad_args(name, format!("empty range {lo}..={hi}")));
            }
            Ok(Value::Int(rng.gen_range(*lo..=*hi)))
        },
        ("randint", _) => Err(bad_args(name, "expected two integers")),
        ("uniform", [a, b]) => {
            let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                return Err(bad_args(name, "expected two numbers"));
            };
            if !(b - a).is_finite() {
                return Err(bad_args(name, format!("range {a}..{b} is not finite")));
            }
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            if lo == hi {
                return Ok(Value::Float(lo));
            }
            Ok(Value::Float(rng.gen_range(lo..hi)))
        },
        ("normal", [mean, sd]) => {
            let (Some(mean), Some(sd)) = (mean.as_f64(), sd.as_f64()) else {
                return Err(bad_args(name, "expected two numbers"));
            };
            let dist = Normal::new(mean, sd).map_err(|e| bad_args(name, e.to_string()))?;
            Ok(Value::Float(dist.sample(rng)))
        },
        ("choice", []) | ("min", []) | ("max", []) => Err(bad_args(name, "expected at least one argument")),
        ("choice", options) => Ok(options.choose(rng).cloned().unwrap_or_default()),
        ("min" | "max", values) => {
            let wanted = if name == "min" { Ordering::Less } else { Ordering::Greater };
            let mut best = &values[0];
            for v in &values[1..] {
                let ord = v.partial_order(best).ok_or_else(|| mismatch(name, v, best))?;
                if ord == wanted {
                    best = v;
                }
            }
            Ok(best.clone())
        },
        ("abs", [Value::Int(i)]) => Ok(i.checked_abs().map_or(Value::Float((*i as f64).abs()), Value::Int)),
        ("abs", [Value::Float(f)]) => Ok(Value::Float(f.abs())),
        ("round", [x]) => x
            .as_f64()
            .map(|f| Value::Int(f.round() as i64))
            .ok_or_else(|| bad_args(name, "expected a number")),
        ("round", [x, Value::Int(digits)]) => {
            let f = x.as_f64().ok_or_else(|| bad_args(name, "expected a number"))?;
            let scale = 10f64.powi(i32::try_from(*digits).map_err(|_| bad_args(name, "digits out of range"))?);
            Ok(Value::Float((f * scale).round() / scale))
        },
        _ => Err(bad_args(name, format!("unsupported arguments ({} given)", args.len()))),
    }
}

/// Lexical tokens.
#[derive(Clone, Debug, PartialEq)]
enum Tok {
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal, quotes removed.
    Str(String),
    /// Identifier or keyword.
    Ident(String),
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `!`
    Bang,
    /// `=`
    Assign,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `,`
    Comma,
    /// End of input.
    Eof,
}

/// Words with a fixed meaning that cannot be used as attribute names.
fn is_keyword(word: &str) -> bool {
    matches!(word, "and" | "or" | "not" | "true" | "True" | "false" | "False" | "null" | "None")
}

/// Build a parse error at `offset`.
fn parse_error(offset: usize, message: impl Into<String>) -> EvaluationError {
    EvaluationError::Parse { offset, message: message.into() }
}

/// Split `src` into `(offset, token)` pairs, terminated by [`Tok::Eof`].
fn tokenize(src: &str) -> Result<Vec<(usize, Tok)>, EvaluationError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.' || bytes[i] == b'_') {
                i += 1;
            }
            let text = src[start..i].replace('_', "");
            let tok = if text.contains('.') {
                Tok::Float(text.parse().map_err(|_| parse_error(start, format!("bad number {text:?}")))?)
            } else {
                Tok::Int(text.parse().map_err(|_| parse_error(start, format!("bad number {text:?}")))?)
            };
            tokens.push((start, tok));
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push((start, Tok::Ident(src[start..i].to_owned())));
            continue;
        }

        if c == b'"' || c == b'\'' {
            i += 1;
            let mut out = String::new();
            loop {
                let Some(&b) = bytes.get(i) else {
                    return Err(parse_error(start, "unterminated string"));
                };
                if b == c {
                    i += 1;
                    break;
                }
                if b == b'\\' && i + 1 < bytes.len() {
                    i += 1;
                }
                // Copy one full UTF-8 character.
                let ch_len = src[i..].chars().next().map_or(1, char::len_utf8);
                out.push_str(&src[i..i + ch_len]);
                i += ch_len;
            }
            tokens.push((start, Tok::Str(out)));
            continue;
        }

        let next = bytes.get(i + 1).copied();
        let (tok, len) = match (c, next) {
            (b'=', Some(b'=')) => (Tok::EqEq, 2),
            (b'!', Some(b'=')) => (Tok::NotEq, 2),
            (b'<', Some(b'=')) => (Tok::Le, 2),
            (b'>', Some(b'=')) => (Tok::Ge, 2),
            (b'&', Some(b'&')) => (Tok::AndAnd, 2),
            (b'|', Some(b'|')) => (Tok::OrOr, 2),
            (b'=', _) => (Tok::Assign, 1),
            (b'!', _) => (Tok::Bang, 1),
            (b'<', _) => (Tok::Lt, 1),
            (b'>', _) => (Tok::Gt, 1),
            (b'+', _) => (Tok::Plus, 1),
            (b'-', _) => (Tok::Minus, 1),
            (b'*', _) => (Tok::Star, 1),
            (b'/', _) => (Tok::Slash, 1),
            (b'%', _) => (Tok::Percent, 1),
            (b'(', _) => (Tok::LParen, 1),
            (b')', _) => (Tok::RParen, 1),
            (b',', _) => (Tok::Comma, 1),
            _ => {
                let ch = src[i..].chars().next().unwrap_or('?');
                return Err(parse_error(start, format!("unexpected character {ch:?}")));
            },
        };
        tokens.push((start, tok));
        i += len;
    }

    tokens.push((src.len(), Tok::Eof));
    Ok(tokens)
}

/// Deepest nesting of parentheses, calls, unary operators and operator chains in one expression.
pub const MAX_NESTING: usize = 128;

/// Recursive-descent parser over a token stream.
struct Parser {
    /// Tokens with their byte offsets; always ends in [`Tok::Eof`].
    tokens: Vec<(usize, Tok)>,
    /// Index of the next token.
    pos: usize,
    /// Current nesting level, bounded by [`MAX_NESTING`].
    depth: usize,
}

impl Parser {
    /// Tokenize `src` and position the parser at its start.
    fn new(src: &str) -> Result<Self, EvaluationError> {
        Ok(Self { tokens: tokenize(src)?, pos: 0, depth: 0 })
    }

    /// Go one nesting level deeper.
    fn enter(&mut self) -> Result<(), EvaluationError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(parse_error(self.offset(), format!("expression nested deeper than {MAX_NESTING} levels")));
        }
        Ok(())
    }

    /// Look at the next token without consuming it.
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    /// Consume and return the next token; keeps returning `Eof` at the end.
    fn advance(&mut self) -> (usize, Tok) {
        let idx = self.pos.min(self.tokens.len() - 1);
        self.pos += 1;
        self.tokens[idx].clone()
    }

    /// Offset of the next token.
    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    /// Consume the next token if it is the keyword `word`.
    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Tok::Ident(w) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Fail unless all input has been consumed.
    fn expect_end(&self) -> Result<(), EvaluationError> {
        match self.peek() {
            Tok::Eof => Ok(()),
            tok => Err(parse_error(self.offset(), format!("unexpected trailing {tok:?}"))),
        }
    }

    /// `or := and (("or" | "||") and)*`
    fn or(&mut self) -> Result<Expr, EvaluationError> {
        let base = self.depth;
        let mut lhs = self.and()?;
        while self.eat_word("or") || self.eat_tok(&Tok::OrOr) {
            self.enter()?;
            let rhs = self.and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    /// `and := not (("and" | "&&") not)*`
    fn and(&mut self) -> Result<Expr, EvaluationError> {
        let base = self.depth;
        let mut lhs = self.not()?;
        while self.eat_word("and") || self.eat_tok(&Tok::AndAnd) {
            self.enter()?;
            let rhs = self.not()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    /// `not := ("not" | "!") not | cmp`
    fn not(&mut self) -> Result<Expr, EvaluationError> {
        if self.eat_word("not") || self.eat_tok(&Tok::Bang) {
            self.enter()?;
            let inner = self.not()?;
            self.depth -= 1;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.cmp()
    }

    /// `cmp := sum (cmp_op sum)*`
    fn cmp(&mut self) -> Result<Expr, EvaluationError> {
        let base = self.depth;
        let mut lhs = self.sum()?;
        loop {
            let op = match self.peek() {
                Tok::EqEq => BinaryOp::Eq,
                Tok::NotEq => BinaryOp::Ne,
                Tok::Lt => BinaryOp::Lt,
                Tok::Le => BinaryOp::Le,
                Tok::Gt => BinaryOp::Gt,
                Tok::Ge => BinaryOp::Ge,
                _ => {
                    self.depth = base;
                    return Ok(lhs);
                },
            };
            self.pos += 1;
            self.enter()?;
            let rhs = self.sum()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    /// `sum := product (("+" | "-") product)*`
    fn sum(&mut self) -> Result<Expr, EvaluationError> {
        let base = self.depth;
        let mut lhs = self.product()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinaryOp::Add,
                Tok::Minus => BinaryOp::Sub,
                _ => {
                    self.depth = base;
                    return Ok(lhs);
                },
            };
            self.pos += 1;
            self.enter()?;
            let rhs = self.product()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    /// `product := unary (("*" | "/" | "%") unary)*`
    fn product(&mut self) -> Result<Expr, EvaluationError> {
        let base = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinaryOp::Mul,
                Tok::Slash => BinaryOp::Div,
                Tok::Percent => BinaryOp::Rem,
                _ => {
                    self.depth = base;
                    return Ok(lhs);
                },
            };
            self.pos += 1;
            self.enter()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    /// `unary := "-" unary | primary`
    fn unary(&mut self) -> Result<Expr, EvaluationError> {
        if self.eat_tok(&Tok::Minus) {
            self.enter()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        self.primary()
    }

    /// Literals, names, calls and parenthesised expressions.
    fn primary(&mut self) -> Result<Expr, EvaluationError> {
        let (offset, tok) = self.advance();
        match tok {
            Tok::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Tok::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Tok::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Tok::Ident(word) => match word.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "None" => Ok(Expr::Literal(Value::Null)),
                "and" | "or" | "not" => Err(parse_error(offset, format!("unexpected keyword {word:?}"))),
                _ if self.eat_tok(&Tok::LParen) => {
                    self.enter()?;
                    let mut args = Vec::new();
                    if !self.eat_tok(&Tok::RParen) {
                        loop {
                            args.push(self.or()?);
                            if self.eat_tok(&Tok::RParen) {
                                break;
                            }
                            if !self.eat_tok(&Tok::Comma) {
                                return Err(parse_error(self.offset(), "expected ',' or ')' in argument list"));
                            }
                        }
                    }
                    self.depth -= 1;
                    Ok(Expr::Call(word, args))
                },
                _ => Ok(Expr::Ident(word)),
            },
            Tok::LParen => {
                self.enter()?;
                let inner = self.or()?;
                if !self.eat_tok(&Tok::RParen) {
                    return Err(parse_error(self.offset(), "expected ')'"));
                }
                self.depth -= 1;
                Ok(inner)
            },
            Tok::Eof => Err(parse_error(offset, "unexpected end of input")),
            other => Err(parse_error(offset, format!("unexpected {other:?}"))),
        }
    }

    /// Consume the next token if it equals `tok`.
    fn eat_tok(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}
