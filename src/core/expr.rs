// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Operand expression parsing and evaluation.
//!
//! Expressions combine self-defining terms (decimal, `X'..'`, `C'..'`,
//! `B'..'`), symbols, the location counter `*` and length attributes
//! `L'sym` with `+ - * /` at conventional precedence. Evaluation yields
//! an integer or an address; unresolved symbols produce a typed deferral
//! so callers can re-attempt in a later phase instead of failing.

use crate::core::addr::{Address, AddressError};
use crate::core::ebcdic;

/// Binary operators, conventional precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Minus,
}

/// A parsed operand expression. Positions are source-line columns kept
/// for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(i64, usize),
    Symbol(String, usize),
    /// The location counter `*`.
    Loc(usize),
    /// `L'sym`.
    LengthOf(String, usize),
    Unary {
        op: UnOp,
        expr: Box<Expr>,
        pos: usize,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: usize,
    },
}

impl Expr {
    /// Column of the leftmost token.
    pub fn pos(&self) -> usize {
        match self {
            Expr::Number(_, pos)
            | Expr::Symbol(_, pos)
            | Expr::Loc(pos)
            | Expr::LengthOf(_, pos)
            | Expr::Unary { pos, .. } => *pos,
            Expr::Binary { lhs, .. } => lhs.pos(),
        }
    }
}

/// Error from expression parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub pos: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, pos: usize) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// An evaluated expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Addr(Address),
}

impl Value {
    /// Length attribute of the value (left-term rule for expressions).
    pub fn length(&self) -> u32 {
        match self {
            Value::Int(_) => 1,
            Value::Addr(a) => a.length(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Addr(_) => None,
        }
    }

    pub fn as_addr(&self) -> Option<Address> {
        match self {
            Value::Addr(a) => Some(*a),
            Value::Int(_) => None,
        }
    }
}

/// Error or deferral from expression evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// A symbol (or `*`) has no value yet; retry in a later phase.
    Deferred { symbol: String, pos: usize },
    /// The expression can never evaluate.
    Fault { message: String, pos: usize },
}

impl EvalError {
    fn fault(message: impl Into<String>, pos: usize) -> Self {
        EvalError::Fault {
            message: message.into(),
            pos,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, EvalError::Deferred { .. })
    }

    pub fn pos(&self) -> usize {
        match self {
            EvalError::Deferred { pos, .. } | EvalError::Fault { pos, .. } => *pos,
        }
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Deferred { symbol, .. } => {
                write!(f, "undefined symbol {}", symbol)
            }
            EvalError::Fault { message, .. } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for EvalError {}

/// Context for expression evaluation.
///
/// Supplies symbol values, the current location counter and length
/// attributes. `None` answers mean "not known yet", not "error".
pub trait EvalContext {
    fn lookup(&self, name: &str) -> Option<Value>;
    fn location(&self) -> Option<Address>;
    fn length_of(&self, name: &str) -> Option<u32>;
}

/// Evaluate an expression against a context.
pub fn eval_expr(expr: &Expr, ctx: &dyn EvalContext) -> Result<Value, EvalError> {
    match expr {
        Expr::Number(n, _) => Ok(Value::Int(*n)),

        Expr::Symbol(name, pos) => ctx.lookup(name).ok_or(EvalError::Deferred {
            symbol: name.clone(),
            pos: *pos,
        }),

        Expr::Loc(pos) => match ctx.location() {
            Some(addr) => Ok(Value::Addr(addr)),
            None => Err(EvalError::Deferred {
                symbol: "*".to_string(),
                pos: *pos,
            }),
        },

        Expr::LengthOf(name, pos) => match ctx.length_of(name) {
            Some(len) => Ok(Value::Int(len as i64)),
            None => Err(EvalError::Deferred {
                symbol: name.clone(),
                pos: *pos,
            }),
        },

        Expr::Unary { op, expr, pos } => {
            let val = eval_expr(expr, ctx)?;
            match (op, val) {
                (UnOp::Plus, v) => Ok(v),
                (UnOp::Minus, Value::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
                (UnOp::Minus, Value::Addr(_)) => Err(EvalError::fault(
                    "a relocatable value cannot be negated",
                    *pos,
                )),
            }
        }

        Expr::Binary { op, lhs, rhs, pos } => {
            let l = eval_expr(lhs, ctx)?;
            let r = eval_expr(rhs, ctx)?;
            apply_binary(*op, l, r, *pos)
        }
    }
}

fn addr_fault(e: AddressError, pos: usize) -> EvalError {
    EvalError::fault(e.to_string(), pos)
}

/// Apply a binary operator under the two-domain arithmetic rules. The
/// result's length attribute is the left operand's.
fn apply_binary(op: BinOp, l: Value, r: Value, pos: usize) -> Result<Value, EvalError> {
    match op {
        BinOp::Add => match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(b))),
            (Value::Addr(a), Value::Int(b)) => {
                Ok(Value::Addr(a.offset_by(b).map_err(|e| addr_fault(e, pos))?))
            }
            (Value::Int(a), Value::Addr(b)) => Ok(Value::Addr(
                b.offset_by(a)
                    .map_err(|e| addr_fault(e, pos))?
                    .with_length(1),
            )),
            (Value::Addr(_), Value::Addr(_)) => Err(EvalError::fault(
                "two relocatable values cannot be added",
                pos,
            )),
        },
        BinOp::Sub => match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_sub(b))),
            (Value::Addr(a), Value::Int(b)) => Ok(Value::Addr(
                a.offset_by(-b).map_err(|e| addr_fault(e, pos))?,
            )),
            (Value::Addr(a), Value::Addr(b)) => {
                Ok(Value::Int(a.diff(&b).map_err(|e| addr_fault(e, pos))?))
            }
            (Value::Int(_), Value::Addr(_)) => Err(EvalError::fault(
                "a relocatable value cannot be subtracted from an absolute one",
                pos,
            )),
        },
        BinOp::Mul => match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_mul(b))),
            _ => Err(EvalError::fault(
                "relocatable values cannot be multiplied",
                pos,
            )),
        },
        BinOp::Div => match (l, r) {
            (Value::Int(_), Value::Int(0)) => Err(EvalError::fault("division by zero", pos)),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a / b)),
            _ => Err(EvalError::fault(
                "relocatable values cannot be divided",
                pos,
            )),
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Sym(String),
    LengthAttr(String),
    Star,
    Plus,
    Minus,
    Slash,
    LParen,
    RParen,
}

fn is_symbol_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'$' || c == b'#' || c == b'@' || c == b'_'
}

fn is_symbol_char(c: u8) -> bool {
    is_symbol_start(c) || c.is_ascii_digit()
}

struct Lexer<'a> {
    text: &'a [u8],
    at: usize,
    base: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str, base: usize) -> Self {
        Self {
            text: text.as_bytes(),
            at: 0,
            base,
        }
    }

    fn col(&self) -> usize {
        self.base + self.at
    }

    fn peek(&self) -> Option<u8> {
        self.text.get(self.at).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.text.get(self.at + 1).copied()
    }

    /// Read a quoted body, honoring `''` as a literal quote.
    fn quoted(&mut self) -> Result<String, ParseError> {
        let open = self.col();
        self.at += 1;
        let mut body = String::new();
        loop {
            match self.peek() {
                Some(b'\'') if self.peek2() == Some(b'\'') => {
                    body.push('\'');
                    self.at += 2;
                }
                Some(b'\'') => {
                    self.at += 1;
                    return Ok(body);
                }
                Some(c) => {
                    body.push(c as char);
                    self.at += 1;
                }
                None => return Err(ParseError::new("unclosed quote", open)),
            }
        }
    }

    fn next_tok(&mut self) -> Result<Option<(Tok, usize)>, ParseError> {
        let col = self.col();
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(None),
        };
        let tok = match c {
            b'+' => {
                self.at += 1;
                Tok::Plus
            }
            b'-' => {
                self.at += 1;
                Tok::Minus
            }
            b'*' => {
                self.at += 1;
                Tok::Star
            }
            b'/' => {
                self.at += 1;
                Tok::Slash
            }
            b'(' => {
                self.at += 1;
                Tok::LParen
            }
            b')' => {
                self.at += 1;
                Tok::RParen
            }
            b'0'..=b'9' => {
                let start = self.at;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.at += 1;
                }
                let text = std::str::from_utf8(&self.text[start..self.at]).unwrap_or_default();
                let n = text
                    .parse::<i64>()
                    .map_err(|_| ParseError::new(format!("invalid number {}", text), col))?;
                Tok::Num(n)
            }
            c if is_symbol_start(c) => {
                // A single letter followed by a quote is either a typed
                // self-defining term (X/C/B) or the length attribute (L).
                if self.peek2() == Some(b'\'') {
                    match c.to_ascii_uppercase() {
                        b'X' => {
                            self.at += 1;
                            let body = self.quoted()?;
                            return Ok(Some((Tok::Num(hex_term(&body, col)?), col)));
                        }
                        b'B' => {
                            self.at += 1;
                            let body = self.quoted()?;
                            return Ok(Some((Tok::Num(bit_term(&body, col)?), col)));
                        }
                        b'C' => {
                            self.at += 1;
                            let body = self.quoted()?;
                            return Ok(Some((Tok::Num(char_term(&body, col)?), col)));
                        }
                        b'L' => {
                            self.at += 2;
                            let start = self.at;
                            while self.peek().is_some_and(is_symbol_char) {
                                self.at += 1;
                            }
                            if start == self.at {
                                return Err(ParseError::new(
                                    "length attribute requires a symbol",
                                    col,
                                ));
                            }
                            let name =
                                std::str::from_utf8(&self.text[start..self.at]).unwrap_or_default();
                            return Ok(Some((Tok::LengthAttr(name.to_string()), col)));
                        }
                        _ => {}
                    }
                }
                let start = self.at;
                while self.peek().is_some_and(is_symbol_char) {
                    self.at += 1;
                }
                let name = std::str::from_utf8(&self.text[start..self.at]).unwrap_or_default();
                Tok::Sym(name.to_string())
            }
            other => {
                return Err(ParseError::new(
                    format!("unexpected character '{}'", other as char),
                    col,
                ))
            }
        };
        Ok(Some((tok, col)))
    }
}

fn hex_term(body: &str, col: usize) -> Result<i64, ParseError> {
    if body.is_empty() || body.len() > 8 {
        return Err(ParseError::new("hex term must be 1 to 8 digits", col));
    }
    u32::from_str_radix(body, 16)
        .map(|v| v as i64)
        .map_err(|_| ParseError::new(format!("invalid hex term X'{}'", body), col))
}

fn bit_term(body: &str, col: usize) -> Result<i64, ParseError> {
    if body.is_empty() || body.len() > 32 {
        return Err(ParseError::new("bit term must be 1 to 32 digits", col));
    }
    u32::from_str_radix(body, 2)
        .map(|v| v as i64)
        .map_err(|_| ParseError::new(format!("invalid bit term B'{}'", body), col))
}

fn char_term(body: &str, col: usize) -> Result<i64, ParseError> {
    if body.is_empty() || body.len() > 4 {
        return Err(ParseError::new(
            "character term must be 1 to 4 characters",
            col,
        ));
    }
    let mut v: i64 = 0;
    for b in ebcdic::encode(body) {
        v = (v << 8) | b as i64;
    }
    Ok(v)
}

fn lex(text: &str, base: usize) -> Result<Vec<(Tok, usize)>, ParseError> {
    let mut lexer = Lexer::new(text, base);
    let mut toks = Vec::new();
    while let Some(t) = lexer.next_tok()? {
        toks.push(t);
    }
    Ok(toks)
}

struct Parser {
    toks: Vec<(Tok, usize)>,
    at: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.at).map(|(t, _)| t)
    }

    fn pos(&self) -> usize {
        self.toks.get(self.at).map(|(_, p)| *p).unwrap_or(self.end)
    }

    fn bump(&mut self) -> Option<(Tok, usize)> {
        let t = self.toks.get(self.at).cloned();
        self.at += 1;
        t
    }

    // expr := term (('+'|'-') term)*
    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            let pos = self.pos();
            self.bump();
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos,
            };
        }
        Ok(lhs)
    }

    // term := factor (('*'|'/') factor)*
    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                _ => break,
            };
            let pos = self.pos();
            self.bump();
            let rhs = self.factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos,
            };
        }
        Ok(lhs)
    }

    // factor := ('+'|'-') factor | primary
    fn factor(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Tok::Plus) => {
                let pos = self.pos();
                self.bump();
                Ok(Expr::Unary {
                    op: UnOp::Plus,
                    expr: Box::new(self.factor()?),
                    pos,
                })
            }
            Some(Tok::Minus) => {
                let pos = self.pos();
                self.bump();
                Ok(Expr::Unary {
                    op: UnOp::Minus,
                    expr: Box::new(self.factor()?),
                    pos,
                })
            }
            _ => self.primary(),
        }
    }

    // primary := number | symbol | L'sym | '*' | '(' expr ')'
    fn primary(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos();
        match self.bump() {
            Some((Tok::Num(n), p)) => Ok(Expr::Number(n, p)),
            Some((Tok::Sym(name), p)) => Ok(Expr::Symbol(name, p)),
            Some((Tok::LengthAttr(name), p)) => Ok(Expr::LengthOf(name, p)),
            // In operand position a star is the location counter.
            Some((Tok::Star, p)) => Ok(Expr::Loc(p)),
            Some((Tok::LParen, _)) => {
                let inner = self.expr()?;
                match self.bump() {
                    Some((Tok::RParen, _)) => Ok(inner),
                    _ => Err(ParseError::new("missing ')'", pos)),
                }
            }
            Some((tok, p)) => Err(ParseError::new(
                format!("unexpected token in expression: {:?}", tok),
                p,
            )),
            None => Err(ParseError::new("expression expected", pos)),
        }
    }
}

/// Parse one complete expression. `base` is the column of `text`'s
/// first character in its source line; positions in the result are
/// line columns.
pub fn parse_expr(text: &str, base: usize) -> Result<Expr, ParseError> {
    let toks = lex(text, base)?;
    if toks.is_empty() {
        return Err(ParseError::new("expression expected", base));
    }
    let end = base + text.len();
    let mut parser = Parser { toks, at: 0, end };
    let expr = parser.expr()?;
    if parser.at != parser.toks.len() {
        return Err(ParseError::new(
            "trailing characters after expression",
            parser.pos(),
        ));
    }
    Ok(expr)
}
