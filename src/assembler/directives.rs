// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! DC/DS operand grammar, sizing and byte materialization.
//!
//! A data operand is `[dup][type][Ln]` followed by a nominal value:
//! quoted for the numeric and character types, a parenthesized
//! expression list for the address types. Sizing happens during
//! allocation; bytes are built during object generation once every
//! referenced symbol has an address.

use crate::core::addr::Address;
use crate::core::assembler::error::AsmErrorKind;
use crate::core::base::BaseManager;
use crate::core::ebcdic;
use crate::core::expr::{eval_expr, parse_expr, EvalContext, EvalError, Expr, Value};

use super::statement::StmtError;

/// DC/DS type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcType {
    /// Fullword address constant.
    A,
    /// Halfword address constant.
    Y,
    /// Base/displacement halfword.
    S,
    /// Fullword binary.
    F,
    /// Halfword binary.
    H,
    /// Character (EBCDIC).
    C,
    /// Hexadecimal.
    X,
    /// Bit.
    B,
    /// Packed decimal.
    P,
    /// Zoned decimal.
    Z,
}

impl DcType {
    fn parse(c: char) -> Option<DcType> {
        match c.to_ascii_uppercase() {
            'A' => Some(DcType::A),
            'Y' => Some(DcType::Y),
            'S' => Some(DcType::S),
            'F' => Some(DcType::F),
            'H' => Some(DcType::H),
            'C' => Some(DcType::C),
            'X' => Some(DcType::X),
            'B' => Some(DcType::B),
            'P' => Some(DcType::P),
            'Z' => Some(DcType::Z),
            _ => None,
        }
    }

    /// Implied alignment. An explicit length modifier removes it.
    pub fn alignment(self) -> u32 {
        match self {
            DcType::A | DcType::F => 4,
            DcType::Y | DcType::S | DcType::H => 2,
            DcType::C | DcType::X | DcType::B | DcType::P | DcType::Z => 1,
        }
    }

    /// Type attribute letter for labels on this operand.
    pub fn type_attr(self) -> char {
        match self {
            DcType::A => 'A',
            DcType::Y => 'Y',
            DcType::S => 'S',
            DcType::F => 'F',
            DcType::H => 'H',
            DcType::C => 'C',
            DcType::X => 'X',
            DcType::B => 'B',
            DcType::P => 'P',
            DcType::Z => 'Z',
        }
    }

    pub fn letter(self) -> char {
        self.type_attr()
    }

    fn takes_expr_list(self) -> bool {
        matches!(self, DcType::A | DcType::Y | DcType::S)
    }
}

/// Nominal value of a data operand.
#[derive(Debug, Clone)]
pub enum DataValue {
    /// No nominal value (DS reserves without one).
    None,
    /// Quoted body, verbatim with `''` already folded.
    Quoted(String),
    /// Parenthesized expression list for A/Y/S.
    Exprs(Vec<Expr>),
}

/// One parsed DC/DS operand.
#[derive(Debug, Clone)]
pub struct DataOperand {
    /// Duplication factor; `None` means 1.
    pub dup: Option<Expr>,
    pub ty: DcType,
    /// Explicit length modifier in bytes.
    pub length: Option<Expr>,
    pub value: DataValue,
    /// 1-based column of the operand.
    pub col: usize,
}

/// Resolved sizing for one operand: `dup` copies of `unit` bytes,
/// aligned to `align`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSizing {
    pub dup: u32,
    pub unit: u32,
    pub align: u32,
}

impl DataSizing {
    /// Bytes for all copies of one nominal value; `None` when the
    /// product leaves the address space.
    pub fn total(&self) -> Option<u32> {
        self.dup.checked_mul(self.unit)
    }
}

/// Parse a full DC/DS operand field. `col` is the field's 1-based
/// source column.
pub fn parse_data_operands(field: &str, col: usize) -> Result<Vec<DataOperand>, StmtError> {
    let mut out = Vec::new();
    for (piece, piece_col) in split_top_level(field, col) {
        if piece.trim().is_empty() {
            return Err(StmtError::directive("empty data operand"));
        }
        out.push(parse_one(&piece, piece_col)?);
    }
    Ok(out)
}

fn split_top_level(field: &str, base_col: usize) -> Vec<(String, usize)> {
    let mut out = Vec::new();
    if field.is_empty() {
        return out;
    }
    let bytes = field.as_bytes();
    let mut start = 0;
    let mut depth = 0u32;
    let mut in_quote = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' if in_quote && bytes.get(i + 1) == Some(&b'\'') => i += 1,
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote && depth > 0 => depth -= 1,
            b',' if !in_quote && depth == 0 => {
                out.push((field[start..i].to_string(), base_col + start));
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    out.push((field[start..].to_string(), base_col + start));
    out
}

fn parse_one(text: &str, col: usize) -> Result<DataOperand, StmtError> {
    let bytes = text.as_bytes();
    let mut at = 0;

    // Duplication factor: digits or a parenthesized expression.
    let dup = if bytes.first().is_some_and(u8::is_ascii_digit) {
        let start = at;
        while bytes.get(at).is_some_and(u8::is_ascii_digit) {
            at += 1;
        }
        let n: i64 = text[start..at]
            .parse()
            .map_err(|_| StmtError::directive(format!("invalid duplication factor in {}", text)))?;
        Some(Expr::Number(n, col + start))
    } else if bytes.first() == Some(&b'(') {
        let (inner, end) = balanced_group(text, 0)
            .ok_or_else(|| StmtError::directive(format!("unbalanced parentheses in {}", text)))?;
        at = end;
        Some(
            parse_expr(inner, col + 1)
                .map_err(|e| StmtError::expression(e.message, e.pos))?,
        )
    } else {
        None
    };

    let ty_char = bytes
        .get(at)
        .copied()
        .ok_or_else(|| StmtError::directive(format!("missing type in data operand {}", text)))?;
    let ty = DcType::parse(ty_char as char).ok_or_else(|| {
        StmtError::directive(format!("unknown data type {}", ty_char as char))
    })?;
    at += 1;

    // Length modifier: Ln or L(expr).
    let length = if bytes.get(at).is_some_and(|c| c.eq_ignore_ascii_case(&b'L')) {
        at += 1;
        if bytes.get(at) == Some(&b'(') {
            let (inner, end) = balanced_group(text, at).ok_or_else(|| {
                StmtError::directive(format!("unbalanced length modifier in {}", text))
            })?;
            let expr = parse_expr(inner, col + at + 1)
                .map_err(|e| StmtError::expression(e.message, e.pos))?;
            at = end;
            Some(expr)
        } else {
            let start = at;
            while bytes.get(at).is_some_and(u8::is_ascii_digit) {
                at += 1;
            }
            if start == at {
                return Err(StmtError::directive(format!(
                    "length modifier requires a value in {}",
                    text
                )));
            }
            let n: i64 = text[start..at]
                .parse()
                .map_err(|_| StmtError::directive(format!("invalid length modifier in {}", text)))?;
            Some(Expr::Number(n, col + start))
        }
    } else {
        None
    };

    // Nominal value.
    let value = match bytes.get(at) {
        None => DataValue::None,
        Some(b'\'') => {
            let body = quoted_body(&text[at..]).ok_or_else(|| {
                StmtError::directive(format!("unclosed quote in data operand {}", text))
            })?;
            if ty.takes_expr_list() {
                return Err(StmtError::directive(format!(
                    "type {} takes a parenthesized value list",
                    ty.letter()
                )));
            }
            DataValue::Quoted(body)
        }
        Some(b'(') => {
            if !ty.takes_expr_list() {
                return Err(StmtError::directive(format!(
                    "type {} takes a quoted value",
                    ty.letter()
                )));
            }
            let (inner, end) = balanced_group(text, at).ok_or_else(|| {
                StmtError::directive(format!("unbalanced value list in {}", text))
            })?;
            if end != text.len() {
                return Err(StmtError::directive(format!(
                    "trailing characters after value list in {}",
                    text
                )));
            }
            let inner_col = col + at + 1;
            let mut exprs = Vec::new();
            for (piece, piece_col) in split_top_level(inner, inner_col) {
                exprs.push(
                    parse_expr(piece.trim(), piece_col)
                        .map_err(|e| StmtError::expression(e.message, e.pos))?,
                );
            }
            DataValue::Exprs(exprs)
        }
        Some(other) => {
            return Err(StmtError::directive(format!(
                "unexpected character '{}' in data operand {}",
                *other as char, text
            )))
        }
    };

    Ok(DataOperand {
        dup,
        ty,
        length,
        value,
        col,
    })
}

/// Slice out a balanced parenthesized group starting at `start` (which
/// must index a `(`). Returns the inner text and the index just past
/// the closing paren.
fn balanced_group(text: &str, start: usize) -> Option<(&str, usize)> {
    let bytes = text.as_bytes();
    let mut depth = 0u32;
    let mut in_quote = false;
    for i in start..bytes.len() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => {
                depth -= 1;
                if depth == 0 {
                    return Some((&text[start + 1..i], i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Body of a leading quoted string, with `''` folded to `'`.
fn quoted_body(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    debug_assert_eq!(bytes.first(), Some(&b'\''));
    let mut body = String::new();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' if bytes.get(i + 1) == Some(&b'\'') => {
                body.push('\'');
                i += 2;
            }
            b'\'' => {
                return if i + 1 == bytes.len() {
                    Some(body)
                } else {
                    None
                };
            }
            c => {
                body.push(c as char);
                i += 1;
            }
        }
    }
    None
}

/// Size one operand. Deferrals from dup/length expressions propagate;
/// the caller treats them as allocation failures.
pub fn size_operand(op: &DataOperand, ctx: &dyn EvalContext) -> Result<DataSizing, EvalError> {
    let dup = match &op.dup {
        Some(expr) => eval_count(expr, ctx, "duplication factor")?,
        None => 1,
    };
    let (unit, align) = match &op.length {
        Some(expr) => {
            let len = eval_count(expr, ctx, "length modifier")?;
            if len == 0 || len > max_length(op.ty) {
                return Err(EvalError::Fault {
                    message: format!(
                        "length {} is out of range for type {}",
                        len,
                        op.ty.letter()
                    ),
                    pos: expr.pos(),
                });
            }
            // An explicit length removes the implied alignment.
            (len, 1)
        }
        None => (implied_length(op), op.ty.alignment()),
    };
    Ok(DataSizing { dup, unit, align })
}

fn eval_count(expr: &Expr, ctx: &dyn EvalContext, what: &str) -> Result<u32, EvalError> {
    let v = eval_expr(expr, ctx)?;
    match v.as_int() {
        Some(n) if (0..=0x00FF_FFFF).contains(&n) => Ok(n as u32),
        Some(n) => Err(EvalError::Fault {
            message: format!("{} {} is out of range", what, n),
            pos: expr.pos(),
        }),
        None => Err(EvalError::Fault {
            message: format!("{} must be absolute", what),
            pos: expr.pos(),
        }),
    }
}

fn max_length(ty: DcType) -> u32 {
    match ty {
        DcType::A | DcType::F => 4,
        DcType::Y | DcType::S | DcType::H => 2,
        DcType::P | DcType::Z => 16,
        DcType::C | DcType::X | DcType::B => 256,
    }
}

/// Implied unit length when no length modifier is written.
fn implied_length(op: &DataOperand) -> u32 {
    match op.ty {
        DcType::A | DcType::F => 4,
        DcType::Y | DcType::S | DcType::H => 2,
        DcType::C => match &op.value {
            DataValue::Quoted(body) => body.len().max(1) as u32,
            _ => 1,
        },
        DcType::X => match &op.value {
            DataValue::Quoted(body) => (count_hex_digits(body).max(1)).div_ceil(2) as u32,
            _ => 1,
        },
        DcType::B => match &op.value {
            DataValue::Quoted(body) => (count_bit_digits(body).max(1)).div_ceil(8) as u32,
            _ => 1,
        },
        DcType::P => match &op.value {
            DataValue::Quoted(body) => {
                let digits = first_value(body).chars().filter(char::is_ascii_digit).count();
                ((digits.max(1) + 1).div_ceil(2)) as u32
            }
            _ => 1,
        },
        DcType::Z => match &op.value {
            DataValue::Quoted(body) => first_value(body)
                .chars()
                .filter(char::is_ascii_digit)
                .count()
                .max(1) as u32,
            _ => 1,
        },
    }
}

fn first_value(body: &str) -> &str {
    body.split(',').next().unwrap_or(body)
}

fn count_hex_digits(body: &str) -> usize {
    body.chars().filter(|c| c.is_ascii_hexdigit()).count()
}

fn count_bit_digits(body: &str) -> usize {
    body.chars().filter(|c| *c == '0' || *c == '1').count()
}

/// Number of nominal values one duplication copy encodes. Expression
/// lists and comma-separated numeric bodies each take `unit` bytes per
/// value; everything else is a single value.
pub fn value_count(op: &DataOperand) -> u32 {
    match (&op.value, op.ty) {
        (DataValue::Exprs(exprs), _) => exprs.len().max(1) as u32,
        (DataValue::Quoted(body), DcType::F | DcType::H | DcType::P | DcType::Z) => {
            body.split(',').count().max(1) as u32
        }
        _ => 1,
    }
}

/// Build the bytes for one DC operand. `unit` comes from sizing; the
/// result is `dup` concatenated copies. `bases` is consulted only for
/// S-type constants.
pub fn encode_operand(
    op: &DataOperand,
    sizing: DataSizing,
    ctx: &dyn EvalContext,
    bases: &BaseManager,
) -> Result<Vec<u8>, StmtError> {
    let one = encode_unit(op, sizing.unit, ctx, bases)?;
    let mut out = Vec::with_capacity(one.len() * sizing.dup as usize);
    for _ in 0..sizing.dup {
        out.extend_from_slice(&one);
    }
    Ok(out)
}

fn encode_unit(
    op: &DataOperand,
    unit: u32,
    ctx: &dyn EvalContext,
    bases: &BaseManager,
) -> Result<Vec<u8>, StmtError> {
    let unit = unit as usize;
    match (&op.value, op.ty) {
        (DataValue::None, _) => Ok(vec![0; unit]),

        (DataValue::Exprs(exprs), DcType::A | DcType::Y) => {
            let mut out = Vec::with_capacity(unit * exprs.len());
            for expr in exprs {
                let v = eval_to_u64(expr, ctx)?;
                out.extend_from_slice(&fit_unsigned(v, unit, expr.pos())?);
            }
            Ok(out)
        }

        (DataValue::Exprs(exprs), DcType::S) => {
            let mut out = Vec::with_capacity(2 * exprs.len());
            for expr in exprs {
                let target = match eval_expr(expr, ctx).map_err(eval_to_stmt_error)? {
                    Value::Addr(a) => a,
                    Value::Int(n) => Address::absolute(n as u64),
                };
                let (base, disp) = bases
                    .resolve(target, 12)
                    .map_err(|e| StmtError::new(AsmErrorKind::Base, e.to_string(), Some(expr.pos())))?;
                let half = ((base as u16) << 12) | disp as u16;
                out.extend_from_slice(&half.to_be_bytes());
            }
            Ok(out)
        }

        (DataValue::Quoted(body), DcType::F | DcType::H) => {
            let mut out = Vec::new();
            for piece in body.split(',') {
                let n = parse_signed(piece).ok_or_else(|| {
                    StmtError::directive(format!("invalid numeric value '{}'", piece))
                })?;
                out.extend_from_slice(&fit_signed(n, unit, op.col)?);
            }
            Ok(out)
        }

        (DataValue::Quoted(body), DcType::C) => {
            let mut out = ebcdic::encode(body);
            // Pad right with EBCDIC blanks, truncate right.
            out.resize(unit, 0x40);
            Ok(out)
        }

        (DataValue::Quoted(body), DcType::X) => {
            let digits: String = body.chars().filter(|c| !c.is_whitespace()).collect();
            if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(StmtError::directive(format!(
                    "invalid hexadecimal value '{}'",
                    body
                )));
            }
            Ok(right_justify_nibbles(&digits, unit, 16))
        }

        (DataValue::Quoted(body), DcType::B) => {
            let digits: String = body.chars().filter(|c| !c.is_whitespace()).collect();
            if !digits.chars().all(|c| c == '0' || c == '1') {
                return Err(StmtError::directive(format!("invalid bit value '{}'", body)));
            }
            let mut value = vec![0u8; unit];
            for (i, c) in digits.chars().rev().enumerate() {
                if c == '1' {
                    let byte = unit.checked_sub(1 + i / 8);
                    if let Some(b) = byte {
                        value[b] |= 1 << (i % 8);
                    }
                }
            }
            Ok(value)
        }

        (DataValue::Quoted(body), DcType::P) => {
            let mut out = Vec::new();
            for piece in body.split(',') {
                out.extend_from_slice(&pack_decimal(piece, unit)?);
            }
            Ok(out)
        }

        (DataValue::Quoted(body), DcType::Z) => {
            let mut out = Vec::new();
            for piece in body.split(',') {
                out.extend_from_slice(&zone_decimal(piece, unit)?);
            }
            Ok(out)
        }

        (DataValue::Quoted(_), DcType::A | DcType::Y | DcType::S)
        | (DataValue::Exprs(_), _) => Err(StmtError::directive(format!(
            "type {} has the wrong value form",
            op.ty.letter()
        ))),
    }
}

fn eval_to_u64(expr: &Expr, ctx: &dyn EvalContext) -> Result<u64, StmtError> {
    let v = eval_expr(expr, ctx).map_err(eval_to_stmt_error)?;
    match v {
        Value::Int(n) => Ok(n as u64),
        Value::Addr(a) => a.value().ok_or_else(|| {
            StmtError::new(
                AsmErrorKind::Expression,
                "address is not absolute",
                Some(expr.pos()),
            )
        }),
    }
}

pub(crate) fn eval_to_stmt_error(e: EvalError) -> StmtError {
    let pos = e.pos();
    match e {
        EvalError::Deferred { symbol, .. } => StmtError::new(
            AsmErrorKind::Symbol,
            format!("undefined symbol {}", symbol),
            Some(pos),
        ),
        EvalError::Fault { message, .. } => {
            StmtError::new(AsmErrorKind::Expression, message, Some(pos))
        }
    }
}

fn parse_signed(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    text.parse::<i64>().ok()
}

fn fit_signed(n: i64, unit: usize, col: usize) -> Result<Vec<u8>, StmtError> {
    let bits = unit as u32 * 8;
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    if n < min || n > max {
        return Err(StmtError::new(
            AsmErrorKind::Directive,
            format!("value {} does not fit in {} bytes", n, unit),
            Some(col),
        ));
    }
    Ok((n as u64).to_be_bytes()[8 - unit..].to_vec())
}

fn fit_unsigned(v: u64, unit: usize, col: usize) -> Result<Vec<u8>, StmtError> {
    if unit < 8 && v >= 1u64 << (unit as u32 * 8) {
        return Err(StmtError::new(
            AsmErrorKind::Directive,
            format!("value {:#X} does not fit in {} bytes", v, unit),
            Some(col),
        ));
    }
    Ok(v.to_be_bytes()[8 - unit..].to_vec())
}

/// Right-justify a digit string (`radix` 16 for hex) into `unit` bytes.
fn right_justify_nibbles(digits: &str, unit: usize, radix: u32) -> Vec<u8> {
    let mut out = vec![0u8; unit];
    let mut nibble = 0;
    for c in digits.chars().rev() {
        let v = c.to_digit(radix).unwrap_or(0) as u8;
        let byte = unit.checked_sub(1 + nibble / 2);
        if let Some(b) = byte {
            if nibble % 2 == 0 {
                out[b] |= v;
            } else {
                out[b] |= v << 4;
            }
        }
        nibble += 1;
    }
    out
}

fn split_sign(text: &str) -> Result<(bool, &str), StmtError> {
    let text = text.trim();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(StmtError::directive(format!(
            "invalid decimal value '{}'",
            text
        )));
    }
    Ok((negative, digits))
}

fn pack_decimal(text: &str, unit: usize) -> Result<Vec<u8>, StmtError> {
    let (negative, digits) = split_sign(text)?;
    let sign: u8 = if negative { 0xD } else { 0xC };
    let mut nibbles: Vec<u8> = digits
        .bytes()
        .map(|b| b - b'0')
        .collect();
    nibbles.push(sign);
    // Left-pad to fill whole bytes, truncate high digits to length.
    if nibbles.len() % 2 != 0 {
        nibbles.insert(0, 0);
    }
    let want = unit * 2;
    while nibbles.len() < want {
        nibbles.insert(0, 0);
    }
    if nibbles.len() > want {
        nibbles.drain(..nibbles.len() - want);
    }
    Ok(nibbles
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect())
}

fn zone_decimal(text: &str, unit: usize) -> Result<Vec<u8>, StmtError> {
    let (negative, digits) = split_sign(text)?;
    let mut out: Vec<u8> = digits.bytes().map(|b| 0xF0 | (b - b'0')).collect();
    // Pad with zoned zeros on the left, truncate high digits.
    while out.len() < unit {
        out.insert(0, 0xF0);
    }
    if out.len() > unit {
        out.drain(..out.len() - unit);
    }
    let zone: u8 = if negative { 0xD0 } else { 0xC0 };
    if let Some(last) = out.last_mut() {
        *last = zone | (*last & 0x0F);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::addr::Address;
    use std::collections::HashMap;

    struct Ctx {
        symbols: HashMap<String, Value>,
    }

    impl Ctx {
        fn new() -> Self {
            Self {
                symbols: HashMap::new(),
            }
        }

        fn with(mut self, name: &str, v: Value) -> Self {
            self.symbols.insert(name.to_string(), v);
            self
        }
    }

    impl EvalContext for Ctx {
        fn lookup(&self, name: &str) -> Option<Value> {
            self.symbols.get(name).copied()
        }

        fn location(&self) -> Option<Address> {
            None
        }

        fn length_of(&self, _name: &str) -> Option<u32> {
            None
        }
    }

    fn one(text: &str) -> DataOperand {
        let ops = parse_data_operands(text, 1).unwrap();
        assert_eq!(ops.len(), 1);
        ops.into_iter().next().unwrap()
    }

    fn size(text: &str) -> DataSizing {
        size_operand(&one(text), &Ctx::new()).unwrap()
    }

    fn bytes(text: &str) -> Vec<u8> {
        let op = one(text);
        let sizing = size_operand(&op, &Ctx::new()).unwrap();
        encode_operand(&op, sizing, &Ctx::new(), &BaseManager::standard()).unwrap()
    }

    #[test]
    fn implied_lengths_and_alignment() {
        assert_eq!(size("F'1'"), DataSizing { dup: 1, unit: 4, align: 4 });
        assert_eq!(size("H'1'"), DataSizing { dup: 1, unit: 2, align: 2 });
        assert_eq!(size("C'HELLO'"), DataSizing { dup: 1, unit: 5, align: 1 });
        assert_eq!(size("X'FFF'"), DataSizing { dup: 1, unit: 2, align: 1 });
        assert_eq!(size("B'10110'"), DataSizing { dup: 1, unit: 1, align: 1 });
        assert_eq!(size("P'123'"), DataSizing { dup: 1, unit: 2, align: 1 });
        assert_eq!(size("Z'123'"), DataSizing { dup: 1, unit: 3, align: 1 });
        assert_eq!(size("A(0)"), DataSizing { dup: 1, unit: 4, align: 4 });
        assert_eq!(size("Y(0)"), DataSizing { dup: 1, unit: 2, align: 2 });
    }

    #[test]
    fn explicit_length_kills_alignment() {
        assert_eq!(size("FL2'1'"), DataSizing { dup: 1, unit: 2, align: 1 });
        assert_eq!(size("XL8'FF'"), DataSizing { dup: 1, unit: 8, align: 1 });
        assert_eq!(size("AL1(0)"), DataSizing { dup: 1, unit: 1, align: 1 });
    }

    #[test]
    fn dup_factor_multiplies() {
        assert_eq!(size("10F'0'").total(), Some(40));
        assert_eq!(size("3CL8' '").total(), Some(24));
        let op = one("(N)F'0'");
        let ctx = Ctx::new().with("N", Value::Int(5));
        assert_eq!(size_operand(&op, &ctx).unwrap().total(), Some(20));
    }

    #[test]
    fn dup_deferral_propagates() {
        let op = one("(N)F'0'");
        let err = size_operand(&op, &Ctx::new()).unwrap_err();
        assert!(err.is_deferred());
    }

    #[test]
    fn fullword_and_halfword_values() {
        assert_eq!(bytes("F'1'"), vec![0, 0, 0, 1]);
        assert_eq!(bytes("F'-1'"), vec![0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(bytes("H'258'"), vec![1, 2]);
        assert_eq!(bytes("F'1,2'"), vec![0, 0, 0, 1, 0, 0, 0, 2]);
        let op = one("H'70000'");
        let sizing = size_operand(&op, &Ctx::new()).unwrap();
        assert!(encode_operand(&op, sizing, &Ctx::new(), &BaseManager::standard()).is_err());
    }

    #[test]
    fn character_constants_pad_and_truncate() {
        assert_eq!(bytes("C'A'"), vec![0xC1]);
        assert_eq!(bytes("CL3'A'"), vec![0xC1, 0x40, 0x40]);
        assert_eq!(bytes("CL2'ABCD'"), vec![0xC1, 0xC2]);
        assert_eq!(bytes("C'0'"), vec![0xF0]);
    }

    #[test]
    fn hex_and_bit_right_justify() {
        assert_eq!(bytes("X'F'"), vec![0x0F]);
        assert_eq!(bytes("XL2'ABC'"), vec![0x0A, 0xBC]);
        assert_eq!(bytes("B'101'"), vec![0x05]);
        assert_eq!(bytes("BL2'100000001'"), vec![0x01, 0x01]);
    }

    #[test]
    fn packed_and_zoned_decimals() {
        assert_eq!(bytes("P'123'"), vec![0x12, 0x3C]);
        assert_eq!(bytes("P'-4'"), vec![0x4D]);
        assert_eq!(bytes("PL3'12'"), vec![0x00, 0x01, 0x2C]);
        assert_eq!(bytes("Z'123'"), vec![0xF1, 0xF2, 0xC3]);
        assert_eq!(bytes("Z'-1'"), vec![0xD1]);
        assert_eq!(bytes("ZL3'5'"), vec![0xF0, 0xF0, 0xC5]);
    }

    #[test]
    fn address_constants_use_expressions() {
        let ctx = Ctx::new().with("HERE", Value::Addr(Address::absolute(0x1234)));
        let op = one("A(HERE,HERE+4)");
        let sizing = size_operand(&op, &ctx).unwrap();
        let out = encode_operand(&op, sizing, &ctx, &BaseManager::standard()).unwrap();
        assert_eq!(out, vec![0, 0, 0x12, 0x34, 0, 0, 0x12, 0x38]);
        let op = one("AL1(255)");
        let sizing = size_operand(&op, &ctx).unwrap();
        let out = encode_operand(&op, sizing, &ctx, &BaseManager::standard()).unwrap();
        assert_eq!(out, vec![0xFF]);
    }

    #[test]
    fn s_constant_resolves_base_displacement() {
        let mut bases = BaseManager::with_direct(&[]);
        bases.assign(12, Address::absolute(0x1000));
        let ctx = Ctx::new().with("BUF", Value::Addr(Address::absolute(0x1008)));
        let op = one("S(BUF)");
        let sizing = size_operand(&op, &ctx).unwrap();
        let out = encode_operand(&op, sizing, &ctx, &bases).unwrap();
        assert_eq!(out, vec![0xC0, 0x08]);
    }

    #[test]
    fn ds_without_value_reserves_zeroes() {
        assert_eq!(size("CL80").total(), Some(80));
        assert_eq!(size("18F").total(), Some(72));
        assert_eq!(bytes("XL4"), vec![0, 0, 0, 0]);
    }

    #[test]
    fn malformed_operands_are_rejected() {
        assert!(parse_data_operands("Q'1'", 1).is_err());
        assert!(parse_data_operands("F'1", 1).is_err());
        assert!(parse_data_operands("A'1'", 1).is_err());
        assert!(parse_data_operands("C(1)", 1).is_err());
        assert!(parse_data_operands("FL'1'", 1).is_err());
        assert!(parse_data_operands("", 1).is_err());
    }

    #[test]
    fn length_ranges_enforced() {
        let err = size_operand(&one("FL9'1'"), &Ctx::new()).unwrap_err();
        assert!(!err.is_deferred());
        assert!(size_operand(&one("XL256'00'"), &Ctx::new()).is_ok());
    }
}
