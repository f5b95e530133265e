// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Machine-instruction operand parsing and encoding.
//!
//! Storage operands come in two spellings: an expression the base
//! manager resolves (`LABEL+2`), or the explicit form with a
//! parenthesized group (`D(X,B)`, `D(B)`, `D(L,B)`). Which group slot
//! means what depends on the format.

use crate::core::addr::Address;
use crate::core::assembler::error::AsmErrorKind;
use crate::core::base::BaseManager;
use crate::core::expr::{eval_expr, parse_expr, EvalContext, Expr, Value};
use crate::core::insn::{InsnDef, InsnFormat};

use super::directives::eval_to_stmt_error;
use super::statement::StmtError;

/// One written machine operand.
#[derive(Debug, Clone)]
pub struct MachineOperand {
    pub expr: Expr,
    /// Explicit `(a,b)` group after the displacement, slots optional
    /// (`D(,B)` leaves the first empty).
    pub group: Option<(Option<Expr>, Option<Expr>)>,
    pub col: usize,
}

/// Parse the operand field of a machine instruction.
pub fn parse_machine_operands(
    def: &InsnDef,
    field: &str,
    col: usize,
) -> Result<Vec<MachineOperand>, StmtError> {
    let pieces = super::statement::split_operands(field, col);
    if pieces.len() != def.operands as usize {
        return Err(StmtError::new(
            AsmErrorKind::Instruction,
            format!(
                "{} takes {} operand(s), found {}",
                def.mnemonic,
                def.operands,
                pieces.len()
            ),
            None,
        ));
    }
    pieces.iter().map(|p| parse_one(&p.0, p.1)).collect()
}

fn parse_one(text: &str, col: usize) -> Result<MachineOperand, StmtError> {
    let text = text.trim_end();
    // An explicit group is a trailing top-level parenthesized pair; a
    // leading paren belongs to the expression itself.
    if let Some(open) = find_group_open(text) {
        let disp = parse_expr(&text[..open], col)
            .map_err(|e| StmtError::expression(e.message, e.pos))?;
        let inner = &text[open + 1..text.len() - 1];
        let inner_col = col + open + 1;
        let mut slots = split_group(inner, inner_col)?;
        if slots.len() > 2 {
            return Err(StmtError::new(
                AsmErrorKind::Instruction,
                format!("too many fields in operand group {}", text),
                Some(col),
            ));
        }
        let first = if slots.is_empty() { None } else { slots.remove(0) };
        let second = if slots.is_empty() { None } else { slots.remove(0) };
        return Ok(MachineOperand {
            expr: disp,
            group: Some((first, second)),
            col,
        });
    }
    let expr = parse_expr(text, col).map_err(|e| StmtError::expression(e.message, e.pos))?;
    Ok(MachineOperand {
        expr,
        group: None,
        col,
    })
}

/// Index of a `(` that starts a trailing explicit group, if any. A
/// leading `(` belongs to the expression itself.
fn find_group_open(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    if !text.ends_with(')') {
        return None;
    }
    let mut depth = 0u32;
    let mut in_quote = false;
    for i in (0..bytes.len()).rev() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b')' if !in_quote => depth += 1,
            b'(' if !in_quote => {
                depth -= 1;
                if depth == 0 {
                    return if i > 0 { Some(i) } else { None };
                }
            }
            _ => {}
        }
    }
    None
}

fn split_group(inner: &str, col: usize) -> Result<Vec<Option<Expr>>, StmtError> {
    super::statement::split_operands(inner, col)
        .into_iter()
        .map(|(piece, piece_col)| {
            let piece = piece.trim();
            if piece.is_empty() {
                Ok(None)
            } else {
                parse_expr(piece, piece_col)
                    .map(Some)
                    .map_err(|e| StmtError::expression(e.message, e.pos))
            }
        })
        .collect()
}

/// A resolved storage operand: base, 12-bit displacement, and whatever
/// the explicit group's first slot held (index or length).
struct StorageRef {
    base: u8,
    disp: u16,
    first: Option<i64>,
    /// Length attribute of the address, for implied SS lengths.
    length: u32,
}

/// Encode one instruction at address `at`.
pub fn encode_instruction(
    def: &InsnDef,
    operands: &[MachineOperand],
    ctx: &dyn EvalContext,
    bases: &BaseManager,
    at: Address,
) -> Result<Vec<u8>, StmtError> {
    let mut ops = operands.iter();
    // Extended mnemonics bake the first nibble in.
    let first_nibble = |ops: &mut std::slice::Iter<'_, MachineOperand>| -> Result<u8, StmtError> {
        match def.fixed {
            Some(n) => Ok(n),
            None => nibble(next(ops, def)?, ctx),
        }
    };

    let out = match def.format {
        InsnFormat::Rr => {
            let r1 = first_nibble(&mut ops)?;
            let r2 = nibble(next(&mut ops, def)?, ctx)?;
            vec![def.opcode as u8, (r1 << 4) | r2]
        }
        InsnFormat::I => {
            let i = int_range(next(&mut ops, def)?, ctx, 0, 255)?;
            vec![def.opcode as u8, i as u8]
        }
        InsnFormat::Rx => {
            let r1 = first_nibble(&mut ops)?;
            let s = storage(next(&mut ops, def)?, ctx, bases, true)?;
            let x2 = s.first.unwrap_or(0);
            check_nibble(x2, "index register")?;
            vec![
                def.opcode as u8,
                (r1 << 4) | x2 as u8,
                (s.base << 4) | (s.disp >> 8) as u8,
                s.disp as u8,
            ]
        }
        InsnFormat::Rs => {
            let r1 = nibble(next(&mut ops, def)?, ctx)?;
            // Shift forms drop the third-register operand.
            let r3 = if def.operands == 3 {
                nibble(next(&mut ops, def)?, ctx)?
            } else {
                0
            };
            let s = storage(next(&mut ops, def)?, ctx, bases, false)?;
            vec![
                def.opcode as u8,
                (r1 << 4) | r3,
                (s.base << 4) | (s.disp >> 8) as u8,
                s.disp as u8,
            ]
        }
        InsnFormat::Si => {
            let s = storage(next(&mut ops, def)?, ctx, bases, false)?;
            let i2 = int_range(next(&mut ops, def)?, ctx, 0, 255)?;
            vec![
                def.opcode as u8,
                i2 as u8,
                (s.base << 4) | (s.disp >> 8) as u8,
                s.disp as u8,
            ]
        }
        InsnFormat::S => {
            let s = storage(next(&mut ops, def)?, ctx, bases, false)?;
            vec![
                (def.opcode >> 8) as u8,
                def.opcode as u8,
                (s.base << 4) | (s.disp >> 8) as u8,
                s.disp as u8,
            ]
        }
        InsnFormat::Ss1 => {
            let d1 = storage(next(&mut ops, def)?, ctx, bases, false)?;
            let d2 = storage(next(&mut ops, def)?, ctx, bases, false)?;
            let len = match d1.first {
                Some(l) => l,
                None => d1.length as i64,
            };
            if !(1..=256).contains(&len) {
                return Err(StmtError::new(
                    AsmErrorKind::Instruction,
                    format!("operand length {} is out of range 1-256", len),
                    None,
                ));
            }
            vec![
                def.opcode as u8,
                (len - 1) as u8,
                (d1.base << 4) | (d1.disp >> 8) as u8,
                d1.disp as u8,
                (d2.base << 4) | (d2.disp >> 8) as u8,
                d2.disp as u8,
            ]
        }
        InsnFormat::Ss2 => {
            let d1 = storage(next(&mut ops, def)?, ctx, bases, false)?;
            let d2 = storage(next(&mut ops, def)?, ctx, bases, false)?;
            let l1 = d1.first.unwrap_or(d1.length as i64);
            let l2 = d2.first.unwrap_or(d2.length as i64);
            for l in [l1, l2] {
                if !(1..=16).contains(&l) {
                    return Err(StmtError::new(
                        AsmErrorKind::Instruction,
                        format!("operand length {} is out of range 1-16", l),
                        None,
                    ));
                }
            }
            vec![
                def.opcode as u8,
                (((l1 - 1) as u8) << 4) | (l2 - 1) as u8,
                (d1.base << 4) | (d1.disp >> 8) as u8,
                d1.disp as u8,
                (d2.base << 4) | (d2.disp >> 8) as u8,
                d2.disp as u8,
            ]
        }
        InsnFormat::Ri => {
            let r1 = first_nibble(&mut ops)?;
            let imm = if def.rel {
                relative_halfwords(next(&mut ops, def)?, ctx, at, i16::MIN as i64, i16::MAX as i64)?
            } else {
                int_range(next(&mut ops, def)?, ctx, i16::MIN as i64, u16::MAX as i64)?
            };
            let half = imm as u16;
            vec![
                (def.opcode >> 4) as u8,
                (r1 << 4) | (def.opcode & 0xF) as u8,
                (half >> 8) as u8,
                half as u8,
            ]
        }
        InsnFormat::Rre => {
            let r1 = nibble(next(&mut ops, def)?, ctx)?;
            let r2 = nibble(next(&mut ops, def)?, ctx)?;
            vec![
                (def.opcode >> 8) as u8,
                def.opcode as u8,
                0x00,
                (r1 << 4) | r2,
            ]
        }
        InsnFormat::Ril => {
            let r1 = first_nibble(&mut ops)?;
            let imm = if def.rel {
                relative_halfwords(next(&mut ops, def)?, ctx, at, i32::MIN as i64, i32::MAX as i64)?
            } else {
                int_range(next(&mut ops, def)?, ctx, i32::MIN as i64, u32::MAX as i64)?
            };
            let word = imm as u32;
            let mut out = vec![(def.opcode >> 4) as u8, (r1 << 4) | (def.opcode & 0xF) as u8];
            out.extend_from_slice(&word.to_be_bytes());
            out
        }
    };
    debug_assert_eq!(out.len() as u32, def.length());
    Ok(out)
}

fn next<'a>(
    ops: &mut std::slice::Iter<'a, MachineOperand>,
    def: &InsnDef,
) -> Result<&'a MachineOperand, StmtError> {
    ops.next().ok_or_else(|| {
        StmtError::new(
            AsmErrorKind::Instruction,
            format!("missing operand for {}", def.mnemonic),
            None,
        )
    })
}

fn eval_int(op: &MachineOperand, ctx: &dyn EvalContext) -> Result<i64, StmtError> {
    if op.group.is_some() {
        return Err(StmtError::new(
            AsmErrorKind::Instruction,
            "unexpected explicit storage form",
            Some(op.col),
        ));
    }
    let v = eval_expr(&op.expr, ctx).map_err(eval_to_stmt_error)?;
    v.as_int().ok_or_else(|| {
        StmtError::new(
            AsmErrorKind::Instruction,
            "operand must be absolute",
            Some(op.col),
        )
    })
}

fn int_range(
    op: &MachineOperand,
    ctx: &dyn EvalContext,
    lo: i64,
    hi: i64,
) -> Result<i64, StmtError> {
    let n = eval_int(op, ctx)?;
    if !(lo..=hi).contains(&n) {
        return Err(StmtError::new(
            AsmErrorKind::Instruction,
            format!("operand {} is out of range {}..{}", n, lo, hi),
            Some(op.col),
        ));
    }
    Ok(n)
}

fn nibble(op: &MachineOperand, ctx: &dyn EvalContext) -> Result<u8, StmtError> {
    Ok(int_range(op, ctx, 0, 15)? as u8)
}

fn check_nibble(n: i64, what: &str) -> Result<(), StmtError> {
    if !(0..=15).contains(&n) {
        return Err(StmtError::new(
            AsmErrorKind::Instruction,
            format!("{} {} is out of range 0-15", what, n),
            None,
        ));
    }
    Ok(())
}

/// Resolve a storage operand to base and displacement. With an explicit
/// group the displacement is taken as written; otherwise the address is
/// handed to the base manager. `indexed` lets the group's second slot
/// default into the first (`D(B)` vs `D(X,B)`).
fn storage(
    op: &MachineOperand,
    ctx: &dyn EvalContext,
    bases: &BaseManager,
    indexed: bool,
) -> Result<StorageRef, StmtError> {
    match &op.group {
        Some((first, second)) => {
            let disp = eval_plain_int(&op.expr, ctx)?;
            if !(0..=0xFFF).contains(&disp) {
                return Err(StmtError::new(
                    AsmErrorKind::Instruction,
                    format!("displacement {} exceeds 12 bits", disp),
                    Some(op.col),
                ));
            }
            let first_val = first
                .as_ref()
                .map(|e| eval_plain_int(e, ctx))
                .transpose()?;
            let (first_slot, base) = match second {
                Some(e) => (first_val, eval_plain_int(e, ctx)?),
                None if indexed => (first_val, 0),
                // `D(B)` on an un-indexed format: the single slot is
                // the base register.
                None => (None, first_val.unwrap_or(0)),
            };
            check_nibble(base, "base register")?;
            Ok(StorageRef {
                base: base as u8,
                disp: disp as u16,
                first: first_slot,
                length: 1,
            })
        }
        None => {
            let target = match eval_expr(&op.expr, ctx).map_err(eval_to_stmt_error)? {
                Value::Addr(a) => a,
                Value::Int(n) if n >= 0 => Address::absolute(n as u64),
                Value::Int(n) => {
                    return Err(StmtError::new(
                        AsmErrorKind::Instruction,
                        format!("negative address {}", n),
                        Some(op.col),
                    ))
                }
            };
            let (base, disp) = bases.resolve(target, 12).map_err(|e| {
                StmtError::new(AsmErrorKind::Base, e.to_string(), Some(op.col))
            })?;
            Ok(StorageRef {
                base,
                disp: disp as u16,
                first: None,
                length: target.length(),
            })
        }
    }
}

fn eval_plain_int(expr: &Expr, ctx: &dyn EvalContext) -> Result<i64, StmtError> {
    let v = eval_expr(expr, ctx).map_err(eval_to_stmt_error)?;
    v.as_int().ok_or_else(|| {
        StmtError::new(
            AsmErrorKind::Instruction,
            "field must be absolute",
            Some(expr.pos()),
        )
    })
}

/// Signed halfword count from the instruction to the target.
fn relative_halfwords(
    op: &MachineOperand,
    ctx: &dyn EvalContext,
    at: Address,
    lo: i64,
    hi: i64,
) -> Result<i64, StmtError> {
    if op.group.is_some() {
        return Err(StmtError::new(
            AsmErrorKind::Instruction,
            "relative operand cannot use the explicit storage form",
            Some(op.col),
        ));
    }
    let target = match eval_expr(&op.expr, ctx).map_err(eval_to_stmt_error)? {
        Value::Addr(a) => a,
        Value::Int(n) if n >= 0 => Address::absolute(n as u64),
        Value::Int(n) => {
            return Err(StmtError::new(
                AsmErrorKind::Instruction,
                format!("negative branch target {}", n),
                Some(op.col),
            ))
        }
    };
    let diff = target.diff(&at).map_err(|e| {
        StmtError::new(AsmErrorKind::Instruction, e.to_string(), Some(op.col))
    })?;
    if diff % 2 != 0 {
        return Err(StmtError::new(
            AsmErrorKind::Instruction,
            "relative branch target is not halfword aligned",
            Some(op.col),
        ));
    }
    let halfwords = diff / 2;
    if !(lo..=hi).contains(&halfwords) {
        return Err(StmtError::new(
            AsmErrorKind::Instruction,
            format!("relative branch target is out of range ({} halfwords)", halfwords),
            Some(op.col),
        ));
    }
    Ok(halfwords)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::insn::{lookup, ArchLevel};
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

        fn length_of(&self, name: &str) -> Option<u32> {
            self.symbols
                .get(name)
                .and_then(|v| v.as_addr())
                .map(|a| a.length())
        }
    }

    fn encode(mnemonic: &str, field: &str, ctx: &Ctx, bases: &BaseManager, at: u64) -> Result<Vec<u8>, StmtError> {
        let def = lookup(mnemonic, ArchLevel::ZArch).expect("mnemonic");
        let ops = parse_machine_operands(def, field, 10)?;
        encode_instruction(def, &ops, ctx, bases, Address::absolute(at))
    }

    fn bases_at(reg: u8, anchor: u64) -> BaseManager {
        let mut b = BaseManager::with_direct(&[]);
        b.assign(reg, Address::absolute(anchor));
        b
    }

    #[test]
    fn rr_and_extended_rr() {
        let ctx = Ctx::new();
        let b = BaseManager::standard();
        assert_eq!(encode("LR", "1,2", &ctx, &b, 0).unwrap(), vec![0x18, 0x12]);
        assert_eq!(encode("BALR", "12,0", &ctx, &b, 0).unwrap(), vec![0x05, 0xC0]);
        assert_eq!(encode("BR", "14", &ctx, &b, 0).unwrap(), vec![0x07, 0xFE]);
        assert_eq!(encode("NOPR", "0", &ctx, &b, 0).unwrap(), vec![0x07, 0x00]);
    }

    #[test]
    fn svc_immediate() {
        let ctx = Ctx::new();
        let b = BaseManager::standard();
        assert_eq!(encode("SVC", "202", &ctx, &b, 0).unwrap(), vec![0x0A, 0xCA]);
        assert!(encode("SVC", "256", &ctx, &b, 0).is_err());
    }

    #[test]
    fn rx_with_implicit_base() {
        let ctx = Ctx::new().with("DATA", Value::Addr(Address::absolute(0x1008)));
        let b = bases_at(12, 0x1000);
        assert_eq!(
            encode("L", "3,DATA", &ctx, &b, 0).unwrap(),
            vec![0x58, 0x30, 0xC0, 0x08]
        );
    }

    #[test]
    fn rx_with_explicit_index_and_base() {
        let ctx = Ctx::new();
        let b = BaseManager::with_direct(&[]);
        assert_eq!(
            encode("L", "3,8(4,12)", &ctx, &b, 0).unwrap(),
            vec![0x58, 0x34, 0xC0, 0x08]
        );
        assert_eq!(
            encode("L", "3,8(,12)", &ctx, &b, 0).unwrap(),
            vec![0x58, 0x30, 0xC0, 0x08]
        );
    }

    #[test]
    fn extended_branch_bakes_mask() {
        let ctx = Ctx::new().with("THERE", Value::Addr(Address::absolute(0x1010)));
        let b = bases_at(12, 0x1000);
        assert_eq!(
            encode("B", "THERE", &ctx, &b, 0x1000).unwrap(),
            vec![0x47, 0xF0, 0xC0, 0x10]
        );
        assert_eq!(
            encode("BNE", "THERE", &ctx, &b, 0x1000).unwrap(),
            vec![0x47, 0x70, 0xC0, 0x10]
        );
    }

    #[test]
    fn rs_forms() {
        let ctx = Ctx::new().with("SAVE", Value::Addr(Address::absolute(0x1020)));
        let b = bases_at(13, 0x1000);
        assert_eq!(
            encode("STM", "14,12,SAVE", &ctx, &b, 0).unwrap(),
            vec![0x90, 0xEC, 0xD0, 0x20]
        );
        // Shifts have no third register.
        assert_eq!(
            encode("SLL", "2,4(0)", &ctx, &BaseManager::with_direct(&[]), 0).unwrap(),
            vec![0x89, 0x20, 0x00, 0x04]
        );
        assert_eq!(
            encode("SLL", "2,4", &ctx, &BaseManager::standard(), 0).unwrap(),
            vec![0x89, 0x20, 0x00, 0x04]
        );
    }

    #[test]
    fn si_immediate_to_storage() {
        let ctx = Ctx::new().with("FLAG", Value::Addr(Address::absolute(0x1002)));
        let b = bases_at(12, 0x1000);
        assert_eq!(
            encode("MVI", "FLAG,X'FF'", &ctx, &b, 0).unwrap(),
            vec![0x92, 0xFF, 0xC0, 0x02]
        );
        assert_eq!(
            encode("CLI", "0(3),C'A'", &ctx, &BaseManager::with_direct(&[]), 0).unwrap(),
            vec![0x95, 0xC1, 0x30, 0x00]
        );
    }

    #[test]
    fn s_format_wide_opcode() {
        let ctx = Ctx::new().with("NEWPSW", Value::Addr(Address::absolute(0x0058)));
        let b = BaseManager::standard();
        assert_eq!(
            encode("LPSW", "NEWPSW", &ctx, &b, 0).unwrap(),
            vec![0x82, 0x00, 0x00, 0x58]
        );
    }

    #[test]
    fn ss_one_length_implied_and_explicit() {
        let ctx = Ctx::new()
            .with(
                "DST",
                Value::Addr(Address::absolute(0x1010).with_length(8)),
            )
            .with("SRC", Value::Addr(Address::absolute(0x1020)));
        let b = bases_at(12, 0x1000);
        // Implied length comes from the first operand's length attribute.
        assert_eq!(
            encode("MVC", "DST,SRC", &ctx, &b, 0).unwrap(),
            vec![0xD2, 0x07, 0xC0, 0x10, 0xC0, 0x20]
        );
        assert_eq!(
            encode("MVC", "0(8,3),SRC", &ctx, &b, 0).unwrap(),
            vec![0xD2, 0x07, 0x30, 0x00, 0xC0, 0x20]
        );
        assert!(encode("MVC", "0(300,3),SRC", &ctx, &b, 0).is_err());
    }

    #[test]
    fn ss_two_lengths() {
        let ctx = Ctx::new();
        let b = BaseManager::with_direct(&[]);
        assert_eq!(
            encode("PACK", "8(8,13),0(4,13)", &ctx, &b, 0).unwrap(),
            vec![0xF2, 0x73, 0xD0, 0x08, 0xD0, 0x00]
        );
        assert!(encode("PACK", "8(17,13),0(4,13)", &ctx, &b, 0).is_err());
    }

    #[test]
    fn ri_immediates_and_relative_jumps() {
        let ctx = Ctx::new().with("LOOP", Value::Addr(Address::absolute(0x1000)));
        let b = BaseManager::standard();
        assert_eq!(
            encode("LHI", "3,-1", &ctx, &b, 0).unwrap(),
            vec![0xA7, 0x38, 0xFF, 0xFF]
        );
        assert_eq!(
            encode("AHI", "3,100", &ctx, &b, 0).unwrap(),
            vec![0xA7, 0x3A, 0x00, 0x64]
        );
        // J LOOP from 0x1008: -4 halfwords.
        assert_eq!(
            encode("J", "LOOP", &ctx, &b, 0x1008).unwrap(),
            vec![0xA7, 0xF4, 0xFF, 0xFC]
        );
        assert_eq!(
            encode("BRAS", "14,LOOP", &ctx, &b, 0x1008).unwrap(),
            vec![0xA7, 0xE5, 0xFF, 0xFC]
        );
        let err = encode("J", "LOOP+1", &ctx, &b, 0x1000).unwrap_err();
        assert!(err.message.contains("halfword"));
    }

    #[test]
    fn rre_and_ril() {
        let ctx = Ctx::new().with("FAR", Value::Addr(Address::absolute(0x2_0000)));
        let b = BaseManager::standard();
        assert_eq!(
            encode("LGR", "1,2", &ctx, &b, 0).unwrap(),
            vec![0xB9, 0x04, 0x00, 0x12]
        );
        // LARL 1,FAR from 0: 0x10000 halfwords.
        assert_eq!(
            encode("LARL", "1,FAR", &ctx, &b, 0).unwrap(),
            vec![0xC0, 0x10, 0x00, 0x01, 0x00, 0x00]
        );
        assert_eq!(
            encode("JG", "FAR", &ctx, &b, 0).unwrap(),
            vec![0xC0, 0xF4, 0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn no_base_available_is_reported() {
        let ctx = Ctx::new().with("DATA", Value::Addr(Address::absolute(0x9000)));
        let b = bases_at(12, 0x1000);
        let err = encode("L", "3,DATA", &ctx, &b, 0).unwrap_err();
        assert_eq!(err.kind, AsmErrorKind::Base);
    }

    #[test]
    fn operand_count_is_checked() {
        let def = lookup("LR", ArchLevel::S370).unwrap();
        assert!(parse_machine_operands(def, "1", 1).is_err());
        assert!(parse_machine_operands(def, "1,2,3", 1).is_err());
        let def = lookup("B", ArchLevel::S370).unwrap();
        assert!(parse_machine_operands(def, "THERE", 1).is_ok());
    }
}
