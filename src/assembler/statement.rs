// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Statement records: card gathering, field scanning, classification into
//! the closed [`StmtKind`] union, and the per-statement state machine.
//!
//! The engine consumes one [`Statement`] per logical source line; a macro
//! or include facility upstream would feed expanded lines into the same
//! path.

use crate::core::addr::Address;
use crate::core::assembler::error::AsmErrorKind;
use crate::core::expr::{parse_expr, Expr};
use crate::core::image::SectionId;
use crate::core::insn::{self, ArchLevel, InsnDef};

use super::directives::{parse_data_operands, DataOperand};
use super::instruction::{parse_machine_operands, MachineOperand};

/// A statement-level failure: message, error class, source column.
#[derive(Debug, Clone)]
pub struct StmtError {
    pub kind: AsmErrorKind,
    pub message: String,
    pub col: Option<usize>,
}

impl StmtError {
    pub fn new(kind: AsmErrorKind, message: impl Into<String>, col: Option<usize>) -> Self {
        Self {
            kind,
            message: message.into(),
            col,
        }
    }

    pub fn expression(message: impl Into<String>, col: usize) -> Self {
        Self::new(AsmErrorKind::Expression, message, Some(col))
    }

    pub fn directive(message: impl Into<String>) -> Self {
        Self::new(AsmErrorKind::Directive, message, None)
    }
}

/// The per-statement resolution ladder. `Errored` is terminal; an errored
/// statement is skipped by every later phase but keeps its allocated
/// space so addresses after it stay correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StmtState {
    Parsed,
    EarlyResolved,
    Allocated,
    Bound,
    ObjectGenerated,
    Consolidated,
    Errored,
}

/// Classified statement kinds. Every phase matches exhaustively on this,
/// so a new kind cannot be half-handled.
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// Comment or blank line; ignored by every resolution phase.
    Comment,
    Start { origin: Option<Expr> },
    Csect,
    Dsect,
    Region { origin: Option<Expr> },
    Org { target: Option<Expr> },
    Equ { expr: Expr },
    Using { anchor: Expr, regs: Vec<Expr> },
    Drop { regs: Vec<Expr> },
    /// DC (`reserve: false`) or DS (`reserve: true`).
    Data {
        operands: Vec<DataOperand>,
        reserve: bool,
    },
    Machine {
        def: &'static InsnDef,
        operands: Vec<MachineOperand>,
    },
    End { entry: Option<Expr> },
    Title,
    Space,
    Eject,
}

impl StmtKind {
    /// Listing-only statements take no part in resolution.
    pub fn is_ignored(&self) -> bool {
        matches!(
            self,
            StmtKind::Comment | StmtKind::Title | StmtKind::Space | StmtKind::Eject
        )
    }
}

/// One logical statement and its resolution record.
#[derive(Debug, Clone)]
pub struct Statement {
    /// Statement number, 1-based in statement order.
    pub number: u32,
    /// Source line of the first card.
    pub line: u32,
    /// First card's text, for the listing and diagnostics.
    pub source: String,
    pub label: Option<String>,
    pub kind: StmtKind,
    pub state: StmtState,
    /// Address established for this statement during allocation.
    pub loc: Option<Address>,
    /// Section active when the statement was allocated.
    pub section: Option<SectionId>,
    /// Index of the placed content leaf within its section.
    pub binary: Option<usize>,
}

impl Statement {
    pub fn is_errored(&self) -> bool {
        self.state == StmtState::Errored
    }

    /// Live for a phase: not errored and not a listing-only statement.
    pub fn is_live(&self) -> bool {
        !self.is_errored() && !self.kind.is_ignored()
    }
}

/// One logical line after continuation folding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStmt {
    /// Source line number of the first card, 1-based.
    pub line: u32,
    /// First card, as written (for the listing).
    pub card: String,
    /// Folded text fields are scanned from.
    pub text: String,
}

const CONTINUE_COL: usize = 72;
const CONTINUATION_START: usize = 16;

/// Fold continued cards into logical statements. A non-blank column 72
/// continues the statement on the next line, taken from column 16.
/// Blanks at the fold are kept verbatim while a quoted string is open.
pub fn gather(lines: &[String]) -> Vec<RawStmt> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let first = &lines[i];
        let line = (i + 1) as u32;
        let mut text = body_of(first).to_string();
        let mut continued = is_continued(first);
        trim_outside_quotes(&mut text);
        i += 1;
        while continued && i < lines.len() {
            let card = &lines[i];
            let tail = tail_of(card);
            if quote_open(&text) {
                text.push_str(tail);
            } else {
                text.push_str(tail.trim_start());
            }
            trim_outside_quotes(&mut text);
            continued = is_continued(card);
            i += 1;
        }
        out.push(RawStmt {
            line,
            card: first.clone(),
            text,
        });
    }
    out
}

/// Columns 1-71, indexed by character so a card is never split inside a
/// multi-byte character.
fn body_of(card: &str) -> &str {
    match card.char_indices().nth(CONTINUE_COL - 1) {
        Some((at, _)) => &card[..at],
        None => card,
    }
}

fn is_continued(card: &str) -> bool {
    matches!(card.chars().nth(CONTINUE_COL - 1), Some(c) if !c.is_whitespace())
}

/// Continuation text: columns 16-71 of the card.
fn tail_of(card: &str) -> &str {
    let body = body_of(card);
    match body.char_indices().nth(CONTINUATION_START - 1) {
        Some((at, _)) => &body[at..],
        None => "",
    }
}

fn quote_open(text: &str) -> bool {
    text.bytes().filter(|&b| b == b'\'').count() % 2 == 1
}

/// Trailing blanks are padding unless a quoted string is still open at
/// the card boundary.
fn trim_outside_quotes(text: &mut String) {
    if !quote_open(text) {
        text.truncate(text.trim_end().len());
    }
}

/// The three scanned statement fields plus the operand field's column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fields {
    pub label: Option<String>,
    pub mnemonic: String,
    pub operands: String,
    /// 1-based column of the operand field in the logical text.
    pub operand_col: usize,
}

/// Scan name, operation and operand fields. Blanks separate fields, but a
/// blank inside a quoted string or a parenthesized group does not end the
/// operand field. Returns `None` for comment and blank lines.
pub fn scan_fields(text: &str) -> Option<Fields> {
    if text.trim().is_empty() || text.starts_with('*') || text.starts_with(".*") {
        return None;
    }
    let bytes = text.as_bytes();
    let mut at = 0;

    let label = if !bytes[0].is_ascii_whitespace() {
        while at < bytes.len() && !bytes[at].is_ascii_whitespace() {
            at += 1;
        }
        Some(text[..at].to_string())
    } else {
        None
    };

    while at < bytes.len() && bytes[at].is_ascii_whitespace() {
        at += 1;
    }
    let op_start = at;
    while at < bytes.len() && !bytes[at].is_ascii_whitespace() {
        at += 1;
    }
    if op_start == at {
        return None;
    }
    let mnemonic = text[op_start..at].to_string();

    while at < bytes.len() && bytes[at].is_ascii_whitespace() {
        at += 1;
    }
    let operand_col = at + 1;
    let mut end = at;
    let mut depth = 0u32;
    let mut in_quote = false;
    while end < bytes.len() {
        let c = bytes[end];
        match c {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote && depth > 0 => depth -= 1,
            c if c.is_ascii_whitespace() && !in_quote && depth == 0 => break,
            _ => {}
        }
        end += 1;
    }
    let operands = text[at..end].to_string();

    Some(Fields {
        label,
        mnemonic,
        operands,
        operand_col,
    })
}

/// Split an operand field on top-level commas, honoring quotes and
/// parentheses. Yields each piece with its 1-based column.
pub fn split_operands(operands: &str, base_col: usize) -> Vec<(String, usize)> {
    let mut out = Vec::new();
    if operands.is_empty() {
        return out;
    }
    let bytes = operands.as_bytes();
    let mut start = 0;
    let mut depth = 0u32;
    let mut in_quote = false;
    for (i, &c) in bytes.iter().enumerate() {
        match c {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote && depth > 0 => depth -= 1,
            b',' if !in_quote && depth == 0 => {
                out.push((operands[start..i].to_string(), base_col + start));
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push((operands[start..].to_string(), base_col + start));
    out
}

/// Classify one raw statement. `number` is the statement number the
/// record will carry; expression parse failures surface as [`StmtError`].
pub fn classify(raw: &RawStmt, number: u32, level: ArchLevel) -> Result<Statement, StmtError> {
    let fields = match scan_fields(&raw.text) {
        Some(fields) => fields,
        None => {
            return Ok(Statement {
                number,
                line: raw.line,
                source: raw.card.clone(),
                label: None,
                kind: StmtKind::Comment,
                state: StmtState::Parsed,
                loc: None,
                section: None,
                binary: None,
            })
        }
    };

    let kind = classify_operation(&fields, level)?;
    Ok(Statement {
        number,
        line: raw.line,
        source: raw.card.clone(),
        label: fields.label,
        kind,
        state: StmtState::Parsed,
        loc: None,
        section: None,
        binary: None,
    })
}

fn classify_operation(fields: &Fields, level: ArchLevel) -> Result<StmtKind, StmtError> {
    let op = fields.mnemonic.to_ascii_uppercase();
    let operands = fields.operands.as_str();
    let col = fields.operand_col;

    let kind = match op.as_str() {
        "START" => StmtKind::Start {
            origin: optional_expr(operands, col)?,
        },
        "CSECT" => StmtKind::Csect,
        "DSECT" => StmtKind::Dsect,
        "REGION" => StmtKind::Region {
            origin: optional_expr(operands, col)?,
        },
        "ORG" => StmtKind::Org {
            target: optional_expr(operands, col)?,
        },
        "EQU" => StmtKind::Equ {
            expr: required_expr(operands, col, "EQU requires an operand")?,
        },
        "USING" => {
            let parts = split_operands(operands, col);
            if parts.len() < 2 {
                return Err(StmtError::directive(
                    "USING requires an anchor and at least one register",
                ));
            }
            let anchor = expr_at(&parts[0])?;
            let regs = parts[1..]
                .iter()
                .map(expr_at)
                .collect::<Result<Vec<_>, _>>()?;
            StmtKind::Using { anchor, regs }
        }
        "DROP" => {
            let regs = if operands.is_empty() {
                Vec::new()
            } else {
                split_operands(operands, col)
                    .iter()
                    .map(expr_at)
                    .collect::<Result<Vec<_>, _>>()?
            };
            StmtKind::Drop { regs }
        }
        "DC" | "DS" => {
            let reserve = op == "DS";
            let operands = parse_data_operands(operands, col)?;
            if operands.is_empty() {
                return Err(StmtError::directive("DC/DS requires at least one operand"));
            }
            StmtKind::Data { operands, reserve }
        }
        "END" => StmtKind::End {
            entry: optional_expr(operands, col)?,
        },
        "TITLE" => StmtKind::Title,
        "SPACE" => StmtKind::Space,
        "EJECT" => StmtKind::Eject,
        _ => match insn::lookup(&op, level) {
            Some(def) => {
                let operands = parse_machine_operands(def, operands, col)?;
                StmtKind::Machine { def, operands }
            }
            None if insn::has_mnemonic(&op) => {
                return Err(StmtError::new(
                    AsmErrorKind::Instruction,
                    format!("{} is not available at architecture level {}", op, level),
                    None,
                ))
            }
            None => {
                return Err(StmtError::new(
                    AsmErrorKind::Instruction,
                    format!("unknown operation {}", op),
                    None,
                ))
            }
        },
    };
    Ok(kind)
}

fn optional_expr(operands: &str, col: usize) -> Result<Option<Expr>, StmtError> {
    if operands.is_empty() {
        return Ok(None);
    }
    parse_expr(operands, col)
        .map(Some)
        .map_err(|e| StmtError::expression(e.message, e.pos))
}

fn required_expr(operands: &str, col: usize, missing: &str) -> Result<Expr, StmtError> {
    if operands.is_empty() {
        return Err(StmtError::directive(missing));
    }
    parse_expr(operands, col).map_err(|e| StmtError::expression(e.message, e.pos))
}

fn expr_at(part: &(String, usize)) -> Result<Expr, StmtError> {
    parse_expr(&part.0, part.1).map_err(|e| StmtError::expression(e.message, e.pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_text(text: &str) -> Result<Statement, StmtError> {
        let raw = RawStmt {
            line: 1,
            card: text.to_string(),
            text: text.to_string(),
        };
        classify(&raw, 1, ArchLevel::ZArch)
    }

    #[test]
    fn comment_and_blank_lines_are_ignored() {
        let s = classify_text("* a comment").unwrap();
        assert!(matches!(s.kind, StmtKind::Comment));
        assert!(s.kind.is_ignored());
        let s = classify_text("   ").unwrap();
        assert!(matches!(s.kind, StmtKind::Comment));
    }

    #[test]
    fn scan_splits_name_operation_operand() {
        let f = scan_fields("LOOP     LR    1,2         copy the count").unwrap();
        assert_eq!(f.label.as_deref(), Some("LOOP"));
        assert_eq!(f.mnemonic, "LR");
        assert_eq!(f.operands, "1,2");
        let f = scan_fields("         MVC   0(8,3),DATA").unwrap();
        assert_eq!(f.label, None);
        assert_eq!(f.operands, "0(8,3),DATA");
    }

    #[test]
    fn blanks_inside_quotes_and_parens_stay_in_operand() {
        let f = scan_fields("MSG      DC    C'HELLO, WORLD'  greeting").unwrap();
        assert_eq!(f.operands, "C'HELLO, WORLD'");
        let f = scan_fields("         DC    A(BUF, BUF+8)").unwrap();
        assert_eq!(f.operands, "A(BUF, BUF+8)");
    }

    #[test]
    fn operand_split_honors_nesting() {
        let parts = split_operands("0(8,3),DATA,C'A,B'", 10);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].0, "0(8,3)");
        assert_eq!(parts[1].0, "DATA");
        assert_eq!(parts[2].0, "C'A,B'");
        assert_eq!(parts[0].1, 10);
        assert_eq!(parts[1].1, 17);
    }

    #[test]
    fn continuation_folds_from_column_16() {
        let mut first = "         LA    1,AREA+".to_string();
        first.push_str(&" ".repeat(71 - first.len()));
        first.push('X');
        let second = format!("{}8", " ".repeat(15));
        let raw = gather(&[first.clone(), second]);
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].line, 1);
        assert!(raw[0].text.ends_with("LA    1,AREA+8"));
        assert_eq!(raw[0].card, first);
    }

    #[test]
    fn continued_quoted_text_keeps_blanks_at_the_fold() {
        let mut first = "MSG      DC    C'AB".to_string();
        first.push_str(&" ".repeat(71 - first.len()));
        first.push('X');
        let second = format!("{}CD'", " ".repeat(15));
        let raw = gather(&[first, second]);
        assert_eq!(
            raw[0].text,
            format!("MSG      DC    C'AB{}CD'", " ".repeat(52))
        );
        let f = scan_fields(&raw[0].text).unwrap();
        assert_eq!(f.operands, format!("C'AB{}CD'", " ".repeat(52)));
    }

    #[test]
    fn wide_characters_near_the_continue_column_fold_cleanly() {
        // A two-byte character spanning the byte offset of column 72.
        let comment = format!("*{}é yyyy", "x".repeat(69));
        let raw = gather(&[comment.clone()]);
        assert_eq!(raw.len(), 1);
        assert!(raw[0].text.ends_with('é'));

        let mut first = format!("*{}é", "x".repeat(68));
        first.push_str("zzzX");
        let second = format!("{}more", " ".repeat(15));
        let raw = gather(&[first, second]);
        assert_eq!(raw.len(), 1);
        assert!(raw[0].text.contains('é'));
    }

    #[test]
    fn short_lines_do_not_continue() {
        let raw = gather(&["A EQU 1".to_string(), "B EQU 2".to_string()]);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[1].line, 2);
    }

    #[test]
    fn directives_classify() {
        assert!(matches!(
            classify_text("BOOT     START X'200'").unwrap().kind,
            StmtKind::Start { origin: Some(_) }
        ));
        assert!(matches!(
            classify_text("         ORG").unwrap().kind,
            StmtKind::Org { target: None }
        ));
        let s = classify_text("         USING BUF,12,11").unwrap();
        match s.kind {
            StmtKind::Using { regs, .. } => assert_eq!(regs.len(), 2),
            other => panic!("unexpected kind {:?}", other),
        }
        assert!(matches!(
            classify_text("         DROP").unwrap().kind,
            StmtKind::Drop { regs } if regs.is_empty()
        ));
    }

    #[test]
    fn machine_ops_respect_level() {
        let raw = RawStmt {
            line: 1,
            card: "         LGR   1,2".to_string(),
            text: "         LGR   1,2".to_string(),
        };
        let err = classify(&raw, 1, ArchLevel::S370).unwrap_err();
        assert!(err.message.contains("not available"));
        assert!(classify(&raw, 1, ArchLevel::ZArch).is_ok());
        assert!(classify_text("         FROB  1").is_err());
    }

    #[test]
    fn using_requires_anchor_and_register() {
        let err = classify_text("         USING BUF").unwrap_err();
        assert_eq!(err.kind, AsmErrorKind::Directive);
    }
}
