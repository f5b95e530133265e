// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The assembly engine: one [`Assembler`] drives every statement through
//! the resolution phases, from parsing to the consolidated image.
//!
//! Phases run over the whole statement list in order: parse, early
//! resolve (with one retry round), allocate, bind, object generation,
//! consolidation, finish. Statement state only moves forward; a failure
//! either errors the single statement or, for allocation failures,
//! poisons its whole section.

use std::collections::HashMap;

use crate::core::addr::Address;
use crate::core::assembler::error::{AsmError, AsmErrorKind, Diagnostic, PassCounts, Severity};
use crate::core::base::BaseManager;
use crate::core::expr::{eval_expr, EvalContext, EvalError, Expr, Value};
use crate::core::image::{Binary, Image, RegionId, SectionId, SectionKind};
use crate::core::insn::ArchLevel;
use crate::core::symbols::{SymbolEntry, SymbolTable, SymbolValue};

use super::directives::{
    encode_operand, eval_to_stmt_error, size_operand, value_count, DataOperand, DataValue,
};
use super::instruction::encode_instruction;
use super::statement::{classify, gather, Statement, StmtError, StmtKind, StmtState};

/// Doubleword alignment for control sections.
const SECTION_ALIGN: u32 = 8;

/// Assembles one source file into an [`Image`].
pub struct Assembler {
    pub(crate) arch: ArchLevel,
    /// Stop after the first phase that reported errors.
    pub fail_fast: bool,
    /// Seed the base manager with registers 0-7 anchored at 0..32K.
    pub legacy_direct: bool,
    pub(crate) symbols: SymbolTable,
    pub(crate) image: Image,
    pub(crate) statements: Vec<Statement>,
    diagnostics: Vec<Diagnostic>,
    counts: PassCounts,
    /// Resolved START/REGION origins, by statement number.
    origins: HashMap<u32, u64>,
    entry: Option<u64>,
    current_region: Option<RegionId>,
    current_section: Option<SectionId>,
}

impl Assembler {
    pub fn new(arch: ArchLevel, case_sensitive: bool) -> Self {
        Self {
            arch,
            fail_fast: false,
            legacy_direct: false,
            symbols: SymbolTable::new(case_sensitive),
            image: Image::new(),
            statements: Vec::new(),
            diagnostics: Vec::new(),
            counts: PassCounts::new(),
            origins: HashMap::new(),
            entry: None,
            current_region: None,
            current_section: None,
        }
    }

    /// Run the full phase pipeline over `lines`. This is the seam a
    /// macro or include facility would feed expanded lines into.
    pub fn assemble(&mut self, lines: &[String]) -> PassCounts {
        self.parse(lines);
        if self.bail() {
            return self.tally();
        }
        self.early_resolve();
        if self.bail() {
            return self.tally();
        }
        if !self.allocate() {
            return self.tally();
        }
        if self.bail() {
            return self.tally();
        }
        self.bind();
        self.object_generate();
        if self.bail() {
            return self.tally();
        }
        self.consolidate();
        self.finish();
        self.tally()
    }

    pub fn arch(&self) -> ArchLevel {
        self.arch
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    fn bail(&self) -> bool {
        self.fail_fast
            && self
                .diagnostics
                .iter()
                .any(|d| d.severity() == Severity::Error)
    }

    fn tally(&mut self) -> PassCounts {
        self.counts.errors = self
            .diagnostics
            .iter()
            .filter(|d| d.severity() == Severity::Error)
            .count() as u32;
        self.counts.warnings = self
            .diagnostics
            .iter()
            .filter(|d| d.severity() == Severity::Warning)
            .count() as u32;
        self.counts
    }

    fn report(&mut self, line: u32, err: &StmtError) {
        let mut diag = Diagnostic::new(
            line,
            Severity::Error,
            AsmError::new(err.kind, &err.message, None),
        )
        .with_column(err.col);
        if err.kind == AsmErrorKind::Base {
            diag = diag.with_help("establish addressability with a USING that covers the target");
        }
        self.diagnostics.push(diag);
    }

    fn warn(&mut self, line: u32, kind: AsmErrorKind, message: &str) {
        self.diagnostics.push(Diagnostic::new(
            line,
            Severity::Warning,
            AsmError::new(kind, message, None),
        ));
    }

    // ----- parse --------------------------------------------------------

    fn parse(&mut self, lines: &[String]) {
        self.counts.lines = lines.len() as u32;
        let raw = gather(lines);
        for (i, stmt) in raw.iter().enumerate() {
            let number = (i + 1) as u32;
            match classify(stmt, number, self.arch) {
                Ok(parsed) => {
                    if !parsed.kind.is_ignored() {
                        self.counts.statements += 1;
                    }
                    self.statements.push(parsed);
                }
                Err(err) => {
                    self.counts.statements += 1;
                    self.report(stmt.line, &err);
                    // The placeholder keeps the statement number and
                    // source so the listing stays complete.
                    self.statements.push(Statement {
                        number,
                        line: stmt.line,
                        source: stmt.card.clone(),
                        label: None,
                        kind: StmtKind::Comment,
                        state: StmtState::Errored,
                        loc: None,
                        section: None,
                        binary: None,
                    });
                }
            }
        }
    }

    // ----- early resolve ------------------------------------------------

    /// Resolve equates and container origins ahead of allocation. One
    /// retry round settles forward references between absolute equates;
    /// whatever still defers is picked up by the later rungs.
    fn early_resolve(&mut self) {
        let mut pending: Vec<usize> = (0..self.statements.len()).collect();
        for round in 0..2 {
            let last = round == 1;
            let mut deferred = Vec::new();
            for at in pending {
                if !self.early_resolve_one(at, last) {
                    deferred.push(at);
                }
            }
            pending = deferred;
        }
    }

    /// Returns false when the statement deferred and wants the retry
    /// round.
    fn early_resolve_one(&mut self, at: usize, last: bool) -> bool {
        if !self.statements[at].is_live() {
            return true;
        }
        let number = self.statements[at].number;
        let line = self.statements[at].line;
        let label = self.statements[at].label.clone();
        let kind = self.statements[at].kind.clone();
        match kind {
            StmtKind::Equ { expr } => {
                let label = match label {
                    Some(label) => label,
                    None => {
                        self.report(line, &StmtError::directive("EQU requires a name"));
                        self.statements[at].state = StmtState::Errored;
                        return true;
                    }
                };
                let ctx = self.eval_ctx(None);
                match eval_expr(&expr, &ctx) {
                    Ok(value) => {
                        self.define_equate(&label, value, number, line);
                        self.statements[at].state = StmtState::EarlyResolved;
                        true
                    }
                    // `*` and location-dependent symbols wait for the
                    // allocate rung.
                    Err(EvalError::Deferred { .. }) => last,
                    Err(err) => {
                        self.report(line, &eval_to_stmt_error(err));
                        self.statements[at].state = StmtState::Errored;
                        true
                    }
                }
            }
            StmtKind::Start { origin: Some(expr) } | StmtKind::Region { origin: Some(expr) } => {
                let ctx = self.eval_ctx(None);
                match eval_expr(&expr, &ctx) {
                    Ok(value) => {
                        match origin_value(value, expr.pos()) {
                            Ok(origin) => {
                                self.origins.insert(number, origin);
                            }
                            Err(err) => {
                                // An errored origin still anchors at 0
                                // so the rest of the program assembles.
                                self.report(line, &err);
                                self.origins.insert(number, 0);
                            }
                        }
                        self.statements[at].state = StmtState::EarlyResolved;
                        true
                    }
                    Err(EvalError::Deferred { symbol, pos }) => {
                        if last {
                            self.report(
                                line,
                                &StmtError::new(
                                    AsmErrorKind::Symbol,
                                    format!("origin expression uses undefined symbol {}", symbol),
                                    Some(pos),
                                ),
                            );
                            self.origins.insert(number, 0);
                            self.statements[at].state = StmtState::EarlyResolved;
                        }
                        last
                    }
                    Err(err) => {
                        self.report(line, &eval_to_stmt_error(err));
                        self.origins.insert(number, 0);
                        self.statements[at].state = StmtState::EarlyResolved;
                        true
                    }
                }
            }
            _ => {
                self.statements[at].state = StmtState::EarlyResolved;
                true
            }
        }
    }

    fn define_equate(&mut self, label: &str, value: Value, number: u32, line: u32) {
        let entry = match value {
            Value::Int(n) => SymbolEntry::new(label, SymbolValue::Int(n), number),
            Value::Addr(a) => {
                SymbolEntry::new(label, SymbolValue::Addr(a), number).with_length(a.length())
            }
        };
        self.define(entry, line);
    }

    fn define(&mut self, entry: SymbolEntry, line: u32) -> bool {
        match self.symbols.insert(entry) {
            Ok(_) => true,
            Err(err) => {
                self.report(
                    line,
                    &StmtError::new(AsmErrorKind::Symbol, err.to_string(), None),
                );
                false
            }
        }
    }

    // ----- allocate -----------------------------------------------------

    /// Walk the statements in order, opening containers and placing
    /// content. Returns false when region assignment fails outright.
    fn allocate(&mut self) -> bool {
        let mut statements = std::mem::take(&mut self.statements);
        for stmt in &mut statements {
            self.allocate_one(stmt);
        }
        // Everything inside a poisoned section is withdrawn: its
        // addresses are wrong past the failure point.
        for stmt in &mut statements {
            if let Some(sid) = stmt.section {
                if self.image.section(sid).is_poisoned() {
                    stmt.state = StmtState::Errored;
                }
            }
        }
        self.statements = statements;
        match self.image.assign_regions() {
            Ok(()) => true,
            Err(err) => {
                self.report(
                    0,
                    &StmtError::new(AsmErrorKind::Allocation, err.to_string(), None),
                );
                false
            }
        }
    }

    fn allocate_one(&mut self, stmt: &mut Statement) {
        if stmt.kind.is_ignored() {
            if stmt.label.is_some() && !matches!(stmt.kind, StmtKind::Comment) {
                self.warn(
                    stmt.line,
                    AsmErrorKind::Directive,
                    "name field ignored on listing directive",
                );
            }
            return;
        }
        if stmt.is_errored() {
            return;
        }
        match &stmt.kind {
            StmtKind::Start { .. } => {
                let name = stmt.label.clone().unwrap_or_default();
                let origin = self.origins.get(&stmt.number).copied().unwrap_or(0);
                let rid = self.image.add_region(&name, origin);
                let sid =
                    self.image
                        .add_section(&name, SectionKind::Csect, SECTION_ALIGN, Some(rid));
                self.current_region = Some(rid);
                self.current_section = Some(sid);
                if stmt.label.is_some() {
                    let entry = SymbolEntry::new(&name, SymbolValue::Section(sid), stmt.number)
                        .with_type('J');
                    self.define(entry, stmt.line);
                }
                stmt.section = Some(sid);
                stmt.loc = Some(Address::relative(sid, 0));
                stmt.state = StmtState::Allocated;
            }
            StmtKind::Region { .. } => {
                let name = stmt.label.clone().unwrap_or_default();
                let existing = stmt.label.as_deref().and_then(|n| self.image.find_region(n));
                let rid = match existing {
                    Some(rid) => rid,
                    None => {
                        let origin = self.origins.get(&stmt.number).copied().unwrap_or(0);
                        let rid = self.image.add_region(&name, origin);
                        if stmt.label.is_some() {
                            let entry =
                                SymbolEntry::new(&name, SymbolValue::Region(rid), stmt.number)
                                    .with_type('J');
                            self.define(entry, stmt.line);
                        }
                        rid
                    }
                };
                self.current_region = Some(rid);
                self.current_section = None;
                stmt.state = StmtState::Allocated;
            }
            StmtKind::Csect => self.open_section(stmt, SectionKind::Csect),
            StmtKind::Dsect => self.open_section(stmt, SectionKind::Dsect),
            StmtKind::Org { target } => {
                let sid = match self.current_section {
                    Some(sid) => sid,
                    None => {
                        self.report(stmt.line, &StmtError::directive("ORG outside any section"));
                        stmt.state = StmtState::Errored;
                        return;
                    }
                };
                stmt.section = Some(sid);
                let to = match target {
                    None => None,
                    Some(expr) => {
                        let expr = expr.clone();
                        let ctx = self.eval_ctx(self.current_loc());
                        match eval_expr(&expr, &ctx) {
                            Ok(Value::Addr(a)) if a.is_relative() && a.section() == Some(sid) => {
                                Some(a.offset().unwrap_or(0))
                            }
                            Ok(_) => {
                                self.poison(
                                    sid,
                                    stmt,
                                    "ORG target is outside the current section",
                                    expr.pos(),
                                );
                                return;
                            }
                            Err(err) => {
                                let pos = err.pos();
                                let msg = err.to_string();
                                self.poison(sid, stmt, &msg, pos);
                                return;
                            }
                        }
                    }
                };
                self.image.section_mut(sid).org(to);
                let loc = Address::relative(sid, self.image.section(sid).pos());
                stmt.loc = Some(loc);
                // A name on ORG labels the post-ORG location.
                if let Some(label) = stmt.label.clone() {
                    let entry = SymbolEntry::new(&label, SymbolValue::Addr(loc), stmt.number);
                    self.define(entry, stmt.line);
                }
                stmt.state = StmtState::Allocated;
            }
            StmtKind::Equ { expr } => {
                stmt.loc = self.current_loc();
                stmt.section = self.current_section;
                let defined = stmt
                    .label
                    .as_deref()
                    .is_some_and(|l| self.symbols.lookup(l).is_some());
                if !defined {
                    // Third rung: the location counter is available now.
                    let label = stmt.label.clone().unwrap_or_default();
                    let expr = expr.clone();
                    let ctx = self.eval_ctx(stmt.loc);
                    match eval_expr(&expr, &ctx) {
                        Ok(value) => self.define_equate(&label, value, stmt.number, stmt.line),
                        Err(EvalError::Deferred { .. }) => {
                            // Last chance is the object-generation rung.
                            stmt.state = StmtState::Allocated;
                            return;
                        }
                        Err(err) => {
                            self.report(stmt.line, &eval_to_stmt_error(err));
                            stmt.state = StmtState::Errored;
                            return;
                        }
                    }
                }
                stmt.state = StmtState::Allocated;
            }
            StmtKind::Data { operands, reserve } => {
                let reserve = *reserve;
                let operands = operands.clone();
                self.allocate_data(stmt, &operands, reserve);
            }
            StmtKind::Machine { def, .. } => {
                let length = def.length();
                let sid = self.ensure_section();
                let binary = Binary::new(2, length, true, stmt.number);
                match self.image.section_mut(sid).place(binary) {
                    Ok((index, loc)) => {
                        stmt.section = Some(sid);
                        stmt.binary = Some(index);
                        stmt.loc = Some(loc);
                        if let Some(label) = stmt.label.clone() {
                            let entry = SymbolEntry::new(
                                &label,
                                SymbolValue::Addr(loc.with_length(length)),
                                stmt.number,
                            )
                            .with_length(length)
                            .with_type('I');
                            self.define(entry, stmt.line);
                        }
                        stmt.state = StmtState::Allocated;
                    }
                    Err(err) => {
                        let msg = err.to_string();
                        self.poison(sid, stmt, &msg, 1);
                    }
                }
            }
            StmtKind::Using { .. } | StmtKind::Drop { .. } => {
                if stmt.label.is_some() {
                    self.warn(
                        stmt.line,
                        AsmErrorKind::Directive,
                        "name field ignored on USING/DROP",
                    );
                }
                stmt.loc = self.current_loc();
                stmt.section = self.current_section;
                stmt.state = StmtState::Allocated;
            }
            StmtKind::End { .. } => {
                if stmt.label.is_some() {
                    self.report(
                        stmt.line,
                        &StmtError::directive("END must not have a name field"),
                    );
                }
                stmt.loc = self.current_loc();
                stmt.section = self.current_section;
                stmt.state = StmtState::Allocated;
            }
            StmtKind::Comment | StmtKind::Title | StmtKind::Space | StmtKind::Eject => {}
        }
    }

    fn open_section(&mut self, stmt: &mut Statement, kind: SectionKind) {
        let name = stmt.label.clone().unwrap_or_default();
        let existing = stmt.label.as_deref().and_then(|n| self.image.find_section(n));
        let sid = match existing {
            Some(sid) if self.image.section(sid).kind() == kind => {
                // Resuming keeps the section's own cursor.
                if kind == SectionKind::Csect {
                    self.current_region = self.image.section(sid).region();
                }
                sid
            }
            Some(_) => {
                self.report(
                    stmt.line,
                    &StmtError::new(
                        AsmErrorKind::Symbol,
                        format!("{} names a section of the other kind", name),
                        None,
                    ),
                );
                stmt.state = StmtState::Errored;
                return;
            }
            None => {
                let region = match kind {
                    SectionKind::Csect => Some(self.ensure_region()),
                    SectionKind::Dsect => None,
                };
                let sid = self.image.add_section(&name, kind, SECTION_ALIGN, region);
                if stmt.label.is_some() {
                    let entry = SymbolEntry::new(&name, SymbolValue::Section(sid), stmt.number)
                        .with_type('J');
                    self.define(entry, stmt.line);
                }
                sid
            }
        };
        self.current_section = Some(sid);
        stmt.section = Some(sid);
        stmt.loc = Some(Address::relative(sid, self.image.section(sid).pos()));
        stmt.state = StmtState::Allocated;
    }

    fn allocate_data(&mut self, stmt: &mut Statement, operands: &[DataOperand], reserve: bool) {
        let sid = self.ensure_section();
        stmt.section = Some(sid);
        for (i, op) in operands.iter().enumerate() {
            let ctx = self.eval_ctx(self.current_loc());
            let sizing = match size_operand(op, &ctx) {
                Ok(sizing) => sizing,
                // Sizing is the allocation deadline: an unknown or bad
                // length makes every later address in the section wrong.
                Err(err) => {
                    let pos = err.pos();
                    let msg = err.to_string();
                    self.poison(sid, stmt, &msg, pos);
                    return;
                }
            };
            let length = match sizing
                .dup
                .checked_mul(sizing.unit)
                .and_then(|n| n.checked_mul(value_count(op)))
            {
                Some(length) => length,
                None => {
                    self.poison(
                        sid,
                        stmt,
                        "data operand length exceeds the addressable range",
                        op.col,
                    );
                    return;
                }
            };
            let binary = Binary::new(sizing.align, length, !reserve, stmt.number);
            match self.image.section_mut(sid).place(binary) {
                Ok((index, loc)) => {
                    if i == 0 {
                        stmt.binary = Some(index);
                        stmt.loc = Some(loc);
                        if let Some(label) = stmt.label.clone() {
                            let entry = SymbolEntry::new(
                                &label,
                                SymbolValue::Addr(loc.with_length(sizing.unit)),
                                stmt.number,
                            )
                            .with_length(sizing.unit)
                            .with_type(op.ty.type_attr());
                            self.define(entry, stmt.line);
                        }
                    }
                }
                Err(err) => {
                    let msg = err.to_string();
                    self.poison(sid, stmt, &msg, op.col);
                    return;
                }
            }
        }
        stmt.state = StmtState::Allocated;
    }

    fn poison(&mut self, sid: SectionId, stmt: &mut Statement, message: &str, col: usize) {
        self.report(
            stmt.line,
            &StmtError::new(AsmErrorKind::Allocation, message, Some(col)),
        );
        self.image.section_mut(sid).poison();
        stmt.state = StmtState::Errored;
    }

    fn ensure_region(&mut self) -> RegionId {
        match self.current_region {
            Some(rid) => rid,
            None => {
                let rid = self.image.add_region("", 0);
                self.current_region = Some(rid);
                rid
            }
        }
    }

    /// Content outside any section lands in a manufactured unnamed
    /// control section inside the active (or unnamed) region.
    fn ensure_section(&mut self) -> SectionId {
        match self.current_section {
            Some(sid) => sid,
            None => {
                let rid = self.ensure_region();
                let sid = self
                    .image
                    .add_section("", SectionKind::Csect, SECTION_ALIGN, Some(rid));
                self.current_section = Some(sid);
                sid
            }
        }
    }

    fn current_loc(&self) -> Option<Address> {
        self.current_section
            .map(|sid| Address::relative(sid, self.image.section(sid).pos()))
    }

    // ----- bind ---------------------------------------------------------

    /// Bind sections to storage and push the absolute addresses out to
    /// the copies held by symbols and statements. Dummy-section
    /// addresses stay relative.
    fn bind(&mut self) {
        self.image.bind_all();
        self.image.locate_all();

        let anchors: Vec<(Option<u64>, Option<u32>)> = self
            .image
            .sections()
            .iter()
            .map(|s| (s.loc().and_then(|a| a.value()), s.image_disp()))
            .collect();
        let region_disps: Vec<Option<u32>> =
            self.image.regions().iter().map(|r| r.image_disp()).collect();

        for entry in self.symbols.entries_mut() {
            match entry.value {
                SymbolValue::Addr(a) if a.is_relative() => {
                    let sid = a.section().expect("relative address carries its section");
                    let (anchor, disp) = anchors[sid.index()];
                    if let Some(base) = disp {
                        entry.set_image_disp(base + a.offset().unwrap_or(0));
                    }
                    if let Some(anchor) = anchor {
                        if let SymbolValue::Addr(ref mut addr) = entry.value {
                            addr.make_absolute(anchor);
                        }
                    }
                }
                SymbolValue::Section(sid) => {
                    if let Some(base) = anchors[sid.index()].1 {
                        entry.set_image_disp(base);
                    }
                }
                SymbolValue::Region(rid) => {
                    if let Some(base) = region_disps[rid.index()] {
                        entry.set_image_disp(base);
                    }
                }
                SymbolValue::Addr(_) | SymbolValue::Int(_) => {}
            }
        }

        for stmt in &mut self.statements {
            if let Some(loc) = stmt.loc.as_mut() {
                if loc.is_relative() {
                    let sid = loc.section().expect("relative address carries its section");
                    if let Some(anchor) = anchors[sid.index()].0 {
                        loc.make_absolute(anchor);
                    }
                }
            }
            if stmt.state == StmtState::Allocated {
                stmt.state = StmtState::Bound;
            }
        }
    }

    // ----- object generation --------------------------------------------

    /// Statement-ordered code build: USING/DROP maintain the base
    /// manager as the walk passes them, so every instruction resolves
    /// against exactly the bases in scope at its line.
    fn object_generate(&mut self) {
        let mut bases = if self.legacy_direct {
            BaseManager::legacy_eight()
        } else {
            BaseManager::standard()
        };
        let mut statements = std::mem::take(&mut self.statements);
        for stmt in &mut statements {
            if !stmt.is_live() {
                continue;
            }
            self.note_references(stmt);
            self.generate_one(stmt, &mut bases);
        }
        self.statements = statements;
    }

    fn note_references(&mut self, stmt: &Statement) {
        let mut names = Vec::new();
        match &stmt.kind {
            StmtKind::Start { origin } | StmtKind::Region { origin } => {
                if let Some(expr) = origin {
                    collect_symbols(expr, &mut names);
                }
            }
            StmtKind::Org { target } => {
                if let Some(expr) = target {
                    collect_symbols(expr, &mut names);
                }
            }
            StmtKind::Equ { expr } => collect_symbols(expr, &mut names),
            StmtKind::Using { anchor, regs } => {
                collect_symbols(anchor, &mut names);
                for expr in regs {
                    collect_symbols(expr, &mut names);
                }
            }
            StmtKind::Drop { regs } => {
                for expr in regs {
                    collect_symbols(expr, &mut names);
                }
            }
            StmtKind::Data { operands, .. } => {
                for op in operands {
                    if let Some(expr) = &op.dup {
                        collect_symbols(expr, &mut names);
                    }
                    if let Some(expr) = &op.length {
                        collect_symbols(expr, &mut names);
                    }
                    if let DataValue::Exprs(exprs) = &op.value {
                        for expr in exprs {
                            collect_symbols(expr, &mut names);
                        }
                    }
                }
            }
            StmtKind::Machine { operands, .. } => {
                for op in operands {
                    collect_symbols(&op.expr, &mut names);
                    if let Some((first, second)) = &op.group {
                        if let Some(expr) = first {
                            collect_symbols(expr, &mut names);
                        }
                        if let Some(expr) = second {
                            collect_symbols(expr, &mut names);
                        }
                    }
                }
            }
            StmtKind::End { entry } => {
                if let Some(expr) = entry {
                    collect_symbols(expr, &mut names);
                }
            }
            StmtKind::Csect
            | StmtKind::Dsect
            | StmtKind::Comment
            | StmtKind::Title
            | StmtKind::Space
            | StmtKind::Eject => {}
        }
        for name in names {
            self.symbols.reference(&name, stmt.number);
        }
    }

    fn generate_one(&mut self, stmt: &mut Statement, bases: &mut BaseManager) {
        match &stmt.kind {
            StmtKind::Using { anchor, regs } => {
                let anchor = anchor.clone();
                let regs = regs.clone();
                match self.apply_using(&anchor, &regs, stmt.loc, bases) {
                    Ok(()) => stmt.state = StmtState::ObjectGenerated,
                    Err(err) => {
                        self.report(stmt.line, &err);
                        stmt.state = StmtState::Errored;
                    }
                }
            }
            StmtKind::Drop { regs } => {
                if regs.is_empty() {
                    bases.drop_all();
                    stmt.state = StmtState::ObjectGenerated;
                    return;
                }
                let regs = regs.clone();
                let mut resolved = Vec::with_capacity(regs.len());
                let mut failure = None;
                let ctx = self.eval_ctx(stmt.loc);
                for expr in &regs {
                    match eval_register(expr, &ctx) {
                        Ok(reg) => resolved.push(reg),
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
                match failure {
                    None => {
                        for reg in resolved {
                            bases.drop_reg(reg);
                        }
                        stmt.state = StmtState::ObjectGenerated;
                    }
                    Some(err) => {
                        self.report(stmt.line, &err);
                        stmt.state = StmtState::Errored;
                    }
                }
            }
            StmtKind::Machine { def, operands } => {
                let (sid, index, at) = match (stmt.section, stmt.binary, stmt.loc) {
                    (Some(sid), Some(index), Some(at)) => (sid, index, at),
                    _ => return,
                };
                if self.image.section(sid).kind() == SectionKind::Dsect {
                    // Dummy sections describe layout; they never hold
                    // object code.
                    stmt.state = StmtState::ObjectGenerated;
                    return;
                }
                let def = *def;
                let operands = operands.clone();
                let ctx = self.eval_ctx(Some(at));
                let built = encode_instruction(def, &operands, &ctx, bases, at);
                match built {
                    Ok(bytes) => {
                        self.image.section_mut(sid).binary_mut(index).set_bytes(bytes);
                        stmt.state = StmtState::ObjectGenerated;
                    }
                    Err(err) => {
                        self.report(stmt.line, &err);
                        stmt.state = StmtState::Errored;
                    }
                }
            }
            StmtKind::Data { operands, reserve } => {
                let (sid, first) = match (stmt.section, stmt.binary) {
                    (Some(sid), Some(first)) => (sid, first),
                    _ => return,
                };
                if *reserve || self.image.section(sid).kind() == SectionKind::Dsect {
                    stmt.state = StmtState::ObjectGenerated;
                    return;
                }
                let operands = operands.clone();
                let mut failed = false;
                for (i, op) in operands.iter().enumerate() {
                    let index = first + i;
                    let at = self.image.section(sid).binaries()[index].loc();
                    let ctx = self.eval_ctx(at);
                    let built = size_operand(op, &ctx)
                        .map_err(eval_to_stmt_error)
                        .and_then(|sizing| encode_operand(op, sizing, &ctx, bases));
                    match built {
                        Ok(bytes) => {
                            self.image.section_mut(sid).binary_mut(index).set_bytes(bytes);
                        }
                        Err(err) => {
                            self.report(stmt.line, &err);
                            failed = true;
                        }
                    }
                }
                stmt.state = if failed {
                    StmtState::Errored
                } else {
                    StmtState::ObjectGenerated
                };
            }
            StmtKind::Equ { expr } => {
                let defined = stmt
                    .label
                    .as_deref()
                    .is_some_and(|l| self.symbols.lookup(l).is_some());
                if !defined {
                    // Final rung: anything still deferred here is a
                    // genuine undefined symbol.
                    let label = stmt.label.clone().unwrap_or_default();
                    let expr = expr.clone();
                    let ctx = self.eval_ctx(stmt.loc);
                    match eval_expr(&expr, &ctx) {
                        Ok(value) => {
                            self.define_equate(&label, value, stmt.number, stmt.line);
                        }
                        Err(err) => {
                            self.report(stmt.line, &eval_to_stmt_error(err));
                            stmt.state = StmtState::Errored;
                            return;
                        }
                    }
                }
                stmt.state = StmtState::ObjectGenerated;
            }
            StmtKind::End { entry } => {
                if let Some(expr) = entry {
                    let expr = expr.clone();
                    let ctx = self.eval_ctx(stmt.loc);
                    match eval_expr(&expr, &ctx) {
                        Ok(value) => match entry_value(value, expr.pos()) {
                            Ok(addr) => self.entry = Some(addr),
                            Err(err) => {
                                self.report(stmt.line, &err);
                                stmt.state = StmtState::Errored;
                                return;
                            }
                        },
                        Err(err) => {
                            self.report(stmt.line, &eval_to_stmt_error(err));
                            stmt.state = StmtState::Errored;
                            return;
                        }
                    }
                }
                stmt.state = StmtState::ObjectGenerated;
            }
            StmtKind::Start { .. }
            | StmtKind::Csect
            | StmtKind::Dsect
            | StmtKind::Region { .. }
            | StmtKind::Org { .. } => {
                stmt.state = StmtState::ObjectGenerated;
            }
            StmtKind::Comment | StmtKind::Title | StmtKind::Space | StmtKind::Eject => {}
        }
    }

    fn apply_using(
        &mut self,
        anchor: &Expr,
        regs: &[Expr],
        loc: Option<Address>,
        bases: &mut BaseManager,
    ) -> Result<(), StmtError> {
        let ctx = self.eval_ctx(loc);
        let anchor_addr = match eval_expr(anchor, &ctx).map_err(eval_to_stmt_error)? {
            Value::Addr(a) => a,
            Value::Int(n) if n >= 0 => Address::absolute(n as u64),
            Value::Int(_) => {
                return Err(StmtError::expression(
                    "USING anchor must not be negative",
                    anchor.pos(),
                ))
            }
        };
        for (k, expr) in regs.iter().enumerate() {
            let reg = eval_register(expr, &ctx)?;
            // Each further register covers the next 4096 bytes.
            let at = anchor_addr
                .offset_by((k as i64) * 4096)
                .map_err(|e| StmtError::expression(e.to_string(), expr.pos()))?;
            bases.assign(reg, at);
        }
        Ok(())
    }

    // ----- consolidate and finish ---------------------------------------

    fn consolidate(&mut self) {
        self.image.insert_all();
        for stmt in &mut self.statements {
            if stmt.state == StmtState::ObjectGenerated {
                stmt.state = StmtState::Consolidated;
            }
        }
    }

    /// Fix the load and entry points. The load point is the lowest
    /// origin of any region with content; the entry point defaults to
    /// the load point when END named none.
    fn finish(&mut self) {
        let load = self
            .image
            .regions()
            .iter()
            .filter(|r| r.length() > 0)
            .map(|r| r.origin())
            .min()
            .or_else(|| self.image.regions().first().map(|r| r.origin()))
            .unwrap_or(0);
        self.image.set_load(load);
        self.image.set_entry(self.entry.unwrap_or(load));
    }

    fn eval_ctx(&self, location: Option<Address>) -> EngineCtx<'_> {
        EngineCtx {
            symbols: &self.symbols,
            image: &self.image,
            location,
        }
    }
}

/// Evaluation context backed by the symbol table and the image.
/// Section and region symbols read their current addresses out of the
/// image, so the same context works before and after binding.
struct EngineCtx<'a> {
    symbols: &'a SymbolTable,
    image: &'a Image,
    location: Option<Address>,
}

impl EvalContext for EngineCtx<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        let entry = self.symbols.lookup(name)?;
        match entry.value {
            SymbolValue::Int(n) => Some(Value::Int(n)),
            SymbolValue::Addr(a) => Some(Value::Addr(a.with_length(entry.length))),
            SymbolValue::Section(sid) => self
                .image
                .section(sid)
                .loc()
                .map(|a| Value::Addr(a.with_length(entry.length))),
            SymbolValue::Region(rid) => Some(Value::Addr(
                Address::absolute(self.image.region(rid).origin()).with_length(entry.length),
            )),
        }
    }

    fn location(&self) -> Option<Address> {
        self.location
    }

    fn length_of(&self, name: &str) -> Option<u32> {
        self.symbols.lookup(name).map(|e| e.length)
    }
}

fn collect_symbols(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Symbol(name, _) | Expr::LengthOf(name, _) => out.push(name.clone()),
        Expr::Unary { expr, .. } => collect_symbols(expr, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_symbols(lhs, out);
            collect_symbols(rhs, out);
        }
        Expr::Number(..) | Expr::Loc(..) => {}
    }
}

fn eval_register(expr: &Expr, ctx: &dyn EvalContext) -> Result<u8, StmtError> {
    let value = eval_expr(expr, ctx).map_err(eval_to_stmt_error)?;
    match value.as_int() {
        Some(n) if (0..16).contains(&n) => Ok(n as u8),
        _ => Err(StmtError::expression(
            "register must be an absolute value 0-15",
            expr.pos(),
        )),
    }
}

fn origin_value(value: Value, pos: usize) -> Result<u64, StmtError> {
    match value {
        Value::Int(n) if n >= 0 => Ok(n as u64),
        Value::Addr(a) => a
            .value()
            .ok_or_else(|| StmtError::expression("origin must be an absolute address", pos)),
        Value::Int(_) => Err(StmtError::expression("origin must not be negative", pos)),
    }
}

fn entry_value(value: Value, pos: usize) -> Result<u64, StmtError> {
    match value {
        Value::Int(n) if n >= 0 => Ok(n as u64),
        Value::Addr(a) => a
            .value()
            .ok_or_else(|| StmtError::expression("entry point must be an absolute address", pos)),
        Value::Int(_) => Err(StmtError::expression("entry point must not be negative", pos)),
    }
}
