// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Symbol table with typed values, assembler attributes and
//! cross-reference tracking.
//!
//! Entries are created at definition and live to end of assembly. The
//! positional attributes are refined as later phases pin things down:
//! `L` at definition, `M` only once the owning container has an image
//! position (reading it earlier is a phase-ordering bug).

use std::collections::HashMap;
use std::io::Write;

use crate::core::addr::Address;
use crate::core::image::{RegionId, SectionId};

/// What a symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolValue {
    /// A control or dummy section.
    Section(SectionId),
    /// A region.
    Region(RegionId),
    /// A storage location (statement label, address equate).
    Addr(Address),
    /// An absolute value equate.
    Int(i64),
}

/// Duplicate-definition failure. Surfaces as a statement error at the
/// second defining statement; undefined references are reported where
/// the lookup failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    Duplicate { name: String, first_stmt: u32 },
}

impl std::fmt::Display for SymbolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolError::Duplicate { name, first_stmt } => {
                write!(
                    f,
                    "symbol {} already defined at statement {}",
                    name, first_stmt
                )
            }
        }
    }
}

impl std::error::Error for SymbolError {}

/// One symbol table entry.
#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub name: String,
    pub value: SymbolValue,
    /// `L'` length attribute in bytes.
    pub length: u32,
    /// `S'` scale attribute (decimal constants).
    pub scale: i32,
    /// `I'` integer-digit attribute (decimal constants).
    pub integer: i32,
    /// `T'` type attribute code.
    pub type_code: char,
    pub defined_at: u32,
    image_disp: Option<u32>,
    refs: Vec<u32>,
}

impl SymbolEntry {
    pub fn new(name: &str, value: SymbolValue, defined_at: u32) -> Self {
        Self {
            name: name.to_string(),
            value,
            length: 1,
            scale: 0,
            integer: 0,
            type_code: 'U',
            defined_at,
            image_disp: None,
            refs: Vec::new(),
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    pub fn with_type(mut self, type_code: char) -> Self {
        self.type_code = type_code;
        self
    }

    /// `M'` displacement into the final image.
    ///
    /// Panics when read before the owning container has been located;
    /// the design defers `M` rather than inventing a placeholder.
    pub fn image_disp(&self) -> u32 {
        match self.image_disp {
            Some(d) => d,
            None => panic!(
                "internal error: M attribute of {} read before the image was located",
                self.name
            ),
        }
    }

    /// `M'` attribute for display paths that tolerate "not located".
    pub fn try_image_disp(&self) -> Option<u32> {
        self.image_disp
    }

    pub fn set_image_disp(&mut self, disp: u32) {
        self.image_disp = Some(disp);
    }

    /// Statements that referenced this symbol, ascending.
    pub fn refs(&self) -> &[u32] {
        &self.refs
    }

    fn add_ref(&mut self, stmt: u32) {
        if let Err(at) = self.refs.binary_search(&stmt) {
            self.refs.insert(at, stmt);
        }
    }
}

/// The assembly-wide symbol table.
#[derive(Debug)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    index: HashMap<String, usize>,
    case_sensitive: bool,
}

impl SymbolTable {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            case_sensitive,
        }
    }

    fn key(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_ascii_uppercase()
        }
    }

    /// Define a symbol. Names are unique under the table's case mode;
    /// redefinition is refused here and handled by the caller for the few
    /// directives that permit it (section resumption).
    pub fn insert(&mut self, entry: SymbolEntry) -> Result<usize, SymbolError> {
        let key = self.key(&entry.name);
        if let Some(&at) = self.index.get(&key) {
            return Err(SymbolError::Duplicate {
                name: entry.name.clone(),
                first_stmt: self.entries[at].defined_at,
            });
        }
        let at = self.entries.len();
        self.entries.push(entry);
        self.index.insert(key, at);
        Ok(at)
    }

    pub fn lookup(&self, name: &str) -> Option<&SymbolEntry> {
        self.index
            .get(&self.key(name))
            .map(|&at| &self.entries[at])
    }

    /// Record a use of `name` by statement `stmt` for the cross-reference
    /// listing. Additive and idempotent; unknown names are ignored (the
    /// resolution error is reported where the lookup failed).
    pub fn reference(&mut self, name: &str, stmt: u32) {
        if let Some(&at) = self.index.get(&self.key(name)) {
            self.entries[at].add_ref(stmt);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut SymbolEntry> {
        self.entries.iter_mut()
    }

    fn sorted(&self) -> Vec<&SymbolEntry> {
        let mut all: Vec<&SymbolEntry> = self.entries.iter().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    fn format_value(entry: &SymbolEntry) -> String {
        match entry.value {
            SymbolValue::Section(_) | SymbolValue::Region(_) => String::new(),
            SymbolValue::Addr(a) => format!("{}", a),
            SymbolValue::Int(i) => {
                if (0..=0xFFFF_FFFF).contains(&i) {
                    format!("{:08X}", i)
                } else {
                    format!("{:016X}", i)
                }
            }
        }
    }

    /// Symbol table section of the listing.
    pub fn dump(&self, out: &mut dyn Write) -> std::io::Result<()> {
        if self.entries.is_empty() {
            return writeln!(out, "  (no symbols)");
        }
        writeln!(out, "  {:<10} {} {:>5}  {:<16} {:>6}  {:>8}", "SYMBOL", "T", "LEN", "VALUE", "DEFN", "M")?;
        for entry in self.sorted() {
            let m = match entry.try_image_disp() {
                Some(d) => format!("{:08X}", d),
                None => "-".to_string(),
            };
            writeln!(
                out,
                "  {:<10} {} {:>5}  {:<16} {:>6}  {:>8}",
                entry.name,
                entry.type_code,
                entry.length,
                Self::format_value(entry),
                entry.defined_at,
                m
            )?;
        }
        Ok(())
    }

    /// Cross-reference section of the listing.
    pub fn dump_xref(&self, out: &mut dyn Write) -> std::io::Result<()> {
        if self.entries.is_empty() {
            return writeln!(out, "  (no symbols)");
        }
        writeln!(out, "  {:<10} {:>6}  REFERENCES", "SYMBOL", "DEFN")?;
        for entry in self.sorted() {
            let refs = if entry.refs.is_empty() {
                "(none)".to_string()
            } else {
                entry
                    .refs
                    .iter()
                    .map(|r| r.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            };
            writeln!(out, "  {:<10} {:>6}  {}", entry.name, entry.defined_at, refs)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup_fold_case() {
        let mut t = SymbolTable::new(false);
        t.insert(SymbolEntry::new("Loop", SymbolValue::Int(8), 3))
            .unwrap();
        assert!(t.lookup("LOOP").is_some());
        assert!(t.lookup("loop").is_some());
        let err = t
            .insert(SymbolEntry::new("LOOP", SymbolValue::Int(9), 7))
            .unwrap_err();
        assert_eq!(
            err,
            SymbolError::Duplicate {
                name: "LOOP".to_string(),
                first_stmt: 3
            }
        );
    }

    #[test]
    fn case_sensitive_mode_keeps_both() {
        let mut t = SymbolTable::new(true);
        t.insert(SymbolEntry::new("Loop", SymbolValue::Int(1), 1))
            .unwrap();
        t.insert(SymbolEntry::new("LOOP", SymbolValue::Int(2), 2))
            .unwrap();
        assert_eq!(t.len(), 2);
        assert!(t.lookup("loop").is_none());
    }

    #[test]
    fn references_are_idempotent_and_sorted() {
        let mut t = SymbolTable::new(false);
        t.insert(SymbolEntry::new("A", SymbolValue::Int(0), 1))
            .unwrap();
        t.reference("A", 9);
        t.reference("A", 4);
        t.reference("A", 9);
        t.reference("NOPE", 2);
        assert_eq!(t.lookup("A").unwrap().refs(), &[4, 9]);
    }

    #[test]
    fn image_disp_is_deferred() {
        let mut e = SymbolEntry::new("X", SymbolValue::Int(0), 1);
        assert_eq!(e.try_image_disp(), None);
        e.set_image_disp(0x40);
        assert_eq!(e.image_disp(), 0x40);
    }

    #[test]
    #[should_panic(expected = "before the image was located")]
    fn early_image_disp_read_is_a_bug() {
        let e = SymbolEntry::new("X", SymbolValue::Int(0), 1);
        let _ = e.image_disp();
    }

    #[test]
    fn dump_lists_sorted_symbols() {
        let mut t = SymbolTable::new(false);
        t.insert(
            SymbolEntry::new("ZETA", SymbolValue::Int(0x10), 2).with_type('U'),
        )
        .unwrap();
        t.insert(
            SymbolEntry::new(
                "ALPHA",
                SymbolValue::Addr(crate::core::addr::Address::absolute(0x200)),
                1,
            )
            .with_length(4)
            .with_type('F'),
        )
        .unwrap();
        let mut buf = Vec::new();
        t.dump(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let alpha = text.find("ALPHA").unwrap();
        let zeta = text.find("ZETA").unwrap();
        assert!(alpha < zeta);
        assert!(text.contains("000200"));
    }
}
