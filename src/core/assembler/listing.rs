// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Listing file generation.

use std::io::Write;

use crate::core::addr::{AddrKind, Address};
use crate::core::symbols::SymbolTable;

use super::error::{build_context_lines, PassCounts};

/// How one statement shows up in the location/object columns.
pub enum ListingDetail<'a> {
    /// Nothing to show (comments, listing directives, errored statements).
    None,
    /// Emitted object code at an address.
    Object { loc: Address, bytes: &'a [u8] },
    /// Reserved storage: address plus a `+length` reserve marker.
    Reserve { loc: Address, length: u32 },
    /// An equated value.
    Equate { text: String },
}

/// Data for a single listing line.
pub struct ListingLine<'a> {
    pub detail: ListingDetail<'a>,
    pub stmt_num: u32,
    pub source: &'a str,
}

/// Writer for listing file output.
pub struct ListingWriter<W: Write> {
    out: W,
    addr_width: u32,
}

impl<W: Write> ListingWriter<W> {
    /// `addr_width` is the configured addressing width in bits; it sets
    /// the location column width.
    pub fn new(out: W, addr_width: u32) -> Self {
        Self { out, addr_width }
    }

    pub fn header(&mut self, title: &str) -> std::io::Result<()> {
        writeln!(self.out, "{title}")?;
        writeln!(self.out)?;
        writeln!(self.out, "LOC       OBJECT CODE              STMT  SOURCE")?;
        writeln!(self.out, "--------  -----------------------  ----  ------")?;
        Ok(())
    }

    pub fn write_line(&mut self, line: ListingLine<'_>) -> std::io::Result<()> {
        let (loc, object) = match &line.detail {
            ListingDetail::None => ("--------".to_string(), String::new()),
            ListingDetail::Object { loc, bytes } => {
                // At most eight object bytes per line; long constants show
                // their leading bytes.
                (self.format_loc(*loc), format_bytes(&bytes[..bytes.len().min(8)]))
            }
            ListingDetail::Reserve { loc, length } => {
                (self.format_loc(*loc), format!("+{length:X}"))
            }
            ListingDetail::Equate { text } => ("--------".to_string(), format!("={text}")),
        };
        writeln!(
            self.out,
            "{:<8}  {:<23}  {:>4}  {}",
            loc, object, line.stmt_num, line.source
        )
    }

    /// Inline diagnostic, rendered with source context right below the
    /// statement it belongs to.
    pub fn write_diagnostic(
        &mut self,
        kind: &str,
        msg: &str,
        line_num: u32,
        column: Option<usize>,
        source_lines: &[String],
    ) -> std::io::Result<()> {
        let context = build_context_lines(line_num, column, Some(source_lines));
        for line in context {
            writeln!(self.out, "{line}")?;
        }
        writeln!(self.out, "{kind}: {msg}")
    }

    pub fn footer(
        &mut self,
        counts: &PassCounts,
        symbols: &SymbolTable,
        image_len: usize,
    ) -> std::io::Result<()> {
        writeln!(
            self.out,
            "\nStatements: {}  Errors: {}  Warnings: {}",
            counts.statements, counts.errors, counts.warnings
        )?;
        writeln!(self.out, "\nSYMBOL TABLE\n")?;
        symbols.dump(&mut self.out)?;
        writeln!(self.out, "\nCROSS REFERENCE\n")?;
        symbols.dump_xref(&mut self.out)?;
        writeln!(self.out, "\nImage length is {} bytes", image_len)?;
        Ok(())
    }

    fn format_loc(&self, loc: Address) -> String {
        match loc.kind() {
            AddrKind::Absolute { value } => format_addr(value, self.addr_width),
            // Dummy-section offsets list as bare section offsets.
            AddrKind::Relative { offset, .. } => format_addr(offset as u64, self.addr_width),
        }
    }
}

/// Format an address at the width implied by the addressing mode.
pub fn format_addr(addr: u64, addr_width: u32) -> String {
    if addr_width <= 24 {
        format!("{addr:06X}")
    } else if addr_width <= 32 {
        format!("{addr:08X}")
    } else if addr <= 0xFFFF_FFFF {
        format!("{addr:08X}")
    } else {
        format!("{addr:016X}")
    }
}

/// Format bytes as a hex string for the listing.
pub fn format_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_line_shows_address_and_bytes() {
        let mut out = Vec::new();
        let mut writer = ListingWriter::new(&mut out, 24);
        writer
            .write_line(ListingLine {
                detail: ListingDetail::Object {
                    loc: Address::absolute(0x200),
                    bytes: &[0x05, 0xC0],
                },
                stmt_num: 2,
                source: "         BALR  12,0",
            })
            .expect("write listing line");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("000200"));
        assert!(text.contains("05C0"));
        assert!(text.contains("BALR"));
    }

    #[test]
    fn long_constants_truncate_to_eight_bytes() {
        let mut out = Vec::new();
        let mut writer = ListingWriter::new(&mut out, 24);
        let bytes = [0xAAu8; 12];
        writer
            .write_line(ListingLine {
                detail: ListingDetail::Object {
                    loc: Address::absolute(0),
                    bytes: &bytes,
                },
                stmt_num: 1,
                source: "X        DC    XL12'AA'",
            })
            .expect("write listing line");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("AAAAAAAAAAAAAAAA"));
        assert!(!text.contains("AAAAAAAAAAAAAAAAAA"));
    }

    #[test]
    fn reserve_line_keeps_wide_size() {
        let mut out = Vec::new();
        let mut writer = ListingWriter::new(&mut out, 31);
        writer
            .write_line(ListingLine {
                detail: ListingDetail::Reserve {
                    loc: Address::absolute(0x010000),
                    length: 0x123456,
                },
                stmt_num: 4,
                source: "BUF      DS    XL1193046",
            })
            .expect("write listing line");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("00010000"));
        assert!(text.contains("+123456"));
    }

    #[test]
    fn addr_widths_follow_mode() {
        assert_eq!(format_addr(0x1FF, 24), "0001FF");
        assert_eq!(format_addr(0x1FF, 31), "000001FF");
        assert_eq!(format_addr(0x1FF, 64), "000001FF");
        assert_eq!(format_addr(0x1_0000_0000, 64), "0000000100000000");
    }
}
