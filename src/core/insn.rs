// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Machine-instruction metadata: formats, architecture levels and the
//! mnemonic table.
//!
//! The table is a representative subset of the S/370, ESA/390 and
//! z/Architecture problem-state instruction sets. Extended branch
//! mnemonics carry a preset first nibble instead of a mask operand.

/// Architecture ladder. Each level includes everything below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArchLevel {
    S370,
    Esa390,
    ZArch,
}

impl ArchLevel {
    /// Default addressing width in bits.
    pub fn addr_width(self) -> u32 {
        match self {
            ArchLevel::S370 => 24,
            ArchLevel::Esa390 => 31,
            ArchLevel::ZArch => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ArchLevel::S370 => "s370",
            ArchLevel::Esa390 => "e390",
            ArchLevel::ZArch => "z",
        }
    }

    pub fn parse(text: &str) -> Option<ArchLevel> {
        match text.to_ascii_lowercase().as_str() {
            "s370" | "370" => Some(ArchLevel::S370),
            "e390" | "esa390" | "390" => Some(ArchLevel::Esa390),
            "z" | "zarch" | "z900" => Some(ArchLevel::ZArch),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArchLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ArchLevel::S370 => "S/370",
            ArchLevel::Esa390 => "ESA/390",
            ArchLevel::ZArch => "z/Architecture",
        };
        write!(f, "{}", text)
    }
}

/// Instruction formats carried by the table.
///
/// `Ss1` is the one-length storage-to-storage form, `Ss2` the
/// two-length form. `S`, `Rre` and `Ril`/`Ri` carry wide opcodes; the
/// encoder splits them back into op and extension fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsnFormat {
    Rr,
    I,
    Rx,
    Rs,
    Si,
    S,
    Ss1,
    Ss2,
    Ri,
    Rre,
    Ril,
}

impl InsnFormat {
    /// Instruction length in bytes.
    pub fn length(self) -> u32 {
        match self {
            InsnFormat::Rr | InsnFormat::I => 2,
            InsnFormat::Rx
            | InsnFormat::Rs
            | InsnFormat::Si
            | InsnFormat::S
            | InsnFormat::Ri
            | InsnFormat::Rre => 4,
            InsnFormat::Ss1 | InsnFormat::Ss2 | InsnFormat::Ril => 6,
        }
    }

    const fn default_operands(self) -> u8 {
        match self {
            InsnFormat::I | InsnFormat::S => 1,
            InsnFormat::Rr
            | InsnFormat::Rx
            | InsnFormat::Si
            | InsnFormat::Ss1
            | InsnFormat::Ss2
            | InsnFormat::Ri
            | InsnFormat::Rre
            | InsnFormat::Ril => 2,
            InsnFormat::Rs => 3,
        }
    }
}

/// One table row.
#[derive(Debug, Clone)]
pub struct InsnDef {
    pub mnemonic: &'static str,
    pub format: InsnFormat,
    /// Opcode; wide formats pack the extension into the low bits
    /// (`0xA7A` is opcode `A7` with extension `A`).
    pub opcode: u16,
    /// Preset first nibble for extended mnemonics (condition masks).
    pub fixed: Option<u8>,
    /// Written operand count.
    pub operands: u8,
    /// Immediate operand is halfword-relative to the instruction.
    pub rel: bool,
    /// Minimum architecture level.
    pub level: ArchLevel,
}

impl InsnDef {
    pub fn length(&self) -> u32 {
        self.format.length()
    }
}

const fn insn(mnemonic: &'static str, format: InsnFormat, opcode: u16, level: ArchLevel) -> InsnDef {
    InsnDef {
        mnemonic,
        format,
        opcode,
        fixed: None,
        operands: format.default_operands(),
        rel: false,
        level,
    }
}

const fn ext(
    mnemonic: &'static str,
    format: InsnFormat,
    opcode: u16,
    fixed: u8,
    level: ArchLevel,
) -> InsnDef {
    InsnDef {
        mnemonic,
        format,
        opcode,
        fixed: Some(fixed),
        operands: format.default_operands() - 1,
        rel: false,
        level,
    }
}

const fn shift(mnemonic: &'static str, opcode: u16) -> InsnDef {
    InsnDef {
        mnemonic,
        format: InsnFormat::Rs,
        opcode,
        fixed: None,
        operands: 2,
        rel: false,
        level: ArchLevel::S370,
    }
}

const fn rel(mnemonic: &'static str, format: InsnFormat, opcode: u16, level: ArchLevel) -> InsnDef {
    InsnDef {
        mnemonic,
        format,
        opcode,
        fixed: None,
        operands: format.default_operands(),
        rel: true,
        level,
    }
}

const fn relext(
    mnemonic: &'static str,
    format: InsnFormat,
    opcode: u16,
    fixed: u8,
    level: ArchLevel,
) -> InsnDef {
    InsnDef {
        mnemonic,
        format,
        opcode,
        fixed: Some(fixed),
        operands: format.default_operands() - 1,
        rel: true,
        level,
    }
}

use ArchLevel::{Esa390, S370, ZArch};
use InsnFormat::{Rr, Rs, Rx, Si, Ss1, Ss2, I, Ri, Ril, Rre, S};

pub static INSN_TABLE: &[InsnDef] = &[
    // RR
    insn("BALR", Rr, 0x05, S370),
    insn("BCTR", Rr, 0x06, S370),
    insn("BCR", Rr, 0x07, S370),
    insn("BASR", Rr, 0x0D, S370),
    insn("MVCL", Rr, 0x0E, S370),
    insn("CLCL", Rr, 0x0F, S370),
    insn("LPR", Rr, 0x10, S370),
    insn("LNR", Rr, 0x11, S370),
    insn("LTR", Rr, 0x12, S370),
    insn("LCR", Rr, 0x13, S370),
    insn("NR", Rr, 0x14, S370),
    insn("CLR", Rr, 0x15, S370),
    insn("OR", Rr, 0x16, S370),
    insn("XR", Rr, 0x17, S370),
    insn("LR", Rr, 0x18, S370),
    insn("CR", Rr, 0x19, S370),
    insn("AR", Rr, 0x1A, S370),
    insn("SR", Rr, 0x1B, S370),
    insn("MR", Rr, 0x1C, S370),
    insn("DR", Rr, 0x1D, S370),
    insn("ALR", Rr, 0x1E, S370),
    insn("SLR", Rr, 0x1F, S370),
    ext("BR", Rr, 0x07, 15, S370),
    ext("NOPR", Rr, 0x07, 0, S370),
    // I
    insn("SVC", I, 0x0A, S370),
    // RX
    insn("STH", Rx, 0x40, S370),
    insn("LA", Rx, 0x41, S370),
    insn("STC", Rx, 0x42, S370),
    insn("IC", Rx, 0x43, S370),
    insn("EX", Rx, 0x44, S370),
    insn("BAL", Rx, 0x45, S370),
    insn("BCT", Rx, 0x46, S370),
    insn("BC", Rx, 0x47, S370),
    insn("LH", Rx, 0x48, S370),
    insn("CH", Rx, 0x49, S370),
    insn("AH", Rx, 0x4A, S370),
    insn("SH", Rx, 0x4B, S370),
    insn("MH", Rx, 0x4C, S370),
    insn("CVD", Rx, 0x4E, S370),
    insn("CVB", Rx, 0x4F, S370),
    insn("ST", Rx, 0x50, S370),
    insn("N", Rx, 0x54, S370),
    insn("CL", Rx, 0x55, S370),
    insn("O", Rx, 0x56, S370),
    insn("X", Rx, 0x57, S370),
    insn("L", Rx, 0x58, S370),
    insn("C", Rx, 0x59, S370),
    insn("A", Rx, 0x5A, S370),
    insn("S", Rx, 0x5B, S370),
    insn("M", Rx, 0x5C, S370),
    insn("D", Rx, 0x5D, S370),
    insn("AL", Rx, 0x5E, S370),
    insn("SL", Rx, 0x5F, S370),
    ext("B", Rx, 0x47, 15, S370),
    ext("NOP", Rx, 0x47, 0, S370),
    ext("BH", Rx, 0x47, 2, S370),
    ext("BL", Rx, 0x47, 4, S370),
    ext("BE", Rx, 0x47, 8, S370),
    ext("BO", Rx, 0x47, 1, S370),
    ext("BM", Rx, 0x47, 4, S370),
    ext("BZ", Rx, 0x47, 8, S370),
    ext("BP", Rx, 0x47, 2, S370),
    ext("BNH", Rx, 0x47, 13, S370),
    ext("BNL", Rx, 0x47, 11, S370),
    ext("BNE", Rx, 0x47, 7, S370),
    ext("BNO", Rx, 0x47, 14, S370),
    ext("BNM", Rx, 0x47, 11, S370),
    ext("BNP", Rx, 0x47, 13, S370),
    ext("BNZ", Rx, 0x47, 7, S370),
    // RS
    insn("BXH", Rs, 0x86, S370),
    insn("BXLE", Rs, 0x87, S370),
    shift("SRL", 0x88),
    shift("SLL", 0x89),
    shift("SRA", 0x8A),
    shift("SLA", 0x8B),
    shift("SRDL", 0x8C),
    shift("SLDL", 0x8D),
    shift("SRDA", 0x8E),
    shift("SLDA", 0x8F),
    insn("STM", Rs, 0x90, S370),
    insn("LM", Rs, 0x98, S370),
    insn("CLM", Rs, 0xBD, S370),
    insn("STCM", Rs, 0xBE, S370),
    insn("ICM", Rs, 0xBF, S370),
    // SI
    insn("TM", Si, 0x91, S370),
    insn("MVI", Si, 0x92, S370),
    insn("NI", Si, 0x94, S370),
    insn("CLI", Si, 0x95, S370),
    insn("OI", Si, 0x96, S370),
    insn("XI", Si, 0x97, S370),
    // S
    insn("SSM", S, 0x8000, S370),
    insn("LPSW", S, 0x8200, S370),
    insn("TS", S, 0x9300, S370),
    // SS, one length
    insn("MVN", Ss1, 0xD1, S370),
    insn("MVC", Ss1, 0xD2, S370),
    insn("MVZ", Ss1, 0xD3, S370),
    insn("NC", Ss1, 0xD4, S370),
    insn("CLC", Ss1, 0xD5, S370),
    insn("OC", Ss1, 0xD6, S370),
    insn("XC", Ss1, 0xD7, S370),
    insn("TR", Ss1, 0xDC, S370),
    insn("TRT", Ss1, 0xDD, S370),
    insn("ED", Ss1, 0xDE, S370),
    insn("EDMK", Ss1, 0xDF, S370),
    // SS, two lengths
    insn("MVO", Ss2, 0xF1, S370),
    insn("PACK", Ss2, 0xF2, S370),
    insn("UNPK", Ss2, 0xF3, S370),
    insn("ZAP", Ss2, 0xF8, S370),
    insn("CP", Ss2, 0xF9, S370),
    insn("AP", Ss2, 0xFA, S370),
    insn("SP", Ss2, 0xFB, S370),
    insn("MP", Ss2, 0xFC, S370),
    insn("DP", Ss2, 0xFD, S370),
    // RI
    insn("TMH", Ri, 0xA70, Esa390),
    insn("TML", Ri, 0xA71, Esa390),
    rel("BRC", Ri, 0xA74, Esa390),
    rel("BRAS", Ri, 0xA75, Esa390),
    insn("LHI", Ri, 0xA78, Esa390),
    insn("AHI", Ri, 0xA7A, Esa390),
    insn("MHI", Ri, 0xA7C, Esa390),
    insn("CHI", Ri, 0xA7E, Esa390),
    relext("J", Ri, 0xA74, 15, Esa390),
    relext("JNOP", Ri, 0xA74, 0, Esa390),
    relext("JE", Ri, 0xA74, 8, Esa390),
    relext("JZ", Ri, 0xA74, 8, Esa390),
    relext("JH", Ri, 0xA74, 2, Esa390),
    relext("JL", Ri, 0xA74, 4, Esa390),
    relext("JO", Ri, 0xA74, 1, Esa390),
    relext("JM", Ri, 0xA74, 4, Esa390),
    relext("JP", Ri, 0xA74, 2, Esa390),
    relext("JNE", Ri, 0xA74, 7, Esa390),
    relext("JNZ", Ri, 0xA74, 7, Esa390),
    relext("JNH", Ri, 0xA74, 13, Esa390),
    relext("JNL", Ri, 0xA74, 11, Esa390),
    // RRE
    insn("MSR", Rre, 0xB252, Esa390),
    insn("LTGR", Rre, 0xB902, ZArch),
    insn("LGR", Rre, 0xB904, ZArch),
    insn("AGR", Rre, 0xB908, ZArch),
    insn("SGR", Rre, 0xB909, ZArch),
    insn("LGFR", Rre, 0xB914, ZArch),
    insn("NGR", Rre, 0xB980, ZArch),
    insn("OGR", Rre, 0xB981, ZArch),
    insn("XGR", Rre, 0xB982, ZArch),
    // RIL
    rel("LARL", Ril, 0xC00, ZArch),
    insn("LGFI", Ril, 0xC01, ZArch),
    rel("BRCL", Ril, 0xC04, ZArch),
    rel("BRASL", Ril, 0xC05, ZArch),
    relext("JG", Ril, 0xC04, 15, ZArch),
];

/// Look up a mnemonic available at `level`.
pub fn lookup(mnemonic: &str, level: ArchLevel) -> Option<&'static InsnDef> {
    INSN_TABLE
        .iter()
        .find(|e| e.level <= level && e.mnemonic.eq_ignore_ascii_case(mnemonic))
}

/// True when the mnemonic exists at any level. Distinguishes "unknown
/// operation" from "not available on this architecture".
pub fn has_mnemonic(mnemonic: &str) -> bool {
    INSN_TABLE
        .iter()
        .any(|e| e.mnemonic.eq_ignore_ascii_case(mnemonic))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_respects_arch_level() {
        assert!(lookup("LR", ArchLevel::S370).is_some());
        assert!(lookup("AHI", ArchLevel::S370).is_none());
        assert!(lookup("AHI", ArchLevel::Esa390).is_some());
        assert!(lookup("LGR", ArchLevel::Esa390).is_none());
        assert!(lookup("LGR", ArchLevel::ZArch).is_some());
        assert!(has_mnemonic("AHI"));
        assert!(!has_mnemonic("FROB"));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(lookup("mvc", ArchLevel::S370).is_some());
        assert!(lookup("Balr", ArchLevel::S370).is_some());
    }

    #[test]
    fn extended_mnemonics_carry_masks() {
        let b = lookup("B", ArchLevel::S370).unwrap();
        assert_eq!(b.opcode, 0x47);
        assert_eq!(b.fixed, Some(15));
        assert_eq!(b.operands, 1);
        let bnh = lookup("BNH", ArchLevel::S370).unwrap();
        assert_eq!(bnh.fixed, Some(13));
        let jg = lookup("JG", ArchLevel::ZArch).unwrap();
        assert_eq!(jg.opcode, 0xC04);
        assert!(jg.rel);
    }

    #[test]
    fn format_lengths() {
        assert_eq!(lookup("LR", ArchLevel::S370).unwrap().length(), 2);
        assert_eq!(lookup("L", ArchLevel::S370).unwrap().length(), 4);
        assert_eq!(lookup("MVC", ArchLevel::S370).unwrap().length(), 6);
        assert_eq!(lookup("LARL", ArchLevel::ZArch).unwrap().length(), 6);
        assert_eq!(lookup("LPSW", ArchLevel::S370).unwrap().length(), 4);
    }

    #[test]
    fn shift_forms_take_two_operands() {
        let sll = lookup("SLL", ArchLevel::S370).unwrap();
        assert_eq!(sll.format, InsnFormat::Rs);
        assert_eq!(sll.operands, 2);
        let lm = lookup("LM", ArchLevel::S370).unwrap();
        assert_eq!(lm.operands, 3);
    }

    #[test]
    fn default_widths_follow_level() {
        assert_eq!(ArchLevel::S370.addr_width(), 24);
        assert_eq!(ArchLevel::Esa390.addr_width(), 31);
        assert_eq!(ArchLevel::ZArch.addr_width(), 64);
        assert_eq!(ArchLevel::parse("370"), Some(ArchLevel::S370));
        assert_eq!(ArchLevel::parse("Z"), Some(ArchLevel::ZArch));
        assert_eq!(ArchLevel::parse("vax"), None);
    }
}
