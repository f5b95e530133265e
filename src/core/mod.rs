// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Target-independent assembler core.
//!
//! - [`addr`] - Addresses and the location counter
//! - [`image`] - Binary / Section / Region / Image content hierarchy
//! - [`symbols`] - Symbol table with attributes and cross-references
//! - [`base`] - Base-register assignment and resolution
//! - [`expr`] - Operand expression parsing and evaluation
//! - [`insn`] - Machine-instruction metadata
//! - [`ebcdic`] - Character-set translation

pub mod addr;
pub mod assembler;
pub mod base;
pub mod ebcdic;
pub mod expr;
pub mod image;
pub mod insn;
pub mod symbols;
