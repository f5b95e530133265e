// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! asm370: a multi-pass cross-assembler for S/370, ESA/390 and
//! z/Architecture targets.

pub mod assembler;
pub mod core;
