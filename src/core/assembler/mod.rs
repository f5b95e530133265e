// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Assembler-facing infrastructure shared by the engine and the driver.
//!
//! - [`error`] - Error types, diagnostics and run reports
//! - [`listing`] - Listing file generation

pub mod error;
pub mod listing;
