// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Mainframe cross-assembler - main entry point.
//!
//! This module ties together the architecture-neutral core with the
//! statement classifier, the phase engine, and the output builders.

pub mod cli;
mod directives;
mod engine;
mod instruction;
mod output;
mod passes;
mod statement;

pub use cli::{validate_cli, Cli, Job, RunConfig, VERSION};
pub use engine::Assembler;
pub use output::{build_deck, build_ldipl, build_rc};
pub use statement::{Statement, StmtKind, StmtState};

use crate::core::assembler::error::{AsmRunError, AsmRunReport};

/// Run the assembler with command-line arguments.
pub fn run() -> Result<Vec<AsmRunReport>, AsmRunError> {
    passes::run()
}

/// Run the assembler with pre-parsed arguments.
pub fn run_with_cli(cli: &Cli) -> Result<Vec<AsmRunReport>, AsmRunError> {
    passes::run_with_cli(cli)
}
