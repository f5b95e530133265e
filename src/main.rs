// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for asm370.

use clap::Parser;
use serde_json::json;

use asm370::assembler::cli::{Cli, OutputFormat};
use asm370::core::assembler::error::{Diagnostic, Severity};

fn severity_to_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Warning => "warning",
        Severity::Error => "error",
    }
}

fn format_diagnostic_line(
    diag: &Diagnostic,
    source_lines: Option<&[String]>,
    format: OutputFormat,
) -> String {
    if format == OutputFormat::Json {
        json!({
            "code": diag.code(),
            "severity": severity_to_str(diag.severity()),
            "message": diag.message(),
            "file": diag.file(),
            "line": diag.line(),
            "column": diag.column(),
            "notes": diag.notes(),
            "help": diag.help(),
        })
        .to_string()
    } else {
        diag.format_with_context(source_lines)
    }
}

fn emit_diagnostics(
    diagnostics: &[Diagnostic],
    source_lines: &[String],
    cli: &Cli,
) {
    for diag in diagnostics {
        if cli.no_warn && diag.severity() == Severity::Warning {
            continue;
        }
        eprintln!(
            "{}",
            format_diagnostic_line(diag, Some(source_lines), cli.format)
        );
    }
}

fn main() {
    let cli = Cli::parse();

    match asm370::assembler::run_with_cli(&cli) {
        Ok(reports) => {
            let errors: usize = reports.iter().map(|r| r.error_count()).sum();
            if !cli.quiet || errors > 0 {
                for report in &reports {
                    emit_diagnostics(report.diagnostics(), report.source_lines(), &cli);
                }
            }
            if errors > 0 {
                if cli.format != OutputFormat::Json {
                    eprintln!("Errors detected in source.");
                }
                std::process::exit(1);
            }
        }
        Err(err) => {
            emit_diagnostics(err.diagnostics(), err.source_lines(), &cli);
            if cli.format != OutputFormat::Json {
                eprintln!("{err}");
            }
            std::process::exit(1);
        }
    }
}
