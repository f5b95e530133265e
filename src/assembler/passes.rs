// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Assembler run orchestration.
//!
//! This module owns the CLI-driven run flow: source loading, engine
//! invocation, listing generation, and output file emission.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use crate::core::assembler::error::{
    AsmError, AsmErrorKind, AsmRunError, AsmRunReport, Diagnostic, Severity,
};
use crate::core::assembler::listing::{ListingDetail, ListingLine, ListingWriter};
use crate::core::symbols::SymbolValue;

use super::cli::{validate_cli, Cli, Job, RunConfig, VERSION};
use super::engine::Assembler;
use super::output;
use super::statement::{Statement, StmtKind};

/// Run the assembler with command-line arguments.
pub(super) fn run() -> Result<Vec<AsmRunReport>, AsmRunError> {
    let cli = Cli::parse();
    run_with_cli(&cli)
}

pub(super) fn run_with_cli(cli: &Cli) -> Result<Vec<AsmRunReport>, AsmRunError> {
    let config = validate_cli(cli)?;

    let mut reports = Vec::new();
    for job in &config.jobs {
        reports.push(run_one(job, &config)?);
    }

    if cli.warn_error {
        let mut warning_diags = Vec::new();
        let mut source_lines = Vec::new();
        for report in &reports {
            if source_lines.is_empty() {
                source_lines = report.source_lines().to_vec();
            }
            for diag in report.diagnostics() {
                if diag.severity() == Severity::Warning {
                    let mut warning = diag.clone().with_note("escalated by --Werror");
                    warning.severity = Severity::Error;
                    warning_diags.push(warning);
                }
            }
        }
        if !warning_diags.is_empty() {
            return Err(AsmRunError::new(
                AsmError::new(
                    AsmErrorKind::Assembler,
                    "Warnings treated as errors (--Werror)",
                    None,
                ),
                warning_diags,
                source_lines,
            ));
        }
    }

    Ok(reports)
}

fn io_error(message: &str, path: &Path, err: &std::io::Error) -> AsmRunError {
    AsmRunError::new(
        AsmError::new(
            AsmErrorKind::Io,
            message,
            Some(&format!("{}: {}", path.display(), err)),
        ),
        Vec::new(),
        Vec::new(),
    )
}

fn run_one(job: &Job, config: &RunConfig) -> Result<AsmRunReport, AsmRunError> {
    let text = fs::read_to_string(&job.input)
        .map_err(|e| io_error("Cannot read source file", &job.input, &e))?;
    let lines: Vec<String> = text.lines().map(str::to_string).collect();

    let mut asm = Assembler::new(config.arch, config.case_sensitive);
    asm.fail_fast = config.fail_fast;
    asm.legacy_direct = config.legacy_direct;
    let counts = asm.assemble(&lines);

    if let Some(path) = &job.list {
        write_listing(path, job, config, &asm, &counts, &lines)?;
    }
    // Object outputs are still written when statement errors occurred:
    // surviving sections carry correct code and the diagnostics (plus the
    // exit status) flag the failures.
    if let Some(path) = &job.image {
        fs::write(path, asm.image().bytes())
            .map_err(|e| io_error("Cannot write image file", path, &e))?;
    }
    if let Some(path) = &job.deck {
        fs::write(path, output::build_deck(asm.image()))
            .map_err(|e| io_error("Cannot write object deck", path, &e))?;
    }
    if let Some(path) = &job.rc {
        let name = job
            .input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        fs::write(path, output::build_rc(asm.image(), name))
            .map_err(|e| io_error("Cannot write RC script", path, &e))?;
    }
    if let Some(dir) = &job.ldipl {
        fs::create_dir_all(dir).map_err(|e| io_error("Cannot create IPL directory", dir, &e))?;
        for (name, bytes) in output::build_ldipl(asm.image()) {
            let path = dir.join(&name);
            fs::write(&path, bytes).map_err(|e| io_error("Cannot write IPL file", &path, &e))?;
        }
    }

    let source = Arc::new(lines);
    let file = job.input.display().to_string();
    let diagnostics = asm
        .take_diagnostics()
        .into_iter()
        .map(|d| d.with_file(Some(file.clone())))
        .collect();
    Ok(AsmRunReport::new(diagnostics, source))
}

fn write_listing(
    path: &Path,
    job: &Job,
    config: &RunConfig,
    asm: &Assembler,
    counts: &crate::core::assembler::error::PassCounts,
    lines: &[String],
) -> Result<(), AsmRunError> {
    let file = fs::File::create(path).map_err(|e| io_error("Cannot write listing", path, &e))?;
    let mut writer = ListingWriter::new(file, config.addr_width);
    let title = format!(
        "asm370 {}  {}  ({})",
        VERSION,
        job.input.display(),
        config.arch
    );
    let emit = |e: std::io::Error| io_error("Cannot write listing", path, &e);
    writer.header(&title).map_err(emit)?;

    let mut by_line: BTreeMap<u32, Vec<&Diagnostic>> = BTreeMap::new();
    for diag in asm.diagnostics() {
        by_line.entry(diag.line()).or_default().push(diag);
    }

    for stmt in asm.statements() {
        writer
            .write_line(ListingLine {
                detail: statement_detail(asm, stmt),
                stmt_num: stmt.number,
                source: &stmt.source,
            })
            .map_err(emit)?;
        if let Some(diags) = by_line.remove(&stmt.line) {
            for diag in diags {
                let kind = match diag.severity() {
                    Severity::Warning => "WARNING",
                    Severity::Error => "ERROR",
                };
                writer
                    .write_diagnostic(kind, diag.message(), diag.line(), diag.column(), lines)
                    .map_err(emit)?;
            }
        }
    }
    // Diagnostics with no statement of their own (line 0 run-level
    // failures) trail the statement lines.
    for diags in by_line.values() {
        for diag in diags {
            let kind = match diag.severity() {
                Severity::Warning => "WARNING",
                Severity::Error => "ERROR",
            };
            writer
                .write_diagnostic(kind, diag.message(), diag.line(), diag.column(), lines)
                .map_err(emit)?;
        }
    }

    writer
        .footer(counts, asm.symbols(), asm.image().bytes().len())
        .map_err(emit)?;
    Ok(())
}

/// Location/object columns for one statement.
fn statement_detail<'a>(asm: &'a Assembler, stmt: &'a Statement) -> ListingDetail<'a> {
    if stmt.is_errored() {
        return ListingDetail::None;
    }
    match &stmt.kind {
        StmtKind::Data { operands, reserve } => {
            let (sid, first, loc) = match (stmt.section, stmt.binary, stmt.loc) {
                (Some(sid), Some(first), Some(loc)) => (sid, first, loc),
                _ => return ListingDetail::None,
            };
            let binaries = asm.image().section(sid).binaries();
            if *reserve {
                let length = binaries[first..first + operands.len()]
                    .iter()
                    .map(|b| b.length())
                    .sum();
                ListingDetail::Reserve { loc, length }
            } else {
                ListingDetail::Object {
                    loc,
                    bytes: binaries[first].bytes(),
                }
            }
        }
        StmtKind::Machine { .. } => match (stmt.section, stmt.binary, stmt.loc) {
            (Some(sid), Some(index), Some(loc)) => ListingDetail::Object {
                loc,
                bytes: asm.image().section(sid).binaries()[index].bytes(),
            },
            _ => ListingDetail::None,
        },
        StmtKind::Equ { .. } => ListingDetail::Equate {
            text: equate_text(asm, stmt.label.as_deref()),
        },
        _ => ListingDetail::None,
    }
}

fn equate_text(asm: &Assembler, label: Option<&str>) -> String {
    let entry = label.and_then(|l| asm.symbols().lookup(l));
    match entry.map(|e| e.value) {
        Some(SymbolValue::Int(n)) => format!("{:X}", n),
        Some(SymbolValue::Addr(a)) => format!("{}", a),
        _ => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("asm370-{}-{}", tag, std::process::id()));
        fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    fn write_source(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, lines.join("\n")).expect("write source");
        path
    }

    fn parse(args: &[String]) -> Cli {
        Cli::try_parse_from(std::iter::once("asm370".to_string()).chain(args.iter().cloned()))
            .expect("arguments parse")
    }

    #[test]
    fn default_run_writes_listing_and_image() {
        let dir = scratch_dir("default");
        let input = write_source(
            &dir,
            "boot.asm",
            &[
                "BOOT     START X'1000'",
                "         USING BOOT,12",
                "         L     3,DATA",
                "DATA     DC    F'7'",
                "         END",
            ],
        );
        let cli = parse(&[input.to_string_lossy().into_owned()]);
        let reports = run_with_cli(&cli).expect("run succeeds");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].error_count(), 0);

        let image = fs::read(dir.join("boot.bin")).expect("image written");
        assert_eq!(image, vec![0x58, 0x30, 0xC0, 0x04, 0x00, 0x00, 0x00, 0x07]);

        let listing = fs::read_to_string(dir.join("boot.lst")).expect("listing written");
        assert!(listing.contains("LOC"));
        assert!(listing.contains("5830C004"));
        assert!(listing.contains("SYMBOL TABLE"));
        assert!(listing.contains("DATA"));
        assert!(listing.contains("CROSS REFERENCE"));
    }

    #[test]
    fn statement_errors_surface_in_report_and_listing() {
        let dir = scratch_dir("errors");
        let input = write_source(
            &dir,
            "bad.asm",
            &[
                "         START 0",
                "         L     3,NOWHERE",
                "         END",
            ],
        );
        let cli = parse(&[input.to_string_lossy().into_owned()]);
        let reports = run_with_cli(&cli).expect("run completes");
        assert_eq!(reports[0].error_count(), 1);
        let listing = fs::read_to_string(dir.join("bad.lst")).expect("listing written");
        assert!(listing.contains("ERROR"));
        assert!(listing.contains("NOWHERE"));
    }

    #[test]
    fn werror_escalates_warnings() {
        let dir = scratch_dir("werror");
        let input = write_source(
            &dir,
            "warn.asm",
            &["HDR      TITLE 'X'", "         DC    X'00'", "         END"],
        );
        let cli = parse(&["--Werror".to_string(), input.to_string_lossy().into_owned()]);
        let err = run_with_cli(&cli).expect_err("warnings escalate");
        assert_eq!(err.diagnostics().len(), 1);
        assert_eq!(err.diagnostics()[0].severity(), Severity::Error);
    }

    #[test]
    fn ldipl_directory_is_populated() {
        let dir = scratch_dir("ldipl");
        let input = write_source(
            &dir,
            "two.asm",
            &[
                "LOW      REGION X'200'",
                "A        CSECT",
                "         DC    X'AA'",
                "         END",
            ],
        );
        let ipl = dir.join("ipl");
        let cli = parse(&[
            "--ldipl".to_string(),
            ipl.to_string_lossy().into_owned(),
            input.to_string_lossy().into_owned(),
        ]);
        run_with_cli(&cli).expect("run succeeds");
        let control = fs::read_to_string(ipl.join("IPLPOINTS.txt")).expect("control file");
        assert_eq!(control, "LOW.bin 000200\n");
        assert_eq!(fs::read(ipl.join("LOW.bin")).expect("region file"), vec![0xAA]);
    }
}
