// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and argument validation.

use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, ValueEnum};

use crate::core::assembler::error::{AsmError, AsmErrorKind, AsmRunError};
use crate::core::insn::ArchLevel;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LONG_ABOUT: &str =
    "Cross-assembler for the mainframe architecture line: System/370, ESA/390 and
z/Architecture, aimed at bare-metal and IPL programs.

Outputs are opt-in: specify any of -l/--list, -b/--image, -d/--deck, -r/--rc or
--ldipl. If no outputs are selected, the assembler defaults to list+image.
Use -o/--outfile to set the output base name when filenames are omitted.
With multiple inputs, -o must be a directory and explicit output filenames are
not allowed.";

#[derive(Parser, Debug)]
#[command(
    name = "asm370",
    version = VERSION,
    about = "Mainframe cross-assembler (S/370, ESA/390, z/Architecture) for bare-metal programs",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(
        long = "format",
        value_enum,
        default_value_t = OutputFormat::Text,
        long_help = "Select global CLI output format. text is default; json enables machine-readable diagnostics."
    )]
    pub format: OutputFormat,
    #[arg(
        short = 'q',
        long = "quiet",
        action = ArgAction::SetTrue,
        long_help = "Suppress diagnostic output for successful assembly runs. Errors are still reported."
    )]
    pub quiet: bool,
    #[arg(
        short = 'w',
        long = "no-warn",
        action = ArgAction::SetTrue,
        conflicts_with = "warn_error",
        long_help = "Suppress warning diagnostics."
    )]
    pub no_warn: bool,
    #[arg(
        long = "Werror",
        action = ArgAction::SetTrue,
        long_help = "Treat warnings as errors (non-zero exit status)."
    )]
    pub warn_error: bool,
    #[arg(
        long = "arch",
        value_enum,
        default_value_t = ArchChoice::S370,
        long_help = "Target architecture level. Instructions above the selected level are rejected. \
                     Levels: s370 (24-bit), e390 (31-bit), z (64-bit)."
    )]
    pub arch: ArchChoice,
    #[arg(
        long = "addr",
        value_name = "BITS",
        long_help = "Override the addressing width in bits (16-64). Defaults to the width implied by --arch: 24 for s370, 31 for e390, 64 for z."
    )]
    pub addr: Option<u32>,
    #[arg(
        long = "case-sensitive",
        action = ArgAction::SetTrue,
        long_help = "Treat symbol names case-sensitively. By default names are folded to upper case."
    )]
    pub case_sensitive: bool,
    #[arg(
        long = "fail-fast",
        action = ArgAction::SetTrue,
        long_help = "Stop after the first phase that reports errors instead of collecting diagnostics across the whole run."
    )]
    pub fail_fast: bool,
    #[arg(
        long = "legacy-direct",
        action = ArgAction::SetTrue,
        long_help = "Seed base addressing with registers 0-7 anchored at 0..32K instead of register 0 only. Matches early bare-metal monitors."
    )]
    pub legacy_direct: bool,
    #[arg(
        short = 'l',
        long = "list",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit a listing file. FILE is optional; when omitted, the output base is used and a .lst extension is added."
    )]
    pub list_name: Option<String>,
    #[arg(
        short = 'b',
        long = "image",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit the raw storage image (regions in declaration order). FILE is optional; defaults to the output base with a .bin extension."
    )]
    pub image_name: Option<String>,
    #[arg(
        short = 'd',
        long = "deck",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit an object deck of 80-byte ESD/TXT/END records. FILE is optional; defaults to the output base with a .deck extension."
    )]
    pub deck_name: Option<String>,
    #[arg(
        short = 'r',
        long = "rc",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit a Hercules console script that stores the image into memory. FILE is optional; defaults to the output base with a .rc extension."
    )]
    pub rc_name: Option<String>,
    #[arg(
        long = "ldipl",
        value_name = "DIR",
        long_help = "Emit a list-directed IPL directory: one .bin per non-empty region plus IPLPOINTS.txt naming their load addresses, entry region first."
    )]
    pub ldipl_dir: Option<PathBuf>,
    #[arg(
        short = 'o',
        long = "outfile",
        value_name = "PATH",
        long_help = "Output base name for outputs whose filenames are omitted. With multiple inputs, PATH must be a directory."
    )]
    pub outfile: Option<PathBuf>,
    #[arg(
        value_name = "FILE",
        required = true,
        num_args = 1..,
        long_help = "Assembler source files. Each input is assembled independently."
    )]
    pub inputs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ArchChoice {
    S370,
    E390,
    Z,
}

impl ArchChoice {
    pub fn level(self) -> ArchLevel {
        match self {
            ArchChoice::S370 => ArchLevel::S370,
            ArchChoice::E390 => ArchLevel::Esa390,
            ArchChoice::Z => ArchLevel::ZArch,
        }
    }
}

/// Output plan for one input file, with every path fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub input: PathBuf,
    pub list: Option<PathBuf>,
    pub image: Option<PathBuf>,
    pub deck: Option<PathBuf>,
    pub rc: Option<PathBuf>,
    pub ldipl: Option<PathBuf>,
}

/// Validated run configuration shared by all jobs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub arch: ArchLevel,
    pub addr_width: u32,
    pub case_sensitive: bool,
    pub fail_fast: bool,
    pub legacy_direct: bool,
    pub jobs: Vec<Job>,
}

fn cli_error(message: &str, param: Option<&str>) -> AsmRunError {
    AsmRunError::new(
        AsmError::new(AsmErrorKind::Cli, message, param),
        Vec::new(),
        Vec::new(),
    )
}

/// Base path for one input's derived output names.
fn output_base(input: &Path, outfile: Option<&Path>, multiple: bool) -> PathBuf {
    match outfile {
        Some(out) if multiple => {
            let stem = input.file_stem().unwrap_or_default();
            out.join(stem)
        }
        Some(out) => out.to_path_buf(),
        None => input.with_extension(""),
    }
}

fn resolve_name(selected: Option<&str>, base: &Path, ext: &str) -> Option<PathBuf> {
    match selected {
        None => None,
        Some("") => Some(base.with_extension(ext)),
        Some(name) => Some(PathBuf::from(name)),
    }
}

/// Validate arguments and expand them into per-input jobs.
pub fn validate_cli(cli: &Cli) -> Result<RunConfig, AsmRunError> {
    let multiple = cli.inputs.len() > 1;
    if multiple {
        let explicit = [&cli.list_name, &cli.image_name, &cli.deck_name, &cli.rc_name]
            .iter()
            .any(|n| matches!(n, Some(name) if !name.is_empty()));
        if explicit {
            return Err(cli_error(
                "explicit output filenames are not allowed with multiple inputs",
                None,
            ));
        }
        if cli.ldipl_dir.is_some() {
            return Err(cli_error(
                "--ldipl is not allowed with multiple inputs",
                None,
            ));
        }
        if let Some(out) = &cli.outfile {
            if !out.is_dir() {
                return Err(cli_error(
                    "with multiple inputs -o must name a directory",
                    out.to_str(),
                ));
            }
        }
    }

    let addr_width = match cli.addr {
        None => cli.arch.level().addr_width(),
        Some(bits) if (16..=64).contains(&bits) => bits,
        Some(bits) => {
            return Err(cli_error(
                "addressing width must be between 16 and 64 bits",
                Some(&bits.to_string()),
            ))
        }
    };

    let none_selected = cli.list_name.is_none()
        && cli.image_name.is_none()
        && cli.deck_name.is_none()
        && cli.rc_name.is_none()
        && cli.ldipl_dir.is_none();

    let mut jobs = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        let base = output_base(input, cli.outfile.as_deref(), multiple);
        let job = if none_selected {
            Job {
                input: input.clone(),
                list: Some(base.with_extension("lst")),
                image: Some(base.with_extension("bin")),
                deck: None,
                rc: None,
                ldipl: None,
            }
        } else {
            Job {
                input: input.clone(),
                list: resolve_name(cli.list_name.as_deref(), &base, "lst"),
                image: resolve_name(cli.image_name.as_deref(), &base, "bin"),
                deck: resolve_name(cli.deck_name.as_deref(), &base, "deck"),
                rc: resolve_name(cli.rc_name.as_deref(), &base, "rc"),
                ldipl: cli.ldipl_dir.clone(),
            }
        };
        jobs.push(job);
    }

    Ok(RunConfig {
        arch: cli.arch.level(),
        addr_width,
        case_sensitive: cli.case_sensitive,
        fail_fast: cli.fail_fast,
        legacy_direct: cli.legacy_direct,
        jobs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("asm370").chain(args.iter().copied()))
            .expect("arguments parse")
    }

    #[test]
    fn defaults_to_listing_and_image() {
        let cli = parse(&["boot.asm"]);
        let config = validate_cli(&cli).expect("valid");
        assert_eq!(config.jobs.len(), 1);
        let job = &config.jobs[0];
        assert_eq!(job.list, Some(PathBuf::from("boot.lst")));
        assert_eq!(job.image, Some(PathBuf::from("boot.bin")));
        assert_eq!(job.deck, None);
        assert_eq!(config.arch, ArchLevel::S370);
        assert_eq!(config.addr_width, 24);
    }

    #[test]
    fn explicit_selection_disables_the_defaults() {
        let cli = parse(&["boot.asm", "-d"]);
        let config = validate_cli(&cli).expect("valid");
        let job = &config.jobs[0];
        assert_eq!(job.list, None);
        assert_eq!(job.image, None);
        assert_eq!(job.deck, Some(PathBuf::from("boot.deck")));
    }

    #[test]
    fn outfile_rebases_derived_names() {
        let cli = parse(&["-l", "-r", "-o", "out/boot", "boot.asm"]);
        let config = validate_cli(&cli).expect("valid");
        let job = &config.jobs[0];
        assert_eq!(job.list, Some(PathBuf::from("out/boot.lst")));
        assert_eq!(job.rc, Some(PathBuf::from("out/boot.rc")));
    }

    #[test]
    fn explicit_filenames_pass_through() {
        let cli = parse(&["--deck", "cards.obj", "boot.asm"]);
        let config = validate_cli(&cli).expect("valid");
        assert_eq!(config.jobs[0].deck, Some(PathBuf::from("cards.obj")));
    }

    #[test]
    fn arch_sets_the_addressing_width() {
        let cli = parse(&["--arch", "z", "boot.asm"]);
        let config = validate_cli(&cli).expect("valid");
        assert_eq!(config.arch, ArchLevel::ZArch);
        assert_eq!(config.addr_width, 64);

        let cli = parse(&["--arch", "e390", "--addr", "24", "boot.asm"]);
        let config = validate_cli(&cli).expect("valid");
        assert_eq!(config.addr_width, 24);
    }

    #[test]
    fn out_of_range_addr_is_rejected() {
        let cli = parse(&["--addr", "128", "boot.asm"]);
        assert!(validate_cli(&cli).is_err());
    }

    #[test]
    fn multiple_inputs_refuse_explicit_filenames() {
        let cli = parse(&["--deck", "cards.obj", "a.asm", "b.asm"]);
        assert!(validate_cli(&cli).is_err());

        let cli = parse(&["a.asm", "b.asm", "-d"]);
        let config = validate_cli(&cli).expect("valid");
        assert_eq!(config.jobs[0].deck, Some(PathBuf::from("a.deck")));
        assert_eq!(config.jobs[1].deck, Some(PathBuf::from("b.deck")));
    }

    #[test]
    fn werror_conflicts_with_no_warn() {
        let result =
            Cli::try_parse_from(["asm370", "-w", "--Werror", "boot.asm"]);
        assert!(result.is_err());
    }
}
