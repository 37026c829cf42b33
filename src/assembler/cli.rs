// SPDX-License-Identifier: GPL-3.0-or-later

//! Command-line interface parsing and the top-level run loop.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use crate::assembler::Asm;
use crate::output::{self, EmitError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LONG_ABOUT: &str = "Multi-pass Z80 assembler with macros, local scopes, conditional \
assembly and classic object/tape/disk container outputs.

The output container is selected with -f/--format; the default is a raw \
binary of the used memory range. Symbol and public-symbol dumps are \
opt-in via --symbol and --public.";

#[derive(Parser, Debug)]
#[command(
    name = "z80forge",
    version = VERSION,
    about = "Multi-pass Z80 assembler",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(
        short = 'i',
        long = "infile",
        value_name = "FILE",
        long_help = "Input assembly file."
    )]
    pub infile: PathBuf,
    #[arg(
        short = 'o',
        long = "outfile",
        value_name = "FILE",
        long_help = "Output file name. Defaults to the input base with an extension matching the format."
    )]
    pub outfile: Option<String>,
    #[arg(
        short = 'f',
        long = "format",
        value_enum,
        default_value = "bin",
        long_help = "Output container format."
    )]
    pub format: OutputFormat,
    #[arg(
        long = "symbol",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Dump the symbol table. FILE is optional; when omitted, the output base is used and a .sym extension is added."
    )]
    pub symbol: Option<String>,
    #[arg(
        long = "public",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Dump the PUBLIC symbols. FILE is optional; when omitted, the output base is used and a .pub extension is added."
    )]
    pub public: Option<String>,
    #[arg(
        long = "name",
        value_name = "NAME",
        long_help = "Name stored in tape/disk headers (TAP, TZX, CDT, Amsdos). Defaults to the output base name."
    )]
    pub name: Option<String>,
    #[arg(
        short = 'I',
        long = "include",
        value_name = "DIR",
        action = ArgAction::Append,
        long_help = "Directory searched by INCLUDE and INCBIN (repeatable)."
    )]
    pub include_dirs: Vec<PathBuf>,
    #[arg(
        long = "equ",
        value_name = "NAME[=VAL]",
        action = ArgAction::Append,
        long_help = "Predefine a symbol (repeatable). If VAL is omitted it defaults to FFFFh."
    )]
    pub defines: Vec<String>,
    #[arg(
        long = "nocase",
        action = ArgAction::SetTrue,
        long_help = "Treat identifiers case-insensitively."
    )]
    pub nocase: bool,
    #[arg(
        long = "alocal",
        action = ArgAction::SetTrue,
        long_help = "Enable auto-local mode: names beginning with '_' are scoped to the nearest auto-local block."
    )]
    pub autolocal: bool,
    #[arg(
        long = "bracket",
        action = ArgAction::SetTrue,
        long_help = "Bracket-only mode: parentheses always group expressions; only [] denotes indirection."
    )]
    pub bracket: bool,
    #[arg(
        long = "w8080",
        action = ArgAction::SetTrue,
        long_help = "Warn on Z80 instructions that do not exist on the 8080."
    )]
    pub w8080: bool,
    #[arg(
        long = "86",
        action = ArgAction::SetTrue,
        long_help = "Generate 8086 code translated from the Z80 source."
    )]
    pub mode86: bool,
    #[arg(
        long = "pass3",
        action = ArgAction::SetTrue,
        long_help = "Always run three passes."
    )]
    pub pass3: bool,
    #[arg(
        long = "werror",
        action = ArgAction::SetTrue,
        long_help = "Treat warnings as errors."
    )]
    pub werror: bool,
    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::SetTrue,
        long_help = "Show progress information on stderr."
    )]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Raw binary of the used memory range.
    Bin,
    /// Intel HEX records.
    Hex,
    /// Spectrum TAP tape image.
    Tap,
    /// Spectrum TZX tape image.
    Tzx,
    /// Amstrad CPC CDT tape image.
    Cdt,
    /// Amstrad CPC Amsdos disk file.
    Amsdos,
    /// Spectrum +3DOS disk file.
    Plus3dos,
    /// MSX BLOADable file.
    Msx,
    /// TRS-80 CMD file.
    Cmd,
    /// CP/M PRL relocatable.
    Prl,
    /// SDCC linker REL file.
    Rel,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Bin | OutputFormat::Amsdos | OutputFormat::Plus3dos
            | OutputFormat::Msx => "bin",
            OutputFormat::Hex => "hex",
            OutputFormat::Tap => "tap",
            OutputFormat::Tzx => "tzx",
            OutputFormat::Cdt => "cdt",
            OutputFormat::Cmd => "cmd",
            OutputFormat::Prl => "prl",
            OutputFormat::Rel => "rel",
        }
    }
}

/// Base name of the input file, extension stripped.
fn input_base(cli: &Cli) -> String {
    cli.infile
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "out".to_string())
}

fn resolve_output_path(base: &str, name: Option<&str>, extension: &str) -> Option<String> {
    let name = name?;
    if name.is_empty() {
        return Some(format!("{base}.{extension}"));
    }
    let path = PathBuf::from(name);
    if path.extension().is_none() {
        return Some(format!("{name}.{extension}"));
    }
    Some(name.to_string())
}

fn configure(cli: &Cli) -> Asm {
    let mut asm = Asm::new();
    if cli.nocase {
        asm.case_insensitive();
    }
    if cli.autolocal {
        asm.auto_local();
    }
    if cli.bracket {
        asm.bracket_only();
    }
    if cli.w8080 {
        asm.warn_8080();
    }
    if cli.mode86 {
        asm.set_86();
    }
    if cli.pass3 {
        asm.set_pass3();
    }
    if cli.werror {
        asm.set_werror();
    }
    if cli.verbose {
        asm.set_verbose();
    }
    for dir in &cli.include_dirs {
        asm.add_include_dir(dir.clone());
    }
    let base = input_base(cli);
    asm.set_header_name(cli.name.clone().unwrap_or_else(|| base.clone()));
    asm
}

fn assemble_and_emit(cli: &Cli, asm: &mut Asm) -> Result<(), EmitError> {
    for def in &cli.defines {
        asm.predefine(def)?;
    }
    asm.load_file(&cli.infile)?;
    asm.process()?;

    let base = input_base(cli);
    let out_name = resolve_output_path(
        &base,
        Some(cli.outfile.as_deref().unwrap_or("")),
        cli.format.extension(),
    )
    .unwrap_or_else(|| format!("{base}.{}", cli.format.extension()));

    let mut out = BufWriter::new(File::create(&out_name)?);
    match cli.format {
        OutputFormat::Bin => output::write_raw(asm, &mut out)?,
        OutputFormat::Hex => output::hex::write_hex(asm, &mut out)?,
        OutputFormat::Tap => output::tap::write_tap(asm, &mut out)?,
        OutputFormat::Tzx => output::tzx::write_tzx(asm, &mut out)?,
        OutputFormat::Cdt => output::cdt::write_cdt(asm, &mut out)?,
        OutputFormat::Amsdos => output::amsdos::write_amsdos(asm, &mut out)?,
        OutputFormat::Plus3dos => output::plus3dos::write_plus3dos(asm, &mut out)?,
        OutputFormat::Msx => output::msx::write_msx(asm, &mut out)?,
        OutputFormat::Cmd => output::cmd::write_cmd(asm, &mut out)?,
        OutputFormat::Prl => output::prl::write_prl(asm, &mut out)?,
        OutputFormat::Rel => output::sdrel::write_sdrel(asm, &mut out)?,
    }

    if let Some(path) = resolve_output_path(&base, cli.symbol.as_deref(), "sym") {
        let mut out = BufWriter::new(File::create(path)?);
        output::dump_symbols(asm, &mut out)?;
    }
    if let Some(path) = resolve_output_path(&base, cli.public.as_deref(), "pub") {
        let mut out = BufWriter::new(File::create(path)?);
        output::dump_publics(asm, &mut out)?;
    }
    Ok(())
}

/// Parse the command line, run one assembly, emit the outputs and
/// render diagnostics. Returns the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    let use_color = std::env::var("NO_COLOR").is_err();

    let mut asm = configure(&cli);
    let result = assemble_and_emit(&cli, &mut asm);

    for diag in asm.diagnostics() {
        eprintln!("{}", diag.format_with_context(Some(asm.source()), use_color));
    }

    match result {
        Ok(()) => 0,
        Err(EmitError::Asm(err)) => {
            let diag = crate::core::error::Diagnostic::new(
                err.line(),
                crate::core::error::Severity::Error,
                err.message(),
            );
            eprintln!("{}", diag.format_with_context(Some(asm.source()), use_color));
            1
        }
        Err(EmitError::Io(err)) => {
            eprintln!("ERROR: {err}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_options() {
        let cli = Cli::parse_from([
            "z80forge",
            "-i",
            "prog.asm",
            "-f",
            "tap",
            "-o",
            "out.tap",
            "--name",
            "DEMO",
            "--equ",
            "DEBUG=1",
            "-I",
            "lib",
            "--w8080",
            "--pass3",
        ]);
        assert_eq!(cli.infile, PathBuf::from("prog.asm"));
        assert_eq!(cli.format, OutputFormat::Tap);
        assert_eq!(cli.outfile.as_deref(), Some("out.tap"));
        assert_eq!(cli.name.as_deref(), Some("DEMO"));
        assert_eq!(cli.defines, vec!["DEBUG=1".to_string()]);
        assert_eq!(cli.include_dirs, vec![PathBuf::from("lib")]);
        assert!(cli.w8080);
        assert!(cli.pass3);
        assert!(!cli.mode86);
    }

    #[test]
    fn format_defaults_to_raw_binary() {
        let cli = Cli::parse_from(["z80forge", "-i", "prog.asm"]);
        assert_eq!(cli.format, OutputFormat::Bin);
    }

    #[test]
    fn resolve_output_path_uses_base_on_empty_name() {
        assert_eq!(
            resolve_output_path("prog", Some(""), "hex"),
            Some("prog.hex".to_string())
        );
    }

    #[test]
    fn resolve_output_path_appends_extension() {
        assert_eq!(
            resolve_output_path("prog", Some("out"), "tap"),
            Some("out.tap".to_string())
        );
        assert_eq!(
            resolve_output_path("prog", Some("out.tzx"), "tap"),
            Some("out.tzx".to_string())
        );
    }

    #[test]
    fn symbol_dump_is_opt_in() {
        let cli = Cli::parse_from(["z80forge", "-i", "prog.asm"]);
        assert_eq!(resolve_output_path("prog", cli.symbol.as_deref(), "sym"), None);
        let cli = Cli::parse_from(["z80forge", "-i", "prog.asm", "--symbol"]);
        assert_eq!(
            resolve_output_path("prog", cli.symbol.as_deref(), "sym"),
            Some("prog.sym".to_string())
        );
    }
}
