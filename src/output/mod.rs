// SPDX-License-Identifier: GPL-3.0-or-later

//! Object, tape and disk container emitters.
//!
//! Every emitter is a pure function over the finished engine
//! observations (memory image, used range, entry point, publics).
//! The relocation-table formats (PRL, SDCC REL) additionally run a
//! shadow assembly at an offset base to discover which bytes move.

pub mod amsdos;
pub mod cdt;
pub mod cmd;
pub mod hex;
pub mod msx;
pub mod plus3dos;
pub mod prl;
pub mod sdrel;
pub mod tap;
pub mod tzx;

use std::fmt;
use std::io::{self, Write};

use crate::assembler::Asm;
use crate::core::error::AsmError;

/// Failure while emitting: either the byte sink failed or the shadow
/// assembly did.
#[derive(Debug)]
pub enum EmitError {
    Io(io::Error),
    Asm(AsmError),
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmitError::Io(err) => write!(f, "{err}"),
            EmitError::Asm(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for EmitError {}

impl From<io::Error> for EmitError {
    fn from(err: io::Error) -> Self {
        EmitError::Io(err)
    }
}

impl From<AsmError> for EmitError {
    fn from(err: AsmError) -> Self {
        EmitError::Asm(err)
    }
}

/// Raw binary: the used memory range, verbatim.
pub fn write_raw<W: Write>(asm: &Asm, out: &mut W) -> io::Result<()> {
    out.write_all(asm.code())
}

/// Pad a symbol name with tabs the way classic symbol files do.
fn tab_label(name: &str) -> String {
    let mut out = name.to_string();
    if name.len() < 8 {
        out.push_str("\t\t");
    } else if name.len() < 16 {
        out.push('\t');
    } else {
        out.push(' ');
    }
    out
}

/// Flat symbol dump: every EQU/label that survived the final pass.
pub fn dump_symbols<W: Write>(asm: &Asm, out: &mut W) -> io::Result<()> {
    for (name, value) in asm.symbol_dump() {
        writeln!(out, "{}EQU 0{:04X}H", tab_label(&name), value)?;
    }
    Ok(())
}

/// PUBLIC symbols only.
pub fn dump_publics<W: Write>(asm: &Asm, out: &mut W) -> io::Result<()> {
    for (name, value) in asm.public_symbols() {
        writeln!(out, "{}EQU 0{:04X}H", tab_label(&name), value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembled(src: &str) -> Asm {
        let mut asm = Asm::new();
        asm.load_source("test.asm", src).unwrap();
        asm.process().unwrap();
        asm
    }

    #[test]
    fn raw_output_is_the_used_range() {
        let asm = assembled("ORG 100H\nLD A, 5\nRET\n");
        let mut out = Vec::new();
        write_raw(&asm, &mut out).unwrap();
        assert_eq!(out, vec![0x3E, 0x05, 0xC9]);
    }

    #[test]
    fn symbol_dump_lists_labels() {
        let asm = assembled("ORG 0\nstart: NOP\nJP start\n");
        let mut out = Vec::new();
        dump_symbols(&asm, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("start"));
        assert!(text.contains("EQU 00000H"));
    }
}
