// SPDX-License-Identifier: GPL-3.0-or-later

//! SDCC linker REL file (XL2 flavor): textual T records of up to 14
//! bytes, interrupted at every word that needed relocation, with R
//! records marking the reloc sites. Reloc detection runs a shadow
//! assembly offset by 0x103.

use std::io::Write;

use crate::assembler::Asm;
use crate::core::error::out_of_sync_reloc;
use crate::core::text_utils::{hibyte, lobyte};

use super::EmitError;

const RELOC_OFFSET: u16 = 0x103;

pub fn write_sdrel<W: Write>(asm: &Asm, out: &mut W) -> Result<(), EmitError> {
    let mut shadow = asm.shadow(RELOC_OFFSET)?;
    shadow.process()?;

    if asm.min_used().wrapping_sub(asm.base())
        != shadow.min_used().wrapping_sub(shadow.base())
        || asm.max_used().wrapping_sub(asm.base())
            != shadow.max_used().wrapping_sub(shadow.base())
    {
        return Err(out_of_sync_reloc(0).into());
    }

    let len = asm.code_size();
    let publics = asm.public_symbols();

    writeln!(out, "XL2")?;
    writeln!(out, "M {}", asm.header_name())?;
    writeln!(out, "H 1 areas {} global symbols", publics.len() + 1)?;
    writeln!(out, "O -mz80")?;
    writeln!(out, "S .__.ABS. Def0000")?;
    writeln!(out, "A _CODE size {:02X} flags 0 addr 0", lobyte(len))?;
    for (name, value) in &publics {
        writeln!(out, "S {name} Def{value:04X}")?;
    }

    let mut tsize = 0;
    let mut i = asm.min_used();
    while i <= asm.max_used() {
        let b = asm.peek_byte(i);
        let b2 = shadow.peek_byte(i.wrapping_add(RELOC_OFFSET));
        if b != b2 {
            let bh = asm.peek_byte(i.wrapping_add(1));
            let w = asm.peek_word(i);
            let w2 = shadow.peek_word(i.wrapping_add(RELOC_OFFSET));
            if w2.wrapping_sub(w) != RELOC_OFFSET {
                return Err(out_of_sync_reloc(0).into());
            }
            if tsize > 0 {
                writeln!(out, "\nR 00 00 00 00")?;
                tsize = 0;
            }
            writeln!(
                out,
                "T {:02X} {:02X} {:02X} {:02X}",
                lobyte(i),
                hibyte(i),
                b,
                bh
            )?;
            writeln!(out, "R 00 00 00 00 00 02 00 00")?;
            i = i.wrapping_add(1);
        } else {
            if tsize == 14 {
                writeln!(out, "\nR 00 00 00 00")?;
                tsize = 0;
            }
            if tsize == 0 {
                write!(out, "T {:02X} {:02X}", lobyte(i), hibyte(i))?;
            }
            write!(out, " {b:02X}")?;
            tsize += 1;
        }
        if i == asm.max_used() {
            break;
        }
        i = i.wrapping_add(1);
    }
    if tsize > 0 {
        writeln!(out, "\nR 00 00 00 00")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_reloc_records_for_address_words() {
        let src = "PUBLIC start\nstart: LD HL, start\nRET\n";
        let mut asm = Asm::new();
        asm.set_header_name("demo");
        asm.load_source("t.asm", src).unwrap();
        asm.process().unwrap();
        let mut out = Vec::new();
        write_sdrel(&asm, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("XL2\nM demo\n"));
        assert!(text.contains("S start Def0000"));
        assert!(text.contains("R 00 00 00 00 00 02 00 00"));
        assert!(text.contains("O -mz80"));
    }
}
