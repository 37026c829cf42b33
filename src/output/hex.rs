// SPDX-License-Identifier: GPL-3.0-or-later

//! Intel HEX output: 16-byte data records with CRLF line ends, closed
//! by an end-of-file record carrying the entry point.

use std::io::{self, Write};

use crate::assembler::Asm;
use crate::core::text_utils::{hibyte, lobyte};

pub fn write_hex<W: Write>(asm: &Asm, out: &mut W) -> io::Result<()> {
    let mem = asm.mem();
    let end = asm.max_used() as u32 + 1;
    let mut addr = asm.min_used() as u32;
    while addr < end {
        let len = (end - addr).min(16);
        write!(out, ":{:02X}{:04X}00", len, addr)?;
        let mut sum = (len as u8)
            .wrapping_add(((addr >> 8) & 0xFF) as u8)
            .wrapping_add((addr & 0xFF) as u8);
        for j in 0..len {
            let b = mem[(addr + j) as usize];
            write!(out, "{b:02X}")?;
            sum = sum.wrapping_add(b);
        }
        write!(out, "{:02X}\r\n", sum.wrapping_neg())?;
        addr += 16;
    }

    let entry = asm.entry_point();
    let sum = hibyte(entry).wrapping_add(lobyte(entry)).wrapping_add(1);
    write!(out, ":00{entry:04X}01{:02X}\r\n", sum.wrapping_neg())?;
    Ok(())
}
