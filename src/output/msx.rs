// SPDX-License-Identifier: GPL-3.0-or-later

//! MSX BLOADable file: 7-byte header (0xFE, start, end, exec) and the
//! code.

use std::io::{self, Write};

use crate::assembler::Asm;
use crate::core::text_utils::{hibyte, lobyte};

pub fn write_msx<W: Write>(asm: &Asm, out: &mut W) -> io::Result<()> {
    let header = [
        0xFE, // Header identification byte.
        lobyte(asm.min_used()),
        hibyte(asm.min_used()),
        lobyte(asm.max_used()),
        hibyte(asm.max_used()),
        lobyte(asm.entry_point()),
        hibyte(asm.entry_point()),
    ];
    out.write_all(&header)?;
    out.write_all(asm.code())
}
