// SPDX-License-Identifier: GPL-3.0-or-later

//! Amsdos disk file: the 128-byte AMSDOS header (type 2 binary, load
//! and entry addresses, 16-bit checksum over the first 67 bytes)
//! followed by the code.

use std::io::{self, Write};

use crate::assembler::Asm;
use crate::core::text_utils::{hibyte, lobyte};

fn header(asm: &Asm) -> [u8; 128] {
    let mut head = [0u8; 128];
    head[0] = 0; // User number.

    let name = asm.header_name().to_ascii_uppercase();
    let (base, ext) = match name.split_once('.') {
        Some((base, ext)) => (base.to_string(), ext.to_string()),
        None => (name, "BIN".to_string()),
    };
    let mut bytes = base.bytes().take(8).collect::<Vec<_>>();
    bytes.resize(8, b' ');
    head[1..9].copy_from_slice(&bytes);
    let mut bytes = ext.bytes().take(3).collect::<Vec<_>>();
    bytes.resize(3, b' ');
    head[9..12].copy_from_slice(&bytes);

    let size = asm.code_size();
    head[18] = 2; // File type: unprotected binary.
    head[21] = lobyte(asm.min_used());
    head[22] = hibyte(asm.min_used());
    head[23] = 0xFF; // First block.
    head[24] = lobyte(size);
    head[25] = hibyte(size);
    head[26] = lobyte(asm.entry_point());
    head[27] = hibyte(asm.entry_point());

    // Real length, 24 bits.
    head[64] = lobyte(size);
    head[65] = hibyte(size);
    head[66] = 0;

    let checksum: u16 = head[..67]
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(*b as u16));
    head[67] = lobyte(checksum);
    head[68] = hibyte(checksum);
    head
}

pub fn write_amsdos<W: Write>(asm: &Asm, out: &mut W) -> io::Result<()> {
    out.write_all(&header(asm))?;
    out.write_all(asm.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_checksum_covers_first_67_bytes() {
        let mut asm = Asm::new();
        asm.set_header_name("prog");
        asm.load_source("t.asm", "ORG 4000H\nstart: RET\nEND start\n")
            .unwrap();
        asm.process().unwrap();
        let head = header(&asm);
        assert_eq!(&head[1..9], b"PROG    ");
        assert_eq!(&head[9..12], b"BIN");
        assert_eq!(head[18], 2);
        assert_eq!(head[21], 0x00);
        assert_eq!(head[22], 0x40);
        let sum: u16 = head[..67]
            .iter()
            .fold(0u16, |acc, b| acc.wrapping_add(*b as u16));
        assert_eq!(head[67], lobyte(sum));
        assert_eq!(head[68], hibyte(sum));
    }
}
