// SPDX-License-Identifier: GPL-3.0-or-later

//! TZX tape image: the TZX file header plus standard-speed data blocks
//! wrapping the same header/code blocks a TAP file carries.

use std::io::{self, Write};

use crate::assembler::Asm;
use crate::core::text_utils::{hibyte, lobyte};

use super::tap::{block_body, code_header};

const PAUSE_MS: u16 = 1000;

/// "ZXTape!" signature, end-of-text marker, version 1.20.
pub fn write_file_head<W: Write>(out: &mut W) -> io::Result<()> {
    out.write_all(b"ZXTape!\x1A")?;
    out.write_all(&[1, 20])
}

/// Standard speed data block (id 0x10).
pub fn write_standard_block<W: Write>(out: &mut W, body: &[u8]) -> io::Result<()> {
    out.write_all(&[0x10])?;
    out.write_all(&[lobyte(PAUSE_MS), hibyte(PAUSE_MS)])?;
    let len = body.len() as u16;
    out.write_all(&[lobyte(len), hibyte(len)])?;
    out.write_all(body)
}

pub fn write_tzx<W: Write>(asm: &Asm, out: &mut W) -> io::Result<()> {
    write_file_head(out)?;

    let head = code_header(asm.header_name(), asm.min_used(), asm.code_size());
    write_standard_block(out, &block_body(0x00, &head))?;
    write_standard_block(out, &block_body(0xFF, asm.code()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_signature_and_version() {
        let mut asm = Asm::new();
        asm.load_source("t.asm", "ORG 8000H\nRET\n").unwrap();
        asm.process().unwrap();
        let mut out = Vec::new();
        write_tzx(&asm, &mut out).unwrap();
        assert_eq!(&out[..8], b"ZXTape!\x1A");
        assert_eq!(out[8], 1);
        assert_eq!(out[9], 20);
        // First block: standard speed, 1000 ms pause, 19-byte payload.
        assert_eq!(out[10], 0x10);
        assert_eq!(out[11], 0xE8);
        assert_eq!(out[12], 0x03);
        assert_eq!(out[13], 19);
        assert_eq!(out[14], 0);
    }
}
