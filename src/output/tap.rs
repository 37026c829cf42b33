// SPDX-License-Identifier: GPL-3.0-or-later

//! Spectrum TAP tape image: a code header block followed by the code
//! data block, each length-prefixed with an XOR parity byte.

use std::io::{self, Write};

use crate::assembler::Asm;
use crate::core::text_utils::{hibyte, lobyte};

/// Render a tape block body (flag + data + parity), without the TAP
/// length prefix. TZX/CDT reuse this.
pub fn block_body(flag: u8, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 2);
    body.push(flag);
    body.extend_from_slice(data);
    let parity = body.iter().fold(0u8, |acc, b| acc ^ b);
    body.push(parity);
    body
}

fn write_block<W: Write>(out: &mut W, flag: u8, data: &[u8]) -> io::Result<()> {
    let body = block_body(flag, data);
    let len = body.len() as u16;
    out.write_all(&[lobyte(len), hibyte(len)])?;
    out.write_all(&body)
}

/// The 17-byte code header: type 3, ten-character name, length, start
/// address and the customary 32768 in the second parameter.
pub fn code_header(name: &str, start: u16, size: u16) -> [u8; 17] {
    let mut head = [0u8; 17];
    head[0] = 3; // Type: code.
    let mut bytes = name.bytes().take(10).collect::<Vec<_>>();
    bytes.resize(10, b' ');
    head[1..11].copy_from_slice(&bytes);
    head[11] = lobyte(size);
    head[12] = hibyte(size);
    head[13] = lobyte(start);
    head[14] = hibyte(start);
    head[15] = 0x00;
    head[16] = 0x80;
    head
}

pub fn write_tap<W: Write>(asm: &Asm, out: &mut W) -> io::Result<()> {
    let head = code_header(asm.header_name(), asm.min_used(), asm.code_size());
    write_block(out, 0x00, &head)?;
    write_block(out, 0xFF, asm.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_packs_name_and_params() {
        let head = code_header("demo", 0x8000, 3);
        assert_eq!(head[0], 3);
        assert_eq!(&head[1..11], b"demo      ");
        assert_eq!(head[11], 3);
        assert_eq!(head[13], 0x00);
        assert_eq!(head[14], 0x80);
        assert_eq!(head[16], 0x80);
    }

    #[test]
    fn blocks_carry_length_and_parity() {
        let mut asm = Asm::new();
        asm.set_header_name("t");
        asm.load_source("t.asm", "ORG 8000H\nDEFB 1,2,3\n").unwrap();
        asm.process().unwrap();
        let mut out = Vec::new();
        write_tap(&asm, &mut out).unwrap();

        // Header block: 19 bytes of payload.
        assert_eq!(out[0], 19);
        assert_eq!(out[1], 0);
        assert_eq!(out[2], 0x00);
        // Code block starts after 2 + 19 bytes.
        let code = &out[21..];
        assert_eq!(code[0], 5);
        assert_eq!(code[1], 0);
        assert_eq!(code[2], 0xFF);
        assert_eq!(&code[3..6], &[1, 2, 3]);
        let parity = code[2] ^ 1 ^ 2 ^ 3;
        assert_eq!(code[6], parity);
    }
}
