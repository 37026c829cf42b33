// SPDX-License-Identifier: GPL-3.0-or-later

//! CP/M-86 style CMD file: eight 9-byte group descriptors (code group
//! first, the rest empty), header padded to 128 bytes, a 256-byte zero
//! prefix, then the code.

use std::io::{self, Write};

use crate::assembler::Asm;
use crate::core::text_utils::{hibyte, lobyte};

struct CmdGroup {
    kind: u8,
    length: u16,
    base: u16,
    minimum: u16,
    maximum: u16,
}

impl CmdGroup {
    fn empty() -> Self {
        Self {
            kind: 0,
            length: 0,
            base: 0,
            minimum: 0,
            maximum: 0,
        }
    }

    fn code(length: u16) -> Self {
        let length = para(length) + 0x0010;
        Self {
            kind: 1,
            length,
            base: 0,
            minimum: length,
            maximum: 0x0FFF,
        }
    }

    fn put<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&[self.kind])?;
        for word in [self.length, self.base, self.minimum, self.maximum] {
            out.write_all(&[lobyte(word), hibyte(word)])?;
        }
        Ok(())
    }
}

/// Length in 16-byte paragraphs, rounded up.
fn para(n: u16) -> u16 {
    (n + 15) / 16
}

pub fn write_cmd<W: Write>(asm: &Asm, out: &mut W) -> io::Result<()> {
    CmdGroup::code(asm.code_size()).put(out)?;
    for _ in 1..8 {
        CmdGroup::empty().put(out)?;
    }

    // Up to 128 bytes of header, then the 256-byte 8080-model prefix.
    out.write_all(&[0u8; 128 - 72])?;
    out.write_all(&[0u8; 256])?;

    out.write_all(asm.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_header_prefix_code() {
        let mut asm = Asm::new();
        asm.load_source("t.asm", "ORG 0\nDEFB 1,2,3,4\n").unwrap();
        asm.process().unwrap();
        let mut out = Vec::new();
        write_cmd(&asm, &mut out).unwrap();
        assert_eq!(out.len(), 128 + 256 + 4);
        // Code group descriptor.
        assert_eq!(out[0], 1);
        let length = out[1] as u16 | (out[2] as u16) << 8;
        assert_eq!(length, para(4) + 0x10);
        // Remaining groups are empty.
        assert!(out[9..72].iter().all(|b| *b == 0));
        assert_eq!(&out[128 + 256..], &[1, 2, 3, 4]);
    }
}
