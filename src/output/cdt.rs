// SPDX-License-Identifier: GPL-3.0-or-later

//! Amstrad CPC CDT tape image.
//!
//! CDT uses the TZX container with turbo-speed blocks carrying the CPC
//! firmware tape layout: a 64-byte type-2 header record and data
//! records split into 256-byte segments, each followed by a CRC-16,
//! closed with four 0xFF trailer bytes. Timing constants are the
//! nominal 2000-baud firmware values.

use std::io::{self, Write};

use crate::assembler::Asm;
use crate::core::text_utils::{hibyte, lobyte};

use super::tzx::write_file_head;

const SYNC_HEADER: u8 = 0x2C;
const SYNC_DATA: u8 = 0x16;
const SEGMENT: usize = 256;

// Turbo block timing, nominal 2000 baud.
const PILOT_PULSE: u16 = 2000;
const SYNC1_PULSE: u16 = 855;
const SYNC2_PULSE: u16 = 855;
const ZERO_PULSE: u16 = 855;
const ONE_PULSE: u16 = 1710;
const PILOT_COUNT: u16 = 4096;
const PAUSE_MS: u16 = 2000;

/// CRC-16/CCITT over one segment, complemented, as the CPC firmware
/// computes it.
pub fn crc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in data {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    !crc
}

fn write_turbo_head<W: Write>(out: &mut W, datalen: usize) -> io::Result<()> {
    out.write_all(&[0x11])?;
    for word in [
        PILOT_PULSE,
        SYNC1_PULSE,
        SYNC2_PULSE,
        ZERO_PULSE,
        ONE_PULSE,
        PILOT_COUNT,
    ] {
        out.write_all(&[lobyte(word), hibyte(word)])?;
    }
    out.write_all(&[8])?; // Used bits in the last byte.
    out.write_all(&[lobyte(PAUSE_MS), hibyte(PAUSE_MS)])?;
    out.write_all(&[
        (datalen & 0xFF) as u8,
        ((datalen >> 8) & 0xFF) as u8,
        ((datalen >> 16) & 0xFF) as u8,
    ])
}

/// One firmware record: sync byte, 256-byte segments each followed by
/// its CRC (high byte first), then the trailer.
fn write_record<W: Write>(out: &mut W, sync: u8, data: &[u8]) -> io::Result<()> {
    let segments = data.len().div_ceil(SEGMENT);
    let datalen = 1 + segments * (SEGMENT + 2) + 4;
    write_turbo_head(out, datalen)?;

    out.write_all(&[sync])?;
    for chunk in data.chunks(SEGMENT) {
        let mut segment = [0u8; SEGMENT];
        segment[..chunk.len()].copy_from_slice(chunk);
        out.write_all(&segment)?;
        let check = crc(&segment);
        out.write_all(&[hibyte(check), lobyte(check)])?;
    }
    out.write_all(&[0xFF, 0xFF, 0xFF, 0xFF])
}

/// The 64-byte CPC file header record.
fn cpc_header(asm: &Asm) -> [u8; 64] {
    let mut head = [0u8; 64];
    let mut name = asm.header_name().bytes().take(16).collect::<Vec<_>>();
    name.resize(16, 0);
    head[..16].copy_from_slice(&name);
    head[16] = 1; // Block number.
    head[17] = 0xFF; // Last block.
    head[18] = 2; // File type: unprotected binary.
    head[19] = lobyte(asm.code_size());
    head[20] = hibyte(asm.code_size());
    head[21] = lobyte(asm.min_used());
    head[22] = hibyte(asm.min_used());
    head[23] = 0xFF; // First block.
    head[24] = lobyte(asm.code_size());
    head[25] = hibyte(asm.code_size());
    head[26] = lobyte(asm.entry_point());
    head[27] = hibyte(asm.entry_point());
    head
}

pub fn write_cdt<W: Write>(asm: &Asm, out: &mut W) -> io::Result<()> {
    write_file_head(out)?;
    write_record(out, SYNC_HEADER, &cpc_header(asm))?;
    write_record(out, SYNC_DATA, asm.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_is_complemented_ccitt() {
        // CRC of an empty segment is the complement of the init value
        // run through zero bytes.
        let zeros = [0u8; 4];
        let a = crc(&zeros);
        let b = crc(&zeros);
        assert_eq!(a, b);
        assert_ne!(crc(&[1, 2, 3]), crc(&[3, 2, 1]));
    }

    #[test]
    fn header_record_is_263_bytes_of_payload() {
        let mut asm = Asm::new();
        asm.set_header_name("DEMO");
        asm.load_source("t.asm", "ORG 4000H\nDEFB 1,2,3\n").unwrap();
        asm.process().unwrap();
        let mut out = Vec::new();
        write_cdt(&asm, &mut out).unwrap();
        // TZX head (10) + turbo head (19) then the record payload.
        assert_eq!(out[10], 0x11);
        let datalen =
            out[26] as usize | (out[27] as usize) << 8 | (out[28] as usize) << 16;
        assert_eq!(datalen, 263);
        assert_eq!(out[29], SYNC_HEADER);
        assert_eq!(&out[30..34], b"DEMO");
    }
}
