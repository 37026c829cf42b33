// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-mnemonic operand parsing and byte emission.
//!
//! Operand recognition is speculative where the grammar demands it: a
//! `(` can open an indirect register reference or a parenthesized
//! expression, so the register path is probed first and the cursor is
//! rewound when it fails. In 8086 mode each instruction is translated
//! to an equivalent sequence using the fixed register mapping; the
//! `warn_8080` option flags anything the 8080 cannot execute.

use crate::core::error::{self, AsmResult};
use crate::core::text_utils::{hibyte, lobyte};
use crate::core::token::Token;
use crate::core::tokenizer::TokenCursor;
use crate::z80::tables::lookup_simple;
use crate::z80::{
    flag_from_token, invert_flag86, regb_from_token, Arit16, ByteInst, Prefix, RegB, RegW,
};

use super::Asm;

/// A parsed 8-bit operand: register, (HL), or indexed memory.
struct ByteOperand {
    reg: RegB,
    prefix: Prefix,
    hasdesp: bool,
    desp: u8,
}

impl Asm {
    /// Encode a no-operand instruction if the token is one. Returns
    /// false when the mnemonic is not in the table.
    pub(crate) fn parse_simple(&mut self, tz: &mut TokenCursor, tok: &Token) -> AsmResult<bool> {
        let si = match lookup_simple(tok) {
            Some(si) => si,
            None => return Ok(false),
        };
        self.check_end_line(tz)?;

        if self.is_mode86() {
            if si.code86 == 0 {
                return Err(error::invalid_in_86_mode(self.line()));
            }
            let c1 = hibyte(si.code86);
            if c1 != 0 {
                self.gen_code(c1);
            }
            self.gen_code(lobyte(si.code86));
        } else if si.ed_prefix {
            self.gen_code_ed(si.code);
        } else {
            self.gen_code(si.code);
        }

        if !si.valid_8080 {
            self.no8080()?;
        }
        Ok(true)
    }

    // ----- Operand helpers. -----

    fn parse_open_indir(&mut self, tz: &mut TokenCursor) -> AsmResult<bool> {
        let tok = tz.get();
        if self.is_bracket_only() {
            if tok != Token::OpenBracket {
                return Err(error::token_expected(self.line(), "'['", &tok));
            }
            return Ok(true);
        }
        match tok {
            Token::Open => Ok(false),
            Token::OpenBracket => Ok(true),
            tok => Err(error::token_expected(self.line(), "'(' or '['", &tok)),
        }
    }

    fn expect_close_indir(&mut self, tz: &mut TokenCursor, bracket: bool) -> AsmResult<()> {
        let tok = tz.get();
        let expected = if bracket {
            Token::CloseBracket
        } else {
            Token::Close
        };
        if tok != expected {
            let what = if bracket { "']'" } else { "')'" };
            return Err(error::token_expected(self.line(), what, &tok));
        }
        Ok(())
    }

    fn expect_a(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        if tok != Token::A {
            return Err(error::token_expected(self.line(), "A", &tok));
        }
        Ok(())
    }

    fn expect_c(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        if tok != Token::C {
            return Err(error::token_expected(self.line(), "C", &tok));
        }
        Ok(())
    }

    /// Parse the displacement of an `(IX±d)` / `(IY±d)` operand,
    /// including the closing delimiter. A bare `(IX)` yields 0.
    fn parse_desp(&mut self, tz: &mut TokenCursor, bracket: bool) -> AsmResult<u8> {
        let tok = tz.get();
        match tok {
            Token::Close => {
                if bracket {
                    return Err(error::token_expected(self.line(), "']'", &tok));
                }
                Ok(0)
            }
            Token::CloseBracket => {
                if !bracket {
                    return Err(error::token_expected(self.line(), "')'", &tok));
                }
                Ok(0)
            }
            Token::Plus => {
                let addr = self.parse_expr(tz, false)?;
                // Positive values above 127 are admitted so offsets
                // written as hex bytes (e.g. 0FFh) keep working.
                if addr > 255 {
                    return Err(error::offset_out_of_range(self.line()));
                }
                self.expect_close_indir(tz, bracket)?;
                Ok(lobyte(addr))
            }
            Token::Minus => {
                let addr = self.parse_expr(tz, false)?;
                if addr > 128 {
                    return Err(error::offset_out_of_range(self.line()));
                }
                self.expect_close_indir(tz, bracket)?;
                Ok(lobyte(256u16.wrapping_sub(addr)))
            }
            tok => Err(error::offset_expected(self.line(), &tok)),
        }
    }

    /// Try to parse an 8-bit register / memory operand starting at the
    /// already-consumed token. Returns None to signal the caller should
    /// backtrack to an immediate expression; the cursor is rewound so
    /// one further `unget` re-delivers the first operand token.
    fn parse_byte_param(
        &mut self,
        tz: &mut TokenCursor,
        tok: &Token,
        prevprefix: Prefix,
    ) -> AsmResult<Option<ByteOperand>> {
        let curline = self.line();
        let mut operand = ByteOperand {
            reg: RegB::A,
            prefix: Prefix::None,
            hasdesp: false,
            desp: 0,
        };

        if let Some(reg) = regb_from_token(tok) {
            operand.reg = reg;
            return Ok(Some(operand));
        }

        match tok {
            Token::Ixh | Token::Ixl | Token::Iyh | Token::Iyl => {
                let wants = if matches!(tok, Token::Ixh | Token::Ixl) {
                    Prefix::Ix
                } else {
                    Prefix::Iy
                };
                let other = if wants == Prefix::Ix {
                    Prefix::Iy
                } else {
                    Prefix::Ix
                };
                if prevprefix == other {
                    return Err(error::invalid_instruction(curline));
                }
                if prevprefix == Prefix::None {
                    operand.prefix = wants;
                }
                operand.reg = if matches!(tok, Token::Ixh | Token::Iyh) {
                    RegB::H
                } else {
                    RegB::L
                };
                Ok(Some(operand))
            }
            Token::Open | Token::OpenBracket => {
                if *tok == Token::Open && self.is_bracket_only() {
                    return Ok(None);
                }
                let bracket = *tok == Token::OpenBracket;
                let inner = tz.get();
                match inner {
                    Token::Hl => {
                        operand.reg = RegB::MemHl;
                        self.expect_close_indir(tz, bracket)?;
                    }
                    Token::Ix => {
                        operand.reg = RegB::MemHl;
                        operand.prefix = Prefix::Ix;
                        operand.hasdesp = true;
                        operand.desp = self.parse_desp(tz, bracket)?;
                    }
                    Token::Iy => {
                        operand.reg = RegB::MemHl;
                        operand.prefix = Prefix::Iy;
                        operand.hasdesp = true;
                        operand.desp = self.parse_desp(tz, bracket)?;
                    }
                    inner => {
                        if !bracket {
                            // Backtrack to the start of the expression.
                            tz.unget();
                            return Ok(None);
                        }
                        return Err(error::token_expected(self.line(), "']'", &inner));
                    }
                }
                if prevprefix != Prefix::None {
                    return Err(error::invalid_instruction(curline));
                }
                Ok(Some(operand))
            }
            _ => Ok(None),
        }
    }

    /// Emit an opcode with an 8-bit immediate. `prebytes` go out first
    /// (index or translation prefixes). Warns when a parenthesized
    /// expression spans the whole operand and so looks like a mistyped
    /// indirect form.
    fn do_byte_immediate(&mut self, tz: &mut TokenCursor, code: u8, prebytes: &[u8]) -> AsmResult<()> {
        tz.unget();
        let tok = tz.get();
        let check = !self.is_bracket_only() && self.pass() >= 2 && tok == Token::Open;
        tz.unget();
        let value = self.parse_expr(tz, false)?;
        self.check_end_line(tz)?;
        if check && tz.ends_with_paren() {
            let line = self.line();
            self.warn(line, "looks like a non existent instruction")?;
        }
        for &b in prebytes {
            self.gen_code(b);
        }
        self.gen_code2(code, lobyte(value));
        Ok(())
    }

    /// The ADD A / ADC A / SUB / SBC A / AND / XOR / OR / CP family.
    fn do_byte_param(&mut self, tz: &mut TokenCursor, ti: ByteInst) -> AsmResult<()> {
        let tok = tz.get();
        match self.parse_byte_param(tz, &tok, Prefix::None)? {
            Some(op) => {
                self.check_end_line(tz)?;
                if op.prefix != Prefix::None {
                    self.no86()?;
                    self.gen_code(op.prefix.byte());
                }
                if self.is_mode86() {
                    let mut basecode = ti.base(true);
                    let code;
                    if op.reg == RegB::MemHl {
                        basecode += 2;
                        code = 7;
                    } else {
                        code = 0xC0 | (op.reg.code86() << 3);
                    }
                    self.gen_code2(basecode, code);
                } else {
                    self.gen_code(ti.base(false) | op.reg.code());
                }
                if op.hasdesp {
                    self.gen_code(op.desp);
                }
                if op.prefix != Prefix::None {
                    self.no8080()?;
                }
            }
            None => {
                self.do_byte_immediate(tz, ti.immediate(self.is_mode86()), &[])?;
            }
        }
        Ok(())
    }

    /// CB-prefixed register operations: rotates, shifts and the BIT
    /// group (via `do_bit`).
    pub(crate) fn do_byte_param_cb(&mut self, tz: &mut TokenCursor, codereg: u8) -> AsmResult<()> {
        self.no86()?;
        let tok = tz.get();
        match self.parse_byte_param(tz, &tok, Prefix::None)? {
            Some(op) => {
                self.check_end_line(tz)?;
                if op.prefix != Prefix::None {
                    self.gen_code(op.prefix.byte());
                }
                self.gen_code(0xCB);
                if op.hasdesp {
                    self.gen_code(op.desp);
                }
                self.gen_code(codereg + op.reg.code());
            }
            None => return Err(error::invalid_operand(self.line())),
        }
        self.no8080()
    }

    pub(crate) fn do_bit(&mut self, tz: &mut TokenCursor, basecode: u8) -> AsmResult<()> {
        let bit = self.parse_expr(tz, false)?;
        if bit > 7 {
            return Err(error::bit_out_of_range(self.line()));
        }
        self.expect_comma(tz)?;
        self.do_byte_param_cb(tz, basecode + (lobyte(bit) << 3))
    }

    // ----- IM / RST. -----

    pub(crate) fn parse_im(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let value = self.parse_expr(tz, true)?;
        let code = match value {
            0 => 0x46,
            1 => 0x56,
            2 => 0x5E,
            _ => return Err(error::invalid_im_value(self.line())),
        };
        self.check_end_line(tz)?;
        self.no86()?;
        self.gen_code_ed(code);
        self.no8080()
    }

    pub(crate) fn parse_rst(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let addr = self.parse_expr(tz, true)?;
        self.check_end_line(tz)?;
        if addr & !0x38u16 != 0 {
            return Err(error::invalid_rst_value(self.line()));
        }
        self.no86()?;
        self.gen_code(0xC7 + lobyte(addr));
        Ok(())
    }

    // ----- LD. -----

    pub(crate) fn parse_ld(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        match tok {
            Token::A => self.parse_ld_a(tz),
            Token::B => self.parse_ld_simple(tz, RegB::B, Prefix::None),
            Token::C => self.parse_ld_simple(tz, RegB::C, Prefix::None),
            Token::D => self.parse_ld_simple(tz, RegB::D, Prefix::None),
            Token::E => self.parse_ld_simple(tz, RegB::E, Prefix::None),
            Token::H => self.parse_ld_simple(tz, RegB::H, Prefix::None),
            Token::L => self.parse_ld_simple(tz, RegB::L, Prefix::None),
            Token::Ixh => self.parse_ld_simple(tz, RegB::H, Prefix::Ix),
            Token::Iyh => self.parse_ld_simple(tz, RegB::H, Prefix::Iy),
            Token::Ixl => self.parse_ld_simple(tz, RegB::L, Prefix::Ix),
            Token::Iyl => self.parse_ld_simple(tz, RegB::L, Prefix::Iy),
            Token::I => self.parse_ld_i_or_r(tz, 0x47),
            Token::R => self.parse_ld_i_or_r(tz, 0x4F),
            Token::Bc => self.parse_ld_double(tz, RegW::Bc, Prefix::None),
            Token::De => self.parse_ld_double(tz, RegW::De, Prefix::None),
            Token::Hl => self.parse_ld_double(tz, RegW::Hl, Prefix::None),
            Token::Ix => self.parse_ld_double(tz, RegW::Hl, Prefix::Ix),
            Token::Iy => self.parse_ld_double(tz, RegW::Hl, Prefix::Iy),
            Token::Sp => self.parse_ld_sp(tz),
            Token::Open => {
                if self.is_bracket_only() {
                    return Err(error::invalid_operand(self.line()));
                }
                self.parse_ld_mem(tz, false)
            }
            Token::OpenBracket => self.parse_ld_mem(tz, true),
            _ => Err(error::invalid_operand(self.line())),
        }
    }

    fn parse_ld_a(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        self.expect_comma(tz)?;
        let tok = tz.get();
        if let Some(reg) = regb_from_token(&tok) {
            self.check_end_line(tz)?;
            return self.parse_ld_a_r(reg);
        }

        let mut valid8080 = true;
        match tok {
            Token::I => {
                self.no86()?;
                self.gen_code_ed(0x57);
                valid8080 = false;
            }
            Token::R => {
                self.no86()?;
                self.gen_code_ed(0x5F);
                valid8080 = false;
            }
            Token::Ixh => {
                self.no86()?;
                self.gen_code2(0xDD, 0x7C);
                valid8080 = false;
            }
            Token::Ixl => {
                self.no86()?;
                self.gen_code2(0xDD, 0x7D);
                valid8080 = false;
            }
            Token::Iyh => {
                self.no86()?;
                self.gen_code2(0xFD, 0x7C);
                valid8080 = false;
            }
            Token::Iyl => {
                self.no86()?;
                self.gen_code2(0xFD, 0x7D);
                valid8080 = false;
            }
            Token::Open if self.is_bracket_only() => {
                self.parse_ld_simple_n(tz, RegB::A, Prefix::None)?;
            }
            Token::Open => self.parse_ld_a_ind(tz, false)?,
            Token::OpenBracket => self.parse_ld_a_ind(tz, true)?,
            _ => self.parse_ld_simple_n(tz, RegB::A, Prefix::None)?,
        }
        self.check_end_line(tz)?;

        if !valid8080 {
            self.no8080()?;
        }
        Ok(())
    }

    fn parse_ld_a_r(&mut self, reg: RegB) -> AsmResult<()> {
        if self.is_mode86() {
            let code = 0xC0 | (reg.code86() << 3);
            self.gen_code2(0x88, code);
        } else {
            self.gen_code(0x78 + reg.code());
        }
        Ok(())
    }

    /// `LD A, (...)`: register indirect, indexed, or absolute.
    fn parse_ld_a_ind(&mut self, tz: &mut TokenCursor, bracket: bool) -> AsmResult<()> {
        let tok = tz.get();
        match tok {
            Token::Bc => {
                self.expect_close_indir(tz, bracket)?;
                if self.is_mode86() {
                    // MOV SI,CX ; MOV AL,[SI]
                    self.gen_code4(0x89, 0xCE, 0x8A, 0x04);
                } else {
                    self.gen_code(0x0A);
                }
            }
            Token::De => {
                self.expect_close_indir(tz, bracket)?;
                if self.is_mode86() {
                    // MOV SI,DX ; MOV AL,[SI]
                    self.gen_code4(0x89, 0xD6, 0x8A, 0x04);
                } else {
                    self.gen_code(0x1A);
                }
            }
            Token::Hl => {
                self.expect_close_indir(tz, bracket)?;
                if self.is_mode86() {
                    self.gen_code2(0x8A, 0x07);
                } else {
                    self.gen_code(0x7E);
                }
            }
            Token::Ix => self.parse_ld_a_irplus(tz, bracket, Prefix::Ix)?,
            Token::Iy => self.parse_ld_a_irplus(tz, bracket, Prefix::Iy)?,
            _ => {
                tz.unget();
                self.parse_ld_a_nn(tz, bracket)?;
            }
        }
        Ok(())
    }

    fn parse_ld_a_irplus(
        &mut self,
        tz: &mut TokenCursor,
        bracket: bool,
        prefix: Prefix,
    ) -> AsmResult<()> {
        self.no86()?;
        let desp = self.parse_desp(tz, bracket)?;
        self.gen_code3(prefix.byte(), 0x7E, desp);
        self.no8080()
    }

    fn parse_ld_a_nn(&mut self, tz: &mut TokenCursor, bracket: bool) -> AsmResult<()> {
        let addr = self.parse_expr(tz, false)?;
        self.expect_close_indir(tz, bracket)?;
        let code = if self.is_mode86() { 0xA0 } else { 0x3A };
        self.gen_code(code);
        self.gen_code_word(addr);
        Ok(())
    }

    /// `LD r, n` immediate form.
    fn parse_ld_simple_n(
        &mut self,
        tz: &mut TokenCursor,
        regcode: RegB,
        prevprefix: Prefix,
    ) -> AsmResult<()> {
        if prevprefix != Prefix::None {
            self.no86()?;
        }
        let mut prebytes = Vec::new();
        let code;
        if self.is_mode86() {
            if regcode == RegB::MemHl {
                prebytes.push(0xC6);
                code = 0x07;
            } else {
                code = 0xB0 + regcode.code86();
            }
        } else {
            code = (regcode.code() << 3) + 0x06;
            if prevprefix != Prefix::None {
                prebytes.push(prevprefix.byte());
            }
        }
        self.do_byte_immediate(tz, code, &prebytes)
    }

    /// `LD r, ...` where the destination is an 8-bit register or (HL).
    fn parse_ld_simple(
        &mut self,
        tz: &mut TokenCursor,
        regcode: RegB,
        prevprefix: Prefix,
    ) -> AsmResult<()> {
        self.expect_comma(tz)?;
        let tok = tz.get();
        match self.parse_byte_param(tz, &tok, prevprefix)? {
            Some(op) => {
                // LD r, (...) and LD r, r
                self.check_end_line(tz)?;
                if regcode == RegB::MemHl && op.reg == RegB::MemHl {
                    return Err(error::invalid_instruction(self.line()));
                }
                if prevprefix != Prefix::None && op.prefix != Prefix::None {
                    return Err(error::invalid_instruction(self.line()));
                }
                if op.prefix != Prefix::None {
                    self.no86()?;
                    self.gen_code(op.prefix.byte());
                }
                if prevprefix != Prefix::None {
                    self.no86()?;
                    self.gen_code(prevprefix.byte());
                }

                if self.is_mode86() {
                    let mut dst = regcode;
                    let mut src = op.reg;
                    let precode;
                    let mut code = 0xC0;
                    if src == RegB::MemHl {
                        precode = 0x8A;
                        code = 0x00;
                        src = RegB::H;
                    } else if dst == RegB::MemHl {
                        precode = 0x88;
                        code = 0x00;
                        dst = src;
                        src = RegB::H;
                    } else {
                        precode = 0x8A;
                    }
                    code += (dst.code86() << 3) + src.code86();
                    self.gen_code2(precode, code);
                } else {
                    self.gen_code(0x40 + (regcode.code() << 3) + op.reg.code());
                }

                if op.hasdesp {
                    self.gen_code(op.desp);
                }
                if prevprefix != Prefix::None || op.prefix != Prefix::None {
                    self.no8080()?;
                }
                Ok(())
            }
            None => {
                // LD r, n
                self.parse_ld_simple_n(tz, regcode, prevprefix)?;
                if prevprefix != Prefix::None {
                    self.no8080()?;
                }
                Ok(())
            }
        }
    }

    /// `LD rr, (nn)`.
    fn parse_ld_double_mem(
        &mut self,
        tz: &mut TokenCursor,
        regcode: RegW,
        bracket: bool,
        prefix: Prefix,
    ) -> AsmResult<()> {
        let value = self.parse_expr(tz, false)?;
        self.expect_close_indir(tz, bracket)?;
        self.check_end_line(tz)?;

        let mut valid8080 = false;
        match regcode {
            RegW::Bc => {
                if self.is_mode86() {
                    self.gen_code2(0x8B, 0x0E);
                } else {
                    self.gen_code_ed(0x4B);
                }
            }
            RegW::De => {
                if self.is_mode86() {
                    self.gen_code2(0x8B, 0x16);
                } else {
                    self.gen_code_ed(0x5B);
                }
            }
            RegW::Hl => {
                if prefix == Prefix::None {
                    valid8080 = true;
                } else {
                    self.no86()?;
                    self.gen_code(prefix.byte());
                }
                if self.is_mode86() {
                    self.gen_code2(0x8B, 0x1E);
                } else {
                    self.gen_code(0x2A);
                }
            }
            RegW::AfSp => {
                if self.is_mode86() {
                    self.gen_code2(0x8B, 0x26);
                } else {
                    self.gen_code_ed(0x7B);
                }
            }
        }
        self.gen_code_word(value);

        if !valid8080 {
            self.no8080()?;
        }
        Ok(())
    }

    /// `LD rr, nn`.
    fn parse_ld_double_nn(
        &mut self,
        tz: &mut TokenCursor,
        regcode: RegW,
        prefix: Prefix,
    ) -> AsmResult<()> {
        let value = self.parse_expr(tz, false)?;
        self.check_end_line(tz)?;

        if prefix != Prefix::None {
            self.no86()?;
            self.gen_code(prefix.byte());
        }
        let code = if self.is_mode86() {
            regcode.code() + 0xB9
        } else {
            regcode.code() * 16 + 1
        };
        self.gen_code(code);
        self.gen_code_word(value);

        if prefix != Prefix::None {
            self.no8080()?;
        }
        Ok(())
    }

    fn parse_ld_double(
        &mut self,
        tz: &mut TokenCursor,
        regcode: RegW,
        prefix: Prefix,
    ) -> AsmResult<()> {
        self.expect_comma(tz)?;
        let tok = tz.get();
        if tok == Token::OpenBracket || (tok == Token::Open && !self.is_bracket_only()) {
            self.parse_ld_double_mem(tz, regcode, tok == Token::OpenBracket, prefix)
        } else {
            tz.unget();
            self.parse_ld_double_nn(tz, regcode, prefix)
        }
    }

    fn parse_ld_sp(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        self.expect_comma(tz)?;
        let tok = tz.get();
        match tok {
            Token::Hl => {
                if self.is_mode86() {
                    self.gen_code2(0x89, 0xDC);
                } else {
                    self.gen_code(0xF9);
                }
            }
            Token::Ix => {
                self.no86()?;
                self.gen_code2(0xDD, 0xF9);
                self.no8080()?;
            }
            Token::Iy => {
                self.no86()?;
                self.gen_code2(0xFD, 0xF9);
                self.no8080()?;
            }
            Token::Open if self.is_bracket_only() => {
                tz.unget();
                self.parse_ld_double_nn(tz, RegW::AfSp, Prefix::None)?;
            }
            Token::Open => self.parse_ld_double_mem(tz, RegW::AfSp, false, Prefix::None)?,
            Token::OpenBracket => self.parse_ld_double_mem(tz, RegW::AfSp, true, Prefix::None)?,
            _ => {
                tz.unget();
                self.parse_ld_double_nn(tz, RegW::AfSp, Prefix::None)?;
            }
        }
        self.check_end_line(tz)
    }

    /// `LD (IX±d), r` and `LD (IX±d), n`.
    fn parse_ld_ir_plus(
        &mut self,
        tz: &mut TokenCursor,
        bracket: bool,
        prefix: Prefix,
    ) -> AsmResult<()> {
        let desp = self.parse_desp(tz, bracket)?;
        self.expect_comma(tz)?;

        let tok = tz.get();
        match self.parse_byte_param(tz, &tok, Prefix::None)? {
            Some(op) => {
                self.check_end_line(tz)?;
                if op.prefix != Prefix::None || op.hasdesp || op.reg == RegB::MemHl {
                    return Err(error::invalid_operand(self.line()));
                }
                self.no86()?;
                self.gen_code3(prefix.byte(), 0x70 + op.reg.code(), desp);
            }
            None => {
                tz.unget();
                let addr = self.parse_expr(tz, false)?;
                self.check_end_line(tz)?;
                self.no86()?;
                self.gen_code4(prefix.byte(), 0x36, desp, lobyte(addr));
            }
        }
        self.no8080()
    }

    /// `LD (nn), ...`.
    fn parse_ld_nn(&mut self, tz: &mut TokenCursor, bracket: bool) -> AsmResult<()> {
        let addr = self.parse_expr(tz, false)?;
        self.expect_close_indir(tz, bracket)?;
        self.expect_comma(tz)?;
        let tok = tz.get();
        let mut prefix = 0u8;
        let code;
        let mut valid8080 = true;
        match tok {
            Token::A => {
                code = if self.is_mode86() { 0xA2 } else { 0x32 };
            }
            Token::Bc => {
                valid8080 = false;
                if self.is_mode86() {
                    prefix = 0x89;
                    code = 0x0E;
                } else {
                    prefix = 0xED;
                    code = 0x43;
                }
            }
            Token::De => {
                valid8080 = false;
                if self.is_mode86() {
                    prefix = 0x89;
                    code = 0x16;
                } else {
                    prefix = 0xED;
                    code = 0x53;
                }
            }
            Token::Hl => {
                if self.is_mode86() {
                    prefix = 0x89;
                    code = 0x1E;
                } else {
                    code = 0x22;
                }
            }
            Token::Ix => {
                self.no86()?;
                valid8080 = false;
                prefix = 0xDD;
                code = 0x22;
            }
            Token::Iy => {
                self.no86()?;
                valid8080 = false;
                prefix = 0xFD;
                code = 0x22;
            }
            Token::Sp => {
                valid8080 = false;
                if self.is_mode86() {
                    prefix = 0x89;
                    code = 0x26;
                } else {
                    prefix = 0xED;
                    code = 0x73;
                }
            }
            _ => return Err(error::invalid_operand(self.line())),
        }
        self.check_end_line(tz)?;

        if prefix != 0 {
            self.gen_code(prefix);
        }
        self.gen_code(code);
        self.gen_code_word(addr);

        if !valid8080 {
            self.no8080()?;
        }
        Ok(())
    }

    /// `LD (...), ...` with a parenthesized first operand.
    fn parse_ld_mem(&mut self, tz: &mut TokenCursor, bracket: bool) -> AsmResult<()> {
        let tok = tz.get();
        match tok {
            Token::Bc => {
                self.expect_close_indir(tz, bracket)?;
                self.expect_comma(tz)?;
                self.expect_a(tz)?;
                self.check_end_line(tz)?;
                if self.is_mode86() {
                    // MOV SI,CX ; MOV [SI],AL
                    self.gen_code4(0x89, 0xCE, 0x88, 0x04);
                } else {
                    self.gen_code(0x02);
                }
                Ok(())
            }
            Token::De => {
                self.expect_close_indir(tz, bracket)?;
                self.expect_comma(tz)?;
                self.expect_a(tz)?;
                self.check_end_line(tz)?;
                if self.is_mode86() {
                    // MOV SI,DX ; MOV [SI],AL
                    self.gen_code4(0x89, 0xD6, 0x88, 0x04);
                } else {
                    self.gen_code(0x12);
                }
                Ok(())
            }
            Token::Hl => {
                self.expect_close_indir(tz, bracket)?;
                self.parse_ld_simple(tz, RegB::MemHl, Prefix::None)
            }
            Token::Ix => self.parse_ld_ir_plus(tz, bracket, Prefix::Ix),
            Token::Iy => self.parse_ld_ir_plus(tz, bracket, Prefix::Iy),
            _ => {
                tz.unget();
                self.parse_ld_nn(tz, bracket)
            }
        }
    }

    fn parse_ld_i_or_r(&mut self, tz: &mut TokenCursor, code: u8) -> AsmResult<()> {
        self.expect_comma(tz)?;
        self.expect_a(tz)?;
        self.check_end_line(tz)?;
        self.no86()?;
        self.gen_code_ed(code);
        self.no8080()
    }

    // ----- Byte arithmetic group. -----

    pub(crate) fn parse_cp(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        self.do_byte_param(tz, ByteInst::Cp)
    }

    pub(crate) fn parse_and_inst(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        self.do_byte_param(tz, ByteInst::And)
    }

    pub(crate) fn parse_or_inst(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        self.do_byte_param(tz, ByteInst::Or)
    }

    pub(crate) fn parse_xor_inst(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        self.do_byte_param(tz, ByteInst::Xor)
    }

    pub(crate) fn parse_sub(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        self.do_byte_param(tz, ByteInst::Sub)
    }

    fn parse_arit16(
        &mut self,
        tz: &mut TokenCursor,
        prefix: Prefix,
        basecode: Arit16,
    ) -> AsmResult<()> {
        self.expect_comma(tz)?;
        let tok = tz.get();
        let reg = match tok {
            Token::Bc => RegW::Bc,
            Token::De => RegW::De,
            Token::Hl => {
                if prefix != Prefix::None {
                    return Err(error::invalid_operand(self.line()));
                }
                RegW::Hl
            }
            Token::Sp => RegW::AfSp,
            Token::Ix => {
                if prefix != Prefix::Ix {
                    return Err(error::invalid_operand(self.line()));
                }
                RegW::Hl
            }
            Token::Iy => {
                if prefix != Prefix::Iy {
                    return Err(error::invalid_operand(self.line()));
                }
                RegW::Hl
            }
            _ => return Err(error::invalid_operand(self.line())),
        };
        self.check_end_line(tz)?;

        if prefix != Prefix::None {
            self.no86()?;
            self.gen_code(prefix.byte());
        }
        if self.is_mode86() {
            let code = (reg.code() << 3) + 0xCB;
            self.gen_code2(basecode.code86(), code);
        } else {
            if basecode.needs_ed() {
                self.gen_code(0xED);
            }
            self.gen_code((reg.code() << 4) + basecode.base());
        }

        if basecode != Arit16::AddHl || prefix != Prefix::None {
            self.no8080()?;
        }
        Ok(())
    }

    pub(crate) fn parse_add(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        match tok {
            Token::A => {
                self.expect_comma(tz)?;
                self.do_byte_param(tz, ByteInst::AddA)
            }
            Token::Hl => self.parse_arit16(tz, Prefix::None, Arit16::AddHl),
            Token::Ix => self.parse_arit16(tz, Prefix::Ix, Arit16::AddHl),
            Token::Iy => self.parse_arit16(tz, Prefix::Iy, Arit16::AddHl),
            _ => Err(error::invalid_operand(self.line())),
        }
    }

    pub(crate) fn parse_adc(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        match tok {
            Token::A => {
                self.expect_comma(tz)?;
                self.do_byte_param(tz, ByteInst::AdcA)
            }
            Token::Hl => self.parse_arit16(tz, Prefix::None, Arit16::AdcHl),
            _ => Err(error::invalid_operand(self.line())),
        }
    }

    pub(crate) fn parse_sbc(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        match tok {
            Token::A => {
                self.expect_comma(tz)?;
                self.do_byte_param(tz, ByteInst::SbcA)
            }
            Token::Hl => self.parse_arit16(tz, Prefix::None, Arit16::SbcHl),
            _ => Err(error::invalid_operand(self.line())),
        }
    }

    // ----- PUSH / POP. -----

    pub(crate) fn parse_push_pop(&mut self, tz: &mut TokenCursor, is_push: bool) -> AsmResult<()> {
        let tok = tz.get();
        let (mut code, prefix) = match tok {
            Token::Bc => (RegW::Bc.code(), Prefix::None),
            Token::De => (RegW::De.code(), Prefix::None),
            Token::Hl => (RegW::Hl.code(), Prefix::None),
            Token::Af => (RegW::AfSp.code(), Prefix::None),
            Token::Ix => (RegW::Hl.code(), Prefix::Ix),
            Token::Iy => (RegW::Hl.code(), Prefix::Iy),
            _ => return Err(error::invalid_operand(self.line())),
        };
        self.check_end_line(tz)?;

        if prefix != Prefix::None {
            self.no86()?;
            self.gen_code(prefix.byte());
        }

        if self.is_mode86() {
            code = (code + 1) % 4;
            code += if is_push { 0x50 } else { 0x58 };
        } else {
            code <<= 4;
            code += if is_push { 0xC5 } else { 0xC1 };
        }

        if code == 0x50 {
            // PUSH AX carrying the flags: LAHF ; XCHG AL,AH
            self.gen_code3(0x9F, 0x86, 0xC4);
        }
        self.gen_code(code);
        if code == 0x50 {
            // XCHG AL,AH
            self.gen_code2(0x86, 0xC4);
        }
        if code == 0x58 {
            // XCHG AL,AH ; SAHF
            self.gen_code3(0x86, 0xC4, 0x9E);
        }

        if prefix != Prefix::None {
            self.no8080()?;
        }
        Ok(())
    }

    // ----- Jumps and calls. -----

    pub(crate) fn parse_call(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        let code = match flag_from_token(&tok) {
            None => {
                tz.unget();
                if self.is_mode86() {
                    0xE8
                } else {
                    0xCD
                }
            }
            Some(flag) => {
                self.expect_comma(tz)?;
                if self.is_mode86() {
                    invert_flag86(flag.code86()) | 0x70
                } else {
                    (flag.code() << 3) | 0xC4
                }
            }
        };

        let addr = self.parse_expr(tz, false)?;
        self.check_end_line(tz)?;

        if self.is_mode86() {
            if code == 0xE8 {
                let offset = addr.wrapping_sub(self.current_instruction().wrapping_add(3));
                self.gen_code(0xE8);
                self.gen_code_word(offset);
            } else {
                // A conditional jump with the opposite condition over
                // the following call to the destination.
                let offset = addr.wrapping_sub(self.current_instruction().wrapping_add(5));
                self.gen_code3(code, 0x03, 0xE8);
                self.gen_code_word(offset);
            }
        } else {
            self.gen_code(code);
            self.gen_code_word(addr);
        }
        Ok(())
    }

    pub(crate) fn parse_ret(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        let code = match flag_from_token(&tok) {
            None => {
                tz.unget();
                if self.is_mode86() {
                    0xC3
                } else {
                    0xC9
                }
            }
            Some(flag) => {
                if self.is_mode86() {
                    invert_flag86(flag.code86()) | 0x70
                } else {
                    (flag.code() << 3) | 0xC0
                }
            }
        };
        self.check_end_line(tz)?;

        if self.is_mode86() && code != 0xC3 {
            // A conditional jump with the opposite condition over the
            // following RET.
            self.gen_code2(code, 0x01);
            self.gen_code(0xC3);
        } else {
            self.gen_code(code);
        }
        Ok(())
    }

    fn parse_jp_ind(&mut self, tz: &mut TokenCursor, bracket: bool) -> AsmResult<()> {
        let tok = tz.get();
        let prefix = match tok {
            Token::Hl => Prefix::None,
            Token::Ix => Prefix::Ix,
            Token::Iy => Prefix::Iy,
            _ => return Err(error::invalid_operand(self.line())),
        };
        self.expect_close_indir(tz, bracket)?;
        self.check_end_line(tz)?;
        if prefix != Prefix::None {
            self.no86()?;
            self.gen_code(prefix.byte());
        }
        if self.is_mode86() {
            self.gen_code2(0xFF, 0xE3);
        } else {
            self.gen_code(0xE9);
        }
        if prefix != Prefix::None {
            self.no8080()?;
        }
        Ok(())
    }

    pub(crate) fn parse_jp(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        if tok == Token::OpenBracket {
            return self.parse_jp_ind(tz, true);
        }
        if tok == Token::Open && !self.is_bracket_only() {
            return self.parse_jp_ind(tz, false);
        }
        let code = match flag_from_token(&tok) {
            None => {
                tz.unget();
                if self.is_mode86() {
                    0xE9
                } else {
                    0xC3
                }
            }
            Some(flag) => {
                self.expect_comma(tz)?;
                if self.is_mode86() {
                    invert_flag86(flag.code86()) | 0x70
                } else {
                    (flag.code() << 3) | 0xC2
                }
            }
        };

        let addr = self.parse_expr(tz, false)?;
        self.check_end_line(tz)?;

        if self.is_mode86() {
            if code == 0xE9 {
                let offset = addr.wrapping_sub(self.current_instruction().wrapping_add(3));
                self.gen_code(0xE9);
                self.gen_code_word(offset);
            } else {
                let offset = addr.wrapping_sub(self.current_instruction().wrapping_add(5));
                self.gen_code3(code, 0x03, 0xE9);
                self.gen_code_word(offset);
            }
        } else {
            self.gen_code(code);
            self.gen_code_word(addr);
        }
        Ok(())
    }

    /// Relative displacement for JR/DJNZ: `dest - (pc + off)`, checked
    /// to fit a signed byte from pass 2 on.
    fn get_relative(&mut self, addr: u16, off: u16) -> AsmResult<u8> {
        if self.pass() >= 2 {
            let dif = addr as i32 - (self.current_pc() as i32 + off as i32);
            if !(-128..=127).contains(&dif) {
                return Err(error::relative_out_of_range(self.line()));
            }
            Ok(dif as u8)
        } else {
            Ok(0)
        }
    }

    fn parse_relative(&mut self, tz: &mut TokenCursor, code: u8) -> AsmResult<()> {
        let addr = self.parse_expr(tz, false)?;
        self.check_end_line(tz)?;
        let reldesp = self.get_relative(addr, 2)?;
        self.gen_code2(code, reldesp);
        self.no8080()
    }

    pub(crate) fn parse_jr(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        let code = match flag_from_token(&tok) {
            None => {
                tz.unget();
                if self.is_mode86() {
                    0xEB
                } else {
                    0x18
                }
            }
            Some(flag) => {
                if !flag.valid_for_jr() {
                    return Err(error::AsmError::new(self.line(), "Invalid flag for JR"));
                }
                self.expect_comma(tz)?;
                if self.is_mode86() {
                    0x70 | flag.code86()
                } else {
                    0x20 | (flag.code() << 3)
                }
            }
        };
        self.parse_relative(tz, code)
    }

    pub(crate) fn parse_djnz(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        if !self.is_mode86() {
            return self.parse_relative(tz, 0x10);
        }
        let addr = self.parse_expr(tz, false)?;
        self.check_end_line(tz)?;
        let reldesp = self.get_relative(addr, 4)?;
        // DEC CH ; JNZ dest
        self.gen_code4(0xFE, 0xCD, 0x75, reldesp);
        Ok(())
    }

    // ----- INC / DEC. -----

    fn inc_dec_simple(
        &mut self,
        tz: &mut TokenCursor,
        is_inc: bool,
        reg: RegB,
        prefix: Prefix,
        hasdesp: bool,
        desp: u8,
    ) -> AsmResult<()> {
        let mut code = if self.is_mode86() {
            if is_inc {
                0xC0
            } else {
                0xC8
            }
        } else if is_inc {
            0x04
        } else {
            0x05
        };
        if self.is_mode86() {
            if reg == RegB::MemHl {
                code = if is_inc { 0x07 } else { 0x0F };
            } else {
                code += reg.code86();
            }
        } else {
            code += reg.code() << 3;
        }
        self.check_end_line(tz)?;

        if prefix != Prefix::None {
            self.no86()?;
            self.gen_code(prefix.byte());
        }
        if self.is_mode86() {
            self.gen_code(0xFE);
        }
        self.gen_code(code);
        if hasdesp {
            self.gen_code(desp);
        }

        if prefix != Prefix::None {
            self.no8080()?;
        }
        Ok(())
    }

    fn inc_dec_double(
        &mut self,
        tz: &mut TokenCursor,
        is_inc: bool,
        reg: RegW,
        prefix: Prefix,
    ) -> AsmResult<()> {
        let mut code = if self.is_mode86() {
            if is_inc {
                0x41
            } else {
                0x49
            }
        } else if is_inc {
            0x03
        } else {
            0x0B
        };
        code += if self.is_mode86() {
            reg.code()
        } else {
            reg.code() << 4
        };
        self.check_end_line(tz)?;

        if prefix != Prefix::None {
            self.no86()?;
            self.gen_code(prefix.byte());
        }
        self.gen_code(code);

        if prefix != Prefix::None {
            self.no8080()?;
        }
        Ok(())
    }

    pub(crate) fn parse_inc_dec(&mut self, tz: &mut TokenCursor, is_inc: bool) -> AsmResult<()> {
        let tok = tz.get();
        if let Some(reg) = regb_from_token(&tok) {
            return self.inc_dec_simple(tz, is_inc, reg, Prefix::None, false, 0);
        }
        match tok {
            Token::Ixh => self.inc_dec_simple(tz, is_inc, RegB::H, Prefix::Ix, false, 0),
            Token::Ixl => self.inc_dec_simple(tz, is_inc, RegB::L, Prefix::Ix, false, 0),
            Token::Iyh => self.inc_dec_simple(tz, is_inc, RegB::H, Prefix::Iy, false, 0),
            Token::Iyl => self.inc_dec_simple(tz, is_inc, RegB::L, Prefix::Iy, false, 0),
            Token::Bc => self.inc_dec_double(tz, is_inc, RegW::Bc, Prefix::None),
            Token::De => self.inc_dec_double(tz, is_inc, RegW::De, Prefix::None),
            Token::Hl => self.inc_dec_double(tz, is_inc, RegW::Hl, Prefix::None),
            Token::Ix => self.inc_dec_double(tz, is_inc, RegW::Hl, Prefix::Ix),
            Token::Iy => self.inc_dec_double(tz, is_inc, RegW::Hl, Prefix::Iy),
            Token::Sp => self.inc_dec_double(tz, is_inc, RegW::AfSp, Prefix::None),
            Token::Open | Token::OpenBracket => {
                if tok == Token::Open && self.is_bracket_only() {
                    return Err(error::invalid_operand(self.line()));
                }
                let bracket = tok == Token::OpenBracket;
                let tok = tz.get();
                match tok {
                    Token::Hl => {
                        self.expect_close_indir(tz, bracket)?;
                        self.inc_dec_simple(tz, is_inc, RegB::MemHl, Prefix::None, false, 0)
                    }
                    Token::Ix => {
                        let desp = self.parse_desp(tz, bracket)?;
                        self.inc_dec_simple(tz, is_inc, RegB::MemHl, Prefix::Ix, true, desp)
                    }
                    Token::Iy => {
                        let desp = self.parse_desp(tz, bracket)?;
                        self.inc_dec_simple(tz, is_inc, RegB::MemHl, Prefix::Iy, true, desp)
                    }
                    _ => Err(error::invalid_operand(self.line())),
                }
            }
            _ => Err(error::invalid_operand(self.line())),
        }
    }

    // ----- EX / IN / OUT. -----

    pub(crate) fn parse_ex(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        match tok {
            Token::Af => {
                self.expect_comma(tz)?;
                let tok = tz.get();
                if tok != Token::AfAlt {
                    return Err(error::invalid_operand(self.line()));
                }
                self.no86()?;
                self.gen_code(0x08);
                self.no8080()?;
            }
            Token::De => {
                self.expect_comma(tz)?;
                let tok = tz.get();
                if tok != Token::Hl {
                    return Err(error::invalid_operand(self.line()));
                }
                if self.is_mode86() {
                    self.gen_code2(0x87, 0xD3);
                } else {
                    self.gen_code(0xEB);
                }
            }
            Token::Open | Token::OpenBracket => {
                if tok == Token::Open && self.is_bracket_only() {
                    return Err(error::invalid_operand(self.line()));
                }
                let bracket = tok == Token::OpenBracket;
                let tok = tz.get();
                if tok != Token::Sp {
                    return Err(error::invalid_operand(self.line()));
                }
                self.expect_close_indir(tz, bracket)?;
                self.expect_comma(tz)?;
                let tok = tz.get();
                match tok {
                    Token::Hl => {
                        self.no86()?;
                        self.gen_code(0xE3);
                    }
                    Token::Ix => {
                        self.no86()?;
                        self.gen_code2(0xDD, 0xE3);
                        self.no8080()?;
                    }
                    Token::Iy => {
                        self.no86()?;
                        self.gen_code2(0xFD, 0xE3);
                        self.no8080()?;
                    }
                    _ => return Err(error::invalid_operand(self.line())),
                }
            }
            _ => return Err(error::invalid_operand(self.line())),
        }
        self.check_end_line(tz)
    }

    pub(crate) fn parse_in(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        let code = match tok {
            Token::B => 0x40,
            Token::C => 0x48,
            Token::D => 0x50,
            Token::E => 0x58,
            Token::H => 0x60,
            Token::L => 0x68,
            Token::A => {
                self.expect_comma(tz)?;
                let bracket = self.parse_open_indir(tz)?;
                let tok = tz.get();
                if tok == Token::C {
                    self.no86()?;
                    self.expect_close_indir(tz, bracket)?;
                    self.gen_code_ed(0x78);
                    self.no8080()?;
                } else {
                    tz.unget();
                    let addr = self.parse_expr(tz, false)?;
                    self.expect_close_indir(tz, bracket)?;
                    let code = if self.is_mode86() { 0xE4 } else { 0xDB };
                    self.gen_code2(code, lobyte(addr));
                }
                return self.check_end_line(tz);
            }
            _ => return Err(error::invalid_operand(self.line())),
        };

        self.expect_comma(tz)?;
        let bracket = self.parse_open_indir(tz)?;
        self.expect_c(tz)?;
        self.expect_close_indir(tz, bracket)?;
        self.check_end_line(tz)?;

        self.no86()?;
        self.gen_code_ed(code);
        self.no8080()
    }

    pub(crate) fn parse_out(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let bracket = self.parse_open_indir(tz)?;
        let tok = tz.get();
        if tok != Token::C {
            tz.unget();
            let addr = self.parse_expr(tz, false)?;
            self.expect_close_indir(tz, bracket)?;
            self.expect_comma(tz)?;
            self.expect_a(tz)?;
            self.check_end_line(tz)?;
            let code = if self.is_mode86() { 0xE6 } else { 0xD3 };
            // OUT (n), A also exists on the 8080.
            self.gen_code2(code, lobyte(addr));
            return Ok(());
        }

        self.expect_close_indir(tz, bracket)?;
        self.expect_comma(tz)?;
        let tok = tz.get();
        let code = match tok {
            Token::A => 0x79,
            Token::B => 0x41,
            Token::C => 0x49,
            Token::D => 0x51,
            Token::E => 0x59,
            Token::H => 0x61,
            Token::L => 0x69,
            _ => return Err(error::invalid_operand(self.line())),
        };
        self.check_end_line(tz)?;

        self.no86()?;
        self.gen_code_ed(code);
        self.no8080()
    }
}
