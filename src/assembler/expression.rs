// SPDX-License-Identifier: GPL-3.0-or-later

//! Recursive-descent expression evaluation over the token stream.
//!
//! Eleven precedence levels, lowest first: ternary, HIGH/LOW, boolean
//! OR, boolean AND, bitwise OR/XOR, bitwise AND, unary NOT/+/-,
//! relationals, additive, multiplicative, atoms. Arithmetic is 16-bit
//! wrapping; comparisons and boolean results are 0xFFFF / 0.
//!
//! The `ignored` flag marks subexpressions that short-circuit away so
//! undefined symbols and division by zero inside them never raise.

use crate::core::error::{self, AsmResult};
use crate::core::text_utils::{hibyte, lobyte, makeword};
use crate::core::token::Token;
use crate::core::tokenizer::TokenCursor;

use super::Asm;

const ADDR_TRUE: u16 = 0xFFFF;
const ADDR_FALSE: u16 = 0;

fn bool_addr(b: bool) -> u16 {
    if b {
        ADDR_TRUE
    } else {
        ADDR_FALSE
    }
}

impl Asm {
    /// Evaluate an expression starting at the cursor position.
    ///
    /// `required` demands the value be known already on pass 1 (used
    /// where the value changes the location counter).
    pub(crate) fn parse_expr(&mut self, tz: &mut TokenCursor, required: bool) -> AsmResult<u16> {
        let mut result = 0;
        self.parse_base(tz, &mut result, required, false)?;
        Ok(result)
    }

    fn parse_base(
        &mut self,
        tz: &mut TokenCursor,
        result: &mut u16,
        required: bool,
        ignored: bool,
    ) -> AsmResult<()> {
        self.parse_cond_expr(tz, result, required, ignored)
    }

    fn parse_cond_expr(
        &mut self,
        tz: &mut TokenCursor,
        result: &mut u16,
        required: bool,
        ignored: bool,
    ) -> AsmResult<()> {
        self.parse_highlow(tz, result, required, ignored)?;
        let tok = tz.get();
        if tok != Token::Question {
            tz.unget();
            return Ok(());
        }
        let usefirst = *result != 0;
        self.parse_base(tz, result, required, ignored || !usefirst)?;

        let tok = tz.get();
        if tok != Token::Colon {
            return Err(error::token_expected(self.line(), "':'", &tok));
        }
        let mut second = 0;
        self.parse_base(tz, &mut second, required, ignored || usefirst)?;
        if !usefirst {
            *result = second;
        }
        Ok(())
    }

    fn parse_highlow(
        &mut self,
        tz: &mut TokenCursor,
        result: &mut u16,
        required: bool,
        ignored: bool,
    ) -> AsmResult<()> {
        match tz.get() {
            Token::High => {
                self.parse_highlow(tz, result, required, ignored)?;
                *result = hibyte(*result) as u16;
            }
            Token::Low => {
                self.parse_highlow(tz, result, required, ignored)?;
                *result = lobyte(*result) as u16;
            }
            _ => {
                tz.unget();
                self.parse_boolor(tz, result, required, ignored)?;
            }
        }
        Ok(())
    }

    fn parse_boolor(
        &mut self,
        tz: &mut TokenCursor,
        result: &mut u16,
        required: bool,
        ignored: bool,
    ) -> AsmResult<()> {
        self.parse_booland(tz, result, required, ignored)?;
        let mut tok = tz.get();
        if tok == Token::BoolOr {
            let mut boolresult = *result != 0;
            loop {
                let mut guard = 0;
                // Once true, the remaining operands are ignored.
                self.parse_booland(tz, &mut guard, required, ignored || boolresult)?;
                boolresult |= guard != 0;
                tok = tz.get();
                if tok != Token::BoolOr {
                    break;
                }
            }
            *result = bool_addr(boolresult);
        }
        tz.unget();
        Ok(())
    }

    fn parse_booland(
        &mut self,
        tz: &mut TokenCursor,
        result: &mut u16,
        required: bool,
        ignored: bool,
    ) -> AsmResult<()> {
        self.parse_orxor(tz, result, required, ignored)?;
        let mut tok = tz.get();
        if tok == Token::BoolAnd {
            let mut boolresult = *result != 0;
            loop {
                let mut guard = 0;
                // Once false, the remaining operands are ignored.
                self.parse_orxor(tz, &mut guard, required, ignored || !boolresult)?;
                boolresult &= guard != 0;
                tok = tz.get();
                if tok != Token::BoolAnd {
                    break;
                }
            }
            *result = bool_addr(boolresult);
        }
        tz.unget();
        Ok(())
    }

    fn parse_orxor(
        &mut self,
        tz: &mut TokenCursor,
        result: &mut u16,
        required: bool,
        ignored: bool,
    ) -> AsmResult<()> {
        self.parse_and_expr(tz, result, required, ignored)?;
        loop {
            let tok = tz.get();
            match tok {
                Token::Or | Token::BitOr => {
                    let mut guard = 0;
                    self.parse_and_expr(tz, &mut guard, required, ignored)?;
                    *result |= guard;
                }
                Token::Xor => {
                    let mut guard = 0;
                    self.parse_and_expr(tz, &mut guard, required, ignored)?;
                    *result ^= guard;
                }
                _ => {
                    tz.unget();
                    return Ok(());
                }
            }
        }
    }

    fn parse_and_expr(
        &mut self,
        tz: &mut TokenCursor,
        result: &mut u16,
        required: bool,
        ignored: bool,
    ) -> AsmResult<()> {
        self.parse_not(tz, result, required, ignored)?;
        loop {
            let tok = tz.get();
            if tok == Token::And || tok == Token::BitAnd {
                let mut guard = 0;
                self.parse_not(tz, &mut guard, required, ignored)?;
                *result &= guard;
            } else {
                tz.unget();
                return Ok(());
            }
        }
    }

    fn parse_not(
        &mut self,
        tz: &mut TokenCursor,
        result: &mut u16,
        required: bool,
        ignored: bool,
    ) -> AsmResult<()> {
        let tok = tz.get();
        match tok {
            Token::Not | Token::BitNotOp => {
                self.parse_not(tz, result, required, ignored)?;
                *result = !*result;
            }
            Token::BoolNotOp => {
                self.parse_not(tz, result, required, ignored)?;
                *result = bool_addr(*result == 0);
            }
            Token::Plus => {
                self.parse_not(tz, result, required, ignored)?;
            }
            Token::Minus => {
                self.parse_not(tz, result, required, ignored)?;
                *result = result.wrapping_neg();
            }
            _ => {
                tz.unget();
                self.parse_relops(tz, result, required, ignored)?;
            }
        }
        Ok(())
    }

    fn parse_relops(
        &mut self,
        tz: &mut TokenCursor,
        result: &mut u16,
        required: bool,
        ignored: bool,
    ) -> AsmResult<()> {
        self.parse_plusmin(tz, result, required, ignored)?;
        loop {
            let tok = tz.get();
            let op = match tok {
                Token::EqOp | Token::LtOp | Token::LeOp | Token::GtOp | Token::GeOp
                | Token::NeOp => tok,
                _ => {
                    tz.unget();
                    return Ok(());
                }
            };
            let mut guard = 0;
            self.parse_plusmin(tz, &mut guard, required, ignored)?;
            *result = bool_addr(match op {
                Token::EqOp => *result == guard,
                Token::LtOp => *result < guard,
                Token::LeOp => *result <= guard,
                Token::GtOp => *result > guard,
                Token::GeOp => *result >= guard,
                Token::NeOp => *result != guard,
                _ => unreachable!("relational operator expected"),
            });
        }
    }

    fn parse_plusmin(
        &mut self,
        tz: &mut TokenCursor,
        result: &mut u16,
        required: bool,
        ignored: bool,
    ) -> AsmResult<()> {
        self.parse_muldiv(tz, result, required, ignored)?;
        loop {
            let tok = tz.get();
            match tok {
                Token::Plus => {
                    let mut guard = 0;
                    self.parse_muldiv(tz, &mut guard, required, ignored)?;
                    *result = result.wrapping_add(guard);
                }
                Token::Minus => {
                    let mut guard = 0;
                    self.parse_muldiv(tz, &mut guard, required, ignored)?;
                    *result = result.wrapping_sub(guard);
                }
                _ => {
                    tz.unget();
                    return Ok(());
                }
            }
        }
    }

    fn parse_muldiv(
        &mut self,
        tz: &mut TokenCursor,
        result: &mut u16,
        required: bool,
        ignored: bool,
    ) -> AsmResult<()> {
        self.parse_open(tz, result, required, ignored)?;
        loop {
            let tok = tz.get();
            let op = match tok {
                Token::Mult | Token::Div | Token::Mod | Token::ModOp | Token::Shl
                | Token::ShlOp | Token::Shr | Token::ShrOp => tok,
                _ => {
                    tz.unget();
                    return Ok(());
                }
            };
            let mut guard = 0;
            self.parse_open(tz, &mut guard, required, ignored)?;
            match op {
                Token::Mult => *result = result.wrapping_mul(guard),
                Token::Div => {
                    if guard == 0 {
                        *result = 0;
                        if (required || self.pass() >= 2) && !ignored {
                            return Err(error::division_by_zero(self.line()));
                        }
                    } else {
                        *result /= guard;
                    }
                }
                Token::Mod | Token::ModOp => {
                    if guard == 0 {
                        *result = 0;
                        if (required || self.pass() >= 2) && !ignored {
                            return Err(error::division_by_zero(self.line()));
                        }
                    } else {
                        *result %= guard;
                    }
                }
                Token::Shl | Token::ShlOp => {
                    *result = if guard >= 16 { 0 } else { *result << guard };
                }
                Token::Shr | Token::ShrOp => {
                    *result = if guard >= 16 { 0 } else { *result >> guard };
                }
                _ => unreachable!("multiplicative operator expected"),
            }
        }
    }

    fn parse_open(
        &mut self,
        tz: &mut TokenCursor,
        result: &mut u16,
        required: bool,
        ignored: bool,
    ) -> AsmResult<()> {
        let tok = tz.get();
        if tok == Token::Open {
            self.parse_base(tz, result, required, ignored)?;
            let tok = tz.get();
            if tok != Token::Close {
                return Err(error::token_expected(self.line(), "')'", &tok));
            }
            Ok(())
        } else {
            tz.unget();
            self.parse_value(tz, result, required, ignored)
        }
    }

    fn parse_value(
        &mut self,
        tz: &mut TokenCursor,
        result: &mut u16,
        required: bool,
        ignored: bool,
    ) -> AsmResult<()> {
        let tok = tz.get();
        match tok {
            Token::Number(n) => {
                *result = n;
            }
            Token::Identifier(name) => {
                *result = self.get_symbol_value(&name, required, ignored)?;
            }
            Token::Dollar => {
                *result = self.current_instruction();
            }
            Token::Str { ref text, .. } => {
                let bytes = text.as_bytes();
                match bytes.len() {
                    1 => *result = bytes[0] as u16,
                    2 => *result = makeword(bytes[0], bytes[1]),
                    _ => return Err(error::length1_required(self.line())),
                }
            }
            Token::Nul => {
                // True iff the rest of the line is empty; otherwise the
                // remainder is absorbed.
                let tok = tz.get();
                if tok == Token::End {
                    *result = ADDR_TRUE;
                } else {
                    *result = ADDR_FALSE;
                    while tz.get() != Token::End {}
                }
            }
            Token::Defined => {
                let tok = tz.get();
                let name = match tok {
                    Token::Identifier(name) => name,
                    tok => return Err(error::identifier_expected(self.line(), &tok)),
                };
                *result = bool_addr(self.is_defined_sym(&name));
            }
            tok => return Err(error::value_expected(self.line(), &tok)),
        }
        Ok(())
    }
}
