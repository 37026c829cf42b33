// SPDX-License-Identifier: GPL-3.0-or-later

//! The closed token set understood by the assembler.
//!
//! One flat tagged enum covers everything the per-line parser dispatches
//! on: literals, operators, registers, condition flags, mnemonics and
//! directives. Keywords are matched case-insensitively by [`keyword`].

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    End,

    // Literals.
    Identifier(String),
    Number(u16),
    Str { text: String, quote: u8 },

    // Punctuation and operators.
    Comma,
    Colon,
    Open,
    Close,
    OpenBracket,
    CloseBracket,
    Dollar,
    Question,
    SharpSharp,
    Plus,
    Minus,
    Mult,
    Div,
    ModOp,
    EqOp,
    NeOp,
    LtOp,
    LeOp,
    GtOp,
    GeOp,
    BitAnd,
    BitOr,
    BitNotOp,
    BoolNotOp,
    BoolAnd,
    BoolOr,
    ShlOp,
    ShrOp,

    // Expression keywords.
    High,
    Low,
    Not,
    And,
    Or,
    Xor,
    Mod,
    Shl,
    Shr,
    Nul,
    Defined,

    // Registers.
    A,
    B,
    C,
    D,
    E,
    H,
    L,
    I,
    R,
    Af,
    AfAlt,
    Bc,
    De,
    Hl,
    Sp,
    Ix,
    Iy,
    Ixh,
    Ixl,
    Iyh,
    Iyl,

    // Condition flags (C doubles as the register).
    Nz,
    Z,
    Nc,
    Po,
    Pe,
    P,
    M,

    // Mnemonics.
    Adc,
    Add,
    Bit,
    Call,
    Ccf,
    Cp,
    Cpd,
    Cpdr,
    Cpi,
    Cpir,
    Cpl,
    Daa,
    Dec,
    Di,
    Djnz,
    Ei,
    Ex,
    Exx,
    Halt,
    Im,
    In,
    Inc,
    Ind,
    Indr,
    Ini,
    Inir,
    Jp,
    Jr,
    Ld,
    Ldd,
    Lddr,
    Ldi,
    Ldir,
    Neg,
    Nop,
    Otdr,
    Otir,
    Out,
    Outd,
    Outi,
    Pop,
    Push,
    Res,
    Ret,
    Reti,
    Retn,
    Rl,
    Rla,
    Rlc,
    Rlca,
    Rld,
    Rr,
    Rra,
    Rrc,
    Rrca,
    Rrd,
    Rst,
    Sbc,
    Scf,
    Set,
    Sla,
    Sll,
    Sra,
    Srl,
    Sub,

    // Directives.
    Org,
    Equ,
    Defl,
    Defb,
    Defw,
    Defs,
    Include,
    Incbin,
    If,
    IfDef,
    IfNdef,
    Else,
    Endif,
    Public,
    EndDir,
    Local,
    Proc,
    Endp,
    Macro,
    Endm,
    Exitm,
    Rept,
    Irp,
    Irpc,
    Shift,
    ErrorDir,
    WarningDir,
    Z80Dir,
    I8080Dir,
    EndOfInclude,
}

/// Look up a keyword by its uppercased spelling.
pub fn keyword(upper: &str) -> Option<Token> {
    use Token::*;
    let tok = match upper {
        "HIGH" => High,
        "LOW" => Low,
        "NOT" => Not,
        "AND" => And,
        "OR" => Or,
        "XOR" => Xor,
        "MOD" => Mod,
        "SHL" => Shl,
        "SHR" => Shr,
        "NUL" => Nul,
        "DEFINED" => Defined,

        "A" => A,
        "B" => B,
        "C" => C,
        "D" => D,
        "E" => E,
        "H" => H,
        "L" => L,
        "I" => I,
        "R" => R,
        "AF" => Af,
        "BC" => Bc,
        "DE" => De,
        "HL" => Hl,
        "SP" => Sp,
        "IX" => Ix,
        "IY" => Iy,
        "IXH" => Ixh,
        "IXL" => Ixl,
        "IYH" => Iyh,
        "IYL" => Iyl,

        "NZ" => Nz,
        "Z" => Z,
        "NC" => Nc,
        "PO" => Po,
        "PE" => Pe,
        "P" => P,
        "M" => M,

        "ADC" => Adc,
        "ADD" => Add,
        "BIT" => Bit,
        "CALL" => Call,
        "CCF" => Ccf,
        "CP" => Cp,
        "CPD" => Cpd,
        "CPDR" => Cpdr,
        "CPI" => Cpi,
        "CPIR" => Cpir,
        "CPL" => Cpl,
        "DAA" => Daa,
        "DEC" => Dec,
        "DI" => Di,
        "DJNZ" => Djnz,
        "EI" => Ei,
        "EX" => Ex,
        "EXX" => Exx,
        "HALT" => Halt,
        "IM" => Im,
        "IN" => In,
        "INC" => Inc,
        "IND" => Ind,
        "INDR" => Indr,
        "INI" => Ini,
        "INIR" => Inir,
        "JP" => Jp,
        "JR" => Jr,
        "LD" => Ld,
        "LDD" => Ldd,
        "LDDR" => Lddr,
        "LDI" => Ldi,
        "LDIR" => Ldir,
        "NEG" => Neg,
        "NOP" => Nop,
        "OTDR" => Otdr,
        "OTIR" => Otir,
        "OUT" => Out,
        "OUTD" => Outd,
        "OUTI" => Outi,
        "POP" => Pop,
        "PUSH" => Push,
        "RES" => Res,
        "RET" => Ret,
        "RETI" => Reti,
        "RETN" => Retn,
        "RL" => Rl,
        "RLA" => Rla,
        "RLC" => Rlc,
        "RLCA" => Rlca,
        "RLD" => Rld,
        "RR" => Rr,
        "RRA" => Rra,
        "RRC" => Rrc,
        "RRCA" => Rrca,
        "RRD" => Rrd,
        "RST" => Rst,
        "SBC" => Sbc,
        "SCF" => Scf,
        "SET" => Set,
        "SLA" => Sla,
        "SLL" | "SLI" => Sll,
        "SRA" => Sra,
        "SRL" => Srl,
        "SUB" => Sub,

        "ORG" => Org,
        "EQU" => Equ,
        "DEFL" => Defl,
        "DEFB" | "DB" | "DEFM" => Defb,
        "DEFW" | "DW" => Defw,
        "DEFS" | "DS" => Defs,
        "INCLUDE" => Include,
        "INCBIN" => Incbin,
        "IF" => If,
        "IFDEF" => IfDef,
        "IFNDEF" => IfNdef,
        "ELSE" => Else,
        "ENDIF" => Endif,
        "PUBLIC" => Public,
        "END" => EndDir,
        "LOCAL" => Local,
        "PROC" => Proc,
        "ENDP" => Endp,
        "MACRO" => Macro,
        "ENDM" => Endm,
        "EXITM" => Exitm,
        "REPT" => Rept,
        "IRP" => Irp,
        "IRPC" => Irpc,
        _ => return None,
    };
    Some(tok)
}

/// Look up a dot-prefixed keyword (`.SHIFT`, `.ERROR`, ...).
pub fn dot_keyword(upper: &str) -> Option<Token> {
    use Token::*;
    let tok = match upper {
        "SHIFT" => Shift,
        "ERROR" => ErrorDir,
        "WARNING" => WarningDir,
        "Z80" => Z80Dir,
        "8080" => I8080Dir,
        _ => return None,
    };
    Some(tok)
}

impl Token {
    /// True for the directives that open a macro-style body
    /// (anything that must be balanced by ENDM).
    pub fn is_macro_directive(&self) -> bool {
        matches!(self, Token::Macro | Token::Rept | Token::Irp | Token::Irpc)
    }

    /// Source-text form of the token, used for `##` concatenation and
    /// diagnostics. Strings render with their original quote character.
    pub fn text(&self) -> String {
        use Token::*;
        match self {
            End => String::new(),
            Identifier(name) => name.clone(),
            Number(n) => n.to_string(),
            Str { text, quote } => {
                let q = *quote as char;
                format!("{q}{text}{q}")
            }
            Comma => ",".to_string(),
            Colon => ":".to_string(),
            Open => "(".to_string(),
            Close => ")".to_string(),
            OpenBracket => "[".to_string(),
            CloseBracket => "]".to_string(),
            Dollar => "$".to_string(),
            Question => "?".to_string(),
            SharpSharp => "##".to_string(),
            Plus => "+".to_string(),
            Minus => "-".to_string(),
            Mult => "*".to_string(),
            Div => "/".to_string(),
            ModOp => "%".to_string(),
            EqOp => "=".to_string(),
            NeOp => "!=".to_string(),
            LtOp => "<".to_string(),
            LeOp => "<=".to_string(),
            GtOp => ">".to_string(),
            GeOp => ">=".to_string(),
            BitAnd => "&".to_string(),
            BitOr => "|".to_string(),
            BitNotOp => "~".to_string(),
            BoolNotOp => "!".to_string(),
            BoolAnd => "&&".to_string(),
            BoolOr => "||".to_string(),
            ShlOp => "<<".to_string(),
            ShrOp => ">>".to_string(),
            AfAlt => "AF'".to_string(),
            EndDir => "END".to_string(),
            Shift => ".SHIFT".to_string(),
            ErrorDir => ".ERROR".to_string(),
            WarningDir => ".WARNING".to_string(),
            Z80Dir => ".Z80".to_string(),
            I8080Dir => ".8080".to_string(),
            EndOfInclude => String::new(),
            other => format!("{other:?}").to_ascii_uppercase(),
        }
    }

    /// The bare string content of the token, without quoting. Used for
    /// `&name` splices and for `.ERROR`/`.WARNING` payloads.
    pub fn plain_text(&self) -> String {
        match self {
            Token::Str { text, .. } => text.clone(),
            other => other.text(),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}
