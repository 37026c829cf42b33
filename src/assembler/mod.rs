// SPDX-License-Identifier: GPL-3.0-or-later

//! The assembly engine: pass driver, per-line parser, label and
//! directive handling, conditional assembly and macro expansion.
//!
//! One [`Asm`] instance owns every piece of state: the line stream, the
//! 64 KiB image, the symbol table, the scope and conditional stacks and
//! the macro machinery. Lines are processed strictly sequentially;
//! macro expansion saves and restores the line cursor around the body
//! range.

pub mod cli;
mod expression;
mod instructions;

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::core::conditional::CondStack;
use crate::core::error::{self, AsmResult, Diagnostic, Severity};
use crate::core::macros::{
    get_macro_arguments, substitute, FrameKind, MacroArg, MacroDef, MacroFrame,
};
use crate::core::scope::{ScopeFrame, ScopeKind, ScopeStack};
use crate::core::source::SourceStream;
use crate::core::symbol_table::{Defined, SymbolTable, VarData};
use crate::core::text_utils::{hibyte, lobyte};
use crate::core::token::Token;
use crate::core::tokenizer::TokenCursor;

const MEM_SIZE: usize = 0x10000;

/// The assembler engine.
pub struct Asm {
    source: SourceStream,
    mem: Vec<u8>,
    base: u16,
    current: u16,
    current_instruction: u16,
    minused: u16,
    maxused: u16,
    entry_point: Option<u16>,
    pass: u8,
    lastpass: u8,

    cond: CondStack,
    symbols: SymbolTable,
    publics: BTreeSet<String>,
    localcount: u32,
    scopes: ScopeStack,
    macros: HashMap<String, MacroDef>,
    frames: Vec<MacroFrame>,
    frame_conds: Vec<CondStack>,

    diagnostics: Vec<Diagnostic>,
    predefines: Vec<(String, u16)>,

    // Options.
    nocase: bool,
    autolocal: bool,
    bracket_only: bool,
    warn_8080: bool,
    werror: bool,
    mode86: bool,
    verbose: bool,
    header_name: String,
}

impl Default for Asm {
    fn default() -> Self {
        Self::new()
    }
}

impl Asm {
    pub fn new() -> Self {
        Self {
            source: SourceStream::new(false),
            mem: vec![0; MEM_SIZE],
            base: 0,
            current: 0,
            current_instruction: 0,
            minused: 0xFFFF,
            maxused: 0,
            entry_point: None,
            pass: 0,
            lastpass: 2,
            cond: CondStack::new(),
            symbols: SymbolTable::new(),
            publics: BTreeSet::new(),
            localcount: 0,
            scopes: ScopeStack::new(),
            macros: HashMap::new(),
            frames: Vec::new(),
            frame_conds: Vec::new(),
            diagnostics: Vec::new(),
            predefines: Vec::new(),
            nocase: false,
            autolocal: false,
            bracket_only: false,
            warn_8080: false,
            werror: false,
            mode86: false,
            verbose: false,
            header_name: String::new(),
        }
    }

    // ----- Option setters (before loading). -----

    pub fn set_base(&mut self, base: u16) {
        self.base = base;
        self.current = base;
        self.current_instruction = base;
    }

    pub fn case_insensitive(&mut self) {
        self.nocase = true;
        self.source.set_nocase(true);
    }

    pub fn auto_local(&mut self) {
        self.autolocal = true;
    }

    pub fn bracket_only(&mut self) {
        self.bracket_only = true;
    }

    pub fn warn_8080(&mut self) {
        self.warn_8080 = true;
    }

    pub fn set_86(&mut self) {
        self.mode86 = true;
    }

    pub fn set_pass3(&mut self) {
        self.lastpass = 3;
    }

    pub fn set_werror(&mut self) {
        self.werror = true;
    }

    pub fn set_verbose(&mut self) {
        self.verbose = true;
    }

    pub fn set_header_name(&mut self, name: impl Into<String>) {
        self.header_name = name.into();
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    pub fn add_include_dir(&mut self, dir: impl Into<std::path::PathBuf>) {
        self.source.add_include_dir(dir);
    }

    /// Predefine a symbol from a `NAME` or `NAME=value` spec. The bare
    /// form defines to 0xFFFF (true).
    pub fn predefine(&mut self, spec: &str) -> AsmResult<()> {
        let tokens = crate::core::tokenizer::scan_line(spec, self.nocase)
            .map_err(|msg| error::AsmError::new(0, msg))?;
        let mut tz = TokenCursor::new(tokens);
        let name = match tz.get() {
            Token::Identifier(name) => name,
            tok => return Err(error::identifier_expected(0, &tok)),
        };
        let value = match tz.get() {
            Token::End => 0xFFFF,
            Token::EqOp => match tz.get() {
                Token::Number(n) => {
                    if tz.get() != Token::End {
                        return Err(error::AsmError::new(0, "Invalid value for predefined symbol"));
                    }
                    n
                }
                _ => return Err(error::AsmError::new(0, "Invalid value for predefined symbol")),
            },
            _ => return Err(error::AsmError::new(0, "Syntax error in predefined symbol")),
        };
        if self.verbose {
            eprintln!("Predefining: {name}= {value}");
        }
        self.set_equ_or_label(&name, value)?;
        self.predefines.push((name, value));
        Ok(())
    }

    // ----- Loading. -----

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> AsmResult<()> {
        self.source.load_file(path)
    }

    pub fn load_source(&mut self, name: &str, text: &str) -> AsmResult<()> {
        self.source.load_source(name, text)
    }

    /// Build a fresh engine over the same source and options, assembled
    /// at `base + offset`. Used for the relocation-table emitters.
    pub fn shadow(&self, offset: u16) -> AsmResult<Asm> {
        let mut asm = Asm::new();
        asm.source = self.source.clone();
        asm.nocase = self.nocase;
        asm.autolocal = self.autolocal;
        asm.bracket_only = self.bracket_only;
        asm.mode86 = self.mode86;
        asm.header_name = self.header_name.clone();
        asm.set_base(self.base.wrapping_add(offset));
        if self.lastpass > 2 {
            asm.set_pass3();
        }
        for (name, value) in &self.predefines {
            asm.set_equ_or_label(name, *value)?;
            asm.predefines.push((name.clone(), *value));
        }
        Ok(asm)
    }

    // ----- Pass driver. -----

    /// Run the passes and the final symbol check.
    pub fn process(&mut self) -> AsmResult<()> {
        self.pass = 1;
        self.dopass()?;
        self.pass = 2;
        self.dopass()?;
        if self.lastpass > 2 {
            self.pass = 3;
            self.dopass()?;
        }
        self.final_check()
    }

    pub fn pass(&self) -> u8 {
        self.pass
    }

    pub fn last_pass(&self) -> u8 {
        self.lastpass
    }

    fn dopass(&mut self) -> AsmResult<()> {
        if self.verbose {
            eprintln!("Entering pass {}", self.pass);
        }
        self.localcount = 0;
        self.macros.clear();
        self.symbols.clear_defl();
        self.symbols.clear_probed();
        self.current = self.base;
        self.current_instruction = self.base;
        self.cond.clear();
        self.frames.clear();
        self.frame_conds.clear();

        self.source.begin_line();
        while self.source.next_line() {
            let mut tz = self.source.current_cursor();
            self.parse_line(&mut tz)?;
        }

        if !self.cond.is_empty() {
            return Err(error::if_without_endif(
                self.cond.last_open_line().unwrap_or(0),
            ));
        }
        self.finish_autolocal();
        if let Some(top) = self.scopes.top() {
            if top.kind() == ScopeKind::Proc {
                return Err(error::unbalanced_proc(top.line()));
            }
            unreachable!("unexpected local scope open at end of pass");
        }
        if self.verbose {
            eprintln!("Pass {} finished", self.pass);
        }
        Ok(())
    }

    /// Warn for symbols that are never defined or never used (and not
    /// PUBLIC), locals excluded.
    fn final_check(&mut self) -> AsmResult<()> {
        let mut pending = Vec::new();
        for (name, data) in self.symbols.iter() {
            if data.is_local() {
                continue;
            }
            if data.def() == Defined::NoDefined {
                pending.push((data.line(), format!("Var {name} is never defined")));
            }
            if !data.is_used() && !self.publics.contains(name) {
                pending.push((data.line(), format!("Var {name} is never used")));
            }
        }
        for (line, text) in pending {
            self.warn(line, text)?;
        }
        Ok(())
    }

    // ----- Observations for the emitters. -----

    pub fn mem(&self) -> &[u8] {
        &self.mem
    }

    pub fn peek_byte(&self, addr: u16) -> u8 {
        self.mem[addr as usize]
    }

    pub fn peek_word(&self, addr: u16) -> u16 {
        crate::core::text_utils::makeword(
            self.mem[addr as usize],
            self.mem[addr.wrapping_add(1) as usize],
        )
    }

    pub fn min_used(&self) -> u16 {
        self.minused
    }

    pub fn max_used(&self) -> u16 {
        self.maxused
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn code_size(&self) -> u16 {
        self.maxused.wrapping_sub(self.minused).wrapping_add(1)
    }

    /// The emitted range, `mem[min_used ..= max_used]`; empty when
    /// nothing was emitted.
    pub fn code(&self) -> &[u8] {
        if self.minused > self.maxused {
            return &[];
        }
        &self.mem[self.minused as usize..=self.maxused as usize]
    }

    pub fn has_entry_point(&self) -> bool {
        self.entry_point.is_some()
    }

    pub fn entry_point(&self) -> u16 {
        self.entry_point.unwrap_or(0)
    }

    pub fn get_value(&self, name: &str) -> Option<u16> {
        self.symbols.entry(name).map(|data| data.value())
    }

    /// PUBLIC symbols with their values, in name order.
    pub fn public_symbols(&self) -> Vec<(String, u16)> {
        self.publics
            .iter()
            .filter_map(|name| {
                self.symbols
                    .entry(name)
                    .map(|data| (name.clone(), data.value()))
            })
            .collect()
    }

    /// All EQU/label symbols that survived the final pass.
    pub fn symbol_dump(&self) -> Vec<(String, u16)> {
        self.symbols
            .iter()
            .filter(|(_, data)| data.def() == Defined::DefinedPass2)
            .map(|(name, data)| (name.to_string(), data.value()))
            .collect()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn source(&self) -> &SourceStream {
        &self.source
    }

    // ----- Code generation. -----

    pub(crate) fn gen_data(&mut self, data: u8) {
        if self.current < self.minused {
            self.minused = self.current;
        }
        if self.current > self.maxused {
            self.maxused = self.current;
        }
        self.mem[self.current as usize] = data;
        self.current = self.current.wrapping_add(1);
    }

    pub(crate) fn gen_data_word(&mut self, word: u16) {
        self.gen_data(lobyte(word));
        self.gen_data(hibyte(word));
    }

    pub(crate) fn gen_code(&mut self, code: u8) {
        self.gen_data(code);
    }

    pub(crate) fn gen_code2(&mut self, c1: u8, c2: u8) {
        self.gen_code(c1);
        self.gen_code(c2);
    }

    pub(crate) fn gen_code3(&mut self, c1: u8, c2: u8, c3: u8) {
        self.gen_code(c1);
        self.gen_code(c2);
        self.gen_code(c3);
    }

    pub(crate) fn gen_code4(&mut self, c1: u8, c2: u8, c3: u8, c4: u8) {
        self.gen_code(c1);
        self.gen_code(c2);
        self.gen_code(c3);
        self.gen_code(c4);
    }

    pub(crate) fn gen_code_ed(&mut self, code: u8) {
        self.gen_code(0xED);
        self.gen_code(code);
    }

    pub(crate) fn gen_code_word(&mut self, value: u16) {
        self.gen_code(lobyte(value));
        self.gen_code(hibyte(value));
    }

    // ----- Helpers shared by the parsing code. -----

    pub(crate) fn line(&self) -> usize {
        self.source.get_line()
    }

    pub(crate) fn current_instruction(&self) -> u16 {
        self.current_instruction
    }

    /// The location counter (next byte to emit).
    pub(crate) fn current_pc(&self) -> u16 {
        self.current
    }

    pub(crate) fn is_mode86(&self) -> bool {
        self.mode86
    }

    pub(crate) fn is_bracket_only(&self) -> bool {
        self.bracket_only
    }

    pub(crate) fn warn(&mut self, line: usize, text: impl Into<String>) -> AsmResult<()> {
        let text = text.into();
        self.diagnostics
            .push(Diagnostic::new(line, Severity::Warning, text.clone()));
        if self.werror {
            return Err(error::warning_as_error(line, &text));
        }
        Ok(())
    }

    /// Error when the instruction has no 8086 translation.
    pub(crate) fn no86(&self) -> AsmResult<()> {
        if self.mode86 {
            return Err(error::invalid_in_86_mode(self.line()));
        }
        Ok(())
    }

    /// Warn when the instruction does not exist on the 8080.
    pub(crate) fn no8080(&mut self) -> AsmResult<()> {
        if self.warn_8080 {
            let line = self.line();
            self.warn(line, "not a 8080 instruction")?;
        }
        Ok(())
    }

    pub(crate) fn check_end_line(&self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        if tok != Token::End {
            return Err(error::end_line_expected(self.line(), &tok));
        }
        Ok(())
    }

    pub(crate) fn expect_comma(&self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        if tok != Token::Comma {
            return Err(error::token_expected(self.line(), "','", &tok));
        }
        Ok(())
    }

    fn expect_identifier(&self, tok: Token) -> AsmResult<String> {
        match tok {
            Token::Identifier(name) => Ok(name),
            tok => Err(error::identifier_expected(self.line(), &tok)),
        }
    }

    fn set_entry_point(&mut self, addr: u16) -> AsmResult<()> {
        if self.pass < 2 {
            return Ok(());
        }
        if self.entry_point.is_some() {
            let line = self.line();
            self.warn(line, "Entry point redefined")?;
        }
        self.entry_point = Some(addr);
        Ok(())
    }

    // ----- Symbols: definition rules. -----

    pub(crate) fn is_autolocal_name(&self, name: &str) -> bool {
        self.autolocal && name.starts_with('_')
    }

    fn enter_autolocal(&mut self) {
        let top_is_auto = self.scopes.top().map(|f| f.is_auto()).unwrap_or(false);
        if !top_is_auto {
            self.scopes
                .push(ScopeFrame::new(ScopeKind::Auto, self.line()));
        }
    }

    fn finish_autolocal(&mut self) {
        if self.scopes.top().map(|f| f.is_auto()).unwrap_or(false) {
            let frame = self.scopes.pop().unwrap();
            frame.exit(&mut self.symbols);
        }
    }

    /// Route an auto-local name into the enclosing auto frame, opening
    /// one if needed.
    pub(crate) fn check_autolocal(&mut self, name: &str) {
        if self.is_autolocal_name(name) {
            self.enter_autolocal();
            let line = self.line();
            let top = self.scopes.top_mut().unwrap();
            let _ = top.add(name, &mut self.symbols, &mut self.localcount, self.pass, line);
        }
    }

    /// Store a symbol value, detecting phase errors against the value
    /// from the previous pass. A mismatch first seen on pass 2 switches
    /// to 3-pass mode instead of failing. Returns the local flag.
    fn set_var(&mut self, name: &str, value: u16, defined: Defined) -> AsmResult<bool> {
        self.check_autolocal(name);
        let line = self.line();
        if self.symbols.exists(name) {
            if defined == Defined::DefinedPass2 {
                let data = self.symbols.entry(name).unwrap();
                if self.pass == self.lastpass && !data.check_value(value) {
                    if self.pass == 2 {
                        self.warn(line, "Switching to 3 pass mode")?;
                        self.lastpass = 3;
                    } else {
                        return Err(error::phase_error(line, name));
                    }
                }
            }
            let data = self.symbols.entry_mut(name).unwrap();
            data.set(value, defined);
            data.set_line(line);
            Ok(data.is_local())
        } else {
            self.symbols
                .insert_new(name, VarData::new(line, value, defined));
            Ok(false)
        }
    }

    /// EQU and label definition rules by prior state.
    fn set_equ_or_label(&mut self, name: &str, value: u16) -> AsmResult<bool> {
        if self.autolocal {
            if self.is_autolocal_name(name) {
                self.check_autolocal(name);
            } else {
                self.finish_autolocal();
            }
        }

        let line = self.line();
        if let Some(var) = self.symbols.entry(name) {
            let prev_line = var.line();
            match var.def() {
                Defined::NoDefined => {
                    if self.pass > 1 {
                        return Err(error::undefined_in_pass1(line, name));
                    }
                }
                Defined::DefinedDefl => {
                    self.warn(prev_line, format!("'{name}' previously defined"))?;
                    return Err(error::redefined_defl(line, name));
                }
                Defined::PreDefined => {
                    return Err(error::is_predefined(line, name));
                }
                Defined::DefinedPass1 => {
                    if self.pass == 1 {
                        self.warn(prev_line, format!("'{name}' previously defined"))?;
                        return Err(error::redefined_equ(line, name));
                    }
                }
                Defined::DefinedPass2 => {
                    // Re-assignment is only accepted on the recovery
                    // pass after a phase escalation.
                    if self.pass == 2 {
                        self.warn(prev_line, format!("'{name}' previously defined"))?;
                        return Err(error::redefined_equ(line, name));
                    }
                }
            }
        }

        let defined = match self.pass {
            0 => Defined::PreDefined,
            1 => Defined::DefinedPass1,
            2 | 3 => Defined::DefinedPass2,
            _ => unreachable!("invalid pass value"),
        };
        self.set_var(name, value, defined)
    }

    /// DEFL may only (re)define symbols that are fresh or DEFL already.
    fn set_defl(&mut self, name: &str, value: u16) -> AsmResult<bool> {
        if self.autolocal {
            if self.is_autolocal_name(name) {
                self.check_autolocal(name);
            } else {
                self.finish_autolocal();
            }
        }

        let line = self.line();
        match self.symbols.ensure(name).def() {
            Defined::NoDefined | Defined::DefinedDefl => {}
            Defined::PreDefined => return Err(error::is_predefined(line, name)),
            Defined::DefinedPass1 | Defined::DefinedPass2 => {
                let prev_line = self.symbols.entry(name).unwrap().line();
                self.warn(prev_line, format!("'{name}' previously defined"))?;
                return Err(error::redefined_equ(line, name));
            }
        }
        self.set_var(name, value, Defined::DefinedDefl)
    }

    fn set_label(&mut self, name: &str) -> AsmResult<()> {
        let current = self.current;
        self.set_equ_or_label(name, current)?;
        Ok(())
    }

    /// Expression-time symbol lookup; marks the symbol used.
    pub(crate) fn get_symbol_value(
        &mut self,
        name: &str,
        required: bool,
        ignored: bool,
    ) -> AsmResult<u16> {
        self.check_autolocal(name);
        let line = self.line();
        self.symbols.get_value(name, line, required, ignored, self.pass)
    }

    pub(crate) fn is_defined_sym(&mut self, name: &str) -> bool {
        self.check_autolocal(name);
        self.symbols.is_defined(name, self.pass)
    }

    // ----- Per-line parsing. -----

    pub(crate) fn parse_line(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        self.current_instruction = self.current;
        let tok = tz.get();
        match tok {
            Token::Include => {
                // The stream already spliced the file in at load time.
                let _ = tz.get();
                Ok(())
            }
            Token::EndOfInclude => Ok(()),
            Token::Org => self.parse_org(tz, None),
            Token::Identifier(name) => self.parse_label(tz, &name),
            Token::If => self.parse_if(tz),
            Token::IfDef => self.parse_ifdef(tz, false),
            Token::IfNdef => self.parse_ifdef(tz, true),
            Token::Else => self.parse_else(tz),
            Token::Endif => self.parse_endif(tz),
            Token::Public => self.parse_public(tz),
            Token::Macro => {
                // Style: MACRO identifier, params
                let tok = tz.get();
                let name = self.expect_identifier(tok)?;
                self.parse_macro_def(tz, &name, true)
            }
            other => self.parse_generic(tz, other),
        }
    }

    fn parse_label(&mut self, tz: &mut TokenCursor, name: &str) -> AsmResult<()> {
        let mut tok = tz.get();
        let colon = tok == Token::Colon;
        if colon {
            tok = tz.get();
        }

        // Checked here to allow redefinition of a macro.
        if tok == Token::Macro {
            // Style: identifier MACRO params
            return self.parse_macro_def(tz, name, false);
        }

        if !colon && self.macros.contains_key(name) {
            tz.unget();
            return self.expand_macro(name, tz);
        }

        match tok {
            Token::Org => self.parse_org(tz, Some(name)),
            Token::Equ => self.parse_equ(tz, name),
            Token::Defl => self.parse_defl(tz, name),
            other => {
                // Generic label: assign the current position and parse
                // the rest of the line.
                self.set_label(name)?;
                self.parse_generic(tz, other)
            }
        }
    }

    fn parse_generic(&mut self, tz: &mut TokenCursor, tok: Token) -> AsmResult<()> {
        if self.parse_simple(tz, &tok)? {
            self.check_instruction_wrap()?;
            return Ok(());
        }

        match tok {
            Token::End => return Ok(()),
            Token::Identifier(name) => {
                // Only reached when a line invoking a macro carries a
                // label in front.
                if self.macros.contains_key(&name) {
                    return self.expand_macro(&name, tz);
                }
                return Err(error::macro_expected(self.line(), &name));
            }
            Token::Defb => self.parse_defb(tz)?,
            Token::Defw => self.parse_defw(tz)?,
            Token::Defs => self.parse_defs(tz)?,
            Token::Incbin => self.parse_incbin(tz)?,
            Token::EndDir => self.parse_end(tz)?,
            Token::Local => self.parse_local(tz)?,
            Token::Proc => self.parse_proc(tz)?,
            Token::Endp => self.parse_endp(tz)?,
            Token::ErrorDir => {
                let tok = tz.get();
                return Err(error::error_directive(self.line(), &tok.plain_text()));
            }
            Token::WarningDir => {
                let tok = tz.get();
                let line = self.line();
                self.warn(line, tok.plain_text())?;
            }
            Token::Z80Dir => self.check_end_line(tz)?,
            Token::I8080Dir => {
                return Err(error::AsmError::new(self.line(), "8080 mode not supported"))
            }
            Token::Rept => self.parse_rept(tz)?,
            Token::Irp => self.parse_irp(tz)?,
            Token::Irpc => self.parse_irpc(tz)?,
            Token::Endm => return Err(error::endm_out_of_macro(self.line())),
            Token::Exitm => return Err(error::exitm_out_of_macro(self.line())),
            Token::Shift => {
                self.check_end_line(tz)?;
                match self
                    .frames
                    .iter()
                    .rposition(|f| f.kind() == FrameKind::Macro)
                {
                    Some(idx) => self.frames[idx].shift(),
                    None => return Err(error::shift_outside_macro(self.line())),
                }
            }
            Token::Equ => return Err(error::equ_without_label(self.line())),
            Token::Defl => return Err(error::defl_without_label(self.line())),

            Token::Im => self.parse_im(tz)?,
            Token::Rst => self.parse_rst(tz)?,
            Token::Ld => self.parse_ld(tz)?,
            Token::Cp => self.parse_cp(tz)?,
            Token::And => self.parse_and_inst(tz)?,
            Token::Or => self.parse_or_inst(tz)?,
            Token::Xor => self.parse_xor_inst(tz)?,
            Token::Rl => self.do_byte_param_cb(tz, 0x10)?,
            Token::Rlc => self.do_byte_param_cb(tz, 0x00)?,
            Token::Rr => self.do_byte_param_cb(tz, 0x18)?,
            Token::Rrc => self.do_byte_param_cb(tz, 0x08)?,
            Token::Sla => self.do_byte_param_cb(tz, 0x20)?,
            Token::Sra => self.do_byte_param_cb(tz, 0x28)?,
            Token::Sll => self.do_byte_param_cb(tz, 0x30)?,
            Token::Srl => self.do_byte_param_cb(tz, 0x38)?,
            Token::Sub => self.parse_sub(tz)?,
            Token::Add => self.parse_add(tz)?,
            Token::Adc => self.parse_adc(tz)?,
            Token::Sbc => self.parse_sbc(tz)?,
            Token::Push => self.parse_push_pop(tz, true)?,
            Token::Pop => self.parse_push_pop(tz, false)?,
            Token::Call => self.parse_call(tz)?,
            Token::Ret => self.parse_ret(tz)?,
            Token::Jp => self.parse_jp(tz)?,
            Token::Jr => self.parse_jr(tz)?,
            Token::Djnz => self.parse_djnz(tz)?,
            Token::Inc => self.parse_inc_dec(tz, true)?,
            Token::Dec => self.parse_inc_dec(tz, false)?,
            Token::Ex => self.parse_ex(tz)?,
            Token::In => self.parse_in(tz)?,
            Token::Out => self.parse_out(tz)?,
            Token::Bit => self.do_bit(tz, 0x40)?,
            Token::Res => self.do_bit(tz, 0x80)?,
            Token::Set => self.do_bit(tz, 0xC0)?,

            other => return Err(error::no_instruction(self.line(), &other)),
        }
        self.check_instruction_wrap()?;
        Ok(())
    }

    /// Warn when the location counter wrapped past the 64 KiB limit in
    /// the middle of an instruction or data directive.
    fn check_instruction_wrap(&mut self) -> AsmResult<()> {
        if self.current != 0 && self.current < self.current_instruction {
            let line = self.line();
            self.warn(line, "64KB limit passed inside instruction")?;
        }
        Ok(())
    }

    // ----- Directives. -----

    fn parse_org(&mut self, tz: &mut TokenCursor, label: Option<&str>) -> AsmResult<()> {
        let org = self.parse_expr(tz, true)?;
        self.current = org;
        if let Some(label) = label {
            self.set_label(label)?;
        }
        Ok(())
    }

    fn parse_equ(&mut self, tz: &mut TokenCursor, label: &str) -> AsmResult<()> {
        let value = self.parse_expr(tz, false)?;
        self.check_end_line(tz)?;
        self.set_equ_or_label(label, value)?;
        Ok(())
    }

    fn parse_defl(&mut self, tz: &mut TokenCursor, label: &str) -> AsmResult<()> {
        let value = self.parse_expr(tz, false)?;
        self.check_end_line(tz)?;
        self.set_defl(label, value)?;
        Ok(())
    }

    fn parse_public(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        loop {
            let tok = tz.get();
            let name = self.expect_identifier(tok)?;
            if self.is_autolocal_name(&name) {
                return Err(error::invalid_in_autolocal(self.line()));
            }
            self.publics.insert(name);
            let tok = tz.get();
            if tok == Token::End {
                break;
            }
            if tok != Token::Comma {
                return Err(error::token_expected(self.line(), "','", &tok));
            }
        }
        Ok(())
    }

    fn parse_end(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let tok = tz.get();
        if tok != Token::End {
            tz.unget();
            let end = self.parse_expr(tz, false)?;
            self.check_end_line(tz)?;
            self.set_entry_point(end)?;
        }
        self.source.set_end();
        Ok(())
    }

    fn parse_local(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        if self.autolocal {
            self.finish_autolocal();
        }
        if self.scopes.top().is_none() {
            return Err(error::AsmError::new(
                self.line(),
                "LOCAL outside of PROC or MACRO",
            ));
        }
        loop {
            let tok = tz.get();
            let name = self.expect_identifier(tok)?;
            if self.is_autolocal_name(&name) {
                return Err(error::invalid_in_autolocal(self.line()));
            }
            let line = self.line();
            let warning = {
                let top = self.scopes.top_mut().unwrap();
                top.add(&name, &mut self.symbols, &mut self.localcount, self.pass, line)
            };
            if let Some(text) = warning {
                self.warn(line, text)?;
            }
            let tok = tz.get();
            if tok == Token::End {
                break;
            }
            if tok != Token::Comma {
                return Err(error::token_expected(self.line(), "','", &tok));
            }
        }
        Ok(())
    }

    fn parse_proc(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        if self.autolocal {
            self.finish_autolocal();
        }
        self.check_end_line(tz)?;
        self.scopes
            .push(ScopeFrame::new(ScopeKind::Proc, self.line()));
        Ok(())
    }

    fn parse_endp(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        self.check_end_line(tz)?;
        if self.autolocal {
            self.finish_autolocal();
        }
        match self.scopes.top() {
            Some(frame) if frame.kind() == ScopeKind::Proc => {}
            _ => return Err(error::unbalanced_endp(self.line())),
        }
        let frame = self.scopes.pop().unwrap();
        if self.pass > 1 {
            for w in frame.check_local(&mut self.symbols) {
                self.warn(w.line, format!("Local var {} {}", w.name, w.message))?;
            }
        }
        frame.exit(&mut self.symbols);
        Ok(())
    }

    pub(crate) fn parse_defb(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        loop {
            let tok = tz.get();
            match &tok {
                Token::Str { text, .. } if text.len() != 1 => {
                    for b in text.bytes() {
                        self.gen_data(b);
                    }
                }
                Token::Question => {
                    self.current = self.current.wrapping_add(1);
                }
                _ => {
                    // Single-character literals go through the
                    // evaluator so forms like 'E' + 80H work.
                    tz.unget();
                    let value = self.parse_expr(tz, false)?;
                    self.gen_data(lobyte(value));
                }
            }
            let tok = tz.get();
            if tok == Token::End {
                break;
            }
            if tok != Token::Comma {
                return Err(error::token_expected(self.line(), "','", &tok));
            }
        }
        Ok(())
    }

    fn parse_defw(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        loop {
            let tok = tz.get();
            if tok == Token::Question {
                self.current = self.current.wrapping_add(2);
            } else {
                tz.unget();
                let value = self.parse_expr(tz, false)?;
                self.gen_data_word(value);
            }
            let tok = tz.get();
            if tok == Token::End {
                break;
            }
            if tok != Token::Comma {
                return Err(error::token_expected(self.line(), "','", &tok));
            }
        }
        Ok(())
    }

    fn parse_defs(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let count = self.parse_expr(tz, true)?;
        let mut initialize = true;
        let mut value = 0u8;
        let tok = tz.get();
        if tok != Token::End {
            if tok != Token::Comma {
                return Err(error::token_expected(self.line(), "','", &tok));
            }
            let tok = tz.get();
            if tok == Token::Question {
                initialize = false;
            } else {
                tz.unget();
                value = lobyte(self.parse_expr(tz, false)?);
            }
            self.check_end_line(tz)?;
        }
        if initialize {
            for _ in 0..count {
                self.gen_data(value);
            }
        } else {
            self.current = self.current.wrapping_add(count);
        }
        Ok(())
    }

    fn parse_incbin(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let name = match tz.get() {
            Token::Str { text, .. } => text,
            tok => return Err(error::token_expected(self.line(), "file name", &tok)),
        };
        self.check_end_line(tz)?;

        let path = self
            .source
            .resolve(&name)
            .ok_or_else(|| error::file_not_found(self.line(), &name))?;
        let mut file =
            File::open(&path).map_err(|_| error::file_not_found(self.line(), &name))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .map_err(|_| error::error_reading_incbin(self.line(), &name))?;
        for b in buffer {
            self.gen_data(b);
        }
        Ok(())
    }

    // ----- Conditional assembly. -----

    fn parse_if(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let value = self.parse_expr(tz, true)?;
        self.check_end_line(tz)?;
        if value != 0 {
            self.cond.push(self.line());
        } else {
            self.condition_false()?;
        }
        Ok(())
    }

    fn parse_ifdef(&mut self, tz: &mut TokenCursor, negate: bool) -> AsmResult<()> {
        let tok = tz.get();
        let name = self.expect_identifier(tok)?;
        let defined = self.is_defined_sym(&name);
        if defined != negate {
            self.cond.push(self.line());
        } else {
            self.condition_false()?;
        }
        Ok(())
    }

    /// Skip lines after a false IF until the matching ELSE or ENDIF,
    /// honoring nested conditionals and whole macro bodies. An ENDM
    /// aborts the skip and is left for the enclosing expansion loop.
    fn condition_false(&mut self) -> AsmResult<()> {
        let ifline = self.line();
        let mut level = 1i32;
        while self.source.next_line() {
            let tokens = self.source.current_tokens();
            let mut tt = tokens.first().cloned().unwrap_or(Token::End);
            if matches!(tt, Token::Identifier(_)) {
                tt = tokens.get(1).cloned().unwrap_or(Token::End);
            }
            match tt {
                Token::If | Token::IfDef | Token::IfNdef => level += 1,
                Token::Else => {
                    if level == 1 {
                        self.cond.push(self.line());
                        level -= 1;
                    }
                }
                Token::Endif => level -= 1,
                Token::Endm => {
                    // Let the enclosing expansion loop re-observe it.
                    self.source.prev_line();
                    level = 0;
                }
                tt if tt.is_macro_directive() => {
                    self.goto_endm();
                }
                _ => {}
            }
            if level == 0 {
                break;
            }
        }
        if self.source.pass_eof() {
            return Err(error::if_without_endif(ifline));
        }
        Ok(())
    }

    fn parse_else(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        self.check_end_line(tz)?;
        if self.cond.is_empty() {
            return Err(error::else_without_if(self.line()));
        }
        let elseline = self.line();
        let mut level = 1i32;
        while self.source.next_line() {
            let tokens = self.source.current_tokens();
            let mut tt = tokens.first().cloned().unwrap_or(Token::End);
            if matches!(tt, Token::Identifier(_)) {
                tt = tokens.get(1).cloned().unwrap_or(Token::End);
            }
            match tt {
                Token::If | Token::IfDef | Token::IfNdef => level += 1,
                Token::Endif => level -= 1,
                Token::Endm => {
                    self.source.prev_line();
                    level = 0;
                }
                tt if tt.is_macro_directive() => {
                    self.goto_endm();
                }
                _ => {}
            }
            if level == 0 {
                break;
            }
        }
        if self.source.pass_eof() {
            return Err(error::else_without_endif(elseline));
        }
        self.cond.pop();
        Ok(())
    }

    fn parse_endif(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        self.check_end_line(tz)?;
        if self.cond.is_empty() {
            return Err(error::endif_without_if(self.line()));
        }
        self.cond.pop();
        Ok(())
    }

    // ----- Macro definition and expansion. -----

    /// Skip forward to the matching ENDM, honoring nested macro bodies.
    fn goto_endm(&mut self) {
        let mut level = 1usize;
        while self.source.next_line() {
            let tokens = self.source.current_tokens();
            let mut tt = tokens.first().cloned().unwrap_or(Token::End);
            if tt == Token::Endm {
                level -= 1;
                if level == 0 {
                    break;
                }
            }
            if matches!(tt, Token::Identifier(_)) {
                tt = tokens.get(1).cloned().unwrap_or(Token::End);
            }
            if tt.is_macro_directive() {
                level += 1;
            }
        }
    }

    fn parse_macro_def(
        &mut self,
        tz: &mut TokenCursor,
        name: &str,
        needcomma: bool,
    ) -> AsmResult<()> {
        if self.autolocal {
            self.finish_autolocal();
            if self.is_autolocal_name(name) {
                return Err(error::invalid_in_autolocal(self.line()));
            }
        }

        let mut params = Vec::new();
        let mut tok = tz.get();
        if tok != Token::End {
            if needcomma {
                if tok != Token::Comma {
                    return Err(error::token_expected(self.line(), "','", &tok));
                }
                tok = tz.get();
            }
            loop {
                let param = self.expect_identifier(tok)?;
                params.push(param);
                tok = tz.get();
                if tok == Token::End {
                    break;
                }
                if tok != Token::Comma {
                    return Err(error::token_expected(self.line(), "','", &tok));
                }
                tok = tz.get();
            }
        }

        self.macros.remove(name);

        // Skip the body, tracking nesting.
        let macroline = self.line();
        let mut level = 1usize;
        while self.source.next_line() {
            let tokens = self.source.current_tokens();
            let mut tt = tokens.first().cloned().unwrap_or(Token::End);
            if tt == Token::Endm {
                level -= 1;
                if level == 0 {
                    break;
                }
            }
            if matches!(tt, Token::Identifier(_)) {
                tt = tokens.get(1).cloned().unwrap_or(Token::End);
            }
            if tt.is_macro_directive() {
                level += 1;
            }
        }
        if self.source.pass_eof() {
            return Err(error::macro_without_endm(macroline));
        }

        self.macros.insert(
            name.to_string(),
            MacroDef::new(params, macroline, self.line()),
        );
        Ok(())
    }

    fn push_macro_frame(&mut self, kind: FrameKind, params: Vec<String>, args: Vec<MacroArg>) {
        let line = self.line();
        self.scopes.push(ScopeFrame::new(ScopeKind::Macro, line));
        self.frame_conds.push(self.cond.take());
        self.frames
            .push(MacroFrame::new(kind, params, args, line));
    }

    /// Unwind one expansion frame: close any scopes opened inside the
    /// body (unterminated PROCs and auto levels included), discard IFs
    /// left open in the body and restore the saved conditional state.
    fn pop_macro_frame(&mut self) -> MacroFrame {
        let frame = self.frames.pop().expect("macro frame stack underflow");
        while let Some(top) = self.scopes.top() {
            let is_macro = top.kind() == ScopeKind::Macro;
            let scope = self.scopes.pop().unwrap();
            scope.exit(&mut self.symbols);
            if is_macro {
                break;
            }
        }
        let saved = self.frame_conds.pop().expect("macro frame stack underflow");
        self.cond.restore(saved);
        frame
    }

    /// Substitute the current line's tokens through the frame stack.
    fn substituted_line(&mut self, tokens: &[Token]) -> AsmResult<TokenCursor> {
        let line = self.line();
        let subst = substitute(&self.frames, self.frames.len() - 1, tokens, line)?;
        Ok(TokenCursor::new(subst))
    }

    fn expand_macro(&mut self, name: &str, tz: &mut TokenCursor) -> AsmResult<()> {
        let mac = self
            .macros
            .get(name)
            .cloned()
            .unwrap_or_else(|| unreachable!("expand_macro without definition"));
        let arguments = get_macro_arguments(tz);

        self.push_macro_frame(FrameKind::Macro, mac.params().to_vec(), arguments);
        let expand_line = self.frames.last().unwrap().expand_line();

        let result = self.run_macro_body(mac.line());
        self.pop_macro_frame();
        self.source.set_line(expand_line);
        result
    }

    fn run_macro_body(&mut self, body_start: usize) -> AsmResult<()> {
        self.source.set_line(body_start);
        loop {
            if !self.source.next_line() {
                let at = self.frames.last().map(|f| f.expand_line()).unwrap_or(0);
                return Err(error::macro_without_endm(at));
            }
            let tokens = self.source.current_tokens().to_vec();
            let first = tokens.first().cloned().unwrap_or(Token::End);
            if first == Token::Endm || first == Token::Exitm {
                if tokens.len() > 1 {
                    return Err(error::end_line_expected(self.line(), &tokens[1]));
                }
                return Ok(());
            }
            let mut tz = self.substituted_line(&tokens)?;
            self.parse_line(&mut tz)?;
        }
    }

    fn parse_rept(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let curline = self.line();
        let numrep = self.parse_expr(tz, true)?;

        let mut varcounter: Option<String> = None;
        let mut valuecounter: u16 = 0;
        let mut step: u16 = 1;

        let tok = tz.get();
        if tok != Token::End {
            if tok != Token::Comma {
                return Err(error::token_expected(curline, "','", &tok));
            }
            let tok = tz.get();
            let name = self.expect_identifier(tok)?;
            let tok = tz.get();
            if tok != Token::End {
                if tok != Token::Comma {
                    return Err(error::token_expected(curline, "','", &tok));
                }
                valuecounter = self.parse_expr(tz, true)?;
                let tok = tz.get();
                if tok != Token::End {
                    if tok != Token::Comma {
                        return Err(error::token_expected(curline, "','", &tok));
                    }
                    step = self.parse_expr(tz, true)?;
                    self.check_end_line(tz)?;
                }
            }
            if self.is_autolocal_name(&name) {
                return Err(error::invalid_in_autolocal(self.line()));
            }
            varcounter = Some(name);
        }

        if numrep == 0 {
            self.goto_endm();
            if self.source.pass_eof() {
                return Err(error::rept_without_endm(curline));
            }
            return Ok(());
        }

        self.push_macro_frame(FrameKind::Rept, Vec::new(), vec![MacroArg::new()]);
        let expand_line = self.frames.last().unwrap().expand_line();

        if let Some(var) = varcounter.clone() {
            let line = self.line();
            let top = self.scopes.top_mut().unwrap();
            let _ = top.add(&var, &mut self.symbols, &mut self.localcount, self.pass, line);
            self.set_defl(&var, valuecounter)?;
        }

        let mut endrep = false;
        for _ in 0..numrep {
            self.source.set_line(expand_line);
            let mut noendblock = true;
            while noendblock && self.source.next_line() {
                let tokens = self.source.current_tokens().to_vec();
                let first = tokens.first().cloned().unwrap_or(Token::End);
                match first {
                    Token::Endm => {
                        if tokens.len() > 1 {
                            return Err(error::end_line_expected(self.line(), &tokens[1]));
                        }
                        noendblock = false;
                    }
                    Token::Exitm => {
                        if tokens.len() > 1 {
                            return Err(error::end_line_expected(self.line(), &tokens[1]));
                        }
                        let exline = self.line();
                        self.goto_endm();
                        if self.source.pass_eof() {
                            return Err(error::exitm_without_endm(exline));
                        }
                        noendblock = false;
                        endrep = true;
                    }
                    _ => {
                        let mut tz = self.substituted_line(&tokens)?;
                        self.parse_line(&mut tz)?;
                    }
                }
            }
            if self.source.pass_eof() {
                self.source.set_line(expand_line);
                return Err(error::rept_without_endm(curline));
            }
            if endrep {
                break;
            }
            if let Some(var) = varcounter.clone() {
                valuecounter = valuecounter.wrapping_add(step);
                self.set_defl(&var, valuecounter)?;
            }
        }
        self.pop_macro_frame();
        Ok(())
    }

    fn parse_irp(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let curline = self.line();
        let tok = tz.get();
        let var = self.expect_identifier(tok)?;
        self.expect_comma(tz)?;
        let arguments = get_macro_arguments(tz);
        if arguments.is_empty() {
            return Err(error::irp_without_parameters(curline));
        }

        self.push_macro_frame(FrameKind::Irp, vec![var], vec![MacroArg::new()]);
        let expand_line = self.frames.last().unwrap().expand_line();

        let result = self.run_irp_iterations(curline, expand_line, &arguments);
        if result.is_ok() {
            self.pop_macro_frame();
        }
        result
    }

    fn run_irp_iterations(
        &mut self,
        curline: usize,
        expand_line: usize,
        arguments: &[MacroArg],
    ) -> AsmResult<()> {
        let mut endirp = false;
        for arg in arguments {
            self.frames
                .last_mut()
                .unwrap()
                .set_current_arg(arg.clone());
            self.source.set_line(expand_line);
            let mut noendblock = true;
            while noendblock && self.source.next_line() {
                let tokens = self.source.current_tokens().to_vec();
                let first = tokens.first().cloned().unwrap_or(Token::End);
                match first {
                    Token::Endm => {
                        if tokens.len() > 1 {
                            return Err(error::end_line_expected(self.line(), &tokens[1]));
                        }
                        noendblock = false;
                    }
                    Token::Exitm => {
                        if tokens.len() > 1 {
                            return Err(error::end_line_expected(self.line(), &tokens[1]));
                        }
                        let exline = self.line();
                        self.goto_endm();
                        if self.source.pass_eof() {
                            return Err(error::exitm_without_endm(exline));
                        }
                        noendblock = false;
                        endirp = true;
                    }
                    _ => {
                        let mut tz = self.substituted_line(&tokens)?;
                        self.parse_line(&mut tz)?;
                    }
                }
            }
            if self.source.pass_eof() {
                self.source.set_line(expand_line);
                return Err(error::irp_without_endm(curline));
            }
            if endirp {
                break;
            }
        }
        Ok(())
    }

    fn parse_irpc(&mut self, tz: &mut TokenCursor) -> AsmResult<()> {
        let curline = self.line();
        let tok = tz.get();
        let var = self.expect_identifier(tok)?;
        self.expect_comma(tz)?;
        let tok = tz.get();
        let text = tok.plain_text();
        self.check_end_line(tz)?;

        // An empty string repeats zero times: skip the body.
        if text.is_empty() {
            self.goto_endm();
            if self.source.pass_eof() {
                return Err(error::irp_without_endm(curline));
            }
            return Ok(());
        }

        let mut arguments = Vec::new();
        for c in text.chars() {
            let tokens = crate::core::tokenizer::scan_line(&c.to_string(), self.nocase)
                .map_err(|msg| error::AsmError::new(curline, msg))?;
            arguments.push(tokens);
        }

        self.push_macro_frame(FrameKind::Irpc, vec![var], vec![MacroArg::new()]);
        let expand_line = self.frames.last().unwrap().expand_line();

        let result = self.run_irp_iterations(curline, expand_line, &arguments);
        if result.is_ok() {
            self.pop_macro_frame();
        }
        result
    }
}

#[cfg(test)]
mod tests;
