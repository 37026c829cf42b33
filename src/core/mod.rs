// SPDX-License-Identifier: GPL-3.0-or-later

//! CPU-agnostic assembler infrastructure.
//!
//! # Components
//!
//! - [`text_utils`] - byte classification and word helpers
//! - [`token`] - the closed token set
//! - [`tokenizer`] - line scanner and token cursor
//! - [`source`] - pre-tokenized line stream with INCLUDE resolution
//! - [`error`] - user errors and diagnostics
//! - [`symbol_table`] - symbols with per-pass definition states
//! - [`scope`] - PROC/MACRO/auto-local frames
//! - [`conditional`] - IF nesting state
//! - [`macros`] - macro definitions, frames and substitution

pub mod conditional;
pub mod error;
pub mod macros;
pub mod scope;
pub mod source;
pub mod symbol_table;
pub mod text_utils;
pub mod token;
pub mod tokenizer;

pub use error::{AsmError, AsmResult, Diagnostic, Severity};
pub use source::SourceStream;
pub use symbol_table::{Defined, SymbolTable, VarData};
pub use token::Token;
pub use tokenizer::TokenCursor;
