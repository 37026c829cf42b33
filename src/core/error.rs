// SPDX-License-Identifier: GPL-3.0-or-later

//! Error and diagnostic types.
//!
//! User errors carry the stream line position where they were raised;
//! the driver renders them with source context. Internal invariant
//! violations are bugs and panic instead.

use std::fmt;

use crate::core::token::Token;

/// An error in the code being assembled.
#[derive(Debug, Clone)]
pub struct AsmError {
    line: usize,
    message: String,
}

impl AsmError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AsmError {}

pub type AsmResult<T> = Result<T, AsmError>;

// Constructors for the user-error families.

pub fn undefined_var(line: usize, name: &str) -> AsmError {
    AsmError::new(line, format!("Undefined symbol '{name}'"))
}

pub fn undefined_in_pass1(line: usize, name: &str) -> AsmError {
    AsmError::new(
        line,
        format!("The symbol '{name}' must be defined in pass 1"),
    )
}

pub fn phase_error(line: usize, name: &str) -> AsmError {
    AsmError::new(line, format!("Phase error in '{name}'"))
}

pub fn redefined_equ(line: usize, name: &str) -> AsmError {
    AsmError::new(
        line,
        format!("Invalid definition of '{name}', previously defined as EQU or label"),
    )
}

pub fn redefined_defl(line: usize, name: &str) -> AsmError {
    AsmError::new(
        line,
        format!("Invalid definition of '{name}', previously defined as DEFL"),
    )
}

pub fn is_predefined(line: usize, name: &str) -> AsmError {
    AsmError::new(line, format!("Symbol '{name}' is predefined"))
}

pub fn division_by_zero(line: usize) -> AsmError {
    AsmError::new(line, "Division by zero")
}

pub fn value_expected(line: usize, tok: &Token) -> AsmError {
    AsmError::new(line, format!("Value expected but '{tok}' found"))
}

pub fn identifier_expected(line: usize, tok: &Token) -> AsmError {
    AsmError::new(line, format!("Identifier expected but '{tok}' found"))
}

pub fn end_line_expected(line: usize, tok: &Token) -> AsmError {
    AsmError::new(line, format!("End of line expected but '{tok}' found"))
}

pub fn token_expected(line: usize, expected: &str, tok: &Token) -> AsmError {
    AsmError::new(line, format!("Expected {expected} but '{tok}' found"))
}

pub fn length1_required(line: usize) -> AsmError {
    AsmError::new(line, "Expected string of length 1 or 2")
}

pub fn if_without_endif(line: usize) -> AsmError {
    AsmError::new(line, "IF without ENDIF")
}

pub fn else_without_if(line: usize) -> AsmError {
    AsmError::new(line, "ELSE without IF")
}

pub fn else_without_endif(line: usize) -> AsmError {
    AsmError::new(line, "ELSE without ENDIF")
}

pub fn endif_without_if(line: usize) -> AsmError {
    AsmError::new(line, "ENDIF without IF")
}

pub fn macro_without_endm(line: usize) -> AsmError {
    AsmError::new(line, "MACRO without ENDM")
}

pub fn rept_without_endm(line: usize) -> AsmError {
    AsmError::new(line, "REPT without ENDM")
}

pub fn irp_without_endm(line: usize) -> AsmError {
    AsmError::new(line, "IRP without ENDM")
}

pub fn irp_without_parameters(line: usize) -> AsmError {
    AsmError::new(line, "IRP without parameters")
}

pub fn exitm_without_endm(line: usize) -> AsmError {
    AsmError::new(line, "EXITM without ENDM")
}

pub fn endm_out_of_macro(line: usize) -> AsmError {
    AsmError::new(line, "ENDM outside of MACRO")
}

pub fn exitm_out_of_macro(line: usize) -> AsmError {
    AsmError::new(line, "EXITM outside of MACRO")
}

pub fn shift_outside_macro(line: usize) -> AsmError {
    AsmError::new(line, ".SHIFT outside MACRO")
}

pub fn macro_expected(line: usize, name: &str) -> AsmError {
    AsmError::new(line, format!("Macro expected, '{name}' is not defined"))
}

pub fn invalid_sharp_sharp(line: usize) -> AsmError {
    AsmError::new(line, "Invalid use of ##")
}

pub fn equ_without_label(line: usize) -> AsmError {
    AsmError::new(line, "EQU without label")
}

pub fn defl_without_label(line: usize) -> AsmError {
    AsmError::new(line, "DEFL without label")
}

pub fn no_instruction(line: usize, tok: &Token) -> AsmError {
    AsmError::new(line, format!("No instruction or directive: '{tok}'"))
}

pub fn invalid_instruction(line: usize) -> AsmError {
    AsmError::new(line, "Invalid instruction")
}

pub fn invalid_operand(line: usize) -> AsmError {
    AsmError::new(line, "Invalid operand")
}

pub fn offset_expected(line: usize, tok: &Token) -> AsmError {
    AsmError::new(line, format!("Offset expected after IX or IY but '{tok}' found"))
}

pub fn offset_out_of_range(line: usize) -> AsmError {
    AsmError::new(line, "Offset out of range")
}

pub fn relative_out_of_range(line: usize) -> AsmError {
    AsmError::new(line, "Relative jump out of range")
}

pub fn bit_out_of_range(line: usize) -> AsmError {
    AsmError::new(line, "Bit position out of range")
}

pub fn invalid_im_value(line: usize) -> AsmError {
    AsmError::new(line, "Invalid IM value")
}

pub fn invalid_rst_value(line: usize) -> AsmError {
    AsmError::new(line, "Invalid RST value")
}

pub fn invalid_in_86_mode(line: usize) -> AsmError {
    AsmError::new(line, "Instruction not valid in 86 mode")
}

pub fn invalid_in_autolocal(line: usize) -> AsmError {
    AsmError::new(line, "Invalid use of auto local name")
}

pub fn unbalanced_proc(line: usize) -> AsmError {
    AsmError::new(line, "Unbalanced PROC")
}

pub fn unbalanced_endp(line: usize) -> AsmError {
    AsmError::new(line, "Unbalanced ENDP")
}

pub fn error_directive(line: usize, text: &str) -> AsmError {
    AsmError::new(line, format!("ERROR: {text}"))
}

pub fn error_reading_incbin(line: usize, file: &str) -> AsmError {
    AsmError::new(line, format!("Error reading INCBIN file '{file}'"))
}

pub fn file_not_found(line: usize, file: &str) -> AsmError {
    AsmError::new(line, format!("Cannot open file '{file}'"))
}

pub fn out_of_sync_reloc(line: usize) -> AsmError {
    AsmError::new(line, "Relocatable generation failed: out of sync")
}

pub fn warning_as_error(line: usize, text: &str) -> AsmError {
    AsmError::new(line, format!("Warning treated as error: {text}"))
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A collected diagnostic with its stream position.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub line: usize,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: usize, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            line,
            severity,
            message: message.into(),
        }
    }

    /// Render with the offending source line when available.
    pub fn format_with_context(&self, source: Option<&SourceContext>, use_color: bool) -> String {
        let sev = match self.severity {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        let (loc, text) = match source.and_then(|src| src.line_info(self.line)) {
            Some((file, num, text)) => (format!("{file}:{num}"), Some(text)),
            None => (format!("line {}", self.line), None),
        };
        let mut out = if use_color {
            let color = match self.severity {
                Severity::Warning => "\x1b[33m",
                Severity::Error => "\x1b[31m",
            };
            format!("{loc}: {color}{sev}\x1b[0m: {}", self.message)
        } else {
            format!("{loc}: {sev}: {}", self.message)
        };
        if let Some(text) = text {
            out.push('\n');
            out.push_str(&format!("    | {text}"));
        }
        out
    }
}

/// Provider of per-line provenance for diagnostic rendering.
pub trait SourceContextExt {
    fn line_info(&self, line: usize) -> Option<(String, u32, String)>;
}

/// Boxed-free alias so `Diagnostic::format_with_context` stays simple.
pub type SourceContext = dyn SourceContextExt;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_carries_line_and_message() {
        let err = undefined_var(12, "foo");
        assert_eq!(err.line(), 12);
        assert_eq!(err.message(), "Undefined symbol 'foo'");
    }

    #[test]
    fn diagnostic_renders_without_source() {
        let diag = Diagnostic::new(3, Severity::Error, "bad");
        assert_eq!(diag.format_with_context(None, false), "line 3: ERROR: bad");
    }
}
