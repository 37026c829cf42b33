// SPDX-License-Identifier: GPL-3.0-or-later

//! Macro definitions and expansion frames.
//!
//! A definition stores only its parameter names and body line range in
//! the source stream; expansion re-reads the body lines and rewrites
//! each token stream through the frame stack. Frames form a plain
//! vector (parent is the previous element), and substitution chains
//! parent-first for REPT/IRP/IRPC so inner bodies still see the
//! enclosing MACRO's parameters.

use crate::core::error::{invalid_sharp_sharp, AsmResult};
use crate::core::token::Token;
use crate::core::tokenizer::TokenCursor;

pub type MacroArg = Vec<Token>;

#[derive(Debug, Clone)]
pub struct MacroDef {
    params: Vec<String>,
    line: usize,
    end_line: usize,
}

impl MacroDef {
    pub fn new(params: Vec<String>, line: usize, end_line: usize) -> Self {
        Self {
            params,
            line,
            end_line,
        }
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Line of the MACRO directive; the body starts on the next line.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn end_line(&self) -> usize {
        self.end_line
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Macro,
    Rept,
    Irp,
    Irpc,
}

#[derive(Debug)]
pub struct MacroFrame {
    kind: FrameKind,
    params: Vec<String>,
    args: Vec<MacroArg>,
    expand_line: usize,
}

impl MacroFrame {
    pub fn new(
        kind: FrameKind,
        params: Vec<String>,
        args: Vec<MacroArg>,
        expand_line: usize,
    ) -> Self {
        Self {
            kind,
            params,
            args,
            expand_line,
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Line the expansion was invoked from; the cursor returns here when
    /// the expansion ends.
    pub fn expand_line(&self) -> usize {
        self.expand_line
    }

    /// Rebind the single IRP/IRPC argument for the next iteration.
    pub fn set_current_arg(&mut self, arg: MacroArg) {
        if self.args.is_empty() {
            self.args.push(arg);
        } else {
            self.args[0] = arg;
        }
    }

    /// Drop the first argument (.SHIFT).
    pub fn shift(&mut self) {
        if !self.args.is_empty() {
            self.args.remove(0);
        }
    }

    fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p == name)
    }

    /// One substitution step: parameter identifiers become argument
    /// token runs, `&name` inside string literals splices the raw form
    /// of the argument.
    fn subst_params(&self, tokens: &[Token]) -> Vec<Token> {
        let mut out = Vec::with_capacity(tokens.len());
        for tok in tokens {
            match tok {
                Token::Identifier(name) => match self.param_index(name) {
                    Some(n) => {
                        // Missing arguments expand to nothing.
                        if let Some(arg) = self.args.get(n) {
                            out.extend(arg.iter().cloned());
                        }
                    }
                    None => out.push(tok.clone()),
                },
                Token::Str { text, quote } if text.contains('&') => {
                    out.push(Token::Str {
                        text: self.splice_literal(text),
                        quote: *quote,
                    });
                }
                _ => out.push(tok.clone()),
            }
        }
        out
    }

    fn splice_literal(&self, text: &str) -> String {
        let mut out = String::new();
        let bytes = text.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'&' {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len()
                    && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                let name = &text[start..end];
                if let Some(n) = self.param_index(name) {
                    if let Some(first) = self.args.get(n).and_then(|arg| arg.first()) {
                        out.push_str(&first.plain_text());
                    }
                    i = end;
                    continue;
                }
            }
            out.push(bytes[i] as char);
            i += 1;
        }
        out
    }
}

/// Rewrite a body line through the frame at `idx`. REPT/IRP/IRPC chain
/// to their parent frame first; MACRO frames substitute their own
/// parameters and then resolve `##` concatenations.
pub fn substitute(
    frames: &[MacroFrame],
    idx: usize,
    tokens: &[Token],
    line: usize,
) -> AsmResult<Vec<Token>> {
    let frame = &frames[idx];
    match frame.kind {
        FrameKind::Macro => {
            let tokens = frame.subst_params(tokens);
            concat_sharp_sharp(&tokens, line)
        }
        _ => {
            let tokens = if idx > 0 {
                substitute(frames, idx - 1, tokens, line)?
            } else {
                tokens.to_vec()
            };
            Ok(frame.subst_params(&tokens))
        }
    }
}

/// Merge tokens around `##` into single identifiers. A `##` with no
/// token on either side is invalid.
fn concat_sharp_sharp(tokens: &[Token], line: usize) -> AsmResult<Vec<Token>> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut iter = tokens.iter();
    while let Some(tok) = iter.next() {
        if *tok == Token::SharpSharp {
            let left = out.pop().ok_or_else(|| invalid_sharp_sharp(line))?;
            let right = iter.next().ok_or_else(|| invalid_sharp_sharp(line))?;
            if *right == Token::SharpSharp {
                return Err(invalid_sharp_sharp(line));
            }
            out.push(Token::Identifier(left.text() + &right.text()));
        } else {
            out.push(tok.clone());
        }
    }
    Ok(out)
}

/// Collect macro invocation arguments: comma-separated token runs up to
/// the end of the line.
pub fn get_macro_arguments(tz: &mut TokenCursor) -> Vec<MacroArg> {
    let mut arguments = Vec::new();
    loop {
        let mut tok = tz.get();
        if tok == Token::End {
            break;
        }
        let mut arg = MacroArg::new();
        while tok != Token::End && tok != Token::Comma {
            arg.push(tok);
            tok = tz.get();
        }
        arguments.push(arg);
        if tok == Token::End {
            break;
        }
    }
    arguments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tokenizer::scan_line;

    fn toks(line: &str) -> Vec<Token> {
        scan_line(line, false).unwrap()
    }

    fn macro_frame(params: &[&str], args: &[&str]) -> MacroFrame {
        MacroFrame::new(
            FrameKind::Macro,
            params.iter().map(|s| s.to_string()).collect(),
            args.iter().map(|s| toks(s)).collect(),
            0,
        )
    }

    #[test]
    fn substitutes_parameters_with_argument_runs() {
        let frames = vec![macro_frame(&["dst", "src"], &["HL", "1+2"])];
        let out = substitute(&frames, 0, &toks("LD dst, src"), 0).unwrap();
        assert_eq!(
            out,
            vec![
                Token::Ld,
                Token::Hl,
                Token::Comma,
                Token::Number(1),
                Token::Plus,
                Token::Number(2),
            ]
        );
    }

    #[test]
    fn missing_arguments_expand_to_nothing() {
        let frames = vec![macro_frame(&["a", "b"], &["1"])];
        let out = substitute(&frames, 0, &toks("DEFB a, b"), 0).unwrap();
        assert_eq!(out, vec![Token::Defb, Token::Number(1), Token::Comma]);
    }

    #[test]
    fn concatenates_identifiers_with_sharp_sharp() {
        let frames = vec![macro_frame(&["n"], &["2"])];
        let out = substitute(&frames, 0, &toks("label ## n:"), 0).unwrap();
        assert_eq!(
            out,
            vec![Token::Identifier("label2".into()), Token::Colon]
        );
    }

    #[test]
    fn sharp_sharp_at_edges_is_invalid() {
        let frames = vec![macro_frame(&[], &[])];
        assert!(substitute(&frames, 0, &toks("## x"), 5).is_err());
        assert!(substitute(&frames, 0, &toks("x ##"), 5).is_err());
    }

    #[test]
    fn splices_arguments_into_literals() {
        let frames = vec![macro_frame(&["name"], &["world"])];
        let out = substitute(&frames, 0, &toks("DEFB \"hi &name!\""), 0).unwrap();
        assert_eq!(
            out,
            vec![
                Token::Defb,
                Token::Str {
                    text: "hi world!".into(),
                    quote: b'"'
                }
            ]
        );
    }

    #[test]
    fn rept_frames_see_outer_macro_parameters() {
        let frames = vec![
            macro_frame(&["val"], &["42"]),
            MacroFrame::new(FrameKind::Rept, Vec::new(), vec![MacroArg::new()], 0),
        ];
        let out = substitute(&frames, 1, &toks("DEFB val"), 0).unwrap();
        assert_eq!(out, vec![Token::Defb, Token::Number(42)]);
    }

    #[test]
    fn collects_comma_separated_arguments() {
        let mut tz = TokenCursor::new(toks("1+2, HL, (IX+1)"));
        let args = get_macro_arguments(&mut tz);
        assert_eq!(args.len(), 3);
        assert_eq!(args[0], toks("1+2"));
        assert_eq!(args[1], vec![Token::Hl]);
        assert_eq!(args[2].len(), 5);
    }

    #[test]
    fn shift_drops_first_argument() {
        let mut frame = macro_frame(&["a", "b"], &["1", "2"]);
        frame.shift();
        let frames = vec![frame];
        let out = substitute(&frames, 0, &toks("DEFB a"), 0).unwrap();
        // After the shift the first parameter now maps to the old
        // second argument.
        assert_eq!(out, vec![Token::Defb, Token::Number(2)]);
    }
}
