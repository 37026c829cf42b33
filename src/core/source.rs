// SPDX-License-Identifier: GPL-3.0-or-later

//! The pre-tokenized line stream the engine walks on every pass.
//!
//! Files are scanned once at load time. INCLUDE is resolved here: the
//! include line itself stays in the stream (so the parser can trace it)
//! followed by the included lines and an end-of-include marker.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{AsmError, AsmResult, SourceContextExt};
use crate::core::token::Token;
use crate::core::tokenizer::{scan_line, TokenCursor};

const MAX_INCLUDE_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct SourceLine {
    pub tokens: Vec<Token>,
    pub text: String,
    pub file: usize,
    pub num: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SourceStream {
    lines: Vec<SourceLine>,
    files: Vec<String>,
    include_dirs: Vec<PathBuf>,
    nocase: bool,
    pos: usize,
    eof_hit: bool,
}

impl SourceStream {
    pub fn new(nocase: bool) -> Self {
        Self {
            nocase,
            ..Self::default()
        }
    }

    pub fn add_include_dir(&mut self, dir: impl Into<PathBuf>) {
        self.include_dirs.push(dir.into());
    }

    /// Must be set before any source is loaded.
    pub fn set_nocase(&mut self, nocase: bool) {
        self.nocase = nocase;
    }

    /// Resolve a file name against the include search path.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let direct = PathBuf::from(name);
        if direct.is_file() {
            return Some(direct);
        }
        self.include_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|p| p.is_file())
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> AsmResult<()> {
        self.load_file_depth(path.as_ref(), 0)
    }

    fn load_file_depth(&mut self, path: &Path, depth: usize) -> AsmResult<()> {
        let name = path.to_string_lossy().to_string();
        let text = fs::read_to_string(path)
            .map_err(|_| crate::core::error::file_not_found(self.lines.len(), &name))?;
        self.load_text(&name, &text, depth)
    }

    /// Load source text under a file name; used directly by tests and by
    /// callers that assemble in-memory buffers.
    pub fn load_source(&mut self, name: &str, text: &str) -> AsmResult<()> {
        self.load_text(name, text, 0)
    }

    fn load_text(&mut self, name: &str, text: &str, depth: usize) -> AsmResult<()> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(AsmError::new(
                self.lines.len(),
                "INCLUDE nesting too deep",
            ));
        }
        let file = self.files.len();
        self.files.push(name.to_string());

        for (idx, raw) in text.lines().enumerate() {
            let num = idx as u32 + 1;
            let tokens = scan_line(raw, self.nocase)
                .map_err(|msg| AsmError::new(self.lines.len(), msg))?;
            let is_include = matches!(tokens.first(), Some(Token::Include));
            let include_name = if is_include {
                match tokens.get(1) {
                    Some(Token::Str { text, .. }) => Some(text.clone()),
                    _ => {
                        return Err(AsmError::new(
                            self.lines.len(),
                            "INCLUDE requires a file name",
                        ))
                    }
                }
            } else {
                None
            };

            self.lines.push(SourceLine {
                tokens,
                text: raw.to_string(),
                file,
                num,
            });

            if let Some(include_name) = include_name {
                let resolved = self.resolve(&include_name).ok_or_else(|| {
                    crate::core::error::file_not_found(self.lines.len() - 1, &include_name)
                })?;
                self.load_file_depth(&resolved, depth + 1)?;
                self.lines.push(SourceLine {
                    tokens: vec![Token::EndOfInclude],
                    text: String::new(),
                    file,
                    num,
                });
            }
        }
        Ok(())
    }

    // Cursor operations.

    pub fn begin_line(&mut self) {
        self.pos = 0;
        self.eof_hit = false;
    }

    pub fn next_line(&mut self) -> bool {
        if self.pos < self.lines.len() {
            self.pos += 1;
            true
        } else {
            self.eof_hit = true;
            false
        }
    }

    pub fn prev_line(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    /// Index of the current line; used as the position recorded in
    /// errors and macro definitions.
    pub fn get_line(&self) -> usize {
        self.pos.saturating_sub(1)
    }

    /// Position the cursor so the next `next_line` yields line `n + 1`.
    pub fn set_line(&mut self, n: usize) {
        self.pos = n + 1;
        self.eof_hit = false;
    }

    /// Move the cursor to the end of the stream (the END directive).
    pub fn set_end(&mut self) {
        self.pos = self.lines.len();
    }

    pub fn pass_eof(&self) -> bool {
        self.eof_hit
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Tokens of the current line.
    pub fn current_tokens(&self) -> &[Token] {
        &self.lines[self.get_line()].tokens
    }

    /// A fresh cursor over the current line.
    pub fn current_cursor(&self) -> TokenCursor {
        TokenCursor::new(self.current_tokens().to_vec())
    }

    pub fn line_text(&self, n: usize) -> Option<&str> {
        self.lines.get(n).map(|line| line.text.as_str())
    }
}

impl SourceContextExt for SourceStream {
    fn line_info(&self, line: usize) -> Option<(String, u32, String)> {
        self.lines.get(line).map(|sl| {
            (
                self.files
                    .get(sl.file)
                    .cloned()
                    .unwrap_or_default(),
                sl.num,
                sl.text.clone(),
            )
        })
    }
}
