// SPDX-License-Identifier: GPL-3.0-or-later

//! Conditional-assembly state: the open IF count and the source line of
//! each open IF, kept for diagnostics. Macro expansion saves and
//! restores the whole state so an IF opened outside a macro body cannot
//! be closed inside it.

#[derive(Debug, Clone, Default)]
pub struct CondStack {
    open_lines: Vec<usize>,
}

impl CondStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self) -> usize {
        self.open_lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open_lines.is_empty()
    }

    pub fn push(&mut self, line: usize) {
        self.open_lines.push(line);
    }

    pub fn pop(&mut self) -> Option<usize> {
        self.open_lines.pop()
    }

    /// Line of the innermost open IF.
    pub fn last_open_line(&self) -> Option<usize> {
        self.open_lines.last().copied()
    }

    pub fn clear(&mut self) {
        self.open_lines.clear();
    }

    /// Swap out the whole state on macro entry; any IF left open inside
    /// the body is silently discarded when the saved state comes back.
    pub fn take(&mut self) -> CondStack {
        std::mem::take(self)
    }

    pub fn restore(&mut self, saved: CondStack) {
        *self = saved;
    }
}
