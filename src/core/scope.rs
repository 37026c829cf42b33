// SPDX-License-Identifier: GPL-3.0-or-later

//! Local scope frames: PROC, MACRO and auto-local levels.
//!
//! A frame records, for every local name, the shadowed outer binding and
//! a synthesized globalized name. The globalized slot is where the local
//! binding is parked when the frame exits, so the next pass can pick up
//! the value computed in this one: the globalized counter is reset per
//! pass and local introductions happen in a deterministic order, making
//! the mapping stable across passes. Frames never hold a reference to
//! the engine; they receive the symbol table on enter and exit.

use std::collections::BTreeMap;

use crate::core::symbol_table::{Defined, SymbolTable, VarData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Proc,
    Macro,
    Auto,
}

/// A local-variable warning produced by the ENDP check.
#[derive(Debug, Clone)]
pub struct LocalWarning {
    pub name: String,
    pub line: usize,
    pub message: &'static str,
}

#[derive(Debug)]
pub struct ScopeFrame {
    kind: ScopeKind,
    saved: BTreeMap<String, VarData>,
    globalized: BTreeMap<String, String>,
    line: usize,
}

impl ScopeFrame {
    pub fn new(kind: ScopeKind, line: usize) -> Self {
        Self {
            kind,
            saved: BTreeMap::new(),
            globalized: BTreeMap::new(),
            line,
        }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn is_auto(&self) -> bool {
        self.kind == ScopeKind::Auto
    }

    pub fn line(&self) -> usize {
        self.line
    }

    /// Record `name` as local to this frame. Returns a warning text when
    /// the name was already declared here (ignored for auto frames,
    /// where re-encountering a name is normal).
    pub fn add(
        &mut self,
        name: &str,
        symbols: &mut SymbolTable,
        localcount: &mut u32,
        pass: u8,
        line: usize,
    ) -> Option<String> {
        if self.saved.contains_key(name) {
            if !self.is_auto() {
                return Some(format!("redeclared LOCAL {name}"));
            }
            return None;
        }

        let shadowed = symbols.ensure(name).clone();
        self.saved.insert(name.to_string(), shadowed);

        let globname = format!("{:08X}", *localcount);
        *localcount += 1;
        self.globalized.insert(name.to_string(), globname.clone());

        if pass == 1 {
            symbols.insert(name, VarData::new_local(line));
        } else {
            let parked = symbols.ensure(&globname).clone();
            symbols.insert(name, parked);
        }
        None
    }

    /// Close the frame: park each local binding under its globalized
    /// name, then restore (or erase) the shadowed one.
    pub fn exit(self, symbols: &mut SymbolTable) {
        for (name, shadowed) in self.saved {
            let globname = &self.globalized[&name];
            let current = symbols.ensure(&name).clone();
            symbols.insert(globname, current);
            if shadowed.def() != Defined::NoDefined {
                symbols.insert(&name, shadowed);
            } else {
                symbols.remove(&name);
            }
        }
    }

    /// ENDP diagnostics (pass >= 2): report locals that went unused,
    /// undefined, or both. Reads the globalized slots, i.e. the state
    /// parked at the end of the previous pass.
    pub fn check_local(&self, symbols: &mut SymbolTable) -> Vec<LocalWarning> {
        let mut warnings = Vec::new();
        for name in self.saved.keys() {
            let data = symbols.ensure(&self.globalized[name]);
            let not_defined = data.def() == Defined::NoDefined;
            let not_used = !data.is_used();
            if not_defined || not_used {
                let message = if not_defined && not_used {
                    "declared but never referenced"
                } else if not_defined {
                    "is never defined"
                } else {
                    "is never used"
                };
                warnings.push(LocalWarning {
                    name: name.clone(),
                    line: data.line(),
                    message,
                });
            }
        }
        warnings
    }
}

#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<ScopeFrame>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push(&mut self, frame: ScopeFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<ScopeFrame> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&ScopeFrame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut ScopeFrame> {
        self.frames.last_mut()
    }
}
