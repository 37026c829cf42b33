// SPDX-License-Identifier: GPL-3.0-or-later

//! Symbol table with per-pass definition states.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::core::error::{undefined_var, AsmResult};

/// Definition state of a symbol. The state machine drives both
/// redefinition checks and phase-error detection across passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Defined {
    NoDefined,
    DefinedDefl,
    PreDefined,
    DefinedPass1,
    DefinedPass2,
}

#[derive(Debug, Clone)]
pub struct VarData {
    value: u16,
    defined: Defined,
    line: usize,
    local: bool,
    used: bool,
}

impl VarData {
    pub fn new(line: usize, value: u16, defined: Defined) -> Self {
        Self {
            value,
            defined,
            line,
            local: false,
            used: false,
        }
    }

    /// A fresh binding introduced by a scope frame in pass 1.
    pub fn new_local(line: usize) -> Self {
        Self {
            value: 0,
            defined: Defined::NoDefined,
            line,
            local: true,
            used: false,
        }
    }

    pub fn set(&mut self, value: u16, defined: Defined) {
        self.value = value;
        self.defined = defined;
    }

    pub fn set_line(&mut self, line: usize) {
        self.line = line;
    }

    pub fn set_used(&mut self) {
        self.used = true;
    }

    pub fn clear(&mut self) {
        self.value = 0;
        self.defined = Defined::NoDefined;
    }

    /// Read the value, marking the symbol as referenced.
    pub fn get_value(&mut self) -> u16 {
        self.used = true;
        self.value
    }

    /// Peek the value without touching the used flag.
    pub fn value(&self) -> u16 {
        self.value
    }

    /// True when the symbol is defined and holds the same value as on
    /// the previous pass; a failed check is a phase error.
    pub fn check_value(&self, newvalue: u16) -> bool {
        self.defined != Defined::NoDefined && self.value == newvalue
    }

    pub fn def(&self) -> Defined {
        self.defined
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    pub fn line(&self) -> usize {
        self.line
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    vars: BTreeMap<String, VarData>,
    // Symbols probed by DEFINED/IFDEF this pass. A probed symbol that
    // turns out undefined evaluates to 0 instead of raising, so guarded
    // expressions like `DEFINED X || X == 0` cannot cascade.
    probed: std::collections::BTreeSet<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, name: &str) -> Option<&VarData> {
        self.vars.get(name)
    }

    pub fn entry_mut(&mut self, name: &str) -> Option<&mut VarData> {
        self.vars.get_mut(name)
    }

    /// Fetch the symbol, inserting an undefined placeholder when absent.
    pub fn ensure(&mut self, name: &str) -> &mut VarData {
        self.vars
            .entry(name.to_string())
            .or_insert_with(|| VarData::new(0, 0, Defined::NoDefined))
    }

    pub fn insert(&mut self, name: &str, data: VarData) {
        self.vars.insert(name.to_string(), data);
    }

    /// Insert only when the name is not yet present, keeping any
    /// existing binding untouched.
    pub fn insert_new(&mut self, name: &str, data: VarData) {
        if let Entry::Vacant(slot) = self.vars.entry(name.to_string()) {
            slot.insert(data);
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.vars.remove(name);
    }

    pub fn exists(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// DEFINED operator and IFDEF test. Marks the symbol used when it
    /// exists. A pass-1 definition no longer counts on later passes
    /// until re-established.
    pub fn is_defined(&mut self, name: &str, pass: u8) -> bool {
        self.probed.insert(name.to_string());
        match self.vars.get_mut(name) {
            Some(data) => {
                data.set_used();
                let def = data.def();
                !(def == Defined::NoDefined || (pass > 1 && def == Defined::DefinedPass1))
            }
            None => false,
        }
    }

    /// Expression-time lookup with the per-pass policy: unknown symbols
    /// evaluate to 0 on pass 1 when not required, are errors when
    /// required or on pass >= 2, and never raise inside ignored
    /// subexpressions.
    pub fn get_value(
        &mut self,
        name: &str,
        line: usize,
        required: bool,
        ignored: bool,
        pass: u8,
    ) -> AsmResult<u16> {
        if !self.exists(name) {
            if (pass > 1 || required) && !ignored && !self.probed.contains(name) {
                return Err(undefined_var(line, name));
            }
            if ignored {
                return Ok(0);
            }
        }
        if self.ensure(name).def() == Defined::NoDefined {
            if (pass > 1 || required) && !ignored && !self.probed.contains(name) {
                return Err(undefined_var(line, name));
            }
            if !ignored {
                self.ensure(name).set_used();
            }
            Ok(0)
        } else {
            Ok(self.ensure(name).get_value())
        }
    }

    /// Clear DEFL definitions to start a pass.
    pub fn clear_defl(&mut self) {
        for data in self.vars.values_mut() {
            if data.def() == Defined::DefinedDefl {
                data.clear();
            }
        }
    }

    /// Forget DEFINED probes at the start of a pass.
    pub fn clear_probed(&mut self) {
        self.probed.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VarData)> {
        self.vars.iter().map(|(name, data)| (name.as_str(), data))
    }
}
