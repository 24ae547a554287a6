// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Symbol table with occurrence back-references.
//!
//! Symbols live in an arena addressed by `SymId`; named symbols are
//! additionally indexed by name. A symbol either has a value or carries
//! an unresolved expression; every unresolved reference to it from some
//! expression is recorded as an occurrence so that resolution is O(1)
//! per occurrence.

use std::collections::HashMap;

/// Section id of absolute (non-storable) values.
pub const ASMSECT_ABS: u32 = u32::MAX;
/// Kernel id of the global (kernel-less) space.
pub const ASMKERN_GLOBAL: u32 = u32::MAX;

/// Stable handle into the symbol arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymId(pub u32);

/// Stable handle into the expression pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

/// A symbol occurrence inside an expression: which expression, which
/// argument slot, which operator slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymOccurrence {
    pub expr: ExprId,
    pub arg_index: usize,
    pub op_index: usize,
}

/// ELF-style symbol binding kept in the upper nibble of `info`.
pub const SYM_BIND_GLOBAL: u8 = 1 << 4;
/// ELF-style symbol types kept in the lower nibble of `info`.
pub const SYM_TYPE_OBJECT: u8 = 1;
pub const SYM_TYPE_FUNC: u8 = 2;

#[derive(Debug)]
pub struct AsmSymbol {
    pub name: String,
    pub section_id: u32,
    pub value: u64,
    pub size: u64,
    pub info: u8,
    pub other: u8,
    pub has_value: bool,
    pub once_defined: bool,
    pub resolving: bool,
    pub base: bool,
    pub snapshot: bool,
    pub expr: Option<ExprId>,
    pub occurrences: Vec<SymOccurrence>,
}

impl AsmSymbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            section_id: ASMSECT_ABS,
            value: 0,
            size: 0,
            info: 0,
            other: 0,
            has_value: false,
            once_defined: false,
            resolving: false,
            base: false,
            snapshot: false,
            expr: None,
            occurrences: Vec::new(),
        }
    }

    /// Forget the value but keep the last one for inspection; local
    /// forward labels are undefined again right after each definition.
    pub fn undefine(&mut self) {
        self.has_value = false;
        self.expr = None;
    }

    pub fn add_occurrence(&mut self, expr: ExprId, arg_index: usize, op_index: usize) {
        self.occurrences.push(SymOccurrence {
            expr,
            arg_index,
            op_index,
        });
    }

    pub fn remove_occurrence(&mut self, expr: ExprId, arg_index: usize, op_index: usize) {
        self.occurrences
            .retain(|o| !(o.expr == expr && o.arg_index == arg_index && o.op_index == op_index));
    }
}

/// The symbol arena plus the name index. The arena also holds the
/// anonymous snapshot symbols created for `.eqv` references; those are
/// reachable only through expressions, never by name.
pub struct SymbolTable {
    names: HashMap<String, SymId>,
    syms: Vec<AsmSymbol>,
}

impl SymbolTable {
    /// Creates the table with the output-counter symbol `.` predefined
    /// at offset 0 of section 0.
    pub fn new() -> Self {
        let mut table = Self {
            names: HashMap::new(),
            syms: Vec::new(),
        };
        let mut counter = AsmSymbol::new(".");
        counter.section_id = 0;
        counter.has_value = true;
        table.insert(counter);
        table
    }

    /// Handle of the output-counter symbol `.`.
    pub fn output_counter(&self) -> SymId {
        SymId(0)
    }

    fn insert(&mut self, sym: AsmSymbol) -> SymId {
        let id = SymId(self.syms.len() as u32);
        self.names.insert(sym.name.clone(), id);
        self.syms.push(sym);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<SymId> {
        self.names.get(name).copied()
    }

    pub fn lookup_or_create(&mut self, name: &str) -> SymId {
        match self.names.get(name) {
            Some(id) => *id,
            None => self.insert(AsmSymbol::new(name)),
        }
    }

    /// Add an anonymous snapshot symbol; it keeps the original name for
    /// diagnostics but is not reachable through the name index.
    pub fn add_snapshot(&mut self, name: impl Into<String>) -> SymId {
        let mut sym = AsmSymbol::new(name);
        sym.snapshot = true;
        let id = SymId(self.syms.len() as u32);
        self.syms.push(sym);
        id
    }

    pub fn get(&self, id: SymId) -> &AsmSymbol {
        &self.syms[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SymId) -> &mut AsmSymbol {
        &mut self.syms[id.0 as usize]
    }

    /// Every symbol in the arena, snapshots included.
    pub fn all_ids(&self) -> Vec<SymId> {
        (0..self.syms.len() as u32).map(SymId).collect()
    }

    /// All named symbols in name-sorted order.
    pub fn named_sorted(&self) -> Vec<(&str, &AsmSymbol)> {
        let mut entries: Vec<(&str, &AsmSymbol)> = self
            .names
            .iter()
            .map(|(name, id)| (name.as_str(), self.get(*id)))
            .collect();
        entries.sort_by_key(|(name, _)| *name);
        entries
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
