// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Pseudo-op recognition and the clause/capture directives.
//!
//! Data and symbol directives live in `pseudo_ops_data.rs` and
//! `pseudo_ops_symbols.rs`; this file owns the dispatch table, the
//! conditional clauses, macro and repetition capture, include handling
//! and the format selection ops.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use crate::core::error::AsmErrorKind;
use crate::core::literal;
use crate::core::source::{AsmSource, MacroSubst};

use super::clause::{AsmClause, AsmClauseType};
use super::*;

pub(crate) const PSEUDO_OP_NAMES: &[&str] = &[
    "32bit", "64bit", "abort", "amd", "ascii", "asciz", "byte", "data", "else", "elseif",
    "endif", "endm", "endr", "equ", "equiv", "eqv", "error", "exitm", "fill", "gallium",
    "global", "globl", "gpu", "half", "hword", "if", "ifdef", "ifeq", "ifndef", "ifne",
    "include", "int", "kernel", "long", "macro", "print", "purgem", "quad", "rawcode",
    "rept", "section", "set", "short", "size", "skip", "space", "string", "text", "type",
    "warning", "word",
];

pub(crate) fn is_pseudo_op_name(name: &str) -> bool {
    PSEUDO_OP_NAMES.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IfCond {
    NonZero,
    Zero,
    Defined,
    NotDefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EquKind {
    Set,
    Equiv,
    Eqv,
}

/// First pseudo-op token of a statement, skipping label prefixes.
/// Returns the lowercased name without the leading dot.
fn first_pseudo_token(line: &[u8], mut pos: usize, end: usize) -> Option<String> {
    loop {
        while pos < end && (line[pos] == b' ' || line[pos] == b'\t') {
            pos += 1;
        }
        if pos >= end {
            return None;
        }
        let b = line[pos];
        if b.is_ascii_digit() {
            let mut p = pos;
            while p < end && line[p].is_ascii_digit() {
                p += 1;
            }
            if p < end && line[p] == b':' {
                pos = p + 1;
                continue;
            }
            return None;
        }
        if !literal::is_ident_start(b) {
            return None;
        }
        let ident_end = literal::scan_identifier(&line[..end], pos).unwrap_or(pos + 1);
        if ident_end < end && line[ident_end] == b':' {
            pos = ident_end + 1;
            continue;
        }
        if b != b'.' {
            return None;
        }
        return Some(text_of(line, pos + 1, ident_end).to_ascii_lowercase());
    }
}

impl Assembler {
    pub(crate) fn dispatch_pseudo_op(&mut self, name_start: usize, name_end: usize, end: usize) {
        let name = text_of(&self.line, name_start + 1, name_end).to_ascii_lowercase();
        let args = name_end;
        match name.as_str() {
            "byte" => self.data_directive(name_start, args, end, 1),
            "short" | "half" | "hword" => self.data_directive(name_start, args, end, 2),
            "word" | "int" | "long" => self.data_directive(name_start, args, end, 4),
            "quad" => self.data_directive(name_start, args, end, 8),
            "ascii" => self.ascii_directive(name_start, args, end, false),
            "asciz" | "string" => self.ascii_directive(name_start, args, end, true),
            "fill" => self.fill_directive(name_start, args, end),
            "skip" | "space" => self.skip_directive(name_start, args, end),
            "equ" | "set" => self.equ_directive(args, end, EquKind::Set),
            "equiv" => self.equ_directive(args, end, EquKind::Equiv),
            "eqv" => self.equ_directive(args, end, EquKind::Eqv),
            "if" | "ifne" => self.if_directive(name_start, args, end, IfCond::NonZero),
            "ifeq" => self.if_directive(name_start, args, end, IfCond::Zero),
            "ifdef" => self.if_directive(name_start, args, end, IfCond::Defined),
            "ifndef" => self.if_directive(name_start, args, end, IfCond::NotDefined),
            "elseif" => self.elseif_directive(name_start, args, end),
            "else" => self.else_directive(name_start, args, end),
            "endif" => self.endif_directive(name_start, args, end),
            "rept" => self.rept_directive(name_start, args, end),
            "endr" => self.endr_directive(name_start),
            "macro" => self.macro_directive(name_start, args, end),
            "endm" => self.endm_directive(name_start),
            "exitm" => self.exitm_directive(name_start),
            "purgem" => self.purgem_directive(args, end),
            "include" => self.include_directive(name_start, args, end),
            "global" | "globl" => self.global_directive(args, end),
            "size" => self.size_directive(args, end),
            "type" => self.type_directive(args, end),
            "print" => self.print_directive(args, end),
            "warning" => self.warning_directive(name_start, args, end),
            "error" => self.error_directive(name_start, args, end),
            "abort" => {
                self.print_error_at(name_start, AsmErrorKind::Syntax, "Aborted assembly");
                self.fatal = true;
            }
            "kernel" => self.kernel_directive(name_start, args, end),
            "section" => self.section_directive(args, end),
            "text" => self.fixed_section_directive(name_start, ".text", args, end),
            "data" => self.fixed_section_directive(name_start, ".data", args, end),
            "amd" => self.format_directive(name_start, BinaryFormat::Amd, args, end),
            "rawcode" => self.format_directive(name_start, BinaryFormat::RawCode, args, end),
            "gallium" => self.format_directive(name_start, BinaryFormat::Gallium, args, end),
            "32bit" => self.bitness_directive(name_start, false, args, end),
            "64bit" => self.bitness_directive(name_start, true, args, end),
            "gpu" => self.gpu_directive(args, end),
            _ => self.handler_pseudo_op(name_start, &name, args, end),
        }
    }

    /// Inside an untaken clause only the clause-bracketing directives
    /// are honoured; everything else is scanned and dropped.
    pub(crate) fn process_skipped_statement(&mut self, start: usize, end: usize) {
        let mut pos = start;
        loop {
            self.skip_spaces(&mut pos, end);
            if pos >= end {
                return;
            }
            let b = self.line[pos];
            if b.is_ascii_digit() {
                let mut p = pos;
                while p < end && self.line[p].is_ascii_digit() {
                    p += 1;
                }
                if p < end && self.line[p] == b':' {
                    pos = p + 1;
                    continue;
                }
                return;
            }
            if !literal::is_ident_start(b) {
                return;
            }
            let ident_end = literal::scan_identifier(&self.line[..end], pos).unwrap_or(pos + 1);
            if ident_end < end && self.line[ident_end] == b':' {
                pos = ident_end + 1;
                continue;
            }
            if b != b'.' {
                return;
            }
            let name = text_of(&self.line, pos + 1, ident_end).to_ascii_lowercase();
            match name.as_str() {
                "if" | "ifdef" | "ifndef" | "ifeq" | "ifne" => {
                    self.if_directive(pos, ident_end, end, IfCond::NonZero)
                }
                "elseif" => self.elseif_directive(pos, ident_end, end),
                "else" => self.else_directive(pos, ident_end, end),
                "endif" => self.endif_directive(pos, ident_end, end),
                "macro" => self.push_skipped_clause(pos, AsmClauseType::Macro),
                "endm" => self.endm_directive(pos),
                "rept" => self.rept_directive(pos, ident_end, end),
                "endr" => self.endr_directive(pos),
                _ => {}
            }
            return;
        }
    }

    fn push_skipped_clause(&mut self, name_start: usize, clause_type: AsmClauseType) {
        let pos0 = self.source_pos(name_start);
        let mut clause = AsmClause::new(clause_type, pos0);
        clause.cond_satisfied = true;
        clause.skipping = true;
        self.clauses.push(clause);
    }

    pub(crate) fn if_directive(
        &mut self,
        name_start: usize,
        args: usize,
        end: usize,
        cond: IfCond,
    ) {
        let pos0 = self.source_pos(name_start);
        let parent_skipping = self.clauses.skipping();
        let taken = if parent_skipping {
            false
        } else {
            match cond {
                IfCond::NonZero => self.eval_if_cond(args, end).map(|v| v != 0).unwrap_or(false),
                IfCond::Zero => self.eval_if_cond(args, end).map(|v| v == 0).unwrap_or(false),
                IfCond::Defined => self.ifdef_check(args, end).unwrap_or(false),
                IfCond::NotDefined => self.ifdef_check(args, end).map(|d| !d).unwrap_or(false),
            }
        };
        let mut clause = AsmClause::new(AsmClauseType::If, pos0);
        clause.cond_satisfied = if parent_skipping { true } else { taken };
        clause.skipping = parent_skipping || !taken;
        self.clauses.push(clause);
    }

    fn eval_if_cond(&mut self, args: usize, end: usize) -> Option<u64> {
        let mut pos = args;
        let value = self.eval_immediate_abs(&mut pos, end)?;
        if self.check_garbage(pos, end) {
            return None;
        }
        Some(value)
    }

    fn ifdef_check(&mut self, args: usize, end: usize) -> Option<bool> {
        let mut pos = args;
        self.skip_spaces(&mut pos, end);
        let Some(ident_end) = literal::scan_identifier(&self.line[..end], pos) else {
            self.print_error_at(pos.min(end), AsmErrorKind::Syntax, "Expected symbol name");
            return None;
        };
        let name = text_of(&self.line, pos, ident_end);
        if self.check_garbage(ident_end, end) {
            return None;
        }
        let defined = self
            .symbols
            .lookup(&name)
            .map(|id| self.symbols.get(id).has_value)
            .unwrap_or(false);
        Some(defined)
    }

    pub(crate) fn elseif_directive(&mut self, name_start: usize, args: usize, end: usize) {
        match self.clauses.last().map(|c| c.clause_type) {
            Some(AsmClauseType::If) | Some(AsmClauseType::ElseIf) => {}
            Some(AsmClauseType::Else) => {
                let prev = self
                    .clauses
                    .last()
                    .map(|c| c.prev_if_pos.format_location())
                    .unwrap_or_default();
                self.print_error_at(
                    name_start,
                    AsmErrorKind::Syntax,
                    &format!("'.elseif' after '.else' (at {})", prev),
                );
                return;
            }
            _ => {
                self.print_error_at(name_start, AsmErrorKind::Syntax, "'.elseif' without '.if'");
                return;
            }
        }
        let parent_skipping = self.clauses.parent_skipping();
        let satisfied = self
            .clauses
            .last()
            .map(|c| c.cond_satisfied)
            .unwrap_or(false);
        let taken = if parent_skipping || satisfied {
            false
        } else {
            self.eval_if_cond(args, end).map(|v| v != 0).unwrap_or(false)
        };
        let pos0 = self.source_pos(name_start);
        let Some(clause) = self.clauses.last_mut() else {
            return;
        };
        clause.clause_type = AsmClauseType::ElseIf;
        clause.prev_if_pos = pos0;
        if parent_skipping {
            clause.skipping = true;
        } else if taken {
            clause.cond_satisfied = true;
            clause.skipping = false;
        } else {
            clause.skipping = true;
        }
    }

    pub(crate) fn else_directive(&mut self, name_start: usize, args: usize, end: usize) {
        match self.clauses.last().map(|c| c.clause_type) {
            Some(AsmClauseType::If) | Some(AsmClauseType::ElseIf) => {}
            Some(AsmClauseType::Else) => {
                let prev = self
                    .clauses
                    .last()
                    .map(|c| c.prev_if_pos.format_location())
                    .unwrap_or_default();
                self.print_error_at(
                    name_start,
                    AsmErrorKind::Syntax,
                    &format!("'.else' after '.else' (at {})", prev),
                );
                return;
            }
            _ => {
                self.print_error_at(name_start, AsmErrorKind::Syntax, "'.else' without '.if'");
                return;
            }
        }
        let _ = self.check_garbage(args, end);
        let parent_skipping = self.clauses.parent_skipping();
        let pos0 = self.source_pos(name_start);
        let Some(clause) = self.clauses.last_mut() else {
            return;
        };
        let satisfied = clause.cond_satisfied;
        clause.clause_type = AsmClauseType::Else;
        clause.prev_if_pos = pos0;
        clause.skipping = parent_skipping || satisfied;
        clause.cond_satisfied = true;
    }

    pub(crate) fn endif_directive(&mut self, name_start: usize, args: usize, end: usize) {
        let conditional_top = self
            .clauses
            .last()
            .map(|c| c.clause_type.is_conditional())
            .unwrap_or(false);
        if !conditional_top {
            self.print_error_at(name_start, AsmErrorKind::Syntax, "'.endif' without '.if'");
            return;
        }
        let _ = self.check_garbage(args, end);
        self.clauses.pop();
    }

    pub(crate) fn rept_directive(&mut self, name_start: usize, args: usize, end: usize) {
        let pos0 = self.source_pos(name_start);
        if self.clauses.skipping() {
            self.push_skipped_clause(name_start, AsmClauseType::Repeat);
            return;
        }
        let mut pos = args;
        let count = self.eval_immediate_abs(&mut pos, end).unwrap_or(0);
        let _ = self.check_garbage(pos, end);
        self.clauses.push(AsmClause::new(AsmClauseType::Repeat, pos0));
        let Some(body) = self.capture_body("rept", "endr") else {
            return;
        };
        self.clauses.pop();
        if count == 0 {
            return;
        }
        if self.repetition_level >= REPEAT_DEPTH_LIMIT {
            self.fatal_error(name_start, "Repetition depth exceeded");
            return;
        }
        let fallback = match self.filters.last() {
            Some(f) => f.source(),
            None => AsmSource::top_file("<none>"),
        };
        self.filters.push(AsmInputFilter::Repeat(AsmRepeatInputFilter::new(
            body, count, fallback,
        )));
        self.repetition_level += 1;
    }

    pub(crate) fn endr_directive(&mut self, name_start: usize) {
        if self.clauses.skipping()
            && self.clauses.last().map(|c| c.clause_type) == Some(AsmClauseType::Repeat)
        {
            self.clauses.pop();
            return;
        }
        self.print_error_at(name_start, AsmErrorKind::Syntax, "'.endr' without '.rept'");
    }

    pub(crate) fn macro_directive(&mut self, name_start: usize, args: usize, end: usize) {
        let pos0 = self.source_pos(name_start);
        let mut pos = args;
        self.skip_spaces(&mut pos, end);
        let mut bad = false;
        let mut name = String::new();
        match literal::scan_identifier(&self.line[..end], pos) {
            Some(ident_end) => {
                name = text_of(&self.line, pos, ident_end);
                pos = ident_end;
            }
            None => {
                self.print_error_at(pos.min(end), AsmErrorKind::Syntax, "Expected macro name");
                bad = true;
            }
        }
        if !bad && (name.starts_with('.') || self.is_reserved_name(&name)) {
            self.print_error_at(
                name_start,
                AsmErrorKind::Syntax,
                &format!("Name '{}' is a reserved name", name),
            );
            bad = true;
        }
        let mut params: Vec<MacroParam> = Vec::new();
        while !bad {
            self.skip_spaces(&mut pos, end);
            if pos >= end {
                break;
            }
            if self.line[pos] == b',' {
                pos += 1;
                continue;
            }
            let Some(ident_end) = literal::scan_identifier(&self.line[..end], pos) else {
                self.print_error_at(pos, AsmErrorKind::Syntax, "Invalid macro parameter");
                bad = true;
                break;
            };
            let pname = text_of(&self.line, pos, ident_end);
            pos = ident_end;
            let mut default = None;
            let mut required = false;
            if pos < end && self.line[pos] == b'=' {
                pos += 1;
                default = Some(self.parse_macro_arg_value(&mut pos, end));
            } else if pos < end && self.line[pos] == b':' {
                pos += 1;
                let qual_end = literal::scan_identifier(&self.line[..end], pos).unwrap_or(pos);
                let qual = text_of(&self.line, pos, qual_end);
                if qual != "req" {
                    self.print_error_at(
                        pos,
                        AsmErrorKind::Syntax,
                        &format!("Unknown macro parameter qualifier '{}'", qual),
                    );
                    bad = true;
                    break;
                }
                required = true;
                pos = qual_end;
            }
            if params.iter().any(|p| p.name == pname) {
                self.print_error_at(
                    name_start,
                    AsmErrorKind::Syntax,
                    &format!("Duplicated macro parameter '{}'", pname),
                );
                bad = true;
                break;
            }
            params.push(MacroParam {
                name: pname,
                default,
                required,
            });
        }
        if !bad && self.macros.contains_key(&name) {
            self.print_error_at(
                name_start,
                AsmErrorKind::Redefinition,
                &format!("Macro '{}' is already defined", name),
            );
            bad = true;
        }
        self.clauses.push(AsmClause::new(AsmClauseType::Macro, pos0));
        let Some(body) = self.capture_body("macro", "endm") else {
            return;
        };
        self.clauses.pop();
        if bad {
            return;
        }
        self.macros
            .insert(name.clone(), Rc::new(AsmMacro { name, params, body }));
    }

    pub(crate) fn endm_directive(&mut self, name_start: usize) {
        if self.clauses.skipping()
            && self.clauses.last().map(|c| c.clause_type) == Some(AsmClauseType::Macro)
        {
            self.clauses.pop();
            return;
        }
        self.print_error_at(name_start, AsmErrorKind::Syntax, "'.endm' without '.macro'");
    }

    pub(crate) fn exitm_directive(&mut self, name_start: usize) {
        let mut found = false;
        for filter in self.filters.iter_mut().rev() {
            if filter.is_macro() {
                filter.set_exit();
                found = true;
                break;
            }
            if filter.is_stream() {
                break;
            }
            filter.set_exit();
        }
        if !found {
            self.print_error_at(
                name_start,
                AsmErrorKind::Syntax,
                "'.exitm' outside of a macro",
            );
        }
    }

    pub(crate) fn purgem_directive(&mut self, args: usize, end: usize) {
        let mut pos = args;
        self.skip_spaces(&mut pos, end);
        let Some(ident_end) = literal::scan_identifier(&self.line[..end], pos) else {
            self.print_error_at(pos.min(end), AsmErrorKind::Syntax, "Expected macro name");
            return;
        };
        let name = text_of(&self.line, pos, ident_end);
        if self.check_garbage(ident_end, end) {
            return;
        }
        if self.macros.remove(&name).is_none() {
            self.print_error_at(
                pos,
                AsmErrorKind::Syntax,
                &format!("Unknown macro '{}'", name),
            );
        }
    }

    /// Capture the body of a `.macro`/`.rept` block up to the matching
    /// terminator. Returns `None` at end of input (the open clause is
    /// left on the stack for the final unterminated-clause report).
    fn capture_body(&mut self, open: &str, close: &str) -> Option<Vec<CapturedLine>> {
        let mut body: Vec<CapturedLine> = Vec::new();
        let mut level = 0usize;
        loop {
            let line = self.read_line()?;
            let mut terminated = false;
            for (start, end) in split_statements(&line) {
                let Some(token) = first_pseudo_token(&line, start, end) else {
                    continue;
                };
                if token == open {
                    level += 1;
                } else if token == close {
                    if level == 0 {
                        terminated = true;
                        break;
                    }
                    level -= 1;
                }
            }
            if terminated {
                return Some(body);
            }
            let filter = self.filters.last()?;
            body.push(filter.capture_line(line));
        }
    }

    pub(crate) fn expand_macro(
        &mut self,
        name: &str,
        name_start: usize,
        name_end: usize,
        end: usize,
    ) {
        if self.macro_subst_level >= MACRO_DEPTH_LIMIT {
            self.fatal_error(name_start, "Macro substitution depth exceeded");
            return;
        }
        let Some(mac) = self.macros.get(name).cloned() else {
            return;
        };
        let mut pos = name_end;
        let mut values: Vec<String> = Vec::new();
        loop {
            self.skip_spaces(&mut pos, end);
            if pos >= end {
                break;
            }
            if self.line[pos] == b',' {
                pos += 1;
                continue;
            }
            values.push(self.parse_macro_arg_value(&mut pos, end));
        }
        if values.len() > mac.params.len() {
            self.print_error_at(
                name_start,
                AsmErrorKind::Syntax,
                &format!("Too many arguments for macro '{}'", name),
            );
            return;
        }
        let mut bindings: HashMap<String, String> = HashMap::new();
        for (index, param) in mac.params.iter().enumerate() {
            let value = match values.get(index) {
                Some(v) => v.clone(),
                None => match &param.default {
                    Some(d) => d.clone(),
                    None if param.required => {
                        self.print_error_at(
                            name_start,
                            AsmErrorKind::Syntax,
                            &format!("Value required for macro argument '{}'", param.name),
                        );
                        return;
                    }
                    None => String::new(),
                },
            };
            bindings.insert(param.name.clone(), value);
        }
        let Some(filter) = self.filters.last() else {
            return;
        };
        let subst = Rc::new(MacroSubst {
            parent: filter.macro_subst(),
            source: filter.source(),
            pos: filter.translate_pos(name_start),
        });
        let counter = self.macro_count;
        self.macro_count += 1;
        self.filters.push(AsmInputFilter::Macro(AsmMacroInputFilter::new(
            mac, bindings, subst, counter,
        )));
        self.macro_subst_level += 1;
    }

    /// One macro argument value: quoted string or a bare token up to a
    /// comma or whitespace.
    fn parse_macro_arg_value(&mut self, pos: &mut usize, end: usize) -> String {
        self.skip_spaces(pos, end);
        if *pos < end && self.line[*pos] == b'"' {
            if let Ok(bytes) = literal::parse_string(&self.line[..end], pos) {
                return String::from_utf8_lossy(&bytes).into_owned();
            }
        }
        let start = *pos;
        while *pos < end
            && self.line[*pos] != b','
            && self.line[*pos] != b' '
            && self.line[*pos] != b'\t'
        {
            *pos += 1;
        }
        text_of(&self.line, start, *pos)
    }

    pub(crate) fn include_directive(&mut self, name_start: usize, args: usize, end: usize) {
        let mut pos = args;
        self.skip_spaces(&mut pos, end);
        if pos >= end || self.line[pos] != b'"' {
            self.print_error_at(
                pos.min(end),
                AsmErrorKind::Syntax,
                "Expected file name in quotes",
            );
            return;
        }
        let fname_pos = pos;
        let bytes = match literal::parse_string(&self.line[..end], &mut pos) {
            Ok(b) => b,
            Err(e) => {
                let msg = e.message().to_string();
                self.print_error_at(fname_pos, e.kind(), &msg);
                return;
            }
        };
        if self.check_garbage(pos, end) {
            return;
        }
        let filename = String::from_utf8_lossy(&bytes).into_owned();
        if self.inclusion_level >= INCLUDE_DEPTH_LIMIT {
            self.fatal_error(name_start, "Include depth exceeded");
            return;
        }
        let mut found: Option<(PathBuf, Vec<u8>)> = None;
        let direct = PathBuf::from(&filename);
        if let Ok(data) = std::fs::read(&direct) {
            found = Some((direct, data));
        } else {
            for dir in &self.include_dirs {
                let candidate = dir.join(&filename);
                if let Ok(data) = std::fs::read(&candidate) {
                    found = Some((candidate, data));
                    break;
                }
            }
        }
        let Some((path, data)) = found else {
            self.print_error_at(
                fname_pos,
                AsmErrorKind::Io,
                &format!("Cannot include file '{}'", filename),
            );
            return;
        };
        let parent = self.filters.last().map(|f| f.source());
        let include_pos = self.translate(name_start);
        let source = Rc::new(AsmSource::File {
            parent,
            include_pos: Some(include_pos),
            path: path.display().to_string(),
        });
        self.filters
            .push(AsmInputFilter::Stream(AsmStreamInputFilter::new(source, data)));
        self.inclusion_level += 1;
    }

    fn print_directive(&mut self, args: usize, end: usize) {
        let mut pos = args;
        self.skip_spaces(&mut pos, end);
        if pos >= end || self.line[pos] != b'"' {
            self.print_error_at(pos.min(end), AsmErrorKind::Syntax, "Expected string");
            return;
        }
        let s_pos = pos;
        match literal::parse_string(&self.line[..end], &mut pos) {
            Ok(bytes) => {
                if !self.check_garbage(pos, end) {
                    let _ = writeln!(self.print_out, "{}", String::from_utf8_lossy(&bytes));
                }
            }
            Err(e) => {
                let msg = e.message().to_string();
                self.print_error_at(s_pos, e.kind(), &msg);
            }
        }
    }

    fn user_message(&mut self, args: usize, end: usize, default: &str) -> Option<String> {
        let mut pos = args;
        self.skip_spaces(&mut pos, end);
        if pos >= end {
            return Some(default.to_string());
        }
        if self.line[pos] != b'"' {
            self.print_error_at(pos, AsmErrorKind::Syntax, "Expected string");
            return None;
        }
        let s_pos = pos;
        match literal::parse_string(&self.line[..end], &mut pos) {
            Ok(bytes) => {
                if self.check_garbage(pos, end) {
                    return None;
                }
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            Err(e) => {
                let msg = e.message().to_string();
                self.print_error_at(s_pos, e.kind(), &msg);
                None
            }
        }
    }

    fn warning_directive(&mut self, name_start: usize, args: usize, end: usize) {
        if let Some(msg) = self.user_message(args, end, "'.warning' encountered") {
            let pos = self.source_pos(name_start);
            self.print_warning(&pos, &msg);
        }
    }

    fn error_directive(&mut self, name_start: usize, args: usize, end: usize) {
        if let Some(msg) = self.user_message(args, end, "'.error' encountered") {
            self.print_error_at(name_start, AsmErrorKind::Syntax, &msg);
        }
    }

    fn kernel_directive(&mut self, name_start: usize, args: usize, end: usize) {
        let mut pos = args;
        self.skip_spaces(&mut pos, end);
        let Some(ident_end) = literal::scan_identifier(&self.line[..end], pos) else {
            self.print_error_at(pos.min(end), AsmErrorKind::Syntax, "Expected kernel name");
            return;
        };
        let name = text_of(&self.line, pos, ident_end);
        if self.check_garbage(ident_end, end) {
            return;
        }
        self.ensure_output_format();
        let Some(mut handler) = self.handler.take() else {
            return;
        };
        let result = handler.add_kernel(&name, &mut self.sections);
        self.handler = Some(handler);
        match result {
            Ok((kernel, section)) => {
                self.current_kernel = kernel;
                self.current_section = section;
            }
            Err(e) => {
                let msg = e.message().to_string();
                self.print_error_at(name_start, e.kind(), &msg);
            }
        }
    }

    fn section_directive(&mut self, args: usize, end: usize) {
        let mut pos = args;
        self.skip_spaces(&mut pos, end);
        let Some(ident_end) = literal::scan_identifier(&self.line[..end], pos) else {
            self.print_error_at(pos.min(end), AsmErrorKind::Syntax, "Expected section name");
            return;
        };
        let name = text_of(&self.line, pos, ident_end);
        let name_pos = pos;
        if self.check_garbage(ident_end, end) {
            return;
        }
        self.switch_to_section(name_pos, &name);
    }

    fn fixed_section_directive(&mut self, name_start: usize, name: &str, args: usize, end: usize) {
        if self.check_garbage(args, end) {
            return;
        }
        self.switch_to_section(name_start, name);
    }

    fn switch_to_section(&mut self, err_pos: usize, name: &str) {
        self.ensure_output_format();
        let kernel = self.current_kernel;
        let Some(mut handler) = self.handler.take() else {
            return;
        };
        let result = handler.add_section(name, kernel, &mut self.sections);
        self.handler = Some(handler);
        match result {
            Ok(id) => self.current_section = id,
            Err(e) => {
                let msg = e.message().to_string();
                self.print_error_at(err_pos, e.kind(), &msg);
            }
        }
    }

    fn format_directive(
        &mut self,
        name_start: usize,
        format: BinaryFormat,
        args: usize,
        end: usize,
    ) {
        if self.check_garbage(args, end) {
            return;
        }
        if self.output_initialized() {
            self.print_error_at(
                name_start,
                AsmErrorKind::Handler,
                "Output format has already been initialized",
            );
            return;
        }
        self.format = format;
    }

    fn bitness_directive(&mut self, name_start: usize, bit64: bool, args: usize, end: usize) {
        if self.check_garbage(args, end) {
            return;
        }
        if self.output_initialized() {
            self.print_error_at(
                name_start,
                AsmErrorKind::Handler,
                "Output format has already been initialized",
            );
            return;
        }
        self.bit64 = bit64;
    }

    fn gpu_directive(&mut self, args: usize, end: usize) {
        let mut pos = args;
        self.skip_spaces(&mut pos, end);
        let Some(ident_end) = literal::scan_identifier(&self.line[..end], pos) else {
            self.print_error_at(pos.min(end), AsmErrorKind::Syntax, "Expected GPU device name");
            return;
        };
        let name = text_of(&self.line, pos, ident_end);
        if self.check_garbage(ident_end, end) {
            return;
        }
        match GpuDeviceType::from_name(&name) {
            Some(device) => self.device_type = device,
            None => self.print_error_at(
                pos,
                AsmErrorKind::Syntax,
                &format!("Unknown GPU device type '{}'", name),
            ),
        }
    }

    fn handler_pseudo_op(&mut self, name_start: usize, name: &str, args: usize, end: usize) {
        self.ensure_output_format();
        let Some(mut handler) = self.handler.take() else {
            return;
        };
        let kernel = self.current_kernel;
        let result = handler.parse_pseudo_op(name, &self.line[args..end], kernel, &mut self.sections);
        self.handler = Some(handler);
        match result {
            Ok(Some(HandlerOutcome::Handled)) => {}
            Ok(Some(HandlerOutcome::SwitchSection(id))) => self.current_section = id,
            Ok(None) => self.print_error_at(
                name_start,
                AsmErrorKind::Syntax,
                &format!("Unknown pseudo-op '.{}'", name),
            ),
            Err(e) => {
                let msg = e.message().to_string();
                self.print_error_at(name_start, e.kind(), &msg);
            }
        }
    }
}
