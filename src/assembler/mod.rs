// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The assembler driver.
//!
//! Pulls logical lines off the input filter stack, classifies each
//! statement (label, assignment, pseudo-op, instruction) and routes it
//! to the symbol table, the expression engine, the format handler or
//! the ISA encoder. Single-threaded; diagnostics are emitted in source
//! order.

mod clause;
pub mod cli;
mod expression;
mod format;
mod input_filter;
mod isa;
mod pseudo_ops;
mod pseudo_ops_data;
mod pseudo_ops_symbols;
mod resolve;
mod symbol;
#[cfg(test)]
mod tests;

pub use expression::{AsmExprArg, AsmExprOp, AsmExprTarget, AsmExpression, EvalError, ExprPool};
pub use format::{
    AsmFormatHandler, AsmSection, AsmSectionType, BinaryFormat, GpuDeviceType, HandlerOutcome,
    KernelConfig, ASMSECT_ABS_ADDRESSABLE, ASMSECT_WRITABLE,
};
pub use input_filter::{
    AsmInputFilter, AsmMacro, AsmMacroInputFilter, AsmRepeatInputFilter, AsmStreamInputFilter,
    CapturedLine, LineTrans, MacroParam,
};
pub use isa::{GcnAssembler, IsaAssembler};
pub use symbol::{
    AsmSymbol, ExprId, SymId, SymOccurrence, SymbolTable, ASMKERN_GLOBAL, ASMSECT_ABS,
    SYM_BIND_GLOBAL, SYM_TYPE_FUNC, SYM_TYPE_OBJECT,
};

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use serde_json::json;

use crate::core::error::{AsmError, AsmErrorKind, Diagnostic, Severity};
use crate::core::literal;
use crate::core::source::{AsmSource, AsmSourcePos, LineCol};

use clause::{AsmClauseType, ClauseStack};

/// Maximum include nesting.
pub const INCLUDE_DEPTH_LIMIT: usize = 200;
/// Maximum macro substitution nesting.
pub const MACRO_DEPTH_LIMIT: usize = 200;
/// Maximum repetition nesting.
pub const REPEAT_DEPTH_LIMIT: usize = 200;
/// Maximum operator stack depth inside one expression.
pub const EXPR_DEPTH_LIMIT: usize = 200;

/// The assembler: state of one assembly run over a single root source.
pub struct Assembler {
    format: BinaryFormat,
    device_type: GpuDeviceType,
    bit64: bool,
    warnings_enabled: bool,
    good: bool,
    fatal: bool,
    isa: Box<dyn IsaAssembler>,
    include_dirs: Vec<PathBuf>,
    def_syms: Vec<(String, u64)>,
    pub(crate) symbols: SymbolTable,
    pub(crate) exprs: ExprPool,
    sections: Vec<AsmSection>,
    handler: Option<AsmFormatHandler>,
    macros: HashMap<String, Rc<AsmMacro>>,
    macro_count: u64,
    clauses: ClauseStack,
    filters: Vec<AsmInputFilter>,
    inclusion_level: usize,
    macro_subst_level: usize,
    repetition_level: usize,
    line: Vec<u8>,
    line_counter: u64,
    current_kernel: u32,
    current_section: u32,
    msg_out: Box<dyn Write>,
    print_out: Box<dyn Write>,
    diagnostics: Vec<Diagnostic>,
}

impl Assembler {
    pub fn new(
        filename: &str,
        content: Vec<u8>,
        format: BinaryFormat,
        device_type: GpuDeviceType,
        msg_out: Box<dyn Write>,
        print_out: Box<dyn Write>,
    ) -> Self {
        let root = AsmSource::top_file(filename);
        let stream = AsmStreamInputFilter::new(Rc::clone(&root), content);
        Self {
            format,
            device_type,
            bit64: false,
            warnings_enabled: true,
            good: true,
            fatal: false,
            isa: Box::new(GcnAssembler::new()),
            include_dirs: Vec::new(),
            def_syms: Vec::new(),
            symbols: SymbolTable::new(),
            exprs: ExprPool::new(),
            sections: Vec::new(),
            handler: None,
            macros: HashMap::new(),
            macro_count: 0,
            clauses: ClauseStack::new(),
            filters: vec![AsmInputFilter::Stream(stream)],
            inclusion_level: 0,
            macro_subst_level: 0,
            repetition_level: 0,
            line: Vec::new(),
            line_counter: 0,
            current_kernel: ASMKERN_GLOBAL,
            current_section: 0,
            msg_out,
            print_out,
            diagnostics: Vec::new(),
        }
    }

    pub fn set_64bit(&mut self, bit64: bool) {
        self.bit64 = bit64;
    }

    pub fn is_64bit(&self) -> bool {
        self.bit64
    }

    pub fn set_warnings(&mut self, enabled: bool) {
        self.warnings_enabled = enabled;
    }

    pub fn binary_format(&self) -> BinaryFormat {
        self.format
    }

    pub fn device_type(&self) -> GpuDeviceType {
        self.device_type
    }

    pub fn add_include_dir(&mut self, dir: impl Into<PathBuf>) {
        self.include_dirs.push(dir.into());
    }

    /// Queue an initial `-D` symbol; installed when assembly starts.
    pub fn add_initial_defsym(&mut self, name: impl Into<String>, value: u64) {
        self.def_syms.push((name.into(), value));
    }

    pub fn good(&self) -> bool {
        self.good
    }

    pub fn sections(&self) -> &[AsmSection] {
        &self.sections
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn kernel_names(&self) -> Vec<&str> {
        self.handler
            .as_ref()
            .map(|h| h.kernel_names())
            .unwrap_or_default()
    }

    /// Main routine: assemble the whole input. Returns the `good` flag.
    pub fn assemble(&mut self) -> bool {
        self.install_defsyms();
        while !self.fatal {
            let Some(line) = self.read_line() else { break };
            self.line = line;
            self.line_counter += 1;
            let stmts = split_statements(&self.line);
            for (start, end) in stmts {
                if self.fatal {
                    break;
                }
                self.process_statement(start, end);
            }
        }
        self.finish()
    }

    /// Write the output container for the selected format.
    pub fn write_binary(&self, out: &mut dyn Write) -> std::io::Result<()> {
        match &self.handler {
            Some(h) => h.write_binary(&self.sections, out),
            None => Ok(()),
        }
    }

    /// Machine-readable symbol table report.
    pub fn symbols_json(&self) -> serde_json::Value {
        let symbols: Vec<serde_json::Value> = self
            .symbols
            .named_sorted()
            .into_iter()
            .map(|(name, sym)| {
                json!({
                    "name": name,
                    "value": sym.value,
                    "section": if sym.section_id == ASMSECT_ABS {
                        serde_json::Value::Null
                    } else {
                        json!(sym.section_id)
                    },
                    "size": sym.size,
                    "defined": sym.has_value,
                    "onceDefined": sym.once_defined,
                    "base": sym.base,
                })
            })
            .collect();
        json!({ "symbols": symbols })
    }

    fn install_defsyms(&mut self) {
        let def_syms = std::mem::take(&mut self.def_syms);
        for (name, value) in &def_syms {
            let valid = !name.is_empty()
                && name.as_bytes().iter().all(|&b| literal::is_ident_char(b))
                && literal::is_ident_start(name.as_bytes()[0])
                && name != ".";
            if !valid || self.is_reserved_name(name) {
                self.report_command_line_error(&format!("Invalid initial symbol name '{}'", name));
                continue;
            }
            let sid = self.symbols.lookup_or_create(name);
            self.set_symbol_value(sid, *value, ASMSECT_ABS);
        }
    }

    pub(crate) fn read_line(&mut self) -> Option<Vec<u8>> {
        loop {
            let produced = self.filters.last_mut()?.read_line();
            match produced {
                Some(line) => return Some(line),
                None => {
                    if let Some(filter) = self.filters.pop() {
                        if filter.is_macro() {
                            self.macro_subst_level = self.macro_subst_level.saturating_sub(1);
                        } else if filter.is_repeat() {
                            self.repetition_level = self.repetition_level.saturating_sub(1);
                        } else if !self.filters.is_empty() {
                            self.inclusion_level = self.inclusion_level.saturating_sub(1);
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn translate(&self, pos: usize) -> LineCol {
        match self.filters.last() {
            Some(f) => f.translate_pos(pos),
            None => LineCol::new(1, pos + 1),
        }
    }

    pub(crate) fn source_pos(&self, pos: usize) -> AsmSourcePos {
        match self.filters.last() {
            Some(f) => f.source_pos(pos),
            None => AsmSourcePos {
                macro_subst: None,
                source: AsmSource::top_file("<unknown>"),
                line_no: self.line_counter.max(1),
                col_no: pos + 1,
            },
        }
    }

    pub(crate) fn print_error(&mut self, pos: &AsmSourcePos, kind: AsmErrorKind, msg: &str) {
        self.good = false;
        let diag = Diagnostic::new(Severity::Error, AsmError::new(kind, msg), Some(pos.clone()));
        let _ = writeln!(self.msg_out, "{}", diag.format());
        self.diagnostics.push(diag);
    }

    pub(crate) fn print_error_at(&mut self, byte_pos: usize, kind: AsmErrorKind, msg: &str) {
        let pos = self.source_pos(byte_pos);
        self.print_error(&pos, kind, msg);
    }

    pub(crate) fn print_warning(&mut self, pos: &AsmSourcePos, msg: &str) {
        if !self.warnings_enabled {
            return;
        }
        let diag = Diagnostic::new(
            Severity::Warning,
            AsmError::new(AsmErrorKind::Range, msg),
            Some(pos.clone()),
        );
        let _ = writeln!(self.msg_out, "{}", diag.format());
        self.diagnostics.push(diag);
    }

    fn report_command_line_error(&mut self, msg: &str) {
        self.good = false;
        let diag = Diagnostic::new(
            Severity::Error,
            AsmError::new(AsmErrorKind::Cli, msg),
            None,
        );
        let _ = writeln!(self.msg_out, "{}", diag.format());
        self.diagnostics.push(diag);
    }

    /// Fatal diagnostics abort the whole assembly.
    pub(crate) fn fatal_error(&mut self, byte_pos: usize, msg: &str) {
        self.print_error_at(byte_pos, AsmErrorKind::DepthExceeded, msg);
        self.fatal = true;
    }

    pub(crate) fn skip_spaces(&self, pos: &mut usize, end: usize) {
        while *pos < end && (self.line[*pos] == b' ' || self.line[*pos] == b'\t') {
            *pos += 1;
        }
    }

    pub(crate) fn ensure_output_format(&mut self) {
        if self.handler.is_none() {
            let (handler, current) = AsmFormatHandler::new(self.format, &mut self.sections);
            self.handler = Some(handler);
            self.current_section = current;
            self.current_kernel = ASMKERN_GLOBAL;
        }
    }

    pub(crate) fn output_initialized(&self) -> bool {
        self.handler.is_some()
    }

    pub(crate) fn current_section(&self) -> u32 {
        self.current_section
    }

    pub(crate) fn current_out_pos(&self) -> u64 {
        self.sections
            .get(self.current_section as usize)
            .map(|s| s.content.len() as u64)
            .unwrap_or(0)
    }

    pub(crate) fn section_flags(&self, section_id: u32) -> u32 {
        match &self.handler {
            Some(h) => h.section_flags(section_id, &self.sections),
            None => 0,
        }
    }

    pub(crate) fn is_absolute_section(&self, section_id: u32) -> bool {
        section_id == ASMSECT_ABS
            || self.section_flags(section_id) & ASMSECT_ABS_ADDRESSABLE != 0
    }

    pub(crate) fn sections_mut(&mut self) -> &mut Vec<AsmSection> {
        &mut self.sections
    }

    pub(crate) fn is_reserved_name(&self, name: &str) -> bool {
        if let Some(rest) = name.strip_prefix('.') {
            pseudo_ops::is_pseudo_op_name(&rest.to_ascii_lowercase())
        } else {
            self.isa.check_mnemonic(name)
        }
    }

    fn process_statement(&mut self, start: usize, end: usize) {
        let mut pos = start;
        self.skip_spaces(&mut pos, end);
        if pos >= end {
            return;
        }
        if self.clauses.skipping() {
            self.process_skipped_statement(pos, end);
            return;
        }
        loop {
            let b = self.line[pos];
            if b.is_ascii_digit() {
                let num_start = pos;
                let mut p = pos;
                while p < end && self.line[p].is_ascii_digit() {
                    p += 1;
                }
                if p < end && self.line[p] == b':' {
                    self.define_local_label(num_start, p);
                    pos = p + 1;
                    self.skip_spaces(&mut pos, end);
                    if pos >= end {
                        return;
                    }
                    continue;
                }
                self.print_error_at(
                    num_start,
                    AsmErrorKind::Syntax,
                    "Illegal number at statement begin",
                );
                pos = p;
                self.skip_spaces(&mut pos, end);
                if pos < end {
                    self.print_error_at(
                        pos,
                        AsmErrorKind::Syntax,
                        "Garbages at end of line with pseudo-op",
                    );
                }
                return;
            }
            if literal::is_ident_start(b) {
                let ident_end = match literal::scan_identifier(&self.line, pos) {
                    Some(e) => e.min(end),
                    None => pos + 1,
                };
                if ident_end < end && self.line[ident_end] == b':' {
                    let name = text_of(&self.line, pos, ident_end);
                    self.define_label(pos, &name);
                    pos = ident_end + 1;
                    self.skip_spaces(&mut pos, end);
                    if pos >= end {
                        return;
                    }
                    continue;
                }
                let mut after = ident_end;
                self.skip_spaces(&mut after, end);
                if after < end
                    && self.line[after] == b'='
                    && self.line.get(after + 1) != Some(&b'=')
                {
                    let name = text_of(&self.line, pos, ident_end);
                    self.do_assignment(&name, pos, after + 1, end);
                    return;
                }
                if b == b'.' {
                    self.dispatch_pseudo_op(pos, ident_end, end);
                    return;
                }
                let name = text_of(&self.line, pos, ident_end);
                if self.macros.contains_key(&name) {
                    self.expand_macro(&name, pos, ident_end, end);
                    return;
                }
                self.process_instruction(&name, pos, ident_end, end);
                return;
            }
            self.print_error_at(pos, AsmErrorKind::Syntax, "Illegal character at statement begin");
            return;
        }
    }

    fn process_instruction(&mut self, name: &str, name_start: usize, _name_end: usize, end: usize) {
        if !self.isa.check_mnemonic(name) {
            self.print_error_at(
                name_start,
                AsmErrorKind::Isa,
                &format!("Unknown mnemonic '{}'", name),
            );
            return;
        }
        self.ensure_output_format();
        let stmt: Vec<u8> = self.line[name_start..end].to_vec();
        let mut out = Vec::new();
        match self.isa.assemble(self.line_counter, &stmt, &mut out) {
            Ok(()) => {
                self.emit_bytes(name_start, &out);
            }
            Err(err) => {
                let msg = err.message().to_string();
                self.print_error_at(name_start, err.kind(), &msg);
            }
        }
    }

    fn define_label(&mut self, name_pos: usize, name: &str) {
        if name == "." || self.is_reserved_name(name) {
            self.print_error_at(
                name_pos,
                AsmErrorKind::Syntax,
                &format!("Name '{}' is a reserved name", name),
            );
            return;
        }
        self.ensure_output_format();
        let sid = self.symbols.lookup_or_create(name);
        if self.symbols.get(sid).once_defined {
            self.print_error_at(
                name_pos,
                AsmErrorKind::Redefinition,
                &format!("Symbol '{}' is already defined", name),
            );
            return;
        }
        self.discard_symbol_expression(sid);
        self.symbols.get_mut(sid).once_defined = true;
        let value = self.current_out_pos();
        let section = self.current_section;
        self.set_symbol_value(sid, value, section);
    }

    fn define_local_label(&mut self, num_start: usize, num_end: usize) {
        self.ensure_output_format();
        let digits = text_of(&self.line, num_start, num_end);
        let value = self.current_out_pos();
        let section = self.current_section;

        let forward = self.symbols.lookup_or_create(&format!("{digits}f"));
        self.discard_symbol_expression(forward);
        self.set_symbol_value(forward, value, section);
        self.symbols.get_mut(forward).undefine();

        let backward = self.symbols.lookup_or_create(&format!("{digits}b"));
        self.discard_symbol_expression(backward);
        self.set_symbol_value(backward, value, section);
    }

    fn do_assignment(&mut self, name: &str, name_pos: usize, expr_start: usize, end: usize) {
        if name == "." {
            self.assign_output_counter(name_pos, expr_start, end);
            return;
        }
        if self.is_reserved_name(name) {
            self.print_error_at(
                name_pos,
                AsmErrorKind::Syntax,
                &format!("Name '{}' is a reserved name", name),
            );
            return;
        }
        let sid = self.symbols.lookup_or_create(name);
        if self.symbols.get(sid).once_defined {
            self.print_error_at(
                name_pos,
                AsmErrorKind::Redefinition,
                &format!("Symbol '{}' is already defined", name),
            );
            return;
        }
        self.assign_symbol(sid, expr_start, end, false);
    }

    /// `. = expr` moves the output counter forward, padding with zeros.
    fn assign_output_counter(&mut self, name_pos: usize, expr_start: usize, end: usize) {
        self.ensure_output_format();
        let mut pos = expr_start;
        let Some((value, section)) = self.eval_immediate(&mut pos, end) else {
            return;
        };
        if self.check_garbage(pos, end) {
            return;
        }
        if section != self.current_section && section != ASMSECT_ABS {
            self.print_error_at(
                name_pos,
                AsmErrorKind::SectionCross,
                "Output counter expression has wrong section",
            );
            return;
        }
        let current = self.current_out_pos();
        if value < current {
            self.print_error_at(
                name_pos,
                AsmErrorKind::Syntax,
                "Output counter cannot be moved backwards",
            );
            return;
        }
        let fill = vec![0u8; (value - current) as usize];
        self.emit_bytes(name_pos, &fill);
    }

    pub(crate) fn emit_bytes(&mut self, err_pos: usize, data: &[u8]) -> bool {
        self.ensure_output_format();
        if self.section_flags(self.current_section) & ASMSECT_WRITABLE == 0 {
            self.print_error_at(
                err_pos,
                AsmErrorKind::Handler,
                "Writing data into non-writable section is illegal",
            );
            return false;
        }
        if let Some(section) = self.sections.get_mut(self.current_section as usize) {
            section.content.extend_from_slice(data);
        }
        true
    }

    fn finish(&mut self) -> bool {
        while let Some(clause) = self.clauses.pop() {
            let what = match clause.clause_type {
                AsmClauseType::If | AsmClauseType::ElseIf | AsmClauseType::Else => {
                    "Unterminated '.if'"
                }
                AsmClauseType::Repeat => "Unterminated '.rept'",
                AsmClauseType::Macro => "Unterminated '.macro'",
            };
            let pos = clause.pos.clone();
            self.print_error(&pos, AsmErrorKind::UnterminatedClause, what);
        }

        let value = self.current_out_pos();
        let section = self.current_section;
        let dot = self.symbols.output_counter();
        let counter = self.symbols.get_mut(dot);
        counter.value = value;
        counter.section_id = section;

        let mut unresolved: Vec<(String, AsmSourcePos)> = Vec::new();
        for sid in self.symbols.all_ids() {
            let sym = self.symbols.get(sid);
            if sym.has_value {
                continue;
            }
            for occ in &sym.occurrences {
                if let Some(expr) = self.exprs.get(occ.expr) {
                    if matches!(expr.target, Some(AsmExprTarget::Data { .. })) {
                        unresolved.push((sym.name.clone(), expr.source_pos.clone()));
                        break;
                    }
                }
            }
        }
        for (name, pos) in unresolved {
            self.print_error(
                &pos,
                AsmErrorKind::UndefinedReference,
                &format!("Expression contains unresolved symbol '{}'", name),
            );
        }
        self.good
    }
}

pub(crate) fn text_of(line: &[u8], start: usize, end: usize) -> String {
    String::from_utf8_lossy(&line[start..end]).into_owned()
}

/// Split a logical line into `;`-separated statements, honouring string
/// and character literals.
pub(crate) fn split_statements(line: &[u8]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0usize;
    while i < line.len() {
        let b = line[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 1;
            } else if b == q {
                quote = None;
            }
        } else if b == b'"' || b == b'\'' {
            quote = Some(b);
        } else if b == b';' {
            out.push((start, i));
            start = i + 1;
        }
        i += 1;
    }
    out.push((start, line.len()));
    out
}
