// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Expression parsing and symbol resolution.
//!
//! The parser is a shunting-yard over the statement bytes, producing
//! the postfix form directly. Undefined symbols stay as references and
//! register occurrence back-pointers; resolution cascades eagerly the
//! moment a definition closes the last unresolved leaf.

use std::collections::HashMap;

use crate::core::error::AsmErrorKind;
use crate::core::literal;
use crate::core::source::{AsmSourcePos, LineCol};

use super::expression::{AsmExprArg, AsmExprOp, AsmExprTarget, AsmExpression, EvalError};
use super::symbol::{ExprId, SymId, SymOccurrence, ASMSECT_ABS};
use super::{text_of, Assembler, EXPR_DEPTH_LIMIT};

const P_CHOICE: u8 = 1;
const P_LOGICAL_OR: u8 = 2;
const P_LOGICAL_AND: u8 = 3;
const P_EQUALITY: u8 = 4;
const P_RELATIONAL: u8 = 5;
const P_BITWISE: u8 = 6;
const P_SHIFT: u8 = 7;
const P_ADDITIVE: u8 = 8;
const P_MULTIPLICATIVE: u8 = 9;
const P_UNARY: u8 = 10;

enum StackOp {
    Op {
        op: AsmExprOp,
        prio: u8,
        line_col: LineCol,
    },
    Paren,
    ChoiceStart {
        line_col: LineCol,
    },
}

fn binary_prio(op: AsmExprOp) -> u8 {
    match op {
        AsmExprOp::Multiply
        | AsmExprOp::Division
        | AsmExprOp::SignedDivision
        | AsmExprOp::Modulo
        | AsmExprOp::SignedModulo => P_MULTIPLICATIVE,
        AsmExprOp::Addition | AsmExprOp::Subtract => P_ADDITIVE,
        AsmExprOp::ShiftLeft | AsmExprOp::ShiftRight | AsmExprOp::SignedShiftRight => P_SHIFT,
        AsmExprOp::BitAnd | AsmExprOp::BitOr | AsmExprOp::BitXor | AsmExprOp::BitOrNot => P_BITWISE,
        AsmExprOp::Less
        | AsmExprOp::LessEq
        | AsmExprOp::Greater
        | AsmExprOp::GreaterEq
        | AsmExprOp::Below
        | AsmExprOp::BelowEq
        | AsmExprOp::Above
        | AsmExprOp::AboveEq => P_RELATIONAL,
        AsmExprOp::Equal | AsmExprOp::NotEqual => P_EQUALITY,
        AsmExprOp::LogicalAnd => P_LOGICAL_AND,
        AsmExprOp::LogicalOr => P_LOGICAL_OR,
        _ => P_CHOICE,
    }
}

fn match_binary_op(line: &[u8], pos: usize) -> Option<(AsmExprOp, usize)> {
    let b = *line.get(pos)?;
    let b1 = line.get(pos + 1).copied();
    let b2 = line.get(pos + 2).copied();
    Some(match b {
        b'+' => (AsmExprOp::Addition, 1),
        b'-' => (AsmExprOp::Subtract, 1),
        b'*' => (AsmExprOp::Multiply, 1),
        // `//` is taken by line comments, so the signed variants use
        // the same @-suffix as the unsigned comparisons
        b'/' => {
            if b1 == Some(b'@') {
                (AsmExprOp::SignedDivision, 2)
            } else {
                (AsmExprOp::Division, 1)
            }
        }
        b'%' => {
            if b1 == Some(b'@') {
                (AsmExprOp::SignedModulo, 2)
            } else {
                (AsmExprOp::Modulo, 1)
            }
        }
        b'&' => {
            if b1 == Some(b'&') {
                (AsmExprOp::LogicalAnd, 2)
            } else {
                (AsmExprOp::BitAnd, 1)
            }
        }
        b'|' => {
            if b1 == Some(b'|') {
                (AsmExprOp::LogicalOr, 2)
            } else {
                (AsmExprOp::BitOr, 1)
            }
        }
        b'^' => (AsmExprOp::BitXor, 1),
        b'!' => {
            if b1 == Some(b'=') {
                (AsmExprOp::NotEqual, 2)
            } else {
                (AsmExprOp::BitOrNot, 1)
            }
        }
        b'=' => {
            if b1 == Some(b'=') {
                (AsmExprOp::Equal, 2)
            } else {
                return None;
            }
        }
        b'<' => match (b1, b2) {
            (Some(b'<'), _) => (AsmExprOp::ShiftLeft, 2),
            (Some(b'='), Some(b'@')) => (AsmExprOp::BelowEq, 3),
            (Some(b'='), _) => (AsmExprOp::LessEq, 2),
            (Some(b'@'), _) => (AsmExprOp::Below, 2),
            _ => (AsmExprOp::Less, 1),
        },
        b'>' => match (b1, b2) {
            (Some(b'>'), Some(b'>')) => (AsmExprOp::SignedShiftRight, 3),
            (Some(b'>'), _) => (AsmExprOp::ShiftRight, 2),
            (Some(b'='), Some(b'@')) => (AsmExprOp::AboveEq, 3),
            (Some(b'='), _) => (AsmExprOp::GreaterEq, 2),
            (Some(b'@'), _) => (AsmExprOp::Above, 2),
            _ => (AsmExprOp::Greater, 1),
        },
        _ => return None,
    })
}

struct ExprBuild {
    ops: Vec<AsmExprOp>,
    args: Vec<AsmExprArg>,
    msgs: Vec<LineCol>,
    sym_occurs: usize,
    relative: bool,
}

impl Assembler {
    /// Parse an expression from the statement bytes, advancing `pos`.
    /// With `make_base` defined symbols are kept as references and no
    /// occurrences are registered (the `.eqv` template form). With
    /// `dont_resolve_later` unresolved references stay unregistered, for
    /// expressions that must evaluate immediately.
    pub(crate) fn parse_expression(
        &mut self,
        end: usize,
        pos: &mut usize,
        make_base: bool,
        dont_resolve_later: bool,
    ) -> Result<ExprId, ()> {
        let start_pos = *pos;
        let expr_id = self.exprs.alloc(AsmExpression::new(self.source_pos(start_pos)));
        let mut build = ExprBuild {
            ops: Vec::new(),
            args: Vec::new(),
            msgs: Vec::new(),
            sym_occurs: 0,
            relative: false,
        };
        let mut stack: Vec<StackOp> = Vec::new();
        let mut expect_value = true;
        let mut failed = false;

        'parse: while !failed {
            self.skip_spaces(pos, end);
            if *pos >= end {
                break;
            }
            let b = self.line[*pos];
            if expect_value {
                match b {
                    b'(' => {
                        if stack.len() >= EXPR_DEPTH_LIMIT {
                            self.fatal_error(*pos, "Expression nesting depth exceeded");
                            failed = true;
                            break;
                        }
                        stack.push(StackOp::Paren);
                        *pos += 1;
                    }
                    b'-' | b'~' | b'!' | b'+' => {
                        if stack.len() >= EXPR_DEPTH_LIMIT {
                            self.fatal_error(*pos, "Expression nesting depth exceeded");
                            failed = true;
                            break;
                        }
                        let op = match b {
                            b'-' => AsmExprOp::Negate,
                            b'~' => AsmExprOp::BitNot,
                            b'!' => AsmExprOp::LogicalNot,
                            _ => AsmExprOp::Plus,
                        };
                        stack.push(StackOp::Op {
                            op,
                            prio: P_UNARY,
                            line_col: self.translate(*pos),
                        });
                        *pos += 1;
                    }
                    _ if b.is_ascii_digit() => {
                        let mut p = *pos;
                        while p < end && self.line[p].is_ascii_digit() {
                            p += 1;
                        }
                        let is_local = p < end
                            && (self.line[p] == b'f' || self.line[p] == b'b')
                            && (p + 1 >= end || !literal::is_ident_char(self.line[p + 1]));
                        if is_local {
                            let name = text_of(&self.line, *pos, p + 1);
                            if self
                                .push_symbol_arg(
                                    expr_id,
                                    &name,
                                    *pos,
                                    make_base,
                                    dont_resolve_later,
                                    &mut build,
                                )
                                .is_err()
                            {
                                failed = true;
                                break;
                            }
                            *pos = p + 1;
                        } else {
                            let line_end = &self.line[..end];
                            match literal::parse_literal(line_end, pos) {
                                Ok(v) => {
                                    build.ops.push(AsmExprOp::ArgValue);
                                    build.args.push(AsmExprArg::Value(v));
                                }
                                Err(e) => {
                                    let msg = e.message().to_string();
                                    self.print_error_at(*pos, e.kind(), &msg);
                                    failed = true;
                                    break;
                                }
                            }
                        }
                        expect_value = false;
                    }
                    b'\'' => {
                        let line_end = &self.line[..end];
                        let mut p = *pos;
                        match literal::parse_literal(line_end, &mut p) {
                            Ok(v) => {
                                build.ops.push(AsmExprOp::ArgValue);
                                build.args.push(AsmExprArg::Value(v));
                                *pos = p;
                                expect_value = false;
                            }
                            Err(e) => {
                                let msg = e.message().to_string();
                                self.print_error_at(*pos, e.kind(), &msg);
                                failed = true;
                                break;
                            }
                        }
                    }
                    _ if literal::is_ident_start(b) => {
                        let ident_end = literal::scan_identifier(&self.line[..end], *pos)
                            .unwrap_or(*pos + 1);
                        let name = text_of(&self.line, *pos, ident_end);
                        if self
                            .push_symbol_arg(
                                expr_id,
                                &name,
                                *pos,
                                make_base,
                                dont_resolve_later,
                                &mut build,
                            )
                            .is_err()
                        {
                            failed = true;
                            break;
                        }
                        *pos = ident_end;
                        expect_value = false;
                    }
                    _ => {
                        // no value: an empty expression if nothing was
                        // consumed, otherwise a syntax error below
                        break;
                    }
                }
                continue;
            }
            match b {
                b',' => break,
                b')' => {
                    let mut closed = false;
                    while let Some(top) = stack.pop() {
                        match top {
                            StackOp::Op { op, line_col, .. } => {
                                build.ops.push(op);
                                build.msgs.push(line_col);
                            }
                            StackOp::Paren => {
                                closed = true;
                                break;
                            }
                            StackOp::ChoiceStart { .. } => {
                                self.print_error_at(
                                    *pos,
                                    AsmErrorKind::Syntax,
                                    "Missing ':' in ternary operator",
                                );
                                failed = true;
                                continue 'parse;
                            }
                        }
                    }
                    if failed {
                        break;
                    }
                    if !closed {
                        self.print_error_at(*pos, AsmErrorKind::Syntax, "Unbalanced parenthesis");
                        failed = true;
                        break;
                    }
                    *pos += 1;
                }
                b'?' => {
                    let line_col = self.translate(*pos);
                    pop_ops_over(&mut stack, &mut build, P_CHOICE);
                    if stack.len() >= EXPR_DEPTH_LIMIT {
                        self.fatal_error(*pos, "Expression nesting depth exceeded");
                        failed = true;
                        break;
                    }
                    stack.push(StackOp::ChoiceStart { line_col });
                    *pos += 1;
                    expect_value = true;
                }
                b':' => {
                    let mut found = false;
                    while let Some(top) = stack.pop() {
                        match top {
                            StackOp::Op { op, line_col, .. } => {
                                build.ops.push(op);
                                build.msgs.push(line_col);
                            }
                            StackOp::ChoiceStart { line_col } => {
                                stack.push(StackOp::Op {
                                    op: AsmExprOp::Choice,
                                    prio: P_CHOICE,
                                    line_col,
                                });
                                found = true;
                                break;
                            }
                            StackOp::Paren => break,
                        }
                    }
                    if !found {
                        self.print_error_at(
                            *pos,
                            AsmErrorKind::Syntax,
                            "Missing '?' before ':'",
                        );
                        failed = true;
                        break;
                    }
                    *pos += 1;
                    expect_value = true;
                }
                _ => match match_binary_op(&self.line[..end], *pos) {
                    Some((op, len)) => {
                        let line_col = self.translate(*pos);
                        let prio = binary_prio(op);
                        pop_ops_at_or_over(&mut stack, &mut build, prio);
                        if stack.len() >= EXPR_DEPTH_LIMIT {
                            self.fatal_error(*pos, "Expression nesting depth exceeded");
                            failed = true;
                            break;
                        }
                        stack.push(StackOp::Op { op, prio, line_col });
                        *pos += len;
                        expect_value = true;
                    }
                    None => break,
                },
            }
        }

        if !failed && expect_value && !(build.ops.is_empty() && stack.is_empty()) {
            self.print_error_at(
                (*pos).min(end),
                AsmErrorKind::Syntax,
                "Missing value in expression",
            );
            failed = true;
        }
        if !failed {
            while let Some(top) = stack.pop() {
                match top {
                    StackOp::Op { op, line_col, .. } => {
                        build.ops.push(op);
                        build.msgs.push(line_col);
                    }
                    StackOp::Paren => {
                        self.print_error_at((*pos).min(end), AsmErrorKind::Syntax, "Missing ')'");
                        failed = true;
                        break;
                    }
                    StackOp::ChoiceStart { .. } => {
                        self.print_error_at(
                            (*pos).min(end),
                            AsmErrorKind::Syntax,
                            "Missing ':' in ternary operator",
                        );
                        failed = true;
                        break;
                    }
                }
            }
        }
        if failed {
            let mut arg_index = 0usize;
            for (op_index, op) in build.ops.iter().enumerate() {
                if *op == AsmExprOp::ArgSymbol {
                    if let AsmExprArg::Symbol(t) = build.args[arg_index] {
                        self.symbols
                            .get_mut(t)
                            .remove_occurrence(expr_id, arg_index, op_index);
                    }
                }
                if op.is_arg() {
                    arg_index += 1;
                }
            }
            let _ = self.exprs.take(expr_id);
            return Err(());
        }
        let mut expr = AsmExpression::new(self.source_pos(start_pos));
        expr.ops = build.ops;
        expr.args = build.args;
        expr.message_positions = build.msgs;
        expr.sym_occurs_num = build.sym_occurs;
        expr.relative_sym_occurs = build.relative;
        self.exprs.put(expr_id, expr);
        Ok(expr_id)
    }

    fn push_symbol_arg(
        &mut self,
        expr_id: ExprId,
        name: &str,
        byte_pos: usize,
        make_base: bool,
        dont_resolve_later: bool,
        build: &mut ExprBuild,
    ) -> Result<(), ()> {
        if name == "." {
            let value = self.current_out_pos();
            let section = self.current_section();
            {
                let dot = self.symbols.output_counter();
                let sym = self.symbols.get_mut(dot);
                sym.value = value;
                sym.section_id = section;
            }
            build.ops.push(AsmExprOp::ArgValue);
            if self.is_absolute_section(section) {
                build.args.push(AsmExprArg::Value(value));
            } else {
                build.args.push(AsmExprArg::RelValue(value, section));
                build.relative = true;
            }
            return Ok(());
        }
        let sid = self.symbols.lookup_or_create(name);
        if make_base {
            build.ops.push(AsmExprOp::ArgSymbol);
            build.args.push(AsmExprArg::Symbol(sid));
            build.sym_occurs += 1;
            return Ok(());
        }
        if let Some((value, section)) = self.symbol_inline_parts(sid) {
            push_inline(build, value, section);
            return Ok(());
        }
        let target = if self.symbols.get(sid).base {
            let top = self.source_pos(byte_pos);
            let mut map = HashMap::new();
            let snap = self.make_symbol_snapshot(sid, &mut map, &top)?;
            if let Some((value, section)) = self.symbol_inline_parts(snap) {
                push_inline(build, value, section);
                return Ok(());
            }
            snap
        } else {
            sid
        };
        let arg_index = build.args.len();
        let op_index = build.ops.len();
        build.ops.push(AsmExprOp::ArgSymbol);
        build.args.push(AsmExprArg::Symbol(target));
        build.sym_occurs += 1;
        if !dont_resolve_later {
            self.symbols
                .get_mut(target)
                .add_occurrence(expr_id, arg_index, op_index);
        }
        Ok(())
    }

    /// Value and effective section of a defined symbol; symbols in
    /// absolute-addressable sections inline as plain values.
    pub(crate) fn symbol_inline_parts(&self, sid: SymId) -> Option<(u64, u32)> {
        let sym = self.symbols.get(sid);
        if !sym.has_value {
            return None;
        }
        let section = if self.is_absolute_section(sym.section_id) {
            ASMSECT_ABS
        } else {
            sym.section_id
        };
        Some((sym.value, section))
    }

    /// Parse and evaluate an expression that must resolve right now.
    pub(crate) fn eval_immediate(&mut self, pos: &mut usize, end: usize) -> Option<(u64, u32)> {
        let start = *pos;
        let expr_id = self.parse_expression(end, pos, false, true).ok()?;
        let expr = self.exprs.take(expr_id)?;
        if expr.is_empty() {
            self.print_error_at(start, AsmErrorKind::Syntax, "Expected expression");
            return None;
        }
        if expr.sym_occurs_num != 0 {
            let pos = expr.source_pos.clone();
            self.print_error(
                &pos,
                AsmErrorKind::UndefinedReference,
                "Expression has unresolved symbols",
            );
            return None;
        }
        match expr.evaluate() {
            Ok(result) => Some(result),
            Err(e) => {
                self.print_eval_error(&expr, e);
                None
            }
        }
    }

    /// Like `eval_immediate` but additionally requires an absolute value.
    pub(crate) fn eval_immediate_abs(&mut self, pos: &mut usize, end: usize) -> Option<u64> {
        let start = *pos;
        let (value, section) = self.eval_immediate(pos, end)?;
        if section != ASMSECT_ABS {
            self.print_error_at(
                start,
                AsmErrorKind::SectionCross,
                "Expression must be an absolute value",
            );
            return None;
        }
        Some(value)
    }

    /// Trailing-garbage check for pseudo-op argument lists.
    pub(crate) fn check_garbage(&mut self, mut pos: usize, end: usize) -> bool {
        self.skip_spaces(&mut pos, end);
        if pos < end {
            self.print_error_at(
                pos,
                AsmErrorKind::Syntax,
                "Garbages at end of line with pseudo-op",
            );
            return true;
        }
        false
    }

    /// Assign an expression to a symbol. With `base_expr` the template
    /// form is kept alive for `.eqv` snapshots.
    pub(crate) fn assign_symbol(
        &mut self,
        sid: SymId,
        expr_start: usize,
        end: usize,
        base_expr: bool,
    ) -> bool {
        let mut pos = expr_start;
        let Ok(expr_id) = self.parse_expression(end, &mut pos, base_expr, false) else {
            return false;
        };
        {
            let mut p = pos;
            self.skip_spaces(&mut p, end);
            if p < end {
                self.print_error_at(p, AsmErrorKind::Syntax, "Garbages at end of expression");
                self.discard_parsed_expression(expr_id);
                return false;
            }
        }
        if self.exprs.get(expr_id).map(|e| e.is_empty()).unwrap_or(true) {
            let _ = self.exprs.take(expr_id);
            self.print_error_at(expr_start, AsmErrorKind::Syntax, "Expected expression");
            return false;
        }
        self.discard_symbol_expression(sid);
        let occurs = self
            .exprs
            .get(expr_id)
            .map(|e| e.sym_occurs_num)
            .unwrap_or(0);
        if occurs == 0 {
            let Some(mut expr) = self.exprs.take(expr_id) else {
                return false;
            };
            expr.target = Some(AsmExprTarget::Symbol(sid));
            match expr.evaluate() {
                Ok((value, section)) => {
                    self.set_symbol_value(sid, value, section);
                    true
                }
                Err(e) => {
                    self.print_eval_error(&expr, e);
                    false
                }
            }
        } else if base_expr {
            if let Some(e) = self.exprs.get_mut(expr_id) {
                e.base_expr = true;
            }
            {
                let sym = self.symbols.get_mut(sid);
                sym.base = true;
                sym.expr = Some(expr_id);
            }
            if !self.symbols.get(sid).occurrences.is_empty() {
                let Some(top) = self.exprs.get(expr_id).map(|e| e.source_pos.clone()) else {
                    return false;
                };
                let mut map = HashMap::new();
                match self.make_symbol_snapshot(sid, &mut map, &top) {
                    Ok(snap) => self.repoint_pending_occurrences(sid, snap),
                    Err(()) => {
                        self.symbols.get_mut(sid).occurrences.clear();
                        return false;
                    }
                }
            }
            true
        } else {
            if let Some(e) = self.exprs.get_mut(expr_id) {
                e.target = Some(AsmExprTarget::Symbol(sid));
            }
            self.symbols.get_mut(sid).expr = Some(expr_id);
            true
        }
    }

    /// Define a symbol's value and eagerly resolve everything that was
    /// waiting for it.
    pub(crate) fn set_symbol_value(&mut self, sid: SymId, value: u64, section_id: u32) {
        {
            let sym = self.symbols.get_mut(sid);
            sym.value = value;
            sym.section_id = section_id;
            sym.has_value = true;
            sym.expr = None;
        }
        self.run_resolution(vec![sid]);
    }

    pub(crate) fn run_resolution(&mut self, mut work: Vec<SymId>) {
        while let Some(s) = work.pop() {
            let occs = std::mem::take(&mut self.symbols.get_mut(s).occurrences);
            if occs.is_empty() {
                continue;
            }
            let Some((value, section)) = self.symbol_inline_parts(s) else {
                continue;
            };
            for occ in occs {
                self.substitute_into(occ, value, section, &mut work);
            }
        }
    }

    fn substitute_into(
        &mut self,
        occ: SymOccurrence,
        value: u64,
        section: u32,
        work: &mut Vec<SymId>,
    ) {
        let resolved = match self.exprs.get_mut(occ.expr) {
            Some(e) => {
                e.substitute_occurrence(occ.arg_index, occ.op_index, value, section);
                e.sym_occurs_num == 0
            }
            None => false,
        };
        if resolved {
            if let Some(expr) = self.exprs.take(occ.expr) {
                self.apply_resolved(expr, work);
            }
        }
    }

    fn apply_resolved(&mut self, expr: AsmExpression, work: &mut Vec<SymId>) {
        match expr.evaluate() {
            Ok((value, section)) => match expr.target {
                Some(AsmExprTarget::Symbol(t)) => {
                    let sym = self.symbols.get_mut(t);
                    sym.value = value;
                    sym.section_id = section;
                    sym.has_value = true;
                    sym.expr = None;
                    work.push(t);
                }
                Some(AsmExprTarget::Data {
                    section_id,
                    offset,
                    width,
                }) => {
                    self.write_data_slot(section_id, offset, width, value, &expr);
                }
                None => {}
            },
            Err(e) => self.print_eval_error(&expr, e),
        }
    }

    /// Resolve a freshly parsed expression with no unresolved symbols,
    /// applying its target immediately.
    pub(crate) fn resolve_expression_now(&mut self, expr_id: ExprId) {
        if let Some(expr) = self.exprs.take(expr_id) {
            let mut work = Vec::new();
            self.apply_resolved(expr, &mut work);
            self.run_resolution(work);
        }
    }

    fn write_data_slot(
        &mut self,
        section_id: u32,
        offset: usize,
        width: u8,
        value: u64,
        expr: &AsmExpression,
    ) {
        let bits = (width as u32) * 8;
        if bits < 64 {
            let fits_unsigned = value >> bits == 0;
            let fits_signed = (value as i64) >> bits == -1;
            if !fits_unsigned && !fits_signed {
                let pos = expr.source_pos.clone();
                self.print_warning(
                    &pos,
                    &format!("Value 0x{:X} does not fit in {} bits", value, bits),
                );
            }
        }
        let end = offset + width as usize;
        if let Some(section) = self.sections_mut().get_mut(section_id as usize) {
            if section.content.len() >= end {
                let bytes = value.to_le_bytes();
                section.content[offset..end].copy_from_slice(&bytes[..width as usize]);
            }
        }
    }

    pub(crate) fn print_eval_error(&mut self, expr: &AsmExpression, err: EvalError) {
        let pos = expr.error_pos(err.pos_index);
        self.print_error(&pos, err.kind, &err.message);
    }

    /// Drop a symbol's pending expression, unregistering the occurrence
    /// back-pointers it holds on other symbols.
    pub(crate) fn discard_symbol_expression(&mut self, sid: SymId) {
        let expr = self.symbols.get_mut(sid).expr.take();
        if let Some(eid) = expr {
            self.discard_parsed_expression(eid);
        }
    }

    pub(crate) fn discard_parsed_expression(&mut self, eid: ExprId) {
        let Some(expr) = self.exprs.take(eid) else {
            return;
        };
        let mut arg_index = 0usize;
        for (op_index, op) in expr.ops.iter().enumerate() {
            if *op == AsmExprOp::ArgSymbol {
                if let AsmExprArg::Symbol(t) = expr.args[arg_index] {
                    self.symbols.get_mut(t).remove_occurrence(eid, arg_index, op_index);
                }
            }
            if op.is_arg() {
                arg_index += 1;
            }
        }
    }

    /// Materialize a snapshot of a `.eqv`-bound symbol: the base
    /// expression's form with every currently defined leaf inlined,
    /// other `.eqv` leaves snapshotted recursively and plain undefined
    /// leaves left to track future resolution.
    pub(crate) fn make_symbol_snapshot(
        &mut self,
        sid: SymId,
        map: &mut HashMap<SymId, SymId>,
        top_pos: &AsmSourcePos,
    ) -> Result<SymId, ()> {
        // a symbol still being cloned deeper in this recursion is a cycle;
        // completed snapshots are found through the map
        if self.symbols.get(sid).resolving {
            let name = self.symbols.get(sid).name.clone();
            self.print_error(
                top_pos,
                AsmErrorKind::Cycle,
                &format!("Circular reference at symbol '{}'", name),
            );
            return Err(());
        }
        if let Some(&snap) = map.get(&sid) {
            return Ok(snap);
        }
        let Some(base_eid) = self.symbols.get(sid).expr else {
            return Err(());
        };
        let (mut ops, mut args, msgs) = match self.exprs.get(base_eid) {
            Some(base) => (
                base.ops.clone(),
                base.args.clone(),
                base.message_positions.clone(),
            ),
            None => return Err(()),
        };
        let name = self.symbols.get(sid).name.clone();
        let snap = self.symbols.add_snapshot(name);
        map.insert(sid, snap);
        self.symbols.get_mut(sid).resolving = true;

        let new_eid = self.exprs.alloc(AsmExpression::new(top_pos.clone()));
        let mut occurs = 0usize;
        let mut relative = args
            .iter()
            .any(|a| matches!(a, AsmExprArg::RelValue(..)));
        let mut ok = true;
        let mut arg_index = 0usize;
        for op_index in 0..ops.len() {
            let op = ops[op_index];
            if op == AsmExprOp::ArgSymbol {
                let AsmExprArg::Symbol(t) = args[arg_index] else {
                    ok = false;
                    break;
                };
                if let Some((value, section)) = self.symbol_inline_parts(t) {
                    ops[op_index] = AsmExprOp::ArgValue;
                    args[arg_index] = inline_arg(value, section, &mut relative);
                } else if self.symbols.get(t).base {
                    match self.make_symbol_snapshot(t, map, top_pos) {
                        Ok(t_snap) => {
                            if let Some((value, section)) = self.symbol_inline_parts(t_snap) {
                                ops[op_index] = AsmExprOp::ArgValue;
                                args[arg_index] = inline_arg(value, section, &mut relative);
                            } else {
                                args[arg_index] = AsmExprArg::Symbol(t_snap);
                                occurs += 1;
                                self.symbols
                                    .get_mut(t_snap)
                                    .add_occurrence(new_eid, arg_index, op_index);
                            }
                        }
                        Err(()) => {
                            ok = false;
                            break;
                        }
                    }
                } else {
                    occurs += 1;
                    self.symbols
                        .get_mut(t)
                        .add_occurrence(new_eid, arg_index, op_index);
                }
            }
            if op.is_arg() {
                arg_index += 1;
            }
        }
        self.symbols.get_mut(sid).resolving = false;

        if !ok {
            let mut ai = 0usize;
            for (oi, op) in ops.iter().enumerate() {
                if *op == AsmExprOp::ArgSymbol {
                    if let AsmExprArg::Symbol(t) = args[ai] {
                        self.symbols.get_mut(t).remove_occurrence(new_eid, ai, oi);
                    }
                }
                if op.is_arg() {
                    ai += 1;
                }
            }
            let _ = self.exprs.take(new_eid);
            return Err(());
        }

        let mut expr = AsmExpression::new(top_pos.clone());
        expr.ops = ops;
        expr.args = args;
        expr.message_positions = msgs;
        expr.sym_occurs_num = occurs;
        expr.relative_sym_occurs = relative;
        expr.target = Some(AsmExprTarget::Symbol(snap));
        if occurs == 0 {
            let _ = self.exprs.take(new_eid);
            match expr.evaluate() {
                Ok((value, section)) => {
                    let sym = self.symbols.get_mut(snap);
                    sym.value = value;
                    sym.section_id = section;
                    sym.has_value = true;
                }
                Err(e) => self.print_eval_error(&expr, e),
            }
        } else {
            self.exprs.put(new_eid, expr);
            self.symbols.get_mut(snap).expr = Some(new_eid);
        }
        Ok(snap)
    }

    /// A name with pending occurrences was just `.eqv`-bound: re-point
    /// those occurrences at its snapshot so they still resolve.
    fn repoint_pending_occurrences(&mut self, sid: SymId, snap: SymId) {
        let pending = std::mem::take(&mut self.symbols.get_mut(sid).occurrences);
        let resolved = self.symbol_inline_parts(snap);
        let mut work: Vec<SymId> = Vec::new();
        for occ in pending {
            match resolved {
                Some((value, section)) => self.substitute_into(occ, value, section, &mut work),
                None => {
                    if let Some(e) = self.exprs.get_mut(occ.expr) {
                        e.args[occ.arg_index] = AsmExprArg::Symbol(snap);
                    }
                    self.symbols
                        .get_mut(snap)
                        .add_occurrence(occ.expr, occ.arg_index, occ.op_index);
                }
            }
        }
        self.run_resolution(work);
    }
}

fn push_inline(build: &mut ExprBuild, value: u64, section: u32) {
    build.ops.push(AsmExprOp::ArgValue);
    if section == ASMSECT_ABS {
        build.args.push(AsmExprArg::Value(value));
    } else {
        build.args.push(AsmExprArg::RelValue(value, section));
        build.relative = true;
    }
}

fn inline_arg(value: u64, section: u32, relative: &mut bool) -> AsmExprArg {
    if section == ASMSECT_ABS {
        AsmExprArg::Value(value)
    } else {
        *relative = true;
        AsmExprArg::RelValue(value, section)
    }
}

fn pop_ops_over(stack: &mut Vec<StackOp>, build: &mut ExprBuild, prio: u8) {
    while let Some(StackOp::Op { prio: top, .. }) = stack.last() {
        if *top > prio {
            if let Some(StackOp::Op { op, line_col, .. }) = stack.pop() {
                build.ops.push(op);
                build.msgs.push(line_col);
            }
        } else {
            break;
        }
    }
}

fn pop_ops_at_or_over(stack: &mut Vec<StackOp>, build: &mut ExprBuild, prio: u8) {
    while let Some(StackOp::Op { prio: top, .. }) = stack.last() {
        if *top >= prio {
            if let Some(StackOp::Op { op, line_col, .. }) = stack.pop() {
                build.ops.push(op);
                build.msgs.push(line_col);
            }
        } else {
            break;
        }
    }
}
