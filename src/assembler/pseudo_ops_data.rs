// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Data emission directives: `.byte`-family, `.ascii`, `.fill`, `.skip`.

use crate::core::error::AsmErrorKind;
use crate::core::literal;

use super::expression::AsmExprTarget;
use super::*;

impl Assembler {
    /// Emit a comma-separated list of `width`-byte little-endian
    /// values. Each expression becomes a lazy fixup against its slot;
    /// already-resolved expressions are written immediately.
    pub(crate) fn data_directive(&mut self, name_start: usize, args: usize, end: usize, width: u8) {
        self.ensure_output_format();
        if self.section_flags(self.current_section()) & ASMSECT_WRITABLE == 0 {
            self.print_error_at(
                name_start,
                AsmErrorKind::Handler,
                "Writing data into non-writable section is illegal",
            );
            return;
        }
        let zeros = vec![0u8; width as usize];
        let mut pos = args;
        loop {
            self.skip_spaces(&mut pos, end);
            if pos >= end {
                break;
            }
            let expr_start = pos;
            let Ok(expr_id) = self.parse_expression(end, &mut pos, false, false) else {
                return;
            };
            if self.exprs.get(expr_id).map(|e| e.is_empty()).unwrap_or(true) {
                let _ = self.exprs.take(expr_id);
                self.print_error_at(expr_start, AsmErrorKind::Syntax, "Expected expression");
                return;
            }
            let section_id = self.current_section();
            let offset = self.current_out_pos() as usize;
            if !self.emit_bytes(name_start, &zeros) {
                self.discard_parsed_expression(expr_id);
                return;
            }
            let resolved = match self.exprs.get_mut(expr_id) {
                Some(e) => {
                    e.target = Some(AsmExprTarget::Data {
                        section_id,
                        offset,
                        width,
                    });
                    e.sym_occurs_num == 0
                }
                None => false,
            };
            if resolved {
                self.resolve_expression_now(expr_id);
            }
            self.skip_spaces(&mut pos, end);
            if pos < end && self.line[pos] == b',' {
                pos += 1;
                continue;
            }
            break;
        }
        let _ = self.check_garbage(pos, end);
    }

    /// `.ascii` emits string bytes verbatim; `.asciz`/`.string` add a
    /// trailing NUL after each string.
    pub(crate) fn ascii_directive(
        &mut self,
        name_start: usize,
        args: usize,
        end: usize,
        with_nul: bool,
    ) {
        self.ensure_output_format();
        let mut pos = args;
        loop {
            self.skip_spaces(&mut pos, end);
            if pos >= end {
                break;
            }
            if self.line[pos] != b'"' {
                self.print_error_at(pos, AsmErrorKind::Syntax, "Expected string");
                return;
            }
            let s_pos = pos;
            let bytes = match literal::parse_string(&self.line[..end], &mut pos) {
                Ok(b) => b,
                Err(e) => {
                    let msg = e.message().to_string();
                    self.print_error_at(s_pos, e.kind(), &msg);
                    return;
                }
            };
            if !self.emit_bytes(name_start, &bytes) {
                return;
            }
            if with_nul && !self.emit_bytes(name_start, &[0]) {
                return;
            }
            self.skip_spaces(&mut pos, end);
            if pos < end && self.line[pos] == b',' {
                pos += 1;
                continue;
            }
            break;
        }
        let _ = self.check_garbage(pos, end);
    }

    /// `.fill repeat[, size[, value]]`.
    pub(crate) fn fill_directive(&mut self, name_start: usize, args: usize, end: usize) {
        self.ensure_output_format();
        let mut pos = args;
        let Some(repeat) = self.eval_immediate_abs(&mut pos, end) else {
            return;
        };
        let mut size: u64 = 1;
        let mut value: u64 = 0;
        self.skip_spaces(&mut pos, end);
        if pos < end && self.line[pos] == b',' {
            pos += 1;
            let Some(s) = self.eval_immediate_abs(&mut pos, end) else {
                return;
            };
            size = s;
            self.skip_spaces(&mut pos, end);
            if pos < end && self.line[pos] == b',' {
                pos += 1;
                let Some(v) = self.eval_immediate_abs(&mut pos, end) else {
                    return;
                };
                value = v;
            }
        }
        if self.check_garbage(pos, end) {
            return;
        }
        if size > 8 {
            self.print_error_at(name_start, AsmErrorKind::Range, "Fill size is out of range");
            return;
        }
        if size == 0 || repeat == 0 {
            return;
        }
        let chunk = value.to_le_bytes();
        let mut data = Vec::with_capacity((repeat * size) as usize);
        for _ in 0..repeat {
            data.extend_from_slice(&chunk[..size as usize]);
        }
        self.emit_bytes(name_start, &data);
    }

    /// `.skip count[, fill]` (alias `.space`).
    pub(crate) fn skip_directive(&mut self, name_start: usize, args: usize, end: usize) {
        self.ensure_output_format();
        let mut pos = args;
        let Some(count) = self.eval_immediate_abs(&mut pos, end) else {
            return;
        };
        let mut fill: u64 = 0;
        self.skip_spaces(&mut pos, end);
        if pos < end && self.line[pos] == b',' {
            pos += 1;
            let Some(f) = self.eval_immediate_abs(&mut pos, end) else {
                return;
            };
            fill = f;
        }
        if self.check_garbage(pos, end) {
            return;
        }
        let data = vec![fill as u8; count as usize];
        self.emit_bytes(name_start, &data);
    }
}
