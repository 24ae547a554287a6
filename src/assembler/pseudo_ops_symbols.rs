// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Symbol directives: `.equ`/`.set`, `.equiv`, `.eqv`, `.global`,
//! `.size`, `.type`.

use crate::core::error::AsmErrorKind;
use crate::core::literal;

use super::pseudo_ops::EquKind;
use super::*;

impl Assembler {
    pub(crate) fn equ_directive(&mut self, args: usize, end: usize, kind: EquKind) {
        let mut pos = args;
        self.skip_spaces(&mut pos, end);
        let Some(ident_end) = literal::scan_identifier(&self.line[..end], pos) else {
            self.print_error_at(pos.min(end), AsmErrorKind::Syntax, "Expected symbol name");
            return;
        };
        let name = text_of(&self.line, pos, ident_end);
        let name_pos = pos;
        if name == "." || self.is_reserved_name(&name) {
            self.print_error_at(
                name_pos,
                AsmErrorKind::Syntax,
                &format!("Name '{}' is a reserved name", name),
            );
            return;
        }
        pos = ident_end;
        self.skip_spaces(&mut pos, end);
        if pos >= end || self.line[pos] != b',' {
            self.print_error_at(
                pos.min(end),
                AsmErrorKind::Syntax,
                "Expected ',' before expression",
            );
            return;
        }
        pos += 1;
        let sid = self.symbols.lookup_or_create(&name);
        let redefinition = match kind {
            EquKind::Set => self.symbols.get(sid).once_defined,
            EquKind::Equiv | EquKind::Eqv => {
                let sym = self.symbols.get(sid);
                sym.once_defined || sym.has_value
            }
        };
        if redefinition {
            self.print_error_at(
                name_pos,
                AsmErrorKind::Redefinition,
                &format!("Symbol '{}' is already defined", name),
            );
            return;
        }
        match kind {
            EquKind::Set => {
                self.assign_symbol(sid, pos, end, false);
            }
            EquKind::Equiv => {
                if self.assign_symbol(sid, pos, end, false) {
                    self.symbols.get_mut(sid).once_defined = true;
                }
            }
            EquKind::Eqv => {
                if self.assign_symbol(sid, pos, end, true) {
                    self.symbols.get_mut(sid).once_defined = true;
                }
            }
        }
    }

    pub(crate) fn global_directive(&mut self, args: usize, end: usize) {
        let mut pos = args;
        loop {
            self.skip_spaces(&mut pos, end);
            if pos >= end {
                return;
            }
            let Some(ident_end) = literal::scan_identifier(&self.line[..end], pos) else {
                self.print_error_at(pos, AsmErrorKind::Syntax, "Expected symbol name");
                return;
            };
            let name = text_of(&self.line, pos, ident_end);
            let sid = self.symbols.lookup_or_create(&name);
            self.symbols.get_mut(sid).info |= SYM_BIND_GLOBAL;
            pos = ident_end;
            self.skip_spaces(&mut pos, end);
            if pos < end && self.line[pos] == b',' {
                pos += 1;
                continue;
            }
            break;
        }
        let _ = self.check_garbage(pos, end);
    }

    pub(crate) fn size_directive(&mut self, args: usize, end: usize) {
        let mut pos = args;
        self.skip_spaces(&mut pos, end);
        let Some(ident_end) = literal::scan_identifier(&self.line[..end], pos) else {
            self.print_error_at(pos.min(end), AsmErrorKind::Syntax, "Expected symbol name");
            return;
        };
        let name = text_of(&self.line, pos, ident_end);
        pos = ident_end;
        self.skip_spaces(&mut pos, end);
        if pos >= end || self.line[pos] != b',' {
            self.print_error_at(
                pos.min(end),
                AsmErrorKind::Syntax,
                "Expected ',' before expression",
            );
            return;
        }
        pos += 1;
        let Some(size) = self.eval_immediate_abs(&mut pos, end) else {
            return;
        };
        if self.check_garbage(pos, end) {
            return;
        }
        let sid = self.symbols.lookup_or_create(&name);
        self.symbols.get_mut(sid).size = size;
    }

    pub(crate) fn type_directive(&mut self, args: usize, end: usize) {
        let mut pos = args;
        self.skip_spaces(&mut pos, end);
        let Some(ident_end) = literal::scan_identifier(&self.line[..end], pos) else {
            self.print_error_at(pos.min(end), AsmErrorKind::Syntax, "Expected symbol name");
            return;
        };
        let name = text_of(&self.line, pos, ident_end);
        pos = ident_end;
        self.skip_spaces(&mut pos, end);
        if pos >= end || self.line[pos] != b',' {
            self.print_error_at(pos.min(end), AsmErrorKind::Syntax, "Expected ',' before type");
            return;
        }
        pos += 1;
        self.skip_spaces(&mut pos, end);
        if pos >= end || self.line[pos] != b'@' {
            self.print_error_at(pos.min(end), AsmErrorKind::Syntax, "Expected '@' before type");
            return;
        }
        pos += 1;
        let Some(kind_end) = literal::scan_identifier(&self.line[..end], pos) else {
            self.print_error_at(pos.min(end), AsmErrorKind::Syntax, "Expected symbol type");
            return;
        };
        let kind = text_of(&self.line, pos, kind_end);
        let type_bits = match kind.as_str() {
            "function" => SYM_TYPE_FUNC,
            "object" => SYM_TYPE_OBJECT,
            "notype" => 0,
            _ => {
                self.print_error_at(
                    pos,
                    AsmErrorKind::Syntax,
                    &format!("Unknown symbol type '@{}'", kind),
                );
                return;
            }
        };
        if self.check_garbage(kind_end, end) {
            return;
        }
        let sid = self.symbols.lookup_or_create(&name);
        let sym = self.symbols.get_mut(sid);
        sym.info = (sym.info & 0xf0) | type_bits;
    }
}
