// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The input filter stack.
//!
//! Filters produce logical lines: the stream filter reads file bytes,
//! strips comments and joins continuations; the macro filter replays a
//! macro body substituting `\param`, `\@` and `\()`; the repeat filter
//! replays a captured body N times substituting `\+` with the iteration
//! index. Every filter keeps per-line column translations so any byte
//! of its output maps back to an original source position.

use std::collections::HashMap;
use std::rc::Rc;

use crate::core::source::{AsmSource, AsmSourcePos, LineCol, MacroSubst};

/// Maps a byte offset of the produced line back to a source line and
/// the column where that stretch begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTrans {
    pub position: usize,
    pub line_no: u64,
    pub col_base: usize,
}

/// Find the source position of byte `pos` within a produced line.
pub fn lookup_trans(translations: &[LineTrans], pos: usize) -> LineCol {
    let mut result = LineCol::new(1, pos + 1);
    for t in translations {
        if t.position <= pos {
            result = LineCol::new(t.line_no, t.col_base + (pos - t.position));
        } else {
            break;
        }
    }
    result
}

/// A logical line captured for later replay (macro or repeat bodies),
/// with enough provenance to keep diagnostics exact.
#[derive(Debug, Clone)]
pub struct CapturedLine {
    pub text: Vec<u8>,
    pub source: Rc<AsmSource>,
    pub subst: Option<Rc<MacroSubst>>,
    pub translations: Vec<LineTrans>,
}

#[derive(Debug, Clone)]
pub struct MacroParam {
    pub name: String,
    pub default: Option<String>,
    pub required: bool,
}

#[derive(Debug)]
pub struct AsmMacro {
    pub name: String,
    pub params: Vec<MacroParam>,
    pub body: Vec<CapturedLine>,
}

/// One frame of the input stack.
pub enum AsmInputFilter {
    Stream(AsmStreamInputFilter),
    Macro(AsmMacroInputFilter),
    Repeat(AsmRepeatInputFilter),
}

impl AsmInputFilter {
    pub fn read_line(&mut self) -> Option<Vec<u8>> {
        match self {
            AsmInputFilter::Stream(f) => f.read_line(),
            AsmInputFilter::Macro(f) => f.read_line(),
            AsmInputFilter::Repeat(f) => f.read_line(),
        }
    }

    pub fn translations(&self) -> &[LineTrans] {
        match self {
            AsmInputFilter::Stream(f) => &f.translations,
            AsmInputFilter::Macro(f) => &f.translations,
            AsmInputFilter::Repeat(f) => &f.translations,
        }
    }

    pub fn source(&self) -> Rc<AsmSource> {
        match self {
            AsmInputFilter::Stream(f) => Rc::clone(&f.source),
            AsmInputFilter::Macro(f) => Rc::clone(&f.cur_source),
            AsmInputFilter::Repeat(f) => Rc::clone(&f.cur_source),
        }
    }

    pub fn macro_subst(&self) -> Option<Rc<MacroSubst>> {
        match self {
            AsmInputFilter::Stream(_) => None,
            AsmInputFilter::Macro(f) => Some(Rc::clone(&f.subst)),
            AsmInputFilter::Repeat(f) => f.cur_subst.clone(),
        }
    }

    pub fn translate_pos(&self, pos: usize) -> LineCol {
        lookup_trans(self.translations(), pos)
    }

    pub fn source_pos(&self, pos: usize) -> AsmSourcePos {
        let line_col = self.translate_pos(pos);
        AsmSourcePos {
            macro_subst: self.macro_subst(),
            source: self.source(),
            line_no: line_col.line_no,
            col_no: line_col.col_no,
        }
    }

    /// Capture the current produced line for a macro or repeat body.
    pub fn capture_line(&self, text: Vec<u8>) -> CapturedLine {
        CapturedLine {
            text,
            source: self.source(),
            subst: self.macro_subst(),
            translations: self.translations().to_vec(),
        }
    }

    /// Stop producing lines (used by `.exitm`). A stream filter cannot
    /// be exited this way.
    pub fn set_exit(&mut self) {
        match self {
            AsmInputFilter::Stream(_) => {}
            AsmInputFilter::Macro(f) => f.exit = true,
            AsmInputFilter::Repeat(f) => f.exit = true,
        }
    }

    pub fn is_macro(&self) -> bool {
        matches!(self, AsmInputFilter::Macro(_))
    }

    pub fn is_repeat(&self) -> bool {
        matches!(self, AsmInputFilter::Repeat(_))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, AsmInputFilter::Stream(_))
    }
}

/// Reads logical lines from file bytes: strips `#`, `//` and `/* */`
/// comments (replacing in-line comment bytes with spaces so columns
/// stay aligned), joins backslash-newline continuations and records
/// column translations.
pub struct AsmStreamInputFilter {
    source: Rc<AsmSource>,
    data: Vec<u8>,
    pos: usize,
    line_no: u64,
    translations: Vec<LineTrans>,
}

enum StreamMode {
    Normal,
    LineComment,
    BlockComment,
}

impl AsmStreamInputFilter {
    pub fn new(source: Rc<AsmSource>, data: Vec<u8>) -> Self {
        Self {
            source,
            data,
            pos: 0,
            line_no: 1,
            translations: Vec::new(),
        }
    }

    pub fn translate_pos(&self, pos: usize) -> LineCol {
        lookup_trans(&self.translations, pos)
    }

    fn read_line(&mut self) -> Option<Vec<u8>> {
        if self.pos >= self.data.len() {
            return None;
        }
        let mut out = Vec::new();
        self.translations.clear();
        self.translations.push(LineTrans {
            position: 0,
            line_no: self.line_no,
            col_base: 1,
        });
        let mut col: usize = 1;
        let mut mode = StreamMode::Normal;
        let mut string_quote: Option<u8> = None;
        let mut comment_on_output_line = true;

        while self.pos < self.data.len() {
            let b = self.data[self.pos];
            if b == b'\r' && self.data.get(self.pos + 1) == Some(&b'\n') {
                self.pos += 1;
                continue;
            }
            match mode {
                StreamMode::Normal => {
                    if let Some(q) = string_quote {
                        if b == b'\n' {
                            // unterminated string: the statement parser reports it
                            self.pos += 1;
                            self.line_no += 1;
                            return Some(out);
                        }
                        out.push(b);
                        self.pos += 1;
                        col += 1;
                        if b == b'\\' {
                            if let Some(&n) = self.data.get(self.pos) {
                                if n != b'\n' {
                                    out.push(n);
                                    self.pos += 1;
                                    col += 1;
                                }
                            }
                        } else if b == q {
                            string_quote = None;
                        }
                        continue;
                    }
                    match b {
                        b'\n' => {
                            self.pos += 1;
                            self.line_no += 1;
                            return Some(out);
                        }
                        b'\\' => {
                            let mut k = self.pos + 1;
                            if self.data.get(k) == Some(&b'\r') {
                                k += 1;
                            }
                            if self.data.get(k) == Some(&b'\n') {
                                self.pos = k + 1;
                                self.line_no += 1;
                                col = 1;
                                self.translations.push(LineTrans {
                                    position: out.len(),
                                    line_no: self.line_no,
                                    col_base: 1,
                                });
                            } else {
                                out.push(b);
                                self.pos += 1;
                                col += 1;
                            }
                        }
                        b'#' => {
                            mode = StreamMode::LineComment;
                            self.pos += 1;
                        }
                        b'/' if self.data.get(self.pos + 1) == Some(&b'/') => {
                            mode = StreamMode::LineComment;
                            self.pos += 2;
                        }
                        b'/' if self.data.get(self.pos + 1) == Some(&b'*') => {
                            mode = StreamMode::BlockComment;
                            comment_on_output_line = true;
                            out.push(b' ');
                            out.push(b' ');
                            self.pos += 2;
                            col += 2;
                        }
                        b'"' | b'\'' => {
                            string_quote = Some(b);
                            out.push(b);
                            self.pos += 1;
                            col += 1;
                        }
                        _ => {
                            out.push(b);
                            self.pos += 1;
                            col += 1;
                        }
                    }
                }
                StreamMode::LineComment => {
                    if b == b'\n' {
                        self.pos += 1;
                        self.line_no += 1;
                        return Some(out);
                    }
                    self.pos += 1;
                }
                StreamMode::BlockComment => {
                    if b == b'\n' {
                        self.pos += 1;
                        self.line_no += 1;
                        col = 1;
                        comment_on_output_line = false;
                    } else if b == b'*' && self.data.get(self.pos + 1) == Some(&b'/') {
                        self.pos += 2;
                        col += 2;
                        if comment_on_output_line {
                            out.push(b' ');
                            out.push(b' ');
                        } else {
                            self.translations.push(LineTrans {
                                position: out.len(),
                                line_no: self.line_no,
                                col_base: col,
                            });
                        }
                        mode = StreamMode::Normal;
                    } else {
                        self.pos += 1;
                        col += 1;
                        if comment_on_output_line {
                            out.push(b' ');
                        }
                    }
                }
            }
        }
        Some(out)
    }
}

/// Replays a macro body, substituting parameters and `\@`.
pub struct AsmMacroInputFilter {
    mac: Rc<AsmMacro>,
    args: HashMap<String, String>,
    subst: Rc<MacroSubst>,
    subst_counter: u64,
    body_index: usize,
    translations: Vec<LineTrans>,
    cur_source: Rc<AsmSource>,
    exit: bool,
}

impl AsmMacroInputFilter {
    pub fn new(
        mac: Rc<AsmMacro>,
        args: HashMap<String, String>,
        subst: Rc<MacroSubst>,
        subst_counter: u64,
    ) -> Self {
        let cur_source = Rc::clone(&subst.source);
        Self {
            mac,
            args,
            subst,
            subst_counter,
            body_index: 0,
            translations: Vec::new(),
            cur_source,
            exit: false,
        }
    }

    fn read_line(&mut self) -> Option<Vec<u8>> {
        if self.exit || self.body_index >= self.mac.body.len() {
            return None;
        }
        let line = Rc::clone(&self.mac.body[self.body_index].source);
        let counter = self.subst_counter.to_string();
        let (out, translations) = {
            let body_line = &self.mac.body[self.body_index];
            substitute_captured(body_line, |name| {
                if name == "@" {
                    Some(counter.clone())
                } else {
                    self.args.get(name).cloned()
                }
            })
        };
        self.cur_source = line;
        self.translations = translations;
        self.body_index += 1;
        Some(out)
    }
}

/// Replays a captured body `total` times, substituting `\+` with the
/// zero-based iteration index.
pub struct AsmRepeatInputFilter {
    body: Vec<CapturedLine>,
    iteration: u64,
    total: u64,
    body_index: usize,
    translations: Vec<LineTrans>,
    cur_source: Rc<AsmSource>,
    cur_subst: Option<Rc<MacroSubst>>,
    exit: bool,
}

impl AsmRepeatInputFilter {
    pub fn new(body: Vec<CapturedLine>, total: u64, fallback_source: Rc<AsmSource>) -> Self {
        Self {
            body,
            iteration: 0,
            total,
            body_index: 0,
            translations: Vec::new(),
            cur_source: fallback_source,
            cur_subst: None,
            exit: false,
        }
    }

    fn read_line(&mut self) -> Option<Vec<u8>> {
        if self.exit {
            return None;
        }
        while self.body_index >= self.body.len() {
            self.iteration += 1;
            self.body_index = 0;
            if self.body.is_empty() {
                break;
            }
        }
        if self.iteration >= self.total || self.body.is_empty() {
            return None;
        }
        let counter = self.iteration.to_string();
        let (out, translations) = {
            let body_line = &self.body[self.body_index];
            substitute_captured(body_line, |name| {
                if name == "+" {
                    Some(counter.clone())
                } else {
                    None
                }
            })
        };
        let body_line = &self.body[self.body_index];
        self.cur_source = Rc::new(AsmSource::Repetition {
            parent: Rc::clone(&body_line.source),
            iteration: self.iteration + 1,
            total: self.total,
        });
        self.cur_subst = body_line.subst.clone();
        self.translations = translations;
        self.body_index += 1;
        Some(out)
    }
}

/// Expand backslash substitutions in a captured line. `lookup` maps a
/// marker name (parameter name, `@`, `+`) to its replacement; unknown
/// markers are left verbatim. Substituted bytes attribute to the
/// marker's own source position.
fn substitute_captured(
    line: &CapturedLine,
    lookup: impl Fn(&str) -> Option<String>,
) -> (Vec<u8>, Vec<LineTrans>) {
    let text = &line.text;
    let mut out: Vec<u8> = Vec::with_capacity(text.len());
    let mut translations: Vec<LineTrans> = Vec::new();
    let mut seg_start = 0usize;
    let mut i = 0usize;

    let flush = |out: &mut Vec<u8>, translations: &mut Vec<LineTrans>, from: usize, to: usize| {
        if to <= from {
            return;
        }
        let delta = out.len() as i64 - from as i64;
        for (idx, t) in line.translations.iter().enumerate() {
            let next_pos = line
                .translations
                .get(idx + 1)
                .map(|n| n.position)
                .unwrap_or(usize::MAX);
            if next_pos <= from || t.position >= to {
                continue;
            }
            let eff = t.position.max(from);
            translations.push(LineTrans {
                position: (eff as i64 + delta) as usize,
                line_no: t.line_no,
                col_base: t.col_base + (eff - t.position),
            });
        }
        out.extend_from_slice(&text[from..to]);
    };

    while i < text.len() {
        if text[i] != b'\\' || i + 1 >= text.len() {
            i += 1;
            continue;
        }
        let marker_pos = lookup_trans(&line.translations, i);
        let next = text[i + 1];
        if next == b'(' && text.get(i + 2) == Some(&b')') {
            flush(&mut out, &mut translations, seg_start, i);
            i += 3;
            seg_start = i;
            continue;
        }
        if next == b'\\' {
            flush(&mut out, &mut translations, seg_start, i);
            translations.push(LineTrans {
                position: out.len(),
                line_no: marker_pos.line_no,
                col_base: marker_pos.col_no,
            });
            out.push(b'\\');
            i += 2;
            seg_start = i;
            continue;
        }
        let name_end = if next == b'@' || next == b'+' {
            i + 2
        } else {
            let mut e = i + 1;
            while e < text.len()
                && (text[e].is_ascii_alphanumeric() || text[e] == b'_')
            {
                e += 1;
            }
            e
        };
        if name_end == i + 1 {
            i += 1;
            continue;
        }
        let name = String::from_utf8_lossy(&text[i + 1..name_end]).into_owned();
        match lookup(&name) {
            Some(value) => {
                flush(&mut out, &mut translations, seg_start, i);
                translations.push(LineTrans {
                    position: out.len(),
                    line_no: marker_pos.line_no,
                    col_base: marker_pos.col_no,
                });
                out.extend_from_slice(value.as_bytes());
                translations.push(LineTrans {
                    position: out.len(),
                    line_no: marker_pos.line_no,
                    col_base: marker_pos.col_no + (name_end - i),
                });
                i = name_end;
                seg_start = i;
            }
            None => {
                i = name_end;
            }
        }
    }
    flush(&mut out, &mut translations, seg_start, text.len());
    if translations.is_empty() {
        translations.push(LineTrans {
            position: 0,
            line_no: lookup_trans(&line.translations, 0).line_no,
            col_base: 1,
        });
    }
    (out, translations)
}
