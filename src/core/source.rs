// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Source provenance for assembled lines.
//!
//! Every byte of a logical line can be traced back to a file position,
//! through any number of include, macro substitution and repetition
//! layers. `AsmSourcePos` carries the whole chain so diagnostics can
//! print the expansion backtrace.

use std::fmt::Write as _;
use std::rc::Rc;

/// A line/column pair, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineCol {
    pub line_no: u64,
    pub col_no: usize,
}

impl LineCol {
    pub fn new(line_no: u64, col_no: usize) -> Self {
        Self { line_no, col_no }
    }
}

/// Origin of a body of source text.
#[derive(Debug)]
pub enum AsmSource {
    /// A top-level or included file.
    File {
        /// The including source, if any.
        parent: Option<Rc<AsmSource>>,
        /// Position of the `.include` in the parent.
        include_pos: Option<LineCol>,
        path: String,
    },
    /// One iteration of a repetition body.
    Repetition {
        parent: Rc<AsmSource>,
        iteration: u64,
        total: u64,
    },
}

impl AsmSource {
    pub fn top_file(path: impl Into<String>) -> Rc<AsmSource> {
        Rc::new(AsmSource::File {
            parent: None,
            include_pos: None,
            path: path.into(),
        })
    }

    /// Name of the file this source ultimately reads from.
    pub fn file_path(&self) -> &str {
        match self {
            AsmSource::File { path, .. } => path,
            AsmSource::Repetition { parent, .. } => parent.file_path(),
        }
    }
}

/// One frame of macro substitution: where a macro was invoked.
#[derive(Debug)]
pub struct MacroSubst {
    pub parent: Option<Rc<MacroSubst>>,
    pub source: Rc<AsmSource>,
    pub pos: LineCol,
}

/// Full source position of a byte: the substitution chain, the source
/// body and the line/column inside it.
#[derive(Debug, Clone)]
pub struct AsmSourcePos {
    pub macro_subst: Option<Rc<MacroSubst>>,
    pub source: Rc<AsmSource>,
    pub line_no: u64,
    pub col_no: usize,
}

impl AsmSourcePos {
    /// Same position with the line/column replaced, used to point at an
    /// operator inside an already-located expression.
    pub fn at(&self, line_col: LineCol) -> AsmSourcePos {
        AsmSourcePos {
            macro_subst: self.macro_subst.clone(),
            source: Rc::clone(&self.source),
            line_no: line_col.line_no,
            col_no: line_col.col_no,
        }
    }

    /// Render the inclusion/substitution backtrace plus the
    /// `file:line:col` location prefix (without severity or message).
    pub fn format_location(&self) -> String {
        let mut out = String::new();
        if let Some(subst) = &self.macro_subst {
            format_subst_chain(&mut out, subst);
        }
        format_source_chain(&mut out, &self.source);
        let _ = write!(
            out,
            "{}:{}:{}",
            self.source.file_path(),
            self.line_no,
            self.col_no
        );
        out
    }
}

fn format_subst_chain(out: &mut String, subst: &MacroSubst) {
    if let Some(parent) = &subst.parent {
        format_subst_chain(out, parent);
    }
    let _ = writeln!(
        out,
        "In macro substituted from {}:{}:{}:",
        subst.source.file_path(),
        subst.pos.line_no,
        subst.pos.col_no
    );
}

fn format_source_chain(out: &mut String, source: &AsmSource) {
    match source {
        AsmSource::File {
            parent: Some(parent),
            include_pos: Some(pos),
            ..
        } => {
            format_source_chain(out, parent);
            let _ = writeln!(
                out,
                "In file included from {}:{}:",
                parent.file_path(),
                pos.line_no
            );
        }
        AsmSource::File { .. } => {}
        AsmSource::Repetition {
            parent,
            iteration,
            total,
        } => {
            format_source_chain(out, parent);
            let _ = writeln!(out, "In repetition {}/{}:", iteration, total);
        }
    }
}
