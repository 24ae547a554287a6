// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Error types and diagnostics for the assembler.

use std::fmt;

use crate::core::source::AsmSourcePos;

/// Categories of assembler errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmErrorKind {
    Syntax,
    UndefinedReference,
    Redefinition,
    Range,
    DepthExceeded,
    DivideByZero,
    Cycle,
    SectionCross,
    UnterminatedClause,
    Handler,
    Isa,
    Io,
    Cli,
}

/// An assembler error with a kind and message.
#[derive(Debug, Clone)]
pub struct AsmError {
    kind: AsmErrorKind,
    message: String,
}

impl AsmError {
    pub fn new(kind: AsmErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn with_param(kind: AsmErrorKind, msg: &str, param: &str) -> Self {
        Self {
            kind,
            message: format_error(msg, Some(param)),
        }
    }

    pub fn kind(&self) -> AsmErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AsmError {}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A diagnostic message attributed to a source position.
///
/// Diagnostics produced before any source is read (bad `-D` options)
/// carry no position and render with a `<command-line>` origin.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    severity: Severity,
    error: AsmError,
    pos: Option<AsmSourcePos>,
}

impl Diagnostic {
    pub fn new(severity: Severity, error: AsmError, pos: Option<AsmSourcePos>) -> Self {
        Self {
            severity,
            error,
            pos,
        }
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn kind(&self) -> AsmErrorKind {
        self.error.kind()
    }

    pub fn message(&self) -> &str {
        self.error.message()
    }

    pub fn pos(&self) -> Option<&AsmSourcePos> {
        self.pos.as_ref()
    }

    /// Render the diagnostic, including the expansion backtrace, in the
    /// `file:line:col: Severity: message` layout.
    pub fn format(&self) -> String {
        let sev = match self.severity {
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        };
        match &self.pos {
            Some(pos) => format!("{}: {}: {}", pos.format_location(), sev, self.error.message()),
            None => format!("<command-line>: {}: {}", sev, self.error.message()),
        }
    }
}

/// Format an error message with an optional parameter.
pub fn format_error(msg: &str, param: Option<&str>) -> String {
    match param {
        Some(p) => format!("{msg}: {p}"),
        None => msg.to_string(),
    }
}
