//! Diagnostics shared by every pipeline stage.
//!
//! A diagnostic describes something wrong with the *analyzed source*; it is a
//! value, not an error. Only the preprocessor decides when a fatal diagnostic
//! stops the current translation unit.

use serde::Serialize;
use std::fmt;

use crate::token::{FileId, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticKind {
    /// Unterminated literal or comment.
    LexicalError,
    /// Conflicting redefinition, expansion depth exceeded, malformed `#if`.
    MacroError,
    /// Unterminated or mismatched `#if`/`#endif`, stray `#else`/`#elif`.
    ConditionalError,
    /// Unparseable declaration, recovered by skipping to a boundary.
    SyntaxError,
    /// Conflicting duplicate declaration, typedef cycle.
    SemanticWarning,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticKind::LexicalError => "lexical error",
            DiagnosticKind::MacroError => "macro error",
            DiagnosticKind::ConditionalError => "conditional error",
            DiagnosticKind::SyntaxError => "syntax error",
            DiagnosticKind::SemanticWarning => "warning",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub file: FileId,
    pub line: u32,
    pub column: u32,
    pub message: String,
    /// Stops processing of the current translation unit.
    pub fatal: bool,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, span: &Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            file: span.file.clone(),
            line: span.line,
            column: span.column,
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn non_fatal(mut self) -> Self {
        self.fatal = false;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.file, self.line, self.column, self.kind, self.message
        )
    }
}
