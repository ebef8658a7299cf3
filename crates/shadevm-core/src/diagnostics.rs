//! Batched diagnostic reporting.
//!
//! All error/warning/info reporting from the compiler passes and the
//! runtime funnels through one [`Diagnostics`] sink. Compiler errors are
//! accumulated rather than aborting the pass, so a single compile surfaces
//! as many problems as possible; the session refuses to emit bytecode if
//! any error was recorded.

use std::collections::VecDeque;
use std::fmt;

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Error,
    Warning,
    Info,
}

/// A single diagnostic message with its source position.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// Source file, if known.
    pub file: Option<String>,
    /// Source line (0 if unknown).
    pub line: i32,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Info => "info",
        };
        match &self.file {
            Some(file) => write!(f, "{}:{}: {}: {}", file, self.line, kind, self.message),
            None => write!(f, "{}: {}", kind, self.message),
        }
    }
}

/// Accumulating sink for diagnostics.
///
/// Tracks whether any error has been recorded so the common "did anything
/// go wrong" check is O(1).
#[derive(Debug, Default)]
pub struct Diagnostics {
    messages: VecDeque<Diagnostic>,
    has_errors: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        if diagnostic.kind == DiagnosticKind::Error {
            self.has_errors = true;
        }
        self.messages.push_back(diagnostic);
    }

    /// Record a non-fatal error at a source position.
    pub fn error(&mut self, file: Option<&str>, line: i32, message: impl Into<String>) {
        self.add(Diagnostic {
            kind: DiagnosticKind::Error,
            message: message.into(),
            file: file.map(str::to_string),
            line,
        });
    }

    pub fn warning(&mut self, file: Option<&str>, line: i32, message: impl Into<String>) {
        self.add(Diagnostic {
            kind: DiagnosticKind::Warning,
            message: message.into(),
            file: file.map(str::to_string),
            line,
        });
    }

    pub fn info(&mut self, file: Option<&str>, line: i32, message: impl Into<String>) {
        self.add(Diagnostic {
            kind: DiagnosticKind::Info,
            message: message.into(),
            file: file.map(str::to_string),
            line,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.has_errors
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.messages.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.messages
            .iter()
            .filter(|d| d.kind == DiagnosticKind::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.messages
            .iter()
            .filter(|d| d.kind == DiagnosticKind::Warning)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.has_errors = false;
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.messages {
            writeln!(f, "{}", d)?;
        }
        Ok(())
    }
}
