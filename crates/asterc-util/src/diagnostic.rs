//! Error and warning reporting infrastructure.
//!
//! Code generation reports user-facing problems through a [`Handler`]: each
//! diagnostic carries a severity [`Level`], a message, and the [`Span`] of
//! the offending source. The driver checks [`Handler::has_errors`] between
//! passes and refuses to run later passes once an error has been recorded.
//!
//! # Examples
//!
//! ```
//! use asterc_util::diagnostic::{Handler, Level};
//! use asterc_util::span::Span;
//!
//! let handler = Handler::new();
//! handler.error(Span::DUMMY, "cannot take address of inline function");
//!
//! assert!(handler.has_errors());
//! assert_eq!(handler.error_count(), 1);
//! ```

use crate::span::Span;
use std::cell::RefCell;
use std::fmt;

/// Diagnostic severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    /// An error that prevents compilation
    Error,
    /// A construct the compiler recognises but cannot yet generate code for
    Sorry,
    /// A warning that doesn't prevent compilation
    Warning,
    /// Additional information about a diagnostic
    Note,
}

impl Level {
    /// Whether this level causes the compilation to fail
    pub fn is_fatal(self) -> bool {
        matches!(self, Level::Error | Level::Sorry)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "error"),
            Level::Sorry => write!(f, "sorry"),
            Level::Warning => write!(f, "warning"),
            Level::Note => write!(f, "note"),
        }
    }
}

/// A diagnostic message with severity and location
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// Diagnostic severity level
    pub level: Level,
    /// Main diagnostic message
    pub message: String,
    /// Source location
    pub span: Span,
    /// Additional notes for context
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic
    pub fn new(level: Level, message: impl Into<String>, span: Span) -> Self {
        Self {
            level,
            message: message.into(),
            span,
            notes: Vec::new(),
        }
    }

    /// Create an error diagnostic
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self::new(Level::Error, message, span)
    }

    /// Create a sorry (unsupported-feature) diagnostic
    pub fn sorry(message: impl Into<String>, span: Span) -> Self {
        Self::new(Level::Sorry, message, span)
    }

    /// Add a note to the diagnostic
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// Handler for collecting and reporting diagnostics.
///
/// The handler is shared by reference through the codegen passes; it uses
/// interior mutability so emission sites don't need `&mut` access.
pub struct Handler {
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl Handler {
    /// Create a new handler
    pub fn new() -> Self {
        Self {
            diagnostics: RefCell::new(Vec::new()),
        }
    }

    /// Report an error at the given span
    pub fn error(&self, span: Span, message: impl Into<String>) {
        self.emit(Diagnostic::error(message, span));
    }

    /// Report an unsupported construct at the given span
    pub fn sorry(&self, span: Span, message: impl Into<String>) {
        self.emit(Diagnostic::sorry(message, span));
    }

    /// Emit a pre-built diagnostic
    pub fn emit(&self, diagnostic: Diagnostic) {
        self.diagnostics.borrow_mut().push(diagnostic);
    }

    /// Check if any fatal diagnostics have been reported
    pub fn has_errors(&self) -> bool {
        self.diagnostics.borrow().iter().any(|d| d.level.is_fatal())
    }

    /// Get the number of fatal diagnostics
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .borrow()
            .iter()
            .filter(|d| d.level.is_fatal())
            .count()
    }

    /// Get all diagnostics collected so far
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }
}

impl Default for Handler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_display() {
        assert_eq!(format!("{}", Level::Error), "error");
        assert_eq!(format!("{}", Level::Sorry), "sorry");
        assert_eq!(format!("{}", Level::Warning), "warning");
        assert_eq!(format!("{}", Level::Note), "note");
    }

    #[test]
    fn sorry_is_fatal() {
        let handler = Handler::new();
        handler.sorry(Span::DUMMY, "array-of-struct literals");
        assert!(handler.has_errors());
    }

    #[test]
    fn warnings_are_not_fatal() {
        let handler = Handler::new();
        handler.emit(Diagnostic::new(Level::Warning, "unused", Span::DUMMY));
        assert!(!handler.has_errors());
        assert_eq!(handler.error_count(), 0);
    }

    #[test]
    fn notes_are_attached() {
        let diag = Diagnostic::error("type mismatch", Span::DUMMY)
            .with_note("expected `integer`")
            .with_note("found `*byte`");
        assert_eq!(diag.notes.len(), 2);
    }

    #[test]
    fn error_count_counts_only_fatal() {
        let handler = Handler::new();
        handler.error(Span::DUMMY, "one");
        handler.emit(Diagnostic::new(Level::Note, "context", Span::DUMMY));
        handler.error(Span::DUMMY, "two");
        assert_eq!(handler.error_count(), 2);
    }
}
