//! Recoverable diagnostics.
//!
//! Fatal conditions travel as [`crate::error::Error`]; everything a link
//! can survive (duplicate symbols, undefined symbols, overflowing
//! relocations) is recorded here and also routed through [`log`]. The
//! frontend inspects
//! [`Diagnostics::failed`] at the end of the run to decide the exit status.

use core::fmt;

/// What went wrong, for programmatic inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Same strong symbol defined in two modules; the first definition wins
    DuplicateSymbol,
    /// A relocation target could not be resolved to any definition
    UndefinedSymbol,
    /// A patched value did not fit its field; the truncated value was written
    RelocationOverflow,
    /// The relocation kind cannot be expressed in the output format
    UnsupportedRelocationKind,
    /// An extended `$$…$` name could not be parsed
    BadExtendedName,
    /// Anything else worth a warning (section name clashes, leftover
    /// sections during layout, missing entry points)
    Other,
}

/// Severity decides whether the link still counts as successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self.severity {
            Severity::Warning => write!(fmt, "Warning: {}", self.message),
            Severity::Error => write!(fmt, "Error: {}", self.message),
        }
    }
}

/// Accumulates diagnostics over one linker invocation.
#[derive(Debug, Default)]
pub struct Diagnostics {
    records: Vec<Diagnostic>,
    errors: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    /// Records a warning; the link still succeeds.
    pub fn warning(&mut self, kind: DiagnosticKind, message: String) {
        log::warn!("{message}");
        self.records.push(Diagnostic {
            kind,
            severity: Severity::Warning,
            message,
        });
    }

    /// Records an error; the run continues but exits non-zero.
    pub fn error(&mut self, kind: DiagnosticKind, message: String) {
        log::error!("{message}");
        self.errors += 1;
        self.records.push(Diagnostic {
            kind,
            severity: Severity::Error,
            message,
        });
    }

    /// True when any error-severity diagnostic was recorded.
    pub fn failed(&self) -> bool {
        self.errors > 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.records.iter()
    }

    pub fn count_of(&self, kind: DiagnosticKind) -> usize {
        self.records.iter().filter(|d| d.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
