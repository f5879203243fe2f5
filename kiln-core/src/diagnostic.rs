//! Diagnostics reported by every compiler phase.
//!
//! Diagnostics are plain data. A failed compilation is a list of
//! `Error`-severity diagnostics, never a Rust error.

use core::fmt;

use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Hidden,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Hidden => "Hidden",
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable diagnostic codes.
pub mod codes {
    pub const UNEXPECTED_CHARACTER: &str = "KL0001";
    pub const UNTERMINATED_STRING: &str = "KL0002";
    pub const INTEGER_OUT_OF_RANGE: &str = "KL0003";
    pub const INVALID_ESCAPE: &str = "KL0004";

    pub const UNEXPECTED_TOKEN: &str = "KL0100";
    pub const NESTING_TOO_DEEP: &str = "KL0101";
    pub const ITEM_NOT_ALLOWED: &str = "KL0102";

    pub const UNKNOWN_NAME: &str = "KL0200";
    pub const UNKNOWN_FUNCTION: &str = "KL0201";
    pub const DUPLICATE_DEFINITION: &str = "KL0202";
    pub const UNKNOWN_LIBRARY: &str = "KL0203";
    pub const UNKNOWN_LIBRARY_FUNCTION: &str = "KL0204";
    pub const LIBRARY_NOT_LOADED: &str = "KL0205";
    pub const UNKNOWN_TYPE: &str = "KL0206";

    pub const TYPE_MISMATCH: &str = "KL0300";
    pub const ARGUMENT_COUNT: &str = "KL0301";
    pub const INVALID_OPERANDS: &str = "KL0302";
    pub const MISSING_RETURN: &str = "KL0303";
    pub const INVALID_RETURN: &str = "KL0304";
    pub const NOT_CALLABLE: &str = "KL0305";
    pub const INVALID_ASSIGNMENT: &str = "KL0306";

    pub const UNUSED_LOCAL: &str = "KL0400";
    pub const UNREACHABLE_CODE: &str = "KL0401";
    pub const EMPTY_STATEMENT: &str = "KL0402";
    pub const DISCARDED_VALUE: &str = "KL0403";

    pub const EMIT_FAILURE: &str = "KL0500";

    /// Style lints a unit may opt out of.
    pub const LINTS: [&str; 4] = [UNUSED_LOCAL, UNREACHABLE_CODE, EMPTY_STATEMENT, DISCARDED_VALUE];

    pub fn is_lint(code: &str) -> bool {
        LINTS.contains(&code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: &'static str,
    pub message: String,
    pub span: Span,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn new(severity: Severity, code: &'static str, message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            code,
            message: message.into(),
            span,
            severity,
        }
    }

    pub fn error(code: &'static str, message: impl Into<String>, span: Span) -> Self {
        Diagnostic::new(Severity::Error, code, message, span)
    }

    pub fn warning(code: &'static str, message: impl Into<String>, span: Span) -> Self {
        Diagnostic::new(Severity::Warning, code, message, span)
    }

    pub fn info(code: &'static str, message: impl Into<String>, span: Span) -> Self {
        Diagnostic::new(Severity::Info, code, message, span)
    }

    pub fn hidden(code: &'static str, message: impl Into<String>, span: Span) -> Self {
        Diagnostic::new(Severity::Hidden, code, message, span)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}..{}]: {}",
            self.severity, self.code, self.span.start, self.span.end, self.message
        )
    }
}

/// Sorts diagnostics by position, then code, for stable output.
pub fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by(|a, b| {
        a.span
            .start
            .cmp(&b.span.start)
            .then_with(|| a.code.cmp(b.code))
            .then_with(|| a.span.end.cmp(&b.span.end))
    });
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
