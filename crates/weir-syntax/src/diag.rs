use std::fmt;
use thiserror::Error;

/// A position in configuration source text, 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Span {
    /// Line number, starting at 1
    pub line: u32,
    /// Column number, starting at 1
    pub column: u32,
}

impl Span {
    /// Create a new span at the given line and column
    pub fn new(line: u32, column: u32) -> Self {
        Span { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Severity of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Severity {
    /// The configuration cannot be used
    Error,
    /// The configuration is usable but suspicious
    Warning,
}

/// Diagnostic codes
pub mod codes {
    /// Source text could not be tokenized or parsed
    pub const ERR_PARSE: &str = "ERR_SYNTAX_PARSE";

    /// An identifier path did not resolve against the scope
    pub const ERR_UNDEFINED: &str = "ERR_EVAL_UNDEFINED";

    /// An operation was applied to values of the wrong kind
    pub const ERR_TYPE: &str = "ERR_EVAL_TYPE";

    /// A field name is not part of the target schema
    pub const ERR_UNKNOWN_FIELD: &str = "ERR_EVAL_UNKNOWN_FIELD";

    /// A required schema field is missing
    pub const ERR_MISSING_FIELD: &str = "ERR_SCHEMA_MISSING_FIELD";

    /// An argument value failed component validation
    pub const ERR_INVALID_ARGUMENT: &str = "ERR_SCHEMA_INVALID_ARGUMENT";
}

/// A structured problem report with an optional source location.
///
/// Mirrors the shape consumed by UIs: a stable code, a human-readable
/// message, and where in the source the problem was found.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Diagnostic {
    /// Stable identifier for the class of problem
    pub code: &'static str,
    /// Whether the problem is fatal to the configuration
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
    /// Location in the source text, when known
    pub span: Option<Span>,
}

impl Diagnostic {
    /// Create an error diagnostic at a known location
    pub fn error(code: &'static str, message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            code,
            severity: Severity::Error,
            message: message.into(),
            span: Some(span),
        }
    }

    /// Create an error diagnostic with no location
    pub fn error_nospan(code: &'static str, message: impl Into<String>) -> Self {
        Diagnostic {
            code,
            severity: Severity::Error,
            message: message.into(),
            span: None,
        }
    }

    /// Create a warning diagnostic at a known location
    pub fn warning(code: &'static str, message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            code,
            severity: Severity::Warning,
            message: message.into(),
            span: Some(span),
        }
    }

    /// True if this diagnostic is fatal
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.span {
            Some(span) => write!(f, "{}: {} (at {})", self.code, self.message, span),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for Diagnostic {}

/// Error type aggregating one or more diagnostics.
#[derive(Error, Debug)]
pub enum SyntaxError {
    /// A single diagnostic
    #[error("{0}")]
    Diagnostic(Diagnostic),

    /// Multiple diagnostics
    #[error("{}", DiagnosticListFormat(.0))]
    Diagnostics(Vec<Diagnostic>),
}

struct DiagnosticListFormat<'a>(&'a [Diagnostic]);

impl fmt::Display for DiagnosticListFormat<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} problems found:", self.0.len())?;
        for (i, diag) in self.0.iter().enumerate() {
            write!(f, "\n  {}. {}", i + 1, diag)?;
        }
        Ok(())
    }
}

impl SyntaxError {
    /// Build a `SyntaxError` from collected diagnostics.
    ///
    /// Panics in debug builds if called with an empty vector; release builds
    /// produce a generic internal diagnostic instead.
    pub fn from_diagnostics(mut diags: Vec<Diagnostic>) -> Self {
        debug_assert!(!diags.is_empty(), "from_diagnostics called with no diagnostics");
        match diags.len() {
            0 => SyntaxError::Diagnostic(Diagnostic::error_nospan(
                codes::ERR_PARSE,
                "internal: empty diagnostic set",
            )),
            1 => SyntaxError::Diagnostic(diags.remove(0)),
            _ => SyntaxError::Diagnostics(diags),
        }
    }

    /// All diagnostics carried by this error
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            SyntaxError::Diagnostic(d) => std::slice::from_ref(d),
            SyntaxError::Diagnostics(ds) => ds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display_with_span() {
        let diag = Diagnostic::error(codes::ERR_PARSE, "unexpected token", Span::new(3, 14));
        assert_eq!(diag.to_string(), "ERR_SYNTAX_PARSE: unexpected token (at 3:14)");
    }

    #[test]
    fn test_diagnostic_display_without_span() {
        let diag = Diagnostic::error_nospan(codes::ERR_TYPE, "expected number");
        assert_eq!(diag.to_string(), "ERR_EVAL_TYPE: expected number");
    }

    #[test]
    fn test_from_diagnostics_single() {
        let err = SyntaxError::from_diagnostics(vec![Diagnostic::error_nospan(
            codes::ERR_UNDEFINED,
            "no such thing",
        )]);
        assert!(matches!(err, SyntaxError::Diagnostic(_)));
        assert_eq!(err.diagnostics().len(), 1);
    }

    #[test]
    fn test_from_diagnostics_multiple() {
        let err = SyntaxError::from_diagnostics(vec![
            Diagnostic::error_nospan(codes::ERR_UNDEFINED, "a"),
            Diagnostic::error_nospan(codes::ERR_TYPE, "b"),
        ]);
        assert!(matches!(err, SyntaxError::Diagnostics(_)));
        assert!(err.to_string().contains("2 problems found"));
    }

    #[test]
    fn test_warning_is_not_error() {
        let diag = Diagnostic::warning(codes::ERR_UNKNOWN_FIELD, "extra field", Span::new(1, 1));
        assert!(!diag.is_error());
    }
}
