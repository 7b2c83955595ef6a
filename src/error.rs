//! # Error Module
//!
//! Unified error and diagnostic types for every stage of the LIA compiler
//! pipeline. Every error carries a numeric code (which doubles as the
//! process exit code) and, when it originates in source text, a byte
//! [`Span`] used to render the offending line with context.

use std::fmt;

use thiserror::Error;

// -----------------------------------------------------------------------------
// SPAN — Source Location
// -----------------------------------------------------------------------------

/// A half-open byte range `[start, end)` into the source file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// Creates a new span covering `start..end`.
    #[inline]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Zero-width span at `pos`.
    #[inline]
    pub fn point(pos: usize) -> Self {
        Self::new(pos, pos)
    }

    /// Smallest span covering both `self` and `other`.
    #[inline]
    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// Returns `true` if `other` lies entirely inside `self`.
    #[inline]
    pub fn contains(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Maps the start offset to a 0-based `(line, column)` pair.
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        line_col_at(source, self.start)
    }
}

fn line_col_at(source: &str, pos: usize) -> (usize, usize) {
    let pos = pos.min(source.len());
    let before = &source.as_bytes()[..pos];
    let line = memchr::memchr_iter(b'\n', before).count();
    let line_start = memchr::memrchr(b'\n', before).map_or(0, |i| i + 1);
    (line, pos - line_start)
}

// -----------------------------------------------------------------------------
// ERROR CODES — Fatal Diagnostics
// -----------------------------------------------------------------------------

/// Classification of every fatal condition. The discriminant is the exit
/// code reported by the `liac` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    None = 0,
    Unknown = 1,

    UnknownArgument = 2,
    UnaccessibleFile = 3,
    IlCompFailed = 4,
    IlasmNotFound = 5,

    /// Lexical error: a character no token starts with.
    Unintelligible = 6,
    InvalidToken = 7,
    EndOfFile = 8,
    SyntaxError = 9,
    MissingValue = 10,
    InvalidType = 11,
    TypeConflict = 12,
    UnknownVariable = 13,
    UnknownFunction = 14,
    UnimplementedClassMethod = 15,
    Redeclaration = 16,
}

impl ErrorCode {
    /// Numeric value, used as the process exit code.
    #[inline]
    pub fn value(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// -----------------------------------------------------------------------------
// WARNING CODES — Non-Fatal Diagnostics
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WarningCode {
    None = 0,
    Unknown = 1,
    MainNotDefined = 2,
    UselessCode = 3,
    UnreachableCode = 4,
    InvalidClassMethod = 5,
    InvalidArchitecture = 6,
}

impl WarningCode {
    #[inline]
    pub fn value(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for WarningCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// -----------------------------------------------------------------------------
// COMPILE ERROR — Unified Error Type
// -----------------------------------------------------------------------------

/// The unified error type for the entire compiler.
///
/// There is no error recovery: the first error ends the run, and its
/// `code` becomes the exit status.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code} [{}] : {message}", code.value())]
pub struct CompileError {
    pub code: ErrorCode,
    pub message: String,
    pub span: Option<Span>,
}

impl CompileError {
    /// Creates a new error with a source location.
    pub fn new(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            message: message.into(),
            span: Some(span),
        }
    }

    /// Creates a new error without source location information.
    pub fn no_span(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            span: None,
        }
    }

    /// Creates a lexer error at the given span.
    #[inline]
    pub fn lexer(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorCode::Unintelligible, message, span)
    }

    /// Creates a syntax error at the given span.
    #[inline]
    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorCode::SyntaxError, message, span)
    }
}

/// Convenience type alias for Results throughout the compiler.
pub type CompileResult<T> = std::result::Result<T, CompileError>;

// -----------------------------------------------------------------------------
// DIAGNOSTICS — Reported Through a Sink
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A rendered-on-demand report. The compiler produces these; only the
/// binary decides how they reach the terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: i32,
    /// Name of the error or warning code, e.g. `TypeConflict`.
    pub label: String,
    pub message: String,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn warning(code: WarningCode, message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.value(),
            label: code.to_string(),
            message: message.into(),
            span,
        }
    }

    /// Returns `true` if this diagnostic carries the given warning code.
    pub fn is_warning(&self, code: WarningCode) -> bool {
        self.severity == Severity::Warning && self.code == code.value()
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(err: &CompileError) -> Self {
        Self {
            severity: Severity::Error,
            code: err.code.value(),
            label: err.code.to_string(),
            message: err.message.clone(),
            span: err.span,
        }
    }
}

/// Receiver for non-fatal diagnostics raised during compilation.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

// -----------------------------------------------------------------------------
// RENDERING
// -----------------------------------------------------------------------------

/// Renders a diagnostic with one line of context before and after the
/// offending line and a caret row under the exact column range.
///
/// A span starting at end of input (premature EOF) highlights one column
/// past the last character of the final line.
pub fn format_diagnostic(diag: &Diagnostic, source: &str, path: &str) -> String {
    let mut out = String::new();

    if let Some(span) = diag.span {
        let lines: Vec<&str> = source.split('\n').collect();
        let (line, start_col) = line_col_at(source, span.start);
        let (end_line, end_col) = line_col_at(source, span.end);
        let text = lines.get(line).copied().unwrap_or("");

        // Multi-line spans are clamped to the first line.
        let end_col = if end_line == line { end_col } else { text.len() };
        let width = end_col.saturating_sub(start_col).max(1);

        let position = if width == 1 {
            format!("line {}:{}", line + 1, start_col + 1)
        } else {
            format!("line {}:{}-{}", line + 1, start_col + 1, start_col + width)
        };
        out.push_str(&format!("In file '{}' at {} :\n", path, position));

        let gutter = (line + 2).to_string().len();
        if line > 0 {
            out.push_str(&format!("{:>gutter$} | {}\n", line, lines[line - 1]));
        }
        out.push_str(&format!("{:>gutter$} > {}\n", line + 1, text));
        out.push_str(&format!(
            "{:>gutter$} | {}{}\n",
            "",
            " ".repeat(start_col),
            "^".repeat(width)
        ));
        if line + 1 < lines.len() {
            out.push_str(&format!("{:>gutter$} | {}\n", line + 2, lines[line + 1]));
        }
    }

    let kind = match diag.severity {
        Severity::Error => "Error",
        Severity::Warning => "Warning",
    };
    out.push_str(&format!(
        "{} {} [{}] : {}",
        kind, diag.label, diag.code, diag.message
    ));
    out
}

/// Convenience wrapper over [`format_diagnostic`] for fatal errors.
pub fn format_error(err: &CompileError, source: &str, path: &str) -> String {
    format_diagnostic(&Diagnostic::from(err), source, path)
}
