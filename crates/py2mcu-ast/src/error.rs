//! Diagnostics shared by every compiler stage.

use alloc::format;
use alloc::string::{String, ToString};
use core::fmt;

use crate::Span;

/// Category of a compile failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Source text is not well-formed.
    ParseError,
    /// A parameter, return type or first assignment lacks a type.
    MissingAnnotation,
    /// A container annotation has no literal initializer to size it.
    UnresolvedArrayLength,
    /// A name does not resolve in any enclosing scope.
    UndefinedSymbol,
    /// A docstring carries the embedded-code marker more than once.
    DuplicateEmbeddedBlock,
    /// A tagged macro's value is not a constant expression over literals.
    UnresolvedMacroExpression,
    /// A stack-allocated function needs storage that is not fixed at compile time.
    StackAllocationViolation,
    /// The requested target is not recognized.
    UnknownTarget,
    /// A value's type does not fit where it is used.
    TypeMismatch,
    /// The construct has no translation rule.
    UnsupportedConstruct,
    /// A compile option has an invalid value.
    InvalidOption,
    /// Reading the input failed.
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ParseError => "ParseError",
            ErrorKind::MissingAnnotation => "MissingAnnotation",
            ErrorKind::UnresolvedArrayLength => "UnresolvedArrayLength",
            ErrorKind::UndefinedSymbol => "UndefinedSymbol",
            ErrorKind::DuplicateEmbeddedBlock => "DuplicateEmbeddedBlock",
            ErrorKind::UnresolvedMacroExpression => "UnresolvedMacroExpression",
            ErrorKind::StackAllocationViolation => "StackAllocationViolation",
            ErrorKind::UnknownTarget => "UnknownTarget",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::UnsupportedConstruct => "UnsupportedConstruct",
            ErrorKind::InvalidOption => "InvalidOption",
            ErrorKind::Io => "Io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compile failure: what went wrong and, when known, where.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{kind}{}: {message}", location_suffix(.location))]
pub struct CompileError {
    pub kind: ErrorKind,
    pub location: Option<Span>,
    pub message: String,
}

fn location_suffix(location: &Option<Span>) -> String {
    match location {
        Some(span) => format!(" at {}", span),
        None => String::new(),
    }
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            location: None,
            message: message.to_string(),
        }
    }

    /// Attach a source location.
    pub fn at(mut self, span: Span) -> Self {
        self.location = Some(span);
        self
    }

    /// Attach a location unless one is already present.
    pub fn or_at(mut self, span: Span) -> Self {
        if self.location.is_none() {
            self.location = Some(span);
        }
        self
    }

    pub fn parse(message: &str, span: Span) -> Self {
        Self::new(ErrorKind::ParseError, message).at(span)
    }

    pub fn unsupported(message: &str, span: Span) -> Self {
        Self::new(ErrorKind::UnsupportedConstruct, message).at(span)
    }

    pub fn mismatch(message: &str, span: Span) -> Self {
        Self::new(ErrorKind::TypeMismatch, message).at(span)
    }
}

/// Result alias used across the compiler crates.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let err = CompileError::new(ErrorKind::MissingAnnotation, "parameter `x` has no annotation")
            .at(Span::new(10, 2, 7));
        assert_eq!(
            err.to_string(),
            "MissingAnnotation at 2:7: parameter `x` has no annotation"
        );
    }

    #[test]
    fn test_display_without_location() {
        let err = CompileError::new(ErrorKind::UnknownTarget, "unknown target `avr`");
        assert_eq!(err.to_string(), "UnknownTarget: unknown target `avr`");
    }

    #[test]
    fn test_or_at_keeps_first_location() {
        let err = CompileError::new(ErrorKind::TypeMismatch, "x")
            .at(Span::new(0, 1, 1))
            .or_at(Span::new(5, 3, 2));
        assert_eq!(err.location, Some(Span::new(0, 1, 1)));
    }
}
