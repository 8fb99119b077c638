//! Semantic analysis errors.

use std::path::PathBuf;

use thiserror::Error;

use super::diagnostics::Diagnostic;
use crate::ast::{ParseError, Span};

/// Result type for semantic analysis.
pub type SemaResult<T> = Result<T, SemaError>;

/// Errors raised while checking a fragment.
///
/// These never escape [`super::Analyzer::parse`]; they are converted into
/// diagnostics and the fragment is reported as failed.
#[derive(Debug, Error)]
pub enum SemaError {
    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("use of undeclared identifier '{name}'")]
    Undeclared { name: String, span: Span },

    #[error("redefinition of '{name}'")]
    Redefinition { name: String, span: Span },

    #[error("unknown type '{name}'")]
    UnknownType { name: String, span: Span },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("'{name}' expects {expected} argument(s), {found} given")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
        span: Span,
    },

    #[error("'{name}' is not {what}")]
    WrongKind {
        name: String,
        what: &'static str,
        span: Span,
    },

    #[error("cannot assign to constant '{name}'")]
    AssignToConst { name: String, span: Span },

    #[error("statement at top level requires declaration extraction")]
    TopLevelStatement { span: Span },

    #[error("{0}")]
    Invalid(String, Span),

    #[error("cannot read session image {path}: {source}")]
    ImageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed session image: {0}")]
    ImageFormat(#[from] serde_json::Error),
}

impl SemaError {
    pub fn invalid(message: impl Into<String>, span: Span) -> Self {
        SemaError::Invalid(message.into(), span)
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            SemaError::Parse(e) => e.span(),
            SemaError::Undeclared { span, .. }
            | SemaError::Redefinition { span, .. }
            | SemaError::UnknownType { span, .. }
            | SemaError::TypeMismatch { span, .. }
            | SemaError::Arity { span, .. }
            | SemaError::WrongKind { span, .. }
            | SemaError::AssignToConst { span, .. }
            | SemaError::TopLevelStatement { span }
            | SemaError::Invalid(_, span) => Some(*span),
            SemaError::ImageIo { .. } | SemaError::ImageFormat(_) => None,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.to_string(), self.span())
    }
}
