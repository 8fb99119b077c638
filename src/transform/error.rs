//! Transformer errors.

use thiserror::Error;

use crate::ast::Span;
use crate::sema::DeclId;

/// Result type for transformer passes.
pub type TransformResult<T> = Result<T, TransformError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// A name left unresolved while dynamic scoping is off.
    #[error("use of undeclared identifier '{name}' (dynamic scoping is disabled)")]
    DynamicScopingDisabled { name: String, span: Span },

    /// Run-time lookup is only supported in the statements of a fragment.
    #[error("'{name}' cannot be resolved at run time inside '{owner}'")]
    UnresolvedOutsideWrapper { name: String, owner: String, span: Span },

    #[error("declaration {0} does not exist")]
    UnknownDecl(DeclId),

    #[error("{0}")]
    Invalid(String),
}

impl TransformError {
    pub fn span(&self) -> Option<Span> {
        match self {
            TransformError::DynamicScopingDisabled { span, .. }
            | TransformError::UnresolvedOutsideWrapper { span, .. } => Some(*span),
            _ => None,
        }
    }

    /// The unresolved name behind a lookup failure, if that is what failed.
    pub fn unresolved_name(&self) -> Option<&str> {
        match self {
            TransformError::DynamicScopingDisabled { name, .. }
            | TransformError::UnresolvedOutsideWrapper { name, .. } => Some(name),
            _ => None,
        }
    }
}
