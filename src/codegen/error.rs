//! Code generation errors.

use thiserror::Error;

use super::ir::ModuleId;
use crate::sema::DeclId;

/// Result type for code generation.
pub type CodegenResult<T> = Result<T, CodegenError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// A symbol already defined by a live module.
    #[error("duplicate definition of symbol '{symbol}' (already emitted by {owner})")]
    DuplicateSymbol { symbol: String, owner: ModuleId },

    #[error("declaration {0} does not exist")]
    UnknownDecl(DeclId),

    /// A wrapper-scoped declaration reached code generation unextracted.
    #[error("'{0}' is still scoped to its wrapper")]
    Unextracted(String),

    #[error("'{0}' refers to a local of another function")]
    CapturedLocal(String),

    /// An unresolved name survived to code generation.
    #[error("unresolved name '{0}'")]
    Unresolved(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl CodegenError {
    /// Errors caused by the pipeline not having run the passes it needs.
    pub fn is_pipeline_gap(&self) -> bool {
        matches!(self, CodegenError::Unextracted(_) | CodegenError::Unresolved(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_gap() {
        assert!(CodegenError::Unresolved("y".into()).is_pipeline_gap());
        assert!(!CodegenError::DuplicateSymbol {
            symbol: "x".into(),
            owner: ModuleId::from_raw(2),
        }
        .is_pipeline_gap());
    }
}
