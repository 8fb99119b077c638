//! Execution errors.

use thiserror::Error;

use crate::codegen::ModuleId;

/// Result type for execution.
pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("unresolved symbol '{0}'")]
    UnresolvedSymbol(String),

    #[error("symbol '{symbol}' is already defined by {owner}")]
    DuplicateSymbol { symbol: String, owner: ModuleId },

    #[error("type error: expected {expected}, found {found}")]
    TypeError {
        expected: &'static str,
        found: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("call depth limit of {0} exceeded")]
    StackOverflow(usize),

    #[error("function '{0}' finished without returning a value")]
    MissingReturn(String),

    #[error("{0} is not loaded")]
    UnknownModule(ModuleId),

    #[error("'{0}' is not a function")]
    NotAFunction(String),

    #[error("'{name}' expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },
}

impl ExecError {
    /// A name that nothing loaded defines, typically a forward
    /// declaration that was never given a body.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, ExecError::UnresolvedSymbol(_))
    }
}
