//! Interpreter error types.

use thiserror::Error;

use crate::codegen::CodegenError;
use crate::incremental::CompileError;
use crate::jit::ExecError;
use crate::sema::{Diagnostic, SemaError};
use crate::transaction::TransactionError;

/// Result type for interpreter operations.
pub type InterpreterResult<T> = Result<T, InterpreterError>;

/// Errors surfaced by the interpreter facade.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("code generation error: {0}")]
    Codegen(#[from] CodegenError),

    #[error("session image error: {0}")]
    Image(#[from] SemaError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl InterpreterError {
    /// The fragment was refused and rolled back; the session is unchanged.
    pub fn is_rejection(&self) -> bool {
        matches!(self, InterpreterError::Compile(e) if e.is_rejection())
    }

    /// The fragment compiled but failed while running.
    pub fn is_runtime(&self) -> bool {
        matches!(self, InterpreterError::Exec(_))
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            InterpreterError::Compile(e) => e.diagnostics(),
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err: InterpreterError = ExecError::DivisionByZero.into();
        assert!(err.is_runtime());
        assert!(!err.is_rejection());
        assert!(err.diagnostics().is_empty());
        assert_eq!(err.to_string(), "execution error: division by zero");

        let err: InterpreterError = TransactionError::NotEnoughTransactions {
            requested: 2,
            available: 0,
        }
        .into();
        assert!(!err.is_runtime());
        assert!(err.to_string().starts_with("transaction error"));
    }
}
