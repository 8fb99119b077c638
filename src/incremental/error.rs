//! Orchestrator errors.

use std::fmt;

use thiserror::Error;

use crate::codegen::CodegenError;
use crate::jit::ExecError;
use crate::sema::Diagnostic;
use crate::transaction::TransactionError;

/// Result type for orchestrator entry points.
pub type CompileResult<T> = Result<T, CompileError>;

/// Where a rejected fragment failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureStage {
    Analysis,
    Transform,
    Instantiation,
    CodeGeneration,
    StaticInitialization,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureStage::Analysis => "analysis",
            FailureStage::Transform => "transformation",
            FailureStage::Instantiation => "instantiation",
            FailureStage::CodeGeneration => "code generation",
            FailureStage::StaticInitialization => "static initialization",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    /// The engine was driven outside the transaction lifecycle.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// The fragment was rolled back; session state is as it was before.
    #[error(
        "fragment rejected during {stage}{}",
        .diagnostics.iter().find(|d| d.severity == crate::sema::Severity::Error).map(|d| format!(": {}", d.message)).unwrap_or_default()
    )]
    Rejected {
        stage: FailureStage,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("code generation error: {0}")]
    Codegen(#[from] CodegenError),

    #[error("execution error: {0}")]
    Exec(#[from] ExecError),
}

impl CompileError {
    /// The fragment itself was at fault, as opposed to a misuse of the API.
    pub fn is_rejection(&self) -> bool {
        matches!(self, CompileError::Rejected { .. })
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileError::Rejected { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }

    pub(crate) fn stage(&self) -> FailureStage {
        match self {
            CompileError::Rejected { stage, .. } => *stage,
            CompileError::Codegen(_) => FailureStage::CodeGeneration,
            CompileError::Exec(_) => FailureStage::StaticInitialization,
            CompileError::Transaction(_) => FailureStage::Analysis,
        }
    }
}
