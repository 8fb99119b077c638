//! Transaction lifecycle states and diagnostic severity.
//!
//! A transaction moves through:
//! - Collecting: the analyzer is appending declaration groups
//! - Completed: collection is over and the pipeline has run
//! - Committed: code was generated and handed to the executor
//! - RolledBack / RolledBackWithErrors: its effects were reverted

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sema::Severity;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransactionState {
    /// Accepting declaration groups from the analyzer.
    #[default]
    Collecting,

    /// Closed to the analyzer; transformed and waiting for commit.
    Completed,

    /// Effects are live.
    Committed,

    /// Effects were fully reverted.
    RolledBack,

    /// Reverting left something behind.
    RolledBackWithErrors,
}

impl TransactionState {
    /// Check if this state is at or past Completed.
    pub fn is_completed(&self) -> bool {
        !matches!(self, TransactionState::Collecting)
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(
            self,
            TransactionState::RolledBack | TransactionState::RolledBackWithErrors
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Collecting => write!(f, "collecting"),
            TransactionState::Completed => write!(f, "completed"),
            TransactionState::Committed => write!(f, "committed"),
            TransactionState::RolledBack => write!(f, "rolled back"),
            TransactionState::RolledBackWithErrors => write!(f, "rolled back with errors"),
        }
    }
}

impl std::str::FromStr for TransactionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], " ").as_str() {
            "collecting" => Ok(TransactionState::Collecting),
            "completed" => Ok(TransactionState::Completed),
            "committed" => Ok(TransactionState::Committed),
            "rolled back" | "rolledback" => Ok(TransactionState::RolledBack),
            "rolled back with errors" => Ok(TransactionState::RolledBackWithErrors),
            _ => Err(format!("unknown transaction state: {}", s)),
        }
    }
}

/// Worst diagnostic severity observed while processing a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum IssuedDiags {
    #[default]
    None,
    Warnings,
    Errors,
}

impl IssuedDiags {
    /// Keep the worse of the two.
    pub fn merge(self, other: IssuedDiags) -> IssuedDiags {
        self.max(other)
    }

    pub fn has_errors(&self) -> bool {
        matches!(self, IssuedDiags::Errors)
    }
}

impl From<Option<Severity>> for IssuedDiags {
    fn from(worst: Option<Severity>) -> Self {
        match worst {
            Some(Severity::Error) => IssuedDiags::Errors,
            Some(Severity::Warning) => IssuedDiags::Warnings,
            Some(Severity::Note) | None => IssuedDiags::None,
        }
    }
}

impl fmt::Display for IssuedDiags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssuedDiags::None => write!(f, "none"),
            IssuedDiags::Warnings => write!(f, "warnings"),
            IssuedDiags::Errors => write!(f, "errors"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        assert_eq!(TransactionState::default(), TransactionState::Collecting);
        assert!(!TransactionState::Collecting.is_completed());
        assert!(TransactionState::Committed.is_completed());
        assert!(TransactionState::RolledBackWithErrors.is_rolled_back());
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(
            "rolled_back_with_errors".parse::<TransactionState>().unwrap(),
            TransactionState::RolledBackWithErrors
        );
        assert_eq!(
            "Committed".parse::<TransactionState>().unwrap(),
            TransactionState::Committed
        );
        assert!("pending".parse::<TransactionState>().is_err());
    }

    #[test]
    fn test_issued_diags_merge() {
        assert_eq!(IssuedDiags::None.merge(IssuedDiags::Warnings), IssuedDiags::Warnings);
        assert_eq!(IssuedDiags::Errors.merge(IssuedDiags::Warnings), IssuedDiags::Errors);
        assert_eq!(IssuedDiags::from(Some(Severity::Note)), IssuedDiags::None);
        assert!(IssuedDiags::from(Some(Severity::Error)).has_errors());
    }
}
