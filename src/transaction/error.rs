//! Transaction error types.

use thiserror::Error;

use super::context::TransactionId;
use super::state::TransactionState;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors raised when a transaction is used outside its lifecycle.
///
/// All of these indicate a caller bug; the engine refuses the operation
/// and leaves every transaction as it was.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    /// The handle refers to a record that was released.
    #[error("transaction {0} is stale")]
    Stale(TransactionId),

    #[error("transaction {id} is not collecting (state: {state})")]
    NotCollecting {
        id: TransactionId,
        state: TransactionState,
    },

    #[error("transaction {id} is not completed (state: {state})")]
    NotCompleted {
        id: TransactionId,
        state: TransactionState,
    },

    /// Only the innermost open transaction may be ended.
    #[error("transaction {id} is not the current transaction")]
    NotCurrent { id: TransactionId },

    /// A child was still open when its parent tried to move on.
    #[error("transaction {id} has nested transaction {child} that is not completed")]
    NestedNotCompleted {
        id: TransactionId,
        child: TransactionId,
    },

    /// Rollback must go newest first.
    #[error("cannot roll back {id}: {newest} was committed after it")]
    RollbackOutOfOrder {
        id: TransactionId,
        newest: TransactionId,
    },

    #[error("cannot roll back nested transaction {id}: its parent is already committed")]
    ParentCommitted { id: TransactionId },

    /// Asked to unload more transactions than are committed.
    #[error("cannot unload {requested} transaction(s), only {available} committed")]
    NotEnoughTransactions { requested: usize, available: usize },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl TransactionError {
    pub fn is_stale(&self) -> bool {
        matches!(self, TransactionError::Stale(_))
    }

    /// Check if this error is an ordering violation rather than a bad handle.
    pub fn is_ordering_violation(&self) -> bool {
        matches!(
            self,
            TransactionError::NotCurrent { .. }
                | TransactionError::NestedNotCompleted { .. }
                | TransactionError::RollbackOutOfOrder { .. }
                | TransactionError::ParentCommitted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let id = TransactionId::new(3, 1);
        assert!(TransactionError::Stale(id).is_stale());
        let out_of_order = TransactionError::RollbackOutOfOrder {
            id,
            newest: TransactionId::new(4, 0),
        };
        assert!(out_of_order.is_ordering_violation());
        assert_eq!(
            out_of_order.to_string(),
            "cannot roll back tx3.1: tx4.0 was committed after it"
        );
        assert!(!TransactionError::InvalidOperation("x".into()).is_ordering_violation());
    }
}
