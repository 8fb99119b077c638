//! Observation hooks fired on transaction state changes.

use parking_lot::Mutex;

use crate::transaction::{Transaction, TransactionId, TransactionState};

/// Notified after a transaction is committed or unloaded.
///
/// Each hook fires exactly once per state change, after the state has
/// been updated and before the record is recycled.
pub trait TransactionObserver {
    fn transaction_committed(&self, _tx: &Transaction) {}

    fn transaction_unloaded(&self, _tx: &Transaction) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedEvent {
    Committed(TransactionId),
    Unloaded(TransactionId, TransactionState),
}

/// Observer that records every event it sees.
#[derive(Debug, Default)]
pub struct TransactionLog {
    events: Mutex<Vec<ObservedEvent>>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    pub fn committed(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ObservedEvent::Committed(_)))
            .count()
    }

    pub fn unloaded(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ObservedEvent::Unloaded(..)))
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TransactionObserver for TransactionLog {
    fn transaction_committed(&self, tx: &Transaction) {
        self.events.lock().push(ObservedEvent::Committed(tx.id()));
    }

    fn transaction_unloaded(&self, tx: &Transaction) {
        self.events
            .lock()
            .push(ObservedEvent::Unloaded(tx.id(), tx.state()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::CompilationOptions;

    #[test]
    fn test_log_records_in_order() {
        let log = TransactionLog::new();
        let mut tx = Transaction::new(TransactionId::new(0, 0), CompilationOptions::default());
        log.transaction_committed(&tx);
        tx.set_state(TransactionState::RolledBack);
        log.transaction_unloaded(&tx);
        assert_eq!(
            log.events(),
            vec![
                ObservedEvent::Committed(tx.id()),
                ObservedEvent::Unloaded(tx.id(), TransactionState::RolledBack),
            ]
        );
        assert_eq!(log.committed(), 1);
        assert_eq!(log.unloaded(), 1);
        log.clear();
        assert!(log.events().is_empty());
    }
}
