//! Pooled storage for transaction records.

use std::collections::VecDeque;

use tracing::trace;

use super::context::{Transaction, TransactionId, TransactionSummary};
use super::error::{TransactionError, TransactionResult};
use super::options::CompilationOptions;

/// Cleared records kept around for reuse.
pub const DEFAULT_POOL_CAPACITY: usize = 8;

#[derive(Debug)]
struct Slot {
    generation: u32,
    live: bool,
    /// Present while live, and while parked on the free list.
    record: Option<Transaction>,
}

/// Allocator, recycler and owner of transaction records.
///
/// Handles are generational: releasing a record bumps its slot's
/// generation, so any handle still pointing at it becomes stale.
#[derive(Debug)]
pub struct TransactionPool {
    slots: Vec<Slot>,
    /// Slots holding a cleared record ready for reuse.
    free: VecDeque<u32>,
    /// Slots whose record was dropped because the free list was full.
    vacant: Vec<u32>,
    capacity: usize,
    allocated: usize,
}

impl Default for TransactionPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl TransactionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: VecDeque::with_capacity(capacity),
            vacant: Vec::new(),
            capacity,
            allocated: 0,
        }
    }

    /// Hand out a Collecting transaction stamped with `options`.
    pub fn take(&mut self, options: CompilationOptions) -> TransactionId {
        if let Some(index) = self.free.pop_front() {
            let slot = &mut self.slots[index as usize];
            let id = TransactionId::new(index, slot.generation);
            slot.live = true;
            match slot.record.as_mut() {
                Some(record) => record.reset(id, options),
                None => slot.record = Some(Transaction::new(id, options)),
            }
            trace!(tx = %id, "reused pooled transaction");
            return id;
        }

        self.allocated += 1;
        let index = match self.vacant.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    live: false,
                    record: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = TransactionId::new(index, slot.generation);
        slot.live = true;
        slot.record = Some(Transaction::new(id, options));
        trace!(tx = %id, "allocated transaction");
        id
    }

    /// Return a record and, recursively, its nested children to the pool.
    pub fn release(&mut self, id: TransactionId) -> TransactionResult<()> {
        let nested = self.get(id)?.nested().to_vec();
        for child in nested {
            // Children may already be gone if they were recycled on their own.
            if self.get(child).is_ok() {
                self.release(child)?;
            }
        }

        let keep = self.free.len() < self.capacity;
        let slot = &mut self.slots[id.index() as usize];
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        if keep {
            if let Some(record) = slot.record.as_mut() {
                record.clear();
            }
            self.free.push_back(id.index());
        } else {
            slot.record = None;
            self.vacant.push(id.index());
        }
        trace!(tx = %id, kept = keep, "released transaction");
        Ok(())
    }

    pub fn get(&self, id: TransactionId) -> TransactionResult<&Transaction> {
        match self.slots.get(id.index() as usize) {
            Some(Slot {
                generation,
                live: true,
                record: Some(record),
            }) if *generation == id.generation() => Ok(record),
            _ => Err(TransactionError::Stale(id)),
        }
    }

    pub fn get_mut(&mut self, id: TransactionId) -> TransactionResult<&mut Transaction> {
        match self.slots.get_mut(id.index() as usize) {
            Some(Slot {
                generation,
                live: true,
                record: Some(record),
            }) if *generation == id.generation() => Ok(record),
            _ => Err(TransactionError::Stale(id)),
        }
    }

    pub fn contains(&self, id: TransactionId) -> bool {
        self.get(id).is_ok()
    }

    /// Records ever freshly allocated (reuse does not count).
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Cleared records waiting on the free list.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Records currently handed out.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.live).count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Summary of `id` and everything nested inside it.
    pub fn summary(&self, id: TransactionId) -> TransactionResult<TransactionSummary> {
        let tx = self.get(id)?;
        let nested = tx
            .nested()
            .iter()
            .map(|child| self.summary(*child))
            .collect::<TransactionResult<Vec<_>>>()?;
        Ok(TransactionSummary::of(tx, nested))
    }

    /// Every live transaction below `id`, children before their parents,
    /// most recent child first.
    pub fn subtree_newest_first(&self, id: TransactionId) -> TransactionResult<Vec<TransactionId>> {
        let mut out = Vec::new();
        self.collect_subtree(id, &mut out)?;
        Ok(out)
    }

    fn collect_subtree(&self, id: TransactionId, out: &mut Vec<TransactionId>) -> TransactionResult<()> {
        let tx = self.get(id)?;
        for child in tx.nested().iter().rev() {
            self.collect_subtree(*child, out)?;
        }
        out.push(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::DeclId;
    use crate::transaction::{DeclGroup, DeclGroupKind, TransactionState};

    #[test]
    fn test_take_and_reuse() {
        let mut pool = TransactionPool::new(2);
        let a = pool.take(CompilationOptions::default());
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.live(), 1);
        pool.get_mut(a)
            .unwrap()
            .append_group(DeclGroup::single(DeclGroupKind::TopLevel, DeclId::from_raw(1)));

        pool.release(a).unwrap();
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.live(), 0);
        assert_eq!(pool.get(a).unwrap_err(), TransactionError::Stale(a));

        let b = pool.take(CompilationOptions::wrapped());
        assert_eq!(pool.allocated(), 1, "record should be reused");
        assert_eq!(b.index(), a.index());
        assert_ne!(b, a);
        let tx = pool.get(b).unwrap();
        assert!(tx.is_empty());
        assert_eq!(tx.state(), TransactionState::Collecting);
        assert!(tx.options().declaration_extraction);
    }

    #[test]
    fn test_release_is_recursive() {
        let mut pool = TransactionPool::default();
        let parent = pool.take(CompilationOptions::default());
        let child = pool.take(CompilationOptions::default());
        let grandchild = pool.take(CompilationOptions::default());
        pool.get_mut(child).unwrap().add_nested(grandchild);
        pool.get_mut(parent).unwrap().add_nested(child);

        assert_eq!(
            pool.subtree_newest_first(parent).unwrap(),
            vec![grandchild, child, parent]
        );
        pool.release(parent).unwrap();
        assert_eq!(pool.live(), 0);
        assert!(!pool.contains(child));
        assert!(!pool.contains(grandchild));
        assert!(pool.release(parent).unwrap_err().is_stale());
    }

    #[test]
    fn test_free_list_is_bounded() {
        let mut pool = TransactionPool::new(1);
        let ids: Vec<_> = (0..3).map(|_| pool.take(CompilationOptions::default())).collect();
        for id in &ids {
            pool.release(*id).unwrap();
        }
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.allocated(), 3);

        // One reuse from the free list, then fresh records in vacant slots.
        for _ in 0..3 {
            pool.take(CompilationOptions::default());
        }
        assert_eq!(pool.allocated(), 5);
        assert_eq!(pool.live(), 3);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_summary_includes_nested() {
        let mut pool = TransactionPool::default();
        let parent = pool.take(CompilationOptions::default());
        let child = pool.take(CompilationOptions::default());
        pool.get_mut(parent).unwrap().add_nested(child);
        let summary = pool.summary(parent).unwrap();
        assert_eq!(summary.nested.len(), 1);
        assert_eq!(summary.nested[0].id, child);
    }
}
