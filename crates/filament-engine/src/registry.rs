//! Transaction registry
//!
//! Tracks the current transaction per thread and the process-wide set of
//! live transactions. The thread-local slot holds a handle, not state;
//! snapshot and collector threads iterate the live set concurrently while
//! application threads start and complete transactions.

use dashmap::DashMap;
use filament_core::{Transaction, TransactionId};
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    // one engine instance per process; the slot is process-wide
    static CURRENT_TRANSACTION: RefCell<Option<Arc<Transaction>>> = const { RefCell::new(None) };
}

/// Live-transaction registry.
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    transactions: DashMap<TransactionId, Arc<Transaction>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The transaction the calling thread is currently inside, if any.
    pub fn current_transaction(&self) -> Option<Arc<Transaction>> {
        CURRENT_TRANSACTION.with(|current| current.borrow().clone())
    }

    /// Register a just-started transaction and make it current for the
    /// calling thread.
    pub fn add_transaction(&self, transaction: Arc<Transaction>) {
        CURRENT_TRANSACTION.with(|current| {
            *current.borrow_mut() = Some(Arc::clone(&transaction));
        });
        self.transactions.insert(transaction.id(), transaction);
    }

    /// Deregister a completed transaction and clear the calling thread's
    /// slot when it points at it.
    pub fn remove_transaction(&self, transaction: &Arc<Transaction>) {
        self.transactions.remove(&transaction.id());
        CURRENT_TRANSACTION.with(|current| {
            let mut slot = current.borrow_mut();
            if slot
                .as_ref()
                .is_some_and(|held| held.id() == transaction.id())
            {
                *slot = None;
            }
        });
    }

    /// All live transactions, for snapshotting.
    pub fn all_transactions(&self) -> Vec<Arc<Transaction>> {
        self.transactions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filament_core::{constant_message, SystemClock, TimerName, Transaction};

    fn transaction() -> Arc<Transaction> {
        Arc::new(Transaction::new(
            "Web",
            "GET /",
            constant_message("GET /"),
            TimerName::new("http request"),
            0,
            0,
            Arc::new(SystemClock::new()),
            None,
            None,
        ))
    }

    #[test]
    fn test_add_sets_current_and_live_set() {
        let registry = TransactionRegistry::new();
        assert!(registry.current_transaction().is_none());
        let txn = transaction();
        registry.add_transaction(Arc::clone(&txn));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.current_transaction().unwrap().id(), txn.id());
    }

    #[test]
    fn test_remove_clears_current() {
        let registry = TransactionRegistry::new();
        let txn = transaction();
        registry.add_transaction(Arc::clone(&txn));
        registry.remove_transaction(&txn);
        assert!(registry.is_empty());
        assert!(registry.current_transaction().is_none());
    }

    #[test]
    fn test_remove_other_transaction_keeps_current() {
        let registry = TransactionRegistry::new();
        let current = transaction();
        let other = transaction();
        registry.add_transaction(Arc::clone(&other));
        registry.add_transaction(Arc::clone(&current));
        registry.remove_transaction(&other);
        assert_eq!(registry.current_transaction().unwrap().id(), current.id());
    }

    #[test]
    fn test_current_is_per_thread() {
        let registry = Arc::new(TransactionRegistry::new());
        let txn = transaction();
        registry.add_transaction(Arc::clone(&txn));
        let registry_for_thread = Arc::clone(&registry);
        std::thread::spawn(move || {
            assert!(registry_for_thread.current_transaction().is_none());
            assert_eq!(registry_for_thread.len(), 1);
        })
        .join()
        .unwrap();
    }
}
