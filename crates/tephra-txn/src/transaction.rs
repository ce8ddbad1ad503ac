//! Transactions and the transaction manager.

use crate::lock_manager::LockManager;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tephra_common::types::{RecordId, TableOid, TxnId};
use tephra_common::Result;

/// Transaction isolation levels (strict two-phase locking variants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction lifecycle states.
///
/// State advances monotonically: Growing, then Shrinking after the
/// first 2PL-relevant unlock, then Committed or Aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Locks currently held by a transaction, one set per mode and
/// granularity.
#[derive(Debug, Default)]
pub struct LockSets {
    pub intention_shared_tables: HashSet<TableOid>,
    pub intention_exclusive_tables: HashSet<TableOid>,
    pub shared_tables: HashSet<TableOid>,
    pub shared_intention_exclusive_tables: HashSet<TableOid>,
    pub exclusive_tables: HashSet<TableOid>,
    pub shared_rows: HashMap<TableOid, HashSet<RecordId>>,
    pub exclusive_rows: HashMap<TableOid, HashSet<RecordId>>,
}

impl LockSets {
    /// Returns true if any row lock on the given table is held.
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        self.shared_rows.get(&oid).is_some_and(|s| !s.is_empty())
            || self.exclusive_rows.get(&oid).is_some_and(|s| !s.is_empty())
    }
}

/// An active database transaction.
///
/// Shared as `Arc<Transaction>` between the session, the lock manager,
/// and the deadlock detector; all mutable state sits behind locks.
pub struct Transaction {
    /// Transaction id; larger ids are younger transactions.
    id: TxnId,
    /// Isolation level fixed at begin.
    isolation_level: IsolationLevel,
    /// Current lifecycle state.
    state: Mutex<TransactionState>,
    /// Held locks, maintained by the lock manager.
    lock_sets: Mutex<LockSets>,
}

impl Transaction {
    /// Creates a transaction in the growing state.
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            lock_sets: Mutex::new(LockSets::default()),
        }
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the isolation level.
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Sets the state.
    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Locks and returns the held-lock bookkeeping.
    pub fn lock_sets(&self) -> MutexGuard<'_, LockSets> {
        self.lock_sets.lock()
    }

    /// Returns the table lock mode held on `oid`, if any.
    pub fn table_lock_mode(&self, oid: TableOid) -> Option<crate::lock_manager::LockMode> {
        use crate::lock_manager::LockMode;
        let sets = self.lock_sets.lock();
        if sets.intention_shared_tables.contains(&oid) {
            Some(LockMode::IntentionShared)
        } else if sets.intention_exclusive_tables.contains(&oid) {
            Some(LockMode::IntentionExclusive)
        } else if sets.shared_tables.contains(&oid) {
            Some(LockMode::Shared)
        } else if sets.shared_intention_exclusive_tables.contains(&oid) {
            Some(LockMode::SharedIntentionExclusive)
        } else if sets.exclusive_tables.contains(&oid) {
            Some(LockMode::Exclusive)
        } else {
            None
        }
    }

    /// Returns the row lock mode held on (oid, rid), if any.
    pub fn row_lock_mode(
        &self,
        oid: TableOid,
        rid: RecordId,
    ) -> Option<crate::lock_manager::LockMode> {
        use crate::lock_manager::LockMode;
        let sets = self.lock_sets.lock();
        if sets.shared_rows.get(&oid).is_some_and(|s| s.contains(&rid)) {
            Some(LockMode::Shared)
        } else if sets
            .exclusive_rows
            .get(&oid)
            .is_some_and(|s| s.contains(&rid))
        {
            Some(LockMode::Exclusive)
        } else {
            None
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("isolation_level", &self.isolation_level)
            .field("state", &self.state())
            .finish()
    }
}

/// Creates, tracks, and finishes transactions.
pub struct TransactionManager {
    /// Next transaction id to hand out.
    next_txn_id: AtomicU64,
    /// Live and finished transactions by id.
    txns: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    /// Creates an empty transaction manager.
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(0),
            txns: Mutex::new(HashMap::new()),
        }
    }

    /// Begins a new transaction at the given isolation level.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let id = TxnId(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        let txn = Arc::new(Transaction::new(id, isolation_level));
        self.txns.lock().insert(id, txn.clone());
        txn
    }

    /// Looks up a transaction by id.
    pub fn get(&self, id: TxnId) -> Option<Arc<Transaction>> {
        self.txns.lock().get(&id).cloned()
    }

    /// Commits a transaction, releasing every lock it holds.
    pub fn commit(&self, lock_manager: &LockManager, txn: &Transaction) -> Result<()> {
        lock_manager.release_all(txn);
        txn.set_state(TransactionState::Committed);
        Ok(())
    }

    /// Aborts a transaction, releasing every lock it holds.
    pub fn abort(&self, lock_manager: &LockManager, txn: &Transaction) {
        lock_manager.release_all(txn);
        txn.set_state(TransactionState::Aborted);
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
