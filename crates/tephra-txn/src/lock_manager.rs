//! Table- and row-granularity lock manager with strict two-phase
//! locking, multi-granularity modes, and background deadlock detection.
//!
//! Each resource (a table, or a row keyed by table and record id) owns
//! a FIFO request queue with a condition variable. A request is granted
//! when no other transaction is mid-upgrade on the resource, every
//! already-granted request is compatible with it, and no earlier-queued
//! incompatible request is still waiting — compatible requests at the
//! head of the queue are granted concurrently in a batch, while an
//! in-flight upgrade overtakes ordinary waiters. Protocol violations
//! transition the
//! transaction to Aborted and surface as typed errors; a waiter whose
//! transaction is aborted by the deadlock detector withdraws its
//! request and returns false.

use crate::deadlock::WaitsForGraph;
use crate::transaction::{IsolationLevel, Transaction, TransactionManager, TransactionState};
use log::warn;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tephra_common::config::LockManagerConfig;
use tephra_common::types::{AbortReason, RecordId, TableOid, TxnId};
use tephra_common::{Result, TephraError};

/// Lock modes, coarsest-intent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

/// Compatibility matrix indexed by [held][requested].
const COMPATIBLE: [[bool; 5]; 5] = [
    // held IS        IX     S      SIX    X
    [true, true, true, true, false],  // IS
    [true, true, false, false, false], // IX
    [true, false, true, false, false], // S
    [true, false, false, false, false], // SIX
    [false, false, false, false, false], // X
];

/// Allowed upgrades indexed by [held][requested].
const UPGRADABLE: [[bool; 5]; 5] = [
    [false, true, true, true, true],   // IS -> IX, S, SIX, X
    [false, false, false, true, true], // IX -> SIX, X
    [false, false, false, true, true], // S  -> SIX, X
    [false, false, false, false, true], // SIX -> X
    [false, false, false, false, false], // X
];

impl LockMode {
    fn index(self) -> usize {
        match self {
            LockMode::IntentionShared => 0,
            LockMode::IntentionExclusive => 1,
            LockMode::Shared => 2,
            LockMode::SharedIntentionExclusive => 3,
            LockMode::Exclusive => 4,
        }
    }

    /// Returns true if a held lock and a requested lock may coexist.
    pub fn compatible(held: LockMode, requested: LockMode) -> bool {
        COMPATIBLE[held.index()][requested.index()]
    }

    /// Returns true if `held` may be upgraded to `requested`.
    pub fn upgradable(held: LockMode, requested: LockMode) -> bool {
        UPGRADABLE[held.index()][requested.index()]
    }

    /// Returns true for the shared-flavored modes forbidden under
    /// read-uncommitted.
    fn is_shared_flavor(self) -> bool {
        matches!(
            self,
            LockMode::Shared | LockMode::IntentionShared | LockMode::SharedIntentionExclusive
        )
    }
}

/// The resource a lock request names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LockResource {
    Table(TableOid),
    Row(TableOid, RecordId),
}

/// A single lock request in a resource queue.
#[derive(Debug, Clone)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

struct QueueInner {
    /// Requests in arrival order; granted ones may appear anywhere.
    requests: Vec<LockRequest>,
    /// Transaction currently upgrading its lock, if any. An upgrader
    /// blocks all other grants until it is granted.
    upgrading: Option<TxnId>,
}

/// Per-resource request queue.
struct LockRequestQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                requests: Vec::new(),
                upgrading: None,
            }),
            cv: Condvar::new(),
        }
    }
}

impl QueueInner {
    /// A request can be granted when the upgrade slot is empty or its
    /// own, every granted request is compatible, and FIFO order is
    /// honoured: only a batch of mutually compatible requests at the
    /// head of the waiting line is granted together, so an earlier
    /// incompatible waiter blocks everything queued behind it. An
    /// in-flight upgrade overtakes ordinary waiters.
    fn can_grant(&self, txn_id: TxnId, mode: LockMode) -> bool {
        if self.upgrading.is_some() && self.upgrading != Some(txn_id) {
            return false;
        }
        if !self
            .requests
            .iter()
            .all(|r| !r.granted || LockMode::compatible(r.mode, mode))
        {
            return false;
        }
        if self.upgrading == Some(txn_id) {
            return true;
        }
        for r in self.requests.iter().filter(|r| !r.granted) {
            if r.txn_id == txn_id {
                return true;
            }
            if !LockMode::compatible(r.mode, mode) {
                return false;
            }
        }
        false
    }

    /// Modes currently granted on this resource.
    fn granted_modes(&self) -> Vec<(TxnId, LockMode)> {
        self.requests
            .iter()
            .filter(|r| r.granted)
            .map(|r| (r.txn_id, r.mode))
            .collect()
    }
}

/// Multi-granularity lock manager.
pub struct LockManager {
    table_queues: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_queues: Mutex<HashMap<(TableOid, RecordId), Arc<LockRequestQueue>>>,
    waits_for: Mutex<WaitsForGraph>,
    config: LockManagerConfig,
    detector_running: Arc<AtomicBool>,
    detector_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl LockManager {
    /// Creates a lock manager. Deadlock detection starts separately via
    /// [`LockManager::start_deadlock_detection`].
    pub fn new(config: LockManagerConfig) -> Self {
        Self {
            table_queues: Mutex::new(HashMap::new()),
            row_queues: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(WaitsForGraph::new()),
            config,
            detector_running: Arc::new(AtomicBool::new(false)),
            detector_handle: Mutex::new(None),
        }
    }

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        self.table_queues
            .lock()
            .entry(oid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    fn row_queue(&self, oid: TableOid, rid: RecordId) -> Arc<LockRequestQueue> {
        self.row_queues
            .lock()
            .entry((oid, rid))
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    /// Marks the transaction aborted and builds the typed error.
    fn abort_txn(&self, txn: &Transaction, reason: AbortReason) -> TephraError {
        txn.set_state(TransactionState::Aborted);
        TephraError::TransactionAborted {
            txn_id: txn.id(),
            reason,
        }
    }

    /// Validates that the transaction may acquire a table lock in this
    /// mode given its isolation level and 2PL phase.
    fn check_table_acquire(&self, txn: &Transaction, mode: LockMode) -> Result<()> {
        let state = txn.state();
        if state == TransactionState::Committed || state == TransactionState::Aborted {
            return Err(self.abort_txn(txn, AbortReason::LockOnAnotherPhase));
        }
        match txn.isolation_level() {
            IsolationLevel::ReadUncommitted => {
                if state == TransactionState::Shrinking {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
                if mode.is_shared_flavor() {
                    return Err(
                        self.abort_txn(txn, AbortReason::LockSharedOnReadUncommitted)
                    );
                }
            }
            IsolationLevel::ReadCommitted => {
                if state == TransactionState::Shrinking
                    && !matches!(mode, LockMode::IntentionShared | LockMode::Shared)
                {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::RepeatableRead => {
                if state == TransactionState::Shrinking {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    /// Validates that the transaction may acquire a row lock in this
    /// mode, including the required table lock.
    fn check_row_acquire(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<()> {
        if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return Err(self.abort_txn(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        let state = txn.state();
        if state == TransactionState::Committed || state == TransactionState::Aborted {
            return Err(self.abort_txn(txn, AbortReason::LockOnAnotherPhase));
        }

        let shrinking_shared_ok = txn.isolation_level() == IsolationLevel::ReadCommitted
            && mode == LockMode::Shared;
        if state == TransactionState::Shrinking && !shrinking_shared_ok {
            return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted && mode == LockMode::Shared {
            return Err(self.abort_txn(txn, AbortReason::LockSharedOnReadUncommitted));
        }

        // Multilevel requirement: S needs any table lock; X needs X,
        // IX, or SIX on the table.
        let table_mode = txn.table_lock_mode(oid);
        let satisfied = match mode {
            LockMode::Shared => table_mode.is_some(),
            LockMode::Exclusive => matches!(
                table_mode,
                Some(LockMode::Exclusive)
                    | Some(LockMode::IntentionExclusive)
                    | Some(LockMode::SharedIntentionExclusive)
            ),
            _ => unreachable!("row modes are S or X"),
        };
        if !satisfied {
            return Err(self.abort_txn(txn, AbortReason::TableLockNotPresent));
        }
        Ok(())
    }

    /// Handles reacquisition and upgrade bookkeeping before queueing.
    ///
    /// Returns true if the lock is already held in the requested mode
    /// (the acquire is a no-op). On a legal upgrade the old grant is
    /// dropped from the queue and the lock sets, and the queue's
    /// upgrade slot is claimed.
    fn prepare_upgrade(
        &self,
        txn: &Transaction,
        held: Option<LockMode>,
        mode: LockMode,
        resource: LockResource,
        inner: &mut QueueInner,
    ) -> Result<bool> {
        let Some(held) = held else {
            return Ok(false);
        };
        if held == mode {
            return Ok(true);
        }
        if !LockMode::upgradable(held, mode) {
            return Err(self.abort_txn(txn, AbortReason::IncompatibleUpgrade));
        }
        if inner.upgrading.is_some() {
            return Err(self.abort_txn(txn, AbortReason::UpgradeConflict));
        }
        inner.upgrading = Some(txn.id());
        inner
            .requests
            .retain(|r| !(r.txn_id == txn.id() && r.granted));
        self.remove_from_lock_sets(txn, held, resource);
        Ok(false)
    }

    fn add_to_lock_sets(&self, txn: &Transaction, mode: LockMode, resource: LockResource) {
        let mut sets = txn.lock_sets();
        match resource {
            LockResource::Table(oid) => {
                let set = match mode {
                    LockMode::IntentionShared => &mut sets.intention_shared_tables,
                    LockMode::IntentionExclusive => &mut sets.intention_exclusive_tables,
                    LockMode::Shared => &mut sets.shared_tables,
                    LockMode::SharedIntentionExclusive => {
                        &mut sets.shared_intention_exclusive_tables
                    }
                    LockMode::Exclusive => &mut sets.exclusive_tables,
                };
                set.insert(oid);
            }
            LockResource::Row(oid, rid) => {
                let map = match mode {
                    LockMode::Shared => &mut sets.shared_rows,
                    LockMode::Exclusive => &mut sets.exclusive_rows,
                    _ => unreachable!("row modes are S or X"),
                };
                map.entry(oid).or_default().insert(rid);
            }
        }
    }

    fn remove_from_lock_sets(&self, txn: &Transaction, mode: LockMode, resource: LockResource) {
        let mut sets = txn.lock_sets();
        match resource {
            LockResource::Table(oid) => {
                let set = match mode {
                    LockMode::IntentionShared => &mut sets.intention_shared_tables,
                    LockMode::IntentionExclusive => &mut sets.intention_exclusive_tables,
                    LockMode::Shared => &mut sets.shared_tables,
                    LockMode::SharedIntentionExclusive => {
                        &mut sets.shared_intention_exclusive_tables
                    }
                    LockMode::Exclusive => &mut sets.exclusive_tables,
                };
                set.remove(&oid);
            }
            LockResource::Row(oid, rid) => {
                let map = match mode {
                    LockMode::Shared => &mut sets.shared_rows,
                    LockMode::Exclusive => &mut sets.exclusive_rows,
                    _ => unreachable!("row modes are S or X"),
                };
                if let Some(set) = map.get_mut(&oid) {
                    set.remove(&rid);
                }
            }
        }
    }

    /// Queues a request and blocks until it is granted or the
    /// transaction is aborted. Returns false when aborted mid-wait.
    fn wait_for_grant(
        &self,
        txn: &Transaction,
        mode: LockMode,
        resource: LockResource,
        queue: &LockRequestQueue,
        mut inner: parking_lot::MutexGuard<'_, QueueInner>,
    ) -> Result<bool> {
        inner.requests.push(LockRequest {
            txn_id: txn.id(),
            mode,
            granted: false,
        });

        loop {
            if inner.can_grant(txn.id(), mode) {
                let req = inner
                    .requests
                    .iter_mut()
                    .find(|r| r.txn_id == txn.id() && !r.granted)
                    .expect("queued request present");
                req.granted = true;
                if inner.upgrading == Some(txn.id()) {
                    inner.upgrading = None;
                }
                self.add_to_lock_sets(txn, mode, resource);
                return Ok(true);
            }

            queue.cv.wait(&mut inner);

            if txn.state() == TransactionState::Aborted {
                // Withdraw the request and let others reconsider.
                let id = txn.id();
                inner.requests.retain(|r| !(r.txn_id == id && !r.granted));
                if inner.upgrading == Some(id) {
                    inner.upgrading = None;
                }
                queue.cv.notify_all();
                return Ok(false);
            }
        }
    }

    /// Acquires a table lock, upgrading a held lock where allowed.
    ///
    /// Blocks until granted. Returns Ok(false) if the transaction was
    /// aborted while waiting; protocol violations abort the transaction
    /// and return the tagged error.
    pub fn lock_table(&self, txn: &Transaction, mode: LockMode, oid: TableOid) -> Result<bool> {
        self.check_table_acquire(txn, mode)?;

        let queue = self.table_queue(oid);
        let mut inner = queue.inner.lock();
        let held = txn.table_lock_mode(oid);
        if self.prepare_upgrade(txn, held, mode, LockResource::Table(oid), &mut inner)? {
            return Ok(true);
        }
        self.wait_for_grant(txn, mode, LockResource::Table(oid), &queue, inner)
    }

    /// Releases a table lock, updating the 2PL phase per isolation
    /// level and waking waiters.
    pub fn unlock_table(&self, txn: &Transaction, oid: TableOid) -> Result<bool> {
        let queue = self.table_queue(oid);
        let mut inner = queue.inner.lock();

        let pos = inner
            .requests
            .iter()
            .position(|r| r.granted && r.txn_id == txn.id());
        let Some(pos) = pos else {
            return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        if txn.lock_sets().holds_row_locks_on(oid) {
            return Err(self.abort_txn(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let mode = inner.requests[pos].mode;
        self.apply_unlock_state_transition(txn, mode);
        inner.requests.remove(pos);
        self.remove_from_lock_sets(txn, mode, LockResource::Table(oid));
        queue.cv.notify_all();
        Ok(true)
    }

    /// Acquires a row lock (S or X only).
    pub fn lock_row(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
        rid: RecordId,
    ) -> Result<bool> {
        self.check_row_acquire(txn, mode, oid)?;

        let queue = self.row_queue(oid, rid);
        let mut inner = queue.inner.lock();
        let held = txn.row_lock_mode(oid, rid);
        if self.prepare_upgrade(txn, held, mode, LockResource::Row(oid, rid), &mut inner)? {
            return Ok(true);
        }
        self.wait_for_grant(txn, mode, LockResource::Row(oid, rid), &queue, inner)
    }

    /// Releases a row lock. With `force` the 2PL phase is left
    /// untouched (used when a session tears down an aborted
    /// transaction).
    pub fn unlock_row(
        &self,
        txn: &Transaction,
        oid: TableOid,
        rid: RecordId,
        force: bool,
    ) -> Result<bool> {
        let queue = self.row_queue(oid, rid);
        let mut inner = queue.inner.lock();

        let pos = inner
            .requests
            .iter()
            .position(|r| r.granted && r.txn_id == txn.id());
        let Some(pos) = pos else {
            return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mode = inner.requests[pos].mode;
        assert!(
            matches!(mode, LockMode::Shared | LockMode::Exclusive),
            "intention lock granted on a row"
        );
        if !force {
            self.apply_unlock_state_transition(txn, mode);
        }
        inner.requests.remove(pos);
        self.remove_from_lock_sets(txn, mode, LockResource::Row(oid, rid));
        queue.cv.notify_all();
        Ok(true)
    }

    /// Moves a growing transaction to shrinking when the unlocked mode
    /// requires it at the transaction's isolation level.
    fn apply_unlock_state_transition(&self, txn: &Transaction, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        let to_shrinking = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(mode, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                mode == LockMode::Exclusive
            }
        };
        if to_shrinking {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    /// Releases every lock a transaction holds, without 2PL state
    /// transitions. Used by commit and abort teardown.
    pub fn release_all(&self, txn: &Transaction) {
        let (rows, tables) = {
            let sets = txn.lock_sets();
            let mut rows: Vec<(TableOid, RecordId)> = Vec::new();
            for (&oid, rids) in sets.shared_rows.iter().chain(sets.exclusive_rows.iter()) {
                rows.extend(rids.iter().map(|&rid| (oid, rid)));
            }
            let mut tables: Vec<TableOid> = Vec::new();
            tables.extend(&sets.intention_shared_tables);
            tables.extend(&sets.intention_exclusive_tables);
            tables.extend(&sets.shared_tables);
            tables.extend(&sets.shared_intention_exclusive_tables);
            tables.extend(&sets.exclusive_tables);
            (rows, tables)
        };

        for (oid, rid) in rows {
            if let Some(queue) = self.row_queues.lock().get(&(oid, rid)).cloned() {
                let mut inner = queue.inner.lock();
                inner
                    .requests
                    .retain(|r| !(r.txn_id == txn.id() && r.granted));
                queue.cv.notify_all();
            }
        }
        for oid in tables {
            if let Some(queue) = self.table_queues.lock().get(&oid).cloned() {
                let mut inner = queue.inner.lock();
                inner
                    .requests
                    .retain(|r| !(r.txn_id == txn.id() && r.granted));
                queue.cv.notify_all();
            }
        }

        let mut sets = txn.lock_sets();
        *sets = Default::default();
    }

    // ------------------------------------------------------------------
    // Waits-for graph API (exposed for tests)
    // ------------------------------------------------------------------

    /// Adds an edge t1 -> t2 to the waits-for graph.
    pub fn add_edge(&self, t1: TxnId, t2: TxnId) {
        self.waits_for.lock().add_edge(t1, t2);
    }

    /// Removes the edge t1 -> t2 from the waits-for graph.
    pub fn remove_edge(&self, t1: TxnId, t2: TxnId) {
        self.waits_for.lock().remove_edge(t1, t2);
    }

    /// Returns the youngest transaction on a cycle, if any.
    pub fn has_cycle(&self) -> Option<TxnId> {
        self.waits_for.lock().find_cycle_victim()
    }

    /// Returns all current waits-for edges.
    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        self.waits_for.lock().edge_list()
    }

    /// One detection pass: rebuild the graph from the request queues,
    /// abort the youngest member of each cycle, and wake the queues it
    /// waits on.
    pub fn detect_deadlocks(&self, txn_manager: &TransactionManager) {
        let mut graph = self.waits_for.lock();
        graph.clear();

        let queues: Vec<Arc<LockRequestQueue>> = {
            let tables = self.table_queues.lock();
            let rows = self.row_queues.lock();
            tables.values().chain(rows.values()).cloned().collect()
        };

        // waiter -> queues holding its ungranted requests
        let mut waiter_queues: HashMap<TxnId, Vec<Arc<LockRequestQueue>>> = HashMap::new();
        for queue in &queues {
            let inner = queue.inner.lock();
            let granted = inner.granted_modes();
            for req in inner.requests.iter().filter(|r| !r.granted) {
                for &(holder, _) in &granted {
                    if holder != req.txn_id {
                        graph.add_edge(req.txn_id, holder);
                    }
                }
                waiter_queues
                    .entry(req.txn_id)
                    .or_default()
                    .push(queue.clone());
            }
        }

        while let Some(victim) = graph.find_cycle_victim() {
            warn!("deadlock detected, aborting youngest participant {}", victim);
            if let Some(txn) = txn_manager.get(victim) {
                txn.set_state(TransactionState::Aborted);
            }
            graph.remove_outgoing(victim);
            if let Some(qs) = waiter_queues.get(&victim) {
                for q in qs {
                    q.cv.notify_all();
                }
            }
        }
    }

    /// Starts the background deadlock detector.
    pub fn start_deadlock_detection(
        self: &Arc<Self>,
        txn_manager: Arc<TransactionManager>,
    ) {
        let already_running = self.detector_running.swap(true, Ordering::SeqCst);
        if already_running {
            return;
        }
        // The thread holds only a weak reference so dropping the last
        // user handle shuts the manager down.
        let weak = Arc::downgrade(self);
        let running = Arc::clone(&self.detector_running);
        let interval = self.config.cycle_detection_interval();
        let handle = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(interval);
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let Some(lock_manager) = weak.upgrade() else {
                    break;
                };
                lock_manager.detect_deadlocks(&txn_manager);
            }
        });
        *self.detector_handle.lock() = Some(handle);
    }

    /// Stops the background detector and joins its thread.
    pub fn stop_deadlock_detection(&self) {
        self.detector_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector_handle.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.stop_deadlock_detection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionManager;
    use tephra_common::page::PageId;

    fn rid(n: u32) -> RecordId {
        RecordId::new(PageId(n), 0)
    }

    fn setup() -> (LockManager, TransactionManager) {
        (
            LockManager::new(LockManagerConfig::default()),
            TransactionManager::new(),
        )
    }

    #[test]
    fn test_compatibility_matrix() {
        use LockMode::*;
        // Spot-check the documented matrix.
        assert!(LockMode::compatible(IntentionShared, IntentionShared));
        assert!(LockMode::compatible(IntentionShared, SharedIntentionExclusive));
        assert!(!LockMode::compatible(IntentionShared, Exclusive));
        assert!(LockMode::compatible(IntentionExclusive, IntentionExclusive));
        assert!(!LockMode::compatible(IntentionExclusive, Shared));
        assert!(LockMode::compatible(Shared, Shared));
        assert!(!LockMode::compatible(Shared, IntentionExclusive));
        assert!(LockMode::compatible(SharedIntentionExclusive, IntentionShared));
        assert!(!LockMode::compatible(SharedIntentionExclusive, Shared));
        for mode in [
            IntentionShared,
            IntentionExclusive,
            Shared,
            SharedIntentionExclusive,
            Exclusive,
        ] {
            assert!(!LockMode::compatible(Exclusive, mode));
            assert!(!LockMode::compatible(mode, Exclusive));
        }
    }

    #[test]
    fn test_upgrade_matrix() {
        use LockMode::*;
        assert!(LockMode::upgradable(IntentionShared, Shared));
        assert!(LockMode::upgradable(IntentionShared, Exclusive));
        assert!(LockMode::upgradable(IntentionShared, IntentionExclusive));
        assert!(LockMode::upgradable(IntentionShared, SharedIntentionExclusive));
        assert!(LockMode::upgradable(Shared, Exclusive));
        assert!(LockMode::upgradable(Shared, SharedIntentionExclusive));
        assert!(LockMode::upgradable(IntentionExclusive, Exclusive));
        assert!(LockMode::upgradable(SharedIntentionExclusive, Exclusive));

        assert!(!LockMode::upgradable(Shared, IntentionShared));
        assert!(!LockMode::upgradable(Exclusive, Shared));
        assert!(!LockMode::upgradable(Shared, IntentionExclusive));
    }

    #[test]
    fn test_basic_table_lock_unlock() {
        let (lm, tm) = setup();
        let txn = tm.begin(IsolationLevel::RepeatableRead);
        let oid = TableOid(1);

        assert!(lm.lock_table(&txn, LockMode::Shared, oid).unwrap());
        assert!(txn.lock_sets().shared_tables.contains(&oid));

        assert!(lm.unlock_table(&txn, oid).unwrap());
        assert!(!txn.lock_sets().shared_tables.contains(&oid));
        // RR: unlocking S moves the transaction to shrinking.
        assert_eq!(txn.state(), TransactionState::Shrinking);
    }

    #[test]
    fn test_same_mode_reacquire_is_noop() {
        let (lm, tm) = setup();
        let txn = tm.begin(IsolationLevel::RepeatableRead);
        let oid = TableOid(1);

        assert!(lm.lock_table(&txn, LockMode::Shared, oid).unwrap());
        assert!(lm.lock_table(&txn, LockMode::Shared, oid).unwrap());
        // Still exactly one grant to release.
        assert!(lm.unlock_table(&txn, oid).unwrap());
        assert!(lm.unlock_table(&txn, oid).is_err());
    }

    #[test]
    fn test_unlock_without_lock_aborts() {
        let (lm, tm) = setup();
        let txn = tm.begin(IsolationLevel::RepeatableRead);

        let err = lm.unlock_table(&txn, TableOid(5)).unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(AbortReason::AttemptedUnlockButNoLockHeld)
        );
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_read_uncommitted_rejects_shared() {
        let (lm, tm) = setup();
        let oid = TableOid(1);

        for mode in [
            LockMode::Shared,
            LockMode::IntentionShared,
            LockMode::SharedIntentionExclusive,
        ] {
            let txn = tm.begin(IsolationLevel::ReadUncommitted);
            let err = lm.lock_table(&txn, mode, oid).unwrap_err();
            assert_eq!(
                err.abort_reason(),
                Some(AbortReason::LockSharedOnReadUncommitted)
            );
            assert_eq!(txn.state(), TransactionState::Aborted);
        }

        // IX and X are fine.
        let txn = tm.begin(IsolationLevel::ReadUncommitted);
        assert!(lm
            .lock_table(&txn, LockMode::IntentionExclusive, oid)
            .unwrap());
        assert!(lm.lock_table(&txn, LockMode::Exclusive, oid).unwrap());
    }

    #[test]
    fn test_lock_on_shrinking_aborts() {
        let (lm, tm) = setup();
        let oid = TableOid(1);

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        lm.lock_table(&txn, LockMode::Shared, oid).unwrap();
        lm.unlock_table(&txn, oid).unwrap();
        assert_eq!(txn.state(), TransactionState::Shrinking);

        let err = lm.lock_table(&txn, LockMode::Shared, oid).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::LockOnShrinking));
    }

    #[test]
    fn test_read_committed_allows_shared_while_shrinking() {
        let (lm, tm) = setup();
        let t1 = TableOid(1);
        let t2 = TableOid(2);

        let txn = tm.begin(IsolationLevel::ReadCommitted);
        lm.lock_table(&txn, LockMode::Exclusive, t1).unwrap();
        lm.unlock_table(&txn, t1).unwrap();
        assert_eq!(txn.state(), TransactionState::Shrinking);

        // IS and S remain legal while shrinking under read-committed.
        assert!(lm.lock_table(&txn, LockMode::IntentionShared, t2).unwrap());
        assert!(lm.lock_table(&txn, LockMode::Shared, t2).unwrap());

        // X does not.
        let err = lm.lock_table(&txn, LockMode::Exclusive, t2).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::LockOnShrinking));
    }

    #[test]
    fn test_lock_after_commit_aborts() {
        let (lm, tm) = setup();
        let txn = tm.begin(IsolationLevel::RepeatableRead);
        tm.commit(&lm, &txn).unwrap();

        let err = lm
            .lock_table(&txn, LockMode::Shared, TableOid(1))
            .unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::LockOnAnotherPhase));
    }

    #[test]
    fn test_row_lock_requires_table_lock() {
        let (lm, tm) = setup();
        let oid = TableOid(1);

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        let err = lm
            .lock_row(&txn, LockMode::Shared, oid, rid(1))
            .unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::TableLockNotPresent));

        // IS on the table is not enough for an X row lock.
        let txn = tm.begin(IsolationLevel::RepeatableRead);
        lm.lock_table(&txn, LockMode::IntentionShared, oid).unwrap();
        let err = lm
            .lock_row(&txn, LockMode::Exclusive, oid, rid(1))
            .unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::TableLockNotPresent));

        // IX suffices for X rows; IS suffices for S rows.
        let txn = tm.begin(IsolationLevel::RepeatableRead);
        lm.lock_table(&txn, LockMode::IntentionExclusive, oid)
            .unwrap();
        assert!(lm.lock_row(&txn, LockMode::Exclusive, oid, rid(1)).unwrap());
    }

    #[test]
    fn test_intention_lock_on_row_aborts() {
        let (lm, tm) = setup();
        let oid = TableOid(1);

        for mode in [
            LockMode::IntentionShared,
            LockMode::IntentionExclusive,
            LockMode::SharedIntentionExclusive,
        ] {
            let txn = tm.begin(IsolationLevel::RepeatableRead);
            lm.lock_table(&txn, LockMode::IntentionExclusive, oid)
                .unwrap();
            let err = lm.lock_row(&txn, mode, oid, rid(1)).unwrap_err();
            assert_eq!(
                err.abort_reason(),
                Some(AbortReason::AttemptedIntentionLockOnRow)
            );
        }
    }

    #[test]
    fn test_table_unlock_blocked_by_row_locks() {
        let (lm, tm) = setup();
        let oid = TableOid(1);

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        lm.lock_table(&txn, LockMode::IntentionExclusive, oid)
            .unwrap();
        lm.lock_row(&txn, LockMode::Exclusive, oid, rid(1)).unwrap();

        let err = lm.unlock_table(&txn, oid).unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(AbortReason::TableUnlockedBeforeUnlockingRows)
        );
    }

    #[test]
    fn test_row_unlock_then_table_unlock() {
        let (lm, tm) = setup();
        let oid = TableOid(1);

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        lm.lock_table(&txn, LockMode::IntentionExclusive, oid)
            .unwrap();
        lm.lock_row(&txn, LockMode::Exclusive, oid, rid(1)).unwrap();

        assert!(lm.unlock_row(&txn, oid, rid(1), false).unwrap());
        // Unlocking a row X moves RR transactions to shrinking.
        assert_eq!(txn.state(), TransactionState::Shrinking);
        assert!(lm.unlock_table(&txn, oid).unwrap());
    }

    #[test]
    fn test_forced_row_unlock_keeps_state() {
        let (lm, tm) = setup();
        let oid = TableOid(1);

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        lm.lock_table(&txn, LockMode::IntentionExclusive, oid)
            .unwrap();
        lm.lock_row(&txn, LockMode::Exclusive, oid, rid(1)).unwrap();

        assert!(lm.unlock_row(&txn, oid, rid(1), true).unwrap());
        assert_eq!(txn.state(), TransactionState::Growing);
    }

    #[test]
    fn test_incompatible_upgrade_aborts() {
        let (lm, tm) = setup();
        let oid = TableOid(1);

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        lm.lock_table(&txn, LockMode::Exclusive, oid).unwrap();
        let err = lm.lock_table(&txn, LockMode::Shared, oid).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::IncompatibleUpgrade));
    }

    #[test]
    fn test_upgrade_is_to_x_uncontended() {
        let (lm, tm) = setup();
        let oid = TableOid(1);

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        lm.lock_table(&txn, LockMode::IntentionShared, oid).unwrap();
        assert!(lm.lock_table(&txn, LockMode::Exclusive, oid).unwrap());

        let sets = txn.lock_sets();
        assert!(!sets.intention_shared_tables.contains(&oid));
        assert!(sets.exclusive_tables.contains(&oid));
    }

    #[test]
    fn test_release_all_clears_everything() {
        let (lm, tm) = setup();
        let oid = TableOid(1);

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        lm.lock_table(&txn, LockMode::IntentionExclusive, oid)
            .unwrap();
        lm.lock_row(&txn, LockMode::Exclusive, oid, rid(1)).unwrap();
        lm.lock_row(&txn, LockMode::Exclusive, oid, rid(2)).unwrap();

        lm.release_all(&txn);
        let sets = txn.lock_sets();
        assert!(sets.intention_exclusive_tables.is_empty());
        assert!(!sets.holds_row_locks_on(oid));
    }

    #[test]
    fn test_graph_api() {
        let (lm, _tm) = setup();
        lm.add_edge(TxnId(0), TxnId(1));
        lm.add_edge(TxnId(1), TxnId(0));
        assert_eq!(
            lm.edge_list(),
            vec![(TxnId(0), TxnId(1)), (TxnId(1), TxnId(0))]
        );
        assert_eq!(lm.has_cycle(), Some(TxnId(1)));

        lm.remove_edge(TxnId(1), TxnId(0));
        assert_eq!(lm.has_cycle(), None);
    }
}
