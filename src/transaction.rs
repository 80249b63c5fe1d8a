//! Transaction lifecycle management.
//!
//! A transaction moves through `Active -> Committed -> Terminated` on
//! success and `Active -> Failed -> Aborted -> Terminated` on failure;
//! `Terminated` is absorbing. The manager coordinates the log, lock and
//! recovery collaborators, each of which is optional: commit appends and
//! flushes the commit record (the durability point) before any lock is
//! released, and abort rolls the page cache back before its locks go.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::errors::{Error, Result};
use crate::failpoint;
use crate::lock_manager::LockManager;
use crate::recovery::RecoveryManager;
use crate::wal::{LogManager, LogRecord};

/// A unique identifier for a transaction. Ids are assigned monotonically
/// starting at 1.
pub type TransactionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Failed,
    Aborted,
    Terminated,
}

/// A database transaction.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: RwLock<TransactionState>,
    start_time: DateTime<Utc>,
}

impl Transaction {
    fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: RwLock::new(TransactionState::Active),
            start_time: Utc::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    pub fn is_committed(&self) -> bool {
        self.state() == TransactionState::Committed
    }

    pub fn is_aborted(&self) -> bool {
        matches!(
            self.state(),
            TransactionState::Aborted | TransactionState::Failed
        )
    }

    fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    fn mark_committed(&self) -> Result<()> {
        let mut state = self.state.write();
        match *state {
            TransactionState::Active => {
                *state = TransactionState::Committed;
                Ok(())
            }
            TransactionState::Committed => Err(Error::AlreadyCommitted),
            _ => Err(Error::TransactionNotActive),
        }
    }

    /// Moves toward Aborted. Returns `Ok(false)` when the transaction is
    /// already terminated, making a second abort a no-op.
    fn mark_aborted(&self) -> Result<bool> {
        let mut state = self.state.write();
        match *state {
            TransactionState::Terminated => Ok(false),
            TransactionState::Aborted => Err(Error::AlreadyAborted),
            _ => {
                // Failed is the transient step on this path; nothing
                // observes it under the state lock, so land on Aborted.
                *state = TransactionState::Aborted;
                Ok(true)
            }
        }
    }
}

/// The transaction manager: id assignment, the active-transaction map and
/// commit/abort orchestration across the optional collaborators.
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    active_txns: Mutex<HashMap<TransactionId, Arc<Transaction>>>,
    log_manager: Option<Arc<LogManager>>,
    lock_manager: Option<Arc<LockManager>>,
    recovery_manager: Option<Arc<RecoveryManager>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            active_txns: Mutex::new(HashMap::new()),
            log_manager: None,
            lock_manager: None,
            recovery_manager: None,
        }
    }

    pub fn with_managers(
        log_manager: Option<Arc<LogManager>>,
        lock_manager: Option<Arc<LockManager>>,
        recovery_manager: Option<Arc<RecoveryManager>>,
    ) -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            active_txns: Mutex::new(HashMap::new()),
            log_manager,
            lock_manager,
            recovery_manager,
        }
    }

    /// Attaches collaborators after construction, before the manager is
    /// shared.
    pub fn set_managers(
        &mut self,
        log_manager: Option<Arc<LogManager>>,
        lock_manager: Option<Arc<LockManager>>,
        recovery_manager: Option<Arc<RecoveryManager>>,
    ) {
        self.log_manager = log_manager;
        self.lock_manager = lock_manager;
        self.recovery_manager = recovery_manager;
    }

    /// Starts a new transaction and appends its Begin record.
    pub fn begin(&self) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id));
        self.active_txns.lock().insert(txn_id, txn.clone());

        if let Some(log_manager) = &self.log_manager {
            // A Begin that fails to log still runs; recovery treats a
            // transaction without a Begin record as having done nothing.
            let _ = log_manager.append(&LogRecord::begin(txn_id));
        }
        crate::stratum_debug_log!("[TransactionManager::begin] Started txn {txn_id}");
        txn
    }

    pub fn get_transaction(&self, txn_id: TransactionId) -> Option<Arc<Transaction>> {
        self.active_txns.lock().get(&txn_id).cloned()
    }

    /// Commits: Commit record appended and the log flushed before any lock
    /// is released. The flush is the durability point; the page cache may
    /// still be dirty afterwards.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<()> {
        txn.mark_committed()?;

        if let Some(log_manager) = &self.log_manager {
            let log_result = (|| -> Result<()> {
                failpoint::check("txn.commit.before_log")?;
                log_manager.append(&LogRecord::commit(txn.id()))?;
                log_manager.flush()?;
                failpoint::check("txn.commit.after_flush")?;
                Ok(())
            })();
            if let Err(e) = log_result {
                txn.set_state(TransactionState::Active);
                return Err(e);
            }
        }

        if let Some(lock_manager) = &self.lock_manager {
            lock_manager.unlock_all(txn);
        }
        self.active_txns.lock().remove(&txn.id());
        txn.set_state(TransactionState::Terminated);
        crate::stratum_debug_log!("[TransactionManager::commit] Committed txn {}", txn.id());
        Ok(())
    }

    /// Aborts: the page cache is rolled back before locks are released, so
    /// no other transaction can observe the undone changes.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<()> {
        if !txn.mark_aborted()? {
            return Ok(());
        }

        if let Some(recovery_manager) = &self.recovery_manager {
            recovery_manager.rollback(txn)?;
        }

        if let Some(log_manager) = &self.log_manager {
            let log_result = (|| -> Result<()> {
                failpoint::check("txn.abort.before_log")?;
                log_manager.append(&LogRecord::abort(txn.id()))?;
                Ok(())
            })();
            if let Err(e) = log_result {
                txn.set_state(TransactionState::Active);
                return Err(e);
            }
        }

        if let Some(lock_manager) = &self.lock_manager {
            lock_manager.unlock_all(txn);
        }
        self.active_txns.lock().remove(&txn.id());
        txn.set_state(TransactionState::Terminated);
        crate::stratum_debug_log!("[TransactionManager::abort] Aborted txn {}", txn.id());
        Ok(())
    }
}
