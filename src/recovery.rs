//! Recovery: per-transaction rollback and restart recovery from the log.
//!
//! Rollback undoes a single live transaction in the page cache. Restart
//! recovery is a three-phase pass over the whole log: analysis classifies
//! transactions as committed or still active, redo reapplies every
//! committed update in log order, and undo walks each surviving
//! transaction's updates newest-first. Redo needs no per-page LSN check
//! because updates are serialized by the log and reapplication is
//! idempotent.

use std::collections::HashSet;
use std::sync::Arc;

use crate::buffer_pool::BufferPoolManager;
use crate::errors::{Error, Result};
use crate::transaction::{Transaction, TransactionId};
use crate::wal::{LogManager, LogRecord, LogRecordType};
use crate::{PageId, PAGE_SIZE};

pub struct RecoveryManager {
    log_manager: Arc<LogManager>,
    bufmgr: Arc<BufferPoolManager>,
}

impl RecoveryManager {
    pub fn new(log_manager: Arc<LogManager>, bufmgr: Arc<BufferPoolManager>) -> Self {
        Self {
            log_manager,
            bufmgr,
        }
    }

    /// Undoes one transaction's updates in the page cache, newest first,
    /// stopping at its Commit or Abort record.
    pub fn rollback(&self, txn: &Transaction) -> Result<()> {
        let records = self.log_manager.read_all()?;

        let mut to_undo: Vec<&LogRecord> = Vec::new();
        for record in records.iter().rev() {
            if record.txn_id != txn.id() {
                continue;
            }
            match record.record_type {
                LogRecordType::Commit | LogRecordType::Abort => break,
                LogRecordType::Update => to_undo.push(record),
                _ => {}
            }
        }

        for record in to_undo {
            crate::stratum_debug_log!(
                "[RecoveryManager::rollback] Undoing lsn {} on page {}",
                record.lsn,
                record.page_id
            );
            self.apply(record.page_id, record.offset, &record.old_value)?;
        }
        Ok(())
    }

    /// Restart recovery: analysis, redo of committed transactions, undo of
    /// transactions with no Commit or Abort, then a pool flush.
    pub fn recover(&self) -> Result<()> {
        let records = self.log_manager.read_all()?;

        // Analysis: a Begin with no matching Commit/Abort leaves the
        // transaction in the active set.
        let mut active_txns: HashSet<TransactionId> = HashSet::new();
        let mut committed_txns: HashSet<TransactionId> = HashSet::new();
        for record in &records {
            match record.record_type {
                LogRecordType::Begin => {
                    active_txns.insert(record.txn_id);
                }
                LogRecordType::Commit => {
                    committed_txns.insert(record.txn_id);
                    active_txns.remove(&record.txn_id);
                }
                LogRecordType::Abort => {
                    active_txns.remove(&record.txn_id);
                }
                _ => {}
            }
        }

        // Redo committed work in log order.
        for record in &records {
            if record.record_type == LogRecordType::Update
                && committed_txns.contains(&record.txn_id)
            {
                self.apply(record.page_id, record.offset, &record.new_value)?;
            }
        }

        // Undo what never committed, newest first per transaction.
        for txn_id in &active_txns {
            let mut to_undo: Vec<&LogRecord> = Vec::new();
            for record in records.iter().rev() {
                if record.txn_id != *txn_id {
                    continue;
                }
                match record.record_type {
                    LogRecordType::Begin => break,
                    LogRecordType::Update => to_undo.push(record),
                    _ => {}
                }
            }
            for record in to_undo {
                self.apply(record.page_id, record.offset, &record.old_value)?;
            }
        }

        self.bufmgr.flush()?;
        Ok(())
    }

    /// Overwrites `value` at `offset` on the page, through the buffer pool
    /// so the write marks the page dirty. The log is external input, so an
    /// out-of-range record is an error rather than a panic.
    fn apply(&self, page_id: PageId, offset: u32, value: &[u8]) -> Result<()> {
        let offset = offset as usize;
        if offset + value.len() > PAGE_SIZE {
            return Err(Error::LogCorrupted);
        }
        let guard = self.bufmgr.acquire_page(page_id)?;
        guard.write()[offset..offset + value.len()].copy_from_slice(value);
        Ok(())
    }
}
