//! The Write-Ahead Log.
//!
//! An append-only file of records framed as
//! `[lsn: u64][record_size: u32][type: u32][txn_id: u64][page_id: u64]`
//! `[offset: u32][old_len: u32][old][new_len: u32][new]`,
//! all integers big-endian. `record_size` counts everything after itself.
//! A record describing a page mutation must be appended before the page
//! change becomes observable, and the log is flushed at commit.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use bytes::{Buf, BufMut};

use crate::errors::{Error, Result};
use crate::transaction::TransactionId;
use crate::PageId;

/// A Log Sequence Number. LSNs are dense and monotonic, starting at 1.
pub type Lsn = u64;

/// Fixed part of a record's payload: type, txn id, page id, offset and the
/// two value length prefixes.
const RECORD_FIXED_SIZE: usize = 4 + 8 + 8 + 4 + 4 + 4;

/// Size of the `(lsn, record_size)` frame preceding each payload.
const RECORD_FRAME_SIZE: usize = 8 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    Update = 0,
    Commit = 1,
    Abort = 2,
    Begin = 3,
    Checkpoint = 4,
}

impl LogRecordType {
    fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(LogRecordType::Update),
            1 => Ok(LogRecordType::Commit),
            2 => Ok(LogRecordType::Abort),
            3 => Ok(LogRecordType::Begin),
            4 => Ok(LogRecordType::Checkpoint),
            _ => Err(Error::LogCorrupted),
        }
    }
}

/// A single record in the log. Non-update records leave the page fields
/// and values at their zero defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Assigned by `append`; zero until then.
    pub lsn: Lsn,
    pub record_type: LogRecordType,
    pub txn_id: TransactionId,
    pub page_id: PageId,
    pub offset: u32,
    pub old_value: Vec<u8>,
    pub new_value: Vec<u8>,
}

impl LogRecord {
    fn control(record_type: LogRecordType, txn_id: TransactionId) -> Self {
        Self {
            lsn: 0,
            record_type,
            txn_id,
            page_id: 0,
            offset: 0,
            old_value: Vec::new(),
            new_value: Vec::new(),
        }
    }

    pub fn begin(txn_id: TransactionId) -> Self {
        Self::control(LogRecordType::Begin, txn_id)
    }

    pub fn commit(txn_id: TransactionId) -> Self {
        Self::control(LogRecordType::Commit, txn_id)
    }

    pub fn abort(txn_id: TransactionId) -> Self {
        Self::control(LogRecordType::Abort, txn_id)
    }

    pub fn checkpoint() -> Self {
        Self::control(LogRecordType::Checkpoint, 0)
    }

    /// A byte-range mutation of one page: `old_value` for undo,
    /// `new_value` for redo, both applied at `offset`.
    pub fn update(
        txn_id: TransactionId,
        page_id: PageId,
        offset: u32,
        old_value: Vec<u8>,
        new_value: Vec<u8>,
    ) -> Self {
        Self {
            lsn: 0,
            record_type: LogRecordType::Update,
            txn_id,
            page_id,
            offset,
            old_value,
            new_value,
        }
    }
}

struct LogFile {
    file: File,
    next_lsn: Lsn,
}

/// The log manager. A single mutex serializes appends, which is what keeps
/// LSN order identical to file order.
pub struct LogManager {
    inner: Mutex<LogFile>,
}

impl LogManager {
    /// Opens or creates the log file. A nonempty log is scanned forward by
    /// `(lsn, record_size)` frames to find the last LSN, and numbering
    /// resumes after it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut inner = LogFile { file, next_lsn: 1 };
        inner.recover_lsn()?;
        crate::stratum_debug_log!("[LogManager::open] next_lsn: {}", inner.next_lsn);
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Assigns the next LSN to the record, writes it, and fsyncs.
    /// Syncing every append costs throughput but makes each appended
    /// record durable on its own, which is the contract commit relies on.
    pub fn append(&self, record: &LogRecord) -> Result<Lsn> {
        let mut inner = self.inner.lock().unwrap();
        let lsn = inner.next_lsn;
        inner.next_lsn += 1;

        let buf = Self::serialize(lsn, record);
        inner.file.seek(SeekFrom::End(0))?;
        inner.file.write_all(&buf)?;
        inner.file.sync_all()?;
        Ok(lsn)
    }

    /// Reads every record from the start of the log, in LSN order.
    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        let mut inner = self.inner.lock().unwrap();
        inner.file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        inner.file.read_to_end(&mut buf)?;

        let mut rest = &buf[..];
        let mut records = Vec::new();
        while !rest.is_empty() {
            if rest.len() < RECORD_FRAME_SIZE {
                return Err(Error::LogCorrupted);
            }
            let lsn = rest.get_u64();
            let record_size = rest.get_u32() as usize;
            if rest.len() < record_size {
                return Err(Error::LogCorrupted);
            }
            let (payload, tail) = rest.split_at(record_size);
            rest = tail;
            records.push(Self::deserialize(lsn, payload)?);
        }
        Ok(records)
    }

    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        inner.file.sync_all()?;
        Ok(())
    }

    /// The LSN the next append will receive.
    pub fn next_lsn(&self) -> Lsn {
        self.inner.lock().unwrap().next_lsn
    }

    fn serialize(lsn: Lsn, record: &LogRecord) -> Vec<u8> {
        let record_size = RECORD_FIXED_SIZE + record.old_value.len() + record.new_value.len();
        let mut buf = Vec::with_capacity(RECORD_FRAME_SIZE + record_size);
        buf.put_u64(lsn);
        buf.put_u32(record_size as u32);
        buf.put_u32(record.record_type as u32);
        buf.put_u64(record.txn_id);
        buf.put_u64(record.page_id);
        buf.put_u32(record.offset);
        buf.put_u32(record.old_value.len() as u32);
        buf.put_slice(&record.old_value);
        buf.put_u32(record.new_value.len() as u32);
        buf.put_slice(&record.new_value);
        buf
    }

    fn deserialize(lsn: Lsn, mut payload: &[u8]) -> Result<LogRecord> {
        if payload.len() < RECORD_FIXED_SIZE {
            return Err(Error::LogCorrupted);
        }
        let record_type = LogRecordType::from_u32(payload.get_u32())?;
        let txn_id = payload.get_u64();
        let page_id = payload.get_u64();
        let offset = payload.get_u32();

        let old_len = payload.get_u32() as usize;
        if payload.len() < old_len + 4 {
            return Err(Error::LogCorrupted);
        }
        let old_value = payload[..old_len].to_vec();
        payload.advance(old_len);

        let new_len = payload.get_u32() as usize;
        if payload.len() < new_len {
            return Err(Error::LogCorrupted);
        }
        let new_value = payload[..new_len].to_vec();

        Ok(LogRecord {
            lsn,
            record_type,
            txn_id,
            page_id,
            offset,
            old_value,
            new_value,
        })
    }
}

impl LogFile {
    fn recover_lsn(&mut self) -> Result<()> {
        let file_size = self.file.metadata()?.len();
        if file_size == 0 {
            self.next_lsn = 1;
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(0))?;
        let mut last_lsn = 0;
        let mut frame = [0u8; RECORD_FRAME_SIZE];
        loop {
            match self.file.read_exact(&mut frame) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let mut rest = &frame[..];
            last_lsn = rest.get_u64();
            let record_size = rest.get_u32();
            self.file.seek(SeekFrom::Current(record_size as i64))?;
        }
        self.next_lsn = last_lsn + 1;
        Ok(())
    }
}
