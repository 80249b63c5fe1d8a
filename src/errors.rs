use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the storage engine.
///
/// Errors are local: no component retries or swallows them. Recovery is the
/// only component that tolerates partial history, and it reconstructs state
/// from the log rather than from errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no free buffer available in buffer pool")]
    NoFreeBuffer,
    #[error("duplicate key")]
    DuplicateKey,
    #[error("key not found")]
    KeyNotFound,
    #[error("transaction is not active")]
    TransactionNotActive,
    #[error("transaction already committed")]
    AlreadyCommitted,
    #[error("transaction already aborted")]
    AlreadyAborted,
    #[error("deadlock detected")]
    Deadlock,
    #[error("log file is corrupted")]
    LogCorrupted,
    #[error("failpoint {0} triggered")]
    FailpointTriggered(String),
}
