//! Error types for the engine binding and the bidirectional store

use crate::bidi::Direction;
use std::fmt;
use std::path::PathBuf;

/// Error raised by redb itself
#[derive(Debug, thiserror::Error)]
pub enum RedbError {
    #[error("redb error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("redb compaction error: {0}")]
    Compaction(#[from] redb::CompactionError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for RedbError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

/// Error type for engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to open engine at {}: {source}", .path.display())]
    Open { path: PathBuf, source: RedbError },

    #[error("engine is already open")]
    AlreadyOpen,

    #[error("engine is not open")]
    NotOpen,

    #[error("engine is closed")]
    Closed,

    #[error("failed to store {key}: {source}")]
    Write { key: String, source: RedbError },

    #[error("failed to get {key}: {source}")]
    Read { key: String, source: RedbError },

    #[error("failed to delete {key}: {source}")]
    Delete { key: String, source: RedbError },

    #[error("failed to count records: {0}")]
    Size(RedbError),

    #[error("compaction failed: {0}")]
    Compaction(RedbError),

    #[error("compaction is {0}")]
    CompactionState(&'static str),

    #[error("failed to close engine: {0}")]
    Close(String),

    #[error("failed to start engine worker: {0}")]
    Spawn(std::io::Error),

    #[error("engine worker is gone")]
    WorkerGone,
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Error type for bidirectional store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{direction} {name} not found")]
    NotFound { direction: Direction, name: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl StoreError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A batch operation stopped at its first failing item.
///
/// `completed` holds the results of every item before `failed_at`, in
/// input order. Items after `failed_at` were not attempted.
#[derive(Debug)]
pub struct BatchError<T> {
    pub completed: Vec<T>,
    pub failed_at: usize,
    pub source: StoreError,
}

impl<T> BatchError<T> {
    pub(crate) const fn new(completed: Vec<T>, failed_at: usize, source: StoreError) -> Self {
        Self {
            completed,
            failed_at,
            source,
        }
    }
}

impl<T> fmt::Display for BatchError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch aborted at item {} after {} completed: {}",
            self.failed_at,
            self.completed.len(),
            self.source
        )
    }
}

impl<T: fmt::Debug> std::error::Error for BatchError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
