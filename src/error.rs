use std::path::PathBuf;

/// Errors surfaced by the store.
///
/// Corruption is reported at two granularities: a single bad record
/// (`CorruptRecord`), which recovery tolerates at the tail of the newest
/// segment, and a bad log (`CorruptLog`), which is fatal for `open`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key is empty")]
    EmptyKey,

    #[error("key not found")]
    KeyNotFound,

    #[error("record of {size} bytes exceeds max file size {max}")]
    RecordTooLarge { size: u64, max: u64 },

    #[error("batch of {len} staged operations exceeds cap {max}")]
    BatchTooLarge { len: usize, max: usize },

    #[error("batch was already committed")]
    BatchCommitted,

    #[error("database is closed")]
    Closed,

    #[error("database directory {0} is locked by another process")]
    InUse(PathBuf),

    #[error("merge already in progress")]
    MergeInProgress,

    #[error("corrupt record: {0}")]
    CorruptRecord(&'static str),

    #[error("corrupt log: {0}")]
    CorruptLog(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the transient IO class a caller may retry.
    ///
    /// Disk-full is surfaced as `Io` with `ErrorKind::StorageFull` and is
    /// deliberately not considered retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(err) => err.kind() != std::io::ErrorKind::StorageFull,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
