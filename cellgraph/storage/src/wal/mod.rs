pub mod graph_wal;

use std::path::Path;

use crate::error::StorageResult;

/// Records that can be stored in a write-ahead log.
pub trait LogRecord: Clone + std::fmt::Debug {
    fn to_bytes(&self) -> StorageResult<Vec<u8>>;

    fn from_bytes(bytes: Vec<u8>) -> StorageResult<Self>
    where
        Self: Sized;
}

/// An append-only log that makes accepted changes durable before they are acknowledged.
pub trait StorageWal {
    type Record: LogRecord;

    type LogIterator: Iterator<Item = StorageResult<Self::Record>>;

    /// Opens the log at `path`, creating it if needed.
    fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self>
    where
        Self: Sized;

    /// Appends a record to the write buffer.
    fn append(&mut self, record: &Self::Record) -> StorageResult<()>;

    /// Flushes the write buffer and fsyncs.
    fn flush(&mut self) -> StorageResult<()>;

    /// Reads the log from the start.
    fn iter(&self) -> StorageResult<Self::LogIterator>;

    fn read_all(&self) -> StorageResult<Vec<Self::Record>>;
}
