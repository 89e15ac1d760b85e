// Write-ahead log of accepted element changes.
//
// Record layout (little-endian):
// ┌────────────┬────────────┬───────────┐
// │ u32 len    │ u32 crc32  │ payload…  │
// └────────────┴────────────┴───────────┘
// - `len`   : number of bytes in payload
// - `crc32` : checksum of payload for corruption detection
//
// Records hold merge results (events with their resolved timestamps), not mutations, so
// recovery does not depend on the clock or on the metadata defaults policy.
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use cellgraph_common::types::ElementKey;
use cellgraph_version::Timestamp;
use crc32fast::Hasher;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{LogRecord, StorageWal};
use crate::error::{StorageError, StorageResult, WalError};
use crate::history::{HistoricalEvent, Purge};

const HEADER_SIZE: usize = 8; // 4 bytes length + 4 bytes crc32

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedoEntry {
    pub lsn: u64,
    pub op: Operation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// An accepted mutation: its events and the history its hard deletes purged.
    Apply {
        key: ElementKey,
        timestamp: Timestamp,
        events: Vec<HistoricalEvent>,
        purges: Vec<Purge>,
    },
    /// A hard delete of a whole element.
    DeleteElement { key: ElementKey },
}

impl LogRecord for RedoEntry {
    fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        postcard::to_allocvec(self)
            .map_err(|e| StorageError::Wal(WalError::SerializationFailed(e.to_string())))
    }

    fn from_bytes(bytes: Vec<u8>) -> StorageResult<Self> {
        postcard::from_bytes(&bytes)
            .map_err(|e| StorageError::Wal(WalError::DeserializationFailed(e.to_string())))
    }
}

pub struct GraphWal {
    file: BufWriter<File>,
    path: PathBuf,
}

impl StorageWal for GraphWal {
    type LogIterator = WalIterator;
    type Record = RedoEntry;

    fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(WalError::Io)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .read(true)
            .open(&path)
            .map_err(WalError::Io)?;
        file.seek(SeekFrom::End(0)).map_err(WalError::Io)?;

        Ok(Self {
            file: BufWriter::new(file),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Appends one framed record. A failed write is truncated away so the log never holds a
    /// partial record followed by good ones.
    fn append(&mut self, record: &Self::Record) -> StorageResult<()> {
        let payload = record.to_bytes()?;
        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let checksum = hasher.finalize();
        let len = u32::try_from(payload.len()).map_err(|_| {
            WalError::SerializationFailed(format!("record of {} bytes", payload.len()))
        })?;

        let original_pos = self.file.stream_position().map_err(WalError::Io)?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&checksum.to_le_bytes());
        data.extend_from_slice(&payload);

        if let Err(e) = self.file.write_all(&data) {
            self.file
                .seek(SeekFrom::Start(original_pos))
                .map_err(WalError::Io)?;
            self.file
                .get_ref()
                .set_len(original_pos)
                .map_err(WalError::Io)?;
            return Err(WalError::Io(e).into());
        }
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.flush().map_err(WalError::Io)?;
        self.file.get_ref().sync_data().map_err(WalError::Io)?;
        Ok(())
    }

    /// Reads records lazily from the start of the file, verifying each checksum.
    ///
    /// Records still sitting in the write buffer are not seen; flush first.
    fn iter(&self) -> StorageResult<Self::LogIterator> {
        let mut reader = self.file.get_ref().try_clone().map_err(WalError::Io)?;
        reader.seek(SeekFrom::Start(0)).map_err(WalError::Io)?;
        Ok(WalIterator {
            reader: BufReader::new(reader),
            done: false,
        })
    }

    /// Every record in LSN order. Fails on the first corrupt record.
    fn read_all(&self) -> StorageResult<Vec<Self::Record>> {
        let mut records = self.iter()?.collect::<StorageResult<Vec<_>>>()?;
        records.sort_by_key(|entry| entry.lsn);
        Ok(records)
    }
}

impl GraphWal {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Iterator over the framed records of a log file.
pub struct WalIterator {
    reader: BufReader<File>,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = StorageResult<RedoEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut header = [0u8; HEADER_SIZE];
        if let Err(e) = self.reader.read_exact(&mut header) {
            self.done = true;
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return None;
            }
            return Some(Err(WalError::Io(e).into()));
        }
        let (len, checksum) = header.split_at(4);
        let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
        let checksum = u32::from_le_bytes([checksum[0], checksum[1], checksum[2], checksum[3]]);

        let mut payload = vec![0u8; len];
        if let Err(e) = self.reader.read_exact(&mut payload) {
            // A torn tail leaves nothing readable after it.
            self.done = true;
            return Some(Err(WalError::Io(e).into()));
        }

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        if hasher.finalize() != checksum {
            return Some(Err(WalError::ChecksumMismatch.into()));
        }
        Some(RedoEntry::from_bytes(payload))
    }
}

/// Where the write-ahead log lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalConfig {
    pub wal_path: PathBuf,
}

impl WalConfig {
    pub fn new(wal_path: impl Into<PathBuf>) -> Self {
        Self {
            wal_path: wal_path.into(),
        }
    }
}

/// Shared handle to the log, handing out log sequence numbers.
pub struct WalManager {
    wal: Mutex<GraphWal>,
    next_lsn: AtomicU64,
    wal_path: PathBuf,
}

impl WalManager {
    pub fn open(config: &WalConfig) -> StorageResult<Self> {
        Ok(Self {
            wal: Mutex::new(GraphWal::open(&config.wal_path)?),
            next_lsn: AtomicU64::new(0),
            wal_path: config.wal_path.clone(),
        })
    }

    pub fn next_lsn(&self) -> u64 {
        self.next_lsn.fetch_add(1, Ordering::SeqCst)
    }

    pub fn set_next_lsn(&self, lsn: u64) {
        self.next_lsn.store(lsn, Ordering::SeqCst);
    }

    /// Appends `op` under a fresh LSN and returns that LSN.
    pub fn append(&self, op: Operation) -> StorageResult<u64> {
        let mut wal = self.wal.lock();
        let lsn = self.next_lsn();
        wal.append(&RedoEntry { lsn, op })?;
        Ok(lsn)
    }

    pub fn flush(&self) -> StorageResult<()> {
        self.wal.lock().flush()
    }

    pub fn read_all(&self) -> StorageResult<Vec<RedoEntry>> {
        self.wal.lock().read_all()
    }

    pub fn path(&self) -> &Path {
        &self.wal_path
    }
}
