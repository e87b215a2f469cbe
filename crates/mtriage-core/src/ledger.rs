//! Append-only completion ledger for resumable batch runs
//!
//! Each record is the pair `(batch, index)` encoded as two little-endian
//! `u32`s. The first record is a [`LedgerHeader`] holding the plan the
//! remaining records are relative to. A trailing partial record, left by a
//! crash mid-write, is ignored.

use crate::error::LedgerError;
use crossbeam_channel::Receiver;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const RECORD_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Completion {
    pub batch: u32,
    pub index: u32,
}

impl Completion {
    pub fn to_bytes(self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[..4].copy_from_slice(&self.batch.to_le_bytes());
        bytes[4..].copy_from_slice(&self.index.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: [u8; RECORD_SIZE]) -> Self {
        let [b0, b1, b2, b3, i0, i1, i2, i3] = bytes;
        Self {
            batch: u32::from_le_bytes([b0, b1, b2, b3]),
            index: u32::from_le_bytes([i0, i1, i2, i3]),
        }
    }
}

/// batch -> indexes already completed in that batch
pub type Completed = HashMap<u32, HashSet<u32>>;

/// Item count and batch size a ledger's records were written under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerHeader {
    pub total: u32,
    pub batch_size: u32,
}

impl LedgerHeader {
    pub fn to_bytes(self) -> [u8; RECORD_SIZE] {
        Completion {
            batch: self.total,
            index: self.batch_size,
        }
        .to_bytes()
    }

    pub fn from_bytes(bytes: [u8; RECORD_SIZE]) -> Self {
        let c = Completion::from_bytes(bytes);
        Self {
            total: c.batch,
            batch_size: c.index,
        }
    }

    /// Position of a record in the whole input, if it falls inside it
    fn position(&self, c: Completion) -> Option<u64> {
        let pos = u64::from(c.batch) * u64::from(self.batch_size) + u64::from(c.index);
        (c.index < self.batch_size && pos < u64::from(self.total)).then_some(pos)
    }

    fn locate(&self, pos: u64) -> Completion {
        let size = u64::from(self.batch_size.max(1));
        Completion {
            batch: (pos / size) as u32,
            index: (pos % size) as u32,
        }
    }
}

/// Ledger file at `{dir}/{key}.db`
#[derive(Debug, Clone)]
pub struct CompletionLog {
    path: PathBuf,
}

impl CompletionLog {
    pub fn new(dir: &Path, key: &str) -> Self {
        Self {
            path: dir.join(format!("{key}.db")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn io_err(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Read back every complete record in terms of `header`'s plan
    ///
    /// Records written under another batch size for the same number of
    /// items are moved to where those items fall now. A ledger written for a
    /// different number of items, or without a header, is discarded. A
    /// missing ledger is empty.
    pub fn replay(&self, header: LedgerHeader) -> Result<Completed, LedgerError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Completed::new()),
            Err(err) => return Err(self.io_err(err)),
        };
        let mut records = bytes.chunks_exact(RECORD_SIZE).map(|chunk| {
            let mut record = [0u8; RECORD_SIZE];
            record.copy_from_slice(chunk);
            record
        });

        let Some(written) = records.next().map(LedgerHeader::from_bytes) else {
            return Ok(Completed::new());
        };
        if written.total != header.total || written.batch_size == 0 {
            warn!(
                "Discarding ledger {}: written for {} items, now {}",
                self.path.display(),
                written.total,
                header.total
            );
            return Ok(Completed::new());
        }
        if written != header {
            info!(
                "Re-batching ledger {} from batches of {} to {}",
                self.path.display(),
                written.batch_size,
                header.batch_size
            );
        }

        let mut completed = Completed::new();
        for c in records.map(Completion::from_bytes) {
            let Some(pos) = written.position(c) else {
                continue;
            };
            let c = header.locate(pos);
            completed.entry(c.batch).or_default().insert(c.index);
        }
        Ok(completed)
    }

    /// Open for appending under `header`
    ///
    /// A ledger already written under `header` only has any torn trailing
    /// record cut off. Anything else is rewritten as `header` followed by
    /// `completed`, which should come from [`CompletionLog::replay`].
    pub fn open_append(
        &self,
        header: LedgerHeader,
        completed: &Completed,
    ) -> Result<File, LedgerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        let len = file.metadata().map_err(|e| self.io_err(e))?.len();

        let mut written = [0u8; RECORD_SIZE];
        let current = len >= RECORD_SIZE as u64
            && file.read_exact(&mut written).is_ok()
            && LedgerHeader::from_bytes(written) == header;
        if current {
            let torn = len % RECORD_SIZE as u64;
            if torn != 0 {
                file.set_len(len - torn).map_err(|e| self.io_err(e))?;
            }
            return Ok(file);
        }

        file.set_len(0).map_err(|e| self.io_err(e))?;
        let mut records: Vec<Completion> = completed
            .iter()
            .flat_map(|(batch, indexes)| {
                indexes.iter().map(|index| Completion {
                    batch: *batch,
                    index: *index,
                })
            })
            .collect();
        records.sort_by_key(|c| (c.batch, c.index));
        let mut bytes = header.to_bytes().to_vec();
        for c in records {
            bytes.extend_from_slice(&c.to_bytes());
        }
        file.write_all(&bytes)
            .and_then(|_| file.flush())
            .map_err(|e| self.io_err(e))?;
        Ok(file)
    }

    /// Append records from `rx` until every sender is dropped
    ///
    /// Each record is flushed before the next is read. Returns the number of
    /// records written.
    pub fn drain(&self, rx: Receiver<Completion>, mut file: File) -> Result<u64, LedgerError> {
        let mut written = 0;
        for completion in rx {
            file.write_all(&completion.to_bytes())
                .and_then(|_| file.flush())
                .map_err(|e| self.io_err(e))?;
            written += 1;
        }
        file.sync_data().map_err(|e| self.io_err(e))?;
        Ok(written)
    }

    pub fn remove(&self) -> Result<(), LedgerError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_err(err)),
        }
    }
}
