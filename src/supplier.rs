//! Readers, suppliers and generators: how worker threads get their reads.
//!
//! ### Roles
//! - [`ReadReader`] / [`PairedReadReader`]: sequential parsers over one byte range.
//! - [`ReadSupplier`] / [`PairedReadSupplier`]: what one worker thread pulls from.
//!   A supplier is owned by exactly one thread for its whole life and needs no
//!   locking.
//! - [`ReadSupplierGenerator`] / [`PairedReadSupplierGenerator`]: thread-safe
//!   factories handing out one supplier per worker.
//!
//! Two generator strategies exist: range splitting (this module), where each
//! supplier parses its own byte range of a seekable file, and the producer queue
//! in [`crate::queue`].
//!
//! Every read a supplier yields counts against its batch; the consumer must call
//! `release_batch(read.batch())` exactly once per read.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::data::{BatchLedger, DataBatch};
use crate::error::{ReadError, Result};
use crate::read::Read;

/// Sequential reader of single reads.
pub trait ReadReader: Send {
    /// Parse the next read into `read`; `Ok(false)` at end of input.
    fn next_read(&mut self, read: &mut Read) -> Result<bool>;

    /// Restart on `length` bytes from `start`, skipping a leading partial record.
    fn reinit(&mut self, start: u64, length: u64) -> Result<()>;

    fn release_batch(&mut self, batch: DataBatch) -> Result<()>;

    /// Handle on the acquisition counts behind [`ReadReader::release_batch`].
    fn ledger(&self) -> BatchLedger;

    fn path(&self) -> &Path;
}

/// Sequential reader of mate pairs.
pub trait PairedReadReader: Send {
    /// Parse the next pair; `Ok(false)` at end of input.
    fn next_read_pair(&mut self, read0: &mut Read, read1: &mut Read) -> Result<bool>;

    fn reinit(&mut self, start: u64, length: u64) -> Result<()>;

    fn release_batch(&mut self, batch: DataBatch) -> Result<()>;

    fn ledger(&self) -> BatchLedger;

    fn path(&self) -> &Path;
}

/// Per-thread source of reads.
pub trait ReadSupplier: Send {
    /// The next read, valid until the following call; `Ok(None)` once this
    /// supplier's share of the input is exhausted.
    fn next_read(&mut self) -> Result<Option<&mut Read>>;

    fn release_batch(&mut self, batch: DataBatch) -> Result<()>;
}

/// Per-thread source of mate pairs.
pub trait PairedReadSupplier: Send {
    fn next_read_pair(&mut self) -> Result<Option<(&mut Read, &mut Read)>>;

    fn release_batch(&mut self, batch: DataBatch) -> Result<()>;
}

/// Hands out one [`ReadSupplier`] per worker thread. May be called concurrently.
pub trait ReadSupplierGenerator: Send + Sync {
    fn generate(&self) -> Result<Box<dyn ReadSupplier>>;
}

pub trait PairedReadSupplierGenerator: Send + Sync {
    fn generate(&self) -> Result<Box<dyn PairedReadSupplier>>;
}

/// Builds a reader over `(start, length)` of an input.
pub type ReadReaderFactory = Arc<dyn Fn(u64, u64) -> Result<Box<dyn ReadReader>> + Send + Sync>;
pub type PairedReadReaderFactory =
    Arc<dyn Fn(u64, u64) -> Result<Box<dyn PairedReadReader>> + Send + Sync>;

/// Divides `[0, file_size)` into `partitions` contiguous half-open ranges and
/// hands each out once.
#[derive(Debug)]
pub struct RangeSplitter {
    file_size: u64,
    partitions: u64,
    next: AtomicU64,
}

impl RangeSplitter {
    pub fn new(file_size: u64, partitions: usize) -> Self {
        Self { file_size, partitions: partitions.max(1) as u64, next: AtomicU64::new(0) }
    }

    /// Bounds of partition `i`: `[i·L/N, (i+1)·L/N)`.
    pub fn range(&self, i: u64) -> (u64, u64) {
        let (size, parts) = (u128::from(self.file_size), u128::from(self.partitions));
        let bound = |k: u64| (u128::from(k) * size / parts) as u64;
        (bound(i), bound(i + 1))
    }

    /// The next unclaimed range as `(start, length)`, or `None` once all have
    /// been handed out.
    pub fn next_range(&self) -> Option<(u64, u64)> {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        if i >= self.partitions {
            return None;
        }
        let (start, end) = self.range(i);
        Some((start, end - start))
    }

    pub fn partitions(&self) -> usize {
        self.partitions as usize
    }
}

/// Supplier that never yields anything.
#[derive(Debug, Default)]
pub struct EmptySupplier;

impl ReadSupplier for EmptySupplier {
    fn next_read(&mut self) -> Result<Option<&mut Read>> {
        Ok(None)
    }

    fn release_batch(&mut self, batch: DataBatch) -> Result<()> {
        Err(ReadError::BatchRelease { batch, reason: "empty supplier handed out no reads" })
    }
}

impl PairedReadSupplier for EmptySupplier {
    fn next_read_pair(&mut self) -> Result<Option<(&mut Read, &mut Read)>> {
        Ok(None)
    }

    fn release_batch(&mut self, batch: DataBatch) -> Result<()> {
        Err(ReadError::BatchRelease { batch, reason: "empty supplier handed out no reads" })
    }
}

/// Generator that gives each worker its own byte range of one file.
pub struct RangeSplittingReadSupplierGenerator {
    path: PathBuf,
    splitter: RangeSplitter,
    factory: ReadReaderFactory,
}

impl RangeSplittingReadSupplierGenerator {
    pub fn new(
        path: &Path,
        file_size: u64,
        partitions: usize,
        factory: ReadReaderFactory,
    ) -> Self {
        let splitter = RangeSplitter::new(file_size, partitions);
        log::debug!(
            "{}: splitting {} bytes into {} ranges",
            path.display(),
            file_size,
            splitter.partitions
        );
        Self { path: path.to_path_buf(), splitter, factory }
    }
}

impl ReadSupplierGenerator for RangeSplittingReadSupplierGenerator {
    fn generate(&self) -> Result<Box<dyn ReadSupplier>> {
        match self.splitter.next_range() {
            Some((start, length)) if length > 0 => {
                let end = start + length;
                log::debug!("{}: supplier for [{start}, {end})", self.path.display());
                let reader = (self.factory)(start, length)?;
                Ok(Box::new(RangeSplittingReadSupplier { reader, read: Read::new() }))
            }
            _ => Ok(Box::new(EmptySupplier)),
        }
    }
}

/// One worker's view of its byte range.
pub struct RangeSplittingReadSupplier {
    reader: Box<dyn ReadReader>,
    read: Read,
}

impl ReadSupplier for RangeSplittingReadSupplier {
    fn next_read(&mut self) -> Result<Option<&mut Read>> {
        if self.reader.next_read(&mut self.read)? {
            Ok(Some(&mut self.read))
        } else {
            Ok(None)
        }
    }

    fn release_batch(&mut self, batch: DataBatch) -> Result<()> {
        self.reader.release_batch(batch)
    }
}

impl Drop for RangeSplittingReadSupplier {
    fn drop(&mut self) {
        self.reader.ledger().report_leaks(self.reader.path());
    }
}

/// Paired counterpart of [`RangeSplittingReadSupplierGenerator`].
pub struct RangeSplittingPairedReadSupplierGenerator {
    path: PathBuf,
    splitter: RangeSplitter,
    factory: PairedReadReaderFactory,
}

impl RangeSplittingPairedReadSupplierGenerator {
    pub fn new(
        path: &Path,
        file_size: u64,
        partitions: usize,
        factory: PairedReadReaderFactory,
    ) -> Self {
        let splitter = RangeSplitter::new(file_size, partitions);
        log::debug!(
            "{}: splitting {} bytes into {} paired ranges",
            path.display(),
            file_size,
            splitter.partitions
        );
        Self { path: path.to_path_buf(), splitter, factory }
    }
}

impl PairedReadSupplierGenerator for RangeSplittingPairedReadSupplierGenerator {
    fn generate(&self) -> Result<Box<dyn PairedReadSupplier>> {
        match self.splitter.next_range() {
            Some((start, length)) if length > 0 => {
                let end = start + length;
                log::debug!("{}: paired supplier for [{start}, {end})", self.path.display());
                let reader = (self.factory)(start, length)?;
                let reads = [Read::new(), Read::new()];
                Ok(Box::new(RangeSplittingPairedReadSupplier { reader, reads }))
            }
            _ => Ok(Box::new(EmptySupplier)),
        }
    }
}

pub struct RangeSplittingPairedReadSupplier {
    reader: Box<dyn PairedReadReader>,
    reads: [Read; 2],
}

impl PairedReadSupplier for RangeSplittingPairedReadSupplier {
    fn next_read_pair(&mut self) -> Result<Option<(&mut Read, &mut Read)>> {
        let [read0, read1] = &mut self.reads;
        if self.reader.next_read_pair(read0, read1)? {
            Ok(Some((read0, read1)))
        } else {
            Ok(None)
        }
    }

    fn release_batch(&mut self, batch: DataBatch) -> Result<()> {
        self.reader.release_batch(batch)
    }
}

impl Drop for RangeSplittingPairedReadSupplier {
    fn drop(&mut self) {
        self.reader.ledger().report_leaks(self.reader.path());
    }
}
