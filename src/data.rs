//! Byte sources underneath the record parsers.
//!
//! A [`DataReader`] exposes a sliding window over a file (or a stream) together
//! with a batch handle for the chunk the window currently sits in. Two concrete
//! readers are provided:
//!
//! - [`MappedDataReader`]: the whole file is memory mapped and a half-open byte
//!   range is processed. The window always extends `overflow` bytes past the
//!   cursor (file size permitting), so a record that *starts* inside the range is
//!   parsed completely even when it ends past the range.
//! - [`StreamDataReader`]: plain files, gzip files and standard input read
//!   sequentially into freshly allocated chunks. Each refill is a new batch.
//!
//! ### Batches
//! Every read handed out by a parser references the bytes of one batch and
//! counts as one acquisition in the reader's [`BatchLedger`]. Consumers must
//! release each read's batch exactly once. The bytes themselves are shared via
//! `Arc`, so nothing is reclaimed while a read still points at it; the ledger
//! enforces the release convention and reports leaks at teardown.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read as IoRead};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::MultiGzDecoder;
use memmap2::Mmap;
use parking_lot::Mutex;

use crate::error::{ReadError, Result};

/// Default bytes per batch.
pub const DEFAULT_BATCH_SIZE: usize = 4 * 1024 * 1024;
/// Default upper bound on the size of a single FASTQ record.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 1024 * 1024;

/// Opaque handle for the chunk of input bytes backing a set of reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DataBatch {
    pub file_id: u32,
    pub batch_no: u64,
}

impl fmt::Display for DataBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_id, self.batch_no)
    }
}

/// Bytes of one batch: either the mapped file or a heap chunk.
pub enum BatchBytes {
    Mapped(Mmap),
    Heap(Vec<u8>),
}

impl Deref for BatchBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            BatchBytes::Mapped(m) => &m[..],
            BatchBytes::Heap(v) => v.as_slice(),
        }
    }
}

impl fmt::Debug for BatchBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchBytes::Mapped(m) => write!(f, "Mapped({} bytes)", m.len()),
            BatchBytes::Heap(v) => write!(f, "Heap({} bytes)", v.len()),
        }
    }
}

/// The readable bytes at the reader's cursor, plus the shared buffer they live in.
#[derive(Clone, Debug)]
pub struct DataWindow {
    backing: Arc<BatchBytes>,
    start: usize,
    end: usize,
}

impl DataWindow {
    pub fn new(backing: Arc<BatchBytes>, start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= backing.len());
        Self { backing, start, end }
    }

    /// Window over an owned byte vector (tests and one-off parses).
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let end = bytes.len();
        Self { backing: Arc::new(BatchBytes::Heap(bytes)), start: 0, end }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.backing[self.start..self.end]
    }

    /// Offset of the window's first byte within [`DataWindow::backing`].
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn backing(&self) -> &Arc<BatchBytes> {
        &self.backing
    }

    /// The same buffer, starting `n` bytes further in.
    pub fn skip(&self, n: usize) -> DataWindow {
        let start = (self.start + n).min(self.end);
        DataWindow { backing: Arc::clone(&self.backing), start, end: self.end }
    }
}

/// Acquisition counts per batch, shared between a reader and whoever releases
/// its reads (possibly on other threads).
#[derive(Clone, Debug, Default)]
pub struct BatchLedger {
    counts: Arc<Mutex<HashMap<DataBatch, usize>>>,
}

impl BatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, batch: DataBatch) {
        *self.counts.lock().entry(batch).or_insert(0) += 1;
    }

    /// Release one acquisition of `batch`.
    ///
    /// # Errors
    /// [`ReadError::BatchRelease`] if the batch has no outstanding acquisition.
    pub fn release(&self, batch: DataBatch) -> Result<()> {
        let mut counts = self.counts.lock();
        match counts.get_mut(&batch) {
            Some(n) if *n > 1 => {
                *n -= 1;
                Ok(())
            }
            Some(_) => {
                counts.remove(&batch);
                Ok(())
            }
            None => Err(ReadError::BatchRelease {
                batch,
                reason: "released more times than acquired",
            }),
        }
    }

    /// Total acquisitions not yet released.
    pub fn outstanding(&self) -> usize {
        self.counts.lock().values().sum()
    }

    /// Log any batches still held; called when a reader is torn down.
    pub fn report_leaks(&self, path: &Path) {
        let counts = self.counts.lock();
        if !counts.is_empty() {
            let reads: usize = counts.values().sum();
            log::warn!(
                "{}: {} batch(es) still referenced by {} unreleased read(s)",
                path.display(),
                counts.len(),
                reads
            );
        }
    }
}

/// The byte-source contract the record parsers consume.
pub trait DataReader: Send {
    /// Open `path`.
    fn init(&mut self, path: &Path) -> Result<()>;

    /// Position at `start` and process `length` bytes from there.
    fn reinit(&mut self, start: u64, length: u64) -> Result<()>;

    /// Bytes available at the cursor, or `None` if the current batch is drained
    /// (call [`DataReader::next_batch`]) or the range is finished.
    fn data(&mut self) -> Option<DataWindow>;

    fn advance(&mut self, bytes: usize);

    fn next_batch(&mut self) -> Result<()>;

    /// `true` once no bytes exist beyond the current window.
    fn is_eof(&self) -> bool;

    fn file_offset(&self) -> u64;

    /// Handle for the batch at the cursor.
    fn batch(&self) -> DataBatch;

    fn ledger(&self) -> &BatchLedger;

    fn path(&self) -> &Path;

    /// `true` when the cursor sits at the beginning of a line.
    fn at_line_start(&self) -> bool;

    /// Count one more read against the current batch and return its handle.
    fn acquire_batch(&self) -> DataBatch {
        let batch = self.batch();
        self.ledger().acquire(batch);
        batch
    }

    fn release_batch(&mut self, batch: DataBatch) -> Result<()> {
        self.ledger().release(batch)
    }
}

/// Window sizing shared by all data readers of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferSizes {
    pub batch_size: usize,
    pub max_record_bytes: usize,
}

impl Default for BufferSizes {
    fn default() -> Self {
        Self { batch_size: DEFAULT_BATCH_SIZE, max_record_bytes: DEFAULT_MAX_RECORD_BYTES }
    }
}

/// Which kind of [`DataReader`] to build for an input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataSupplier {
    /// Memory-mapped, seekable, uncompressed file.
    Mapped,
    /// Sequential stream; optionally gzip, optionally standard input.
    Stream { gzip: bool, stdin: bool },
}

impl DataSupplier {
    /// Pick the reader kind for an input.
    pub fn for_input(compressed: bool, stdin: bool) -> Self {
        if compressed || stdin {
            DataSupplier::Stream { gzip: compressed, stdin }
        } else {
            DataSupplier::Mapped
        }
    }

    /// Build a reader whose window holds at least `records_per_window` maximal
    /// records past the cursor, counting acquisitions in `ledger`.
    pub fn data_reader(
        &self,
        file_id: u32,
        sizes: BufferSizes,
        records_per_window: usize,
        ledger: BatchLedger,
    ) -> Box<dyn DataReader> {
        let overflow = sizes.max_record_bytes * records_per_window.max(1);
        match *self {
            DataSupplier::Mapped => {
                let reader = MappedDataReader::new(file_id, sizes.batch_size, overflow);
                Box::new(reader.with_ledger(ledger))
            }
            DataSupplier::Stream { gzip, stdin } => {
                let reader =
                    StreamDataReader::new(file_id, sizes.batch_size, overflow, gzip, stdin);
                Box::new(reader.with_ledger(ledger))
            }
        }
    }
}

/// Everything needed to open a data reader on one input file.
#[derive(Clone, Debug)]
pub struct SourceSpec {
    pub supplier: DataSupplier,
    pub sizes: BufferSizes,
    pub file_id: u32,
    /// Shared by all readers whose batches are released through one channel
    /// (both files of a pair, or a queue's producer and its consumers).
    pub ledger: BatchLedger,
}

impl SourceSpec {
    pub fn new(supplier: DataSupplier, sizes: BufferSizes) -> Self {
        Self { supplier, sizes, file_id: 0, ledger: BatchLedger::new() }
    }

    pub fn with_file_id(mut self, file_id: u32) -> Self {
        self.file_id = file_id;
        self
    }

    /// The same source with its own, empty ledger.
    pub fn with_fresh_ledger(&self) -> Self {
        Self { ledger: BatchLedger::new(), ..self.clone() }
    }

    pub fn data_reader(&self, records_per_window: usize) -> Box<dyn DataReader> {
        self.supplier.data_reader(self.file_id, self.sizes, records_per_window, self.ledger.clone())
    }
}

/// Size of a file in bytes.
pub fn file_size(path: &Path) -> Result<u64> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|source| ReadError::Open { path: path.to_path_buf(), source })
}

/// Reader over a memory-mapped file and a half-open byte range of it.
pub struct MappedDataReader {
    path: PathBuf,
    file_id: u32,
    map: Arc<BatchBytes>,
    range_start: usize,
    range_end: usize,
    cursor: usize,
    batch_size: usize,
    overflow: usize,
    ledger: BatchLedger,
}

impl MappedDataReader {
    pub fn new(file_id: u32, batch_size: usize, overflow: usize) -> Self {
        Self {
            path: PathBuf::new(),
            file_id,
            map: Arc::new(BatchBytes::Heap(Vec::new())),
            range_start: 0,
            range_end: 0,
            cursor: 0,
            batch_size: batch_size.max(1),
            overflow,
            ledger: BatchLedger::new(),
        }
    }

    pub fn with_ledger(mut self, ledger: BatchLedger) -> Self {
        self.ledger = ledger;
        self
    }

    fn window_end(&self) -> usize {
        self.cursor
            .saturating_add(self.batch_size)
            .saturating_add(self.overflow)
            .min(self.map.len())
    }
}

impl DataReader for MappedDataReader {
    #[allow(unsafe_code)]
    fn init(&mut self, path: &Path) -> Result<()> {
        self.path = path.to_path_buf();
        let file = File::open(path)
            .map_err(|source| ReadError::Open { path: self.path.clone(), source })?;
        let len = file
            .metadata()
            .map_err(|source| ReadError::Io { path: self.path.clone(), source })?
            .len();
        self.map = if len == 0 {
            Arc::new(BatchBytes::Heap(Vec::new()))
        } else {
            // SAFETY: the mapping is read-only; the input is assumed not to be
            // truncated while the run is in progress.
            let map = unsafe { Mmap::map(&file) }
                .map_err(|source| ReadError::Open { path: self.path.clone(), source })?;
            Arc::new(BatchBytes::Mapped(map))
        };
        self.range_start = 0;
        self.range_end = self.map.len();
        self.cursor = 0;
        Ok(())
    }

    fn reinit(&mut self, start: u64, length: u64) -> Result<()> {
        let len = self.map.len();
        let start = usize::try_from(start).unwrap_or(usize::MAX).min(len);
        let length = usize::try_from(length).unwrap_or(usize::MAX);
        self.range_start = start;
        self.range_end = start.saturating_add(length).min(len);
        self.cursor = start;
        log::debug!(
            "{}: processing bytes [{}, {})",
            self.path.display(),
            self.range_start,
            self.range_end
        );
        Ok(())
    }

    fn data(&mut self) -> Option<DataWindow> {
        if self.cursor >= self.range_end {
            return None;
        }
        Some(DataWindow::new(Arc::clone(&self.map), self.cursor, self.window_end()))
    }

    fn advance(&mut self, bytes: usize) {
        self.cursor = (self.cursor + bytes).min(self.map.len());
    }

    fn next_batch(&mut self) -> Result<()> {
        // The window slides with the cursor; there is nothing to refill.
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.window_end() >= self.map.len()
    }

    fn file_offset(&self) -> u64 {
        self.cursor as u64
    }

    fn batch(&self) -> DataBatch {
        let batch_no = ((self.cursor - self.range_start) / self.batch_size) as u64;
        DataBatch { file_id: self.file_id, batch_no }
    }

    fn ledger(&self) -> &BatchLedger {
        &self.ledger
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn at_line_start(&self) -> bool {
        self.cursor == 0 || self.map[self.cursor - 1] == b'\n'
    }
}

/// Sequential reader for plain files, gzip files and standard input.
pub struct StreamDataReader {
    path: PathBuf,
    file_id: u32,
    gzip: bool,
    stdin: bool,
    source: Option<Box<dyn IoRead + Send>>,
    chunk: Arc<BatchBytes>,
    cursor: usize,
    chunk_offset: u64,
    byte_before_chunk: Option<u8>,
    exhausted: bool,
    batch_no: u64,
    filled: bool,
    batch_size: usize,
    overflow: usize,
    ledger: BatchLedger,
}

impl StreamDataReader {
    pub fn new(file_id: u32, batch_size: usize, overflow: usize, gzip: bool, stdin: bool) -> Self {
        Self {
            path: PathBuf::new(),
            file_id,
            gzip,
            stdin,
            source: None,
            chunk: Arc::new(BatchBytes::Heap(Vec::new())),
            cursor: 0,
            chunk_offset: 0,
            byte_before_chunk: None,
            exhausted: false,
            batch_no: 0,
            filled: false,
            batch_size: batch_size.max(1),
            overflow,
            ledger: BatchLedger::new(),
        }
    }

    pub fn with_ledger(mut self, ledger: BatchLedger) -> Self {
        self.ledger = ledger;
        self
    }

    fn remaining(&self) -> usize {
        self.chunk.len() - self.cursor
    }

    /// Start a new batch: carry the unconsumed tail forward and read until the
    /// chunk is full or the source is exhausted.
    fn fill(&mut self) -> Result<()> {
        let capacity = self.batch_size + self.overflow;
        let mut buf = Vec::with_capacity(capacity);
        buf.extend_from_slice(&self.chunk[self.cursor..]);
        if self.cursor > 0 {
            self.byte_before_chunk = Some(self.chunk[self.cursor - 1]);
        }
        self.chunk_offset += self.cursor as u64;

        if let Some(source) = self.source.as_mut() {
            let mut scratch = vec![0u8; 64 * 1024];
            while buf.len() < capacity {
                let want = (capacity - buf.len()).min(scratch.len());
                match source.read(&mut scratch[..want]) {
                    Ok(0) => {
                        self.exhausted = true;
                        break;
                    }
                    Ok(n) => buf.extend_from_slice(&scratch[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(source) => return Err(ReadError::Io { path: self.path.clone(), source }),
                }
            }
        } else {
            self.exhausted = true;
        }
        if self.exhausted {
            self.source = None;
        }

        if self.filled {
            self.batch_no += 1;
        }
        self.filled = true;
        self.chunk = Arc::new(BatchBytes::Heap(buf));
        self.cursor = 0;
        Ok(())
    }

    /// Discard `n` bytes from the front of the stream.
    fn skip_bytes(&mut self, mut n: u64) -> Result<()> {
        while n > 0 {
            if self.remaining() == 0 {
                if self.exhausted {
                    return Ok(());
                }
                self.fill()?;
                continue;
            }
            let step = (self.remaining() as u64).min(n) as usize;
            self.cursor += step;
            n -= step as u64;
        }
        Ok(())
    }
}

impl DataReader for StreamDataReader {
    fn init(&mut self, path: &Path) -> Result<()> {
        self.path = path.to_path_buf();
        let raw: Box<dyn IoRead + Send> = if self.stdin {
            Box::new(std::io::stdin())
        } else {
            let file = File::open(path)
                .map_err(|source| ReadError::Open { path: self.path.clone(), source })?;
            Box::new(BufReader::new(file))
        };
        self.source = Some(if self.gzip {
            Box::new(MultiGzDecoder::new(BufReader::new(raw)))
        } else {
            raw
        });
        self.exhausted = false;
        self.filled = false;
        self.chunk = Arc::new(BatchBytes::Heap(Vec::new()));
        self.cursor = 0;
        self.chunk_offset = 0;
        self.byte_before_chunk = None;
        Ok(())
    }

    fn reinit(&mut self, start: u64, _length: u64) -> Result<()> {
        let position = self.file_offset();
        if start < position {
            return Err(ReadError::invalid_option(
                "start offset",
                format!(
                    "{} is a sequential source and is already at offset {position}",
                    self.path.display()
                ),
            ));
        }
        if !self.filled {
            self.fill()?;
        }
        self.skip_bytes(start - position)?;
        if !self.exhausted && self.remaining() < self.overflow {
            self.fill()?;
        }
        Ok(())
    }

    fn data(&mut self) -> Option<DataWindow> {
        let remaining = self.remaining();
        if remaining == 0 || (!self.exhausted && remaining < self.overflow) {
            return None;
        }
        Some(DataWindow::new(Arc::clone(&self.chunk), self.cursor, self.chunk.len()))
    }

    fn advance(&mut self, bytes: usize) {
        self.cursor = (self.cursor + bytes).min(self.chunk.len());
    }

    fn next_batch(&mut self) -> Result<()> {
        if self.exhausted {
            return Ok(());
        }
        self.fill()
    }

    fn is_eof(&self) -> bool {
        self.exhausted
    }

    fn file_offset(&self) -> u64 {
        self.chunk_offset + self.cursor as u64
    }

    fn batch(&self) -> DataBatch {
        DataBatch { file_id: self.file_id, batch_no: self.batch_no }
    }

    fn ledger(&self) -> &BatchLedger {
        &self.ledger
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn at_line_start(&self) -> bool {
        if self.cursor > 0 {
            return self.chunk[self.cursor - 1] == b'\n';
        }
        match self.byte_before_chunk {
            Some(b) => b == b'\n',
            None => true,
        }
    }
}

#[cfg(test)]
mod data_tests {
    use super::*;
    use std::io::Write;

    fn temp_file(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn ledger_enforces_single_release() {
        let ledger = BatchLedger::new();
        let b = DataBatch { file_id: 0, batch_no: 3 };
        ledger.acquire(b);
        ledger.acquire(b);
        assert_eq!(ledger.outstanding(), 2);
        ledger.release(b).unwrap();
        ledger.release(b).unwrap();
        assert_eq!(ledger.outstanding(), 0);
        assert!(matches!(ledger.release(b), Err(ReadError::BatchRelease { .. })));
    }

    #[test]
    fn mapped_reader_stops_at_range_end_but_window_overflows() {
        let f = temp_file(b"0123456789abcdef");
        let mut r = MappedDataReader::new(0, 4, 4);
        r.init(f.path()).unwrap();
        r.reinit(2, 4).unwrap();
        assert!(!r.at_line_start());
        let w = r.data().unwrap();
        assert_eq!(w.bytes(), b"23456789");
        r.advance(4);
        assert!(r.data().is_none());
        assert_eq!(r.file_offset(), 6);
    }

    #[test]
    fn mapped_reader_handles_empty_file() {
        let f = temp_file(b"");
        let mut r = MappedDataReader::new(0, 4, 4);
        r.init(f.path()).unwrap();
        r.reinit(0, 0).unwrap();
        assert!(r.data().is_none());
        assert!(r.is_eof());
    }

    #[test]
    fn stream_reader_refills_and_carries_tail() {
        let content: Vec<u8> = (0..100u8).collect();
        let f = temp_file(&content);
        let mut r = StreamDataReader::new(1, 16, 8, false, false);
        r.init(f.path()).unwrap();
        r.reinit(0, 0).unwrap();

        let mut seen = Vec::new();
        loop {
            let w = match r.data() {
                Some(w) => w,
                None => {
                    r.next_batch().unwrap();
                    match r.data() {
                        Some(w) => w,
                        None => break,
                    }
                }
            };
            let take = w.len().min(5);
            seen.extend_from_slice(&w.bytes()[..take]);
            r.advance(take);
        }
        assert_eq!(seen, content);
        assert!(r.batch().batch_no > 0);
        assert!(r.is_eof());
    }

    #[test]
    fn stream_reader_skips_forward_on_reinit() {
        let f = temp_file(b"abc\ndef\n");
        let mut r = StreamDataReader::new(0, 16, 4, false, false);
        r.init(f.path()).unwrap();
        r.reinit(4, 0).unwrap();
        assert!(r.at_line_start());
        assert_eq!(r.data().unwrap().bytes(), b"def\n");
        assert_eq!(r.file_offset(), 4);
    }

    #[test]
    fn gzip_stream_is_decompressed() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"@r\nACGT\n+\nIIII\n").unwrap();
        let gz = enc.finish().unwrap();
        let f = temp_file(&gz);
        let mut r = StreamDataReader::new(0, 1024, 64, true, false);
        r.init(f.path()).unwrap();
        r.reinit(0, 0).unwrap();
        assert_eq!(r.data().unwrap().bytes(), b"@r\nACGT\n+\nIIII\n");
    }
}
