//! Producer queue: one background thread parses sequentially, workers dequeue.
//!
//! Used where byte ranges cannot be split independently (standard input, gzip,
//! mismatched paired files). The producer fills `Vec` batches of reads and
//! pushes them into a bounded `crossbeam-channel`; a full channel blocks the
//! producer, so parsing never runs unboundedly ahead of alignment. Each batch is
//! received by exactly one supplier, so no read is dropped or duplicated.
//!
//! A producer error is stored in a shared slot before the channel closes;
//! suppliers report it as [`ReadError::Producer`] once the queue is drained.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, never, Receiver};
use parking_lot::Mutex;

use crate::data::{BatchLedger, DataBatch};
use crate::error::{ReadError, Result};
use crate::read::Read;
use crate::supplier::{
    PairedReadReader, PairedReadSupplier, PairedReadSupplierGenerator, ReadReader, ReadSupplier,
    ReadSupplierGenerator,
};

/// Reads (or pairs) per queued batch unless configured otherwise.
pub const DEFAULT_READS_PER_BATCH: usize = 1024;

/// Queue sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueSettings {
    /// Batches that may wait in the channel.
    pub depth: usize,
    pub reads_per_batch: usize,
}

impl QueueSettings {
    /// Two waiting batches per worker thread.
    pub fn for_threads(threads: usize) -> Self {
        Self { depth: 2 * threads.max(1), reads_per_batch: DEFAULT_READS_PER_BATCH }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::for_threads(1)
    }
}

type FailureSlot = Arc<Mutex<Option<String>>>;

/// Fills the failure slot if the producer unwinds, so consumers see an error
/// instead of a short input.
struct PanicGuard(FailureSlot);

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().get_or_insert_with(|| "producer thread panicked".to_string());
        }
    }
}

struct ProducerQueue<T> {
    receiver: Receiver<Vec<T>>,
    producer: Option<JoinHandle<()>>,
    failure: FailureSlot,
    ledger: BatchLedger,
    path: PathBuf,
}

impl<T: Send + 'static> ProducerQueue<T> {
    fn start<F>(path: &Path, ledger: BatchLedger, settings: QueueSettings, mut next: F) -> Self
    where
        F: FnMut() -> Result<Option<T>> + Send + 'static,
    {
        let (tx, rx) = bounded::<Vec<T>>(settings.depth.max(1));
        let failure: FailureSlot = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&failure);
        let per_batch = settings.reads_per_batch.max(1);
        let label = path.display().to_string();

        let producer = std::thread::spawn(move || {
            // dropped before `tx`, so the slot is set before the channel closes
            let _guard = PanicGuard(Arc::clone(&slot));
            let mut produced = 0usize;
            loop {
                let mut batch = Vec::with_capacity(per_batch);
                let mut done = false;
                while batch.len() < per_batch {
                    match next() {
                        Ok(Some(item)) => batch.push(item),
                        Ok(None) => {
                            done = true;
                            break;
                        }
                        Err(e) => {
                            *slot.lock() = Some(e.to_string());
                            done = true;
                            break;
                        }
                    }
                }
                produced += batch.len();
                if !batch.is_empty() && tx.send(batch).is_err() {
                    log::debug!("{label}: all consumers gone, producer stopping");
                    break;
                }
                if done {
                    break;
                }
            }
            log::debug!("{label}: producer finished after {produced} records");
        });

        Self { receiver: rx, producer: Some(producer), failure, ledger, path: path.to_path_buf() }
    }

    fn cursor(&self) -> QueueCursor<T> {
        QueueCursor {
            receiver: self.receiver.clone(),
            current: Vec::new(),
            position: 0,
            failure: Arc::clone(&self.failure),
        }
    }
}

impl<T> Drop for ProducerQueue<T> {
    /// Joins the producer. Suppliers created by this queue must be dropped first.
    fn drop(&mut self) {
        drop(std::mem::replace(&mut self.receiver, never()));
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                log::error!("{}: queue producer panicked", self.path.display());
            }
        }
        self.ledger.report_leaks(&self.path);
    }
}

struct QueueCursor<T> {
    receiver: Receiver<Vec<T>>,
    current: Vec<T>,
    position: usize,
    failure: FailureSlot,
}

impl<T> QueueCursor<T> {
    fn next(&mut self) -> Result<Option<&mut T>> {
        while self.position >= self.current.len() {
            match self.receiver.recv() {
                Ok(batch) => {
                    self.current = batch;
                    self.position = 0;
                }
                Err(_) => {
                    self.current.clear();
                    self.position = 0;
                    return match self.failure.lock().as_ref() {
                        Some(message) => Err(ReadError::Producer(message.clone())),
                        None => Ok(None),
                    };
                }
            }
        }
        self.position += 1;
        Ok(Some(&mut self.current[self.position - 1]))
    }
}

/// Queue-backed generator of single-read suppliers.
pub struct ReadSupplierQueue {
    inner: ProducerQueue<Read>,
}

impl ReadSupplierQueue {
    /// Start the producer thread on `reader`.
    pub fn start(mut reader: Box<dyn ReadReader>, settings: QueueSettings) -> Self {
        let ledger = reader.ledger();
        let path = reader.path().to_path_buf();
        let inner = ProducerQueue::start(&path, ledger, settings, move || {
            let mut read = Read::new();
            Ok(reader.next_read(&mut read)?.then_some(read))
        });
        Self { inner }
    }
}

impl ReadSupplierGenerator for ReadSupplierQueue {
    fn generate(&self) -> Result<Box<dyn ReadSupplier>> {
        Ok(Box::new(QueueReadSupplier {
            cursor: self.inner.cursor(),
            ledger: self.inner.ledger.clone(),
        }))
    }
}

struct QueueReadSupplier {
    cursor: QueueCursor<Read>,
    ledger: BatchLedger,
}

impl ReadSupplier for QueueReadSupplier {
    fn next_read(&mut self) -> Result<Option<&mut Read>> {
        self.cursor.next()
    }

    fn release_batch(&mut self, batch: DataBatch) -> Result<()> {
        self.ledger.release(batch)
    }
}

/// Queue-backed generator of pair suppliers.
pub struct PairedReadSupplierQueue {
    inner: ProducerQueue<(Read, Read)>,
}

impl PairedReadSupplierQueue {
    pub fn start(mut reader: Box<dyn PairedReadReader>, settings: QueueSettings) -> Self {
        let ledger = reader.ledger();
        let path = reader.path().to_path_buf();
        let inner = ProducerQueue::start(&path, ledger, settings, move || {
            let (mut read0, mut read1) = (Read::new(), Read::new());
            Ok(reader.next_read_pair(&mut read0, &mut read1)?.then_some((read0, read1)))
        });
        Self { inner }
    }
}

impl PairedReadSupplierGenerator for PairedReadSupplierQueue {
    fn generate(&self) -> Result<Box<dyn PairedReadSupplier>> {
        Ok(Box::new(QueuePairedReadSupplier {
            cursor: self.inner.cursor(),
            ledger: self.inner.ledger.clone(),
        }))
    }
}

struct QueuePairedReadSupplier {
    cursor: QueueCursor<(Read, Read)>,
    ledger: BatchLedger,
}

impl PairedReadSupplier for QueuePairedReadSupplier {
    fn next_read_pair(&mut self) -> Result<Option<(&mut Read, &mut Read)>> {
        Ok(self.cursor.next()?.map(|(read0, read1)| (read0, read1)))
    }

    fn release_batch(&mut self, batch: DataBatch) -> Result<()> {
        self.ledger.release(batch)
    }
}
