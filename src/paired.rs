//! Paired-end FASTQ: two parallel files, or one interleaved file.
//!
//! Two-file input reads one record from each file per pair and requires both
//! files to end together. Interleaved input stores mates back to back with ids
//! ending `/1` and `/2`; a partition that starts on a `/2` drops it, since its
//! `/1` belongs to the previous partition, which reads past its range end to
//! finish the pair.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::boundary;
use crate::context::ReaderContext;
use crate::data::{self, BatchLedger, DataBatch, DataReader, DataSupplier, SourceSpec};
use crate::error::{ReadError, Result};
use crate::fastq::{next_window, parse_record, FastqReader};
use crate::queue::{PairedReadSupplierQueue, QueueSettings};
use crate::read::Read;
use crate::supplier::{
    PairedReadReader, PairedReadReaderFactory, PairedReadSupplierGenerator,
    RangeSplittingPairedReadSupplierGenerator, ReadReader,
};

/// The `1` or `2` of a trailing `/1` or `/2`, if present.
pub fn mate_suffix(id: &[u8]) -> Option<u8> {
    match id {
        [.., b'/', n @ (b'1' | b'2')] => Some(*n),
        _ => None,
    }
}

/// Mates from two files read in lockstep.
pub struct PairedFastqReader {
    readers: [FastqReader; 2],
    second_file_id: u32,
    paths: [PathBuf; 2],
}

impl PairedFastqReader {
    /// Open both files on the same byte range. The two files share `spec`'s
    /// ledger; the second uses `spec.file_id + 1`.
    pub fn create(
        spec: &SourceSpec,
        paths: [&Path; 2],
        start: u64,
        length: u64,
        context: &ReaderContext,
    ) -> Result<Self> {
        Self::create_with(spec, spec, paths, start, length, context)
    }

    /// As [`PairedFastqReader::create`] with a different source kind per file.
    /// Both specs must share one ledger.
    pub fn create_with(
        spec0: &SourceSpec,
        spec1: &SourceSpec,
        paths: [&Path; 2],
        start: u64,
        length: u64,
        context: &ReaderContext,
    ) -> Result<Self> {
        let second_file_id = spec0.file_id + 1;
        let spec1 = SourceSpec { ledger: spec0.ledger.clone(), ..spec1.clone() }
            .with_file_id(second_file_id);
        let first = FastqReader::create(spec0, paths[0], start, length, context.clone())?;
        let second = FastqReader::create(&spec1, paths[1], start, length, context.clone())?;
        Ok(Self {
            readers: [first, second],
            second_file_id,
            paths: [paths[0].to_path_buf(), paths[1].to_path_buf()],
        })
    }

    /// Generator for a two-file pair. Range splitting needs both files plain,
    /// seekable and of equal size; anything else goes through a queue.
    pub fn create_paired_read_supplier_generator(
        specs: [&SourceSpec; 2],
        paths: [&Path; 2],
        partitions: usize,
        context: &ReaderContext,
        queue: QueueSettings,
    ) -> Result<Box<dyn PairedReadSupplierGenerator>> {
        let splittable = specs.iter().all(|s| s.supplier == DataSupplier::Mapped);
        let sizes = if splittable {
            Some((data::file_size(paths[0])?, data::file_size(paths[1])?))
        } else {
            None
        };

        match sizes {
            Some((size0, size1)) if size0 == size1 => {
                log::info!("FASTQ using range splitter");
                let spec = specs[0].clone();
                let owned: [PathBuf; 2] = [paths[0].to_path_buf(), paths[1].to_path_buf()];
                let ctx = context.clone();
                let factory: PairedReadReaderFactory = Arc::new(move |start, length| {
                    let spec = spec.with_fresh_ledger();
                    let paths = [owned[0].as_path(), owned[1].as_path()];
                    let reader = PairedFastqReader::create(&spec, paths, start, length, &ctx)?;
                    Ok(Box::new(reader) as Box<dyn PairedReadReader>)
                });
                Ok(Box::new(RangeSplittingPairedReadSupplierGenerator::new(
                    paths[0], size0, partitions, factory,
                )))
            }
            _ => {
                log::info!("FASTQ using supplier queue");
                let reader = PairedFastqReader::create_with(
                    specs[0], specs[1], paths, 0, u64::MAX, context,
                )?;
                Ok(Box::new(PairedReadSupplierQueue::start(Box::new(reader), queue)))
            }
        }
    }
}

impl PairedReadReader for PairedFastqReader {
    fn next_read_pair(&mut self, read0: &mut Read, read1: &mut Read) -> Result<bool> {
        let first = self.readers[0].next_read(read0)?;
        let second = self.readers[1].next_read(read1)?;
        if first != second {
            return Err(ReadError::PairedFilesDiffer {
                first: self.paths[0].clone(),
                second: self.paths[1].clone(),
            });
        }
        Ok(first)
    }

    fn reinit(&mut self, start: u64, length: u64) -> Result<()> {
        for reader in &mut self.readers {
            reader.reinit(start, length)?;
        }
        Ok(())
    }

    fn release_batch(&mut self, batch: DataBatch) -> Result<()> {
        let which = usize::from(batch.file_id == self.second_file_id);
        self.readers[which].release_batch(batch)
    }

    fn ledger(&self) -> BatchLedger {
        self.readers[0].ledger()
    }

    fn path(&self) -> &Path {
        &self.paths[0]
    }
}

/// Mates stored as consecutive `/1`, `/2` records of one file.
pub struct InterleavedFastqReader {
    data: Box<dyn DataReader>,
    context: ReaderContext,
}

impl InterleavedFastqReader {
    pub fn create(
        spec: &SourceSpec,
        path: &Path,
        start: u64,
        length: u64,
        context: ReaderContext,
    ) -> Result<Self> {
        // the window must hold a whole pair past the cursor
        let mut data = spec.data_reader(2);
        data.init(path)?;
        let mut reader = Self { data, context };
        reader.reinit(start, length)?;
        Ok(reader)
    }

    /// Range splitting for plain files, a queue for gzip and standard input.
    pub fn create_paired_read_supplier_generator(
        spec: &SourceSpec,
        path: &Path,
        partitions: usize,
        context: &ReaderContext,
        queue: QueueSettings,
    ) -> Result<Box<dyn PairedReadSupplierGenerator>> {
        match spec.supplier {
            DataSupplier::Mapped => {
                log::info!("interleaved FASTQ using range splitter");
                let size = data::file_size(path)?;
                let factory_spec = spec.clone();
                let factory_path = path.to_path_buf();
                let ctx = context.clone();
                let factory: PairedReadReaderFactory = Arc::new(move |start, length| {
                    let spec = factory_spec.with_fresh_ledger();
                    let reader = InterleavedFastqReader::create(
                        &spec,
                        &factory_path,
                        start,
                        length,
                        ctx.clone(),
                    )?;
                    Ok(Box::new(reader) as Box<dyn PairedReadReader>)
                });
                Ok(Box::new(RangeSplittingPairedReadSupplierGenerator::new(
                    path, size, partitions, factory,
                )))
            }
            DataSupplier::Stream { .. } => {
                log::info!("interleaved FASTQ using supplier queue");
                let reader =
                    InterleavedFastqReader::create(spec, path, 0, u64::MAX, context.clone())?;
                Ok(Box::new(PairedReadSupplierQueue::start(Box::new(reader), queue)))
            }
        }
    }

    fn odd_record(&self, read: &Read) -> ReadError {
        ReadError::OddRecordCount {
            path: self.data.path().to_path_buf(),
            id: String::from_utf8_lossy(read.id()).into_owned(),
        }
    }
}

impl PairedReadReader for InterleavedFastqReader {
    fn next_read_pair(&mut self, read0: &mut Read, read1: &mut Read) -> Result<bool> {
        let Some(window) = next_window(self.data.as_mut())? else {
            return Ok(false);
        };
        let Some(first) = parse_record(&window, read0, &self.context, self.data.as_ref())? else {
            self.data.advance(window.len());
            return Ok(false);
        };
        if first == window.len() {
            return Err(self.odd_record(read0));
        }
        let rest = window.skip(first);
        let Some(second) = parse_record(&rest, read1, &self.context, self.data.as_ref())? else {
            return Err(self.odd_record(read0));
        };

        if mate_suffix(read0.id()) != Some(b'1') {
            return Err(ReadError::desync(
                self.data.path(),
                read0.id(),
                "first read of pair doesn't have ID ending with /1",
            ));
        }
        if mate_suffix(read1.id()) != Some(b'2') {
            return Err(ReadError::desync(
                self.data.path(),
                read1.id(),
                "second read of pair doesn't have ID ending with /2",
            ));
        }

        read0.set_batch(self.data.acquire_batch());
        read1.set_batch(self.data.acquire_batch());
        self.data.advance(first + second);
        Ok(true)
    }

    /// Position on the first `/1` of the range. A leading `/2` is dropped; the
    /// record after it must be a `/1`. A range holding nothing after the
    /// dropped `/2` is empty.
    fn reinit(&mut self, start: u64, length: u64) -> Result<()> {
        self.data.reinit(start, length)?;
        if next_window(self.data.as_mut())?.is_none() {
            return Ok(());
        }
        if start != 0 && !boundary::skip_partial_record(self.data.as_mut()) {
            return Ok(());
        }

        let Some(window) = next_window(self.data.as_mut())? else {
            return Ok(());
        };
        let mut read = Read::new();
        let parsed = parse_record(&window, &mut read, &self.context, self.data.as_ref())?;
        let Some(consumed) = parsed else {
            return Ok(());
        };
        match mate_suffix(read.id()) {
            None => Err(ReadError::desync(
                self.data.path(),
                read.id(),
                "read ID doesn't end with /1 or /2; not usable as interleaved paired input",
            )),
            Some(b'2') => {
                log::debug!(
                    "{}: dropping trailing mate '{}' at offset {}",
                    self.data.path().display(),
                    String::from_utf8_lossy(read.id()),
                    self.data.file_offset()
                );
                self.data.advance(consumed);
                let Some(window) = next_window(self.data.as_mut())? else {
                    return Ok(());
                };
                if parse_record(&window, &mut read, &self.context, self.data.as_ref())?.is_none() {
                    return Ok(());
                }
                if mate_suffix(read.id()) != Some(b'1') {
                    return Err(ReadError::desync(
                        self.data.path(),
                        read.id(),
                        "first read of pair doesn't have ID ending with /1",
                    ));
                }
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    fn release_batch(&mut self, batch: DataBatch) -> Result<()> {
        self.data.release_batch(batch)
    }

    fn ledger(&self) -> BatchLedger {
        self.data.ledger().clone()
    }

    fn path(&self) -> &Path {
        self.data.path()
    }
}
