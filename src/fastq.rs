//! FASTQ record parsing, the sequential FASTQ reader and a FASTQ writer.
//!
//! A record is four lines: `@<id>`, `<bases>`, `+[<id>]`, `<quality>`. Lines end
//! in `\n`, optionally preceded by `\r`. Parsing never copies: the resulting
//! [`Read`] points into the reader's current batch.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::alphabet;
use crate::boundary;
use crate::context::ReaderContext;
use crate::data::{self, BatchLedger, DataBatch, DataReader, DataSupplier, DataWindow, SourceSpec};
use crate::error::{ReadError, Result};
use crate::queue::{QueueSettings, ReadSupplierQueue};
use crate::read::{Read, MAX_READ_LENGTH};
use crate::supplier::{
    RangeSplittingReadSupplierGenerator, ReadReader, ReadReaderFactory, ReadSupplierGenerator,
};

const LINES_PER_RECORD: usize = 4;

/// DOS end-of-file marker occasionally left after the last record.
const DOS_EOF: u8 = 0x1a;

/// Parse one record from the start of `window` into `read`.
///
/// Returns the bytes consumed, or `None` when the window holds only a trailing
/// DOS end-of-file marker. `data` supplies the file name, offset, end-of-input
/// state and batch for diagnostics and bookkeeping; it is not advanced.
///
/// # Errors
/// - [`ReadError::Malformed`] for blank lines, wrong line starts, non-base
///   symbols, non-printable qualities or a quality/base length mismatch.
/// - [`ReadError::MissingFinalNewline`] when the input ends mid-record.
/// - [`ReadError::RecordTooLarge`] when the record does not fit the window.
pub fn parse_record(
    window: &DataWindow,
    read: &mut Read,
    context: &ReaderContext,
    data: &dyn DataReader,
) -> Result<Option<usize>> {
    let bytes = window.bytes();
    let offset = data.file_offset();
    let mut lines = [(0usize, 0usize); LINES_PER_RECORD];
    let mut scan = 0;

    for (i, line) in lines.iter_mut().enumerate() {
        let rest = &bytes[scan..];
        let Some(newline) = rest.iter().position(|&c| c == b'\n') else {
            if i == 0 && rest == &[DOS_EOF][..] && data.is_eof() {
                log::warn!(
                    "{}: ignoring DOS end-of-file marker at offset {}",
                    data.path().display(),
                    offset
                );
                return Ok(None);
            }
            if data.is_eof() {
                return Err(ReadError::MissingFinalNewline {
                    path: data.path().to_path_buf(),
                    offset: offset + scan as u64,
                });
            }
            return Err(ReadError::RecordTooLarge {
                path: data.path().to_path_buf(),
                offset,
                limit: bytes.len(),
            });
        };

        let len = if newline > 0 && rest[newline - 1] == b'\r' { newline - 1 } else { newline };
        if len == 0 {
            return Err(ReadError::malformed(data.path(), offset + scan as u64, "blank line"));
        }
        let valid_start = match i {
            0 => rest[0] == b'@',
            1 => alphabet::is_base(rest[0]),
            2 => rest[0] == b'+',
            _ => alphabet::is_quality(rest[0]),
        };
        if !valid_start {
            return Err(ReadError::malformed(
                data.path(),
                offset + scan as u64,
                format!(
                    "invalid starting character '{}' on line {} of record",
                    rest[0].escape_ascii(),
                    i + 1
                ),
            ));
        }
        *line = (scan, len);
        scan += newline + 1;
    }

    let (id_start, id_len) = lines[0];
    let (data_start, data_len) = lines[1];
    let (quality_start, quality_len) = lines[3];
    let sequence = &bytes[data_start..data_start + data_len];
    let quality = &bytes[quality_start..quality_start + quality_len];

    if !alphabet::is_base_line(sequence) {
        return Err(ReadError::malformed(
            data.path(),
            offset + data_start as u64,
            "unsupported base symbol",
        ));
    }
    if quality_len != data_len {
        return Err(ReadError::malformed(
            data.path(),
            offset + quality_start as u64,
            format!("quality length {quality_len} does not match {data_len} bases"),
        ));
    }
    if !quality.iter().all(|&q| alphabet::is_quality(q)) {
        return Err(ReadError::malformed(
            data.path(),
            offset + quality_start as u64,
            "non-printable quality",
        ));
    }
    if data_len > MAX_READ_LENGTH {
        return Err(ReadError::malformed(
            data.path(),
            offset + data_start as u64,
            format!("read of {data_len} bases exceeds the {MAX_READ_LENGTH} base limit"),
        ));
    }

    let base = window.start();
    read.init(
        window.backing(),
        base + id_start + 1..base + id_start + id_len,
        base + data_start..base + data_start + data_len,
        base + quality_start..base + quality_start + quality_len,
    );
    if context.preserve_clipping {
        read.clip_preserving(context.clipping);
    } else {
        read.clip(context.clipping);
    }
    read.set_batch(data.batch());
    read.set_read_group(context.default_read_group.clone());

    Ok(Some(scan))
}

/// The window at the reader's cursor, moving to the next batch if the current
/// one is drained. `None` at end of input.
pub(crate) fn next_window(data: &mut dyn DataReader) -> Result<Option<DataWindow>> {
    if let Some(window) = data.data() {
        return Ok(Some(window));
    }
    data.next_batch()?;
    Ok(data.data())
}

/// Sequential reader over one FASTQ file or byte range of it.
pub struct FastqReader {
    data: Box<dyn DataReader>,
    context: ReaderContext,
}

impl FastqReader {
    /// Open `path` and position on the first full record of
    /// `[start, start + length)`.
    pub fn create(
        spec: &SourceSpec,
        path: &Path,
        start: u64,
        length: u64,
        context: ReaderContext,
    ) -> Result<Self> {
        let mut data = spec.data_reader(1);
        data.init(path)?;
        let mut reader = Self { data, context };
        reader.reinit(start, length)?;
        Ok(reader)
    }

    /// FASTQ files carry no header.
    pub fn read_header(_path: &Path, context: &mut ReaderContext) {
        context.clear_header();
    }

    /// Generator for one FASTQ input: range splitting for plain files, a
    /// producer queue for compressed files and standard input.
    pub fn create_read_supplier_generator(
        spec: &SourceSpec,
        path: &Path,
        partitions: usize,
        context: &ReaderContext,
        queue: QueueSettings,
    ) -> Result<Box<dyn ReadSupplierGenerator>> {
        match spec.supplier {
            DataSupplier::Mapped => {
                log::info!("FASTQ using range splitter");
                let size = data::file_size(path)?;
                let factory_spec = spec.clone();
                let factory_path: PathBuf = path.to_path_buf();
                let factory_context = context.clone();
                let factory: ReadReaderFactory = Arc::new(move |start, length| {
                    // batch numbers restart per range, so each range keeps its own ledger
                    let spec = factory_spec.with_fresh_ledger();
                    let reader = FastqReader::create(
                        &spec,
                        &factory_path,
                        start,
                        length,
                        factory_context.clone(),
                    )?;
                    Ok(Box::new(reader) as Box<dyn ReadReader>)
                });
                Ok(Box::new(RangeSplittingReadSupplierGenerator::new(
                    path, size, partitions, factory,
                )))
            }
            DataSupplier::Stream { .. } => {
                log::info!("FASTQ using supplier queue");
                let reader = FastqReader::create(spec, path, 0, u64::MAX, context.clone())?;
                Ok(Box::new(ReadSupplierQueue::start(Box::new(reader), queue)))
            }
        }
    }

    pub fn context(&self) -> &ReaderContext {
        &self.context
    }
}

impl ReadReader for FastqReader {
    fn next_read(&mut self, read: &mut Read) -> Result<bool> {
        let Some(window) = next_window(self.data.as_mut())? else {
            return Ok(false);
        };
        match parse_record(&window, read, &self.context, self.data.as_ref())? {
            Some(consumed) => {
                read.set_batch(self.data.acquire_batch());
                self.data.advance(consumed);
                Ok(true)
            }
            None => {
                self.data.advance(window.len());
                Ok(false)
            }
        }
    }

    fn reinit(&mut self, start: u64, length: u64) -> Result<()> {
        self.data.reinit(start, length)?;
        if start != 0 && next_window(self.data.as_mut())?.is_some() {
            boundary::skip_partial_record(self.data.as_mut());
        }
        Ok(())
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

/// Append the clipped view of `read` as one FASTQ record.
pub fn format_record(read: &Read, out: &mut Vec<u8>) {
    out.reserve(read.id().len() + 2 * read.data_len() + 6);
    out.push(b'@');
    out.extend_from_slice(read.id());
    out.push(b'\n');
    out.extend_from_slice(read.data());
    out.extend_from_slice(b"\n+\n");
    out.extend_from_slice(read.quality());
    out.push(b'\n');
}

/// Writes reads as FASTQ to any byte sink.
pub struct FastqWriter<W: Write> {
    out: W,
    buffer: Vec<u8>,
}

impl<W: Write> FastqWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, buffer: Vec::new() }
    }

    pub fn write_read(&mut self, read: &Read) -> std::io::Result<()> {
        self.buffer.clear();
        format_record(read, &mut self.buffer);
        self.out.write_all(&self.buffer)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
