//! Output side of a run: alignment outcomes, per-thread writers and the shared
//! sink they flush into.
//!
//! Every worker thread gets its own [`ReadWriter`] from one [`ReadWriterSupplier`].
//! The FASTQ implementation buffers records locally and appends whole buffers to
//! the shared file under a lock, so records from different threads never
//! interleave mid-record.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::ReaderContext;
use crate::error::{ReadError, Result};
use crate::fastq::FastqWriter;
use crate::read::{Direction, Read};

/// Local bytes a thread accumulates before taking the sink lock.
pub const WRITER_FLUSH_BYTES: usize = 1024 * 1024;

/// Outcome of aligning one read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum AlignmentResult {
    #[default]
    NotFound,
    SingleHit,
    MultipleHits,
    SecondaryHit,
    UnknownAlignment,
}

impl AlignmentResult {
    pub fn is_aligned(self) -> bool {
        matches!(self, AlignmentResult::SingleHit | AlignmentResult::MultipleHits)
    }
}

/// Outcome of aligning a mate pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PairedAlignmentResult {
    pub status: [AlignmentResult; 2],
    pub location: [Option<u64>; 2],
    pub direction: [Direction; 2],
    pub mapq: [u8; 2],
    /// Both mates were placed together rather than independently.
    pub aligned_as_pair: bool,
}

/// Which alignment outcomes are written. Empty means everything.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct OutputFilter {
    pub unaligned: bool,
    pub single_hit: bool,
    pub multiple_hits: bool,
}

impl OutputFilter {
    pub fn is_empty(&self) -> bool {
        !(self.unaligned || self.single_hit || self.multiple_hits)
    }

    pub fn passes(&self, result: AlignmentResult) -> bool {
        if self.is_empty() {
            return true;
        }
        match result {
            AlignmentResult::NotFound | AlignmentResult::UnknownAlignment => self.unaligned,
            AlignmentResult::SingleHit => self.single_hit,
            AlignmentResult::MultipleHits => self.multiple_hits,
            AlignmentResult::SecondaryHit => false,
        }
    }
}

impl FromStr for OutputFilter {
    type Err = ReadError;

    /// `a` aligned, `s` single hits, `u` unaligned.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "a" => Ok(Self { single_hit: true, multiple_hits: true, ..Self::default() }),
            "s" => Ok(Self { single_hit: true, ..Self::default() }),
            "u" => Ok(Self { unaligned: true, ..Self::default() }),
            other => {
                Err(ReadError::invalid_option("-F", format!("expected a, s or u, got '{other}'")))
            }
        }
    }
}

/// One thread's output handle.
pub trait ReadWriter: Send {
    fn write_header(
        &mut self,
        context: &ReaderContext,
        sorted: bool,
        args: &[String],
        version: &str,
        rg_line: Option<&str>,
    ) -> Result<()>;

    fn write_read(
        &mut self,
        read: &Read,
        result: AlignmentResult,
        mapq: u8,
        location: Option<u64>,
        direction: Direction,
    ) -> Result<()>;

    fn write_pair(
        &mut self,
        read0: &Read,
        read1: &Read,
        result: &PairedAlignmentResult,
    ) -> Result<()>;

    /// Flush everything this writer still holds. Called once per thread.
    fn close(&mut self) -> Result<()>;
}

/// Hands out per-thread writers over one output.
pub trait ReadWriterSupplier: Send + Sync {
    fn get_writer(&self) -> Result<Box<dyn ReadWriter>>;

    /// Flush and close the output. Writers obtained earlier must be closed first.
    fn close(&self) -> Result<()>;
}

type Sink = Arc<Mutex<Option<BufWriter<Box<dyn Write + Send>>>>>;

/// Shared FASTQ output file (or standard output).
pub struct FastqWriterSupplier {
    sink: Sink,
    path: PathBuf,
}

impl FastqWriterSupplier {
    pub fn create(path: &Path, stdout: bool) -> Result<Self> {
        let out: Box<dyn Write + Send> = if stdout {
            Box::new(std::io::stdout())
        } else {
            let file = File::create(path)
                .map_err(|source| ReadError::Open { path: path.to_path_buf(), source })?;
            Box::new(file)
        };
        Ok(Self::from_writer(path, out))
    }

    /// Wrap an already open byte sink.
    pub fn from_writer(path: &Path, out: Box<dyn Write + Send>) -> Self {
        Self { sink: Arc::new(Mutex::new(Some(BufWriter::new(out)))), path: path.to_path_buf() }
    }
}

impl ReadWriterSupplier for FastqWriterSupplier {
    fn get_writer(&self) -> Result<Box<dyn ReadWriter>> {
        Ok(Box::new(ThreadFastqWriter {
            local: FastqWriter::new(Vec::with_capacity(WRITER_FLUSH_BYTES)),
            sink: Arc::clone(&self.sink),
            path: self.path.clone(),
        }))
    }

    fn close(&self) -> Result<()> {
        match self.sink.lock().take() {
            Some(mut out) => {
                out.flush().map_err(|source| ReadError::Io { path: self.path.clone(), source })
            }
            None => Ok(()),
        }
    }
}

struct ThreadFastqWriter {
    local: FastqWriter<Vec<u8>>,
    sink: Sink,
    path: PathBuf,
}

impl ThreadFastqWriter {
    fn io_error(&self, source: std::io::Error) -> ReadError {
        ReadError::Io { path: self.path.clone(), source }
    }

    fn append(&mut self, read: &Read) -> Result<()> {
        self.local.write_read(read).map_err(|e| self.io_error(e))?;
        if self.local.get_ref().len() >= WRITER_FLUSH_BYTES {
            self.flush_local()?;
        }
        Ok(())
    }

    fn flush_local(&mut self) -> Result<()> {
        if self.local.get_ref().is_empty() {
            return Ok(());
        }
        let mut guard = self.sink.lock();
        let Some(out) = guard.as_mut() else {
            return Err(self.io_error(std::io::Error::other("output already closed")));
        };
        let written = out.write_all(self.local.get_ref());
        drop(guard);
        written.map_err(|e| self.io_error(e))?;
        self.local.get_mut().clear();
        Ok(())
    }
}

impl ReadWriter for ThreadFastqWriter {
    /// FASTQ has no header.
    fn write_header(
        &mut self,
        _: &ReaderContext,
        _: bool,
        _: &[String],
        _: &str,
        _: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    fn write_read(
        &mut self,
        read: &Read,
        _: AlignmentResult,
        _: u8,
        _: Option<u64>,
        _: Direction,
    ) -> Result<()> {
        self.append(read)
    }

    fn write_pair(&mut self, read0: &Read, read1: &Read, _: &PairedAlignmentResult) -> Result<()> {
        self.append(read0)?;
        self.append(read1)
    }

    fn close(&mut self) -> Result<()> {
        self.flush_local()
    }
}

impl Drop for ThreadFastqWriter {
    fn drop(&mut self) {
        if !self.local.get_ref().is_empty() {
            log::warn!(
                "{}: writer dropped with {} unflushed bytes",
                self.path.display(),
                self.local.get_ref().len()
            );
        }
    }
}

#[cfg(test)]
mod writer_tests {
    use super::*;
    use crate::data::{BatchBytes, DataWindow};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn read_from(record: &[u8]) -> (Arc<BatchBytes>, Read) {
        let window = DataWindow::from_vec(record.to_vec());
        let backing = Arc::clone(window.backing());
        let lines: Vec<usize> =
            record.iter().enumerate().filter(|&(_, &b)| b == b'\n').map(|(i, _)| i).collect();
        let mut read = Read::new();
        read.init(&backing, 1..lines[0], lines[0] + 1..lines[1], lines[2] + 1..lines[3]);
        (backing, read)
    }

    #[test]
    fn filter_semantics() {
        let all = OutputFilter::default();
        assert!(all.passes(AlignmentResult::NotFound));
        assert!(all.passes(AlignmentResult::SecondaryHit));

        let aligned: OutputFilter = "a".parse().unwrap();
        assert!(aligned.passes(AlignmentResult::SingleHit));
        assert!(aligned.passes(AlignmentResult::MultipleHits));
        assert!(!aligned.passes(AlignmentResult::NotFound));

        let unaligned: OutputFilter = "u".parse().unwrap();
        assert!(unaligned.passes(AlignmentResult::UnknownAlignment));
        assert!(!unaligned.passes(AlignmentResult::SingleHit));

        assert!("x".parse::<OutputFilter>().is_err());
    }

    #[test]
    fn threads_flush_whole_records() {
        let buf = SharedBuf::default();
        let supplier =
            FastqWriterSupplier::from_writer(Path::new("out.fq"), Box::new(buf.clone()));
        let (_b0, r0) = read_from(b"@a\nACGT\n+\nIIII\n");
        let (_b1, r1) = read_from(b"@b\nGG\n+\nII\n");

        std::thread::scope(|s| {
            for _ in 0..4 {
                let mut w = supplier.get_writer().unwrap();
                let (r0, r1) = (&r0, &r1);
                s.spawn(move || {
                    for _ in 0..100 {
                        w.write_pair(r0, r1, &PairedAlignmentResult::default()).unwrap();
                    }
                    w.close().unwrap();
                });
            }
        });
        supplier.close().unwrap();

        let out = buf.0.lock().clone();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 4 * 100 * 2 * 4);
        assert_eq!(text.matches("@a\nACGT\n+\nIIII\n").count(), 400);
        assert_eq!(text.matches("@b\nGG\n+\nII\n").count(), 400);
    }

    #[test]
    fn writing_after_close_fails() {
        let sink = Box::new(SharedBuf::default());
        let supplier = FastqWriterSupplier::from_writer(Path::new("out.fq"), sink);
        let mut w = supplier.get_writer().unwrap();
        let (_b, r) = read_from(b"@a\nACGT\n+\nIIII\n");
        w.write_read(&r, AlignmentResult::NotFound, 0, None, Direction::Forward).unwrap();
        supplier.close().unwrap();
        assert!(matches!(w.close(), Err(ReadError::Io { .. })));
    }
}
