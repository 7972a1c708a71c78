//! Error type shared by every reader, supplier and the run driver.
//!
//! End of input is *not* an error anywhere in this crate: readers return
//! `Ok(false)` / `Ok(None)` for that. Everything below is fatal for the run.

use std::path::PathBuf;

use thiserror::Error;

use crate::data::DataBatch;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, ReadError>;

/// Failure modes for ingestion, pairing and run setup.
#[derive(Error, Debug)]
pub enum ReadError {
    /// A file could not be opened or mapped.
    #[error("unable to open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure after the file was opened.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A FASTQ record violates the four-line grammar.
    #[error("malformed FASTQ record in '{path}' at offset {offset}: {reason}")]
    Malformed { path: PathBuf, offset: u64, reason: String },

    /// A record does not fit in the reader's working window.
    #[error("FASTQ record larger than buffer size ({limit} bytes) at {path}:{offset}")]
    RecordTooLarge { path: PathBuf, offset: u64, limit: usize },

    /// The last line of the input is not newline terminated.
    #[error("FASTQ file '{path}' doesn't end with a newline (offset {offset})")]
    MissingFinalNewline { path: PathBuf, offset: u64 },

    /// Interleaved mates are out of phase or lack `/1`/`/2` suffixes.
    #[error("paired input '{path}' out of sync at read '{id}': {reason}")]
    PairDesync { path: PathBuf, id: String, reason: String },

    /// One file of a two-file pair ended before the other.
    #[error("reads of both ends responded differently; '{first}' and '{second}' may not match")]
    PairedFilesDiffer { first: PathBuf, second: PathBuf },

    /// Interleaved input ends on the first half of a pair.
    #[error("interleaved input '{path}' has an odd number of reads; last read '{id}' has no mate")]
    OddRecordCount { path: PathBuf, id: String },

    /// A file type could not be resolved from flags or extension.
    #[error("unknown file type for '{name}': {reason}")]
    UnknownFileType { name: String, reason: String },

    /// An option value is out of range or inconsistent with the others.
    #[error("invalid option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },

    /// A format this crate only knows by name (encoding lives elsewhere).
    #[error("{format} is not supported as {role} by this build")]
    UnsupportedFormat { format: String, role: &'static str },

    /// The exactly-once batch release convention was violated.
    #[error("bad release of batch {batch}: {reason}")]
    BatchRelease { batch: DataBatch, reason: &'static str },

    /// A background queue producer failed; carries its diagnostic.
    #[error("read queue producer failed: {0}")]
    Producer(String),

    /// The external index loader failed.
    #[error("index load from '{path}' failed: {reason}")]
    Index { path: PathBuf, reason: String },
}

impl ReadError {
    pub(crate) fn malformed(
        path: impl Into<PathBuf>,
        offset: u64,
        reason: impl Into<String>,
    ) -> Self {
        ReadError::Malformed { path: path.into(), offset, reason: reason.into() }
    }

    pub(crate) fn desync(path: impl Into<PathBuf>, id: &[u8], reason: impl Into<String>) -> Self {
        ReadError::PairDesync {
            path: path.into(),
            id: String::from_utf8_lossy(id).into_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_option(option: &str, reason: impl Into<String>) -> Self {
        ReadError::InvalidOption { option: option.to_string(), reason: reason.into() }
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn malformed_names_file_and_offset() {
        let e = ReadError::malformed("reads.fq", 1234, "blank line");
        let msg = e.to_string();
        assert!(msg.contains("reads.fq"));
        assert!(msg.contains("1234"));
        assert!(msg.contains("blank line"));
    }

    #[test]
    fn desync_is_lossy_on_ids() {
        let e = ReadError::desync("x.fq", b"frag7/3", "expected /1");
        assert!(e.to_string().contains("frag7/3"));
        assert!(e.to_string().contains("expected /1"));
    }

    #[test]
    fn batch_release_mentions_batch() {
        let e = ReadError::BatchRelease {
            batch: DataBatch { file_id: 2, batch_no: 9 },
            reason: "released twice",
        };
        let msg = e.to_string();
        assert!(msg.contains("2:9"));
        assert!(msg.contains("released twice"));
    }
}
