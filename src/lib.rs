#![deny(unsafe_code)]
//! # readsplit
//!
//! Partitioned FASTQ ingestion for parallel short-read alignment. Input is split
//! across a fixed number of worker threads, each of which pulls reads from its own
//! supplier, hands them to an alignment stage and keeps private statistics that
//! are merged when it finishes.
//!
//! ## Highlights
//! - **Boundary recovery**: a reader dropped at any byte offset of a FASTQ file
//!   finds the next true record start, so plain files are split by byte range
//!   with no index ([`boundary`], [`supplier::RangeSplitter`]).
//! - **Mate pairing**: two-file pairs read in lockstep, and interleaved files
//!   repair their `/1`/`/2` phase at partition boundaries ([`paired`]).
//! - **One queue where splitting is impossible**: gzip and standard input are
//!   parsed by a single producer thread feeding a bounded channel ([`queue`]).
//! - **Zero-copy reads**: a [`read::Read`] is a view into a shared batch buffer;
//!   batches are released exactly once per read ([`data::BatchLedger`]).
//!
//! ## Examples
//! ```rust
//! use readsplit::supplier::RangeSplitter;
//!
//! // Four workers over a 10 kB file get contiguous, non-overlapping ranges.
//! let splitter = RangeSplitter::new(10_000, 4);
//! assert_eq!(splitter.next_range(), Some((0, 2_500)));
//! assert_eq!(splitter.next_range(), Some((2_500, 2_500)));
//!
//! // Clipping modes use the four-state `-C` syntax.
//! let mode: readsplit::ClippingType = "++".parse().unwrap();
//! assert_eq!(mode, readsplit::ClippingType::ClipFrontAndBack);
//! ```

pub mod alphabet;
pub mod boundary;
pub mod context;
pub mod data;
pub mod error;
pub mod fastq;
pub mod format;
pub mod logging;
pub mod options;
pub mod paired;
pub mod queue;
pub mod read;
pub mod run;
pub mod stats;
pub mod supplier;
pub mod writer;

pub use context::ReaderContext;
pub use error::{ReadError, Result};
pub use format::{FileType, SnapFile};
pub use options::RunOptions;
pub use read::{ClippingType, Direction, OwnedRead, Read};
pub use run::{AlignmentStage, PassThroughStage, RunReport, Runner, StageWorker};
pub use stats::RunStats;
pub use supplier::{
    PairedReadSupplier, PairedReadSupplierGenerator, ReadSupplier, ReadSupplierGenerator,
};
pub use writer::{AlignmentResult, PairedAlignmentResult, ReadWriter, ReadWriterSupplier};

/// Crate version, as written into output headers.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod reexport_tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn pass_through_run_over_no_input_is_rejected() {
        let options = RunOptions::new(options::NO_INDEX, Vec::new(), false);
        let err = Runner::new(std::sync::Arc::new(PassThroughStage)).run(&options).unwrap_err();
        assert!(matches!(err, ReadError::InvalidOption { .. }));
    }
}
