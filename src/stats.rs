//! Run statistics: one private accumulator per worker thread, merged into the
//! run-wide total after each thread finishes.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::error::{ReadError, Result};
use crate::read::Read;
use crate::writer::{AlignmentResult, PairedAlignmentResult};

/// Highest MAPQ tracked; larger values land in the last bucket.
pub const MAX_MAPQ: usize = 70;

/// Column names of the summary line, tab separated.
pub const SUMMARY_HEADER: [&str; 11] = [
    "MaxHits", "MaxDist", "%Used", "%Unique", "%Multi", "%!Found", "%Error", "%Pairs", "lvCalls",
    "NumReads", "Reads/s",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunStats {
    pub total_reads: u64,
    /// Reads long enough and clean enough to be worth aligning.
    pub useful_reads: u64,
    pub total_bases: u64,
    pub clipped_bases: u64,
    pub single_hits: u64,
    pub multi_hits: u64,
    pub not_found: u64,
    pub secondary_hits: u64,
    pub aligned_as_pairs: u64,
    /// Known misalignments; `None` when nothing computed them.
    pub errors: Option<u64>,
    pub lv_calls: u64,
    pub mapq_histogram: [u64; MAX_MAPQ + 1],
    /// Reads handled by each worker, in merge order.
    pub thread_reads: Vec<u64>,
}

impl Default for RunStats {
    fn default() -> Self {
        Self {
            total_reads: 0,
            useful_reads: 0,
            total_bases: 0,
            clipped_bases: 0,
            single_hits: 0,
            multi_hits: 0,
            not_found: 0,
            secondary_hits: 0,
            aligned_as_pairs: 0,
            errors: None,
            lv_calls: 0,
            mapq_histogram: [0; MAX_MAPQ + 1],
            thread_reads: Vec::new(),
        }
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one read taken from a supplier.
    pub fn record_read(&mut self, read: &Read, useful: bool) {
        self.total_reads += 1;
        self.total_bases += read.unclipped_len() as u64;
        self.clipped_bases += (read.unclipped_len() - read.data_len()) as u64;
        if useful {
            self.useful_reads += 1;
        }
    }

    pub fn record_result(&mut self, result: AlignmentResult, mapq: u8) {
        match result {
            AlignmentResult::NotFound | AlignmentResult::UnknownAlignment => self.not_found += 1,
            AlignmentResult::SingleHit => self.single_hits += 1,
            AlignmentResult::MultipleHits => self.multi_hits += 1,
            AlignmentResult::SecondaryHit => self.secondary_hits += 1,
        }
        if result.is_aligned() {
            self.mapq_histogram[usize::from(mapq).min(MAX_MAPQ)] += 1;
        }
    }

    pub fn record_pair(&mut self, result: &PairedAlignmentResult) {
        for mate in 0..2 {
            self.record_result(result.status[mate], result.mapq[mate]);
        }
        if result.aligned_as_pair {
            self.aligned_as_pairs += 2;
        }
    }

    pub fn record_error(&mut self) {
        *self.errors.get_or_insert(0) += 1;
    }

    /// Close out one worker: its read count becomes a per-thread entry.
    pub fn finish_thread(&mut self) {
        self.thread_reads = vec![self.total_reads];
    }

    /// Merge another accumulator into this one. Callers serialise merges.
    pub fn add(&mut self, other: &RunStats) {
        self.total_reads += other.total_reads;
        self.useful_reads += other.useful_reads;
        self.total_bases += other.total_bases;
        self.clipped_bases += other.clipped_bases;
        self.single_hits += other.single_hits;
        self.multi_hits += other.multi_hits;
        self.not_found += other.not_found;
        self.secondary_hits += other.secondary_hits;
        self.aligned_as_pairs += other.aligned_as_pairs;
        self.errors = match (self.errors, other.errors) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
        };
        self.lv_calls += other.lv_calls;
        for (mine, theirs) in self.mapq_histogram.iter_mut().zip(other.mapq_histogram.iter()) {
            *mine += theirs;
        }
        self.thread_reads.extend_from_slice(&other.thread_reads);
    }

    /// Values of the summary line, aligned with [`SUMMARY_HEADER`].
    #[allow(clippy::cast_precision_loss)]
    pub fn summary_row(&self, max_hits: u32, max_dist: u32, elapsed: Duration) -> Vec<String> {
        let useful = self.useful_reads.max(1) as f64;
        let pct = |n: u64| format!("{:.2}%", 100.0 * n as f64 / useful);
        let error = match self.errors {
            Some(errors) => {
                format!("{:.3}%", 100.0 * errors as f64 / self.single_hits.max(1) as f64)
            }
            None => "-".to_string(),
        };
        let millis = elapsed.as_millis().max(1) as f64;
        vec![
            max_hits.to_string(),
            max_dist.to_string(),
            format!("{:.2}%", 100.0 * self.useful_reads as f64 / self.total_reads.max(1) as f64),
            pct(self.single_hits),
            pct(self.multi_hits),
            pct(self.not_found),
            error,
            pct(self.aligned_as_pairs),
            self.lv_calls.to_string(),
            self.total_reads.to_string(),
            format!("{:.0}", 1000.0 * self.useful_reads as f64 / millis),
        ]
    }

    /// Header and summary line, then the MAPQ histogram's non-empty buckets.
    pub fn print(
        &self,
        out: &mut dyn Write,
        max_hits: u32,
        max_dist: u32,
        elapsed: Duration,
    ) -> std::io::Result<()> {
        writeln!(out, "{}", SUMMARY_HEADER.join("\t"))?;
        writeln!(out, "{}", self.summary_row(max_hits, max_dist, elapsed).join("\t"))?;
        if self.mapq_histogram.iter().any(|&n| n > 0) {
            writeln!(out, "MAPQ\tReads")?;
            for (mapq, count) in self.mapq_histogram.iter().enumerate().filter(|&(_, &n)| n > 0) {
                writeln!(out, "{mapq}\t{count}")?;
            }
        }
        Ok(())
    }

    /// Append the summary line to a tab-separated perf file, writing the
    /// header first when the file is new or empty.
    pub fn append_perf(
        &self,
        path: &Path,
        max_hits: u32,
        max_dist: u32,
        elapsed: Duration,
    ) -> Result<()> {
        let io_err = |source: std::io::Error| ReadError::Io { path: path.to_path_buf(), source };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| ReadError::Open { path: path.to_path_buf(), source })?;
        let fresh = file.metadata().map_err(io_err)?.len() == 0;

        let mut wtr =
            csv::WriterBuilder::new().delimiter(b'\t').has_headers(false).from_writer(file);
        if fresh {
            wtr.write_record(SUMMARY_HEADER).map_err(|e| io_err(e.into()))?;
        }
        wtr.write_record(self.summary_row(max_hits, max_dist, elapsed))
            .map_err(|e| io_err(e.into()))?;
        wtr.flush().map_err(io_err)
    }
}
