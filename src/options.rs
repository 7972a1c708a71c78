//! Everything one run needs, resolved from the command line.

use std::path::PathBuf;

use crate::data::{BufferSizes, DEFAULT_BATCH_SIZE, DEFAULT_MAX_RECORD_BYTES};
use crate::error::{ReadError, Result};
use crate::format::{FileType, SnapFile};
use crate::queue::{QueueSettings, DEFAULT_READS_PER_BATCH};
use crate::read::{ClippingType, Read};
use crate::writer::OutputFilter;

/// Index directory value meaning "no index, input/output only".
pub const NO_INDEX: &str = "-";

pub const DEFAULT_READ_GROUP: &str = "FASTQ";
pub const DEFAULT_MAX_HITS: u32 = 300;
pub const DEFAULT_MAX_DIST: u32 = 14;
pub const DEFAULT_MIN_READ_LENGTH: usize = 50;

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub index_dir: String,
    pub inputs: Vec<SnapFile>,
    pub output: Option<SnapFile>,
    pub paired: bool,
    /// `None` uses every logical core.
    pub threads: Option<usize>,
    pub clipping: ClippingType,
    pub preserve_clipping: bool,
    pub default_read_group: String,
    /// `@RG` header line, set along with an explicit read group.
    pub rg_line: Option<String>,
    pub ignore_secondary_alignments: bool,
    pub sort_output: bool,
    pub perf_file: Option<PathBuf>,
    pub sizes: BufferSizes,
    /// Batches waiting in a producer queue; `None` is two per thread.
    pub queue_depth: Option<usize>,
    pub reads_per_batch: usize,
    pub filter: OutputFilter,
    pub max_hits: u32,
    /// Edit distance limit; reads with more Ns than this are not useful.
    pub max_dist: u32,
    pub min_read_length: usize,
    /// Command line as given, for output headers.
    pub args: Vec<String>,
}

impl RunOptions {
    pub fn new(index_dir: &str, inputs: Vec<SnapFile>, paired: bool) -> Self {
        Self {
            index_dir: index_dir.to_string(),
            inputs,
            output: None,
            paired,
            threads: None,
            clipping: ClippingType::default(),
            preserve_clipping: false,
            default_read_group: DEFAULT_READ_GROUP.to_string(),
            rg_line: None,
            ignore_secondary_alignments: true,
            sort_output: false,
            perf_file: None,
            sizes: BufferSizes {
                batch_size: DEFAULT_BATCH_SIZE,
                max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            },
            queue_depth: None,
            reads_per_batch: DEFAULT_READS_PER_BATCH,
            filter: OutputFilter::default(),
            max_hits: DEFAULT_MAX_HITS,
            max_dist: DEFAULT_MAX_DIST,
            min_read_length: DEFAULT_MIN_READ_LENGTH,
            args: Vec::new(),
        }
    }

    /// Use `id` as the read group of every read and in the output header.
    pub fn set_read_group(&mut self, id: &str) {
        self.default_read_group = id.to_string();
        self.rg_line = Some(format!("@RG\tID:{id}\tSM:sample"));
    }

    pub fn has_index(&self) -> bool {
        self.index_dir != NO_INDEX
    }

    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn queue_settings(&self) -> QueueSettings {
        let threads = self.thread_count();
        QueueSettings {
            depth: self.queue_depth.unwrap_or(2 * threads),
            reads_per_batch: self.reads_per_batch,
        }
    }

    /// Long enough and with few enough Ns to be worth aligning.
    pub fn is_useful(&self, read: &Read) -> bool {
        read.data_len() >= self.min_read_length && read.count_ns() <= self.max_dist as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(ReadError::invalid_option("inputs", "no input files specified"));
        }
        if self.threads == Some(0) {
            return Err(ReadError::invalid_option("-t", "thread count must be at least 1"));
        }
        if self.sizes.batch_size == 0 || self.sizes.max_record_bytes == 0 {
            return Err(ReadError::invalid_option(
                "buffer size",
                "batch and record buffer sizes must be non-zero",
            ));
        }
        if self.queue_depth == Some(0) || self.reads_per_batch == 0 {
            return Err(ReadError::invalid_option(
                "queue",
                "queue depth and reads per batch must be non-zero",
            ));
        }
        if self.inputs.iter().filter(|f| f.is_stdio).count() > 1 {
            return Err(ReadError::invalid_option(
                "inputs",
                "standard input ('-') given for more than one input",
            ));
        }
        for input in &self.inputs {
            match (self.paired, input.file_type, input.second_file_name.is_some()) {
                (true, FileType::Fastq, false) => {
                    return Err(ReadError::invalid_option(
                        &input.file_name,
                        "paired runs need two FASTQ files or an interleaved type",
                    ));
                }
                (false, FileType::InterleavedFastq, _) => {
                    return Err(ReadError::invalid_option(
                        &input.file_name,
                        "interleaved input needs a paired run",
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
