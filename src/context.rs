//! Run-wide reader configuration and the reference handle it carries.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ReadError, Result};
use crate::read::ClippingType;

/// Reference sequences, as far as readers and writers need them.
pub trait Genome: Send + Sync {
    fn contig_count(&self) -> usize;

    fn contig_name(&self, index: usize) -> &str;

    fn contig_length(&self, index: usize) -> u64;

    /// `@SQ` lines for a SAM-style header.
    fn sequence_dictionary(&self) -> String {
        let mut out = String::new();
        for i in 0..self.contig_count() {
            let (name, length) = (self.contig_name(i), self.contig_length(i));
            out.push_str(&format!("@SQ\tSN:{name}\tLN:{length}\n"));
        }
        out
    }
}

/// A loaded alignment index.
pub trait GenomeIndex: Send + Sync {
    fn genome(&self) -> Arc<dyn Genome>;

    fn path(&self) -> &Path;
}

/// Contig names and lengths taken from a samtools `.fai` file.
#[derive(Clone, Debug, Default)]
pub struct ContigTable {
    contigs: Vec<(String, u64)>,
}

impl ContigTable {
    pub fn new(contigs: Vec<(String, u64)>) -> Self {
        Self { contigs }
    }

    /// Read `<dir>/<anything>.fai`, or `path` itself when it is a `.fai` file.
    pub fn from_fai(path: &Path) -> Result<Self> {
        let fai = if path.is_dir() { find_fai(path)? } else { path.to_path_buf() };
        let index = bio::io::fasta::Index::from_file(&fai)
            .map_err(|e| ReadError::Index { path: fai.clone(), reason: e.to_string() })?;
        let contigs = index.sequences().into_iter().map(|s| (s.name, s.len)).collect();
        Ok(Self { contigs })
    }
}

fn find_fai(dir: &Path) -> Result<PathBuf> {
    let entries = std::fs::read_dir(dir)
        .map_err(|source| ReadError::Open { path: dir.to_path_buf(), source })?;
    for entry in entries {
        let entry = entry.map_err(|source| ReadError::Io { path: dir.to_path_buf(), source })?;
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "fai") {
            return Ok(path);
        }
    }
    Err(ReadError::Index {
        path: dir.to_path_buf(),
        reason: "no .fai file in index directory".to_string(),
    })
}

impl Genome for ContigTable {
    fn contig_count(&self) -> usize {
        self.contigs.len()
    }

    fn contig_name(&self, index: usize) -> &str {
        &self.contigs[index].0
    }

    fn contig_length(&self, index: usize) -> u64 {
        self.contigs[index].1
    }
}

/// `true` when every `@SQ` line of `header` names a contig of `genome` with the
/// same length, in the same order, and the counts agree.
pub fn header_matches_genome(header: &[u8], genome: &dyn Genome) -> bool {
    let mut expected = 0;
    for line in header.split(|&c| c == b'\n') {
        if !line.starts_with(b"@SQ\t") {
            continue;
        }
        let text = String::from_utf8_lossy(line);
        let mut name = None;
        let mut length = None;
        for field in text.split('\t').skip(1) {
            if let Some(v) = field.strip_prefix("SN:") {
                name = Some(v.trim_end_matches('\r').to_string());
            } else if let Some(v) = field.strip_prefix("LN:") {
                length = v.trim_end_matches('\r').parse::<u64>().ok();
            }
        }
        if expected >= genome.contig_count()
            || name.as_deref() != Some(genome.contig_name(expected))
            || length != Some(genome.contig_length(expected))
        {
            return false;
        }
        expected += 1;
    }
    expected == genome.contig_count()
}

/// Configuration shared by every reader of one input for the whole run.
///
/// Cloning is cheap; the genome and header are behind `Arc`s.
#[derive(Clone, Default)]
pub struct ReaderContext {
    pub clipping: ClippingType,
    /// Keep the clipping recorded by an earlier alignment when re-clipping.
    pub preserve_clipping: bool,
    pub default_read_group: Option<Arc<str>>,
    pub genome: Option<Arc<dyn Genome>>,
    /// Read by SAM/BAM readers, which live outside this crate; FASTQ has no
    /// secondary alignments.
    pub ignore_secondary_alignments: bool,
    /// Header bytes of the input file, empty for FASTQ.
    pub header: Arc<[u8]>,
    /// Whether `header` describes the loaded genome; lets SAM/BAM writers reuse it.
    pub header_matches_index: bool,
}

impl ReaderContext {
    pub fn new(clipping: ClippingType, default_read_group: Option<&str>) -> Self {
        Self {
            clipping,
            default_read_group: default_read_group.map(Arc::from),
            ignore_secondary_alignments: true,
            ..Default::default()
        }
    }

    pub fn with_genome(mut self, genome: Option<Arc<dyn Genome>>) -> Self {
        self.genome = genome;
        self
    }

    /// Install a parsed header and check it against the genome.
    pub fn set_header(&mut self, header: Vec<u8>) {
        self.header_matches_index = match &self.genome {
            Some(genome) => !header.is_empty() && header_matches_genome(&header, genome.as_ref()),
            None => false,
        };
        self.header = Arc::from(header);
    }

    pub fn clear_header(&mut self) {
        self.header = Arc::from(Vec::new());
        self.header_matches_index = false;
    }
}

impl fmt::Debug for ReaderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderContext")
            .field("clipping", &self.clipping)
            .field("preserve_clipping", &self.preserve_clipping)
            .field("default_read_group", &self.default_read_group)
            .field("genome", &self.genome.as_ref().map(|g| g.contig_count()))
            .field("ignore_secondary_alignments", &self.ignore_secondary_alignments)
            .field("header_bytes", &self.header.len())
            .field("header_matches_index", &self.header_matches_index)
            .finish()
    }
}
