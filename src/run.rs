//! Run lifecycle: load the index, open inputs and output, drain every input
//! through a fixed pool of worker threads, merge their statistics.
//!
//! Each worker goes through the same three steps:
//! 1. `initialize_thread`: private [`RunStats`], private writer, private stage worker.
//! 2. `run_thread`: pull reads from its own supplier until exhausted, release
//!    every batch, close its writer.
//! 3. `finish_thread`: merge its statistics into the run total under a lock.
//!
//! The first error from any worker stops the others at their next read and is
//! returned once all of them have joined.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::ThreadPoolBuilder;

use crate::context::{ContigTable, Genome, GenomeIndex, ReaderContext};
use crate::error::{ReadError, Result};
use crate::logging::{format_count, format_duration, format_rate};
use crate::options::{RunOptions, NO_INDEX};
use crate::read::{Direction, Read};
use crate::stats::RunStats;
use crate::supplier::{
    PairedReadSupplier, PairedReadSupplierGenerator, ReadSupplier, ReadSupplierGenerator,
};
use crate::writer::{AlignmentResult, PairedAlignmentResult, ReadWriter, ReadWriterSupplier};

/// Where one read landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SingleAlignment {
    pub result: AlignmentResult,
    pub mapq: u8,
    pub location: Option<u64>,
    pub direction: Direction,
}

/// The aligner behind a run: loads its index once and makes one worker per thread.
pub trait AlignmentStage: Send + Sync {
    fn load_index(&self, dir: &Path) -> Result<Arc<dyn GenomeIndex>>;

    fn new_worker(
        &self,
        index: Option<Arc<dyn GenomeIndex>>,
        options: &RunOptions,
    ) -> Result<Box<dyn StageWorker>>;
}

/// Per-thread aligner state.
pub trait StageWorker: Send {
    fn align_read(&mut self, read: &mut Read, stats: &mut RunStats) -> Result<SingleAlignment>;

    fn align_pair(
        &mut self,
        read0: &mut Read,
        read1: &mut Read,
        stats: &mut RunStats,
    ) -> Result<PairedAlignmentResult>;
}

/// Index made of the contig table in a `.fai` file.
#[derive(Debug)]
pub struct FaiIndex {
    genome: Arc<ContigTable>,
    path: PathBuf,
}

impl FaiIndex {
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self { genome: Arc::new(ContigTable::from_fai(dir)?), path: dir.to_path_buf() })
    }
}

impl GenomeIndex for FaiIndex {
    fn genome(&self) -> Arc<dyn Genome> {
        self.genome.clone()
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Reports every read as not found and writes it through unchanged.
#[derive(Debug, Default)]
pub struct PassThroughStage;

impl AlignmentStage for PassThroughStage {
    fn load_index(&self, dir: &Path) -> Result<Arc<dyn GenomeIndex>> {
        Ok(Arc::new(FaiIndex::load(dir)?))
    }

    fn new_worker(
        &self,
        _: Option<Arc<dyn GenomeIndex>>,
        _: &RunOptions,
    ) -> Result<Box<dyn StageWorker>> {
        Ok(Box::new(PassThroughWorker))
    }
}

struct PassThroughWorker;

impl StageWorker for PassThroughWorker {
    fn align_read(&mut self, _: &mut Read, _: &mut RunStats) -> Result<SingleAlignment> {
        Ok(SingleAlignment::default())
    }

    fn align_pair(
        &mut self,
        _: &mut Read,
        _: &mut Read,
        _: &mut RunStats,
    ) -> Result<PairedAlignmentResult> {
        Ok(PairedAlignmentResult::default())
    }
}

/// The most recently loaded index, reused while the directory stays the same.
#[derive(Default)]
pub struct IndexCache {
    key: Option<PathBuf>,
    index: Option<Arc<dyn GenomeIndex>>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The index for `dir`, loading it through `stage` unless already cached.
    /// `-` means no index.
    pub fn load_or_reuse(
        &mut self,
        dir: &str,
        stage: &dyn AlignmentStage,
    ) -> Result<Option<Arc<dyn GenomeIndex>>> {
        let key = if dir == NO_INDEX {
            PathBuf::from(NO_INDEX)
        } else {
            std::fs::canonicalize(dir).unwrap_or_else(|_| PathBuf::from(dir))
        };
        if self.key.as_ref() == Some(&key) {
            log::debug!("reusing index from {}", key.display());
            return Ok(self.index.clone());
        }

        self.clear();
        if dir == NO_INDEX {
            log::info!("no alignment, input/output only");
        } else {
            log::info!("Loading index from directory {dir}");
            let start = Instant::now();
            let index = stage.load_index(Path::new(dir))?;
            log::info!(
                "index loaded in {}: {} contigs",
                format_duration(start.elapsed()),
                index.genome().contig_count()
            );
            self.index = Some(index);
        }
        self.key = Some(key);
        Ok(self.index.clone())
    }

    pub fn clear(&mut self) {
        self.key = None;
        self.index = None;
    }
}

/// Result of one run.
#[derive(Debug)]
pub struct RunReport {
    pub stats: RunStats,
    pub elapsed: Duration,
}

struct Iteration {
    context: ReaderContext,
    index: Option<Arc<dyn GenomeIndex>>,
    writer: Option<Box<dyn ReadWriterSupplier>>,
    started: Instant,
}

/// Shared by all workers of one input.
struct Shared<'a> {
    options: &'a RunOptions,
    stage: &'a dyn AlignmentStage,
    index: Option<Arc<dyn GenomeIndex>>,
    writer: Option<&'a dyn ReadWriterSupplier>,
    total: Mutex<RunStats>,
    abort: AtomicBool,
    first_error: Mutex<Option<ReadError>>,
}

impl Shared<'_> {
    fn fail(&self, error: ReadError) {
        self.abort.store(true, Ordering::Relaxed);
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            *slot = Some(error);
        } else {
            log::debug!("suppressed later worker error: {error}");
        }
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }
}

/// One worker thread's private state.
struct ThreadContext<'a> {
    shared: &'a Shared<'a>,
    stats: RunStats,
    writer: Option<Box<dyn ReadWriter>>,
    worker: Box<dyn StageWorker>,
}

impl<'a> ThreadContext<'a> {
    fn initialize_thread(shared: &'a Shared<'a>) -> Result<Self> {
        let writer = shared.writer.map(|w| w.get_writer()).transpose()?;
        let worker = shared.stage.new_worker(shared.index.clone(), shared.options)?;
        Ok(Self { shared, stats: RunStats::new(), writer, worker })
    }

    fn run_thread(&mut self, supplier: &mut dyn ReadSupplier) -> Result<()> {
        let options = self.shared.options;
        while !self.shared.aborted() {
            let Some(read) = supplier.next_read()? else {
                break;
            };
            let batch = read.batch();
            let useful = options.is_useful(read);
            self.stats.record_read(read, useful);

            let alignment = if useful {
                let alignment = self.worker.align_read(read, &mut self.stats)?;
                self.stats.record_result(alignment.result, alignment.mapq);
                alignment
            } else {
                SingleAlignment::default()
            };
            if let Some(writer) = self.writer.as_mut() {
                if options.filter.passes(alignment.result) {
                    writer.write_read(
                        read,
                        alignment.result,
                        alignment.mapq,
                        alignment.location,
                        alignment.direction,
                    )?;
                }
            }
            supplier.release_batch(batch)?;
        }
        self.close_writer()
    }

    fn run_paired_thread(&mut self, supplier: &mut dyn PairedReadSupplier) -> Result<()> {
        let options = self.shared.options;
        while !self.shared.aborted() {
            let Some((read0, read1)) = supplier.next_read_pair()? else {
                break;
            };
            let batches = [read0.batch(), read1.batch()];
            let useful = [options.is_useful(read0), options.is_useful(read1)];
            self.stats.record_read(read0, useful[0]);
            self.stats.record_read(read1, useful[1]);

            let result = if useful[0] && useful[1] {
                let result = self.worker.align_pair(read0, read1, &mut self.stats)?;
                self.stats.record_pair(&result);
                result
            } else {
                PairedAlignmentResult::default()
            };
            if let Some(writer) = self.writer.as_mut() {
                let filter = &options.filter;
                if filter.passes(result.status[0]) || filter.passes(result.status[1]) {
                    writer.write_pair(read0, read1, &result)?;
                }
            }
            for batch in batches {
                supplier.release_batch(batch)?;
            }
        }
        self.close_writer()
    }

    fn close_writer(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.close(),
            None => Ok(()),
        }
    }

    fn finish_thread(mut self) {
        self.stats.finish_thread();
        self.shared.total.lock().add(&self.stats);
    }
}

/// Drives runs; owns the index cache so repeated runs on one index load it once.
pub struct Runner {
    stage: Arc<dyn AlignmentStage>,
    cache: IndexCache,
}

impl Runner {
    pub fn new(stage: Arc<dyn AlignmentStage>) -> Self {
        Self { stage, cache: IndexCache::new() }
    }

    pub fn index_cache(&mut self) -> &mut IndexCache {
        &mut self.cache
    }

    /// Run every input through the stage and report the merged statistics.
    pub fn run(&mut self, options: &RunOptions) -> Result<RunReport> {
        options.validate()?;
        let index = self.initialize(options)?;
        let iteration = self.begin_iteration(options, index)?;
        let stats = self.run_task(options, &iteration);
        let elapsed = self.finish_iteration(iteration)?;
        let stats = stats?;
        self.print_stats(options, &stats, elapsed)?;
        Ok(RunReport { stats, elapsed })
    }

    fn initialize(&mut self, options: &RunOptions) -> Result<Option<Arc<dyn GenomeIndex>>> {
        self.cache.load_or_reuse(&options.index_dir, self.stage.as_ref())
    }

    fn begin_iteration(
        &self,
        options: &RunOptions,
        index: Option<Arc<dyn GenomeIndex>>,
    ) -> Result<Iteration> {
        let mut context = ReaderContext::new(options.clipping, Some(&options.default_read_group))
            .with_genome(index.as_ref().map(|i| i.genome()));
        context.preserve_clipping = options.preserve_clipping;
        context.ignore_secondary_alignments = options.ignore_secondary_alignments;
        options.inputs[0].read_header(&mut context)?;

        let writer = match &options.output {
            Some(output) => {
                let supplier = output.create_writer_supplier()?;
                let mut header_writer = supplier.get_writer()?;
                header_writer.write_header(
                    &context,
                    options.sort_output,
                    &options.args,
                    crate::VERSION,
                    options.rg_line.as_deref(),
                )?;
                header_writer.close()?;
                Some(supplier)
            }
            None => None,
        };
        Ok(Iteration { context, index, writer, started: Instant::now() })
    }

    fn run_task(&self, options: &RunOptions, iteration: &Iteration) -> Result<RunStats> {
        let threads = options.thread_count();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("readsplit-worker-{i}"))
            .build()
            .map_err(|e| ReadError::invalid_option("-t", e.to_string()))?;

        let mut total = RunStats::new();
        for input in &options.inputs {
            let mut context = iteration.context.clone();
            input.read_header(&mut context)?;
            log::info!("reading {input} with {threads} threads");

            let shared = Shared {
                options,
                stage: self.stage.as_ref(),
                index: iteration.index.clone(),
                writer: iteration.writer.as_deref(),
                total: Mutex::new(RunStats::new()),
                abort: AtomicBool::new(false),
                first_error: Mutex::new(None),
            };

            if options.paired {
                let generator = input.create_paired_read_supplier_generator(
                    threads,
                    &context,
                    options.sizes,
                    options.queue_settings(),
                )?;
                // every supplier is dropped inside its worker, before the generator
                run_workers(&pool, threads, &shared, |thread| {
                    let mut supplier = generator.generate()?;
                    thread.run_paired_thread(supplier.as_mut())
                });
            } else {
                let generator = input.create_read_supplier_generator(
                    threads,
                    &context,
                    options.sizes,
                    options.queue_settings(),
                )?;
                run_workers(&pool, threads, &shared, |thread| {
                    let mut supplier = generator.generate()?;
                    thread.run_thread(supplier.as_mut())
                });
            }

            if let Some(error) = shared.first_error.into_inner() {
                return Err(error);
            }
            total.add(&shared.total.into_inner());
        }
        Ok(total)
    }

    fn finish_iteration(&self, iteration: Iteration) -> Result<Duration> {
        if let Some(writer) = &iteration.writer {
            writer.close()?;
        }
        Ok(iteration.started.elapsed())
    }

    fn print_stats(&self, options: &RunOptions, stats: &RunStats, elapsed: Duration) -> Result<()> {
        log::info!(
            "{} reads ({} useful) in {}, {}",
            format_count(stats.total_reads),
            format_count(stats.useful_reads),
            format_duration(elapsed),
            format_rate(stats.total_reads, elapsed)
        );
        stats
            .print(&mut std::io::stderr(), options.max_hits, options.max_dist, elapsed)
            .map_err(|source| ReadError::Io { path: PathBuf::from("<stderr>"), source })?;
        if let Some(perf) = &options.perf_file {
            stats.append_perf(perf, options.max_hits, options.max_dist, elapsed)?;
        }
        Ok(())
    }
}

fn run_workers<'a, F>(pool: &rayon::ThreadPool, threads: usize, shared: &'a Shared<'a>, body: F)
where
    F: Fn(&mut ThreadContext<'a>) -> Result<()> + Sync,
{
    pool.install(|| {
        rayon::scope(|s| {
            for _ in 0..threads {
                let body = &body;
                s.spawn(move |_| {
                    let outcome = ThreadContext::initialize_thread(shared).and_then(|mut thread| {
                        body(&mut thread)?;
                        thread.finish_thread();
                        Ok(())
                    });
                    if let Err(error) = outcome {
                        shared.fail(error);
                    }
                });
            }
        });
    });
}
