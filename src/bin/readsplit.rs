use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use readsplit::data::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_RECORD_BYTES};
use readsplit::options::{DEFAULT_MAX_DIST, DEFAULT_MAX_HITS, DEFAULT_MIN_READ_LENGTH};
use readsplit::queue::DEFAULT_READS_PER_BATCH;
use readsplit::writer::OutputFilter;
use readsplit::{logging, ClippingType, PassThroughStage, RunOptions, Runner, SnapFile};

/// readsplit CLI
#[derive(Parser)]
#[command(name = "readsplit")]
#[command(version)]
#[command(about = "Partitioned FASTQ ingestion for parallel alignment", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Single-end run
    Single(RunArgs),

    /// Paired-end run (two FASTQ files per input, or an interleaved type)
    Paired(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Index directory holding a .fai file, or "-" for input/output only
    index_dir: String,

    /// Inputs: file names typed by extension, or -fastq/-compressedFastq/
    /// -pairedInterleavedFastq/... followed by the name(s); "-" is stdin.
    /// Everything after the first input is taken as inputs, so options go first.
    #[arg(required = true, num_args = 1.., allow_hyphen_values = true, trailing_var_arg = true)]
    inputs: Vec<String>,

    /// Output file, optionally preceded by a type flag (e.g. "-fastq -")
    #[arg(short = 'o', long, num_args = 1..=2, allow_hyphen_values = true)]
    output: Vec<String>,

    /// Worker threads (default: all cores)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Clipping of '#' qualities: "--" none, "-+" back, "+-" front, "++" both
    #[arg(short = 'C', long, default_value = "-+", allow_hyphen_values = true)]
    clipping: String,

    /// Keep clipping recorded by an earlier alignment
    #[arg(long)]
    preserve_clipping: bool,

    /// Read group id for every read; also emitted as an @RG line
    #[arg(long)]
    read_group: Option<String>,

    /// Keep secondary alignments from aligned inputs
    #[arg(long)]
    secondary_alignments: bool,

    /// Ask the writer for sorted output
    #[arg(long)]
    sort_output: bool,

    /// Append the summary line to this tab-separated file
    #[arg(long)]
    perf_file: Option<PathBuf>,

    /// Output filter: a (aligned), s (single hit), u (unaligned)
    #[arg(short = 'F', long)]
    filter: Option<String>,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Largest record (in bytes) a reader must hold in one window
    #[arg(long, default_value_t = DEFAULT_MAX_RECORD_BYTES)]
    max_record_bytes: usize,

    /// Batches waiting in a producer queue (default: 2 per thread)
    #[arg(long)]
    queue_depth: Option<usize>,

    #[arg(long, default_value_t = DEFAULT_READS_PER_BATCH)]
    reads_per_batch: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_HITS)]
    max_hits: u32,

    /// Edit distance limit; reads with more Ns are skipped
    #[arg(long, default_value_t = DEFAULT_MAX_DIST)]
    max_dist: u32,

    #[arg(long, default_value_t = DEFAULT_MIN_READ_LENGTH)]
    min_read_length: usize,

    /// Log progress at info level
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn parse_inputs(args: &[String], paired: bool) -> anyhow::Result<Vec<SnapFile>> {
    let mut files = Vec::new();
    let mut rest = args;
    while !rest.is_empty() {
        let (file, consumed) = SnapFile::from_args(rest, paired, true)
            .with_context(|| format!("parsing input starting at '{}'", rest[0]))?;
        files.push(file);
        rest = &rest[consumed..];
    }
    Ok(files)
}

fn parse_output(args: &[String]) -> anyhow::Result<Option<SnapFile>> {
    if args.is_empty() {
        return Ok(None);
    }
    let (file, consumed) = SnapFile::from_args(args, false, false).context("parsing -o")?;
    if consumed != args.len() {
        bail!("unexpected argument after output file: '{}'", args[consumed]);
    }
    Ok(Some(file))
}

fn build_options(args: RunArgs, paired: bool) -> anyhow::Result<(RunOptions, bool)> {
    let inputs = parse_inputs(&args.inputs, paired)?;
    let mut options = RunOptions::new(&args.index_dir, inputs, paired);
    options.output = parse_output(&args.output)?;
    options.threads = args.threads;
    options.clipping = args.clipping.parse::<ClippingType>()?;
    options.preserve_clipping = args.preserve_clipping;
    if let Some(rg) = &args.read_group {
        options.set_read_group(rg);
    }
    options.ignore_secondary_alignments = !args.secondary_alignments;
    options.sort_output = args.sort_output;
    options.perf_file = args.perf_file;
    if let Some(filter) = &args.filter {
        options.filter = filter.parse::<OutputFilter>()?;
    }
    options.sizes.batch_size = args.batch_size;
    options.sizes.max_record_bytes = args.max_record_bytes;
    options.queue_depth = args.queue_depth;
    options.reads_per_batch = args.reads_per_batch;
    options.max_hits = args.max_hits;
    options.max_dist = args.max_dist;
    options.min_read_length = args.min_read_length;
    options.args = std::env::args().collect();
    Ok((options, args.verbose))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (options, verbose) = match cli.command {
        Commands::Single(args) => build_options(args, false)?,
        Commands::Paired(args) => build_options(args, true)?,
    };
    logging::init_logger(verbose);

    let mut runner = Runner::new(Arc::new(PassThroughStage));
    let report = runner.run(&options)?;
    log::info!("done: {} reads", logging::format_count(report.stats.total_reads));
    Ok(())
}
