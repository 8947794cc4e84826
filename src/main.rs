use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modmap::caller::{ProbabilityCaller, ProbabilityConfig, SequenceCaller};
use modmap::coverage::CoverageTrack;
use modmap::motif::MotifConfig;
use modmap::pairing::{PairTable, PairedCallJoiner, PairingConfig, ReadPairer};
use modmap::pipeline;
use modmap::reference::ReferenceGenome;
use modmap::scramble::{ScrambleConfig, Scrambler, VisualizationMode};
use modmap::tables::{
    open_text, AnnotationTable, CallFormat, CallTable, ModifiedBaseSplitter, ProbabilityTable,
    ReadTable,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "modmap",
    version,
    about = "Single-read base modification calling and visualization for nanopore alignments"
)]
struct Cli {
    /// Log debug messages to stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replace modified-base symbols in FASTQ reads from stdin by canonical
    /// bases and record the replaced stretches.
    FlappieSplit {
        /// Annotation table to write.
        annotation: PathBuf,
        /// Sequence indicating a base modification.
        #[arg(long, default_value = "ZG")]
        mod_seq: String,
        /// Replacement sequence that enables generic alignment.
        #[arg(long, default_value = "CG")]
        ref_seq: String,
    },
    /// Call modifications from modified-base symbols of the original reads
    /// for SAM records on stdin.
    CallSeq {
        /// Reference genome (FASTA, optionally gzip compressed).
        reference: PathBuf,
        /// Basecalled reads (FASTA or FASTQ).
        sequences: PathBuf,
        /// Annotation table written by `flappie-split`.
        annotation: PathBuf,
        /// Sequence indicating a base modification.
        #[arg(long, default_value = "ZG")]
        mod_seq: String,
        /// Unmodified motif searched in the reference.
        #[arg(long, default_value = "CG")]
        ref_seq: String,
        /// Minimum mean base quality of a reported site.
        #[arg(long, default_value_t = 0.0)]
        min_quality: f64,
    },
    /// Call modifications from per-base probabilities for SAM records on
    /// stdin.
    CallProb {
        /// Reference genome (FASTA, optionally gzip compressed).
        reference: PathBuf,
        /// Probability table (`read_id<TAB>p0,p1,...`, uncompressed).
        probabilities: PathBuf,
        /// Basecalled reads to use instead of the SAM sequence field.
        #[arg(long)]
        sequences: Option<PathBuf>,
        /// Motif searched in the reference.
        #[arg(long, default_value = "CG")]
        motif: String,
        /// Pattern of modified bases in the query.
        #[arg(long, default_value = "ZG")]
        modified_motif: String,
        /// Probability value separating unmodified from modified.
        #[arg(long, default_value_t = 127.0)]
        midpoint: f64,
        /// Minimum distance from the midpoint for a call.
        #[arg(long, default_value_t = 0.0)]
        threshold: f64,
        /// Offset of the modified base within the motif.
        #[arg(long, default_value_t = 0)]
        modified_offset: usize,
    },
    /// Recolour called CpG sites of SAM records on stdin for genome browsers.
    Scramble {
        /// Reference genome, used for records without MD tag.
        reference: PathBuf,
        /// Single-read call table.
        calls: PathBuf,
        /// Minimum log-likelihood ratio (nanopolish, default 2.5) or score
        /// (flappie, default 3.0).
        #[arg(long)]
        threshold: Option<f64>,
        /// Call table layout: nanopolish or flappie.
        #[arg(long, default_value = "nanopolish")]
        method: CallFormat,
        /// Target browser: IGV or GViz.
        #[arg(long, default_value = "IGV")]
        mode: VisualizationMode,
        /// Replace read bases by the reference before recolouring.
        #[arg(long)]
        polish: bool,
    },
    /// Per-record read length, mapped length and identity of SAM records
    /// on stdin.
    Stats,
    /// Match template and complement reads of a 1D2 run from SAM records
    /// on stdin.
    #[command(name = "pair-1d2")]
    Pair1d2 {
        /// Unmatched reads kept per strand.
        #[arg(long, default_value_t = 200)]
        buffer: usize,
        /// Largest summed distance of begin and end positions of a pair.
        #[arg(long, default_value_t = 200)]
        tolerance: u64,
    },
    /// Join the single-read calls of 1D2 read pairs.
    #[command(name = "join-1d2")]
    Join1d2 {
        /// Pair table written by `pair-1d2`.
        pairs: PathBuf,
        /// Call table grouped by contig (optionally gzip compressed).
        calls: PathBuf,
    },
    /// Convert nanopolish call-methylation rows on stdin into one row per
    /// CpG site.
    NanopolishSplit,
    /// Depth runs of BED intervals on stdin.
    Coverage {
        /// Contig sizes (`name<TAB>length`).
        sizes: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::FlappieSplit {
            annotation,
            mod_seq,
            ref_seq,
        } => run_flappie_split(annotation, &mod_seq, &ref_seq),
        Commands::CallSeq {
            reference,
            sequences,
            annotation,
            mod_seq,
            ref_seq,
            min_quality,
        } => {
            let motif = MotifConfig::default()
                .with_motif(ref_seq)
                .with_modified_motif(mod_seq);
            run_call_seq(reference, sequences, annotation, &motif, min_quality)
        }
        Commands::CallProb {
            reference,
            probabilities,
            sequences,
            motif,
            modified_motif,
            midpoint,
            threshold,
            modified_offset,
        } => {
            let motif = MotifConfig::default()
                .with_motif(motif)
                .with_modified_motif(modified_motif);
            let config = ProbabilityConfig::default()
                .with_midpoint(midpoint)
                .with_threshold(threshold)
                .with_modified_offset(modified_offset);
            run_call_prob(reference, probabilities, sequences, &motif, config)
        }
        Commands::Scramble {
            reference,
            calls,
            threshold,
            method,
            mode,
            polish,
        } => {
            let config = ScrambleConfig::default().with_mode(mode).with_polish(polish);
            let threshold = threshold.unwrap_or_else(|| method.default_threshold());
            run_scramble(reference, calls, method, threshold, config)
        }
        Commands::Stats => run_stats(),
        Commands::Pair1d2 { buffer, tolerance } => run_pair(
            PairingConfig::default()
                .with_buffer(buffer)
                .with_tolerance(tolerance),
        ),
        Commands::Join1d2 { pairs, calls } => run_join(pairs, calls),
        Commands::NanopolishSplit => run_nanopolish_split(),
        Commands::Coverage { sizes } => run_coverage(sizes),
    };

    match result {
        Err(err) if is_broken_pipe(&err) => Ok(()),
        other => other,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn is_broken_pipe(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|io_err| io_err.kind() == io::ErrorKind::BrokenPipe)
    })
}


fn stdout_writer() -> BufWriter<io::StdoutLock<'static>> {
    BufWriter::new(io::stdout().lock())
}

fn open_reference(reference: &Path) -> Result<ReferenceGenome> {
    let mut genome = ReferenceGenome::new(reference);
    genome
        .open()
        .with_context(|| format!("failed to open reference {}", reference.display()))?;
    Ok(genome)
}

fn run_flappie_split(annotation: PathBuf, mod_seq: &str, ref_seq: &str) -> Result<()> {
    let splitter = ModifiedBaseSplitter::new(mod_seq, ref_seq).map_err(anyhow::Error::msg)?;
    let annotations = BufWriter::new(
        File::create(&annotation)
            .with_context(|| format!("failed to create {}", annotation.display()))?,
    );
    pipeline::split_modified_bases(io::stdin().lock(), stdout_writer(), annotations, &splitter)
        .context("flappie split failed")?
        .log("flappie split");
    Ok(())
}

fn run_call_seq(
    reference: PathBuf,
    sequences: PathBuf,
    annotation: PathBuf,
    motif: &MotifConfig,
    min_quality: f64,
) -> Result<()> {
    let caller = SequenceCaller::new(motif, min_quality).context("invalid caller configuration")?;
    let mut genome = open_reference(&reference)?;
    let mut reads = ReadTable::from_path(&sequences).context("failed to load read sequences")?;
    let annotations =
        AnnotationTable::from_path(&annotation).context("failed to load annotation table")?;
    reads.restore(&annotations);
    debug!(reads = reads.len(), annotated = annotations.len(), "restored modified bases");

    pipeline::call_sequences(io::stdin().lock(), stdout_writer(), &caller, &mut genome, &reads)
        .context("sequence calling failed")?
        .log("sequence calling");
    Ok(())
}

fn run_call_prob(
    reference: PathBuf,
    probabilities: PathBuf,
    sequences: Option<PathBuf>,
    motif: &MotifConfig,
    config: ProbabilityConfig,
) -> Result<()> {
    let caller = ProbabilityCaller::new(motif, config).context("invalid caller configuration")?;
    let mut genome = open_reference(&reference)?;
    let mut table =
        ProbabilityTable::open(&probabilities).context("failed to open probability table")?;
    let reads = sequences
        .map(|path| ReadTable::from_path(&path))
        .transpose()
        .context("failed to load read sequences")?;

    pipeline::call_probabilities(
        io::stdin().lock(),
        stdout_writer(),
        &caller,
        &mut genome,
        &mut table,
        reads.as_ref(),
    )
    .context("probability calling failed")?
    .log("probability calling");
    Ok(())
}

fn run_scramble(
    reference: PathBuf,
    calls: PathBuf,
    method: CallFormat,
    threshold: f64,
    config: ScrambleConfig,
) -> Result<()> {
    let table = CallTable::from_path(&calls, method, threshold).context("failed to load call table")?;
    let scrambler = Scrambler::new(config);
    let mut genome = open_reference(&reference)?;

    pipeline::scramble_alignments(io::stdin().lock(), stdout_writer(), &scrambler, &table, &mut genome)
        .context("scrambling failed")?
        .log("scrambling");
    Ok(())
}

fn run_stats() -> Result<()> {
    pipeline::alignment_stats(io::stdin().lock(), stdout_writer())
        .context("alignment statistics failed")?
        .log("alignment statistics");
    Ok(())
}

fn run_pair(config: PairingConfig) -> Result<()> {
    let mut pairer = ReadPairer::new(config);
    pipeline::pair_reads(io::stdin().lock(), stdout_writer(), &mut pairer)
        .context("1D2 pairing failed")?
        .log("1D2 pairing");
    Ok(())
}

fn run_join(pairs: PathBuf, calls: PathBuf) -> Result<()> {
    let table = PairTable::from_path(&pairs).context("failed to load pair table")?;
    let input =
        open_text(&calls).with_context(|| format!("failed to open {}", calls.display()))?;
    let mut joiner = PairedCallJoiner::new(&table);
    pipeline::join_pair_calls(input, stdout_writer(), &mut joiner)
        .context("1D2 call join failed")?
        .log("1D2 call join");
    Ok(())
}

fn run_nanopolish_split() -> Result<()> {
    pipeline::split_nanopolish(io::stdin().lock(), stdout_writer())
        .context("nanopolish conversion failed")?
        .log("nanopolish conversion");
    Ok(())
}

fn run_coverage(sizes: PathBuf) -> Result<()> {
    let mut track = CoverageTrack::from_sizes(&sizes).context("failed to load contig sizes")?;
    pipeline::coverage(io::stdin().lock(), stdout_writer(), &mut track)
        .context("coverage failed")?
        .log("coverage");
    Ok(())
}
