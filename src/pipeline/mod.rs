//! Stream drivers behind the `modmap` subcommands.
//!
//! Every driver reads text lines from a [`BufRead`] and writes to a
//! [`Write`]. A record that cannot be processed is logged with its read
//! name, counted in the returned [`Summary`] and skipped (the scrambler
//! passes it through unchanged instead). Only I/O failures and unreadable
//! resources end a run early.

use std::io::{self, BufRead, Read, Write};

use bio::io::fastq;
use thiserror::Error;
use tracing::{info, warn};

use crate::alignment::AlignmentRecord;
use crate::caller::{prepare_query, ProbabilityCaller, SequenceCaller};
use crate::coverage::CoverageTrack;
use crate::motif::write_calls;
use crate::pairing::{PairedCallJoiner, ReadPairer};
use crate::reference::{ReferenceError, ReferenceGenome};
use crate::scramble::{reference_from_md, Scrambler};
use crate::stats::{AlignmentStats, STATS_HEADER};
use crate::tables::{
    CallTable, ModifiedBaseSplitter, NanopolishGroup, ProbabilityTable, ReadTable, TableError,
};
use crate::RecordError;

/// Failures that end a stream.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Reading the input or writing the output failed.
    #[error("stream I/O failed")]
    Io(#[from] io::Error),

    /// The reference genome could not be read.
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// A side table could not be read.
    #[error(transparent)]
    Table(#[from] TableError),

    /// The FASTQ input is not well formed.
    #[error("malformed FASTQ input: {0}")]
    Fastq(#[from] fastq::Error),
}

/// Counters of one stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Input records seen, headers excluded.
    pub records: usize,
    /// Records reported and skipped.
    pub skipped: usize,
    /// Output items written (calls, rows, rewritten records).
    pub emitted: usize,
}

impl Summary {
    /// Report a failed record.
    pub fn skip(&mut self, read: &str, err: &RecordError) {
        warn!(read, error = %err, "skipping record");
        self.skipped += 1;
    }

    /// Log the counters at the end of a run.
    pub fn log(&self, what: &str) {
        info!(
            records = self.records,
            skipped = self.skipped,
            emitted = self.emitted,
            "{what} finished"
        );
    }
}

/// First field of a line, used to name records that failed to parse.
fn leading_field(line: &str) -> &str {
    line.split('\t').next().unwrap_or_default()
}

fn is_header(line: &str) -> bool {
    line.starts_with('@')
}

/// Parse an alignment line, reporting failures.
fn parse_record(line: &str, summary: &mut Summary) -> Option<AlignmentRecord> {
    match AlignmentRecord::from_sam_line(line) {
        Ok(record) => Some(record),
        Err(err) => {
            summary.skip(leading_field(line), &err);
            None
        }
    }
}

/// Alignment lines of a SAM stream, headers and blank lines excluded.
fn alignment_lines<R: BufRead>(input: R) -> impl Iterator<Item = io::Result<String>> {
    input
        .lines()
        .filter(|line| !matches!(line, Ok(text) if is_header(text) || text.is_empty()))
}

/// Reference bases under the alignment of `record`.
///
/// The outer error is fatal, the inner one only affects the record.
fn fetch_span(
    genome: &mut ReferenceGenome,
    record: &AlignmentRecord,
) -> Result<Result<Vec<u8>, RecordError>, ReferenceError> {
    let span = genome.fetch(&record.reference_name, record.start()..record.reference_end())?;
    Ok(span.ok_or_else(|| {
        RecordError::lookup(
            "reference span",
            format!(
                "{}:{}-{}",
                record.reference_name,
                record.start(),
                record.reference_end()
            ),
        )
    }))
}

/// Canonicalise modified-base symbols of FASTQ reads.
///
/// Cleaned reads go to `reads_out`, one annotation row per replaced stretch
/// to `annotations_out`.
pub fn split_modified_bases<R: Read, W: Write, A: Write>(
    input: R,
    reads_out: W,
    mut annotations_out: A,
    splitter: &ModifiedBaseSplitter,
) -> Result<Summary, PipelineError> {
    let mut writer = fastq::Writer::new(reads_out);
    let mut summary = Summary::default();
    for record in fastq::Reader::new(input).records() {
        let record = record?;
        summary.records += 1;
        let (cleaned, replaced) = splitter.split(record.seq(), record.qual());
        writer.write(record.id(), record.desc(), &cleaned, record.qual())?;
        for entry in &replaced {
            writeln!(annotations_out, "{}", entry.display(record.id()))?;
        }
        summary.emitted += replaced.len();
    }
    writer.flush()?;
    annotations_out.flush()?;
    Ok(summary)
}

/// Sequence based calls for every alignment of `input`.
pub fn call_sequences<R: BufRead, W: Write>(
    input: R,
    mut out: W,
    caller: &SequenceCaller,
    genome: &mut ReferenceGenome,
    reads: &ReadTable,
) -> Result<Summary, PipelineError> {
    let mut summary = Summary::default();
    for line in alignment_lines(input) {
        let line = line?;
        summary.records += 1;
        let Some(record) = parse_record(&line, &mut summary) else {
            continue;
        };
        if record.is_unmapped() {
            continue;
        }
        let Some(read) = reads.get(&record.query_name) else {
            summary.skip(&record.query_name, &RecordError::lookup("read", &record.query_name));
            continue;
        };
        let calls = fetch_span(genome, &record)?.and_then(|span| {
            prepare_query(&record, Some(read)).and_then(|query| caller.call(&record, &span, &query))
        });
        match calls {
            Ok(calls) => {
                write_calls(&mut out, &calls)?;
                summary.emitted += calls.len();
            }
            Err(err) => summary.skip(&record.query_name, &err),
        }
    }
    out.flush()?;
    Ok(summary)
}

/// Probability based calls for every alignment of `input`.
///
/// With `reads` the query is taken from the basecalled reads instead of
/// the `SEQ` field.
pub fn call_probabilities<R: BufRead, W: Write>(
    input: R,
    mut out: W,
    caller: &ProbabilityCaller,
    genome: &mut ReferenceGenome,
    table: &mut ProbabilityTable,
    reads: Option<&ReadTable>,
) -> Result<Summary, PipelineError> {
    let mut summary = Summary::default();
    for line in alignment_lines(input) {
        let line = line?;
        summary.records += 1;
        let Some(record) = parse_record(&line, &mut summary) else {
            continue;
        };
        if record.is_unmapped() {
            continue;
        }
        let name = record.query_name.as_str();

        let values = match table.get(name)? {
            Some(Ok(values)) => values,
            Some(Err(err)) => {
                summary.skip(name, &err);
                continue;
            }
            None => {
                summary.skip(name, &RecordError::lookup("probability row", name));
                continue;
            }
        };
        let external = match reads.map(|reads| reads.get(name)) {
            Some(None) => {
                summary.skip(name, &RecordError::lookup("read", name));
                continue;
            }
            Some(found) => found,
            None => None,
        };

        let calls = fetch_span(genome, &record)?.and_then(|span| {
            prepare_query(&record, external)
                .and_then(|query| caller.call(&record, &span, &query, &values))
        });
        match calls {
            Ok(calls) => {
                write_calls(&mut out, &calls)?;
                summary.emitted += calls.len();
            }
            Err(err) => summary.skip(name, &err),
        }
    }
    out.flush()?;
    Ok(summary)
}

/// Recolour the alignments of a SAM stream.
///
/// Header lines are copied verbatim. Unmapped records and records that fail
/// are written unchanged.
pub fn scramble_alignments<R: BufRead, W: Write>(
    input: R,
    mut out: W,
    scrambler: &Scrambler,
    table: &CallTable,
    genome: &mut ReferenceGenome,
) -> Result<Summary, PipelineError> {
    let mut summary = Summary::default();
    for line in input.lines() {
        let line = line?;
        if is_header(&line) || line.is_empty() {
            writeln!(out, "{line}")?;
            continue;
        }
        summary.records += 1;
        match scramble_line(scrambler, table, genome, &line)? {
            Ok(Some(rewritten)) => {
                writeln!(out, "{rewritten}")?;
                summary.emitted += 1;
            }
            Ok(None) => writeln!(out, "{line}")?,
            Err(err) => {
                summary.skip(leading_field(&line), &err);
                writeln!(out, "{line}")?;
            }
        }
    }
    out.flush()?;
    Ok(summary)
}

/// Rewritten line, or `None` for records that stay unchanged.
fn scramble_line(
    scrambler: &Scrambler,
    table: &CallTable,
    genome: &mut ReferenceGenome,
    line: &str,
) -> Result<Result<Option<String>, RecordError>, ReferenceError> {
    let mut record = match AlignmentRecord::from_sam_line(line) {
        Ok(record) => record,
        Err(err) => return Ok(Err(err)),
    };
    if record.is_unmapped() {
        return Ok(Ok(None));
    }
    let span = match reference_from_md(&record) {
        Ok(Some(span)) => span,
        Ok(None) => match fetch_span(genome, &record)? {
            Ok(span) => span,
            Err(err) => return Ok(Err(err)),
        },
        Err(err) => return Ok(Err(err)),
    };
    let calls = table.overlapping(
        &record.query_name,
        &record.reference_name,
        record.start(),
        record.reference_end(),
        record.strand(),
    );
    Ok(scrambler
        .scramble_record(&mut record, &span, &calls)
        .map(|changed| changed.then(|| record.to_sam_line())))
}

/// Length and identity rows for every alignment, below a header row.
pub fn alignment_stats<R: BufRead, W: Write>(input: R, mut out: W) -> Result<Summary, PipelineError> {
    writeln!(out, "{STATS_HEADER}")?;
    let mut summary = Summary::default();
    for line in alignment_lines(input) {
        let line = line?;
        summary.records += 1;
        let Some(record) = parse_record(&line, &mut summary) else {
            continue;
        };
        match AlignmentStats::from_record(&record) {
            Ok(stats) => {
                writeln!(out, "{stats}")?;
                summary.emitted += 1;
            }
            Err(err) => summary.skip(&record.query_name, &err),
        }
    }
    out.flush()?;
    Ok(summary)
}

/// Template/complement pairs of a 1D2 run.
pub fn pair_reads<R: BufRead, W: Write>(
    input: R,
    mut out: W,
    pairer: &mut ReadPairer,
) -> Result<Summary, PipelineError> {
    let mut summary = Summary::default();
    for line in alignment_lines(input) {
        let line = line?;
        summary.records += 1;
        let Some(record) = parse_record(&line, &mut summary) else {
            continue;
        };
        if let Some(pair) = pairer.push(&record) {
            writeln!(out, "{pair}")?;
            summary.emitted += 1;
        }
    }
    out.flush()?;
    Ok(summary)
}

/// Join the single-read calls of paired reads.
///
/// `input` is a call table grouped by contig, as written by the callers.
pub fn join_pair_calls<R: BufRead, W: Write>(
    input: R,
    mut out: W,
    joiner: &mut PairedCallJoiner<'_>,
) -> Result<Summary, PipelineError> {
    let mut summary = Summary::default();
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        summary.records += 1;
        match joiner.push_line(&line) {
            Ok(joined) => {
                for call in &joined {
                    writeln!(out, "{call}")?;
                }
                summary.emitted += joined.len();
            }
            Err(err) => summary.skip(leading_field(&line), &err),
        }
    }
    let joined = joiner.finish();
    for call in &joined {
        writeln!(out, "{call}")?;
    }
    summary.emitted += joined.len();
    out.flush()?;
    Ok(summary)
}

/// Per-site rows from a nanopolish `call-methylation` table.
pub fn split_nanopolish<R: BufRead, W: Write>(input: R, mut out: W) -> Result<Summary, PipelineError> {
    let mut summary = Summary::default();
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() || NanopolishGroup::is_header(&line) {
            continue;
        }
        summary.records += 1;
        let group = match NanopolishGroup::parse(&line) {
            Ok(group) => group,
            Err(err) => {
                let read = line.split('\t').nth(4).unwrap_or_default();
                summary.skip(read, &err);
                continue;
            }
        };
        match group.sites() {
            Ok(sites) => {
                for site in &sites {
                    writeln!(out, "{site}")?;
                }
                summary.emitted += sites.len();
            }
            Err(err) => summary.skip(&group.read_name, &err),
        }
    }
    out.flush()?;
    Ok(summary)
}

/// Depth runs of the BED intervals in `input`.
///
/// Runs are written once the whole stream is consumed.
pub fn coverage<R: BufRead, W: Write>(
    input: R,
    mut out: W,
    track: &mut CoverageTrack,
) -> Result<Summary, PipelineError> {
    let mut summary = Summary::default();
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        summary.records += 1;
        if let Err(err) = track.add_bed_line(&line) {
            summary.skip(leading_field(&line), &err);
        }
    }
    for run in track.runs() {
        writeln!(out, "{run}")?;
        summary.emitted += 1;
    }
    out.flush()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_lines_are_named_by_first_field() {
        assert_eq!(leading_field("r1\t0\tchr1"), "r1");
        assert_eq!(leading_field("garbage"), "garbage");
        assert_eq!(leading_field(""), "");
    }

    #[test]
    fn io_failures_keep_their_source() {
        let err = PipelineError::from(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        let source = std::error::Error::source(&err)
            .and_then(|source| source.downcast_ref::<io::Error>())
            .map(io::Error::kind);
        assert_eq!(source, Some(io::ErrorKind::BrokenPipe));
    }
}
