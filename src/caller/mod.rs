//! Single-read modification callers.
//!
//! [`SequenceCaller`] reads the modification state from basecaller symbols
//! in the query itself (a modified-base alphabet such as `Z` for 5mC).
//! [`ProbabilityCaller`] reads it from a per-base probability track.
//! Both locate sites with [`MotifScanner`] on the expanded reference.

use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::alignment::{AlignmentRecord, Strand};
use crate::frame::{expand_oriented, reverse_complement, trim_clips, ExpandedFrame, FrameLayout};
use crate::motif::{CallValue, ModificationCall, MotifConfig, MotifScanner};
use crate::tables::ReadEntry;
use crate::RecordError;

/// Errors raised while constructing a caller.
#[derive(Debug, Error)]
pub enum CallerError {
    /// A motif pattern failed to compile.
    #[error("invalid motif pattern: {0}")]
    Motif(#[from] regex::Error),

    /// A numeric parameter is out of range.
    #[error("invalid caller configuration: {0}")]
    InvalidConfig(String),
}

/// Clip-trimmed query bases and qualities in reference orientation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryData {
    /// Query bases, upper case.
    pub sequence: Vec<u8>,
    /// Phred+33 qualities, when known.
    pub quality: Option<Vec<u8>>,
}

/// Extract the aligned part of the query for `record`.
///
/// Without an external read the record's own `SEQ`/`QUAL` are used and only
/// soft clips are removed. An external read is the full basecalled molecule
/// in sequencing orientation: it is first brought into reference orientation
/// and then stripped of soft and hard clips.
pub fn prepare_query(
    record: &AlignmentRecord,
    external: Option<&ReadEntry>,
) -> Result<QueryData, RecordError> {
    let (sequence, quality) = match external {
        Some(entry) => {
            let (sequence, quality) = match record.strand() {
                Strand::Forward => (entry.sequence.clone(), entry.quality.clone()),
                Strand::Reverse => (
                    reverse_complement(&entry.sequence),
                    entry
                        .quality
                        .as_ref()
                        .map(|quality| quality.iter().rev().copied().collect()),
                ),
            };
            trim(record, &sequence, quality.as_deref(), true)?
        }
        None => {
            let sequence = record
                .sequence
                .as_deref()
                .ok_or_else(|| RecordError::lookup("query sequence", &record.query_name))?;
            trim(record, sequence, record.quality.as_deref(), false)?
        }
    };
    Ok(QueryData { sequence, quality })
}

fn trim(
    record: &AlignmentRecord,
    sequence: &[u8],
    quality: Option<&[u8]>,
    include_hard: bool,
) -> Result<(Vec<u8>, Option<Vec<u8>>), RecordError> {
    if let Some(quality) = quality {
        RecordError::check_len("quality", sequence.len(), quality.len())?;
    }
    let trimmed = trim_clips(sequence, &record.cigar, include_hard)?.to_ascii_uppercase();
    let quality = quality
        .map(|quality| trim_clips(quality, &record.cigar, include_hard).map(<[u8]>::to_vec))
        .transpose()?;
    Ok((trimmed, quality))
}

/// Expanded frame of a mapped record, or `None` for unmapped records.
fn expand(
    record: &AlignmentRecord,
    reference_span: &[u8],
    query: &QueryData,
) -> Result<Option<(FrameLayout, ExpandedFrame)>, RecordError> {
    if record.is_unmapped() {
        return Ok(None);
    }
    let layout = FrameLayout::from_cigar(&record.cigar);
    let frame = ExpandedFrame::build(
        &layout,
        &reference_span.to_ascii_uppercase(),
        &query.sequence,
        record.start(),
        record.strand(),
    )?;
    Ok(Some((layout, frame)))
}

fn emit(
    record: &AlignmentRecord,
    begin: u64,
    end: u64,
    value: CallValue,
    score: Option<f64>,
) -> ModificationCall {
    ModificationCall {
        reference_name: Arc::from(record.reference_name.as_str()),
        begin,
        end,
        read_id: Arc::from(record.query_name.as_str()),
        value,
        strand: record.strand(),
        score,
    }
}

/// Calls modifications from modified-base symbols in the query.
#[derive(Debug, Clone)]
pub struct SequenceCaller {
    scanner: MotifScanner,
    min_quality: f64,
}

impl SequenceCaller {
    /// Create a caller; sites whose mean base quality is below
    /// `min_quality` are suppressed.
    pub fn new(config: &MotifConfig, min_quality: f64) -> Result<Self, CallerError> {
        if !min_quality.is_finite() {
            return Err(CallerError::InvalidConfig(format!(
                "minimum quality must be finite, got {min_quality}"
            )));
        }
        Ok(Self {
            scanner: MotifScanner::new(config)?,
            min_quality,
        })
    }

    /// Calls of one record in ascending reference order.
    ///
    /// `reference_span` holds the reference bases covered by the alignment.
    pub fn call(
        &self,
        record: &AlignmentRecord,
        reference_span: &[u8],
        query: &QueryData,
    ) -> Result<Vec<ModificationCall>, RecordError> {
        let Some((layout, frame)) = expand(record, reference_span, query)? else {
            return Ok(Vec::new());
        };
        let qualities = query
            .quality
            .as_ref()
            .map(|quality| {
                let values: Vec<Option<u8>> = quality.iter().copied().map(Some).collect();
                expand_oriented(&layout, &values, None, record.strand())
            })
            .transpose()?;

        let mut calls = Vec::new();
        for site in self.scanner.sites(&frame) {
            let Some(value) = self.scanner.classify(&frame.query()[site.frame_range.clone()]) else {
                continue;
            };
            let score = qualities
                .as_ref()
                .map(|qualities| mean_quality(&qualities[site.frame_range.clone()]));
            if score.is_some_and(|score| score < self.min_quality) {
                trace!(read = %record.query_name, begin = site.begin, "site below quality threshold");
                continue;
            }
            calls.push(emit(record, site.begin, site.end, value, score));
        }
        Ok(calls)
    }
}

fn mean_quality(window: &[Option<u8>]) -> f64 {
    let (sum, count) = window
        .iter()
        .flatten()
        .fold((0u64, 0u64), |(sum, count), &q| {
            (sum + u64::from(q.saturating_sub(33)), count + 1)
        });
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

/// Decision parameters of [`ProbabilityCaller`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilityConfig {
    /// Encoded value that separates unmodified from modified.
    pub midpoint: f64,
    /// Minimum distance from the midpoint for a call to be emitted.
    pub threshold: f64,
    /// Offset of the modified base inside the motif match.
    pub modified_offset: usize,
}

impl Default for ProbabilityConfig {
    fn default() -> Self {
        Self {
            midpoint: 127.0,
            threshold: 0.0,
            modified_offset: 0,
        }
    }
}

impl ProbabilityConfig {
    /// Set the midpoint.
    pub fn with_midpoint(mut self, midpoint: f64) -> Self {
        self.midpoint = midpoint;
        self
    }

    /// Set the threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the offset of the modified base within the motif.
    pub fn with_modified_offset(mut self, modified_offset: usize) -> Self {
        self.modified_offset = modified_offset;
        self
    }

    /// Check that the parameters fit the unsigned 8-bit encoding.
    pub fn validate(&self) -> Result<(), CallerError> {
        if !(0.0..=255.0).contains(&self.midpoint) {
            return Err(CallerError::InvalidConfig(format!(
                "midpoint {} outside 0..=255",
                self.midpoint
            )));
        }
        if !(self.threshold >= 0.0 && self.threshold.is_finite()) {
            return Err(CallerError::InvalidConfig(format!(
                "threshold {} must be a non-negative number",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Calls modifications from a per-base probability track.
#[derive(Debug, Clone)]
pub struct ProbabilityCaller {
    scanner: MotifScanner,
    config: ProbabilityConfig,
}

impl ProbabilityCaller {
    /// Create a caller from motif patterns and decision parameters.
    pub fn new(motif: &MotifConfig, config: ProbabilityConfig) -> Result<Self, CallerError> {
        config.validate()?;
        Ok(Self {
            scanner: MotifScanner::new(motif)?,
            config,
        })
    }

    /// Decision parameters in use.
    pub fn config(&self) -> &ProbabilityConfig {
        &self.config
    }

    /// Calls of one record in ascending reference order.
    ///
    /// `probabilities` covers the full basecalled read in sequencing
    /// orientation, one value per base. The score of a call is its signed
    /// distance from the midpoint.
    pub fn call(
        &self,
        record: &AlignmentRecord,
        reference_span: &[u8],
        query: &QueryData,
        probabilities: &[u8],
    ) -> Result<Vec<ModificationCall>, RecordError> {
        let Some((layout, frame)) = expand(record, reference_span, query)? else {
            return Ok(Vec::new());
        };
        let strand = record.strand();

        let mut oriented: Vec<Option<u8>> = probabilities.iter().copied().map(Some).collect();
        if strand == Strand::Reverse {
            oriented.reverse();
        }
        let trimmed = trim_clips(&oriented, &record.cigar, true)?;
        let expanded = expand_oriented(&layout, trimmed, None, strand)?;

        let mut calls = Vec::new();
        for site in self.scanner.sites(&frame) {
            if self
                .scanner
                .classify(&frame.query()[site.frame_range.clone()])
                .is_none()
            {
                continue;
            }
            let index = site.frame_range.start + self.config.modified_offset;
            if index >= site.frame_range.end {
                continue;
            }
            let Some(probability) = expanded[index] else {
                continue;
            };
            let delta = f64::from(probability) - self.config.midpoint;
            if delta.abs() < self.config.threshold {
                continue;
            }
            let value = if delta > 0.0 {
                CallValue::Modified
            } else {
                CallValue::Unmodified
            };
            calls.push(emit(record, site.begin, site.end, value, Some(delta)));
        }
        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line: &str) -> AlignmentRecord {
        AlignmentRecord::from_sam_line(line).unwrap()
    }

    #[test]
    fn sequence_caller_scores_mean_quality() {
        let rec = record("r1\t0\tchr1\t1\t60\t1S6M\t*\t0\t0\tTAZGTCG\t#I+IIII");
        let query = prepare_query(&rec, None).unwrap();
        assert_eq!(query.sequence, b"AZGTCG");

        let caller = SequenceCaller::new(&MotifConfig::default(), 30.0).unwrap();
        let calls = caller.call(&rec, b"ACGTCG", &query).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].to_string(), "chr1\t4\t6\tr1\t0\t+\t40.00");

        let lenient = SequenceCaller::new(&MotifConfig::default(), 0.0).unwrap();
        let calls = lenient.call(&rec, b"ACGTCG", &query).unwrap();
        assert_eq!(calls[0].to_string(), "chr1\t1\t3\tr1\t1\t+\t25.00");
    }

    #[test]
    fn external_reverse_read_is_reoriented() {
        // Read ZGAAT sequenced on the reverse strand aligns as ATTCZ.
        let rec = record("r2\t16\tchr1\t1\t60\t1H4M\t*\t0\t0\t*\t*");
        let entry = ReadEntry {
            sequence: b"ZGAAT".to_vec(),
            quality: Some(b"ABCDE".to_vec()),
        };
        let query = prepare_query(&rec, Some(&entry)).unwrap();
        assert_eq!(query.sequence, b"TTCZ");
        assert_eq!(query.quality.as_deref(), Some(&b"DCBA"[..]));

        let caller = SequenceCaller::new(&MotifConfig::default(), 0.0).unwrap();
        let calls = caller.call(&rec, b"TTCG", &query).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            (calls[0].begin, calls[0].end, calls[0].value, calls[0].strand),
            (2, 4, CallValue::Modified, Strand::Reverse)
        );
    }

    #[test]
    fn unmapped_records_produce_no_calls() {
        let rec = record("r3\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\t*");
        let caller = SequenceCaller::new(&MotifConfig::default(), 0.0).unwrap();
        let query = prepare_query(&rec, None).unwrap();
        assert!(caller.call(&rec, b"", &query).unwrap().is_empty());
    }

    #[test]
    fn missing_sequence_is_a_lookup_error() {
        let rec = record("r4\t0\tchr1\t1\t60\t4M\t*\t0\t0\t*\t*");
        assert!(matches!(
            prepare_query(&rec, None),
            Err(RecordError::Lookup { .. })
        ));
    }

    #[test]
    fn probability_calls_use_midpoint_and_threshold() {
        let rec = record("r5\t0\tchr1\t101\t60\t2S8M\t*\t0\t0\tTTACGTTCGC\t*");
        let query = prepare_query(&rec, None).unwrap();
        let probabilities = [0, 0, 0, 250, 0, 0, 0, 10, 0, 130];

        let caller = ProbabilityCaller::new(
            &MotifConfig::default(),
            ProbabilityConfig::default().with_threshold(5.0),
        )
        .unwrap();
        let calls = caller
            .call(&rec, b"ACGTTCGC", &query, &probabilities)
            .unwrap();
        let summary: Vec<(u64, CallValue, Option<f64>)> =
            calls.iter().map(|c| (c.begin, c.value, c.score)).collect();
        assert_eq!(
            summary,
            vec![
                (101, CallValue::Modified, Some(123.0)),
                (105, CallValue::Unmodified, Some(-117.0)),
            ]
        );
    }

    #[test]
    fn probability_config_is_validated() {
        let bad = ProbabilityConfig::default().with_midpoint(300.0);
        assert!(ProbabilityCaller::new(&MotifConfig::default(), bad).is_err());
        let bad = ProbabilityConfig::default().with_threshold(-1.0);
        assert!(bad.validate().is_err());
    }
}
