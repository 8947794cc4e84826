//! Genome-browser colour coding of single-read calls.
//!
//! Browsers such as IGV colour bisulfite alignments by their mismatches. The
//! [`Scrambler`] imitates that look for nanopore reads: at every `CG` of the
//! reference span the two aligned query bases are replaced according to the
//! call state of the site, then the MD tag is regenerated so mismatch
//! colouring follows the rewritten bases.

use std::str::FromStr;

use tracing::trace;

use crate::alignment::{AlignmentRecord, Strand};
use crate::frame::{clip_range, FrameLayout};
use crate::md::{decode_md, encode_md};
use crate::tables::TableCall;
use crate::RecordError;

const SITE: &[u8] = b"CG";
const NO_CALL: u8 = b'-';

/// Colour scheme of the target browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisualizationMode {
    /// IGV bisulfite mode.
    #[default]
    Igv,
    /// Gviz `AlignmentsTrack`.
    Gviz,
}

impl FromStr for VisualizationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "igv" => Ok(Self::Igv),
            "gviz" => Ok(Self::Gviz),
            other => Err(format!("unknown visualization mode '{other}'")),
        }
    }
}

/// Settings of a [`Scrambler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrambleConfig {
    /// Colour scheme.
    pub mode: VisualizationMode,
    /// Replace aligned query bases by the reference before recolouring.
    pub polish: bool,
}

impl ScrambleConfig {
    /// Select the colour scheme.
    pub fn with_mode(mut self, mode: VisualizationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enable or disable polishing.
    pub fn with_polish(mut self, polish: bool) -> Self {
        self.polish = polish;
        self
    }
}

/// Rewritten query sequence and its MD tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrambledRead {
    /// Full `SEQ` field, clips included.
    pub sequence: Vec<u8>,
    /// MD tag of the rewritten alignment.
    pub md: String,
}

/// Rewrites called sites of alignment records.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scrambler {
    config: ScrambleConfig,
}

impl Scrambler {
    /// Create a scrambler.
    pub fn new(config: ScrambleConfig) -> Self {
        Self { config }
    }

    /// Settings in use.
    pub fn config(&self) -> &ScrambleConfig {
        &self.config
    }

    fn replacement(&self, strand: Strand, pattern: &[u8]) -> Option<&'static [u8]> {
        use VisualizationMode::{Gviz, Igv};
        let replacement: &'static [u8] = match (self.config.mode, strand, pattern) {
            (Igv, _, b"11") => b"CG",
            (Igv, Strand::Forward, b"00") => b"TG",
            (Igv, Strand::Reverse, b"00") => b"CA",
            (Igv, _, b"--") => b"AG",
            (Gviz, _, b"11") => b"AG",
            (Gviz, _, b"00") => b"TG",
            (Gviz, _, b"--") => b"CG",
            _ => return None,
        };
        Some(replacement)
    }

    /// Recolour the sites of a mapped record.
    ///
    /// `reference_span` holds the reference bases covered by the alignment;
    /// `calls` are the record's calls inside that span.
    pub fn scramble(
        &self,
        record: &AlignmentRecord,
        reference_span: &[u8],
        calls: &[&TableCall],
    ) -> Result<ScrambledRead, RecordError> {
        let mut sequence = record
            .sequence
            .as_deref()
            .ok_or_else(|| RecordError::lookup("query sequence", &record.query_name))?
            .to_ascii_uppercase();
        let layout = FrameLayout::from_cigar(&record.cigar);
        let reference = reference_span.to_ascii_uppercase();
        RecordError::check_len("reference", layout.reference_len(), reference.len())?;
        let range = clip_range(sequence.len(), &record.cigar, false)?;
        RecordError::check_len("query", layout.query_len(), range.len())?;

        let aligned: Vec<(usize, usize)> = layout
            .slots()
            .iter()
            .filter_map(|slot| Some((range.start + slot.query?, slot.reference?)))
            .collect();

        let mut mapped = reference.clone();
        if !self.config.polish {
            for &(query_idx, ref_idx) in &aligned {
                mapped[ref_idx] = sequence[query_idx];
            }
        }

        let start = record.start();
        let mut marks = vec![NO_CALL; reference.len()];
        for call in calls {
            let (Some(begin), Some(end)) = (call.begin.checked_sub(start), call.end.checked_sub(start)) else {
                continue;
            };
            let end = (end as usize).min(marks.len());
            if let Some(window) = marks.get_mut(begin as usize..end) {
                window.fill(call.value.code());
            }
        }

        let strand = record.strand();
        let mut offset = 0;
        while let Some(found) = find(&reference[offset..], SITE) {
            let site = offset + found..offset + found + SITE.len();
            match self.replacement(strand, &marks[site.clone()]) {
                Some(replacement) => mapped[site.clone()].copy_from_slice(replacement),
                None => trace!(
                    read = %record.query_name,
                    begin = start + site.start as u64,
                    "mixed call pattern left unchanged"
                ),
            }
            offset = site.end;
        }

        for &(query_idx, ref_idx) in &aligned {
            sequence[query_idx] = mapped[ref_idx];
        }
        let md = encode_md(&reference, &sequence[range], &layout)?;
        Ok(ScrambledRead { sequence, md })
    }

    /// Recolour `record` in place, replacing its sequence and MD tag.
    ///
    /// Unmapped records are left untouched and `false` is returned.
    pub fn scramble_record(
        &self,
        record: &mut AlignmentRecord,
        reference_span: &[u8],
        calls: &[&TableCall],
    ) -> Result<bool, RecordError> {
        if record.is_unmapped() {
            return Ok(false);
        }
        let ScrambledRead { sequence, md } = self.scramble(record, reference_span, calls)?;
        record.sequence = Some(sequence);
        record.set_tag("MD", "Z", md);
        Ok(true)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Reference span of a record reconstructed from its MD tag, or `None` when
/// the record carries no MD tag.
pub fn reference_from_md(record: &AlignmentRecord) -> Result<Option<Vec<u8>>, RecordError> {
    let Some(tag) = record.tag("MD") else {
        return Ok(None);
    };
    let sequence = record
        .sequence
        .as_deref()
        .ok_or_else(|| RecordError::lookup("query sequence", &record.query_name))?;
    let range = clip_range(sequence.len(), &record.cigar, false)?;
    let layout = FrameLayout::from_cigar(&record.cigar);
    decode_md(&tag.value, &layout, &sequence[range]).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motif::CallValue;

    fn table_call(chrom: &str, begin: u64, end: u64, strand: Strand, value: CallValue) -> TableCall {
        TableCall {
            chrom: chrom.to_string(),
            begin,
            end,
            strand,
            value,
        }
    }

    fn record(flag: u16, cigar: &str, seq: &str) -> AlignmentRecord {
        AlignmentRecord::from_sam_line(&format!(
            "r1\t{flag}\tchr1\t1\t60\t{cigar}\t*\t0\t0\t{seq}\t*"
        ))
        .unwrap()
    }

    #[test]
    fn igv_forward_recolours_called_and_uncalled_sites() {
        let rec = record(0, "8M", "ACGTTCGA");
        let call = table_call("chr1", 1, 3, Strand::Forward, CallValue::Modified);
        let out = Scrambler::default().scramble(&rec, b"ACGTTCGA", &[&call]).unwrap();
        assert_eq!(out.sequence, b"ACGTTAGA");
        assert_eq!(out.md, "5C2");
    }

    #[test]
    fn gviz_uses_its_own_table() {
        let rec = record(0, "8M", "ACGTTCGA");
        let call = table_call("chr1", 1, 3, Strand::Forward, CallValue::Modified);
        let scrambler = Scrambler::new(ScrambleConfig::default().with_mode(VisualizationMode::Gviz));
        let out = scrambler.scramble(&rec, b"ACGTTCGA", &[&call]).unwrap();
        assert_eq!(out.sequence, b"AAGTTCGA");
        assert_eq!(out.md, "1C6");
    }

    #[test]
    fn igv_reverse_unmodified_becomes_ca() {
        let rec = record(16, "8M", "ACGTTCGA");
        let call = table_call("chr1", 5, 7, Strand::Reverse, CallValue::Unmodified);
        let out = Scrambler::default().scramble(&rec, b"ACGTTCGA", &[&call]).unwrap();
        assert_eq!(out.sequence, b"AAGTTCAA");
        assert_eq!(out.md, "1C4G1");
    }

    #[test]
    fn partial_patterns_are_left_alone() {
        let rec = record(0, "8M", "ACGTTCGA");
        let call = table_call("chr1", 1, 2, Strand::Forward, CallValue::Modified);
        let out = Scrambler::default().scramble(&rec, b"ACGTTCGA", &[&call]).unwrap();
        assert_eq!(out.sequence, b"ACGTTAGA");
    }

    #[test]
    fn polish_replaces_read_mismatches() {
        let rec = record(0, "8M", "ACGTTCGT");
        let raw = Scrambler::default().scramble(&rec, b"ACGTTCGA", &[]).unwrap();
        assert_eq!(raw.sequence, b"AAGTTAGT");
        assert_eq!(raw.md, "1C3C1A0");

        let polished = Scrambler::new(ScrambleConfig::default().with_polish(true))
            .scramble(&rec, b"ACGTTCGA", &[])
            .unwrap();
        assert_eq!(polished.sequence, b"AAGTTAGA");
        assert_eq!(polished.md, "1C3C2");
    }

    #[test]
    fn clips_are_kept_and_tag_is_rewritten_in_place() {
        let mut rec = record(0, "2S4M1S", "ttACGAg");
        rec.set_tag("MD", "Z", "4");
        let reference = reference_from_md(&rec).unwrap().unwrap();
        assert_eq!(reference, b"ACGA");

        assert!(Scrambler::default().scramble_record(&mut rec, &reference, &[]).unwrap());
        assert_eq!(rec.sequence.as_deref(), Some(&b"TTAAGAG"[..]));
        assert_eq!(rec.tag("MD").map(|t| t.value.as_str()), Some("1C2"));
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!("IGV".parse::<VisualizationMode>(), Ok(VisualizationMode::Igv));
        assert_eq!("GViz".parse::<VisualizationMode>(), Ok(VisualizationMode::Gviz));
        assert!("jbrowse".parse::<VisualizationMode>().is_err());
    }
}
