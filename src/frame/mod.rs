//! Expanded coordinate frame shared by read and reference data.
//!
//! The frame has one slot per base of every cigar operation except clips and
//! padding. Aligned operations (`M`, `=`, `X`) fill a slot from both the query
//! and the reference, insertions from the query only, deletions and skips
//! from the reference only. The side without data is filled with a gap value.
//!
//! Reverse strand alignments are expanded in reference orientation first and
//! then reversed (and complemented for base arrays), so that the frame reads
//! in the orientation the molecule was sequenced in.

use std::ops::Range;

use crate::alignment::Strand;
use crate::cigar::{Cigar, CigarOpKind};
use crate::RecordError;

/// Gap sentinel for base-valued frame arrays.
pub const GAP: u8 = b'-';

/// Single position of the expanded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Operation that produced the slot.
    pub kind: CigarOpKind,
    /// Offset into the clip-trimmed query, if the slot consumes the query.
    pub query: Option<usize>,
    /// Offset into the reference span, if the slot consumes the reference.
    pub reference: Option<usize>,
}

/// Slot layout derived from one linear scan over a cigar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    slots: Vec<Slot>,
    query_len: usize,
    reference_len: usize,
}

impl FrameLayout {
    /// Build the layout for an alignment.
    pub fn from_cigar(cigar: &Cigar) -> Self {
        let mut slots = Vec::with_capacity(cigar.ops_length("MIDN=X"));
        let mut query_len = 0usize;
        let mut reference_len = 0usize;

        for op in cigar {
            if op.kind.is_clip() || op.kind == CigarOpKind::Padding {
                continue;
            }
            for _ in 0..op.len {
                let query = op.kind.consumes_query().then(|| {
                    query_len += 1;
                    query_len - 1
                });
                let reference = op.kind.consumes_reference().then(|| {
                    reference_len += 1;
                    reference_len - 1
                });
                slots.push(Slot {
                    kind: op.kind,
                    query,
                    reference,
                });
            }
        }

        Self {
            slots,
            query_len,
            reference_len,
        }
    }

    /// Frame slots in reference orientation.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Number of frame slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True for alignments without any aligned, inserted or deleted base.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of query bases the cigar consumes after clip trimming.
    pub fn query_len(&self) -> usize {
        self.query_len
    }

    /// Number of reference bases the cigar covers.
    pub fn reference_len(&self) -> usize {
        self.reference_len
    }

    /// Mask over the trimmed query: true where the base is aligned to the
    /// reference, false for inserted bases.
    pub fn read_mask(&self) -> Vec<bool> {
        self.slots
            .iter()
            .filter(|slot| slot.query.is_some())
            .map(|slot| slot.reference.is_some())
            .collect()
    }

    /// Mask over the reference span: true where a query base is aligned to
    /// the reference base, false for deleted or skipped bases.
    pub fn ref_mask(&self) -> Vec<bool> {
        self.slots
            .iter()
            .filter(|slot| slot.reference.is_some())
            .map(|slot| slot.query.is_some())
            .collect()
    }

    /// Place values indexed by query offset into the frame.
    pub fn expand_query<T: Copy>(&self, values: &[T], gap: T) -> Result<Vec<T>, RecordError> {
        RecordError::check_len("query", self.query_len, values.len())?;
        Ok(self
            .slots
            .iter()
            .map(|slot| slot.query.map_or(gap, |idx| values[idx]))
            .collect())
    }

    /// Place values indexed by reference offset into the frame.
    pub fn expand_reference<T: Copy>(&self, values: &[T], gap: T) -> Result<Vec<T>, RecordError> {
        RecordError::check_len("reference", self.reference_len, values.len())?;
        Ok(self
            .slots
            .iter()
            .map(|slot| slot.reference.map_or(gap, |idx| values[idx]))
            .collect())
    }

    /// 0-based reference coordinate of every slot.
    ///
    /// Inserted slots repeat the coordinate of the preceding reference slot
    /// (or `start` when the alignment opens with an insertion).
    pub fn positions(&self, start: u64) -> Vec<u64> {
        let mut last = start;
        self.slots
            .iter()
            .map(|slot| {
                if let Some(offset) = slot.reference {
                    last = start + offset as u64;
                }
                last
            })
            .collect()
    }
}

/// Reference bases, query bases and reference coordinates over one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedFrame {
    reference: Vec<u8>,
    query: Vec<u8>,
    positions: Vec<u64>,
    strand: Strand,
}

impl ExpandedFrame {
    /// Expand the reference span and clip-trimmed query of an alignment.
    ///
    /// `start` is the 0-based coordinate of the first reference base of the
    /// span. Both sequences are given in reference orientation.
    pub fn build(
        layout: &FrameLayout,
        reference: &[u8],
        query: &[u8],
        start: u64,
        strand: Strand,
    ) -> Result<Self, RecordError> {
        let mut reference = layout.expand_reference(reference, GAP)?;
        let mut query = layout.expand_query(query, GAP)?;
        let mut positions = layout.positions(start);

        if strand == Strand::Reverse {
            reverse_complement_in_place(&mut reference);
            reverse_complement_in_place(&mut query);
            positions.reverse();
        }

        Ok(Self {
            reference,
            query,
            positions,
            strand,
        })
    }

    /// Expanded reference bases.
    pub fn reference(&self) -> &[u8] {
        &self.reference
    }

    /// Expanded query bases.
    pub fn query(&self) -> &[u8] {
        &self.query
    }

    /// Expanded 0-based reference coordinates.
    pub fn positions(&self) -> &[u64] {
        &self.positions
    }

    /// Strand the frame was oriented for.
    pub fn strand(&self) -> Strand {
        self.strand
    }

    /// Number of frame slots.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True for an empty frame.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Half-open reference interval covered by a range of frame slots.
    pub fn span(&self, range: Range<usize>) -> Option<(u64, u64)> {
        let window = self.positions.get(range)?;
        let begin = window.iter().min()?;
        let end = window.iter().max()?;
        Some((*begin, end + 1))
    }
}

/// Expand a per-base value array (qualities, probabilities) of the trimmed
/// query and orient it like an [`ExpandedFrame`] built for `strand`.
pub fn expand_oriented<T: Copy>(
    layout: &FrameLayout,
    values: &[T],
    gap: T,
    strand: Strand,
) -> Result<Vec<T>, RecordError> {
    let mut expanded = layout.expand_query(values, gap)?;
    if strand == Strand::Reverse {
        expanded.reverse();
    }
    Ok(expanded)
}

/// Complement of a single base; non-nucleotide symbols map to themselves.
pub fn complement_base(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'T' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'a' => b't',
        b't' => b'a',
        b'c' => b'g',
        b'g' => b'c',
        other => other,
    }
}

/// Reverse complement of a sequence.
pub fn reverse_complement(sequence: &[u8]) -> Vec<u8> {
    sequence.iter().rev().map(|&base| complement_base(base)).collect()
}

fn reverse_complement_in_place(sequence: &mut [u8]) {
    sequence.reverse();
    for base in sequence.iter_mut() {
        *base = complement_base(*base);
    }
}

/// Range of a query that remains after removing leading and trailing clips.
pub fn clip_range(
    query_len: usize,
    cigar: &Cigar,
    include_hard: bool,
) -> Result<Range<usize>, RecordError> {
    let leading = cigar.leading_clips(include_hard);
    let trailing = cigar.trailing_clips(include_hard);
    if leading + trailing > query_len {
        return Err(RecordError::ClipOverflow {
            leading,
            trailing,
            query_len,
        });
    }
    Ok(leading..query_len - trailing)
}

/// Slice of `values` left after removing the clips of `cigar`.
pub fn trim_clips<'a, T>(
    values: &'a [T],
    cigar: &Cigar,
    include_hard: bool,
) -> Result<&'a [T], RecordError> {
    let range = clip_range(values.len(), cigar, include_hard)?;
    Ok(&values[range])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(cigar: &str) -> FrameLayout {
        FrameLayout::from_cigar(&Cigar::parse(cigar).unwrap())
    }

    #[test]
    fn layout_skips_clips_and_tracks_offsets() {
        let layout = layout("2S3M1I2D2M1H");
        assert_eq!(layout.len(), 3 + 1 + 2 + 2);
        assert_eq!(layout.query_len(), 6);
        assert_eq!(layout.reference_len(), 7);
        assert_eq!(layout.read_mask(), vec![true, true, true, false, true, true]);
        assert_eq!(
            layout.ref_mask(),
            vec![true, true, true, false, false, true, true]
        );
    }

    #[test]
    fn positions_repeat_across_insertions() {
        let layout = layout("2M2I1D2M");
        assert_eq!(layout.positions(10), vec![10, 11, 11, 11, 12, 13, 14]);
        assert_eq!(self::layout("1I2M").positions(5), vec![5, 5, 6]);
    }

    #[test]
    fn frame_gaps_insertions_and_deletions() {
        let layout = layout("2M1I1D2M");
        let frame =
            ExpandedFrame::build(&layout, b"ACGTA", b"ACTTA", 99, Strand::Forward).unwrap();
        assert_eq!(frame.reference(), b"AC-GTA");
        assert_eq!(frame.query(), b"ACT-TA");
        assert_eq!(frame.positions(), &[99, 100, 100, 101, 102, 103]);
        assert_eq!(frame.span(3..5), Some((101, 103)));
    }

    #[test]
    fn reverse_frame_is_reverse_complemented_after_expansion() {
        let layout = layout("4M");
        let frame = ExpandedFrame::build(&layout, b"AACG", b"AACG", 49, Strand::Reverse).unwrap();
        assert_eq!(frame.reference(), b"CGTT");
        assert_eq!(frame.query(), b"CGTT");
        assert_eq!(frame.positions(), &[52, 51, 50, 49]);
        assert_eq!(frame.span(0..2), Some((51, 53)));
    }

    #[test]
    fn mismatched_lengths_are_reported() {
        let layout = layout("3M");
        let err = ExpandedFrame::build(&layout, b"ACG", b"AC", 0, Strand::Forward).unwrap_err();
        assert_eq!(
            err,
            RecordError::CigarMismatch {
                domain: "query",
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn modified_symbols_survive_complement() {
        assert_eq!(reverse_complement(b"AZGN-c"), b"g-NCZT".to_vec());
    }

    #[test]
    fn clip_overflow_is_detected() {
        let cigar = Cigar::parse("3S2M3S").unwrap();
        assert_eq!(trim_clips(b"AACCGGTT", &cigar, false).unwrap(), b"CG");
        assert!(matches!(
            trim_clips(b"ACGT", &cigar, false),
            Err(RecordError::ClipOverflow { .. })
        ));
    }
}
