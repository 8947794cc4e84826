//! CIGAR decoding and operation-length aggregation.
//!
//! A decoded [`Cigar`] keeps its operations in alignment order, so it can be
//! re-rendered to the exact text it was parsed from.

use std::fmt;
use std::str::FromStr;

use crate::RecordError;

/// CIGAR operation kinds describing how a read aligns to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOpKind {
    /// Alignment match, either sequence match or mismatch (`M`).
    Match,
    /// Insertion relative to the reference (`I`).
    Insertion,
    /// Deletion relative to the reference (`D`).
    Deletion,
    /// Skipped reference region, e.g. an intron (`N`).
    Skip,
    /// Soft clipping, sequence present in read only (`S`).
    SoftClip,
    /// Hard clipping, trimmed sequence not present in the record (`H`).
    HardClip,
    /// Silent padding (`P`).
    Padding,
    /// Sequence match (`=`).
    SequenceMatch,
    /// Sequence mismatch (`X`).
    SequenceMismatch,
}

impl CigarOpKind {
    /// Decode an operator symbol.
    pub fn from_symbol(symbol: u8) -> Option<Self> {
        let kind = match symbol {
            b'M' => Self::Match,
            b'I' => Self::Insertion,
            b'D' => Self::Deletion,
            b'N' => Self::Skip,
            b'S' => Self::SoftClip,
            b'H' => Self::HardClip,
            b'P' => Self::Padding,
            b'=' => Self::SequenceMatch,
            b'X' => Self::SequenceMismatch,
            _ => return None,
        };
        Some(kind)
    }

    /// Operator symbol as written in a CIGAR string.
    pub fn symbol(self) -> u8 {
        match self {
            Self::Match => b'M',
            Self::Insertion => b'I',
            Self::Deletion => b'D',
            Self::Skip => b'N',
            Self::SoftClip => b'S',
            Self::HardClip => b'H',
            Self::Padding => b'P',
            Self::SequenceMatch => b'=',
            Self::SequenceMismatch => b'X',
        }
    }

    /// Whether the operation consumes bases of the stored query sequence.
    pub fn consumes_query(self) -> bool {
        matches!(
            self,
            Self::Match
                | Self::Insertion
                | Self::SoftClip
                | Self::SequenceMatch
                | Self::SequenceMismatch
        )
    }

    /// Whether the operation advances the reference coordinate.
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            Self::Match
                | Self::Deletion
                | Self::Skip
                | Self::SequenceMatch
                | Self::SequenceMismatch
        )
    }

    /// Whether the operation pairs a query base with a reference base.
    pub fn is_aligned(self) -> bool {
        matches!(
            self,
            Self::Match | Self::SequenceMatch | Self::SequenceMismatch
        )
    }

    /// Whether the operation is a soft or hard clip.
    pub fn is_clip(self) -> bool {
        matches!(self, Self::SoftClip | Self::HardClip)
    }
}

/// CIGAR operation with length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    /// Operation kind.
    pub kind: CigarOpKind,
    /// Number of bases affected by the operation.
    pub len: u32,
}

impl CigarOp {
    /// Construct a new CIGAR operation.
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        Self { kind, len }
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.len, self.kind.symbol() as char)
    }
}

/// Decoded CIGAR: ordered sequence of operations.
///
/// The empty cigar stands for the `*` placeholder of unmapped records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cigar {
    ops: Vec<CigarOp>,
}

impl Cigar {
    /// Wrap already decoded operations.
    pub fn new(ops: Vec<CigarOp>) -> Self {
        Self { ops }
    }

    /// Decode a cigar string of repeated `<length><operator>` pairs.
    ///
    /// `*` decodes to the empty cigar; the empty string is rejected.
    pub fn parse(text: &str) -> Result<Self, RecordError> {
        if text == "*" {
            return Ok(Self::default());
        }
        if text.is_empty() {
            return Err(RecordError::parse("cigar", "empty cigar string"));
        }

        let mut ops = Vec::new();
        let mut len: Option<u32> = None;
        for (offset, &byte) in text.as_bytes().iter().enumerate() {
            if byte.is_ascii_digit() {
                let digit = u32::from(byte - b'0');
                let next = len
                    .unwrap_or(0)
                    .checked_mul(10)
                    .and_then(|value| value.checked_add(digit))
                    .ok_or_else(|| {
                        RecordError::parse("cigar", format!("length overflow in '{text}'"))
                    })?;
                len = Some(next);
                continue;
            }

            let kind = CigarOpKind::from_symbol(byte).ok_or_else(|| {
                RecordError::parse(
                    "cigar",
                    format!("unknown operator '{}' at offset {offset} in '{text}'", byte as char),
                )
            })?;
            let op_len = len.take().ok_or_else(|| {
                RecordError::parse(
                    "cigar",
                    format!("operator '{}' at offset {offset} has no length", byte as char),
                )
            })?;
            ops.push(CigarOp::new(kind, op_len));
        }

        if len.is_some() {
            return Err(RecordError::parse(
                "cigar",
                format!("trailing length without operator in '{text}'"),
            ));
        }

        Ok(Self { ops })
    }

    /// Decoded operations in alignment order.
    pub fn ops(&self) -> &[CigarOp] {
        &self.ops
    }

    /// Iterate over the operations.
    pub fn iter(&self) -> std::slice::Iter<'_, CigarOp> {
        self.ops.iter()
    }

    /// True for the `*` cigar of unmapped records.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Sum of the lengths of all operations whose symbol is in `include`.
    ///
    /// Symbols that are not cigar operators simply never match.
    pub fn ops_length(&self, include: &str) -> usize {
        let include = include.as_bytes();
        self.ops
            .iter()
            .filter(|op| include.contains(&op.kind.symbol()))
            .map(|op| op.len as usize)
            .sum()
    }

    /// Number of reference bases covered by the alignment (`MDN=X`).
    pub fn reference_span(&self) -> usize {
        self.ops_length("MDN=X")
    }

    /// Length of the stored query sequence including soft clips (`MIS=X`).
    pub fn query_span(&self) -> usize {
        self.ops_length("MIS=X")
    }

    /// Number of query bases taking part in the alignment (`MI=X`).
    pub fn mapped_span(&self) -> usize {
        self.ops_length("MI=X")
    }

    /// Clipped bases at the start of the query.
    ///
    /// Hard clips are only counted when `include_hard` is set, i.e. when the
    /// sequence the clips are applied to still contains those bases.
    pub fn leading_clips(&self, include_hard: bool) -> usize {
        clip_len(self.ops.iter().take_while(|op| op.kind.is_clip()), include_hard)
    }

    /// Clipped bases at the end of the query, see [`Cigar::leading_clips`].
    pub fn trailing_clips(&self, include_hard: bool) -> usize {
        let leading = self.ops.iter().take_while(|op| op.kind.is_clip()).count();
        clip_len(
            self.ops[leading..].iter().rev().take_while(|op| op.kind.is_clip()),
            include_hard,
        )
    }
}

fn clip_len<'a>(ops: impl Iterator<Item = &'a CigarOp>, include_hard: bool) -> usize {
    ops.filter(|op| op.kind == CigarOpKind::SoftClip || include_hard)
        .map(|op| op.len as usize)
        .sum()
}

impl fmt::Display for Cigar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ops.is_empty() {
            return f.write_str("*");
        }
        for op in &self.ops {
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

impl FromStr for Cigar {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'a> IntoIterator for &'a Cigar {
    type Item = &'a CigarOp;
    type IntoIter = std::slice::Iter<'a, CigarOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}
