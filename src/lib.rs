//! # Single-read base modification mapping
//!
//! Coordinate mapping between nanopore reads and a reference genome, driven
//! by the alignment CIGAR. The crate decodes alignment records, expands read
//! and reference data into one shared coordinate frame, scans that frame for
//! a sequence motif (usually `CG`) and emits per-read modification calls.
//!
//! ## Pipeline
//!
//! 1. **Decode**: [`cigar::Cigar`] and [`alignment::AlignmentRecord`] parse a
//!    SAM text line.
//! 2. **Expand**: [`frame::FrameLayout`] walks the cigar once and
//!    [`frame::ExpandedFrame`] places reference bases, query bases and
//!    reference positions side by side, re-oriented for reverse strand reads.
//! 3. **Call**: [`motif::MotifScanner`] finds motif sites in the expanded
//!    reference and [`caller`] turns the matching query slice (or a basecaller
//!    probability) into a [`motif::ModificationCall`].
//! 4. **Rewrite**: [`scramble::Scrambler`] recolours called sites in the query
//!    sequence for genome browsers and regenerates the MD tag with [`md`].
//!
//! [`pipeline`] runs these steps over text streams, skipping records that
//! fail. The same module drives the companion tools: 1D2 read pairing
//! ([`pairing`]), nanopolish row conversion and depth runs ([`coverage`]).
//!
//! ## Usage Example
//!
//! ```
//! use modmap::alignment::AlignmentRecord;
//! use modmap::caller::{prepare_query, SequenceCaller};
//! use modmap::motif::MotifConfig;
//!
//! let record = AlignmentRecord::from_sam_line(
//!     "read1\t0\tchr1\t11\t60\t6M\t*\t0\t0\tAZGTCG\t*",
//! )?;
//! let caller = SequenceCaller::new(&MotifConfig::default(), 0.0)?;
//! let query = prepare_query(&record, None)?;
//! let calls = caller.call(&record, b"ACGTCG", &query)?;
//! assert_eq!(calls.len(), 2);
//! assert_eq!(calls[0].to_string(), "chr1\t11\t13\tread1\t1\t+");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod alignment; // SAM text records, flags and optional fields
pub mod caller; // Sequence and probability based modification callers
pub mod cigar; // CIGAR decoding and span aggregation
pub mod coverage; // Depth runs from BED intervals
pub mod frame; // Expanded coordinate frame
pub mod md; // MD difference tag codec
pub mod motif; // Motif scanning and call records
pub mod pairing; // 1D2 read pairing and paired call join
pub mod pipeline; // Line stream drivers behind the subcommands
pub mod reference; // Lazily opened reference genome
pub mod scramble; // Browser colour coding of called sites
pub mod stats; // Per-record alignment statistics
pub mod tables; // Read, annotation, probability and call tables

// Re-exports for convenience
pub use alignment::{AlignmentRecord, Flags, Strand};
pub use cigar::{Cigar, CigarOp, CigarOpKind};
pub use frame::{ExpandedFrame, FrameLayout};
pub use motif::{CallValue, ModificationCall, MotifConfig, MotifScanner};

use thiserror::Error;

/// Errors confined to a single alignment record.
///
/// None of these abort a stream: the record is reported and skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Malformed cigar or record field grammar.
    #[error("malformed {context}: {detail}")]
    Parse {
        /// What was being parsed.
        context: &'static str,
        /// Description of the problem.
        detail: String,
    },

    /// Clip operations claim more bases than the query holds.
    #[error("clips of {leading}+{trailing} bases exceed query length {query_len}")]
    ClipOverflow {
        /// Bases clipped at the start.
        leading: usize,
        /// Bases clipped at the end.
        trailing: usize,
        /// Length of the query the clips were applied to.
        query_len: usize,
    },

    /// A per-base array does not have the length the cigar implies.
    #[error("cigar implies {expected} {domain} values but {actual} were supplied")]
    CigarMismatch {
        /// Which array disagreed with the cigar.
        domain: &'static str,
        /// Length derived from the cigar.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// Contig, read or table entry missing from a loaded resource.
    #[error("{kind} '{name}' not found")]
    Lookup {
        /// Kind of entry that was looked up.
        kind: &'static str,
        /// Name that was looked up.
        name: String,
    },

    /// Malformed or inconsistent MD difference tag.
    #[error("malformed difference tag '{tag}': {detail}")]
    TagFormat {
        /// Tag text as found in the record.
        tag: String,
        /// Description of the problem.
        detail: String,
    },
}

impl RecordError {
    #[cold]
    pub(crate) fn parse(context: &'static str, detail: impl Into<String>) -> Self {
        Self::Parse {
            context,
            detail: detail.into(),
        }
    }

    #[cold]
    pub(crate) fn lookup(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Lookup {
            kind,
            name: name.into(),
        }
    }

    #[cold]
    pub(crate) fn tag_format(tag: &str, detail: impl Into<String>) -> Self {
        Self::TagFormat {
            tag: tag.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn check_len(
        domain: &'static str,
        expected: usize,
        actual: usize,
    ) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::CigarMismatch {
                domain,
                expected,
                actual,
            })
        }
    }
}
