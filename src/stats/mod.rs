//! Per-record alignment summary.

use std::fmt;

use crate::alignment::{AlignmentRecord, Flags};
use crate::RecordError;

/// Column names of [`AlignmentStats`] lines.
pub const STATS_HEADER: &str = "ID\tflag\tlength\tmapped_length\tidentity";

/// Length and identity summary of one alignment record.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentStats {
    /// Read identifier.
    pub query_name: String,
    /// Flag bits.
    pub flags: Flags,
    /// Read length covered by the cigar, clips included.
    pub length: usize,
    /// Query bases inside the alignment.
    pub mapped_length: usize,
    /// BLAST identity from the `NM` tag, if present.
    pub identity: Option<f64>,
}

impl AlignmentStats {
    /// Summarize a record.
    pub fn from_record(record: &AlignmentRecord) -> Result<Self, RecordError> {
        let (length, mapped_length) = if record.cigar.is_empty() {
            (record.sequence.as_ref().map_or(0, Vec::len), 0)
        } else {
            (record.cigar.query_span(), record.cigar.mapped_span())
        };
        let identity = record
            .tag("NM")
            .map(|field| {
                let edits: usize = field
                    .value
                    .parse()
                    .map_err(|_| RecordError::parse("NM tag", format!("invalid value '{}'", field.value)))?;
                Ok::<_, RecordError>(if mapped_length > 0 {
                    (mapped_length as f64 - edits as f64) / mapped_length as f64
                } else {
                    0.0
                })
            })
            .transpose()?;

        Ok(Self {
            query_name: record.query_name.clone(),
            flags: record.flags,
            length,
            mapped_length,
            identity,
        })
    }
}

impl fmt::Display for AlignmentStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t",
            self.query_name,
            self.flags.bits(),
            self.length,
            self.mapped_length
        )?;
        match self.identity {
            Some(identity) => write!(f, "{identity:.4}"),
            None => f.write_str("NA"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lengths_and_identity() {
        let record =
            AlignmentRecord::from_sam_line("r1\t0\tchr1\t5\t60\t2S6M2I1D\t*\t0\t0\tAACGTACGTT\t*\tNM:i:4")
                .unwrap();
        let stats = AlignmentStats::from_record(&record).unwrap();
        assert_eq!((stats.length, stats.mapped_length), (10, 8));
        assert_eq!(stats.to_string(), "r1\t0\t10\t8\t0.5000");
    }

    #[test]
    fn unaligned_record_uses_sequence_length() {
        let record = AlignmentRecord::from_sam_line("r2\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\t*").unwrap();
        let stats = AlignmentStats::from_record(&record).unwrap();
        assert_eq!(stats.to_string(), "r2\t4\t4\t0\tNA");
    }
}
