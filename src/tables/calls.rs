use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use super::{table_lines, TableError};
use crate::alignment::Strand;
use crate::motif::CallValue;

/// Layout of a single-read call table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFormat {
    /// `chr begin end id log_ratio strand log_p_mod log_p_unmod`; the
    /// threshold applies to the absolute log-likelihood ratio.
    Nanopolish,
    /// `chr begin end id value strand score`, as written by `call-seq`; the
    /// threshold applies to the score.
    Flappie,
}

impl CallFormat {
    /// Threshold used when none is given.
    pub fn default_threshold(self) -> f64 {
        match self {
            Self::Nanopolish => 2.5,
            Self::Flappie => 3.0,
        }
    }
}

impl FromStr for CallFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nanopolish" => Ok(Self::Nanopolish),
            "flappie" => Ok(Self::Flappie),
            other => Err(format!("unknown call table format '{other}'")),
        }
    }
}

/// Call loaded from a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCall {
    /// Reference contig name.
    pub chrom: String,
    /// 0-based reference start.
    pub begin: u64,
    /// 0-based exclusive reference end.
    pub end: u64,
    /// Strand of the read.
    pub strand: Strand,
    /// Call value.
    pub value: CallValue,
}

/// Thresholded calls keyed by read identifier.
#[derive(Debug, Clone, Default)]
pub struct CallTable {
    records: HashMap<String, Vec<TableCall>>,
}

impl CallTable {
    /// Load a call table, keeping calls that pass `threshold`.
    pub fn from_path(path: &Path, format: CallFormat, threshold: f64) -> Result<Self, TableError> {
        let mut table = Self::default();
        let mut skipped = 0usize;
        for item in table_lines(path)? {
            let (line_no, line) = item?;
            let fields: Vec<&str> = line.trim_end().split('\t').collect();
            let expected = match format {
                CallFormat::Nanopolish => 8,
                CallFormat::Flappie => 7,
            };
            if fields.len() < expected {
                return Err(TableError::malformed(
                    path,
                    line_no,
                    format!("expected {expected} fields, found {}", fields.len()),
                ));
            }
            let malformed = |what: &str, value: &str| {
                TableError::malformed(path, line_no, format!("bad {what} '{value}'"))
            };
            let number = |value: &str| value.parse::<f64>().map_err(|_| malformed("number", value));
            let coordinate = |value: &str| value.parse::<u64>().map_err(|_| malformed("coordinate", value));

            let value = match format {
                CallFormat::Nanopolish => {
                    let ratio = number(fields[4])?;
                    (ratio.abs() >= threshold).then(|| {
                        if ratio >= threshold {
                            CallValue::Modified
                        } else {
                            CallValue::Unmodified
                        }
                    })
                }
                CallFormat::Flappie => {
                    let value = CallValue::from_code(fields[4]).ok_or_else(|| malformed("call value", fields[4]))?;
                    (number(fields[6])? >= threshold).then_some(value)
                }
            };
            let Some(value) = value else {
                skipped += 1;
                continue;
            };

            let call = TableCall {
                chrom: fields[0].to_string(),
                begin: coordinate(fields[1])?,
                end: coordinate(fields[2])?,
                strand: fields[5].parse().map_err(|_| malformed("strand", fields[5]))?,
                value,
            };
            table.insert(fields[3], call);
        }
        debug!(reads = table.len(), skipped, path = %path.display(), "loaded call table");
        Ok(table)
    }

    /// Add a call for a read.
    pub fn insert(&mut self, read_id: impl Into<String>, call: TableCall) {
        self.records.entry(read_id.into()).or_default().push(call);
    }

    /// Calls of `read_id` on `chrom` and `strand` lying inside
    /// `[begin, end)`.
    pub fn overlapping(
        &self,
        read_id: &str,
        chrom: &str,
        begin: u64,
        end: u64,
        strand: Strand,
    ) -> Vec<&TableCall> {
        self.records
            .get(read_id)
            .map(|calls| {
                calls
                    .iter()
                    .filter(|call| {
                        call.chrom == chrom
                            && call.begin >= begin
                            && call.end <= end
                            && call.strand == strand
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of reads with at least one call.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no call passed the threshold.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.tsv");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn nanopolish_ratios_are_thresholded_both_ways() {
        let (_dir, path) = write(
            "chr1\t10\t12\tr1\t3.1\t+\t-1\t-4\n\
             chr1\t20\t22\tr1\t-2.6\t+\t-4\t-1\n\
             chr1\t30\t32\tr1\t1.0\t+\t-2\t-3\n",
        );
        let table = CallTable::from_path(&path, CallFormat::Nanopolish, 2.5).unwrap();
        let calls = table.overlapping("r1", "chr1", 0, 100, Strand::Forward);
        let values: Vec<CallValue> = calls.iter().map(|c| c.value).collect();
        assert_eq!(values, vec![CallValue::Modified, CallValue::Unmodified]);
    }

    #[test]
    fn flappie_scores_and_overlap_filter() {
        let (_dir, path) = write(
            "chr1\t10\t12\tr1\t1\t-\t12.5\n\
             chr1\t14\t16\tr1\t0\t-\t1.0\n\
             chr2\t10\t12\tr1\t0\t-\t30\n",
        );
        let table =
            CallTable::from_path(&path, CallFormat::Flappie, CallFormat::Flappie.default_threshold())
                .unwrap();
        assert_eq!(table.overlapping("r1", "chr1", 10, 12, Strand::Reverse).len(), 1);
        assert!(table.overlapping("r1", "chr1", 11, 12, Strand::Reverse).is_empty());
        assert!(table.overlapping("r1", "chr1", 10, 12, Strand::Forward).is_empty());
        assert_eq!(table.overlapping("r1", "chr2", 0, 50, Strand::Reverse).len(), 1);
        assert!(table.overlapping("r2", "chr1", 0, 50, Strand::Reverse).is_empty());
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("Nanopolish".parse::<CallFormat>(), Ok(CallFormat::Nanopolish));
        assert_eq!("flappie".parse::<CallFormat>(), Ok(CallFormat::Flappie));
        assert!("guppy".parse::<CallFormat>().is_err());
    }
}
