//! Genome wide read depth from BED intervals.
//!
//! Each contig keeps the depth changes at interval borders only, so memory
//! grows with the number of intervals rather than the contig length. The
//! output tiles every contig with runs of constant depth.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::tables::{table_lines, TableError};
use crate::RecordError;

#[derive(Debug, Clone, Default)]
struct ContigDepth {
    length: u64,
    changes: BTreeMap<u64, i64>,
}

/// Depth accumulator over the contigs of a genome.
#[derive(Debug, Clone, Default)]
pub struct CoverageTrack {
    contigs: BTreeMap<String, ContigDepth>,
}

impl CoverageTrack {
    /// Load contig lengths from a `name<TAB>length` table.
    pub fn from_sizes(path: &Path) -> Result<Self, TableError> {
        let mut track = Self::default();
        for item in table_lines(path)? {
            let (line_no, line) = item?;
            let mut fields = line.trim_end().split('\t');
            let (Some(name), Some(length)) = (fields.next(), fields.next()) else {
                return Err(TableError::malformed(path, line_no, "expected contig name and length"));
            };
            let length = length
                .parse()
                .map_err(|_| TableError::malformed(path, line_no, format!("bad contig length '{length}'")))?;
            track.insert_contig(name, length);
        }
        debug!(contigs = track.contigs.len(), path = %path.display(), "loaded contig sizes");
        Ok(track)
    }

    /// Register a contig, dropping depth collected for it so far.
    pub fn insert_contig(&mut self, name: impl Into<String>, length: u64) {
        self.contigs.insert(
            name.into(),
            ContigDepth {
                length,
                changes: BTreeMap::new(),
            },
        );
    }

    /// Count `[begin, end)` on `chrom`, clipped to the contig.
    pub fn add_interval(&mut self, chrom: &str, begin: u64, end: u64) -> Result<(), RecordError> {
        if end < begin {
            return Err(RecordError::parse(
                "interval",
                format!("end {end} lies before begin {begin}"),
            ));
        }
        let contig = self
            .contigs
            .get_mut(chrom)
            .ok_or_else(|| RecordError::lookup("contig", chrom))?;
        let (begin, end) = (begin.min(contig.length), end.min(contig.length));
        if begin < end {
            *contig.changes.entry(begin).or_default() += 1;
            *contig.changes.entry(end).or_default() -= 1;
        }
        Ok(())
    }

    /// Count the interval of a BED line (`chr begin end ...`).
    pub fn add_bed_line(&mut self, line: &str) -> Result<(), RecordError> {
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        if fields.len() < 3 {
            return Err(RecordError::parse(
                "interval",
                format!("expected 3 fields, found {}", fields.len()),
            ));
        }
        let coordinate = |value: &str| {
            value
                .parse::<u64>()
                .map_err(|_| RecordError::parse("interval", format!("bad coordinate '{value}'")))
        };
        self.add_interval(fields[0], coordinate(fields[1])?, coordinate(fields[2])?)
    }

    /// Runs of constant depth, contigs in name order.
    pub fn runs(&self) -> Vec<CoverageRun<'_>> {
        let mut runs = Vec::new();
        for (chrom, contig) in &self.contigs {
            let mut begin = 0;
            let mut depth = 0i64;
            for (&position, &change) in contig.changes.range(..contig.length) {
                if change == 0 {
                    continue;
                }
                if position > begin {
                    runs.push(CoverageRun::new(chrom, begin, position, depth));
                    begin = position;
                }
                depth += change;
            }
            if contig.length > begin {
                runs.push(CoverageRun::new(chrom, begin, contig.length, depth));
            }
        }
        runs
    }
}

/// Stretch of a contig with constant depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageRun<'a> {
    /// Contig name.
    pub chrom: &'a str,
    /// 0-based start.
    pub begin: u64,
    /// 0-based exclusive end.
    pub end: u64,
    /// Number of intervals covering the run.
    pub depth: u64,
}

impl<'a> CoverageRun<'a> {
    fn new(chrom: &'a str, begin: u64, end: u64, depth: i64) -> Self {
        Self {
            chrom,
            begin,
            end,
            depth: depth.unsigned_abs(),
        }
    }
}

impl fmt::Display for CoverageRun<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}\t{}", self.chrom, self.begin, self.end, self.depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rendered(track: &CoverageTrack) -> Vec<String> {
        track.runs().iter().map(ToString::to_string).collect()
    }

    #[test]
    fn tiles_contigs_with_depth_runs() {
        let mut track = CoverageTrack::default();
        track.insert_contig("chr2", 5);
        track.insert_contig("chr1", 20);
        track.add_bed_line("chr1\t2\t8\tread1\t60\t+").unwrap();
        track.add_bed_line("chr1\t5\t12\tread2\t60\t-").unwrap();
        track.add_bed_line("chr1\t12\t15\tread3").unwrap();
        assert_eq!(
            rendered(&track),
            vec![
                "chr1\t0\t2\t0",
                "chr1\t2\t5\t1",
                "chr1\t5\t8\t2",
                "chr1\t8\t15\t1",
                "chr1\t15\t20\t0",
                "chr2\t0\t5\t0",
            ]
        );
    }

    #[test]
    fn clips_intervals_to_contig() {
        let mut track = CoverageTrack::default();
        track.insert_contig("chr1", 10);
        track.add_interval("chr1", 6, 40).unwrap();
        track.add_interval("chr1", 12, 40).unwrap();
        assert_eq!(rendered(&track), vec!["chr1\t0\t6\t0", "chr1\t6\t10\t1"]);
    }

    #[test]
    fn rejects_unknown_contigs_and_bad_lines() {
        let mut track = CoverageTrack::default();
        track.insert_contig("chr1", 10);
        assert!(matches!(
            track.add_interval("chrM", 0, 5),
            Err(RecordError::Lookup { kind: "contig", .. })
        ));
        assert!(track.add_bed_line("chr1\t5").is_err());
        assert!(track.add_bed_line("chr1\t-1\t5").is_err());
        assert!(track.add_interval("chr1", 5, 4).is_err());
        assert_eq!(rendered(&track), vec!["chr1\t0\t10\t0"]);
    }

    #[test]
    fn loads_contig_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sizes.tsv");
        std::fs::write(&path, "chr1\t100\nchr2\t50\n").unwrap();
        let track = CoverageTrack::from_sizes(&path).unwrap();
        assert_eq!(track.runs().len(), 2);

        std::fs::write(&path, "chr1\tlong\n").unwrap();
        assert!(CoverageTrack::from_sizes(&path).is_err());
    }

    proptest! {
        #[test]
        fn runs_match_naive_depth(intervals in prop::collection::vec((0u64..60, 0u64..60), 0..20)) {
            let mut track = CoverageTrack::default();
            track.insert_contig("chr1", 50);
            let mut naive = vec![0u64; 50];
            for &(a, b) in &intervals {
                let (begin, end) = (a.min(b), a.max(b));
                track.add_interval("chr1", begin, end).unwrap();
                for depth in naive.iter_mut().take(end.min(50) as usize).skip(begin as usize) {
                    *depth += 1;
                }
            }
            let runs = track.runs();
            let mut expected_begin = 0;
            for (idx, run) in runs.iter().enumerate() {
                prop_assert_eq!(run.begin, expected_begin);
                for position in run.begin..run.end {
                    prop_assert_eq!(naive[position as usize], run.depth);
                }
                if idx > 0 {
                    prop_assert_ne!(runs[idx - 1].depth, run.depth);
                }
                expected_begin = run.end;
            }
            prop_assert_eq!(expected_begin, 50);
        }
    }
}
