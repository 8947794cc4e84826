//! 1D2 template/complement read pairing.
//!
//! A 1D2 run sequences both strands of a molecule one after the other. The
//! two reads arrive close together in the alignment stream and map to
//! nearly the same interval on opposite strands. [`ReadPairer`] keeps a
//! bounded window of unmatched reads per strand and matches each new read
//! against the other strand's window. [`PairedCallJoiner`] then merges the
//! single-read calls of both reads of a pair.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::alignment::{AlignmentRecord, Strand};
use crate::tables::{table_lines, TableError};
use crate::RecordError;

/// Window and distance limits of the pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingConfig {
    /// Unmatched reads kept per strand.
    pub buffer: usize,
    /// Largest summed distance of begin and end positions of a pair.
    pub tolerance: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            buffer: 200,
            tolerance: 200,
        }
    }
}

impl PairingConfig {
    /// Set the window length.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    /// Set the distance tolerance.
    pub fn with_tolerance(mut self, tolerance: u64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

/// Reference interval covered by one mapped read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedInterval {
    /// Reference contig name.
    pub chrom: String,
    /// 0-based start.
    pub begin: u64,
    /// 0-based exclusive end.
    pub end: u64,
    /// Read identifier.
    pub name: String,
}

impl AlignedInterval {
    /// Interval of a mapped record.
    pub fn from_record(record: &AlignmentRecord) -> Self {
        Self {
            chrom: record.reference_name.clone(),
            begin: record.start(),
            end: record.reference_end(),
            name: record.query_name.clone(),
        }
    }

    /// Summed begin and end distance, `None` across contigs.
    pub fn distance(&self, other: &Self) -> Option<u64> {
        (self.chrom == other.chrom)
            .then(|| self.begin.abs_diff(other.begin) + self.end.abs_diff(other.end))
    }
}

/// Matched template and complement read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPair {
    /// Reference contig name.
    pub chrom: String,
    /// Smallest start of both reads.
    pub begin: u64,
    /// Largest end of both reads.
    pub end: u64,
    /// Forward strand read.
    pub template: String,
    /// Reverse strand read.
    pub complement: String,
}

impl ReadPair {
    fn join(template: AlignedInterval, complement: AlignedInterval) -> Self {
        Self {
            begin: template.begin.min(complement.begin),
            end: template.end.max(complement.end),
            chrom: template.chrom,
            template: template.name,
            complement: complement.name,
        }
    }
}

impl fmt::Display for ReadPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.chrom, self.begin, self.end, self.template, self.complement
        )
    }
}

/// Streaming matcher of template and complement reads.
#[derive(Debug, Clone, Default)]
pub struct ReadPairer {
    config: PairingConfig,
    templates: VecDeque<AlignedInterval>,
    complements: VecDeque<AlignedInterval>,
}

impl ReadPairer {
    /// Create a pairer with empty windows.
    pub fn new(config: PairingConfig) -> Self {
        Self {
            config,
            templates: VecDeque::with_capacity(config.buffer + 1),
            complements: VecDeque::with_capacity(config.buffer + 1),
        }
    }

    /// Offer the next record, returning the pair it completes.
    ///
    /// Unmapped records are ignored. An unmatched read enters its strand's
    /// window, evicting the oldest read once the window is full.
    pub fn push(&mut self, record: &AlignmentRecord) -> Option<ReadPair> {
        if record.is_unmapped() {
            return None;
        }
        let read = AlignedInterval::from_record(record);
        let strand = record.strand();
        let (own, other) = match strand {
            Strand::Forward => (&mut self.templates, &mut self.complements),
            Strand::Reverse => (&mut self.complements, &mut self.templates),
        };

        let closest = other
            .iter()
            .enumerate()
            .filter_map(|(idx, candidate)| read.distance(candidate).map(|d| (d, idx)))
            .min();
        if let Some((distance, idx)) = closest.filter(|(d, _)| *d <= self.config.tolerance) {
            let mate = other.remove(idx)?;
            debug!(read = %read.name, mate = %mate.name, distance, "paired reads");
            return Some(match strand {
                Strand::Forward => ReadPair::join(read, mate),
                Strand::Reverse => ReadPair::join(mate, read),
            });
        }

        own.push_back(read);
        while own.len() > self.config.buffer {
            own.pop_front();
        }
        None
    }

    /// Unmatched reads currently held for `strand`.
    pub fn pending(&self, strand: Strand) -> usize {
        match strand {
            Strand::Forward => self.templates.len(),
            Strand::Reverse => self.complements.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PairEntry {
    begin: u64,
    end: u64,
    template: String,
    complement: String,
}

/// Read pairs loaded from a pair table, grouped by contig.
#[derive(Debug, Clone, Default)]
pub struct PairTable {
    pairs: HashMap<String, Vec<PairEntry>>,
}

impl PairTable {
    /// Load a table written by [`ReadPairer`] output.
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let mut table = Self::default();
        for item in table_lines(path)? {
            let (line_no, line) = item?;
            let fields: Vec<&str> = line.trim_end().split('\t').collect();
            if fields.len() < 5 {
                return Err(TableError::malformed(
                    path,
                    line_no,
                    format!("expected 5 fields, found {}", fields.len()),
                ));
            }
            let coordinate = |value: &str| {
                value
                    .parse::<u64>()
                    .map_err(|_| TableError::malformed(path, line_no, format!("bad coordinate '{value}'")))
            };
            table.insert(ReadPair {
                chrom: fields[0].to_string(),
                begin: coordinate(fields[1])?,
                end: coordinate(fields[2])?,
                template: fields[3].to_string(),
                complement: fields[4].to_string(),
            });
        }
        debug!(contigs = table.pairs.len(), path = %path.display(), "loaded pair table");
        Ok(table)
    }

    /// Add a pair.
    pub fn insert(&mut self, pair: ReadPair) {
        self.pairs.entry(pair.chrom).or_default().push(PairEntry {
            begin: pair.begin,
            end: pair.end,
            template: pair.template,
            complement: pair.complement,
        });
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.pairs.values().map(Vec::len).sum()
    }

    /// Whether the table holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Site called in both reads of a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedCall {
    /// Reference contig name.
    pub chrom: String,
    /// 0-based start.
    pub begin: u64,
    /// 0-based exclusive end.
    pub end: u64,
    /// Template read.
    pub template: String,
    /// Call value of the template read, as written in the call table.
    pub template_value: String,
    /// Complement read.
    pub complement: String,
    /// Call value of the complement read.
    pub complement_value: String,
}

impl fmt::Display for JoinedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.chrom,
            self.begin,
            self.end,
            self.template,
            self.template_value,
            self.complement,
            self.complement_value
        )
    }
}

type ReadCalls = BTreeMap<(u64, u64), String>;

/// Joins the calls of paired reads from a call table grouped by contig.
///
/// Calls are collected per contig. When the contig changes, or at
/// [`finish`](Self::finish), every pair on the collected contig yields the
/// sites both reads called inside the pair interval, ordered by position.
#[derive(Debug)]
pub struct PairedCallJoiner<'a> {
    pairs: &'a PairTable,
    chrom: Option<String>,
    calls: HashMap<String, ReadCalls>,
}

impl<'a> PairedCallJoiner<'a> {
    /// Create a joiner over `pairs`.
    pub fn new(pairs: &'a PairTable) -> Self {
        Self {
            pairs,
            chrom: None,
            calls: HashMap::new(),
        }
    }

    /// Consume one call row (`chr begin end read value strand ...`).
    ///
    /// Returns the joined calls of the previous contig when the row starts
    /// a new one.
    pub fn push_line(&mut self, line: &str) -> Result<Vec<JoinedCall>, RecordError> {
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        if fields.len() < 6 {
            return Err(RecordError::parse(
                "call row",
                format!("expected 6 fields, found {}", fields.len()),
            ));
        }
        let coordinate = |value: &str| {
            value
                .parse::<u64>()
                .map_err(|_| RecordError::parse("call row", format!("bad coordinate '{value}'")))
        };
        let (begin, end) = (coordinate(fields[1])?, coordinate(fields[2])?);

        let flushed = if self.chrom.as_deref() != Some(fields[0]) {
            let flushed = self.finish();
            self.chrom = Some(fields[0].to_string());
            flushed
        } else {
            Vec::new()
        };
        self.calls
            .entry(fields[3].to_string())
            .or_default()
            .insert((begin, end), fields[4].to_string());
        Ok(flushed)
    }

    /// Join the calls collected for the current contig.
    pub fn finish(&mut self) -> Vec<JoinedCall> {
        let calls = std::mem::take(&mut self.calls);
        let Some(chrom) = self.chrom.take() else {
            return Vec::new();
        };
        let Some(pairs) = self.pairs.pairs.get(&chrom) else {
            debug!(chrom, "no read pairs on contig");
            return Vec::new();
        };

        let mut joined = Vec::new();
        for pair in pairs {
            let (Some(template), Some(complement)) =
                (calls.get(&pair.template), calls.get(&pair.complement))
            else {
                continue;
            };
            let inside = |&(begin, end): &(u64, u64)| begin >= pair.begin && end <= pair.end;
            for (key, template_value) in template.iter().filter(|(key, _)| inside(key)) {
                let Some(complement_value) = complement.get(key) else {
                    continue;
                };
                joined.push(JoinedCall {
                    chrom: chrom.clone(),
                    begin: key.0,
                    end: key.1,
                    template: pair.template.clone(),
                    template_value: template_value.clone(),
                    complement: pair.complement.clone(),
                    complement_value: complement_value.clone(),
                });
            }
        }
        joined
    }
}
