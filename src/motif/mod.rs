//! Motif scanning over expanded frames and modification call records.

use std::fmt;
use std::io::{self, Write};
use std::ops::Range;
use std::sync::Arc;

use regex::bytes::Regex;
use tracing::trace;

use crate::alignment::Strand;
use crate::frame::ExpandedFrame;

/// Motif patterns used to locate and classify sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotifConfig {
    /// Pattern searched in the expanded reference; an exact query match
    /// means an unmodified site.
    pub motif: String,
    /// Pattern whose exact match in the query means a modified site.
    pub modified_motif: String,
}

impl Default for MotifConfig {
    fn default() -> Self {
        Self {
            motif: "CG".to_string(),
            modified_motif: "ZG".to_string(),
        }
    }
}

impl MotifConfig {
    /// Replace the reference motif.
    pub fn with_motif(mut self, motif: impl Into<String>) -> Self {
        self.motif = motif.into();
        self
    }

    /// Replace the modified-base motif.
    pub fn with_modified_motif(mut self, modified_motif: impl Into<String>) -> Self {
        self.modified_motif = modified_motif.into();
        self
    }
}

/// Binary modification state of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallValue {
    /// `0`
    Unmodified,
    /// `1`
    Modified,
}

impl CallValue {
    /// Single character code used in tables.
    pub fn code(self) -> u8 {
        match self {
            Self::Unmodified => b'0',
            Self::Modified => b'1',
        }
    }

    /// Parse a single character code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(Self::Unmodified),
            "1" => Some(Self::Modified),
            _ => None,
        }
    }
}

impl fmt::Display for CallValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code() as char)
    }
}

/// Motif occurrence in an expanded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotifSite {
    /// Frame slots covered by the match.
    pub frame_range: Range<usize>,
    /// 0-based reference start.
    pub begin: u64,
    /// 0-based exclusive reference end.
    pub end: u64,
}

/// Finds motif sites and classifies the query bases aligned to them.
#[derive(Debug, Clone)]
pub struct MotifScanner {
    search: Regex,
    motif_exact: Regex,
    modified_exact: Regex,
}

impl MotifScanner {
    /// Compile the motif patterns.
    pub fn new(config: &MotifConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            search: Regex::new(&config.motif)?,
            motif_exact: exact(&config.motif)?,
            modified_exact: exact(&config.modified_motif)?,
        })
    }

    /// Non-overlapping motif sites of the expanded reference, in ascending
    /// reference coordinate order.
    ///
    /// Sites whose reference span differs from the match length (an insertion
    /// or skip inside the window) cannot be localised and are dropped.
    pub fn sites(&self, frame: &ExpandedFrame) -> Vec<MotifSite> {
        let mut sites: Vec<MotifSite> = self
            .search
            .find_iter(frame.reference())
            .filter(|found| !found.range().is_empty())
            .filter_map(|found| {
                let range = found.range();
                let (begin, end) = frame.span(range.clone())?;
                if end - begin != range.len() as u64 {
                    trace!(begin, end, "motif window spans an indel");
                    return None;
                }
                Some(MotifSite {
                    frame_range: range,
                    begin,
                    end,
                })
            })
            .collect();
        sites.sort_by_key(|site| site.begin);
        sites
    }

    /// Classify the query bases aligned to a site.
    ///
    /// Returns `None` when the bases match neither the modified nor the
    /// unmodified motif exactly.
    pub fn classify(&self, query: &[u8]) -> Option<CallValue> {
        if self.modified_exact.is_match(query) {
            Some(CallValue::Modified)
        } else if self.motif_exact.is_match(query) {
            Some(CallValue::Unmodified)
        } else {
            None
        }
    }
}

fn exact(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

/// Single-read modification call over a half-open reference interval.
#[derive(Debug, Clone, PartialEq)]
pub struct ModificationCall {
    /// Reference contig name.
    pub reference_name: Arc<str>,
    /// 0-based reference start.
    pub begin: u64,
    /// 0-based exclusive reference end.
    pub end: u64,
    /// Read identifier.
    pub read_id: Arc<str>,
    /// Call value.
    pub value: CallValue,
    /// Strand of the read.
    pub strand: Strand,
    /// Optional supporting score (quality or probability margin).
    pub score: Option<f64>,
}

impl fmt::Display for ModificationCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.reference_name, self.begin, self.end, self.read_id, self.value, self.strand
        )?;
        if let Some(score) = self.score {
            write!(f, "\t{score:.2}")?;
        }
        Ok(())
    }
}

/// Write calls as tab separated lines.
pub fn write_calls<W: Write>(writer: &mut W, calls: &[ModificationCall]) -> io::Result<()> {
    for call in calls {
        writeln!(writer, "{call}")?;
    }
    Ok(())
}

/// Render calls into a string (useful for tests and snapshots).
pub fn render_calls(calls: &[ModificationCall]) -> String {
    calls.iter().map(|call| format!("{call}\n")).collect()
}
