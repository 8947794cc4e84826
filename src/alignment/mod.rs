//! Alignment records in SAM text form.
//!
//! Fields are read with the `noodles` SAM reader; records are written back
//! as text so untouched fields keep their original spelling.

use std::fmt;
use std::str::FromStr;

use noodles::sam;

use crate::cigar::Cigar;
use crate::RecordError;

/// Number of mandatory SAM fields.
const MANDATORY_FIELDS: usize = 11;
/// Placeholder of absent text fields.
const MISSING: &str = "*";
/// Mapping quality written when the record carries none.
const MISSING_MAPPING_QUALITY: u8 = 255;

/// Alignment flag bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u16);

impl Flags {
    /// Segment unmapped.
    pub const UNMAPPED: u16 = 0x4;
    /// Sequence is reverse complemented.
    pub const REVERSE: u16 = 0x10;

    /// Wrap raw flag bits.
    pub fn new(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw flag bits.
    pub fn bits(self) -> u16 {
        self.0
    }

    /// True when the record carries no alignment.
    pub fn is_unmapped(self) -> bool {
        self.0 & Self::UNMAPPED != 0
    }

    /// True when the query aligns to the reverse strand.
    pub fn is_reverse(self) -> bool {
        self.0 & Self::REVERSE != 0
    }

    /// Strand implied by the reverse bit.
    pub fn strand(self) -> Strand {
        if self.is_reverse() {
            Strand::Reverse
        } else {
            Strand::Forward
        }
    }
}

/// Orientation of the query relative to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strand {
    /// `+`
    Forward,
    /// `-`
    Reverse,
}

impl Strand {
    /// Symbol used in tabular output.
    pub fn symbol(self) -> char {
        match self {
            Self::Forward => '+',
            Self::Reverse => '-',
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Strand {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Self::Forward),
            "-" => Ok(Self::Reverse),
            other => Err(RecordError::parse("strand", format!("unknown strand '{other}'"))),
        }
    }
}

/// Optional `TAG:TYPE:VALUE` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalField {
    /// Two character tag, e.g. `MD`.
    pub tag: String,
    /// Value type code, e.g. `Z`.
    pub kind: String,
    /// Raw value text.
    pub value: String,
}

impl OptionalField {
    /// Build a field from its parts.
    pub fn new(tag: impl Into<String>, kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            kind: kind.into(),
            value: value.into(),
        }
    }
}

impl FromStr for OptionalField {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(tag), Some(kind), Some(value)) if !tag.is_empty() => {
                Ok(Self::new(tag, kind, value))
            }
            _ => Err(RecordError::parse("optional field", format!("'{s}'"))),
        }
    }
}

impl fmt::Display for OptionalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.tag, self.kind, self.value)
    }
}

/// Single alignment record parsed from a SAM text line.
///
/// `sequence` and `quality` are `None` where the record holds the `*`
/// placeholder. `position` is 1-based and meaningless for unmapped records.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    /// Read identifier.
    pub query_name: String,
    /// Flag bits.
    pub flags: Flags,
    /// Reference contig name.
    pub reference_name: String,
    /// 1-based leftmost reference coordinate.
    pub position: u64,
    /// Mapping quality.
    pub mapping_quality: u8,
    /// Decoded cigar.
    pub cigar: Cigar,
    /// Mate reference name (passed through).
    pub next_reference_name: String,
    /// Mate position (passed through).
    pub next_position: u64,
    /// Observed template length (passed through).
    pub template_length: i32,
    /// Query bases as stored in the record.
    pub sequence: Option<Vec<u8>>,
    /// Phred+33 encoded base qualities.
    pub quality: Option<Vec<u8>>,
    /// Optional fields in input order.
    pub tags: Vec<OptionalField>,
}

impl AlignmentRecord {
    /// Parse one tab separated alignment line.
    pub fn from_sam_line(line: &str) -> Result<Self, RecordError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let field_count = line.split('\t').count();
        if field_count < MANDATORY_FIELDS {
            return Err(RecordError::parse(
                "alignment record",
                format!("expected at least {MANDATORY_FIELDS} fields, found {field_count}"),
            ));
        }

        let mut reader = sam::io::Reader::new(line.as_bytes());
        let mut raw = sam::Record::default();
        reader
            .read_record(&mut raw)
            .map_err(|err| RecordError::parse("alignment record", err.to_string()))?;
        Self::from_raw(&raw)
    }

    /// Convert a record read by a SAM reader.
    ///
    /// The cigar and the optional fields are kept as written: the cigar goes
    /// through [`Cigar::parse`], optional fields keep their text so rewritten
    /// records only differ where a field was replaced.
    pub fn from_raw(raw: &sam::Record) -> Result<Self, RecordError> {
        let bytes_or_none = |value: &[u8]| (!value.is_empty()).then(|| value.to_vec());

        let flags = raw.flags().map_err(|err| RecordError::parse("flag", err.to_string()))?;
        let position = raw
            .alignment_start()
            .transpose()
            .map_err(|err| RecordError::parse("position", err.to_string()))?
            .map_or(0, |position| usize::from(position) as u64);
        let mapping_quality = raw
            .mapping_quality()
            .transpose()
            .map_err(|err| RecordError::parse("mapping quality", err.to_string()))?
            .map_or(MISSING_MAPPING_QUALITY, |quality| quality.get());
        let next_position = raw
            .mate_alignment_start()
            .transpose()
            .map_err(|err| RecordError::parse("mate position", err.to_string()))?
            .map_or(0, |position| usize::from(position) as u64);
        let template_length = raw
            .template_length()
            .map_err(|err| RecordError::parse("template length", err.to_string()))?;

        let cigar = raw.cigar();
        let cigar_text: &[u8] = cigar.as_ref();
        let cigar = match cigar_text {
            [] => Cigar::default(),
            text => Cigar::parse(&String::from_utf8_lossy(text))?,
        };

        let data = raw.data();
        for field in data.iter() {
            field.map_err(|err| RecordError::parse("optional field", err.to_string()))?;
        }
        let data_text: &[u8] = data.as_ref();
        let tags = String::from_utf8_lossy(data_text)
            .split('\t')
            .filter(|field| !field.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<OptionalField>, _>>()?;

        Ok(Self {
            query_name: text_or_star(raw.name()),
            flags: Flags::new(flags.bits()),
            reference_name: text_or_star(raw.reference_sequence_name()),
            position,
            mapping_quality,
            cigar,
            next_reference_name: text_or_star(raw.mate_reference_sequence_name()),
            next_position,
            template_length,
            sequence: bytes_or_none(raw.sequence().as_ref()),
            quality: bytes_or_none(raw.quality_scores().as_ref()),
            tags,
        })
    }

    /// Render the record as a tab separated line without line terminator.
    pub fn to_sam_line(&self) -> String {
        let bytes_or_star = |value: &Option<Vec<u8>>| -> String {
            value
                .as_deref()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_else(|| MISSING.to_string())
        };

        let mut line = format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.query_name,
            self.flags.bits(),
            self.reference_name,
            self.position,
            self.mapping_quality,
            self.cigar,
            self.next_reference_name,
            self.next_position,
            self.template_length,
            bytes_or_star(&self.sequence),
            bytes_or_star(&self.quality),
        );
        for tag in &self.tags {
            line.push('\t');
            line.push_str(&tag.to_string());
        }
        line
    }

    /// Strand of the alignment.
    pub fn strand(&self) -> Strand {
        self.flags.strand()
    }

    /// True when the record carries no alignment.
    pub fn is_unmapped(&self) -> bool {
        self.flags.is_unmapped() || self.cigar.is_empty()
    }

    /// 0-based reference coordinate of the first aligned base.
    pub fn start(&self) -> u64 {
        self.position.saturating_sub(1)
    }

    /// 0-based exclusive end of the covered reference span.
    pub fn reference_end(&self) -> u64 {
        self.start() + self.cigar.reference_span() as u64
    }

    /// Look up an optional field by tag.
    pub fn tag(&self, tag: &str) -> Option<&OptionalField> {
        self.tags.iter().find(|field| field.tag == tag)
    }

    /// Replace an optional field in place, or append it when absent.
    pub fn set_tag(&mut self, tag: &str, kind: &str, value: impl Into<String>) {
        let field = OptionalField::new(tag, kind, value);
        match self.tags.iter_mut().find(|existing| existing.tag == tag) {
            Some(existing) => *existing = field,
            None => self.tags.push(field),
        }
    }
}

fn text_or_star(value: Option<impl fmt::Display>) -> String {
    value.map_or_else(|| MISSING.to_string(), |value| value.to_string())
}
