use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use regex::bytes::Regex;

use super::{table_lines, TableError};

/// Stretch of a read whose modified-base symbols were replaced by canonical
/// bases so that a generic aligner could map the read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// 0-based start in the read.
    pub begin: usize,
    /// 0-based exclusive end in the read.
    pub end: usize,
    /// Bases as called, including modified-base symbols.
    pub original: Vec<u8>,
    /// Canonical bases written into the cleaned read.
    pub replacement: Vec<u8>,
    /// Qualities of the stretch.
    pub quality: Vec<u8>,
}

impl Annotation {
    /// Render the annotation as a table line for `read_id`.
    pub fn display<'a>(&'a self, read_id: &'a str) -> impl fmt::Display + 'a {
        AnnotationLine {
            read_id,
            annotation: self,
        }
    }
}

struct AnnotationLine<'a> {
    read_id: &'a str,
    annotation: &'a Annotation,
}

impl fmt::Display for AnnotationLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.annotation;
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.read_id,
            a.begin,
            a.end,
            String::from_utf8_lossy(&a.original),
            String::from_utf8_lossy(&a.replacement),
            String::from_utf8_lossy(&a.quality),
        )
    }
}

/// Annotations of all reads, keyed by read identifier.
#[derive(Debug, Clone, Default)]
pub struct AnnotationTable {
    annotations: HashMap<String, Vec<Annotation>>,
}

impl AnnotationTable {
    /// Load a table of `read_id begin end original replacement quality` lines.
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let mut table = Self::default();
        for item in table_lines(path)? {
            let (line_no, line) = item?;
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 5 {
                return Err(TableError::malformed(
                    path,
                    line_no,
                    format!("expected at least 5 fields, found {}", fields.len()),
                ));
            }
            let parse = |value: &str| {
                value
                    .parse::<usize>()
                    .map_err(|_| TableError::malformed(path, line_no, format!("bad offset '{value}'")))
            };
            let annotation = Annotation {
                begin: parse(fields[1])?,
                end: parse(fields[2])?,
                original: fields[3].as_bytes().to_vec(),
                replacement: fields[4].as_bytes().to_vec(),
                quality: fields.get(5).map(|q| q.as_bytes().to_vec()).unwrap_or_default(),
            };
            if annotation.end < annotation.begin
                || annotation.end - annotation.begin != annotation.original.len()
            {
                return Err(TableError::malformed(
                    path,
                    line_no,
                    "interval length differs from original bases",
                ));
            }
            table.insert(fields[0], annotation);
        }
        Ok(table)
    }

    /// Add an annotation for a read.
    pub fn insert(&mut self, read_id: impl Into<String>, annotation: Annotation) {
        self.annotations
            .entry(read_id.into())
            .or_default()
            .push(annotation);
    }

    /// Annotations of a read.
    pub fn get(&self, read_id: &str) -> &[Annotation] {
        self.annotations
            .get(read_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of annotated reads.
    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    /// True when no read is annotated.
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Write the original bases of all annotations of `read_id` back into
    /// `sequence`. Annotations outside the sequence are ignored.
    pub fn restore(&self, read_id: &str, sequence: &mut [u8]) {
        for annotation in self.get(read_id) {
            if let Some(target) = sequence.get_mut(annotation.begin..annotation.end) {
                target.copy_from_slice(&annotation.original);
            }
        }
    }
}

/// Replaces modified-base motifs in basecalled reads by canonical bases.
#[derive(Debug, Clone)]
pub struct ModifiedBaseSplitter {
    pattern: Regex,
    replacement: Vec<u8>,
}

impl ModifiedBaseSplitter {
    /// Build a splitter replacing matches of `modified_motif` by `motif`.
    ///
    /// Both must have the same length so read coordinates are preserved.
    pub fn new(modified_motif: &str, motif: &str) -> Result<Self, String> {
        if modified_motif.len() != motif.len() {
            return Err(format!(
                "modified motif '{modified_motif}' and replacement '{motif}' differ in length"
            ));
        }
        let pattern = Regex::new(modified_motif).map_err(|err| err.to_string())?;
        Ok(Self {
            pattern,
            replacement: motif.as_bytes().to_vec(),
        })
    }

    /// Clean one read, returning the cleaned sequence and an annotation per
    /// replaced stretch.
    pub fn split(&self, sequence: &[u8], quality: &[u8]) -> (Vec<u8>, Vec<Annotation>) {
        let mut cleaned = sequence.to_vec();
        let mut annotations = Vec::new();
        for found in self.pattern.find_iter(sequence) {
            let range = found.range();
            if range.len() != self.replacement.len() {
                continue;
            }
            cleaned[range.clone()].copy_from_slice(&self.replacement);
            annotations.push(Annotation {
                begin: range.start,
                end: range.end,
                original: found.as_bytes().to_vec(),
                replacement: self.replacement.clone(),
                quality: quality.get(range).map(<[u8]>::to_vec).unwrap_or_default(),
            });
        }
        (cleaned, annotations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_restore_round_trip() {
        let splitter = ModifiedBaseSplitter::new("ZG", "CG").unwrap();
        let (cleaned, annotations) = splitter.split(b"AZGTTZGCG", b"ABCDEFGHI");
        assert_eq!(cleaned, b"ACGTTCGCG");
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[1].begin, 5);
        assert_eq!(annotations[1].quality, b"FG");
        assert_eq!(
            annotations[0].display("read1").to_string(),
            "read1\t1\t3\tZG\tCG\tBC"
        );

        let mut table = AnnotationTable::default();
        for annotation in annotations {
            table.insert("read1", annotation);
        }
        let mut restored = cleaned.clone();
        table.restore("read1", &mut restored);
        assert_eq!(restored, b"AZGTTZGCG");
        table.restore("other", &mut restored);
    }

    #[test]
    fn rejects_length_changing_replacement() {
        assert!(ModifiedBaseSplitter::new("ZG", "C").is_err());
    }

    #[test]
    fn loads_table_and_validates_intervals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotation.tsv");
        std::fs::write(&path, "read1\t1\t3\tZG\tCG\tBC\n").unwrap();
        let table = AnnotationTable::from_path(&path).unwrap();
        assert_eq!(table.get("read1").len(), 1);
        assert!(table.get("missing").is_empty());

        std::fs::write(&path, "read1\t1\t4\tZG\tCG\tBC\n").unwrap();
        assert!(AnnotationTable::from_path(&path).is_err());
    }
}
