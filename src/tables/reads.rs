use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use bio::io::{fasta, fastq};
use tracing::debug;

use super::{open_text, AnnotationTable, TableError};

/// Basecalled read in sequencing orientation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadEntry {
    /// Read bases, upper case.
    pub sequence: Vec<u8>,
    /// Phred+33 qualities, present for FASTQ input.
    pub quality: Option<Vec<u8>>,
}

/// In-memory read sequences keyed by read identifier.
#[derive(Debug, Clone, Default)]
pub struct ReadTable {
    reads: HashMap<String, ReadEntry>,
}

impl ReadTable {
    /// Load reads from a FASTA or FASTQ file (optionally gzip compressed).
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let mut reader = open_text(path).map_err(|err| TableError::io(path, err))?;
        let first = reader
            .fill_buf()
            .map_err(|err| TableError::io(path, err))?
            .first()
            .copied();

        let mut table = Self::default();
        match first {
            None => {}
            Some(b'@') => {
                for (idx, record) in fastq::Reader::new(reader).records().enumerate() {
                    let record = record
                        .map_err(|err| TableError::malformed(path, idx + 1, err.to_string()))?;
                    table.insert(
                        record.id(),
                        ReadEntry {
                            sequence: record.seq().to_ascii_uppercase(),
                            quality: Some(record.qual().to_vec()),
                        },
                    );
                }
            }
            Some(b'>') => {
                for (idx, record) in fasta::Reader::new(reader).records().enumerate() {
                    let record = record
                        .map_err(|err| TableError::malformed(path, idx + 1, err.to_string()))?;
                    table.insert(
                        record.id(),
                        ReadEntry {
                            sequence: record.seq().to_ascii_uppercase(),
                            quality: None,
                        },
                    );
                }
            }
            Some(other) => {
                return Err(TableError::malformed(
                    path,
                    1,
                    format!("expected FASTA or FASTQ header, found '{}'", other as char),
                ));
            }
        }

        debug!(reads = table.len(), path = %path.display(), "loaded read table");
        Ok(table)
    }

    /// Add or replace a read.
    pub fn insert(&mut self, read_id: impl Into<String>, entry: ReadEntry) {
        self.reads.insert(read_id.into(), entry);
    }

    /// Look up a read.
    pub fn get(&self, read_id: &str) -> Option<&ReadEntry> {
        self.reads.get(read_id)
    }

    /// Number of reads.
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    /// True when no read was loaded.
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    /// Put the modified-base symbols recorded in `annotations` back into the
    /// read sequences.
    pub fn restore(&mut self, annotations: &AnnotationTable) {
        for (read_id, entry) in self.reads.iter_mut() {
            annotations.restore(read_id, &mut entry.sequence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_fastq_and_fasta() {
        let dir = tempfile::tempdir().unwrap();
        let fastq_path = dir.path().join("reads.fq");
        std::fs::write(&fastq_path, "@r1 run=1\nacgt\n+\nIIII\n@r2\nCCGG\n+\n!!!!\n").unwrap();
        let table = ReadTable::from_path(&fastq_path).unwrap();
        assert_eq!(table.len(), 2);
        let r1 = table.get("r1").unwrap();
        assert_eq!(r1.sequence, b"ACGT");
        assert_eq!(r1.quality.as_deref(), Some(&b"IIII"[..]));

        let fasta_path = dir.path().join("reads.fa");
        std::fs::write(&fasta_path, ">r3 desc\nACG\nTTA\n").unwrap();
        let table = ReadTable::from_path(&fasta_path).unwrap();
        assert_eq!(table.get("r3").unwrap().sequence, b"ACGTTA");
        assert!(table.get("r3").unwrap().quality.is_none());
    }

    #[test]
    fn rejects_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.txt");
        std::fs::write(&path, "ACGT\n").unwrap();
        assert!(matches!(
            ReadTable::from_path(&path),
            Err(TableError::Malformed { .. })
        ));
    }
}
