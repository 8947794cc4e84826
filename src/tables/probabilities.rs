use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{is_gzip, TableError};
use crate::RecordError;

/// Values of one probability row, or why the row could not be decoded.
///
/// A bad row only affects its own read; I/O failures are reported as
/// [`TableError`] instead.
pub type ProbabilityRow = Result<Vec<u8>, RecordError>;

#[derive(Debug, Clone, Copy)]
struct RowIndex {
    offset: u64,
    line: usize,
}

/// Per-base modified-base probabilities, one read per line:
/// `read_id<TAB>p0,p1,...` with unsigned 8-bit values in sequencing
/// orientation.
///
/// Only line offsets are held in memory; the file stays open and rows are
/// read on demand.
#[derive(Debug)]
pub struct ProbabilityTable {
    path: PathBuf,
    reader: BufReader<File>,
    rows: HashMap<String, RowIndex>,
}

impl ProbabilityTable {
    /// Open the table and index the line offset of every read.
    pub fn open(path: &Path) -> Result<Self, TableError> {
        if is_gzip(path) {
            return Err(TableError::malformed(
                path,
                0,
                "probability tables are read by seeking and must be uncompressed",
            ));
        }
        let file = File::open(path).map_err(|err| TableError::io(path, err))?;
        let mut reader = BufReader::new(file);

        let mut rows = HashMap::new();
        let mut offset = 0u64;
        let mut line = Vec::new();
        let mut line_no = 0usize;
        loop {
            line.clear();
            let read = reader
                .read_until(b'\n', &mut line)
                .map_err(|err| TableError::io(path, err))?;
            if read == 0 {
                break;
            }
            line_no += 1;
            let read_id = line
                .split(|&b| b == b'\t')
                .next()
                .map(|id| String::from_utf8_lossy(id).trim().to_string())
                .unwrap_or_default();
            if !read_id.is_empty() {
                if rows.contains_key(&read_id) {
                    warn!(read = %read_id, line = line_no, "duplicate read in probability table, keeping first");
                } else {
                    rows.insert(read_id, RowIndex { offset, line: line_no });
                }
            }
            offset += read as u64;
        }

        debug!(reads = rows.len(), path = %path.display(), "indexed probability table");
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            rows,
        })
    }

    /// Whether the table holds a row for `read_id`.
    pub fn contains(&self, read_id: &str) -> bool {
        self.rows.contains_key(read_id)
    }

    /// Number of indexed reads.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Read the probabilities of one read.
    ///
    /// `None` when the read has no row. A row with a value outside `0..=255`
    /// yields `Some(Err(_))` naming the table line.
    pub fn get(&mut self, read_id: &str) -> Result<Option<ProbabilityRow>, TableError> {
        let Some(&RowIndex { offset, line: line_no }) = self.rows.get(read_id) else {
            return Ok(None);
        };
        self.reader
            .seek(SeekFrom::Start(offset))
            .map_err(|err| TableError::io(&self.path, err))?;
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|err| TableError::io(&self.path, err))?;

        let values = line
            .trim_end()
            .split_once('\t')
            .map(|(_, values)| values)
            .unwrap_or_default();
        let row = values
            .split(',')
            .filter(|value| !value.is_empty())
            .map(|value| {
                value.trim().parse::<u8>().map_err(|_| {
                    RecordError::parse(
                        "probability row",
                        format!(
                            "{}:{line_no}: read '{read_id}' has invalid probability '{value}'",
                            self.path.display()
                        ),
                    )
                })
            })
            .collect::<Result<Vec<u8>, _>>();
        Ok(Some(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_lookup_by_read_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probs.tsv");
        std::fs::write(&path, "r1\t0,255,12\nr2\t7,8\nr1\t1,1,1\n").unwrap();

        let mut table = ProbabilityTable::open(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("r2").unwrap(), Some(Ok(vec![7, 8])));
        assert_eq!(table.get("r1").unwrap(), Some(Ok(vec![0, 255, 12])));
        assert_eq!(table.get("r3").unwrap(), None);
    }

    #[test]
    fn invalid_values_only_fail_their_own_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probs.tsv");
        std::fs::write(&path, "r0\t1,2\nr1\t0,300\nr2\t9\n").unwrap();
        let mut table = ProbabilityTable::open(&path).unwrap();

        let err = table.get("r1").unwrap().unwrap().unwrap_err();
        assert!(matches!(err, RecordError::Parse { context: "probability row", .. }));
        assert!(err.to_string().contains("probs.tsv:2: read 'r1' has invalid probability '300'"));
        assert_eq!(table.get("r2").unwrap(), Some(Ok(vec![9])));
    }
}
