//! Reference genome access.
//!
//! A [`ReferenceGenome`] starts out holding only its path. The first lookup
//! (or an explicit [`ReferenceGenome::open`]) indexes the FASTA file: plain
//! files get an in-memory `fai` index and contigs are read on demand,
//! keeping the most recently used one in a single-entry cache. Lines within a
//! record must share one width, as for `samtools faidx`. Gzip files are
//! loaded into memory since they cannot be seeked.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bio::io::fasta;
use noodles::fasta as nfasta;
use thiserror::Error;
use tracing::debug;

use crate::tables::open_text;

/// Errors raised while reading the reference genome.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// Underlying I/O failure.
    #[error("failed to read reference {}: {source}", path.display())]
    Io {
        /// Reference path.
        path: PathBuf,
        /// Source error.
        #[source]
        source: io::Error,
    },

    /// The file is not valid FASTA.
    #[error("malformed reference {}: {detail}", path.display())]
    Malformed {
        /// Reference path.
        path: PathBuf,
        /// Description of the problem.
        detail: String,
    },
}

/// Layout of one FASTA record in an uncompressed file, as in a `fai` line.
#[derive(Debug, Clone, Copy)]
struct RecordExtent {
    /// Offset of the first base.
    offset: u64,
    /// Number of bases.
    length: u64,
    /// Bases per full line.
    line_bases: u64,
    /// Bytes per full line, terminator included.
    line_width: u64,
}

impl RecordExtent {
    /// Bytes from the first base through the last one.
    fn byte_len(self) -> u64 {
        if self.line_bases == 0 {
            return 0;
        }
        let full_lines = self.length / self.line_bases;
        full_lines * self.line_width + self.length % self.line_bases
    }
}

#[derive(Debug)]
enum FastaStore {
    Indexed {
        reader: BufReader<File>,
        records: HashMap<String, RecordExtent>,
        cache: Option<(String, Arc<[u8]>)>,
    },
    Loaded(HashMap<String, Arc<[u8]>>),
}

#[derive(Debug)]
enum State {
    Unopened,
    Opened(FastaStore),
}

/// Lazily opened reference genome.
#[derive(Debug)]
pub struct ReferenceGenome {
    path: PathBuf,
    state: State,
}

impl ReferenceGenome {
    /// Reference backed by the FASTA file at `path`. Nothing is read yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: State::Unopened,
        }
    }

    /// Path of the FASTA file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the file has been indexed or loaded.
    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Opened(_))
    }

    /// Index (or load) the FASTA file. Calling it again is a no-op.
    pub fn open(&mut self) -> Result<(), ReferenceError> {
        if self.is_open() {
            return Ok(());
        }
        let store = if crate::tables::is_gzip(&self.path) {
            load_all(&self.path)?
        } else {
            index(&self.path)?
        };
        self.state = State::Opened(store);
        Ok(())
    }

    /// Names of all contigs, in no particular order.
    pub fn contig_names(&mut self) -> Result<Vec<String>, ReferenceError> {
        Ok(match self.store()? {
            FastaStore::Indexed { records, .. } => records.keys().cloned().collect(),
            FastaStore::Loaded(sequences) => sequences.keys().cloned().collect(),
        })
    }

    /// Whether the genome holds contig `name`; opens the file if needed.
    pub fn contains(&mut self, name: &str) -> Result<bool, ReferenceError> {
        Ok(match self.store()? {
            FastaStore::Indexed { records, .. } => records.contains_key(name),
            FastaStore::Loaded(sequences) => sequences.contains_key(name),
        })
    }

    /// Full upper-case sequence of contig `name`.
    pub fn sequence(&mut self, name: &str) -> Result<Option<Arc<[u8]>>, ReferenceError> {
        let path = self.path.clone();
        match self.store()? {
            FastaStore::Loaded(sequences) => Ok(sequences.get(name).cloned()),
            FastaStore::Indexed {
                reader,
                records,
                cache,
            } => {
                if let Some((cached, sequence)) = cache {
                    if cached.as_str() == name {
                        return Ok(Some(Arc::clone(sequence)));
                    }
                }
                let Some(extent) = records.get(name).copied() else {
                    return Ok(None);
                };
                let sequence = read_extent(reader, extent).map_err(|source| ReferenceError::Io {
                    path: path.clone(),
                    source,
                })?;
                debug!(contig = name, bases = sequence.len(), "loaded reference contig");
                *cache = Some((name.to_string(), Arc::clone(&sequence)));
                Ok(Some(sequence))
            }
        }
    }

    /// Bases of `name` over a 0-based half-open range.
    ///
    /// Returns `None` when the contig is unknown or the range runs past its
    /// end.
    pub fn fetch(&mut self, name: &str, range: Range<u64>) -> Result<Option<Vec<u8>>, ReferenceError> {
        let Some(sequence) = self.sequence(name)? else {
            return Ok(None);
        };
        let (Ok(start), Ok(end)) = (usize::try_from(range.start), usize::try_from(range.end)) else {
            return Ok(None);
        };
        Ok(sequence.get(start..end).map(<[u8]>::to_vec))
    }

    fn store(&mut self) -> Result<&mut FastaStore, ReferenceError> {
        self.open()?;
        match &mut self.state {
            State::Opened(store) => Ok(store),
            State::Unopened => unreachable!("reference opened above"),
        }
    }
}

fn index(path: &Path) -> Result<FastaStore, ReferenceError> {
    let io_error = |source: io::Error| ReferenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_error)?;
    let mut indexer = nfasta::io::Indexer::new(BufReader::new(file));

    let mut records: HashMap<String, RecordExtent> = HashMap::new();
    while let Some(record) = indexer
        .index_record()
        .map_err(|err| ReferenceError::Malformed {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?
    {
        let name: &[u8] = record.name().as_ref();
        records.insert(
            String::from_utf8_lossy(name).into_owned(),
            RecordExtent {
                offset: record.offset(),
                length: record.length(),
                line_bases: record.line_bases(),
                line_width: record.line_width(),
            },
        );
    }

    debug!(contigs = records.len(), path = %path.display(), "indexed reference");
    let reader = BufReader::new(File::open(path).map_err(io_error)?);
    Ok(FastaStore::Indexed {
        reader,
        records,
        cache: None,
    })
}

fn read_extent(reader: &mut BufReader<File>, extent: RecordExtent) -> io::Result<Arc<[u8]>> {
    reader.seek(SeekFrom::Start(extent.offset))?;
    let mut raw = Vec::with_capacity(extent.byte_len() as usize);
    reader.by_ref().take(extent.byte_len()).read_to_end(&mut raw)?;
    Ok(raw
        .into_iter()
        .filter(|base| !base.is_ascii_whitespace())
        .map(|base| base.to_ascii_uppercase())
        .collect())
}

fn load_all(path: &Path) -> Result<FastaStore, ReferenceError> {
    let reader = open_text(path).map_err(|source| ReferenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut sequences: HashMap<String, Arc<[u8]>> = HashMap::new();
    for record in fasta::Reader::new(reader).records() {
        let record = record.map_err(|err| ReferenceError::Malformed {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;
        sequences.insert(
            record.id().to_string(),
            Arc::from(record.seq().to_ascii_uppercase()),
        );
    }
    debug!(contigs = sequences.len(), path = %path.display(), "loaded compressed reference");
    Ok(FastaStore::Loaded(sequences))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const FASTA: &str = ">chr1 primary\nACGTa\ncgT\n>chr2\nGGCC\n";

    #[test]
    fn opens_lazily_and_caches_contigs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.fa");
        std::fs::write(&path, FASTA).unwrap();

        let mut genome = ReferenceGenome::new(&path);
        assert!(!genome.is_open());
        assert!(genome.contains("chr1").unwrap());
        assert!(genome.is_open());
        assert!(!genome.contains("chr3").unwrap());

        assert_eq!(&*genome.sequence("chr1").unwrap().unwrap(), b"ACGTACGT");
        assert_eq!(&*genome.sequence("chr2").unwrap().unwrap(), b"GGCC");
        assert_eq!(genome.fetch("chr1", 2..6).unwrap(), Some(b"GTAC".to_vec()));
        assert_eq!(genome.fetch("chr1", 6..12).unwrap(), None);
        assert_eq!(genome.fetch("chrX", 0..1).unwrap(), None);
    }

    #[test]
    fn loads_gzip_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.fa.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b">chr1 primary\nACGTa\ncgT\n").unwrap();
        encoder.finish().unwrap();

        let mut genome = ReferenceGenome::new(&path);
        assert_eq!(genome.fetch("chr1", 0..8).unwrap(), Some(b"ACGTACGT".to_vec()));
        assert_eq!(genome.contig_names().unwrap(), vec!["chr1".to_string()]);
    }

    #[test]
    fn extent_covers_line_breaks() {
        let extent = RecordExtent {
            offset: 0,
            length: 8,
            line_bases: 5,
            line_width: 6,
        };
        assert_eq!(extent.byte_len(), 9);
    }

    #[test]
    fn sequence_before_first_header_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.fa");
        std::fs::write(&path, "ACGT\n>chr1\nACGT\n").unwrap();
        let mut genome = ReferenceGenome::new(&path);
        assert!(matches!(genome.open(), Err(ReferenceError::Malformed { .. })));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let mut genome = ReferenceGenome::new("/nonexistent/ref.fa");
        assert!(matches!(genome.open(), Err(ReferenceError::Io { .. })));
    }
}
