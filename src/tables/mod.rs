//! Per-read side tables loaded next to the alignment stream, and the
//! nanopolish row converter.
//!
//! Text tables may be gzip compressed (`.gz` suffix). The probability table
//! is read by seeking and must be stored uncompressed.

mod annotation;
mod calls;
mod nanopolish;
mod probabilities;
mod reads;

pub use annotation::{Annotation, AnnotationTable, ModifiedBaseSplitter};
pub use calls::{CallFormat, CallTable, TableCall};
pub use nanopolish::{NanopolishGroup, NanopolishSite};
pub use probabilities::{ProbabilityRow, ProbabilityTable};
pub use reads::{ReadEntry, ReadTable};

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use thiserror::Error;

/// Errors raised while loading or querying a table.
#[derive(Debug, Error)]
pub enum TableError {
    /// Underlying I/O failure.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Table path.
        path: PathBuf,
        /// Source error.
        #[source]
        source: io::Error,
    },

    /// Table content does not follow the expected layout.
    #[error("{}:{line}: {detail}", path.display())]
    Malformed {
        /// Table path.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Description of the problem.
        detail: String,
    },
}

impl TableError {
    #[cold]
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    #[cold]
    pub(crate) fn malformed(path: &Path, line: usize, detail: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            line,
            detail: detail.into(),
        }
    }
}

/// Open a text file, transparently decompressing `.gz` files.
pub fn open_text(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

pub(crate) fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Iterate over the non-empty lines of a table with their 1-based numbers.
pub(crate) fn table_lines(
    path: &Path,
) -> Result<impl Iterator<Item = Result<(usize, String), TableError>>, TableError> {
    let reader = open_text(path).map_err(|err| TableError::io(path, err))?;
    let path = path.to_path_buf();
    Ok(reader
        .lines()
        .enumerate()
        .map(move |(idx, line)| {
            line.map(|text| (idx + 1, text))
                .map_err(|err| TableError::io(&path, err))
        })
        .filter(|item| !matches!(item, Ok((_, text)) if text.trim().is_empty())))
}
