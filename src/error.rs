use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The file name matches none of the supported trajectory formats.
    #[error("unknown trajectory format: `{0}`")]
    UnknownFormat(String),
    /// A binary format needs a coordinate file to resolve atom types, and none (or an
    /// unsupported one) was given.
    #[error("a `.gro` coordinates file is required alongside `{}`", path.display())]
    MissingCompanion { path: PathBuf },
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("inconsistent number of atoms at frame {frame}: expected {expected}, found {found}")]
    AtomCountMismatch {
        frame: i64,
        expected: usize,
        found: usize,
    },
    #[error("buffer overrun during decompression: run of {run} at {position} exceeds {capacity}")]
    BufferOverrun {
        position: usize,
        run: usize,
        capacity: usize,
    },
    #[error("invalid bin size for small index {smallidx}")]
    InvalidBinSize { smallidx: usize },
    #[error("coordinate {value} overflows the integer range at precision {precision}")]
    PrecisionOverflow { value: f64, precision: f32 },
    #[error("found invalid magic number '{found}' (expected {expected})")]
    InvalidMagic { expected: i32, found: i32 },
    #[error("invalid frame header: {0}")]
    Header(String),
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

impl Error {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            line,
            reason: reason.into(),
        }
    }
}
