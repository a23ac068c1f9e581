//! Trajectory format detection from file names.
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

/// The trajectory formats this crate can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// LAMMPS text dump (`*.lammpstrj`).
    Lammps,
    /// VASP `XDATCAR`, recognized by its bare name.
    Xdatcar,
    /// GROMACS full-precision binary trajectory (`*.trr`). Needs a `.gro` companion.
    Trr,
    /// GROMACS compressed binary trajectory (`*.xtc`).
    Xtc,
}

impl Format {
    /// Whether the format is a binary GROMACS format that can use a coordinates file.
    pub fn is_gromacs(&self) -> bool {
        matches!(self, Format::Trr | Format::Xtc)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Lammps => "LAMMPS",
            Format::Xdatcar => "XDATCAR",
            Format::Trr => "TRR",
            Format::Xtc => "XTC",
        };
        f.write_str(name)
    }
}

/// The outcome of [`detect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detected {
    pub format: Format,
    /// The file is gzip-framed and must be decompressed while reading.
    pub compressed: bool,
}

/// Split a file name into its `.`-separated components, stripping a trailing `gz`/`gzip`.
fn split_name(name: &str) -> (Vec<&str>, bool) {
    let mut parts: Vec<&str> = name.split('.').collect();
    let compressed = parts.len() > 1 && matches!(parts.last(), Some(&("gz" | "gzip")));
    if compressed {
        parts.pop();
    }
    (parts, compressed)
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::UnknownFormat(path.display().to_string()))
}

/// Whether `path` names a GROMACS `.gro` coordinates file.
pub fn is_coordinates(path: &Path) -> bool {
    match file_name(path) {
        Ok(name) => {
            let (parts, compressed) = split_name(name);
            !compressed && parts.len() > 1 && parts.last() == Some(&"gro")
        }
        Err(_) => false,
    }
}

/// Determine the format of `trajectory`, looking at its file name only.
///
/// TRR files carry no atom types, so they require a `.gro` `coordinates` file. XTC files may
/// have one. The binary formats are read with random access and cannot be compressed.
pub fn detect(trajectory: &Path, coordinates: Option<&Path>) -> Result<Detected> {
    let name = file_name(trajectory)?;
    let unknown = || Error::UnknownFormat(name.to_string());
    let (parts, compressed) = split_name(name);

    let format = match parts.as_slice() {
        [] | [""] => return Err(unknown()),
        ["XDATCAR"] => Format::Xdatcar,
        [_] => return Err(unknown()),
        [.., "lammpstrj"] => Format::Lammps,
        [.., "trr"] if !compressed => Format::Trr,
        [.., "xtc"] if !compressed => Format::Xtc,
        _ => return Err(unknown()),
    };

    if format.is_gromacs() {
        let companion_ok = coordinates.map(is_coordinates);
        match (format, companion_ok) {
            (Format::Trr, None) | (_, Some(false)) => {
                return Err(Error::MissingCompanion {
                    path: trajectory.to_path_buf(),
                })
            }
            _ => {}
        }
    }

    Ok(Detected { format, compressed })
}
