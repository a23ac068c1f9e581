//! Atom types from GROMACS `.gro` coordinate files.
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

/// Fixed-width columns of the atom name in a `.gro` atom record.
const ATOM_NAME: std::ops::Range<usize> = 10..15;

/// The atom types of a structure, in atom order.
///
/// Types are 1-based ids assigned to the distinct atom names in the order they are first seen.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AtomTypes {
    /// The distinct atom names, where the name of type `t` is at `t - 1`.
    pub names: Vec<String>,
    pub types: Vec<u32>,
}

impl AtomTypes {
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// The atom name that belongs to a type id.
    pub fn name(&self, atom_type: u32) -> Option<&str> {
        let idx = (atom_type as usize).checked_sub(1)?;
        self.names.get(idx).map(String::as_str)
    }
}

pub fn read_types(path: impl AsRef<Path>) -> Result<AtomTypes> {
    let file = File::open(path)?;
    parse_types(BufReader::new(file))
}

/// Parse the title, atom count and atom records of a `.gro` file. The box line is ignored.
pub fn parse_types<R: BufRead>(input: R) -> Result<AtomTypes> {
    let mut lines = input.lines();
    let mut next_line = || lines.next().transpose();

    // The title is free text.
    next_line()?.ok_or_else(|| Error::malformed(1, "missing title"))?;
    let count = next_line()?.ok_or_else(|| Error::malformed(2, "missing atom count"))?;
    let natoms: usize = count
        .trim()
        .parse()
        .map_err(|_| Error::malformed(2, format!("cannot read atom count from `{count}`")))?;

    let mut atoms = AtomTypes::default();
    for idx in 0..natoms {
        let lineno = idx + 3;
        let Some(line) = next_line()? else {
            return Err(Error::malformed(
                lineno,
                format!("expected {natoms} atoms, found {idx}"),
            ));
        };
        let name = line
            .get(ATOM_NAME)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::malformed(lineno, format!("no atom name in `{line}`")))?;

        let atom_type = match atoms.names.iter().position(|n| n == name) {
            Some(existing) => existing + 1,
            None => {
                atoms.names.push(name.to_string());
                atoms.names.len()
            }
        };
        atoms.types.push(atom_type as u32);
    }

    debug!(
        "read {} atoms of {} types from coordinates",
        atoms.len(),
        atoms.names.len()
    );
    Ok(atoms)
}
