//! Reader for VASP `XDATCAR` trajectories.
//!
//! A lattice header (comment, scale factor, three lattice vectors, optional species names and
//! the atom counts per species) is followed by configuration blocks of one position line per
//! atom. Variable-cell runs repeat the header before every configuration.
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use flate2::read::MultiGzDecoder;
use glam::{DMat3, DVec3};
use log::debug;

use crate::error::{Error, Result};
use crate::frame::{BoxBounds, Frame};
use crate::window::Window;

/// Lattice vectors are given in Ångström.
const ANGSTROM: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
struct Lattice {
    /// Edge lengths in nanometres.
    lengths: [f64; 3],
    species: Vec<String>,
    types: Vec<u32>,
}

fn parse_all<T: FromStr>(line: &str, lineno: usize, what: &str) -> Result<Vec<T>> {
    line.split_whitespace()
        .map(|token| {
            token
                .parse()
                .map_err(|_| Error::malformed(lineno, format!("cannot read {what} from `{token}`")))
        })
        .collect()
}

fn parse_vector(line: &str, lineno: usize, what: &str) -> Result<DVec3> {
    match parse_all::<f64>(line, lineno, what)?.as_slice() {
        [x, y, z, ..] => Ok(DVec3::new(*x, *y, *z)),
        _ => Err(Error::malformed(lineno, format!("expected three values for {what}"))),
    }
}

fn is_configuration(line: &str) -> bool {
    let line = line.to_ascii_lowercase();
    ["direct", "cartesian", "konfig"]
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

pub struct XdatcarReader<R> {
    input: R,
    window: Window,
    lineno: usize,
}

impl XdatcarReader<Box<dyn BufRead>> {
    pub fn open(path: impl AsRef<Path>, compressed: bool, window: Window) -> Result<Self> {
        let file = File::open(path)?;
        let input: Box<dyn BufRead> = if compressed {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Self::new(input, window))
    }
}

impl<R: BufRead> XdatcarReader<R> {
    pub fn new(input: R, window: Window) -> Self {
        Self {
            input,
            window,
            lineno: 0,
        }
    }

    /// The next non-blank line, trimmed.
    fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.lineno += 1;
            let text = line.trim();
            if !text.is_empty() {
                return Ok(Some(text.to_string()));
            }
        }
    }

    fn expect_line(&mut self, what: &str) -> Result<String> {
        self.next_line()?
            .ok_or_else(|| Error::malformed(self.lineno + 1, format!("missing {what}")))
    }

    /// Read the header that follows the comment line.
    fn read_lattice(&mut self) -> Result<Lattice> {
        let line = self.expect_line("scale factor")?;
        let scale = parse_all::<f64>(&line, self.lineno, "scale factor")?
            .first()
            .copied()
            .ok_or_else(|| Error::malformed(self.lineno, "missing scale factor"))?;

        let mut rows = [DVec3::ZERO; 3];
        for row in &mut rows {
            let line = self.expect_line("lattice vector")?;
            *row = parse_vector(&line, self.lineno, "lattice vector")?;
        }
        // A negative scale factor is the cell volume.
        let scale = if scale < 0.0 {
            let volume = DMat3::from_cols(rows[0], rows[1], rows[2]).determinant().abs();
            (-scale / volume).cbrt()
        } else {
            scale
        };
        let lengths = rows.map(|row| row.length() * scale * ANGSTROM);

        let line = self.expect_line("species")?;
        let (species, counts) = if line.split_whitespace().all(|t| t.parse::<usize>().is_ok()) {
            (Vec::new(), line)
        } else {
            let species: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            (species, self.expect_line("atom counts")?)
        };
        let counts = parse_all::<usize>(&counts, self.lineno, "atom count")?;

        let types = counts
            .iter()
            .enumerate()
            .flat_map(|(species, &count)| std::iter::repeat(species as u32 + 1).take(count))
            .collect();
        Ok(Lattice {
            lengths,
            species,
            types,
        })
    }

    /// Read all retained configurations.
    ///
    /// # Errors
    ///
    /// Configurations whose atom count differs from the first header are an
    /// [`Error::AtomCountMismatch`]; unreadable lines are an [`Error::MalformedRecord`].
    pub fn read_frames(&mut self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        let mut lattice: Option<Lattice> = None;
        let mut counter = 0;

        while let Some(line) = self.next_line()? {
            if !is_configuration(&line) {
                // Anything else starts a (repeated) header with its comment line.
                let next = self.read_lattice()?;
                if let Some(previous) = &lattice {
                    if previous.types.len() != next.types.len() {
                        return Err(Error::AtomCountMismatch {
                            frame: counter as i64 + 1,
                            expected: previous.types.len(),
                            found: next.types.len(),
                        });
                    }
                }
                debug!("lattice {:?} for species {:?}", next.lengths, next.species);
                lattice = Some(next);
                continue;
            }

            let Some(current) = &lattice else {
                return Err(Error::malformed(
                    self.lineno,
                    "configuration before the lattice header",
                ));
            };
            let natoms = current.types.len();
            counter += 1;
            let keep = match self.window.classify(counter) {
                Some(keep) => keep,
                None => break,
            };
            if !keep {
                for _ in 0..natoms {
                    self.expect_line("atom position")?;
                }
                continue;
            }

            let timestep = line
                .split_once('=')
                .and_then(|(_, n)| n.trim().parse().ok())
                .unwrap_or(counter as i64);
            let cartesian = line.to_ascii_lowercase().starts_with("cartesian");

            let mut frame = Frame::new(timestep);
            frame.bounds = current.lengths.map(BoxBounds::from_length);
            frame.resize(natoms);
            for (slot, &atom_type) in current.types.iter().enumerate() {
                let line = self.expect_line("atom position")?;
                let mut position = parse_vector(&line, self.lineno, "atom position")?.to_array();
                if cartesian {
                    for (value, length) in position.iter_mut().zip(current.lengths) {
                        *value = *value * ANGSTROM / length;
                    }
                }
                frame.set_atom(slot, atom_type, position);
            }
            frames.push(frame);
        }

        debug!("read {} of {counter} configurations", frames.len());
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn read(text: &str, window: Window) -> Result<Vec<Frame>> {
        XdatcarReader::new(Cursor::new(text.to_string()), window).read_frames()
    }

    const VASP5: &str = "\
NaCl
   1.0
    10.0  0.0  0.0
     0.0 20.0  0.0
     0.0  0.0 10.0
   Na Cl
    2  1
Direct configuration=     1
  0.10  0.20  0.30
  0.40  0.50  0.60
  0.70  0.80  0.90
Direct configuration=     2
  0.11  0.21  0.31
  0.41  0.51  0.61
  0.71  0.81  0.91
Direct configuration=     3
  0.12  0.22  0.32
  0.42  0.52  0.62
  0.72  0.82  0.92
";

    #[test]
    fn species_and_configurations() -> Result<()> {
        let frames = read(VASP5, Window::default())?;
        assert_eq!(frames.len(), 3);
        let first = &frames[0];
        assert_eq!(first.timestep, 1);
        assert_eq!(first.types, [1, 1, 2]);
        assert_eq!(first.x, [0.10, 0.40, 0.70]);
        assert_eq!(first.lengths(), [1.0, 2.0, 1.0]);
        assert_eq!(first.origin(), [0.0; 3]);
        assert_eq!(frames[2].timestep, 3);
        assert_eq!(frames[2].z, [0.32, 0.62, 0.92]);
        Ok(())
    }

    #[test]
    fn counts_without_species() -> Result<()> {
        let vasp4 = VASP5.replace("   Na Cl\n", "");
        let frames = read(&vasp4, Window::default())?;
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].types, [1, 1, 2]);
        Ok(())
    }

    #[test]
    fn windowed() -> Result<()> {
        let frames = read(VASP5, Window::new(1, 1, 2))?;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestep, 2);
        assert_eq!(frames[0].y, [0.21, 0.51, 0.81]);
        Ok(())
    }

    #[test]
    fn variable_cell() -> Result<()> {
        let text = format!(
            "{}{}",
            VASP5.split("Direct configuration=     2").next().unwrap_or_default(),
            "\
NaCl
   1.0
    20.0  0.0  0.0
     0.0 20.0  0.0
     0.0  0.0 20.0
   Na Cl
    2  1
Direct configuration=     2
  0.11  0.21  0.31
  0.41  0.51  0.61
  0.71  0.81  0.91
"
        );
        let frames = read(&text, Window::default())?;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].lengths(), [1.0, 2.0, 1.0]);
        assert_eq!(frames[1].lengths(), [2.0, 2.0, 2.0]);
        Ok(())
    }

    #[test]
    fn changing_atom_count() {
        let text = format!("{VASP5}NaCl\n1.0\n10 0 0\n0 10 0\n0 0 10\nNa Cl\n2 2\n");
        assert!(matches!(
            read(&text, Window::default()),
            Err(Error::AtomCountMismatch {
                frame: 4,
                expected: 3,
                found: 4
            })
        ));
    }

    #[test]
    fn negative_scale_is_a_volume() -> Result<()> {
        let text = VASP5.replacen("   1.0\n", "   -16000.0\n", 1);
        let frames = read(&text, Window::default())?;
        // The unscaled cell has a volume of 2000 Å³, so every vector is doubled.
        let lengths = frames[0].lengths();
        for (length, expected) in lengths.iter().zip([2.0, 4.0, 2.0]) {
            assert!((length - expected).abs() < 1e-12);
        }
        Ok(())
    }
}
