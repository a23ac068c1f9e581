//! Molecular-dynamics trajectory ingestion.
//!
//! Reads LAMMPS dumps, VASP `XDATCAR` files and GROMACS `.trr`/`.xtc` trajectories, and
//! reconstructs the time series of every atom: absolute position, velocity and the box it was
//! in, sample by sample.
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use log::{error, info, warn};

pub mod codec;
pub mod error;
pub mod format;
pub mod frame;
pub mod gro;
pub mod kinematics;
pub mod lammps;
pub mod trr;
pub mod window;
pub mod xdatcar;
pub mod xdr;
pub mod xtc;

pub use crate::error::{Error, Result};
pub use crate::format::{Detected, Format};
pub use crate::frame::{BoxBounds, Frame};
pub use crate::gro::AtomTypes;
pub use crate::kinematics::AtomSeries;
pub use crate::window::Window;

use crate::lammps::LammpsReader;
use crate::trr::TrrReader;
use crate::xdatcar::XdatcarReader;
use crate::xtc::XtcReader;

/// What to load, and how.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub trajectory: PathBuf,
    /// A `.gro` file with the atom types of a GROMACS trajectory.
    pub coordinates: Option<PathBuf>,
    /// Duration between two retained frames, in picoseconds.
    pub time_step: f64,
    pub window: Window,
    /// Derive the kinematics of different atoms on multiple threads.
    pub parallel: bool,
}

impl LoadOptions {
    pub fn new(trajectory: impl Into<PathBuf>) -> Self {
        Self {
            trajectory: trajectory.into(),
            coordinates: None,
            time_step: 1.0,
            window: Window::default(),
            parallel: true,
        }
    }

    pub fn coordinates(mut self, coordinates: impl Into<PathBuf>) -> Self {
        self.coordinates = Some(coordinates.into());
        self
    }

    pub fn time_step(mut self, time_step: f64) -> Self {
        self.time_step = time_step;
        self
    }

    pub fn window(mut self, window: Window) -> Self {
        self.window = window;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return Err(Error::InvalidOptions(format!(
                "time step must be positive, found {}",
                self.time_step
            )));
        }
        Ok(())
    }
}

enum Source {
    Lammps(LammpsReader<Box<dyn BufRead>>),
    Xdatcar(XdatcarReader<Box<dyn BufRead>>),
    Trr(TrrReader<BufReader<File>>),
    Xtc(XtcReader<BufReader<File>>),
}

/// A trajectory of any supported format, opened for reading.
pub struct TrajectoryReader {
    source: Source,
    detected: Detected,
    /// Atom types from the coordinates file of a GROMACS trajectory.
    types: Option<AtomTypes>,
    options: LoadOptions,
}

impl TrajectoryReader {
    /// Detect the format of the trajectory and open it.
    ///
    /// # Errors
    ///
    /// Invalid options, an unknown format or a missing coordinates file are reported before
    /// anything is parsed.
    pub fn open(options: &LoadOptions) -> Result<Self> {
        options.validate()?;
        let detected = format::detect(&options.trajectory, options.coordinates.as_deref())?;
        info!(
            "reading {} as {}{}",
            options.trajectory.display(),
            detected.format,
            if detected.compressed { " (gzip)" } else { "" }
        );

        let path = &options.trajectory;
        let window = options.window;
        let source = match detected.format {
            Format::Lammps => Source::Lammps(LammpsReader::open(path, detected.compressed, window)?),
            Format::Xdatcar => {
                Source::Xdatcar(XdatcarReader::open(path, detected.compressed, window)?)
            }
            Format::Trr => Source::Trr(TrrReader::open(path)?),
            Format::Xtc => Source::Xtc(XtcReader::open(path)?),
        };
        let types = match (&options.coordinates, detected.format.is_gromacs()) {
            (Some(coordinates), true) => Some(gro::read_types(coordinates)?),
            _ => None,
        };

        Ok(Self {
            source,
            detected,
            types,
            options: options.clone(),
        })
    }

    pub fn format(&self) -> Format {
        self.detected.format
    }

    pub fn is_compressed(&self) -> bool {
        self.detected.compressed
    }

    /// The atom types of a GROMACS trajectory, if a coordinates file was given.
    pub fn atom_types(&self) -> Option<&AtomTypes> {
        self.types.as_ref()
    }

    /// Read the frames selected by the window, with box-relative positions.
    pub fn read_frames(&mut self) -> Result<Vec<Frame>> {
        let window = &self.options.window;
        let mut frames = match &mut self.source {
            Source::Lammps(reader) => reader.read_frames()?,
            Source::Xdatcar(reader) => reader.read_frames()?,
            Source::Trr(reader) => reader.read_frames(window)?,
            Source::Xtc(reader) => reader.read_frames(window)?,
        };

        if let Some(types) = &self.types {
            for frame in &mut frames {
                if frame.natoms != types.len() {
                    return Err(Error::AtomCountMismatch {
                        frame: frame.timestep,
                        expected: types.len(),
                        found: frame.natoms,
                    });
                }
                frame.types.clone_from(&types.types);
            }
        }
        Ok(frames)
    }

    /// Read the trajectory and build the time series of every atom.
    pub fn read_series(&mut self) -> Result<Vec<AtomSeries>> {
        let frames = self.read_frames()?;
        if frames.is_empty() {
            warn!("{} holds no frames", self.options.trajectory.display());
        }
        kinematics::build_series(&frames, self.options.time_step, self.options.parallel)
    }
}

/// Load the time series of every atom of a trajectory.
///
/// This never fails. Any error is logged, and results in an empty set of series.
pub fn load_trajectory(options: &LoadOptions) -> Vec<AtomSeries> {
    match TrajectoryReader::open(options).and_then(|mut reader| reader.read_series()) {
        Ok(series) => {
            info!(
                "loaded {} atoms from {}",
                series.len(),
                options.trajectory.display()
            );
            series
        }
        Err(err) => {
            error!("failed to load {}: {err}", options.trajectory.display());
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_step_must_be_positive() {
        for time_step in [0.0, -1.0, f64::NAN] {
            let options = LoadOptions::new("dump.lammpstrj").time_step(time_step);
            assert!(matches!(options.validate(), Err(Error::InvalidOptions(_))));
        }
        assert!(LoadOptions::new("dump.lammpstrj").validate().is_ok());
    }

    #[test]
    fn unknown_format_is_not_opened() {
        let options = LoadOptions::new("data.foo");
        assert!(matches!(
            TrajectoryReader::open(&options),
            Err(Error::UnknownFormat(_))
        ));
        assert!(load_trajectory(&options).is_empty());
    }

    #[test]
    fn missing_file() {
        let options = LoadOptions::new("/nonexistent/dump.lammpstrj");
        assert!(matches!(TrajectoryReader::open(&options), Err(Error::Io(_))));
        assert!(load_trajectory(&options).is_empty());
    }
}
