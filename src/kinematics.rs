//! Per-atom time series from a sequence of frames.
//!
//! Frames hold box-relative positions. Every atom's series is unwrapped across periodic
//! boundaries, differentiated into velocities, and scaled into absolute units by the box of
//! each sample.
use glam::DVec3;
use log::debug;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::frame::Frame;

/// Half a box, in fractional units.
const HALF_BOX: f64 = 0.5;

/// The reconstructed trajectory of a single atom.
///
/// All per-sample arrays have the same length, and sample `i` of every series built from one
/// trajectory refers to the same frame.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AtomSeries {
    pub atom_type: u32,
    /// Duration between two samples, in picoseconds.
    pub time_step: f64,
    /// Absolute positions per axis, in nm.
    pub position: [Vec<f64>; 3],
    /// Velocities per axis, in nm/ps.
    pub velocity: [Vec<f64>; 3],
    pub time: Vec<f64>,
    /// Box edge lengths (a, b, c) per sample.
    pub lengths: [Vec<f64>; 3],
    /// Box origin per sample.
    pub origin: [Vec<f64>; 3],
}

impl AtomSeries {
    /// Collect the samples of the atom in `slot` from every frame.
    ///
    /// Positions stay box-relative until [`AtomSeries::derive_kinematics`] runs. Velocities are
    /// taken from the frames if every frame has them, and left empty otherwise.
    fn transpose(frames: &[Frame], slot: usize, time_step: f64) -> Self {
        let mut series = Self {
            atom_type: frames.first().map_or(0, |frame| frame.types[slot]),
            time_step,
            time: frames
                .iter()
                .map(|frame| frame.timestep as f64 * time_step)
                .collect(),
            ..Self::default()
        };
        for d in 0..3 {
            series.position[d] = frames
                .iter()
                .map(|frame| match d {
                    0 => frame.x[slot],
                    1 => frame.y[slot],
                    _ => frame.z[slot],
                })
                .collect();
            series.lengths[d] = frames.iter().map(|frame| frame.lengths()[d]).collect();
            series.origin[d] = frames.iter().map(|frame| frame.origin()[d]).collect();
        }

        if frames.iter().all(|frame| frame.velocities.is_some()) {
            for d in 0..3 {
                series.velocity[d] = frames
                    .iter()
                    .filter_map(|frame| frame.velocities.as_ref())
                    .map(|velocities| velocities[slot][d])
                    .collect();
            }
        }
        series
    }

    /// Unwrap, differentiate and scale the box-relative positions.
    ///
    /// Velocities that were read from the trajectory are kept as they are; only the positions
    /// are scaled.
    fn derive_kinematics(&mut self) {
        let dt = self.time_step;
        for d in 0..3 {
            let lengths = &self.lengths[d];
            let origin = &self.origin[d];
            let position = &mut self.position[d];
            let velocity = &mut self.velocity[d];

            let derive = velocity.len() != position.len();
            if derive {
                *velocity = naive_velocity(position, dt);
                let largest = velocity.iter().fold(0.0_f64, |max, v| max.max(v.abs()));
                if largest * dt > HALF_BOX {
                    unwrap_periodic(position, dt, velocity);
                }
            }

            for (i, p) in position.iter_mut().enumerate() {
                *p = origin[i] + lengths[i] * *p;
                if derive {
                    velocity[i] *= lengths[i];
                }
            }
        }
    }

    /// The number of samples.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn position_at(&self, sample: usize) -> Option<DVec3> {
        let [x, y, z] = &self.position;
        Some(DVec3::new(*x.get(sample)?, *y.get(sample)?, *z.get(sample)?))
    }

    pub fn velocity_at(&self, sample: usize) -> Option<DVec3> {
        let [x, y, z] = &self.velocity;
        Some(DVec3::new(*x.get(sample)?, *y.get(sample)?, *z.get(sample)?))
    }

    /// The box edge lengths at a sample.
    pub fn box_at(&self, sample: usize) -> Option<DVec3> {
        let [a, b, c] = &self.lengths;
        Some(DVec3::new(*a.get(sample)?, *b.get(sample)?, *c.get(sample)?))
    }

    /// The time-averaged position of the atom.
    pub fn mean_position(&self) -> DVec3 {
        if self.is_empty() {
            return DVec3::ZERO;
        }
        let n = self.len() as f64;
        DVec3::from_array([0, 1, 2].map(|d| self.position[d].iter().sum::<f64>() / n))
    }
}

/// Backward differences `(x[i] - x[i-1]) / dt`, where the first sample copies the second.
///
/// Series with fewer than two samples have zero velocity.
pub fn naive_velocity(position: &[f64], dt: f64) -> Vec<f64> {
    if position.len() < 2 {
        return vec![0.0; position.len()];
    }
    let idt = dt.recip();
    let mut velocity = Vec::with_capacity(position.len());
    velocity.push(0.0);
    velocity.extend(position.windows(2).map(|w| (w[1] - w[0]) * idt));
    velocity[0] = velocity[1];
    velocity
}

/// Remove jumps across periodic boundaries from a box-relative series.
///
/// Every sample further than half a box from the first sample is shifted by one box towards
/// it, and the velocities are recomputed from the shifted samples. The first sample is the
/// anchor, so a series that stays within half a box of it is left untouched.
pub fn unwrap_periodic(position: &mut [f64], dt: f64, velocity: &mut [f64]) {
    if position.len() < 2 {
        return;
    }
    let p0 = position[0];
    let idt = dt.recip();
    let shift = |p: f64| {
        if (p - p0).abs() > HALF_BOX {
            if p > p0 {
                p - 1.0
            } else {
                p + 1.0
            }
        } else {
            p
        }
    };

    for i in 0..position.len() - 1 {
        position[i] = shift(position[i]);
        position[i + 1] = shift(position[i + 1]);
        velocity[i + 1] = (position[i + 1] - position[i]) * idt;
    }
    velocity[0] = velocity[1];
}

/// Build the series of every atom from a sequence of frames.
///
/// An empty frame sequence gives no series. With `parallel`, atoms are processed on the
/// rayon thread pool.
///
/// # Errors
///
/// All frames must hold the same number of atoms, or this is an [`Error::AtomCountMismatch`].
pub fn build_series(frames: &[Frame], time_step: f64, parallel: bool) -> Result<Vec<AtomSeries>> {
    let Some(first) = frames.first() else {
        return Ok(Vec::new());
    };
    let natoms = first.natoms;
    for frame in frames {
        let velocities = frame.velocities.as_ref().map_or(natoms, Vec::len);
        let found = [frame.x.len(), frame.y.len(), frame.z.len(), frame.types.len(), velocities]
            .into_iter()
            .find(|&len| len != natoms)
            .or((frame.natoms != natoms).then_some(frame.natoms));
        if let Some(found) = found {
            return Err(Error::AtomCountMismatch {
                frame: frame.timestep,
                expected: natoms,
                found,
            });
        }
    }

    let build = |slot| {
        let mut series = AtomSeries::transpose(frames, slot, time_step);
        series.derive_kinematics();
        series
    };
    let series: Vec<AtomSeries> = if parallel {
        (0..natoms).into_par_iter().map(build).collect()
    } else {
        (0..natoms).map(build).collect()
    };
    debug!("built {} series of {} samples", series.len(), frames.len());
    Ok(series)
}
