#![allow(dead_code)]
//! Writers for small synthetic trajectories.
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use glam::{Mat3, Vec3};
use mdingest::xdr::{write_f32, write_i32, write_opaque};
use mdingest::{codec, trr, xtc};

/// One atom record of a LAMMPS dump: id, type and scaled position.
pub type Atom = (usize, u32, [f64; 3]);

/// A single LAMMPS dump frame with `id type xs ys zs` columns. Bounds are in Ångström.
pub fn lammps_frame(step: i64, bounds: [(f64, f64); 3], atoms: &[Atom]) -> String {
    let mut text = String::new();
    writeln!(text, "ITEM: TIMESTEP\n{step}").unwrap();
    writeln!(text, "ITEM: NUMBER OF ATOMS\n{}", atoms.len()).unwrap();
    writeln!(text, "ITEM: BOX BOUNDS pp pp pp").unwrap();
    for (min, max) in bounds {
        writeln!(text, "{min:.6e} {max:.6e}").unwrap();
    }
    writeln!(text, "ITEM: ATOMS id type xs ys zs").unwrap();
    for (id, atom_type, [x, y, z]) in atoms {
        writeln!(text, "{id} {atom_type} {x} {y} {z}").unwrap();
    }
    text
}

/// A cubic 100 Å box, 10 nm on every side.
pub const CUBE: [(f64, f64); 3] = [(0.0, 100.0); 3];

/// `nframes` frames of `natoms` atoms at rest, with steps 1, 2, 3 and so on.
pub fn lammps_dump(natoms: usize, nframes: i64) -> String {
    let atoms: Vec<Atom> = (1..=natoms)
        .map(|id| (id, 1, [0.1 * id as f64, 0.5, 0.5]))
        .collect();
    (1..=nframes)
        .map(|step| lammps_frame(step, CUBE, &atoms))
        .collect()
}

pub fn write_text(path: &Path, text: &str) {
    std::fs::write(path, text).unwrap();
}

pub fn write_gzip(path: &Path, text: &str) {
    let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

/// A `.gro` structure with one atom per name, in a 5 nm box.
pub fn write_gro(path: &Path, names: &[&str]) {
    let mut text = format!("generated structure\n{:5}\n", names.len());
    for (idx, name) in names.iter().enumerate() {
        let serial = idx + 1;
        writeln!(
            text,
            "{:>5}{:<5}{:>5}{:>5}{:8.3}{:8.3}{:8.3}",
            1, "SOL", name, serial, 0.1, 0.2, 0.3
        )
        .unwrap();
    }
    writeln!(text, "   5.00000   5.00000   5.00000").unwrap();
    write_text(path, &text);
}

/// A single-precision `.trr` frame with a rectangular box.
pub struct TrrFrame {
    pub step: i32,
    pub time: f32,
    pub boxdiag: [f32; 3],
    pub positions: Vec<[f32; 3]>,
    pub velocities: Option<Vec<[f32; 3]>>,
}

pub fn write_trr(path: &Path, frames: &[TrrFrame]) {
    let mut file = BufWriter::new(File::create(path).unwrap());
    for frame in frames {
        let natoms = frame.positions.len();
        let block = natoms * 3 * 4;
        let v_size = if frame.velocities.is_some() { block } else { 0 };
        write_i32(&mut file, trr::MAGIC).unwrap();
        write_i32(&mut file, trr::VERSION.len() as i32 + 1).unwrap();
        write_opaque(&mut file, trr::VERSION.as_bytes()).unwrap();
        for size in [0, 0, 9 * 4, 0, 0, 0, 0, block, v_size, 0, natoms] {
            write_i32(&mut file, size as i32).unwrap();
        }
        write_i32(&mut file, frame.step).unwrap();
        write_i32(&mut file, 0).unwrap();
        write_f32(&mut file, frame.time).unwrap();
        write_f32(&mut file, 0.0).unwrap();

        let [a, b, c] = frame.boxdiag;
        for value in [a, 0.0, 0.0, 0.0, b, 0.0, 0.0, 0.0, c] {
            write_f32(&mut file, value).unwrap();
        }
        let blocks = std::iter::once(&frame.positions).chain(frame.velocities.as_ref());
        for vectors in blocks {
            for &value in vectors.iter().flatten() {
                write_f32(&mut file, value).unwrap();
            }
        }
    }
    file.flush().unwrap();
}

/// Write an `.xtc` trajectory with a rectangular box, one frame per `(step, positions)`.
pub fn write_xtc(path: &Path, boxdiag: [f32; 3], frames: &[(i64, Vec<[f32; 3]>)]) {
    let mut file = BufWriter::new(File::create(path).unwrap());
    for (step, positions) in frames {
        let header = xtc::Header {
            natoms: positions.len(),
            step: *step,
            time: *step as f32,
            boxvec: Mat3::from_diagonal(Vec3::from_array(boxdiag)),
        };
        file.write_all(&header.to_be_bytes()).unwrap();
        codec::encode(&mut file, positions, codec::DEFAULT_PRECISION).unwrap();
    }
    file.flush().unwrap();
}

/// Positions of a small water-like cluster that drifts along x with the step.
pub fn cluster(natoms: usize, step: i64) -> Vec<[f32; 3]> {
    (0..natoms)
        .map(|i| {
            let i = i as f32;
            [
                0.5 + 0.1 * i + 0.01 * step as f32,
                1.0 + 0.05 * (i * 0.7).sin(),
                1.5 - 0.02 * i,
            ]
        })
        .collect()
}

#[track_caller]
pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "{actual} differs from {expected} by more than {tolerance}"
    );
}
