//! Reader for GROMACS full-precision `.trr` trajectories.
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use glam::{DMat3, DVec3};
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::frame::{BoxBounds, Frame};
use crate::window::Window;
use crate::xdr::{read_i32, read_real, read_string};

pub const MAGIC: i32 = 1993;
pub const VERSION: &str = "GMX_trn_file";

pub const HAS_BOX: u8 = 1;
pub const HAS_POSITIONS: u8 = 2;
pub const HAS_VELOCITIES: u8 = 4;
pub const HAS_FORCES: u8 = 8;

/// The header of a single `.trr` frame.
///
/// The `*_size` fields are the byte sizes of the blocks that follow the header. A size of zero
/// means the block is absent.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Header {
    pub ir_size: usize,
    pub e_size: usize,
    pub box_size: usize,
    pub vir_size: usize,
    pub pres_size: usize,
    pub top_size: usize,
    pub sym_size: usize,
    pub x_size: usize,
    pub v_size: usize,
    pub f_size: usize,
    pub natoms: usize,
    pub step: i64,
    pub nre: i32,
    pub time: f64,
    pub lambda: f64,
    /// Reals are stored as `f64` rather than `f32`.
    pub double: bool,
}

fn read_size<R: Read>(file: &mut R, what: &str) -> Result<usize> {
    let value = read_i32(file)?;
    usize::try_from(value).map_err(|_| Error::Header(format!("negative {what} ({value})")))
}

impl Header {
    /// Read a header, returning [`None`] if the reader is at the end of its input.
    pub fn read<R: Read>(file: &mut R) -> Result<Option<Self>> {
        match read_i32(file) {
            Ok(MAGIC) => {}
            Ok(found) => {
                return Err(Error::InvalidMagic {
                    expected: MAGIC,
                    found,
                })
            }
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => Err(err)?,
        }

        let slen = read_i32(file)?;
        if slen != VERSION.len() as i32 + 1 {
            return Err(Error::Header(format!("unexpected version length {slen}")));
        }
        let version = read_string(file)?;
        if version != VERSION {
            return Err(Error::Header(format!("unexpected version `{version}`")));
        }

        let mut header = Header {
            ir_size: read_size(file, "ir size")?,
            e_size: read_size(file, "e size")?,
            box_size: read_size(file, "box size")?,
            vir_size: read_size(file, "virial size")?,
            pres_size: read_size(file, "pressure size")?,
            top_size: read_size(file, "topology size")?,
            sym_size: read_size(file, "symmetry size")?,
            x_size: read_size(file, "position size")?,
            v_size: read_size(file, "velocity size")?,
            f_size: read_size(file, "force size")?,
            natoms: read_size(file, "number of atoms")?,
            step: read_i32(file)? as i64,
            nre: read_i32(file)?,
            ..Header::default()
        };
        header.double = header.real_size()? == std::mem::size_of::<f64>();
        header.time = read_real(file, header.double)?;
        header.lambda = read_real(file, header.double)?;
        Ok(Some(header))
    }

    /// The size of a real, derived from whichever block is present.
    fn real_size(&self) -> Result<usize> {
        let n3 = self.natoms * 3;
        let size = if self.box_size > 0 {
            self.box_size / 9
        } else if n3 > 0 && self.x_size > 0 {
            self.x_size / n3
        } else if n3 > 0 && self.v_size > 0 {
            self.v_size / n3
        } else if n3 > 0 && self.f_size > 0 {
            self.f_size / n3
        } else {
            0
        };
        match size {
            4 | 8 => Ok(size),
            _ => Err(Error::Header(format!(
                "cannot determine the precision of a frame at step {}",
                self.step
            ))),
        }
    }

    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        for (size, flag) in [
            (self.box_size, HAS_BOX),
            (self.x_size, HAS_POSITIONS),
            (self.v_size, HAS_VELOCITIES),
            (self.f_size, HAS_FORCES),
        ] {
            if size > 0 {
                flags |= flag;
            }
        }
        flags
    }

    /// The number of bytes of the blocks that follow this header.
    pub fn payload_size(&self) -> u64 {
        (self.box_size
            + self.vir_size
            + self.pres_size
            + self.x_size
            + self.v_size
            + self.f_size) as u64
    }

    fn check_block(&self, size: usize, count: usize, what: &str) -> Result<()> {
        let real = if self.double { 8 } else { 4 };
        if size != 0 && size != count * real {
            return Err(Error::Header(format!(
                "{what} block of {size} bytes does not hold {count} reals"
            )));
        }
        Ok(())
    }
}

/// The decoded contents of a `.trr` frame.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TrrFrame {
    pub step: i64,
    /// Time in picoseconds.
    pub time: f64,
    pub lambda: f64,
    pub flags: u8,
    pub boxvec: DMat3,
    pub positions: Vec<DVec3>,
    pub velocities: Vec<DVec3>,
    pub forces: Vec<DVec3>,
}

impl TrrFrame {
    /// Convert to a box-relative [`Frame`], keeping velocities when the file has them.
    pub fn to_frame(&self) -> Result<Frame> {
        if self.flags & HAS_BOX == 0 {
            return Err(Error::Header(format!("frame at step {} has no box", self.step)));
        }
        if self.flags & HAS_POSITIONS == 0 {
            return Err(Error::Header(format!(
                "frame at step {} has no positions",
                self.step
            )));
        }
        let mut frame = Frame::new(self.step);
        let diagonal = [self.boxvec.x_axis.x, self.boxvec.y_axis.y, self.boxvec.z_axis.z];
        frame.bounds = diagonal.map(BoxBounds::from_length);
        frame.set_absolute_positions(self.positions.iter().map(|p| p.to_array()));
        if self.flags & HAS_VELOCITIES != 0 {
            frame.velocities = Some(self.velocities.clone());
        }
        Ok(frame)
    }
}

/// Atom count, frame count and frame offsets of a `.trr` file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Scan {
    pub natoms: usize,
    pub nframes: usize,
    /// The byte offset of the start of every frame.
    pub offsets: Box<[u64]>,
}

fn read_reals<R: Read>(file: &mut R, double: bool, buf: &mut [f64]) -> io::Result<()> {
    for value in buf {
        *value = read_real(file, double)?;
    }
    Ok(())
}

fn read_vectors<R: Read>(
    file: &mut R,
    double: bool,
    natoms: usize,
    vectors: &mut Vec<DVec3>,
) -> io::Result<()> {
    vectors.clear();
    vectors.reserve(natoms);
    for _ in 0..natoms {
        let mut v = [0.0; 3];
        read_reals(file, double, &mut v)?;
        vectors.push(DVec3::from_array(v));
    }
    Ok(())
}

fn read_matrix<R: Read>(file: &mut R, double: bool) -> io::Result<DMat3> {
    let mut m = [0.0; 9];
    read_reals(file, double, &mut m)?;
    Ok(DMat3::from_cols_array(&m))
}

#[derive(Debug, Clone)]
pub struct TrrReader<R> {
    pub file: R,
}

impl TrrReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> TrrReader<R> {
    pub fn new(reader: R) -> Self {
        Self { file: reader }
    }

    /// Reads the next frame into `frame`, returning `false` at the end of the file.
    pub fn read_frame(&mut self, frame: &mut TrrFrame) -> Result<bool> {
        let Some(header) = Header::read(&mut self.file)? else {
            return Ok(false);
        };
        self.read_payload(&header, frame)?;
        Ok(true)
    }

    fn read_payload(&mut self, header: &Header, frame: &mut TrrFrame) -> Result<()> {
        let file = &mut self.file;
        let double = header.double;
        let n3 = header.natoms * 3;
        header.check_block(header.box_size, 9, "box")?;
        header.check_block(header.vir_size, 9, "virial")?;
        header.check_block(header.pres_size, 9, "pressure")?;
        header.check_block(header.x_size, n3, "position")?;
        header.check_block(header.v_size, n3, "velocity")?;
        header.check_block(header.f_size, n3, "force")?;

        frame.step = header.step;
        frame.time = header.time;
        frame.lambda = header.lambda;
        frame.flags = header.flags();
        if header.box_size > 0 {
            frame.boxvec = read_matrix(file, double)?;
        }
        // Virial and pressure are not kept.
        for size in [header.vir_size, header.pres_size] {
            if size > 0 {
                read_matrix(file, double)?;
            }
        }
        let blocks = [
            (header.x_size, &mut frame.positions),
            (header.v_size, &mut frame.velocities),
            (header.f_size, &mut frame.forces),
        ];
        for (size, vectors) in blocks {
            if size > 0 {
                read_vectors(file, double, header.natoms, vectors)?;
            } else {
                vectors.clear();
            }
        }
        Ok(())
    }
}

impl<R: Read + Seek> TrrReader<R> {
    /// Walk the headers of all frames without decoding their payloads.
    ///
    /// The reader returns to its current position afterwards.
    ///
    /// # Errors
    ///
    /// Frames that disagree on the number of atoms are an [`Error::AtomCountMismatch`].
    pub fn scan(&mut self) -> Result<Scan> {
        let start_pos = self.file.stream_position()?;

        let mut scan = Scan::default();
        let mut offsets = Vec::new();
        loop {
            let offset = self.file.stream_position()?;
            let Some(header) = Header::read(&mut self.file)? else {
                break;
            };
            if offsets.is_empty() {
                scan.natoms = header.natoms;
            } else if header.natoms != scan.natoms {
                return Err(Error::AtomCountMismatch {
                    frame: header.step,
                    expected: scan.natoms,
                    found: header.natoms,
                });
            }
            offsets.push(offset);
            self.file
                .seek(SeekFrom::Current(header.payload_size() as i64))?;
        }

        self.file.seek(SeekFrom::Start(start_pos))?;
        scan.nframes = offsets.len();
        scan.offsets = offsets.into_boxed_slice();
        Ok(scan)
    }

    /// Seeks to `offset` and reads the frame there.
    pub fn read_frame_at_offset(&mut self, frame: &mut TrrFrame, offset: u64) -> Result<bool> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.read_frame(frame)
    }

    /// Read the frames selected by `window`, counting frames from one.
    ///
    /// Skipped frames are not decoded.
    pub fn read_frames(&mut self, window: &Window) -> Result<Vec<Frame>> {
        let scan = self.scan()?;
        debug!("trr holds {} frames of {} atoms", scan.nframes, scan.natoms);
        if window.retained(scan.nframes as u64) == 0 {
            warn!("the window retains none of the {} frames", scan.nframes);
        }
        if let Some(end) = window.until() {
            if end > scan.nframes as u64 {
                warn!(
                    "the window ends at frame {end}, but the trajectory has {} frames",
                    scan.nframes
                );
            }
        }

        let mut frames = Vec::new();
        let mut trr = TrrFrame::default();
        for (idx, &offset) in scan.offsets.iter().enumerate() {
            match window.classify(idx as u64 + 1) {
                Some(true) => {}
                Some(false) => continue,
                None => break,
            }
            self.read_frame_at_offset(&mut trr, offset)?;
            frames.push(trr.to_frame()?);
        }
        Ok(frames)
    }
}
