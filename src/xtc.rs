//! Reader for GROMACS compressed `.xtc` trajectories.
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use glam::{Mat3, Vec3};
use log::{debug, warn};

use crate::codec;
use crate::error::{Error, Result};
use crate::frame::{BoxBounds, Frame};
use crate::window::Window;
use crate::xdr::{padding, read_f32, read_f32s, read_i32, read_u32};

pub const MAGIC: i32 = 1995;

pub type BoxVec = Mat3;

/// Bytes between the coordinate count and the packed byte count of a compressed block:
/// precision, minimum and maximum integers, and the small index.
const NBYTES_POSITIONS_PRELUDE: i64 = 4 + 3 * 4 + 3 * 4 + 4;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Header {
    pub natoms: usize,
    pub step: i64,
    /// Time in picoseconds.
    pub time: f32,
    pub boxvec: BoxVec,
}

impl Header {
    /// Size of the header in bytes: magic, natoms, step, time and the box.
    pub const SIZE: usize = 4 * 4 + 9 * 4;

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
        let natoms = read_i32(file)?;
        let natoms = usize::try_from(natoms)
            .map_err(|_| Error::Header(format!("negative number of atoms ({natoms})")))?;
        let step = read_i32(file)? as i64;
        let time = read_f32(file)?;
        let mut boxvec = [0.0; 9];
        read_f32s(file, &mut boxvec)?;
        Ok(Some(Self {
            natoms,
            step,
            time,
            boxvec: BoxVec::from_cols_array(&boxvec),
        }))
    }

    pub fn to_be_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        let values = [
            MAGIC.to_be_bytes(),
            (self.natoms as i32).to_be_bytes(),
            (self.step as i32).to_be_bytes(),
            self.time.to_be_bytes(),
        ]
        .into_iter()
        .chain(self.boxvec.to_cols_array().map(f32::to_be_bytes));
        for (chunk, value) in bytes.chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&value);
        }
        bytes
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct XtcFrame {
    pub step: i64,
    /// Time in picoseconds.
    pub time: f32,
    pub boxvec: BoxVec,
    /// The precision of the compressed positions, or [`None`] if they were stored raw.
    pub precision: Option<f32>,
    pub positions: Vec<[f32; 3]>,
}

impl XtcFrame {
    pub fn coords(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.positions.iter().map(|&c| Vec3::from_array(c))
    }

    /// Convert to a box-relative [`Frame`] through the diagonal of the box.
    pub fn to_frame(&self) -> Frame {
        let mut frame = Frame::new(self.step);
        let diagonal = [self.boxvec.x_axis.x, self.boxvec.y_axis.y, self.boxvec.z_axis.z];
        frame.bounds = diagonal.map(|length| BoxBounds::from_length(length as f64));
        frame.set_absolute_positions(self.coords().map(|c| c.as_dvec3().to_array()));
        frame
    }
}

#[derive(Debug, Clone)]
pub struct XtcReader<R> {
    pub file: R,
    /// Packed bytes of the block being decoded.
    scratch: Vec<u8>,
}

impl XtcReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> XtcReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            file: reader,
            scratch: Vec::new(),
        }
    }

    /// Reads the next frame into `frame`, returning `false` at the end of the file.
    pub fn read_frame(&mut self, frame: &mut XtcFrame) -> Result<bool> {
        let Some(header) = Header::read(&mut self.file)? else {
            return Ok(false);
        };
        frame.precision = codec::decode(
            &mut self.file,
            header.natoms,
            &mut frame.positions,
            &mut self.scratch,
        )?;
        if frame.positions.len() != header.natoms {
            return Err(Error::Header(format!(
                "frame at step {} declares {} atoms but holds {}",
                header.step,
                header.natoms,
                frame.positions.len()
            )));
        }
        frame.step = header.step;
        frame.time = header.time;
        frame.boxvec = header.boxvec;
        Ok(true)
    }
}

impl<R: Read + Seek> XtcReader<R> {
    /// Move past the coordinate block of a frame without decoding it.
    fn skip_positions(&mut self, natoms: usize) -> Result<()> {
        let file = &mut self.file;
        let lsize = read_i32(file)?;
        if lsize as i64 != natoms as i64 {
            return Err(Error::Header(format!(
                "coordinate block of {lsize} atoms in a frame of {natoms}"
            )));
        }
        if natoms <= codec::MAX_UNCOMPRESSED {
            file.seek(SeekFrom::Current(natoms as i64 * 3 * 4))?;
        } else {
            file.seek(SeekFrom::Current(NBYTES_POSITIONS_PRELUDE))?;
            let count = read_u32(file)? as usize;
            file.seek(SeekFrom::Current((count + padding(count)) as i64))?;
        }
        Ok(())
    }

    /// Returns the offset of the start of every frame, up to `until` frames.
    ///
    /// The reader returns to its current position afterwards.
    ///
    /// # Errors
    ///
    /// Frames that disagree on the number of atoms are an [`Error::AtomCountMismatch`].
    pub fn determine_offsets(&mut self, until: Option<usize>) -> Result<Box<[u64]>> {
        // Remember where we start so we can return to it later.
        let start_pos = self.file.stream_position()?;

        let mut offsets = Vec::new();
        let mut natoms = None;
        while until.map_or(true, |until| offsets.len() < until) {
            let offset = self.file.stream_position()?;
            let Some(header) = Header::read(&mut self.file)? else {
                break;
            };
            match natoms {
                Some(expected) if expected != header.natoms => {
                    return Err(Error::AtomCountMismatch {
                        frame: header.step,
                        expected,
                        found: header.natoms,
                    })
                }
                _ => natoms = Some(header.natoms),
            }
            self.skip_positions(header.natoms)?;
            offsets.push(offset);
        }

        self.file.seek(SeekFrom::Start(start_pos))?;
        Ok(offsets.into_boxed_slice())
    }

    /// Seeks to offset, then reads the frame there.
    pub fn read_frame_at_offset(&mut self, frame: &mut XtcFrame, offset: u64) -> Result<bool> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.read_frame(frame)
    }

    /// Read the frames selected by `window`, counting frames from one.
    pub fn read_frames(&mut self, window: &Window) -> Result<Vec<Frame>> {
        let until = window.until().map(|end| end as usize);
        let offsets = self.determine_offsets(until)?;
        debug!("xtc holds {} frames", offsets.len());
        if window.retained(offsets.len() as u64) == 0 {
            warn!("the window retains none of the {} frames", offsets.len());
        }
        if let Some(end) = until {
            if end > offsets.len() {
                warn!(
                    "the window ends at frame {end}, but the trajectory has {} frames",
                    offsets.len()
                );
            }
        }

        let mut frames = Vec::new();
        let mut xtc = XtcFrame::default();
        for (idx, &offset) in offsets.iter().enumerate() {
            match window.classify(idx as u64 + 1) {
                Some(true) => {}
                Some(false) => continue,
                None => break,
            }
            self.read_frame_at_offset(&mut xtc, offset)?;
            frames.push(xtc.to_frame());
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn write_frame(bytes: &mut Vec<u8>, step: i64, positions: &[[f32; 3]]) {
        let header = Header {
            natoms: positions.len(),
            step,
            time: step as f32,
            boxvec: BoxVec::from_diagonal(Vec3::new(4.0, 4.0, 2.0)),
        };
        bytes.extend(header.to_be_bytes());
        codec::encode(bytes, positions, 1000.0).unwrap();
    }

    fn positions(natoms: usize, step: i64) -> Vec<[f32; 3]> {
        (0..natoms)
            .map(|i| [0.1 * i as f32, 1.0 + 0.01 * step as f32, 0.5])
            .collect()
    }

    fn trajectory(natoms: usize, nframes: i64) -> Cursor<Vec<u8>> {
        let mut bytes = Vec::new();
        for step in 0..nframes {
            write_frame(&mut bytes, step, &positions(natoms, step));
        }
        Cursor::new(bytes)
    }

    #[test]
    fn header_roundtrip() -> Result<()> {
        let header = Header {
            natoms: 12,
            step: 300,
            time: 0.6,
            boxvec: BoxVec::from_cols_array(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]),
        };
        let bytes = header.to_be_bytes();
        assert_eq!(bytes[..4], MAGIC.to_be_bytes());
        assert_eq!(Header::read(&mut Cursor::new(bytes))?, Some(header));
        Ok(())
    }

    #[test]
    fn offsets_skip_compressed_and_raw_blocks() -> Result<()> {
        for natoms in [3, 9, 10, 40] {
            let mut reader = XtcReader::new(trajectory(natoms, 4));
            let offsets = reader.determine_offsets(None)?;
            assert_eq!(offsets.len(), 4);
            assert_eq!(offsets[0], 0);
            assert_eq!(reader.determine_offsets(Some(2))?.len(), 2);

            // Every offset points at a frame with the right step.
            let mut frame = XtcFrame::default();
            for (step, &offset) in offsets.iter().enumerate() {
                assert!(reader.read_frame_at_offset(&mut frame, offset)?);
                assert_eq!(frame.step, step as i64);
                assert_eq!(frame.positions.len(), natoms);
            }
            assert!(!reader.read_frame(&mut frame)?);
        }
        Ok(())
    }

    #[test]
    fn frames_are_box_relative() -> Result<()> {
        let mut reader = XtcReader::new(trajectory(20, 6));
        let frames = reader.read_frames(&Window::new(0, 2, 5))?;
        assert_eq!(frames.iter().map(|f| f.timestep).collect::<Vec<_>>(), [1, 3]);
        let frame = &frames[1];
        assert_eq!(frame.natoms, 20);
        assert_eq!(frame.lengths(), [4.0, 4.0, 2.0]);
        for (i, &x) in frame.x.iter().enumerate() {
            assert!((x - 0.1 * i as f64 / 4.0).abs() < 1e-3);
        }
        assert!((frame.z[0] - 0.25).abs() < 1e-3);
        assert!(frame.velocities.is_none());
        Ok(())
    }

    #[test]
    fn changing_atom_count() {
        let mut bytes = trajectory(12, 2).into_inner();
        write_frame(&mut bytes, 2, &positions(13, 2));
        let mut reader = XtcReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.determine_offsets(None),
            Err(Error::AtomCountMismatch {
                frame: 2,
                expected: 12,
                found: 13
            })
        ));
    }

    #[test]
    fn invalid_magic() {
        let mut bytes = trajectory(12, 1).into_inner();
        bytes[0] = 1;
        let mut reader = XtcReader::new(Cursor::new(bytes));
        let mut frame = XtcFrame::default();
        assert!(matches!(
            reader.read_frame(&mut frame),
            Err(Error::InvalidMagic { expected: MAGIC, .. })
        ));
    }
}
