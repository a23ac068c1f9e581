//! Reader for LAMMPS text dumps, optionally gzip-compressed.
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use flate2::read::MultiGzDecoder;
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame::{BoxBounds, Frame};
use crate::window::Window;

/// Dumps store box bounds in Ångström.
const ANGSTROM: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    None,
    ReadingStep,
    ReadingNAtoms,
    ReadingBox,
    ReadingPosition,
    SkipFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coordinates {
    /// Box-relative `xs ys zs`.
    Scaled,
    /// `x y z` or `xu yu zu`, in Ångström.
    Absolute,
}

/// Column layout of the per-atom lines, taken from the `ITEM: ATOMS` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    id: usize,
    atom_type: usize,
    position: [usize; 3],
    coordinates: Coordinates,
}

impl Default for Columns {
    /// `id type xs ys zs`, the layout assumed when the header names no columns.
    fn default() -> Self {
        Self {
            id: 0,
            atom_type: 1,
            position: [2, 3, 4],
            coordinates: Coordinates::Scaled,
        }
    }
}

impl Columns {
    fn parse(names: &str) -> Self {
        let names: Vec<&str> = names.split_whitespace().collect();
        if names.is_empty() {
            return Self::default();
        }
        let find = |name: &str| names.iter().position(|&n| n == name);

        let (Some(id), Some(atom_type)) = (find("id"), find("type")) else {
            warn!(
                "atom columns `{}` lack `id` or `type`, assuming `id type xs ys zs`",
                names.join(" ")
            );
            return Self::default();
        };
        let layouts = [
            (["xs", "ys", "zs"], Coordinates::Scaled),
            (["xsu", "ysu", "zsu"], Coordinates::Scaled),
            (["x", "y", "z"], Coordinates::Absolute),
            (["xu", "yu", "zu"], Coordinates::Absolute),
        ];
        for (axes, coordinates) in layouts {
            if let [Some(x), Some(y), Some(z)] = axes.map(find) {
                return Self {
                    id,
                    atom_type,
                    position: [x, y, z],
                    coordinates,
                };
            }
        }
        warn!(
            "no position columns in `{}`, assuming `id type xs ys zs`",
            names.join(" ")
        );
        Self::default()
    }
}

/// Parse the whitespace-separated field at `index` of a record.
fn field<T: FromStr>(tokens: &[&str], index: usize, line: usize, what: &str) -> Result<T> {
    let token = tokens
        .get(index)
        .ok_or_else(|| Error::malformed(line, format!("missing {what} in column {}", index + 1)))?;
    token
        .parse()
        .map_err(|_| Error::malformed(line, format!("cannot read {what} from `{token}`")))
}

/// A single-pass reader of LAMMPS dump records.
///
/// Frames are retained according to a [`Window`], counting `ITEM: TIMESTEP` headers from one.
/// The body of a skipped frame is not parsed.
pub struct LammpsReader<R> {
    input: R,
    window: Window,
}

impl LammpsReader<Box<dyn BufRead>> {
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

impl<R: BufRead> LammpsReader<R> {
    pub fn new(input: R, window: Window) -> Self {
        Self { input, window }
    }

    /// Read all retained frames until the input ends or the window is exhausted.
    ///
    /// # Errors
    ///
    /// A frame that declares a different number of atoms than the first one is an
    /// [`Error::AtomCountMismatch`]. Records that cannot be parsed are an
    /// [`Error::MalformedRecord`], except for atom ids outside of the frame, which are skipped
    /// with a warning.
    pub fn read_frames(&mut self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        let mut frame: Option<Frame> = None;
        let mut natoms: Option<usize> = None;
        let mut counter = 0;
        let mut state = State::None;
        let mut box_axis = 0;
        let mut columns = Columns::default();

        let mut line = String::new();
        let mut lineno = 0;
        loop {
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                break;
            }
            lineno += 1;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }

            if text.contains("ITEM") {
                let item = text.split_once(':').map_or("", |(_, item)| item.trim());
                if item.contains("TIMESTEP") {
                    push_frame(&mut frames, frame.take());
                    counter += 1;
                    match self.window.classify(counter) {
                        Some(true) => {
                            frame = Some(Frame::default());
                            state = State::ReadingStep;
                        }
                        Some(false) => state = State::SkipFrame,
                        None => {
                            debug!("frame {counter} lies beyond the window, stopping");
                            break;
                        }
                    }
                } else if state == State::SkipFrame {
                    continue;
                } else if item.contains("NUMBER OF ATOMS") {
                    state = State::ReadingNAtoms;
                } else if item.contains("BOX BOUNDS") {
                    state = State::ReadingBox;
                    box_axis = 0;
                } else if let Some(names) = item.strip_prefix("ATOMS") {
                    columns = Columns::parse(names);
                    state = State::ReadingPosition;
                } else {
                    info!("ignoring section `{item}` at line {lineno}");
                    state = State::None;
                }
                continue;
            }

            if state == State::SkipFrame {
                continue;
            }
            let Some(current) = frame.as_mut() else {
                debug!("ignoring line {lineno} before the first frame");
                continue;
            };
            let tokens: Vec<&str> = text.split_whitespace().collect();

            match state {
                State::ReadingStep => {
                    current.timestep = field(&tokens, 0, lineno, "timestep")?;
                    state = State::None;
                }
                State::ReadingNAtoms => {
                    let found: usize = field(&tokens, 0, lineno, "number of atoms")?;
                    match natoms {
                        Some(expected) if expected != found => {
                            return Err(Error::AtomCountMismatch {
                                frame: current.timestep,
                                expected,
                                found,
                            })
                        }
                        _ => natoms = Some(found),
                    }
                    current.resize(found);
                    state = State::None;
                }
                State::ReadingBox => {
                    let min: f64 = field(&tokens, 0, lineno, "box minimum")?;
                    let max: f64 = field(&tokens, 1, lineno, "box maximum")?;
                    current.bounds[box_axis] = BoxBounds::new(min * ANGSTROM, max * ANGSTROM);
                    box_axis = (box_axis + 1) % 3;
                }
                State::ReadingPosition => {
                    let id: i64 = field(&tokens, columns.id, lineno, "atom id")?;
                    if id < 1 || id as usize > current.natoms {
                        warn!(
                            "skipping atom id {id} outside of 1..={} at line {lineno}: `{text}`",
                            current.natoms
                        );
                        continue;
                    }
                    let atom_type = field(&tokens, columns.atom_type, lineno, "atom type")?;
                    let mut position = [0.0; 3];
                    for (axis, value) in position.iter_mut().enumerate() {
                        *value = field(&tokens, columns.position[axis], lineno, "coordinate")?;
                        if columns.coordinates == Coordinates::Absolute {
                            let bounds = current.bounds[axis];
                            if bounds.length() > 0.0 {
                                *value = (*value * ANGSTROM - bounds.min) / bounds.length();
                            }
                        }
                    }
                    current.set_atom(id as usize - 1, atom_type, position);
                }
                State::None | State::SkipFrame => {
                    debug!("ignoring line {lineno}: `{text}`");
                }
            }
        }
        push_frame(&mut frames, frame.take());

        debug!("read {} of {counter} frames", frames.len());
        Ok(frames)
    }
}

fn push_frame(frames: &mut Vec<Frame>, frame: Option<Frame>) {
    match frame {
        Some(frame) if !frame.is_empty() => frames.push(frame),
        Some(frame) => warn!("dropping frame at timestep {} without atoms", frame.timestep),
        None => {}
    }
}
