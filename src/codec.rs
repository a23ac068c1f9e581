//! The compressed-coordinate codec used by GROMACS xtc files.
//!
//! Coordinates are quantized to integers at a caller-chosen precision and packed as
//! multi-radix integers. Atoms that sit close to their predecessor (think of the hydrogens of
//! a water molecule) are stored in runs of small deltas whose width adapts as the local
//! density changes, following a fixed table of [`MAGICINTS`].
use std::io::{self, Read, Write};

use log::warn;

use crate::error::{Error, Result};
use crate::xdr::{read_f32, read_i32, read_padded, read_u32, write_f32, write_i32, write_opaque};

#[rustfmt::skip]
pub const MAGICINTS: [i32; 73] = [
    0,        0,        0,       0,       0,       0,       0,       0,       0,       8,
    10,       12,       16,      20,      25,      32,      40,      50,      64,      80,
    101,      128,      161,     203,     256,     322,     406,     512,     645,     812,
    1024,     1290,     1625,    2048,    2580,    3250,    4096,    5060,    6501,    8192,
    10321,    13003,    16384,   20642,   26007,   32768,   41285,   52015,   65536,   82570,
    104031,   131072,   165140,  208063,  262144,  330280,  416127,  524287,  660561,  832255,
    1048576,  1321122,  1664510, 2097152, 2642245, 3329021, 4194304, 5284491, 6658042, 8388607,
    10568983, 13316085, 16777216
];
pub const FIRSTIDX: usize = 9; // Note that MAGICINTS[FIRSTIDX-1] == 0.
pub const LASTIDX: usize = MAGICINTS.len();

/// Arrays of up to this many atoms are stored as raw floats.
pub const MAX_UNCOMPRESSED: usize = 9;
/// Precision used when the caller asks for a non-positive one.
pub const DEFAULT_PRECISION: f32 = 1000.0;

/// The largest magnitude a quantized coordinate, or the range of them, may take.
const MAX_QUANTUM: f32 = (i32::MAX - 2) as f32;

/// The most packed bytes a block of `natoms` coordinates may hold.
fn packed_capacity(natoms: usize) -> usize {
    natoms * 3 * 6 / 5 * 4
}

fn overflow(value: f64, precision: f32) -> Error {
    let err = Error::PrecisionOverflow { value, precision };
    warn!("{err}");
    err
}

/// The longest run of small deltas, in coordinates (8 atoms).
const MAX_RUN: usize = 8 * 3;

/// A scalar type the codec can read into and write from.
///
/// The wire format is always `f32`, and quantization happens in `f32` arithmetic for both
/// implementations so that double input produces the same bytes as float input.
pub trait Coordinate: Copy + Default + Send + Sync + 'static {
    fn to_f32(self) -> f32;
    fn from_f32(value: f32) -> Self;
    fn inverse(precision: f32) -> Self;
    fn dequantize(value: i32, invprecision: Self) -> Self;
}

impl Coordinate for f32 {
    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(value: f32) -> Self {
        value
    }

    fn inverse(precision: f32) -> Self {
        precision.recip()
    }

    fn dequantize(value: i32, invprecision: Self) -> Self {
        value as f32 * invprecision
    }
}

impl Coordinate for f64 {
    fn to_f32(self) -> f32 {
        self as f32
    }

    fn from_f32(value: f32) -> Self {
        value as f64
    }

    fn inverse(precision: f32) -> Self {
        (precision as f64).recip()
    }

    fn dequantize(value: i32, invprecision: Self) -> Self {
        value as f64 * invprecision
    }
}

/// Read cursor over the packed byte stream.
///
/// `lastbits` counts the bits of `lastbyte` that have not been consumed yet.
struct BitReader<'b> {
    buf: &'b [u8],
    count: usize,
    lastbits: u32,
    lastbyte: u32,
}

impl<'b> BitReader<'b> {
    fn new(buf: &'b [u8]) -> Self {
        Self {
            buf,
            count: 0,
            lastbits: 0,
            lastbyte: 0,
        }
    }

    fn next_byte(&mut self) -> Result<u32> {
        let byte = self.buf.get(self.count).copied().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "compressed coordinate data ended early",
            )
        })?;
        self.count += 1;
        Ok(byte as u32)
    }

    fn decodebits(&mut self, mut nbits: u32) -> Result<u32> {
        let mask = if nbits == 0 {
            0
        } else {
            u32::MAX >> (32 - nbits)
        };

        let mut num = 0u32;
        while nbits >= 8 {
            self.lastbyte = (self.lastbyte << 8) | self.next_byte()?;
            num |= (self.lastbyte >> self.lastbits) << (nbits - 8);
            nbits -= 8;
        }
        if nbits > 0 {
            if self.lastbits < nbits {
                self.lastbits += 8;
                self.lastbyte = (self.lastbyte << 8) | self.next_byte()?;
            }
            self.lastbits -= nbits;
            num |= (self.lastbyte >> self.lastbits) & ((1 << nbits) - 1);
        }

        // Only the trailing byte is ever needed again.
        self.lastbyte &= 0xff;
        Ok(num & mask)
    }

    /// Decode three integers that were packed as one multi-radix number of `nbits` bits.
    fn decodeints(&mut self, mut nbits: u32, sizes: [u32; 3]) -> Result<[i32; 3]> {
        // At most three 24-bit sizes, so 72 bits fit comfortably.
        let mut v: u128 = 0;
        let mut shift = 0;
        while nbits > 8 {
            v |= (self.decodebits(8)? as u128) << shift;
            shift += 8;
            nbits -= 8;
        }
        if nbits > 0 {
            v |= (self.decodebits(nbits)? as u128) << shift;
        }

        let sy = sizes[1] as u128;
        let sz = sizes[2] as u128;
        let z = v % sz;
        let rest = v / sz;
        let y = rest % sy;
        let x = rest / sy;
        Ok([x as i32, y as i32, z as i32])
    }
}

/// Write cursor over a fixed-capacity packed byte stream.
struct BitWriter {
    bytes: Vec<u8>,
    capacity: usize,
    lastbits: u32,
    lastbyte: u32,
}

impl BitWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
            lastbits: 0,
            lastbyte: 0,
        }
    }

    fn push(&mut self, byte: u8) -> Result<()> {
        if self.bytes.len() >= self.capacity {
            return Err(Error::BufferOverrun {
                position: self.bytes.len(),
                run: 1,
                capacity: self.capacity,
            });
        }
        self.bytes.push(byte);
        Ok(())
    }

    /// Append the low `nbits` bits of `num`. `num` must fit in `nbits` bits.
    fn encodebits(&mut self, mut nbits: u32, num: u32) -> Result<()> {
        while nbits >= 8 {
            self.lastbyte = (self.lastbyte << 8) | (num >> (nbits - 8));
            self.push((self.lastbyte >> self.lastbits) as u8)?;
            nbits -= 8;
        }
        if nbits > 0 {
            self.lastbyte = (self.lastbyte << nbits) | num;
            self.lastbits += nbits;
            if self.lastbits >= 8 {
                self.lastbits -= 8;
                self.push((self.lastbyte >> self.lastbits) as u8)?;
            }
        }
        Ok(())
    }

    fn encodeints(&mut self, mut nbits: u32, sizes: [u32; 3], nums: [u32; 3]) -> Result<()> {
        debug_assert!(
            nums.iter().zip(sizes).all(|(&n, s)| n < s),
            "{nums:?} does not fit in {sizes:?}"
        );
        let mut v = (nums[0] as u128 * sizes[1] as u128 + nums[1] as u128) * sizes[2] as u128
            + nums[2] as u128;
        while nbits >= 8 {
            self.encodebits(8, (v & 0xff) as u32)?;
            v >>= 8;
            nbits -= 8;
        }
        if nbits > 0 {
            self.encodebits(nbits, (v & 0xff) as u32)?;
        }
        Ok(())
    }

    /// Flush the partially filled byte and hand out the packed stream.
    fn finish(mut self) -> Result<Vec<u8>> {
        if self.lastbits > 0 {
            let byte = (self.lastbyte << (8 - self.lastbits)) as u8;
            self.push(byte)?;
        }
        Ok(self.bytes)
    }
}

/// The number of bits needed to store values in `0..=size`.
const fn sizeofint(size: u32) -> u32 {
    let mut n: u64 = 1;
    let mut nbits = 0;

    while size as u64 >= n && nbits < 32 {
        nbits += 1;
        n <<= 1;
    }

    nbits
}

/// The number of bits needed to store the product of `sizes` as one multi-radix number.
fn sizeofints(sizes: [u32; 3]) -> u32 {
    let mut nbytes = 1;
    let mut bytes = [0u8; 32];
    bytes[0] = 1;
    let mut nbits = 0;

    for size in sizes {
        let mut tmp: u64 = 0;
        let mut bytecount = 0;
        while bytecount < nbytes {
            tmp += bytes[bytecount] as u64 * size as u64;
            bytes[bytecount] = (tmp & 0xff) as u8;
            tmp >>= 8;
            bytecount += 1;
        }
        while tmp != 0 {
            bytes[bytecount] = (tmp & 0xff) as u8;
            bytecount += 1;
            tmp >>= 8;
        }
        nbytes = bytecount;
    }

    nbytes -= 1;
    let mut num = 1;
    while bytes[nbytes] as u32 >= num {
        nbits += 1;
        num *= 2;
    }

    nbytes as u32 * 8 + nbits
}

/// Per-axis ranges and the bit width used for the "large" coordinates.
///
/// A `bitsize` of zero flags that the ranges are too wide to be multiplied, in which case
/// each axis is packed on its own with `bitsizeint` bits.
struct Ranges {
    sizeint: [u32; 3],
    bitsizeint: [u32; 3],
    bitsize: u32,
}

impl Ranges {
    fn new(minint: [i32; 3], maxint: [i32; 3]) -> Self {
        let sizeint = [0, 1, 2].map(|k| (maxint[k] as i64 - minint[k] as i64 + 1) as u32);
        if (sizeint[0] | sizeint[1] | sizeint[2]) > 0xffffff {
            Self {
                sizeint,
                bitsizeint: sizeint.map(sizeofint),
                bitsize: 0,
            }
        } else {
            Self {
                sizeint,
                bitsizeint: [0; 3],
                bitsize: sizeofints(sizeint),
            }
        }
    }
}

fn magicint(smallidx: usize) -> Result<i32> {
    match MAGICINTS.get(smallidx) {
        Some(&size) if size > 0 => Ok(size),
        _ => Err(Error::InvalidBinSize { smallidx }),
    }
}

/// Decode one block of coordinates, starting at its leading atom count.
///
/// `positions` is resized to the number of atoms in the block, which must not exceed
/// `capacity`. `scratch` holds the packed bytes while decoding and its contents should not be
/// depended upon.
///
/// Returns the precision of the block, or [`None`] if the block was stored uncompressed.
pub fn decode<R: Read, C: Coordinate>(
    file: &mut R,
    capacity: usize,
    positions: &mut Vec<[C; 3]>,
    scratch: &mut Vec<u8>,
) -> Result<Option<f32>> {
    let lsize = read_i32(file)?;
    let natoms = usize::try_from(lsize)
        .map_err(|_| Error::Header(format!("negative coordinate count {lsize}")))?;
    if natoms > capacity {
        return Err(Error::Header(format!(
            "requested to decompress {capacity} coordinates, block contains {natoms}"
        )));
    }
    positions.clear();
    positions.resize(natoms, [C::default(); 3]);

    if natoms <= MAX_UNCOMPRESSED {
        for position in positions.iter_mut() {
            for value in position.iter_mut() {
                *value = C::from_f32(read_f32(file)?);
            }
        }
        return Ok(None);
    }

    let precision = read_f32(file)?;
    let minint = [read_i32(file)?, read_i32(file)?, read_i32(file)?];
    let maxint = [read_i32(file)?, read_i32(file)?, read_i32(file)?];
    let ranges = Ranges::new(minint, maxint);
    if ranges.sizeint.contains(&0) {
        return Err(Error::Header(format!(
            "invalid coordinate bounds {minint:?}..{maxint:?}"
        )));
    }

    let smallidx = read_i32(file)?;
    let mut smallidx = usize::try_from(smallidx).map_err(|_| Error::InvalidBinSize {
        smallidx: usize::MAX,
    })?;
    let mut sizesmall = magicint(smallidx)?;
    let mut smaller = MAGICINTS[usize::max(FIRSTIDX, smallidx - 1)] / 2;
    let mut smallnum = sizesmall / 2;

    let count = read_u32(file)? as usize;
    let capacity = packed_capacity(natoms);
    if count > capacity {
        return Err(Error::BufferOverrun {
            position: 0,
            run: count,
            capacity,
        });
    }
    read_padded(file, scratch, count)?;
    let mut bits = BitReader::new(scratch);

    let invprecision = C::inverse(precision);
    let mut write = |write_idx: &mut usize, coord: [i32; 3]| {
        positions[*write_idx] = coord.map(|v| C::dequantize(v, invprecision));
        *write_idx += 1;
    };

    let mut run: usize = 0;
    let mut read_idx = 0;
    let mut write_idx = 0;
    while read_idx < natoms {
        let mut coord = if ranges.bitsize == 0 {
            let mut coord = [0i32; 3];
            for (value, &nbits) in coord.iter_mut().zip(&ranges.bitsizeint) {
                *value = bits.decodebits(nbits)? as i32;
            }
            coord
        } else {
            bits.decodeints(ranges.bitsize, ranges.sizeint)?
        };
        read_idx += 1;
        for k in 0..3 {
            coord[k] = coord[k].wrapping_add(minint[k]);
        }
        let mut prevcoord = coord;

        // A set flag announces a new run length, which also carries the change in smallidx.
        let mut is_smaller: i32 = 0;
        if bits.decodebits(1)? == 1 {
            let encoded = bits.decodebits(5)? as i32;
            is_smaller = encoded % 3;
            run = (encoded - is_smaller) as usize;
            is_smaller -= 1;
        }

        // The leading atom plus the run must fit in what is left of the output.
        if (write_idx + 1) * 3 + run > natoms * 3 {
            return Err(Error::BufferOverrun {
                position: write_idx * 3,
                run,
                capacity: natoms * 3,
            });
        }

        if run > 0 {
            let sizes = [sizesmall as u32; 3];
            for k in (0..run).step_by(3) {
                let mut small = bits.decodeints(smallidx as u32, sizes)?;
                read_idx += 1;
                for d in 0..3 {
                    small[d] = small[d].wrapping_add(prevcoord[d].wrapping_sub(smallnum));
                }
                if k == 0 {
                    // The first two atoms of a run are stored swapped, which packs water
                    // (stored as OHH) better. Swap them back.
                    std::mem::swap(&mut small, &mut prevcoord);
                    write(&mut write_idx, prevcoord);
                } else {
                    prevcoord = small;
                }
                write(&mut write_idx, small);
            }
        } else {
            write(&mut write_idx, coord);
        }

        match is_smaller.cmp(&0) {
            std::cmp::Ordering::Less => {
                smallidx = smallidx
                    .checked_sub(1)
                    .ok_or(Error::InvalidBinSize { smallidx: 0 })?;
                smallnum = smaller;
                smaller = if smallidx > FIRSTIDX {
                    MAGICINTS[smallidx - 1] / 2
                } else {
                    0
                };
            }
            std::cmp::Ordering::Greater => {
                smallidx += 1;
                smaller = smallnum;
                smallnum = magicint(smallidx)? / 2;
            }
            std::cmp::Ordering::Equal => {}
        }
        sizesmall = magicint(smallidx)?;
    }

    Ok(Some(precision))
}

/// Encode `positions` as one block of compressed coordinates.
///
/// Blocks of at most [`MAX_UNCOMPRESSED`] atoms are written as raw floats. A non-positive
/// `precision` falls back to [`DEFAULT_PRECISION`].
///
/// # Errors
///
/// A coordinate, or the range of coordinates along an axis, that does not fit in an `i32`
/// once quantized is an [`Error::PrecisionOverflow`]. Nothing past the atom count has been
/// written at that point.
pub fn encode<W: Write, C: Coordinate>(
    file: &mut W,
    positions: &[[C; 3]],
    precision: f32,
) -> Result<()> {
    let natoms = positions.len();
    let lsize = i32::try_from(natoms)
        .map_err(|_| Error::Header(format!("cannot encode {natoms} coordinates")))?;
    write_i32(file, lsize)?;

    if natoms <= MAX_UNCOMPRESSED {
        for position in positions {
            for &value in position {
                write_f32(file, value.to_f32())?;
            }
        }
        return Ok(());
    }

    let precision = if precision > 0.0 {
        precision
    } else {
        warn!("non-positive precision {precision}, using {DEFAULT_PRECISION}");
        DEFAULT_PRECISION
    };

    // Quantize, tracking the bounds and the smallest distance between neighbours.
    let mut quantized: Vec<[i32; 3]> = Vec::with_capacity(natoms);
    let mut minint = [i32::MAX; 3];
    let mut maxint = [i32::MIN; 3];
    let mut mindiff = u64::MAX;
    for position in positions {
        let mut coord = [0; 3];
        for (quantum, &value) in coord.iter_mut().zip(position) {
            let scaled = value.to_f32() * precision;
            let lf = if scaled >= 0.0 {
                scaled + 0.5
            } else {
                scaled - 0.5
            };
            if lf.abs() > MAX_QUANTUM {
                return Err(overflow(value.to_f32() as f64, precision));
            }
            *quantum = lf as i32;
        }
        for k in 0..3 {
            minint[k] = minint[k].min(coord[k]);
            maxint[k] = maxint[k].max(coord[k]);
        }
        if let Some(prev) = quantized.last() {
            let diff: u64 = (0..3).map(|k| coord[k].abs_diff(prev[k]) as u64).sum();
            mindiff = mindiff.min(diff);
        }
        quantized.push(coord);
    }
    if let Some(k) = (0..3).find(|&k| maxint[k] as f32 - minint[k] as f32 >= MAX_QUANTUM) {
        let span = (maxint[k] as f64 - minint[k] as f64) / precision as f64;
        return Err(overflow(span, precision));
    }

    write_f32(file, precision)?;
    for &v in &minint {
        write_i32(file, v)?;
    }
    for &v in &maxint {
        write_i32(file, v)?;
    }
    let ranges = Ranges::new(minint, maxint);

    // Start with the smallest bin that holds the tightest pair of neighbours.
    let mut smallidx = FIRSTIDX;
    while smallidx < LASTIDX - 1 && (MAGICINTS[smallidx] as u64) < mindiff {
        smallidx += 1;
    }
    write_i32(file, smallidx as i32)?;

    // The top of the window is kept inside the table.
    let maxidx = usize::min(LASTIDX - 1, smallidx + 8);
    let minidx = maxidx - 8;
    let mut smaller = MAGICINTS[usize::max(FIRSTIDX, smallidx - 1)] / 2;
    let mut smallnum = MAGICINTS[smallidx] / 2;
    let mut sizesmall = MAGICINTS[smallidx] as u32;
    let larger = MAGICINTS[maxidx] / 2;

    let within = |a: [i32; 3], b: [i32; 3], limit: i32| {
        (0..3).all(|k| a[k].abs_diff(b[k]) < limit.max(0) as u32)
    };

    let mut bits = BitWriter::with_capacity(packed_capacity(natoms));
    let mut prevcoord = [0i32; 3];
    let mut prevrun: Option<usize> = None;
    let mut smallrun = [0u32; MAX_RUN];
    let mut i = 0;
    while i < natoms {
        let mut is_small = false;
        let mut is_smaller: i32 = if smallidx < maxidx
            && i >= 1
            && within(quantized[i], prevcoord, larger)
        {
            1
        } else if smallidx > minidx {
            -1
        } else {
            0
        };

        if i + 1 < natoms && within(quantized[i], quantized[i + 1], smallnum) {
            // Store the first two atoms of a run swapped, which packs water better.
            quantized.swap(i, i + 1);
            is_small = true;
        }

        let thiscoord = quantized[i];
        let large = [0, 1, 2].map(|k| thiscoord[k].wrapping_sub(minint[k]) as u32);
        if ranges.bitsize == 0 {
            for k in 0..3 {
                bits.encodebits(ranges.bitsizeint[k], large[k])?;
            }
        } else {
            bits.encodeints(ranges.bitsize, ranges.sizeint, large)?;
        }
        prevcoord = thiscoord;
        i += 1;

        let mut run = 0;
        if !is_small && is_smaller == -1 {
            is_smaller = 0;
        }
        while is_small && run < MAX_RUN {
            let thiscoord = quantized[i];
            let tmpsum: i64 = (0..3)
                .map(|k| {
                    let d = thiscoord[k] as i64 - prevcoord[k] as i64;
                    d * d
                })
                .sum();
            if is_smaller == -1 && tmpsum >= smaller as i64 * smaller as i64 {
                is_smaller = 0;
            }

            for k in 0..3 {
                smallrun[run + k] = (thiscoord[k] - prevcoord[k] + smallnum) as u32;
            }
            run += 3;
            prevcoord = thiscoord;

            i += 1;
            is_small = i < natoms && within(quantized[i], prevcoord, smallnum);
        }

        if prevrun != Some(run) || is_smaller != 0 {
            prevrun = Some(run);
            bits.encodebits(1, 1)?;
            bits.encodebits(5, (run as i32 + is_smaller + 1) as u32)?;
        } else {
            bits.encodebits(1, 0)?;
        }
        for k in (0..run).step_by(3) {
            let nums = [smallrun[k], smallrun[k + 1], smallrun[k + 2]];
            bits.encodeints(smallidx as u32, [sizesmall; 3], nums)?;
        }

        if is_smaller != 0 {
            smallidx = (smallidx as i32 + is_smaller) as usize;
            if is_smaller < 0 {
                smallnum = smaller;
                smaller = MAGICINTS[smallidx - 1] / 2;
            } else {
                smaller = smallnum;
                smallnum = MAGICINTS[smallidx] / 2;
            }
            sizesmall = MAGICINTS[smallidx] as u32;
        }
    }

    let packed = bits.finish()?;
    write_opaque(file, &packed)?;
    Ok(())
}
