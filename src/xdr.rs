//! Big-endian XDR primitives shared by the GROMACS readers and the coordinate codec.
use std::io::{self, Read, Write};

/// The number of padding bytes that follow `count` opaque bytes to reach a 32-bit boundary.
#[inline]
pub const fn padding(count: usize) -> usize {
    (4 - (count % 4)) % 4
}

pub fn read_i32<R: Read>(file: &mut R) -> io::Result<i32> {
    let mut buf: [u8; 4] = Default::default();
    file.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

pub fn read_u32<R: Read>(file: &mut R) -> io::Result<u32> {
    let mut buf: [u8; 4] = Default::default();
    file.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

pub fn read_f32<R: Read>(file: &mut R) -> io::Result<f32> {
    let mut buf: [u8; 4] = Default::default();
    file.read_exact(&mut buf)?;
    Ok(f32::from_be_bytes(buf))
}

pub fn read_f64<R: Read>(file: &mut R) -> io::Result<f64> {
    let mut buf: [u8; 8] = Default::default();
    file.read_exact(&mut buf)?;
    Ok(f64::from_be_bytes(buf))
}

pub fn read_f32s<R: Read>(file: &mut R, buf: &mut [f32]) -> io::Result<()> {
    for value in buf {
        *value = read_f32(file)?
    }
    Ok(())
}

/// Reads a real that is stored as either an `f32` or an `f64`, widening to `f64`.
pub fn read_real<R: Read>(file: &mut R, double: bool) -> io::Result<f64> {
    if double {
        read_f64(file)
    } else {
        read_f32(file).map(f64::from)
    }
}

/// Reads a length-prefixed opaque block into `data`, consuming the trailing padding.
pub fn read_opaque<R: Read>(file: &mut R, data: &mut Vec<u8>) -> io::Result<usize> {
    let count = read_u32(file)? as usize;
    read_padded(file, data, count)?;
    Ok(count)
}

/// Reads `count` bytes into `data`, consuming the trailing padding.
pub fn read_padded<R: Read>(file: &mut R, data: &mut Vec<u8>, count: usize) -> io::Result<()> {
    data.resize(count + padding(count), 0);
    file.read_exact(data)?;
    data.truncate(count);
    Ok(())
}

/// Reads a length-prefixed XDR string.
pub fn read_string<R: Read>(file: &mut R) -> io::Result<String> {
    let mut bytes = Vec::new();
    read_opaque(file, &mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn write_i32<W: Write>(file: &mut W, value: i32) -> io::Result<()> {
    file.write_all(&value.to_be_bytes())
}

pub fn write_u32<W: Write>(file: &mut W, value: u32) -> io::Result<()> {
    file.write_all(&value.to_be_bytes())
}

pub fn write_f32<W: Write>(file: &mut W, value: f32) -> io::Result<()> {
    file.write_all(&value.to_be_bytes())
}

/// Writes `data` as a length-prefixed opaque block, padded to a 32-bit boundary.
pub fn write_opaque<W: Write>(file: &mut W, data: &[u8]) -> io::Result<()> {
    write_u32(file, data.len() as u32)?;
    file.write_all(data)?;
    file.write_all(&[0; 3][..padding(data.len())])
}
