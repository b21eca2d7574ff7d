//! Versioned binary container for transform sequences (`.ots`).
//!
//! All integers and floats are little-endian.
//!
//! ```text
//! offset  size  field
//! 0       4     magic "OTSQ"
//! 4       2     version (u16, currently 1)
//! 6       2     reserved (u16, zero)
//! 8       1     first plane slot (u8)
//! 9       4     iteration count (u32)
//! 13      12    reference dimensions x, y, z (3 x u32)
//! 25      ...   per iteration, per slot 0..3:
//!                 intervals (u32)
//!                 cx: (intervals+3)^2 x f64, row-major
//!                 cy: (intervals+3)^2 x f64, row-major
//! ```
//!
//! Only complete sequences are written, so every slot is present.

use ndarray::Array2;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use super::bspline::DeformationField;
use super::sequence::{OrthogonalPlane, TransformSequence};
use crate::data::Dims;
use crate::error::{RegistrationError, Result};

pub const MAGIC: [u8; 4] = *b"OTSQ";
pub const FORMAT_VERSION: u16 = 1;
pub const FILE_EXTENSION: &str = "ots";

const HEADER_LEN: usize = 25;
const MAX_INTERVALS: usize = 1 << 12;
const MAX_ITERATIONS: usize = 1 << 16;

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| RegistrationError::format(format!("{} {} does not fit in 32 bits", what, value)))
}

/// Encode a complete sequence.
pub fn encode(sequence: &TransformSequence) -> Result<Vec<u8>> {
    sequence.ensure_complete()?;

    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.push(sequence.first_plane().slot() as u8);
    out.extend_from_slice(&to_u32(sequence.iteration_count(), "iteration count")?.to_le_bytes());

    let dims = sequence.dimensions();
    for extent in [dims.x, dims.y, dims.z] {
        out.extend_from_slice(&to_u32(extent, "dimension")?.to_le_bytes());
    }

    for iteration in 0..sequence.iteration_count() {
        for slot in 0..3 {
            let plane = OrthogonalPlane::from_slot(slot)
                .ok_or_else(|| RegistrationError::format(format!("invalid slot {}", slot)))?;
            let field = sequence.get(iteration, plane)?;
            out.extend_from_slice(&to_u32(field.intervals(), "interval count")?.to_le_bytes());
            for grid in [field.cx(), field.cy()] {
                for value in grid.iter() {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
    }

    Ok(out)
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                RegistrationError::format(format!(
                    "unexpected end of data at byte {} (needed {} more)",
                    self.pos, len
                ))
            })?;
        let chunk = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(chunk)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.array()?) as usize)
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    fn grid(&mut self, n: usize) -> Result<Array2<f64>> {
        let values = (0..n * n).map(|_| self.f64()).collect::<Result<Vec<_>>>()?;
        Array2::from_shape_vec((n, n), values)
            .map_err(|e| RegistrationError::format(e.to_string()))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

/// Decode a sequence, rejecting anything but a well-formed version 1 container.
pub fn decode(bytes: &[u8]) -> Result<TransformSequence> {
    let mut reader = ByteReader::new(bytes);

    if reader.array::<4>()? != MAGIC {
        return Err(RegistrationError::format("not a transform sequence file (bad magic)"));
    }
    let version = reader.u16()?;
    if version != FORMAT_VERSION {
        return Err(RegistrationError::format(format!(
            "unsupported format version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }
    let _reserved = reader.u16()?;

    let slot = reader.u8()? as usize;
    let first_plane = OrthogonalPlane::from_slot(slot)
        .ok_or_else(|| RegistrationError::format(format!("invalid first plane slot {}", slot)))?;

    let iteration_count = reader.u32()?;
    if iteration_count == 0 || iteration_count > MAX_ITERATIONS {
        return Err(RegistrationError::format(format!(
            "implausible iteration count {}",
            iteration_count
        )));
    }
    let dims = Dims::new(reader.u32()?, reader.u32()?, reader.u32()?);

    let mut sequence = TransformSequence::new(iteration_count, dims, first_plane)
        .map_err(|e| RegistrationError::format(e.to_string()))?;

    for iteration in 0..iteration_count {
        for slot in 0..3 {
            let intervals = reader.u32()?;
            if intervals == 0 || intervals > MAX_INTERVALS {
                return Err(RegistrationError::format(format!(
                    "implausible interval count {} at iteration {}, slot {}",
                    intervals, iteration, slot
                )));
            }
            let n = intervals + 3;
            let cx = reader.grid(n)?;
            let cy = reader.grid(n)?;
            let plane = OrthogonalPlane::from_slot(slot)
                .ok_or_else(|| RegistrationError::format(format!("invalid slot {}", slot)))?;
            sequence.set(iteration, plane, DeformationField::new(intervals, cx, cy)?)?;
        }
    }

    if reader.remaining() != 0 {
        return Err(RegistrationError::format(format!(
            "{} trailing bytes after sequence data",
            reader.remaining()
        )));
    }

    Ok(sequence)
}

pub fn write_sequence<W: Write>(sequence: &TransformSequence, writer: &mut W) -> std::io::Result<()> {
    let bytes = encode(sequence)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    writer.write_all(&bytes)
}

pub fn read_sequence<R: Read>(reader: &mut R) -> Result<TransformSequence> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| RegistrationError::io("<reader>", e))?;
    decode(&bytes)
}

/// Persist a sequence.
///
/// The file is written under a temporary name and renamed into place, so a
/// failure never leaves a truncated sequence at `path`.
pub fn save_sequence<P: AsRef<Path>>(sequence: &TransformSequence, path: P) -> Result<()> {
    let path = path.as_ref();
    let bytes = encode(sequence)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".partial");
    let tmp = std::path::PathBuf::from(tmp);

    fs::write(&tmp, &bytes).map_err(|e| RegistrationError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| RegistrationError::io(path, e))?;

    tracing::debug!(
        path = %path.display(),
        iterations = sequence.iteration_count(),
        bytes = bytes.len(),
        "Saved transform sequence"
    );
    Ok(())
}

pub fn load_sequence<P: AsRef<Path>>(path: P) -> Result<TransformSequence> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| RegistrationError::io(path, e))?;
    decode(&bytes)
}
