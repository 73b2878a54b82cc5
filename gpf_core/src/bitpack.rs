//! Variable-byte-width encoding for `u64` counter sequences.
//!
//! Layout: one prefix byte holding the byte width `w ∈ 1..=8` (the minimum
//! width covering the largest value in the sequence), followed by
//! `count × w` bytes, value `i` occupying bytes `[1 + i·w, 1 + (i+1)·w)`
//! little-endian. An empty sequence is a single prefix byte with width 1.

use crate::error::{Error, Result};

/// Minimum number of bytes needed to represent `max`.
fn width_for(max: u64) -> usize {
    if max == 0 {
        1
    } else {
        (64 - max.leading_zeros() as usize).div_ceil(8)
    }
}

/// Encode `values` with the minimum common byte width.
pub fn pack(values: &[u64]) -> Vec<u8> {
    let width = width_for(values.iter().copied().max().unwrap_or(0));
    let mut buf = Vec::with_capacity(1 + values.len() * width);
    buf.push(width as u8);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes()[..width]);
    }
    buf
}

/// The byte width stored in the prefix. Fails with `CorruptBlock` when the
/// prefix is missing or outside `1..=8`.
pub fn byte_width(data: &[u8]) -> Result<usize> {
    match data.first() {
        Some(&w) if (1..=8).contains(&w) => Ok(w as usize),
        Some(&w) => Err(Error::CorruptBlock(format!("bit-pack width {w} outside 1..=8"))),
        None => Err(Error::CorruptBlock("bit-pack data missing width prefix".to_string())),
    }
}

/// Number of encoded values: `(len - 1) / width`.
pub fn len(data: &[u8]) -> Result<usize> {
    let width = byte_width(data)?;
    let payload = data.len() - 1;
    if payload % width != 0 {
        return Err(Error::CorruptBlock(format!(
            "bit-pack payload of {payload} bytes is not a multiple of width {width}"
        )));
    }
    Ok(payload / width)
}

/// O(1) random access to value `idx`. `width` must be the value returned by
/// [`byte_width`] for this buffer, and `idx` must be below [`len`].
#[inline]
pub fn get(data: &[u8], idx: usize, width: usize) -> u64 {
    let at = 1 + idx * width;
    let mut v = 0u64;
    for (i, b) in data[at..at + width].iter().enumerate() {
        v |= (*b as u64) << (8 * i);
    }
    v
}

/// Decode the full sequence.
pub fn unpack(data: &[u8]) -> Result<Vec<u64>> {
    let width = byte_width(data)?;
    let count = len(data)?;
    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        values.push(get(data, i, width));
    }
    Ok(values)
}
