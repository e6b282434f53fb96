//! Varint and sparse-array codec shared by every binary stream.
//!
//! All integers on disk are little-endian base-128 varints: each byte carries
//! seven value bits, low group first, with the high bit set while more groups
//! follow. Sparse integer arrays are encoded as
//! `varint(nonzero_count)` followed by `nonzero_count` pairs of
//! `(varint(index delta from the previous reported index), varint(value))`.
//!
//! Decoding is strict about its input slice: it never reads past the end and
//! reports a truncated value as [`CodecError::UnexpectedEof`] so that record
//! segmenters can treat "incomplete" and "need more bytes" uniformly.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("byte stream ended inside a value")]
    UnexpectedEof,
    #[error("varint does not fit in {bits} bits")]
    Overflow { bits: u32 },
    #[error("sparse index {index} outside array of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, CodecError>;

fn get_varint_raw(data: &[u8], bits: u32) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut read = 0usize;
    loop {
        let Some(&byte) = data.get(read) else {
            return Err(CodecError::UnexpectedEof);
        };
        read += 1;
        value |= u64::from(byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
        if shift >= bits {
            return Err(CodecError::Overflow { bits });
        }
    }
    Ok((value, read))
}

/// Decode a 32-bit varint from the head of `data`, returning the value and
/// the number of bytes consumed.
pub fn get_varint32(data: &[u8]) -> Result<(u32, usize)> {
    let (value, read) = get_varint_raw(data, 32)?;
    Ok((value as u32, read))
}

/// Decode a 64-bit varint from the head of `data`.
pub fn get_varint64(data: &[u8]) -> Result<(u64, usize)> {
    get_varint_raw(data, 64)
}

/// Append `value` to `buf` as a varint; returns the encoded length.
pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) -> usize {
    let mut written = 0usize;
    loop {
        let group = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            buf.push(group | 0x80);
            written += 1;
        } else {
            buf.push(group);
            written += 1;
            return written;
        }
    }
}

/// Decode a sparse u32 array into `out`, zero-filling it first. Returns the
/// number of bytes consumed.
pub fn get_sparse32(data: &[u8], out: &mut [u32]) -> Result<usize> {
    out.fill(0);
    let (count, mut offset) = get_varint64(data)?;
    let mut index = 0usize;
    for _ in 0..count {
        let (delta, read) = get_varint64(&data[offset..])?;
        offset += read;
        index += delta as usize;
        if index >= out.len() {
            return Err(CodecError::IndexOutOfRange {
                index,
                len: out.len(),
            });
        }
        let (value, read) = get_varint32(&data[offset..])?;
        offset += read;
        out[index] = value;
    }
    Ok(offset)
}

/// Encode `values` as a sparse array, skipping entries equal to `default`.
pub fn put_sparse32(buf: &mut Vec<u8>, values: &[u32], default: u32) -> usize {
    let count = values.iter().filter(|&&v| v != default).count();
    let mut written = put_varint(buf, count as u64);
    let mut previous = 0usize;
    for (i, &value) in values.iter().enumerate() {
        if value == default {
            continue;
        }
        written += put_varint(buf, (i - previous) as u64);
        previous = i;
        written += put_varint(buf, u64::from(value));
    }
    written
}

/// Length of the sparse array encoded at the head of `data`, validated
/// against a logical array of `len` entries, without materializing it.
/// Used by record segmenters that only need to know where a record ends.
pub fn sparse_span(data: &[u8], len: usize) -> Result<usize> {
    let (count, mut offset) = get_varint64(data)?;
    let mut index = 0usize;
    for _ in 0..count {
        let (delta, read) = get_varint64(&data[offset..])?;
        offset += read;
        index += delta as usize;
        if index >= len {
            return Err(CodecError::IndexOutOfRange { index, len });
        }
        let (_, read) = get_varint32(&data[offset..])?;
        offset += read;
    }
    Ok(offset)
}

/// Borrowing cursor over an encoded byte slice.
pub struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn read_varint32(&mut self) -> Result<u32> {
        let (value, read) = get_varint32(&self.data[self.offset..])?;
        self.offset += read;
        Ok(value)
    }

    pub fn read_varint64(&mut self) -> Result<u64> {
        let (value, read) = get_varint64(&self.data[self.offset..])?;
        self.offset += read;
        Ok(value)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let Some(&byte) = self.data.get(self.offset) else {
            return Err(CodecError::UnexpectedEof);
        };
        self.offset += 1;
        Ok(byte)
    }

    pub fn read_sparse32(&mut self, out: &mut [u32]) -> Result<()> {
        let read = get_sparse32(&self.data[self.offset..], out)?;
        self.offset += read;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        if self.offset + count > self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        self.offset += count;
        Ok(())
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }
}

/// Growable encode buffer. Writes cannot fail; the caller drains the
/// accumulated bytes with [`Writer::as_slice`] and [`Writer::clear`].
#[derive(Default)]
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_varint32(&mut self, value: u32) {
        put_varint(&mut self.bytes, u64::from(value));
    }

    pub fn put_varint64(&mut self, value: u64) {
        put_varint(&mut self.bytes, value);
    }

    pub fn put_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn put_sparse32(&mut self, values: &[u32], default: u32) {
        put_sparse32(&mut self.bytes, values, default);
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
