//! Primitive ABC encodings
//!
//! Packed integers are little-endian groups of 7 bits with the high bit of
//! each byte as a continuation flag, at most 5 bytes. The 5th byte only
//! contributes its low 4 bits to the 32-bit result.
//!
//! | Encoding | Width                       |
//! |----------|-----------------------------|
//! | `u8`     | 1 byte                      |
//! | `u16`    | 2 bytes, little-endian      |
//! | `s24`    | 3 bytes, little-endian      |
//! | `u30`    | packed, sign-extension rule |
//! | `u32`    | packed                      |
//! | `s32`    | packed, two's complement    |
//! | `d64`    | 8 bytes IEEE-754, LE        |

use crate::error::{AbcError, Result};

/// Largest magnitude representable by a signed 24-bit offset
pub const S24_MAX: i32 = (1 << 23) - 1;
/// Smallest value representable by a signed 24-bit offset
pub const S24_MIN: i32 = -(1 << 23);

/// Number of bytes the packed encoding of `value` occupies
pub fn packed_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Cursor over an ABC byte blob
#[derive(Debug, Clone)]
pub struct AbcReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> AbcReader<'a> {
    /// Create a reader positioned at the start of `bytes`
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Current byte offset
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Check whether the whole blob has been consumed
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Read `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(AbcError::UnexpectedEnd { offset: self.pos })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read an unsigned byte
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a signed byte
    pub fn read_s8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Read a little-endian `u16`
    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a signed 24-bit little-endian offset
    pub fn read_s24(&mut self) -> Result<i32> {
        let b = self.read_bytes(3)?;
        let raw = u32::from(b[0]) | (u32::from(b[1]) << 8) | (u32::from(b[2]) << 16);
        // Shift the sign bit into place and back
        Ok(((raw << 8) as i32) >> 8)
    }

    /// Read a packed unsigned 32-bit integer
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut result: u32 = 0;
        for i in 0..5 {
            let byte = self.read_u8()?;
            result |= u32::from(byte & 0x7F).wrapping_shl(7 * i);
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(result)
    }

    /// Read a packed 30-bit unsigned integer
    ///
    /// The top 3 bits of the decoded value must all be zero or all be one.
    pub fn read_u30(&mut self) -> Result<u32> {
        let start = self.pos;
        let value = self.read_u32()?;
        let top = value >> 29;
        if top != 0 && top != 0b111 {
            return Err(AbcError::parse(
                start,
                format!("value {value:#x} out of range for u30"),
            ));
        }
        Ok(value)
    }

    /// Read a packed u30 and widen it to an index
    pub fn read_index(&mut self) -> Result<usize> {
        Ok(self.read_u30()? as usize)
    }

    /// Read a packed signed 32-bit integer
    pub fn read_s32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Read a little-endian IEEE-754 double
    pub fn read_d64(&mut self) -> Result<f64> {
        let b = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(f64::from_le_bytes(raw))
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String> {
        let start = self.pos;
        let len = self.read_index()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| AbcError::parse(start, format!("invalid utf-8 string: {e}")))
    }
}

/// Growable output buffer for ABC data
#[derive(Debug, Default, Clone)]
pub struct AbcWriter {
    buf: Vec<u8>,
}

impl AbcWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if nothing has been written
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// View the written bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Take the written bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write an unsigned byte
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write a signed byte
    pub fn write_s8(&mut self, value: i8) {
        self.buf.push(value as u8);
    }

    /// Write a little-endian `u16`
    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a signed 24-bit little-endian offset
    pub fn write_s24(&mut self, value: i32) -> Result<()> {
        if !(S24_MIN..=S24_MAX).contains(&value) {
            return Err(AbcError::construction(format!(
                "offset {value} does not fit in 24 bits"
            )));
        }
        self.buf.extend_from_slice(&value.to_le_bytes()[..3]);
        Ok(())
    }

    /// Overwrite a previously written 24-bit offset at `pos`
    pub fn patch_s24(&mut self, pos: usize, value: i32) -> Result<()> {
        if !(S24_MIN..=S24_MAX).contains(&value) {
            return Err(AbcError::construction(format!(
                "offset {value} does not fit in 24 bits"
            )));
        }
        let slot = self
            .buf
            .get_mut(pos..pos + 3)
            .ok_or_else(|| AbcError::construction(format!("patch position {pos} out of range")))?;
        slot.copy_from_slice(&value.to_le_bytes()[..3]);
        Ok(())
    }

    /// Write a packed unsigned 32-bit integer
    pub fn write_u32(&mut self, mut value: u32) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Write a packed 30-bit unsigned integer
    pub fn write_u30(&mut self, value: u32) {
        self.write_u32(value);
    }

    /// Write a table index as a packed u30
    pub fn write_index(&mut self, index: usize) -> Result<()> {
        let value = u32::try_from(index)
            .ok()
            .filter(|v| v >> 30 == 0)
            .ok_or_else(|| AbcError::construction(format!("index {index} exceeds u30 range")))?;
        self.write_u30(value);
        Ok(())
    }

    /// Write a packed signed 32-bit integer
    pub fn write_s32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    /// Write a little-endian IEEE-754 double
    pub fn write_d64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a length-prefixed UTF-8 string
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_index(value.len())?;
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }
}
