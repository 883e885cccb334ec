//! Bounds-checked cursor over encoded data, plus big-endian writers.
//!
//! Every read that would run past the end is a [`CodecError::Decode`] naming
//! what was being read, so truncated files fail cleanly instead of panicking.

use super::CodecError;

pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn seek(&mut self, pos: usize, what: &str) -> Result<(), CodecError> {
        if pos > self.data.len() {
            return Err(truncated(what));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize, what: &str) -> Result<(), CodecError> {
        self.take(n, what).map(|_| ())
    }

    pub fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| truncated(what))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn u8(&mut self, what: &str) -> Result<u8, CodecError> {
        Ok(self.take(1, what)?[0])
    }

    pub fn u16_be(&mut self, what: &str) -> Result<u16, CodecError> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn i16_be(&mut self, what: &str) -> Result<i16, CodecError> {
        Ok(self.u16_be(what)? as i16)
    }

    pub fn u32_be(&mut self, what: &str) -> Result<u32, CodecError> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u32_le(&mut self, what: &str) -> Result<u32, CodecError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64_be(&mut self, what: &str) -> Result<u64, CodecError> {
        let b = self.take(8, what)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }
}

pub fn truncated(what: &str) -> CodecError {
    CodecError::decode(format!("unexpected end of data reading {what}"))
}

/// Largest raster a decoder allocates for, in pixels (1 GiB of RGBA).
pub const MAX_DECODE_PIXELS: usize = 1 << 28;

/// Sample count of a `width`x`height` raster with `channels` samples per
/// pixel. Header sizes are untrusted, so this runs before any allocation.
pub fn raster_len(width: u32, height: u32, channels: usize, what: &str) -> Result<usize, CodecError> {
    (width as usize)
        .checked_mul(height as usize)
        .filter(|&n| n > 0 && n <= MAX_DECODE_PIXELS)
        .and_then(|n| n.checked_mul(channels))
        .ok_or_else(|| CodecError::decode(format!("{what} size {width}x{height} is out of range")))
}

pub fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Overwrite a previously reserved big-endian `u32` at `at`.
pub fn patch_u32(out: &mut [u8], at: usize, v: u32) {
    out[at..at + 4].copy_from_slice(&v.to_be_bytes());
}

/// Overwrite a previously reserved big-endian `u16` at `at`.
pub fn patch_u16(out: &mut [u8], at: usize, v: u16) {
    out[at..at + 2].copy_from_slice(&v.to_be_bytes());
}
