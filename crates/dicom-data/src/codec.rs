//! Byte-order aware cursors
//!
//! DICOM streams are little-endian by default but can flip to big-endian per
//! transfer syntax, or mid-stream during anomaly recovery. Both cursors carry
//! a `swapped` flag that callers toggle; every multi-byte read/write honors
//! the current flag.

use bytes::{BufMut, BytesMut};

use crate::error::{DataError, Result};

pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    swapped: bool,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8], swapped: bool) -> Self {
        ByteReader { buf, pos: 0, swapped }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn swapped(&self) -> bool {
        self.swapped
    }

    pub fn toggle_swapped(&mut self) {
        self.swapped = !self.swapped;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(DataError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        let v = u16::from_le_bytes([b[0], b[1]]);
        Ok(if self.swapped { v.swap_bytes() } else { v })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        Ok(if self.swapped { v.swap_bytes() } else { v })
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        let v = u64::from_le_bytes(raw);
        Ok(f64::from_bits(if self.swapped { v.swap_bytes() } else { v }))
    }

    /// Big-endian read regardless of the swap flag, for transport framing.
    pub fn read_u16_be(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Big-endian read regardless of the swap flag, for transport framing.
    pub fn read_u32_be(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Read up to `n` bytes, truncating quietly at end of input.
    pub fn read_bytes_upto(&mut self, n: usize) -> &'a [u8] {
        let n = n.min(self.remaining());
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        slice
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }
}

pub struct ByteWriter {
    buf: BytesMut,
    swapped: bool,
}

impl ByteWriter {
    pub fn new(swapped: bool) -> Self {
        ByteWriter {
            buf: BytesMut::new(),
            swapped,
        }
    }

    pub fn swapped(&self) -> bool {
        self.swapped
    }

    pub fn toggle_swapped(&mut self) {
        self.swapped = !self.swapped;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> bytes::Bytes {
        self.buf.freeze()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        let v = if self.swapped { v.swap_bytes() } else { v };
        self.buf.put_u16_le(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        let v = if self.swapped { v.swap_bytes() } else { v };
        self.buf.put_u32_le(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.write_u16(v as u16);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_u32(v as u32);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    pub fn write_f64(&mut self, v: f64) {
        let raw = if self.swapped {
            v.to_bits().swap_bytes()
        } else {
            v.to_bits()
        };
        self.buf.put_u64_le(raw);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }
}
