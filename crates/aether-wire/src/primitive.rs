//! Byte-level primitives for the two wire profiles.
//!
//! `Mode::Native` is little-endian and packed; `Mode::Xdr` is the portable
//! profile: big-endian, every primitive occupies a multiple of four bytes
//! and opaque data is padded to a four-byte boundary, in the style of
//! RFC 4506.

use crate::error::{Result, WireError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Native,
    Xdr,
}

impl Mode {
    pub fn byte(self) -> u8 {
        match self {
            Mode::Native => 0,
            Mode::Xdr => 1,
        }
    }

    pub fn from_byte(b: u8) -> Result<Mode> {
        match b {
            0 => Ok(Mode::Native),
            1 => Ok(Mode::Xdr),
            other => Err(WireError::BadMode(other)),
        }
    }
}

/// Appends profile-encoded primitives to a byte buffer.
pub struct Writer {
    buf: Vec<u8>,
    mode: Mode,
}

impl Writer {
    pub fn new(mode: Mode) -> Self {
        Writer {
            buf: Vec::new(),
            mode,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, v: u8) {
        match self.mode {
            Mode::Native => self.buf.push(v),
            // XDR has no byte-sized primitive
            Mode::Xdr => self.put_u32(v as u32),
        }
    }

    pub fn put_bool(&mut self, v: bool) {
        self.put_u8(v as u8);
    }

    pub fn put_u32(&mut self, v: u32) {
        match self.mode {
            Mode::Native => self.buf.extend_from_slice(&v.to_le_bytes()),
            Mode::Xdr => self.buf.extend_from_slice(&v.to_be_bytes()),
        }
    }

    pub fn put_u64(&mut self, v: u64) {
        match self.mode {
            Mode::Native => self.buf.extend_from_slice(&v.to_le_bytes()),
            Mode::Xdr => self.buf.extend_from_slice(&v.to_be_bytes()),
        }
    }

    pub fn put_i64(&mut self, v: i64) {
        self.put_u64(v as u64);
    }

    pub fn put_f64(&mut self, v: f64) {
        self.put_u64(v.to_bits());
    }

    pub fn put_bytes(&mut self, data: &[u8]) {
        self.put_u32(data.len() as u32);
        self.buf.extend_from_slice(data);
        if self.mode == Mode::Xdr {
            while self.buf.len() % 4 != 0 {
                self.buf.push(0);
            }
        }
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }
}

/// Reads profile-encoded primitives from a byte slice.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    mode: Mode,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], mode: Mode) -> Self {
        Reader { data, pos: 0, mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Fails on leftover bytes so truncated or padded frames are caught.
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(WireError::Trailing(n)),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(WireError::Eof(self.pos));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        match self.mode {
            Mode::Native => Ok(self.take(1)?[0]),
            Mode::Xdr => Ok(self.get_u32()? as u8),
        }
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().map_err(|_| WireError::Eof(self.pos))?;
        Ok(match self.mode {
            Mode::Native => u32::from_le_bytes(bytes),
            Mode::Xdr => u32::from_be_bytes(bytes),
        })
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().map_err(|_| WireError::Eof(self.pos))?;
        Ok(match self.mode {
            Mode::Native => u64::from_le_bytes(bytes),
            Mode::Xdr => u64::from_be_bytes(bytes),
        })
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(self.get_u64()? as i64)
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.get_u64()?))
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.get_u32()? as usize;
        if len > self.remaining() {
            return Err(WireError::BadLength { at: self.pos, len });
        }
        let data = self.take(len)?.to_vec();
        if self.mode == Mode::Xdr {
            let pad = (4 - len % 4) % 4;
            self.take(pad)?;
        }
        Ok(data)
    }

    pub fn get_str(&mut self) -> Result<String> {
        Ok(String::from_utf8(self.get_bytes()?)?)
    }
}
