//! Sequential big-endian encoding with an optional SHA-1 over a gated
//! subset of the output.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use sha1::{Digest, Sha1};
use std::io::{self, Write};

/// Length of the digest returned by [`HashingWriter::finalize_hash`].
pub const DIGEST_LEN: usize = 20;

/// Writes box fields to a sink, counting bytes and optionally hashing them.
///
/// The digest sees exactly the bytes written while hashing is enabled and not
/// paused, in write order. Pausing is used to leave mutable sub-trees (for
/// example DRM info boxes) out of a content hash.
pub struct HashingWriter<W: Write> {
    inner: W,
    written: u64,
    digest: Option<Sha1>,
    active: bool,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W, compute_hash: bool) -> Self {
        Self { inner, written: 0, digest: compute_hash.then(Sha1::new), active: true }
    }

    /// Bytes written so far, whether hashed or not.
    pub fn position(&self) -> u64 {
        self.written
    }

    /// True if a byte written now would reach the digest.
    pub fn is_hashing(&self) -> bool {
        self.active && self.digest.is_some()
    }

    pub fn pause_hashing(&mut self) {
        self.active = false;
    }

    pub fn resume_hashing(&mut self) {
        self.active = true;
    }

    /// Returns the digest and ends hashing: later calls return `None` and
    /// later writes are not hashed. `None` if hashing was never enabled.
    pub fn finalize_hash(&mut self) -> Option<[u8; DIGEST_LEN]> {
        self.digest.take().map(|d| d.finalize().into())
    }

    pub fn write_u8(&mut self, b: u8) -> Result<()> {
        self.write_bytes(&[b])
    }

    pub fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.write_all(buf)?;
        self.written += buf.len() as u64;
        if self.active {
            if let Some(d) = self.digest.as_mut() {
                d.update(buf);
            }
        }
        Ok(())
    }

    /// Big-endian, most significant byte first, one byte at a time.
    ///
    /// Fails if `value` does not fit in `width` bytes, or for 8-byte values
    /// above `i64::MAX`, mirroring what the reader accepts.
    pub fn write_uint(&mut self, value: u64, width: usize) -> Result<()> {
        if !matches!(width, 1 | 2 | 3 | 4 | 8) {
            return Err(Error::unsupported(format!("integer width {width}")));
        }
        let fits = if width == 8 { value <= i64::MAX as u64 } else { value >> (width * 8) == 0 };
        if !fits {
            return Err(Error::unsupported(format!("{value:#x} does not fit in {width} bytes")));
        }
        for i in (0..width).rev() {
            self.write_u8((value >> (i * 8)) as u8)?;
        }
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_uint(v.into(), 2)
    }

    pub fn write_u24(&mut self, v: u32) -> Result<()> {
        self.write_uint(v.into(), 3)
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_uint(v.into(), 4)
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_uint(v, 8)
    }

    pub fn write_u16_le(&mut self, v: u16) -> Result<()> {
        let mut b = [0u8; 2];
        LittleEndian::write_u16(&mut b, v);
        self.write_bytes(&b)
    }

    pub fn write_u32_le(&mut self, v: u32) -> Result<()> {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, v);
        self.write_bytes(&b)
    }

    /// Truncates toward zero, the inverse of the reader's division.
    pub fn write_fixed_16_16(&mut self, v: f64) -> Result<()> {
        let scaled = (v * 65536.0).trunc();
        if !scaled.is_finite() || scaled < f64::from(i32::MIN) || scaled > f64::from(i32::MAX) {
            return Err(Error::unsupported(format!("{v} is not representable as 16.16")));
        }
        self.write_uint(u64::from(scaled as i32 as u32), 4)
    }

    pub fn write_fixed_8_8(&mut self, v: f32) -> Result<()> {
        let scaled = (f64::from(v) * 256.0).trunc();
        if !scaled.is_finite() || scaled < f64::from(i16::MIN) || scaled > f64::from(i16::MAX) {
            return Err(Error::unsupported(format!("{v} is not representable as 8.8")));
        }
        self.write_uint(u64::from(scaled as i16 as u16), 2)
    }

    pub fn write_iso639(&mut self, code: &str) -> Result<()> {
        let b = code.as_bytes();
        if b.len() != 3 || !b.iter().all(|c| (0x60..=0x7f).contains(c)) {
            return Err(Error::unsupported(format!("language code {code:?}")));
        }
        let bits = b.iter().fold(0u16, |acc, &c| (acc << 5) | u16::from(c - 0x60));
        self.write_u16(bits)
    }

    /// UTF-8 plus a single zero byte; `None` writes only the terminator.
    pub fn write_cstring(&mut self, text: Option<&str>) -> Result<()> {
        if let Some(t) = text {
            self.write_bytes(t.as_bytes())?;
        }
        self.write_u8(0)
    }

    /// UTF-8 without terminator; `None` writes nothing.
    pub fn write_raw(&mut self, text: Option<&str>) -> Result<()> {
        match text {
            Some(t) => self.write_bytes(t.as_bytes()),
            None => Ok(()),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
