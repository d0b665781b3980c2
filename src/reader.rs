//! Random-access big-endian decoding over one or more [`Segment`]s.
//!
//! A [`SegmentedReader`] presents its segments, in order, as one logical
//! byte stream. Files are mapped in fixed-size slices so that no single
//! mapping has to cover the whole file.

use crate::bits::BitCursor;
use crate::error::{Error, Result};
use crate::segment::Segment;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Slice size used by [`SegmentedReader::open`].
pub const DEFAULT_SLICE_SIZE: u64 = 128 * 1024 * 1024;
/// Attempts made to map a single slice before giving up.
pub const MAP_ATTEMPTS: u32 = 3;
/// Delay before the second attempt; grows linearly per attempt.
pub const MAP_RETRY_DELAY: Duration = Duration::from_millis(10);

pub struct SegmentedReader {
    segments: Vec<Segment>,
    /// Logical offset of the first byte of each segment.
    starts: Vec<u64>,
    size: u64,
    /// `None` once every byte has been consumed (position == size).
    active: Option<usize>,
    bits: BitCursor,
}

impl SegmentedReader {
    /// Concatenates `segments` in order. The reader starts at logical offset 0
    /// regardless of the cursors the segments arrive with.
    pub fn new(segments: Vec<Segment>) -> Self {
        let mut starts = Vec::with_capacity(segments.len());
        let mut size = 0u64;
        for s in &segments {
            starts.push(size);
            size += s.limit() as u64;
        }
        let mut r = Self { segments, starts, size, active: None, bits: BitCursor::default() };
        r.rewind_all();
        r
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(vec![Segment::new(bytes)])
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_slice_size(path, DEFAULT_SLICE_SIZE)
    }

    /// Maps the file read-only in slices of at most `slice_size` bytes.
    /// The file handle is closed once all slices are mapped.
    pub fn open_with_slice_size<P: AsRef<Path>>(path: P, slice_size: u64) -> Result<Self> {
        if slice_size == 0 {
            return Err(Error::unsupported("slice size must be non-zero"));
        }
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        let mut segments = Vec::new();
        let mut offset = 0u64;
        while offset < len {
            let slice_len = slice_size.min(len - offset);
            let slice_len = usize::try_from(slice_len)
                .map_err(|_| Error::unsupported(format!("slice of {slice_len} bytes")))?;
            segments.push(Segment::mapped(map_slice(&file, offset, slice_len)?));
            offset += slice_len as u64;
        }
        debug!(path = %path.display(), len, slices = segments.len(), "mapped file");
        Ok(Self::new(segments))
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn position(&self) -> u64 {
        match self.active {
            Some(i) => self.starts[i] + self.segments[i].position() as u64,
            None => self.size,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.size - self.position()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Moves to absolute offset `pos`. `pos == size()` is legal and leaves the
    /// reader exhausted. Pending bits are discarded.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.size {
            return Err(Error::OutOfRange { position: pos, size: self.size });
        }
        self.bits.clear();
        if pos == self.size {
            self.active = None;
            return Ok(());
        }
        // last segment starting at or before `pos`; skips empty segments
        let idx = self.starts.partition_point(|&s| s <= pos) - 1;
        self.segments[idx].set_position((pos - self.starts[idx]) as usize);
        self.active = Some(idx);
        Ok(())
    }

    pub fn skip(&mut self, n: u64) -> Result<()> {
        let target = self.position().checked_add(n).unwrap_or(u64::MAX);
        self.seek(target)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = self.active.and_then(|i| self.segments[i].get());
        match byte {
            Some(b) => {
                self.settle();
                Ok(b)
            }
            None => Err(self.end_of_stream(1)),
        }
    }

    /// Fills `buf` completely, crossing segment boundaries as needed. Nothing
    /// is consumed if fewer than `buf.len()` bytes remain.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        if (buf.len() as u64) > self.remaining() {
            return Err(self.end_of_stream(buf.len() as u64));
        }
        let mut filled = 0;
        while filled < buf.len() {
            let Some(i) = self.active else {
                return Err(self.end_of_stream((buf.len() - filled) as u64));
            };
            filled += self.segments[i].take_into(&mut buf[filled..]);
            self.settle();
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        if (n as u64) > self.remaining() {
            return Err(self.end_of_stream(n as u64));
        }
        let mut v = vec![0u8; n];
        self.read_into(&mut v)?;
        Ok(v)
    }

    /// Big-endian unsigned integer of `width` bytes (1, 2, 3, 4 or 8).
    ///
    /// 64-bit values with the top bit set are rejected; no box field needs
    /// them and callers routinely convert to signed offsets.
    pub fn read_uint(&mut self, width: usize) -> Result<u64> {
        if !matches!(width, 1 | 2 | 3 | 4 | 8) {
            return Err(Error::unsupported(format!("integer width {width}")));
        }
        let mut v = 0u64;
        for _ in 0..width {
            v = (v << 8) | u64::from(self.read_u8()?);
        }
        if v > i64::MAX as u64 {
            return Err(Error::unsupported(format!("64-bit value {v:#x} exceeds i64::MAX")));
        }
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_uint(2)? as u16)
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        Ok(self.read_uint(3)? as u32)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_uint(4)? as u32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_uint(8)
    }

    /// Low byte first.
    pub fn read_u16_le(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_into(&mut b)?;
        Ok(LittleEndian::read_u16(&b))
    }

    /// Low byte first.
    pub fn read_u32_le(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_into(&mut b)?;
        Ok(LittleEndian::read_u32(&b))
    }

    /// Signed 16.16 fixed point.
    pub fn read_fixed_16_16(&mut self) -> Result<f64> {
        let mut b = [0u8; 4];
        self.read_into(&mut b)?;
        Ok(f64::from(BigEndian::read_i32(&b)) / 65536.0)
    }

    /// Signed 8.8 fixed point.
    pub fn read_fixed_8_8(&mut self) -> Result<f32> {
        let mut b = [0u8; 2];
        self.read_into(&mut b)?;
        Ok(f32::from(BigEndian::read_i16(&b)) / 256.0)
    }

    /// Packed ISO-639-2/T language code: three 5-bit fields, each offset by 0x60.
    pub fn read_iso639(&mut self) -> Result<String> {
        let bits = self.read_u16()?;
        Ok((0..3)
            .map(|i| char::from(((bits >> ((2 - i) * 5)) & 0x1f) as u8 + 0x60))
            .collect())
    }

    /// Zero-terminated UTF-8; the terminator is consumed but not returned.
    pub fn read_cstring(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        loop {
            match self.read_u8()? {
                0 => break,
                b => bytes.push(b),
            }
        }
        Ok(String::from_utf8(bytes)?)
    }

    pub fn read_string(&mut self, len: usize) -> Result<String> {
        Ok(String::from_utf8(self.read_bytes(len)?)?)
    }

    /// Reads `n <= 31` bits MSB-first.
    ///
    /// Whole bytes are consumed from the stream; unread bits of the last byte
    /// stay pending for the next call. Byte-level reads between bit reads see
    /// the stream as if the pending bits were already gone, so callers must
    /// drain to a byte boundary (see [`Self::bits_remaining`]) before switching.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 31 {
            return Err(Error::unsupported(format!("cannot read {n} bits, 31 max")));
        }
        let mut value = 0u32;
        let mut left = n;
        while left > 0 {
            if self.bits.is_empty() {
                let b = self.read_u8()?;
                self.bits.load(b);
            }
            let (chunk, taken) = self.bits.take(left);
            value = (value << taken) | chunk;
            left -= taken;
        }
        Ok(value)
    }

    pub fn bits_remaining(&self) -> u32 {
        self.bits.pending()
    }

    /// Zero-copy views covering `[start, start + length)`. The reader is left
    /// positioned at `start + length`.
    pub fn read_segments(&mut self, start: u64, length: u64) -> Result<Vec<Segment>> {
        let end = start.checked_add(length).unwrap_or(u64::MAX);
        if end > self.size {
            return Err(Error::OutOfRange { position: end, size: self.size });
        }
        self.seek(start)?;
        let mut views = Vec::new();
        let mut left = length;
        while left > 0 {
            let Some(i) = self.active else {
                return Err(self.end_of_stream(left));
            };
            let seg = &mut self.segments[i];
            let from = seg.position();
            let take = left.min(seg.remaining() as u64) as usize;
            views.push(seg.view(from..from + take));
            seg.set_position(from + take);
            left -= take as u64;
            self.settle();
        }
        Ok(views)
    }

    fn rewind_all(&mut self) {
        for s in &mut self.segments {
            s.rewind();
        }
        self.active = if self.segments.is_empty() { None } else { Some(0) };
        self.bits.clear();
        self.settle();
    }

    /// Steps past exhausted segments so that `active` is `None` exactly when
    /// the logical position equals the size.
    fn settle(&mut self) {
        while let Some(i) = self.active {
            if self.segments[i].remaining() > 0 {
                break;
            }
            if i + 1 < self.segments.len() {
                self.segments[i + 1].rewind();
                self.active = Some(i + 1);
            } else {
                self.active = None;
            }
        }
    }

    fn end_of_stream(&self, requested: u64) -> Error {
        Error::EndOfStream { requested, remaining: self.remaining() }
    }
}

fn map_slice(file: &File, offset: u64, len: usize) -> Result<Mmap> {
    let mut attempt = 1;
    loop {
        // SAFETY: the mapping is read-only; the file must not be truncated while mapped.
        match unsafe { MmapOptions::new().offset(offset).len(len).map(file) } {
            Ok(m) => return Ok(m),
            Err(e) if attempt < MAP_ATTEMPTS => {
                warn!(offset, len, attempt, error = %e, "mapping slice failed, retrying");
                std::thread::sleep(MAP_RETRY_DELAY * attempt);
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

impl Read for SegmentedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(usize::try_from(self.remaining()).unwrap_or(usize::MAX));
        self.read_into(&mut buf[..n])?;
        Ok(n)
    }
}

impl Seek for SegmentedReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.size.checked_add_signed(d),
            SeekFrom::Current(d) => self.position().checked_add_signed(d),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative or overflowing position")
        })?;
        SegmentedReader::seek(self, target)?;
        Ok(target)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.position())
    }
}
