use memmap2::Mmap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Storage a segment views into. Cloning a [`Segment`] shares it.
enum Backing {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Owned(v) => v,
            Backing::Mapped(m) => m,
        }
    }
}

/// A bounded, immutable window of bytes with its own read cursor.
///
/// `limit` is fixed at creation; `position` moves in `0..=limit`.
#[derive(Clone)]
pub struct Segment {
    backing: Arc<Backing>,
    window: Range<usize>,
    position: usize,
}

impl Segment {
    pub fn new(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self { backing: Arc::new(Backing::Owned(bytes)), window: 0..len, position: 0 }
    }

    pub(crate) fn mapped(map: Mmap) -> Self {
        let len = map.len();
        Self { backing: Arc::new(Backing::Mapped(map)), window: 0..len, position: 0 }
    }

    /// A new segment over `range` of this one's window (relative offsets),
    /// sharing the same storage. The cursor of the view starts at 0.
    pub(crate) fn view(&self, range: Range<usize>) -> Self {
        debug_assert!(range.end <= self.limit());
        let start = self.window.start + range.start;
        let end = self.window.start + range.end;
        Self { backing: Arc::clone(&self.backing), window: start..end, position: 0 }
    }

    pub fn limit(&self) -> usize {
        self.window.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.limit() - self.position
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }

    pub(crate) fn set_position(&mut self, position: usize) {
        debug_assert!(position <= self.limit());
        self.position = position;
    }

    /// Whole window, independent of the cursor.
    pub fn as_bytes(&self) -> &[u8] {
        &self.backing.bytes()[self.window.clone()]
    }

    /// Bytes from the cursor to the limit.
    pub fn unread(&self) -> &[u8] {
        &self.as_bytes()[self.position..]
    }

    pub(crate) fn get(&mut self) -> Option<u8> {
        let b = *self.unread().first()?;
        self.position += 1;
        Some(b)
    }

    /// Copies `min(buf.len(), remaining)` bytes and advances; returns the count.
    pub(crate) fn take_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.unread()[..n]);
        self.position += n;
        n
    }
}

impl From<Vec<u8>> for Segment {
    fn from(bytes: Vec<u8>) -> Self {
        Segment::new(bytes)
    }
}

impl From<&[u8]> for Segment {
    fn from(bytes: &[u8]) -> Self {
        Segment::new(bytes.to_vec())
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match *self.backing {
            Backing::Owned(_) => "owned",
            Backing::Mapped(_) => "mapped",
        };
        f.debug_struct("Segment")
            .field("backing", &kind)
            .field("limit", &self.limit())
            .field("position", &self.position)
            .finish()
    }
}
