//! Raw, type-agnostic box tree: walks headers with a [`SegmentedReader`] and
//! re-emits the exact same bytes through a [`HashingWriter`].

use crate::boxes::{BoxHeader, BoxRef, FourCC, NodeKind};
use crate::error::{Error, Result};
use crate::reader::SegmentedReader;
use crate::writer::HashingWriter;
use std::collections::HashSet;
use std::io::Write;
use tracing::{debug, trace};

const MIN_HEADER: u64 = 8;

#[derive(Debug)]
pub struct BoxTree {
    pub boxes: Vec<BoxRef>,
    /// Bytes after the last top-level box, too short to hold a header.
    pub trailer: u64,
}

pub fn read_box_header(r: &mut SegmentedReader) -> Result<BoxHeader> {
    let end = r.size();
    read_header_within(r, end)
}

/// Reads a header that must fit before `end`. Extended fields (largesize,
/// uuid) that would cross `end`, or a largesize the reader rejects, are an
/// `InvalidBoxSize` rather than a read error.
fn read_header_within(r: &mut SegmentedReader, end: u64) -> Result<BoxHeader> {
    let start = r.position();
    let size32 = r.read_u32()?;
    let mut typ = [0u8; 4];
    r.read_into(&mut typ)?;
    let large_size = size32 == 1;
    let is_uuid = &typ == b"uuid";

    let header_size = MIN_HEADER + if large_size { 8 } else { 0 } + if is_uuid { 16 } else { 0 };
    let bad = Error::InvalidBoxSize { offset: start, size: u64::from(size32) };
    if start + header_size > end {
        return Err(bad);
    }
    let size = if large_size {
        match r.read_u64() {
            Ok(v) => v,
            Err(Error::UnsupportedValue(_)) => return Err(bad),
            Err(e) => return Err(e),
        }
    } else {
        u64::from(size32)
    };

    let mut uuid = None;
    if is_uuid {
        let mut u = [0u8; 16];
        r.read_into(&mut u)?;
        uuid = Some(u);
    }

    if size != 0 && size < header_size {
        return Err(Error::InvalidBoxSize { offset: start, size });
    }

    Ok(BoxHeader { size, typ: FourCC(typ), uuid, large_size, header_size, start })
}

/// Parses the whole reader from offset 0.
pub fn parse_all(r: &mut SegmentedReader) -> Result<BoxTree> {
    let size = r.size();
    let (boxes, trailer) = parse_range(r, 0, size)?;
    Ok(BoxTree { boxes, trailer })
}

/// Parses sibling boxes from the current position up to `parent_end`.
pub fn parse_children(r: &mut SegmentedReader, parent_end: u64) -> Result<Vec<BoxRef>> {
    let start = r.position();
    let (kids, trailer) = parse_range(r, start, parent_end)?;
    if trailer != 0 {
        return Err(Error::InvalidBoxSize { offset: parent_end - trailer, size: trailer });
    }
    Ok(kids)
}

fn parse_range(r: &mut SegmentedReader, start: u64, end: u64) -> Result<(Vec<BoxRef>, u64)> {
    if start > end || end > r.size() {
        return Err(Error::OutOfRange { position: end, size: r.size() });
    }
    r.seek(start)?;
    let mut kids = Vec::new();
    loop {
        let left = end - r.position();
        if left < MIN_HEADER {
            return Ok((kids, left));
        }
        let h = read_header_within(r, end)?;
        let box_end = if h.size == 0 { end } else { h.start + h.size };
        if box_end > end || h.payload_offset() > box_end {
            return Err(Error::InvalidBoxSize { offset: h.start, size: h.size });
        }
        trace!(typ = %h.typ, offset = h.start, size = box_end - h.start, "box");

        let kind = parse_kind(r, &h, box_end)?;
        r.seek(box_end)?;
        kids.push(BoxRef { hdr: h, kind });
    }
}

fn parse_kind(r: &mut SegmentedReader, h: &BoxHeader, box_end: u64) -> Result<NodeKind> {
    let data_offset = h.payload_offset();
    let leaf = NodeKind::Leaf { data_offset, data_len: box_end - data_offset };
    let Some(preamble) = container_preamble(&h.typ) else {
        return Ok(leaf);
    };
    if data_offset + preamble > box_end {
        return Ok(leaf);
    }
    match parse_range(r, data_offset + preamble, box_end) {
        Ok((children, trailer)) => Ok(NodeKind::Container { preamble, children, trailer }),
        // e.g. QuickTime 'meta' without version/flags
        Err(Error::InvalidBoxSize { offset, .. }) => {
            debug!(typ = %h.typ, start = h.start, bad_child = offset, "content is not a box list, keeping it opaque");
            Ok(leaf)
        }
        Err(e) => Err(e),
    }
}

// Containers whose payload is a plain list of boxes after a fixed preamble.
fn container_preamble(typ: &FourCC) -> Option<u64> {
    match &typ.0 {
        b"moov" | b"trak" | b"mdia" | b"minf" | b"stbl" | b"edts" |
        b"udta" | b"dinf" | b"mvex" | b"moof" | b"traf" | b"mfra" |
        b"sinf" | b"schi" | b"ilst" => Some(0),
        b"meta" => Some(4),
        _ => None,
    }
}

/// Depth-first search for the first box of type `typ`.
pub fn find_box<'a>(boxes: &'a [BoxRef], typ: &FourCC) -> Option<&'a BoxRef> {
    boxes.iter().find_map(|b| {
        if &b.hdr.typ == typ {
            return Some(b);
        }
        match &b.kind {
            NodeKind::Container { children, .. } => find_box(children, typ),
            NodeKind::Leaf { .. } => None,
        }
    })
}

/// Box types written with hashing paused, together with their descendants.
#[derive(Debug, Clone)]
pub struct HashScope {
    excluded: HashSet<FourCC>,
}

impl HashScope {
    pub fn new<I: IntoIterator<Item = FourCC>>(excluded: I) -> Self {
        Self { excluded: excluded.into_iter().collect() }
    }

    /// Hash every box.
    pub fn all() -> Self {
        Self { excluded: HashSet::new() }
    }

    pub fn excludes(&self, typ: &FourCC) -> bool {
        self.excluded.contains(typ)
    }
}

impl Default for HashScope {
    /// Excludes OMA DRM 'mdri' (mutable DRM information).
    fn default() -> Self {
        Self::new([FourCC(*b"mdri")])
    }
}

pub fn write_header<W: Write>(w: &mut HashingWriter<W>, hdr: &BoxHeader) -> Result<()> {
    if hdr.large_size {
        w.write_u32(1)?;
        w.write_bytes(&hdr.typ.0)?;
        w.write_u64(hdr.size)?;
    } else {
        let size = u32::try_from(hdr.size)
            .map_err(|_| Error::InvalidBoxSize { offset: hdr.start, size: hdr.size })?;
        w.write_u32(size)?;
        w.write_bytes(&hdr.typ.0)?;
    }
    if let Some(u) = &hdr.uuid {
        w.write_bytes(u)?;
    }
    Ok(())
}

pub fn write_box<W: Write>(
    w: &mut HashingWriter<W>,
    r: &mut SegmentedReader,
    b: &BoxRef,
    scope: &HashScope,
) -> Result<()> {
    let pause = w.is_hashing() && scope.excludes(&b.hdr.typ);
    if pause {
        trace!(typ = %b.hdr.typ, offset = b.hdr.start, "hashing paused");
        w.pause_hashing();
    }
    let res = write_box_contents(w, r, b, scope);
    if pause {
        w.resume_hashing();
    }
    res
}

fn write_box_contents<W: Write>(
    w: &mut HashingWriter<W>,
    r: &mut SegmentedReader,
    b: &BoxRef,
    scope: &HashScope,
) -> Result<()> {
    write_header(w, &b.hdr)?;
    match &b.kind {
        NodeKind::Leaf { data_offset, data_len } => copy_range(w, r, *data_offset, *data_len),
        NodeKind::Container { preamble, children, trailer } => {
            copy_range(w, r, b.hdr.payload_offset(), *preamble)?;
            for c in children {
                write_box(w, r, c, scope)?;
            }
            copy_range(w, r, b.end() - trailer, *trailer)
        }
    }
}

pub fn write_tree<W: Write>(
    w: &mut HashingWriter<W>,
    r: &mut SegmentedReader,
    tree: &BoxTree,
    scope: &HashScope,
) -> Result<()> {
    for b in &tree.boxes {
        write_box(w, r, b, scope)?;
    }
    let trailer_start = r.size() - tree.trailer;
    copy_range(w, r, trailer_start, tree.trailer)
}

fn copy_range<W: Write>(w: &mut HashingWriter<W>, r: &mut SegmentedReader, start: u64, len: u64) -> Result<()> {
    for seg in r.read_segments(start, len)? {
        w.write_bytes(seg.as_bytes())?;
    }
    Ok(())
}
