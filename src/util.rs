use crate::error::Result;
use crate::reader::SegmentedReader;

/// Copies `len` bytes starting at `offset`, clamped to the end of the reader.
pub fn read_slice(r: &mut SegmentedReader, offset: u64, len: u64) -> Result<Vec<u8>> {
    let len = len.min(r.size().saturating_sub(offset));
    let mut v = Vec::new();
    for seg in r.read_segments(offset, len)? {
        v.extend_from_slice(seg.as_bytes());
    }
    Ok(v)
}

/// True if both readers hold the same bytes. Compares from offset 0 in
/// bounded chunks; both readers are left at their end on a match.
pub fn same_content(a: &mut SegmentedReader, b: &mut SegmentedReader) -> Result<bool> {
    const CHUNK: u64 = 1 << 20;
    if a.size() != b.size() {
        return Ok(false);
    }
    a.seek(0)?;
    b.seek(0)?;
    while a.remaining() > 0 {
        let n = a.remaining().min(CHUNK) as usize;
        if a.read_bytes(n)? != b.read_bytes(n)? {
            return Ok(false);
        }
    }
    Ok(true)
}

pub fn hex_dump(bytes: &[u8], start_offset: u64) -> String {
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let offs = start_offset + (i as u64) * 16;
        let hexs: String = chunk.iter().map(|b| format!("{:02x} ", b)).collect();
        let ascii: String = chunk.iter().map(|&c| {
            if (32..=126).contains(&c) { c as char } else { '.' }
        }).collect();
        out.push_str(&format!("{:08x}  {:<48}  |{}|\n", offs, hexs, ascii));
    }
    out
}
