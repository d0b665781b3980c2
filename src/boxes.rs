use std::fmt;

#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub fn from_str(s: &str) -> Option<Self> {
        let b = s.as_bytes();
        if b.len() == 4 {
            Some(FourCC([b[0], b[1], b[2], b[3]]))
        } else { None }
    }
    pub fn as_str_lossy(&self) -> String {
        self.0.iter().map(|&c| if (32..=126).contains(&c) { c as char } else { '.' })
            .collect()
    }
}
impl fmt::Debug for FourCC { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_str_lossy()) } }
impl fmt::Display for FourCC { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_str_lossy()) } }

#[derive(Debug, Clone)]
pub struct BoxHeader {
    pub size: u64,          // total size including header, or 0=to parent end
    pub typ: FourCC,
    pub uuid: Option<[u8; 16]>,
    pub large_size: bool,   // size came from the 64-bit largesize field
    pub header_size: u64,   // 8, 16, 24 or 32
    pub start: u64,
}

impl BoxHeader {
    pub fn payload_offset(&self) -> u64 {
        self.start + self.header_size
    }
}

#[derive(Debug)]
pub enum NodeKind {
    /// `preamble` bytes (e.g. version/flags) precede the children; `trailer`
    /// bytes too short to be a box follow them.
    Container { preamble: u64, children: Vec<BoxRef>, trailer: u64 },
    Leaf { data_offset: u64, data_len: u64 },
}

#[derive(Debug)]
pub struct BoxRef {
    pub hdr: BoxHeader,
    pub kind: NodeKind,
}

impl BoxRef {
    /// Offset one past the last byte of this box.
    pub fn end(&self) -> u64 {
        match &self.kind {
            NodeKind::Leaf { data_offset, data_len } => data_offset + data_len,
            NodeKind::Container { preamble, children, trailer } => {
                let content_end = children
                    .last()
                    .map(|c| c.end())
                    .unwrap_or(self.hdr.payload_offset() + preamble);
                content_end + trailer
            }
        }
    }
}
