pub mod bits;
pub mod boxes;
pub mod error;
pub mod reader;
pub mod segment;
pub mod tree;
pub mod util;
pub mod writer;

pub use boxes::{BoxHeader, BoxRef, FourCC, NodeKind};
pub use error::{Error, Result};
pub use reader::SegmentedReader;
pub use segment::Segment;
pub use tree::{BoxTree, HashScope, parse_all, read_box_header, write_tree};
pub use writer::HashingWriter;
