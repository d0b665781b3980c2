use isobuf::boxes::{FourCC, NodeKind};
use isobuf::tree::{find_box, parse_all, parse_children, read_box_header, write_tree};
use isobuf::{HashScope, HashingWriter, Segment, SegmentedReader};
use sha1::{Digest, Sha1};
use std::io::Write;

// iTunes-style 'meta' box: hdlr, ilst with seven items, then 1886 bytes of 'free'.
const META_HEAD: &[&str] = &[
    "000009406d657461000000000000002268646c7200000000000000006d646972",
    "6170706c0000000000000000007c000001b4696c73740000004aa96e616d0000",
    "004264617461000000010000000042656574686f76656e202d20426167617465",
    "6c6c65206f702e313139206e6f2e313120696e20422d666c6174206d616a6f72",
    "00000026a94152540000001e646174610000000100000000477265676f722052",
    "69656d616e6e0000002fa9616c62000000276461746100000001000000006874",
    "74703a2f2f7069616e6f736f63696574792e636f6d000000196370696c000000",
    "11646174610000001500000000000000001a746d706f00000012646174610000",
    "001500000000000000000038a9746f6f00000030646174610000000100000000",
    "6954756e65732076362e302e312e332c20517569636b54696d6520372e302e33",
    "000000a22d2d2d2d0000001c6d65616e00000000636f6d2e6170706c652e6954",
    "756e6573000000146e616d65000000006954756e4e4f524d0000006a64617461",
    "0000000100000000203030303030303237203030303030303237203030303030",
    "3245302030303030303245302030303031344644362030303031344644362030",
    "3030303238304620303030303238304620303030304237424220303030304237",
    "4242",
];
const FREE_SIZE: usize = 0x75e;

fn meta_box() -> Vec<u8> {
    let mut v = hex::decode(META_HEAD.concat()).unwrap();
    v.extend_from_slice(&(FREE_SIZE as u32).to_be_bytes());
    v.extend_from_slice(b"free");
    v.resize(v.len() + FREE_SIZE - 8, 0);
    v
}

fn rewrite(r: &mut SegmentedReader, scope: &HashScope) -> (Vec<u8>, [u8; 20]) {
    let tree = parse_all(r).unwrap();
    let mut w = HashingWriter::new(Vec::new(), true);
    write_tree(&mut w, r, &tree, scope).unwrap();
    let digest = w.finalize_hash().unwrap();
    (w.into_inner(), digest)
}

#[test]
fn meta_box_layout() {
    let data = meta_box();
    assert_eq!(data.len(), 0x940);
    let mut r = SegmentedReader::from_bytes(data);
    let tree = parse_all(&mut r).unwrap();
    assert_eq!(tree.boxes.len(), 1);
    assert_eq!(tree.trailer, 0);

    let meta = &tree.boxes[0];
    assert_eq!(meta.hdr.typ, FourCC(*b"meta"));
    let NodeKind::Container { preamble, children, trailer } = &meta.kind else {
        panic!("meta should be a container");
    };
    assert_eq!((*preamble, *trailer), (4, 0));
    let types: Vec<String> = children.iter().map(|c| c.hdr.typ.to_string()).collect();
    assert_eq!(types, ["hdlr", "ilst", "free"]);

    let ilst = find_box(&tree.boxes, &FourCC(*b"ilst")).unwrap();
    let NodeKind::Container { children: items, .. } = &ilst.kind else {
        panic!("ilst should be a container");
    };
    assert_eq!(items.len(), 7);
    assert_eq!(items[6].hdr.typ, FourCC(*b"----"));
}

#[test]
fn meta_box_round_trips_byte_for_byte() {
    let data = meta_box();
    let mut r = SegmentedReader::from_bytes(data.clone());
    let (out, digest) = rewrite(&mut r, &HashScope::all());
    assert_eq!(out, data);
    assert_eq!(digest, <[u8; 20]>::from(Sha1::digest(&data)));
}

#[test]
fn round_trip_over_odd_segments() {
    let data = meta_box();
    let segs = data.chunks(7).map(Segment::from).collect();
    let mut r = SegmentedReader::new(segs);
    let (out, _) = rewrite(&mut r, &HashScope::all());
    assert_eq!(out, data);
}

#[test]
fn round_trip_from_mapped_slices() {
    let data = meta_box();
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(&data).unwrap();
    f.flush().unwrap();

    let mut r = SegmentedReader::open_with_slice_size(f.path(), 100).unwrap();
    assert_eq!(r.size(), data.len() as u64);
    assert_eq!(r.segment_count(), data.len().div_ceil(100));
    let (out, _) = rewrite(&mut r, &HashScope::all());
    assert_eq!(out, data);

    let mut whole = SegmentedReader::open(f.path()).unwrap();
    assert_eq!(whole.segment_count(), 1);
    assert_eq!(whole.read_bytes(data.len()).unwrap(), data);
}

#[test]
fn empty_file_maps_to_empty_reader() {
    let f = tempfile::NamedTempFile::new().unwrap();
    let mut r = SegmentedReader::open(f.path()).unwrap();
    assert_eq!(r.size(), 0);
    assert_eq!(r.segment_count(), 0);
    let tree = parse_all(&mut r).unwrap();
    assert!(tree.boxes.is_empty());
}

#[test]
fn excluded_boxes_are_left_out_of_the_digest() {
    let data = meta_box();
    let mut r = SegmentedReader::from_bytes(data.clone());
    // hdlr spans 12..46
    let (out, digest) = rewrite(&mut r, &HashScope::new([FourCC(*b"hdlr")]));
    assert_eq!(out, data);
    let expected: [u8; 20] = Sha1::new().chain_update(&data[..12]).chain_update(&data[46..]).finalize().into();
    assert_eq!(digest, expected);
}

#[test]
fn excluding_a_container_skips_its_children() {
    let data = meta_box();
    let mut r = SegmentedReader::from_bytes(data.clone());
    // ilst spans 46..482; 'data' children inside must not resume hashing
    let scope = HashScope::new([FourCC(*b"ilst"), FourCC(*b"data")]);
    let (_, digest) = rewrite(&mut r, &scope);
    let expected: [u8; 20] = Sha1::new().chain_update(&data[..46]).chain_update(&data[482..]).finalize().into();
    assert_eq!(digest, expected);
}

#[test]
fn default_scope_excludes_mdri() {
    let mut data = Vec::new();
    for (typ, payload) in [(b"ftyp", &b"odcf"[..]), (b"mdri", &b"mutable"[..]), (b"odrm", &b"content"[..])] {
        data.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
        data.extend_from_slice(typ);
        data.extend_from_slice(payload);
    }
    let mut r = SegmentedReader::from_bytes(data.clone());
    let (out, digest) = rewrite(&mut r, &HashScope::default());
    assert_eq!(out, data);
    let expected: [u8; 20] = Sha1::new().chain_update(&data[..12]).chain_update(&data[27..]).finalize().into();
    assert_eq!(digest, expected);
}

#[test]
fn large_size_uuid_and_trailer_round_trip() {
    let mut data = Vec::new();
    // largesize box: 16-byte header + 4 payload
    data.extend_from_slice(&1u32.to_be_bytes());
    data.extend_from_slice(b"mdat");
    data.extend_from_slice(&20u64.to_be_bytes());
    data.extend_from_slice(&[1, 2, 3, 4]);
    // uuid box: 24-byte header + 2 payload
    data.extend_from_slice(&26u32.to_be_bytes());
    data.extend_from_slice(b"uuid");
    data.extend_from_slice(&[0x11; 16]);
    data.extend_from_slice(&[9, 9]);
    // udta with a 4-byte zero terminator after its only child
    data.extend_from_slice(&20u32.to_be_bytes());
    data.extend_from_slice(b"udta");
    data.extend_from_slice(&8u32.to_be_bytes());
    data.extend_from_slice(b"\xa9day");
    data.extend_from_slice(&[0, 0, 0, 0]);
    data.extend_from_slice(&[0xee, 0xee, 0xee]);

    let mut r = SegmentedReader::from_bytes(data.clone());
    let tree = parse_all(&mut r).unwrap();
    assert_eq!(tree.boxes.len(), 3);
    assert_eq!(tree.trailer, 3);
    assert!(tree.boxes[0].hdr.large_size);
    assert_eq!(tree.boxes[0].hdr.header_size, 16);
    assert_eq!(tree.boxes[1].hdr.uuid, Some([0x11; 16]));
    assert!(matches!(tree.boxes[2].kind, NodeKind::Container { trailer: 4, .. }));

    let (out, _) = rewrite(&mut r, &HashScope::all());
    assert_eq!(out, data);
}

#[test]
fn size_zero_box_extends_to_end() {
    let mut data = Vec::new();
    data.extend_from_slice(&0u32.to_be_bytes());
    data.extend_from_slice(b"mdat");
    data.extend_from_slice(&[5; 10]);
    let mut r = SegmentedReader::from_bytes(data.clone());
    let tree = parse_all(&mut r).unwrap();
    assert!(matches!(tree.boxes[0].kind, NodeKind::Leaf { data_offset: 8, data_len: 10 }));
    let (out, _) = rewrite(&mut r, &HashScope::all());
    assert_eq!(out, data);
}

#[test]
fn container_that_is_not_a_box_list_stays_opaque() {
    // 'moov' whose content claims a child larger than the parent
    let mut data = Vec::new();
    data.extend_from_slice(&16u32.to_be_bytes());
    data.extend_from_slice(b"moov");
    data.extend_from_slice(&64u32.to_be_bytes());
    data.extend_from_slice(b"trak");
    let mut r = SegmentedReader::from_bytes(data.clone());
    let tree = parse_all(&mut r).unwrap();
    assert!(matches!(tree.boxes[0].kind, NodeKind::Leaf { data_offset: 8, data_len: 8 }));
    let (out, _) = rewrite(&mut r, &HashScope::all());
    assert_eq!(out, data);
}

#[test]
fn truncated_largesize_child_stays_opaque_at_end_of_file() {
    // last box in the file: 'moov' whose child claims a 64-bit size it has no room for
    let mut data = Vec::new();
    data.extend_from_slice(&16u32.to_be_bytes());
    data.extend_from_slice(b"moov");
    data.extend_from_slice(&1u32.to_be_bytes());
    data.extend_from_slice(b"trak");

    let mut r = SegmentedReader::from_bytes(data.clone());
    let tree = parse_all(&mut r).unwrap();
    assert_eq!(tree.boxes.len(), 1);
    assert!(matches!(tree.boxes[0].kind, NodeKind::Leaf { data_offset: 8, data_len: 8 }));

    // same box followed by a sibling parses the same way
    let mut followed = data.clone();
    followed.extend_from_slice(&8u32.to_be_bytes());
    followed.extend_from_slice(b"free");
    let mut r2 = SegmentedReader::from_bytes(followed.clone());
    let tree2 = parse_all(&mut r2).unwrap();
    assert_eq!(tree2.boxes.len(), 2);
    assert!(matches!(tree2.boxes[0].kind, NodeKind::Leaf { data_offset: 8, data_len: 8 }));

    let (out, _) = rewrite(&mut r, &HashScope::all());
    assert_eq!(out, data);
}

#[test]
fn truncated_uuid_child_stays_opaque() {
    let mut data = Vec::new();
    data.extend_from_slice(&20u32.to_be_bytes());
    data.extend_from_slice(b"udta");
    data.extend_from_slice(&12u32.to_be_bytes());
    data.extend_from_slice(b"uuid");
    data.extend_from_slice(&[0xab; 4]);
    let mut r = SegmentedReader::from_bytes(data.clone());
    let tree = parse_all(&mut r).unwrap();
    assert!(matches!(tree.boxes[0].kind, NodeKind::Leaf { data_offset: 8, data_len: 12 }));
}

#[test]
fn oversized_largesize_child_stays_opaque() {
    let mut data = Vec::new();
    data.extend_from_slice(&24u32.to_be_bytes());
    data.extend_from_slice(b"moov");
    data.extend_from_slice(&1u32.to_be_bytes());
    data.extend_from_slice(b"trak");
    data.extend_from_slice(&[0xff; 8]);
    let mut r = SegmentedReader::from_bytes(data.clone());
    let tree = parse_all(&mut r).unwrap();
    assert!(matches!(tree.boxes[0].kind, NodeKind::Leaf { data_offset: 8, data_len: 16 }));
    let (out, _) = rewrite(&mut r, &HashScope::all());
    assert_eq!(out, data);
}

#[test]
fn parse_children_reads_a_payload_box_list() {
    let data = meta_box();
    let mut r = SegmentedReader::from_bytes(data.clone());
    // meta children start after the 8-byte header and 4-byte version/flags
    r.seek(12).unwrap();
    let kids = parse_children(&mut r, data.len() as u64).unwrap();
    let types: Vec<String> = kids.iter().map(|k| k.hdr.typ.to_string()).collect();
    assert_eq!(types, ["hdlr", "ilst", "free"]);
}

#[test]
fn parse_children_rejects_leftover_bytes() {
    let mut data = Vec::new();
    data.extend_from_slice(&8u32.to_be_bytes());
    data.extend_from_slice(b"free");
    data.extend_from_slice(&[0, 0, 0]);
    let mut r = SegmentedReader::from_bytes(data);
    assert!(matches!(
        parse_children(&mut r, 11),
        Err(isobuf::Error::InvalidBoxSize { offset: 8, size: 3 })
    ));
}

#[test]
fn largesize_header_past_end_of_reader_is_invalid() {
    let data = [1u32.to_be_bytes(), *b"mdat"].concat();
    let mut r = SegmentedReader::from_bytes(data);
    assert!(matches!(read_box_header(&mut r), Err(isobuf::Error::InvalidBoxSize { offset: 0, size: 1 })));
}

#[test]
fn header_smaller_than_itself_is_rejected() {
    let mut r = SegmentedReader::from_bytes([4u32.to_be_bytes(), *b"free"].concat());
    assert!(matches!(read_box_header(&mut r), Err(isobuf::Error::InvalidBoxSize { offset: 0, size: 4 })));
}

#[test]
fn fields_round_trip_through_writer_and_reader() {
    let mut w = HashingWriter::new(Vec::new(), false);
    w.write_fixed_16_16(1.5).unwrap();
    w.write_fixed_16_16(-320.25).unwrap();
    w.write_fixed_8_8(-0.5).unwrap();
    w.write_fixed_8_8(127.99609375).unwrap();
    w.write_iso639("eng").unwrap();
    w.write_cstring(Some("Beethoven")).unwrap();
    w.write_raw(Some("appl")).unwrap();
    w.write_uint(0x0102_0304_0506, 8).unwrap();

    let bytes = w.into_inner();
    assert_eq!(&bytes[12..14], &[0x15, 0xc7]);
    let mut r = SegmentedReader::new(bytes.chunks(3).map(Segment::from).collect());
    assert_eq!(r.read_fixed_16_16().unwrap(), 1.5);
    assert_eq!(r.read_fixed_16_16().unwrap(), -320.25);
    assert_eq!(r.read_fixed_8_8().unwrap(), -0.5);
    assert_eq!(r.read_fixed_8_8().unwrap(), 127.99609375);
    assert_eq!(r.read_iso639().unwrap(), "eng");
    assert_eq!(r.read_cstring().unwrap(), "Beethoven");
    assert_eq!(r.read_string(4).unwrap(), "appl");
    assert_eq!(r.read_u64().unwrap(), 0x0102_0304_0506);
    assert_eq!(r.remaining(), 0);
}

#[test]
fn unmappable_path_fails_with_io_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("entry"), b"x").unwrap();
    // a directory opens fine on Unix but cannot be mapped; give up if it reports no length
    if std::fs::metadata(dir.path()).unwrap().len() == 0 {
        return;
    }
    assert!(matches!(SegmentedReader::open(dir.path()), Err(isobuf::Error::Io(_))));
}

#[test]
fn missing_file_fails_with_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(SegmentedReader::open(dir.path().join("absent.mp4")), Err(isobuf::Error::Io(_))));
}
