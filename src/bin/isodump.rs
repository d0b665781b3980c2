use anyhow::Context;
use clap::{ArgAction, Parser};
use isobuf::{
    boxes::{BoxHeader, BoxRef, FourCC, NodeKind},
    tree::{HashScope, find_box, parse_all, write_tree},
    util::{hex_dump, read_slice, same_content},
    HashingWriter, SegmentedReader,
};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(version, about = "ISO-BMFF raw box tree dumper and byte-exact rewriter")]
struct Args {
    /// MP4/ISOBMFF file path
    path: String,

    /// Emit JSON instead of human-readable tree
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Limit recursion depth (for text output)
    #[arg(long, default_value_t = 64)]
    max_depth: usize,

    /// Dump raw payload of the first box with this 4CC
    #[arg(long = "raw")]
    raw: Option<String>,

    /// Bytes to show when dumping raw (0 means entire payload)
    #[arg(long, default_value_t = 0)]
    bytes: u64,

    /// Re-encode the box tree into this file
    #[arg(long = "rewrite")]
    rewrite: Option<String>,

    /// Print the SHA-1 of the re-encoded stream
    #[arg(long, action = ArgAction::SetTrue)]
    sha1: bool,

    /// Box types left out of the hash, with their children (default: mdri)
    #[arg(long = "exclude")]
    exclude: Vec<String>,
}

#[derive(Serialize)]
struct JsonBox {
    offset: u64,
    size: u64,
    header_size: u64,
    typ: String,
    uuid: Option<String>,
    kind: &'static str,
    payload_offset: Option<u64>,
    payload_size: Option<u64>,
    children: Option<Vec<JsonBox>>,
}

fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("isobuf=info")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args = Args::parse();
    let mut r = SegmentedReader::open(&args.path).with_context(|| format!("opening {}", args.path))?;
    let tree = parse_all(&mut r)?;

    if args.json {
        let json: Vec<JsonBox> = tree.boxes.iter().map(to_json).collect();
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        for b in &tree.boxes {
            print_box(b, 0, args.max_depth);
        }
        if tree.trailer > 0 {
            println!("({} trailing bytes)", tree.trailer);
        }
    }

    if let Some(sel) = &args.raw {
        let typ = FourCC::from_str(sel).with_context(|| format!("{sel:?} is not a 4CC"))?;
        let b = find_box(&tree.boxes, &typ).with_context(|| format!("no '{sel}' box"))?;
        let (off, len) = payload_region(b);
        let len = if args.bytes == 0 { len } else { len.min(args.bytes) };
        let data = read_slice(&mut r, off, len)?;
        print!("{}", hex_dump(&data, off));
    }

    if args.rewrite.is_some() || args.sha1 {
        let scope = if args.exclude.is_empty() {
            HashScope::default()
        } else {
            let types = args
                .exclude
                .iter()
                .map(|s| FourCC::from_str(s).with_context(|| format!("{s:?} is not a 4CC")))
                .collect::<anyhow::Result<Vec<_>>>()?;
            HashScope::new(types)
        };

        let sink: Box<dyn Write> = match &args.rewrite {
            Some(out) => Box::new(BufWriter::new(
                File::create(out).with_context(|| format!("creating {out}"))?,
            )),
            None => Box::new(std::io::sink()),
        };
        let mut w = HashingWriter::new(sink, args.sha1);
        write_tree(&mut w, &mut r, &tree, &scope)?;
        w.flush()?;

        let written = w.position();
        let digest = w.finalize_hash();
        drop(w);

        if let Some(out) = &args.rewrite {
            let mut copy = SegmentedReader::open(out).with_context(|| format!("reopening {out}"))?;
            let verdict = if same_content(&mut r, &mut copy)? { "identical to input" } else { "differs from input" };
            println!("wrote {written} bytes to {out} ({verdict})");
        }
        if let Some(digest) = digest {
            println!("sha1 {}", hex::encode(digest));
        }
    }

    Ok(())
}

fn print_box(b: &BoxRef, depth: usize, max_depth: usize) {
    let indent = "  ".repeat(depth);
    let hdr = &b.hdr;
    match &b.kind {
        NodeKind::Leaf { .. } => {
            println!("{indent}{:>6} {:>10} {}", format!("{:#x}", hdr.start), hdr.size, display_type(hdr));
        }
        NodeKind::Container { children, .. } => {
            println!(
                "{indent}{:>6} {:>10} {} (container)",
                format!("{:#x}", hdr.start),
                hdr.size,
                display_type(hdr)
            );
            if depth < max_depth {
                for c in children {
                    print_box(c, depth + 1, max_depth);
                }
            }
        }
    }
}

fn display_type(h: &BoxHeader) -> String {
    match &h.uuid {
        Some(u) => format!("uuid:{}", hex::encode(u)),
        None => h.typ.to_string(),
    }
}

fn payload_region(b: &BoxRef) -> (u64, u64) {
    let off = b.hdr.payload_offset();
    (off, b.end() - off)
}

fn to_json(b: &BoxRef) -> JsonBox {
    let (kind, payload, children) = match &b.kind {
        NodeKind::Leaf { data_offset, data_len } => ("leaf", Some((*data_offset, *data_len)), None),
        NodeKind::Container { children, .. } => ("container", None, Some(children.iter().map(to_json).collect())),
    };
    JsonBox {
        offset: b.hdr.start,
        size: b.end() - b.hdr.start,
        header_size: b.hdr.header_size,
        typ: b.hdr.typ.to_string(),
        uuid: b.hdr.uuid.map(hex::encode),
        kind,
        payload_offset: payload.map(|p| p.0),
        payload_size: payload.map(|p| p.1),
        children,
    }
}
