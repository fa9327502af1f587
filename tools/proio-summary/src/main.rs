//! Prints per-compression bucket counts and descriptor totals for a proio
//! stream, without decoding a single event.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use prost::Message as _;

use proio_core::{Compression, Reader};

/// Print bucket- and descriptor-level statistics for a proio stream.
#[derive(Parser)]
#[command(name = "proio-summary", about, version)]
struct Args {
    /// Proio stream to read, or "-" for stdin
    input: PathBuf,

    /// Print each registered FileDescriptorProto
    #[arg(short = 'f', long)]
    print_file_descriptors: bool,
}

fn open_input(path: &PathBuf) -> Result<Reader<Box<dyn Read + Send>>> {
    let stream: Box<dyn Read + Send> = if path.as_os_str() == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(path).with_context(|| format!("opening {}", path.display()))?)
    };
    Ok(Reader::new(stream))
}

#[derive(Default)]
struct BucketCounts {
    none: u64,
    gzip: u64,
    lz4: u64,
    lzma: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let reader = open_input(&args.input)?;
    let mut counts = BucketCounts::default();
    let mut n_events = 0u64;
    let mut n_file_descriptors = 0usize;

    reader.skip(0)?;
    while let Some(info) = reader.current_bucket_info() {
        match info.compression {
            Compression::None => counts.none += 1,
            Compression::Gzip => counts.gzip += 1,
            Compression::Lz4 => counts.lz4 += 1,
            Compression::Lzma => counts.lzma += 1,
        }
        n_events += info.n_events;
        n_file_descriptors += info.n_file_descriptors;
        reader.skip(info.n_events)?;
    }

    println!("Number of LZMA buckets: {}", counts.lzma);
    println!("Number of LZ4 buckets: {}", counts.lz4);
    println!("Number of GZIP buckets: {}", counts.gzip);
    println!("Number of uncompressed buckets: {}", counts.none);
    println!("Number of events: {n_events}");
    println!("Number of FileDescriptorProtos: {n_file_descriptors}");

    if args.print_file_descriptors {
        println!();
        // Dependency-first registration order, not hash order, so a
        // descriptor never prints before a file it depends on.
        for bytes in reader.registry().all_file_descriptor_bytes() {
            match prost_types::FileDescriptorProto::decode(bytes.as_slice()) {
                Ok(proto) => println!("{proto:#?}"),
                Err(err) => eprintln!("failed to decode a registered descriptor: {err}"),
            }
        }
    }

    reader.close()?;
    Ok(())
}
