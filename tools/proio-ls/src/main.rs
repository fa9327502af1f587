//! Lists the contents of a proio stream: for each event, the tags are
//! printed in alphabetical order followed by every entry carrying that tag
//! (an entry tagged more than once is printed once per tag).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use proio_core::Reader;

/// List the contents of a proio stream.
///
/// Tags are printed in alphabetical order, each followed by every entry
/// carrying that tag. By default all tags are shown; passing one or more
/// TAGS isolates those (or, with `-i`, everything else).
#[derive(Parser)]
#[command(name = "proio-ls", about, version)]
struct Args {
    /// Proio stream to read, or "-" for stdin
    input: PathBuf,

    /// Tags to isolate (or ignore, with -i); default is all tags
    tags: Vec<String>,

    /// Ignore the specified tags instead of isolating them
    #[arg(short = 'i', long)]
    ignore: bool,

    /// List only the event at this index, counted from 0
    #[arg(short = 'e', long, default_value_t = -1)]
    event: i64,

    /// Print metadata values as strings instead of byte counts
    #[arg(short = 'm', long)]
    metadata: bool,
}

fn open_input(path: &PathBuf) -> Result<Reader<Box<dyn Read + Send>>> {
    let stream: Box<dyn Read + Send> = if path.as_os_str() == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(path).with_context(|| format!("opening {}", path.display()))?)
    };
    Ok(Reader::new(stream))
}

fn print_metadata(metadata: &BTreeMap<String, Vec<u8>>, as_string: bool) {
    println!("========== META DATA ==========");
    for (key, bytes) in metadata {
        if as_string {
            println!("{key}: {}", String::from_utf8_lossy(bytes));
        } else {
            println!("{key}: {} bytes", bytes.len());
        }
    }
    println!();
}

fn apply_tag_filter(event: &mut proio_core::Event, tags: &[String], ignore: bool) {
    if ignore {
        for tag in tags {
            event.delete_tag(tag);
        }
    } else if !tags.is_empty() {
        for tag in event.tags() {
            if !tags.contains(&tag) {
                event.delete_tag(&tag);
            }
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let reader = open_input(&args.input)?;
    // Starts as an empty map, not absent, so a stream that never carries
    // metadata at all never prints a spurious empty block before event 0.
    let mut last_metadata: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let single_event = args.event >= 0;

    if single_event {
        let starting_event = args.event as u64;
        reader.skip(starting_event)?;
        if let Some(mut event) = reader.next()? {
            apply_tag_filter(&mut event, &args.tags, args.ignore);
            let metadata = event.metadata.clone();
            if last_metadata != metadata {
                print_metadata(&metadata, args.metadata);
                last_metadata = metadata;
            }
            println!("========== EVENT {starting_event} ==========");
            print!("{event}");
        }
    } else {
        let mut n_events_read = 0u64;
        for mut event in reader.scan_events(1) {
            apply_tag_filter(&mut event, &args.tags, args.ignore);
            let metadata = event.metadata.clone();
            if last_metadata != metadata {
                print_metadata(&metadata, args.metadata);
                last_metadata = metadata;
            }
            println!("========== EVENT {n_events_read} ==========");
            print!("{event}");
            n_events_read += 1;
        }
    }

    reader.close()?;
    Ok(())
}
