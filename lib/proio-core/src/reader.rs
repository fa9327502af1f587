//! Bucket-parsing reader: walks a byte stream back into [`Event`]s,
//! resynchronizing past corruption and decompressing lazily.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use byteorder::{LittleEndian, ReadBytesExt};
use prost::Message as _;

use crate::codec::{self, BucketDecoder, Compression};
use crate::descriptor::DescriptorRegistry;
use crate::error::{ProioError, Result};
use crate::event::Event;
use crate::wire;
use crate::MAGIC_BYTES;

/// A snapshot of the bucket header currently in view, for tooling that
/// wants to report on bucket-level structure (`proio-summary`) without
/// reaching into wire types directly.
#[derive(Debug, Clone)]
pub struct BucketInfo {
    pub n_events: u64,
    pub compression: Compression,
    pub n_file_descriptors: usize,
}

struct ReaderState<R> {
    stream: R,
    bucket_header: Option<wire::BucketHeader>,
    metadata: BTreeMap<String, Vec<u8>>,
    bucket_reader: Option<BucketDecoder>,
    bucket_events_read: u64,
    bucket_index: u64,
    resynchronized: bool,
    registry: DescriptorRegistry,
    deferred_until_close: Vec<Box<dyn FnOnce() -> Result<()> + Send>>,
}

impl<R: Read> ReaderState<R> {
    fn sync_to_magic(&mut self) -> Result<Option<usize>> {
        let mut n_read = 0usize;
        let mut byte = [0u8; 1];
        loop {
            if self.stream.read(&mut byte)? == 0 {
                return if n_read == 0 {
                    Ok(None)
                } else {
                    Err(truncated_stream())
                };
            }
            n_read += 1;

            if byte[0] == MAGIC_BYTES[0] {
                let mut matched = true;
                for &expected in &MAGIC_BYTES[1..] {
                    if self.stream.read(&mut byte)? == 0 {
                        return Err(truncated_stream());
                    }
                    n_read += 1;
                    if byte[0] != expected {
                        matched = false;
                        break;
                    }
                }
                if matched {
                    return Ok(Some(n_read));
                }
            }
        }
    }

    /// Reads and parses the next bucket header. Returns `Ok(false)` on a
    /// clean end of stream (no bytes before the point a header would
    /// start), `Ok(true)` once `self.bucket_header` is populated.
    fn read_header(&mut self) -> Result<bool> {
        self.bucket_events_read = 0;
        self.bucket_header = None;
        self.bucket_reader = None;

        let n = match self.sync_to_magic()? {
            Some(n) => n,
            None => return Ok(false),
        };

        let header_size = self.stream.read_u32::<LittleEndian>()?;
        let mut header_buf = vec![0u8; header_size as usize];
        self.stream.read_exact(&mut header_buf)?;
        let header = wire::BucketHeader::decode(header_buf.as_slice())?;

        for (key, value) in &header.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
        for fd_bytes in &header.file_descriptor {
            self.registry.register_file(fd_bytes)?;
        }

        self.resynchronized = n != MAGIC_BYTES.len();
        if self.resynchronized {
            tracing::warn!(skipped_bytes = n - MAGIC_BYTES.len(), "resynchronized past corrupt stream bytes");
        }
        self.bucket_header = Some(header);
        Ok(true)
    }

    fn read_bucket(&mut self) -> Result<()> {
        let header = self
            .bucket_header
            .as_ref()
            .expect("read_bucket called without a parsed header");
        let mut bytes = vec![0u8; header.bucket_size as usize];
        self.stream.read_exact(&mut bytes)?;

        let comp_type = wire::bucket_header::CompType::try_from(header.compression).map_err(|_| {
            tracing::warn!(raw = header.compression, "bucket named an unrecognized compression type");
            ProioError::UnknownCompression
        })?;
        let compression = Compression::from_wire(comp_type).ok_or_else(|| {
            tracing::warn!(?comp_type, "bucket compression type not supported by this build");
            ProioError::UnknownCompression
        })?;
        self.bucket_reader = Some(BucketDecoder::new(compression, bytes)?);
        Ok(())
    }

    fn read_from_bucket(&mut self) -> Result<Option<Event>> {
        let mut event = None;
        while self.bucket_events_read <= self.bucket_index {
            let reader = self
                .bucket_reader
                .as_mut()
                .expect("read_from_bucket called without a loaded bucket");
            let len = reader.read_u32::<LittleEndian>()?;
            let mut buf = vec![0u8; len as usize];
            reader.read_exact(&mut buf)?;

            if self.bucket_events_read == self.bucket_index {
                let proto = wire::Event::decode(buf.as_slice())?;
                let mut ev = Event::from_proto(proto, self.registry.clone());
                for (key, value) in &self.metadata {
                    ev.metadata.insert(key.clone(), value.clone());
                }
                event = Some(ev);
            }
            self.bucket_events_read += 1;
        }
        self.bucket_index += 1;
        Ok(event)
    }

    fn skip_bucket_bytes(&mut self, n: u64) -> Result<()> {
        let mut remaining = n;
        let mut buf = [0u8; 8192];
        while remaining > 0 {
            let chunk = remaining.min(buf.len() as u64) as usize;
            self.stream.read_exact(&mut buf[..chunk])?;
            remaining -= chunk as u64;
        }
        Ok(())
    }

    fn skip(&mut self, n_events: u64) -> Result<u64> {
        let mut start_index = self.bucket_index;
        self.bucket_index += n_events;
        let mut n_skipped = 0u64;

        loop {
            let must_advance = match &self.bucket_header {
                None => true,
                Some(header) => self.bucket_index >= header.n_events,
            };
            if !must_advance {
                break;
            }

            if let Some(header) = self.bucket_header.clone() {
                let n_bucket_events = header.n_events;
                self.bucket_index -= n_bucket_events;
                n_skipped += n_bucket_events - start_index;

                if n_bucket_events > 0 && self.bucket_reader.is_none() {
                    self.skip_bucket_bytes(header.bucket_size)?;
                }
            }

            if !self.read_header()? {
                return Ok(n_skipped);
            }
            start_index = 0;
        }

        n_skipped += self.bucket_index - start_index;
        Ok(n_skipped)
    }

    fn next(&mut self) -> Result<Option<Event>> {
        self.skip(0)?;
        if self.bucket_header.is_none() {
            return Ok(None);
        }
        if self.bucket_reader.is_none() {
            self.read_bucket()?;
        }
        self.read_from_bucket()
    }

    fn current_bucket_info(&self) -> Option<BucketInfo> {
        let header = self.bucket_header.as_ref()?;
        let comp_type = wire::bucket_header::CompType::try_from(header.compression).ok()?;
        Some(BucketInfo {
            n_events: header.n_events,
            compression: Compression::from_wire(comp_type)?,
            n_file_descriptors: header.file_descriptor.len(),
        })
    }
}

impl<R: Read + Seek> ReaderState<R> {
    fn seek_to_start(&mut self) -> Result<()> {
        self.stream.seek(SeekFrom::Start(0)).map_err(|_| ProioError::StreamNotSeekable)?;
        self.metadata.clear();
        self.bucket_index = 0;
        self.bucket_events_read = 0;
        self.bucket_header = None;
        self.bucket_reader = None;
        self.read_header()?;
        Ok(())
    }
}

fn truncated_stream() -> ProioError {
    ProioError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "stream ended mid-magic while resynchronizing",
    ))
}

/// Reads [`Event`]s from a stream in the bucketed wire format.
///
/// Cheap to clone — clones share the same underlying stream and cursor
/// behind a mutex, so `scan_events` can run a background thread against
/// the same reader a caller is otherwise using for `skip`/`close`.
pub struct Reader<R> {
    inner: Arc<Mutex<ReaderState<R>>>,
    closed: Arc<AtomicBool>,
}

impl<R> Clone for Reader<R> {
    fn clone(&self) -> Self {
        Reader {
            inner: self.inner.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<R: Read> Reader<R> {
    pub fn new(stream: R) -> Self {
        Self::with_registry(stream, DescriptorRegistry::global())
    }

    pub fn with_registry(stream: R, registry: DescriptorRegistry) -> Self {
        Reader {
            inner: Arc::new(Mutex::new(ReaderState {
                stream,
                bucket_header: None,
                metadata: BTreeMap::new(),
                bucket_reader: None,
                bucket_events_read: 0,
                bucket_index: 0,
                resynchronized: false,
                registry,
                deferred_until_close: Vec::new(),
            })),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReaderState<R>> {
        self.inner.lock().expect("reader mutex poisoned")
    }

    /// Retrieves the next event, or `None` at a clean end of stream.
    pub fn next(&self) -> Result<Option<Event>> {
        self.lock().next()
    }

    /// Skips `n_events` events; the count actually skipped may be less at
    /// end of stream.
    pub fn skip(&self, n_events: u64) -> Result<u64> {
        self.lock().skip(n_events)
    }

    /// The union of every bucket's metadata seen so far; later buckets
    /// overwrite earlier ones per key.
    pub fn metadata(&self) -> BTreeMap<String, Vec<u8>> {
        self.lock().metadata.clone()
    }

    /// Whether the stream needed to resynchronize (skip corrupted bytes)
    /// to find the most recently parsed bucket header.
    pub fn resynchronized(&self) -> bool {
        self.lock().resynchronized
    }

    /// Summary of the bucket header currently in view, if any has been
    /// read yet.
    pub fn current_bucket_info(&self) -> Option<BucketInfo> {
        self.lock().current_bucket_info()
    }

    pub fn registry(&self) -> DescriptorRegistry {
        self.lock().registry.clone()
    }

    /// Registers a cleanup to run, in registration order, when `close` is
    /// called.
    pub fn defer_until_close(&self, cleanup: impl FnOnce() -> Result<()> + Send + 'static) {
        self.lock().deferred_until_close.push(Box::new(cleanup));
    }

    /// Marks the reader closed (stopping any in-flight `scan_events`) and
    /// runs deferred cleanups in registration order.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let cleanups = std::mem::take(&mut self.lock().deferred_until_close);
        for cleanup in cleanups {
            cleanup()?;
        }
        Ok(())
    }
}

impl<R: Read + Seek> Reader<R> {
    /// Seeks a seekable stream back to the start and re-reads its first
    /// bucket header.
    pub fn seek_to_start(&self) -> Result<()> {
        self.lock().seek_to_start()
    }
}

impl Reader<File> {
    /// Opens `path` read-only and wraps it in a new `Reader`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(file))
    }
}

/// An iterator of events fed by a background thread, bounded by a
/// fixed-size channel so a slow consumer applies backpressure to the
/// reader rather than buffering the whole stream in memory.
pub struct EventScan {
    rx: Receiver<Event>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EventScan {
    /// Signals the background thread to stop and waits for it to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Iterator for EventScan {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        self.rx.recv().ok()
    }
}

impl Drop for EventScan {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl<R: Read + Send + 'static> Reader<R> {
    /// Spawns one OS thread that pushes every remaining event into a
    /// channel of depth `buf_size`. The thread exits when the stream ends,
    /// `EventScan::stop` is called, or `Reader::close` is called.
    pub fn scan_events(&self, buf_size: usize) -> EventScan {
        let (tx, rx) = sync_channel(buf_size.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let reader = self.clone();

        let handle = std::thread::spawn(move || loop {
            if thread_stop.load(Ordering::SeqCst) || reader.closed.load(Ordering::SeqCst) {
                break;
            }
            match reader.next() {
                Ok(Some(event)) => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        });

        EventScan {
            rx,
            stop,
            handle: Some(handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;
    use proio_model_example::Particle;
    use std::io::Cursor;

    fn registry() -> DescriptorRegistry {
        let registry = DescriptorRegistry::new();
        registry
            .register_file_descriptor_set(proio_model_example::FILE_DESCRIPTOR_SET_BYTES)
            .unwrap();
        registry
    }

    fn write_n_particles(n: i32, registry: &DescriptorRegistry) -> Vec<u8> {
        let mut writer = Writer::with_registry(Vec::new(), registry.clone());
        for i in 0..n {
            let mut event = Event::with_registry(registry.clone());
            event.add_entry(
                "Particle",
                &Particle {
                    pdg: 11 + i,
                    ..Default::default()
                },
            );
            writer.push(&mut event).unwrap();
        }
        writer.flush().unwrap();
        writer.into_inner()
    }

    #[test]
    fn scan_events_yields_every_event_in_order() {
        let registry = registry();
        let bytes = write_n_particles(8, &registry);
        let reader = Reader::with_registry(Cursor::new(bytes), registry);

        let pdgs: Vec<i32> = reader
            .scan_events(1)
            .map(|event| {
                let id = event.tagged_entries("Particle")[0];
                let handle = event.get_entry(id).unwrap();
                let msg = handle.lock().unwrap();
                msg.get_field_by_number(3).unwrap().as_i32().unwrap()
            })
            .collect();

        assert_eq!(pdgs, vec![11, 12, 13, 14, 15, 16, 17, 18]);
    }

    #[test]
    fn skip_then_seek_to_start() {
        let registry = registry();
        let bytes = write_n_particles(8, &registry);
        let reader = Reader::with_registry(Cursor::new(bytes), registry);

        reader.skip(7).unwrap();
        let last = reader.next().unwrap().expect("8th event");
        let id = last.tagged_entries("Particle")[0];
        let pdg = last
            .get_entry(id)
            .unwrap()
            .lock()
            .unwrap()
            .get_field_by_number(3)
            .unwrap()
            .as_i32()
            .unwrap();
        assert_eq!(pdg, 18);

        reader.seek_to_start().unwrap();
        let first = reader.next().unwrap().expect("1st event");
        let id = first.tagged_entries("Particle")[0];
        let pdg = first
            .get_entry(id)
            .unwrap()
            .lock()
            .unwrap()
            .get_field_by_number(3)
            .unwrap()
            .as_i32()
            .unwrap();
        assert_eq!(pdg, 11);
    }

    #[test]
    fn next_past_end_of_stream_is_none() {
        let registry = registry();
        let bytes = write_n_particles(1, &registry);
        let reader = Reader::with_registry(Cursor::new(bytes), registry);

        assert!(reader.next().unwrap().is_some());
        assert!(reader.next().unwrap().is_none());
    }
}
