//! Bucket-accumulating writer: batches serialized events into compressed,
//! magic-prefixed buckets and flushes them to an underlying byte sink.

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use prost::Message as _;

use crate::codec::{self, Compression};
use crate::descriptor::DescriptorRegistry;
use crate::error::{ProioError, Result};
use crate::event::Event;
use crate::wire;
use crate::{DEFAULT_BUCKET_DUMP_THRESHOLD, MAGIC_BYTES};

/// Writes [`Event`]s into a stream in the bucketed wire format.
///
/// Not internally synchronized — wrap in a `Mutex` if shared across
/// threads. Each `Writer` tracks which descriptor files it has already
/// emitted, so repeated entries of a type already described on the stream
/// don't re-send their schema.
pub struct Writer<W: Write> {
    stream: W,
    bucket: Vec<u8>,
    header: wire::BucketHeader,
    compression: Compression,
    level: i32,
    bucket_dump_threshold: usize,
    registry: DescriptorRegistry,
    written_files: HashSet<String>,
    committed_metadata: std::collections::BTreeMap<String, Vec<u8>>,
    deferred_until_close: Vec<Box<dyn FnOnce() -> Result<()>>>,
}

impl<W: Write> Writer<W> {
    /// Wraps an existing sink. Entries are resolved against the global
    /// descriptor registry; use [`Writer::with_registry`] for an isolated
    /// one.
    pub fn new(stream: W) -> Self {
        Self::with_registry(stream, DescriptorRegistry::global())
    }

    pub fn with_registry(stream: W, registry: DescriptorRegistry) -> Self {
        Writer {
            stream,
            bucket: Vec::new(),
            header: wire::BucketHeader {
                compression: wire::bucket_header::CompType::Gzip as i32,
                ..Default::default()
            },
            compression: Compression::Gzip,
            level: codec::LEVEL_DEFAULT,
            bucket_dump_threshold: DEFAULT_BUCKET_DUMP_THRESHOLD,
            registry,
            written_files: HashSet::new(),
            committed_metadata: std::collections::BTreeMap::new(),
            deferred_until_close: Vec::new(),
        }
    }

    /// May be called even after writing some events; takes effect on the
    /// next bucket flushed. Errors if the build lacks the `lzma` feature.
    pub fn set_compression(&mut self, compression: Compression) -> Result<()> {
        if !compression.is_supported() {
            return Err(ProioError::LzmaNotSupported);
        }
        self.compression = compression;
        self.header.compression = compression.to_wire() as i32;
        Ok(())
    }

    /// Sets the codec's compression level; `LEVEL_DEFAULT` defers to the
    /// codec's own default.
    pub fn set_compression_level(&mut self, level: i32) {
        self.level = level;
    }

    pub fn set_bucket_dump_threshold(&mut self, bytes: usize) {
        self.bucket_dump_threshold = bytes;
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    /// Registers a cleanup to run (in registration order) when the writer
    /// is closed, after the final flush.
    pub fn defer_until_close(&mut self, cleanup: impl FnOnce() -> Result<()> + 'static) {
        self.deferred_until_close.push(Box::new(cleanup));
    }

    /// Serializes `event` onto the pending bucket. Once this returns,
    /// further mutation of `event` has no effect on the output stream.
    pub fn push(&mut self, event: &mut Event) -> Result<()> {
        for (key, value) in event.metadata.clone() {
            if self.committed_metadata.get(&key) != Some(&value) {
                self.push_metadata(key.clone(), value.clone())?;
                self.committed_metadata.insert(key, value);
            }
        }

        event.flush_cache();
        let event_proto = event.to_proto();
        let mut encoded = Vec::with_capacity(event_proto.encoded_len());
        event_proto.encode(&mut encoded)?;

        let mut new_file_bytes = Vec::new();
        for type_name in &event_proto.r#type {
            if let Some(descriptor) = self.registry.lookup_by_type_name(type_name) {
                self.collect_new_files(&descriptor.parent_file(), &mut new_file_bytes);
            }
        }
        if !new_file_bytes.is_empty() {
            self.flush()?;
            self.header.file_descriptor.extend(new_file_bytes);
        }

        self.bucket.write_u32::<LittleEndian>(encoded.len() as u32)?;
        self.bucket.write_all(&encoded)?;
        self.header.n_events += 1;

        if self.bucket.len() > self.bucket_dump_threshold {
            self.flush()?;
        }

        Ok(())
    }

    fn collect_new_files(&mut self, file: &prost_reflect::FileDescriptor, out: &mut Vec<Vec<u8>>) {
        if self.written_files.contains(file.name()) {
            return;
        }
        for dep in file.dependencies() {
            self.collect_new_files(&dep, out);
        }
        self.written_files.insert(file.name().to_string());
        out.push(file.file_descriptor_proto().encode_to_vec());
    }

    /// Forces a flush, then records `(name, data)` as metadata on the next
    /// bucket. Idempotent with an identical value already committed.
    pub fn push_metadata(&mut self, name: String, data: Vec<u8>) -> Result<()> {
        self.flush()?;
        self.header.metadata.insert(name, data);
        Ok(())
    }

    /// Compresses and writes any pending bucket contents. A no-op if
    /// nothing is pending.
    pub fn flush(&mut self) -> Result<()> {
        if self.bucket.is_empty() {
            return Ok(());
        }

        let body = codec::encode(self.compression, self.level, &self.bucket)?;
        tracing::debug!(
            n_events = self.header.n_events,
            bucket_bytes = body.len(),
            compression = ?self.compression,
            "flushing bucket"
        );

        let mut header = self.header.clone();
        header.bucket_size = body.len() as u64;
        let mut header_bytes = Vec::with_capacity(header.encoded_len());
        header.encode(&mut header_bytes)?;

        let mut frame = Vec::with_capacity(MAGIC_BYTES.len() + 4 + header_bytes.len() + body.len());
        frame.extend_from_slice(&MAGIC_BYTES);
        frame.write_u32::<LittleEndian>(header_bytes.len() as u32)?;
        frame.extend_from_slice(&header_bytes);
        frame.extend_from_slice(&body);

        self.stream.write_all(&frame)?;

        self.header.n_events = 0;
        self.header.metadata.clear();
        self.header.file_descriptor.clear();
        self.bucket.clear();

        Ok(())
    }

    /// Flushes, then runs every deferred cleanup in registration order.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        for cleanup in std::mem::take(&mut self.deferred_until_close) {
            cleanup()?;
        }
        Ok(())
    }

    /// Unwraps the writer, discarding any unflushed bucket contents.
    /// Callers that need those bytes written should call [`Writer::flush`]
    /// first.
    pub fn into_inner(self) -> W {
        self.stream
    }
}

impl Writer<File> {
    /// Creates (truncating) `path` and wraps it in a new `Writer`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;
    use proio_model_example::Particle;
    use std::io::Cursor;

    fn registry() -> DescriptorRegistry {
        let registry = DescriptorRegistry::new();
        registry
            .register_file_descriptor_set(proio_model_example::FILE_DESCRIPTOR_SET_BYTES)
            .unwrap();
        registry
    }

    #[test]
    fn push_then_flush_round_trips_through_reader() {
        let registry = registry();
        let mut writer = Writer::with_registry(Vec::new(), registry.clone());

        let mut event = Event::with_registry(registry.clone());
        event.add_entry(
            "Particle",
            &Particle {
                pdg: 443,
                ..Default::default()
            },
        );
        writer.push(&mut event).unwrap();
        writer.flush().unwrap();

        let reader = Reader::with_registry(Cursor::new(writer.into_inner()), registry);
        let read_event = reader.next().unwrap().expect("one event");
        assert_eq!(read_event.tagged_entries("Particle").len(), 1);
    }

    #[test]
    fn metadata_change_forces_a_flush() {
        let registry = registry();
        let mut writer = Writer::with_registry(Vec::new(), registry.clone());

        let mut event = Event::with_registry(registry.clone());
        event.metadata.insert("run".into(), vec![1]);
        event.add_entry("Particle", &Particle::default());
        writer.push(&mut event).unwrap();

        assert!(writer.bucket.is_empty(), "metadata push should have flushed already");
    }

    #[test]
    fn set_compression_to_lzma_without_feature_errors() {
        let mut writer = Writer::with_registry(Vec::new(), registry());
        let result = writer.set_compression(Compression::Lzma);
        if cfg!(feature = "lzma") {
            assert!(result.is_ok());
        } else {
            assert!(result.is_err());
        }
    }
}
