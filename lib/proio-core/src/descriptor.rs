//! Process-wide schema descriptor store.
//!
//! A reader built without the entry types' originating schema crate can
//! still walk an event's fields, because every bucket carries the
//! `FileDescriptorProto` bytes its entries need. Decoding those bytes into
//! something queryable is exactly what `prost-reflect`'s `DescriptorPool` +
//! `DynamicMessage` give us, so the registry is a thin, thread-safe wrapper
//! around one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use prost::Message;
use prost_reflect::{DescriptorPool, FileDescriptor, MessageDescriptor};
use prost_types::{FileDescriptorProto, FileDescriptorSet};

use crate::error::{ProioError, Result};

struct Inner {
    pool: DescriptorPool,
    /// Raw bytes of each registered file, keyed by file name, in
    /// registration order — this is what gets replayed into a bucket
    /// header's `file_descriptor` list.
    files: IndexMap<String, Vec<u8>>,
}

/// A handle to a shared descriptor pool.
///
/// Cloning is cheap; clones refer to the same underlying pool. Every
/// [`crate::Event`] holds one, defaulting to [`DescriptorRegistry::global`]
/// so that independently-constructed events can still interoperate.
#[derive(Clone)]
pub struct DescriptorRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl Default for DescriptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                pool: DescriptorPool::new(),
                files: IndexMap::new(),
            })),
        }
    }

    /// The process-wide default registry, shared by every `Event` that
    /// doesn't ask for an isolated one.
    pub fn global() -> Self {
        static GLOBAL: Lazy<DescriptorRegistry> = Lazy::new(DescriptorRegistry::new);
        GLOBAL.clone()
    }

    /// Registers a single `FileDescriptorProto`'s encoded bytes, adding any
    /// dependencies already known to this registry. Re-registering the same
    /// file name with byte-identical content is a no-op; registering it
    /// with different content is a [`ProioError::DescriptorConflict`].
    pub fn register_file(&self, file_descriptor_proto: &[u8]) -> Result<()> {
        let proto = FileDescriptorProto::decode(file_descriptor_proto)
            .map_err(|e| ProioError::BadDescriptor(e.to_string()))?;
        self.register_proto(proto)
    }

    /// Registers every file in a `FileDescriptorSet`, in the order given.
    /// Callers (the [`crate::Writer`]/[`crate::Reader`] bucket header path)
    /// are expected to have already ordered the set so dependencies precede
    /// their dependents.
    pub fn register_file_descriptor_set(&self, encoded: &[u8]) -> Result<()> {
        let set = FileDescriptorSet::decode(encoded)
            .map_err(|e| ProioError::BadDescriptor(e.to_string()))?;
        for proto in set.file {
            self.register_proto(proto)?;
        }
        Ok(())
    }

    fn register_proto(&self, proto: FileDescriptorProto) -> Result<()> {
        let name = proto
            .name
            .clone()
            .ok_or_else(|| ProioError::BadDescriptor("file descriptor missing name".into()))?;
        let bytes = proto.encode_to_vec();

        let mut inner = self.inner.lock().expect("descriptor registry poisoned");
        if let Some(existing) = inner.files.get(&name) {
            if existing == &bytes {
                return Ok(());
            }
            return Err(ProioError::DescriptorConflict(name));
        }

        let set = FileDescriptorSet { file: vec![proto] };
        inner
            .pool
            .add_file_descriptor_set(set)
            .map_err(|e| ProioError::BadDescriptor(e.to_string()))?;
        inner.files.insert(name, bytes);
        Ok(())
    }

    /// Looks up a fully-qualified message type name (e.g.
    /// `"example.Particle"`), returning `None` if no registered file
    /// declares it.
    pub fn lookup_by_type_name(&self, type_name: &str) -> Option<MessageDescriptor> {
        let inner = self.inner.lock().expect("descriptor registry poisoned");
        inner.pool.get_message_by_name(type_name)
    }

    /// Looks up a registered file by its name (e.g.
    /// `"example/particle.proto"`), returning `None` if it hasn't been
    /// registered.
    pub fn lookup_by_file_name(&self, name: &str) -> Option<FileDescriptor> {
        let inner = self.inner.lock().expect("descriptor registry poisoned");
        inner.pool.get_file_by_name(name)
    }

    /// Whether a file with this name has already been registered.
    pub fn has_file(&self, file_name: &str) -> bool {
        let inner = self.inner.lock().expect("descriptor registry poisoned");
        inner.files.contains_key(file_name)
    }

    /// Every registered file's raw `FileDescriptorProto` bytes, in
    /// registration (dependency-first) order — what a bucket header's
    /// `file_descriptor` field should contain.
    pub fn all_file_descriptor_bytes(&self) -> Vec<Vec<u8>> {
        let inner = self.inner.lock().expect("descriptor registry poisoned");
        inner.files.values().cloned().collect()
    }

    /// Registration order as a name -> bytes map, mainly for tooling that
    /// wants to print what a bucket carried.
    pub fn file_map(&self) -> HashMap<String, Vec<u8>> {
        let inner = self.inner.lock().expect("descriptor registry poisoned");
        inner.files.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}
