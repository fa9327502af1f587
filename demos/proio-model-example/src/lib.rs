//! Demo particle-physics schema for proio examples and integration tests.
//!
//! This crate plays the role of an external schema library: proio-core
//! never depends on it. It exists only so examples and tests have a
//! concrete, compiled message type to push through a `proio_core::Event`.

use once_cell::sync::Lazy;
use prost_reflect::DescriptorPool;

include!(concat!(env!("OUT_DIR"), "/proio.model.example.rs"));

/// Encoded `FileDescriptorSet` for this crate's messages, dependency-ordered.
/// Hand this to [`proio_core::DescriptorRegistry::register_file_descriptor_set`]
/// so a reader can decode `example.Particle`/`example.SimHit` entries without
/// linking this crate.
pub static FILE_DESCRIPTOR_SET_BYTES: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/proio_model_example.bin"));

pub static DESCRIPTOR_POOL: Lazy<DescriptorPool> = Lazy::new(|| {
    DescriptorPool::decode(FILE_DESCRIPTOR_SET_BYTES).expect("embedded file descriptor set is well-formed")
});
