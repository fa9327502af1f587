//! Streaming, self-describing, schema-evolvable event container format.
//!
//! Producers build up [`Event`]s (a bag of tagged, type-named entries) and
//! hand them to a [`Writer`], which batches them into compressed, magic-
//! prefixed buckets on a byte stream. A [`Reader`] walks the same stream
//! back into `Event`s, resolving each entry's type through a process-wide
//! [`DescriptorRegistry`] so a consumer never needs to link against the
//! producer's message types to read what it wrote.

mod codec;
mod descriptor;
mod error;
mod event;
mod reader;
mod wire;
mod writer;

pub use codec::{Compression, LEVEL_DEFAULT};
pub use descriptor::DescriptorRegistry;
pub use error::{DecodeFailure, ProioError, Result};
pub use event::Event;
pub use reader::{EventScan, Reader};
pub use writer::Writer;

/// Opens every bucket on the wire: `0xE1 0xC1` followed by fourteen zero
/// bytes. Chosen to be vanishingly unlikely to occur inside a compressed
/// bucket body, so a reader can resynchronize after stream corruption by
/// scanning for it.
pub(crate) const MAGIC_BYTES: [u8; 16] = [0xe1, 0xc1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

/// Default bucket size, in bytes of uncompressed event data, at which a
/// [`Writer`] flushes automatically.
pub(crate) const DEFAULT_BUCKET_DUMP_THRESHOLD: usize = 0x100_0000;
