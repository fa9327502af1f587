//! Generated wire types for the envelope and bucket header.
//!
//! These schemas are fixed by the format itself, so they're compiled in at
//! build time rather than loaded through the reflection registry — only
//! entry payloads need [`crate::descriptor::DescriptorRegistry`].

#![allow(clippy::doc_markdown)]

include!(concat!(env!("OUT_DIR"), "/proio.core.rs"));
