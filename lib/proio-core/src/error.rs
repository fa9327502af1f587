use std::fmt;

/// Errors surfaced by the proio engine.
///
/// `Stream-EOF` and `Stream-resync` from the format's error taxonomy are
/// deliberately *not* variants here: EOF is represented as `Ok(None)` from
/// [`crate::Reader::next`]/[`crate::Reader::read_header`], and resync is a
/// flag ([`crate::Reader::resynchronized`], cleared and re-set on every
/// bucket header parsed) rather than a fault, per the taxonomy's own
/// description of both as non-fatal, distinguished values rather than
/// errors.
#[derive(thiserror::Error, Debug)]
pub enum ProioError {
    /// Underlying stream I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A bucket header or event envelope could not be parsed.
    #[error("failed to decode: {0}")]
    Decode(#[from] prost::DecodeError),

    /// A value could not be encoded onto the wire.
    #[error("failed to encode: {0}")]
    Encode(#[from] prost::EncodeError),

    /// The compressor/decompressor reported a failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// The bucket header named a compression algorithm this build does not
    /// implement (or that was built without its cargo feature, e.g. `lzma`).
    #[error("unknown bucket compression type")]
    UnknownCompression,

    /// `add_serialized_entry` was given descriptor bytes that don't parse,
    /// or that don't declare the named message type.
    #[error("bad descriptor: {0}")]
    BadDescriptor(String),

    /// Two `FileDescriptorProto`s were registered under the same file name
    /// with divergent content.
    #[error("descriptor for file {0:?} already registered with different content")]
    DescriptorConflict(String),

    /// `Reader::seek_to_start` was called on a non-seekable source.
    #[error("stream not seekable")]
    StreamNotSeekable,

    /// `Writer::set_compression(Lzma)` was called in a build without the
    /// `lzma` feature.
    #[error("LZMA support was not compiled into this build")]
    LzmaNotSupported,
}

pub type Result<T> = std::result::Result<T, ProioError>;

/// Returned by [`crate::Event::add_serialized_entry`] failure paths that
/// still need to report *which* descriptor/type was at fault without
/// aborting the whole program; kept distinct from [`ProioError`] because
/// callers are expected to match on it directly rather than propagate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub id: u64,
    pub type_name: String,
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failure to unmarshal entry {} with type {}",
            self.id, self.type_name
        )
    }
}
