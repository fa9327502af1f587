//! Codec shim: a uniform `{encode, decode}` wrapper over every bucket
//! compression algorithm the format knows about.
//!
//! Mirrors the way `vector`'s `lib/file-source` wraps a raw file reader in
//! `Box<dyn BufRead>`, swapping in a `flate2::bufread::MultiGzDecoder` when
//! the underlying file turns out to be gzipped — the bucket reader does the
//! same thing one level up, picking the concrete decompressor based on the
//! header's `compression` field and handing callers back a boxed `Read`.

use std::io::{self, Read, Write};

use crate::error::{ProioError, Result};
use crate::wire;

/// Compression algorithm for a bucket body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    None,
    Gzip,
    Lz4,
    Lzma,
}

impl Compression {
    pub(crate) fn to_wire(self) -> wire::bucket_header::CompType {
        match self {
            Compression::None => wire::bucket_header::CompType::None,
            Compression::Gzip => wire::bucket_header::CompType::Gzip,
            Compression::Lz4 => wire::bucket_header::CompType::Lz4,
            Compression::Lzma => wire::bucket_header::CompType::Lzma,
        }
    }

    pub(crate) fn from_wire(c: wire::bucket_header::CompType) -> Option<Self> {
        match c {
            wire::bucket_header::CompType::None => Some(Compression::None),
            wire::bucket_header::CompType::Gzip => Some(Compression::Gzip),
            wire::bucket_header::CompType::Lz4 => Some(Compression::Lz4),
            wire::bucket_header::CompType::Lzma => Some(Compression::Lzma),
        }
    }

    /// Whether this build can actually decode/encode this algorithm.
    pub fn is_supported(self) -> bool {
        match self {
            Compression::Lzma => cfg!(feature = "lzma"),
            _ => true,
        }
    }
}

/// "Library default" compression level sentinel used by [`crate::Writer`].
pub const LEVEL_DEFAULT: i32 = -1;

/// Compresses `data` under `compression`, returning the bytes to place in a
/// bucket body. `level` of [`LEVEL_DEFAULT`] means "let the codec pick".
pub fn encode(compression: Compression, level: i32, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let flate_level = if level >= 0 {
                flate2::Compression::new(level as u32)
            } else {
                flate2::Compression::default()
            };
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate_level);
            encoder
                .write_all(data)
                .map_err(|e| ProioError::Codec(e.to_string()))?;
            encoder.finish().map_err(|e| ProioError::Codec(e.to_string()))
        }
        Compression::Lz4 => {
            let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
            encoder
                .write_all(data)
                .map_err(|e| ProioError::Codec(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| ProioError::Codec(e.to_string()))
        }
        Compression::Lzma => encode_lzma(level, data),
    }
}

#[cfg(feature = "lzma")]
fn encode_lzma(level: i32, data: &[u8]) -> Result<Vec<u8>> {
    let preset = if level >= 0 { level as u32 } else { 6 };
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), preset);
    encoder
        .write_all(data)
        .map_err(|e| ProioError::Codec(e.to_string()))?;
    encoder.finish().map_err(|e| ProioError::Codec(e.to_string()))
}

#[cfg(not(feature = "lzma"))]
fn encode_lzma(_level: i32, _data: &[u8]) -> Result<Vec<u8>> {
    Err(ProioError::LzmaNotSupported)
}

/// A boxed, single-bucket decompression stream.
///
/// The original reader resets its gzip/lz4 decompressor in place across
/// buckets to reuse internal buffers; here each bucket gets a fresh decoder
/// over its own owned compressed-byte buffer instead, which is simpler and
/// has no observable effect on the event sequence produced (see DESIGN.md).
pub struct BucketDecoder {
    inner: Box<dyn Read + Send>,
}

impl BucketDecoder {
    pub fn new(compression: Compression, data: Vec<u8>) -> Result<Self> {
        let inner: Box<dyn Read + Send> = match compression {
            Compression::None => Box::new(io::Cursor::new(data)),
            Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(io::Cursor::new(data))),
            Compression::Lz4 => Box::new(lz4_flex::frame::FrameDecoder::new(io::Cursor::new(data))),
            Compression::Lzma => return new_lzma_decoder(data),
        };
        Ok(Self { inner })
    }
}

#[cfg(feature = "lzma")]
fn new_lzma_decoder(data: Vec<u8>) -> Result<BucketDecoder> {
    Ok(BucketDecoder {
        inner: Box::new(xz2::read::XzDecoder::new(io::Cursor::new(data))),
    })
}

#[cfg(not(feature = "lzma"))]
fn new_lzma_decoder(_data: Vec<u8>) -> Result<BucketDecoder> {
    Err(ProioError::UnknownCompression)
}

impl Read for BucketDecoder {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_round_trips() {
        let data = b"hello proio".to_vec();
        let encoded = encode(Compression::None, LEVEL_DEFAULT, &data).unwrap();
        let mut decoder = BucketDecoder::new(Compression::None, encoded).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn gzip_round_trips() {
        let data = vec![7u8; 4096];
        let encoded = encode(Compression::Gzip, LEVEL_DEFAULT, &data).unwrap();
        assert_ne!(encoded, data);
        let mut decoder = BucketDecoder::new(Compression::Gzip, encoded).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn lz4_round_trips() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(16);
        let encoded = encode(Compression::Lz4, LEVEL_DEFAULT, &data).unwrap();
        let mut decoder = BucketDecoder::new(Compression::Lz4, encoded).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[cfg(feature = "lzma")]
    #[test]
    fn lzma_round_trips() {
        let data = b"particle physics events compress well".repeat(8);
        let encoded = encode(Compression::Lzma, LEVEL_DEFAULT, &data).unwrap();
        let mut decoder = BucketDecoder::new(Compression::Lzma, encoded).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[cfg(not(feature = "lzma"))]
    #[test]
    fn lzma_without_feature_is_unsupported() {
        assert!(!Compression::Lzma.is_supported());
        assert!(encode(Compression::Lzma, LEVEL_DEFAULT, b"x").is_err());
    }
}
