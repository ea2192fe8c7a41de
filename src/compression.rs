//! Message set compression codecs.
//!
//! A compressed message set travels as the value of a single wrapper
//! message whose attributes byte carries the codec id in its low bits.
//! The codec here is a plain `compress(bytes) -> bytes` /
//! `decompress(bytes) -> bytes` pair; the wrapping and unwrapping live in
//! the message set codec.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::{Error, Result};

/// Compression codec applied to produced message sets and recognized in
/// fetched ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionCodec {
    /// No compression.
    #[default]
    None,
    /// Gzip (codec id 1).
    Gzip,
    /// Snappy, raw block format (codec id 2).
    Snappy,
}

impl CompressionCodec {
    /// The codec id carried in a message's attributes byte.
    pub fn attributes(self) -> i8 {
        match self {
            CompressionCodec::None => 0,
            CompressionCodec::Gzip => 1,
            CompressionCodec::Snappy => 2,
        }
    }

    /// Decode the codec id from a message's attributes byte.
    pub fn from_attributes(attributes: i8) -> Result<Self> {
        match attributes & crate::constants::COMPRESSION_CODEC_MASK {
            0 => Ok(CompressionCodec::None),
            1 => Ok(CompressionCodec::Gzip),
            2 => Ok(CompressionCodec::Snappy),
            other => Err(Error::Config(format!(
                "unsupported compression codec id {other}"
            ))),
        }
    }

    /// Parse a codec name from configuration.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "none" => Ok(CompressionCodec::None),
            "gzip" => Ok(CompressionCodec::Gzip),
            "snappy" => Ok(CompressionCodec::Snappy),
            other => Err(Error::Config(format!(
                "unknown compression codec {other:?}, expected none, gzip, or snappy"
            ))),
        }
    }

    /// Compress a raw byte blob.
    pub fn compress(self, data: &[u8]) -> Result<Bytes> {
        match self {
            CompressionCodec::None => Ok(Bytes::copy_from_slice(data)),
            CompressionCodec::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(data)
                    .and_then(|_| encoder.finish())
                    .map(Bytes::from)
                    .map_err(Error::from)
            }
            CompressionCodec::Snappy => snap::raw::Encoder::new()
                .compress_vec(data)
                .map(Bytes::from)
                .map_err(|e| Error::MissingData(format!("snappy compression failed: {e}"))),
        }
    }

    /// Decompress a byte blob produced by [`compress`](Self::compress).
    pub fn decompress(self, data: &[u8]) -> Result<Bytes> {
        match self {
            CompressionCodec::None => Ok(Bytes::copy_from_slice(data)),
            CompressionCodec::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut decompressed = Vec::new();
                decoder
                    .read_to_end(&mut decompressed)
                    .map(|_| Bytes::from(decompressed))
                    .map_err(Error::from)
            }
            CompressionCodec::Snappy => snap::raw::Decoder::new()
                .decompress_vec(data)
                .map(Bytes::from)
                .map_err(|e| Error::MissingData(format!("snappy decompression failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_ids() {
        assert_eq!(CompressionCodec::None.attributes(), 0);
        assert_eq!(CompressionCodec::Gzip.attributes(), 1);
        assert_eq!(CompressionCodec::Snappy.attributes(), 2);
    }

    #[test]
    fn test_from_attributes_masks_high_bits() {
        // timestamp-type bit set alongside gzip
        assert_eq!(
            CompressionCodec::from_attributes(0x09).unwrap(),
            CompressionCodec::Gzip
        );
        assert_eq!(
            CompressionCodec::from_attributes(0x00).unwrap(),
            CompressionCodec::None
        );
    }

    #[test]
    fn test_from_attributes_rejects_unknown() {
        assert!(CompressionCodec::from_attributes(0x03).is_err());
        assert!(CompressionCodec::from_attributes(0x07).is_err());
    }

    #[test]
    fn test_from_name() {
        assert_eq!(
            CompressionCodec::from_name("gzip").unwrap(),
            CompressionCodec::Gzip
        );
        assert_eq!(
            CompressionCodec::from_name("snappy").unwrap(),
            CompressionCodec::Snappy
        );
        assert_eq!(
            CompressionCodec::from_name("none").unwrap(),
            CompressionCodec::None
        );
        assert!(CompressionCodec::from_name("lz4").is_err());
    }

    #[test]
    fn test_gzip_round_trip() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let compressed = CompressionCodec::Gzip.compress(&payload).unwrap();
        assert!(compressed.len() < payload.len());
        let restored = CompressionCodec::Gzip.decompress(&compressed).unwrap();
        assert_eq!(restored, Bytes::from(payload));
    }

    #[test]
    fn test_snappy_round_trip() {
        let payload = b"aaaaaaaaaabbbbbbbbbbccccccccccdddddddddd".repeat(10);
        let compressed = CompressionCodec::Snappy.compress(&payload).unwrap();
        assert!(compressed.len() < payload.len());
        let restored = CompressionCodec::Snappy.decompress(&compressed).unwrap();
        assert_eq!(restored, Bytes::from(payload));
    }

    #[test]
    fn test_none_is_identity() {
        let payload = b"untouched";
        let compressed = CompressionCodec::None.compress(payload).unwrap();
        assert_eq!(compressed, Bytes::from_static(payload));
        let restored = CompressionCodec::None.decompress(&compressed).unwrap();
        assert_eq!(restored, Bytes::from_static(payload));
    }

    #[test]
    fn test_gzip_empty_payload() {
        let compressed = CompressionCodec::Gzip.compress(b"").unwrap();
        let restored = CompressionCodec::Gzip.decompress(&compressed).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_decompress_garbage_fails() {
        assert!(CompressionCodec::Gzip.decompress(b"not gzip").is_err());
        assert!(
            CompressionCodec::Snappy
                .decompress(&[0xFF, 0xFF, 0xFF, 0xFF])
                .is_err()
        );
    }
}
