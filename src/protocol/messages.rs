//! Message set codec.
//!
//! The unit of produce and fetch payloads is the message set: a
//! concatenation of length-prefixed messages, each CRC-protected.
//!
//! # Message Layout (format v1)
//!
//! ```text
//! offset        : i64
//! message_size  : i32   size of everything after this field
//! crc           : u32   over magic..value
//! magic         : i8    1
//! attributes    : i8    compression codec in the low bits
//! timestamp     : i64   -1 when unset
//! key           : bytes (i32 length, -1 null)
//! value         : bytes (i32 length, -1 null)
//! ```
//!
//! A compressed set is carried as the value of a single wrapper message
//! whose attributes name the codec. Inner offsets are relative (0..n-1)
//! and the wrapper carries the offset of the last inner message, so
//! decoding rebases inner offsets against the wrapper. Fetch responses
//! may truncate the final message mid-way; the partial tail is dropped.

use bytes::Bytes;

use crate::compression::CompressionCodec;
use crate::constants::{MESSAGE_MAGIC_V1, NO_TIMESTAMP};
use crate::error::{Error, KafkaCode, Result};

/// A decoded message from a fetched message set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub offset: i64,
    /// `-1` when the message carries no timestamp (format v0 or unset).
    pub timestamp: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

/// A record headed for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub timestamp: i64,
}

impl Record {
    pub fn new(key: Option<Bytes>, value: Option<Bytes>, timestamp: i64) -> Self {
        Self {
            key,
            value,
            timestamp,
        }
    }
}

/// Encode one v1 message at the given offset, computing its CRC.
fn encode_message(
    buffer: &mut Vec<u8>,
    offset: i64,
    attributes: i8,
    timestamp: i64,
    key: Option<&Bytes>,
    value: Option<&Bytes>,
) {
    // magic..value goes through the hasher, so build it first
    let mut body = Vec::with_capacity(
        10 + key.map(|k| k.len()).unwrap_or(0) + value.map(|v| v.len()).unwrap_or(0) + 8,
    );
    body.push(MESSAGE_MAGIC_V1 as u8);
    body.push(attributes as u8);
    body.extend_from_slice(&timestamp.to_be_bytes());
    put_nullable_bytes(&mut body, key);
    put_nullable_bytes(&mut body, value);

    let crc = crc32fast::hash(&body);

    buffer.extend_from_slice(&offset.to_be_bytes());
    buffer.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    buffer.extend_from_slice(&crc.to_be_bytes());
    buffer.extend_from_slice(&body);
}

fn put_nullable_bytes(buffer: &mut Vec<u8>, bytes: Option<&Bytes>) {
    match bytes {
        Some(b) => {
            buffer.extend_from_slice(&(b.len() as i32).to_be_bytes());
            buffer.extend_from_slice(b);
        }
        None => buffer.extend_from_slice(&(-1i32).to_be_bytes()),
    }
}

/// Encode a message set for a produce request.
///
/// Offsets are assigned 0..n-1; the broker replaces them on append. When
/// `codec` is set and the set holds at least `threshold` records, the
/// whole set is compressed and wrapped in a single carrier message whose
/// offset is the last relative offset.
pub fn encode_message_set(
    records: &[Record],
    codec: CompressionCodec,
    threshold: usize,
) -> Result<Bytes> {
    let mut set = Vec::new();
    for (index, record) in records.iter().enumerate() {
        encode_message(
            &mut set,
            index as i64,
            0,
            record.timestamp,
            record.key.as_ref(),
            record.value.as_ref(),
        );
    }

    if codec == CompressionCodec::None || records.len() < threshold {
        return Ok(Bytes::from(set));
    }

    let compressed = codec.compress(&set)?;
    let mut wrapped = Vec::with_capacity(compressed.len() + 34);
    encode_message(
        &mut wrapped,
        records.len().saturating_sub(1) as i64,
        codec.attributes(),
        NO_TIMESTAMP,
        None,
        Some(&compressed),
    );
    Ok(Bytes::from(wrapped))
}

/// Decode a fetched message set, verifying CRCs, decompressing nested
/// sets, and rebasing relative offsets. Messages come back strictly
/// ascending in offset.
pub fn parse_message_set(data: &[u8]) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    let mut pos = 0;

    while data.len() - pos >= 12 {
        let offset = read_i64(data, pos)?;
        let size = read_i32(data, pos + 8)?;
        if size < 0 {
            return Err(Error::Kafka(KafkaCode::InvalidMessageSize));
        }
        let size = size as usize;
        if data.len() - pos - 12 < size {
            // the broker cut the response at max_bytes; drop the tail
            break;
        }
        let body = &data[pos + 12..pos + 12 + size];
        pos += 12 + size;

        messages.extend(parse_message(offset, body)?);
    }

    Ok(messages)
}

/// Decode a single message body (everything after the size field).
/// A compressed carrier expands into its rebased inner messages.
fn parse_message(offset: i64, body: &[u8]) -> Result<Vec<Message>> {
    if body.len() < 6 {
        return Err(Error::MissingData("message body truncated".to_string()));
    }

    let stored_crc = read_i32(body, 0)? as u32;
    let computed_crc = crc32fast::hash(&body[4..]);
    if stored_crc != computed_crc {
        tracing::warn!(offset, stored_crc, computed_crc, "Message failed CRC check");
        return Err(Error::Kafka(KafkaCode::CorruptMessage));
    }

    let magic = body[4] as i8;
    let attributes = body[5] as i8;
    let mut pos = 6;

    let timestamp = if magic >= MESSAGE_MAGIC_V1 {
        let ts = read_i64(body, pos)?;
        pos += 8;
        ts
    } else {
        NO_TIMESTAMP
    };

    let (key, pos) = read_nullable_bytes(body, pos)?;
    let (value, _pos) = read_nullable_bytes(body, pos)?;

    let codec = CompressionCodec::from_attributes(attributes)?;
    if codec == CompressionCodec::None {
        return Ok(vec![Message {
            offset,
            timestamp,
            key,
            value,
        }]);
    }

    let inner_bytes = codec.decompress(value.as_deref().unwrap_or_default())?;
    let mut inner = parse_message_set(&inner_bytes)?;

    // The carrier's offset is the absolute offset of the last inner
    // message; inner offsets are relative. With pre-relative brokers the
    // inner offsets are already absolute and the base works out to zero.
    if let Some(last) = inner.last() {
        let base = offset - last.offset;
        if base != 0 {
            for message in &mut inner {
                message.offset += base;
            }
        }
    }

    Ok(inner)
}

fn read_i32(data: &[u8], pos: usize) -> Result<i32> {
    data.get(pos..pos + 4)
        .and_then(|slice| slice.try_into().ok())
        .map(i32::from_be_bytes)
        .ok_or_else(|| Error::MissingData("message field truncated".to_string()))
}

fn read_i64(data: &[u8], pos: usize) -> Result<i64> {
    data.get(pos..pos + 8)
        .and_then(|slice| slice.try_into().ok())
        .map(i64::from_be_bytes)
        .ok_or_else(|| Error::MissingData("message field truncated".to_string()))
}

fn read_nullable_bytes(data: &[u8], pos: usize) -> Result<(Option<Bytes>, usize)> {
    let length = read_i32(data, pos)?;
    let pos = pos + 4;

    if length == -1 {
        return Ok((None, pos));
    }
    if length < 0 {
        return Err(Error::Kafka(KafkaCode::InvalidMessageSize));
    }
    let length = length as usize;
    if data.len() < pos + length {
        return Err(Error::MissingData("byte field truncated".to_string()));
    }

    Ok((
        Some(Bytes::copy_from_slice(&data[pos..pos + length])),
        pos + length,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: Option<&str>, value: &str) -> Record {
        Record::new(
            key.map(|k| Bytes::copy_from_slice(k.as_bytes())),
            Some(Bytes::copy_from_slice(value.as_bytes())),
            NO_TIMESTAMP,
        )
    }

    #[test]
    fn test_encode_single_message_layout() {
        let set = encode_message_set(&[record(None, "hi")], CompressionCodec::None, 1).unwrap();

        // offset (8) + size (4) + crc (4) + magic (1) + attributes (1) +
        // timestamp (8) + null key (4) + value len (4) + "hi" (2) = 36
        assert_eq!(set.len(), 36);
        // offset = 0
        assert_eq!(&set[0..8], &0i64.to_be_bytes());
        // message_size = 24
        assert_eq!(&set[8..12], &24i32.to_be_bytes());
        // magic = 1
        assert_eq!(set[16], 1);
        // attributes = 0
        assert_eq!(set[17], 0);
        // key = null
        assert_eq!(&set[26..30], &(-1i32).to_be_bytes());
        // value = "hi"
        assert_eq!(&set[30..34], &2i32.to_be_bytes());
        assert_eq!(&set[34..36], b"hi");
    }

    #[test]
    fn test_round_trip_plain() {
        let records = vec![
            record(Some("k1"), "v1"),
            record(None, "v2"),
            record(Some("k3"), "v3"),
        ];
        let set = encode_message_set(&records, CompressionCodec::None, 1).unwrap();
        let messages = parse_message_set(&set).unwrap();

        assert_eq!(messages.len(), 3);
        for (i, message) in messages.iter().enumerate() {
            assert_eq!(message.offset, i as i64);
        }
        assert_eq!(messages[0].key, Some(Bytes::from("k1")));
        assert_eq!(messages[1].key, None);
        assert_eq!(messages[2].value, Some(Bytes::from("v3")));
    }

    #[test]
    fn test_round_trip_gzip() {
        let records: Vec<Record> = (0..10)
            .map(|i| record(Some("key"), &format!("value-{i}")))
            .collect();
        let set = encode_message_set(&records, CompressionCodec::Gzip, 1).unwrap();
        let messages = parse_message_set(&set).unwrap();

        assert_eq!(messages.len(), 10);
        for (i, message) in messages.iter().enumerate() {
            assert_eq!(message.offset, i as i64);
            assert_eq!(
                message.value,
                Some(Bytes::from(format!("value-{i}"))),
            );
        }
    }

    #[test]
    fn test_round_trip_snappy() {
        let records: Vec<Record> = (0..5).map(|i| record(None, &format!("v{i}"))).collect();
        let set = encode_message_set(&records, CompressionCodec::Snappy, 1).unwrap();
        let messages = parse_message_set(&set).unwrap();

        assert_eq!(messages.len(), 5);
        assert_eq!(messages[4].value, Some(Bytes::from("v4")));
    }

    #[test]
    fn test_compression_threshold_not_met() {
        let records = vec![record(None, "only one")];
        let set = encode_message_set(&records, CompressionCodec::Gzip, 2).unwrap();

        // Below the threshold the set goes out plain: attributes byte is 0.
        assert_eq!(set[17], 0);
        let messages = parse_message_set(&set).unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_compressed_wrapper_offset_is_last_relative() {
        let records: Vec<Record> = (0..4).map(|i| record(None, &format!("v{i}"))).collect();
        let set = encode_message_set(&records, CompressionCodec::Gzip, 1).unwrap();

        // wrapper is the only top-level message; its offset is 3
        assert_eq!(&set[0..8], &3i64.to_be_bytes());
        assert_eq!(set[17] & 0x07, 1);
    }

    #[test]
    fn test_nested_offsets_rebase_against_wrapper() {
        // Simulate what a broker returns: the wrapper patched to the
        // absolute offset of the last inner message.
        let records: Vec<Record> = (0..4).map(|i| record(None, &format!("v{i}"))).collect();
        let mut set = encode_message_set(&records, CompressionCodec::Gzip, 1)
            .unwrap()
            .to_vec();
        // Broker assigned offsets 100..103; wrapper carries 103.
        set[0..8].copy_from_slice(&103i64.to_be_bytes());

        let messages = parse_message_set(&set).unwrap();
        let offsets: Vec<i64> = messages.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![100, 101, 102, 103]);
    }

    #[test]
    fn test_corrupt_crc_detected() {
        let mut set = encode_message_set(&[record(None, "payload")], CompressionCodec::None, 1)
            .unwrap()
            .to_vec();
        let last = set.len() - 1;
        set[last] ^= 0xFF;

        assert_eq!(
            parse_message_set(&set).unwrap_err(),
            Error::Kafka(KafkaCode::CorruptMessage)
        );
    }

    #[test]
    fn test_partial_trailing_message_dropped() {
        let records = vec![record(None, "complete"), record(None, "cut off")];
        let set = encode_message_set(&records, CompressionCodec::None, 1).unwrap();

        // Chop into the second message the way a max_bytes-limited fetch does.
        let truncated = &set[..set.len() - 5];
        let messages = parse_message_set(truncated).unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].value, Some(Bytes::from("complete")));
    }

    #[test]
    fn test_empty_set() {
        assert!(parse_message_set(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_negative_message_size_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&0i64.to_be_bytes());
        data.extend_from_slice(&(-2i32).to_be_bytes());
        assert_eq!(
            parse_message_set(&data).unwrap_err(),
            Error::Kafka(KafkaCode::InvalidMessageSize)
        );
    }

    #[test]
    fn test_offsets_strictly_ascending() {
        let records: Vec<Record> = (0..20).map(|i| record(None, &format!("m{i}"))).collect();
        let set = encode_message_set(&records, CompressionCodec::None, 1).unwrap();
        let messages = parse_message_set(&set).unwrap();

        for pair in messages.windows(2) {
            assert!(pair[0].offset < pair[1].offset);
        }
    }
}
