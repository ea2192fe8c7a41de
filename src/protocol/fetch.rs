//! Fetch request encoding and response parsing.

use bytes::{BufMut, Bytes};
use nom::{
    IResult,
    number::complete::{be_i16, be_i32, be_i64},
};
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::constants::{API_KEY_FETCH, API_VERSION_FETCH};
use crate::encode::{ToByte, encode_as_array};
use crate::error::{KafkaCode, Result};
use crate::parser::{bytes_to_string, parse_array, parse_bytes, parse_string};
use crate::protocol::HeaderRequest;

/// Replica id sent by ordinary consumers. Only brokers fetching as
/// followers send a real id.
const CONSUMER_REPLICA_ID: i32 = -1;

/// A fetch request for one or more partitions led by a single broker.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub header: HeaderRequest,
    pub max_wait_ms: i32,
    pub min_bytes: i32,
    pub topics: Vec<FetchTopicRequest>,
}

#[derive(Debug, Clone)]
pub struct FetchTopicRequest {
    pub name: String,
    pub partitions: Vec<FetchPartitionRequest>,
}

#[derive(Debug, Clone)]
pub struct FetchPartitionRequest {
    pub partition_index: i32,
    pub fetch_offset: i64,
    pub max_bytes: i32,
}

impl FetchRequest {
    pub fn new(
        correlation_id: i32,
        client_id: &str,
        max_wait_ms: i32,
        min_bytes: i32,
        topics: Vec<FetchTopicRequest>,
    ) -> Self {
        Self {
            header: HeaderRequest::new(API_KEY_FETCH, API_VERSION_FETCH, correlation_id, client_id),
            max_wait_ms,
            min_bytes,
            topics,
        }
    }
}

impl ToByte for FetchRequest {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.header.encode(buffer)?;
        CONSUMER_REPLICA_ID.encode(buffer)?;
        self.max_wait_ms.encode(buffer)?;
        self.min_bytes.encode(buffer)?;
        encode_as_array(buffer, &self.topics, |buffer, topic| {
            topic.name.encode(buffer)?;
            encode_as_array(buffer, &topic.partitions, |buffer, partition| {
                partition.partition_index.encode(buffer)?;
                partition.fetch_offset.encode(buffer)?;
                partition.max_bytes.encode(buffer)
            })
        })
    }
}

/// Per-partition slice of a fetch response. The record set is left as
/// raw bytes; decoding (CRC checks, decompression) happens in the fetch
/// engine so a corrupt partition fails alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPartitionResponse {
    pub partition_index: i32,
    pub error_code: KafkaCode,
    pub high_watermark: i64,
    pub record_set: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTopicResponse {
    pub name: String,
    pub partitions: Vec<FetchPartitionResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub throttle_time_ms: i32,
    pub topics: Vec<FetchTopicResponse>,
}

pub fn parse_fetch_response(s: NomBytes) -> IResult<NomBytes, FetchResponse> {
    let (s, throttle_time_ms) = be_i32(s)?;
    let (s, topics) = parse_array(parse_topic_response)(s)?;

    Ok((
        s,
        FetchResponse {
            throttle_time_ms,
            topics,
        },
    ))
}

fn parse_topic_response(s: NomBytes) -> IResult<NomBytes, FetchTopicResponse> {
    let (s, name) = parse_string(s)?;
    let (s, partitions) = parse_array(parse_partition_response)(s)?;

    Ok((
        s,
        FetchTopicResponse {
            name: bytes_to_string(&name)?,
            partitions,
        },
    ))
}

fn parse_partition_response(s: NomBytes) -> IResult<NomBytes, FetchPartitionResponse> {
    let (s, partition_index) = be_i32(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, high_watermark) = be_i64(s)?;
    let (s, record_set) = parse_bytes(s)?;

    Ok((
        s,
        FetchPartitionResponse {
            partition_index,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            high_watermark,
            record_set,
        },
    ))
}
