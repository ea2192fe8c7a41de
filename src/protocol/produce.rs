//! Produce request encoding and response parsing.

use bytes::{BufMut, Bytes};
use nom::{
    IResult,
    number::complete::{be_i16, be_i32, be_i64},
};
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::constants::{API_KEY_PRODUCE, API_VERSION_PRODUCE};
use crate::encode::{ToByte, encode_as_array};
use crate::error::{KafkaCode, Result};
use crate::parser::{bytes_to_string, parse_array, parse_string};
use crate::protocol::HeaderRequest;

/// A produce request carrying pre-encoded message sets, grouped by topic
/// and partition. One request goes to one broker: the caller groups
/// partitions by leader before building it.
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub header: HeaderRequest,
    /// `-1` = all in-sync replicas, `0` = fire and forget, `1` = leader only.
    pub required_acks: i16,
    pub ack_timeout_ms: i32,
    pub topics: Vec<ProduceTopicRequest>,
}

#[derive(Debug, Clone)]
pub struct ProduceTopicRequest {
    pub name: String,
    pub partitions: Vec<ProducePartitionRequest>,
}

#[derive(Debug, Clone)]
pub struct ProducePartitionRequest {
    pub partition_index: i32,
    /// Encoded message set, compression already applied.
    pub message_set: Bytes,
}

impl ProduceRequest {
    pub fn new(
        correlation_id: i32,
        client_id: &str,
        required_acks: i16,
        ack_timeout_ms: i32,
        topics: Vec<ProduceTopicRequest>,
    ) -> Self {
        Self {
            header: HeaderRequest::new(
                API_KEY_PRODUCE,
                API_VERSION_PRODUCE,
                correlation_id,
                client_id,
            ),
            required_acks,
            ack_timeout_ms,
            topics,
        }
    }
}

impl ToByte for ProduceRequest {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.header.encode(buffer)?;
        self.required_acks.encode(buffer)?;
        self.ack_timeout_ms.encode(buffer)?;
        encode_as_array(buffer, &self.topics, |buffer, topic| {
            topic.name.encode(buffer)?;
            encode_as_array(buffer, &topic.partitions, |buffer, partition| {
                partition.partition_index.encode(buffer)?;
                partition.message_set.encode(buffer)
            })
        })
    }
}

/// Per-partition outcome of a produce request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducePartitionResponse {
    pub partition_index: i32,
    pub error_code: KafkaCode,
    pub base_offset: i64,
    /// Broker-assigned append time; `-1` under create-time semantics.
    pub log_append_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceTopicResponse {
    pub name: String,
    pub partitions: Vec<ProducePartitionResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceResponse {
    pub topics: Vec<ProduceTopicResponse>,
    pub throttle_time_ms: i32,
}

pub fn parse_produce_response(s: NomBytes) -> IResult<NomBytes, ProduceResponse> {
    let (s, topics) = parse_array(parse_topic_response)(s)?;
    let (s, throttle_time_ms) = be_i32(s)?;

    Ok((
        s,
        ProduceResponse {
            topics,
            throttle_time_ms,
        },
    ))
}

fn parse_topic_response(s: NomBytes) -> IResult<NomBytes, ProduceTopicResponse> {
    let (s, name) = parse_string(s)?;
    let (s, partitions) = parse_array(parse_partition_response)(s)?;

    Ok((
        s,
        ProduceTopicResponse {
            name: bytes_to_string(&name)?,
            partitions,
        },
    ))
}

fn parse_partition_response(s: NomBytes) -> IResult<NomBytes, ProducePartitionResponse> {
    let (s, partition_index) = be_i32(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, base_offset) = be_i64(s)?;
    let (s, log_append_time) = be_i64(s)?;

    Ok((
        s,
        ProducePartitionResponse {
            partition_index,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            base_offset,
            log_append_time,
        },
    ))
}
