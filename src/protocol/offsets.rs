//! Offset APIs: ListOffsets, OffsetCommit, OffsetFetch.
//!
//! ListOffsets resolves symbolic targets (`earliest` / `latest`) against a
//! partition leader; OffsetCommit and OffsetFetch talk to the group
//! coordinator about consumer progress.

use bytes::BufMut;
use nom::{
    IResult,
    number::complete::{be_i16, be_i32, be_i64},
};
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::constants::{
    API_KEY_OFFSET_COMMIT, API_KEY_OFFSET_FETCH, API_KEY_OFFSETS, API_VERSION_OFFSET_COMMIT,
    API_VERSION_OFFSET_FETCH, API_VERSION_OFFSETS,
};
use crate::encode::{ToByte, encode_as_array};
use crate::error::{KafkaCode, Result};
use crate::parser::{
    bytes_to_string, bytes_to_string_opt, parse_array, parse_nullable_string, parse_string,
};
use crate::protocol::HeaderRequest;

const CONSUMER_REPLICA_ID: i32 = -1;

// ============================================================================
// ListOffsets
// ============================================================================

/// Offset lookup for a single partition against its leader.
#[derive(Debug, Clone)]
pub struct ListOffsetsRequest {
    pub header: HeaderRequest,
    pub topic: String,
    pub partition_index: i32,
    /// `-2` = earliest, `-1` = latest, otherwise a timestamp in ms.
    pub target: i64,
}

impl ListOffsetsRequest {
    pub fn new(
        correlation_id: i32,
        client_id: &str,
        topic: &str,
        partition_index: i32,
        target: i64,
    ) -> Self {
        Self {
            header: HeaderRequest::new(
                API_KEY_OFFSETS,
                API_VERSION_OFFSETS,
                correlation_id,
                client_id,
            ),
            topic: topic.to_string(),
            partition_index,
            target,
        }
    }
}

impl ToByte for ListOffsetsRequest {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.header.encode(buffer)?;
        CONSUMER_REPLICA_ID.encode(buffer)?;
        1i32.encode(buffer)?; // one topic
        self.topic.encode(buffer)?;
        1i32.encode(buffer)?; // one partition
        self.partition_index.encode(buffer)?;
        self.target.encode(buffer)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsPartitionResponse {
    pub partition_index: i32,
    pub error_code: KafkaCode,
    pub timestamp: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsTopicResponse {
    pub name: String,
    pub partitions: Vec<ListOffsetsPartitionResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsResponse {
    pub topics: Vec<ListOffsetsTopicResponse>,
}

pub fn parse_list_offsets_response(s: NomBytes) -> IResult<NomBytes, ListOffsetsResponse> {
    let (s, topics) = parse_array(parse_list_offsets_topic)(s)?;
    Ok((s, ListOffsetsResponse { topics }))
}

fn parse_list_offsets_topic(s: NomBytes) -> IResult<NomBytes, ListOffsetsTopicResponse> {
    let (s, name) = parse_string(s)?;
    let (s, partitions) = parse_array(parse_list_offsets_partition)(s)?;

    Ok((
        s,
        ListOffsetsTopicResponse {
            name: bytes_to_string(&name)?,
            partitions,
        },
    ))
}

fn parse_list_offsets_partition(s: NomBytes) -> IResult<NomBytes, ListOffsetsPartitionResponse> {
    let (s, partition_index) = be_i32(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, timestamp) = be_i64(s)?;
    let (s, offset) = be_i64(s)?;

    Ok((
        s,
        ListOffsetsPartitionResponse {
            partition_index,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            timestamp,
            offset,
        },
    ))
}

// ============================================================================
// OffsetCommit
// ============================================================================

/// Commit processed offsets to the group coordinator, tagged with the
/// member's current `(member_id, generation_id)`.
#[derive(Debug, Clone)]
pub struct OffsetCommitRequest {
    pub header: HeaderRequest,
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
    /// `-1` defers to the broker's configured offset retention.
    pub retention_time_ms: i64,
    pub topics: Vec<OffsetCommitTopicRequest>,
}

#[derive(Debug, Clone)]
pub struct OffsetCommitTopicRequest {
    pub name: String,
    pub partitions: Vec<OffsetCommitPartitionRequest>,
}

#[derive(Debug, Clone)]
pub struct OffsetCommitPartitionRequest {
    pub partition_index: i32,
    pub offset: i64,
    pub metadata: Option<String>,
}

impl OffsetCommitRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        correlation_id: i32,
        client_id: &str,
        group_id: &str,
        generation_id: i32,
        member_id: &str,
        retention_time_ms: i64,
        topics: Vec<OffsetCommitTopicRequest>,
    ) -> Self {
        Self {
            header: HeaderRequest::new(
                API_KEY_OFFSET_COMMIT,
                API_VERSION_OFFSET_COMMIT,
                correlation_id,
                client_id,
            ),
            group_id: group_id.to_string(),
            generation_id,
            member_id: member_id.to_string(),
            retention_time_ms,
            topics,
        }
    }
}

impl ToByte for OffsetCommitRequest {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.header.encode(buffer)?;
        self.group_id.encode(buffer)?;
        self.generation_id.encode(buffer)?;
        self.member_id.encode(buffer)?;
        self.retention_time_ms.encode(buffer)?;
        encode_as_array(buffer, &self.topics, |buffer, topic| {
            topic.name.encode(buffer)?;
            encode_as_array(buffer, &topic.partitions, |buffer, partition| {
                partition.partition_index.encode(buffer)?;
                partition.offset.encode(buffer)?;
                partition.metadata.encode(buffer)
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitPartitionResponse {
    pub partition_index: i32,
    pub error_code: KafkaCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitTopicResponse {
    pub name: String,
    pub partitions: Vec<OffsetCommitPartitionResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitResponse {
    pub topics: Vec<OffsetCommitTopicResponse>,
}

pub fn parse_offset_commit_response(s: NomBytes) -> IResult<NomBytes, OffsetCommitResponse> {
    let (s, topics) = parse_array(parse_offset_commit_topic)(s)?;
    Ok((s, OffsetCommitResponse { topics }))
}

fn parse_offset_commit_topic(s: NomBytes) -> IResult<NomBytes, OffsetCommitTopicResponse> {
    let (s, name) = parse_string(s)?;
    let (s, partitions) = parse_array(parse_offset_commit_partition)(s)?;

    Ok((
        s,
        OffsetCommitTopicResponse {
            name: bytes_to_string(&name)?,
            partitions,
        },
    ))
}

fn parse_offset_commit_partition(s: NomBytes) -> IResult<NomBytes, OffsetCommitPartitionResponse> {
    let (s, partition_index) = be_i32(s)?;
    let (s, error_code) = be_i16(s)?;

    Ok((
        s,
        OffsetCommitPartitionResponse {
            partition_index,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
        },
    ))
}

// ============================================================================
// OffsetFetch
// ============================================================================

/// Fetch committed offsets for a set of partitions from the coordinator.
#[derive(Debug, Clone)]
pub struct OffsetFetchRequest {
    pub header: HeaderRequest,
    pub group_id: String,
    pub topics: Vec<OffsetFetchTopicRequest>,
}

#[derive(Debug, Clone)]
pub struct OffsetFetchTopicRequest {
    pub name: String,
    pub partitions: Vec<i32>,
}

impl OffsetFetchRequest {
    pub fn new(
        correlation_id: i32,
        client_id: &str,
        group_id: &str,
        topics: Vec<OffsetFetchTopicRequest>,
    ) -> Self {
        Self {
            header: HeaderRequest::new(
                API_KEY_OFFSET_FETCH,
                API_VERSION_OFFSET_FETCH,
                correlation_id,
                client_id,
            ),
            group_id: group_id.to_string(),
            topics,
        }
    }
}

impl ToByte for OffsetFetchRequest {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.header.encode(buffer)?;
        self.group_id.encode(buffer)?;
        encode_as_array(buffer, &self.topics, |buffer, topic| {
            topic.name.encode(buffer)?;
            topic.partitions.as_slice().encode(buffer)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetFetchPartitionResponse {
    pub partition_index: i32,
    /// `-1` when no offset has been committed for the partition.
    pub offset: i64,
    pub metadata: Option<String>,
    pub error_code: KafkaCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetFetchTopicResponse {
    pub name: String,
    pub partitions: Vec<OffsetFetchPartitionResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetFetchResponse {
    pub topics: Vec<OffsetFetchTopicResponse>,
}

pub fn parse_offset_fetch_response(s: NomBytes) -> IResult<NomBytes, OffsetFetchResponse> {
    let (s, topics) = parse_array(parse_offset_fetch_topic)(s)?;
    Ok((s, OffsetFetchResponse { topics }))
}

fn parse_offset_fetch_topic(s: NomBytes) -> IResult<NomBytes, OffsetFetchTopicResponse> {
    let (s, name) = parse_string(s)?;
    let (s, partitions) = parse_array(parse_offset_fetch_partition)(s)?;

    Ok((
        s,
        OffsetFetchTopicResponse {
            name: bytes_to_string(&name)?,
            partitions,
        },
    ))
}

fn parse_offset_fetch_partition(s: NomBytes) -> IResult<NomBytes, OffsetFetchPartitionResponse> {
    let (s, partition_index) = be_i32(s)?;
    let (s, offset) = be_i64(s)?;
    let (s, metadata) = parse_nullable_string(s)?;
    let (s, error_code) = be_i16(s)?;

    Ok((
        s,
        OffsetFetchPartitionResponse {
            partition_index,
            offset,
            metadata: bytes_to_string_opt(metadata)?,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_list_offsets_request_encode() {
        let request = ListOffsetsRequest::new(2, "cli", "t", 0, -1);
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();

        // header (13) + replica_id (4) + topics_len (4) + name (2+1) +
        // partitions_len (4) + index (4) + target (8) = 40
        assert_eq!(buf.len(), 40);
        // target = -1 (latest) at the tail
        assert_eq!(&buf[32..40], &(-1i64).to_be_bytes());
    }

    #[test]
    fn test_list_offsets_response_round_trip() {
        let mut buf = Vec::new();
        1i32.encode(&mut buf).unwrap();
        "t".encode(&mut buf).unwrap();
        1i32.encode(&mut buf).unwrap();
        0i32.encode(&mut buf).unwrap();
        (KafkaCode::None as i16).encode(&mut buf).unwrap();
        (-1i64).encode(&mut buf).unwrap();
        512i64.encode(&mut buf).unwrap();

        let input = NomBytes::new(Bytes::from(buf));
        let (_, response) = parse_list_offsets_response(input).unwrap();

        assert_eq!(response.topics[0].partitions[0].offset, 512);
    }

    #[test]
    fn test_offset_commit_request_encode() {
        let request = OffsetCommitRequest::new(
            4,
            "cli",
            "grp",
            3,
            "member-1",
            -1,
            vec![OffsetCommitTopicRequest {
                name: "t".to_string(),
                partitions: vec![OffsetCommitPartitionRequest {
                    partition_index: 0,
                    offset: 100,
                    metadata: None,
                }],
            }],
        );

        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();

        // header (13) + group (2+3) + generation (4) + member (2+8) +
        // retention (8) + topics_len (4) + name (2+1) + partitions_len (4) +
        // index (4) + offset (8) + metadata_null (2) = 65
        assert_eq!(buf.len(), 65);
        // generation right after group_id
        assert_eq!(&buf[18..22], &3i32.to_be_bytes());
    }

    #[test]
    fn test_offset_commit_response_round_trip() {
        let mut buf = Vec::new();
        1i32.encode(&mut buf).unwrap();
        "t".encode(&mut buf).unwrap();
        1i32.encode(&mut buf).unwrap();
        0i32.encode(&mut buf).unwrap();
        (KafkaCode::IllegalGeneration as i16).encode(&mut buf).unwrap();

        let input = NomBytes::new(Bytes::from(buf));
        let (_, response) = parse_offset_commit_response(input).unwrap();

        assert_eq!(
            response.topics[0].partitions[0].error_code,
            KafkaCode::IllegalGeneration
        );
    }

    #[test]
    fn test_offset_fetch_request_encode() {
        let request = OffsetFetchRequest::new(
            6,
            "cli",
            "grp",
            vec![OffsetFetchTopicRequest {
                name: "t".to_string(),
                partitions: vec![0, 1],
            }],
        );

        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();

        // header (13) + group (2+3) + topics_len (4) + name (2+1) +
        // partitions array (4 + 8) = 37
        assert_eq!(buf.len(), 37);
    }

    #[test]
    fn test_offset_fetch_response_round_trip() {
        let mut buf = Vec::new();
        1i32.encode(&mut buf).unwrap();
        "t".encode(&mut buf).unwrap();
        2i32.encode(&mut buf).unwrap();
        0i32.encode(&mut buf).unwrap();
        100i64.encode(&mut buf).unwrap();
        Option::<String>::None.encode(&mut buf).unwrap();
        (KafkaCode::None as i16).encode(&mut buf).unwrap();
        2i32.encode(&mut buf).unwrap();
        (-1i64).encode(&mut buf).unwrap();
        Option::<String>::None.encode(&mut buf).unwrap();
        (KafkaCode::None as i16).encode(&mut buf).unwrap();

        let input = NomBytes::new(Bytes::from(buf));
        let (_, response) = parse_offset_fetch_response(input).unwrap();

        let partitions = &response.topics[0].partitions;
        assert_eq!(partitions[0].offset, 100);
        // no committed offset comes back as -1
        assert_eq!(partitions[1].offset, -1);
    }
}
