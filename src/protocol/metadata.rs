//! TopicMetadata request encoding and response parsing.

use bytes::BufMut;
use nom::{
    IResult,
    number::complete::{be_i8, be_i16, be_i32},
};
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::constants::{API_KEY_METADATA, API_VERSION_METADATA};
use crate::encode::ToByte;
use crate::error::{Error, KafkaCode, Result};
use crate::parser::{bytes_to_string, bytes_to_string_opt, parse_array, parse_nullable_string, parse_string};
use crate::protocol::HeaderRequest;

/// Metadata request for a set of topics.
///
/// The topic list must be non-empty: an empty list asks the broker for
/// every topic in the cluster, which is never what a client with target
/// topics wants and can be enormous.
#[derive(Debug, Clone)]
pub struct MetadataRequest {
    pub header: HeaderRequest,
    pub topics: Vec<String>,
}

impl MetadataRequest {
    pub fn new(correlation_id: i32, client_id: &str, topics: Vec<String>) -> Result<Self> {
        if topics.is_empty() {
            return Err(Error::Config(
                "metadata request requires at least one topic".to_string(),
            ));
        }
        Ok(Self {
            header: HeaderRequest::new(
                API_KEY_METADATA,
                API_VERSION_METADATA,
                correlation_id,
                client_id,
            ),
            topics,
        })
    }
}

impl ToByte for MetadataRequest {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.header.encode(buffer)?;
        self.topics.as_slice().encode(buffer)?;
        Ok(())
    }
}

/// One broker entry of a metadata response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMetadata {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

/// Per-partition leadership and replication info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub error_code: KafkaCode,
    pub partition_index: i32,
    pub leader_id: i32,
    pub replicas: Vec<i32>,
    pub in_sync_replicas: Vec<i32>,
}

/// Per-topic metadata: partition list plus a topic-level error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub error_code: KafkaCode,
    pub name: String,
    pub is_internal: bool,
    pub partitions: Vec<PartitionMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataResponse {
    pub brokers: Vec<BrokerMetadata>,
    pub controller_id: i32,
    pub topics: Vec<TopicMetadata>,
}

pub fn parse_metadata_response(s: NomBytes) -> IResult<NomBytes, MetadataResponse> {
    let (s, brokers) = parse_array(parse_broker)(s)?;
    let (s, controller_id) = be_i32(s)?;
    let (s, topics) = parse_array(parse_topic)(s)?;

    Ok((
        s,
        MetadataResponse {
            brokers,
            controller_id,
            topics,
        },
    ))
}

fn parse_broker(s: NomBytes) -> IResult<NomBytes, BrokerMetadata> {
    let (s, node_id) = be_i32(s)?;
    let (s, host) = parse_string(s)?;
    let (s, port) = be_i32(s)?;
    let (s, rack) = parse_nullable_string(s)?;

    Ok((
        s,
        BrokerMetadata {
            node_id,
            host: bytes_to_string(&host)?,
            port,
            rack: bytes_to_string_opt(rack)?,
        },
    ))
}

fn parse_topic(s: NomBytes) -> IResult<NomBytes, TopicMetadata> {
    let (s, error_code) = be_i16(s)?;
    let (s, name) = parse_string(s)?;
    let (s, is_internal) = be_i8(s)?;
    let (s, partitions) = parse_array(parse_partition)(s)?;

    Ok((
        s,
        TopicMetadata {
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            name: bytes_to_string(&name)?,
            is_internal: is_internal != 0,
            partitions,
        },
    ))
}

fn parse_partition(s: NomBytes) -> IResult<NomBytes, PartitionMetadata> {
    let (s, error_code) = be_i16(s)?;
    let (s, partition_index) = be_i32(s)?;
    let (s, leader_id) = be_i32(s)?;
    let (s, replicas) = parse_array(be_i32)(s)?;
    let (s, in_sync_replicas) = parse_array(be_i32)(s)?;

    Ok((
        s,
        PartitionMetadata {
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            partition_index,
            leader_id,
            replicas,
            in_sync_replicas,
        },
    ))
}

impl PartitionMetadata {
    /// A partition with a non-recoverable error is not routable and the
    /// cache holding it must be refreshed before use.
    pub fn is_routable(&self) -> bool {
        self.error_code == KafkaCode::None && self.leader_id >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn encode_response(response: &MetadataResponse) -> Vec<u8> {
        let mut buf = Vec::new();
        (response.brokers.len() as i32).encode(&mut buf).unwrap();
        for broker in &response.brokers {
            broker.node_id.encode(&mut buf).unwrap();
            broker.host.encode(&mut buf).unwrap();
            broker.port.encode(&mut buf).unwrap();
            broker.rack.encode(&mut buf).unwrap();
        }
        response.controller_id.encode(&mut buf).unwrap();
        (response.topics.len() as i32).encode(&mut buf).unwrap();
        for topic in &response.topics {
            (topic.error_code as i16).encode(&mut buf).unwrap();
            topic.name.encode(&mut buf).unwrap();
            (topic.is_internal as i8).encode(&mut buf).unwrap();
            (topic.partitions.len() as i32).encode(&mut buf).unwrap();
            for partition in &topic.partitions {
                (partition.error_code as i16).encode(&mut buf).unwrap();
                partition.partition_index.encode(&mut buf).unwrap();
                partition.leader_id.encode(&mut buf).unwrap();
                partition.replicas.as_slice().encode(&mut buf).unwrap();
                partition
                    .in_sync_replicas
                    .as_slice()
                    .encode(&mut buf)
                    .unwrap();
            }
        }
        buf
    }

    #[test]
    fn test_request_rejects_empty_topic_list() {
        assert!(MetadataRequest::new(1, "cli", vec![]).is_err());
    }

    #[test]
    fn test_request_encode() {
        let request = MetadataRequest::new(9, "cli", vec!["events".to_string()]).unwrap();
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();

        // header (13) + array_len (4) + name_len (2) + "events" (6) = 25
        assert_eq!(buf.len(), 25);
        // api_key = 3
        assert_eq!(&buf[0..2], &[0x00, 0x03]);
        // topic count = 1
        assert_eq!(&buf[13..17], &[0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_response_round_trip() {
        let response = MetadataResponse {
            brokers: vec![
                BrokerMetadata {
                    node_id: 1,
                    host: "broker-1".to_string(),
                    port: 9092,
                    rack: None,
                },
                BrokerMetadata {
                    node_id: 2,
                    host: "broker-2".to_string(),
                    port: 9093,
                    rack: Some("eu-1a".to_string()),
                },
            ],
            controller_id: 1,
            topics: vec![TopicMetadata {
                error_code: KafkaCode::None,
                name: "events".to_string(),
                is_internal: false,
                partitions: vec![
                    PartitionMetadata {
                        error_code: KafkaCode::None,
                        partition_index: 0,
                        leader_id: 1,
                        replicas: vec![1, 2],
                        in_sync_replicas: vec![1, 2],
                    },
                    PartitionMetadata {
                        error_code: KafkaCode::LeaderNotAvailable,
                        partition_index: 1,
                        leader_id: -1,
                        replicas: vec![2, 1],
                        in_sync_replicas: vec![],
                    },
                ],
            }],
        };

        let encoded = encode_response(&response);
        let input = NomBytes::new(Bytes::from(encoded));
        let (_, parsed) = parse_metadata_response(input).unwrap();

        assert_eq!(parsed, response);
    }

    #[test]
    fn test_partition_routability() {
        let healthy = PartitionMetadata {
            error_code: KafkaCode::None,
            partition_index: 0,
            leader_id: 1,
            replicas: vec![1],
            in_sync_replicas: vec![1],
        };
        assert!(healthy.is_routable());

        let leaderless = PartitionMetadata {
            error_code: KafkaCode::None,
            leader_id: -1,
            ..healthy.clone()
        };
        assert!(!leaderless.is_routable());

        let errored = PartitionMetadata {
            error_code: KafkaCode::LeaderNotAvailable,
            ..healthy
        };
        assert!(!errored.is_routable());
    }
}
