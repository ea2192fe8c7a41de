//! Consumer group APIs: GroupCoordinator, JoinGroup, SyncGroup,
//! Heartbeat, LeaveGroup.
//!
//! Also carries the embedded codecs for the consumer protocol blobs
//! exchanged through JoinGroup and SyncGroup: member metadata
//! `(version, topics, user_data)` and member assignment
//! `(version, [(topic, partitions)], user_data)`.

use bytes::{BufMut, Bytes};
use nom::{
    IResult,
    number::complete::{be_i16, be_i32},
};
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::constants::{
    API_KEY_GROUP_COORDINATOR, API_KEY_HEARTBEAT, API_KEY_JOIN_GROUP, API_KEY_LEAVE_GROUP,
    API_KEY_SYNC_GROUP, API_VERSION_GROUP_COORDINATOR, API_VERSION_HEARTBEAT,
    API_VERSION_JOIN_GROUP, API_VERSION_LEAVE_GROUP, API_VERSION_SYNC_GROUP,
};
use crate::encode::{ToByte, encode_as_array};
use crate::error::{Error, KafkaCode, Result};
use crate::parser::{bytes_to_string, parse_array, parse_bytes, parse_string};
use crate::protocol::HeaderRequest;

/// Protocol type all consumers register under.
pub const PROTOCOL_TYPE_CONSUMER: &str = "consumer";

/// The assignment strategy this client implements.
pub const ROUND_ROBIN_PROTOCOL: &str = "roundrobin";

/// Version tag inside metadata and assignment blobs.
const CONSUMER_PROTOCOL_VERSION: i16 = 0;

// ============================================================================
// Consumer protocol blobs
// ============================================================================

/// Subscription metadata a member advertises when joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberMetadata {
    pub topics: Vec<String>,
    pub user_data: Bytes,
}

impl MemberMetadata {
    pub fn new(topics: Vec<String>) -> Self {
        Self {
            topics,
            user_data: Bytes::new(),
        }
    }

    /// Serialize to the blob carried inside a JoinGroup protocol entry.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        CONSUMER_PROTOCOL_VERSION.encode(&mut buf)?;
        self.topics.as_slice().encode(&mut buf)?;
        self.user_data.encode(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Decode a blob received from another member via JoinGroup.
    pub fn from_bytes(data: &Bytes) -> Result<Self> {
        let input = NomBytes::from(data.as_ref());
        let (_, metadata) =
            parse_member_metadata(input).map_err(|_| Error::ParsingError(data.clone()))?;
        Ok(metadata)
    }
}

fn parse_member_metadata(s: NomBytes) -> IResult<NomBytes, MemberMetadata> {
    let (s, _version) = be_i16(s)?;
    let (s, topics) = parse_array(parse_topic_name)(s)?;
    let (s, user_data) = parse_bytes(s)?;

    Ok((s, MemberMetadata { topics, user_data }))
}

fn parse_topic_name(s: NomBytes) -> IResult<NomBytes, String> {
    let (s, name) = parse_string(s)?;
    Ok((s, bytes_to_string(&name)?))
}

/// Partition assignment handed to a member through SyncGroup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberAssignment {
    pub topics: Vec<(String, Vec<i32>)>,
    pub user_data: Bytes,
}

impl MemberAssignment {
    pub fn new(topics: Vec<(String, Vec<i32>)>) -> Self {
        Self {
            topics,
            user_data: Bytes::new(),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        CONSUMER_PROTOCOL_VERSION.encode(&mut buf)?;
        encode_as_array(&mut buf, &self.topics, |buf, (topic, partitions)| {
            topic.encode(buf)?;
            partitions.as_slice().encode(buf)
        })?;
        self.user_data.encode(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Decode the blob from a SyncGroup response. An empty blob (the
    /// coordinator's answer to a member with no assignment) decodes to an
    /// empty assignment.
    pub fn from_bytes(data: &Bytes) -> Result<Self> {
        if data.is_empty() {
            return Ok(MemberAssignment::default());
        }
        let input = NomBytes::from(data.as_ref());
        let (_, assignment) =
            parse_member_assignment(input).map_err(|_| Error::ParsingError(data.clone()))?;
        Ok(assignment)
    }
}

fn parse_member_assignment(s: NomBytes) -> IResult<NomBytes, MemberAssignment> {
    let (s, _version) = be_i16(s)?;
    let (s, topics) = parse_array(parse_assignment_topic)(s)?;
    let (s, user_data) = parse_bytes(s)?;

    Ok((s, MemberAssignment { topics, user_data }))
}

fn parse_assignment_topic(s: NomBytes) -> IResult<NomBytes, (String, Vec<i32>)> {
    let (s, name) = parse_string(s)?;
    let (s, partitions) = parse_array(be_i32)(s)?;
    Ok((s, (bytes_to_string(&name)?, partitions)))
}

// ============================================================================
// GroupCoordinator
// ============================================================================

/// Ask any broker which node coordinates the given group.
#[derive(Debug, Clone)]
pub struct GroupCoordinatorRequest {
    pub header: HeaderRequest,
    pub group_id: String,
}

impl GroupCoordinatorRequest {
    pub fn new(correlation_id: i32, client_id: &str, group_id: &str) -> Self {
        Self {
            header: HeaderRequest::new(
                API_KEY_GROUP_COORDINATOR,
                API_VERSION_GROUP_COORDINATOR,
                correlation_id,
                client_id,
            ),
            group_id: group_id.to_string(),
        }
    }
}

impl ToByte for GroupCoordinatorRequest {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.header.encode(buffer)?;
        self.group_id.encode(buffer)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCoordinatorResponse {
    pub error_code: KafkaCode,
    pub coordinator_id: i32,
    pub coordinator_host: String,
    pub coordinator_port: i32,
}

pub fn parse_group_coordinator_response(
    s: NomBytes,
) -> IResult<NomBytes, GroupCoordinatorResponse> {
    let (s, error_code) = be_i16(s)?;
    let (s, coordinator_id) = be_i32(s)?;
    let (s, host) = parse_string(s)?;
    let (s, coordinator_port) = be_i32(s)?;

    Ok((
        s,
        GroupCoordinatorResponse {
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            coordinator_id,
            coordinator_host: bytes_to_string(&host)?,
            coordinator_port,
        },
    ))
}

// ============================================================================
// JoinGroup
// ============================================================================

/// Enter (or re-enter) the group. A first join carries an empty
/// member id; the coordinator assigns one in the response.
#[derive(Debug, Clone)]
pub struct JoinGroupRequest {
    pub header: HeaderRequest,
    pub group_id: String,
    pub session_timeout_ms: i32,
    pub member_id: String,
    pub protocols: Vec<(String, Bytes)>,
}

impl JoinGroupRequest {
    pub fn new(
        correlation_id: i32,
        client_id: &str,
        group_id: &str,
        session_timeout_ms: i32,
        member_id: &str,
        protocols: Vec<(String, Bytes)>,
    ) -> Self {
        Self {
            header: HeaderRequest::new(
                API_KEY_JOIN_GROUP,
                API_VERSION_JOIN_GROUP,
                correlation_id,
                client_id,
            ),
            group_id: group_id.to_string(),
            session_timeout_ms,
            member_id: member_id.to_string(),
            protocols,
        }
    }
}

impl ToByte for JoinGroupRequest {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.header.encode(buffer)?;
        self.group_id.encode(buffer)?;
        self.session_timeout_ms.encode(buffer)?;
        self.member_id.encode(buffer)?;
        PROTOCOL_TYPE_CONSUMER.encode(buffer)?;
        encode_as_array(buffer, &self.protocols, |buffer, (name, metadata)| {
            name.encode(buffer)?;
            metadata.encode(buffer)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinGroupMember {
    pub member_id: String,
    pub metadata: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinGroupResponse {
    pub error_code: KafkaCode,
    pub generation_id: i32,
    pub protocol_name: String,
    pub leader_id: String,
    pub member_id: String,
    /// Populated only for the member elected leader.
    pub members: Vec<JoinGroupMember>,
}

impl JoinGroupResponse {
    /// Whether this member was elected leader and must compute the
    /// group-wide assignment.
    pub fn is_leader(&self) -> bool {
        self.leader_id == self.member_id
    }
}

pub fn parse_join_group_response(s: NomBytes) -> IResult<NomBytes, JoinGroupResponse> {
    let (s, error_code) = be_i16(s)?;
    let (s, generation_id) = be_i32(s)?;
    let (s, protocol_name) = parse_string(s)?;
    let (s, leader_id) = parse_string(s)?;
    let (s, member_id) = parse_string(s)?;
    let (s, members) = parse_array(parse_join_group_member)(s)?;

    Ok((
        s,
        JoinGroupResponse {
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            generation_id,
            protocol_name: bytes_to_string(&protocol_name)?,
            leader_id: bytes_to_string(&leader_id)?,
            member_id: bytes_to_string(&member_id)?,
            members,
        },
    ))
}

fn parse_join_group_member(s: NomBytes) -> IResult<NomBytes, JoinGroupMember> {
    let (s, member_id) = parse_string(s)?;
    let (s, metadata) = parse_bytes(s)?;

    Ok((
        s,
        JoinGroupMember {
            member_id: bytes_to_string(&member_id)?,
            metadata,
        },
    ))
}

// ============================================================================
// SyncGroup
// ============================================================================

/// Distribute (leader) or receive (everyone) the partition assignment.
#[derive(Debug, Clone)]
pub struct SyncGroupRequest {
    pub header: HeaderRequest,
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
    /// Empty for non-leaders.
    pub assignments: Vec<(String, Bytes)>,
}

impl SyncGroupRequest {
    pub fn new(
        correlation_id: i32,
        client_id: &str,
        group_id: &str,
        generation_id: i32,
        member_id: &str,
        assignments: Vec<(String, Bytes)>,
    ) -> Self {
        Self {
            header: HeaderRequest::new(
                API_KEY_SYNC_GROUP,
                API_VERSION_SYNC_GROUP,
                correlation_id,
                client_id,
            ),
            group_id: group_id.to_string(),
            generation_id,
            member_id: member_id.to_string(),
            assignments,
        }
    }
}

impl ToByte for SyncGroupRequest {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.header.encode(buffer)?;
        self.group_id.encode(buffer)?;
        self.generation_id.encode(buffer)?;
        self.member_id.encode(buffer)?;
        encode_as_array(buffer, &self.assignments, |buffer, (member, assignment)| {
            member.encode(buffer)?;
            assignment.encode(buffer)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncGroupResponse {
    pub error_code: KafkaCode,
    pub assignment: Bytes,
}

pub fn parse_sync_group_response(s: NomBytes) -> IResult<NomBytes, SyncGroupResponse> {
    let (s, error_code) = be_i16(s)?;
    let (s, assignment) = parse_bytes(s)?;

    Ok((
        s,
        SyncGroupResponse {
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            assignment,
        },
    ))
}

// ============================================================================
// Heartbeat
// ============================================================================

#[derive(Debug, Clone)]
pub struct HeartbeatRequest {
    pub header: HeaderRequest,
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
}

impl HeartbeatRequest {
    pub fn new(
        correlation_id: i32,
        client_id: &str,
        group_id: &str,
        generation_id: i32,
        member_id: &str,
    ) -> Self {
        Self {
            header: HeaderRequest::new(
                API_KEY_HEARTBEAT,
                API_VERSION_HEARTBEAT,
                correlation_id,
                client_id,
            ),
            group_id: group_id.to_string(),
            generation_id,
            member_id: member_id.to_string(),
        }
    }
}

impl ToByte for HeartbeatRequest {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.header.encode(buffer)?;
        self.group_id.encode(buffer)?;
        self.generation_id.encode(buffer)?;
        self.member_id.encode(buffer)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatResponse {
    pub error_code: KafkaCode,
}

pub fn parse_heartbeat_response(s: NomBytes) -> IResult<NomBytes, HeartbeatResponse> {
    let (s, error_code) = be_i16(s)?;

    Ok((
        s,
        HeartbeatResponse {
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
        },
    ))
}

// ============================================================================
// LeaveGroup
// ============================================================================

#[derive(Debug, Clone)]
pub struct LeaveGroupRequest {
    pub header: HeaderRequest,
    pub group_id: String,
    pub member_id: String,
}

impl LeaveGroupRequest {
    pub fn new(correlation_id: i32, client_id: &str, group_id: &str, member_id: &str) -> Self {
        Self {
            header: HeaderRequest::new(
                API_KEY_LEAVE_GROUP,
                API_VERSION_LEAVE_GROUP,
                correlation_id,
                client_id,
            ),
            group_id: group_id.to_string(),
            member_id: member_id.to_string(),
        }
    }
}

impl ToByte for LeaveGroupRequest {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.header.encode(buffer)?;
        self.group_id.encode(buffer)?;
        self.member_id.encode(buffer)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveGroupResponse {
    pub error_code: KafkaCode,
}

pub fn parse_leave_group_response(s: NomBytes) -> IResult<NomBytes, LeaveGroupResponse> {
    let (s, error_code) = be_i16(s)?;

    Ok((
        s,
        LeaveGroupResponse {
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_metadata_round_trip() {
        let metadata = MemberMetadata::new(vec!["a".to_string(), "b".to_string()]);
        let bytes = metadata.to_bytes().unwrap();
        let decoded = MemberMetadata::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn test_member_assignment_round_trip() {
        let assignment = MemberAssignment::new(vec![
            ("t".to_string(), vec![0, 2]),
            ("u".to_string(), vec![1]),
        ]);
        let bytes = assignment.to_bytes().unwrap();
        let decoded = MemberAssignment::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, assignment);
    }

    #[test]
    fn test_member_assignment_empty_blob() {
        let decoded = MemberAssignment::from_bytes(&Bytes::new()).unwrap();
        assert!(decoded.topics.is_empty());
    }

    #[test]
    fn test_group_coordinator_request_encode() {
        let request = GroupCoordinatorRequest::new(1, "cli", "grp");
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();

        // header (13) + group_id (2+3) = 18
        assert_eq!(buf.len(), 18);
        assert_eq!(&buf[0..2], &[0x00, 0x0A]); // api_key = 10
    }

    #[test]
    fn test_group_coordinator_response_round_trip() {
        let mut buf = Vec::new();
        (KafkaCode::None as i16).encode(&mut buf).unwrap();
        2i32.encode(&mut buf).unwrap();
        "broker-2".encode(&mut buf).unwrap();
        9092i32.encode(&mut buf).unwrap();

        let input = NomBytes::new(Bytes::from(buf));
        let (_, response) = parse_group_coordinator_response(input).unwrap();

        assert_eq!(response.coordinator_id, 2);
        assert_eq!(response.coordinator_host, "broker-2");
        assert_eq!(response.coordinator_port, 9092);
    }

    #[test]
    fn test_join_group_request_encode() {
        let metadata = MemberMetadata::new(vec!["t".to_string()]).to_bytes().unwrap();
        let request = JoinGroupRequest::new(
            1,
            "cli",
            "grp",
            30_000,
            "",
            vec![(ROUND_ROBIN_PROTOCOL.to_string(), metadata.clone())],
        );

        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();

        // header (13) + group (2+3) + session (4) + member ("", 2) +
        // protocol_type (2+8) + protocols_len (4) + name (2+10) +
        // metadata (4 + len)
        assert_eq!(buf.len(), 54 + metadata.len());
        // empty member id encodes as zero length
        assert_eq!(&buf[22..24], &[0x00, 0x00]);
    }

    #[test]
    fn test_join_group_response_round_trip_and_leadership() {
        let mut buf = Vec::new();
        (KafkaCode::None as i16).encode(&mut buf).unwrap();
        5i32.encode(&mut buf).unwrap();
        ROUND_ROBIN_PROTOCOL.encode(&mut buf).unwrap();
        "m1".encode(&mut buf).unwrap(); // leader
        "m1".encode(&mut buf).unwrap(); // this member
        2i32.encode(&mut buf).unwrap();
        "m1".encode(&mut buf).unwrap();
        Bytes::from(vec![1]).encode(&mut buf).unwrap();
        "m2".encode(&mut buf).unwrap();
        Bytes::from(vec![2]).encode(&mut buf).unwrap();

        let input = NomBytes::new(Bytes::from(buf));
        let (_, response) = parse_join_group_response(input).unwrap();

        assert_eq!(response.generation_id, 5);
        assert!(response.is_leader());
        assert_eq!(response.members.len(), 2);
        assert_eq!(response.members[1].member_id, "m2");
    }

    #[test]
    fn test_join_group_response_follower() {
        let mut buf = Vec::new();
        (KafkaCode::None as i16).encode(&mut buf).unwrap();
        5i32.encode(&mut buf).unwrap();
        ROUND_ROBIN_PROTOCOL.encode(&mut buf).unwrap();
        "m1".encode(&mut buf).unwrap();
        "m2".encode(&mut buf).unwrap();
        0i32.encode(&mut buf).unwrap(); // followers get no member list

        let input = NomBytes::new(Bytes::from(buf));
        let (_, response) = parse_join_group_response(input).unwrap();

        assert!(!response.is_leader());
        assert!(response.members.is_empty());
    }

    #[test]
    fn test_sync_group_round_trip() {
        let assignment = MemberAssignment::new(vec![("t".to_string(), vec![0])])
            .to_bytes()
            .unwrap();

        let request = SyncGroupRequest::new(
            1,
            "cli",
            "grp",
            5,
            "m1",
            vec![("m1".to_string(), assignment.clone())],
        );
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        assert!(!buf.is_empty());

        let mut response_buf = Vec::new();
        (KafkaCode::None as i16).encode(&mut response_buf).unwrap();
        assignment.encode(&mut response_buf).unwrap();

        let input = NomBytes::new(Bytes::from(response_buf));
        let (_, response) = parse_sync_group_response(input).unwrap();

        let decoded = MemberAssignment::from_bytes(&response.assignment).unwrap();
        assert_eq!(decoded.topics, vec![("t".to_string(), vec![0])]);
    }

    #[test]
    fn test_heartbeat_round_trip() {
        let request = HeartbeatRequest::new(1, "cli", "grp", 5, "m1");
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        // header (13) + group (2+3) + generation (4) + member (2+2) = 26
        assert_eq!(buf.len(), 26);

        let mut response_buf = Vec::new();
        (KafkaCode::RebalanceInProgress as i16)
            .encode(&mut response_buf)
            .unwrap();
        let input = NomBytes::new(Bytes::from(response_buf));
        let (_, response) = parse_heartbeat_response(input).unwrap();
        assert_eq!(response.error_code, KafkaCode::RebalanceInProgress);
        assert!(response.error_code.is_membership_error());
    }

    #[test]
    fn test_leave_group_encode_and_parse() {
        let request = LeaveGroupRequest::new(1, "cli", "grp", "m1");
        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(&buf[0..2], &[0x00, 0x0D]); // api_key = 13

        let mut response_buf = Vec::new();
        (KafkaCode::None as i16).encode(&mut response_buf).unwrap();
        let input = NomBytes::new(Bytes::from(response_buf));
        let (_, response) = parse_leave_group_response(input).unwrap();
        assert_eq!(response.error_code, KafkaCode::None);
    }
}
