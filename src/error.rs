//! Crate & protocol level errors.
//!
//! Two layers:
//!
//! - [`Error`]: everything a caller of this crate can observe — transport
//!   failures, framing/parsing problems, configuration mistakes, and
//!   broker-reported error codes that could not be retried away.
//! - [`KafkaCode`]: the wire-protocol error table reported by brokers in
//!   responses. Codes are classified into retriable, fatal, and
//!   membership buckets; the produce, fetch, and group paths consult the
//!   classification to decide whether to retry, rejoin, or surface.

use bytes::Bytes;
use num_derive::FromPrimitive;
use std::{io, result};
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced to users of the client.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
    /// An error in the network.
    #[error("IO error: {0:?}")]
    IoError(io::ErrorKind),

    /// Could not parse the data.
    #[error("Parsing error: invalid data ({} bytes)", .0.len())]
    ParsingError(Bytes),

    /// Missing data or connection closed.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// A response arrived with a correlation id other than the one of the
    /// request in flight.
    #[error("Correlation mismatch: expected {expected}, got {actual}")]
    CorrelationMismatch { expected: i32, actual: i32 },

    /// A broker reported an error code that is not retriable.
    #[error("Broker error: {0:?}")]
    Kafka(KafkaCode),

    /// No leader is known for the given topic partition.
    #[error("Leader not available for {topic}-{partition}")]
    LeaderNotAvailable { topic: String, partition: i32 },

    /// The topic is not present in the cluster metadata.
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// The producer buffer (or the async producer queue) is full.
    #[error("Buffer overflow")]
    BufferOverflow,

    /// Messages remained undelivered after the retry envelope was spent.
    #[error("Delivery failed: {pending} messages still buffered")]
    DeliveryFailed { pending: usize },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The async producer worker is gone; no further events are accepted.
    #[error("Producer is shut down")]
    ProducerShutDown,
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::IoError(a), Error::IoError(b)) => a == b,
            (Error::ParsingError(a), Error::ParsingError(b)) => a == b,
            (Error::MissingData(a), Error::MissingData(b)) => a == b,
            (
                Error::CorrelationMismatch {
                    expected: a,
                    actual: b,
                },
                Error::CorrelationMismatch {
                    expected: c,
                    actual: d,
                },
            ) => a == c && b == d,
            (Error::Kafka(a), Error::Kafka(b)) => a == b,
            (
                Error::LeaderNotAvailable {
                    topic: t1,
                    partition: p1,
                },
                Error::LeaderNotAvailable {
                    topic: t2,
                    partition: p2,
                },
            ) => t1 == t2 && p1 == p2,
            (Error::UnknownTopic(a), Error::UnknownTopic(b)) => a == b,
            (Error::BufferOverflow, Error::BufferOverflow) => true,
            (Error::DeliveryFailed { pending: a }, Error::DeliveryFailed { pending: b }) => a == b,
            (Error::Config(a), Error::Config(b)) => a == b,
            (Error::ProducerShutDown, Error::ProducerShutDown) => true,
            _ => false,
        }
    }
}

impl Eq for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e.kind())
    }
}

impl Error {
    /// Whether retrying the failed operation (after a metadata refresh
    /// and backoff) can reasonably succeed.
    ///
    /// Transport errors are retriable because the connection is evicted
    /// from the pool and re-established on the next attempt.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::IoError(_) | Error::MissingData(_) => true,
            Error::LeaderNotAvailable { .. } => true,
            Error::Kafka(code) => code.is_retriable(),
            _ => false,
        }
    }
}

/// Various errors reported by a remote Kafka server.
/// See also [Kafka Errors](http://kafka.apache.org/protocol.html)
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, Default)]
pub enum KafkaCode {
    /// An unexpected server error
    Unknown = -1,
    #[default]
    None = 0,
    /// The requested offset is outside the range of offsets
    /// maintained by the server for the given topic/partition
    OffsetOutOfRange = 1,
    /// This indicates that a message contents does not match its CRC
    CorruptMessage = 2,
    /// This request is for a topic or partition that does not exist
    /// on this broker.
    UnknownTopicOrPartition = 3,
    /// The message has a negative size
    InvalidMessageSize = 4,
    /// This error is thrown if we are in the middle of a leadership
    /// election and there is currently no leader for this partition
    /// and hence it is unavailable for writes.
    LeaderNotAvailable = 5,
    /// This error is thrown if the client attempts to send messages
    /// to a replica that is not the leader for some partition. It
    /// indicates that the clients metadata is out of date.
    NotLeaderForPartition = 6,
    /// This error is thrown if the request exceeds the user-specified
    /// time limit in the request.
    RequestTimedOut = 7,
    /// This is not a client facing error and is used mostly by tools
    /// when a broker is not alive.
    BrokerNotAvailable = 8,
    /// If replica is expected on a broker, but is not (this can be
    /// safely ignored).
    ReplicaNotAvailable = 9,
    /// The server has a configurable maximum message size to avoid
    /// unbounded memory allocation. This error is thrown if the
    /// client attempt to produce a message larger than this maximum.
    MessageSizeTooLarge = 10,
    /// Internal error code for broker-to-broker communication.
    StaleControllerEpoch = 11,
    /// If you specify a string larger than configured maximum for
    /// offset metadata
    OffsetMetadataTooLarge = 12,
    /// The server disconnected before a response was received.
    NetworkException = 13,
    /// The broker returns this error code for an offset fetch request
    /// if it is still loading offsets (after a leader change for that
    /// offsets topic partition), or in response to group membership
    /// requests (such as heartbeats) when group metadata is being
    /// loaded by the coordinator.
    GroupLoadInProgress = 14,
    /// The broker returns this error code for group coordinator
    /// requests, offset commits, and most group management requests
    /// if the offsets topic has not yet been created, or if the group
    /// coordinator is not active.
    GroupCoordinatorNotAvailable = 15,
    /// The broker returns this error code if it receives an offset
    /// fetch or commit request for a group that it is not a
    /// coordinator for.
    NotCoordinatorForGroup = 16,
    /// For a request which attempts to access an invalid topic
    /// (e.g. one which has an illegal name), or if an attempt is made
    /// to write to an internal topic (such as the consumer offsets
    /// topic).
    InvalidTopic = 17,
    /// If a message batch in a produce request exceeds the maximum
    /// configured segment size.
    RecordListTooLarge = 18,
    /// Returned from a produce request when the number of in-sync
    /// replicas is lower than the configured minimum and requiredAcks is
    /// -1.
    NotEnoughReplicas = 19,
    /// Returned from a produce request when the message was written
    /// to the log, but with fewer in-sync replicas than required.
    NotEnoughReplicasAfterAppend = 20,
    /// Returned from a produce request if the requested requiredAcks is
    /// invalid (anything other than -1, 1, or 0).
    InvalidRequiredAcks = 21,
    /// Returned from group membership requests (such as heartbeats) when
    /// the generation id provided in the request is not the current
    /// generation.
    IllegalGeneration = 22,
    /// Returned in join group when the member provides a protocol type or
    /// set of protocols which is not compatible with the current group.
    InconsistentGroupProtocol = 23,
    /// Returned in join group when the groupId is empty or null.
    InvalidGroupId = 24,
    /// Returned from group requests (offset commits/fetches, heartbeats,
    /// etc) when the memberId is not in the current generation.
    UnknownMemberId = 25,
    /// Return in join group when the requested session timeout is outside
    /// of the allowed range on the broker
    InvalidSessionTimeout = 26,
    /// Returned in heartbeat requests when the coordinator has begun
    /// rebalancing the group. This indicates to the client that it
    /// should rejoin the group.
    RebalanceInProgress = 27,
    /// This error indicates that an offset commit was rejected because of
    /// oversize metadata.
    InvalidCommitOffsetSize = 28,
    /// Returned by the broker when the client is not authorized to access
    /// the requested topic.
    TopicAuthorizationFailed = 29,
    /// Returned by the broker when the client is not authorized to access
    /// a particular groupId.
    GroupAuthorizationFailed = 30,
    /// Returned by the broker when the client is not authorized to use an
    /// inter-broker or administrative API.
    ClusterAuthorizationFailed = 31,
    /// The timestamp of the message is out of acceptable range.
    InvalidTimestamp = 32,
}

impl KafkaCode {
    /// Codes for which the client keeps the affected records buffered,
    /// marks the relevant caches stale, and retries within the envelope.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            KafkaCode::LeaderNotAvailable
                | KafkaCode::NotLeaderForPartition
                | KafkaCode::RequestTimedOut
                | KafkaCode::NotCoordinatorForGroup
                | KafkaCode::GroupCoordinatorNotAvailable
                | KafkaCode::GroupLoadInProgress
        )
    }

    /// Codes that mean the member's `(member_id, generation_id)` is no
    /// longer valid and the group must be rejoined.
    pub fn is_membership_error(self) -> bool {
        matches!(
            self,
            KafkaCode::UnknownMemberId
                | KafkaCode::IllegalGeneration
                | KafkaCode::RebalanceInProgress
        )
    }
}
