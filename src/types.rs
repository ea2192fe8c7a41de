//! Type-safe wrappers for Kafka protocol primitives.
//!
//! These newtypes provide type safety to prevent mixing up different
//! integer types that have the same underlying representation but
//! different semantic meanings.

use bytes::BufMut;
use std::fmt;

use crate::encode::ToByte;
use crate::error::Result;

/// A Kafka message offset within a partition.
///
/// Offsets are 64-bit signed integers that represent the position
/// of a message within a partition's log.
///
/// # Special Values
///
/// Negative values carry special offset semantics:
/// - `-1` (`LATEST`): in offset requests, "the next offset to be
///   written"; in committed-offset fetches, "no committed offset".
/// - `-2` (`EARLIEST`): "the first available offset in the log".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(pub i64);

impl Offset {
    /// Special offset meaning "earliest available message".
    pub const EARLIEST: Self = Offset(-2);

    /// Special offset meaning "latest available message" (end of log).
    /// Doubles as "no committed offset" in offset-fetch responses.
    pub const LATEST: Self = Offset(-1);

    #[inline]
    pub const fn new(value: i64) -> Self {
        Offset(value)
    }

    #[inline]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Check if this is a valid (non-negative) offset.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl From<i64> for Offset {
    fn from(value: i64) -> Self {
        Offset(value)
    }
}

impl From<Offset> for i64 {
    fn from(offset: Offset) -> Self {
        offset.0
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToByte for Offset {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.0.encode(buffer)
    }
}

/// A Kafka request correlation ID.
///
/// Correlation IDs are 32-bit signed integers that clients use to
/// match responses to their corresponding requests. Each connection
/// hands them out strictly monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CorrelationId(pub i32);

impl CorrelationId {
    #[inline]
    pub const fn new(value: i32) -> Self {
        CorrelationId(value)
    }

    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }

    /// The id the connection will assign to its next request.
    #[inline]
    pub fn next(self) -> Self {
        CorrelationId(self.0.wrapping_add(1))
    }
}

impl From<i32> for CorrelationId {
    fn from(value: i32) -> Self {
        CorrelationId(value)
    }
}

impl From<CorrelationId> for i32 {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToByte for CorrelationId {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.0.encode(buffer)
    }
}

/// A topic-partition identifier.
///
/// A more ergonomic and type-safe way to identify a specific partition
/// within a topic than passing `(String, i32)` tuples around.
///
/// # Usage
///
/// ```
/// use milena::types::TopicPartition;
///
/// let partition = TopicPartition::new("my-topic", 0);
/// assert_eq!(partition.to_string(), "my-topic-0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    topic: String,
    partition: i32,
}

impl TopicPartition {
    #[inline]
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[inline]
    pub fn partition(&self) -> i32 {
        self.partition
    }

    #[inline]
    pub fn as_tuple(&self) -> (&str, i32) {
        (&self.topic, self.partition)
    }

    #[inline]
    pub fn into_tuple(self) -> (String, i32) {
        (self.topic, self.partition)
    }
}

impl From<(String, i32)> for TopicPartition {
    fn from((topic, partition): (String, i32)) -> Self {
        Self { topic, partition }
    }
}

impl From<(&str, i32)> for TopicPartition {
    fn from((topic, partition): (&str, i32)) -> Self {
        Self {
            topic: topic.to_string(),
            partition,
        }
    }
}

impl From<TopicPartition> for (String, i32) {
    fn from(id: TopicPartition) -> Self {
        (id.topic, id.partition)
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}
