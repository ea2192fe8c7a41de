//! Client, producer, consumer, and fetch configuration.
//!
//! Plain structs with defaults drawn from [`crate::constants`]; each has
//! a `validate()` that reports every inconsistency at once rather than
//! failing on the first.

use std::time::Duration;

use crate::compression::CompressionCodec;
use crate::constants::{
    DEFAULT_ACK_TIMEOUT_MS, DEFAULT_CLIENT_ID, DEFAULT_COMPRESSION_THRESHOLD,
    DEFAULT_DELIVERY_INTERVAL_SECS, DEFAULT_DELIVERY_THRESHOLD, DEFAULT_FETCH_MAX_BYTES,
    DEFAULT_FETCH_MAX_WAIT_MS, DEFAULT_FETCH_MIN_BYTES, DEFAULT_HEARTBEAT_INTERVAL_SECS,
    DEFAULT_MAX_BUFFER_BYTESIZE, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MAX_QUEUE_SIZE,
    DEFAULT_MAX_RETRIES, DEFAULT_OFFSET_COMMIT_INTERVAL_SECS, DEFAULT_OFFSET_COMMIT_THRESHOLD,
    DEFAULT_RETRY_BACKOFF_SECS, DEFAULT_SESSION_TIMEOUT_SECS, DEFAULT_SOCKET_TIMEOUT_SECS,
};
use crate::error::{Error, Result};
use crate::network::TlsSettings;

/// Settings shared by every producer and consumer: identity, seed
/// brokers, socket behavior, and TLS.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Client id carried in every request header.
    pub client_id: String,
    /// Seed broker entries; see [`crate::cluster::seeds`] for syntax.
    pub seed_brokers: Vec<String>,
    /// Connect/read/write timeout for broker sockets.
    pub socket_timeout: Duration,
    /// TLS certificate material; disabled when empty.
    pub tls: TlsSettings,
}

impl ClientConfig {
    pub fn new(seed_brokers: Vec<String>) -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            seed_brokers,
            socket_timeout: Duration::from_secs(DEFAULT_SOCKET_TIMEOUT_SECS),
            tls: TlsSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.client_id.is_empty() {
            errors.push("client_id must not be empty".to_string());
        }
        if self.seed_brokers.is_empty() {
            errors.push("at least one seed broker is required".to_string());
        }
        if self.socket_timeout.is_zero() {
            errors.push("socket_timeout must be positive".to_string());
        }

        collect(errors)
    }
}

/// How many broker acknowledgements a produce request waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequiredAcks {
    /// No acknowledgement; the request is fire-and-forget.
    None,
    /// The partition leader alone.
    #[default]
    Leader,
    /// Every in-sync replica.
    All,
}

impl RequiredAcks {
    /// Wire value carried in the produce request.
    pub fn to_wire(self) -> i16 {
        match self {
            RequiredAcks::None => 0,
            RequiredAcks::Leader => 1,
            RequiredAcks::All => -1,
        }
    }

    /// Parse a configuration value: an ack count or the string `"all"`.
    pub fn from_config(value: &str) -> Result<Self> {
        match value {
            "all" | "-1" => Ok(RequiredAcks::All),
            "0" => Ok(RequiredAcks::None),
            "1" => Ok(RequiredAcks::Leader),
            other => Err(Error::Config(format!(
                "required_acks must be 0, 1, or \"all\", got {other:?}"
            ))),
        }
    }
}

/// Producer buffering, delivery, and retry settings.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// How long the broker may wait for replica acks before answering.
    pub ack_timeout_ms: i32,
    pub required_acks: RequiredAcks,
    /// Additional delivery attempts after the first.
    pub max_retries: u32,
    /// Sleep between delivery attempts.
    pub retry_backoff: Duration,
    /// Maximum number of buffered messages.
    pub max_buffer_size: usize,
    /// Maximum total byte size of buffered messages.
    pub max_buffer_bytesize: usize,
    pub compression_codec: CompressionCodec,
    /// Minimum messages in a partition's set before the codec applies.
    pub compression_threshold: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            required_acks: RequiredAcks::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_secs(DEFAULT_RETRY_BACKOFF_SECS),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_buffer_bytesize: DEFAULT_MAX_BUFFER_BYTESIZE,
            compression_codec: CompressionCodec::None,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl ProducerConfig {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.ack_timeout_ms <= 0 {
            errors.push(format!(
                "ack_timeout_ms ({}) must be positive",
                self.ack_timeout_ms
            ));
        }
        if self.max_buffer_size == 0 {
            errors.push("max_buffer_size must be at least 1".to_string());
        }
        if self.max_buffer_bytesize == 0 {
            errors.push("max_buffer_bytesize must be at least 1".to_string());
        }
        if self.compression_threshold == 0 {
            errors.push("compression_threshold must be at least 1".to_string());
        }

        collect(errors)
    }
}

/// Additional knobs for the async producer's queue and worker.
#[derive(Debug, Clone)]
pub struct AsyncProducerConfig {
    pub producer: ProducerConfig,
    /// Capacity of the event queue between callers and the worker.
    pub max_queue_size: usize,
    /// Buffered message count that triggers a delivery; 0 disables.
    pub delivery_threshold: usize,
    /// Automatic delivery period; zero disables the timer.
    pub delivery_interval: Duration,
}

impl Default for AsyncProducerConfig {
    fn default() -> Self {
        Self {
            producer: ProducerConfig::default(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            delivery_threshold: DEFAULT_DELIVERY_THRESHOLD,
            delivery_interval: Duration::from_secs(DEFAULT_DELIVERY_INTERVAL_SECS),
        }
    }
}

impl AsyncProducerConfig {
    pub fn validate(&self) -> Result<()> {
        self.producer.validate()?;
        if self.max_queue_size == 0 {
            return Err(Error::Config("max_queue_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Consumer group membership and offset commit settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group_id: String,
    /// How long the coordinator waits for a heartbeat before expelling
    /// the member.
    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Period between automatic offset commits.
    pub offset_commit_interval: Duration,
    /// Processed count that triggers a commit; 0 disables.
    pub offset_commit_threshold: usize,
    /// Where to start on partitions without a committed offset:
    /// `true` = earliest, `false` = latest.
    pub start_from_beginning: bool,
}

impl ConsumerConfig {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            offset_commit_interval: Duration::from_secs(DEFAULT_OFFSET_COMMIT_INTERVAL_SECS),
            offset_commit_threshold: DEFAULT_OFFSET_COMMIT_THRESHOLD,
            start_from_beginning: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.group_id.is_empty() {
            errors.push("group_id must not be empty".to_string());
        }
        if self.session_timeout.is_zero() {
            errors.push("session_timeout must be positive".to_string());
        }
        if self.heartbeat_interval >= self.session_timeout {
            errors.push(format!(
                "heartbeat_interval ({:?}) must be less than session_timeout ({:?})",
                self.heartbeat_interval, self.session_timeout
            ));
        }

        collect(errors)
    }
}

/// Fetch sizing and latency trade-offs.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Longest the broker may hold the request waiting for min_bytes.
    pub max_wait_ms: i32,
    /// Bytes the broker should accumulate before responding.
    pub min_bytes: i32,
    /// Per-partition cap on returned bytes.
    pub max_bytes: i32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: DEFAULT_FETCH_MAX_WAIT_MS,
            min_bytes: DEFAULT_FETCH_MIN_BYTES,
            max_bytes: DEFAULT_FETCH_MAX_BYTES,
        }
    }
}

impl FetchConfig {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.max_wait_ms < 0 {
            errors.push(format!("max_wait_ms ({}) must not be negative", self.max_wait_ms));
        }
        if self.min_bytes < 0 {
            errors.push(format!("min_bytes ({}) must not be negative", self.min_bytes));
        }
        if self.max_bytes <= 0 {
            errors.push(format!("max_bytes ({}) must be positive", self.max_bytes));
        }

        collect(errors)
    }
}

fn collect(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(errors.join("; ")))
    }
}
