//! Centralized protocol and configuration constants.
//!
//! This module consolidates the magic numbers used throughout the client:
//! wire protocol sizes and limits, the API keys and versions spoken on the
//! wire, and the defaults applied by the configuration surface.

// =============================================================================
// API Keys (Kafka Wire Protocol)
// =============================================================================

/// Produce API key.
pub const API_KEY_PRODUCE: i16 = 0;
/// Fetch API key.
pub const API_KEY_FETCH: i16 = 1;
/// ListOffsets API key, used for symbolic offset resolution.
pub const API_KEY_OFFSETS: i16 = 2;
/// TopicMetadata API key.
pub const API_KEY_METADATA: i16 = 3;
/// OffsetCommit API key.
pub const API_KEY_OFFSET_COMMIT: i16 = 8;
/// OffsetFetch API key.
pub const API_KEY_OFFSET_FETCH: i16 = 9;
/// GroupCoordinator (FindCoordinator) API key.
pub const API_KEY_GROUP_COORDINATOR: i16 = 10;
/// JoinGroup API key.
pub const API_KEY_JOIN_GROUP: i16 = 11;
/// Heartbeat API key.
pub const API_KEY_HEARTBEAT: i16 = 12;
/// LeaveGroup API key.
pub const API_KEY_LEAVE_GROUP: i16 = 13;
/// SyncGroup API key.
pub const API_KEY_SYNC_GROUP: i16 = 14;

// =============================================================================
// API Versions
// =============================================================================
// The client speaks a single version per API, chosen so that produce and
// fetch both carry message format v1 (magic 1, with timestamps).

pub const API_VERSION_PRODUCE: i16 = 2;
pub const API_VERSION_FETCH: i16 = 2;
pub const API_VERSION_OFFSETS: i16 = 1;
pub const API_VERSION_METADATA: i16 = 1;
pub const API_VERSION_OFFSET_COMMIT: i16 = 2;
pub const API_VERSION_OFFSET_FETCH: i16 = 1;
pub const API_VERSION_GROUP_COORDINATOR: i16 = 0;
pub const API_VERSION_JOIN_GROUP: i16 = 0;
pub const API_VERSION_HEARTBEAT: i16 = 0;
pub const API_VERSION_LEAVE_GROUP: i16 = 0;
pub const API_VERSION_SYNC_GROUP: i16 = 0;

// =============================================================================
// Message Format (message set v1)
// =============================================================================

/// Magic byte for message format v1 (per-message timestamp present).
pub const MESSAGE_MAGIC_V1: i8 = 1;

/// Bits of the message `attributes` byte that select the compression codec.
pub const COMPRESSION_CODEC_MASK: i8 = 0x07;

/// Fixed per-message overhead preceding key and value:
/// offset (8) + size (4) + crc (4) + magic (1) + attributes (1) + timestamp (8).
pub const MESSAGE_HEADER_SIZE: usize = 26;

/// Timestamp value meaning "not set".
pub const NO_TIMESTAMP: i64 = -1;

// =============================================================================
// Protocol Limits
// =============================================================================

/// Maximum allowed array size in protocol parsing.
///
/// This prevents memory exhaustion from malformed responses that claim
/// to have billions of elements. 100,000 is generous but bounded.
pub const MAX_PROTOCOL_ARRAY_SIZE: i32 = 100_000;

/// Maximum size of a single response accepted from a broker (100 MB).
///
/// A length prefix beyond this fails the read instead of allocating.
pub const MAX_RESPONSE_SIZE: usize = 100 * 1024 * 1024;

// =============================================================================
// Client Defaults
// =============================================================================

/// Client id sent in every request header unless overridden.
pub const DEFAULT_CLIENT_ID: &str = "milena";

/// Port assumed for seed brokers given without one.
pub const DEFAULT_PORT: u16 = 9092;

/// Socket connect/read/write timeout in seconds.
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Producer Defaults
// =============================================================================

/// Broker-side ack timeout for produce requests, in milliseconds.
pub const DEFAULT_ACK_TIMEOUT_MS: i32 = 5_000;

/// Additional delivery attempts after the first.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Sleep between delivery attempts, in seconds.
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 1;

/// Maximum number of buffered messages.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1_000;

/// Maximum total byte size of buffered messages (10 MB).
pub const DEFAULT_MAX_BUFFER_BYTESIZE: usize = 10 * 1024 * 1024;

/// Minimum number of messages in a partition's set before the configured
/// codec is applied.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1;

/// Async producer queue capacity.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1_000;

/// Async producer: buffered message count that triggers a delivery.
/// Zero disables the threshold.
pub const DEFAULT_DELIVERY_THRESHOLD: usize = 0;

/// Async producer: seconds between automatic deliveries. Zero disables
/// the timer.
pub const DEFAULT_DELIVERY_INTERVAL_SECS: u64 = 0;

// =============================================================================
// Consumer Defaults
// =============================================================================

/// Group session timeout, in seconds.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30;

/// Interval between heartbeats, in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Seconds between automatic offset commits.
pub const DEFAULT_OFFSET_COMMIT_INTERVAL_SECS: u64 = 10;

/// Processed-message count that triggers an automatic offset commit.
/// Zero disables the threshold.
pub const DEFAULT_OFFSET_COMMIT_THRESHOLD: usize = 0;

/// Maximum time the broker may delay a fetch response, in milliseconds.
pub const DEFAULT_FETCH_MAX_WAIT_MS: i32 = 500;

/// Minimum bytes the broker should accumulate before answering a fetch.
pub const DEFAULT_FETCH_MIN_BYTES: i32 = 1;

/// Per-partition byte cap on fetch responses (1 MB).
pub const DEFAULT_FETCH_MAX_BYTES: i32 = 1024 * 1024;

/// Retention time sent in offset commits: -1 lets the broker apply its
/// configured retention.
pub const OFFSET_RETENTION_BROKER_DEFAULT: i64 = -1;
