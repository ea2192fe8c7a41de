//! Message production.
//!
//! The [`Producer`] buffers messages in memory and delivers them in
//! batches: [`produce`](Producer::produce) appends to the buffer (never
//! touching the network) and [`deliver_messages`](Producer::deliver_messages)
//! drives produce requests until everything is acknowledged or the retry
//! envelope is spent.
//!
//! For a single `(topic, partition)`, acknowledged records reach the
//! broker in produce order: the buffer drains FIFO, partial failures
//! retain the head, and retries never reorder.

pub mod async_producer;
pub mod buffer;
pub mod operation;
pub mod partitioner;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::cluster::Cluster;
use crate::config::{ProducerConfig, RequiredAcks};
use crate::constants::NO_TIMESTAMP;
use crate::error::{Error, KafkaCode, Result};
use crate::instrumentation::{
    EVENT_DELIVER_MESSAGES, EVENT_PRODUCE_MESSAGE, Instrumentation,
};
use crate::protocol::messages::Record;
use crate::types::TopicPartition;

use buffer::{MessageBuffer, PendingMessage, PendingQueue};
use operation::ProduceOperation;
use partitioner::Partitioner;

pub use async_producer::AsyncProducer;

/// Buffering producer bound to a shared cluster.
#[derive(Debug)]
pub struct Producer {
    cluster: Arc<Cluster>,
    config: ProducerConfig,
    partitioner: Partitioner,
    pending: PendingQueue,
    buffer: MessageBuffer,
    instrumentation: Instrumentation,
}

impl Producer {
    pub fn new(cluster: Arc<Cluster>, config: ProducerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cluster,
            config,
            partitioner: Partitioner::new(),
            pending: PendingQueue::default(),
            buffer: MessageBuffer::default(),
            instrumentation: Instrumentation::default(),
        })
    }

    pub fn with_instrumentation(mut self, instrumentation: Instrumentation) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    /// Append a message to the in-memory buffer.
    ///
    /// Fails with [`Error::BufferOverflow`] when the buffer already
    /// holds `max_buffer_size` messages, or when this message's bytes
    /// would push the total past `max_buffer_bytesize`.
    pub fn produce(
        &mut self,
        value: Option<Bytes>,
        key: Option<Bytes>,
        topic: &str,
        partition: Option<i32>,
        partition_key: Option<Bytes>,
    ) -> Result<()> {
        self.enqueue(PendingMessage::new(
            value,
            key,
            topic.to_string(),
            partition,
            partition_key,
            now_ms(),
        ))
    }

    /// Buffer an already-built pending message, enforcing the limits.
    pub(crate) fn enqueue(&mut self, message: PendingMessage) -> Result<()> {
        if self.buffered_message_count() >= self.config.max_buffer_size {
            return Err(Error::BufferOverflow);
        }
        if self.buffered_bytesize() + message.byte_size > self.config.max_buffer_bytesize {
            return Err(Error::BufferOverflow);
        }

        self.instrumentation.publish(
            EVENT_PRODUCE_MESSAGE,
            vec![
                ("topic", message.topic.clone()),
                ("buffer_size", (self.buffered_message_count() + 1).to_string()),
            ],
        );
        self.pending.push(message);
        Ok(())
    }

    /// Messages waiting in either stage.
    pub fn buffered_message_count(&self) -> usize {
        self.pending.len() + self.buffer.message_count()
    }

    /// Total bytes of keys and values waiting in either stage.
    pub fn buffered_bytesize(&self) -> usize {
        self.pending.bytesize() + self.buffer.bytesize()
    }

    /// Drive delivery until the buffer is empty or the envelope is
    /// spent: up to `max_retries` additional attempts, sleeping
    /// `retry_backoff` and refreshing metadata between attempts.
    ///
    /// A fatal per-partition code surfaces as [`Error::Kafka`] (the
    /// affected records are dropped); anything still buffered after the
    /// last attempt surfaces as [`Error::DeliveryFailed`].
    pub async fn deliver_messages(&mut self) -> Result<()> {
        let mut fatal: Vec<(TopicPartition, KafkaCode)> = Vec::new();
        let mut acked = 0usize;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.assign_partitions(&mut fatal).await;

            if !self.buffer.is_empty() {
                let mut operation =
                    ProduceOperation::new(&self.cluster, &mut self.buffer, &self.config);
                let outcome = operation.execute().await;
                acked += outcome.acked;
                fatal.extend(outcome.fatal);
            }

            if self.pending.is_empty() && self.buffer.is_empty() {
                break;
            }
            if attempt > self.config.max_retries {
                break;
            }

            tracing::warn!(
                attempt,
                remaining = self.buffered_message_count(),
                "Delivery incomplete; backing off before retry"
            );
            tokio::time::sleep(self.config.retry_backoff).await;
            if let Err(e) = self.cluster.refresh_metadata().await {
                tracing::warn!(error = %e, "Metadata refresh between delivery attempts failed");
            }
        }

        self.instrumentation.publish(
            EVENT_DELIVER_MESSAGES,
            vec![
                ("acked", acked.to_string()),
                ("attempts", attempt.to_string()),
                ("remaining", self.buffered_message_count().to_string()),
            ],
        );

        if let Some((tp, code)) = fatal.first() {
            tracing::error!(%tp, ?code, "Messages dropped on fatal broker error");
            return Err(Error::Kafka(*code));
        }

        let remaining = self.buffered_message_count();
        if remaining > 0 {
            return Err(Error::DeliveryFailed { pending: remaining });
        }
        Ok(())
    }

    /// Flush whatever is buffered, then release the cluster's
    /// connections. Best effort; never fails.
    pub async fn shutdown(mut self) {
        if self.buffered_message_count() > 0 {
            if let Err(e) = self.deliver_messages().await {
                tracing::warn!(error = %e, "Final delivery on shutdown failed");
            }
        }
        self.cluster.disconnect().await;
    }

    /// Move pending messages into the partition-keyed buffer. Messages
    /// whose topic metadata is unavailable stay pending for the next
    /// attempt; an explicit partition outside the topic's range is
    /// dropped and reported.
    async fn assign_partitions(&mut self, fatal: &mut Vec<(TopicPartition, KafkaCode)>) {
        let pending = self.pending.drain();
        if pending.is_empty() {
            return;
        }

        let mut retained = Vec::new();
        for message in pending {
            let count = match self.cluster.partition_count(&message.topic).await {
                Ok(count) if count > 0 => count,
                Ok(_) => {
                    retained.push(message);
                    continue;
                }
                Err(e) => {
                    tracing::debug!(topic = %message.topic, error = %e, "Partition count unavailable");
                    retained.push(message);
                    continue;
                }
            };

            let partition = self.partitioner.partition_for(&message, count);
            if !(0..count).contains(&partition) {
                let tp = TopicPartition::new(message.topic.clone(), partition);
                tracing::error!(%tp, count, "Partition out of range; dropping message");
                fatal.push((tp, KafkaCode::UnknownTopicOrPartition));
                continue;
            }

            self.buffer.write(
                &message.topic,
                partition,
                Record::new(message.key, message.value, message.create_time),
            );
        }

        for message in retained {
            self.pending.push(message);
        }
    }
}

/// Deliver a single message and wait for its acknowledgement.
///
/// This one-shot path always uses leader-only acks and a 10 second ack
/// timeout, regardless of any configured producer defaults.
pub async fn deliver_message(
    cluster: &Arc<Cluster>,
    value: Option<Bytes>,
    key: Option<Bytes>,
    topic: &str,
    partition: Option<i32>,
) -> Result<()> {
    let config = ProducerConfig {
        required_acks: RequiredAcks::Leader,
        ack_timeout_ms: 10_000,
        ..Default::default()
    };

    let mut producer = Producer::new(cluster.clone(), config)?;
    producer.produce(value, key, topic, partition, None)?;
    producer.deliver_messages().await
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(NO_TIMESTAMP)
}
