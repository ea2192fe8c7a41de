//! Producer-side message staging.
//!
//! Messages pass through two stages: the [`PendingQueue`] holds them as
//! produced, before a partition is assigned; the [`MessageBuffer`] holds
//! them keyed by `(topic, partition)` once the partitioner has run.
//! Within a partition, insertion order is preserved through encoding and
//! across retries. Records leave the buffer only on acknowledgement or
//! on a fatal per-partition error.

use std::collections::HashMap;

use bytes::Bytes;

use crate::protocol::messages::Record;

/// A produced message waiting for partition assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub value: Option<Bytes>,
    pub key: Option<Bytes>,
    pub topic: String,
    pub partition: Option<i32>,
    pub partition_key: Option<Bytes>,
    /// Milliseconds since the epoch at produce time.
    pub create_time: i64,
    /// `|key| + |value|`, the size charged against the buffer limits.
    pub byte_size: usize,
}

impl PendingMessage {
    pub fn new(
        value: Option<Bytes>,
        key: Option<Bytes>,
        topic: String,
        partition: Option<i32>,
        partition_key: Option<Bytes>,
        create_time: i64,
    ) -> Self {
        let byte_size = key.as_ref().map(|k| k.len()).unwrap_or(0)
            + value.as_ref().map(|v| v.len()).unwrap_or(0);
        Self {
            value,
            key,
            topic,
            partition,
            partition_key,
            create_time,
            byte_size,
        }
    }
}

/// FIFO queue of messages not yet assigned to a partition.
#[derive(Debug, Default)]
pub struct PendingQueue {
    messages: Vec<PendingMessage>,
    bytesize: usize,
}

impl PendingQueue {
    pub fn push(&mut self, message: PendingMessage) {
        self.bytesize += message.byte_size;
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn bytesize(&self) -> usize {
        self.bytesize
    }

    /// Take every queued message, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<PendingMessage> {
        self.bytesize = 0;
        std::mem::take(&mut self.messages)
    }
}

/// Partition-assigned records awaiting delivery, keyed by
/// `(topic, partition)` with running totals.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    buffer: HashMap<(String, i32), Vec<Record>>,
    message_count: usize,
    bytesize: usize,
}

impl MessageBuffer {
    /// Append a record to a partition's FIFO sequence.
    pub fn write(&mut self, topic: &str, partition: i32, record: Record) {
        self.message_count += 1;
        self.bytesize += record.key.as_ref().map(|k| k.len()).unwrap_or(0)
            + record.value.as_ref().map(|v| v.len()).unwrap_or(0);
        self.buffer
            .entry((topic.to_string(), partition))
            .or_default()
            .push(record);
    }

    pub fn message_count(&self) -> usize {
        self.message_count
    }

    pub fn bytesize(&self) -> usize {
        self.bytesize
    }

    pub fn is_empty(&self) -> bool {
        self.message_count == 0
    }

    /// Every `(topic, partition)` currently holding records.
    pub fn partition_keys(&self) -> Vec<(String, i32)> {
        self.buffer.keys().cloned().collect()
    }

    /// The buffered records of one partition, in insertion order.
    pub fn messages_for(&self, topic: &str, partition: i32) -> Option<&[Record]> {
        self.buffer
            .get(&(topic.to_string(), partition))
            .map(|records| records.as_slice())
    }

    /// Drop a partition's records (on ack or on a fatal error) and
    /// return how many were removed.
    pub fn clear_partition(&mut self, topic: &str, partition: i32) -> usize {
        match self.buffer.remove(&(topic.to_string(), partition)) {
            Some(records) => {
                self.message_count -= records.len();
                self.bytesize -= records
                    .iter()
                    .map(|r| {
                        r.key.as_ref().map(|k| k.len()).unwrap_or(0)
                            + r.value.as_ref().map(|v| v.len()).unwrap_or(0)
                    })
                    .sum::<usize>();
                records.len()
            }
            None => 0,
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.message_count = 0;
        self.bytesize = 0;
    }
}
