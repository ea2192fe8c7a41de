//! Partition selection for produced messages.
//!
//! Selection precedence: an explicit partition wins; otherwise the
//! partition key (falling back to the message key) is hashed with the
//! broker family's murmur2 variant, so keyed messages land on the same
//! partition as every other client using the stock partitioner. With no
//! key at all, a producer-local counter seeded at a random start spreads
//! messages round-robin.

use std::sync::atomic::{AtomicUsize, Ordering};

use murmur2::{KAFKA_SEED, murmur2};
use rand::Rng;

use crate::producer::buffer::PendingMessage;

#[derive(Debug)]
pub struct Partitioner {
    counter: AtomicUsize,
}

impl Default for Partitioner {
    fn default() -> Self {
        Self::new()
    }
}

impl Partitioner {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(rand::thread_rng().gen()),
        }
    }

    /// Pick the partition for a message. `partition_count` must be
    /// positive; the result lies in `[0, partition_count)`.
    pub fn partition_for(&self, message: &PendingMessage, partition_count: i32) -> i32 {
        debug_assert!(partition_count > 0);

        if let Some(partition) = message.partition {
            return partition;
        }

        let hash_key = message.partition_key.as_ref().or(message.key.as_ref());
        match hash_key {
            Some(key) => hash_partition(key, partition_count),
            None => {
                let n = self.counter.fetch_add(1, Ordering::Relaxed);
                (n % partition_count as usize) as i32
            }
        }
    }
}

/// Kafka's stock keyed partitioning: murmur2 with the Kafka seed,
/// sign bit masked, modulo the partition count.
fn hash_partition(key: &[u8], partition_count: i32) -> i32 {
    let hash = murmur2(key, KAFKA_SEED);
    ((hash & 0x7fffffff) as i32) % partition_count
}
