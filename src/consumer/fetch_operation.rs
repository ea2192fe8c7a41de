//! One fetch dispatch cycle.
//!
//! A [`FetchOperation`] collects per-partition request slots, groups
//! them by partition leader, issues one fetch request per leader in
//! parallel, and decodes the returned message sets (CRC verification,
//! nested decompression, offset rebasing). Batches come back in the
//! order the slots were recorded; a partition-level problem is carried
//! on its own batch and never fails sibling batches.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;

use crate::cluster::{Broker, Cluster};
use crate::config::FetchConfig;
use crate::error::{Error, KafkaCode, Result};
use crate::instrumentation::{EVENT_FETCH_BATCH, Instrumentation};
use crate::protocol::fetch::{
    FetchPartitionRequest, FetchRequest, FetchTopicRequest, parse_fetch_response,
};
use crate::protocol::messages::parse_message_set;
use crate::types::Offset;

/// A single decoded message from a fetched batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    /// Producer-assigned timestamp, when the message carried one.
    pub create_time: Option<i64>,
}

/// The result of fetching one partition.
///
/// An empty batch is legal (nothing new past the fetch offset). A
/// partition-level failure sets `error_code`; the messages list is then
/// empty and the consumer decides whether to reset, retry, or surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBatch {
    pub topic: String,
    pub partition: i32,
    pub highwater_mark: i64,
    pub messages: Vec<FetchedMessage>,
    pub error_code: Option<KafkaCode>,
}

impl FetchedBatch {
    /// Offset of the final message, `None` when the batch is empty (the
    /// consumer's position is then unchanged).
    pub fn last_offset(&self) -> Option<i64> {
        self.messages.last().map(|m| m.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn error(topic: &str, partition: i32, code: KafkaCode) -> Self {
        Self {
            topic: topic.to_string(),
            partition,
            highwater_mark: -1,
            messages: Vec::new(),
            error_code: Some(code),
        }
    }
}

#[derive(Debug, Clone)]
struct FetchSlot {
    topic: String,
    partition: i32,
    offset: Offset,
    max_bytes: i32,
}

pub struct FetchOperation<'a> {
    cluster: &'a Arc<Cluster>,
    config: &'a FetchConfig,
    instrumentation: &'a Instrumentation,
    slots: Vec<FetchSlot>,
}

impl<'a> FetchOperation<'a> {
    pub fn new(
        cluster: &'a Arc<Cluster>,
        config: &'a FetchConfig,
        instrumentation: &'a Instrumentation,
    ) -> Self {
        Self {
            cluster,
            config,
            instrumentation,
            slots: Vec::new(),
        }
    }

    /// Record a request slot. Symbolic offsets are resolved against the
    /// partition leader during [`execute`](Self::execute).
    pub fn fetch_from_partition(
        &mut self,
        topic: &str,
        partition: i32,
        offset: Offset,
        max_bytes: Option<i32>,
    ) {
        self.slots.push(FetchSlot {
            topic: topic.to_string(),
            partition,
            offset,
            max_bytes: max_bytes.unwrap_or(self.config.max_bytes),
        });
    }

    /// Issue the recorded fetches, one request per leader, in parallel.
    /// Batches return in slot order.
    pub async fn execute(self) -> Result<Vec<FetchedBatch>> {
        if self.slots.is_empty() {
            return Ok(Vec::new());
        }

        // resolve symbolic offsets, then group routable slots by leader
        let mut resolved: Vec<(usize, FetchSlot, Option<FetchedBatch>)> = Vec::new();
        for (index, mut slot) in self.slots.iter().cloned().enumerate() {
            if !slot.offset.is_valid() {
                match self
                    .cluster
                    .resolve_offset(&slot.topic, slot.partition, slot.offset)
                    .await
                {
                    Ok(offset) => slot.offset = Offset::new(offset),
                    Err(e) => {
                        tracing::warn!(
                            topic = %slot.topic,
                            partition = slot.partition,
                            error = %e,
                            "Offset resolution failed"
                        );
                        let batch =
                            FetchedBatch::error(&slot.topic, slot.partition, error_to_code(&e));
                        resolved.push((index, slot, Some(batch)));
                        continue;
                    }
                }
            }
            resolved.push((index, slot, None));
        }

        let mut groups: HashMap<i32, (Broker, Vec<(usize, FetchSlot)>)> = HashMap::new();
        let mut batches: Vec<Option<FetchedBatch>> = vec![None; resolved.len()];

        for (index, slot, failed) in resolved {
            if let Some(batch) = failed {
                batches[index] = Some(batch);
                continue;
            }
            match self.cluster.get_leader(&slot.topic, slot.partition).await {
                Ok(broker) => {
                    groups
                        .entry(broker.node_id)
                        .or_insert_with(|| (broker, Vec::new()))
                        .1
                        .push((index, slot));
                }
                Err(e) => {
                    batches[index] = Some(FetchedBatch::error(
                        &slot.topic,
                        slot.partition,
                        error_to_code(&e),
                    ));
                }
            }
        }

        let requests = groups
            .into_values()
            .map(|(broker, slots)| self.fetch_from_leader(broker, slots));
        for leader_batches in join_all(requests).await {
            for (index, batch) in leader_batches {
                batches[index] = Some(batch);
            }
        }

        Ok(batches.into_iter().flatten().collect())
    }

    async fn fetch_from_leader(
        &self,
        broker: Broker,
        slots: Vec<(usize, FetchSlot)>,
    ) -> Vec<(usize, FetchedBatch)> {
        let mut topics: HashMap<String, Vec<FetchPartitionRequest>> = HashMap::new();
        for (_, slot) in &slots {
            topics
                .entry(slot.topic.clone())
                .or_default()
                .push(FetchPartitionRequest {
                    partition_index: slot.partition,
                    fetch_offset: slot.offset.value(),
                    max_bytes: slot.max_bytes,
                });
        }
        let topic_requests: Vec<FetchTopicRequest> = topics
            .into_iter()
            .map(|(name, partitions)| FetchTopicRequest { name, partitions })
            .collect();

        let max_wait_ms = self.config.max_wait_ms;
        let min_bytes = self.config.min_bytes;
        let response = self
            .cluster
            .exchange(&broker.host, broker.port, |correlation_id, client_id| {
                Ok(FetchRequest::new(
                    correlation_id,
                    client_id,
                    max_wait_ms,
                    min_bytes,
                    topic_requests,
                ))
            })
            .await
            .and_then(|body| {
                let raw = body.clone().into_bytes();
                parse_fetch_response(body)
                    .map(|(_, response)| response)
                    .map_err(|_| Error::ParsingError(raw))
            });

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(broker = broker.node_id, error = %e, "Fetch request failed");
                self.cluster.mark_stale().await;
                let code = error_to_code(&e);
                return slots
                    .into_iter()
                    .map(|(index, slot)| {
                        (
                            index,
                            FetchedBatch::error(&slot.topic, slot.partition, code),
                        )
                    })
                    .collect();
            }
        };

        let mut decoded: HashMap<(String, i32), FetchedBatch> = HashMap::new();
        for topic in response.topics {
            for partition in topic.partitions {
                let key = (topic.name.clone(), partition.partition_index);
                let batch = if partition.error_code != KafkaCode::None {
                    if partition.error_code.is_retriable() {
                        self.cluster.mark_stale().await;
                    }
                    FetchedBatch::error(&topic.name, key.1, partition.error_code)
                } else {
                    self.decode_batch(
                        &topic.name,
                        partition.partition_index,
                        partition.high_watermark,
                        &partition.record_set,
                    )
                };
                decoded.insert(key, batch);
            }
        }

        slots
            .into_iter()
            .map(|(index, slot)| {
                let key = (slot.topic.clone(), slot.partition);
                let batch = match decoded.remove(&key) {
                    Some(mut batch) => {
                        // compressed carriers can expand to messages from
                        // before the requested offset; drop those
                        batch.messages.retain(|m| m.offset >= slot.offset.value());
                        batch
                    }
                    None => FetchedBatch {
                        topic: slot.topic.clone(),
                        partition: slot.partition,
                        highwater_mark: -1,
                        messages: Vec::new(),
                        error_code: None,
                    },
                };
                (index, batch)
            })
            .collect()
    }

    fn decode_batch(
        &self,
        topic: &str,
        partition: i32,
        highwater_mark: i64,
        record_set: &[u8],
    ) -> FetchedBatch {
        let messages = match parse_message_set(record_set) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!(topic, partition, error = %e, "Message set decode failed");
                return FetchedBatch::error(topic, partition, KafkaCode::CorruptMessage);
            }
        };

        let messages: Vec<FetchedMessage> = messages
            .into_iter()
            .map(|m| FetchedMessage {
                topic: topic.to_string(),
                partition,
                offset: m.offset,
                key: m.key,
                value: m.value,
                create_time: (m.timestamp >= 0).then_some(m.timestamp),
            })
            .collect();

        self.instrumentation.publish(
            EVENT_FETCH_BATCH,
            vec![
                ("topic", topic.to_string()),
                ("partition", partition.to_string()),
                ("message_count", messages.len().to_string()),
                ("highwater_mark", highwater_mark.to_string()),
            ],
        );

        FetchedBatch {
            topic: topic.to_string(),
            partition,
            highwater_mark,
            messages,
            error_code: None,
        }
    }
}

fn error_to_code(error: &Error) -> KafkaCode {
    match error {
        Error::Kafka(code) => *code,
        Error::LeaderNotAvailable { .. } => KafkaCode::LeaderNotAvailable,
        Error::UnknownTopic(_) => KafkaCode::UnknownTopicOrPartition,
        _ => KafkaCode::NetworkException,
    }
}
