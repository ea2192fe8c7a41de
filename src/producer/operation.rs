//! One produce dispatch cycle.
//!
//! A [`ProduceOperation`] takes whatever the buffer holds, groups it by
//! partition leader, sends one produce request per leader, and settles
//! each partition from the per-partition response codes:
//!
//! - success: the partition's records leave the buffer;
//! - retriable error (stale leadership, timeouts, transport failure):
//!   records stay for the caller's retry envelope and the metadata cache
//!   is marked stale;
//! - fatal error: records are dropped and the code is reported.
//!
//! With `required_acks = 0` no response exists; the buffer is cleared as
//! soon as the requests are written.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cluster::{Broker, Cluster};
use crate::config::ProducerConfig;
use crate::error::{Error, KafkaCode};
use crate::producer::buffer::MessageBuffer;
use crate::protocol::messages::encode_message_set;
use crate::protocol::produce::{
    ProducePartitionRequest, ProduceRequest, ProduceTopicRequest, parse_produce_response,
};
use crate::types::TopicPartition;

/// What one `execute` pass settled.
#[derive(Debug, Default)]
pub struct OperationOutcome {
    /// Messages acknowledged (or optimistically cleared under acks=0).
    pub acked: usize,
    /// Partitions dropped on non-retriable codes.
    pub fatal: Vec<(TopicPartition, KafkaCode)>,
}

pub struct ProduceOperation<'a> {
    cluster: &'a Arc<Cluster>,
    buffer: &'a mut MessageBuffer,
    config: &'a ProducerConfig,
}

impl<'a> ProduceOperation<'a> {
    pub fn new(
        cluster: &'a Arc<Cluster>,
        buffer: &'a mut MessageBuffer,
        config: &'a ProducerConfig,
    ) -> Self {
        Self {
            cluster,
            buffer,
            config,
        }
    }

    /// Dispatch everything currently buffered. Partitions whose leader
    /// is unknown are skipped (their records stay buffered) after the
    /// cluster has been marked stale by the failed lookup.
    pub async fn execute(&mut self) -> OperationOutcome {
        let mut outcome = OperationOutcome::default();

        let mut by_leader: HashMap<i32, (Broker, Vec<(String, i32)>)> = HashMap::new();
        for (topic, partition) in self.buffer.partition_keys() {
            match self.cluster.get_leader(&topic, partition).await {
                Ok(broker) => {
                    by_leader
                        .entry(broker.node_id)
                        .or_insert_with(|| (broker, Vec::new()))
                        .1
                        .push((topic, partition));
                }
                Err(e) => {
                    tracing::debug!(topic, partition, error = %e, "No leader; keeping records buffered");
                }
            }
        }

        for (_, (broker, partitions)) in by_leader {
            self.send_to_leader(&broker, &partitions, &mut outcome).await;
        }

        outcome
    }

    async fn send_to_leader(
        &mut self,
        broker: &Broker,
        partitions: &[(String, i32)],
        outcome: &mut OperationOutcome,
    ) {
        let topic_requests = self.build_topic_requests(partitions, outcome);
        if topic_requests.is_empty() {
            return;
        }

        let required_acks = self.config.required_acks.to_wire();
        let ack_timeout_ms = self.config.ack_timeout_ms;

        if required_acks == 0 {
            // no response will come; clear optimistically once written
            let sent = self
                .cluster
                .send_only(&broker.host, broker.port, |correlation_id, client_id| {
                    Ok(ProduceRequest::new(
                        correlation_id,
                        client_id,
                        required_acks,
                        ack_timeout_ms,
                        topic_requests,
                    ))
                })
                .await;

            match sent {
                Ok(()) => {
                    for (topic, partition) in partitions {
                        outcome.acked += self.buffer.clear_partition(topic, *partition);
                    }
                }
                Err(e) => {
                    tracing::warn!(broker = broker.node_id, error = %e, "Produce write failed");
                    self.cluster.mark_stale().await;
                }
            }
            return;
        }

        let response = self
            .cluster
            .exchange(&broker.host, broker.port, |correlation_id, client_id| {
                Ok(ProduceRequest::new(
                    correlation_id,
                    client_id,
                    required_acks,
                    ack_timeout_ms,
                    topic_requests,
                ))
            })
            .await
            .and_then(|body| {
                let raw = body.clone().into_bytes();
                parse_produce_response(body)
                    .map(|(_, response)| response)
                    .map_err(|_| Error::ParsingError(raw))
            });

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(broker = broker.node_id, error = %e, "Produce request failed");
                self.cluster.mark_stale().await;
                return;
            }
        };

        for topic in response.topics {
            for partition in topic.partitions {
                let tp = TopicPartition::new(topic.name.clone(), partition.partition_index);
                match partition.error_code {
                    KafkaCode::None => {
                        let cleared = self
                            .buffer
                            .clear_partition(&topic.name, partition.partition_index);
                        outcome.acked += cleared;
                        tracing::debug!(
                            topic = %topic.name,
                            partition = partition.partition_index,
                            base_offset = partition.base_offset,
                            messages = cleared,
                            "Partition acknowledged"
                        );
                    }
                    code if code.is_retriable() => {
                        tracing::warn!(%tp, ?code, "Retriable produce error; keeping records");
                        self.cluster.mark_stale().await;
                    }
                    code => {
                        tracing::error!(%tp, ?code, "Fatal produce error; dropping records");
                        self.buffer
                            .clear_partition(&topic.name, partition.partition_index);
                        outcome.fatal.push((tp, code));
                    }
                }
            }
        }
    }

    /// Encode the per-partition message sets, compressing when the codec
    /// is set and the set meets the threshold. Encoding failures are
    /// fatal for the affected partition.
    fn build_topic_requests(
        &mut self,
        partitions: &[(String, i32)],
        outcome: &mut OperationOutcome,
    ) -> Vec<ProduceTopicRequest> {
        let mut topics: HashMap<String, Vec<ProducePartitionRequest>> = HashMap::new();

        for (topic, partition) in partitions {
            let records = match self.buffer.messages_for(topic, *partition) {
                Some(records) => records,
                None => continue,
            };

            let set = encode_message_set(
                records,
                self.config.compression_codec,
                self.config.compression_threshold,
            );
            match set {
                Ok(message_set) => {
                    topics
                        .entry(topic.clone())
                        .or_default()
                        .push(ProducePartitionRequest {
                            partition_index: *partition,
                            message_set,
                        });
                }
                Err(e) => {
                    tracing::error!(topic, partition, error = %e, "Message set encoding failed");
                    self.buffer.clear_partition(topic, *partition);
                    outcome
                        .fatal
                        .push((TopicPartition::new(topic.clone(), *partition), KafkaCode::CorruptMessage));
                }
            }
        }

        topics
            .into_iter()
            .map(|(name, partitions)| ProduceTopicRequest { name, partitions })
            .collect()
    }
}

// The settlement paths above are exercised through the producer's
// delivery tests; leader grouping needs a reachable cluster and is
// covered by the end-to-end scenarios.
