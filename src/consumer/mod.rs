//! Coordinated message consumption.
//!
//! The [`Consumer`] ties the group machinery together: it joins its
//! consumer group, fetches from its assigned partitions, heartbeats
//! between fetch cycles, and commits processed offsets through the
//! offset manager. The application drives it with a poll loop:
//!
//! ```rust,no_run
//! use milena::cluster::Cluster;
//! use milena::config::{ClientConfig, ConsumerConfig, FetchConfig};
//! use milena::consumer::Consumer;
//! use std::sync::Arc;
//!
//! # async fn run() -> milena::error::Result<()> {
//! let cluster = Arc::new(Cluster::new(ClientConfig::new(vec![
//!     "broker-1:9092".to_string(),
//! ]))?);
//! let mut consumer = Consumer::new(
//!     cluster,
//!     ConsumerConfig::new("my-group"),
//!     FetchConfig::default(),
//! )?;
//! consumer.subscribe("events");
//!
//! loop {
//!     for batch in consumer.poll().await? {
//!         for message in &batch.messages {
//!             // handle message.value ...
//!             consumer.mark_message_as_processed(message);
//!         }
//!     }
//! }
//! # }
//! ```

pub mod fetch_operation;
pub mod group;
pub mod heartbeat;
pub mod offset_manager;

use std::collections::HashMap;
use std::sync::Arc;

use crate::cluster::Cluster;
use crate::config::{ConsumerConfig, FetchConfig};
use crate::error::{Error, KafkaCode, Result};
use crate::instrumentation::{EVENT_PROCESS_BATCH, Instrumentation};
use crate::types::{Offset, TopicPartition};

use fetch_operation::FetchOperation;
use group::ConsumerGroup;
use heartbeat::{Heartbeat, HeartbeatOutcome};
use offset_manager::OffsetManager;

pub use fetch_operation::{FetchedBatch, FetchedMessage};

/// A group-coordinated consumer.
#[derive(Debug)]
pub struct Consumer {
    cluster: Arc<Cluster>,
    fetch_config: FetchConfig,
    start_from_beginning: bool,
    group: ConsumerGroup,
    offset_manager: OffsetManager,
    heartbeat: Heartbeat,
    /// Next fetch position per assigned partition. Symbolic values wait
    /// for resolution against the partition leader.
    positions: HashMap<TopicPartition, Offset>,
    instrumentation: Instrumentation,
}

impl Consumer {
    pub fn new(
        cluster: Arc<Cluster>,
        config: ConsumerConfig,
        fetch_config: FetchConfig,
    ) -> Result<Self> {
        Self::with_instrumentation(cluster, config, fetch_config, Instrumentation::default())
    }

    pub fn with_instrumentation(
        cluster: Arc<Cluster>,
        config: ConsumerConfig,
        fetch_config: FetchConfig,
        instrumentation: Instrumentation,
    ) -> Result<Self> {
        config.validate()?;
        fetch_config.validate()?;

        let offset_manager = OffsetManager::new(
            cluster.clone(),
            config.offset_commit_interval,
            config.offset_commit_threshold,
            instrumentation.clone(),
        );
        let heartbeat = Heartbeat::new(
            cluster.clone(),
            config.heartbeat_interval,
            instrumentation.clone(),
        );
        let start_from_beginning = config.start_from_beginning;
        let group = ConsumerGroup::new(cluster.clone(), config, instrumentation.clone());

        Ok(Self {
            cluster,
            fetch_config,
            start_from_beginning,
            group,
            offset_manager,
            heartbeat,
            positions: HashMap::new(),
            instrumentation,
        })
    }

    /// Subscribe to a topic. Takes effect on the next (re)join.
    pub fn subscribe(&mut self, topic: &str) {
        self.group.subscribe(topic);
    }

    /// The partitions currently assigned to this member.
    pub fn assignment(&self) -> &[TopicPartition] {
        self.group.assignment()
    }

    /// Run one consume cycle: ensure membership, heartbeat, fetch from
    /// every assigned partition, and commit offsets if due. Returns the
    /// fetched batches; empty batches are legal.
    pub async fn poll(&mut self) -> Result<Vec<FetchedBatch>> {
        if !self.group.is_member() {
            self.rejoin().await?;
        }

        let membership = self.group.membership();
        match self.heartbeat.trigger(&membership).await {
            Ok(HeartbeatOutcome::RebalanceRequired) => {
                self.group.rebalance_required();
                return Ok(Vec::new());
            }
            Ok(HeartbeatOutcome::MembershipLost) => {
                self.group.membership_lost();
                return Ok(Vec::new());
            }
            Ok(_) => {}
            Err(e) if e.is_retriable() => {
                tracing::warn!(error = %e, "Heartbeat failed; will retry next cycle");
            }
            Err(e) => return Err(e),
        }

        let mut operation =
            FetchOperation::new(&self.cluster, &self.fetch_config, &self.instrumentation);
        for tp in self.group.assignment() {
            let position = self
                .positions
                .get(tp)
                .copied()
                .unwrap_or(self.default_position());
            operation.fetch_from_partition(tp.topic(), tp.partition(), position, None);
        }

        let batches = operation.execute().await?;
        let mut surfaced: Option<KafkaCode> = None;

        for batch in &batches {
            let tp = TopicPartition::new(batch.topic.clone(), batch.partition);
            match batch.error_code {
                None => {
                    if let Some(last_offset) = batch.last_offset() {
                        self.positions.insert(tp, Offset::new(last_offset + 1));
                    }
                    if !batch.is_empty() {
                        self.instrumentation.publish(
                            EVENT_PROCESS_BATCH,
                            vec![
                                ("topic", batch.topic.clone()),
                                ("partition", batch.partition.to_string()),
                                ("message_count", batch.messages.len().to_string()),
                            ],
                        );
                    }
                }
                Some(KafkaCode::OffsetOutOfRange) => {
                    tracing::warn!(
                        %tp,
                        "Fetch offset out of range; resetting to default position"
                    );
                    self.positions.insert(tp, self.default_position());
                }
                Some(code) if code.is_retriable() || code == KafkaCode::NetworkException => {
                    tracing::debug!(%tp, ?code, "Transient fetch error; will retry");
                }
                Some(code) => surfaced = Some(surfaced.unwrap_or(code)),
            }
        }

        self.offset_manager
            .commit_offsets_if_necessary(&membership)
            .await
            .unwrap_or_else(|e| {
                if let Error::Kafka(code) = &e {
                    if code.is_membership_error() {
                        self.group.membership_lost();
                        return;
                    }
                }
                tracing::warn!(error = %e, "Automatic offset commit failed");
            });

        match surfaced {
            Some(code) => Err(Error::Kafka(code)),
            None => Ok(batches),
        }
    }

    /// Record a message as processed so its offset becomes committable.
    pub fn mark_message_as_processed(&mut self, message: &FetchedMessage) {
        self.offset_manager
            .mark_as_processed(&message.topic, message.partition, message.offset);
    }

    /// Commit all processed offsets now.
    pub async fn commit_offsets(&mut self) -> Result<()> {
        let membership = self.group.membership();
        self.offset_manager.commit_offsets(&membership).await
    }

    /// Commit what we can, leave the group, and drop all connections.
    /// Best effort; never fails.
    pub async fn close(mut self) {
        let membership = self.group.membership();
        if let Err(e) = self.offset_manager.commit_offsets(&membership).await {
            tracing::warn!(error = %e, "Final offset commit on close failed");
        }
        self.group.leave().await;
        self.cluster.disconnect().await;
    }

    /// (Re)join the group and reseed fetch positions from the committed
    /// offsets, falling back to the start-from policy where none exist.
    async fn rejoin(&mut self) -> Result<()> {
        self.group.join().await?;
        self.offset_manager.clear();
        self.positions.clear();

        let membership = self.group.membership();
        for tp in self.group.assignment().to_vec() {
            let committed = self
                .offset_manager
                .next_offset_for(tp.topic(), tp.partition(), &membership)
                .await?;
            let position = if committed >= 0 {
                Offset::new(committed)
            } else {
                self.default_position()
            };
            self.positions.insert(tp, position);
        }

        Ok(())
    }

    fn default_position(&self) -> Offset {
        if self.start_from_beginning {
            Offset::EARLIEST
        } else {
            Offset::LATEST
        }
    }
}
