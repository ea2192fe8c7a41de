//! Consumer offset tracking and commits.
//!
//! Tracks per-partition progress as `(processed, committed)` offsets —
//! `committed <= processed` always — and pushes commits to the group
//! coordinator when asked, when the uncommitted count reaches the
//! configured threshold, or when the commit interval elapses. Commits
//! are serialized through `&mut self`; there is no concurrent commit
//! path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cluster::Cluster;
use crate::constants::OFFSET_RETENTION_BROKER_DEFAULT;
use crate::consumer::group::GroupMembership;
use crate::error::{Error, KafkaCode, Result};
use crate::instrumentation::{EVENT_COMMIT_OFFSETS, Instrumentation};
use crate::protocol::offsets::{
    OffsetCommitPartitionRequest, OffsetCommitRequest, OffsetCommitTopicRequest,
    OffsetFetchRequest, OffsetFetchTopicRequest, parse_offset_commit_response,
    parse_offset_fetch_response,
};

#[derive(Debug, Clone, Copy, Default)]
struct OffsetEntry {
    /// The next offset to process: `last processed + 1`.
    processed: i64,
    /// The last offset sent in a successful commit.
    committed: i64,
    /// Marks since the last successful commit.
    uncommitted: usize,
}

#[derive(Debug)]
pub struct OffsetManager {
    cluster: Arc<Cluster>,
    instrumentation: Instrumentation,
    commit_interval: Duration,
    commit_threshold: usize,
    table: HashMap<(String, i32), OffsetEntry>,
    uncommitted_total: usize,
    last_commit: Instant,
}

impl OffsetManager {
    pub fn new(
        cluster: Arc<Cluster>,
        commit_interval: Duration,
        commit_threshold: usize,
        instrumentation: Instrumentation,
    ) -> Self {
        Self {
            cluster,
            instrumentation,
            commit_interval,
            commit_threshold,
            table: HashMap::new(),
            uncommitted_total: 0,
            last_commit: Instant::now(),
        }
    }

    /// Record that `offset` has been processed; the next offset for the
    /// partition becomes `offset + 1`.
    pub fn mark_as_processed(&mut self, topic: &str, partition: i32, offset: i64) {
        let entry = self
            .table
            .entry((topic.to_string(), partition))
            .or_insert(OffsetEntry {
                processed: 0,
                committed: -1,
                uncommitted: 0,
            });
        entry.processed = offset + 1;
        entry.uncommitted += 1;
        self.uncommitted_total += 1;
    }

    /// Marks accumulated since the last successful commit.
    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted_total
    }

    /// Commit every partition with uncommitted progress.
    pub async fn commit_offsets(&mut self, membership: &GroupMembership) -> Result<()> {
        let mut topics: HashMap<String, Vec<OffsetCommitPartitionRequest>> = HashMap::new();
        for ((topic, partition), entry) in &self.table {
            if entry.uncommitted == 0 {
                continue;
            }
            topics
                .entry(topic.clone())
                .or_default()
                .push(OffsetCommitPartitionRequest {
                    partition_index: *partition,
                    offset: entry.processed,
                    metadata: None,
                });
        }

        if topics.is_empty() {
            return Ok(());
        }

        let coordinator = self
            .cluster
            .get_group_coordinator(&membership.group_id)
            .await?;

        let topic_requests: Vec<OffsetCommitTopicRequest> = topics
            .into_iter()
            .map(|(name, partitions)| OffsetCommitTopicRequest { name, partitions })
            .collect();

        let body = self
            .cluster
            .exchange(&coordinator.host, coordinator.port, |correlation_id, client_id| {
                Ok(OffsetCommitRequest::new(
                    correlation_id,
                    client_id,
                    &membership.group_id,
                    membership.generation_id,
                    &membership.member_id,
                    OFFSET_RETENTION_BROKER_DEFAULT,
                    topic_requests,
                ))
            })
            .await?;
        let raw = body.clone().into_bytes();
        let (_, response) =
            parse_offset_commit_response(body).map_err(|_| Error::ParsingError(raw))?;

        for topic in &response.topics {
            for partition in &topic.partitions {
                if partition.error_code != KafkaCode::None {
                    if partition.error_code == KafkaCode::NotCoordinatorForGroup {
                        self.cluster
                            .invalidate_coordinator(&membership.group_id)
                            .await;
                    }
                    return Err(Error::Kafka(partition.error_code));
                }
            }
        }

        let mut committed = 0usize;
        for entry in self.table.values_mut() {
            if entry.uncommitted > 0 {
                entry.committed = entry.processed;
                committed += entry.uncommitted;
                entry.uncommitted = 0;
            }
        }
        self.uncommitted_total = 0;
        self.last_commit = Instant::now();

        tracing::debug!(
            group_id = %membership.group_id,
            marks = committed,
            "Committed offsets"
        );
        self.instrumentation.publish(
            EVENT_COMMIT_OFFSETS,
            vec![
                ("group_id", membership.group_id.clone()),
                ("marks", committed.to_string()),
            ],
        );

        Ok(())
    }

    /// Commit when the threshold or the interval says so.
    pub async fn commit_offsets_if_necessary(
        &mut self,
        membership: &GroupMembership,
    ) -> Result<()> {
        let threshold_reached =
            self.commit_threshold > 0 && self.uncommitted_total >= self.commit_threshold;
        let interval_elapsed = !self.commit_interval.is_zero()
            && self.last_commit.elapsed() >= self.commit_interval;

        if threshold_reached || interval_elapsed {
            self.commit_offsets(membership).await?;
        }
        Ok(())
    }

    /// The next offset to consume for a partition, from the committed
    /// offsets stored at the coordinator. `-1` means nothing has been
    /// committed and the caller applies its start-from policy.
    pub async fn next_offset_for(
        &mut self,
        topic: &str,
        partition: i32,
        membership: &GroupMembership,
    ) -> Result<i64> {
        let coordinator = self
            .cluster
            .get_group_coordinator(&membership.group_id)
            .await?;

        let body = self
            .cluster
            .exchange(&coordinator.host, coordinator.port, |correlation_id, client_id| {
                Ok(OffsetFetchRequest::new(
                    correlation_id,
                    client_id,
                    &membership.group_id,
                    vec![OffsetFetchTopicRequest {
                        name: topic.to_string(),
                        partitions: vec![partition],
                    }],
                ))
            })
            .await?;
        let raw = body.clone().into_bytes();
        let (_, response) =
            parse_offset_fetch_response(body).map_err(|_| Error::ParsingError(raw))?;

        let entry = response
            .topics
            .iter()
            .find(|t| t.name == topic)
            .and_then(|t| t.partitions.iter().find(|p| p.partition_index == partition))
            .ok_or_else(|| {
                Error::MissingData("partition missing from offset fetch response".to_string())
            })?;

        if entry.error_code != KafkaCode::None {
            if entry.error_code == KafkaCode::NotCoordinatorForGroup {
                self.cluster
                    .invalidate_coordinator(&membership.group_id)
                    .await;
            }
            return Err(Error::Kafka(entry.error_code));
        }

        if entry.offset >= 0 {
            // align local bookkeeping with the stored position
            let slot = self
                .table
                .entry((topic.to_string(), partition))
                .or_default();
            slot.processed = entry.offset;
            slot.committed = entry.offset;
            slot.uncommitted = 0;
        }

        Ok(entry.offset)
    }

    /// Drop all tracked offsets; used when the assignment changes.
    pub fn clear(&mut self) {
        self.table.clear();
        self.uncommitted_total = 0;
    }

    #[cfg(test)]
    fn entry(&self, topic: &str, partition: i32) -> Option<OffsetEntry> {
        self.table.get(&(topic.to_string(), partition)).copied()
    }
}
