//! Consumer group membership.
//!
//! State machine per member:
//!
//! ```text
//! Initial -> DiscoveringCoordinator -> Joining -> Syncing -> Stable
//! Stable  -> Joining   (heartbeat answered RebalanceInProgress)
//! any     -> Failed    (unrecoverable)
//! any     -> Left      (clean close)
//! ```
//!
//! Every group request carries the current `(member_id, generation_id)`.
//! `UnknownMemberId` and `IllegalGeneration` clear the member id and
//! force a fresh join; `RebalanceInProgress` rejoins with the member id
//! kept. The member elected leader computes the assignment: round-robin
//! over the sorted `(topic, partition)` pairs across the sorted member
//! ids.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;

use crate::cluster::Cluster;
use crate::config::ConsumerConfig;
use crate::error::{Error, KafkaCode, Result};
use crate::instrumentation::{
    EVENT_JOIN_GROUP, EVENT_LEAVE_GROUP, EVENT_SYNC_GROUP, Instrumentation,
};
use crate::protocol::groups::{
    JoinGroupMember, JoinGroupRequest, LeaveGroupRequest, MemberAssignment, MemberMetadata,
    ROUND_ROBIN_PROTOCOL, SyncGroupRequest, parse_join_group_response, parse_leave_group_response,
    parse_sync_group_response,
};
use crate::types::TopicPartition;

/// Attempts at the join/sync cycle before giving up. Rebalance storms
/// bounce members through several rounds; each bounce restarts the
/// cycle.
const MAX_JOIN_ATTEMPTS: usize = 10;

/// Identity a member stamps on group-scoped requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMembership {
    pub group_id: String,
    pub member_id: String,
    pub generation_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Initial,
    DiscoveringCoordinator,
    Joining,
    Syncing,
    Stable,
    Failed,
    Left,
}

#[derive(Debug)]
pub struct ConsumerGroup {
    cluster: Arc<Cluster>,
    config: ConsumerConfig,
    instrumentation: Instrumentation,
    topics: BTreeSet<String>,
    state: GroupState,
    member_id: String,
    generation_id: i32,
    assignment: Vec<TopicPartition>,
}

impl ConsumerGroup {
    pub fn new(
        cluster: Arc<Cluster>,
        config: ConsumerConfig,
        instrumentation: Instrumentation,
    ) -> Self {
        Self {
            cluster,
            config,
            instrumentation,
            topics: BTreeSet::new(),
            state: GroupState::Initial,
            member_id: String::new(),
            generation_id: -1,
            assignment: Vec::new(),
        }
    }

    /// Add a topic to the subscription. Joining again picks it up; an
    /// established member must rejoin for the change to take effect.
    pub fn subscribe(&mut self, topic: &str) {
        if self.topics.insert(topic.to_string()) && self.state == GroupState::Stable {
            self.state = GroupState::Joining;
        }
    }

    pub fn subscribed_topics(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|s| s.as_str())
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    /// Whether the member holds a live assignment.
    pub fn is_member(&self) -> bool {
        self.state == GroupState::Stable
    }

    pub fn assignment(&self) -> &[TopicPartition] {
        &self.assignment
    }

    pub fn membership(&self) -> GroupMembership {
        GroupMembership {
            group_id: self.config.group_id.clone(),
            member_id: self.member_id.clone(),
            generation_id: self.generation_id,
        }
    }

    /// A heartbeat (or commit) saw the coordinator start a rebalance:
    /// rejoin with the member id kept.
    pub fn rebalance_required(&mut self) {
        if self.state == GroupState::Stable {
            tracing::info!(group_id = %self.config.group_id, "Rebalance required; will rejoin");
            self.state = GroupState::Joining;
        }
    }

    /// The member's `(member_id, generation_id)` was rejected; discard
    /// it and join from scratch.
    pub fn membership_lost(&mut self) {
        tracing::info!(group_id = %self.config.group_id, "Group membership lost; resetting");
        self.member_id.clear();
        self.generation_id = -1;
        self.assignment.clear();
        if self.state != GroupState::Left {
            self.state = GroupState::Joining;
        }
    }

    /// Run the join/sync cycle until the member is stable.
    pub async fn join(&mut self) -> Result<()> {
        if self.topics.is_empty() {
            return Err(Error::Config(
                "cannot join a group without subscribed topics".to_string(),
            ));
        }
        if self.state == GroupState::Left {
            return Err(Error::Config("group was closed".to_string()));
        }

        for attempt in 1..=MAX_JOIN_ATTEMPTS {
            self.state = GroupState::DiscoveringCoordinator;
            let coordinator = self
                .cluster
                .get_group_coordinator(&self.config.group_id)
                .await?;

            self.state = GroupState::Joining;
            match self.join_round(&coordinator).await {
                Ok(()) => {
                    self.state = GroupState::Stable;
                    return Ok(());
                }
                Err(Error::Kafka(code)) if code.is_membership_error() => {
                    if code != KafkaCode::RebalanceInProgress {
                        self.member_id.clear();
                        self.generation_id = -1;
                    }
                    tracing::debug!(attempt, ?code, "Join bounced; retrying");
                }
                Err(Error::Kafka(code)) if code.is_retriable() => {
                    self.cluster
                        .invalidate_coordinator(&self.config.group_id)
                        .await;
                    tracing::debug!(attempt, ?code, "Coordinator unsettled; retrying join");
                }
                Err(e) if e.is_retriable() => {
                    self.cluster
                        .invalidate_coordinator(&self.config.group_id)
                        .await;
                    tracing::debug!(attempt, error = %e, "Transport error during join; retrying");
                }
                Err(e) => {
                    self.state = GroupState::Failed;
                    return Err(e);
                }
            }
        }

        self.state = GroupState::Failed;
        Err(Error::Kafka(KafkaCode::RebalanceInProgress))
    }

    /// One JoinGroup + SyncGroup round against the coordinator.
    async fn join_round(&mut self, coordinator: &crate::cluster::Broker) -> Result<()> {
        let metadata = MemberMetadata::new(self.topics.iter().cloned().collect()).to_bytes()?;
        let session_timeout_ms = self.config.session_timeout.as_millis() as i32;
        let group_id = self.config.group_id.clone();
        let member_id = self.member_id.clone();

        let body = self
            .cluster
            .exchange(&coordinator.host, coordinator.port, |correlation_id, client_id| {
                Ok(JoinGroupRequest::new(
                    correlation_id,
                    client_id,
                    &group_id,
                    session_timeout_ms,
                    &member_id,
                    vec![(ROUND_ROBIN_PROTOCOL.to_string(), metadata)],
                ))
            })
            .await?;
        let raw = body.clone().into_bytes();
        let (_, join) =
            parse_join_group_response(body).map_err(|_| Error::ParsingError(raw))?;

        if join.error_code != KafkaCode::None {
            return Err(Error::Kafka(join.error_code));
        }

        self.member_id = join.member_id.clone();
        self.generation_id = join.generation_id;

        tracing::info!(
            group_id = %self.config.group_id,
            member_id = %self.member_id,
            generation_id = self.generation_id,
            leader = join.is_leader(),
            "Joined group"
        );
        self.instrumentation.publish(
            EVENT_JOIN_GROUP,
            vec![
                ("group_id", self.config.group_id.clone()),
                ("generation_id", self.generation_id.to_string()),
                ("leader", join.is_leader().to_string()),
            ],
        );

        self.state = GroupState::Syncing;
        let assignments = if join.is_leader() {
            self.compute_assignments(&join.members).await?
        } else {
            Vec::new()
        };

        let group_id = self.config.group_id.clone();
        let member_id = self.member_id.clone();
        let generation_id = self.generation_id;
        let body = self
            .cluster
            .exchange(&coordinator.host, coordinator.port, |correlation_id, client_id| {
                Ok(SyncGroupRequest::new(
                    correlation_id,
                    client_id,
                    &group_id,
                    generation_id,
                    &member_id,
                    assignments,
                ))
            })
            .await?;
        let raw = body.clone().into_bytes();
        let (_, sync) =
            parse_sync_group_response(body).map_err(|_| Error::ParsingError(raw))?;

        if sync.error_code != KafkaCode::None {
            return Err(Error::Kafka(sync.error_code));
        }

        let assignment = MemberAssignment::from_bytes(&sync.assignment)?;
        self.assignment = assignment
            .topics
            .into_iter()
            .flat_map(|(topic, partitions)| {
                partitions
                    .into_iter()
                    .map(move |p| TopicPartition::new(topic.clone(), p))
            })
            .collect();
        self.assignment.sort();

        tracing::info!(
            group_id = %self.config.group_id,
            partitions = self.assignment.len(),
            "Received partition assignment"
        );
        self.instrumentation.publish(
            EVENT_SYNC_GROUP,
            vec![
                ("group_id", self.config.group_id.clone()),
                ("partitions", self.assignment.len().to_string()),
            ],
        );

        Ok(())
    }

    /// Leader-side assignment: union the members' subscriptions, list
    /// every `(topic, partition)` pair, and deal them round-robin.
    async fn compute_assignments(
        &self,
        members: &[JoinGroupMember],
    ) -> Result<Vec<(String, Bytes)>> {
        let mut subscriptions: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut all_topics: BTreeSet<String> = BTreeSet::new();
        for member in members {
            let metadata = MemberMetadata::from_bytes(&member.metadata)?;
            all_topics.extend(metadata.topics.iter().cloned());
            subscriptions.insert(member.member_id.clone(), metadata.topics);
        }

        let mut topic_partitions: Vec<(String, i32)> = Vec::new();
        for topic in &all_topics {
            let mut partitions: Vec<i32> = self
                .cluster
                .partitions_for(topic)
                .await?
                .iter()
                .map(|p| p.partition_index)
                .collect();
            partitions.sort_unstable();
            for partition in partitions {
                topic_partitions.push((topic.clone(), partition));
            }
        }

        let member_ids: Vec<String> = subscriptions.keys().cloned().collect();
        let assignments = round_robin_assignment(&member_ids, &topic_partitions);

        assignments
            .into_iter()
            .map(|(member_id, topics)| {
                MemberAssignment::new(topics)
                    .to_bytes()
                    .map(|bytes| (member_id, bytes))
            })
            .collect()
    }

    /// Send LeaveGroup on clean close. Best effort.
    pub async fn leave(&mut self) {
        if !self.member_id.is_empty() {
            let group_id = self.config.group_id.clone();
            let member_id = self.member_id.clone();
            let result = async {
                let coordinator = self.cluster.get_group_coordinator(&group_id).await?;
                let body = self
                    .cluster
                    .exchange(&coordinator.host, coordinator.port, |correlation_id, client_id| {
                        Ok(LeaveGroupRequest::new(
                            correlation_id,
                            client_id,
                            &group_id,
                            &member_id,
                        ))
                    })
                    .await?;
                let raw = body.clone().into_bytes();
                let (_, response) =
                    parse_leave_group_response(body).map_err(|_| Error::ParsingError(raw))?;
                if response.error_code != KafkaCode::None {
                    return Err(Error::Kafka(response.error_code));
                }
                Ok(())
            }
            .await;

            match result {
                Ok(()) => tracing::info!(group_id = %self.config.group_id, "Left group"),
                Err(e) => {
                    tracing::warn!(group_id = %self.config.group_id, error = %e, "LeaveGroup failed")
                }
            }
            self.instrumentation.publish(
                EVENT_LEAVE_GROUP,
                vec![("group_id", self.config.group_id.clone())],
            );
        }

        self.member_id.clear();
        self.generation_id = -1;
        self.assignment.clear();
        self.state = GroupState::Left;
    }
}

/// Deal sorted `(topic, partition)` pairs across sorted member ids.
pub fn round_robin_assignment(
    member_ids: &[String],
    topic_partitions: &[(String, i32)],
) -> BTreeMap<String, Vec<(String, Vec<i32>)>> {
    let mut sorted_members: Vec<&String> = member_ids.iter().collect();
    sorted_members.sort();
    let mut sorted_pairs: Vec<&(String, i32)> = topic_partitions.iter().collect();
    sorted_pairs.sort();

    let mut per_member: BTreeMap<String, BTreeMap<String, Vec<i32>>> = BTreeMap::new();
    if sorted_members.is_empty() {
        return BTreeMap::new();
    }

    for (i, (topic, partition)) in sorted_pairs.iter().enumerate() {
        let member = sorted_members[i % sorted_members.len()];
        per_member
            .entry(member.clone())
            .or_default()
            .entry(topic.clone())
            .or_default()
            .push(*partition);
    }

    sorted_members
        .into_iter()
        .map(|member| {
            let topics = per_member
                .remove(member)
                .map(|topics| topics.into_iter().collect())
                .unwrap_or_default();
            (member.clone(), topics)
        })
        .collect()
}
