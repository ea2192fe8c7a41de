//! Cluster discovery and metadata cache.
//!
//! The [`Cluster`] bootstraps from seed brokers, keeps a cached snapshot
//! of topic/partition metadata, maps partitions to their leader brokers,
//! and resolves group coordinators. Producers and consumers share one
//! cluster; all of their broker traffic flows through its pool.
//!
//! Refreshes replace the whole snapshot rather than mutating entries in
//! place, so concurrent readers always observe a consistent view. At
//! most one refresh runs at a time.

pub mod pool;
pub mod retry;
pub mod seeds;

use std::collections::{BTreeSet, HashMap};

use backon::Retryable;
use nombytes::NomBytes;
use tokio::sync::{Mutex, RwLock};

use crate::config::ClientConfig;
use crate::encode::ToByte;
use crate::error::{Error, KafkaCode, Result};
use crate::network;
use crate::protocol::groups::{GroupCoordinatorRequest, parse_group_coordinator_response};
use crate::protocol::metadata::{
    MetadataRequest, MetadataResponse, PartitionMetadata, parse_metadata_response,
};
use crate::protocol::offsets::{ListOffsetsRequest, parse_list_offsets_response};
use crate::types::Offset;

use pool::BrokerPool;
use seeds::SeedBroker;

/// A broker known from metadata: numeric id plus address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub node_id: i32,
    pub host: String,
    pub port: u16,
}

/// One immutable metadata snapshot. Replaced wholesale on refresh.
#[derive(Debug, Default)]
struct MetadataCache {
    brokers: HashMap<i32, Broker>,
    topics: HashMap<String, Vec<PartitionMetadata>>,
    stale: bool,
}

/// Shared view of the broker cluster.
#[derive(Debug)]
pub struct Cluster {
    seeds: Vec<SeedBroker>,
    pool: BrokerPool,
    cache: RwLock<MetadataCache>,
    target_topics: Mutex<BTreeSet<String>>,
    refresh_lock: Mutex<()>,
    coordinators: Mutex<HashMap<String, Broker>>,
}

impl Cluster {
    /// Build a cluster from validated configuration. No connection is
    /// opened until the first operation needs one.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let seeds = seeds::parse_seed_brokers(&config.seed_brokers)?;
        let pool = BrokerPool::new(config.client_id, config.socket_timeout, config.tls);

        Ok(Self {
            seeds,
            pool,
            cache: RwLock::new(MetadataCache {
                stale: true,
                ..Default::default()
            }),
            target_topics: Mutex::new(BTreeSet::new()),
            refresh_lock: Mutex::new(()),
            coordinators: Mutex::new(HashMap::new()),
        })
    }

    /// Extend the set of topics whose metadata is kept fresh. Newly seen
    /// topics mark the cache stale so the next lookup refreshes.
    pub async fn add_target_topics<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut targets = self.target_topics.lock().await;
        let mut added = false;
        for topic in topics {
            added |= targets.insert(topic.into());
        }
        drop(targets);

        if added {
            self.mark_stale().await;
        }
    }

    /// Cached partition metadata for a topic, refreshing if the topic is
    /// new or the cache is stale.
    pub async fn partitions_for(&self, topic: &str) -> Result<Vec<PartitionMetadata>> {
        {
            let cache = self.cache.read().await;
            if !cache.stale {
                if let Some(partitions) = cache.topics.get(topic) {
                    return Ok(partitions.clone());
                }
            }
        }

        self.add_target_topics([topic]).await;
        self.refresh_metadata().await?;

        let cache = self.cache.read().await;
        cache
            .topics
            .get(topic)
            .cloned()
            .ok_or_else(|| Error::UnknownTopic(topic.to_string()))
    }

    /// Number of partitions of a topic.
    pub async fn partition_count(&self, topic: &str) -> Result<i32> {
        Ok(self.partitions_for(topic).await?.len() as i32)
    }

    /// The broker leading a partition. Fails with `LeaderNotAvailable`
    /// (and marks the cache stale so a retry refreshes) when the leader
    /// is unknown or the partition is in error.
    pub async fn get_leader(&self, topic: &str, partition: i32) -> Result<Broker> {
        let partitions = self.partitions_for(topic).await?;
        let meta = partitions
            .iter()
            .find(|p| p.partition_index == partition)
            .ok_or_else(|| Error::LeaderNotAvailable {
                topic: topic.to_string(),
                partition,
            })?;

        if !meta.is_routable() {
            self.mark_stale().await;
            return Err(Error::LeaderNotAvailable {
                topic: topic.to_string(),
                partition,
            });
        }

        let cache = self.cache.read().await;
        match cache.brokers.get(&meta.leader_id) {
            Some(broker) => Ok(broker.clone()),
            None => {
                drop(cache);
                self.mark_stale().await;
                Err(Error::LeaderNotAvailable {
                    topic: topic.to_string(),
                    partition,
                })
            }
        }
    }

    /// Mark the metadata snapshot stale; the next lookup refreshes.
    pub async fn mark_stale(&self) {
        self.cache.write().await.stale = true;
    }

    /// Fetch fresh metadata for the target topics, trying seeds in order
    /// until one answers, and swap in the new snapshot.
    pub async fn refresh_metadata(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;

        let topics: Vec<String> = {
            let targets = self.target_topics.lock().await;
            targets.iter().cloned().collect()
        };
        if topics.is_empty() {
            return Err(Error::Config(
                "cannot refresh metadata without target topics".to_string(),
            ));
        }

        let mut last_error = Error::MissingData("no seed broker reachable".to_string());
        for seed in &self.seeds {
            match self.fetch_metadata_from(seed, &topics).await {
                Ok(response) => {
                    self.apply_metadata(response).await;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(seed = %seed, error = %e, "Metadata fetch from seed failed");
                    self.pool.evict(&seed.host, seed.port);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn fetch_metadata_from(
        &self,
        seed: &SeedBroker,
        topics: &[String],
    ) -> Result<MetadataResponse> {
        let body = self
            .exchange(&seed.host, seed.port, |correlation_id, client_id| {
                MetadataRequest::new(correlation_id, client_id, topics.to_vec())
            })
            .await?;

        let raw = body.clone().into_bytes();
        let (_, response) =
            parse_metadata_response(body).map_err(|_| Error::ParsingError(raw))?;
        Ok(response)
    }

    async fn apply_metadata(&self, response: MetadataResponse) {
        let mut brokers = HashMap::with_capacity(response.brokers.len());
        for broker in response.brokers {
            brokers.insert(
                broker.node_id,
                Broker {
                    node_id: broker.node_id,
                    host: broker.host,
                    port: broker.port as u16,
                },
            );
        }

        let mut topics = HashMap::with_capacity(response.topics.len());
        let mut stale = false;
        for topic in response.topics {
            if matches!(
                topic.error_code,
                KafkaCode::LeaderNotAvailable | KafkaCode::UnknownTopicOrPartition
            ) {
                stale = true;
            }
            for partition in &topic.partitions {
                if matches!(
                    partition.error_code,
                    KafkaCode::LeaderNotAvailable
                        | KafkaCode::NotLeaderForPartition
                        | KafkaCode::UnknownTopicOrPartition
                ) {
                    stale = true;
                }
            }
            topics.insert(topic.name, topic.partitions);
        }

        tracing::debug!(
            brokers = brokers.len(),
            topics = topics.len(),
            stale,
            "Applied metadata snapshot"
        );

        *self.cache.write().await = MetadataCache {
            brokers,
            topics,
            stale,
        };
    }

    /// Translate a symbolic or numeric offset target against the
    /// partition leader. `earliest` = -2, `latest` = -1, numeric targets
    /// pass through the broker's timestamp index.
    pub async fn resolve_offset(&self, topic: &str, partition: i32, target: Offset) -> Result<i64> {
        if target.is_valid() {
            return Ok(target.value());
        }

        let leader = self.get_leader(topic, partition).await?;
        let body = self
            .exchange(&leader.host, leader.port, |correlation_id, client_id| {
                Ok(ListOffsetsRequest::new(
                    correlation_id,
                    client_id,
                    topic,
                    partition,
                    target.value(),
                ))
            })
            .await?;

        let raw = body.clone().into_bytes();
        let (_, response) =
            parse_list_offsets_response(body).map_err(|_| Error::ParsingError(raw))?;

        let entry = response
            .topics
            .iter()
            .find(|t| t.name == topic)
            .and_then(|t| t.partitions.iter().find(|p| p.partition_index == partition))
            .ok_or_else(|| Error::MissingData("partition missing from offsets response".into()))?;

        if entry.error_code != KafkaCode::None {
            if entry.error_code.is_retriable() {
                self.mark_stale().await;
            }
            return Err(Error::Kafka(entry.error_code));
        }

        Ok(entry.offset)
    }

    /// The broker coordinating a consumer group, queried from any live
    /// broker and cached until invalidated.
    pub async fn get_group_coordinator(&self, group_id: &str) -> Result<Broker> {
        if let Some(broker) = self.coordinators.lock().await.get(group_id) {
            return Ok(broker.clone());
        }

        let broker = (|| async { self.discover_coordinator(group_id).await })
            .retry(retry::coordinator_policy())
            .when(|e: &Error| e.is_retriable())
            .await?;

        self.coordinators
            .lock()
            .await
            .insert(group_id.to_string(), broker.clone());
        Ok(broker)
    }

    /// Forget a cached coordinator after `NotCoordinatorForGroup`.
    pub async fn invalidate_coordinator(&self, group_id: &str) {
        if self.coordinators.lock().await.remove(group_id).is_some() {
            tracing::debug!(group_id, "Invalidated cached group coordinator");
        }
    }

    async fn discover_coordinator(&self, group_id: &str) -> Result<Broker> {
        let mut candidates: Vec<(String, u16)> = {
            let cache = self.cache.read().await;
            cache
                .brokers
                .values()
                .map(|b| (b.host.clone(), b.port))
                .collect()
        };
        for seed in &self.seeds {
            let key = (seed.host.clone(), seed.port);
            if !candidates.contains(&key) {
                candidates.push(key);
            }
        }

        let mut last_error = Error::MissingData("no broker reachable".to_string());
        for (host, port) in candidates {
            let attempt = self
                .exchange(&host, port, |correlation_id, client_id| {
                    Ok(GroupCoordinatorRequest::new(
                        correlation_id,
                        client_id,
                        group_id,
                    ))
                })
                .await
                .and_then(|body| {
                    let raw = body.clone().into_bytes();
                    let (_, response) = parse_group_coordinator_response(body)
                        .map_err(|_| Error::ParsingError(raw))?;
                    if response.error_code != KafkaCode::None {
                        return Err(Error::Kafka(response.error_code));
                    }
                    Ok(Broker {
                        node_id: response.coordinator_id,
                        host: response.coordinator_host,
                        port: response.coordinator_port as u16,
                    })
                });

            match attempt {
                Ok(broker) => {
                    tracing::debug!(group_id, coordinator = broker.node_id, "Found coordinator");
                    return Ok(broker);
                }
                Err(e) => {
                    tracing::debug!(group_id, host, port, error = %e, "Coordinator lookup failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Run a request/response exchange against a broker, evicting the
    /// pooled connection when the transport fails.
    pub(crate) async fn exchange<R, F>(&self, host: &str, port: u16, build: F) -> Result<NomBytes>
    where
        R: ToByte,
        F: FnOnce(i32, &str) -> Result<R>,
    {
        let connection = self.pool.get(host, port).await?;
        match network::exchange(&connection, build).await {
            Ok(body) => Ok(body),
            Err(e) => {
                if connection_poisoned(&e) {
                    self.pool.evict(host, port);
                }
                Err(e)
            }
        }
    }

    /// Fire-and-forget variant of [`exchange`](Self::exchange) for
    /// `required_acks = 0` produce requests.
    pub(crate) async fn send_only<R, F>(&self, host: &str, port: u16, build: F) -> Result<()>
    where
        R: ToByte,
        F: FnOnce(i32, &str) -> Result<R>,
    {
        let connection = self.pool.get(host, port).await?;
        match network::send_only(&connection, build).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if connection_poisoned(&e) {
                    self.pool.evict(host, port);
                }
                Err(e)
            }
        }
    }

    /// Close all pooled connections. Best effort; never fails.
    pub async fn disconnect(&self) {
        self.pool.close_all();
        self.coordinators.lock().await.clear();
    }
}

/// Whether an error means the connection's stream state can no longer be
/// trusted for framing.
fn connection_poisoned(error: &Error) -> bool {
    matches!(
        error,
        Error::IoError(_) | Error::MissingData(_) | Error::CorrelationMismatch { .. }
    )
}
