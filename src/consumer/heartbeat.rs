//! Group heartbeat pacing.
//!
//! The consumer loop calls [`Heartbeat::trigger`] between fetch cycles;
//! a request actually goes out only when the configured interval has
//! elapsed. The interval must stay well under the group's session
//! timeout or the coordinator expels the member.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cluster::Cluster;
use crate::consumer::group::GroupMembership;
use crate::error::{Error, KafkaCode, Result};
use crate::instrumentation::{EVENT_HEARTBEAT, Instrumentation};
use crate::protocol::groups::{HeartbeatRequest, parse_heartbeat_response};

/// What a heartbeat round told us about the membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The interval has not elapsed; nothing was sent.
    Skipped,
    /// The coordinator accepted the heartbeat.
    Alive,
    /// The group is rebalancing; rejoin before the next fetch.
    RebalanceRequired,
    /// The member's id or generation was rejected; rejoin from scratch.
    MembershipLost,
}

#[derive(Debug)]
pub struct Heartbeat {
    cluster: Arc<Cluster>,
    instrumentation: Instrumentation,
    interval: Duration,
    last_heartbeat: Instant,
}

impl Heartbeat {
    pub fn new(cluster: Arc<Cluster>, interval: Duration, instrumentation: Instrumentation) -> Self {
        Self {
            cluster,
            instrumentation,
            interval,
            last_heartbeat: Instant::now(),
        }
    }

    /// Send a heartbeat if the interval has elapsed.
    pub async fn trigger(&mut self, membership: &GroupMembership) -> Result<HeartbeatOutcome> {
        if self.last_heartbeat.elapsed() < self.interval {
            return Ok(HeartbeatOutcome::Skipped);
        }
        self.send(membership).await
    }

    /// Send a heartbeat unconditionally.
    pub async fn send(&mut self, membership: &GroupMembership) -> Result<HeartbeatOutcome> {
        let coordinator = self
            .cluster
            .get_group_coordinator(&membership.group_id)
            .await?;

        let body = self
            .cluster
            .exchange(&coordinator.host, coordinator.port, |correlation_id, client_id| {
                Ok(HeartbeatRequest::new(
                    correlation_id,
                    client_id,
                    &membership.group_id,
                    membership.generation_id,
                    &membership.member_id,
                ))
            })
            .await?;
        let raw = body.clone().into_bytes();
        let (_, response) =
            parse_heartbeat_response(body).map_err(|_| Error::ParsingError(raw))?;

        self.last_heartbeat = Instant::now();
        self.instrumentation.publish(
            EVENT_HEARTBEAT,
            vec![
                ("group_id", membership.group_id.clone()),
                ("generation_id", membership.generation_id.to_string()),
                ("error_code", format!("{:?}", response.error_code)),
            ],
        );

        match response.error_code {
            KafkaCode::None => Ok(HeartbeatOutcome::Alive),
            KafkaCode::RebalanceInProgress => {
                tracing::info!(group_id = %membership.group_id, "Heartbeat: rebalance in progress");
                Ok(HeartbeatOutcome::RebalanceRequired)
            }
            KafkaCode::UnknownMemberId | KafkaCode::IllegalGeneration => {
                tracing::info!(
                    group_id = %membership.group_id,
                    code = ?response.error_code,
                    "Heartbeat: membership rejected"
                );
                Ok(HeartbeatOutcome::MembershipLost)
            }
            KafkaCode::NotCoordinatorForGroup | KafkaCode::GroupCoordinatorNotAvailable => {
                self.cluster
                    .invalidate_coordinator(&membership.group_id)
                    .await;
                Err(Error::Kafka(response.error_code))
            }
            code => Err(Error::Kafka(code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    fn heartbeat(interval: Duration) -> Heartbeat {
        let mut config = ClientConfig::new(vec!["127.0.0.1:1".to_string()]);
        config.socket_timeout = Duration::from_millis(100);
        let cluster = Arc::new(Cluster::new(config).unwrap());
        Heartbeat::new(cluster, interval, Instrumentation::default())
    }

    fn membership() -> GroupMembership {
        GroupMembership {
            group_id: "g".to_string(),
            member_id: "m1".to_string(),
            generation_id: 1,
        }
    }

    #[tokio::test]
    async fn test_trigger_skips_inside_interval() {
        let mut heartbeat = heartbeat(Duration::from_secs(3600));
        // interval far in the future: no network touch, even unreachable
        let outcome = heartbeat.trigger(&membership()).await.unwrap();
        assert_eq!(outcome, HeartbeatOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_trigger_fails_fast_when_due_and_unreachable() {
        let mut heartbeat = heartbeat(Duration::from_millis(0));
        assert!(heartbeat.trigger(&membership()).await.is_err());
    }
}
