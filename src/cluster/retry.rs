//! Backoff policy for coordinator discovery.
//!
//! The producer's delivery retries are an explicit loop (they refresh
//! metadata between attempts); coordinator discovery has no such
//! side-channel and uses a plain exponential policy.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Policy for group coordinator discovery.
///
/// Coordinator lookups fail transiently while the broker side elects or
/// loads the group (`GroupCoordinatorNotAvailable`,
/// `GroupLoadInProgress`). Moderate delays, capped, with jitter to keep
/// a herd of restarting consumers from sweeping the cluster in lockstep.
pub fn coordinator_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(5)
        .with_jitter()
}
