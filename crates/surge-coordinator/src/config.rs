//! Coordinator configuration

use std::net::SocketAddr;
use std::time::Duration;

use surge_core::{SurgeError, SurgeResult};

use crate::codec::MAX_LINE_LENGTH;

/// Reports older than this are excluded from aggregation
pub const STALE_THRESHOLD: Duration = Duration::from_secs(30);

/// Fixed load curve: one cluster-wide client target per step
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RampPlan {
    /// Targets in order
    pub steps: Vec<u64>,
    /// Wait between two steps
    pub interval: Duration,
}

impl RampPlan {
    pub fn new(steps: Vec<u64>, interval: Duration) -> Self {
        RampPlan { steps, interval }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn target(&self, step: usize) -> Option<u64> {
        self.steps.get(step).copied()
    }
}

impl Default for RampPlan {
    fn default() -> Self {
        RampPlan {
            steps: vec![1, 2, 4, 6, 8, 10, 15, 20],
            interval: Duration::from_secs(60),
        }
    }
}

/// Coordinator configuration
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Address worker nodes connect to
    pub listen_addr: SocketAddr,
    /// Load curve
    pub ramp: RampPlan,
    /// Retry delay while a due step has no nodes to go to
    pub empty_backoff: Duration,
    /// Delay before the first step is evaluated
    pub start_delay: Duration,
    /// Maximum report age counted by the aggregator
    pub stale_threshold: Duration,
    /// Periodic re-aggregation cadence
    pub aggregate_interval: Duration,
    /// Run label attached to report records
    pub label: String,
    /// Inbound event queue depth
    pub event_buffer: usize,
    /// Longest accepted protocol line, in bytes
    pub max_line_length: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ramp: RampPlan::default(),
            empty_backoff: Duration::from_secs(1),
            start_delay: Duration::ZERO,
            stale_threshold: STALE_THRESHOLD,
            aggregate_interval: Duration::from_secs(5),
            label: "default".to_string(),
            event_buffer: 1024,
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> SurgeResult<()> {
        if self.ramp.interval.is_zero() {
            return Err(SurgeError::Config("ramp interval must be non-zero".into()));
        }
        if self.empty_backoff.is_zero() {
            return Err(SurgeError::Config("empty-node backoff must be non-zero".into()));
        }
        if self.stale_threshold.is_zero() {
            return Err(SurgeError::Config("stale threshold must be non-zero".into()));
        }
        if self.aggregate_interval.is_zero() {
            return Err(SurgeError::Config("aggregate interval must be non-zero".into()));
        }
        if self.event_buffer == 0 {
            return Err(SurgeError::Config("event buffer must be non-zero".into()));
        }
        if self.max_line_length == 0 {
            return Err(SurgeError::Config("max line length must be non-zero".into()));
        }
        Ok(())
    }
}
