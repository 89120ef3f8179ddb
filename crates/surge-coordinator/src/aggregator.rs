//! Cluster metrics aggregation
//!
//! Folds the registry's latest per-node reports into one [`ClusterSnapshot`].
//! A node counts only if its last report is younger than the staleness
//! threshold and carries a valid `connected` figure. QoE figures are plain
//! means of node-level averages, not weighted by client count.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use surge_core::{ClusterSnapshot, NodeId, NodeResources, TelemetryReport};

use crate::registry::NodeRegistry;

/// Fractional net loss between two consecutive totals.
///
/// Growth never yields a negative rate, and a zero previous total yields 0.
pub fn drop_rate(previous_total: u64, current_total: u64) -> f64 {
    if previous_total == 0 || current_total >= previous_total {
        return 0.0;
    }
    (previous_total - current_total) as f64 / previous_total as f64
}

/// Result of one aggregation pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateOutcome {
    /// Snapshot recomputed from this many nodes
    Updated { active_nodes: usize },
    /// No active node; snapshot left as it was
    Unchanged,
}

/// Metrics aggregator
#[derive(Debug)]
pub struct MetricsAggregator {
    stale_threshold: Duration,
    snapshot: ClusterSnapshot,
    /// Total from the previous successful aggregation
    previous_total: u64,
    /// Per-node pass-through figures
    resources: BTreeMap<NodeId, NodeResources>,
}

impl MetricsAggregator {
    pub fn new(stale_threshold: Duration) -> Self {
        MetricsAggregator {
            stale_threshold,
            snapshot: ClusterSnapshot::default(),
            previous_total: 0,
            resources: BTreeMap::new(),
        }
    }

    pub fn snapshot(&self) -> &ClusterSnapshot {
        &self.snapshot
    }

    pub fn resources(&self) -> &BTreeMap<NodeId, NodeResources> {
        &self.resources
    }

    pub fn previous_total(&self) -> u64 {
        self.previous_total
    }

    /// Republish a node's resource figures as reported
    pub fn record_resources(&mut self, id: NodeId, report: &TelemetryReport) {
        self.resources.insert(id, report.resources.clone());
    }

    /// Drop a disconnected node's pass-through figures
    pub fn forget(&mut self, id: NodeId) {
        self.resources.remove(&id);
    }

    /// Recompute the snapshot from the registry as of `now`
    pub fn aggregate(&mut self, registry: &NodeRegistry, now: Instant) -> AggregateOutcome {
        let active: Vec<TelemetryReport> = registry
            .snapshot()
            .into_iter()
            .filter(|node| {
                now.saturating_duration_since(node.last_report_at) < self.stale_threshold
            })
            .filter_map(|node| node.latest_metrics.as_ref())
            .map(TelemetryReport::from_value)
            .filter(TelemetryReport::is_valid)
            .collect();

        if active.is_empty() {
            return AggregateOutcome::Unchanged;
        }

        let count = active.len() as f64;
        let mean =
            |field: fn(&TelemetryReport) -> f64| active.iter().map(field).sum::<f64>() / count;

        // A single absurd count must not overflow the total
        let total_clients = active
            .iter()
            .filter_map(|r| r.connected)
            .fold(0u64, |acc, connected| acc.saturating_add(connected));
        let rate = drop_rate(self.previous_total, total_clients);
        self.previous_total = total_clients;

        self.snapshot = ClusterSnapshot {
            total_clients,
            avg_startup: mean(|r| r.avg_startup),
            avg_bitrate: mean(|r| r.avg_bitrate),
            avg_buffers: mean(|r| r.avg_buffers),
            avg_buffer_time: mean(|r| r.avg_buffer_time),
            drop_rate: rate,
            active_nodes: active.len(),
            updated_at: Some(Utc::now()),
        };

        AggregateOutcome::Updated {
            active_nodes: active.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use surge_core::Outbound;
    use tokio::sync::mpsc;

    use crate::config::STALE_THRESHOLD;

    fn admit(registry: &mut NodeRegistry, now: Instant) -> NodeId {
        let (tx, _rx) = mpsc::unbounded_channel::<Outbound>();
        registry.admit(Box::new(tx), now)
    }

    #[test]
    fn test_drop_rate_formula() {
        assert_eq!(drop_rate(0, 0), 0.0);
        assert_eq!(drop_rate(0, 10), 0.0);
        assert_eq!(drop_rate(10, 15), 0.0);
        assert_eq!(drop_rate(10, 10), 0.0);
        assert_eq!(drop_rate(10, 5), 0.5);
        assert_eq!(drop_rate(10, 0), 1.0);
    }

    proptest! {
        #[test]
        fn prop_drop_rate_bounds(prev in 0u64..1_000_000, current in 0u64..1_000_000) {
            let rate = drop_rate(prev, current);
            prop_assert!((0.0..=1.0).contains(&rate));
            if prev > current {
                let expected = (prev - current) as f64 / prev as f64;
                prop_assert!((rate - expected).abs() < 1e-12);
            } else {
                prop_assert_eq!(rate, 0.0);
            }
        }
    }

    #[test]
    fn test_sums_and_averages() {
        let mut registry = NodeRegistry::new();
        let mut aggregator = MetricsAggregator::new(STALE_THRESHOLD);
        let t0 = Instant::now();

        let a = admit(&mut registry, t0);
        let b = admit(&mut registry, t0);
        registry.record_report(
            a,
            json!({
                "connected": 10,
                "avgStartup": 1000,
                "avgBitrate": 3000,
                "avgBuffers": 1,
                "avgBufferTime": 200
            }),
            t0,
        );
        registry.record_report(
            b,
            json!({
                "connected": 5,
                "avgStartup": 500,
                "avgBitrate": 1000,
                "avgBuffers": 3,
                "avgBufferTime": 600
            }),
            t0,
        );

        let outcome = aggregator.aggregate(&registry, t0);
        assert_eq!(outcome, AggregateOutcome::Updated { active_nodes: 2 });

        let snap = aggregator.snapshot();
        assert_eq!(snap.total_clients, 15);
        // Unweighted: node A's 10 clients count the same as node B's 5
        assert_eq!(snap.avg_startup, 750.0);
        assert_eq!(snap.avg_bitrate, 2000.0);
        assert_eq!(snap.avg_buffers, 2.0);
        assert_eq!(snap.avg_buffer_time, 400.0);
        assert_eq!(snap.drop_rate, 0.0);
        assert_eq!(snap.active_nodes, 2);
        assert!(snap.updated_at.is_some());
    }

    #[test]
    fn test_silent_node_goes_stale() {
        let mut registry = NodeRegistry::new();
        let mut aggregator = MetricsAggregator::new(STALE_THRESHOLD);
        let t0 = Instant::now();

        let a = admit(&mut registry, t0);
        let b = admit(&mut registry, t0);
        registry.record_report(a, json!({"connected": 10}), t0);
        registry.record_report(b, json!({"connected": 5}), t0);
        aggregator.aggregate(&registry, t0);
        assert_eq!(aggregator.snapshot().total_clients, 15);

        // A keeps reporting, B goes silent for 31 seconds
        let t31 = t0 + Duration::from_secs(31);
        registry.record_report(a, json!({"connected": 10}), t31);
        aggregator.aggregate(&registry, t31);

        let snap = aggregator.snapshot();
        assert_eq!(snap.total_clients, 10);
        assert_eq!(snap.active_nodes, 1);
        assert!((snap.drop_rate - 5.0 / 15.0).abs() < 1e-9);
        assert_eq!(aggregator.previous_total(), 10);
    }

    #[test]
    fn test_stale_node_excluded_regardless_of_values() {
        let mut registry = NodeRegistry::new();
        let mut aggregator = MetricsAggregator::new(STALE_THRESHOLD);
        let t0 = Instant::now();

        let fresh = admit(&mut registry, t0);
        let stale = admit(&mut registry, t0);
        registry.record_report(stale, json!({"connected": 1_000_000, "avgStartup": 99999}), t0);

        let t30 = t0 + Duration::from_secs(30);
        registry.record_report(fresh, json!({"connected": 1, "avgStartup": 10}), t30);
        aggregator.aggregate(&registry, t30);

        assert_eq!(aggregator.snapshot().total_clients, 1);
        assert_eq!(aggregator.snapshot().avg_startup, 10.0);
    }

    #[test]
    fn test_invalid_reports_excluded() {
        let mut registry = NodeRegistry::new();
        let mut aggregator = MetricsAggregator::new(STALE_THRESHOLD);
        let t0 = Instant::now();

        let good = admit(&mut registry, t0);
        let missing = admit(&mut registry, t0);
        let _silent = admit(&mut registry, t0);
        registry.record_report(good, json!({"connected": 3, "avgBitrate": 900}), t0);
        registry.record_report(missing, json!({"avgBitrate": 100}), t0);

        aggregator.aggregate(&registry, t0);
        assert_eq!(aggregator.snapshot().total_clients, 3);
        assert_eq!(aggregator.snapshot().avg_bitrate, 900.0);
        assert_eq!(aggregator.snapshot().active_nodes, 1);
    }

    #[test]
    fn test_empty_active_set_leaves_snapshot_unchanged() {
        let mut registry = NodeRegistry::new();
        let mut aggregator = MetricsAggregator::new(STALE_THRESHOLD);
        let t0 = Instant::now();

        // Nothing at all
        assert_eq!(aggregator.aggregate(&registry, t0), AggregateOutcome::Unchanged);
        assert_eq!(aggregator.snapshot(), &ClusterSnapshot::default());

        let a = admit(&mut registry, t0);
        registry.record_report(a, json!({"connected": 12, "avgStartup": 400}), t0);
        aggregator.aggregate(&registry, t0);
        let before = aggregator.snapshot().clone();

        // Everyone stale: no reset to zero, no drop signal
        let later = t0 + Duration::from_secs(45);
        assert_eq!(aggregator.aggregate(&registry, later), AggregateOutcome::Unchanged);
        assert_eq!(aggregator.snapshot(), &before);
        assert_eq!(aggregator.previous_total(), 12);
    }

    #[test]
    fn test_growth_after_loss() {
        let mut registry = NodeRegistry::new();
        let mut aggregator = MetricsAggregator::new(STALE_THRESHOLD);
        let t0 = Instant::now();
        let a = admit(&mut registry, t0);

        for (connected, expected) in [(20u64, 0.0), (15, 0.25), (30, 0.0), (0, 1.0)] {
            registry.record_report(a, json!({ "connected": connected }), t0);
            aggregator.aggregate(&registry, t0);
            assert!((aggregator.snapshot().drop_rate - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_huge_connected_counts_saturate() {
        let mut registry = NodeRegistry::new();
        let mut aggregator = MetricsAggregator::new(STALE_THRESHOLD);
        let t0 = Instant::now();

        let a = admit(&mut registry, t0);
        let b = admit(&mut registry, t0);
        let c = admit(&mut registry, t0);
        registry.record_report(a, json!({ "connected": u64::MAX }), t0);
        registry.record_report(b, json!({"connected": 1}), t0);
        registry.record_report(c, json!({"connected": 1e300}), t0);

        assert_eq!(
            aggregator.aggregate(&registry, t0),
            AggregateOutcome::Updated { active_nodes: 3 }
        );
        assert_eq!(aggregator.snapshot().total_clients, u64::MAX);

        registry.record_report(a, json!({"connected": 4}), t0);
        registry.record_report(c, json!({"connected": 5}), t0);
        aggregator.aggregate(&registry, t0);
        assert_eq!(aggregator.snapshot().total_clients, 10);
        assert!(aggregator.snapshot().drop_rate > 0.99);
    }

    #[test]
    fn test_resources_pass_through() {
        let mut aggregator = MetricsAggregator::new(STALE_THRESHOLD);
        let id = NodeId::new(1);
        let report = TelemetryReport::from_value(&json!({
            "connected": 2,
            "cpu": 0.9,
            "mem": 0.5,
            "failures": 3
        }));

        aggregator.record_resources(id, &report);
        let figures = &aggregator.resources()[&id];
        assert_eq!(figures.cpu, Some(0.9));
        assert_eq!(figures.mem, Some(0.5));
        assert_eq!(figures.clients, None);
        assert_eq!(figures.failures, Some(3.0));

        aggregator.forget(id);
        assert!(aggregator.resources().is_empty());
    }
}
