//! Cluster-wide views produced by the coordinator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{NodeId, TelemetryReport};

/// Aggregated view across all active nodes
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    /// Sum of `connected` over active nodes
    pub total_clients: u64,
    /// Mean of node-level startup delay averages
    pub avg_startup: f64,
    /// Mean of node-level bitrate averages
    pub avg_bitrate: f64,
    /// Mean of node-level buffer-event averages
    pub avg_buffers: f64,
    /// Mean of node-level buffer-time averages
    pub avg_buffer_time: f64,
    /// Net fractional loss of clients since the previous aggregation
    pub drop_rate: f64,
    /// Number of nodes that contributed
    pub active_nodes: usize,
    /// Wall-clock time of the last change
    pub updated_at: Option<DateTime<Utc>>,
}

/// One accepted report, annotated for row-oriented sinks
#[derive(Clone, Debug, PartialEq)]
pub struct ReportRecord {
    pub timestamp: DateTime<Utc>,
    /// Run label
    pub label: String,
    /// Last ramp step shipped when the report arrived
    pub step: Option<u64>,
    pub node_id: NodeId,
    pub report: TelemetryReport,
}
