//! Read accessors for exposition collaborators
//!
//! The engine is the only writer. Readers take cheap clones of the current
//! state and never block the event loop for longer than a copy.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use surge_core::{ClusterSnapshot, NodeId, NodeResources};

use crate::scheduler::SchedulerState;

/// Scheduler progress as seen from outside
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    /// Last step shipped
    pub current_step: Option<usize>,
    pub total_steps: usize,
    /// Nodes currently in the registry
    pub connected_nodes: usize,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        SchedulerStatus {
            state: SchedulerState::WaitingForNodes,
            current_step: None,
            total_steps: 0,
            connected_nodes: 0,
        }
    }
}

#[derive(Debug, Default)]
struct ViewState {
    cluster: ClusterSnapshot,
    nodes: BTreeMap<NodeId, NodeResources>,
    scheduler: SchedulerStatus,
}

/// Shared, read-only handle on the coordinator's published metrics
#[derive(Clone, Debug, Default)]
pub struct MetricsView {
    inner: Arc<RwLock<ViewState>>,
}

impl MetricsView {
    pub fn new() -> Self {
        MetricsView::default()
    }

    /// Cluster totals, averages and drop rate
    pub fn cluster(&self) -> ClusterSnapshot {
        self.inner.read().cluster.clone()
    }

    /// Last-known resource figures keyed by node id
    pub fn nodes(&self) -> BTreeMap<NodeId, NodeResources> {
        self.inner.read().nodes.clone()
    }

    pub fn scheduler(&self) -> SchedulerStatus {
        self.inner.read().scheduler.clone()
    }

    pub(crate) fn publish_cluster(&self, cluster: &ClusterSnapshot) {
        self.inner.write().cluster = cluster.clone();
    }

    pub(crate) fn publish_nodes(&self, nodes: &BTreeMap<NodeId, NodeResources>) {
        self.inner.write().nodes = nodes.clone();
    }

    pub(crate) fn publish_scheduler(&self, status: SchedulerStatus) {
        self.inner.write().scheduler = status;
    }
}
