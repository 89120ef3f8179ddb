//! Node registry - the set of currently connected workers

use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use surge_core::{NodeId, Outbound, SurgeError, SurgeResult};

/// Outbound half of a node's connection.
///
/// Delivery is fire-and-forget: implementations queue the message and return
/// immediately. A closed connection hands the message back.
pub trait DirectiveSink: Send {
    fn deliver(&self, message: Outbound) -> Result<(), Outbound>;
}

impl DirectiveSink for mpsc::UnboundedSender<Outbound> {
    fn deliver(&self, message: Outbound) -> Result<(), Outbound> {
        self.send(message).map_err(|e| e.0)
    }
}

/// One connected worker
pub struct NodeEntry {
    pub id: NodeId,
    sink: Box<dyn DirectiveSink>,
    pub admitted_at: Instant,
    /// Most recent accepted report (admission time until the first one)
    pub last_report_at: Instant,
    /// Raw payload of the most recent report
    pub latest_metrics: Option<Value>,
}

impl std::fmt::Debug for NodeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeEntry")
            .field("id", &self.id)
            .field("admitted_at", &self.admitted_at)
            .field("last_report_at", &self.last_report_at)
            .field("latest_metrics", &self.latest_metrics)
            .finish()
    }
}

/// Registry of live nodes, iterated in admission order
#[derive(Debug, Default)]
pub struct NodeRegistry {
    /// Ids are allocated monotonically, so key order is admission order
    nodes: BTreeMap<NodeId, NodeEntry>,
    /// Sequence number of the last admitted node
    last_seq: u64,
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry::default()
    }

    /// Admit a new connection and allocate the next id
    pub fn admit(&mut self, sink: Box<dyn DirectiveSink>, now: Instant) -> NodeId {
        self.last_seq += 1;
        let id = NodeId::new(self.last_seq);
        self.nodes.insert(
            id,
            NodeEntry {
                id,
                sink,
                admitted_at: now,
                last_report_at: now,
                latest_metrics: None,
            },
        );
        id
    }

    /// Remove a node. Returns false if it was already gone.
    pub fn remove(&mut self, id: NodeId) -> bool {
        self.nodes.remove(&id).is_some()
    }

    /// Store a report for a live node. Reports for unknown nodes are dropped.
    pub fn record_report(&mut self, id: NodeId, payload: Value, now: Instant) -> bool {
        match self.nodes.get_mut(&id) {
            Some(entry) => {
                entry.last_report_at = now;
                entry.latest_metrics = Some(payload);
                true
            }
            None => false,
        }
    }

    /// Live nodes in admission order
    pub fn snapshot(&self) -> Vec<&NodeEntry> {
        self.nodes.values().collect()
    }

    /// Live node ids in admission order
    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeEntry> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Queue a message on a node's connection without waiting for delivery
    pub fn send(&self, id: NodeId, message: Outbound) -> SurgeResult<()> {
        let entry = self.nodes.get(&id).ok_or(SurgeError::UnknownNode(id))?;
        entry
            .sink
            .deliver(message)
            .map_err(|_| SurgeError::SendFailed(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel_sink() -> (Box<dyn DirectiveSink>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Box::new(tx), rx)
    }

    #[test]
    fn test_admit_assigns_sequential_ids() {
        let mut registry = NodeRegistry::new();
        let now = Instant::now();

        let a = registry.admit(channel_sink().0, now);
        let b = registry.admit(channel_sink().0, now);

        assert_eq!(a.to_string(), "node-1");
        assert_eq!(b.to_string(), "node-2");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_ids_never_recycled() {
        let mut registry = NodeRegistry::new();
        let now = Instant::now();

        let a = registry.admit(channel_sink().0, now);
        let b = registry.admit(channel_sink().0, now);
        registry.remove(a);
        registry.remove(b);
        assert!(registry.is_empty());

        let c = registry.admit(channel_sink().0, now);
        assert_eq!(c, NodeId::new(3));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = NodeRegistry::new();
        let id = registry.admit(channel_sink().0, Instant::now());

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_snapshot_in_admission_order() {
        let mut registry = NodeRegistry::new();
        let now = Instant::now();
        let ids: Vec<_> = (0..5).map(|_| registry.admit(channel_sink().0, now)).collect();
        registry.remove(ids[1]);

        let order: Vec<_> = registry.snapshot().iter().map(|n| n.id).collect();
        assert_eq!(order, vec![ids[0], ids[2], ids[3], ids[4]]);
        assert_eq!(registry.ids(), order);
    }

    #[test]
    fn test_record_report_updates_entry() {
        let mut registry = NodeRegistry::new();
        let admitted = Instant::now();
        let id = registry.admit(channel_sink().0, admitted);
        assert_eq!(registry.get(id).unwrap().last_report_at, admitted);
        assert!(registry.get(id).unwrap().latest_metrics.is_none());

        let later = admitted + std::time::Duration::from_secs(3);
        assert!(registry.record_report(id, json!({"connected": 4}), later));

        let entry = registry.get(id).unwrap();
        assert_eq!(entry.last_report_at, later);
        assert_eq!(entry.latest_metrics, Some(json!({"connected": 4})));
    }

    #[test]
    fn test_report_for_removed_node_dropped() {
        let mut registry = NodeRegistry::new();
        let now = Instant::now();
        let id = registry.admit(channel_sink().0, now);
        registry.remove(id);

        assert!(!registry.record_report(id, json!({"connected": 1}), now));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_send_delivers_to_sink() {
        let mut registry = NodeRegistry::new();
        let (sink, mut rx) = channel_sink();
        let id = registry.admit(sink, Instant::now());

        registry.send(id, Outbound::ramp(3, 0)).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Outbound::ramp(3, 0));
    }

    #[test]
    fn test_send_to_closed_connection_fails() {
        let mut registry = NodeRegistry::new();
        let (sink, rx) = channel_sink();
        let id = registry.admit(sink, Instant::now());
        drop(rx);

        assert!(matches!(
            registry.send(id, Outbound::ramp(1, 0)),
            Err(SurgeError::SendFailed(n)) if n == id
        ));
        assert!(matches!(
            registry.send(NodeId::new(99), Outbound::ramp(1, 0)),
            Err(SurgeError::UnknownNode(_))
        ));
    }
}
