//! Coordinator engine - the single writer of registry and snapshot state
//!
//! Connection tasks, the ramp timer and the re-aggregation timer all feed one
//! task. Every registry and snapshot mutation happens inside it, in event
//! arrival order, so no two handlers ever race on shared state.
//!
//! Loop per event:
//! 1. Connected     → admit, send `register`
//! 2. Message       → parse, record report, re-aggregate, emit record
//! 3. Disconnected  → remove node, forget its pass-through figures
//! 4. Step timer    → evaluate the due ramp step, ship directives
//! 5. Aggregate tick → re-aggregate so silent nodes age out

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use surge_core::{Inbound, NodeId, Outbound, ReportRecord, SurgeError, TelemetryReport};

use crate::aggregator::{AggregateOutcome, MetricsAggregator};
use crate::config::CoordinatorConfig;
use crate::registry::{DirectiveSink, NodeRegistry};
use crate::scheduler::{RampScheduler, Tick};
use crate::view::{MetricsView, SchedulerStatus};

/// Events delivered to the engine by connection tasks
pub enum EngineEvent {
    /// New connection; the engine replies with the allocated id
    Connected {
        sink: Box<dyn DirectiveSink>,
        reply: oneshot::Sender<NodeId>,
    },
    /// One raw protocol line from a node
    Message { node: NodeId, line: String },
    /// A line from a node exceeded the length limit and was skipped
    Oversized { node: NodeId },
    /// Connection closed
    Disconnected { node: NodeId },
}

impl std::fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineEvent::Connected { .. } => f.write_str("Connected"),
            EngineEvent::Message { node, line } => {
                write!(f, "Message {{ node: {node}, len: {} }}", line.len())
            }
            EngineEvent::Oversized { node } => write!(f, "Oversized {{ node: {node} }}"),
            EngineEvent::Disconnected { node } => write!(f, "Disconnected {{ node: {node} }}"),
        }
    }
}

/// Engine counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub admitted: u64,
    pub disconnected: u64,
    pub reports_accepted: u64,
    pub reports_dropped: u64,
    pub malformed: u64,
    pub ignored: u64,
    pub directives_sent: u64,
    pub send_failures: u64,
    pub steps_shipped: u64,
    pub stalls: u64,
}

/// Coordinator engine
pub struct Engine {
    config: CoordinatorConfig,
    registry: NodeRegistry,
    scheduler: RampScheduler,
    aggregator: MetricsAggregator,
    view: MetricsView,
    /// Row sink for accepted reports
    records: Option<mpsc::UnboundedSender<ReportRecord>>,
    /// Step currently held for lack of nodes
    stalled_step: Option<usize>,
    stats: EngineStats,
}

impl Engine {
    pub fn new(config: CoordinatorConfig, view: MetricsView) -> Self {
        let scheduler = RampScheduler::new(config.ramp.clone(), config.empty_backoff);
        let aggregator = MetricsAggregator::new(config.stale_threshold);
        let engine = Engine {
            config,
            registry: NodeRegistry::new(),
            scheduler,
            aggregator,
            view,
            records: None,
            stalled_step: None,
            stats: EngineStats::default(),
        };
        engine.publish_scheduler();
        engine
    }

    /// Publish every accepted report on `records`
    pub fn with_records(mut self, records: mpsc::UnboundedSender<ReportRecord>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &RampScheduler {
        &self.scheduler
    }

    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.aggregator
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Admit a connection and greet it with its id
    pub fn handle_connect(&mut self, sink: Box<dyn DirectiveSink>, now: Instant) -> NodeId {
        let id = self.registry.admit(sink, now);
        self.stats.admitted += 1;
        info!(node = %id, nodes = self.registry.len(), "node admitted");

        if self.send(id, Outbound::Register { node_id: id }).is_err() {
            self.drop_node(id);
        }
        self.publish_scheduler();
        id
    }

    /// Handle one raw line from a node
    pub fn handle_message(&mut self, node: NodeId, line: &str, now: Instant) {
        let metrics = match Inbound::parse(line) {
            Ok(Inbound::Report { metrics }) => metrics,
            Ok(Inbound::Unknown) => {
                self.stats.ignored += 1;
                debug!(node = %node, "ignoring unrecognized message type");
                return;
            }
            Err(e) => {
                self.stats.malformed += 1;
                warn!(node = %node, error = %e, "discarding malformed message");
                return;
            }
        };

        let report = TelemetryReport::from_value(&metrics);
        if !self.registry.record_report(node, metrics, now) {
            self.stats.reports_dropped += 1;
            debug!(node = %node, "report from unknown node dropped");
            return;
        }
        self.stats.reports_accepted += 1;

        self.aggregator.record_resources(node, &report);
        self.emit_record(node, report);
        self.aggregate(now);
    }

    /// Count a line the transport dropped for exceeding the length limit
    pub fn handle_oversized(&mut self, node: NodeId) {
        self.stats.malformed += 1;
        warn!(
            node = %node,
            limit = self.config.max_line_length,
            "discarding oversized message"
        );
    }

    /// Handle a closed connection. Repeated calls are harmless.
    pub fn handle_disconnect(&mut self, node: NodeId) {
        if self.registry.remove(node) {
            self.stats.disconnected += 1;
            info!(node = %node, nodes = self.registry.len(), "node disconnected");
        }
        self.aggregator.forget(node);
        self.view.publish_nodes(self.aggregator.resources());
        self.publish_scheduler();
    }

    /// Evaluate the due ramp step. Returns the delay until the next
    /// evaluation, or `None` once the ramp is finished.
    pub fn handle_step(&mut self) -> Option<Duration> {
        let nodes = self.registry.ids();
        let next = match self.scheduler.on_tick(&nodes) {
            Tick::Ship {
                step,
                total,
                assignments,
                next,
            } => {
                self.stalled_step = None;
                self.stats.steps_shipped += 1;
                info!(step, total, nodes = assignments.len(), "shipping ramp step");

                let mut failed = Vec::new();
                for (node, clients) in assignments {
                    debug!(node = %node, step, clients, "ramp directive");
                    if self.send(node, Outbound::ramp(clients, step)).is_err() {
                        failed.push(node);
                    }
                }
                for node in failed {
                    self.drop_node(node);
                }

                if next.is_none() {
                    info!(steps = self.scheduler.plan().len(), "ramp complete");
                }
                next
            }
            Tick::Stall { step, retry } => {
                self.stats.stalls += 1;
                if self.stalled_step != Some(step) {
                    info!(step, "no nodes connected, holding ramp step");
                    self.stalled_step = Some(step);
                }
                Some(retry)
            }
            Tick::Done => None,
        };
        self.publish_scheduler();
        next
    }

    /// Periodic re-aggregation
    pub fn handle_aggregate(&mut self, now: Instant) {
        self.aggregate(now);
    }

    /// Drive the engine until every event sender is gone or `shutdown`
    /// resolves.
    pub async fn run<F>(
        mut self,
        mut events: mpsc::Receiver<EngineEvent>,
        shutdown: F,
    ) -> EngineStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut step_deadline = if self.scheduler.is_done() {
            None
        } else {
            Some(Instant::now() + self.config.start_delay)
        };

        let mut aggregate_tick = tokio::time::interval(self.config.aggregate_interval);
        aggregate_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            steps = self.scheduler.plan().len(),
            interval = ?self.scheduler.plan().interval,
            "coordinator engine started"
        );

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("event channel closed");
                        break;
                    };
                    self.dispatch(event);
                }
                _ = sleep_until_opt(step_deadline) => {
                    step_deadline = self.handle_step().map(|delay| Instant::now() + delay);
                }
                _ = aggregate_tick.tick() => {
                    self.handle_aggregate(Instant::now());
                }
                _ = &mut shutdown => {
                    info!("coordinator engine shutting down");
                    break;
                }
            }
        }

        self.stats
    }

    fn dispatch(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Connected { sink, reply } => {
                let id = self.handle_connect(sink, Instant::now());
                if reply.send(id).is_err() {
                    // Connection task is gone already
                    self.handle_disconnect(id);
                }
            }
            EngineEvent::Message { node, line } => {
                self.handle_message(node, &line, Instant::now())
            }
            EngineEvent::Oversized { node } => self.handle_oversized(node),
            EngineEvent::Disconnected { node } => self.handle_disconnect(node),
        }
    }

    fn send(&mut self, node: NodeId, message: Outbound) -> Result<(), SurgeError> {
        match self.registry.send(node, message) {
            Ok(()) => {
                self.stats.directives_sent += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.send_failures += 1;
                debug!(node = %node, error = %e, "send failed");
                Err(e)
            }
        }
    }

    /// A failed send counts as a disconnect
    fn drop_node(&mut self, node: NodeId) {
        info!(node = %node, "connection closed under send, removing node");
        self.handle_disconnect(node);
    }

    fn aggregate(&mut self, now: Instant) {
        let outcome = self.aggregator.aggregate(&self.registry, now);
        if let AggregateOutcome::Updated { active_nodes } = outcome {
            let snapshot = self.aggregator.snapshot();
            debug!(
                active_nodes,
                total_clients = snapshot.total_clients,
                drop_rate = snapshot.drop_rate,
                "cluster snapshot updated"
            );
            self.view.publish_cluster(snapshot);
        }
        self.view.publish_nodes(self.aggregator.resources());
    }

    fn emit_record(&mut self, node: NodeId, report: TelemetryReport) {
        let Some(records) = &self.records else {
            return;
        };
        let record = ReportRecord {
            timestamp: Utc::now(),
            label: self.config.label.clone(),
            step: self.scheduler.current_step().map(|s| s as u64),
            node_id: node,
            report,
        };
        if records.send(record).is_err() {
            warn!("report sink closed, no longer recording reports");
            self.records = None;
        }
    }

    fn publish_scheduler(&self) {
        self.view.publish_scheduler(SchedulerStatus {
            state: self.scheduler.state(),
            current_step: self.scheduler.current_step(),
            total_steps: self.scheduler.plan().len(),
            connected_nodes: self.registry.len(),
        });
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
