//! Metrics exposition over HTTP
//!
//! `GET /metrics` renders the coordinator's view as OpenMetrics text on every
//! scrape; `GET /status` returns the same data as JSON.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use surge_coordinator::{MetricsView, SchedulerStatus};
use surge_core::{ClusterSnapshot, NodeId, NodeResources, SurgeError, SurgeResult};

pub const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

type FloatGauge = Gauge<f64, AtomicU64>;

/// Label set of the per-node families
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NodeLabels {
    pub node: String,
}

/// Gauges mirroring a [`MetricsView`]
#[derive(Debug)]
pub struct Exposition {
    registry: Registry,
    total_clients: Gauge,
    avg_startup: FloatGauge,
    avg_bitrate: FloatGauge,
    avg_buffers: FloatGauge,
    avg_buffer_time: FloatGauge,
    drop_rate: FloatGauge,
    active_nodes: Gauge,
    connected_nodes: Gauge,
    ramp_step: Gauge,
    node_cpu: Family<NodeLabels, FloatGauge>,
    node_mem: Family<NodeLabels, FloatGauge>,
    node_clients: Family<NodeLabels, FloatGauge>,
    node_failures: Family<NodeLabels, FloatGauge>,
    /// Held across refresh and encode so scrapes never see a half-filled family
    scrape: Mutex<()>,
}

impl Exposition {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let total_clients = Gauge::default();
        registry.register(
            "surge_total_clients",
            "Connected clients summed over active nodes",
            total_clients.clone(),
        );
        let avg_startup = FloatGauge::default();
        registry.register(
            "surge_avg_startup_ms",
            "Mean of node-level average startup delay",
            avg_startup.clone(),
        );
        let avg_bitrate = FloatGauge::default();
        registry.register(
            "surge_avg_bitrate_kbps",
            "Mean of node-level average bitrate",
            avg_bitrate.clone(),
        );
        let avg_buffers = FloatGauge::default();
        registry.register(
            "surge_avg_buffer_events",
            "Mean of node-level average buffering events",
            avg_buffers.clone(),
        );
        let avg_buffer_time = FloatGauge::default();
        registry.register(
            "surge_avg_buffer_time_ms",
            "Mean of node-level average buffering time",
            avg_buffer_time.clone(),
        );
        let drop_rate = FloatGauge::default();
        registry.register(
            "surge_drop_rate",
            "Fractional net client loss since the previous aggregation",
            drop_rate.clone(),
        );
        let active_nodes = Gauge::default();
        registry.register(
            "surge_active_nodes",
            "Nodes counted in the last aggregation",
            active_nodes.clone(),
        );
        let connected_nodes = Gauge::default();
        registry.register(
            "surge_connected_nodes",
            "Nodes currently connected",
            connected_nodes.clone(),
        );
        let ramp_step = Gauge::default();
        registry.register(
            "surge_ramp_step",
            "Last ramp step shipped (-1 before the first)",
            ramp_step.clone(),
        );

        let node_cpu = Family::<NodeLabels, FloatGauge>::default();
        registry.register("surge_node_cpu", "CPU load reported by the node", node_cpu.clone());
        let node_mem = Family::<NodeLabels, FloatGauge>::default();
        registry.register("surge_node_mem", "Memory ratio reported by the node", node_mem.clone());
        let node_clients = Family::<NodeLabels, FloatGauge>::default();
        registry.register(
            "surge_node_clients",
            "Clients the node reports running",
            node_clients.clone(),
        );
        let node_failures = Family::<NodeLabels, FloatGauge>::default();
        registry.register(
            "surge_node_failures",
            "Failure counter reported by the node",
            node_failures.clone(),
        );

        Exposition {
            registry,
            total_clients,
            avg_startup,
            avg_bitrate,
            avg_buffers,
            avg_buffer_time,
            drop_rate,
            active_nodes,
            connected_nodes,
            ramp_step,
            node_cpu,
            node_mem,
            node_clients,
            node_failures,
            scrape: Mutex::new(()),
        }
    }

    /// Copy the current view into the gauges
    fn refresh(&self, view: &MetricsView) {
        let cluster = view.cluster();
        self.total_clients.set(cluster.total_clients as i64);
        self.avg_startup.set(cluster.avg_startup);
        self.avg_bitrate.set(cluster.avg_bitrate);
        self.avg_buffers.set(cluster.avg_buffers);
        self.avg_buffer_time.set(cluster.avg_buffer_time);
        self.drop_rate.set(cluster.drop_rate);
        self.active_nodes.set(cluster.active_nodes as i64);

        let scheduler = view.scheduler();
        self.connected_nodes.set(scheduler.connected_nodes as i64);
        self.ramp_step
            .set(scheduler.current_step.map(|s| s as i64).unwrap_or(-1));

        // Disconnected nodes must not linger in the output
        self.node_cpu.clear();
        self.node_mem.clear();
        self.node_clients.clear();
        self.node_failures.clear();
        for (id, figures) in view.nodes() {
            let labels = NodeLabels {
                node: id.to_string(),
            };
            let families = [
                (&self.node_cpu, figures.cpu),
                (&self.node_mem, figures.mem),
                (&self.node_clients, figures.clients),
                (&self.node_failures, figures.failures),
            ];
            for (family, value) in families {
                if let Some(value) = value {
                    family.get_or_create(&labels).set(value);
                }
            }
        }
    }

    /// Refresh from `view` and encode as OpenMetrics text
    pub fn render(&self, view: &MetricsView) -> SurgeResult<String> {
        let _scrape = self.scrape.lock();
        self.refresh(view);
        let mut body = String::new();
        encode(&mut body, &self.registry).map_err(|e| SurgeError::Sink(e.to_string()))?;
        Ok(body)
    }
}

impl Default for Exposition {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON body of `GET /status`
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub cluster: ClusterSnapshot,
    pub scheduler: SchedulerStatus,
    pub nodes: BTreeMap<NodeId, NodeResources>,
}

#[derive(Clone)]
struct AppState {
    view: MetricsView,
    exposition: Arc<Exposition>,
}

/// HTTP routes over `view`
pub fn router(view: MetricsView) -> Router {
    let state = AppState {
        view,
        exposition: Arc::new(Exposition::new()),
    };
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.exposition.render(&state.view) {
        Ok(body) => {
            ([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], body).into_response()
        }
        Err(e) => {
            warn!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusReport> {
    Json(StatusReport {
        cluster: state.view.cluster(),
        scheduler: state.view.scheduler(),
        nodes: state.view.nodes(),
    })
}

/// Bind `addr` and serve the exposition routes in the background
pub async fn serve(
    addr: SocketAddr,
    view: MetricsView,
) -> SurgeResult<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| SurgeError::Bind { addr, source })?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "serving metrics");

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router(view)).await {
            warn!("metrics server stopped: {}", e);
        }
    });
    Ok((local_addr, task))
}
