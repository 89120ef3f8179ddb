//! Typed view over a node's raw telemetry payload
//!
//! Reports arrive as untyped JSON. Only the fields read here matter; anything
//! else is ignored. Numeric fields that are missing or not numbers read as
//! zero, except `connected`, whose absence marks the report as unusable for
//! aggregation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Local resource figures a node republishes as-is
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeResources {
    /// CPU load
    pub cpu: Option<f64>,
    /// Memory usage ratio
    pub mem: Option<f64>,
    /// Clients the node believes it is running
    pub clients: Option<f64>,
    /// Local failure counter
    pub failures: Option<f64>,
}

impl NodeResources {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none()
            && self.mem.is_none()
            && self.clients.is_none()
            && self.failures.is_none()
    }
}

/// Fields of a `report` payload the coordinator reads
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TelemetryReport {
    /// Connected client count; `None` when missing or invalid
    pub connected: Option<u64>,
    /// Average startup delay (ms)
    pub avg_startup: f64,
    /// Average bitrate (kbps)
    pub avg_bitrate: f64,
    /// Average buffering events per client
    pub avg_buffers: f64,
    /// Average time spent buffering (ms)
    pub avg_buffer_time: f64,
    pub resources: NodeResources,
}

impl TelemetryReport {
    pub fn from_value(metrics: &Value) -> Self {
        TelemetryReport {
            connected: metrics.get("connected").and_then(count),
            avg_startup: number(metrics, "avgStartup").unwrap_or(0.0),
            avg_bitrate: number(metrics, "avgBitrate").unwrap_or(0.0),
            avg_buffers: number(metrics, "avgBuffers").unwrap_or(0.0),
            avg_buffer_time: number(metrics, "avgBufferTime").unwrap_or(0.0),
            resources: NodeResources {
                cpu: number(metrics, "cpu"),
                mem: number(metrics, "mem"),
                clients: number(metrics, "clients"),
                failures: number(metrics, "failures"),
            },
        }
    }

    /// Whether the report carries a usable connected-client count
    pub fn is_valid(&self) -> bool {
        self.connected.is_some()
    }
}

fn number(metrics: &Value, field: &str) -> Option<f64> {
    metrics
        .get(field)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
}

fn count(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    // Workers written in dynamic languages may send 10.0 for 10
    value
        .as_f64()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.trunc() as u64)
}
