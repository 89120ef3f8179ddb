//! Wire protocol between the coordinator and worker nodes
//!
//! One JSON object per line, discriminated by its `type` field:
//!
//! | Direction | Type | Fields |
//! |---|---|---|
//! | coordinator → node | `register` | `nodeId` |
//! | coordinator → node | `ramp` | `clients`, `step` |
//! | node → coordinator | `report` | `metrics` |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{NodeId, SurgeResult};

/// Message pushed from the coordinator to a node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    /// Sent once, immediately after admission
    Register {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
    },
    /// Per-node load target for one ramp step
    Ramp { clients: u64, step: u64 },
}

impl Outbound {
    pub fn ramp(clients: u64, step: usize) -> Self {
        Outbound::Ramp {
            clients,
            step: step as u64,
        }
    }

    /// Encode as a single protocol line (without the trailing newline)
    pub fn to_line(&self) -> SurgeResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_line(line: &str) -> SurgeResult<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// Message received from a node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inbound {
    /// Telemetry payload, kept untyped until aggregation reads it
    Report { metrics: Value },
    /// Any other `type`; ignored by the coordinator
    #[serde(other)]
    Unknown,
}

impl Inbound {
    /// Parse one protocol line.
    ///
    /// Fails when the line is not JSON carrying a `type` tag, or is a
    /// `report` without `metrics`. Unrecognized types parse to
    /// [`Inbound::Unknown`].
    pub fn parse(line: &str) -> SurgeResult<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }

    pub fn report(metrics: Value) -> Self {
        Inbound::Report { metrics }
    }

    pub fn to_line(&self) -> SurgeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
