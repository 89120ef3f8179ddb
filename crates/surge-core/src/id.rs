//! Node identity
//!
//! Identifiers are handed out by the coordinator at admission time from a
//! monotonically increasing counter. They are never reused within a run and
//! carry no meaning across reconnects.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::SurgeError;

/// Textual prefix of every rendered node id
pub const NODE_ID_PREFIX: &str = "node-";

/// Connected worker identity, rendered as `node-{n}`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl NodeId {
    #[inline]
    pub fn new(seq: u64) -> Self {
        NodeId(seq)
    }

    /// Admission sequence number
    #[inline]
    pub fn seq(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", NODE_ID_PREFIX, self.0)
    }
}

impl FromStr for NodeId {
    type Err = SurgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(NODE_ID_PREFIX)
            .and_then(|seq| seq.parse::<u64>().ok())
            .map(NodeId)
            .ok_or_else(|| SurgeError::MalformedMessage(format!("invalid node id: {s}")))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
