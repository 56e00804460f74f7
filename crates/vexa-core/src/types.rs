// Copyright 2026 Vexa Dev
// SPDX-License-Identifier: Apache-2.0

//! Common data types exchanged between Vexa components.
//!
//! The wire format of the underlying RPC messages is owned by the transport
//! layer; these are the typed payloads the discovery and correction logic
//! operates on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single indexed vector with its identity and write timestamp.
///
/// Timestamps are Unix nanoseconds assigned by the agent that accepted the
/// write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectVector {
    /// The object's cluster-wide ID.
    pub id: String,
    /// The embedding payload.
    pub vector: Vec<f32>,
    /// Unix-nanosecond timestamp of the last accepted write.
    pub timestamp: i64,
}

/// The timestamp an agent holds for a given object ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTimestamp {
    /// The object's cluster-wide ID.
    pub id: String,
    /// Unix-nanosecond timestamp observed on that agent.
    pub timestamp: i64,
}

/// Per-agent index statistics from the cluster-wide snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCount {
    /// Number of committed (searchable) objects.
    pub stored: u64,
    /// Number of accepted but not yet committed objects.
    pub uncommitted: u64,
    /// Whether the agent is currently building its index.
    pub indexing: bool,
    /// Whether the agent is currently persisting its index.
    pub saving: bool,
}

impl IndexCount {
    /// Returns true when the agent holds no objects at all.
    pub fn is_empty(&self) -> bool {
        self.stored == 0 && self.uncommitted == 0
    }
}

/// Cluster-wide index snapshot keyed by agent address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexDetail {
    /// Index counts per agent address.
    pub counts: HashMap<String, IndexCount>,
    /// The configured replica count for every object.
    pub replica: usize,
    /// Number of agents that answered the snapshot request.
    pub live_agents: usize,
}

/// A pod running one agent process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    /// Pod name.
    pub name: String,
    /// Namespace the pod runs in.
    pub namespace: String,
    /// Routable IP of the agent.
    pub ip: String,
    /// Current memory usage in bytes.
    pub memory_usage: f64,
}

/// A cluster node hosting zero or more agent pods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node name.
    pub name: String,
    /// Cluster-internal address.
    pub internal_addr: String,
    /// Externally routable address, if any.
    pub external_addr: String,
    /// Current memory usage in bytes across the node.
    pub memory_usage: f64,
    /// Agent pods scheduled on this node.
    pub pods: Vec<Pod>,
}
