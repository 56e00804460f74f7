//! RPC client contracts consumed by the discovery and correction subsystems.
//!
//! The generated wire stubs live in the transport crate; these traits are the
//! only surface the consistency logic depends on, so tests plug in the
//! in-memory implementations from [`crate::testing`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use vexa_core::{IndexDetail, Node, ObjectTimestamp, ObjectVector, Result};

/// A stream of objects listed from one agent.
///
/// The sender half closes on normal end-of-stream; an `Err` item carries an
/// abnormal stream failure and terminates the stream.
pub type ObjectStream = mpsc::Receiver<Result<ObjectVector>>;

/// The discovery RPC service exposing cluster topology.
#[async_trait]
pub trait DiscovererService: Send + Sync {
    /// Returns the node topology matching the given namespace, service name,
    /// and node-name filter.
    async fn nodes(&self, namespace: &str, name: &str, node: &str) -> Result<Vec<Node>>;
}

/// The cluster gateway client used for object-level reads and repairs.
///
/// Calls carry an explicit agent address: the gateway routes each request to
/// exactly that agent rather than fanning out itself.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Returns the cluster-wide per-agent index snapshot.
    async fn index_detail(&self) -> Result<IndexDetail>;

    /// Opens a stream listing every object stored on the given agent.
    async fn stream_list_object(&self, addr: &str) -> Result<ObjectStream>;

    /// Returns the timestamp the given agent holds for an object ID.
    async fn get_timestamp(&self, addr: &str, id: &str) -> Result<ObjectTimestamp>;

    /// Returns the full object the given agent holds for an ID.
    async fn get_object(&self, addr: &str, id: &str) -> Result<ObjectVector>;

    /// Inserts an object onto the given agent.
    async fn insert(&self, addr: &str, object: &ObjectVector) -> Result<()>;

    /// Overwrites an existing object on the given agent.
    async fn update(&self, addr: &str, object: &ObjectVector) -> Result<()>;

    /// Removes an object from the given agent.
    async fn remove(&self, addr: &str, id: &str) -> Result<()>;

    /// Rewrites only the stored timestamp of an object on the given agent.
    async fn update_timestamp(
        &self,
        addr: &str,
        id: &str,
        timestamp: i64,
        force: bool,
    ) -> Result<()>;
}

/// The live agent fleet as seen by a discovery client.
///
/// The corrector consumes this seam rather than the discovery client type so
/// tests can substitute a fixed fleet.
#[async_trait]
pub trait AgentDiscoverer: Send + Sync {
    /// Returns the currently known agent addresses.
    async fn agent_addrs(&self) -> Vec<String>;
}

/// Per-agent index management RPCs.
///
/// Consumed by the index-creation and save jobs, which fan these out over the
/// pools the discovery client maintains.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Triggers an index build on the given agent.
    async fn create_index(&self, addr: &str, pool_size: u32) -> Result<()>;

    /// Persists the given agent's index to disk.
    async fn save_index(&self, addr: &str) -> Result<()>;

    /// Builds and then persists the given agent's index.
    async fn create_and_save_index(&self, addr: &str, pool_size: u32) -> Result<()>;
}
