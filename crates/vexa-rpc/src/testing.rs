//! In-memory test doubles for the client contracts.
//!
//! These back the unit tests of the discovery and correction crates without
//! a running cluster: an [`InMemoryCluster`] holds per-agent object maps and
//! records every gateway call it serves, and [`StaticDiscoverer`] answers
//! with a fixed address list.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use vexa_core::{Error, IndexCount, IndexDetail, Node, ObjectTimestamp, ObjectVector, Result};

use crate::client::{AgentDiscoverer, DiscovererService, GatewayClient, ObjectStream};

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// `index_detail` was served.
    IndexDetail,
    /// `stream_list_object` was opened against an agent.
    StreamListObject {
        /// Target agent.
        addr: String,
    },
    /// `get_timestamp` was served.
    GetTimestamp {
        /// Target agent.
        addr: String,
        /// Requested object ID.
        id: String,
    },
    /// `get_object` was served.
    GetObject {
        /// Target agent.
        addr: String,
        /// Requested object ID.
        id: String,
    },
    /// `insert` was served.
    Insert {
        /// Target agent.
        addr: String,
        /// Inserted object ID.
        id: String,
    },
    /// `update` was served.
    Update {
        /// Target agent.
        addr: String,
        /// Updated object ID.
        id: String,
        /// Timestamp written.
        timestamp: i64,
    },
    /// `remove` was served.
    Remove {
        /// Target agent.
        addr: String,
        /// Removed object ID.
        id: String,
    },
    /// `update_timestamp` was served.
    UpdateTimestamp {
        /// Target agent.
        addr: String,
        /// Object ID whose timestamp was rewritten.
        id: String,
        /// Timestamp written.
        timestamp: i64,
    },
}

/// An in-memory agent fleet implementing [`GatewayClient`].
#[derive(Default)]
pub struct InMemoryCluster {
    agents: DashMap<String, DashMap<String, ObjectVector>>,
    replica: usize,
    stream_errors: DashMap<String, String>,
    timestamp_outages: DashMap<String, ()>,
    timestamp_failures: DashMap<String, String>,
    calls: Mutex<Vec<Call>>,
}

impl InMemoryCluster {
    /// Creates a cluster with the given configured replica count.
    pub fn new(replica: usize) -> Arc<Self> {
        Arc::new(Self { replica, ..Default::default() })
    }

    /// Registers an empty agent.
    pub fn add_agent(&self, addr: &str) {
        self.agents.entry(addr.to_string()).or_default();
    }

    /// Seeds an object directly onto an agent, bypassing the call log.
    pub fn seed_object(&self, addr: &str, object: ObjectVector) {
        self.add_agent(addr);
        if let Some(agent) = self.agents.get(addr) {
            agent.insert(object.id.clone(), object);
        }
    }

    /// Makes the agent's object stream terminate with an error after its
    /// objects have been emitted.
    pub fn fail_stream(&self, addr: &str, message: &str) {
        self.stream_errors.insert(addr.to_string(), message.to_string());
    }

    /// Makes every `get_timestamp` against the agent fail with `Canceled`,
    /// simulating a replica-lookup outage while other RPCs keep working.
    pub fn deny_timestamp(&self, addr: &str) {
        self.timestamp_outages.insert(addr.to_string(), ());
    }

    /// Makes every `get_timestamp` against the agent fail with an RPC error,
    /// simulating a transient per-target failure.
    pub fn fail_timestamp(&self, addr: &str, message: &str) {
        self.timestamp_failures.insert(addr.to_string(), message.to_string());
    }

    /// Returns the object an agent currently holds, if any.
    pub fn object(&self, addr: &str, id: &str) -> Option<ObjectVector> {
        self.agents.get(addr)?.get(id).map(|entry| entry.value().clone())
    }

    /// Returns every agent currently holding the object.
    pub fn replica_locations(&self, id: &str) -> Vec<String> {
        let mut addrs: Vec<String> = self
            .agents
            .iter()
            .filter(|agent| agent.value().contains_key(id))
            .map(|agent| agent.key().clone())
            .collect();
        addrs.sort();
        addrs
    }

    /// Returns every recorded gateway call, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    /// Returns the number of recorded calls matching the predicate.
    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().expect("lock poisoned").iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("lock poisoned").push(call);
    }

    fn agent(&self, addr: &str) -> Result<dashmap::mapref::one::Ref<'_, String, DashMap<String, ObjectVector>>> {
        self.agents
            .get(addr)
            .ok_or_else(|| Error::ConnectionNotFound { addr: addr.to_string() })
    }
}

#[async_trait]
impl GatewayClient for InMemoryCluster {
    async fn index_detail(&self) -> Result<IndexDetail> {
        self.record(Call::IndexDetail);
        let counts = self
            .agents
            .iter()
            .map(|agent| {
                let count =
                    IndexCount { stored: agent.value().len() as u64, ..Default::default() };
                (agent.key().clone(), count)
            })
            .collect();
        Ok(IndexDetail { counts, replica: self.replica, live_agents: self.agents.len() })
    }

    async fn stream_list_object(&self, addr: &str) -> Result<ObjectStream> {
        self.record(Call::StreamListObject { addr: addr.to_string() });
        let objects: Vec<ObjectVector> =
            self.agent(addr)?.iter().map(|entry| entry.value().clone()).collect();
        let failure = self.stream_errors.get(addr).map(|msg| msg.value().clone());

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for object in objects {
                if tx.send(Ok(object)).await.is_err() {
                    return;
                }
            }
            if let Some(msg) = failure {
                let _ = tx.send(Err(Error::Stream(msg))).await;
            }
        });
        Ok(rx)
    }

    async fn get_timestamp(&self, addr: &str, id: &str) -> Result<ObjectTimestamp> {
        self.record(Call::GetTimestamp { addr: addr.to_string(), id: id.to_string() });
        if self.timestamp_outages.contains_key(addr) {
            return Err(Error::Canceled);
        }
        if let Some(message) = self.timestamp_failures.get(addr) {
            return Err(Error::Rpc { addr: addr.to_string(), message: message.value().clone() });
        }
        let agent = self.agent(addr)?;
        let object = agent
            .get(id)
            .ok_or_else(|| Error::ObjectNotFound { id: id.to_string() })?;
        Ok(ObjectTimestamp { id: id.to_string(), timestamp: object.timestamp })
    }

    async fn get_object(&self, addr: &str, id: &str) -> Result<ObjectVector> {
        self.record(Call::GetObject { addr: addr.to_string(), id: id.to_string() });
        let agent = self.agent(addr)?;
        let object = agent
            .get(id)
            .ok_or_else(|| Error::ObjectNotFound { id: id.to_string() })?;
        Ok(object.value().clone())
    }

    async fn insert(&self, addr: &str, object: &ObjectVector) -> Result<()> {
        self.record(Call::Insert { addr: addr.to_string(), id: object.id.clone() });
        let agent = self.agent(addr)?;
        if agent.contains_key(&object.id) {
            return Err(Error::ObjectAlreadyExists { id: object.id.clone() });
        }
        agent.insert(object.id.clone(), object.clone());
        Ok(())
    }

    async fn update(&self, addr: &str, object: &ObjectVector) -> Result<()> {
        self.record(Call::Update {
            addr: addr.to_string(),
            id: object.id.clone(),
            timestamp: object.timestamp,
        });
        let agent = self.agent(addr)?;
        agent.insert(object.id.clone(), object.clone());
        Ok(())
    }

    async fn remove(&self, addr: &str, id: &str) -> Result<()> {
        self.record(Call::Remove { addr: addr.to_string(), id: id.to_string() });
        let agent = self.agent(addr)?;
        agent
            .remove(id)
            .ok_or_else(|| Error::ObjectNotFound { id: id.to_string() })?;
        Ok(())
    }

    async fn update_timestamp(
        &self,
        addr: &str,
        id: &str,
        timestamp: i64,
        _force: bool,
    ) -> Result<()> {
        self.record(Call::UpdateTimestamp {
            addr: addr.to_string(),
            id: id.to_string(),
            timestamp,
        });
        let agent = self.agent(addr)?;
        let mut object = agent
            .get_mut(id)
            .ok_or_else(|| Error::ObjectNotFound { id: id.to_string() })?;
        object.timestamp = timestamp;
        Ok(())
    }
}

/// An [`AgentDiscoverer`] answering with a fixed address list.
pub struct StaticDiscoverer {
    addrs: Vec<String>,
}

impl StaticDiscoverer {
    /// Creates a discoverer over the given addresses.
    pub fn new(addrs: &[&str]) -> Arc<Self> {
        Arc::new(Self { addrs: addrs.iter().map(ToString::to_string).collect() })
    }
}

#[async_trait]
impl AgentDiscoverer for StaticDiscoverer {
    async fn agent_addrs(&self) -> Vec<String> {
        self.addrs.clone()
    }
}

/// A [`DiscovererService`] answering with a fixed topology.
pub struct StaticTopology {
    nodes: Vec<Node>,
}

impl StaticTopology {
    /// Creates a discovery service over the given nodes.
    pub fn new(nodes: Vec<Node>) -> Arc<Self> {
        Arc::new(Self { nodes })
    }
}

#[async_trait]
impl DiscovererService for StaticTopology {
    async fn nodes(&self, _namespace: &str, _name: &str, _node: &str) -> Result<Vec<Node>> {
        Ok(self.nodes.clone())
    }
}
