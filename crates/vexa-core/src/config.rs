// Copyright 2026 Vexa Dev
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the discovery client and index corrector.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default interval between discovery refreshes in milliseconds.
pub const DEFAULT_DISCOVERY_INTERVAL_MS: u64 = 3_000;

/// Default agent gRPC port combined with discovered IPs.
pub const DEFAULT_AGENT_PORT: u16 = 8081;

/// Default capacity of the discovery error channel.
pub const DEFAULT_ERROR_CHANNEL_CAPACITY: usize = 100;

/// Default bound on concurrently processed objects per agent stream.
pub const DEFAULT_STREAM_LIST_CONCURRENCY: usize = 200;

/// Default filesystem path of the checked-object ledger.
pub const DEFAULT_LEDGER_PATH: &str = "/var/lib/vexa/corrector/checked.redb";

/// Configuration for the discovery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Namespace passed to the discovery RPC service.
    pub namespace: String,

    /// Service name passed to the discovery RPC service.
    pub name: String,

    /// Node-name filter passed to the discovery RPC service
    /// (empty matches every node).
    pub node_name: String,

    /// DNS A record resolved when RPC discovery yields no addresses.
    pub dns_a_record: String,

    /// Port combined with discovered pod IPs and resolved A-record
    /// addresses.
    pub port: u16,

    /// Interval between background discovery refreshes in milliseconds.
    pub discovery_interval_ms: u64,

    /// Whether the client connects the pool to discovered addresses itself.
    pub auto_connect: bool,

    /// Number of read-replica pools behind the read path; 0 disables
    /// read-replica routing entirely.
    pub read_replica_replicas: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            name: String::new(),
            node_name: String::new(),
            dns_a_record: String::new(),
            port: DEFAULT_AGENT_PORT,
            discovery_interval_ms: DEFAULT_DISCOVERY_INTERVAL_MS,
            auto_connect: true,
            read_replica_replicas: 0,
        }
    }
}

impl DiscoveryConfig {
    /// Creates a discovery configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the discovery namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the discovery service name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the DNS A record used as discovery fallback.
    pub fn dns_a_record(mut self, record: impl Into<String>) -> Self {
        self.dns_a_record = record.into();
        self
    }

    /// Sets the port combined with discovered IPs.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the discovery refresh interval.
    pub fn discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets whether the client auto-connects the pool.
    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Sets the read-replica count behind the read path.
    pub fn read_replica_replicas(mut self, replicas: u64) -> Self {
        self.read_replica_replicas = replicas;
        self
    }

    /// Returns the refresh interval as a `Duration`.
    pub fn discovery_interval_duration(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.discovery_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidDiscoveryInterval);
        }
        Ok(())
    }
}

/// Configuration for the index corrector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectorConfig {
    /// Filesystem path of the durable checked-object ledger.
    pub ledger_path: PathBuf,

    /// Bound on concurrently processed objects within one agent stream.
    ///
    /// Each streamed object fans out further RPCs (timestamp lookups and
    /// possible insert/update/remove calls), so an unbounded stream would
    /// overwhelm the agent fleet.
    pub stream_list_concurrency: usize,
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            stream_list_concurrency: DEFAULT_STREAM_LIST_CONCURRENCY,
        }
    }
}

impl CorrectorConfig {
    /// Creates a corrector configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the checked-ledger path.
    pub fn ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = path.into();
        self
    }

    /// Sets the per-stream object concurrency bound.
    pub fn stream_list_concurrency(mut self, concurrency: usize) -> Self {
        self.stream_list_concurrency = concurrency;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.stream_list_concurrency == 0 {
            return Err(ConfigValidationError::InvalidStreamConcurrency);
        }
        if self.ledger_path.as_os_str().is_empty() {
            return Err(ConfigValidationError::EmptyLedgerPath);
        }
        Ok(())
    }
}

/// Errors from configuration validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigValidationError {
    /// The discovery interval must be positive.
    #[error("discovery interval must be positive")]
    InvalidDiscoveryInterval,

    /// The stream-list concurrency must be at least 1.
    #[error("stream list concurrency must be at least 1")]
    InvalidStreamConcurrency,

    /// The ledger path must not be empty.
    #[error("ledger path must not be empty")]
    EmptyLedgerPath,
}
