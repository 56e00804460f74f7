//! Discovery client maintaining connectivity to the agent fleet.
//!
//! The client resolves the fleet through the discovery RPC service (falling
//! back to DNS), reconciles a managed connection pool against the result,
//! and publishes the final address list atomically. A background loop
//! refreshes on a fixed interval; refresh failures are forwarded through a
//! bounded error channel and never kill the loop.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, gauge, histogram};
use tokio::net::lookup_host;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vexa_core::config::DEFAULT_ERROR_CHANNEL_CAPACITY;
use vexa_core::{DiscoveryConfig, Error, Node, Result};
use vexa_rpc::{AgentDiscoverer, ConnectionPool, DiscovererService, PoolEvent};

use crate::registry::AddressRegistry;

/// Callback invoked with the new address list after each successful
/// discovery; an error aborts the attempt before anything is published.
pub type DiscoverCallback = Arc<dyn Fn(&[String]) -> Result<()> + Send + Sync>;

/// Callback invoked for each address removed from the pool.
pub type DisconnectCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct Inner<S, C> {
    config: DiscoveryConfig,
    service: Arc<S>,
    pool: Arc<ConnectionPool<C>>,
    read_pool: Option<Arc<ConnectionPool<C>>>,
    registry: AddressRegistry,
    on_discover: Option<DiscoverCallback>,
    on_disconnect: Option<DisconnectCallback>,
}

/// Discovery client for one backend fleet.
///
/// # Lifecycle
///
/// 1. Create with a discovery service and a connection pool
/// 2. Call `start()`; initial discovery runs synchronously, then a
///    background refresh loop takes over
/// 3. Read `get_addrs()` / route through `get_client()` and
///    `get_read_client()`
/// 4. Call `stop()` during graceful shutdown; a stopped client cannot be
///    restarted
pub struct DiscoveryClient<S, C> {
    inner: Arc<Inner<S, C>>,
    round_robin: AtomicU64,
    shutdown_tx: Option<mpsc::Sender<()>>,
    started: bool,
}

impl<S, C> DiscoveryClient<S, C>
where
    S: DiscovererService + 'static,
    C: Send + Sync + 'static,
{
    /// Creates a new discovery client.
    ///
    /// Fails when the configuration is invalid.
    pub fn new(
        config: DiscoveryConfig,
        service: Arc<S>,
        pool: Arc<ConnectionPool<C>>,
    ) -> Result<Self> {
        config.validate().map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                service,
                pool,
                read_pool: None,
                registry: AddressRegistry::new(),
                on_discover: None,
                on_disconnect: None,
            }),
            round_robin: AtomicU64::new(0),
            shutdown_tx: None,
            started: false,
        })
    }

    /// Attaches a read-replica pool served by `get_read_client()`.
    ///
    /// Must be called before `start()`.
    pub fn with_read_pool(mut self, read_pool: Arc<ConnectionPool<C>>) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("client already shared");
        inner.read_pool = Some(read_pool);
        self
    }

    /// Registers a discovery-completion callback.
    pub fn with_on_discover(mut self, callback: DiscoverCallback) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("client already shared");
        inner.on_discover = Some(callback);
        self
    }

    /// Registers a per-address disconnect callback.
    pub fn with_on_disconnect(mut self, callback: DisconnectCallback) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("client already shared");
        inner.on_disconnect = Some(callback);
        self
    }

    /// Runs the initial discovery and launches the background refresh loop.
    ///
    /// Returns the error channel the loop forwards non-fatal refresh and
    /// connection failures through. Fails when the initial discovery and its
    /// DNS fallback both fail, or when the client was already started.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<Error>> {
        if self.started {
            return Err(Error::Discovery("discovery client already started".to_string()));
        }
        self.started = true;

        self.inner.discover().await?;

        let (err_tx, err_rx) = mpsc::channel(DEFAULT_ERROR_CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        Self::spawn_pool_monitor(self.inner.pool.subscribe(), err_tx.clone());
        if let Some(read_pool) = &self.inner.read_pool {
            Self::spawn_pool_monitor(read_pool.subscribe(), err_tx.clone());
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            // start() already ran a discovery; the first tick waits a full
            // period instead of firing immediately.
            let period = inner.config.discovery_interval_duration();
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = inner.discover().await {
                            warn!(error = %e, "Discovery refresh failed");
                            counter!("vexa_discovery_refresh_failed").increment(1);
                            if err_tx.try_send(e).is_err() {
                                warn!("Discovery error channel full, dropping error");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        if inner.config.auto_connect {
                            inner.close_pools();
                        }
                        info!("Discovery client stopped");
                        break;
                    }
                }
            }
        });

        info!(
            interval_ms = self.inner.config.discovery_interval_ms,
            auto_connect = self.inner.config.auto_connect,
            "Discovery client started"
        );

        Ok(err_rx)
    }

    /// Stops the background refresh loop.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }

    /// Forces an immediate discovery refresh.
    pub async fn refresh(&self) -> Result<()> {
        self.inner.discover().await
    }

    /// Returns the last published address snapshot.
    ///
    /// When no discovery has ever completed, falls back to a best-effort DNS
    /// resolution; resolution failures yield an empty list, never an error.
    pub async fn get_addrs(&self) -> Vec<String> {
        if self.inner.registry.is_published() {
            return self.inner.registry.load().as_ref().clone();
        }
        match self.inner.dns_resolve().await {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!(error = %e, "DNS fallback for unpublished address snapshot failed");
                Vec::new()
            }
        }
    }

    /// Returns the primary read/write connection pool.
    pub fn get_client(&self) -> Arc<ConnectionPool<C>> {
        Arc::clone(&self.inner.pool)
    }

    /// Returns the pool the next read should go to.
    ///
    /// Without a configured read-replica pool this is always the primary.
    /// Otherwise a lock-free counter is advanced modulo
    /// `read_replica_replicas + 1`; remainder 0 selects the primary, so reads
    /// split `replicas : 1` in favor of the read pool.
    pub fn get_read_client(&self) -> Arc<ConnectionPool<C>> {
        let Some(read_pool) = &self.inner.read_pool else {
            return Arc::clone(&self.inner.pool);
        };
        let modulus = self.inner.config.read_replica_replicas + 1;
        loop {
            let current = self.round_robin.load(Ordering::Acquire);
            let next = (current + 1) % modulus;
            if self
                .round_robin
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return if next == 0 {
                    Arc::clone(&self.inner.pool)
                } else {
                    Arc::clone(read_pool)
                };
            }
        }
    }

    fn spawn_pool_monitor(
        mut events: tokio::sync::broadcast::Receiver<PoolEvent>,
        err_tx: mpsc::Sender<Error>,
    ) {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(PoolEvent::ConnectFailed { addr, reason }) => {
                        let _ = err_tx.try_send(Error::Rpc { addr, message: reason });
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Pool event receiver lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

impl<S, C> Inner<S, C>
where
    S: DiscovererService + 'static,
    C: Send + Sync + 'static,
{
    /// One full discovery pass: resolve, reconcile the pool, publish.
    async fn discover(&self) -> Result<()> {
        let started_at = Instant::now();

        let addrs = match self.rpc_discover().await {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!(error = %e, "RPC discovery failed, falling back to DNS");
                counter!("vexa_discovery_dns_fallback").increment(1);
                let resolved = self.dns_resolve().await?;
                self.connect_candidates(resolved).await?
            }
        };

        if let Some(callback) = &self.on_discover {
            callback(&addrs)?;
        }

        self.disconnect_old_addrs(&addrs).await;
        self.registry.store(addrs.clone());

        gauge!("vexa_discovery_addrs").set(addrs.len() as f64);
        histogram!("vexa_discovery_duration_seconds")
            .record(started_at.elapsed().as_secs_f64());
        debug!(addrs = addrs.len(), "Discovery pass completed");
        Ok(())
    }

    /// Queries the discovery RPC service and connects the result.
    async fn rpc_discover(&self) -> Result<Vec<String>> {
        let nodes = self
            .service
            .nodes(&self.config.namespace, &self.config.name, &self.config.node_name)
            .await?;
        if nodes.is_empty() {
            return Err(Error::Discovery("discovery returned no nodes".to_string()));
        }
        let candidates = extract_addrs(nodes, self.config.port);
        if candidates.is_empty() {
            return Err(Error::Discovery("discovery returned no pod addresses".to_string()));
        }
        self.connect_candidates(candidates).await
    }

    /// Resolves the fallback A record into candidate addresses.
    async fn dns_resolve(&self) -> Result<Vec<String>> {
        if self.config.dns_a_record.is_empty() {
            return Err(Error::DnsResolution("no fallback A record configured".to_string()));
        }
        let target = format!("{}:{}", self.config.dns_a_record, self.config.port);
        let addrs: Vec<String> = lookup_host(&target)
            .await
            .map_err(|e| {
                Error::DnsResolution(format!("{}: {e}", self.config.dns_a_record))
            })?
            .map(|sock| format!("{}:{}", sock.ip(), self.config.port))
            .collect();
        if addrs.is_empty() {
            return Err(Error::DnsResolution(format!(
                "no addresses found for {}",
                self.config.dns_a_record
            )));
        }
        Ok(addrs)
    }

    /// Connects each candidate when auto-connect is on, keeping only the
    /// reachable ones. A single unreachable candidate is never fatal.
    async fn connect_candidates(&self, candidates: Vec<String>) -> Result<Vec<String>> {
        if !self.config.auto_connect {
            return Ok(candidates);
        }
        let mut connected = Vec::with_capacity(candidates.len());
        for addr in candidates {
            match self.pool.connect(&addr).await {
                Ok(_) => connected.push(addr),
                Err(e) => warn!(addr = %addr, error = %e, "Skipping unreachable agent"),
            }
        }
        if connected.is_empty() {
            return Err(Error::Discovery("no reachable agent addresses".to_string()));
        }
        Ok(connected)
    }

    /// Disconnects every pooled address absent from the new snapshot.
    ///
    /// Addresses present in the previous snapshot but not the new one get a
    /// dedicated task each; a bounded sweep over the whole pool catches
    /// strays that never made it into a published snapshot. Both complete
    /// before the enclosing discovery pass returns.
    async fn disconnect_old_addrs(&self, new_addrs: &[String]) {
        let keep: Arc<HashSet<String>> = Arc::new(new_addrs.iter().cloned().collect());
        let previous = self.registry.load();

        let mut handles = Vec::new();
        for addr in previous.iter().filter(|addr| !keep.contains(*addr)) {
            let addr = addr.clone();
            let pool = Arc::clone(&self.pool);
            let on_disconnect = self.on_disconnect.clone();
            handles.push(tokio::spawn(async move {
                if pool.disconnect(&addr) {
                    if let Some(callback) = &on_disconnect {
                        callback(&addr);
                    }
                }
            }));
        }

        let sweep_concurrency = new_addrs.len() / 3;
        let pool = Arc::clone(&self.pool);
        let on_disconnect = self.on_disconnect.clone();
        let keep_sweep = Arc::clone(&keep);
        let sweep = self.pool.range_concurrent(sweep_concurrency, move |addr, _conn| {
            let pool = Arc::clone(&pool);
            let on_disconnect = on_disconnect.clone();
            let keep = Arc::clone(&keep_sweep);
            async move {
                if !keep.contains(&addr) && pool.disconnect(&addr) {
                    if let Some(callback) = &on_disconnect {
                        callback(&addr);
                    }
                }
                Ok(())
            }
        });
        if let Err(e) = sweep.await {
            warn!(error = %e, "Stale-address sweep failed");
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    fn close_pools(&self) {
        for addr in self.pool.addrs() {
            self.pool.disconnect(&addr);
        }
        if let Some(read_pool) = &self.read_pool {
            for addr in read_pool.addrs() {
                read_pool.disconnect(&addr);
            }
        }
    }
}

#[async_trait]
impl<S, C> AgentDiscoverer for DiscoveryClient<S, C>
where
    S: DiscovererService + 'static,
    C: Send + Sync + 'static,
{
    async fn agent_addrs(&self) -> Vec<String> {
        self.get_addrs().await
    }
}

/// Builds the address list from a topology snapshot.
///
/// Nodes and their pods are sorted ascending by memory usage, then addresses
/// are taken column-major: pod slot 0 of every node, then slot 1, and so on.
/// Early entries are thereby spread across the whole fleet instead of
/// exhausting one node first.
fn extract_addrs(mut nodes: Vec<Node>, port: u16) -> Vec<String> {
    nodes.sort_by(|a, b| a.memory_usage.total_cmp(&b.memory_usage));
    for node in &mut nodes {
        node.pods.sort_by(|a, b| a.memory_usage.total_cmp(&b.memory_usage));
    }

    let max_pods = nodes.iter().map(|node| node.pods.len()).max().unwrap_or(0);
    let mut addrs = Vec::new();
    for slot in 0..max_pods {
        for node in &nodes {
            if let Some(pod) = node.pods.get(slot) {
                addrs.push(format!("{}:{}", pod.ip, port));
            }
        }
    }
    addrs
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    use vexa_rpc::testing::StaticTopology;
    use vexa_rpc::ConnectionFactory;
    use vexa_core::Pod;

    use super::*;

    struct Conn;

    struct OkFactory;

    #[async_trait]
    impl ConnectionFactory<Conn> for OkFactory {
        async fn connect(&self, _addr: &str) -> Result<Conn> {
            Ok(Conn)
        }
    }

    struct RefuseFactory {
        refuse: String,
    }

    #[async_trait]
    impl ConnectionFactory<Conn> for RefuseFactory {
        async fn connect(&self, addr: &str) -> Result<Conn> {
            if addr.starts_with(&self.refuse) {
                Err(Error::Rpc { addr: addr.to_string(), message: "refused".to_string() })
            } else {
                Ok(Conn)
            }
        }
    }

    fn pod(ip: &str, memory: f64) -> Pod {
        Pod {
            name: format!("pod-{ip}"),
            namespace: "vexa".to_string(),
            ip: ip.to_string(),
            memory_usage: memory,
        }
    }

    fn node(name: &str, memory: f64, pods: Vec<Pod>) -> Node {
        Node {
            name: name.to_string(),
            internal_addr: format!("{name}.internal"),
            external_addr: String::new(),
            memory_usage: memory,
            pods,
        }
    }

    fn new_pool() -> Arc<ConnectionPool<Conn>> {
        Arc::new(ConnectionPool::new(Arc::new(OkFactory)))
    }

    struct CountingTopology {
        nodes: Vec<Node>,
        calls: AtomicUsize,
    }

    impl CountingTopology {
        fn new(nodes: Vec<Node>) -> Arc<Self> {
            Arc::new(Self { nodes, calls: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DiscovererService for CountingTopology {
        async fn nodes(&self, _namespace: &str, _name: &str, _node: &str) -> Result<Vec<Node>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.nodes.clone())
        }
    }

    #[test]
    fn test_extract_addrs_interleaves_across_nodes() {
        // Pod counts [3, 1, 2]; extraction must go slot-by-slot across
        // nodes, never draining one node first.
        let nodes = vec![
            node("n1", 1.0, vec![pod("10.0.1.1", 1.0), pod("10.0.1.2", 2.0), pod("10.0.1.3", 3.0)]),
            node("n2", 2.0, vec![pod("10.0.2.1", 1.0)]),
            node("n3", 3.0, vec![pod("10.0.3.1", 1.0), pod("10.0.3.2", 2.0)]),
        ];

        let addrs = extract_addrs(nodes, 8081);
        assert_eq!(
            addrs,
            vec![
                "10.0.1.1:8081",
                "10.0.2.1:8081",
                "10.0.3.1:8081",
                "10.0.1.2:8081",
                "10.0.3.2:8081",
                "10.0.1.3:8081",
            ]
        );
    }

    #[test]
    fn test_extract_addrs_sorts_by_memory() {
        // The heavier node goes second even though it is listed first.
        let nodes = vec![
            node("heavy", 9.0, vec![pod("10.0.9.1", 1.0)]),
            node("light", 1.0, vec![pod("10.0.1.1", 1.0)]),
        ];

        let addrs = extract_addrs(nodes, 80);
        assert_eq!(addrs, vec!["10.0.1.1:80", "10.0.9.1:80"]);
    }

    #[tokio::test]
    async fn test_refresh_publishes_connected_addrs() {
        let topology = StaticTopology::new(vec![node(
            "n1",
            1.0,
            vec![pod("10.0.0.1", 1.0), pod("10.0.0.2", 2.0)],
        )]);
        let pool = new_pool();
        let client =
            DiscoveryClient::new(DiscoveryConfig::new().port(7000), topology, Arc::clone(&pool))
                .unwrap();

        client.refresh().await.unwrap();

        let addrs = client.get_addrs().await;
        assert_eq!(addrs, vec!["10.0.0.1:7000", "10.0.0.2:7000"]);
        assert!(pool.contains("10.0.0.1:7000"));
        assert!(pool.contains("10.0.0.2:7000"));
    }

    #[tokio::test]
    async fn test_refresh_excludes_unreachable_addrs() {
        let topology = StaticTopology::new(vec![node(
            "n1",
            1.0,
            vec![pod("10.0.0.1", 1.0), pod("10.0.0.2", 2.0)],
        )]);
        let pool: Arc<ConnectionPool<Conn>> = Arc::new(ConnectionPool::new(Arc::new(
            RefuseFactory { refuse: "10.0.0.2".to_string() },
        )));
        let client =
            DiscoveryClient::new(DiscoveryConfig::new().port(7000), topology, pool).unwrap();

        client.refresh().await.unwrap();

        assert_eq!(client.get_addrs().await, vec!["10.0.0.1:7000"]);
    }

    #[tokio::test]
    async fn test_refresh_disconnects_vanished_addrs() {
        let topology = StaticTopology::new(vec![node("n1", 1.0, vec![pod("10.0.0.1", 1.0)])]);
        let pool = new_pool();
        pool.connect("10.0.9.9:7000").await.unwrap();

        let removed = Arc::new(Mutex::new(Vec::new()));
        let removed_cb = Arc::clone(&removed);
        let client =
            DiscoveryClient::new(DiscoveryConfig::new().port(7000), topology, Arc::clone(&pool))
                .unwrap()
                .with_on_disconnect(Arc::new(move |addr: &str| {
                    removed_cb.lock().expect("lock poisoned").push(addr.to_string());
                }));

        client.refresh().await.unwrap();

        assert!(!pool.contains("10.0.9.9:7000"));
        assert!(pool.contains("10.0.0.1:7000"));
        assert_eq!(*removed.lock().unwrap(), vec!["10.0.9.9:7000"]);
    }

    #[tokio::test]
    async fn test_discover_callback_error_aborts_publish() {
        let topology = StaticTopology::new(vec![node("n1", 1.0, vec![pod("10.0.0.1", 1.0)])]);
        let client = DiscoveryClient::new(DiscoveryConfig::new(), topology, new_pool())
            .unwrap()
            .with_on_discover(Arc::new(|_addrs: &[String]| {
                Err(Error::Discovery("rejected".to_string()))
            }));

        assert!(client.refresh().await.is_err());
        assert!(client.inner.registry.load().is_empty());
    }

    #[tokio::test]
    async fn test_get_addrs_unpublished_without_dns_is_empty() {
        let topology = StaticTopology::new(vec![]);
        let client = DiscoveryClient::new(DiscoveryConfig::new(), topology, new_pool()).unwrap();
        assert!(client.get_addrs().await.is_empty());
    }

    #[tokio::test]
    async fn test_dns_fallback_on_empty_topology() {
        // Zero nodes from the RPC path must fall through to A-record
        // resolution; localhost resolves without leaving the host.
        let topology = StaticTopology::new(vec![]);
        let config = DiscoveryConfig::new().dns_a_record("localhost").port(9);
        let client = DiscoveryClient::new(config, topology, new_pool()).unwrap();

        client.refresh().await.unwrap();

        let addrs = client.get_addrs().await;
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|addr| addr.ends_with(":9")));
    }

    #[tokio::test]
    async fn test_get_read_client_without_read_pool() {
        let topology = StaticTopology::new(vec![]);
        let pool = new_pool();
        let client =
            DiscoveryClient::new(DiscoveryConfig::new(), topology, Arc::clone(&pool)).unwrap();

        for _ in 0..5 {
            assert!(Arc::ptr_eq(&client.get_read_client(), &pool));
        }
    }

    #[tokio::test]
    async fn test_get_read_client_round_robin_pattern() {
        let topology = StaticTopology::new(vec![]);
        let primary = new_pool();
        let read = new_pool();
        let client = DiscoveryClient::new(
            DiscoveryConfig::new().read_replica_replicas(2),
            topology,
            Arc::clone(&primary),
        )
        .unwrap()
        .with_read_pool(Arc::clone(&read));

        // Counter starts at 0: two read selections, then the primary.
        let mut pattern = Vec::new();
        for _ in 0..6 {
            pattern.push(Arc::ptr_eq(&client.get_read_client(), &primary));
        }
        assert_eq!(pattern, vec![false, false, true, false, false, true]);
    }

    #[tokio::test]
    async fn test_get_read_client_concurrent_distribution() {
        let topology = StaticTopology::new(vec![]);
        let primary = new_pool();
        let read = new_pool();
        let client = Arc::new(
            DiscoveryClient::new(
                DiscoveryConfig::new().read_replica_replicas(2),
                topology,
                Arc::clone(&primary),
            )
            .unwrap()
            .with_read_pool(read),
        );

        let primary_hits = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let client = Arc::clone(&client);
            let primary = Arc::clone(&primary);
            let primary_hits = Arc::clone(&primary_hits);
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    if Arc::ptr_eq(&client.get_read_client(), &primary) {
                        primary_hits.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 300 calls, modulus 3: exactly one primary selection per wrap.
        assert_eq!(primary_hits.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn test_start_runs_initial_discovery_and_rejects_restart() {
        let topology = StaticTopology::new(vec![node("n1", 1.0, vec![pod("10.0.0.1", 1.0)])]);
        let pool = new_pool();
        let mut client =
            DiscoveryClient::new(DiscoveryConfig::new().port(7000), topology, Arc::clone(&pool))
                .unwrap();

        let _errs = client.start().await.unwrap();
        assert_eq!(client.get_addrs().await, vec!["10.0.0.1:7000"]);

        client.stop().await;
        assert!(client.start().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_refresh_waits_one_full_interval() {
        // start() discovers synchronously; the background loop must not
        // discover again until a whole interval has elapsed.
        let topology = CountingTopology::new(vec![node("n1", 1.0, vec![pod("10.0.0.1", 1.0)])]);
        let config = DiscoveryConfig::new()
            .port(7000)
            .discovery_interval(Duration::from_secs(5));
        let mut client =
            DiscoveryClient::new(config, Arc::clone(&topology), new_pool()).unwrap();

        let _errs = client.start().await.unwrap();
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(topology.calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(topology.calls(), 1);

        tokio::time::advance(Duration::from_secs(4)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(topology.calls(), 2);

        client.stop().await;
    }

    #[tokio::test]
    async fn test_start_fails_without_topology_or_dns() {
        let topology = StaticTopology::new(vec![]);
        let mut client =
            DiscoveryClient::new(DiscoveryConfig::new(), topology, new_pool()).unwrap();
        assert!(client.start().await.is_err());
    }
}
