//! Multi-target connection pool and dispatch primitives.
//!
//! The pool owns one live connection handle per agent address and runs a
//! caller-supplied callback across many targets:
//! - `ordered_range`: strictly sequential, in the caller's order
//! - `ordered_range_concurrent`: bounded concurrency, started in order
//! - `range_concurrent`: bounded concurrency over every live connection
//! - `do_with`: a single named target
//!
//! Per-target failures never abort the other targets; they are collected and
//! joined into a single error at the end.

use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::{counter, gauge};
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, warn};
use vexa_core::{Error, Result};

/// Establishes a connection handle for one address.
#[async_trait]
pub trait ConnectionFactory<C>: Send + Sync {
    /// Connects to the given address.
    async fn connect(&self, addr: &str) -> Result<C>;
}

/// Pool membership events broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A connection was established.
    Connected {
        /// The connected address.
        addr: String,
    },
    /// A connection was removed from the pool.
    Disconnected {
        /// The removed address.
        addr: String,
    },
    /// A connection attempt failed.
    ConnectFailed {
        /// The address that failed to connect.
        addr: String,
        /// The failure description.
        reason: String,
    },
}

/// A concurrent pool of per-address connection handles.
pub struct ConnectionPool<C> {
    conns: DashMap<String, Arc<C>>,
    factory: Arc<dyn ConnectionFactory<C>>,
    event_tx: broadcast::Sender<PoolEvent>,
}

impl<C: Send + Sync + 'static> ConnectionPool<C> {
    /// Creates an empty pool backed by the given factory.
    pub fn new(factory: Arc<dyn ConnectionFactory<C>>) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self { conns: DashMap::new(), factory, event_tx }
    }

    /// Subscribes to pool membership events.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.event_tx.subscribe()
    }

    /// Connects to an address, returning the existing handle if one is live.
    pub async fn connect(&self, addr: &str) -> Result<Arc<C>> {
        if let Some(conn) = self.get(addr) {
            return Ok(conn);
        }
        match self.factory.connect(addr).await {
            Ok(conn) => {
                let conn = Arc::new(conn);
                self.conns.insert(addr.to_string(), Arc::clone(&conn));
                gauge!("vexa_pool_connections").set(self.conns.len() as f64);
                let _ = self.event_tx.send(PoolEvent::Connected { addr: addr.to_string() });
                debug!(addr = %addr, "Connected");
                Ok(conn)
            }
            Err(e) => {
                counter!("vexa_pool_connect_failed").increment(1);
                let _ = self.event_tx.send(PoolEvent::ConnectFailed {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Removes an address from the pool, dropping its handle.
    ///
    /// Returns true when a connection was actually removed.
    pub fn disconnect(&self, addr: &str) -> bool {
        let removed = self.conns.remove(addr).is_some();
        if removed {
            gauge!("vexa_pool_connections").set(self.conns.len() as f64);
            let _ = self.event_tx.send(PoolEvent::Disconnected { addr: addr.to_string() });
            debug!(addr = %addr, "Disconnected");
        }
        removed
    }

    /// Returns the handle for an address, if connected.
    pub fn get(&self, addr: &str) -> Option<Arc<C>> {
        self.conns.get(addr).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns whether the pool holds a connection for the address.
    pub fn contains(&self, addr: &str) -> bool {
        self.conns.contains_key(addr)
    }

    /// Returns every connected address.
    pub fn addrs(&self) -> Vec<String> {
        self.conns.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Returns the number of live connections.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Returns whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Runs a callback against a single named target.
    pub async fn do_with<T, F, Fut>(&self, addr: &str, f: F) -> Result<T>
    where
        F: FnOnce(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let conn = self
            .get(addr)
            .ok_or_else(|| Error::ConnectionNotFound { addr: addr.to_string() })?;
        f(conn).await
    }

    /// Runs the callback against each address strictly in the given order.
    ///
    /// A missing connection or callback failure is recorded and the remaining
    /// targets still run; the collected failures are joined into one error.
    pub async fn ordered_range<F, Fut>(&self, addrs: &[String], f: F) -> Result<()>
    where
        F: Fn(String, Arc<C>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut errs = Vec::new();
        for addr in addrs {
            match self.get(addr) {
                Some(conn) => {
                    if let Err(e) = f(addr.clone(), conn).await {
                        errs.push(e);
                    }
                }
                None => errs.push(Error::ConnectionNotFound { addr: addr.clone() }),
            }
        }
        match Error::join(errs) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Runs the callback against each address with bounded concurrency.
    ///
    /// Targets are started in the given order; `concurrency == 0` means one
    /// in-flight task per address. All tasks complete before this returns.
    pub async fn ordered_range_concurrent<F, Fut>(
        &self,
        addrs: &[String],
        concurrency: usize,
        f: F,
    ) -> Result<()>
    where
        F: Fn(String, Arc<C>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let concurrency = if concurrency == 0 { addrs.len().max(1) } else { concurrency };
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let errs = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::with_capacity(addrs.len());

        for addr in addrs {
            let conn = match self.get(addr) {
                Some(conn) => conn,
                None => {
                    errs.lock()
                        .expect("lock poisoned")
                        .push(Error::ConnectionNotFound { addr: addr.clone() });
                    continue;
                }
            };

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::Canceled)?;
            let addr = addr.clone();
            let f = f.clone();
            let errs = Arc::clone(&errs);

            handles.push(tokio::spawn(async move {
                if let Err(e) = f(addr.clone(), conn).await {
                    warn!(addr = %addr, error = %e, "Dispatch target failed");
                    errs.lock().expect("lock poisoned").push(e);
                }
                drop(permit);
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                errs.lock()
                    .expect("lock poisoned")
                    .push(Error::Stream(format!("dispatch task panicked: {e}")));
            }
        }

        let errs = std::mem::take(&mut *errs.lock().expect("lock poisoned"));
        match Error::join(errs) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Runs the callback against every live connection with bounded
    /// concurrency, in no particular order.
    pub async fn range_concurrent<F, Fut>(&self, concurrency: usize, f: F) -> Result<()>
    where
        F: Fn(String, Arc<C>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let addrs = self.addrs();
        self.ordered_range_concurrent(&addrs, concurrency, f).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Conn {
        addr: String,
    }

    struct OkFactory;

    #[async_trait]
    impl ConnectionFactory<Conn> for OkFactory {
        async fn connect(&self, addr: &str) -> Result<Conn> {
            Ok(Conn { addr: addr.to_string() })
        }
    }

    struct FailFactory;

    #[async_trait]
    impl ConnectionFactory<Conn> for FailFactory {
        async fn connect(&self, addr: &str) -> Result<Conn> {
            Err(Error::Rpc { addr: addr.to_string(), message: "refused".to_string() })
        }
    }

    async fn pool_with(addrs: &[&str]) -> ConnectionPool<Conn> {
        let pool = ConnectionPool::new(Arc::new(OkFactory));
        for addr in addrs {
            pool.connect(addr).await.unwrap();
        }
        pool
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let pool = pool_with(&["a:1"]).await;
        let first = pool.connect("a:1").await.unwrap();
        let second = pool.connect("a:1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_emits_event() {
        let pool: ConnectionPool<Conn> = ConnectionPool::new(Arc::new(FailFactory));
        let mut events = pool.subscribe();

        assert!(pool.connect("a:1").await.is_err());
        assert!(pool.is_empty());

        match events.try_recv().unwrap() {
            PoolEvent::ConnectFailed { addr, .. } => assert_eq!(addr, "a:1"),
            other => panic!("expected ConnectFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect() {
        let pool = pool_with(&["a:1", "b:1"]).await;
        let mut events = pool.subscribe();

        assert!(pool.disconnect("a:1"));
        assert!(!pool.disconnect("a:1"));
        assert_eq!(pool.len(), 1);

        match events.try_recv().unwrap() {
            PoolEvent::Disconnected { addr } => assert_eq!(addr, "a:1"),
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_do_with_missing_connection() {
        let pool = pool_with(&[]).await;
        let result = pool.do_with("nope:1", |_conn| async { Ok(()) }).await;
        assert!(result.unwrap_err().is_connection_not_found());
    }

    #[tokio::test]
    async fn test_ordered_range_preserves_order() {
        let pool = pool_with(&["a:1", "b:1", "c:1"]).await;
        let visited = Arc::new(Mutex::new(Vec::new()));

        let order: Vec<String> =
            ["c:1", "a:1", "b:1"].iter().map(ToString::to_string).collect();
        let visited_cb = Arc::clone(&visited);
        pool.ordered_range(&order, move |addr, conn| {
            let visited = Arc::clone(&visited_cb);
            async move {
                assert_eq!(addr, conn.addr);
                visited.lock().unwrap().push(addr);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(*visited.lock().unwrap(), order);
    }

    #[tokio::test]
    async fn test_ordered_range_joins_errors() {
        let pool = pool_with(&["a:1", "b:1"]).await;
        let order: Vec<String> =
            ["a:1", "missing:1", "b:1"].iter().map(ToString::to_string).collect();

        let err = pool
            .ordered_range(&order, |addr, _conn| async move {
                if addr == "b:1" {
                    Err(Error::Rpc { addr, message: "boom".to_string() })
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap_err();

        match err {
            Error::Multi(errs) => assert_eq!(errs.len(), 2),
            other => panic!("expected Multi, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_ordered_range_concurrent_bounds_inflight() {
        let pool = pool_with(&["a:1", "b:1", "c:1", "d:1", "e:1"]).await;
        let addrs = pool.addrs();
        let inflight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let inflight_cb = Arc::clone(&inflight);
        let peak_cb = Arc::clone(&peak);
        pool.ordered_range_concurrent(&addrs, 2, move |_addr, _conn| {
            let inflight = Arc::clone(&inflight_cb);
            let peak = Arc::clone(&peak_cb);
            async move {
                let now = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                inflight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_range_concurrent_visits_all() {
        let pool = pool_with(&["a:1", "b:1", "c:1"]).await;
        let count = Arc::new(AtomicUsize::new(0));

        let count_cb = Arc::clone(&count);
        pool.range_concurrent(0, move |_addr, _conn| {
            let count = Arc::clone(&count_cb);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
