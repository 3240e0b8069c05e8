//! Registry of shared HTTP/2 connections with single-flight establishment.
//!
//! Establishing a multiplexed connection is expensive (TCP + TLS + ALPN), and
//! only one is wanted per origin. The registry guarantees that for a given
//! [`ConnectionKey`] at most one establishment is in flight:
//!
//! - The first caller to miss the pool marks the key as opening and launches
//!   the establishment on a background task.
//! - Callers that arrive while the key is opening queue a waiter and share
//!   the outcome of that single attempt.
//! - When the attempt ends, the key leaves the opening set, every queued
//!   waiter is resolved exactly once, and a successful connection is pooled.
//!
//! An ALPN mismatch resolves every waiter with `Ok(None)` so callers fall back
//! to HTTP/1.1 instead of failing. The registry lock is only held for
//! bookkeeping, never across the establishment itself, and dropping a
//! waiting caller does not cancel the attempt other callers depend on.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::transport::connector::{Connection, ConnectionKey, Connector};

/// Outcome delivered to each caller of [`ConnectionRegistry::acquire`].
type Acquired<C> = Result<Option<Arc<C>>>;

struct RegistryState<C> {
    connections: HashMap<ConnectionKey, Arc<C>>,
    opening: HashSet<ConnectionKey>,
    waiting: HashMap<ConnectionKey, Vec<oneshot::Sender<Acquired<C>>>>,
    closed: bool,
}

impl<C> RegistryState<C> {
    fn new() -> Self {
        Self {
            connections: HashMap::new(),
            opening: HashSet::new(),
            waiting: HashMap::new(),
            closed: false,
        }
    }
}

fn lock_state<C>(state: &Mutex<RegistryState<C>>) -> MutexGuard<'_, RegistryState<C>> {
    // Every critical section leaves the maps consistent, so a poisoned lock
    // still guards valid state.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry statistics for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Pooled connections.
    pub connections: usize,
    /// Keys with an establishment in flight.
    pub opening: usize,
    /// Callers waiting on in-flight establishments.
    pub waiters: usize,
}

/// Keyed store of live multiplexed connections.
pub struct ConnectionRegistry<K: Connector> {
    connector: Arc<K>,
    state: Arc<Mutex<RegistryState<K::Connection>>>,
    connect_timeout: Option<Duration>,
}

impl<K: Connector> ConnectionRegistry<K> {
    /// Create a registry with default settings.
    pub fn new(connector: K) -> Self {
        Self::with_config(connector, &TransportConfig::default())
    }

    /// Create a registry with custom configuration.
    pub fn with_config(connector: K, config: &TransportConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            state: Arc::new(Mutex::new(RegistryState::new())),
            connect_timeout: config.connect_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState<K::Connection>> {
        lock_state(&self.state)
    }

    /// Get the shared connection for `key`, establishing it if needed.
    ///
    /// Returns:
    /// - `Ok(Some(conn))`: pooled or freshly established connection
    /// - `Ok(None)`: not this registry's concern (`secure` is false, or ALPN
    ///   did not select h2), use the HTTP/1.1 path
    /// - `Err(e)`: establishment failed; every concurrent caller sees `e`
    ///
    /// Must be called from within a tokio runtime.
    pub async fn acquire(
        &self,
        key: &ConnectionKey,
        secure: bool,
    ) -> Result<Option<Arc<K::Connection>>> {
        let (rx, launch) = {
            let mut state = self.lock();
            if state.closed {
                return Err(Error::RegistryClosed);
            }

            if let Some(conn) = state.connections.get(key).cloned() {
                if conn.is_open() {
                    tracing::debug!("H2 Pool: Reusing connection for {}", key);
                    return Ok(Some(conn));
                }
                tracing::debug!("H2 Pool: Pooled connection for {} is closed, dropping it", key);
                state.connections.remove(key);
            }

            if !secure {
                return Ok(None);
            }

            let (tx, rx) = oneshot::channel();
            state.waiting.entry(key.clone()).or_default().push(tx);
            let launch = state.opening.insert(key.clone());
            (rx, launch)
        };

        if launch {
            self.spawn_establishment(key.clone());
        } else {
            tracing::debug!("H2 Pool: Waiting for in-flight establishment of {}", key);
        }

        rx.await.map_err(|_| {
            Error::connection(format!("Establishment of {} ended without an outcome", key))
        })?
    }

    fn spawn_establishment(&self, key: ConnectionKey) {
        tracing::debug!(
            "H2 Pool: Opening new {:?} connection for {}",
            key.transport_kind(),
            key
        );
        let connector = Arc::clone(&self.connector);
        let timeout = self.connect_timeout;
        let guard = Establishment {
            state: Arc::clone(&self.state),
            key,
            done: false,
        };

        tokio::spawn(async move {
            let key = guard.key.clone();
            let outcome = match timeout {
                Some(limit) => tokio::time::timeout(limit, connector.connect(&key))
                    .await
                    .unwrap_or(Err(Error::ConnectTimeout(limit))),
                None => connector.connect(&key).await,
            };
            guard.finish(outcome.map(Arc::new));
        });
    }

    /// Insert an externally established connection.
    ///
    /// Returns `false` (and leaves the pool untouched) if an open connection
    /// for the same key is already pooled or the registry is shut down.
    pub fn offer(&self, conn: Arc<K::Connection>) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        let key = conn.key().clone();
        let occupied = state
            .connections
            .get(&key)
            .is_some_and(|existing| existing.is_open());
        if occupied {
            tracing::debug!("H2 Pool: Connection for {} already pooled, not replacing", key);
            return false;
        }
        state.connections.insert(key, conn);
        true
    }

    /// Remove the pooled connection for `key`, if any.
    pub fn release(&self, key: &ConnectionKey) -> Option<Arc<K::Connection>> {
        let removed = self.lock().connections.remove(key);
        if removed.is_some() {
            tracing::debug!("H2 Pool: Released connection for {}", key);
        }
        removed
    }

    /// Remove `conn` from the pool if it is the connection currently pooled
    /// for its key. A replacement pooled under the same key is left alone.
    pub fn evict(&self, conn: &Arc<K::Connection>) -> bool {
        let mut state = self.lock();
        let key = conn.key();
        let same = state
            .connections
            .get(key)
            .is_some_and(|pooled| Arc::ptr_eq(pooled, conn));
        if same {
            state.connections.remove(key);
            tracing::debug!("H2 Pool: Evicted connection for {}", key);
        }
        same
    }

    /// Close every pooled connection and stop accepting requests.
    ///
    /// A failure closing one connection does not prevent closing the others.
    /// Establishments still in flight resolve their waiters with
    /// [`Error::RegistryClosed`] and close the connection they produced.
    pub fn shutdown(&self) {
        let connections: Vec<_> = {
            let mut state = self.lock();
            state.closed = true;
            state.connections.drain().collect()
        };

        tracing::debug!("H2 Pool: Shutting down, closing {} connections", connections.len());
        for (key, conn) in connections {
            if let Err(e) = conn.close() {
                tracing::warn!("H2 Pool: Failed to close connection for {}: {}", key, e);
            }
        }
    }

    /// Get current registry statistics.
    pub fn stats(&self) -> RegistryStats {
        let state = self.lock();
        RegistryStats {
            connections: state.connections.len(),
            opening: state.opening.len(),
            waiters: state.waiting.values().map(Vec::len).sum(),
        }
    }
}

impl<K: Connector> Clone for ConnectionRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            state: Arc::clone(&self.state),
            connect_timeout: self.connect_timeout,
        }
    }
}

/// One in-flight establishment.
///
/// Resolves the waiters for its key exactly once: through `finish`, or on
/// drop if the task was aborted or the connector panicked.
struct Establishment<C: Connection> {
    state: Arc<Mutex<RegistryState<C>>>,
    key: ConnectionKey,
    done: bool,
}

impl<C: Connection> Establishment<C> {
    fn finish(mut self, outcome: Result<Arc<C>>) {
        self.done = true;
        complete(&self.state, &self.key, outcome);
    }
}

impl<C: Connection> Drop for Establishment<C> {
    fn drop(&mut self) {
        if !self.done {
            complete(
                &self.state,
                &self.key,
                Err(Error::connection(format!(
                    "Establishment of {} was aborted",
                    self.key
                ))),
            );
        }
    }
}

fn complete<C: Connection>(
    state: &Mutex<RegistryState<C>>,
    key: &ConnectionKey,
    outcome: Result<Arc<C>>,
) {
    let mut unused = None;
    let (waiters, resolution) = {
        let mut state = lock_state(state);
        state.opening.remove(key);
        let waiters = state.waiting.remove(key).unwrap_or_default();

        let resolution: Acquired<C> = match outcome {
            Ok(conn) if state.closed => {
                unused = Some(conn);
                Err(Error::RegistryClosed)
            }
            Ok(conn) => {
                let pooled = state
                    .connections
                    .get(key)
                    .filter(|existing| existing.is_open())
                    .cloned();
                match pooled {
                    Some(existing) => {
                        // An offered connection won the race; keep it
                        unused = Some(conn);
                        Ok(Some(existing))
                    }
                    None => {
                        state.connections.insert(key.clone(), Arc::clone(&conn));
                        Ok(Some(conn))
                    }
                }
            }
            Err(e) if e.is_alpn_fallback() => {
                tracing::debug!("H2 Pool: {} did not negotiate h2 ({}), falling back", key, e);
                Ok(None)
            }
            Err(e) => {
                tracing::debug!("H2 Pool: Establishment of {} failed: {}", key, e);
                Err(e)
            }
        };
        (waiters, resolution)
    };

    if let Some(conn) = unused {
        if let Err(e) = conn.close() {
            tracing::warn!("H2 Pool: Failed to close surplus connection for {}: {}", key, e);
        }
    }

    let count = waiters.len();
    for waiter in waiters {
        // A dropped receiver is a caller that stopped waiting
        let _ = waiter.send(resolution.clone());
    }
    tracing::debug!("H2 Pool: Resolved {} waiters for {}", count, key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::connector::TransportKind;
    use http::uri::Scheme;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestConn {
        key: ConnectionKey,
        open: AtomicBool,
    }

    impl Connection for TestConn {
        fn key(&self) -> &ConnectionKey {
            &self.key
        }
        fn kind(&self) -> TransportKind {
            self.key.transport_kind()
        }
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
        fn close(&self) -> Result<()> {
            self.open.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        connects: AtomicUsize,
    }

    impl Connector for CountingConnector {
        type Connection = TestConn;

        async fn connect(&self, key: &ConnectionKey) -> Result<TestConn> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(TestConn {
                key: key.clone(),
                open: AtomicBool::new(true),
            })
        }
    }

    fn key() -> ConnectionKey {
        ConnectionKey::origin(Scheme::HTTPS, "example.com", 443)
    }

    #[tokio::test]
    async fn test_insecure_request_is_not_pooled() {
        let registry = ConnectionRegistry::new(CountingConnector::default());
        let result = registry.acquire(&key(), false).await.unwrap();
        assert!(result.is_none());
        assert_eq!(registry.connector.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_acquire_reuses_connection() {
        let registry = ConnectionRegistry::new(CountingConnector::default());

        let first = registry.acquire(&key(), true).await.unwrap().unwrap();
        let second = registry.acquire(&key(), true).await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(
            registry.stats(),
            RegistryStats {
                connections: 1,
                opening: 0,
                waiters: 0
            }
        );
    }

    #[tokio::test]
    async fn test_closed_connection_is_replaced() {
        let registry = ConnectionRegistry::new(CountingConnector::default());

        let first = registry.acquire(&key(), true).await.unwrap().unwrap();
        first.close().unwrap();

        let second = registry.acquire(&key(), true).await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_evict_only_removes_same_instance() {
        let registry = ConnectionRegistry::new(CountingConnector::default());
        let pooled = registry.acquire(&key(), true).await.unwrap().unwrap();

        let stranger = Arc::new(TestConn {
            key: key(),
            open: AtomicBool::new(true),
        });
        assert!(!registry.evict(&stranger));
        assert_eq!(registry.stats().connections, 1);

        assert!(registry.evict(&pooled));
        assert_eq!(registry.stats().connections, 0);
    }

    #[tokio::test]
    async fn test_offer_is_put_if_absent() {
        let registry = ConnectionRegistry::new(CountingConnector::default());
        let a = Arc::new(TestConn {
            key: key(),
            open: AtomicBool::new(true),
        });
        let b = Arc::new(TestConn {
            key: key(),
            open: AtomicBool::new(true),
        });

        assert!(registry.offer(Arc::clone(&a)));
        assert!(!registry.offer(Arc::clone(&b)));

        let got = registry.acquire(&key(), true).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&got, &a));
        assert_eq!(registry.connector.connects.load(Ordering::SeqCst), 0);

        assert!(registry.release(&key()).is_some());
        assert!(registry.release(&key()).is_none());
    }

    #[tokio::test]
    async fn test_acquire_after_shutdown_fails() {
        let registry = ConnectionRegistry::new(CountingConnector::default());
        let conn = registry.acquire(&key(), true).await.unwrap().unwrap();

        registry.shutdown();
        assert!(!conn.is_open());
        assert!(matches!(
            registry.acquire(&key(), true).await,
            Err(Error::RegistryClosed)
        ));
        assert!(!registry.offer(conn));
    }
}
