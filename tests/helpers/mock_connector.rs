use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use plexus::{Connection, ConnectionKey, Connector, Error, Result, TransportKind};
use tokio::sync::Semaphore;

/// What the next establishment attempts do.
#[derive(Clone, Debug)]
#[allow(dead_code)]
pub enum Outcome {
    Succeed,
    AlpnFallback,
    Fail(String),
    Hang,
    Panic,
}

/// Connection handed out by [`MockConnector`].
#[allow(dead_code)]
#[derive(Debug)]
pub struct MockConnection {
    pub id: usize,
    key: ConnectionKey,
    open: AtomicBool,
    fail_close: bool,
    closes: Arc<AtomicUsize>,
}

impl Connection for MockConnection {
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
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        if self.fail_close {
            return Err(Error::connection("close failed"));
        }
        Ok(())
    }
}

/// Scriptable connector that records every establishment attempt.
///
/// Clones share state, so a test can keep one handle while the registry owns
/// another.
#[derive(Clone)]
#[allow(dead_code)]
pub struct MockConnector {
    connects: Arc<AtomicUsize>,
    per_key: Arc<Mutex<HashMap<ConnectionKey, usize>>>,
    closes: Arc<AtomicUsize>,
    outcome: Arc<Mutex<Outcome>>,
    gate: Option<Arc<Semaphore>>,
    fail_close_for: Arc<Mutex<Option<ConnectionKey>>>,
}

#[allow(dead_code)]
impl MockConnector {
    pub fn new() -> Self {
        Self {
            connects: Arc::new(AtomicUsize::new(0)),
            per_key: Arc::new(Mutex::new(HashMap::new())),
            closes: Arc::new(AtomicUsize::new(0)),
            outcome: Arc::new(Mutex::new(Outcome::Succeed)),
            gate: None,
            fail_close_for: Arc::new(Mutex::new(None)),
        }
    }

    /// Attempts block until [`open_gate`](Self::open_gate) releases them.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    /// Let `n` blocked attempts proceed.
    pub fn open_gate(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn set_outcome(&self, outcome: Outcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn fail_close_for(&self, key: ConnectionKey) {
        *self.fail_close_for.lock().unwrap() = Some(key);
    }

    /// Total establishment attempts.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Establishment attempts for one key.
    pub fn connects_for(&self, key: &ConnectionKey) -> usize {
        self.per_key.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Total `close` calls across all handed-out connections.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, key: &ConnectionKey) -> Result<MockConnection> {
        let id = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        *self.per_key.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| Error::connection("gate closed"))?
                .forget();
        }

        let outcome = self.outcome.lock().unwrap().clone();
        match outcome {
            Outcome::Succeed => {
                let fail_close = self.fail_close_for.lock().unwrap().as_ref() == Some(key);
                Ok(MockConnection {
                    id,
                    key: key.clone(),
                    open: AtomicBool::new(true),
                    fail_close,
                    closes: Arc::clone(&self.closes),
                })
            }
            Outcome::AlpnFallback => Err(Error::alpn_fallback("HTTP/1.1 ALPN returned")),
            Outcome::Fail(msg) => Err(Error::connection(msg)),
            Outcome::Hang => std::future::pending().await,
            Outcome::Panic => panic!("connector exploded"),
        }
    }
}
