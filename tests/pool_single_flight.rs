//! Single-flight establishment tests for the connection registry.
//!
//! Run with: cargo test --test pool_single_flight

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::mock_connector::{MockConnector, Outcome};
use http::uri::Scheme;
use plexus::{ConnectionKey, ConnectionRegistry, Error, TransportConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("plexus=debug")
        .try_init();
}

fn key(host: &str) -> ConnectionKey {
    ConnectionKey::origin(Scheme::HTTPS, host, 443)
}

/// Poll until `n` callers are parked on the in-flight establishment.
async fn wait_for_waiters(registry: &ConnectionRegistry<MockConnector>, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.stats().waiters < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("waiters never registered");
}

// ============================================================================
// Single flight
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquires_share_one_establishment() {
    init_tracing();

    let connector = MockConnector::gated();
    let registry = ConnectionRegistry::new(connector.clone());
    let k = key("example.com");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = registry.clone();
        let k = k.clone();
        handles.push(tokio::spawn(async move { registry.acquire(&k, true).await }));
    }

    wait_for_waiters(&registry, 16).await;
    assert_eq!(connector.connects(), 1);
    assert_eq!(registry.stats().opening, 1);

    connector.open_gate(1);

    let mut conns = Vec::new();
    for handle in handles {
        let conn = handle.await.unwrap().unwrap().expect("connection");
        conns.push(conn);
    }

    for conn in &conns[1..] {
        assert!(Arc::ptr_eq(&conns[0], conn));
    }
    assert_eq!(connector.connects(), 1);

    let stats = registry.stats();
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.opening, 0);
    assert_eq!(stats.waiters, 0);

    // Pooled connection is reused without another attempt
    let again = registry.acquire(&k, true).await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&conns[0], &again));
    assert_eq!(connector.connects(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_establish_independently() {
    init_tracing();

    let connector = MockConnector::new();
    let registry = ConnectionRegistry::new(connector.clone());
    let a = key("a.test");
    let b = key("b.test");

    let (ra, rb) = tokio::join!(registry.acquire(&a, true), registry.acquire(&b, true));
    let ca = ra.unwrap().unwrap();
    let cb = rb.unwrap().unwrap();

    assert!(!Arc::ptr_eq(&ca, &cb));
    assert_eq!(connector.connects_for(&a), 1);
    assert_eq!(connector.connects_for(&b), 1);
    assert_eq!(registry.stats().connections, 2);
}

#[tokio::test]
async fn test_insecure_miss_returns_none_without_connecting() {
    let connector = MockConnector::new();
    let registry = ConnectionRegistry::new(connector.clone());
    let k = ConnectionKey::origin(Scheme::HTTP, "plain.test", 80);

    assert!(registry.acquire(&k, false).await.unwrap().is_none());
    assert_eq!(connector.connects(), 0);
}

// ============================================================================
// Outcomes shared by all waiters
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_alpn_fallback_resolves_every_waiter_to_none() {
    init_tracing();

    let connector = MockConnector::gated();
    connector.set_outcome(Outcome::AlpnFallback);
    let registry = ConnectionRegistry::new(connector.clone());
    let k = key("h1-only.test");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        let k = k.clone();
        handles.push(tokio::spawn(async move { registry.acquire(&k, true).await }));
    }

    wait_for_waiters(&registry, 8).await;
    connector.open_gate(1);

    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_none());
    }
    assert_eq!(connector.connects(), 1);
    assert_eq!(registry.stats().connections, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_delivered_to_every_waiter() {
    init_tracing();

    let connector = MockConnector::gated();
    connector.set_outcome(Outcome::Fail("connection refused".into()));
    let registry = ConnectionRegistry::new(connector.clone());
    let k = key("down.test");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        let k = k.clone();
        handles.push(tokio::spawn(async move { registry.acquire(&k, true).await }));
    }

    wait_for_waiters(&registry, 8).await;
    connector.open_gate(1);

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Connection(ref msg) if msg.contains("connection refused")));
    }
    assert_eq!(connector.connects(), 1);

    let stats = registry.stats();
    assert_eq!(stats.opening, 0);
    assert_eq!(stats.waiters, 0);
}

#[tokio::test]
async fn test_retry_after_failure_starts_fresh_attempt() {
    let connector = MockConnector::new();
    connector.set_outcome(Outcome::Fail("reset".into()));
    let registry = ConnectionRegistry::new(connector.clone());
    let k = key("flaky.test");

    assert!(registry.acquire(&k, true).await.is_err());

    connector.set_outcome(Outcome::Succeed);
    assert!(registry.acquire(&k, true).await.unwrap().is_some());
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn test_connect_timeout() {
    let connector = MockConnector::new();
    connector.set_outcome(Outcome::Hang);
    let config = TransportConfig::new().with_connect_timeout(Some(Duration::from_millis(50)));
    let registry = ConnectionRegistry::with_config(connector.clone(), &config);

    let err = registry.acquire(&key("slow.test"), true).await.unwrap_err();
    assert!(matches!(err, Error::ConnectTimeout(d) if d == Duration::from_millis(50)));
    assert_eq!(registry.stats().opening, 0);
}

#[tokio::test]
async fn test_panicking_connector_still_resolves_waiters() {
    let connector = MockConnector::new();
    connector.set_outcome(Outcome::Panic);
    let registry = ConnectionRegistry::new(connector.clone());

    let err = registry.acquire(&key("boom.test"), true).await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));

    let stats = registry.stats();
    assert_eq!(stats.opening, 0);
    assert_eq!(stats.waiters, 0);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_waiter_does_not_cancel_establishment() {
    init_tracing();

    let connector = MockConnector::gated();
    let registry = ConnectionRegistry::new(connector.clone());
    let k = key("example.com");

    // The initiating caller gives up
    let impatient = tokio::time::timeout(Duration::from_millis(20), registry.acquire(&k, true)).await;
    assert!(impatient.is_err());

    let patient = {
        let registry = registry.clone();
        let k = k.clone();
        tokio::spawn(async move { registry.acquire(&k, true).await })
    };
    wait_for_waiters(&registry, 2).await;

    connector.open_gate(1);
    let conn = patient.await.unwrap().unwrap();
    assert!(conn.is_some());
    assert_eq!(connector.connects(), 1);
    assert_eq!(registry.stats().connections, 1);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_closes_all_despite_failures() {
    init_tracing();

    let connector = MockConnector::new();
    let a = key("a.test");
    let b = key("b.test");
    connector.fail_close_for(a.clone());
    let registry = ConnectionRegistry::new(connector.clone());

    registry.acquire(&a, true).await.unwrap().unwrap();
    registry.acquire(&b, true).await.unwrap().unwrap();

    registry.shutdown();

    assert_eq!(connector.closes(), 2);
    assert_eq!(registry.stats().connections, 0);
    assert!(matches!(
        registry.acquire(&a, true).await,
        Err(Error::RegistryClosed)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_establishment_finishing_after_shutdown_is_closed() {
    init_tracing();

    let connector = MockConnector::gated();
    let registry = ConnectionRegistry::new(connector.clone());
    let k = key("late.test");

    let waiter = {
        let registry = registry.clone();
        let k = k.clone();
        tokio::spawn(async move { registry.acquire(&k, true).await })
    };
    wait_for_waiters(&registry, 1).await;

    registry.shutdown();
    connector.open_gate(1);

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(Error::RegistryClosed)));
    assert_eq!(connector.closes(), 1);
    assert_eq!(registry.stats().connections, 0);
}

// ============================================================================
// Pool maintenance
// ============================================================================

#[tokio::test]
async fn test_closed_connection_is_replaced() {
    let connector = MockConnector::new();
    let registry = ConnectionRegistry::new(connector.clone());
    let k = key("example.com");

    let first = registry.acquire(&k, true).await.unwrap().unwrap();
    plexus::Connection::close(first.as_ref()).unwrap();

    let second = registry.acquire(&k, true).await.unwrap().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn test_evict_only_removes_matching_connection() {
    let connector = MockConnector::new();
    let registry = ConnectionRegistry::new(connector.clone());
    let k = key("example.com");

    let first = registry.acquire(&k, true).await.unwrap().unwrap();
    assert!(registry.evict(&first));
    let second = registry.acquire(&k, true).await.unwrap().unwrap();

    // Stale handle no longer matches the pooled entry
    assert!(!registry.evict(&first));
    assert_eq!(registry.stats().connections, 1);
    assert!(registry.release(&k).is_some_and(|c| Arc::ptr_eq(&c, &second)));
}
