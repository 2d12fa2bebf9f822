use super::*;
use crate::config::DurabilityConfig;
use crate::error::Error;
use crate::fault::FaultSink;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use themis_store::{BusEvent, EventBackend, EventFilter, EventStatus, Result as StoreResult};
use uuid::Uuid;

/// Backend test double whose health and write behaviour can be flipped
/// while the coordinator is running.
#[derive(Default)]
struct TestBackend {
    healthy: AtomicBool,
    fail_after: AtomicUsize,
    events: Mutex<Vec<BusEvent>>,
}

impl TestBackend {
    fn healthy() -> Arc<Self> {
        let backend = Arc::new(Self::default());
        backend.set_healthy(true);
        backend.fail_after.store(usize::MAX, Ordering::SeqCst);
        backend
    }

    fn unhealthy() -> Arc<Self> {
        let backend = Self::healthy();
        backend.set_healthy(false);
        backend
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Accept `n` more writes, then fail every one after that.
    fn fail_after(&self, n: usize) {
        self.fail_after.store(n, Ordering::SeqCst);
    }

    fn stored(&self) -> Vec<BusEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EventBackend for TestBackend {
    async fn init(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn ping(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn store(&self, event: &BusEvent) -> StoreResult<()> {
        if self.fail_after.fetch_sub(1, Ordering::SeqCst) == 0 {
            self.fail_after.store(0, Ordering::SeqCst);
            return Err(themis_store::Error::Unavailable("injected failure".into()));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn update(&self, id: Uuid, status: EventStatus) -> StoreResult<()> {
        let mut events = self.events.lock().unwrap();
        match events.iter_mut().find(|event| event.id == id) {
            Some(event) => {
                event.status = status;
                Ok(())
            }
            None => Err(themis_store::Error::NotFound(format!("bus event {id}"))),
        }
    }

    async fn retrieve(&self, filter: &EventFilter) -> StoreResult<Vec<BusEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "test"
    }
}

fn config() -> DurabilityConfig {
    DurabilityConfig {
        queue_capacity: 100,
        memory_ttl_secs: 86_400,
        drain_interval_secs: 1,
    }
}

/// Poll until `probe` returns true or the (virtual) deadline passes.
async fn wait_until(mut probe: impl FnMut() -> bool) {
    for _ in 0..200 {
        if probe() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_store_writes_through_when_healthy() {
    let backend = TestBackend::healthy();
    let persistence = BusPersistence::new(
        Some(backend.clone()),
        config(),
        FaultSink::detached(),
    );

    persistence
        .store(BusEvent::new("muc", "{}"))
        .await
        .unwrap();

    assert_eq!(backend.stored().len(), 1);
    assert_eq!(persistence.buffered().await, 0);
    persistence.close().await;
}

#[tokio::test]
async fn test_store_surfaces_write_through_failure() {
    let backend = TestBackend::healthy();
    backend.fail_after(0);
    let persistence = BusPersistence::new(
        Some(backend.clone()),
        config(),
        FaultSink::detached(),
    );

    let result = persistence.store(BusEvent::new("muc", "{}")).await;
    assert!(matches!(result, Err(Error::DurabilityWrite(_))));
    persistence.close().await;
}

#[tokio::test]
async fn test_store_buffers_when_unhealthy() {
    let backend = TestBackend::unhealthy();
    let persistence = BusPersistence::new(
        Some(backend.clone()),
        config(),
        FaultSink::detached(),
    );

    let event = BusEvent::new("muc", "{}");
    let id = event.id;
    persistence.store(event).await.unwrap();

    assert!(!persistence.ping().await);
    assert_eq!(backend.stored().len(), 0);

    // Still unhealthy: retrieve serves the buffer
    let buffered = persistence.retrieve(&EventFilter::default()).await.unwrap();
    assert_eq!(buffered.len(), 1);
    assert_eq!(buffered[0].id, id);
    persistence.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_drain_flushes_buffer_on_recovery() {
    let backend = TestBackend::unhealthy();
    let persistence = BusPersistence::new(
        Some(backend.clone()),
        config(),
        FaultSink::detached(),
    );

    let event = BusEvent::new("muc", "{}");
    let id = event.id;
    persistence.store(event).await.unwrap();
    assert_eq!(persistence.buffered().await, 1);

    backend.set_healthy(true);
    wait_until(|| backend.stored().len() == 1).await;

    assert_eq!(persistence.buffered().await, 0);

    // Healthy now: retrieve delegates to the backend and still finds it
    let stored = persistence.retrieve(&EventFilter::default()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, id);
    persistence.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_mid_drain_failure_reports_fault_and_drops_batch() {
    let backend = TestBackend::unhealthy();
    let (faults, mut fault_rx) = FaultSink::new();
    let persistence = BusPersistence::new(Some(backend.clone()), config(), faults);

    for i in 0..3 {
        persistence
            .store(BusEvent::new(format!("topic-{i}"), "{}"))
            .await
            .unwrap();
    }

    // First write succeeds, everything after fails
    backend.fail_after(1);
    backend.set_healthy(true);

    let report = fault_rx.recv().await.unwrap();
    assert_eq!(report.context, "bus persistence drain");

    // Pulled events are at-most-once: nothing is re-buffered
    assert_eq!(backend.stored().len(), 1);
    assert_eq!(persistence.buffered().await, 0);
    persistence.close().await;
}

#[tokio::test]
async fn test_update_scans_buffer_when_unhealthy() {
    let backend = TestBackend::unhealthy();
    let persistence = BusPersistence::new(
        Some(backend.clone()),
        config(),
        FaultSink::detached(),
    );

    let event = BusEvent::new("muc", "{}");
    let id = event.id;
    persistence.store(event).await.unwrap();
    persistence.update(id, EventStatus::Sent).await.unwrap();

    let sent = persistence
        .retrieve(&EventFilter::with_status(vec![EventStatus::Sent]))
        .await
        .unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, id);
    persistence.close().await;
}

#[tokio::test]
async fn test_update_writes_through_when_healthy() {
    let backend = TestBackend::healthy();
    let persistence = BusPersistence::new(
        Some(backend.clone()),
        config(),
        FaultSink::detached(),
    );

    let event = BusEvent::new("muc", "{}");
    let id = event.id;
    persistence.store(event).await.unwrap();
    persistence.update(id, EventStatus::Failed).await.unwrap();

    assert_eq!(backend.stored()[0].status, EventStatus::Failed);
    persistence.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_ttl_expiry_removes_buffered_event() {
    let backend = TestBackend::unhealthy();
    let persistence = BusPersistence::new(
        Some(backend.clone()),
        DurabilityConfig {
            memory_ttl_secs: 60,
            ..config()
        },
        FaultSink::detached(),
    );

    persistence.store(BusEvent::new("muc", "{}")).await.unwrap();
    assert_eq!(persistence.buffered().await, 1);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(persistence.buffered().await, 0);

    // Backend never saw it; it is gone for good
    backend.set_healthy(true);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(backend.stored().len(), 0);
    persistence.close().await;
}

#[tokio::test]
async fn test_close_performs_final_flush() {
    let backend = TestBackend::unhealthy();
    let persistence = BusPersistence::new(
        Some(backend.clone()),
        // Long interval: only the shutdown flush can drain this
        DurabilityConfig {
            drain_interval_secs: 3600,
            ..config()
        },
        FaultSink::detached(),
    );

    persistence.store(BusEvent::new("muc", "{}")).await.unwrap();
    backend.set_healthy(true);

    persistence.close().await;
    assert_eq!(backend.stored().len(), 1);
}

#[tokio::test]
async fn test_without_backend_everything_is_in_memory() {
    let persistence = BusPersistence::new(None, config(), FaultSink::detached());

    assert!(!persistence.ping().await);
    persistence.store(BusEvent::new("muc", "{}")).await.unwrap();

    let buffered = persistence.retrieve(&EventFilter::default()).await.unwrap();
    assert_eq!(buffered.len(), 1);
    persistence.close().await;
}

#[tokio::test]
async fn test_buffer_respects_capacity_bound() {
    let backend = TestBackend::unhealthy();
    let persistence = BusPersistence::new(
        Some(backend),
        DurabilityConfig {
            queue_capacity: 5,
            ..config()
        },
        FaultSink::detached(),
    );

    for i in 0..20 {
        persistence
            .store(BusEvent::new(format!("topic-{i}"), "{}"))
            .await
            .unwrap();
    }

    assert_eq!(persistence.buffered().await, 5);
    let remaining = persistence.retrieve(&EventFilter::default()).await.unwrap();
    let topics: Vec<&str> = remaining.iter().map(|e| e.topic.as_str()).collect();
    assert_eq!(topics, vec!["topic-15", "topic-16", "topic-17", "topic-18", "topic-19"]);
    persistence.close().await;
}
