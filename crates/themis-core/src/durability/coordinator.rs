//! Bus persistence coordinator.
//!
//! Writes events through to the durable backend while it is healthy and
//! buffers them in [`EventQueue`] while it is not. A background loop
//! periodically probes the backend and drains the buffer once health
//! returns. The trade is explicit: best-effort durability, bounded by
//! capacity and TTL, in exchange for never blocking the bus on a down
//! backend.

use crate::config::DurabilityConfig;
use crate::durability::queue::EventQueue;
use crate::error::{Error, Result};
use crate::fault::FaultSink;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use themis_store::{BusEvent, EventBackend, EventFilter, EventStatus};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Orchestrates durable storage of bus events with a health-gated fallback.
pub struct BusPersistence {
    backend: Option<Arc<dyn EventBackend>>,
    queue: Arc<Mutex<EventQueue>>,
    config: DurabilityConfig,
    cancel: CancellationToken,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl BusPersistence {
    /// Create the coordinator and, when a backend is configured, start its
    /// background drain loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        backend: Option<Arc<dyn EventBackend>>,
        config: DurabilityConfig,
        faults: FaultSink,
    ) -> Self {
        let queue = Arc::new(Mutex::new(EventQueue::new(config.queue_capacity)));
        let cancel = CancellationToken::new();

        let drain_task = match &backend {
            Some(backend) => Some(tokio::spawn(drain_loop(
                queue.clone(),
                backend.clone(),
                faults,
                config.drain_interval(),
                cancel.clone(),
            ))),
            None => {
                info!("no persistence backend configured, in-memory only");
                None
            }
        };

        Self {
            backend,
            queue,
            config,
            cancel,
            drain_task: Mutex::new(drain_task),
        }
    }

    /// Health probe; `false` when no backend is configured.
    pub async fn ping(&self) -> bool {
        match &self.backend {
            Some(backend) => backend.ping().await,
            None => false,
        }
    }

    /// Store a bus event, stamping its `created_at`.
    ///
    /// Healthy backend: write through, and the result is the write outcome.
    /// Unhealthy or absent backend: buffer in memory with a TTL reaper;
    /// this path never fails the caller.
    pub async fn store(&self, mut event: BusEvent) -> Result<()> {
        event.created_at = Utc::now();

        if let Some(backend) = &self.backend {
            if backend.ping().await {
                return backend
                    .store(&event)
                    .await
                    .map_err(|e| Error::DurabilityWrite(e.to_string()));
            }
        }

        let id = event.id;
        self.queue.lock().await.put(event);
        debug!(%id, "backend unavailable, event buffered in memory");
        self.spawn_ttl_reaper(id);
        Ok(())
    }

    /// Update the status of a stored event.
    ///
    /// Same branching as [`store`](Self::store): write-through when healthy,
    /// otherwise an in-place scan of the buffer.
    pub async fn update(&self, id: Uuid, status: EventStatus) -> Result<()> {
        if let Some(backend) = &self.backend {
            if backend.ping().await {
                return backend
                    .update(id, status)
                    .await
                    .map_err(|e| Error::DurabilityWrite(e.to_string()));
            }
        }

        if !self.queue.lock().await.update_status(id, status) {
            warn!(%id, "status update for event not in buffer");
        }
        Ok(())
    }

    /// Retrieve stored events matching `filter`.
    ///
    /// Delegates to the backend when healthy, otherwise evaluates the same
    /// predicate over the in-memory buffer.
    pub async fn retrieve(&self, filter: &EventFilter) -> Result<Vec<BusEvent>> {
        if let Some(backend) = &self.backend {
            if backend.ping().await {
                return Ok(backend.retrieve(filter).await?);
            }
        }

        Ok(self.queue.lock().await.matching(filter))
    }

    /// Number of events currently buffered in memory.
    pub async fn buffered(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Cancel the drain loop and wait for its final best-effort flush.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some(task) = self.drain_task.lock().await.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "drain loop did not shut down cleanly");
            }
        }
    }

    /// Bounds memory use when the backend never recovers: after the TTL the
    /// event is removed from the buffer by identity, a no-op if a drain
    /// already flushed it.
    fn spawn_ttl_reaper(&self, id: Uuid) {
        let queue = Arc::clone(&self.queue);
        let ttl = self.config.memory_ttl();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(ttl) => {
                    if queue.lock().await.remove(id).is_some() {
                        debug!(%id, "buffered event expired before backend recovery");
                    }
                }
            }
        });
    }
}

/// Periodically probe backend health and dump buffered events into it.
async fn drain_loop(
    queue: Arc<Mutex<EventQueue>>,
    backend: Arc<dyn EventBackend>,
    faults: FaultSink,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("drain loop cancelled, final flush");
                flush(&queue, backend.as_ref(), &faults).await;
                break;
            }
            _ = ticker.tick() => {
                if queue.lock().await.is_empty() {
                    continue;
                }
                flush(&queue, backend.as_ref(), &faults).await;
            }
        }
    }
}

/// Drain the buffer into the backend, oldest first, one event at a time.
///
/// Pulled events are at-most-once: the first failed write is reported to
/// the fault sink and the rest of the batch is dropped, never re-buffered.
async fn flush(queue: &Mutex<EventQueue>, backend: &dyn EventBackend, faults: &FaultSink) {
    if !backend.ping().await {
        warn!(backend = backend.name(), "no connection to backend to empty in-memory events");
        return;
    }

    let events = queue.lock().await.drain_all();
    if events.is_empty() {
        return;
    }

    let total = events.len();
    for (index, event) in events.into_iter().enumerate() {
        if let Err(err) = backend.store(&event).await {
            faults.report(
                "bus persistence drain",
                format!(
                    "storing event {}: {err} ({} of {total} events dropped)",
                    event.id,
                    total - index
                ),
            );
            return;
        }
    }
    debug!(count = total, "events from memory dumped into backend");
}
