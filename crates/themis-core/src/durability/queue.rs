//! Bounded FIFO buffer of not-yet-durable bus events.

use std::collections::VecDeque;

use themis_store::{BusEvent, EventFilter, EventStatus};
use tracing::debug;
use uuid::Uuid;

/// Insertion-ordered buffer with strict FIFO eviction.
///
/// When an insert pushes the length past capacity, the oldest entries are
/// dropped first until the bound is respected. Eviction is silent data loss
/// by policy: this is a bounded best-effort fallback, and backpressure must
/// never block the bus.
#[derive(Debug)]
pub struct EventQueue {
    entries: VecDeque<BusEvent>,
    capacity: usize,
}

impl EventQueue {
    /// Buffer holding at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an event, evicting the oldest entries while over capacity.
    pub fn put(&mut self, event: BusEvent) {
        self.entries.push_back(event);
        while self.entries.len() > self.capacity {
            if let Some(dropped) = self.entries.pop_front() {
                debug!(id = %dropped.id, len = self.entries.len(), "queue full, evicting oldest event");
            }
        }
    }

    /// Atomically remove and return all buffered events in insertion order.
    pub fn drain_all(&mut self) -> Vec<BusEvent> {
        self.entries.drain(..).collect()
    }

    /// Overwrite the status of a buffered event in place.
    ///
    /// Returns `false` when no event with `id` is buffered.
    pub fn update_status(&mut self, id: Uuid, status: EventStatus) -> bool {
        match self.entries.iter_mut().find(|event| event.id == id) {
            Some(event) => {
                event.status = status;
                true
            }
            None => false,
        }
    }

    /// Remove a buffered event by identity (O(n) scan).
    ///
    /// Used by TTL expiry; a no-op when the event was already drained.
    pub fn remove(&mut self, id: Uuid) -> Option<BusEvent> {
        let index = self.entries.iter().position(|event| event.id == id)?;
        self.entries.remove(index)
    }

    /// Clone buffered events matching `filter`, in buffer order.
    #[must_use]
    pub fn matching(&self, filter: &EventFilter) -> Vec<BusEvent> {
        self.entries
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect()
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity bound.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(topic: &str) -> BusEvent {
        BusEvent::new(topic, "{}")
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let mut queue = EventQueue::new(3);
        for i in 0..10 {
            queue.put(event(&format!("topic-{i}")));
            assert!(queue.len() <= 3);
        }
    }

    #[test]
    fn test_fifo_eviction_keeps_most_recent() {
        let mut queue = EventQueue::new(3);
        let events: Vec<BusEvent> = (0..5).map(|i| event(&format!("topic-{i}"))).collect();
        for e in &events {
            queue.put(e.clone());
        }

        let retained: Vec<Uuid> = queue.drain_all().iter().map(|e| e.id).collect();
        let expected: Vec<Uuid> = events[2..].iter().map(|e| e.id).collect();
        assert_eq!(retained, expected);
    }

    #[test]
    fn test_drain_all_empties_in_insertion_order() {
        let mut queue = EventQueue::new(10);
        let first = event("a");
        let second = event("b");
        queue.put(first.clone());
        queue.put(second.clone());

        let drained = queue.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id, first.id);
        assert_eq!(drained[1].id, second.id);
        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn test_update_status_in_place() {
        let mut queue = EventQueue::new(10);
        let target = event("a");
        queue.put(target.clone());
        queue.put(event("b"));

        assert!(queue.update_status(target.id, EventStatus::Sent));
        assert!(!queue.update_status(Uuid::new_v4(), EventStatus::Sent));
        assert_eq!(queue.len(), 2);

        let sent = queue.matching(&EventFilter::with_status(vec![EventStatus::Sent]));
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, target.id);
    }

    #[test]
    fn test_remove_by_identity() {
        let mut queue = EventQueue::new(10);
        let target = event("a");
        queue.put(target.clone());
        queue.put(event("b"));

        assert_eq!(queue.remove(target.id).map(|e| e.id), Some(target.id));
        assert_eq!(queue.len(), 1);
        // Already gone: no-op
        assert!(queue.remove(target.id).is_none());
    }

    #[test]
    fn test_matching_preserves_buffer_order() {
        let mut queue = EventQueue::new(10);
        let events: Vec<BusEvent> = (0..4).map(|i| event(&format!("topic-{i}"))).collect();
        for e in &events {
            queue.put(e.clone());
        }

        let matched = queue.matching(&EventFilter::default());
        let ids: Vec<Uuid> = matched.iter().map(|e| e.id).collect();
        let expected: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        assert_eq!(ids, expected);
    }
}
