//! Mutable engine state: pending events, the latest-by-kind cache, and
//! health metrics. Owned by one engine and shared behind a single mutex.

use sim_core::{EventBroadcastRecord, QueuedEvent, YieldMetrics};
use std::collections::{HashMap, VecDeque};

/// FIFO of events awaiting assimilation.
#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    items: VecDeque<QueuedEvent>,
}

impl EventQueue {
    pub fn push(&mut self, event: QueuedEvent) {
        self.items.push_back(event);
    }

    /// Take every pending event in arrival order.
    pub fn drain(&mut self) -> Vec<QueuedEvent> {
        self.items.drain(..).collect()
    }

    /// Drop every pending event, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Most recent broadcast record per event kind.
#[derive(Clone, Debug, Default)]
pub struct SimulationCache {
    entries: HashMap<String, EventBroadcastRecord>,
}

impl SimulationCache {
    pub fn insert(&mut self, record: EventBroadcastRecord) {
        self.entries.insert(record.kind.clone(), record);
    }

    pub fn get(&self, kind: &str) -> Option<&EventBroadcastRecord> {
        self.entries.get(kind)
    }

    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct EngineState {
    pub queue: EventQueue,
    pub cache: SimulationCache,
    pub metrics: YieldMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sim_core::{PlayerId, RecordId};

    fn record(kind: &str, id: &str) -> EventBroadcastRecord {
        EventBroadcastRecord {
            id: RecordId::from(id),
            kind: kind.into(),
            name: kind.into(),
            player_id: PlayerId::from("p1"),
            payload: Default::default(),
            scope: Default::default(),
            priority: Default::default(),
            processed: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn queue_is_fifo() {
        let mut q = EventQueue::default();
        q.push(QueuedEvent::new("a"));
        q.push(QueuedEvent::new("b"));
        let kinds: Vec<_> = q.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, ["a", "b"]);
        assert!(q.is_empty());
    }

    #[test]
    fn queue_clear_reports_count() {
        let mut q = EventQueue::default();
        q.push(QueuedEvent::new("a"));
        q.push(QueuedEvent::new("a"));
        assert_eq!(q.clear(), 2);
        assert_eq!(q.clear(), 0);
    }

    #[test]
    fn cache_keeps_latest_per_kind() {
        let mut c = SimulationCache::default();
        c.insert(record("raid", "r1"));
        c.insert(record("raid", "r2"));
        c.insert(record("bribe", "b1"));
        assert_eq!(c.len(), 2);
        assert_eq!(c.get("raid").unwrap().id, RecordId::from("r2"));
        assert_eq!(c.clear(), 2);
        assert!(c.is_empty());
    }
}
