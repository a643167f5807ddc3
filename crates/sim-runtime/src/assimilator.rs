//! Turns queued events into durable broadcast records.

use crate::{EngineError, EngineState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use persistence::EntityGateway;
use sim_core::{
    validate_event, BroadcastPriority, BroadcastScope, EventBroadcastRecord, PlayerId,
    QueuedEvent, RecordId,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Human-readable name for an event kind: words split on `_`, `-`, or
/// whitespace, each title-cased, joined by single spaces.
pub fn display_name(kind: &str) -> String {
    kind.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Event assimilator. One gateway write per event.
#[derive(Debug, Default)]
pub struct Assimilator {
    seq: AtomicU64,
}

impl Assimilator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist `event` as an [`EventBroadcastRecord`] and cache it under its kind.
    ///
    /// The cache only sees records the gateway accepted.
    pub async fn assimilate(
        &self,
        gateway: &dyn EntityGateway,
        player: &PlayerId,
        event: QueuedEvent,
        state: &Mutex<EngineState>,
        now: DateTime<Utc>,
    ) -> Result<EventBroadcastRecord, EngineError> {
        validate_event(&event)?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let record = EventBroadcastRecord {
            id: RecordId(format!(
                "{}_{}_{}_{}",
                event.kind,
                now.timestamp_millis(),
                player,
                seq
            )),
            name: display_name(&event.kind),
            kind: event.kind,
            player_id: player.clone(),
            payload: event.payload,
            scope: BroadcastScope::Player,
            priority: BroadcastPriority::Medium,
            processed: false,
            created_at: now,
        };
        gateway.create_event_record(&record).await?;
        debug!(kind = %record.kind, id = %record.id, "event assimilated");
        state.lock().cache.insert(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::{EntityKind, GatewayError, MemoryGateway};
    use serde_json::json;

    #[test]
    fn names_are_title_cased() {
        assert_eq!(display_name("income_applied"), "Income Applied");
        assert_eq!(display_name("turf-war  erupted"), "Turf War Erupted");
        assert_eq!(display_name("raid"), "Raid");
    }

    #[tokio::test]
    async fn one_record_per_event_and_latest_cached() {
        let gw = MemoryGateway::new();
        let state = Mutex::new(EngineState::default());
        let asm = Assimilator::new();
        let p = PlayerId::from("p1");
        let now = Utc::now();
        for amount in [1, 2] {
            let ev = QueuedEvent::new("income_applied").with("amount", amount);
            asm.assimilate(&gw, &p, ev, &state, now).await.unwrap();
        }
        let records = gw.list_event_records(&p).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].id, records[1].id);
        assert!(records[0]
            .id
            .as_str()
            .starts_with(&format!("income_applied_{}_p1", now.timestamp_millis())));
        assert_eq!(records[0].name, "Income Applied");
        assert!(!records[0].processed);
        assert_eq!(records[0].scope, BroadcastScope::Player);
        assert_eq!(records[0].priority, BroadcastPriority::Medium);

        let st = state.lock();
        assert_eq!(st.cache.len(), 1);
        assert_eq!(st.cache.get("income_applied").unwrap().payload["amount"], json!(2));
    }

    #[tokio::test]
    async fn failed_write_leaves_cache_untouched() {
        let gw = MemoryGateway::new();
        gw.fail_writes(EntityKind::EventRecord);
        let state = Mutex::new(EngineState::default());
        let err = Assimilator::new()
            .assimilate(&gw, &PlayerId::from("p1"), QueuedEvent::new("raid"), &state, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Gateway(GatewayError::Unavailable(EntityKind::EventRecord))
        ));
        assert!(state.lock().cache.is_empty());
    }

    #[tokio::test]
    async fn blank_kind_rejected() {
        let gw = MemoryGateway::new();
        let state = Mutex::new(EngineState::default());
        let err = Assimilator::new()
            .assimilate(&gw, &PlayerId::from("p1"), QueuedEvent::new(" "), &state, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(gw.write_count(EntityKind::EventRecord), 0);
    }
}
