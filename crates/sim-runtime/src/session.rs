//! Session lifecycle: open on start, count activity, close on teardown.
//!
//! Activity is counted in memory and marked dirty; the engine's flush task
//! persists the session at most once per flush interval, and only when
//! something changed.

use crate::EngineError;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use persistence::EntityGateway;
use sim_core::{PlayerId, Session, SessionId};
use tracing::{debug, info};

#[derive(Debug)]
pub struct SessionTracker {
    session: Session,
    dirty: bool,
}

fn new_session_id(now: DateTime<Utc>) -> SessionId {
    SessionId(format!(
        "session_{}_{:08x}",
        now.timestamp_millis(),
        rand::random::<u32>()
    ))
}

impl SessionTracker {
    /// Create and persist an active session for `player`.
    pub async fn open(
        gateway: &dyn EntityGateway,
        player: &PlayerId,
        now: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        let session = Session::open(new_session_id(now), player.clone(), now);
        gateway.create_session(&session).await?;
        info!(player_id = %player, session_id = %session.id, "session opened");
        Ok(Self {
            session,
            dirty: false,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Count one qualifying user interaction.
    pub fn record_action(&mut self) {
        self.session.action_count += 1;
        self.dirty = true;
    }

    /// Count one successful simulation cycle.
    pub fn record_cycle(&mut self) {
        self.session.cycles_completed += 1;
        self.dirty = true;
    }

    fn take_dirty(&mut self) -> Option<Session> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.session.clone())
    }

    /// Mark the session completed at `end` and return the final record.
    pub fn close(&mut self, end: DateTime<Utc>) -> Session {
        self.session.close(end);
        self.dirty = true;
        self.session.clone()
    }
}

/// A tracker shared by the engine's tasks.
///
/// Counters are updated under a short synchronous lock. Flushes hold an
/// async write gate across the store call, so a later snapshot never lands
/// before an earlier one.
#[derive(Debug)]
pub struct SharedSession {
    tracker: Mutex<SessionTracker>,
    writes: tokio::sync::Mutex<()>,
}

impl SharedSession {
    pub fn new(tracker: SessionTracker) -> Self {
        Self {
            tracker: Mutex::new(tracker),
            writes: tokio::sync::Mutex::new(()),
        }
    }

    /// Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, SessionTracker> {
        self.tracker.lock()
    }

    /// Persist the session if it changed since the last flush.
    ///
    /// Returns whether a write was made. On failure the tracker stays dirty
    /// so the next flush tries again.
    pub async fn flush(&self, gateway: &dyn EntityGateway) -> Result<bool, EngineError> {
        let _gate = self.writes.lock().await;
        let pending = self.tracker.lock().take_dirty();
        let Some(snapshot) = pending else {
            return Ok(false);
        };
        if let Err(err) = gateway.update_session(&snapshot).await {
            self.tracker.lock().dirty = true;
            return Err(err.into());
        }
        debug!(
            session_id = %snapshot.id,
            actions = snapshot.action_count,
            cycles = snapshot.cycles_completed,
            "session flushed"
        );
        Ok(true)
    }
}
