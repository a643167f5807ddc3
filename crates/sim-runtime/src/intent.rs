//! Typed notifications published to UI listeners.
//!
//! Publishing never fails: with no subscriber the intent is simply dropped,
//! and a slow subscriber lags rather than blocking the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sim_core::{PlayerId, SessionId, SimulationResult, YieldMetrics};
use tokio::sync::broadcast;

/// Something the engine did that a presentation layer may react to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    /// Engine started for a player.
    Initialization {
        player_id: PlayerId,
        session_id: SessionId,
    },
    /// A simulation cycle completed.
    RuntimeCycle {
        cycle: u64,
        latency_ms: f64,
        income: SimulationResult,
        metrics: YieldMetrics,
    },
    /// The self-optimizer cleared engine state.
    SelfOptimization {
        cycles_run: u64,
        metrics: YieldMetrics,
        cache_cleared: usize,
        queue_cleared: usize,
    },
    /// Engine stopped.
    Shutdown {
        session_id: SessionId,
        duration_minutes: i64,
        metrics: YieldMetrics,
    },
}

impl Intent {
    /// Wire name of the variant.
    pub fn name(&self) -> &'static str {
        match self {
            Intent::Initialization { .. } => "initialization",
            Intent::RuntimeCycle { .. } => "runtime_cycle",
            Intent::SelfOptimization { .. } => "self_optimization",
            Intent::Shutdown { .. } => "shutdown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentEnvelope {
    #[serde(flatten)]
    pub intent: Intent,
    pub timestamp: DateTime<Utc>,
}

/// In-process fan-out of [`IntentEnvelope`]s.
#[derive(Clone, Debug)]
pub struct IntentBus {
    tx: broadcast::Sender<IntentEnvelope>,
}

impl IntentBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, intent: Intent) {
        let envelope = IntentEnvelope {
            intent,
            timestamp: Utc::now(),
        };
        tracing::trace!(intent = envelope.intent.name(), "publish");
        // No receivers is not an error.
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IntentEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
