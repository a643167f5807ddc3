//! Runtime scheduler: one simulation cycle at a time.
//!
//! A cycle drains the event queue through the assimilator, projects income,
//! and bridges it into the balance. Errors end the cycle, cost one point of
//! success rate, and are not retried. Events drained before the failure are
//! gone.

use crate::{
    Assimilator, BridgeApplier, EngineConfig, EngineError, EngineState, Intent, IntentBus,
    SharedSession, StateSimulator,
};
use chrono::Utc;
use parking_lot::Mutex;
use persistence::EntityGateway;
use sim_core::{PlayerId, SimulationResult, YieldMetrics};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Summary of a completed cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    /// 1-based count of successful cycles, including this one.
    pub cycle: u64,
    pub latency_ms: f64,
    pub result: SimulationResult,
    pub metrics: YieldMetrics,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// The error was counted against the success rate and logged.
    Failed(EngineError),
    /// Another cycle was still running.
    Skipped,
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed(_))
    }
}

/// Held for the duration of a cycle; clears the in-progress flag on drop.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    gateway: Arc<dyn EntityGateway>,
    player: PlayerId,
    state: Arc<Mutex<EngineState>>,
    session: Arc<SharedSession>,
    bus: IntentBus,
    assimilator: Assimilator,
    simulator: StateSimulator,
    bridge: BridgeApplier,
    in_progress: AtomicBool,
}

impl Scheduler {
    pub fn new(
        config: &EngineConfig,
        gateway: Arc<dyn EntityGateway>,
        player: PlayerId,
        state: Arc<Mutex<EngineState>>,
        session: Arc<SharedSession>,
        bus: IntentBus,
    ) -> Self {
        Self {
            gateway,
            player,
            state,
            session,
            bus,
            assimilator: Assimilator::new(),
            simulator: StateSimulator::new(config.income.clone()),
            bridge: BridgeApplier::new(config.bridge_conflict_retries),
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Run one cycle unless one is already in flight.
    pub async fn tick(&self) -> CycleOutcome {
        let Some(_guard) = CycleGuard::acquire(&self.in_progress) else {
            debug!(player_id = %self.player, "cycle already running; skipped");
            return CycleOutcome::Skipped;
        };
        let started = Instant::now();
        match self.run_cycle().await {
            Ok(result) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                let metrics = {
                    let mut st = self.state.lock();
                    st.metrics.record_success(latency_ms, Utc::now());
                    st.metrics.clone()
                };
                self.session.lock().record_cycle();
                debug!(
                    player_id = %self.player,
                    cycle = metrics.cycles_run,
                    latency_ms,
                    income = %result.total_income,
                    "cycle complete"
                );
                self.bus.publish(Intent::RuntimeCycle {
                    cycle: metrics.cycles_run,
                    latency_ms,
                    income: result.clone(),
                    metrics: metrics.clone(),
                });
                CycleOutcome::Completed(CycleReport {
                    cycle: metrics.cycles_run,
                    latency_ms,
                    result,
                    metrics,
                })
            }
            Err(err) => {
                let success_rate = {
                    let mut st = self.state.lock();
                    st.metrics.record_failure();
                    st.metrics.success_rate
                };
                warn!(player_id = %self.player, success_rate, error = %err, "cycle failed");
                CycleOutcome::Failed(err)
            }
        }
    }

    async fn run_cycle(&self) -> Result<SimulationResult, EngineError> {
        let gateway = self.gateway.as_ref();
        let events = self.state.lock().queue.drain();
        for event in events {
            self.assimilator
                .assimilate(gateway, &self.player, event, &self.state, Utc::now())
                .await?;
        }
        let result = self.simulator.simulate(gateway, &self.player).await?;
        self.bridge
            .apply(gateway, &self.player, &result, &self.state, Utc::now())
            .await?;
        Ok(result)
    }
}
