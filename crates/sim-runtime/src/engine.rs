//! Engine assembly: start-up, the periodic tasks, and teardown.

use crate::{
    CycleOutcome, EngineConfig, EngineError, EngineState, Intent, IntentBus, IntentEnvelope,
    OptimizationReport, Scheduler, SelfOptimizer, SessionTracker, SharedSession,
};
use chrono::Utc;
use parking_lot::Mutex;
use persistence::{EntityGateway, IdentityProvider};
use sim_core::{PlayerId, QueuedEvent, Session, SessionId, YieldMetrics};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

struct EngineInner {
    gateway: Arc<dyn EntityGateway>,
    player: PlayerId,
    session_id: SessionId,
    state: Arc<Mutex<EngineState>>,
    session: Arc<SharedSession>,
    optimizer: Mutex<SelfOptimizer>,
    scheduler: Scheduler,
    bus: IntentBus,
}

impl EngineInner {
    fn health_check(&self) -> Option<OptimizationReport> {
        let report = {
            let mut state = self.state.lock();
            let mut optimizer = self.optimizer.lock();
            optimizer.check(&mut state, Instant::now())
        }?;
        self.bus.publish(Intent::SelfOptimization {
            cycles_run: report.metrics.cycles_run,
            metrics: report.metrics.clone(),
            cache_cleared: report.cache_cleared,
            queue_cleared: report.queue_cleared,
        });
        Some(report)
    }

    async fn flush_session(&self) {
        if let Err(err) = self.session.flush(self.gateway.as_ref()).await {
            warn!(session_id = %self.session_id, error = %err, "session flush failed");
        }
    }
}

/// Control surface of a running engine.
///
/// Dropping the handle without calling [`EngineHandle::shutdown`] stops the
/// periodic tasks but leaves the session open in the store.
pub struct EngineHandle {
    inner: Arc<EngineInner>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Start an engine with its own intent bus.
pub async fn start_engine(
    config: EngineConfig,
    gateway: Arc<dyn EntityGateway>,
    identity: &dyn IdentityProvider,
) -> Result<EngineHandle, EngineError> {
    let bus = IntentBus::new(config.intent_channel_capacity);
    start_engine_with_bus(config, gateway, identity, bus).await
}

/// Start an engine publishing to `bus`, so listeners subscribed beforehand
/// also see the `Initialization` intent.
pub async fn start_engine_with_bus(
    config: EngineConfig,
    gateway: Arc<dyn EntityGateway>,
    identity: &dyn IdentityProvider,
    bus: IntentBus,
) -> Result<EngineHandle, EngineError> {
    config.validate()?;
    let player = identity.current_player().await?;
    let started = Instant::now();
    let tracker = SessionTracker::open(gateway.as_ref(), &player, Utc::now()).await?;
    let session_id = tracker.session().id.clone();
    let state = Arc::new(Mutex::new(EngineState::default()));
    let session = Arc::new(SharedSession::new(tracker));
    let scheduler = Scheduler::new(
        &config,
        gateway.clone(),
        player.clone(),
        state.clone(),
        session.clone(),
        bus.clone(),
    );
    let inner = Arc::new(EngineInner {
        gateway,
        player: player.clone(),
        session_id: session_id.clone(),
        state,
        session,
        optimizer: Mutex::new(SelfOptimizer::new(
            config.optimizer_cooldown(),
            config.cache_entry_limit,
            config.success_rate_floor,
            started,
        )),
        scheduler,
        bus,
    });

    inner.bus.publish(Intent::Initialization {
        player_id: player.clone(),
        session_id: session_id.clone(),
    });
    info!(
        player_id = %player,
        session_id = %session_id,
        cycle_secs = config.cycle_interval_secs,
        health_secs = config.health_check_interval_secs,
        "engine started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = vec![
        spawn_periodic("cycle", config.cycle_interval(), shutdown_rx.clone(), {
            let inner = inner.clone();
            move || {
                let inner = inner.clone();
                async move {
                    inner.scheduler.tick().await;
                }
            }
        }),
        spawn_periodic("health", config.health_check_interval(), shutdown_rx.clone(), {
            let inner = inner.clone();
            move || {
                let inner = inner.clone();
                async move {
                    inner.health_check();
                }
            }
        }),
        spawn_periodic("session-flush", config.session_flush_interval(), shutdown_rx, {
            let inner = inner.clone();
            move || {
                let inner = inner.clone();
                async move { inner.flush_session().await }
            }
        }),
    ];

    Ok(EngineHandle {
        inner,
        shutdown_tx,
        tasks,
    })
}

/// Run `job` every `period` until shutdown is signalled. The first run
/// happens one period after start; a run is always awaited before the next.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => job().await,
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!(task = name, "periodic task stopped");
    })
}

impl EngineHandle {
    pub fn player_id(&self) -> &PlayerId {
        &self.inner.player
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    /// Queue an event for assimilation on the next cycle.
    pub fn enqueue(&self, event: QueuedEvent) {
        self.inner.state.lock().queue.push(event);
    }

    /// Count one qualifying user interaction. Persisted by the next flush.
    pub fn record_action(&self) {
        self.inner.session.lock().record_action();
    }

    /// Run a cycle now. Skipped if a cycle is already running.
    pub async fn run_cycle_now(&self) -> CycleOutcome {
        self.inner.scheduler.tick().await
    }

    /// Run the self-optimizer now. `None` while it is cooling down.
    pub fn run_health_check_now(&self) -> Option<OptimizationReport> {
        self.inner.health_check()
    }

    /// Persist pending session activity now.
    pub async fn flush_session_now(&self) -> Result<bool, EngineError> {
        self.inner.session.flush(self.inner.gateway.as_ref()).await
    }

    pub fn metrics(&self) -> YieldMetrics {
        self.inner.state.lock().metrics.clone()
    }

    pub fn cache_len(&self) -> usize {
        self.inner.state.lock().cache.len()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// In-memory view of the session, including unflushed activity.
    pub fn session(&self) -> Session {
        self.inner.session.lock().session().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IntentEnvelope> {
        self.inner.bus.subscribe()
    }

    /// Stop the periodic tasks, wait for any in-flight cycle, then close and
    /// persist the session and publish `Shutdown`. Returns the final session
    /// record.
    ///
    /// The session is closed and `Shutdown` is published even when a task
    /// died or the final write fails; those errors are returned afterwards.
    pub async fn shutdown(mut self) -> Result<Session, EngineError> {
        // Fails only if every task already exited.
        let _ = self.shutdown_tx.send(true);
        let mut task_failure = None;
        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                warn!(session_id = %self.inner.session_id, error = %err, "engine task died");
                task_failure.get_or_insert(err);
            }
        }

        let closed = self.inner.session.lock().close(Utc::now());
        let persisted = self.inner.gateway.update_session(&closed).await;
        let metrics = self.inner.state.lock().metrics.clone();
        let duration_minutes = closed.duration_minutes.unwrap_or(0);
        self.inner.bus.publish(Intent::Shutdown {
            session_id: closed.id.clone(),
            duration_minutes,
            metrics: metrics.clone(),
        });
        info!(
            player_id = %self.inner.player,
            session_id = %closed.id,
            duration_minutes,
            cycles_run = metrics.cycles_run,
            success_rate = metrics.success_rate,
            "engine stopped"
        );

        persisted?;
        if let Some(err) = task_failure {
            return Err(err.into());
        }
        Ok(closed)
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
