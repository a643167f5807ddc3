//! Self-optimizer: threshold-driven resets of the cache and queue.

use crate::EngineState;
use sim_core::YieldMetrics;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// What one optimizer action cleared.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizationReport {
    pub cache_cleared: usize,
    pub queue_cleared: usize,
    pub metrics: YieldMetrics,
}

#[derive(Debug)]
pub struct SelfOptimizer {
    cooldown: Duration,
    cache_limit: usize,
    success_floor: u8,
    last_action: Instant,
}

impl SelfOptimizer {
    /// The cool-down is measured from `started`.
    pub fn new(
        cooldown: Duration,
        cache_limit: usize,
        success_floor: u8,
        started: Instant,
    ) -> Self {
        Self {
            cooldown,
            cache_limit,
            success_floor,
            last_action: started,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_action) >= self.cooldown
    }

    /// Act if the cool-down has elapsed: clear an oversized cache, and clear
    /// the queue when the success rate is below the floor.
    pub fn check(&mut self, state: &mut EngineState, now: Instant) -> Option<OptimizationReport> {
        if !self.is_due(now) {
            return None;
        }
        self.last_action = now;
        let cache_cleared = if state.cache.len() > self.cache_limit {
            state.cache.clear()
        } else {
            0
        };
        let queue_cleared = if state.metrics.success_rate < self.success_floor {
            state.queue.clear()
        } else {
            0
        };
        info!(
            cycles_run = state.metrics.cycles_run,
            success_rate = state.metrics.success_rate,
            cache_cleared,
            queue_cleared,
            "self-optimization pass"
        );
        Some(OptimizationReport {
            cache_cleared,
            queue_cleared,
            metrics: state.metrics.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sim_core::{EventBroadcastRecord, PlayerId, QueuedEvent, RecordId};

    fn fill_cache(state: &mut EngineState, n: usize) {
        for i in 0..n {
            state.cache.insert(EventBroadcastRecord {
                id: RecordId(format!("r{i}")),
                kind: format!("kind_{i}"),
                name: String::new(),
                player_id: PlayerId::from("p1"),
                payload: Default::default(),
                scope: Default::default(),
                priority: Default::default(),
                processed: false,
                created_at: Utc::now(),
            });
        }
    }

    fn optimizer(start: Instant) -> SelfOptimizer {
        SelfOptimizer::new(Duration::from_secs(600), 50, 95, start)
    }

    #[test]
    fn waits_for_cooldown() {
        let start = Instant::now();
        let mut opt = optimizer(start);
        let mut state = EngineState::default();
        fill_cache(&mut state, 60);
        assert!(opt.check(&mut state, start + Duration::from_secs(599)).is_none());
        assert_eq!(state.cache.len(), 60);
        let report = opt.check(&mut state, start + Duration::from_secs(600)).unwrap();
        assert_eq!(report.cache_cleared, 60);
        assert!(state.cache.is_empty());
        // Cool-down restarts from the action.
        assert!(!opt.is_due(start + Duration::from_secs(900)));
    }

    #[test]
    fn cache_at_limit_is_kept() {
        let start = Instant::now();
        let mut opt = optimizer(start);
        let mut state = EngineState::default();
        fill_cache(&mut state, 50);
        let report = opt.check(&mut state, start + Duration::from_secs(600)).unwrap();
        assert_eq!(report.cache_cleared, 0);
        assert_eq!(state.cache.len(), 50);
    }

    #[test]
    fn low_success_rate_clears_queue() {
        let start = Instant::now();
        let mut opt = optimizer(start);
        let mut state = EngineState::default();
        state.metrics.success_rate = 94;
        state.queue.push(QueuedEvent::new("raid"));
        state.queue.push(QueuedEvent::new("raid"));
        let report = opt.check(&mut state, start + Duration::from_secs(600)).unwrap();
        assert_eq!(report.queue_cleared, 2);
        assert!(state.queue.is_empty());
        assert_eq!(report.metrics.success_rate, 94);
    }

    #[test]
    fn healthy_queue_is_kept() {
        let start = Instant::now();
        let mut opt = optimizer(start);
        let mut state = EngineState::default();
        state.metrics.success_rate = 95;
        state.queue.push(QueuedEvent::new("raid"));
        let report = opt.check(&mut state, start + Duration::from_secs(600)).unwrap();
        assert_eq!(report.queue_cleared, 0);
        assert_eq!(state.queue.len(), 1);
    }
}
