#![deny(warnings)]

//! Core domain records for the Underworld economy engine.
//!
//! This crate defines the serializable types shared by the engine, the
//! entity gateway backends, and the CLI, together with validation helpers
//! that guard basic invariants on player-owned assets.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Free-form JSON object carried by queued events and broadcast records.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Identifier of a player (the authenticated user driving an engine).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub String);

/// Identifier of a play session.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// Identifier of any other persisted record (assets, audit entries, broadcasts).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

macro_rules! string_id {
    ($($ty:ident),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<&str> for $ty {
                fn from(value: &str) -> Self {
                    Self(value.to_string())
                }
            }

            impl $ty {
                /// Borrow the raw identifier.
                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }
        )*
    };
}

string_id!(PlayerId, SessionId, RecordId);

/// Persisted player profile. Only the balance matters to the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    /// Liquid funds.
    pub balance: Decimal,
    /// Optimistic-concurrency token, bumped by every balance write.
    pub version: u64,
}

impl Player {
    pub fn new(id: PlayerId, display_name: impl Into<String>, balance: Decimal) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            balance,
            version: 0,
        }
    }
}

/// A revenue-producing racket owned by a player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CriminalEnterprise {
    pub id: RecordId,
    pub owner: PlayerId,
    pub name: String,
    /// Output units per cycle (>= 0).
    pub production_rate: Decimal,
}

/// A territory that pays protection tax to whoever controls it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Territory {
    pub id: RecordId,
    /// Controlling player, if any.
    pub controller: Option<PlayerId>,
    pub name: String,
    /// Tax rate in percent. Missing means "use the configured default".
    pub tax_rate: Option<Decimal>,
    /// Assessed value. Missing means "use the configured default".
    pub value: Option<Decimal>,
}

/// Lifecycle of an investment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    /// Paying out.
    Active,
    /// Reached its term.
    Matured,
    /// Closed early by the player.
    Liquidated,
}

impl InvestmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvestmentStatus::Active => "active",
            InvestmentStatus::Matured => "matured",
            InvestmentStatus::Liquidated => "liquidated",
        }
    }
}

/// A player's investment paying a fixed daily return while active.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub id: RecordId,
    pub player_id: PlayerId,
    pub name: String,
    /// Return per in-game day (>= 0).
    pub daily_return: Decimal,
    pub status: InvestmentStatus,
}

/// Session status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }
}

/// One engine lifetime for a player, from start to teardown.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub player_id: PlayerId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Qualifying user interactions observed during the session.
    pub action_count: u64,
    /// Simulation cycles that completed successfully.
    pub cycles_completed: u64,
    /// Whole minutes between start and end, set on close.
    pub duration_minutes: Option<i64>,
    pub status: SessionStatus,
}

impl Session {
    /// Open a new active session.
    pub fn open(id: SessionId, player_id: PlayerId, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            player_id,
            start_time,
            end_time: None,
            action_count: 0,
            cycles_completed: 0,
            duration_minutes: None,
            status: SessionStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Close the session at `end_time`, returning the duration in whole minutes.
    ///
    /// Durations are floored; an end before the start yields zero.
    pub fn close(&mut self, end_time: DateTime<Utc>) -> i64 {
        let minutes = (end_time - self.start_time).num_minutes().max(0);
        self.end_time = Some(end_time);
        self.duration_minutes = Some(minutes);
        self.status = SessionStatus::Completed;
        minutes
    }
}

/// A transient event waiting in the engine queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    /// Event kind, e.g. "income_applied".
    pub kind: String,
    pub payload: Payload,
}

impl QueuedEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Payload::new(),
        }
    }

    /// Builder-style payload insert.
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }
}

/// Audience of a broadcast record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastScope {
    #[default]
    Player,
    Global,
}

impl BroadcastScope {
    pub fn as_str(self) -> &'static str {
        match self {
            BroadcastScope::Player => "player",
            BroadcastScope::Global => "global",
        }
    }
}

/// Delivery priority of a broadcast record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl BroadcastPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            BroadcastPriority::Low => "low",
            BroadcastPriority::Medium => "medium",
            BroadcastPriority::High => "high",
        }
    }
}

/// Durable, append-only record created for every assimilated event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventBroadcastRecord {
    pub id: RecordId,
    pub kind: String,
    /// Human-readable name derived from the kind.
    pub name: String,
    pub player_id: PlayerId,
    pub payload: Payload,
    pub scope: BroadcastScope,
    pub priority: BroadcastPriority,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// Ledger entry categories written by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntryType {
    AutomatedIncome,
}

impl AuditEntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEntryType::AutomatedIncome => "automated_income",
        }
    }
}

/// Append-only ledger entry describing a balance mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: RecordId,
    pub player_id: PlayerId,
    pub entry_type: AuditEntryType,
    /// Amount credited.
    pub amount: Decimal,
    /// Balance after the credit.
    pub balance_after: Decimal,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Projected income for one cycle, with its per-source breakdown.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Sum of all sources, rounded to cents.
    pub total_income: Decimal,
    pub enterprise_income: Decimal,
    pub territory_income: Decimal,
    pub investment_income: Decimal,
    pub enterprise_count: usize,
    pub territory_count: usize,
    pub investment_count: usize,
}

impl SimulationResult {
    /// Whether this result would mutate the balance.
    pub fn is_productive(&self) -> bool {
        self.total_income > Decimal::ZERO
    }
}

/// Health metrics of the cycle task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct YieldMetrics {
    pub cycles_run: u64,
    pub failed_cycles: u64,
    /// Percentage in [0, 100]; starts at 100 and decays by one per failed cycle.
    pub success_rate: u8,
    pub avg_cycle_latency_ms: f64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl Default for YieldMetrics {
    fn default() -> Self {
        Self {
            cycles_run: 0,
            failed_cycles: 0,
            success_rate: YieldMetrics::MAX_SUCCESS_RATE,
            avg_cycle_latency_ms: 0.0,
            last_cycle_at: None,
        }
    }
}

impl YieldMetrics {
    pub const MAX_SUCCESS_RATE: u8 = 100;

    /// Record a completed cycle. The latency average is a 2-point running
    /// average with the prior value; the first sample seeds it.
    pub fn record_success(&mut self, latency_ms: f64, at: DateTime<Utc>) {
        self.avg_cycle_latency_ms = if self.cycles_run == 0 {
            latency_ms
        } else {
            (self.avg_cycle_latency_ms + latency_ms) / 2.0
        };
        self.cycles_run += 1;
        self.last_cycle_at = Some(at);
    }

    /// Record a failed cycle: success rate drops by one, floored at zero.
    pub fn record_failure(&mut self) {
        self.failed_cycles += 1;
        self.success_rate = self.success_rate.saturating_sub(1);
    }
}

/// Validation errors for records handled by the engine.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Event kinds name cache slots and record ids; they cannot be blank.
    #[error("event kind must not be empty")]
    EmptyKind,
    /// Production rate must be non-negative.
    #[error("enterprise {0} has a negative production rate")]
    NegativeProduction(String),
    /// Tax rate and value must be non-negative.
    #[error("territory {0} has a negative tax rate or value")]
    NegativeTerritory(String),
    /// Daily return must be non-negative.
    #[error("investment {0} has a negative daily return")]
    NegativeReturn(String),
}

/// Validate a queued event.
pub fn validate_event(e: &QueuedEvent) -> Result<(), ValidationError> {
    if e.kind.trim().is_empty() {
        return Err(ValidationError::EmptyKind);
    }
    Ok(())
}

/// Validate an enterprise.
pub fn validate_enterprise(e: &CriminalEnterprise) -> Result<(), ValidationError> {
    if e.production_rate < Decimal::ZERO {
        return Err(ValidationError::NegativeProduction(e.id.0.clone()));
    }
    Ok(())
}

/// Validate a territory. Missing fields are fine; they fall back to defaults.
pub fn validate_territory(t: &Territory) -> Result<(), ValidationError> {
    let negative = |v: Option<Decimal>| v.is_some_and(|v| v < Decimal::ZERO);
    if negative(t.tax_rate) || negative(t.value) {
        return Err(ValidationError::NegativeTerritory(t.id.0.clone()));
    }
    Ok(())
}

/// Validate an investment.
pub fn validate_investment(i: &Investment) -> Result<(), ValidationError> {
    if i.daily_return < Decimal::ZERO {
        return Err(ValidationError::NegativeReturn(i.id.0.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap()
    }

    #[test]
    fn session_close_floors_to_whole_minutes() {
        let mut s = Session::open(SessionId::from("s1"), PlayerId::from("p1"), t0());
        assert!(s.is_active());
        let end = t0() + Duration::seconds(7 * 60 + 30);
        assert_eq!(s.close(end), 7);
        assert_eq!(s.duration_minutes, Some(7));
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.end_time, Some(end));
    }

    #[test]
    fn session_close_before_start_is_zero() {
        let mut s = Session::open(SessionId::from("s1"), PlayerId::from("p1"), t0());
        assert_eq!(s.close(t0() - Duration::minutes(3)), 0);
    }

    #[test]
    fn session_serde_roundtrip() {
        let mut s = Session::open(SessionId::from("s1"), PlayerId::from("p1"), t0());
        s.action_count = 12;
        let js = serde_json::to_string(&s).unwrap();
        assert!(js.contains("\"active\""));
        let back: Session = serde_json::from_str(&js).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn queued_event_builder() {
        let e = QueuedEvent::new("heist_completed")
            .with("crew", "night owls")
            .with("take", 1200);
        assert_eq!(e.payload.len(), 2);
        assert_eq!(e.payload["take"], serde_json::json!(1200));
        validate_event(&e).unwrap();
        assert_eq!(
            validate_event(&QueuedEvent::new("  ")),
            Err(ValidationError::EmptyKind)
        );
    }

    #[test]
    fn latency_average_seeds_then_blends() {
        let mut m = YieldMetrics::default();
        m.record_success(40.0, t0());
        assert_eq!(m.avg_cycle_latency_ms, 40.0);
        m.record_success(20.0, t0());
        assert_eq!(m.avg_cycle_latency_ms, 30.0);
        assert_eq!(m.cycles_run, 2);
        assert_eq!(m.success_rate, 100);
    }

    #[test]
    fn territory_defaults_are_valid() {
        let t = Territory {
            id: RecordId::from("t1"),
            controller: None,
            name: "Docks".into(),
            tax_rate: None,
            value: None,
        };
        validate_territory(&t).unwrap();
        let bad = Territory {
            value: Some(Decimal::new(-1, 0)),
            ..t
        };
        assert!(validate_territory(&bad).is_err());
    }

    #[test]
    fn negative_assets_are_rejected() {
        let e = CriminalEnterprise {
            id: RecordId::from("e1"),
            owner: PlayerId::from("p1"),
            name: "Speakeasy".into(),
            production_rate: Decimal::new(-5, 0),
        };
        assert_eq!(
            validate_enterprise(&e),
            Err(ValidationError::NegativeProduction("e1".into()))
        );
        let i = Investment {
            id: RecordId::from("i1"),
            player_id: PlayerId::from("p1"),
            name: "Laundromat".into(),
            daily_return: Decimal::new(-1, 2),
            status: InvestmentStatus::Active,
        };
        assert!(validate_investment(&i).is_err());
    }

    proptest! {
        #[test]
        fn success_rate_stays_in_bounds(failures in 0usize..300, successes in 0usize..50) {
            let mut m = YieldMetrics::default();
            let mut prev = m.success_rate;
            for i in 0..(failures + successes) {
                if i % 3 == 0 && i / 3 < successes {
                    m.record_success(5.0, t0());
                } else {
                    m.record_failure();
                }
                prop_assert!(m.success_rate <= prev);
                prop_assert!(m.success_rate <= YieldMetrics::MAX_SUCCESS_RATE);
                prev = m.success_rate;
            }
        }

        #[test]
        fn duration_is_floor_of_elapsed(secs in 0i64..1_000_000) {
            let mut s = Session::open(SessionId::from("s"), PlayerId::from("p"), t0());
            let minutes = s.close(t0() + Duration::seconds(secs));
            prop_assert_eq!(minutes, secs / 60);
        }
    }
}
