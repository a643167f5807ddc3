#![deny(warnings)]

//! Persistence layer: the entity gateway the engine writes through, the
//! identity lookup, and two gateway backends (in-memory and SQLite).

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sim_core::{
    AuditLogEntry, CriminalEnterprise, EventBroadcastRecord, Investment, InvestmentStatus, Player,
    PlayerId, Session, SessionId, Territory,
};
use std::fmt;
use std::path::Path;
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::MemoryGateway;
pub use sqlite::{init_db, SqliteGateway};

/// Entity kinds stored behind the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Session,
    EventRecord,
    Player,
    AuditEntry,
    Enterprise,
    Territory,
    Investment,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Session => "session",
            EntityKind::EventRecord => "event record",
            EntityKind::Player => "player",
            EntityKind::AuditEntry => "audit entry",
            EntityKind::Enterprise => "enterprise",
            EntityKind::Territory => "territory",
            EntityKind::Investment => "investment",
        };
        f.write_str(s)
    }
}

/// Errors returned by gateway backends.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },
    /// The balance changed since the caller read it.
    #[error("stale version for player {player}: expected {expected}, found {found}")]
    VersionConflict {
        player: PlayerId,
        expected: u64,
        found: u64,
    },
    #[error("{0} store unavailable")]
    Unavailable(EntityKind),
    #[error("no authenticated player")]
    Unauthenticated,
    #[error("amount {0} does not fit in integer cents")]
    MoneyOutOfRange(Decimal),
    #[error("invalid stored value: {0}")]
    Corrupt(String),
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Typed create/read/update access to the entity store.
///
/// `update_session` is last-write-wins. Balance writes go through
/// [`EntityGateway::credit_player`], which checks the player's version token.
#[async_trait]
pub trait EntityGateway: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<(), GatewayError>;
    async fn update_session(&self, session: &Session) -> Result<(), GatewayError>;
    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, GatewayError>;

    async fn create_event_record(&self, record: &EventBroadcastRecord) -> Result<(), GatewayError>;
    /// Records for a player in creation order.
    async fn list_event_records(
        &self,
        player: &PlayerId,
    ) -> Result<Vec<EventBroadcastRecord>, GatewayError>;

    async fn create_player(&self, player: &Player) -> Result<(), GatewayError>;
    async fn get_player(&self, id: &PlayerId) -> Result<Option<Player>, GatewayError>;
    /// Add `amount` to the balance if the stored version equals
    /// `expected_version`, bumping the version. Returns the updated player.
    async fn credit_player(
        &self,
        id: &PlayerId,
        amount: Decimal,
        expected_version: u64,
    ) -> Result<Player, GatewayError>;

    async fn create_audit_entry(&self, entry: &AuditLogEntry) -> Result<(), GatewayError>;
    /// Ledger entries for a player in creation order.
    async fn list_audit_entries(&self, player: &PlayerId)
        -> Result<Vec<AuditLogEntry>, GatewayError>;

    async fn create_enterprise(&self, enterprise: &CriminalEnterprise) -> Result<(), GatewayError>;
    async fn create_territory(&self, territory: &Territory) -> Result<(), GatewayError>;
    async fn create_investment(&self, investment: &Investment) -> Result<(), GatewayError>;
    async fn list_enterprises(
        &self,
        owner: &PlayerId,
    ) -> Result<Vec<CriminalEnterprise>, GatewayError>;
    async fn list_territories(&self, controller: &PlayerId)
        -> Result<Vec<Territory>, GatewayError>;
    async fn list_investments(
        &self,
        player: &PlayerId,
        status: InvestmentStatus,
    ) -> Result<Vec<Investment>, GatewayError>;
}

/// "Who is the current user" lookup, consulted once per engine.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_player(&self) -> Result<PlayerId, GatewayError>;
}

/// Identity provider that always answers with the same player.
#[derive(Clone, Debug)]
pub struct StaticIdentity(pub PlayerId);

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_player(&self) -> Result<PlayerId, GatewayError> {
        if self.0.as_str().trim().is_empty() {
            return Err(GatewayError::Unauthenticated);
        }
        Ok(self.0.clone())
    }
}

/// Returns the default SQLite URL used for local saves.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://./saves/underworld.db"
}

/// Create the directory holding a file-backed SQLite database.
///
/// sqlx creates the database file on demand but not its parent directory.
/// In-memory URLs are left alone.
pub fn ensure_sqlite_dir(url: &str) -> std::io::Result<()> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .map(|rest| rest.split('?').next().unwrap_or(rest));
    match path {
        Some(path) if !path.starts_with(":memory:") => match Path::new(path).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
            _ => Ok(()),
        },
        _ => Ok(()),
    }
}

/// Convert a monetary amount to integer cents, rounding half away from zero.
pub fn decimal_to_cents_i64(amount: Decimal) -> Option<i64> {
    (amount * Decimal::from(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Convert integer cents back to a monetary amount.
pub fn cents_to_decimal(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
