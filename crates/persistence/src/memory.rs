//! In-process gateway backend used by tests, demos, and the CLI default.

use crate::{EntityGateway, EntityKind, GatewayError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use sim_core::{
    AuditLogEntry, CriminalEnterprise, EventBroadcastRecord, Investment, InvestmentStatus, Player,
    PlayerId, Session, SessionId, Territory,
};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<SessionId, Session>,
    records: Vec<EventBroadcastRecord>,
    players: HashMap<PlayerId, Player>,
    audit: Vec<AuditLogEntry>,
    enterprises: Vec<CriminalEnterprise>,
    territories: Vec<Territory>,
    investments: Vec<Investment>,
}

#[derive(Debug, Default)]
struct Faults {
    reads: HashSet<EntityKind>,
    writes: HashSet<EntityKind>,
    /// Credits applied by "another writer" just before the next credit call.
    interleaved_credits: Vec<(PlayerId, Decimal)>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: Tables,
    faults: Faults,
    write_counts: HashMap<EntityKind, u64>,
}

impl Inner {
    fn check_read(&self, kind: EntityKind) -> Result<(), GatewayError> {
        if self.faults.reads.contains(&kind) {
            return Err(GatewayError::Unavailable(kind));
        }
        Ok(())
    }

    fn begin_write(&mut self, kind: EntityKind) -> Result<(), GatewayError> {
        if self.faults.writes.contains(&kind) {
            return Err(GatewayError::Unavailable(kind));
        }
        *self.write_counts.entry(kind).or_insert(0) += 1;
        Ok(())
    }
}

/// Entity store kept in memory.
///
/// Supports fault injection per entity kind and an optional artificial
/// latency applied to every call, so engine behavior across suspension
/// points can be exercised without a database.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    inner: Mutex<Inner>,
    latency: Option<Duration>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` (uses `tokio::time`, so paused clocks apply).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make reads of `kind` fail with [`GatewayError::Unavailable`].
    pub fn fail_reads(&self, kind: EntityKind) {
        self.inner.lock().faults.reads.insert(kind);
    }

    /// Make writes of `kind` fail with [`GatewayError::Unavailable`].
    pub fn fail_writes(&self, kind: EntityKind) {
        self.inner.lock().faults.writes.insert(kind);
    }

    /// Remove all injected read/write faults.
    pub fn clear_faults(&self) {
        let mut inner = self.inner.lock();
        inner.faults.reads.clear();
        inner.faults.writes.clear();
    }

    /// Simulate a concurrent writer: the next `credit_player` for `player`
    /// finds `amount` already credited by someone else. Each queued credit
    /// interleaves with exactly one call.
    pub fn interleave_credit(&self, player: &PlayerId, amount: Decimal) {
        self.inner
            .lock()
            .faults
            .interleaved_credits
            .push((player.clone(), amount));
    }

    /// Successful writes recorded for `kind`.
    pub fn write_count(&self, kind: EntityKind) -> u64 {
        self.inner
            .lock()
            .write_counts
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl EntityGateway for MemoryGateway {
    async fn create_session(&self, session: &Session) -> Result<(), GatewayError> {
        self.pause().await;
        let mut inner = self.inner.lock();
        inner.begin_write(EntityKind::Session)?;
        inner
            .tables
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn update_session(&self, session: &Session) -> Result<(), GatewayError> {
        self.pause().await;
        let mut inner = self.inner.lock();
        if !inner.tables.sessions.contains_key(&session.id) {
            return Err(GatewayError::NotFound {
                kind: EntityKind::Session,
                id: session.id.to_string(),
            });
        }
        inner.begin_write(EntityKind::Session)?;
        inner
            .tables
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, GatewayError> {
        self.pause().await;
        let inner = self.inner.lock();
        inner.check_read(EntityKind::Session)?;
        Ok(inner.tables.sessions.get(id).cloned())
    }

    async fn create_event_record(&self, record: &EventBroadcastRecord) -> Result<(), GatewayError> {
        self.pause().await;
        let mut inner = self.inner.lock();
        inner.begin_write(EntityKind::EventRecord)?;
        inner.tables.records.push(record.clone());
        Ok(())
    }

    async fn list_event_records(
        &self,
        player: &PlayerId,
    ) -> Result<Vec<EventBroadcastRecord>, GatewayError> {
        self.pause().await;
        let inner = self.inner.lock();
        inner.check_read(EntityKind::EventRecord)?;
        Ok(inner
            .tables
            .records
            .iter()
            .filter(|r| &r.player_id == player)
            .cloned()
            .collect())
    }

    async fn create_player(&self, player: &Player) -> Result<(), GatewayError> {
        self.pause().await;
        let mut inner = self.inner.lock();
        inner.begin_write(EntityKind::Player)?;
        inner.tables.players.insert(player.id.clone(), player.clone());
        Ok(())
    }

    async fn get_player(&self, id: &PlayerId) -> Result<Option<Player>, GatewayError> {
        self.pause().await;
        let inner = self.inner.lock();
        inner.check_read(EntityKind::Player)?;
        Ok(inner.tables.players.get(id).cloned())
    }

    async fn credit_player(
        &self,
        id: &PlayerId,
        amount: Decimal,
        expected_version: u64,
    ) -> Result<Player, GatewayError> {
        self.pause().await;
        let mut inner = self.inner.lock();
        if inner.faults.writes.contains(&EntityKind::Player) {
            return Err(GatewayError::Unavailable(EntityKind::Player));
        }
        let position = inner
            .faults
            .interleaved_credits
            .iter()
            .position(|(p, _)| p == id);
        let interleaved = position.map(|i| inner.faults.interleaved_credits.remove(i).1);
        let player = inner
            .tables
            .players
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound {
                kind: EntityKind::Player,
                id: id.to_string(),
            })?;
        if let Some(other) = interleaved {
            player.balance = player
                .balance
                .checked_add(other)
                .ok_or(GatewayError::MoneyOutOfRange(other))?;
            player.version += 1;
        }
        if player.version != expected_version {
            return Err(GatewayError::VersionConflict {
                player: id.clone(),
                expected: expected_version,
                found: player.version,
            });
        }
        player.balance = player
            .balance
            .checked_add(amount)
            .ok_or(GatewayError::MoneyOutOfRange(amount))?;
        player.version += 1;
        let updated = player.clone();
        *inner.write_counts.entry(EntityKind::Player).or_insert(0) += 1;
        Ok(updated)
    }

    async fn create_audit_entry(&self, entry: &AuditLogEntry) -> Result<(), GatewayError> {
        self.pause().await;
        let mut inner = self.inner.lock();
        inner.begin_write(EntityKind::AuditEntry)?;
        inner.tables.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit_entries(
        &self,
        player: &PlayerId,
    ) -> Result<Vec<AuditLogEntry>, GatewayError> {
        self.pause().await;
        let inner = self.inner.lock();
        inner.check_read(EntityKind::AuditEntry)?;
        Ok(inner
            .tables
            .audit
            .iter()
            .filter(|e| &e.player_id == player)
            .cloned()
            .collect())
    }

    async fn create_enterprise(&self, enterprise: &CriminalEnterprise) -> Result<(), GatewayError> {
        self.pause().await;
        let mut inner = self.inner.lock();
        inner.begin_write(EntityKind::Enterprise)?;
        inner.tables.enterprises.push(enterprise.clone());
        Ok(())
    }

    async fn create_territory(&self, territory: &Territory) -> Result<(), GatewayError> {
        self.pause().await;
        let mut inner = self.inner.lock();
        inner.begin_write(EntityKind::Territory)?;
        inner.tables.territories.push(territory.clone());
        Ok(())
    }

    async fn create_investment(&self, investment: &Investment) -> Result<(), GatewayError> {
        self.pause().await;
        let mut inner = self.inner.lock();
        inner.begin_write(EntityKind::Investment)?;
        inner.tables.investments.push(investment.clone());
        Ok(())
    }

    async fn list_enterprises(
        &self,
        owner: &PlayerId,
    ) -> Result<Vec<CriminalEnterprise>, GatewayError> {
        self.pause().await;
        let inner = self.inner.lock();
        inner.check_read(EntityKind::Enterprise)?;
        Ok(inner
            .tables
            .enterprises
            .iter()
            .filter(|e| &e.owner == owner)
            .cloned()
            .collect())
    }

    async fn list_territories(
        &self,
        controller: &PlayerId,
    ) -> Result<Vec<Territory>, GatewayError> {
        self.pause().await;
        let inner = self.inner.lock();
        inner.check_read(EntityKind::Territory)?;
        Ok(inner
            .tables
            .territories
            .iter()
            .filter(|t| t.controller.as_ref() == Some(controller))
            .cloned()
            .collect())
    }

    async fn list_investments(
        &self,
        player: &PlayerId,
        status: InvestmentStatus,
    ) -> Result<Vec<Investment>, GatewayError> {
        self.pause().await;
        let inner = self.inner.lock();
        inner.check_read(EntityKind::Investment)?;
        Ok(inner
            .tables
            .investments
            .iter()
            .filter(|i| &i.player_id == player && i.status == status)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::RecordId;

    fn don() -> Player {
        Player::new(PlayerId::from("don"), "Don", Decimal::from(500))
    }

    #[tokio::test]
    async fn credit_bumps_version_and_counts_write() {
        let gw = MemoryGateway::new();
        gw.create_player(&don()).await.unwrap();
        let p = gw
            .credit_player(&PlayerId::from("don"), Decimal::from(100), 0)
            .await
            .unwrap();
        assert_eq!(p.balance, Decimal::from(600));
        assert_eq!(p.version, 1);
        assert_eq!(gw.write_count(EntityKind::Player), 2);
    }

    #[tokio::test]
    async fn overflowing_credit_leaves_balance_alone() {
        let gw = MemoryGateway::new();
        gw.create_player(&don()).await.unwrap();
        let err = gw
            .credit_player(&PlayerId::from("don"), Decimal::MAX, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MoneyOutOfRange(_)));
        let p = gw.get_player(&PlayerId::from("don")).await.unwrap().unwrap();
        assert_eq!((p.balance, p.version), (Decimal::from(500), 0));
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let gw = MemoryGateway::new();
        gw.create_player(&don()).await.unwrap();
        let id = PlayerId::from("don");
        gw.interleave_credit(&id, Decimal::from(50));
        let err = gw
            .credit_player(&id, Decimal::from(100), 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::VersionConflict {
                expected: 0,
                found: 1,
                ..
            }
        ));
        let p = gw.get_player(&id).await.unwrap().unwrap();
        assert_eq!(p.balance, Decimal::from(550));
    }

    #[tokio::test]
    async fn injected_faults_fail_reads_and_writes() {
        let gw = MemoryGateway::new();
        let owner = PlayerId::from("don");
        gw.create_enterprise(&CriminalEnterprise {
            id: RecordId::from("e1"),
            owner: owner.clone(),
            name: "Still".into(),
            production_rate: Decimal::from(3),
        })
        .await
        .unwrap();
        gw.fail_reads(EntityKind::Enterprise);
        assert!(matches!(
            gw.list_enterprises(&owner).await,
            Err(GatewayError::Unavailable(EntityKind::Enterprise))
        ));
        gw.fail_writes(EntityKind::AuditEntry);
        gw.clear_faults();
        assert_eq!(gw.list_enterprises(&owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn investments_filter_by_status() {
        let gw = MemoryGateway::new();
        let owner = PlayerId::from("don");
        for (id, status) in [("a", InvestmentStatus::Active), ("b", InvestmentStatus::Matured)] {
            gw.create_investment(&Investment {
                id: RecordId::from(id),
                player_id: owner.clone(),
                name: id.into(),
                daily_return: Decimal::from(48),
                status,
            })
            .await
            .unwrap();
        }
        let active = gw
            .list_investments(&owner, InvestmentStatus::Active)
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, RecordId::from("a"));
    }

    #[tokio::test]
    async fn update_of_unknown_session_fails() {
        let gw = MemoryGateway::new();
        let s = Session::open(
            SessionId::from("ghost"),
            PlayerId::from("don"),
            chrono::Utc::now(),
        );
        assert!(matches!(
            gw.update_session(&s).await,
            Err(GatewayError::NotFound { .. })
        ));
    }
}
