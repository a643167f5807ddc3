//! Commits a cycle's projected income into the persisted balance.
//!
//! The bridge is the only writer of `Player::balance` in the engine. Each
//! positive result produces, in order, one versioned balance credit, one
//! audit ledger entry, and one `income_applied` follow-up event.

use crate::{EngineError, EngineState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use persistence::{EntityGateway, GatewayError};
use rust_decimal::Decimal;
use sim_core::{
    AuditEntryType, AuditLogEntry, Player, PlayerId, QueuedEvent, RecordId, SimulationResult,
};
use tracing::{debug, warn};

/// Kind of the follow-up event enqueued after a credit.
pub const INCOME_APPLIED: &str = "income_applied";

/// What a successful bridge step wrote.
#[derive(Clone, Debug, PartialEq)]
pub struct BridgeReceipt {
    pub player: Player,
    pub audit: AuditLogEntry,
}

#[derive(Clone, Debug)]
pub struct BridgeApplier {
    max_attempts: u32,
}

impl BridgeApplier {
    /// `conflict_retries` extra attempts are made after a version conflict.
    pub fn new(conflict_retries: u32) -> Self {
        Self {
            max_attempts: conflict_retries.saturating_add(1),
        }
    }

    /// Apply `result` to `player`. Returns `None` when there was nothing to apply.
    pub async fn apply(
        &self,
        gateway: &dyn EntityGateway,
        player: &PlayerId,
        result: &SimulationResult,
        state: &Mutex<EngineState>,
        now: DateTime<Utc>,
    ) -> Result<Option<BridgeReceipt>, EngineError> {
        if !result.is_productive() {
            debug!(player_id = %player, "no income this cycle");
            return Ok(None);
        }
        let amount = result.total_income;
        let updated = self.credit(gateway, player, amount).await?;

        let audit = AuditLogEntry {
            id: RecordId(format!("audit_{}_{}", player, updated.version)),
            player_id: player.clone(),
            entry_type: AuditEntryType::AutomatedIncome,
            amount,
            balance_after: updated.balance,
            description: format!(
                "Automated income from {} enterprises, {} territories, {} investments",
                result.enterprise_count, result.territory_count, result.investment_count
            ),
            created_at: now,
        };
        if let Err(err) = gateway.create_audit_entry(&audit).await {
            self.compensate(gateway, player, amount, updated.version).await;
            return Err(err.into());
        }

        let event = QueuedEvent::new(INCOME_APPLIED)
            .with("amount", serde_json::to_value(amount)?)
            .with("balance_after", serde_json::to_value(updated.balance)?)
            .with("result", serde_json::to_value(result)?);
        state.lock().queue.push(event);

        debug!(player_id = %player, %amount, balance = %updated.balance, "income applied");
        Ok(Some(BridgeReceipt {
            player: updated,
            audit,
        }))
    }

    /// Versioned credit with bounded retry on conflict.
    async fn credit(
        &self,
        gateway: &dyn EntityGateway,
        player: &PlayerId,
        amount: Decimal,
    ) -> Result<Player, EngineError> {
        for attempt in 1..=self.max_attempts {
            let current = gateway
                .get_player(player)
                .await?
                .ok_or_else(|| EngineError::PlayerNotFound(player.clone()))?;
            match gateway.credit_player(player, amount, current.version).await {
                Ok(updated) => return Ok(updated),
                Err(GatewayError::VersionConflict { found, .. }) => {
                    debug!(player_id = %player, attempt, found, "balance moved; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(EngineError::ConflictRetriesExhausted {
            player: player.clone(),
            attempts: self.max_attempts,
        })
    }

    /// Undo a credit whose ledger entry could not be written.
    async fn compensate(
        &self,
        gateway: &dyn EntityGateway,
        player: &PlayerId,
        amount: Decimal,
        version: u64,
    ) {
        if let Err(err) = gateway.credit_player(player, -amount, version).await {
            warn!(player_id = %player, %amount, error = %err, "could not reverse unaudited credit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::{EntityKind, MemoryGateway};
    use proptest::prelude::*;

    fn income(total: i64) -> SimulationResult {
        SimulationResult {
            total_income: Decimal::from(total),
            enterprise_income: Decimal::from(total),
            enterprise_count: 1,
            ..SimulationResult::default()
        }
    }

    async fn with_player(balance: i64) -> (MemoryGateway, PlayerId) {
        let gw = MemoryGateway::new();
        let p = PlayerId::from("p1");
        gw.create_player(&Player::new(p.clone(), "Vito", Decimal::from(balance)))
            .await
            .unwrap();
        (gw, p)
    }

    #[tokio::test]
    async fn credit_audit_and_follow_up() {
        let (gw, p) = with_player(1_000).await;
        let state = Mutex::new(EngineState::default());
        let receipt = BridgeApplier::new(3)
            .apply(&gw, &p, &income(1_100), &state, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(receipt.player.balance, Decimal::from(2_100));

        let ledger = gw.list_audit_entries(&p).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].amount, Decimal::from(1_100));
        assert_eq!(ledger[0].balance_after, Decimal::from(2_100));
        assert_eq!(ledger[0].entry_type, AuditEntryType::AutomatedIncome);
        assert!(ledger[0].description.contains("1 enterprises"));

        let mut st = state.lock();
        let queued = st.queue.drain();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].kind, INCOME_APPLIED);
        assert!(queued[0].payload.contains_key("result"));
        assert!(queued[0].payload.contains_key("balance_after"));
    }

    #[tokio::test]
    async fn zero_income_writes_nothing() {
        let (gw, p) = with_player(1_000).await;
        let state = Mutex::new(EngineState::default());
        let out = BridgeApplier::new(3)
            .apply(&gw, &p, &income(0), &state, Utc::now())
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(gw.write_count(EntityKind::Player), 1);
        assert_eq!(gw.write_count(EntityKind::AuditEntry), 0);
        assert!(state.lock().queue.is_empty());
    }

    #[tokio::test]
    async fn retries_after_concurrent_write() {
        let (gw, p) = with_player(1_000).await;
        gw.interleave_credit(&p, Decimal::from(50));
        let state = Mutex::new(EngineState::default());
        let receipt = BridgeApplier::new(3)
            .apply(&gw, &p, &income(100), &state, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(receipt.player.balance, Decimal::from(1_150));
        assert_eq!(receipt.audit.balance_after, Decimal::from(1_150));
        assert_eq!(gw.list_audit_entries(&p).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_retries() {
        let (gw, p) = with_player(1_000).await;
        for _ in 0..2 {
            gw.interleave_credit(&p, Decimal::from(1));
        }
        let state = Mutex::new(EngineState::default());
        let err = BridgeApplier::new(1)
            .apply(&gw, &p, &income(100), &state, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::ConflictRetriesExhausted { attempts: 2, .. }
        ));
        assert!(gw.list_audit_entries(&p).await.unwrap().is_empty());
        assert!(state.lock().queue.is_empty());
    }

    #[tokio::test]
    async fn missing_player_is_an_error() {
        let gw = MemoryGateway::new();
        let state = Mutex::new(EngineState::default());
        let err = BridgeApplier::new(3)
            .apply(&gw, &PlayerId::from("ghost"), &income(10), &state, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PlayerNotFound(_)));
    }

    #[tokio::test]
    async fn failed_audit_reverses_credit() {
        let (gw, p) = with_player(1_000).await;
        gw.fail_writes(EntityKind::AuditEntry);
        let state = Mutex::new(EngineState::default());
        let err = BridgeApplier::new(3)
            .apply(&gw, &p, &income(100), &state, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Gateway(_)));
        let after = gw.get_player(&p).await.unwrap().unwrap();
        assert_eq!(after.balance, Decimal::from(1_000));
        assert!(state.lock().queue.is_empty());
    }

    proptest! {
        #[test]
        fn balance_delta_equals_audited_amount(start in 0i64..1_000_000, total in 1i64..100_000) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let (gw, p) = with_player(start).await;
                let state = Mutex::new(EngineState::default());
                BridgeApplier::new(0)
                    .apply(&gw, &p, &income(total), &state, Utc::now())
                    .await
                    .unwrap();
                let after = gw.get_player(&p).await.unwrap().unwrap();
                let ledger = gw.list_audit_entries(&p).await.unwrap();
                assert_eq!(ledger.len(), 1);
                assert_eq!(after.balance - Decimal::from(start), ledger[0].amount);
            });
        }
    }
}
