//! SQLite gateway backend on `sqlx`.

use crate::{cents_to_decimal, decimal_to_cents_i64, EntityGateway, EntityKind, GatewayError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sim_core::{
    AuditLogEntry, CriminalEnterprise, EventBroadcastRecord, Investment, InvestmentStatus, Payload,
    Player, PlayerId, RecordId, Session, SessionId, Territory,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Open (creating if missing) the database at `url` and apply migrations.
///
/// The pool is pinned to a single long-lived connection so that
/// `sqlite::memory:` databases survive for the lifetime of the pool.
pub async fn init_db(url: &str) -> Result<SqlitePool, GatewayError> {
    let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None::<Duration>)
        .max_lifetime(None::<Duration>)
        .connect_with(opts)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    debug!(url, "sqlite schema ready");
    Ok(pool)
}

/// Entity gateway persisted in SQLite.
#[derive(Clone, Debug)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    pub async fn connect(url: &str) -> Result<Self, GatewayError> {
        Ok(Self {
            pool: init_db(url).await?,
        })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn player_version(&self, id: &PlayerId) -> Result<Option<u64>, GatewayError> {
        let row = sqlx::query("SELECT version FROM players WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get::<i64, _>("version").map(to_u64))
            .transpose()
            .map_err(GatewayError::from)
    }
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn cents(amount: Decimal) -> Result<i64, GatewayError> {
    decimal_to_cents_i64(amount).ok_or(GatewayError::MoneyOutOfRange(amount))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, GatewayError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| GatewayError::Corrupt(format!("timestamp {s:?}: {e}")))
}

fn parse_decimal(s: &str) -> Result<Decimal, GatewayError> {
    Decimal::from_str(s).map_err(|e| GatewayError::Corrupt(format!("decimal {s:?}: {e}")))
}

/// Enums are stored as their snake_case serde names.
fn parse_enum<T: DeserializeOwned>(s: String) -> Result<T, GatewayError> {
    Ok(serde_json::from_value(serde_json::Value::String(s))?)
}

fn session_from_row(row: &SqliteRow) -> Result<Session, GatewayError> {
    let end_time: Option<String> = row.try_get("end_time")?;
    Ok(Session {
        id: SessionId(row.try_get("id")?),
        player_id: PlayerId(row.try_get("player_id")?),
        start_time: parse_time(&row.try_get::<String, _>("start_time")?)?,
        end_time: end_time.as_deref().map(parse_time).transpose()?,
        action_count: to_u64(row.try_get("action_count")?),
        cycles_completed: to_u64(row.try_get("cycles_completed")?),
        duration_minutes: row.try_get("duration_minutes")?,
        status: parse_enum(row.try_get("status")?)?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<EventBroadcastRecord, GatewayError> {
    let payload: Payload = serde_json::from_str(&row.try_get::<String, _>("payload_json")?)?;
    Ok(EventBroadcastRecord {
        id: RecordId(row.try_get("id")?),
        kind: row.try_get("kind")?,
        name: row.try_get("name")?,
        player_id: PlayerId(row.try_get("player_id")?),
        payload,
        scope: parse_enum(row.try_get("scope")?)?,
        priority: parse_enum(row.try_get("priority")?)?,
        processed: row.try_get("processed")?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn player_from_row(row: &SqliteRow) -> Result<Player, GatewayError> {
    Ok(Player {
        id: PlayerId(row.try_get("id")?),
        display_name: row.try_get("display_name")?,
        balance: cents_to_decimal(row.try_get("balance_cents")?),
        version: to_u64(row.try_get("version")?),
    })
}

fn audit_from_row(row: &SqliteRow) -> Result<AuditLogEntry, GatewayError> {
    Ok(AuditLogEntry {
        id: RecordId(row.try_get("id")?),
        player_id: PlayerId(row.try_get("player_id")?),
        entry_type: parse_enum(row.try_get("entry_type")?)?,
        amount: cents_to_decimal(row.try_get("amount_cents")?),
        balance_after: cents_to_decimal(row.try_get("balance_after_cents")?),
        description: row.try_get("description")?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn enterprise_from_row(row: &SqliteRow) -> Result<CriminalEnterprise, GatewayError> {
    Ok(CriminalEnterprise {
        id: RecordId(row.try_get("id")?),
        owner: PlayerId(row.try_get("owner_id")?),
        name: row.try_get("name")?,
        production_rate: parse_decimal(&row.try_get::<String, _>("production_rate")?)?,
    })
}

fn territory_from_row(row: &SqliteRow) -> Result<Territory, GatewayError> {
    let controller: Option<String> = row.try_get("controller_id")?;
    let tax_rate: Option<String> = row.try_get("tax_rate")?;
    let value: Option<String> = row.try_get("value")?;
    Ok(Territory {
        id: RecordId(row.try_get("id")?),
        controller: controller.map(PlayerId),
        name: row.try_get("name")?,
        tax_rate: tax_rate.as_deref().map(parse_decimal).transpose()?,
        value: value.as_deref().map(parse_decimal).transpose()?,
    })
}

fn investment_from_row(row: &SqliteRow) -> Result<Investment, GatewayError> {
    Ok(Investment {
        id: RecordId(row.try_get("id")?),
        player_id: PlayerId(row.try_get("player_id")?),
        name: row.try_get("name")?,
        daily_return: parse_decimal(&row.try_get::<String, _>("daily_return")?)?,
        status: parse_enum(row.try_get("status")?)?,
    })
}

#[async_trait]
impl EntityGateway for SqliteGateway {
    async fn create_session(&self, session: &Session) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO sessions (
                id, player_id, start_time, end_time, action_count,
                cycles_completed, duration_minutes, status
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(session.id.as_str())
        .bind(session.player_id.as_str())
        .bind(session.start_time.to_rfc3339())
        .bind(session.end_time.map(|t| t.to_rfc3339()))
        .bind(to_i64(session.action_count))
        .bind(to_i64(session.cycles_completed))
        .bind(session.duration_minutes)
        .bind(session.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_session(&self, session: &Session) -> Result<(), GatewayError> {
        let res = sqlx::query(
            "UPDATE sessions SET
                end_time = ?2, action_count = ?3, cycles_completed = ?4,
                duration_minutes = ?5, status = ?6
             WHERE id = ?1",
        )
        .bind(session.id.as_str())
        .bind(session.end_time.map(|t| t.to_rfc3339()))
        .bind(to_i64(session.action_count))
        .bind(to_i64(session.cycles_completed))
        .bind(session.duration_minutes)
        .bind(session.status.as_str())
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(GatewayError::NotFound {
                kind: EntityKind::Session,
                id: session.id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, GatewayError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn create_event_record(&self, record: &EventBroadcastRecord) -> Result<(), GatewayError> {
        let payload = serde_json::to_string(&record.payload)?;
        sqlx::query(
            "INSERT INTO event_broadcasts (
                id, kind, name, player_id, payload_json, scope, priority, processed, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(record.id.as_str())
        .bind(record.kind.as_str())
        .bind(record.name.as_str())
        .bind(record.player_id.as_str())
        .bind(payload)
        .bind(record.scope.as_str())
        .bind(record.priority.as_str())
        .bind(record.processed)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_event_records(
        &self,
        player: &PlayerId,
    ) -> Result<Vec<EventBroadcastRecord>, GatewayError> {
        let rows = sqlx::query("SELECT * FROM event_broadcasts WHERE player_id = ?1 ORDER BY rowid")
            .bind(player.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn create_player(&self, player: &Player) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO players (id, display_name, balance_cents, version)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(player.id.as_str())
        .bind(player.display_name.as_str())
        .bind(cents(player.balance)?)
        .bind(to_i64(player.version))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_player(&self, id: &PlayerId) -> Result<Option<Player>, GatewayError> {
        let row = sqlx::query("SELECT * FROM players WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(player_from_row).transpose()
    }

    async fn credit_player(
        &self,
        id: &PlayerId,
        amount: Decimal,
        expected_version: u64,
    ) -> Result<Player, GatewayError> {
        let current = self
            .get_player(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound {
                kind: EntityKind::Player,
                id: id.to_string(),
            })?;
        if current.version != expected_version {
            return Err(GatewayError::VersionConflict {
                player: id.clone(),
                expected: expected_version,
                found: current.version,
            });
        }
        let balance = current
            .balance
            .checked_add(amount)
            .ok_or(GatewayError::MoneyOutOfRange(amount))?;
        let res = sqlx::query(
            "UPDATE players SET balance_cents = ?1, version = version + 1
             WHERE id = ?2 AND version = ?3",
        )
        .bind(cents(balance)?)
        .bind(id.as_str())
        .bind(to_i64(expected_version))
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            let found = self.player_version(id).await?.unwrap_or(expected_version);
            return Err(GatewayError::VersionConflict {
                player: id.clone(),
                expected: expected_version,
                found,
            });
        }
        Ok(Player {
            balance,
            version: expected_version + 1,
            ..current
        })
    }

    async fn create_audit_entry(&self, entry: &AuditLogEntry) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO audit_log (
                id, player_id, entry_type, amount_cents, balance_after_cents,
                description, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(entry.id.as_str())
        .bind(entry.player_id.as_str())
        .bind(entry.entry_type.as_str())
        .bind(cents(entry.amount)?)
        .bind(cents(entry.balance_after)?)
        .bind(entry.description.as_str())
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_audit_entries(
        &self,
        player: &PlayerId,
    ) -> Result<Vec<AuditLogEntry>, GatewayError> {
        let rows = sqlx::query("SELECT * FROM audit_log WHERE player_id = ?1 ORDER BY rowid")
            .bind(player.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(audit_from_row).collect()
    }

    async fn create_enterprise(&self, enterprise: &CriminalEnterprise) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO enterprises (id, owner_id, name, production_rate) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(enterprise.id.as_str())
        .bind(enterprise.owner.as_str())
        .bind(enterprise.name.as_str())
        .bind(enterprise.production_rate.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_territory(&self, territory: &Territory) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO territories (id, controller_id, name, tax_rate, value)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(territory.id.as_str())
        .bind(territory.controller.as_ref().map(|p| p.0.clone()))
        .bind(territory.name.as_str())
        .bind(territory.tax_rate.map(|d| d.to_string()))
        .bind(territory.value.map(|d| d.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_investment(&self, investment: &Investment) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO investments (id, player_id, name, daily_return, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(investment.id.as_str())
        .bind(investment.player_id.as_str())
        .bind(investment.name.as_str())
        .bind(investment.daily_return.to_string())
        .bind(investment.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_enterprises(
        &self,
        owner: &PlayerId,
    ) -> Result<Vec<CriminalEnterprise>, GatewayError> {
        let rows = sqlx::query("SELECT * FROM enterprises WHERE owner_id = ?1 ORDER BY rowid")
            .bind(owner.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(enterprise_from_row).collect()
    }

    async fn list_territories(
        &self,
        controller: &PlayerId,
    ) -> Result<Vec<Territory>, GatewayError> {
        let rows = sqlx::query("SELECT * FROM territories WHERE controller_id = ?1 ORDER BY rowid")
            .bind(controller.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(territory_from_row).collect()
    }

    async fn list_investments(
        &self,
        player: &PlayerId,
        status: InvestmentStatus,
    ) -> Result<Vec<Investment>, GatewayError> {
        let rows = sqlx::query(
            "SELECT * FROM investments WHERE player_id = ?1 AND status = ?2 ORDER BY rowid",
        )
        .bind(player.as_str())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(investment_from_row).collect()
    }
}
