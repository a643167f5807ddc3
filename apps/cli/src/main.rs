#![deny(warnings)]

//! Headless driver: runs the engine against a local store for a few cycles.

use anyhow::Result;
use persistence::{
    ensure_sqlite_dir, EntityGateway, MemoryGateway, SqliteGateway, StaticIdentity,
};
use rust_decimal::Decimal;
use sim_core::{CriminalEnterprise, Player, PlayerId, RecordId, Territory};
use sim_runtime::{start_engine_with_bus, EngineConfig, Intent, IntentBus, IntentEnvelope};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Args {
    config: Option<PathBuf>,
    db: Option<String>,
    cycles: u64,
    player: String,
}

fn parse_args() -> Args {
    let mut args = Args {
        config: None,
        db: None,
        cycles: 3,
        player: "don".to_string(),
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = it.next().map(PathBuf::from),
            "--db" => args.db = it.next(),
            "--cycles" => {
                if let Some(n) = it.next().and_then(|s| s.parse().ok()) {
                    args.cycles = n;
                }
            }
            "--player" => {
                if let Some(p) = it.next() {
                    args.player = p;
                }
            }
            _ => {}
        }
    }
    args
}

async fn open_gateway(db: Option<&str>) -> Result<Arc<dyn EntityGateway>> {
    let gateway: Arc<dyn EntityGateway> = match db {
        Some(url) => {
            ensure_sqlite_dir(url)?;
            Arc::new(SqliteGateway::connect(url).await?)
        }
        None => Arc::new(MemoryGateway::new()),
    };
    Ok(gateway)
}

/// Give a fresh player one racket and one block of turf.
async fn seed_demo(gateway: &dyn EntityGateway, player: &PlayerId) -> Result<()> {
    if gateway.get_player(player).await?.is_some() {
        return Ok(());
    }
    gateway
        .create_player(&Player::new(player.clone(), "The Don", Decimal::from(1_000)))
        .await?;
    gateway
        .create_enterprise(&CriminalEnterprise {
            id: RecordId(format!("{player}_numbers")),
            owner: player.clone(),
            name: "Numbers Racket".to_string(),
            production_rate: Decimal::from(10),
        })
        .await?;
    gateway
        .create_territory(&Territory {
            id: RecordId(format!("{player}_docks")),
            controller: Some(player.clone()),
            name: "Harbor Docks".to_string(),
            tax_rate: Some(Decimal::from(2)),
            value: Some(Decimal::from(50_000)),
        })
        .await?;
    info!(player_id = %player, "seeded demo holdings");
    Ok(())
}

/// Cycle periods without a completed cycle before the driver gives up.
const STALLED_PERIODS: u32 = 3;

/// Wait for `target` completed cycles. Returns early when the bus closes or
/// no cycle completes within `stall_limit`.
async fn wait_for_cycles(
    intents: &mut broadcast::Receiver<IntentEnvelope>,
    target: u64,
    stall_limit: Duration,
) -> u64 {
    let mut completed = 0;
    let mut deadline = Instant::now() + stall_limit;
    while completed < target {
        let received = match timeout_at(deadline, intents.recv()).await {
            Ok(received) => received,
            Err(_) => {
                warn!(completed, target, ?stall_limit, "no cycle completed in time, stopping");
                break;
            }
        };
        match received {
            Ok(envelope) => match envelope.intent {
                Intent::RuntimeCycle { cycle, income, .. } => {
                    completed += 1;
                    deadline = Instant::now() + stall_limit;
                    info!(cycle, income = %income.total_income, "cycle");
                }
                Intent::SelfOptimization {
                    cache_cleared,
                    queue_cleared,
                    ..
                } => info!(cache_cleared, queue_cleared, "self-optimization"),
                _ => {}
            },
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "intent listener lagged"),
            Err(RecvError::Closed) => break,
        }
    }
    completed
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = parse_args();
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    info!(config = ?args.config, db = ?args.db, cycles = args.cycles, "starting CLI");

    let gateway = open_gateway(args.db.as_deref()).await?;
    let player = PlayerId(args.player.clone());
    seed_demo(gateway.as_ref(), &player).await?;

    let bus = IntentBus::new(config.intent_channel_capacity);
    let mut intents = bus.subscribe();
    let stall_limit = config.cycle_interval() * STALLED_PERIODS;
    let engine = start_engine_with_bus(
        config,
        gateway.clone(),
        &StaticIdentity(player.clone()),
        bus,
    )
    .await?;

    wait_for_cycles(&mut intents, args.cycles, stall_limit).await;

    let metrics = engine.metrics();
    let session = engine.shutdown().await?;
    let balance = gateway
        .get_player(&player)
        .await?
        .map(|p| p.balance)
        .unwrap_or_default();

    println!(
        "KPI | cycles: {} | success: {}% | avg latency: {:.2}ms | balance: ${} | session: {} ({} min)",
        metrics.cycles_run,
        metrics.success_rate,
        metrics.avg_cycle_latency_ms,
        balance,
        session.id,
        session.duration_minutes.unwrap_or(0)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{SimulationResult, YieldMetrics};

    fn cycle(n: u64) -> Intent {
        Intent::RuntimeCycle {
            cycle: n,
            latency_ms: 1.0,
            income: SimulationResult::default(),
            metrics: YieldMetrics::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_cycles_stall() {
        let bus = IntentBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(cycle(1));
        let started = Instant::now();

        let completed = wait_for_cycles(&mut rx, 3, Duration::from_secs(540)).await;
        assert_eq!(completed, 1);
        assert_eq!(started.elapsed(), Duration::from_secs(540));
        drop(bus);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_once_target_reached() {
        let bus = IntentBus::new(8);
        let mut rx = bus.subscribe();
        for n in 1..=3 {
            bus.publish(cycle(n));
        }
        let completed = wait_for_cycles(&mut rx, 2, Duration::from_secs(540)).await;
        assert_eq!(completed, 2);
    }
}
