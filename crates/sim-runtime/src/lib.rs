#![deny(warnings)]

//! Background economy engine for Underworld.
//!
//! One engine runs per signed-in player. A cycle task periodically drains
//! queued events into durable broadcast records, projects income from the
//! player's holdings, and commits it to the balance with an audit entry. A
//! health task resets the engine's own cache and queue when thresholds are
//! crossed. Every step is announced on a typed [`IntentBus`].
//!
//! ```no_run
//! # async fn demo() -> Result<(), sim_runtime::EngineError> {
//! use std::sync::Arc;
//! use persistence::{MemoryGateway, StaticIdentity};
//! use sim_runtime::{start_engine, EngineConfig};
//!
//! let gateway = Arc::new(MemoryGateway::new());
//! let identity = StaticIdentity("p1".into());
//! let engine = start_engine(EngineConfig::default(), gateway, &identity).await?;
//! engine.record_action();
//! let session = engine.shutdown().await?;
//! assert!(!session.is_active());
//! # Ok(())
//! # }
//! ```

mod assimilator;
mod bridge;
mod config;
mod engine;
mod error;
mod intent;
mod optimizer;
mod scheduler;
mod session;
mod simulator;
mod state;

pub use assimilator::{display_name, Assimilator};
pub use bridge::{BridgeApplier, BridgeReceipt, INCOME_APPLIED};
pub use config::EngineConfig;
pub use engine::{start_engine, start_engine_with_bus, EngineHandle};
pub use error::EngineError;
pub use intent::{Intent, IntentBus, IntentEnvelope};
pub use optimizer::{OptimizationReport, SelfOptimizer};
pub use scheduler::{CycleOutcome, CycleReport, Scheduler};
pub use session::{SessionTracker, SharedSession};
pub use simulator::StateSimulator;
pub use state::{EngineState, EventQueue, SimulationCache};
