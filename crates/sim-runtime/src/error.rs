use persistence::GatewayError;
use sim_core::{PlayerId, ValidationError};
use sim_econ::EconError;
use thiserror::Error;

/// Errors raised inside the engine.
///
/// Cycle-level errors never escape the scheduler; they are logged and
/// counted against the success rate. Start-up and teardown errors are
/// returned to the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Econ(#[from] EconError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("player {0} not found")]
    PlayerNotFound(PlayerId),
    #[error("balance of player {player} kept moving; gave up after {attempts} attempts")]
    ConflictRetriesExhausted { player: PlayerId, attempts: u32 },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
