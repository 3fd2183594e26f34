//! Worker error types

use chess_core::RulesError;
use thiserror::Error;

use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(&'static str),

    #[error("SQS error: {0}")]
    Sqs(String),

    #[error("Secrets Manager error: {0}")]
    SecretsManager(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Move list error: {0}")]
    Rules(#[from] RulesError),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Game not found: {0}")]
    GameNotFound(i64),
}
