//! Game analysis worker.
//!
//! Runs a pool of UCI engine processes, evaluates every ply of a game,
//! classifies the played moves, and stores them with flashcards for the
//! positions worth drilling.

pub mod analyzer;
pub mod classify;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod pool;
pub mod repo;
pub mod sqs;

pub use analyzer::{AnalysisOptions, AnalysisOutcome, AnalysisSummary, GameAnalyzer};
pub use classify::{classify, Classification, Thresholds};
pub use engine::{EngineError, EngineProcess, Evaluation, PositionEvaluator, SearchLimits};
pub use error::WorkerError;
pub use pool::EnginePool;
pub use repo::{
    FlashcardRepository, Game, GameRepository, GameStatus, MoveRecord, NewFlashcard,
    PositionRepository,
};
