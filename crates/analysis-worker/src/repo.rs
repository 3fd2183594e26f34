//! Persistence contracts used by the game analyzer.
//!
//! Methods return `impl Future + Send` so analyses can run on spawned tasks.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use chess_core::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::Classification;
use crate::error::WorkerError;

/// Starting ease factor of a new flashcard.
pub const INITIAL_EASE_FACTOR: f64 = 2.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl GameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Pending => "pending",
            GameStatus::Processing => "processing",
            GameStatus::Completed => "completed",
            GameStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(GameStatus::Pending),
            "processing" => Ok(GameStatus::Processing),
            "completed" => Ok(GameStatus::Completed),
            "failed" => Ok(GameStatus::Failed),
            other => Err(format!("unknown game status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Game {
    pub id: i64,
    pub profile_id: i64,
    pub pgn: String,
    /// The colour the profile's owner played.
    pub profile_side: Side,
    pub status: GameStatus,
    pub opening_eco: Option<String>,
    pub opening_name: Option<String>,
}

/// One analysed ply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveRecord {
    pub game_id: i64,
    /// 1-based ply number.
    pub move_number: i32,
    pub fen_before: String,
    pub move_played: String,
    pub best_move: String,
    pub eval_before_cp: f64,
    pub eval_after_cp: f64,
    pub eval_diff: f64,
    pub mate_before: Option<i32>,
    pub mate_after: Option<i32>,
    pub classification: Classification,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFlashcard {
    pub profile_id: i64,
    pub position_id: i64,
    pub interval_days: i32,
    pub ease_factor: f64,
    pub times_reviewed: i32,
    pub times_correct: i32,
    pub due_at: DateTime<Utc>,
}

impl NewFlashcard {
    /// A never-reviewed card, due immediately.
    pub fn due_now(profile_id: i64, position_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            profile_id,
            position_id,
            interval_days: 0,
            ease_factor: INITIAL_EASE_FACTOR,
            times_reviewed: 0,
            times_correct: 0,
            due_at: now,
        }
    }
}

pub trait GameRepository: Send + Sync {
    fn get_game(
        &self,
        game_id: i64,
    ) -> impl Future<Output = Result<Option<Game>, WorkerError>> + Send;

    fn update_game_status(
        &self,
        game_id: i64,
        status: GameStatus,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send;

    fn update_game_opening(
        &self,
        game_id: i64,
        eco: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send;

    /// Recompute the profile's aggregate statistics.
    fn refresh_profile_stats(
        &self,
        profile_id: i64,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send;
}

pub trait PositionRepository: Send + Sync {
    /// Insert all records at once; returns their ids in input order.
    /// Either every record is stored or none is.
    fn insert_positions_batch(
        &self,
        records: &[MoveRecord],
    ) -> impl Future<Output = Result<Vec<i64>, WorkerError>> + Send;
}

pub trait FlashcardRepository: Send + Sync {
    fn insert_flashcard(
        &self,
        card: &NewFlashcard,
    ) -> impl Future<Output = Result<i64, WorkerError>> + Send;
}
