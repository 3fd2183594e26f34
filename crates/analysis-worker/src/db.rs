//! Postgres storage for games, analysed positions and flashcards

use chess_core::Side;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::error::WorkerError;
use crate::repo::{
    FlashcardRepository, Game, GameRepository, GameStatus, MoveRecord, NewFlashcard,
    PositionRepository,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS games (
    id BIGSERIAL PRIMARY KEY,
    profile_id BIGINT NOT NULL,
    pgn TEXT NOT NULL,
    profile_side TEXT NOT NULL CHECK (profile_side IN ('white', 'black')),
    status TEXT NOT NULL DEFAULT 'pending',
    opening_eco TEXT,
    opening_name TEXT,
    analyzed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_games_profile ON games (profile_id);

CREATE TABLE IF NOT EXISTS positions (
    id BIGSERIAL PRIMARY KEY,
    game_id BIGINT NOT NULL REFERENCES games (id) ON DELETE CASCADE,
    move_number INTEGER NOT NULL,
    fen_before TEXT NOT NULL,
    move_played TEXT NOT NULL,
    best_move TEXT NOT NULL,
    eval_before_cp DOUBLE PRECISION NOT NULL,
    eval_after_cp DOUBLE PRECISION NOT NULL,
    eval_diff DOUBLE PRECISION NOT NULL,
    mate_before INTEGER,
    mate_after INTEGER,
    classification TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_positions_game ON positions (game_id);

CREATE TABLE IF NOT EXISTS flashcards (
    id BIGSERIAL PRIMARY KEY,
    profile_id BIGINT NOT NULL,
    position_id BIGINT NOT NULL REFERENCES positions (id) ON DELETE CASCADE,
    interval_days INTEGER NOT NULL,
    ease_factor DOUBLE PRECISION NOT NULL,
    times_reviewed INTEGER NOT NULL,
    times_correct INTEGER NOT NULL,
    due_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_flashcards_due ON flashcards (profile_id, due_at);

CREATE TABLE IF NOT EXISTS profile_stats (
    profile_id BIGINT PRIMARY KEY,
    games_analyzed BIGINT NOT NULL,
    blunders BIGINT NOT NULL,
    mistakes BIGINT NOT NULL,
    inaccuracies BIGINT NOT NULL,
    flashcards BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

/// Counts only the profile's own moves: the side to move in `fen_before`
/// must match the side the profile played.
const REFRESH_STATS_SQL: &str = r#"
INSERT INTO profile_stats (
    profile_id, games_analyzed, blunders, mistakes, inaccuracies, flashcards, updated_at
)
SELECT
    $1,
    (SELECT COUNT(*) FROM games WHERE profile_id = $1 AND status = 'completed'),
    COUNT(*) FILTER (WHERE p.classification = 'blunder'),
    COUNT(*) FILTER (WHERE p.classification = 'mistake'),
    COUNT(*) FILTER (WHERE p.classification = 'inaccuracy'),
    (SELECT COUNT(*) FROM flashcards WHERE profile_id = $1),
    NOW()
FROM positions p
JOIN games g ON g.id = p.game_id
WHERE g.profile_id = $1
  AND split_part(p.fen_before, ' ', 2) = left(g.profile_side, 1)
ON CONFLICT (profile_id) DO UPDATE SET
    games_analyzed = EXCLUDED.games_analyzed,
    blunders = EXCLUDED.blunders,
    mistakes = EXCLUDED.mistakes,
    inaccuracies = EXCLUDED.inaccuracies,
    flashcards = EXCLUDED.flashcards,
    updated_at = EXCLUDED.updated_at
"#;

/// Repository backed by a Postgres connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, WorkerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "Connected to database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tables if they do not exist yet.
    pub async fn run_migrations(&self) -> Result<(), WorkerError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        debug!("Schema ready");
        Ok(())
    }
}

type GameRow = (
    i64,
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
);

fn game_from_row(row: GameRow) -> Result<Game, WorkerError> {
    let (id, profile_id, pgn, side, status, opening_eco, opening_name) = row;
    let profile_side: Side = side
        .parse()
        .map_err(|e| WorkerError::Repository(format!("game {id}: {e}")))?;
    let status: GameStatus = status
        .parse()
        .map_err(|e| WorkerError::Repository(format!("game {id}: {e}")))?;

    Ok(Game {
        id,
        profile_id,
        pgn,
        profile_side,
        status,
        opening_eco,
        opening_name,
    })
}

impl GameRepository for PgStore {
    async fn get_game(&self, game_id: i64) -> Result<Option<Game>, WorkerError> {
        let row: Option<GameRow> = sqlx::query_as(
            "SELECT id, profile_id, pgn, profile_side, status, opening_eco, opening_name \
             FROM games WHERE id = $1",
        )
        .bind(game_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(game_from_row).transpose()
    }

    async fn update_game_status(&self, game_id: i64, status: GameStatus) -> Result<(), WorkerError> {
        let result = sqlx::query(
            "UPDATE games SET status = $2, \
             analyzed_at = CASE WHEN $2 = 'completed' THEN NOW() ELSE analyzed_at END \
             WHERE id = $1",
        )
        .bind(game_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WorkerError::GameNotFound(game_id));
        }
        Ok(())
    }

    async fn update_game_opening(&self, game_id: i64, eco: &str, name: &str) -> Result<(), WorkerError> {
        sqlx::query("UPDATE games SET opening_eco = $2, opening_name = $3 WHERE id = $1")
            .bind(game_id)
            .bind(eco)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn refresh_profile_stats(&self, profile_id: i64) -> Result<(), WorkerError> {
        sqlx::query(REFRESH_STATS_SQL)
            .bind(profile_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl PositionRepository for PgStore {
    async fn insert_positions_batch(&self, records: &[MoveRecord]) -> Result<Vec<i64>, WorkerError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO positions (game_id, move_number, fen_before, move_played, best_move, \
             eval_before_cp, eval_after_cp, eval_diff, mate_before, mate_after, classification) ",
        );
        builder.push_values(records, |mut row, r| {
            row.push_bind(r.game_id)
                .push_bind(r.move_number)
                .push_bind(&r.fen_before)
                .push_bind(&r.move_played)
                .push_bind(&r.best_move)
                .push_bind(r.eval_before_cp)
                .push_bind(r.eval_after_cp)
                .push_bind(r.eval_diff)
                .push_bind(r.mate_before)
                .push_bind(r.mate_after)
                .push_bind(r.classification.as_str());
        });
        builder.push(" RETURNING id");

        let mut tx = self.pool.begin().await?;
        let ids: Vec<i64> = builder
            .build_query_scalar()
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        if ids.len() != records.len() {
            return Err(WorkerError::Repository(format!(
                "inserted {} positions but got {} ids",
                records.len(),
                ids.len()
            )));
        }
        debug!(count = ids.len(), "Inserted positions");
        Ok(ids)
    }
}

impl FlashcardRepository for PgStore {
    async fn insert_flashcard(&self, card: &NewFlashcard) -> Result<i64, WorkerError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO flashcards (profile_id, position_id, interval_days, ease_factor, \
             times_reviewed, times_correct, due_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(card.profile_id)
        .bind(card.position_id)
        .bind(card.interval_days)
        .bind(card.ease_factor)
        .bind(card.times_reviewed)
        .bind(card.times_correct)
        .bind(card.due_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }
}
