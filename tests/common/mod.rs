#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use analysis_worker::{
    EngineError, Evaluation, FlashcardRepository, Game, GameRepository, GameStatus, MoveRecord,
    NewFlashcard, PositionEvaluator, PositionRepository, SearchLimits, WorkerError,
};
use chess_core::Side;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fake UCI engine
// ---------------------------------------------------------------------------

/// Write an executable `/bin/sh` UCI engine into `dir`. `on_go` is the shell
/// snippet run for every `go` command; `$fen` holds the current position.
pub fn fake_engine(dir: &Path, name: &str, on_go: &str) -> PathBuf {
    write_script(dir, name, "", on_go)
}

/// Like [`fake_engine`], with a shell `prelude` run before the command loop.
pub fn write_script(dir: &Path, name: &str, prelude: &str, on_go: &str) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
{prelude}
fen=""
while read -r line; do
  case "$line" in
    uci) echo "id name fake"; echo "uciok" ;;
    isready) echo "readyok" ;;
    "position fen "*) fen="${{line#position fen }}" ;;
    go*) {on_go} ;;
    quit) exit 0 ;;
  esac
done
"#
    );

    let path = dir.join(name);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Engine that always reports `score cp 35` and `bestmove e2e4`.
pub fn steady_engine() -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    let path = fake_engine(
        dir.path(),
        "steady.sh",
        r#"echo "info depth 1 score cp 35 nodes 10 pv e2e4"; echo "bestmove e2e4""#,
    );
    (dir, path.to_string_lossy().into_owned())
}

/// Engine that accepts `go` and never answers.
pub fn silent_engine() -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    let path = fake_engine(dir.path(), "silent.sh", ":");
    (dir, path.to_string_lossy().into_owned())
}

/// Limits that make a silent engine time out quickly.
pub fn fast_limits() -> SearchLimits {
    SearchLimits::new(1, Some(100))
}

// ---------------------------------------------------------------------------
// Scripted evaluator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Scripted {
    Eval(Evaluation),
    Timeout,
    Cancelled,
}

pub fn cp(centipawns: f64, best_move: &str) -> Scripted {
    Scripted::Eval(Evaluation {
        best_move: best_move.to_string(),
        centipawns,
        mate: None,
    })
}

pub fn mate(n: i32, best_move: &str) -> Scripted {
    Scripted::Eval(Evaluation {
        best_move: best_move.to_string(),
        centipawns: 0.0,
        mate: Some(n),
    })
}

/// Evaluator answering from a FEN-keyed script, with a fallback answer.
pub struct ScriptedEvaluator {
    script: HashMap<String, Scripted>,
    fallback: Scripted,
    /// FENs whose next evaluation times out once before the script applies.
    fail_once: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedEvaluator {
    pub fn new(fallback: Scripted) -> Self {
        Self {
            script: HashMap::new(),
            fallback,
            fail_once: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, fen: &str, answer: Scripted) -> Self {
        self.script.insert(fen.to_string(), answer);
        self
    }

    pub fn fails_once(self, fen: &str) -> Self {
        self.fail_once.lock().unwrap().insert(fen.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PositionEvaluator for ScriptedEvaluator {
    async fn evaluate(
        &self,
        _cancel: &CancellationToken,
        fen: &str,
        _limits: SearchLimits,
    ) -> Result<Evaluation, EngineError> {
        self.calls.lock().unwrap().push(fen.to_string());
        if self.fail_once.lock().unwrap().remove(fen) {
            return Err(EngineError::Timeout("bestmove"));
        }
        match self.script.get(fen).unwrap_or(&self.fallback) {
            Scripted::Eval(eval) => Ok(eval.clone()),
            Scripted::Timeout => Err(EngineError::Timeout("bestmove")),
            Scripted::Cancelled => Err(EngineError::Cancelled),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory repository
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRepo {
    pub games: Mutex<HashMap<i64, Game>>,
    pub positions: Mutex<Vec<(i64, MoveRecord)>>,
    pub flashcards: Mutex<Vec<NewFlashcard>>,
    pub status_history: Mutex<Vec<(i64, GameStatus)>>,
    pub stats_refreshes: AtomicUsize,
    pub fail_batch: bool,
    pub writes: AtomicUsize,
}

impl MemoryRepo {
    pub fn with_game(game: Game) -> Self {
        let repo = Self::default();
        repo.games.lock().unwrap().insert(game.id, game);
        repo
    }

    pub fn game(&self, id: i64) -> Game {
        self.games.lock().unwrap()[&id].clone()
    }

    pub fn records(&self) -> Vec<MoveRecord> {
        self.positions
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn position_ids(&self) -> Vec<i64> {
        self.positions.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub fn cards(&self) -> Vec<NewFlashcard> {
        self.flashcards.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

pub fn game(id: i64, pgn: &str, profile_side: Side) -> Game {
    Game {
        id,
        profile_id: 100,
        pgn: pgn.to_string(),
        profile_side,
        status: GameStatus::Pending,
        opening_eco: None,
        opening_name: None,
    }
}

impl GameRepository for MemoryRepo {
    async fn get_game(&self, game_id: i64) -> Result<Option<Game>, WorkerError> {
        Ok(self.games.lock().unwrap().get(&game_id).cloned())
    }

    async fn update_game_status(&self, game_id: i64, status: GameStatus) -> Result<(), WorkerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut games = self.games.lock().unwrap();
        let game = games
            .get_mut(&game_id)
            .ok_or(WorkerError::GameNotFound(game_id))?;
        game.status = status;
        self.status_history.lock().unwrap().push((game_id, status));
        Ok(())
    }

    async fn update_game_opening(&self, game_id: i64, eco: &str, name: &str) -> Result<(), WorkerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut games = self.games.lock().unwrap();
        let game = games
            .get_mut(&game_id)
            .ok_or(WorkerError::GameNotFound(game_id))?;
        game.opening_eco = Some(eco.to_string());
        game.opening_name = Some(name.to_string());
        Ok(())
    }

    async fn refresh_profile_stats(&self, _profile_id: i64) -> Result<(), WorkerError> {
        self.stats_refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl PositionRepository for MemoryRepo {
    async fn insert_positions_batch(&self, records: &[MoveRecord]) -> Result<Vec<i64>, WorkerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_batch {
            return Err(WorkerError::Repository("batch insert rejected".into()));
        }
        let mut positions = self.positions.lock().unwrap();
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let id = 1000 + positions.len() as i64;
            positions.push((id, record.clone()));
            ids.push(id);
        }
        Ok(ids)
    }
}

impl FlashcardRepository for MemoryRepo {
    async fn insert_flashcard(&self, card: &NewFlashcard) -> Result<i64, WorkerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut cards = self.flashcards.lock().unwrap();
        cards.push(card.clone());
        Ok(cards.len() as i64)
    }
}
