//! Core game analysis logic
//!
//! Walks a game ply by ply, evaluates each position once, classifies the
//! played moves, and decides which of the profile's own moves become
//! flashcards.

use chess_core::{
    apply_uci, is_standard_start, lookup_opening, parse_pgn, replay, GameLine, GameMetadata, Side,
};
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::classify::{classify, Classification, Thresholds};
use crate::engine::{Evaluation, PositionEvaluator, SearchLimits};
use crate::error::WorkerError;
use crate::repo::{
    FlashcardRepository, Game, GameRepository, GameStatus, MoveRecord, NewFlashcard,
    PositionRepository,
};

/// Minimum centipawn gain the engine's move must offer over a merely
/// inaccurate move before the position is worth a flashcard.
pub const DEFAULT_FLASHCARD_MIN_GAIN_CP: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOptions {
    pub limits: SearchLimits,
    pub thresholds: Thresholds,
    pub flashcard_min_gain_cp: f64,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            limits: SearchLimits::default(),
            thresholds: Thresholds::default(),
            flashcard_min_gain_cp: DEFAULT_FLASHCARD_MIN_GAIN_CP,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisSummary {
    pub plies: usize,
    pub moves_saved: usize,
    pub plies_skipped: usize,
    pub flashcards_created: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    /// The game was already completed; nothing was evaluated or written.
    AlreadyCompleted,
    Completed(AnalysisSummary),
}

/// Evaluation split into the stored centipawn / mate pair.
fn stored_score(eval: &Evaluation) -> (f64, Option<i32>) {
    match eval.mate {
        Some(n) => (0.0, Some(n)),
        None => (eval.centipawns, None),
    }
}

/// Whether the engine's suggestion (`what_if`) beats what the player's move
/// achieved (`actual`) by enough to drill the position.
///
/// Both evaluations are of positions after `mover` has moved, so a mate
/// score of 0 there means `mover` has already checkmated the opponent.
pub fn missed_improvement(
    what_if: &Evaluation,
    actual: &Evaluation,
    mover: Side,
    min_gain_cp: f64,
) -> bool {
    let mover_mates = |n: i32| match mover {
        Side::White => n >= 0,
        Side::Black => n <= 0,
    };

    match (what_if.mate, actual.mate) {
        // The suggested line gets the mover mated as well.
        (Some(suggested), _) if !mover_mates(suggested) => false,
        (Some(suggested), Some(achieved)) if mover_mates(achieved) => {
            suggested.abs() < achieved.abs()
        }
        (Some(_), _) => true,
        (None, Some(achieved)) => !mover_mates(achieved),
        (None, None) => {
            let gain = what_if.centipawns - actual.centipawns;
            let gain = match mover {
                Side::White => gain,
                Side::Black => -gain,
            };
            gain >= min_gain_cp
        }
    }
}

/// Analyses games using a shared evaluator and a repository.
pub struct GameAnalyzer<E, R> {
    evaluator: E,
    repo: R,
    options: AnalysisOptions,
}

impl<E, R> GameAnalyzer<E, R>
where
    E: PositionEvaluator,
    R: GameRepository + PositionRepository + FlashcardRepository,
{
    pub fn new(evaluator: E, repo: R, options: AnalysisOptions) -> Self {
        Self {
            evaluator,
            repo,
            options,
        }
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// Analyse one game and store its move records and flashcards.
    ///
    /// A completed game is left untouched. Otherwise the game is marked
    /// `processing`, and ends as `completed` or, on any fatal error, `failed`.
    pub async fn analyze_game(
        &self,
        game_id: i64,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutcome, WorkerError> {
        async move {
            let game = self
                .repo
                .get_game(game_id)
                .await?
                .ok_or(WorkerError::GameNotFound(game_id))?;

            if game.status == GameStatus::Completed {
                info!("Game already analysed, skipping");
                return Ok(AnalysisOutcome::AlreadyCompleted);
            }

            self.repo
                .update_game_status(game_id, GameStatus::Processing)
                .await?;
            info!(profile_side = %game.profile_side, "Starting analysis");

            match self.run(&game, cancel).await {
                Ok(summary) => {
                    info!(
                        moves_saved = summary.moves_saved,
                        plies_skipped = summary.plies_skipped,
                        flashcards = summary.flashcards_created,
                        "Analysis complete"
                    );
                    Ok(AnalysisOutcome::Completed(summary))
                }
                Err(e) => {
                    error!(error = %e, "Analysis failed");
                    if let Err(status_err) = self
                        .repo
                        .update_game_status(game_id, GameStatus::Failed)
                        .await
                    {
                        error!(error = %status_err, "Failed to mark game as failed");
                    }
                    Err(e)
                }
            }
        }
        .instrument(info_span!("analyze_game", game_id))
        .await
    }

    async fn run(
        &self,
        game: &Game,
        cancel: &CancellationToken,
    ) -> Result<AnalysisSummary, WorkerError> {
        let parsed = parse_pgn(&game.pgn)?;
        let line = replay(parsed.metadata.start_fen.as_deref(), &parsed.moves)?;
        debug!(plies = line.len(), "Replayed move list");

        if game.opening_eco.is_none() {
            self.detect_opening(game, &parsed.metadata, &line).await;
        }

        let mut summary = AnalysisSummary {
            plies: line.len(),
            ..Default::default()
        };
        let mut records: Vec<MoveRecord> = Vec::with_capacity(line.len());
        let mut flagged: Vec<usize> = Vec::new();

        // The position after ply i is the position before ply i + 1.
        let mut previous: Option<Evaluation> = None;
        let first_mover = line.first_mover();

        for ply in 0..line.len() {
            let fen_before = &line.positions[ply];
            let fen_after = &line.positions[ply + 1];
            let played = &line.moves_uci[ply];
            let mover = first_mover.at_ply(ply);

            let before = match previous.take() {
                Some(eval) => eval,
                None => match self.evaluate_soft(cancel, fen_before, ply).await? {
                    Some(eval) => eval,
                    None => {
                        summary.plies_skipped += 1;
                        continue;
                    }
                },
            };
            let Some(after) = self.evaluate_soft(cancel, fen_after, ply).await? else {
                summary.plies_skipped += 1;
                continue;
            };

            let (eval_before_cp, mate_before) = stored_score(&before);
            let (eval_after_cp, mate_after) = stored_score(&after);
            let classification = classify(
                eval_before_cp,
                eval_after_cp,
                mover == Side::White,
                played,
                &before.best_move,
                &self.options.thresholds,
            );

            if mover == game.profile_side
                && self
                    .worth_flashcard(cancel, fen_before, played, &before, &after, classification, mover)
                    .await?
            {
                debug!(ply, played = %played, best = %before.best_move, "Flagged for flashcard");
                flagged.push(records.len());
            }

            records.push(MoveRecord {
                game_id: game.id,
                move_number: ply as i32 + 1,
                fen_before: fen_before.clone(),
                move_played: played.clone(),
                best_move: before.best_move.clone(),
                eval_before_cp,
                eval_after_cp,
                eval_diff: eval_after_cp - eval_before_cp,
                mate_before,
                mate_after,
                classification,
            });
            previous = Some(after);
        }

        if records.is_empty() {
            return Err(WorkerError::Analysis(format!(
                "none of {} plies could be evaluated",
                line.len()
            )));
        }

        let ids = self.repo.insert_positions_batch(&records).await?;
        summary.moves_saved = records.len();

        let now = Utc::now();
        for index in flagged {
            let Some(&position_id) = ids.get(index) else {
                warn!(index, "No position id returned for flagged move");
                continue;
            };
            let card = NewFlashcard::due_now(game.profile_id, position_id, now);
            match self.repo.insert_flashcard(&card).await {
                Ok(_) => summary.flashcards_created += 1,
                Err(e) => warn!(position_id, error = %e, "Failed to create flashcard"),
            }
        }

        self.repo
            .update_game_status(game.id, GameStatus::Completed)
            .await?;

        if let Err(e) = self.repo.refresh_profile_stats(game.profile_id).await {
            warn!(profile_id = game.profile_id, error = %e, "Failed to refresh profile stats");
        }

        Ok(summary)
    }

    /// Evaluate a position. Per-position failures are logged and become
    /// `None`; cancellation and a closed pool abort the analysis.
    async fn evaluate_soft(
        &self,
        cancel: &CancellationToken,
        fen: &str,
        ply: usize,
    ) -> Result<Option<Evaluation>, WorkerError> {
        match self.evaluator.evaluate(cancel, fen, self.options.limits).await {
            Ok(eval) => Ok(Some(eval)),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                warn!(ply, fen, error = %e, timeout = e.is_timeout(), "Evaluation failed, skipping ply");
                Ok(None)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn worth_flashcard(
        &self,
        cancel: &CancellationToken,
        fen_before: &str,
        played: &str,
        before: &Evaluation,
        after: &Evaluation,
        classification: Classification,
        mover: Side,
    ) -> Result<bool, WorkerError> {
        if played == before.best_move {
            return Ok(false);
        }
        if classification.is_serious() {
            return Ok(true);
        }
        if before.best_move.is_empty() {
            return Ok(false);
        }

        let what_if_fen = match apply_uci(fen_before, &before.best_move) {
            Ok(fen) => fen,
            Err(e) => {
                warn!(best = %before.best_move, error = %e, "Engine move could not be applied");
                return Ok(false);
            }
        };

        let what_if = match self
            .evaluator
            .evaluate(cancel, &what_if_fen, self.options.limits)
            .await
        {
            Ok(eval) => eval,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "What-if evaluation failed");
                return Ok(false);
            }
        };

        Ok(missed_improvement(
            &what_if,
            after,
            mover,
            self.options.flashcard_min_gain_cp,
        ))
    }

    /// Name the opening from the PGN's `ECO`/`Opening` headers, else from
    /// the move list. Failures are only logged.
    async fn detect_opening(&self, game: &Game, metadata: &GameMetadata, line: &GameLine) {
        let from_table = || {
            // The table is keyed by moves from the initial position.
            let start = line.positions.first()?;
            if !is_standard_start(start) {
                return None;
            }
            lookup_opening(&line.moves_uci)
        };

        let (eco, name) = match (&metadata.eco, &metadata.opening) {
            (Some(eco), Some(name)) => (eco.clone(), name.clone()),
            (Some(eco), None) => {
                let name = from_table()
                    .filter(|opening| opening.eco == eco.as_str())
                    .map(|opening| opening.name.to_string())
                    .unwrap_or_else(|| eco.clone());
                (eco.clone(), name)
            }
            (None, _) => match from_table() {
                Some(opening) => (opening.eco.to_string(), opening.name.to_string()),
                None => {
                    debug!("No opening matched");
                    return;
                }
            },
        };

        match self.repo.update_game_opening(game.id, &eco, &name).await {
            Ok(()) => info!(eco = %eco, name = %name, "Opening detected"),
            Err(e) => warn!(error = %e, "Failed to save opening"),
        }
    }
}
