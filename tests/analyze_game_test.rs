//! Integration tests: full-game analysis against scripted evaluators and an
//! in-memory repository.

mod common;

use std::sync::atomic::Ordering;

use analysis_worker::{
    AnalysisOptions, AnalysisOutcome, Classification, EngineError, EnginePool, GameAnalyzer,
    GameStatus, WorkerError,
};
use chess_core::{apply_uci, replay_pgn, Side};
use common::{cp, game, mate, steady_engine, MemoryRepo, Scripted, ScriptedEvaluator};
use tokio_util::sync::CancellationToken;

const PGN: &str = r#"[Event "Casual"]
[White "alice"]
[Black "bob"]
[Result "*"]

1. e4 e5 2. Nf3 Nc6 *"#;

const GAME_ID: i64 = 7;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn positions() -> Vec<String> {
    replay_pgn(PGN).unwrap().positions
}

fn analyzer(
    evaluator: ScriptedEvaluator,
    repo: MemoryRepo,
) -> GameAnalyzer<ScriptedEvaluator, MemoryRepo> {
    GameAnalyzer::new(evaluator, repo, AnalysisOptions::default())
}

async fn run(
    analyzer: &GameAnalyzer<ScriptedEvaluator, MemoryRepo>,
) -> Result<AnalysisOutcome, WorkerError> {
    analyzer.analyze_game(GAME_ID, &CancellationToken::new()).await
}

fn statuses(repo: &MemoryRepo) -> Vec<GameStatus> {
    repo.status_history
        .lock()
        .unwrap()
        .iter()
        .map(|(_, s)| *s)
        .collect()
}

// ---------------------------------------------------------------------------
// Move records
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_one_record_per_ply() {
    let a = analyzer(
        ScriptedEvaluator::new(cp(20.0, "")),
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::White)),
    );

    let outcome = run(&a).await.unwrap();
    let AnalysisOutcome::Completed(summary) = outcome else {
        panic!("expected a completed analysis");
    };
    assert_eq!(summary.plies, 4);
    assert_eq!(summary.moves_saved, 4);
    assert_eq!(summary.plies_skipped, 0);

    let records = a.repo().records();
    let positions = positions();
    assert_eq!(records.len(), 4);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.game_id, GAME_ID);
        assert_eq!(record.move_number, i as i32 + 1);
        assert_eq!(record.fen_before, positions[i]);
        assert_eq!(record.classification, Classification::Good);
    }
    let played: Vec<&str> = records.iter().map(|r| r.move_played.as_str()).collect();
    assert_eq!(played, ["e2e4", "e7e5", "g1f3", "b8c6"]);

    // Each position is evaluated once: the start plus one per ply.
    assert_eq!(a.evaluator().call_count(), 5);
    assert_eq!(a.evaluator().calls(), positions);

    assert_eq!(statuses(a.repo()), [GameStatus::Processing, GameStatus::Completed]);
    assert_eq!(a.repo().stats_refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_start_evaluation_skips_one_ply() {
    let positions = positions();
    let a = analyzer(
        ScriptedEvaluator::new(cp(20.0, "")).on(&positions[0], Scripted::Timeout),
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::White)),
    );

    let AnalysisOutcome::Completed(summary) = run(&a).await.unwrap() else {
        panic!("expected a completed analysis");
    };
    assert_eq!(summary.moves_saved, 3);
    assert_eq!(summary.plies_skipped, 1);

    let numbers: Vec<i32> = a.repo().records().iter().map(|r| r.move_number).collect();
    assert_eq!(numbers, [2, 3, 4]);
    assert_eq!(a.repo().game(GAME_ID).status, GameStatus::Completed);
}

#[tokio::test]
async fn test_failed_middle_evaluation_is_not_reused() {
    let positions = positions();
    let a = analyzer(
        ScriptedEvaluator::new(cp(20.0, "")).on(&positions[2], Scripted::Timeout),
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::White)),
    );

    run(&a).await.unwrap();

    // Position 2 is the "after" of ply 2 and the "before" of ply 3.
    let numbers: Vec<i32> = a.repo().records().iter().map(|r| r.move_number).collect();
    assert_eq!(numbers, [1, 4]);
}

#[tokio::test]
async fn test_transient_middle_failure_skips_one_ply() {
    let positions = positions();
    let a = analyzer(
        ScriptedEvaluator::new(cp(20.0, "")).fails_once(&positions[2]),
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::White)),
    );

    let AnalysisOutcome::Completed(summary) = run(&a).await.unwrap() else {
        panic!("expected a completed analysis");
    };
    assert_eq!(summary.moves_saved, 3);
    assert_eq!(summary.plies_skipped, 1);

    // Ply 2 loses its "after"; ply 3 evaluates position 2 again as its "before".
    let numbers: Vec<i32> = a.repo().records().iter().map(|r| r.move_number).collect();
    assert_eq!(numbers, [1, 3, 4]);
    let mut expected_calls = positions.clone();
    expected_calls.insert(2, positions[2].clone());
    assert_eq!(a.evaluator().calls(), expected_calls);
    assert_eq!(a.repo().game(GAME_ID).status, GameStatus::Completed);
}

#[tokio::test]
async fn test_mate_scores_zero_the_centipawns() {
    let positions = positions();
    let a = analyzer(
        ScriptedEvaluator::new(cp(20.0, "")).on(&positions[1], mate(-3, "")),
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::Black)),
    );

    run(&a).await.unwrap();

    let records = a.repo().records();
    assert_eq!(records[0].mate_after, Some(-3));
    assert_eq!(records[0].eval_after_cp, 0.0);
    assert_eq!(records[0].eval_diff, -20.0);
    assert_eq!(records[1].mate_before, Some(-3));
    assert_eq!(records[1].eval_before_cp, 0.0);
    assert_eq!(records[1].mate_after, None);
}

#[tokio::test]
async fn test_opening_is_detected() {
    let a = analyzer(
        ScriptedEvaluator::new(cp(20.0, "")),
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::White)),
    );

    run(&a).await.unwrap();

    let stored = a.repo().game(GAME_ID);
    assert_eq!(stored.opening_eco.as_deref(), Some("C44"));
    assert!(stored.opening_name.is_some());
}

#[tokio::test]
async fn test_custom_start_position_has_no_opening() {
    let pgn = r#"[SetUp "1"]
[FEN "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1"]

1. e4 Kd7 *"#;
    let a = analyzer(
        ScriptedEvaluator::new(cp(20.0, "")),
        MemoryRepo::with_game(game(GAME_ID, pgn, Side::White)),
    );

    run(&a).await.unwrap();

    let stored = a.repo().game(GAME_ID);
    assert_eq!(stored.status, GameStatus::Completed);
    assert_eq!(stored.opening_eco, None);
    assert_eq!(stored.opening_name, None);
    assert_eq!(a.repo().records().len(), 2);
}

#[tokio::test]
async fn test_opening_headers_take_precedence() {
    let pgn = r#"[ECO "C50"]
[Opening "Italian Game"]

1. e4 e5 2. Nf3 Nc6 *"#;
    let a = analyzer(
        ScriptedEvaluator::new(cp(20.0, "")),
        MemoryRepo::with_game(game(GAME_ID, pgn, Side::White)),
    );

    run(&a).await.unwrap();

    let stored = a.repo().game(GAME_ID);
    assert_eq!(stored.opening_eco.as_deref(), Some("C50"));
    assert_eq!(stored.opening_name.as_deref(), Some("Italian Game"));
}

#[tokio::test]
async fn test_eco_header_borrows_name_from_table() {
    let pgn = r#"[ECO "C44"]

1. e4 e5 2. Nf3 Nc6 *"#;
    let a = analyzer(
        ScriptedEvaluator::new(cp(20.0, "")),
        MemoryRepo::with_game(game(GAME_ID, pgn, Side::White)),
    );

    run(&a).await.unwrap();

    let stored = a.repo().game(GAME_ID);
    assert_eq!(stored.opening_eco.as_deref(), Some("C44"));
    assert_eq!(
        stored.opening_name.as_deref(),
        Some("King's Pawn Game: Knight Defense")
    );
}

// ---------------------------------------------------------------------------
// Status transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_completed_game_is_untouched() {
    let mut done = game(GAME_ID, PGN, Side::White);
    done.status = GameStatus::Completed;
    let a = analyzer(ScriptedEvaluator::new(cp(20.0, "")), MemoryRepo::with_game(done));

    assert_eq!(run(&a).await.unwrap(), AnalysisOutcome::AlreadyCompleted);
    assert_eq!(run(&a).await.unwrap(), AnalysisOutcome::AlreadyCompleted);
    assert_eq!(a.evaluator().call_count(), 0);
    assert_eq!(a.repo().write_count(), 0);
}

#[tokio::test]
async fn test_failed_game_is_retried() {
    let mut retried = game(GAME_ID, PGN, Side::White);
    retried.status = GameStatus::Failed;
    let a = analyzer(ScriptedEvaluator::new(cp(20.0, "")), MemoryRepo::with_game(retried));

    run(&a).await.unwrap();
    assert_eq!(a.repo().game(GAME_ID).status, GameStatus::Completed);
}

#[tokio::test]
async fn test_missing_game() {
    let a = analyzer(ScriptedEvaluator::new(cp(20.0, "")), MemoryRepo::default());

    let err = run(&a).await.unwrap_err();
    assert!(matches!(err, WorkerError::GameNotFound(GAME_ID)));
}

#[tokio::test]
async fn test_illegal_move_fails_the_game() {
    // The king cannot step onto its own pawn's square.
    let a = analyzer(
        ScriptedEvaluator::new(cp(20.0, "")),
        MemoryRepo::with_game(game(GAME_ID, "1. e4 Ke7 2. Nf3 *", Side::White)),
    );

    let err = run(&a).await.unwrap_err();
    assert!(matches!(err, WorkerError::Rules(_)), "got {err:?}");
    assert_eq!(statuses(a.repo()), [GameStatus::Processing, GameStatus::Failed]);
    assert_eq!(a.evaluator().call_count(), 0);
}

#[tokio::test]
async fn test_cancellation_fails_the_game() {
    let positions = positions();
    let a = analyzer(
        ScriptedEvaluator::new(cp(20.0, "")).on(&positions[2], Scripted::Cancelled),
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::White)),
    );

    let err = run(&a).await.unwrap_err();
    assert!(matches!(err, WorkerError::Engine(EngineError::Cancelled)));
    assert!(a.repo().records().is_empty());
    assert_eq!(a.repo().game(GAME_ID).status, GameStatus::Failed);
}

#[tokio::test]
async fn test_no_evaluations_fails_the_game() {
    let a = analyzer(
        ScriptedEvaluator::new(Scripted::Timeout),
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::White)),
    );

    let err = run(&a).await.unwrap_err();
    assert!(matches!(err, WorkerError::Analysis(_)));
    assert_eq!(a.repo().game(GAME_ID).status, GameStatus::Failed);
}

#[tokio::test]
async fn test_batch_failure_fails_the_game() {
    let positions = positions();
    let repo = MemoryRepo {
        fail_batch: true,
        ..MemoryRepo::with_game(game(GAME_ID, PGN, Side::White))
    };
    let a = analyzer(
        ScriptedEvaluator::new(cp(-300.0, ""))
            .on(&positions[0], cp(0.0, "d2d4")),
        repo,
    );

    let err = run(&a).await.unwrap_err();
    assert!(matches!(err, WorkerError::Repository(_)));
    assert!(a.repo().cards().is_empty());
    assert_eq!(a.repo().game(GAME_ID).status, GameStatus::Failed);
    assert_eq!(a.repo().stats_refreshes.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Flashcards
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_blunder_creates_flashcard() {
    let positions = positions();
    let a = analyzer(
        ScriptedEvaluator::new(cp(-300.0, "")).on(&positions[0], cp(0.0, "d2d4")),
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::White)),
    );

    let AnalysisOutcome::Completed(summary) = run(&a).await.unwrap() else {
        panic!("expected a completed analysis");
    };
    assert_eq!(summary.flashcards_created, 1);

    let records = a.repo().records();
    assert_eq!(records[0].classification, Classification::Blunder);
    assert_eq!(records[0].best_move, "d2d4");
    assert_eq!(records[0].eval_diff, -300.0);

    let cards = a.repo().cards();
    assert_eq!(cards.len(), 1);
    let card = &cards[0];
    assert_eq!(card.position_id, a.repo().position_ids()[0]);
    assert_eq!(card.profile_id, 100);
    assert_eq!(card.interval_days, 0);
    assert_eq!(card.ease_factor, 2.5);
    assert_eq!(card.times_reviewed, 0);
    assert_eq!(card.times_correct, 0);

    // A serious mistake needs no what-if evaluation.
    assert_eq!(a.evaluator().call_count(), 5);
}

#[tokio::test]
async fn test_best_move_never_creates_flashcard() {
    let positions = positions();
    // The engine's favourite is exactly what was played, despite the swing.
    let a = analyzer(
        ScriptedEvaluator::new(cp(-300.0, "")).on(&positions[0], cp(0.0, "e2e4")),
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::White)),
    );

    run(&a).await.unwrap();
    assert_eq!(a.repo().records()[0].classification, Classification::Good);
    assert!(a.repo().cards().is_empty());
}

#[tokio::test]
async fn test_opponent_blunders_are_not_drilled() {
    let positions = positions();
    let a = analyzer(
        ScriptedEvaluator::new(cp(0.0, ""))
            .on(&positions[1], cp(0.0, "d7d5"))
            .on(&positions[2], cp(300.0, "")),
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::Black)),
    );

    run(&a).await.unwrap();

    let records = a.repo().records();
    assert_eq!(records[1].classification, Classification::Blunder);
    assert_eq!(records[2].classification, Classification::Blunder);

    // Only Black's blunder belongs to the profile.
    let cards = a.repo().cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].position_id, a.repo().position_ids()[1]);
}

#[tokio::test]
async fn test_inaccuracy_with_large_missed_gain_creates_flashcard() {
    let positions = positions();
    let what_if = apply_uci(&positions[0], "d2d4").unwrap();
    let a = analyzer(
        ScriptedEvaluator::new(cp(-60.0, ""))
            .on(&positions[0], cp(0.0, "d2d4"))
            .on(&what_if, cp(80.0, "")),
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::White)),
    );

    run(&a).await.unwrap();

    assert_eq!(a.repo().records()[0].classification, Classification::Inaccuracy);
    assert_eq!(a.repo().cards().len(), 1);
    assert_eq!(a.evaluator().call_count(), 6);
    assert!(a.evaluator().calls().contains(&what_if));
}

#[tokio::test]
async fn test_inaccuracy_with_small_missed_gain_is_skipped() {
    let positions = positions();
    let what_if = apply_uci(&positions[0], "d2d4").unwrap();
    let a = analyzer(
        ScriptedEvaluator::new(cp(-60.0, ""))
            .on(&positions[0], cp(0.0, "d2d4"))
            .on(&what_if, cp(0.0, "")),
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::White)),
    );

    run(&a).await.unwrap();

    assert!(a.repo().cards().is_empty());
    assert_eq!(a.evaluator().call_count(), 6);
}

#[tokio::test]
async fn test_missed_mate_creates_flashcard() {
    let positions = positions();
    let what_if = apply_uci(&positions[0], "d2d4").unwrap();
    let a = analyzer(
        ScriptedEvaluator::new(cp(10.0, ""))
            .on(&positions[0], cp(10.0, "d2d4"))
            .on(&what_if, mate(4, "")),
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::White)),
    );

    run(&a).await.unwrap();

    assert_eq!(a.repo().records()[0].classification, Classification::Good);
    assert_eq!(a.repo().cards().len(), 1);
}

// ---------------------------------------------------------------------------
// Against the engine pool
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_analysis_through_fake_engine_pool() {
    let (_dir, path) = steady_engine();
    let pool = EnginePool::new(path, 2).await.unwrap();
    let analyzer = GameAnalyzer::new(
        pool,
        MemoryRepo::with_game(game(GAME_ID, PGN, Side::White)),
        AnalysisOptions::default(),
    );

    let outcome = analyzer
        .analyze_game(GAME_ID, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, AnalysisOutcome::Completed(_)));

    let records = analyzer.repo().records();
    assert_eq!(records.len(), 4);
    // "score cp 35" is relative to the side to move.
    assert_eq!(records[0].eval_before_cp, 35.0);
    assert_eq!(records[0].eval_after_cp, -35.0);
    assert_eq!(records[0].best_move, "e2e4");
    assert_eq!(records[0].classification, Classification::Good);

    analyzer.evaluator().close().await;
}
