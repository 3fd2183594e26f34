//! Analysis worker
//!
//! Processes game analysis jobs from an SQS queue against a shared pool of
//! UCI engine processes.
//!
//! Local modes:
//!   --games 1,2,3     analyse specific game ids, skipping SQS
//!   --fen "<FEN>"     evaluate one position and print the result

use std::sync::Arc;
use std::time::Duration;

use analysis_worker::config::{self, WorkerConfig};
use analysis_worker::db::PgStore;
use analysis_worker::sqs::{SqsClient, SqsMessage};
use analysis_worker::{AnalysisOutcome, EnginePool, GameAnalyzer, WorkerError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type Analyzer = GameAnalyzer<EnginePool, PgStore>;

/// How long in-flight analyses may run after SIGTERM before being cancelled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

/// Value following `flag` on the command line, if present.
fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_game_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let config = WorkerConfig::from_env()?;
    info!(
        engine_path = %config.engine_path,
        pool_size = config.pool_size,
        depth = config.analysis.limits.depth,
        "Worker config loaded"
    );

    let args: Vec<String> = std::env::args().collect();

    if let Some(fen) = arg_value(&args, "--fen") {
        return evaluate_fen(&config, &fen).await;
    }

    let pool = EnginePool::new(config.engine_path.clone(), config.pool_size).await?;
    info!(size = pool.size(), "Engine pool ready");

    let database_url = config::database_url().await?;
    let store = PgStore::connect(&database_url, (pool.size() + 2) as u32).await?;
    store.run_migrations().await?;

    let analyzer = Arc::new(GameAnalyzer::new(pool, store, config.analysis.clone()));

    let result = match arg_value(&args, "--games") {
        Some(raw) => run_games(&analyzer, &parse_game_ids(&raw)).await,
        None => run_queue(&config, &analyzer).await,
    };

    analyzer.evaluator().close().await;
    result
}

/// Evaluate a single position through a one-engine pool and print it as JSON.
async fn evaluate_fen(config: &WorkerConfig, fen: &str) -> anyhow::Result<()> {
    let pool = EnginePool::new(config.engine_path.clone(), 1).await?;
    let cancel = CancellationToken::new();

    let result = pool.evaluate(&cancel, fen, config.analysis.limits).await;
    pool.close().await;

    let evaluation = result?;
    println!("{}", serde_json::to_string_pretty(&evaluation)?);
    Ok(())
}

async fn run_games(analyzer: &Arc<Analyzer>, game_ids: &[i64]) -> anyhow::Result<()> {
    if game_ids.is_empty() {
        anyhow::bail!("--games expects a comma-separated list of game ids");
    }

    let cancel = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();
    for &game_id in game_ids {
        let analyzer = analyzer.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { (game_id, analyzer.analyze_game(game_id, &cancel).await) });
    }

    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((game_id, Ok(AnalysisOutcome::Completed(summary)))) => {
                println!(
                    "game {game_id}: {} moves saved, {} skipped, {} flashcards",
                    summary.moves_saved, summary.plies_skipped, summary.flashcards_created
                );
            }
            Ok((game_id, Ok(AnalysisOutcome::AlreadyCompleted))) => {
                println!("game {game_id}: already analysed");
            }
            Ok((game_id, Err(e))) => {
                println!("game {game_id}: ERROR {e}");
                failed += 1;
            }
            Err(e) => {
                error!(error = %e, "Analysis task panicked");
                failed += 1;
            }
        }
    }

    println!("{} of {} games analysed", game_ids.len() - failed, game_ids.len());
    Ok(())
}

async fn run_queue(config: &WorkerConfig, analyzer: &Arc<Analyzer>) -> anyhow::Result<()> {
    let sqs = SqsClient::new(config).await?;
    info!(queue_url = %sqs.queue_url(), "SQS client ready");

    let workers = analyzer.evaluator().size();
    let slots = Arc::new(Semaphore::new(workers));
    let cancel = CancellationToken::new();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut empty_receives = 0;
    info!("Starting main loop");

    loop {
        let received = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Received shutdown signal, no longer receiving");
                break;
            }
            received = sqs.receive_messages(workers as i32) => received,
        };

        let messages = match received {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "Failed to receive messages");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        if messages.is_empty() {
            empty_receives += 1;
            if empty_receives >= config.max_empty_receives {
                info!("No messages after {} polls, exiting", config.max_empty_receives);
                break;
            }
            continue;
        }
        empty_receives = 0;

        for msg in messages {
            let Some(game_id) = msg.game_id() else {
                warn!(body = %msg.body, "Invalid game ID format, deleting message");
                if let Err(e) = sqs.delete_message(&msg.receipt_handle).await {
                    warn!(error = %e, "Failed to delete invalid message");
                }
                continue;
            };

            let permit = slots.clone().acquire_owned().await?;
            let analyzer = analyzer.clone();
            let sqs = sqs.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let _permit = permit;
                handle_message(&analyzer, &sqs, &cancel, game_id, &msg).await;
            });
        }
    }

    // Holding every slot means no analysis is in flight.
    let all = workers as u32;
    if tokio::time::timeout(SHUTDOWN_GRACE, slots.acquire_many(all))
        .await
        .is_err()
    {
        warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "In-flight analyses still running, cancelling");
        cancel.cancel();
        let _ = slots.acquire_many(all).await;
    }
    info!("Graceful shutdown complete");
    Ok(())
}

async fn handle_message(
    analyzer: &Analyzer,
    sqs: &SqsClient,
    cancel: &CancellationToken,
    game_id: i64,
    msg: &SqsMessage,
) {
    let delete = match analyzer.analyze_game(game_id, cancel).await {
        Ok(_) => true,
        Err(WorkerError::GameNotFound(_)) => {
            warn!(game_id, "Game not found, deleting message");
            true
        }
        Err(e) => {
            // Left on the queue; redelivered after the visibility timeout.
            error!(game_id, error = %e, "Analysis failed");
            false
        }
    };

    if delete {
        if let Err(e) = sqs.delete_message(&msg.receipt_handle).await {
            warn!(game_id, error = %e, "Failed to delete message");
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
