//! UCI engine process wrapper (async I/O)

use std::future::Future;
use std::time::Duration;

use chess_core::{side_to_move, Side};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Search depth used when none is configured.
pub const DEFAULT_DEPTH: u32 = 18;

/// Limit for each of the `uciok` / `readyok` handshake replies.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Read-loop ceiling when no `movetime` budget is set.
pub const DEFAULT_SEARCH_DEADLINE: Duration = Duration::from_secs(8);

/// Slack added on top of a `movetime` budget.
pub const MOVETIME_BUFFER: Duration = Duration::from_millis(500);

const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to spawn engine '{path}': {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine closed its output")]
    Closed,

    #[error("Timed out waiting for '{0}'")]
    Timeout(&'static str),

    #[error("Evaluation cancelled")]
    Cancelled,

    #[error("Engine pool is closed")]
    PoolClosed,

    #[error("Invalid engine response: {0}")]
    Protocol(String),
}

impl EngineError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout(_))
    }

    /// Errors that are not about one position: the caller's cancellation or a
    /// pool that can no longer hand out engines.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Cancelled | EngineError::PoolClosed)
    }

    /// The engine's output stream can no longer be trusted to be in step
    /// with the next request.
    pub fn leaves_engine_unusable(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout(_)
                | EngineError::Cancelled
                | EngineError::Io(_)
                | EngineError::Closed
        )
    }
}

/// How long one evaluation may search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    pub depth: u32,
    pub movetime_ms: Option<u64>,
}

impl SearchLimits {
    /// A depth of 0 means [`DEFAULT_DEPTH`]; a movetime of 0 means no budget.
    pub fn new(depth: u32, movetime_ms: Option<u64>) -> Self {
        Self {
            depth: if depth == 0 { DEFAULT_DEPTH } else { depth },
            movetime_ms: movetime_ms.filter(|&ms| ms > 0),
        }
    }

    pub fn go_command(&self) -> String {
        match self.movetime_ms {
            Some(ms) => format!("go depth {} movetime {ms}", self.depth),
            None => format!("go depth {}", self.depth),
        }
    }

    /// Deadline for the whole `go` → `bestmove` read loop.
    pub fn deadline(&self) -> Duration {
        match self.movetime_ms {
            Some(ms) => Duration::from_millis(ms) + MOVETIME_BUFFER,
            None => DEFAULT_SEARCH_DEADLINE,
        }
    }
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self::new(DEFAULT_DEPTH, None)
    }
}

/// Result of a single position evaluation, from White's point of view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    /// Best move in UCI notation; empty when the engine has none (mate or stalemate).
    pub best_move: String,
    /// Centipawns, positive favours White. Meaningless (0) when `mate` is set.
    pub centipawns: f64,
    /// Mate in N plies, positive when White mates. `Some(0)` means the side
    /// to move is already checkmated.
    pub mate: Option<i32>,
}

impl Evaluation {
    pub fn is_mate(&self) -> bool {
        self.mate.is_some()
    }

    fn from_score(best_move: String, score: Option<Score>) -> Self {
        match score {
            Some(Score::Mate(n)) => Self {
                best_move,
                centipawns: 0.0,
                mate: Some(n),
            },
            Some(Score::Cp(cp)) => Self {
                best_move,
                centipawns: cp as f64,
                mate: None,
            },
            None => Self {
                best_move,
                centipawns: 0.0,
                mate: None,
            },
        }
    }
}

/// Anything that can evaluate a FEN: a single engine, or the pool.
pub trait PositionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        cancel: &CancellationToken,
        fen: &str,
        limits: SearchLimits,
    ) -> impl Future<Output = Result<Evaluation, EngineError>> + Send;
}

/// A raw `score` token pair from an `info` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Score {
    Cp(i32),
    Mate(i32),
}

impl Score {
    /// Engine scores are relative to the side to move.
    fn for_white(self, to_move: Side) -> Self {
        match (self, to_move) {
            (s, Side::White) => s,
            (Score::Cp(cp), Side::Black) => Score::Cp(-cp),
            (Score::Mate(n), Side::Black) => Score::Mate(-n),
        }
    }
}

/// One engine subprocess. Evaluations on it are serialized.
pub struct EngineProcess {
    id: usize,
    io: Mutex<EngineIo>,
}

struct EngineIo {
    id: usize,
    process: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl EngineProcess {
    /// Spawn the engine and complete the `uci` / `isready` handshake.
    pub async fn spawn(path: &str, id: usize) -> Result<Self, EngineError> {
        let mut process = Command::new(path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                path: path.to_string(),
                source,
            })?;

        let (stdin, stdout) = match (process.stdin.take(), process.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = process.kill().await;
                return Err(EngineError::Protocol("engine pipes unavailable".into()));
            }
        };

        let mut io = EngineIo {
            id,
            process,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        if let Err(e) = io.handshake().await {
            warn!(engine_id = id, error = %e, "Engine handshake failed");
            let _ = io.process.kill().await;
            return Err(e);
        }

        debug!(engine_id = id, path, "Engine ready");
        Ok(Self {
            id,
            io: Mutex::new(io),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Evaluate a position. Blocks until `bestmove`, the search deadline, or
    /// `cancel` fires; a timed-out or cancelled call returns no partial result.
    pub async fn evaluate(
        &self,
        cancel: &CancellationToken,
        fen: &str,
        limits: SearchLimits,
    ) -> Result<Evaluation, EngineError> {
        let mut io = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            io = self.io.lock() => io,
        };

        let to_move = side_to_move(fen);
        let search = async {
            io.send("ucinewgame").await?;
            io.send(&format!("position fen {fen}")).await?;
            io.send(&limits.go_command()).await?;
            io.read_search(to_move).await
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = timeout(limits.deadline(), search) => {
                result.unwrap_or(Err(EngineError::Timeout("bestmove")))
            }
        }
    }

    /// Send `quit` and wait for the process to exit.
    pub async fn close(self) {
        let mut io = self.io.into_inner();
        if let Err(e) = io.send("quit").await {
            debug!(engine_id = io.id, error = %e, "Failed to send quit");
        }

        match timeout(QUIT_TIMEOUT, io.process.wait()).await {
            Ok(Ok(status)) if status.success() => debug!(engine_id = io.id, "Engine exited"),
            // We asked it to quit, so a non-zero status is only worth a log line.
            Ok(Ok(status)) => warn!(engine_id = io.id, %status, "Engine exited with non-zero status"),
            Ok(Err(e)) => warn!(engine_id = io.id, error = %e, "Failed to wait for engine exit"),
            Err(_) => {
                warn!(engine_id = io.id, "Engine ignored quit, killing");
                let _ = io.process.kill().await;
            }
        }
    }
}

impl EngineIo {
    async fn handshake(&mut self) -> Result<(), EngineError> {
        self.send("uci").await?;
        timeout(HANDSHAKE_TIMEOUT, self.wait_for("uciok"))
            .await
            .map_err(|_| EngineError::Timeout("uciok"))??;

        self.send("isready").await?;
        timeout(HANDSHAKE_TIMEOUT, self.wait_for("readyok"))
            .await
            .map_err(|_| EngineError::Timeout("readyok"))??;
        Ok(())
    }

    async fn send(&mut self, cmd: &str) -> Result<(), EngineError> {
        debug!(engine_id = self.id, cmd, "UCI <");
        self.stdin.write_all(format!("{cmd}\n").as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, EngineError> {
        let line = self.stdout.next_line().await?.ok_or(EngineError::Closed)?;
        let line = line.trim().to_string();
        debug!(engine_id = self.id, line = %line, "UCI >");
        Ok(line)
    }

    async fn wait_for(&mut self, expected: &str) -> Result<(), EngineError> {
        loop {
            if self.read_line().await?.contains(expected) {
                return Ok(());
            }
        }
    }

    /// Read `info` lines until `bestmove`, keeping the latest score.
    async fn read_search(&mut self, to_move: Side) -> Result<Evaluation, EngineError> {
        let mut score = None;
        loop {
            let line = self.read_line().await?;
            if line.starts_with("info") {
                if let Some(s) = parse_score(&line) {
                    score = Some(s.for_white(to_move));
                }
            } else if line.starts_with("bestmove") {
                let best_move = parse_bestmove(&line)?;
                return Ok(Evaluation::from_score(best_move, score));
            }
        }
    }
}

impl Drop for EngineIo {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        let _ = self.process.start_kill();
    }
}

/// First `score cp <n>` / `score mate <n>` pair on an info line.
fn parse_score(line: &str) -> Option<Score> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let i = parts.iter().position(|p| *p == "score")?;
    let value = parts.get(i + 2)?.parse().ok()?;
    match *parts.get(i + 1)? {
        "cp" => Some(Score::Cp(value)),
        "mate" => Some(Score::Mate(value)),
        _ => None,
    }
}

/// Move named on a `bestmove` line; `(none)` becomes an empty string.
fn parse_bestmove(line: &str) -> Result<String, EngineError> {
    match line.split_whitespace().nth(1) {
        Some("(none)") => Ok(String::new()),
        Some(mv) => Ok(mv.to_string()),
        None => Err(EngineError::Protocol(format!("bestmove without a move: '{line}'"))),
    }
}
