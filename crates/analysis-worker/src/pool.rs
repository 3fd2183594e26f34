//! Fixed-size pool of engine processes shared by all concurrent analyses.
//!
//! Idle engines sit in a queue guarded by a mutex; a semaphore counts them so
//! that `acquire` can wait for one without holding the lock. The permit is
//! taken before the engine is popped, and the cancellation branch never
//! touches the queue, so a cancelled `acquire` cannot strand an engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineError, EngineProcess, Evaluation, PositionEvaluator, SearchLimits};

/// Pool size used when the configured size is zero.
pub const DEFAULT_POOL_SIZE: usize = 2;

struct IdleQueue {
    closed: bool,
    engines: VecDeque<EngineProcess>,
}

pub struct EnginePool {
    path: String,
    capacity: usize,
    idle: Mutex<IdleQueue>,
    ready: Semaphore,
    next_id: AtomicUsize,
}

impl EnginePool {
    /// Start `size` engines one after another. If any fails to start, the
    /// ones already running are closed and the error is returned.
    pub async fn new(path: impl Into<String>, size: usize) -> Result<Self, EngineError> {
        let path = path.into();
        let capacity = if size == 0 { DEFAULT_POOL_SIZE } else { size };

        let mut engines = VecDeque::with_capacity(capacity);
        for id in 0..capacity {
            match EngineProcess::spawn(&path, id).await {
                Ok(engine) => {
                    info!(engine_id = id, "Engine ready");
                    engines.push_back(engine);
                }
                Err(e) => {
                    error!(engine_id = id, error = %e, "Engine failed to start, closing pool");
                    for engine in engines {
                        engine.close().await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            path,
            capacity,
            idle: Mutex::new(IdleQueue {
                closed: false,
                engines,
            }),
            ready: Semaphore::new(capacity),
            next_id: AtomicUsize::new(capacity),
        })
    }

    /// Wait for an idle engine. The engine must be handed back with
    /// [`release`](Self::release).
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<EngineProcess, EngineError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            permit = self.ready.acquire() => permit.map_err(|_| EngineError::PoolClosed)?,
        };
        permit.forget();

        let mut idle = self.lock();
        if idle.closed {
            return Err(EngineError::PoolClosed);
        }
        // One permit is added per queued engine, so the queue cannot be empty here.
        idle.engines.pop_front().ok_or(EngineError::PoolClosed)
    }

    /// Return an engine to the idle queue. After `close`, or if the queue is
    /// somehow full, the engine is shut down instead.
    pub async fn release(&self, engine: EngineProcess) {
        let rejected = {
            let mut idle = self.lock();
            if idle.closed {
                Some((engine, "pool closed"))
            } else if idle.engines.len() >= self.capacity {
                Some((engine, "idle queue full"))
            } else {
                idle.engines.push_back(engine);
                None
            }
        };

        match rejected {
            None => self.ready.add_permits(1),
            Some((engine, reason)) => {
                debug!(engine_id = engine.id(), reason, "Closing released engine");
                engine.close().await;
            }
        }
    }

    /// Acquire an engine, evaluate, and give the engine back on every path.
    ///
    /// An engine whose search timed out or was cancelled may still be
    /// streaming output for that search, so it is replaced by a fresh
    /// process instead of being reused.
    pub async fn evaluate(
        &self,
        cancel: &CancellationToken,
        fen: &str,
        limits: SearchLimits,
    ) -> Result<Evaluation, EngineError> {
        let engine = self.acquire(cancel).await?;
        let result = engine.evaluate(cancel, fen, limits).await;

        match &result {
            Err(e) if e.leaves_engine_unusable() => {
                warn!(engine_id = engine.id(), error = %e, "Replacing engine after failed search");
                self.replace(engine).await;
            }
            _ => self.release(engine).await,
        }

        result
    }

    async fn replace(&self, engine: EngineProcess) {
        engine.close().await;
        if self.is_closed() {
            return;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match EngineProcess::spawn(&self.path, id).await {
            Ok(fresh) => {
                info!(engine_id = id, "Replacement engine ready");
                self.release(fresh).await;
            }
            Err(e) => {
                error!(engine_id = id, error = %e, "Replacement engine failed to start, pool shrinks by one");
            }
        }
    }

    /// Close every idle engine and refuse further acquires. Engines that are
    /// checked out are closed when they are released. Idempotent.
    pub async fn close(&self) {
        let drained: Vec<EngineProcess> = {
            let mut idle = self.lock();
            if idle.closed {
                return;
            }
            idle.closed = true;
            self.ready.close();
            idle.engines.drain(..).collect()
        };

        info!(count = drained.len(), "Closing engine pool");
        for engine in drained {
            engine.close().await;
        }
    }

    /// Idle engine count. Diagnostic only.
    pub fn available(&self) -> usize {
        self.lock().engines.len()
    }

    pub fn size(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, IdleQueue> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PositionEvaluator for EnginePool {
    async fn evaluate(
        &self,
        cancel: &CancellationToken,
        fen: &str,
        limits: SearchLimits,
    ) -> Result<Evaluation, EngineError> {
        EnginePool::evaluate(self, cancel, fen, limits).await
    }
}

impl PositionEvaluator for EngineProcess {
    async fn evaluate(
        &self,
        cancel: &CancellationToken,
        fen: &str,
        limits: SearchLimits,
    ) -> Result<Evaluation, EngineError> {
        EngineProcess::evaluate(self, cancel, fen, limits).await
    }
}
