//! Background worker for periodic and on-demand tasks.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc channel
//! via a `BackgroundRunnable` implementation, with periodic tick callbacks. The
//! server runs one of them with [`FlushRunnable`] to write dirty buckets back.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::network::SessionState;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called on each tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// FlushRunnable
// ---------------------------------------------------------------------------

/// Task variants for the flush worker.
#[derive(Debug)]
pub enum FlushTask {
    /// Write dirty buckets and changed dictionaries now.
    Flush,
}

/// Saves the bound database on every tick, on request, and on shutdown.
///
/// Does nothing until a session is bound.
#[derive(Debug)]
pub struct FlushRunnable {
    session: Arc<SessionState>,
}

impl FlushRunnable {
    #[must_use]
    pub fn new(session: Arc<SessionState>) -> Self {
        Self { session }
    }

    async fn flush(&self, reason: &'static str) {
        if !self.session.is_bound() {
            debug!(reason, "no session bound, nothing to flush");
            return;
        }
        let session = Arc::clone(&self.session);
        let result = tokio::task::spawn_blocking(move || {
            let db = session.db()?;
            let saved = db.lock().save();
            Some(saved)
        })
        .await;
        match result {
            Ok(Some(Ok(0)) | None) => {}
            Ok(Some(Ok(written))) => info!(written, reason, "flushed buckets"),
            Ok(Some(Err(e))) => error!(error = %e, reason, "flush failed"),
            Err(e) => error!(error = %e, reason, "flush task failed"),
        }
    }
}

#[async_trait]
impl BackgroundRunnable for FlushRunnable {
    type Task = FlushTask;

    async fn run(&mut self, task: FlushTask) {
        match task {
            FlushTask::Flush => self.flush("requested").await,
        }
    }

    async fn on_tick(&mut self) {
        self.flush("interval").await;
    }

    async fn shutdown(&mut self) {
        self.flush("shutdown").await;
    }
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via an mpsc channel.
///
/// The spawned tokio task runs each submitted task, calls `on_tick()` at the
/// configured interval, and calls `shutdown()` once when stopped.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Starts the worker. The channel capacity is fixed at 256 and the tick
    /// interval is at least 1 ms.
    pub fn start(mut runnable: R, tick_interval_ms: u64) -> Self {
        let tick_period = std::time::Duration::from_millis(tick_interval_ms.max(1));
        let (tx, mut rx) = mpsc::channel::<R::Task>(256);
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut tick_interval = tokio::time::interval(tick_period);
            // The first tick completes immediately.
            tick_interval.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = tick_interval.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submit a task to the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stops the worker and waits for its final `shutdown()` call.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
