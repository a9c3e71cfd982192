//! Background worker for periodic and on-demand tasks.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc channel
//! via a `BackgroundRunnable` implementation, with periodic tick callbacks and a
//! bounded-wait stop.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
///
/// Implementors define how individual tasks are processed, what happens on each
/// periodic tick, and how to clean up on shutdown.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called periodically (on each tick interval). Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via an mpsc channel.
///
/// The worker spawns a tokio task that:
/// 1. Listens for tasks on the mpsc channel
/// 2. Calls `BackgroundRunnable::run()` for each task
/// 3. Periodically calls `BackgroundRunnable::on_tick()` at the configured interval
/// 4. Calls `BackgroundRunnable::shutdown()` when stopped
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the background worker with the given runnable and tick interval.
    ///
    /// The first tick fires one full interval after start, not immediately.
    /// The channel capacity is fixed at 256.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime or with a zero interval.
    pub fn start(mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(256);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            // Skip the first immediate tick so on_tick doesn't fire at startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break, // Channel closed.
                        }
                    }
                    _ = ticker.tick() => {
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

    /// A handle for submitting tasks without borrowing the worker (so no
    /// lock on the worker is held while sending), or `None` once the worker
    /// has been stopped.
    #[must_use]
    pub fn sender(&self) -> Option<mpsc::Sender<R::Task>> {
        self.tx.clone()
    }

    /// Stop the worker, waiting at most `grace` for the in-flight task or tick
    /// to finish before aborting it.
    ///
    /// Returns `true` if the worker finished within the grace period (or was
    /// already stopped), `false` if it had to be aborted.
    pub async fn stop_within(&mut self, grace: Duration) -> bool {
        let Some(mut handle) = self.signal_stop() else {
            return true;
        };
        if tokio::time::timeout(grace, &mut handle).await.is_ok() {
            true
        } else {
            handle.abort();
            let _ = handle.await;
            false
        }
    }

    fn signal_stop(&mut self) -> Option<JoinHandle<()>> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        self.handle.take()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Default, Clone)]
    struct Counters {
        run: Arc<AtomicU32>,
        tick: Arc<AtomicU32>,
        shutdown: Arc<AtomicU32>,
    }

    struct CountingRunnable {
        counters: Counters,
    }

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = String;

        async fn run(&mut self, _task: String) {
            self.counters.run.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_tick(&mut self) {
            self.counters.tick.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.counters.shutdown.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Runnable whose shutdown hook never completes.
    struct StuckRunnable;

    #[async_trait]
    impl BackgroundRunnable for StuckRunnable {
        type Task = ();

        async fn run(&mut self, _task: ()) {}

        async fn shutdown(&mut self) {
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn sent_tasks_run_and_stop_calls_shutdown() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(
            CountingRunnable {
                counters: counters.clone(),
            },
            Duration::from_secs(60),
        );

        let tx = worker.sender().unwrap();
        tx.send("task-1".to_string()).await.unwrap();
        tx.send("task-2".to_string()).await.unwrap();
        tx.send("task-3".to_string()).await.unwrap();

        // Give the worker time to process tasks.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counters.run.load(Ordering::SeqCst), 3);

        assert!(worker.stop_within(Duration::from_secs(5)).await);
        assert_eq!(counters.shutdown.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_fires_periodically() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(
            CountingRunnable {
                counters: counters.clone(),
            },
            Duration::from_secs(300),
        );

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(counters.tick.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(counters.tick.load(Ordering::SeqCst), 3);

        worker.stop_within(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn no_sender_after_stop() {
        let mut worker = BackgroundWorker::start(
            CountingRunnable {
                counters: Counters::default(),
            },
            Duration::from_secs(60),
        );
        let early = worker.sender().unwrap();
        worker.stop_within(Duration::from_secs(5)).await;

        assert!(worker.sender().is_none());
        // A sender taken before the stop sees the closed channel.
        assert!(early.send("late-task".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn stop_within_finishes_gracefully() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(
            CountingRunnable {
                counters: counters.clone(),
            },
            Duration::from_secs(60),
        );
        assert!(worker.stop_within(Duration::from_secs(5)).await);
        assert_eq!(counters.shutdown.load(Ordering::SeqCst), 1);
        // Second stop is a no-op.
        assert!(worker.stop_within(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_within_aborts_after_grace() {
        let mut worker = BackgroundWorker::start(StuckRunnable, Duration::from_secs(60));
        assert!(!worker.stop_within(Duration::from_secs(5)).await);
        // Already stopped: nothing left to wait for.
        assert!(worker.stop_within(Duration::from_secs(5)).await);
    }
}
