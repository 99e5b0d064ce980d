// src/jobs/pool.rs
// =============================================================================
// A fixed-size worker pool draining a bounded FIFO queue.
//
// How it works:
// 1. `workers` tokio tasks share the receiving end of a bounded mpsc channel
// 2. enqueue() sends into the channel; when the queue is full the caller
//    waits until a slot frees up or the submit timeout elapses (QueueFull)
// 3. Each worker runs one task at a time, so at most `workers` tasks are
//    ever running
// 4. A panic inside a task is caught here and reported as PanicRecovered;
//    the worker carries on with the next task
//
// Every task's cancellation token is a child of the pool's shutdown token.
// shutdown() cancels the parent, stops accepting work and waits (bounded)
// for the workers to drain. It never aborts a running task.
// =============================================================================

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AuditConfig;
use crate::error::AuditError;

/// Result slot a submitter can await for the task's outcome.
pub type TaskOutcome = oneshot::Receiver<Result<(), AuditError>>;

#[async_trait]
pub trait Task: Send + 'static {
    // Short label for logs
    fn name(&self) -> String;

    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<(), AuditError>;
}

struct Submission {
    task: Box<dyn Task>,
    cancel: CancellationToken,
    outcome: oneshot::Sender<Result<(), AuditError>>,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Submission>>>;

pub struct WorkerPool {
    size: usize,
    submit_timeout: Duration,
    // None once shut down
    sender: Mutex<Option<mpsc::Sender<Submission>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    // Spawns the workers, so this must be called inside a tokio runtime
    pub fn new(size: usize, queue_capacity: usize, submit_timeout: Duration) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..size)
            .map(|id| tokio::spawn(worker_loop(id, receiver.clone())))
            .collect();

        info!(workers = size, queue_capacity, "worker pool started");
        WorkerPool {
            size,
            submit_timeout,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(config.workers, config.queue_capacity, config.submit_timeout)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // A fresh cancellation handle for one task. Shutting the pool down
    // cancels it too.
    pub fn new_task_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    // Queues a task. Blocks while the queue is full, for at most the submit
    // timeout.
    pub async fn enqueue(
        &self,
        task: Box<dyn Task>,
        cancel: CancellationToken,
    ) -> Result<TaskOutcome, AuditError> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| AuditError::PoolClosed)?
            .clone()
            .ok_or(AuditError::PoolClosed)?;

        let name = task.name();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let submission = Submission {
            task,
            cancel,
            outcome: outcome_tx,
        };

        tokio::select! {
            _ = self.shutdown.cancelled() => Err(AuditError::PoolClosed),
            sent = tokio::time::timeout(self.submit_timeout, sender.send(submission)) => match sent {
                Ok(Ok(())) => {
                    debug!(task = %name, "task queued");
                    Ok(outcome_rx)
                }
                Ok(Err(_)) => Err(AuditError::PoolClosed),
                Err(_) => {
                    warn!(task = %name, timeout_ms = self.submit_timeout.as_millis() as u64, "queue full, submission timed out");
                    Err(AuditError::QueueFull)
                }
            },
        }
    }

    // Stops accepting tasks, asks running and queued tasks to stop, and
    // waits up to `timeout` for the workers to finish.
    //
    // Returns true if everything drained in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.shutdown.cancel();
        // Dropping the last sender lets the workers exit once the queue is empty
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let workers: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(_) => Vec::new(),
        };

        info!(timeout_ms = timeout.as_millis() as u64, "worker pool shutting down");
        match tokio::time::timeout(timeout, futures::future::join_all(workers)).await {
            Ok(_) => {
                info!("worker pool drained");
                true
            }
            Err(_) => {
                warn!("worker pool did not drain before the shutdown timeout");
                false
            }
        }
    }
}

async fn worker_loop(id: usize, receiver: SharedReceiver) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(Submission {
            task,
            cancel,
            outcome,
        }) = next
        else {
            break;
        };

        let name = task.name();
        debug!(worker = id, task = %name, "task started");

        let result = match AssertUnwindSafe(task.run(cancel)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(worker = id, task = %name, panic = %message, "task panicked");
                Err(AuditError::PanicRecovered(message))
            }
        };

        debug!(worker = id, task = %name, ok = result.is_ok(), "task finished");
        // The submitter may have stopped listening
        let _ = outcome.send(result);
    }
    debug!(worker = id, "worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::sync::Notify;

    // Wraps a closure as a Task
    struct FnTask<F>(F);

    #[async_trait]
    impl<F, Fut> Task for FnTask<F>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), AuditError>> + Send + 'static,
    {
        fn name(&self) -> String {
            "test".to_string()
        }

        async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<(), AuditError> {
            let FnTask(f) = *self;
            f(cancel).await
        }
    }

    fn task<F, Fut>(f: F) -> Box<dyn Task>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), AuditError>> + Send + 'static,
    {
        Box::new(FnTask(f))
    }

    #[tokio::test]
    async fn test_never_more_than_size_running() {
        let pool = WorkerPool::new(2, 16, Duration::from_secs(1));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut outcomes = Vec::new();
        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            let outcome = pool
                .enqueue(
                    task(move |_| async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }),
                    pool.new_task_token(),
                )
                .await
                .unwrap();
            outcomes.push(outcome);
        }
        for outcome in outcomes {
            assert_eq!(outcome.await.unwrap(), Ok(()));
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_full_queue_times_out() {
        let pool = WorkerPool::new(1, 1, Duration::from_millis(100));
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        // occupies the only worker
        let (s, r) = (started.clone(), release.clone());
        let first = pool
            .enqueue(
                task(move |_| async move {
                    s.notify_one();
                    r.notified().await;
                    Ok(())
                }),
                pool.new_task_token(),
            )
            .await
            .unwrap();
        started.notified().await;

        // fills the queue
        let second = pool
            .enqueue(task(|_| async { Ok(()) }), pool.new_task_token())
            .await
            .unwrap();

        let begin = Instant::now();
        let third = pool
            .enqueue(task(|_| async { Ok(()) }), pool.new_task_token())
            .await;
        assert_eq!(third.err(), Some(AuditError::QueueFull));
        assert!(begin.elapsed() >= Duration::from_millis(100));

        release.notify_one();
        assert_eq!(first.await.unwrap(), Ok(()));
        assert_eq!(second.await.unwrap(), Ok(()));
    }

    fn explode() -> Result<(), AuditError> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let pool = WorkerPool::new(1, 4, Duration::from_secs(1));
        let bad = pool
            .enqueue(
                task(|_| async { explode() }),
                pool.new_task_token(),
            )
            .await
            .unwrap();
        assert_eq!(
            bad.await.unwrap(),
            Err(AuditError::PanicRecovered("boom".to_string()))
        );

        // the worker survived
        let good = pool
            .enqueue(task(|_| async { Ok(()) }), pool.new_task_token())
            .await
            .unwrap();
        assert_eq!(good.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_drains() {
        let pool = WorkerPool::new(2, 4, Duration::from_secs(1));
        let outcome = pool
            .enqueue(
                task(|cancel: CancellationToken| async move {
                    cancel.cancelled().await;
                    Err(AuditError::Cancelled)
                }),
                pool.new_task_token(),
            )
            .await
            .unwrap();

        assert!(pool.shutdown(Duration::from_secs(2)).await);
        assert!(pool.is_closed());
        assert_eq!(outcome.await.unwrap(), Err(AuditError::Cancelled));

        let late = pool
            .enqueue(task(|_| async { Ok(()) }), pool.new_task_token())
            .await;
        assert_eq!(late.err(), Some(AuditError::PoolClosed));
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_after_timeout() {
        let pool = WorkerPool::new(1, 4, Duration::from_secs(1));
        let started = Arc::new(Notify::new());
        let s = started.clone();
        let _stubborn = pool
            .enqueue(
                task(move |_| async move {
                    s.notify_one();
                    // ignores cancellation
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }),
                pool.new_task_token(),
            )
            .await
            .unwrap();
        started.notified().await;

        let begin = Instant::now();
        assert!(!pool.shutdown(Duration::from_millis(100)).await);
        assert!(begin.elapsed() < Duration::from_secs(2));
    }
}
