//! Bounded write queue with a fixed worker pool.
//!
//! Producers submit [`WriteTask`]s and get a [`WriteTicket`] back; a fixed set
//! of workers shares one writer and applies each task exactly once under a
//! timeout. A failed task is logged and reported through its ticket; it never
//! stops the queue and is never retried.

use crate::config::QueueConfig;
use crate::error::WriteFailure;
use crate::kb::KnowledgeBaseWriter;
use crate::model::{EntityId, WriteTask};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A task waiting in the queue.
struct WriteJob {
    task: WriteTask,
    /// Channel to send the outcome
    respond_to: oneshot::Sender<Result<EntityId, WriteFailure>>,
    /// Submission timestamp for latency tracking
    submitted_at: Instant,
}

/// Resolves to the outcome of one submitted task.
#[derive(Debug)]
pub struct WriteTicket {
    rx: oneshot::Receiver<Result<EntityId, WriteFailure>>,
}

impl WriteTicket {
    pub async fn outcome(self) -> Result<EntityId, WriteFailure> {
        self.rx.await.unwrap_or(Err(WriteFailure::Discarded))
    }
}

#[derive(Debug, Default)]
struct QueueCounters {
    submitted: AtomicU64,
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

/// Queue statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub discarded: u64,
    pub capacity: usize,
    pub workers: usize,
}

impl QueueStats {
    /// Tasks submitted but not yet attempted or discarded.
    pub fn pending(&self) -> u64 {
        self.submitted
            .saturating_sub(self.attempted)
            .saturating_sub(self.discarded)
    }
}

/// Bounded FIFO of write tasks consumed by a fixed pool of workers.
pub struct WriteQueue {
    sender: parking_lot::Mutex<Option<mpsc::Sender<WriteJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<QueueCounters>,
    discarding: Arc<AtomicBool>,
    capacity: usize,
    worker_count: usize,
}

impl WriteQueue {
    /// Start the worker pool. Must be called inside a tokio runtime.
    pub fn start(writer: Arc<dyn KnowledgeBaseWriter>, config: &QueueConfig) -> Self {
        Self::with_timeout(
            writer,
            config.workers,
            config.capacity,
            config.write_timeout(),
        )
    }

    pub fn with_timeout(
        writer: Arc<dyn KnowledgeBaseWriter>,
        workers: usize,
        capacity: usize,
        timeout: Duration,
    ) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(rx));
        let counters = Arc::new(QueueCounters::default());
        let discarding = Arc::new(AtomicBool::new(false));

        let handles = (0..workers)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    receiver.clone(),
                    writer.clone(),
                    timeout,
                    counters.clone(),
                    discarding.clone(),
                ))
            })
            .collect();
        info!(workers, capacity, "Write queue started");

        Self {
            sender: parking_lot::Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            counters,
            discarding,
            capacity,
            worker_count: workers,
        }
    }

    /// Enqueue a task, waiting only while the queue is full.
    pub async fn submit(&self, task: WriteTask) -> Result<WriteTicket, WriteFailure> {
        if task.is_empty() {
            return Err(WriteFailure::EmptyTask);
        }
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or(WriteFailure::QueueClosed)?;
        let (respond_to, rx) = oneshot::channel();
        let job = WriteJob {
            task,
            respond_to,
            submitted_at: Instant::now(),
        };
        sender
            .send(job)
            .await
            .map_err(|_| WriteFailure::QueueClosed)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(WriteTicket { rx })
    }

    /// Whether [`submit`](Self::submit) still accepts tasks.
    pub fn is_accepting(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stop accepting tasks and wait until every queued task was attempted.
    pub async fn drain(&self) -> QueueStats {
        self.sender.lock().take();
        self.join_workers().await;
        let stats = self.stats();
        info!(
            submitted = stats.submitted,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Write queue drained"
        );
        stats
    }

    /// Hard stop: queued tasks are discarded, in-flight writes finish.
    pub async fn abort(&self) -> QueueStats {
        self.discarding.store(true, Ordering::Release);
        self.sender.lock().take();
        self.join_workers().await;
        let stats = self.stats();
        warn!(discarded = stats.discarded, "Write queue aborted");
        stats
    }

    async fn join_workers(&self) {
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Write worker panicked");
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            attempted: self.counters.attempted.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            capacity: self.capacity,
            workers: self.worker_count,
        }
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<WriteJob>>>,
    writer: Arc<dyn KnowledgeBaseWriter>,
    timeout: Duration,
    counters: Arc<QueueCounters>,
    discarding: Arc<AtomicBool>,
) {
    loop {
        let job = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        if discarding.load(Ordering::Acquire) {
            counters.discarded.fetch_add(1, Ordering::Relaxed);
            let _ = job.respond_to.send(Err(WriteFailure::Discarded));
            continue;
        }

        counters.attempted.fetch_add(1, Ordering::Relaxed);
        let target = job
            .task
            .target
            .as_ref()
            .map_or_else(|| "<new>".to_string(), EntityId::to_string);
        let outcome = match tokio::time::timeout(timeout, writer.write(&job.task)).await {
            Ok(Ok(id)) => {
                counters.succeeded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    worker,
                    entity = %id,
                    statements = job.task.statements.len(),
                    waited_ms = job.submitted_at.elapsed().as_millis() as u64,
                    "Write applied"
                );
                Ok(id)
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker, target = %target, error = %e, "Write failed");
                Err(WriteFailure::Rejected {
                    target,
                    message: format!("{:#}", e),
                })
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker, target = %target, timeout_secs = timeout.as_secs(), "Write timed out");
                Err(WriteFailure::Timeout {
                    target,
                    seconds: timeout.as_secs(),
                })
            }
        };
        let _ = job.respond_to.send(outcome);
    }
    debug!(worker, "Write worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{props, Statement, Value};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingWriter {
        writes: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl KnowledgeBaseWriter for CountingWriter {
        async fn write(&self, task: &WriteTask) -> Result<EntityId> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if task.label.as_deref() == Some("fail") {
                bail!("rejected by server");
            }
            let n = self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(task
                .target
                .clone()
                .unwrap_or_else(|| EntityId::new(format!("Q{}", n + 1))))
        }
    }

    fn task(label: &str) -> WriteTask {
        WriteTask {
            label: Some(label.to_string()),
            statements: vec![Statement::new(props::TITLE, Value::string(label))],
            ..WriteTask::new(None)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drain_attempts_every_task_once() {
        let writer = Arc::new(CountingWriter::default());
        let queue = WriteQueue::with_timeout(writer.clone(), 3, 4, Duration::from_secs(5));
        let mut tickets = Vec::new();
        for i in 0..50 {
            tickets.push(queue.submit(task(&format!("t{}", i))).await.unwrap());
        }
        let stats = queue.drain().await;
        assert_eq!(stats.submitted, 50);
        assert_eq!(stats.attempted, 50);
        assert_eq!(stats.succeeded, 50);
        assert_eq!(stats.pending(), 0);
        assert_eq!(writer.writes.load(Ordering::SeqCst), 50);
        for ticket in tickets {
            assert!(ticket.outcome().await.is_ok());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failures_are_isolated() {
        let writer = Arc::new(CountingWriter::default());
        let queue = WriteQueue::with_timeout(writer, 2, 8, Duration::from_secs(5));
        let ok = queue.submit(task("ok")).await.unwrap();
        let bad = queue.submit(task("fail")).await.unwrap();
        let after = queue.submit(task("after")).await.unwrap();

        assert!(ok.outcome().await.is_ok());
        assert!(matches!(
            bad.outcome().await,
            Err(WriteFailure::Rejected { ref message, .. }) if message.contains("rejected by server")
        ));
        assert!(after.outcome().await.is_ok());

        let stats = queue.drain().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.succeeded, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_is_a_soft_failure() {
        let writer = Arc::new(CountingWriter {
            delay: Duration::from_millis(500),
            ..CountingWriter::default()
        });
        let queue = WriteQueue::with_timeout(writer, 1, 2, Duration::from_millis(20));
        let ticket = queue.submit(task("slow")).await.unwrap();
        assert!(matches!(
            ticket.outcome().await,
            Err(WriteFailure::Timeout { .. })
        ));
        assert_eq!(queue.drain().await.failed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_closed_queue_and_empty_tasks_rejected() {
        let queue = WriteQueue::with_timeout(
            Arc::new(CountingWriter::default()),
            1,
            1,
            Duration::from_secs(1),
        );
        assert!(matches!(
            queue.submit(WriteTask::new(None)).await,
            Err(WriteFailure::EmptyTask)
        ));
        queue.drain().await;
        assert!(!queue.is_accepting());
        assert!(matches!(
            queue.submit(task("late")).await,
            Err(WriteFailure::QueueClosed)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abort_discards_queued_tasks() {
        let writer = Arc::new(CountingWriter {
            delay: Duration::from_millis(50),
            ..CountingWriter::default()
        });
        let queue = WriteQueue::with_timeout(writer, 1, 8, Duration::from_secs(5));
        let mut tickets = Vec::new();
        for i in 0..5 {
            tickets.push(queue.submit(task(&format!("t{}", i))).await.unwrap());
        }
        let stats = queue.abort().await;
        assert_eq!(stats.attempted + stats.discarded, 5);
        assert!(stats.discarded >= 4);

        let mut discarded = 0;
        for ticket in tickets {
            if matches!(ticket.outcome().await, Err(WriteFailure::Discarded)) {
                discarded += 1;
            }
        }
        assert_eq!(discarded as u64, stats.discarded);
    }
}
