//! The task orchestrator — a worker pool draining a queue of inbound
//! messages, with per-thread serialization, deadlines, retries, and
//! dead-lettering.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{PipelineError, TaskError};
use crate::pipeline::{MessageProcessor, ProcessOutcome};
use crate::store::DeadLetterStore;
use crate::worker::{ProcessTask, RetryPolicy};

const QUEUE_CAPACITY: usize = 1024;

/// What workers execute. Abstracted so the pool can be tested without a
/// full pipeline behind it.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &ProcessTask) -> Result<ProcessOutcome, PipelineError>;
}

#[async_trait]
impl TaskRunner for MessageProcessor {
    async fn run(&self, task: &ProcessTask) -> Result<ProcessOutcome, PipelineError> {
        self.process(&task.message_id).await
    }
}

/// Handle for enqueueing work. Cloneable; dropping every clone shuts the
/// pool down once the queue drains.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<ProcessTask>,
}

impl TaskQueue {
    pub async fn enqueue(&self, task: ProcessTask) -> Result<(), TaskError> {
        self.tx.send(task).await.map_err(|_| TaskError::QueueClosed)
    }
}

pub struct Orchestrator {
    workers: Vec<JoinHandle<()>>,
}

struct WorkerShared {
    runner: Arc<dyn TaskRunner>,
    dead_letters: Arc<DeadLetterStore>,
    retry: RetryPolicy,
    deadline: Duration,
    rx: Mutex<mpsc::Receiver<ProcessTask>>,
    // One async mutex per thread_id so replies within a conversation
    // never interleave, while distinct conversations run in parallel.
    thread_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    /// Spawn `workers` tasks draining a shared queue.
    pub fn spawn(
        runner: Arc<dyn TaskRunner>,
        dead_letters: Arc<DeadLetterStore>,
        retry: RetryPolicy,
        deadline: Duration,
        workers: usize,
    ) -> (Self, TaskQueue) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let shared = Arc::new(WorkerShared {
            runner,
            dead_letters,
            retry,
            deadline,
            rx: Mutex::new(rx),
            thread_locks: std::sync::Mutex::new(HashMap::new()),
        });

        let handles = (0..workers.max(1))
            .map(|n| {
                let shared = shared.clone();
                tokio::spawn(async move { worker_loop(n, shared).await })
            })
            .collect();

        (Self { workers: handles }, TaskQueue { tx })
    }

    /// Wait for workers to finish. Call after every `TaskQueue` clone has
    /// been dropped.
    pub async fn join(self) {
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
    }
}

async fn worker_loop(worker: usize, shared: Arc<WorkerShared>) {
    loop {
        let task = {
            let mut rx = shared.rx.lock().await;
            rx.recv().await
        };
        let Some(task) = task else {
            info!(worker, "Queue closed, worker exiting");
            return;
        };
        run_with_retries(worker, &shared, task).await;
    }
}

fn thread_lock(shared: &WorkerShared, thread_id: &str) -> Arc<Mutex<()>> {
    let mut locks = shared.thread_locks.lock().expect("thread lock map poisoned");
    locks.entry(thread_id.to_string()).or_default().clone()
}

/// Drop the map entry once nothing else holds the lock. A waiter on
/// another worker keeps a clone, so its strong count stays above one
/// and the entry survives.
fn release_thread_lock(shared: &WorkerShared, thread_id: &str) {
    let mut locks = shared.thread_locks.lock().expect("thread lock map poisoned");
    if locks.get(thread_id).is_some_and(|l| Arc::strong_count(l) == 1) {
        locks.remove(thread_id);
    }
}

async fn run_with_retries(worker: usize, shared: &WorkerShared, task: ProcessTask) {
    let thread_id = task.thread_id.clone();
    let lock = thread_lock(shared, &thread_id);
    {
        let _guard = lock.lock().await;
        run_attempts(worker, shared, task).await;
    }
    drop(lock);
    release_thread_lock(shared, &thread_id);
}

async fn run_attempts(worker: usize, shared: &WorkerShared, task: ProcessTask) {
    let max = shared.retry.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max {
        match tokio::time::timeout(shared.deadline, shared.runner.run(&task)).await {
            Ok(Ok(outcome)) => {
                info!(worker, message_id = %task.message_id, attempt, ?outcome, "Task complete");
                return;
            }
            Ok(Err(e)) => {
                last_error = e.to_string();
                if !e.is_retryable() {
                    warn!(worker, message_id = %task.message_id, attempt, error = %e, "Permanent task failure");
                    break;
                }
                warn!(worker, message_id = %task.message_id, attempt, error = %e, "Task attempt failed");
            }
            Err(_) => {
                let e = TaskError::DeadlineExceeded(shared.deadline);
                last_error = e.to_string();
                warn!(worker, message_id = %task.message_id, attempt, error = %e, "Task attempt timed out");
            }
        }
        if attempt < max {
            tokio::time::sleep(shared.retry.delay_for(attempt)).await;
        }
    }

    error!(
        worker,
        message_id = %task.message_id,
        attempts = max,
        last_error = %last_error,
        "Task exhausted retries, dead-lettering"
    );
    if let Err(e) = shared
        .dead_letters
        .insert(task.into_dead_letter(max, last_error))
    {
        error!(error = %e, "Failed to record dead letter");
    }
}
