//! Single-threaded FIFO executor for device work.
//!
//! Device sessions are not safe for concurrent use, so every transfer task
//! runs on one dedicated thread, one at a time, in submission order. A slow
//! task delays everything queued behind it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::manager::PipeError;
use crate::task::{TaskState, TransferTask};

/// Unique identifier for a queued task.
pub type TaskId = String;

/// Default number of tasks that may wait in the queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Name of the worker thread.
const WORKER_THREAD_NAME: &str = "mtp-pipe-worker";

/// Counters describing the work a worker has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeStats {
    /// Tasks accepted into the queue.
    pub submitted: u64,
    /// Tasks that finished successfully.
    pub completed: u64,
    /// Tasks that finished with an error or a panic.
    pub failed: u64,
}

impl PipeStats {
    /// Tasks accepted but not yet finished.
    pub fn pending(&self) -> u64 {
        self.submitted
            .saturating_sub(self.completed)
            .saturating_sub(self.failed)
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PipeStats {
        PipeStats {
            submitted: self.submitted.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Lifecycle bookkeeping for one task.
struct TaskRecord {
    id: TaskId,
    state: TaskState,
}

impl TaskRecord {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: TaskState::Created,
        }
    }

    fn advance(&mut self, next: TaskState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid task transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(task_id = %self.id, from = ?self.state, to = ?next, "Task state changed");
        self.state = next;
    }
}

/// A task waiting in the queue.
struct QueuedTask {
    record: TaskRecord,
    task: Box<dyn TransferTask>,
}

/// Serialized worker draining a bounded FIFO queue on one thread.
pub struct SerializedWorker {
    /// Queue sender. `None` once shutdown has begun.
    tx: RwLock<Option<mpsc::Sender<QueuedTask>>>,
    /// Capacity of the queue.
    capacity: usize,
    /// Flips to `true` when the worker thread has drained the queue and exited.
    done: watch::Receiver<bool>,
    /// Shared counters.
    counters: Arc<Counters>,
}

impl SerializedWorker {
    /// Starts the worker thread with a queue of `capacity` tasks.
    pub fn spawn(capacity: usize) -> Result<Self, PipeError> {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (done_tx, done_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        let thread_counters = Arc::clone(&counters);
        thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_loop(rx, thread_counters, done_tx))
            .map_err(PipeError::WorkerSpawn)?;

        debug!(capacity = capacity, "Started pipe worker");

        Ok(Self {
            tx: RwLock::new(Some(tx)),
            capacity,
            done: done_rx,
            counters,
        })
    }

    /// Queues a task behind everything submitted before it.
    ///
    /// Never blocks. Fails if the worker is shutting down or the queue is full.
    pub fn submit(&self, task: Box<dyn TransferTask>) -> Result<TaskId, PipeError> {
        let guard = self.tx.read().map_err(|_| PipeError::LockPoisoned {
            context: "worker queue during submit".to_string(),
        })?;
        let tx = guard.as_ref().ok_or(PipeError::ShutDown)?;

        let mut record = TaskRecord::new();
        let id = record.id.clone();
        let kind = task.kind();
        let document_id = task.identifier().document_id.clone();
        record.advance(TaskState::Queued);
        let queued = QueuedTask { record, task };

        tx.try_send(queued).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PipeError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => PipeError::ShutDown,
        })?;
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);

        debug!(task_id = %id, kind = %kind, document_id = %document_id, "Task queued");
        Ok(id)
    }

    /// Stops accepting tasks and waits up to `timeout` for the queue to drain.
    ///
    /// Running and already-queued tasks are not interrupted. Returns `true`
    /// if the worker finished everything in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        match self.tx.write() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    info!("Pipe worker shutting down");
                }
            }
            Err(_) => {
                warn!("Worker queue lock poisoned during shutdown");
                return false;
            }
        }

        let mut done = self.done.clone();
        let waited = tokio::time::timeout(timeout, done.wait_for(|finished| *finished))
            .await
            .map(|signalled| signalled.map(|_| ()));
        match waited {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                warn!("Pipe worker exited without signalling completion");
                true
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    pending = self.stats().pending(),
                    "Pipe worker did not drain before timeout"
                );
                false
            }
        }
    }

    /// Whether shutdown has begun.
    pub fn is_shut_down(&self) -> bool {
        self.tx.read().map(|guard| guard.is_none()).unwrap_or(true)
    }

    /// Returns a snapshot of the worker's counters.
    pub fn stats(&self) -> PipeStats {
        self.counters.snapshot()
    }
}

/// Worker thread body: run tasks until the queue is closed and empty.
fn run_loop(
    mut rx: mpsc::Receiver<QueuedTask>,
    counters: Arc<Counters>,
    done_tx: watch::Sender<bool>,
) {
    while let Some(QueuedTask { mut record, task }) = rx.blocking_recv() {
        let kind = task.kind();
        let identifier = task.identifier().clone();
        let span = tracing::debug_span!(
            "transfer",
            task_id = %record.id,
            kind = %kind,
            device_id = identifier.device_id,
            object_handle = identifier.object_handle,
            document_id = %identifier.document_id,
        );
        let _entered = span.enter();

        record.advance(TaskState::Running);
        match panic::catch_unwind(AssertUnwindSafe(move || task.run())) {
            Ok(Ok(())) => {
                counters.completed.fetch_add(1, Ordering::SeqCst);
                record.advance(TaskState::Completed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                record.advance(TaskState::Failed);
                warn!(error = %e, "Transfer task failed");
            }
            Err(payload) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                record.advance(TaskState::Failed);
                error!(panic = %panic_message(payload.as_ref()), "Transfer task panicked");
            }
        }
    }

    let _ = done_tx.send(true);
    info!("Pipe worker stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
