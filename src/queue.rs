//! Priority task queue with retry, cancellation, and status query.
//!
//! The queue accepts asynchronous tasks with an integer priority and drains
//! them with a single cooperative consumer: tasks run strictly one at a
//! time, highest priority first, FIFO among equal priorities, with a
//! scheduler yield between tasks. A failed task whose error is classified
//! retryable is requeued with its priority decremented by one, so repeated
//! failures sink in rank and fresh work can overtake stalled retries.
//!
//! Settlement is handle-based: [`ProcessingQueue::add_task`] returns a
//! [`TaskHandle`] whose [`TaskHandle::wait`] resolves with the task's result
//! or error. Cancellation is cooperative and id-scoped: a pending task is
//! dequeued and rejected immediately; the in-flight task cannot be preempted
//! (its processor is an opaque future) but its handle rejects once the
//! processor settles.
//!
//! The queue instance is owned by its constructing caller; dropping it stops
//! the consumer after the in-flight task settles and rejects everything
//! still pending.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::error::{ProcessError, TaskError};

/// Context handed to a task processor on each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    /// Queue-assigned task id
    pub id: u64,

    /// Priority at the time this attempt was dequeued (decays on retry)
    pub priority: i32,

    /// Attempt number, 0 for the first run
    pub attempt: u32,
}

/// Type-erased task body. Invoked once per attempt with the current context.
pub type TaskProcessor<T> =
    Box<dyn Fn(TaskContext) -> BoxFuture<'static, Result<T, ProcessError>> + Send>;

/// Everything needed to enqueue one task.
pub struct TaskDescriptor<T> {
    /// Scheduling priority; higher runs earlier
    pub priority: i32,

    /// Retries granted for transient failures
    pub retries: u32,

    /// The task body
    pub processor: TaskProcessor<T>,
}

impl<T> TaskDescriptor<T> {
    /// Build a descriptor from an async closure.
    pub fn new<F, Fut>(priority: i32, retries: u32, processor: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T, ProcessError>> + Send + 'static,
    {
        Self {
            priority,
            retries,
            processor: Box::new(move |ctx| Box::pin(processor(ctx))),
        }
    }
}

/// Completion handle for an enqueued task.
pub struct TaskHandle<T> {
    id: u64,
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    /// Queue-assigned id, usable with [`ProcessingQueue::cancel_task`].
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the task to settle.
    pub async fn wait(self) -> Result<T, TaskError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(TaskError::QueueClosed(self.id)),
        }
    }
}

/// Snapshot of queue state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    /// Number of tasks waiting to run
    pub pending: usize,

    /// Whether the consumer is currently processing a task
    pub draining: bool,

    /// Id of the in-flight task, if any
    pub current_task: Option<u64>,
}

struct QueuedTask<T> {
    id: u64,
    priority: i32,
    retries_remaining: u32,
    attempt: u32,
    processor: TaskProcessor<T>,
    tx: oneshot::Sender<Result<T, TaskError>>,
}

struct QueueState<T> {
    /// Pending tasks in descending priority order, FIFO among equals
    pending: Vec<QueuedTask<T>>,
    draining: bool,
    current: Option<u64>,
    /// Cooperative cancellation flag for the in-flight task
    cancel_current: bool,
    closed: bool,
    next_id: u64,
}

struct QueueInner<T> {
    // Held only for short critical sections, never across an await.
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

/// Generic priority task queue with a single cooperative consumer.
pub struct ProcessingQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T: Send + 'static> ProcessingQueue<T> {
    /// Create a queue and spawn its consumer on the current tokio runtime.
    pub fn new() -> Self {
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState {
                pending: Vec::new(),
                draining: false,
                current: None,
                cancel_current: false,
                closed: false,
                next_id: 0,
            }),
            notify: Notify::new(),
        });

        let consumer = Arc::clone(&inner);
        tokio::spawn(async move {
            Self::drain(consumer).await;
        });

        Self { inner }
    }

    /// Enqueue a task, returning its completion handle.
    ///
    /// Insertion keeps descending priority order and is stable: among equal
    /// priorities, earlier submissions run first.
    pub fn add_task(&self, descriptor: TaskDescriptor<T>) -> TaskHandle<T> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.lock_state();
            let id = state.next_id;
            state.next_id += 1;

            let task = QueuedTask {
                id,
                priority: descriptor.priority,
                retries_remaining: descriptor.retries,
                attempt: 0,
                processor: descriptor.processor,
                tx,
            };
            Self::insert_by_priority(&mut state.pending, task);
            debug!(task_id = id, priority = descriptor.priority, "task enqueued");
            id
        };
        self.inner.notify.notify_one();
        TaskHandle { id, rx }
    }

    /// Cancel a pending task, or flag the in-flight task for cooperative
    /// cancellation. Returns `false` if the id is unknown.
    pub fn cancel_task(&self, id: u64) -> bool {
        let mut state = self.lock_state();
        if let Some(pos) = state.pending.iter().position(|t| t.id == id) {
            let task = state.pending.remove(pos);
            let _ = task.tx.send(Err(TaskError::Cancelled(id)));
            debug!(task_id = id, "pending task cancelled");
            return true;
        }
        if state.current == Some(id) {
            // The in-flight processor is opaque; the flag is honored once it
            // settles.
            state.cancel_current = true;
            debug!(task_id = id, "cancellation flagged for in-flight task");
            return true;
        }
        false
    }

    /// Cancel and reject every pending task. The in-flight task, if any,
    /// keeps running.
    pub fn cancel_all(&self) {
        let mut state = self.lock_state();
        let pending = std::mem::take(&mut state.pending);
        let count = pending.len();
        for task in pending {
            let _ = task.tx.send(Err(TaskError::Cancelled(task.id)));
        }
        if count > 0 {
            debug!(cancelled = count, "queue cleared");
        }
    }

    /// Current queue length, draining state, and in-flight task id.
    pub fn status(&self) -> QueueStatus {
        let state = self.lock_state();
        QueueStatus {
            pending: state.pending.len(),
            draining: state.draining,
            current_task: state.current,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState<T>> {
        // Poisoning cannot leave the state inconsistent: every critical
        // section completes or the process is already tearing down.
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn insert_by_priority(pending: &mut Vec<QueuedTask<T>>, task: QueuedTask<T>) {
        let pos = pending
            .iter()
            .position(|t| t.priority < task.priority)
            .unwrap_or(pending.len());
        pending.insert(pos, task);
    }

    /// Consumer loop: runs tasks strictly sequentially, yielding between
    /// them, until the queue is dropped.
    async fn drain(inner: Arc<QueueInner<T>>) {
        loop {
            let task = {
                let mut state = match inner.state.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if state.closed {
                    for task in std::mem::take(&mut state.pending) {
                        let _ = task.tx.send(Err(TaskError::QueueClosed(task.id)));
                    }
                    return;
                }
                if state.pending.is_empty() {
                    state.draining = false;
                    state.current = None;
                    None
                } else {
                    let task = state.pending.remove(0);
                    state.draining = true;
                    state.current = Some(task.id);
                    state.cancel_current = false;
                    Some(task)
                }
            };

            let Some(mut task) = task else {
                inner.notify.notified().await;
                continue;
            };

            let ctx = TaskContext {
                id: task.id,
                priority: task.priority,
                attempt: task.attempt,
            };
            debug!(task_id = ctx.id, priority = ctx.priority, attempt = ctx.attempt, "task started");
            let result = (task.processor)(ctx).await;

            let cancelled = {
                let mut state = match inner.state.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                state.current = None;
                std::mem::take(&mut state.cancel_current)
            };

            match result {
                _ if cancelled => {
                    debug!(task_id = task.id, "in-flight task settled after cancellation");
                    let _ = task.tx.send(Err(TaskError::Cancelled(task.id)));
                }
                Ok(value) => {
                    debug!(task_id = task.id, "task completed");
                    let _ = task.tx.send(Ok(value));
                }
                Err(error) if error.is_retryable() && task.retries_remaining > 0 => {
                    task.priority -= 1;
                    task.retries_remaining -= 1;
                    task.attempt += 1;
                    warn!(
                        task_id = task.id,
                        priority = task.priority,
                        retries_remaining = task.retries_remaining,
                        %error,
                        "transient failure, requeueing"
                    );
                    let mut state = match inner.state.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    Self::insert_by_priority(&mut state.pending, task);
                }
                Err(error) => {
                    warn!(task_id = task.id, %error, "task failed");
                    let _ = task.tx.send(Err(TaskError::Failed(error)));
                }
            }

            tokio::task::yield_now().await;
        }
    }
}

impl<T: Send + 'static> Default for ProcessingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ProcessingQueue<T> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.closed = true;
        }
        self.inner.notify.notify_one();
    }
}
