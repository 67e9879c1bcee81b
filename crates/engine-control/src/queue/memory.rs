use crate::queue::QueueError;
use model::execution::task::Task;
use std::{collections::VecDeque, sync::Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_size: 10_000 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub current_size: usize,
    pub max_size: usize,
    pub enqueued: u64,
    pub dequeued: u64,
}

struct Inner {
    tasks: VecDeque<Task>,
    closed: bool,
    enqueued: u64,
    dequeued: u64,
}

/// Bounded multi-producer/multi-consumer queue ordered by priority
/// descending, FIFO within a priority. Tasks are not persisted.
///
/// One mutex protects the task list; a single [`Notify`] plays the condition
/// variable. `enqueue` wakes one waiter, `close` wakes them all, and every
/// waiter re-checks its predicate after waking.
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    not_empty: Notify,
    max_size: usize,
}

impl MemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        info!(max_size = config.max_size, "Created memory queue");
        Self {
            inner: Mutex::new(Inner {
                tasks: VecDeque::new(),
                closed: false,
                enqueued: 0,
                dequeued: 0,
            }),
            not_empty: Notify::new(),
            max_size: config.max_size,
        }
    }

    /// Inserts the task keeping the queue sorted by priority descending;
    /// equal priorities keep insertion order.
    pub fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");

            if inner.closed {
                return Err(QueueError::Closed);
            }
            if inner.tasks.len() >= self.max_size {
                return Err(QueueError::Full {
                    max_size: self.max_size,
                });
            }

            let position = inner
                .tasks
                .iter()
                .position(|queued| task.priority > queued.priority)
                .unwrap_or(inner.tasks.len());

            debug!(
                task_id = %task.id,
                job_id = %task.job_id,
                priority = task.priority,
                "Enqueued task"
            );
            inner.tasks.insert(position, task);
            inner.enqueued += 1;
        }

        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until a task is available, the scope is cancelled, or the
    /// queue is closed. Cancellation wins even when tasks are available.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<Task, QueueError> {
        loop {
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            // Register interest before re-checking the predicate so a wakeup
            // between the check and the await is not lost.
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if inner.closed {
                    return Err(QueueError::Closed);
                }
                if let Some(task) = inner.tasks.pop_front() {
                    inner.dequeued += 1;
                    debug!(task_id = %task.id, job_id = %task.job_id, "Dequeued task");
                    return Ok(task);
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            }
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").tasks.len()
    }

    /// Head of the queue without removing it.
    pub fn peek(&self) -> Result<Task, QueueError> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        if inner.closed {
            return Err(QueueError::Closed);
        }
        inner.tasks.front().cloned().ok_or(QueueError::Empty)
    }

    /// Removes the first task with the given id.
    pub fn remove(&self, task_id: &str) -> Result<Task, QueueError> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.closed {
            return Err(QueueError::Closed);
        }

        let position = inner
            .tasks
            .iter()
            .position(|task| task.id == task_id)
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_owned()))?;

        debug!(task_id, "Removed task from queue");
        Ok(inner.tasks.remove(position).expect("position just found"))
    }

    /// Drops every queued task without closing the queue.
    pub fn clear(&self) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.closed {
            return Err(QueueError::Closed);
        }

        let dropped = inner.tasks.len();
        inner.tasks.clear();
        info!(dropped, "Cleared task queue");
        Ok(())
    }

    /// Closes the queue and wakes every blocked consumer; they return
    /// [`QueueError::Closed`]. Subsequent enqueues fail.
    pub fn close(&self) -> Result<(), QueueError> {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if inner.closed {
                return Err(QueueError::Closed);
            }
            inner.closed = true;
        }

        self.not_empty.notify_waiters();
        info!("Closed memory queue");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("queue lock poisoned").closed
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().expect("queue lock poisoned");
        QueueStats {
            current_size: inner.tasks.len(),
            max_size: self.max_size,
            enqueued: inner.enqueued,
            dequeued: inner.dequeued,
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}
