use crate::queue::{MemoryQueue, QueueConfig, QueueError};
use model::execution::task::Task;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Composition of single-level queues keyed by a fixed set of priorities.
/// Dequeue drains the highest non-empty level and blocks on the highest
/// level when everything is empty.
pub struct PriorityQueue {
    levels: BTreeMap<i32, MemoryQueue>,
}

impl PriorityQueue {
    pub fn new(priorities: &[i32], config: QueueConfig) -> Self {
        let levels = priorities
            .iter()
            .map(|&priority| (priority, MemoryQueue::new(config.clone())))
            .collect::<BTreeMap<_, _>>();

        info!(levels = levels.len(), "Created priority queue");
        Self { levels }
    }

    /// Enqueues into the level matching the task's priority; an unregistered
    /// priority is an error.
    pub fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        let level = self
            .levels
            .get(&task.priority)
            .ok_or(QueueError::UnregisteredPriority(task.priority))?;
        level.enqueue(task)
    }

    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<Task, QueueError> {
        for level in self.levels.values().rev() {
            if level.size() > 0 {
                return level.dequeue(cancel).await;
            }
        }

        // Everything empty: block on the highest level.
        match self.levels.values().next_back() {
            Some(level) => level.dequeue(cancel).await,
            None => Err(QueueError::Empty),
        }
    }

    pub fn size(&self) -> usize {
        self.levels.values().map(MemoryQueue::size).sum()
    }

    pub fn close(&self) {
        for level in self.levels.values() {
            // Already-closed levels are fine here.
            let _ = level.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_highest_level_first() {
        let queue = PriorityQueue::new(&[1, 5, 10], QueueConfig::default());
        let cancel = CancellationToken::new();

        queue.enqueue(Task::new("low", 1)).expect("enqueue");
        queue.enqueue(Task::new("high", 10)).expect("enqueue");
        queue.enqueue(Task::new("mid", 5)).expect("enqueue");
        assert_eq!(queue.size(), 3);

        assert_eq!(queue.dequeue(&cancel).await.expect("dequeue").priority, 10);
        assert_eq!(queue.dequeue(&cancel).await.expect("dequeue").priority, 5);
        assert_eq!(queue.dequeue(&cancel).await.expect("dequeue").priority, 1);
    }

    #[tokio::test]
    async fn unregistered_priority_is_rejected() {
        let queue = PriorityQueue::new(&[1], QueueConfig::default());
        assert_eq!(
            queue.enqueue(Task::new("x", 7)),
            Err(QueueError::UnregisteredPriority(7))
        );
    }
}
