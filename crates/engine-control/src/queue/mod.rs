mod memory;
mod priority;

pub use memory::{MemoryQueue, QueueConfig, QueueStats};
pub use priority::PriorityQueue;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full (max size: {max_size})")]
    Full { max_size: usize },

    #[error("queue is closed")]
    Closed,

    #[error("queue is empty")]
    Empty,

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("dequeue cancelled")]
    Cancelled,

    #[error("no queue registered for priority {0}")]
    UnregisteredPriority(i32),
}
