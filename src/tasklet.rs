//! Deferred Tasklets
//!
//! A run-to-completion task queue for cooperative single-threaded hosts.
//! Posting a tasklet schedules it for the next pass of the run loop;
//! posting it again while it is still queued is a no-op.

use std::collections::VecDeque;

/// FIFO queue of posted tasklets with duplicate suppression.
#[derive(Debug, Clone)]
pub struct TaskletQueue<T> {
    queue: VecDeque<T>,
}

impl<T: Copy + Eq> TaskletQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Post a tasklet.
    ///
    /// Returns `true` if a new execution was queued, `false` if the
    /// tasklet was already pending.
    pub fn post(&mut self, task: T) -> bool {
        if self.queue.contains(&task) {
            return false;
        }
        self.queue.push_back(task);
        true
    }

    /// Check if a tasklet is pending.
    pub fn is_posted(&self, task: T) -> bool {
        self.queue.contains(&task)
    }

    /// Remove a pending tasklet. Returns `true` if it was pending.
    pub fn cancel(&mut self, task: T) -> bool {
        let before = self.queue.len();
        self.queue.retain(|t| *t != task);
        self.queue.len() != before
    }

    /// Drain the tasklets posted so far.
    ///
    /// Tasklets posted while the returned batch is being run land in the
    /// next batch.
    pub fn take_batch(&mut self) -> Vec<T> {
        self.queue.drain(..).collect()
    }

    /// Number of pending tasklets.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T: Copy + Eq> Default for TaskletQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Task {
        A,
        B,
    }

    #[test]
    fn test_repost_is_idempotent() {
        let mut queue = TaskletQueue::new();
        assert!(queue.post(Task::A));
        assert!(!queue.post(Task::A));
        assert!(!queue.post(Task::A));
        assert_eq!(queue.len(), 1);
        assert!(queue.is_posted(Task::A));
    }

    #[test]
    fn test_batch_preserves_post_order() {
        let mut queue = TaskletQueue::new();
        queue.post(Task::B);
        queue.post(Task::A);

        assert_eq!(queue.take_batch(), vec![Task::B, Task::A]);
        assert!(queue.is_empty());

        // Re-posting after the batch ran schedules a new execution
        assert!(queue.post(Task::B));
    }

    #[test]
    fn test_cancel() {
        let mut queue = TaskletQueue::new();
        queue.post(Task::A);
        assert!(queue.cancel(Task::A));
        assert!(!queue.cancel(Task::A));
        assert!(!queue.is_posted(Task::A));
    }
}
