//! Bounded in-memory FIFO of job ids waiting for a worker.
//!
//! Admission is two-step: [`JobQueue::reserve`] claims a slot (or fails with
//! [`QueueFull`]) before the job row is written, and [`QueueSlot::push`]
//! fills it afterwards, so a rejected submission never leaves a row behind.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shotforge_core::types::JobId;
use tokio::sync::Notify;

/// The queue is at its admission limit.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("Job queue is full ({capacity} jobs waiting)")]
pub struct QueueFull {
    pub capacity: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    order: VecDeque<JobId>,
    members: HashSet<JobId>,
    reserved: usize,
}

#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity,
        })
    }

    /// Claim a slot for a new submission.
    pub fn reserve(self: &Arc<Self>) -> Result<QueueSlot, QueueFull> {
        let mut state = self.lock();
        if state.order.len() + state.reserved >= self.capacity {
            return Err(QueueFull {
                capacity: self.capacity,
            });
        }
        state.reserved += 1;
        Ok(QueueSlot {
            queue: Arc::clone(self),
            filled: false,
        })
    }

    /// Enqueue a job found in the store (restart recovery, sweeps).
    ///
    /// Ignores the admission limit: the job already exists. Returns `false`
    /// if it was already queued.
    pub fn push_existing(&self, id: JobId) -> bool {
        let mut state = self.lock();
        let added = Self::enqueue(&mut state, id);
        drop(state);
        if added {
            self.notify.notify_one();
        }
        added
    }

    /// Wait for the next job id.
    pub async fn pop(&self) -> JobId {
        loop {
            let notified = self.notify.notified();
            if let Some(id) = self.try_pop() {
                return id;
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<JobId> {
        let mut state = self.lock();
        let id = state.order.pop_front()?;
        state.members.remove(&id);
        Some(id)
    }

    /// Drop a waiting job. Returns `false` if it was not queued.
    pub fn remove(&self, id: JobId) -> bool {
        let mut state = self.lock();
        if !state.members.remove(&id) {
            return false;
        }
        state.order.retain(|queued| *queued != id);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn enqueue(state: &mut QueueState, id: JobId) -> bool {
        if !state.members.insert(id) {
            return false;
        }
        state.order.push_back(id);
        true
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reserved place in the queue. Dropping it unfilled releases the slot.
#[derive(Debug)]
pub struct QueueSlot {
    queue: Arc<JobQueue>,
    filled: bool,
}

impl QueueSlot {
    pub fn push(mut self, id: JobId) {
        let mut state = self.queue.lock();
        state.reserved -= 1;
        JobQueue::enqueue(&mut state, id);
        drop(state);
        self.filled = true;
        self.queue.notify.notify_one();
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        if !self.filled {
            self.queue.lock().reserved -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let queue = JobQueue::new(8);
        let ids: Vec<JobId> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.reserve().unwrap().push(*id);
        }
        let popped: Vec<JobId> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(popped, ids);
    }

    #[test]
    fn reservations_count_against_capacity() {
        let queue = JobQueue::new(2);
        let first = queue.reserve().unwrap();
        let _second = queue.reserve().unwrap();
        assert!(queue.reserve().is_err());

        drop(first);
        let third = queue.reserve().unwrap();
        third.push(Uuid::new_v4());
        assert_eq!(queue.len(), 1);
        assert!(queue.reserve().is_err());
    }

    #[test]
    fn existing_jobs_bypass_the_limit_but_not_dedupe() {
        let queue = JobQueue::new(1);
        let id = Uuid::new_v4();
        assert!(queue.push_existing(id));
        assert!(!queue.push_existing(id));
        assert!(queue.push_existing(Uuid::new_v4()));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn removed_jobs_are_not_popped() {
        let queue = JobQueue::new(4);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        queue.push_existing(a);
        queue.push_existing(b);
        assert!(queue.remove(a));
        assert!(!queue.remove(a));
        assert_eq!(queue.try_pop(), Some(b));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_waits_for_a_push() {
        let queue = JobQueue::new(4);
        let id = Uuid::new_v4();

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push_existing(id);

        let popped = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped, id);
    }
}
