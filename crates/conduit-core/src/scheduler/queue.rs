use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

use crate::scheduler::operation::{Operation, OperationId};

#[derive(Default)]
struct QueueInner {
    /// Descending priority; FIFO among equal priorities.
    order: VecDeque<Operation>,
    /// Ids of every operation in `order`.
    index: HashSet<OperationId>,
}

/// Priority queue of operations waiting for a batch.
///
/// The ordering and the id index change together under one lock, so a cancelled
/// operation can never be picked up by a batch.
#[derive(Default)]
pub struct OperationQueue {
    inner: Mutex<QueueInner>,
}

impl OperationQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `operation` before the first queued operation with a strictly lower
    /// priority. Returns `false` if an operation with the same id is already queued.
    pub fn push(&self, operation: Operation) -> bool {
        let mut inner = self.inner.lock();
        if !inner.index.insert(operation.id) {
            return false;
        }
        let position = inner.order.partition_point(|queued| queued.priority >= operation.priority);
        inner.order.insert(position, operation);
        true
    }

    /// Removes and returns up to `max` operations from the front.
    pub fn pop_batch(&self, max: usize) -> Vec<Operation> {
        self.pop_batch_if_at_least(1, max)
    }

    /// Like [`OperationQueue::pop_batch`] but takes nothing unless at least `min`
    /// operations are queued.
    pub fn pop_batch_if_at_least(&self, min: usize, max: usize) -> Vec<Operation> {
        let mut inner = self.inner.lock();
        if inner.order.len() < min.max(1) {
            return Vec::new();
        }
        let take = max.min(inner.order.len());
        let batch: Vec<Operation> = inner.order.drain(..take).collect();
        for operation in &batch {
            inner.index.remove(&operation.id);
        }
        batch
    }

    /// Removes a queued operation. Returns it if it was still waiting.
    pub fn remove(&self, id: &OperationId) -> Option<Operation> {
        let mut inner = self.inner.lock();
        if !inner.index.remove(id) {
            return None;
        }
        let position = inner.order.iter().position(|queued| queued.id == *id)?;
        inner.order.remove(position)
    }

    /// Removes every queued operation.
    pub fn drain(&self) -> Vec<Operation> {
        let mut inner = self.inner.lock();
        inner.index.clear();
        inner.order.drain(..).collect()
    }

    #[must_use]
    pub fn contains(&self, id: &OperationId) -> bool {
        self.inner.lock().index.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
