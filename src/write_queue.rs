//! # Write Queue
//!
//! Pending user writes, sent ahead of scheduled reads.
//!
//! ## How It Works
//!
//! Writes are kept in arrival order with at most one entry per field. A
//! second write for a field that is still queued replaces the value in
//! place, so the latest value wins without losing the field's turn.
//!
//! ```rust
//! use voltage_bsb::{QueuedWrite, WriteQueue};
//!
//! let mut queue = WriteQueue::new();
//! queue.push(QueuedWrite::new(1, 20.0));
//! queue.push(QueuedWrite::new(2, 1.0));
//! queue.push(QueuedWrite::new(1, 21.5));
//!
//! assert_eq!(queue.len(), 2);
//! assert_eq!(queue.pop(), Some(QueuedWrite::new(1, 21.5)));
//! ```

use std::collections::VecDeque;

use crate::registry::FieldId;

/// A validated write waiting to be sent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuedWrite {
    /// Target field
    pub field_id: FieldId,
    /// Engineering value to write
    pub value: f64,
}

impl QueuedWrite {
    /// Create a queued write
    pub fn new(field_id: FieldId, value: f64) -> Self {
        Self { field_id, value }
    }
}

/// FIFO of writes, coalesced per field
#[derive(Debug, Default)]
pub struct WriteQueue {
    pending: VecDeque<QueuedWrite>,
    coalesced: u64,
}

impl WriteQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write, replacing any pending value for the same field
    pub fn push(&mut self, write: QueuedWrite) {
        match self
            .pending
            .iter_mut()
            .find(|w| w.field_id == write.field_id)
        {
            Some(existing) => {
                existing.value = write.value;
                self.coalesced += 1;
            }
            None => self.pending.push_back(write),
        }
    }

    /// Take the oldest write
    #[inline]
    pub fn pop(&mut self) -> Option<QueuedWrite> {
        self.pending.pop_front()
    }

    /// Put a write back at the front, ahead of everything queued
    pub fn requeue_front(&mut self, write: QueuedWrite) {
        if let Some(pos) = self
            .pending
            .iter()
            .position(|w| w.field_id == write.field_id)
        {
            // A newer value arrived in the meantime
            if let Some(newer) = self.pending.remove(pos) {
                self.pending.push_front(newer);
            }
            return;
        }
        self.pending.push_front(write);
    }

    /// Drop any pending write for a field
    pub fn remove_field(&mut self, field_id: FieldId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|w| w.field_id != field_id);
        self.pending.len() != before
    }

    /// Number of pending writes
    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Writes replaced by a newer value
    #[inline]
    pub fn coalesced_count(&self) -> u64 {
        self.coalesced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = WriteQueue::new();
        queue.push(QueuedWrite::new(1, 1.0));
        queue.push(QueuedWrite::new(2, 2.0));
        assert_eq!(queue.pop().unwrap().field_id, 1);
        assert_eq!(queue.pop().unwrap().field_id, 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_coalesce_keeps_position() {
        let mut queue = WriteQueue::new();
        queue.push(QueuedWrite::new(1, 1.0));
        queue.push(QueuedWrite::new(2, 2.0));
        queue.push(QueuedWrite::new(1, 3.0));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.coalesced_count(), 1);
        assert_eq!(queue.pop(), Some(QueuedWrite::new(1, 3.0)));
    }

    #[test]
    fn test_requeue_front_prefers_newer_value() {
        let mut queue = WriteQueue::new();
        queue.push(QueuedWrite::new(2, 2.0));
        queue.push(QueuedWrite::new(1, 5.0));

        queue.requeue_front(QueuedWrite::new(1, 4.0));
        assert_eq!(queue.pop(), Some(QueuedWrite::new(1, 5.0)));

        queue.requeue_front(QueuedWrite::new(3, 1.0));
        assert_eq!(queue.pop(), Some(QueuedWrite::new(3, 1.0)));
    }

    #[test]
    fn test_remove_field() {
        let mut queue = WriteQueue::new();
        queue.push(QueuedWrite::new(1, 1.0));
        assert!(queue.remove_field(1));
        assert!(!queue.remove_field(1));
        assert!(queue.is_empty());
    }
}
