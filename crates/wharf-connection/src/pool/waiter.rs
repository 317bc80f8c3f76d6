//! FIFO queue of parked acquire requests

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::Connection;

pub(super) type WaiterReceiver = oneshot::Receiver<Grant>;

/// What a parked `acquire` is woken with
pub(super) enum Grant {
    /// A connection already checked out to the waiter
    Connection(Arc<Connection>),
    /// A reserved slot the waiter creates its own connection into
    Slot,
}

/// One parked `acquire`. Dropping the sender wakes the receiver with an
/// error, which the pool reports as `PoolClosed`.
pub(super) struct Waiter {
    id: u64,
    tx: oneshot::Sender<Grant>,
}

impl Waiter {
    /// Wake the waiter. Gives the grant back if the receiver is gone.
    pub fn send(self, grant: Grant) -> Result<(), Grant> {
        self.tx.send(grant)
    }
}

#[derive(Default)]
pub(super) struct WaitQueue {
    next_id: u64,
    waiters: VecDeque<Waiter>,
}

impl WaitQueue {
    /// Enqueue a new waiter at the back
    pub fn push(&mut self) -> (u64, WaiterReceiver) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.waiters.push_back(Waiter { id, tx });
        (id, rx)
    }

    pub fn pop_front(&mut self) -> Option<Waiter> {
        self.waiters.pop_front()
    }

    /// Remove a waiter by id. False if it was already served or rejected.
    pub fn remove(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Reject every waiter by dropping its sender
    pub fn clear(&mut self) -> usize {
        let rejected = self.waiters.len();
        self.waiters.clear();
        rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_only_once() {
        let mut queue = WaitQueue::default();
        let (first, _rx1) = queue.push();
        let (second, _rx2) = queue.push();
        assert_ne!(first, second);
        assert_eq!(queue.len(), 2);

        assert!(queue.remove(first));
        assert!(!queue.remove(first));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_front().map(|w| w.id), Some(second));
    }

    #[tokio::test]
    async fn test_clear_rejects_receivers() {
        let mut queue = WaitQueue::default();
        let (_, rx) = queue.push();
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_send_to_dropped_receiver_returns_grant() {
        let mut queue = WaitQueue::default();
        let (_, rx) = queue.push();
        drop(rx);

        let waiter = queue.pop_front().expect("queued");
        assert!(matches!(waiter.send(Grant::Slot), Err(Grant::Slot)));
    }
}
