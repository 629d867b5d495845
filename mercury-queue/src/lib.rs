//! Worker queue for mercury.
//!
//! Each capture or replay worker owns one [`QueueProducer`]; the output
//! coordinator owns the matching [`QueueConsumer`]. Neither handle can be
//! cloned, so every queue has exactly one producer and one consumer for its
//! whole life.
//!
//! Pushing never blocks. When the queue is full the item is discarded and
//! the drop counter incremented; the producer decides nothing else.

mod capacity;

pub use capacity::{capacity_for, MAX_QUEUE_CAPACITY, MIN_QUEUE_CAPACITY, RECORD_SLOT_BYTES};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

struct Shared<T> {
    slots: ArrayQueue<T>,
    pushed: AtomicU64,
    dropped: AtomicU64,
    disconnected: AtomicBool,
}

/// Create a queue holding at most `capacity` items.
///
/// A zero capacity is raised to one.
pub fn worker_queue<T>(capacity: usize) -> (QueueProducer<T>, QueueConsumer<T>) {
    let shared = Arc::new(Shared {
        slots: ArrayQueue::new(capacity.max(1)),
        pushed: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
        disconnected: AtomicBool::new(false),
    });
    (
        QueueProducer {
            shared: Arc::clone(&shared),
        },
        QueueConsumer { shared },
    )
}

/// Producer half. Dropping it marks the queue as disconnected.
pub struct QueueProducer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> QueueProducer<T> {
    /// Offer an item. Returns false iff the queue was full, in which case the
    /// item is discarded and counted as dropped.
    pub fn try_push(&self, item: T) -> bool {
        match self.shared.slots.push(item) {
            Ok(()) => {
                self.shared.pushed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_rejected) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.capacity()
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn is_full(&self) -> bool {
        self.shared.slots.is_full()
    }
}

impl<T> Drop for QueueProducer<T> {
    fn drop(&mut self) {
        // Release: every push made through this handle is visible to a
        // consumer that observes the disconnect.
        self.shared.disconnected.store(true, Ordering::Release);
    }
}

impl<T> fmt::Debug for QueueProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueProducer")
            .field("capacity", &self.capacity())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Consumer half, owned by the output coordinator.
pub struct QueueConsumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> QueueConsumer<T> {
    /// Take every item present at the time of the call, in FIFO order.
    ///
    /// The pass is bounded: items pushed while the drain is being consumed
    /// are left for the next call, so one busy producer cannot hold the
    /// consumer on its queue indefinitely.
    pub fn drain(&self) -> Drain<'_, T> {
        Drain {
            slots: &self.shared.slots,
            remaining: self.shared.slots.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shared.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.capacity()
    }

    /// Items accepted by `try_push` so far.
    pub fn pushed(&self) -> u64 {
        self.shared.pushed.load(Ordering::Relaxed)
    }

    /// Items rejected by `try_push` so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// True once the producer handle has been dropped.
    ///
    /// Check this before `is_empty` when deciding the queue is finished:
    /// after a disconnect is observed no further items can arrive.
    pub fn is_disconnected(&self) -> bool {
        self.shared.disconnected.load(Ordering::Acquire)
    }
}

impl<T> fmt::Debug for QueueConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

/// Iterator returned by [`QueueConsumer::drain`].
pub struct Drain<'a, T> {
    slots: &'a ArrayQueue<T>,
    remaining: usize,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.slots.pop()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    // ===========================================
    // Test Category A — Push / Drop Accounting
    // ===========================================

    #[test]
    fn test_push_until_full_then_drop() {
        let (tx, rx) = worker_queue(5);
        let results: Vec<bool> = (0..8).map(|i| tx.try_push(i)).collect();

        assert_eq!(results.iter().filter(|ok| **ok).count(), 5);
        assert_eq!(results.iter().filter(|ok| !**ok).count(), 3);
        assert_eq!(rx.dropped(), 3);
        assert_eq!(tx.dropped(), 3);
        assert_eq!(rx.pushed(), 5);
        assert_eq!(rx.len(), 5);
        assert!(tx.is_full());
    }

    #[test]
    fn test_drop_keeps_oldest_items() {
        let (tx, rx) = worker_queue(2);
        tx.try_push("a");
        tx.try_push("b");
        assert!(!tx.try_push("c"));
        assert_eq!(rx.drain().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_zero_capacity_raised_to_one() {
        let (tx, rx) = worker_queue::<u8>(0);
        assert_eq!(rx.capacity(), 1);
        assert!(tx.try_push(1));
        assert!(!tx.try_push(2));
    }

    // ===========================================
    // Test Category B — Drain
    // ===========================================

    #[test]
    fn test_drain_preserves_fifo_order() {
        let (tx, rx) = worker_queue(16);
        for i in 0..10 {
            assert!(tx.try_push(i));
        }
        assert_eq!(rx.drain().collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
        assert!(rx.is_empty());
    }

    #[test]
    fn test_drain_empty_queue_yields_nothing() {
        let (_tx, rx) = worker_queue::<u32>(4);
        assert_eq!(rx.drain().count(), 0);
    }

    #[test]
    fn test_drain_is_bounded_to_items_present_at_start() {
        let (tx, rx) = worker_queue(8);
        tx.try_push(1);
        tx.try_push(2);

        let mut drain = rx.drain();
        assert_eq!(drain.next(), Some(1));
        tx.try_push(3);
        assert_eq!(drain.next(), Some(2));
        assert_eq!(drain.next(), None);

        assert_eq!(rx.drain().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_space_is_reusable_after_drain() {
        let (tx, rx) = worker_queue(3);
        for round in 0..4 {
            for i in 0..3 {
                assert!(tx.try_push(round * 10 + i));
            }
            assert_eq!(rx.drain().count(), 3);
        }
        assert_eq!(rx.dropped(), 0);
        assert_eq!(rx.pushed(), 12);
    }

    // ===========================================
    // Test Category C — Disconnect
    // ===========================================

    #[test]
    fn test_disconnect_after_producer_drop() {
        let (tx, rx) = worker_queue(4);
        tx.try_push(7);
        assert!(!rx.is_disconnected());
        drop(tx);
        assert!(rx.is_disconnected());
        assert_eq!(rx.drain().collect::<Vec<_>>(), vec![7]);
    }

    // ===========================================
    // Test Category D — Cross-thread Handoff
    // ===========================================

    #[test]
    fn test_concurrent_producer_consumer_no_loss_no_reorder() {
        let (tx, rx) = worker_queue(64);
        let producer = thread::spawn(move || {
            let mut accepted = Vec::new();
            for i in 0..10_000u32 {
                if tx.try_push(i) {
                    accepted.push(i);
                }
            }
            accepted
        });

        let mut received = Vec::new();
        loop {
            let disconnected = rx.is_disconnected();
            received.extend(rx.drain());
            if disconnected && rx.is_empty() {
                break;
            }
            thread::yield_now();
        }

        let accepted = producer.join().expect("producer thread");
        assert_eq!(received, accepted);
        assert_eq!(
            rx.pushed() + rx.dropped(),
            10_000,
            "every offer is either queued or counted"
        );
    }
}
