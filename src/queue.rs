// src/queue.rs

//! Bounded FIFO used between the coordinator and each decode worker.
//!
//! One queue carries commands into a worker, a second one carries messages
//! out of it. `push` blocks while the queue is full, which is the only
//! backpressure in the pipeline: a worker that runs ahead simply parks until
//! the consumer pops.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

use crate::error::PipelineError;

/// Producer half of a bounded queue.
pub struct QueueSender<T> {
    tx: Sender<T>,
    capacity: usize,
}

/// Consumer half of a bounded queue.
pub struct QueueReceiver<T> {
    rx: Receiver<T>,
    capacity: usize,
}

/// Result of a non-blocking push.
#[derive(Debug)]
pub enum TryPushError<T> {
    Full(T),
    Closed(T),
}

/// Create a queue holding at most `capacity` items.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    // A zero-capacity crossbeam channel is a rendezvous channel, which would
    // turn every push into a handoff. Keep at least one slot.
    let capacity = capacity.max(1);
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (
        QueueSender { tx, capacity },
        QueueReceiver { rx, capacity },
    )
}

impl<T> QueueSender<T> {
    /// Enqueue `item`, blocking while the queue is full.
    pub fn push(&self, item: T) -> Result<(), PipelineError> {
        self.tx.send(item).map_err(|_| PipelineError::QueueClosed)
    }

    pub fn try_push(&self, item: T) -> Result<(), TryPushError<T>> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) => TryPushError::Full(item),
            TrySendError::Disconnected(item) => TryPushError::Closed(item),
        })
    }

    /// Advisory; may be stale by the time the caller looks at it.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> QueueReceiver<T> {
    /// Dequeue the oldest item.
    ///
    /// With `block == true` the caller is suspended until an item arrives and
    /// `Ok(None)` is never returned. With `block == false` an empty queue
    /// yields `Ok(None)` immediately. Either way, `Err(QueueClosed)` means
    /// the producer is gone and every buffered item has been delivered.
    pub fn pop(&self, block: bool) -> Result<Option<T>, PipelineError> {
        if block {
            self.rx
                .recv()
                .map(Some)
                .map_err(|_| PipelineError::QueueClosed)
        } else {
            match self.rx.try_recv() {
                Ok(item) => Ok(Some(item)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err(PipelineError::QueueClosed),
            }
        }
    }

    /// Advisory; may be stale by the time the caller looks at it.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order_is_preserved() {
        let (tx, rx) = bounded(4);
        for i in 0..4 {
            tx.push(i).unwrap();
        }
        let got: Vec<i32> = (0..4).map(|_| rx.pop(true).unwrap().unwrap()).collect();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }

    #[test]
    fn non_blocking_pop_on_empty_returns_none() {
        let (_tx, rx) = bounded::<u8>(2);
        assert!(matches!(rx.pop(false), Ok(None)));
    }

    #[test]
    fn try_push_reports_full() {
        let (tx, _rx) = bounded(2);
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        assert_eq!(tx.len(), 2);
        assert!(matches!(tx.try_push(3), Err(TryPushError::Full(3))));
    }

    #[test]
    fn blocked_producer_is_released_by_pop() {
        let (tx, rx) = bounded(2);
        let producer = thread::spawn(move || {
            for i in 0..10 {
                tx.push(i).unwrap();
            }
        });

        let mut received = Vec::new();
        while received.len() < 10 {
            // Never observe more than the configured capacity.
            assert!(rx.len() <= 2);
            if let Some(v) = rx.pop(true).unwrap() {
                received.push(v);
            }
            thread::sleep(Duration::from_millis(1));
        }
        producer.join().unwrap();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn pop_after_producer_drop_drains_then_closes() {
        let (tx, rx) = bounded(3);
        tx.push("a").unwrap();
        drop(tx);
        assert_eq!(rx.pop(true).unwrap(), Some("a"));
        assert!(matches!(rx.pop(true), Err(PipelineError::QueueClosed)));
        assert!(matches!(rx.pop(false), Err(PipelineError::QueueClosed)));
    }

    #[test]
    fn push_fails_once_consumer_is_gone() {
        let (tx, rx) = bounded(1);
        drop(rx);
        assert!(matches!(tx.push(1), Err(PipelineError::QueueClosed)));
    }
}
