//! Bounded work queue between ingress and the worker pool.
//!
//! Backed by a bounded `flume` channel: many producers, many consumers, each
//! item delivered to exactly one worker. Capacity is the admission-control
//! bound on accepted-but-unprocessed queries.

use std::time::Duration;

use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use super::error::BrokerError;
use super::query::Query;

/// Bounded FIFO of pending queries.
#[derive(Clone)]
pub struct WorkQueue {
    tx: Sender<Query>,
    rx: Receiver<Query>,
    capacity: usize,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` queries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Enqueue without waiting.
    ///
    /// # Errors
    ///
    /// - `BrokerError::QueueFull` if no slot is free
    /// - `BrokerError::Shutdown` if every consumer is gone
    pub fn try_submit(&self, query: Query) -> Result<(), BrokerError> {
        let id = query.id;
        match self.tx.try_send(query) {
            Ok(()) => {
                debug!(query_id = id, queue_depth = self.len(), "Query enqueued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(query_id = id, capacity = self.capacity, "Work queue is full");
                Err(BrokerError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(BrokerError::Shutdown),
        }
    }

    /// Enqueue, waiting at most `wait` for a free slot.
    ///
    /// A zero `wait` behaves like [`try_submit`](Self::try_submit). If the
    /// window elapses the query is not enqueued.
    ///
    /// # Errors
    ///
    /// - `BrokerError::QueueFull` if no slot frees up within `wait`
    /// - `BrokerError::Shutdown` if every consumer is gone
    pub async fn submit(&self, query: Query, wait: Duration) -> Result<(), BrokerError> {
        if wait.is_zero() {
            return self.try_submit(query);
        }

        let id = query.id;
        match tokio::time::timeout(wait, self.tx.send_async(query)).await {
            Ok(Ok(())) => {
                debug!(query_id = id, queue_depth = self.len(), "Query enqueued");
                Ok(())
            }
            Ok(Err(_)) => Err(BrokerError::Shutdown),
            Err(_) => {
                warn!(
                    query_id = id,
                    capacity = self.capacity,
                    wait = ?wait,
                    "Work queue stayed full for the enqueue window"
                );
                Err(BrokerError::QueueFull {
                    capacity: self.capacity,
                })
            }
        }
    }

    /// Consumer handle for workers.
    #[must_use]
    pub fn receiver(&self) -> Receiver<Query> {
        self.rx.clone()
    }

    /// Queries currently waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Whether no query is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(id: u64) -> Query {
        Query {
            id,
            prompt: format!("prompt-{id}"),
        }
    }

    #[test]
    fn test_try_submit_until_full() {
        let queue = WorkQueue::new(2);
        queue.try_submit(query(1)).unwrap();
        queue.try_submit(query(2)).unwrap();

        let err = queue.try_submit(query(3)).unwrap_err();
        assert!(matches!(err, BrokerError::QueueFull { capacity: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_fifo_delivery() {
        let queue = WorkQueue::new(4);
        for id in 1..=3 {
            queue.try_submit(query(id)).unwrap();
        }
        let rx = queue.receiver();
        let ids: Vec<u64> = (0..3).map(|_| rx.try_recv().unwrap().id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_submit_times_out_when_full() {
        let queue = WorkQueue::new(1);
        queue.try_submit(query(1)).unwrap();

        let err = queue
            .submit(query(2), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::QueueFull { .. }));
        // The timed-out query must not sneak in later.
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_waits_for_free_slot() {
        let queue = WorkQueue::new(1);
        queue.try_submit(query(1)).unwrap();

        let rx = queue.receiver();
        let drain = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            rx.recv_async().await.unwrap().id
        });

        queue
            .submit(query(2), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(drain.await.unwrap(), 1);
        assert_eq!(queue.receiver().try_recv().unwrap().id, 2);
    }
}
