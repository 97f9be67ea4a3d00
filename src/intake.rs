//! Bounded intake queue between the producer and the scorer.
//!
//! A thin wrapper over a bounded `tokio::sync::mpsc` channel of [`Batch`]es.
//! `put` suspends the producer while the queue is full; nothing is ever
//! dropped or reordered. A shared [`QueueGauge`] exposes the current depth to
//! the status endpoint without holding a sender (which would keep the channel
//! open after the producer exits).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::Batch;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IntakeError {
    #[error("Intake queue closed: scorer is no longer receiving")]
    Closed,
}

/// Factory for the sender/receiver pair.
pub struct IntakeQueue;

impl IntakeQueue {
    /// Create a queue holding at most `capacity` batches (minimum 1).
    pub fn bounded(capacity: usize) -> (BatchSender, BatchReceiver) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let gauge = QueueGauge {
            depth: Arc::new(AtomicUsize::new(0)),
            capacity,
        };
        (
            BatchSender {
                tx,
                gauge: gauge.clone(),
            },
            BatchReceiver { rx, gauge },
        )
    }
}

/// Producer side. Cloneable; the queue closes when every sender is dropped.
#[derive(Clone)]
pub struct BatchSender {
    tx: mpsc::Sender<Batch>,
    gauge: QueueGauge,
}

impl BatchSender {
    /// Enqueue a batch, suspending while the queue is full.
    ///
    /// Cancel-safe: dropping the future before a slot frees up leaves the
    /// queue untouched.
    pub async fn put(&self, batch: Batch) -> Result<(), IntakeError> {
        let permit = self.tx.reserve().await.map_err(|_| IntakeError::Closed)?;
        // Count before sending so the receiver never decrements below zero.
        self.gauge.depth.fetch_add(1, Ordering::AcqRel);
        permit.send(batch);
        Ok(())
    }

    pub fn gauge(&self) -> QueueGauge {
        self.gauge.clone()
    }
}

/// Scorer side. Exactly one exists per queue.
pub struct BatchReceiver {
    rx: mpsc::Receiver<Batch>,
    gauge: QueueGauge,
}

impl BatchReceiver {
    /// Dequeue the oldest batch, suspending while the queue is empty.
    ///
    /// Returns `None` once every sender is gone and the queue is drained.
    pub async fn get(&mut self) -> Option<Batch> {
        let batch = self.rx.recv().await?;
        self.gauge.depth.fetch_sub(1, Ordering::AcqRel);
        Some(batch)
    }

    pub fn gauge(&self) -> QueueGauge {
        self.gauge.clone()
    }
}

/// Read-only view of queue occupancy.
#[derive(Clone, Debug)]
pub struct QueueGauge {
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

impl QueueGauge {
    /// Batches accepted by `put` and not yet taken by `get`.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
