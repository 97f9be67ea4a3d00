//! Batch producers feeding the intake queue.
//!
//! Provides a unified trait for reading KPI batches from different sources:
//! the built-in simulator, JSON lines on stdin, and pre-loaded replays.

pub mod simulator;
pub mod stdin;

pub use simulator::KpiSimulator;
pub use stdin::{JsonLinesSource, StdinSource};

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::intake::BatchSender;
use crate::types::Batch;

/// Events produced by a batch source.
pub enum SourceEvent {
    /// One producer tick worth of samples.
    Batch(Batch),
    /// Source has no more data.
    Eof,
}

/// Trait abstracting where KPI batches come from.
///
/// Implementations handle parsing and pacing internally. The producer loop
/// calls [`next_batch`](BatchSource::next_batch) in a `select!` with cancellation.
#[async_trait]
pub trait BatchSource: Send + 'static {
    /// Read the next batch. `Err` is unrecoverable.
    async fn next_batch(&mut self) -> Result<SourceEvent>;

    /// Human-readable name for logging (e.g. "simulator", "stdin").
    fn source_name(&self) -> &str;
}

/// Counters returned when the producer loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub batches: u64,
    pub samples: u64,
}

/// Pull batches from `source` and `put` them on the intake queue until the
/// source ends, the queue closes, or `cancel` fires.
///
/// `put` suspends while the queue is full, so a slow scorer throttles the
/// source instead of losing data.
pub async fn run_producer<S: BatchSource + ?Sized>(
    source: &mut S,
    sender: BatchSender,
    cancel: CancellationToken,
) -> ProducerStats {
    let mut stats = ProducerStats::default();
    info!("[Producer] Reading batches from {}", source.source_name());

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                info!("[Producer] Shutdown signal received");
                break;
            }
            result = source.next_batch() => match result {
                Ok(ev) => ev,
                Err(e) => {
                    warn!("[Producer] Source error: {:#}", e);
                    break;
                }
            }
        };

        let batch = match event {
            SourceEvent::Batch(b) => b,
            SourceEvent::Eof => {
                info!(batches = stats.batches, "[Producer] Source reached end");
                break;
            }
        };

        let size = batch.len() as u64;
        let put = tokio::select! {
            _ = cancel.cancelled() => {
                info!("[Producer] Shutdown signal received while queue full");
                break;
            }
            result = sender.put(batch) => result,
        };
        if put.is_err() {
            warn!("[Producer] Intake queue closed, stopping");
            break;
        }

        stats.batches += 1;
        stats.samples += size;
        debug!(
            batch = stats.batches,
            size,
            queue_depth = sender.gauge().depth(),
            "[Producer] Batch enqueued"
        );
    }

    stats
}

// ============================================================================
// Replay Source
// ============================================================================

/// Replays pre-loaded batches with an optional delay between them.
pub struct ReplaySource {
    batches: std::vec::IntoIter<Batch>,
    delay: Duration,
    yielded_first: bool,
}

impl ReplaySource {
    pub fn new(batches: Vec<Batch>, delay: Duration) -> Self {
        Self {
            batches: batches.into_iter(),
            delay,
            yielded_first: false,
        }
    }
}

#[async_trait]
impl BatchSource for ReplaySource {
    async fn next_batch(&mut self) -> Result<SourceEvent> {
        // No delay before the first batch
        if self.yielded_first && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.batches.next() {
            Some(b) => {
                self.yielded_first = true;
                Ok(SourceEvent::Batch(b))
            }
            None => Ok(SourceEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}
