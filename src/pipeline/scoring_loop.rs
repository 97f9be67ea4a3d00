//! Scorer task: intake queue -> anomaly scorer -> broadcast hub.
//!
//! Per batch: `get` -> `score_batch` -> publish every sample as a
//! [`KpiUpdate`] in batch order -> `absorb` (window append + retrain check)
//! -> refresh the shared status snapshot.

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hub::{HubError, HubHandle};
use crate::intake::BatchReceiver;
use crate::model::ModelTrainer;
use crate::scoring::{AnomalyScorer, RetrainOutcome, ScorerPhase, StatusCell};
use crate::types::{Batch, KpiUpdate};

/// Totals reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoringStats {
    pub batches: u64,
    pub rejected: u64,
    pub published: u64,
}

pub struct ScoringLoop<T: ModelTrainer> {
    scorer: AnomalyScorer<T>,
    receiver: BatchReceiver,
    hub: HubHandle,
    status: StatusCell,
    cancel: CancellationToken,
    stats: ScoringStats,
}

impl<T: ModelTrainer> ScoringLoop<T> {
    pub fn new(
        scorer: AnomalyScorer<T>,
        receiver: BatchReceiver,
        hub: HubHandle,
        status: StatusCell,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scorer,
            receiver,
            hub,
            status,
            cancel,
            stats: ScoringStats::default(),
        }
    }

    /// Run until the queue is closed and drained, or cancellation.
    ///
    /// Fails only if the hub stops while the pipeline is still live.
    pub async fn run(mut self) -> Result<ScoringStats, HubError> {
        info!("[Scorer] Waiting for batches");

        loop {
            let batch = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("[Scorer] Shutdown signal received");
                    break;
                }
                next = self.receiver.get() => match next {
                    Some(b) => b,
                    None => {
                        info!(batches = self.stats.batches, "[Scorer] Intake queue closed and drained");
                        break;
                    }
                }
            };

            match self.process(batch).await {
                Ok(()) => {}
                Err(HubError::Closed) if self.cancel.is_cancelled() => break,
                Err(e) => return Err(e),
            }
        }

        Ok(self.stats)
    }

    async fn process(&mut self, batch: Batch) -> Result<(), HubError> {
        let now = Instant::now();
        self.stats.batches += 1;

        let scored = match self.scorer.score_batch(batch, now) {
            Ok(s) => s,
            Err(e) => {
                self.stats.rejected += 1;
                warn!(error = %e, "[Scorer] Batch rejected");
                self.refresh_status();
                return Ok(());
            }
        };

        let phase = scored.phase;
        let (samples, vectors) = scored.into_parts();
        let mut anomalies = 0usize;
        for sample in &samples {
            self.hub.publish(&KpiUpdate::new(sample)).await?;
            anomalies += usize::from(sample.is_anomaly == Some(true));
        }
        self.stats.published += samples.len() as u64;

        // Retrain success and failure are logged by the scorer itself
        if let RetrainOutcome::InsufficientData { have, need } = self.scorer.absorb(vectors, now) {
            debug!(have, need, "[Scorer] Retrain due but window too small");
        }

        if phase == ScorerPhase::Steady && anomalies > 0 {
            info!(
                samples = samples.len(),
                anomalies,
                generation = self.scorer.model_generation(),
                "🚨 Anomalies flagged"
            );
        } else {
            debug!(samples = samples.len(), phase = %phase, "[Scorer] Batch published");
        }

        self.refresh_status();
        Ok(())
    }

    fn refresh_status(&self) {
        self.status.store(Arc::new(self.scorer.status()));
    }
}
