//! Anomaly Scorer
//!
//! Owns every piece of model state: the active model, the rolling window of
//! recent feature vectors, the warm-up buffer and the retrain clock.
//!
//! ## State Machine
//!
//! ```text
//! WARMING_UP ──(warm-up buffer reaches warmup_samples, fit succeeds)──▶ STEADY
//! ```
//!
//! Each batch goes through two calls so the caller can publish in between:
//!
//! 1. [`AnomalyScorer::score_batch`]: build the feature matrix, label it
//!    with the current model (or feed warm-up), stamp the samples.
//! 2. [`AnomalyScorer::absorb`]: append the batch's vectors to the window
//!    and refit when the retrain interval has elapsed.
//!
//! A failed refit leaves the previous model serving and does not move the
//! retrain clock, so the next batch tries again.

pub mod window;

pub use window::RollingWindow;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ScorerConfig, WarmupPolicy};
use crate::model::{AnomalyModel, ModelError, ModelTrainer};
use crate::types::{epoch_seconds, Batch, FeatureVector, Sample, SampleError};

// ============================================================================
// Errors
// ============================================================================

/// Batch-level scoring failures. Fatal to the batch, never to the scorer.
#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("Malformed sample at batch index {index}: {source}")]
    MalformedSample {
        index: usize,
        #[source]
        source: SampleError,
    },

    #[error("Model rejected batch: {0}")]
    Model(#[from] ModelError),
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerPhase {
    #[default]
    WarmingUp,
    Steady,
}

impl std::fmt::Display for ScorerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScorerPhase::WarmingUp => write!(f, "WARMING_UP"),
            ScorerPhase::Steady => write!(f, "STEADY"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScorerCounters {
    pub batches_scored: u64,
    pub samples_scored: u64,
    pub anomalies_flagged: u64,
    pub batches_rejected: u64,
    pub retrains: u64,
    pub retrain_failures: u64,
}

/// Point-in-time view of the scorer for the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScorerStatus {
    pub phase: ScorerPhase,
    pub model: Option<String>,
    pub model_generation: u64,
    pub features: Vec<String>,
    pub window_len: usize,
    pub window_capacity: usize,
    pub warmup_collected: usize,
    pub warmup_target: usize,
    pub retrain_interval_secs: u64,
    pub last_retrain_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub counters: ScorerCounters,
}

/// Latest [`ScorerStatus`], written by the scorer task, read lock-free by HTTP handlers.
pub type StatusCell = Arc<ArcSwap<ScorerStatus>>;

pub fn status_cell(initial: ScorerStatus) -> StatusCell {
    Arc::new(ArcSwap::from_pointee(initial))
}

// ============================================================================
// Outcomes
// ============================================================================

/// A stamped batch ready to publish, plus the vectors still to absorb.
#[derive(Debug)]
pub struct ScoredBatch {
    /// Samples to publish, in input order. Empty when warm-up output is withheld.
    pub samples: Vec<Sample>,
    /// Phase the batch was scored in.
    pub phase: ScorerPhase,
    vectors: Vec<FeatureVector>,
}

impl ScoredBatch {
    pub fn into_parts(self) -> (Vec<Sample>, Vec<FeatureVector>) {
        (self.samples, self.vectors)
    }
}

/// What [`AnomalyScorer::absorb`] did about retraining.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrainOutcome {
    /// No model yet; the warm-up fit owns the first model.
    WarmingUp,
    /// Retrain interval has not elapsed.
    NotDue,
    /// Interval elapsed but the window is too small.
    InsufficientData { have: usize, need: usize },
    /// New model installed.
    Retrained { generation: u64, samples: usize },
    /// Fit failed; previous model kept.
    Failed(ModelError),
}

// ============================================================================
// Scorer
// ============================================================================

pub struct AnomalyScorer<T: ModelTrainer> {
    trainer: T,
    config: ScorerConfig,
    model: Option<T::Model>,
    generation: u64,
    window: RollingWindow,
    warmup: Vec<FeatureVector>,
    last_retrain: Option<Instant>,
    last_retrain_at: Option<DateTime<Utc>>,
    counters: ScorerCounters,
}

impl<T: ModelTrainer> AnomalyScorer<T> {
    pub fn new(trainer: T, config: ScorerConfig) -> Self {
        Self {
            trainer,
            window: RollingWindow::new(config.window_capacity),
            warmup: Vec::with_capacity(config.warmup_samples),
            config,
            model: None,
            generation: 0,
            last_retrain: None,
            last_retrain_at: None,
            counters: ScorerCounters::default(),
        }
    }

    pub fn phase(&self) -> ScorerPhase {
        if self.model.is_some() {
            ScorerPhase::Steady
        } else {
            ScorerPhase::WarmingUp
        }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Number of models installed so far (0 during warm-up).
    pub fn model_generation(&self) -> u64 {
        self.generation
    }

    pub fn model(&self) -> Option<&T::Model> {
        self.model.as_ref()
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    pub fn counters(&self) -> &ScorerCounters {
        &self.counters
    }

    pub fn status(&self) -> ScorerStatus {
        ScorerStatus {
            phase: self.phase(),
            model: self.model.as_ref().map(|m| m.name().to_string()),
            model_generation: self.generation,
            features: self.config.features.clone(),
            window_len: self.window.len(),
            window_capacity: self.window.capacity(),
            warmup_collected: self.warmup.len(),
            warmup_target: self.config.warmup_samples,
            retrain_interval_secs: self.config.retrain_interval_secs,
            last_retrain_at: self.last_retrain_at,
            counters: self.counters.clone(),
        }
    }

    /// Score and stamp one batch.
    ///
    /// During warm-up the batch feeds the warm-up buffer instead; the batch
    /// that completes warm-up triggers the first fit and is itself returned
    /// unflagged (or withheld, per [`WarmupPolicy`]).
    pub fn score_batch(&mut self, batch: Batch, now: Instant) -> Result<ScoredBatch, ScorerError> {
        let vectors = match self.feature_matrix(&batch) {
            Ok(v) => v,
            Err(e) => {
                self.counters.batches_rejected += 1;
                return Err(e);
            }
        };
        let sent_at = epoch_seconds(Utc::now());

        let flags = match &self.model {
            None => return Ok(self.consume_warmup(batch, vectors, sent_at, now)),
            Some(model) => model.predict(&vectors),
        };
        let flags = match flags {
            Ok(f) => f,
            Err(e) => {
                self.counters.batches_rejected += 1;
                return Err(e.into());
            }
        };

        let mut samples = batch;
        let mut anomalies = 0u64;
        for (sample, &flag) in samples.iter_mut().zip(&flags) {
            sample.stamp(Some(flag), sent_at);
            anomalies += u64::from(flag);
        }

        self.counters.batches_scored += 1;
        self.counters.samples_scored += samples.len() as u64;
        self.counters.anomalies_flagged += anomalies;

        Ok(ScoredBatch {
            samples,
            phase: ScorerPhase::Steady,
            vectors,
        })
    }

    /// Append a scored batch's vectors to the window and retrain if due.
    pub fn absorb(&mut self, vectors: Vec<FeatureVector>, now: Instant) -> RetrainOutcome {
        self.window.extend(vectors);

        let Some(last) = self.last_retrain else {
            return RetrainOutcome::WarmingUp;
        };
        if now.saturating_duration_since(last) <= self.config.retrain_interval() {
            return RetrainOutcome::NotDue;
        }
        if self.window.len() < self.config.min_retrain_samples {
            return RetrainOutcome::InsufficientData {
                have: self.window.len(),
                need: self.config.min_retrain_samples,
            };
        }

        let samples = self.window.len();
        match self.trainer.fit(self.window.as_slice()) {
            Ok(model) => {
                self.install(model, now);
                self.counters.retrains += 1;
                info!(
                    generation = self.generation,
                    window = samples,
                    "[Scorer] Retrained model"
                );
                RetrainOutcome::Retrained {
                    generation: self.generation,
                    samples,
                }
            }
            Err(e) => {
                self.counters.retrain_failures += 1;
                warn!(
                    error = %e,
                    generation = self.generation,
                    "[Scorer] Retrain failed, keeping previous model"
                );
                RetrainOutcome::Failed(e)
            }
        }
    }

    /// [`score_batch`](Self::score_batch) followed by [`absorb`](Self::absorb).
    pub fn process_batch_at(
        &mut self,
        batch: Batch,
        now: Instant,
    ) -> Result<(Vec<Sample>, RetrainOutcome), ScorerError> {
        let (samples, vectors) = self.score_batch(batch, now)?.into_parts();
        let outcome = self.absorb(vectors, now);
        Ok((samples, outcome))
    }

    fn feature_matrix(&self, batch: &[Sample]) -> Result<Vec<FeatureVector>, ScorerError> {
        batch
            .iter()
            .enumerate()
            .map(|(index, s)| {
                s.feature_vector(&self.config.features)
                    .map_err(|source| ScorerError::MalformedSample { index, source })
            })
            .collect()
    }

    fn consume_warmup(
        &mut self,
        mut batch: Batch,
        vectors: Vec<FeatureVector>,
        sent_at: f64,
        now: Instant,
    ) -> ScoredBatch {
        self.warmup.extend(vectors);
        if self.warmup.len() >= self.config.warmup_samples {
            self.finish_warmup(now);
        }

        let samples = match self.config.warmup_policy {
            WarmupPolicy::EmitUnflagged => {
                for sample in &mut batch {
                    sample.stamp(None, sent_at);
                }
                batch
            }
            WarmupPolicy::Withhold => Vec::new(),
        };

        ScoredBatch {
            samples,
            phase: ScorerPhase::WarmingUp,
            vectors: Vec::new(),
        }
    }

    fn finish_warmup(&mut self, now: Instant) {
        match self.trainer.fit(&self.warmup) {
            Ok(model) => {
                let collected = std::mem::take(&mut self.warmup);
                info!(
                    samples = collected.len(),
                    model = model.name(),
                    "[Scorer] Initial model trained, warm-up complete"
                );
                self.window.extend(collected);
                self.install(model, now);
            }
            Err(e) => {
                self.counters.retrain_failures += 1;
                warn!(
                    error = %e,
                    collected = self.warmup.len(),
                    "[Scorer] Initial fit failed, continuing warm-up"
                );
                // Keep the buffer bounded while fits keep failing.
                let keep = self.config.warmup_samples.max(self.config.window_capacity);
                if self.warmup.len() > keep {
                    let excess = self.warmup.len() - keep;
                    self.warmup.drain(..excess);
                }
            }
        }
    }

    fn install(&mut self, model: T::Model, now: Instant) {
        self.model = Some(model);
        self.generation += 1;
        self.last_retrain = Some(now);
        self.last_retrain_at = Some(Utc::now());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::validate_matrix;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Flags vectors further than `radius` from the training centroid.
    struct CentroidModel {
        centroid: Vec<f64>,
        radius: f64,
    }

    impl AnomalyModel for CentroidModel {
        fn predict(&self, vectors: &[FeatureVector]) -> Result<Vec<bool>, ModelError> {
            validate_matrix(vectors, Some(self.centroid.len()))?;
            Ok(vectors.iter().map(|v| distance(v, &self.centroid) > self.radius).collect())
        }

        fn dimensions(&self) -> usize {
            self.centroid.len()
        }

        fn name(&self) -> &str {
            "centroid"
        }
    }

    #[derive(Clone, Default)]
    struct CentroidTrainer {
        fail: Arc<AtomicBool>,
        fits: Arc<AtomicUsize>,
    }

    impl ModelTrainer for CentroidTrainer {
        type Model = CentroidModel;

        #[allow(clippy::cast_precision_loss)]
        fn fit(&self, vectors: &[FeatureVector]) -> Result<CentroidModel, ModelError> {
            self.fits.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ModelError::Fit("injected failure".into()));
            }
            let dims = validate_matrix(vectors, None)?;
            let mut centroid = vec![0.0; dims];
            for v in vectors {
                for (c, x) in centroid.iter_mut().zip(v) {
                    *c += x / vectors.len() as f64;
                }
            }
            let spread = vectors.iter().map(|v| distance(v, &centroid)).fold(0.0, f64::max);
            Ok(CentroidModel {
                centroid,
                radius: spread * 2.0 + 1.0,
            })
        }
    }

    fn distance(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
    }

    fn config(warmup_samples: usize) -> ScorerConfig {
        ScorerConfig {
            window_capacity: 20,
            warmup_samples,
            retrain_interval_secs: 60,
            min_retrain_samples: 4,
            ..ScorerConfig::default()
        }
    }

    fn batch(values: &[f64]) -> Batch {
        let names = ScorerConfig::default().features;
        values
            .iter()
            .enumerate()
            .map(|(i, &x)| Sample::with_features(format!("S{}", i), Utc::now(), &names, &[x; 4]))
            .collect()
    }

    /// Scorer already past warm-up at `t0`, trained on values near 10.
    fn warmed(trainer: CentroidTrainer) -> (AnomalyScorer<CentroidTrainer>, Instant) {
        let t0 = Instant::now();
        let mut scorer = AnomalyScorer::new(trainer, config(4));
        scorer
            .process_batch_at(batch(&[10.0, 10.5, 9.5, 10.0]), t0)
            .expect("warm-up batch");
        assert!(scorer.has_model());
        (scorer, t0)
    }

    #[test]
    fn test_warmup_fits_exactly_once_at_threshold() {
        let trainer = CentroidTrainer::default();
        let fits = Arc::clone(&trainer.fits);
        let mut scorer = AnomalyScorer::new(trainer, config(6));
        let t0 = Instant::now();

        for _ in 0..2 {
            let (samples, outcome) = scorer.process_batch_at(batch(&[1.0, 2.0]), t0).expect("batch");
            assert_eq!(outcome, RetrainOutcome::WarmingUp);
            assert!(!scorer.has_model());
            assert!(samples.iter().all(|s| s.is_anomaly.is_none() && s.sent_at.is_some()));
        }
        assert_eq!(fits.load(Ordering::SeqCst), 0);

        let (samples, _) = scorer.process_batch_at(batch(&[1.5, 2.5]), t0).expect("batch");
        assert!(scorer.has_model());
        assert_eq!(scorer.phase(), ScorerPhase::Steady);
        assert_eq!(scorer.model_generation(), 1);
        assert_eq!(scorer.window().len(), 6, "window seeded with every warm-up vector");
        assert!(samples.iter().all(|s| s.is_anomaly.is_none()));

        let (samples, outcome) = scorer.process_batch_at(batch(&[2.0]), t0).expect("batch");
        assert_eq!(outcome, RetrainOutcome::NotDue);
        assert_eq!(samples[0].is_anomaly, Some(false));
        assert_eq!(fits.load(Ordering::SeqCst), 1);
        assert_eq!(scorer.window().len(), 7);
    }

    #[test]
    fn test_withhold_policy_emits_nothing_during_warmup() {
        let mut cfg = config(4);
        cfg.warmup_policy = WarmupPolicy::Withhold;
        let mut scorer = AnomalyScorer::new(CentroidTrainer::default(), cfg);
        let t0 = Instant::now();

        let scored = scorer.score_batch(batch(&[1.0, 2.0]), t0).expect("batch");
        assert!(scored.samples.is_empty());
        assert_eq!(scored.phase, ScorerPhase::WarmingUp);

        scorer.score_batch(batch(&[1.0, 2.0]), t0).expect("batch");
        let scored = scorer.score_batch(batch(&[1.0]), t0).expect("batch");
        assert_eq!(scored.phase, ScorerPhase::Steady);
        assert_eq!(scored.samples.len(), 1);
    }

    #[test]
    fn test_outlier_flagged_in_steady_state() {
        let (mut scorer, t0) = warmed(CentroidTrainer::default());
        let (samples, _) = scorer
            .process_batch_at(batch(&[10.0, 10.0, 500.0]), t0)
            .expect("batch");
        let flags: Vec<_> = samples.iter().map(|s| s.is_anomaly).collect();
        assert_eq!(flags, vec![Some(false), Some(false), Some(true)]);
        assert_eq!(scorer.counters().anomalies_flagged, 1);
        assert_eq!(scorer.counters().samples_scored, 3);

        let shared = samples[0].sent_at;
        assert!(samples.iter().all(|s| s.sent_at == shared), "one timestamp per batch");
    }

    #[test]
    fn test_retrain_respects_interval() {
        let (mut scorer, t0) = warmed(CentroidTrainer::default());

        let at = |secs| t0 + Duration::from_secs(secs);
        assert_eq!(scorer.process_batch_at(batch(&[10.0]), at(30)).expect("b").1, RetrainOutcome::NotDue);
        assert_eq!(scorer.process_batch_at(batch(&[10.0]), at(60)).expect("b").1, RetrainOutcome::NotDue);
        assert!(matches!(
            scorer.process_batch_at(batch(&[10.0]), at(61)).expect("b").1,
            RetrainOutcome::Retrained { generation: 2, samples: 7 }
        ));
        // Clock restarted at t0 + 61
        assert_eq!(scorer.process_batch_at(batch(&[10.0]), at(100)).expect("b").1, RetrainOutcome::NotDue);
        assert!(matches!(
            scorer.process_batch_at(batch(&[10.0]), at(122)).expect("b").1,
            RetrainOutcome::Retrained { generation: 3, .. }
        ));
        assert_eq!(scorer.counters().retrains, 2);
    }

    #[test]
    fn test_retrain_waits_for_minimum_window() {
        let mut cfg = config(2);
        cfg.min_retrain_samples = 10;
        let mut scorer = AnomalyScorer::new(CentroidTrainer::default(), cfg);
        let t0 = Instant::now();
        scorer.process_batch_at(batch(&[1.0, 1.0]), t0).expect("warm-up");

        let (_, outcome) = scorer
            .process_batch_at(batch(&[1.0]), t0 + Duration::from_secs(120))
            .expect("batch");
        assert_eq!(outcome, RetrainOutcome::InsufficientData { have: 3, need: 10 });
        assert_eq!(scorer.model_generation(), 1);
    }

    #[test]
    fn test_failed_retrain_keeps_previous_model_and_clock() {
        let trainer = CentroidTrainer::default();
        let fail = Arc::clone(&trainer.fail);
        let (mut scorer, t0) = warmed(trainer);
        let at = |secs| t0 + Duration::from_secs(secs);

        fail.store(true, Ordering::SeqCst);
        // Far-off values in the window would move the centroid if a refit succeeded
        let (_, outcome) = scorer.process_batch_at(batch(&[300.0, 300.0]), at(61)).expect("b");
        assert!(matches!(outcome, RetrainOutcome::Failed(ModelError::Fit(_))));
        assert_eq!(scorer.model_generation(), 1);

        // Old model still serving: 300 remains anomalous
        let (samples, outcome) = scorer.process_batch_at(batch(&[300.0]), at(62)).expect("b");
        assert_eq!(samples[0].is_anomaly, Some(true));
        assert!(
            matches!(outcome, RetrainOutcome::Failed(_)),
            "clock not reset, so the next batch retries"
        );
        assert_eq!(scorer.counters().retrain_failures, 2);

        fail.store(false, Ordering::SeqCst);
        let (_, outcome) = scorer.process_batch_at(batch(&[10.0]), at(63)).expect("b");
        assert!(matches!(outcome, RetrainOutcome::Retrained { generation: 2, .. }));
    }

    #[test]
    fn test_failed_warmup_fit_keeps_warming() {
        let trainer = CentroidTrainer::default();
        trainer.fail.store(true, Ordering::SeqCst);
        let fail = Arc::clone(&trainer.fail);
        let mut scorer = AnomalyScorer::new(trainer, config(2));
        let t0 = Instant::now();

        scorer.process_batch_at(batch(&[1.0, 2.0]), t0).expect("batch");
        assert!(!scorer.has_model());

        fail.store(false, Ordering::SeqCst);
        scorer.process_batch_at(batch(&[1.0]), t0).expect("batch");
        assert!(scorer.has_model());
        assert_eq!(scorer.window().len(), 3);
    }

    #[test]
    fn test_malformed_batch_rejected_without_side_effects() {
        let (mut scorer, t0) = warmed(CentroidTrainer::default());
        let window_before = scorer.window().len();

        let mut bad = batch(&[10.0, 10.0]);
        bad[1].fields.remove("prb");
        let err = scorer.score_batch(bad, t0).unwrap_err();
        assert!(matches!(err, ScorerError::MalformedSample { index: 1, .. }));
        assert_eq!(scorer.window().len(), window_before);
        assert_eq!(scorer.counters().batches_rejected, 1);

        let (samples, _) = scorer.process_batch_at(batch(&[10.0]), t0).expect("valid batch");
        assert_eq!(samples[0].is_anomaly, Some(false));
    }

    #[tokio::test]
    async fn test_pre_stamped_stdin_line_rejects_only_its_batch() {
        use crate::producer::{BatchSource, JsonLinesSource, SourceEvent};

        let (mut scorer, t0) = warmed(CentroidTrainer::default());
        let input = concat!(
            r#"[{"sector_id":"A","timestamp":"2024-05-01T10:00:00Z","payload":10.0,"thr":10.0,"prb":10.0,"avail":10.0,"sent_at":1.0}]"#,
            "\n",
            r#"[{"sector_id":"B","timestamp":"2024-05-01T10:00:02Z","payload":10.0,"thr":10.0,"prb":10.0,"avail":10.0}]"#,
            "\n"
        );
        let mut source = JsonLinesSource::new(input.as_bytes(), "test");

        let SourceEvent::Batch(stamped) = source.next_batch().await.expect("read") else {
            panic!("expected a batch");
        };
        let err = scorer.score_batch(stamped, t0).unwrap_err();
        assert!(matches!(
            err,
            ScorerError::MalformedSample {
                index: 0,
                source: SampleError::AlreadyAnnotated { .. }
            }
        ));
        assert_eq!(scorer.counters().batches_rejected, 1);

        let SourceEvent::Batch(clean) = source.next_batch().await.expect("read") else {
            panic!("expected a batch");
        };
        let (samples, _) = scorer.process_batch_at(clean, t0).expect("clean batch");
        assert_eq!(samples[0].entity_id, "B");
        assert!(samples[0].is_stamped());
    }

    #[test]
    fn test_status_reflects_progress() {
        let mut scorer = AnomalyScorer::new(CentroidTrainer::default(), config(4));
        let status = scorer.status();
        assert_eq!(status.phase, ScorerPhase::WarmingUp);
        assert_eq!(status.model, None);
        assert_eq!(status.warmup_target, 4);

        scorer.process_batch_at(batch(&[1.0, 1.0]), Instant::now()).expect("batch");
        assert_eq!(scorer.status().warmup_collected, 2);

        scorer.process_batch_at(batch(&[1.0, 1.0]), Instant::now()).expect("batch");
        let status = scorer.status();
        assert_eq!(status.phase, ScorerPhase::Steady);
        assert_eq!(status.model.as_deref(), Some("centroid"));
        assert_eq!(status.warmup_collected, 0);
        assert_eq!(status.window_len, 4);
        assert!(status.last_retrain_at.is_some());
    }
}
