//! System-wide default constants.
//!
//! Every tunable in [`PipelineConfig`](super::PipelineConfig) falls back to
//! one of these when the TOML file does not set it.

// ============================================================================
// Intake
// ============================================================================

/// Intake queue capacity (batches). A full queue blocks the producer.
pub const INTAKE_CAPACITY: usize = 1_000;

// ============================================================================
// Scorer
// ============================================================================

/// Rolling window capacity (feature vectors) used as retraining data.
pub const WINDOW_CAPACITY: usize = 2_000;

/// Samples accumulated before the first model fit.
///
/// 2 500 = 5 batches of 500 sectors.
pub const WARMUP_SAMPLES: usize = 2_500;

/// Minimum wall-clock gap between successful retrains (seconds).
pub const RETRAIN_INTERVAL_SECS: u64 = 60;

/// Minimum window fill before a retrain is attempted.
pub const MIN_RETRAIN_SAMPLES: usize = 50;

/// KPI fields that make up the feature vector, in order.
pub const FEATURES: [&str; 4] = ["payload", "thr", "prb", "avail"];

// ============================================================================
// Model
// ============================================================================

/// Trees per isolation forest.
pub const N_ESTIMATORS: usize = 100;

/// Subsample size per tree.
pub const MAX_SAMPLES: usize = 256;

/// Expected fraction of anomalies in training data.
pub const CONTAMINATION: f64 = 0.01;

/// Fixed seed so refits on identical data produce identical models.
pub const MODEL_SEED: u64 = 42;

// ============================================================================
// Broadcast Hub
// ============================================================================

/// Hub command channel capacity.
pub const HUB_COMMAND_CAPACITY: usize = 1_024;

/// Outbound buffer per WebSocket subscriber (messages).
pub const SUBSCRIBER_BUFFER: usize = 4_096;

/// Time a single subscriber send may block before the subscriber is pruned (ms).
pub const DELIVERY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// Transport
// ============================================================================

/// Idle time on a WebSocket before a keepalive ping is sent (seconds).
pub const KEEPALIVE_SECS: u64 = 60;

/// Default HTTP bind address.
pub const SERVER_ADDR: &str = "0.0.0.0:8000";

// ============================================================================
// Simulation
// ============================================================================

/// Sectors emitted per simulator tick.
pub const SIMULATOR_SECTORS: usize = 500;

/// Delay between simulator ticks (ms).
pub const SIMULATOR_INTERVAL_MS: u64 = 2_500;
