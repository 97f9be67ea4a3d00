//! KPI Sentinel: streaming sector KPI anomaly detection
//!
//! Ingests batches of per-sector telemetry, scores every sample with an
//! adaptively retrained isolation forest, and fans the scored samples out to
//! live WebSocket subscribers.
//!
//! ## Architecture
//!
//! - **Intake Queue**: bounded FIFO of batches; a full queue suspends the producer
//! - **Anomaly Scorer**: warm-up, per-batch scoring, rolling window, cadence retrain
//! - **Broadcast Hub**: single-owner actor fanning each message out to all subscribers
//! - **Producers**: synthetic simulator, JSON lines on stdin, replay
//! - **Transport**: Axum router with the `/ws/kpi` stream and status endpoints

pub mod api;
pub mod config;
pub mod hub;
pub mod intake;
pub mod model;
pub mod pipeline;
pub mod producer;
pub mod scoring;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, PipelineConfig, WarmupPolicy};

// Re-export commonly used types
pub use types::{Batch, FeatureVector, KpiUpdate, Sample, SampleError};

// Re-export pipeline components
pub use hub::{
    BroadcastHub, ChannelSubscriber, DeliveryError, HubError, HubHandle, PublishReport, Subscriber,
    SubscriberId,
};
pub use intake::{BatchReceiver, BatchSender, IntakeError, IntakeQueue, QueueGauge};
pub use model::{AnomalyModel, IsolationForest, IsolationForestTrainer, ModelError, ModelTrainer};
pub use pipeline::{run_supervisor, Pipeline, TaskExit, TaskName, TaskSet};
pub use producer::{run_producer, BatchSource, KpiSimulator, SourceEvent, StdinSource};
pub use scoring::{AnomalyScorer, RetrainOutcome, ScorerError, ScorerPhase, ScorerStatus};
