//! Pipeline Driver
//!
//! Wires the intake queue, anomaly scorer and broadcast hub together from a
//! single [`PipelineConfig`] and runs them as supervised tasks:
//!
//! ```text
//! Producer ──put──▶ IntakeQueue ──get──▶ Scorer ──publish──▶ BroadcastHub ──▶ Subscribers
//! ```
//!
//! Every task is spawned into one `JoinSet`; [`run_supervisor`] watches it
//! and cancels the rest on the first failure or panic. Shutdown is by
//! cancellation only; batches still in the queue are dropped.

pub mod scoring_loop;

pub use scoring_loop::{ScoringLoop, ScoringStats};

use anyhow::Result;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::ApiState;
use crate::config::PipelineConfig;
use crate::hub::{BroadcastHub, HubHandle};
use crate::intake::{BatchReceiver, BatchSender, IntakeQueue};
use crate::model::{IsolationForestTrainer, ModelTrainer};
use crate::producer::{run_producer, BatchSource};
use crate::scoring::{status_cell, AnomalyScorer, StatusCell};

// ============================================================================
// Task Names
// ============================================================================

/// Identity of a supervised task, returned when it exits cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskName {
    Producer,
    Scorer,
    BroadcastHub,
    HttpServer,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Producer => write!(f, "Producer"),
            TaskName::Scorer => write!(f, "Scorer"),
            TaskName::BroadcastHub => write!(f, "BroadcastHub"),
            TaskName::HttpServer => write!(f, "HttpServer"),
        }
    }
}

impl TaskName {
    /// Tag a task's result with the task that produced it.
    pub fn exit(self, result: Result<()>) -> TaskExit {
        TaskExit { task: self, result }
    }
}

/// How a supervised task ended.
#[derive(Debug)]
pub struct TaskExit {
    pub task: TaskName,
    pub result: Result<()>,
}

/// Join set holding every supervised task.
pub type TaskSet = JoinSet<TaskExit>;

// ============================================================================
// Pipeline
// ============================================================================

/// All pipeline components, built but not yet running.
pub struct Pipeline<T: ModelTrainer = IsolationForestTrainer> {
    sender: BatchSender,
    receiver: BatchReceiver,
    hub: BroadcastHub,
    hub_handle: HubHandle,
    scorer: AnomalyScorer<T>,
    status: StatusCell,
    api_state: ApiState,
}

impl Pipeline {
    /// Build the pipeline with the isolation-forest model.
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_trainer(config, IsolationForestTrainer::new(config.model.clone()))
    }
}

impl<T> Pipeline<T>
where
    T: ModelTrainer + 'static,
    T::Model: 'static,
{
    pub fn with_trainer(config: &PipelineConfig, trainer: T) -> Self {
        let (sender, receiver) = IntakeQueue::bounded(config.intake.capacity);
        let (hub, hub_handle) = BroadcastHub::new(&config.hub);
        let scorer = AnomalyScorer::new(trainer, config.scorer.clone());
        let status = status_cell(scorer.status());

        let api_state = ApiState {
            hub: hub_handle.clone(),
            scorer_status: status.clone(),
            queue: sender.gauge(),
            keepalive: config.transport.keepalive(),
            subscriber_buffer: config.hub.subscriber_buffer,
        };

        info!(
            queue_capacity = config.intake.capacity,
            window = config.scorer.window_capacity,
            warmup = config.scorer.warmup_samples,
            retrain_secs = config.scorer.retrain_interval_secs,
            features = ?config.scorer.features,
            "Pipeline initialized"
        );

        Self {
            sender,
            receiver,
            hub,
            hub_handle,
            scorer,
            status,
            api_state,
        }
    }

    pub fn hub(&self) -> HubHandle {
        self.hub_handle.clone()
    }

    /// Additional producer handle. The queue closes once every sender is gone.
    pub fn sender(&self) -> BatchSender {
        self.sender.clone()
    }

    pub fn status(&self) -> StatusCell {
        self.status.clone()
    }

    /// Shared state for the HTTP/WebSocket transport.
    pub fn api_state(&self) -> ApiState {
        self.api_state.clone()
    }

    /// Spawn the hub, scorer and producer tasks into `task_set`.
    pub fn spawn<S: BatchSource>(
        self,
        mut source: S,
        task_set: &mut TaskSet,
        cancel: CancellationToken,
    ) {
        let Self {
            sender,
            receiver,
            hub,
            hub_handle,
            scorer,
            status,
            api_state: _,
        } = self;

        // Task 1: Broadcast Hub
        let hub_cancel = cancel.clone();
        task_set.spawn(async move {
            info!("[BroadcastHub] Task starting");
            tokio::select! {
                _ = hub.run() => {}
                _ = hub_cancel.cancelled() => {
                    info!("[BroadcastHub] Received shutdown signal");
                }
            }
            TaskName::BroadcastHub.exit(Ok(()))
        });

        // Task 2: Scorer
        let scoring_loop = ScoringLoop::new(scorer, receiver, hub_handle, status, cancel.clone());
        task_set.spawn(async move {
            info!("[Scorer] Task starting");
            let result = scoring_loop.run().await.map(|stats| {
                info!(
                    batches = stats.batches,
                    rejected = stats.rejected,
                    published = stats.published,
                    "[Scorer] Task finished"
                );
            });
            TaskName::Scorer.exit(result.map_err(anyhow::Error::from))
        });

        // Task 3: Producer
        task_set.spawn(async move {
            info!("[Producer] Task starting");
            let stats = run_producer(&mut source, sender, cancel).await;
            info!(
                batches = stats.batches,
                samples = stats.samples,
                "[Producer] Task finished"
            );
            TaskName::Producer.exit(Ok(()))
        });
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Watch every task until shutdown.
///
/// A task that returns normally (a producer reaching end of input, say) is
/// logged and the rest keep running. The first failure or panic cancels the
/// whole pipeline and is returned tagged with the failing task.
pub async fn run_supervisor(task_set: &mut TaskSet, cancel_token: CancellationToken) -> Result<()> {
    info!("🔒 Supervisor: {} tasks spawned, monitoring...", task_set.len());

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            joined = task_set.join_next() => {
                match joined {
                    Some(Ok(TaskExit { task, result: Ok(()) })) => {
                        info!(
                            remaining = task_set.len(),
                            "🔒 Supervisor: {} completed normally", task
                        );
                    }
                    Some(Ok(TaskExit { task, result: Err(e) })) => {
                        error!("🔒 Supervisor: {} failed, stopping pipeline: {:#}", task, e);
                        cancel_token.cancel();
                        return Err(e.context(format!("{} task failed", task)));
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked, stopping pipeline: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("🔒 Supervisor: All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
