//! Broadcast Hub - fans scored samples out to every live subscriber
//!
//! The hub is a single-owner actor: the subscriber set lives inside
//! [`BroadcastHub`] and is only touched from its command loop. Everything
//! else talks to it through a cloneable [`HubHandle`].
//!
//! Because commands are processed one at a time, a publish delivers to
//! exactly the subscribers registered when it is dequeued. A subscribe or
//! unsubscribe that arrives mid-publish is applied after that publish
//! finishes.
//!
//! Within one publish all sends run concurrently, each bounded by the
//! delivery timeout. A subscriber whose send fails or times out is removed
//! once the publish completes and is never retried.

pub mod subscriber;

pub use subscriber::{ChannelSubscriber, DeliveryError, Subscriber};

use futures::future::join_all;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::HubConfig;

// ============================================================================
// Types
// ============================================================================

/// Opaque registration handle returned by [`HubHandle::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Broadcast hub is no longer running")]
    Closed,

    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Subscribers that accepted the message
    pub delivered: usize,
    /// Subscribers removed because their send failed or timed out
    pub pruned: usize,
}

// ============================================================================
// Commands
// ============================================================================

enum HubCommand {
    Subscribe {
        subscriber: Box<dyn Subscriber>,
        reply: oneshot::Sender<SubscriberId>,
    },
    Unsubscribe {
        id: SubscriberId,
        reply: oneshot::Sender<bool>,
    },
    Publish {
        text: String,
        reply: oneshot::Sender<PublishReport>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable handle to the hub actor.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Register a subscriber; it receives every message published after this returns.
    pub async fn subscribe<S: Subscriber>(&self, subscriber: S) -> Result<SubscriberId, HubError> {
        let (reply, rx) = oneshot::channel();
        self.command(HubCommand::Subscribe {
            subscriber: Box::new(subscriber),
            reply,
        })
        .await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Remove a subscriber. Returns `false` if it was already gone (or pruned).
    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<bool, HubError> {
        let (reply, rx) = oneshot::channel();
        self.command(HubCommand::Unsubscribe { id, reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Serialize `message` once and deliver it to every current subscriber.
    pub async fn publish<M: Serialize + ?Sized>(&self, message: &M) -> Result<PublishReport, HubError> {
        let text = serde_json::to_string(message)?;
        self.publish_text(text).await
    }

    /// Deliver already-serialized text to every current subscriber.
    pub async fn publish_text(&self, text: String) -> Result<PublishReport, HubError> {
        let (reply, rx) = oneshot::channel();
        self.command(HubCommand::Publish { text, reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub async fn subscriber_count(&self) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.command(HubCommand::Count { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    async fn command(&self, cmd: HubCommand) -> Result<(), HubError> {
        self.tx.send(cmd).await.map_err(|_| HubError::Closed)
    }
}

// ============================================================================
// Actor
// ============================================================================

pub struct BroadcastHub {
    rx: mpsc::Receiver<HubCommand>,
    /// Registration order is delivery-attempt order
    subscribers: Vec<(SubscriberId, Box<dyn Subscriber>)>,
    next_id: u64,
    delivery_timeout: Duration,
    messages_published: u64,
    subscribers_pruned: u64,
}

impl BroadcastHub {
    pub fn new(config: &HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));

        let hub = Self {
            rx,
            subscribers: Vec::new(),
            next_id: 1,
            delivery_timeout: config.delivery_timeout(),
            messages_published: 0,
            subscribers_pruned: 0,
        };

        (hub, HubHandle { tx })
    }

    /// Process commands until every [`HubHandle`] is dropped.
    pub async fn run(mut self) {
        info!("[BroadcastHub] Starting");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                HubCommand::Subscribe { subscriber, reply } => {
                    let id = SubscriberId(self.next_id);
                    self.next_id += 1;
                    info!(
                        subscriber = %id,
                        label = subscriber.label(),
                        total = self.subscribers.len() + 1,
                        "[BroadcastHub] Subscriber registered"
                    );
                    self.subscribers.push((id, subscriber));
                    let _ = reply.send(id);
                }
                HubCommand::Unsubscribe { id, reply } => {
                    let removed = self.remove(id);
                    if removed {
                        info!(subscriber = %id, total = self.subscribers.len(), "[BroadcastHub] Subscriber removed");
                    }
                    let _ = reply.send(removed);
                }
                HubCommand::Publish { text, reply } => {
                    let report = self.deliver(&text).await;
                    let _ = reply.send(report);
                }
                HubCommand::Count { reply } => {
                    let _ = reply.send(self.subscribers.len());
                }
            }
        }

        info!(
            published = self.messages_published,
            pruned = self.subscribers_pruned,
            "[BroadcastHub] Stopped"
        );
    }

    async fn deliver(&mut self, text: &str) -> PublishReport {
        self.messages_published += 1;
        if self.subscribers.is_empty() {
            return PublishReport::default();
        }

        let timeout = self.delivery_timeout;
        let outcomes = join_all(self.subscribers.iter().map(|(id, sub)| async move {
            let outcome = match tokio::time::timeout(timeout, sub.send(text)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout(timeout)),
            };
            (*id, outcome)
        }))
        .await;

        let failed: Vec<SubscriberId> = outcomes
            .into_iter()
            .filter_map(|(id, outcome)| match outcome {
                Ok(()) => None,
                Err(e) => {
                    warn!(subscriber = %id, error = %e, "[BroadcastHub] Delivery failed, pruning subscriber");
                    Some(id)
                }
            })
            .collect();

        let attempted = self.subscribers.len();
        if !failed.is_empty() {
            self.subscribers.retain(|(id, _)| !failed.contains(id));
            self.subscribers_pruned += failed.len() as u64;
            debug!(remaining = self.subscribers.len(), "[BroadcastHub] Pruned failed subscribers");
        }

        PublishReport {
            delivered: attempted - failed.len(),
            pruned: failed.len(),
        }
    }

    fn remove(&mut self, id: SubscriberId) -> bool {
        match self.subscribers.iter().position(|(sid, _)| *sid == id) {
            Some(idx) => {
                self.subscribers.remove(idx);
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    #[derive(Clone, Default)]
    struct Recorder {
        received: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn messages(&self) -> Vec<String> {
            self.received.lock().expect("recorder lock").clone()
        }
    }

    #[async_trait]
    impl Subscriber for Recorder {
        async fn send(&self, text: &str) -> Result<(), DeliveryError> {
            self.received.lock().expect("recorder lock").push(text.to_owned());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Subscriber for Broken {
        async fn send(&self, _text: &str) -> Result<(), DeliveryError> {
            Err(DeliveryError::Disconnected)
        }
    }

    struct Stalled;

    #[async_trait]
    impl Subscriber for Stalled {
        async fn send(&self, _text: &str) -> Result<(), DeliveryError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    /// Signals `entered` on each send, then waits for `gate`.
    struct Gated {
        entered: Arc<Notify>,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Subscriber for Gated {
        async fn send(&self, _text: &str) -> Result<(), DeliveryError> {
            self.entered.notify_one();
            self.gate.notified().await;
            Ok(())
        }
    }

    fn start(delivery_timeout_ms: u64) -> HubHandle {
        let config = HubConfig {
            delivery_timeout_ms,
            ..HubConfig::default()
        };
        let (hub, handle) = BroadcastHub::new(&config);
        tokio::spawn(hub.run());
        handle
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = start(1000);
        let a = Recorder::default();
        let b = Recorder::default();
        hub.subscribe(a.clone()).await.expect("subscribe");
        hub.subscribe(b.clone()).await.expect("subscribe");

        let report = hub.publish(&serde_json::json!({"n": 1})).await.expect("publish");
        assert_eq!(report, PublishReport { delivered: 2, pruned: 0 });
        assert_eq!(a.messages(), vec![r#"{"n":1}"#]);
        assert_eq!(b.messages(), vec![r#"{"n":1}"#]);
    }

    #[tokio::test]
    async fn test_failing_subscriber_pruned_without_affecting_others() {
        let hub = start(1000);
        let healthy = Recorder::default();
        hub.subscribe(Broken).await.expect("subscribe");
        hub.subscribe(healthy.clone()).await.expect("subscribe");

        let report = hub.publish_text("first".into()).await.expect("publish");
        assert_eq!(report, PublishReport { delivered: 1, pruned: 1 });
        assert_eq!(hub.subscriber_count().await.expect("count"), 1);

        let report = hub.publish_text("second".into()).await.expect("publish");
        assert_eq!(report, PublishReport { delivered: 1, pruned: 0 });
        assert_eq!(healthy.messages(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_times_out() {
        let hub = start(50);
        let healthy = Recorder::default();
        hub.subscribe(Stalled).await.expect("subscribe");
        hub.subscribe(healthy.clone()).await.expect("subscribe");

        let report = hub.publish_text("tick".into()).await.expect("publish");
        assert_eq!(report, PublishReport { delivered: 1, pruned: 1 });
        assert_eq!(healthy.messages(), vec!["tick"]);
        assert_eq!(hub.subscriber_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_per_subscriber_order_matches_publish_order() {
        let hub = start(1000);
        let rec = Recorder::default();
        hub.subscribe(rec.clone()).await.expect("subscribe");

        for i in 0..50 {
            hub.publish(&i).await.expect("publish");
        }
        let expected: Vec<String> = (0..50).map(|i: i32| i.to_string()).collect();
        assert_eq!(rec.messages(), expected);
    }

    #[tokio::test]
    async fn test_subscribe_during_publish_waits_for_next_message() {
        let hub = start(5000);
        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        hub.subscribe(Gated {
            entered: Arc::clone(&entered),
            gate: Arc::clone(&gate),
        })
        .await
        .expect("subscribe");

        let in_flight = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.publish_text("during".into()).await })
        };
        entered.notified().await;

        let late = Recorder::default();
        let joining = {
            let hub = hub.clone();
            let late = late.clone();
            tokio::spawn(async move { hub.subscribe(late).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        gate.notify_one();
        let report = in_flight.await.expect("join").expect("publish");
        assert_eq!(report.delivered, 1, "late subscriber not part of the in-flight snapshot");
        joining.await.expect("join").expect("subscribe");

        let after = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.publish_text("after".into()).await })
        };
        entered.notified().await;
        gate.notify_one();
        let report = after.await.expect("join").expect("publish");
        assert_eq!(report.delivered, 2);
        assert_eq!(late.messages(), vec!["after"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let hub = start(1000);
        let rec = Recorder::default();
        let id = hub.subscribe(rec.clone()).await.expect("subscribe");

        assert!(hub.unsubscribe(id).await.expect("unsubscribe"));
        assert!(!hub.unsubscribe(id).await.expect("unsubscribe"));

        let report = hub.publish_text("nobody".into()).await.expect("publish");
        assert_eq!(report, PublishReport::default());
        assert!(rec.messages().is_empty());
    }

    #[tokio::test]
    async fn test_handle_fails_once_hub_stops() {
        let (hub, handle) = BroadcastHub::new(&HubConfig::default());
        drop(hub);
        assert!(matches!(handle.publish_text("x".into()).await, Err(HubError::Closed)));
    }
}
