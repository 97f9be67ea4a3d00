//! Subscriber sinks registered with the broadcast hub.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a single delivery failed. The hub prunes the subscriber either way.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Subscriber disconnected")]
    Disconnected,

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// A live observer of the scored stream.
///
/// `send` may suspend (e.g. on a full socket buffer); the hub bounds every
/// call with its delivery timeout.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    async fn send(&self, text: &str) -> Result<(), DeliveryError>;

    /// Label used in hub logs.
    fn label(&self) -> &str {
        "subscriber"
    }
}

/// Forwards hub messages into a bounded channel drained by a connection task.
pub struct ChannelSubscriber {
    tx: mpsc::Sender<String>,
    label: String,
}

impl ChannelSubscriber {
    /// Create the subscriber and the receiving end for the connection task.
    pub fn channel(buffer: usize, label: impl Into<String>) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx,
                label: label.into(),
            },
            rx,
        )
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn send(&self, text: &str) -> Result<(), DeliveryError> {
        self.tx
            .send(text.to_owned())
            .await
            .map_err(|_| DeliveryError::Disconnected)
    }

    fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_subscriber_forwards_text() {
        let (sub, mut rx) = ChannelSubscriber::channel(4, "ws-1");
        sub.send("hello").await.expect("send");
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert_eq!(sub.label(), "ws-1");
    }

    #[tokio::test]
    async fn test_channel_subscriber_reports_disconnect() {
        let (sub, rx) = ChannelSubscriber::channel(4, "ws-2");
        drop(rx);
        assert_eq!(sub.send("lost").await, Err(DeliveryError::Disconnected));
    }
}
