//! Seam between the scrape collector and the message broker.
//!
//! A [`Transport`] opens one [`Session`] per scrape. The session owns its
//! connection; payloads published on a subscribed topic are handed to the
//! registered [`DeliveryHandler`] from a task owned by the session.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked for every payload delivered on a subscription.
pub type DeliveryHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {broker} failed: {reason}")]
    Connect { broker: String, reason: String },
    #[error("broker refused the connection: {0}")]
    Refused(String),
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, &'static str),
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("session already closed")]
    Closed,
}

#[async_trait]
pub trait Transport: Send + Sync {
    type Session: Session;

    /// Opens and authenticates a new session.
    async fn connect(&self) -> Result<Self::Session, TransportError>;
}

#[async_trait]
pub trait Session: Send {
    async fn subscribe(
        &mut self,
        topic: &str,
        handler: DeliveryHandler,
    ) -> Result<(), TransportError>;

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Closes the session, waiting at most `timeout` for a clean shutdown.
    /// Calling it twice is a no-op.
    async fn disconnect(&mut self, timeout: Duration) -> Result<(), TransportError>;
}
