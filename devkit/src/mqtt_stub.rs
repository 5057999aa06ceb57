/*!
Mock transport for scrape tests without a printer.

Every session opened through [`MockTransport`] is counted, records what it
subscribes to and publishes, and plays queued payloads into the handler
registered on subscribe.
*/

use async_trait::async_trait;
use bambu_exporter::transport::{DeliveryHandler, Session, Transport, TransportError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Scripted {
    payload: Vec<u8>,
    delay: Duration,
}

#[derive(Default)]
struct Inner {
    opened: AtomicUsize,
    closed: AtomicUsize,
    dropped: AtomicUsize,
    fail_connections: AtomicBool,
    fail_subscribe: AtomicBool,
    on_subscribe: Mutex<Vec<Scripted>>,
    on_publish: Mutex<Vec<Scripted>>,
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<MockMessage>>,
}

/// Cheap to clone; clones share counters and scripts.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every following `connect` fails until reset with `false`.
    pub fn fail_connections(&self, fail: bool) {
        self.inner.fail_connections.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Delivers `payload` right after the next session subscribes.
    pub fn deliver_on_subscribe(&self, payload: impl Into<Vec<u8>>) {
        self.deliver_on_subscribe_after(payload, Duration::ZERO);
    }

    pub fn deliver_on_subscribe_after(&self, payload: impl Into<Vec<u8>>, delay: Duration) {
        self.inner.on_subscribe.lock().push(Scripted {
            payload: payload.into(),
            delay,
        });
    }

    /// Delivers `payload` once the next session publishes anything, the way
    /// the printer answers a full-report request.
    pub fn reply_on_publish(&self, payload: impl Into<Vec<u8>>) {
        self.inner.on_publish.lock().push(Scripted {
            payload: payload.into(),
            delay: Duration::ZERO,
        });
    }

    pub fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Sessions closed through `disconnect`.
    pub fn closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> usize {
        self.inner.dropped.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.lock().clone()
    }

    pub fn published(&self) -> Vec<MockMessage> {
        self.inner.published.lock().clone()
    }

    pub fn find_published(&self, topic: &str) -> Vec<MockMessage> {
        self.inner
            .published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Session = MockSession;

    async fn connect(&self) -> Result<MockSession, TransportError> {
        if self.inner.fail_connections.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                broker: "mock".into(),
                reason: "connection refused".into(),
            });
        }
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(opened = self.opened(), "mock session open");
        Ok(MockSession {
            inner: self.inner.clone(),
            handler: None,
            deliveries: Vec::new(),
            open: true,
        })
    }
}

pub struct MockSession {
    inner: Arc<Inner>,
    handler: Option<DeliveryHandler>,
    deliveries: Vec<JoinHandle<()>>,
    open: bool,
}

impl MockSession {
    fn play(&mut self, scripts: Vec<Scripted>) {
        let Some(handler) = self.handler.clone() else {
            return;
        };
        for script in scripts {
            let handler = handler.clone();
            self.deliveries.push(tokio::spawn(async move {
                if !script.delay.is_zero() {
                    tokio::time::sleep(script.delay).await;
                }
                handler(&script.payload);
            }));
        }
    }

    fn stop_deliveries(&mut self) {
        for task in self.deliveries.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl Session for MockSession {
    async fn subscribe(
        &mut self,
        topic: &str,
        handler: DeliveryHandler,
    ) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        if self.inner.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::Subscribe {
                topic: topic.to_string(),
                reason: "not authorized".into(),
            });
        }
        self.inner.subscriptions.lock().push(topic.to_string());
        self.handler = Some(handler);

        let scripts = std::mem::take(&mut *self.inner.on_subscribe.lock());
        self.play(scripts);
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.inner.published.lock().push(MockMessage {
            topic: topic.to_string(),
            payload,
        });

        let scripts = std::mem::take(&mut *self.inner.on_publish.lock());
        self.play(scripts);
        Ok(())
    }

    async fn disconnect(&mut self, _timeout: Duration) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.handler = None;
        self.stop_deliveries();
        self.inner.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.stop_deliveries();
        self.inner.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_handler() -> (DeliveryHandler, Arc<AtomicUsize>) {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler: DeliveryHandler = Arc::new(move |_payload: &[u8]| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (handler, seen)
    }

    #[tokio::test]
    async fn test_session_lifecycle_counts() {
        let transport = MockTransport::new();
        let mut session = transport.connect().await.unwrap();
        session.disconnect(Duration::ZERO).await.unwrap();
        session.disconnect(Duration::ZERO).await.unwrap();
        drop(session);

        assert_eq!(transport.opened(), 1);
        assert_eq!(transport.closed(), 1);
        assert_eq!(transport.dropped(), 1);
    }

    #[tokio::test]
    async fn test_scripted_delivery_reaches_handler() {
        let transport = MockTransport::new();
        transport.deliver_on_subscribe(b"{}".to_vec());
        let (handler, seen) = counting_handler();

        let mut session = transport.connect().await.unwrap();
        session.subscribe("device/X/report", handler).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(transport.subscriptions(), vec!["device/X/report"]);
    }

    #[tokio::test]
    async fn test_publish_recorded_and_closed_session_rejects() {
        let transport = MockTransport::new();
        let mut session = transport.connect().await.unwrap();
        session.publish("device/X/request", b"hi".to_vec()).await.unwrap();
        assert_eq!(transport.find_published("device/X/request").len(), 1);

        session.disconnect(Duration::ZERO).await.unwrap();
        let err = session.publish("device/X/request", Vec::new()).await;
        assert!(matches!(err, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_failed_connect_opens_nothing() {
        let transport = MockTransport::new();
        transport.fail_connections(true);
        assert!(transport.connect().await.is_err());
        assert_eq!(transport.opened(), 0);
    }
}
