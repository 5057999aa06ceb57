//! rumqttc-backed [`Transport`].
//!
//! Each session builds its own `AsyncClient`, waits for the broker's ConnAck
//! and then hands the event loop to a spawned task that dispatches incoming
//! publishes to the subscription handler.

use crate::config::MqttConf;
use crate::state::{new_state, Shared};
use crate::transport::{DeliveryHandler, Session, Transport, TransportError};
use async_trait::async_trait;
use rumqttc::tokio_rustls::rustls::{
    self,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, SignatureScheme,
};
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS, SubAck,
    SubscribeReasonCode, TlsConfiguration,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

const KEEP_ALIVE: Duration = Duration::from_secs(15);
const REQUEST_CAPACITY: usize = 10;
// the printer pushes reports at QoS 1
const SUBSCRIBE_QOS: QoS = QoS::AtLeastOnce;
// full reports with several AMS units run past rumqttc's 10 KiB default
const MAX_PACKET_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct MqttTransport {
    conf: MqttConf,
    connect_timeout: Duration,
}

impl MqttTransport {
    pub fn new(conf: MqttConf, connect_timeout: Duration) -> Self {
        Self {
            conf,
            connect_timeout,
        }
    }

    pub fn broker_address(&self) -> String {
        self.conf.broker()
    }

    /// A fresh id per session, so an old session the broker has not yet
    /// expired never kicks the new one off.
    pub fn client_id(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.conf.client_id_prefix, &suffix[..12])
    }

    fn options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(self.client_id(), &self.conf.host, self.conf.port);
        opts.set_keep_alive(KEEP_ALIVE);
        opts.set_clean_session(true);
        opts.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        opts.set_credentials(&self.conf.username, &self.conf.password);
        if self.conf.tls {
            opts.set_transport(rumqttc::Transport::tls_with_config(
                TlsConfiguration::Rustls(Arc::new(insecure_tls_config())),
            ));
        }
        opts
    }
}

#[async_trait]
impl Transport for MqttTransport {
    type Session = MqttSession;

    async fn connect(&self) -> Result<MqttSession, TransportError> {
        let broker = self.broker_address();
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);

        tokio::time::timeout(self.connect_timeout, wait_for_connack(&mut eventloop, &broker))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout, "connack"))??;
        debug!(%broker, "mqtt session open");

        let handler: Shared<Option<DeliveryHandler>> = new_state(None);
        let (suback_tx, suback_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_event_loop(eventloop, handler.clone(), suback_tx));

        Ok(MqttSession {
            client,
            handler,
            subacks: suback_rx,
            ack_timeout: self.connect_timeout,
            task: Some(task),
        })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop, broker: &str) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(TransportError::Refused(format!("{code:?}")));
            }
            Err(e) => {
                return Err(TransportError::Connect {
                    broker: broker.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    handler: Shared<Option<DeliveryHandler>>,
    subacks: mpsc::UnboundedSender<SubAck>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                trace!(topic = %p.topic, bytes = p.payload.len(), "publish received");
                // clone out so the handler never runs under the lock
                let deliver = handler.lock().clone();
                if let Some(deliver) = deliver {
                    deliver(&p.payload);
                }
            }
            Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                // receiver gone means the session was dropped; nothing to tell
                let _ = subacks.send(ack);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "mqtt event loop stopped");
                break;
            }
        }
    }
}

/// A refused subscription comes back as a SubAck carrying a failure code,
/// not as a transport error.
fn suback_result(ack: &SubAck, topic: &str) -> Result<(), TransportError> {
    if ack.return_codes.is_empty()
        || ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
    {
        return Err(TransportError::Subscribe {
            topic: topic.to_string(),
            reason: "refused by broker".into(),
        });
    }
    Ok(())
}

pub struct MqttSession {
    client: AsyncClient,
    handler: Shared<Option<DeliveryHandler>>,
    subacks: mpsc::UnboundedReceiver<SubAck>,
    ack_timeout: Duration,
    task: Option<JoinHandle<()>>,
}

impl MqttSession {
    fn ensure_open(&self) -> Result<(), TransportError> {
        match &self.task {
            Some(task) if !task.is_finished() => Ok(()),
            _ => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl Session for MqttSession {
    async fn subscribe(
        &mut self,
        topic: &str,
        handler: DeliveryHandler,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        *self.handler.lock() = Some(handler);

        self.client
            .subscribe(topic, SUBSCRIBE_QOS)
            .await
            .map_err(|e| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        let ack = tokio::time::timeout(self.ack_timeout, self.subacks.recv())
            .await
            .map_err(|_| TransportError::Timeout(self.ack_timeout, "suback"))?
            .ok_or(TransportError::Closed)?;
        suback_result(&ack, topic)
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };
        *self.handler.lock() = None;

        if let Err(e) = self.client.try_disconnect() {
            trace!(error = %e, "disconnect request not queued");
            task.abort();
            return Ok(());
        }
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(_) => Ok(()),
            Err(_) => {
                task.abort();
                warn!(?timeout, "mqtt session did not close in time, aborted");
                Err(TransportError::Timeout(timeout, "disconnect"))
            }
        }
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Bambu printers present a self-signed certificate that no public root
/// signs, so the exporter accepts whatever the printer presents.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

fn insecure_tls_config() -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth()
}
