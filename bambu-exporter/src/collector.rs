//! Per-scrape orchestration: connect, subscribe, wait for a report, emit,
//! disconnect.
//!
//! A scrape owns its transport session from connect to disconnect and the
//! disconnect step runs on every path that opened one, including emission
//! errors and panics. An unreachable printer or an empty store is a normal
//! outcome with zero samples, not an error.

use crate::config::ExporterConfig;
use crate::decoder::ReportHandler;
use crate::health::HealthTracker;
use crate::metrics::{describe, emit, Descriptor, EmitError, MetricSink};
use crate::models::{pushall_request, request_topic};
use crate::state::SnapshotStore;
use crate::transport::{Session, Transport, TransportError};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    pub topic: String,
    pub grace: Duration,
    pub disconnect_timeout: Duration,
    pub request_full_report: bool,
}

impl From<&ExporterConfig> for ScrapeSettings {
    fn from(cfg: &ExporterConfig) -> Self {
        Self {
            topic: cfg.mqtt.topic.clone(),
            grace: cfg.scrape.grace(),
            disconnect_timeout: cfg.scrape.disconnect_timeout(),
            request_full_report: cfg.mqtt.pushall,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeOutcome {
    /// Number of samples written to the sink.
    Emitted(usize),
    /// Connected, but no report has been accepted yet.
    NoData,
    /// The broker could not be reached; nothing was opened.
    Unreachable,
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("metric emission failed: {0}")]
    Emit(#[from] EmitError),
    #[error("metric emission panicked")]
    EmitPanicked,
}

pub struct ScrapeCollector<T: Transport> {
    transport: T,
    store: SnapshotStore,
    handler: ReportHandler,
    health: HealthTracker,
    descriptors: Vec<Descriptor>,
    settings: ScrapeSettings,
}

impl<T: Transport> ScrapeCollector<T> {
    pub fn new(
        transport: T,
        store: SnapshotStore,
        health: HealthTracker,
        settings: ScrapeSettings,
    ) -> Self {
        Self {
            handler: ReportHandler::new(store.clone(), health.clone()),
            transport,
            store,
            health,
            descriptors: describe(),
            settings,
        }
    }

    pub fn describe(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn settings(&self) -> &ScrapeSettings {
        &self.settings
    }

    /// Runs one scrape and writes its samples into `sink`.
    ///
    /// On `Err` the sink may hold a partial sample set and must be discarded.
    pub async fn collect<S>(&self, sink: &mut S) -> Result<ScrapeOutcome, ScrapeError>
    where
        S: MetricSink + Send,
    {
        let mut session = match self.transport.connect().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "printer unreachable, scrape returns no samples");
                self.health.mark_unreachable(&e);
                let outcome = Ok(ScrapeOutcome::Unreachable);
                self.health.record_scrape(&outcome);
                return outcome;
            }
        };
        // released on every exit, including a dropped scrape future
        let open = self.health.session_opened();

        let result = self.harvest(&mut session, sink).await;

        if let Err(e) = session.disconnect(self.settings.disconnect_timeout).await {
            debug!(error = %e, "disconnect did not complete cleanly");
        }
        drop(open);
        self.health.record_scrape(&result);

        match &result {
            Ok(ScrapeOutcome::Emitted(n)) => debug!(samples = n, "scrape complete"),
            Ok(_) => info!("no printer report available yet, scrape returns no samples"),
            Err(e) => warn!(error = %e, "scrape failed"),
        }
        result
    }

    async fn harvest<S>(
        &self,
        session: &mut T::Session,
        sink: &mut S,
    ) -> Result<ScrapeOutcome, ScrapeError>
    where
        S: MetricSink + Send,
    {
        let topic = &self.settings.topic;
        session
            .subscribe(topic, self.handler.clone().into_delivery())
            .await?;
        debug!(%topic, "subscribed");

        if self.settings.request_full_report {
            if let Some(request) = request_topic(topic) {
                if let Err(e) = session.publish(&request, pushall_request()).await {
                    warn!(error = %e, "full report request failed, waiting for regular pushes");
                }
            }
        }

        tokio::time::sleep(self.settings.grace).await;

        let Some(snapshot) = self.store.read() else {
            return Ok(ScrapeOutcome::NoData);
        };

        let emitted = catch_unwind(AssertUnwindSafe(|| emit(&snapshot, sink)))
            .map_err(|_| ScrapeError::EmitPanicked)??;
        Ok(ScrapeOutcome::Emitted(emitted))
    }
}
