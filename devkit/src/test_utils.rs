/*!
Scrape harness for exporter tests.

Wires a [`MockTransport`] into a real [`ScrapeCollector`] with a short grace
interval, and provides sinks that fail on purpose.
*/

use crate::mqtt_stub::MockTransport;
use crate::report_builder::REPORT_TOPIC;
use anyhow::Result;
use axum::Router;
use bambu_exporter::http::{build_router, AppState};
use bambu_exporter::metrics::{EmitError, Metric, MetricSink, Sample};
use bambu_exporter::{
    ExporterHealth, HealthTracker, ScrapeCollector, ScrapeOutcome, ScrapeSettings, SnapshotStore,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const TEST_GRACE: Duration = Duration::from_millis(30);

/// Routes exporter logs to the test writer; safe to call from every test.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn test_settings() -> ScrapeSettings {
    ScrapeSettings {
        topic: REPORT_TOPIC.to_string(),
        grace: TEST_GRACE,
        disconnect_timeout: Duration::from_millis(50),
        request_full_report: true,
    }
}

pub struct ScrapeHarness {
    pub transport: MockTransport,
    pub state: AppState<MockTransport>,
}

impl Default for ScrapeHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrapeHarness {
    pub fn new() -> Self {
        Self::with_settings(test_settings(), Duration::from_secs(2))
    }

    pub fn with_settings(settings: ScrapeSettings, scrape_timeout: Duration) -> Self {
        init_tracing();
        let transport = MockTransport::new();
        let collector = ScrapeCollector::new(
            transport.clone(),
            SnapshotStore::new(),
            HealthTracker::new(),
            settings,
        );
        Self {
            transport,
            state: AppState::new(collector, scrape_timeout),
        }
    }

    pub fn collector(&self) -> &ScrapeCollector<MockTransport> {
        &self.state.collector
    }

    pub fn store(&self) -> &SnapshotStore {
        self.state.collector.store()
    }

    pub fn health(&self) -> ExporterHealth {
        self.state.health.get_health(self.store())
    }

    /// One scrape into a plain sample list.
    pub async fn scrape(&self) -> Result<(ScrapeOutcome, Vec<Sample>)> {
        let mut samples: Vec<Sample> = Vec::new();
        let outcome = self.state.collector.collect(&mut samples).await?;
        Ok((outcome, samples))
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }
}

pub fn count(samples: &[Sample], metric: Metric) -> usize {
    samples.iter().filter(|s| s.metric == metric).count()
}

pub fn value_of(samples: &[Sample], metric: Metric) -> Option<f64> {
    samples.iter().find(|s| s.metric == metric).map(|s| s.value)
}

/// Accepts `budget` samples, then rejects every following one.
#[derive(Debug, Default)]
pub struct FailingSink {
    pub budget: usize,
    pub accepted: Vec<Sample>,
}

impl FailingSink {
    pub fn after(budget: usize) -> Self {
        Self {
            budget,
            accepted: Vec::new(),
        }
    }
}

impl MetricSink for FailingSink {
    fn record(&mut self, metric: Metric, labels: &[&str], value: f64) -> Result<(), EmitError> {
        if self.accepted.len() >= self.budget {
            return Err(EmitError::Unregistered(metric.name()));
        }
        self.accepted.record(metric, labels, value)
    }
}

/// Panics on the first sample.
#[derive(Debug, Default)]
pub struct PanickingSink;

impl MetricSink for PanickingSink {
    fn record(&mut self, metric: Metric, _labels: &[&str], _value: f64) -> Result<(), EmitError> {
        panic!("sink rejected {}", metric.name());
    }
}
