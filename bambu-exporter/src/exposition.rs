//! Prometheus text rendering of one scrape.
//!
//! Every scrape gets a fresh [`Registry`] with one `GaugeVec` per
//! descriptor, so series from a previous scrape never leak into the next
//! one. Families that received no samples are left out by `gather()`.

use crate::collector::ScrapeError;
use crate::metrics::{Descriptor, EmitError, Metric, MetricSink};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ExpositionError {
    #[error("metric registry: {0}")]
    Registry(#[from] prometheus::Error),
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error("scrape exceeded its {0:?} deadline")]
    Deadline(Duration),
    #[error("rendering scraped samples: {0}")]
    Encode(prometheus::Error),
}

pub struct PrometheusSink {
    registry: Registry,
    gauges: HashMap<Metric, GaugeVec>,
}

impl PrometheusSink {
    pub fn new(descriptors: &[Descriptor]) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let mut gauges = HashMap::with_capacity(descriptors.len());
        for d in descriptors {
            let gauge = GaugeVec::new(Opts::new(d.name, d.help), d.labels)?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(d.metric, gauge);
        }
        Ok(Self { registry, gauges })
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let families = self.registry.gather();
        let mut buffer = String::new();
        TextEncoder::new().encode_utf8(&families, &mut buffer)?;
        Ok(buffer)
    }

    pub fn content_type() -> String {
        TextEncoder::new().format_type().to_string()
    }
}

impl MetricSink for PrometheusSink {
    fn record(&mut self, metric: Metric, labels: &[&str], value: f64) -> Result<(), EmitError> {
        let gauge = self
            .gauges
            .get(&metric)
            .ok_or(EmitError::Unregistered(metric.name()))?;
        gauge.get_metric_with_label_values(labels)?.set(value);
        Ok(())
    }
}
