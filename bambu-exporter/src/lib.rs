//! Bambu Lab printer telemetry exporter.
//!
//! Every Prometheus scrape opens a short-lived MQTT session to the printer,
//! waits briefly for a report, and renders the latest decoded snapshot as
//! gauges.

pub mod collector;
pub mod config;
pub mod decoder;
pub mod exposition;
pub mod health;
pub mod http;
pub mod metrics;
pub mod models;
pub mod mqtt;
pub mod snapshot;
pub mod state;
pub mod transport;

pub use collector::{ScrapeCollector, ScrapeError, ScrapeOutcome, ScrapeSettings};
pub use config::{ConfigError, ExporterConfig};
pub use decoder::{decode, DecodeError, IngestOutcome, ReportHandler};
pub use health::{ExporterHealth, HealthTracker};
pub use metrics::{emit, EmitError, Metric, MetricSink, Sample};
pub use snapshot::{AmsUnit, TelemetrySnapshot, Tray};
pub use state::SnapshotStore;
pub use transport::{DeliveryHandler, Session, Transport, TransportError};
