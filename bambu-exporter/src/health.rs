use crate::collector::{ScrapeError, ScrapeOutcome};
use crate::decoder::IngestOutcome;
use crate::state::{new_state, Shared, SnapshotStore};
use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Serialize, Deserialize)]
pub struct ExporterHealth {
    pub uptime_seconds: u64,
    pub scrapes_total: u64,
    pub scrapes_without_data: u64,
    pub scrape_failures: u64,
    pub connect_failures: u64,
    pub reports_accepted: u64,
    pub reports_ignored: u64,
    pub reports_malformed: u64,
    pub transport_status: String,
    pub open_sessions: u64,
    pub last_report_at: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    scrapes_total: AtomicU64,
    scrapes_without_data: AtomicU64,
    scrape_failures: AtomicU64,
    connect_failures: AtomicU64,
    reports_accepted: AtomicU64,
    reports_ignored: AtomicU64,
    reports_malformed: AtomicU64,
}

#[derive(Debug)]
struct TransportState {
    open_sessions: u64,
    /// Status of the last session to finish, shown while none is open.
    last: String,
}

/// Process-wide counters for the exporter itself, served on `/system/health`.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    start_time: Instant,
    counters: Arc<Counters>,
    transport: Shared<TransportState>,
}

/// Counts one open transport session until dropped.
#[must_use]
pub struct OpenSession<'a> {
    health: &'a HealthTracker,
}

impl Drop for OpenSession<'_> {
    fn drop(&mut self) {
        let mut transport = self.health.transport.lock();
        transport.open_sessions = transport.open_sessions.saturating_sub(1);
        transport.last = "idle".to_string();
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            counters: Arc::new(Counters::default()),
            transport: new_state(TransportState {
                open_sessions: 0,
                last: "idle".to_string(),
            }),
        }
    }

    /// Marks a session as open; the status reads `connected` while any
    /// guard is alive, so overlapping scrapes do not hide each other.
    pub fn session_opened(&self) -> OpenSession<'_> {
        self.transport.lock().open_sessions += 1;
        OpenSession { health: self }
    }

    pub fn mark_unreachable(&self, error: &TransportError) {
        self.counters.connect_failures.fetch_add(1, Ordering::Relaxed);
        self.transport.lock().last = format!("unreachable: {error}");
    }

    pub fn record_scrape(&self, outcome: &Result<ScrapeOutcome, ScrapeError>) {
        self.counters.scrapes_total.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(ScrapeOutcome::Emitted(_)) => {}
            Ok(ScrapeOutcome::NoData) | Ok(ScrapeOutcome::Unreachable) => {
                self.counters
                    .scrapes_without_data
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.scrape_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// A scrape that failed before the collector could record it
    /// (deadline, registry setup, encoding). Counts the attempt as well.
    pub fn record_scrape_failure(&self) {
        self.counters.scrapes_total.fetch_add(1, Ordering::Relaxed);
        self.counters.scrape_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report(&self, outcome: IngestOutcome) {
        let counter = match outcome {
            IngestOutcome::Accepted => &self.counters.reports_accepted,
            IngestOutcome::Ignored => &self.counters.reports_ignored,
            IngestOutcome::Malformed => &self.counters.reports_malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, store: &SnapshotStore) -> ExporterHealth {
        let c = &self.counters;
        let (transport_status, open_sessions) = {
            let transport = self.transport.lock();
            let status = if transport.open_sessions > 0 {
                "connected".to_string()
            } else {
                transport.last.clone()
            };
            (status, transport.open_sessions)
        };
        ExporterHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            scrapes_total: c.scrapes_total.load(Ordering::Relaxed),
            scrapes_without_data: c.scrapes_without_data.load(Ordering::Relaxed),
            scrape_failures: c.scrape_failures.load(Ordering::Relaxed),
            connect_failures: c.connect_failures.load(Ordering::Relaxed),
            reports_accepted: c.reports_accepted.load(Ordering::Relaxed),
            reports_ignored: c.reports_ignored.load(Ordering::Relaxed),
            reports_malformed: c.reports_malformed.load(Ordering::Relaxed),
            transport_status,
            open_sessions,
            last_report_at: store
                .last_updated()
                .and_then(|t| t.format(&Rfc3339).ok()),
        }
    }
}
