use crate::collector::{ScrapeCollector, ScrapeOutcome};
use crate::exposition::{ExpositionError, PrometheusSink};
use crate::health::{ExporterHealth, HealthTracker};
use crate::snapshot::TelemetrySnapshot;
use crate::transport::Transport;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::warn;

const INDEX_PAGE: &str = "<html><head><title>BambuLabs Exporter Metrics</title></head><body>\
<h1>BambuLabs Exporter</h1><p><a href='/metrics'>Metrics</a></p></body></html>";

pub struct AppState<T: Transport> {
    pub collector: Arc<ScrapeCollector<T>>,
    pub health: HealthTracker,
    pub scrape_timeout: Duration,
}

impl<T: Transport> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            collector: self.collector.clone(),
            health: self.health.clone(),
            scrape_timeout: self.scrape_timeout,
        }
    }
}

impl<T: Transport> AppState<T> {
    pub fn new(collector: ScrapeCollector<T>, scrape_timeout: Duration) -> Self {
        Self {
            health: collector.health().clone(),
            collector: Arc::new(collector),
            scrape_timeout,
        }
    }
}

#[derive(Serialize)]
struct SnapshotView {
    received_at: String,
    age_seconds: i64,
    snapshot: TelemetrySnapshot,
}

pub fn build_router<T: Transport + 'static>(app_state: AppState<T>) -> Router {
    Router::new()
        .route("/", get(|| async { Html(INDEX_PAGE) }))
        .route("/metrics", get(scrape_metrics::<T>))
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health::<T>))
        .route("/api/snapshot", get(get_snapshot::<T>))
        .with_state(app_state)
}

// GET /metrics: one full connect/collect/disconnect cycle per request
async fn scrape_metrics<T: Transport + 'static>(State(app): State<AppState<T>>) -> Response {
    let body = match render_scrape(&app).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "serving an empty scrape");
            // the collector already counted scrapes that reached it
            if !matches!(e, ExpositionError::Scrape(_) | ExpositionError::Encode(_)) {
                app.health.record_scrape_failure();
            }
            String::new()
        }
    };
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PrometheusSink::content_type())],
        body,
    )
        .into_response()
}

async fn render_scrape<T: Transport>(app: &AppState<T>) -> Result<String, ExpositionError> {
    let mut sink = PrometheusSink::new(app.collector.describe())?;
    let outcome = tokio::time::timeout(app.scrape_timeout, app.collector.collect(&mut sink))
        .await
        .map_err(|_| ExpositionError::Deadline(app.scrape_timeout))??;

    match outcome {
        ScrapeOutcome::Emitted(_) => sink.encode().map_err(ExpositionError::Encode),
        ScrapeOutcome::NoData | ScrapeOutcome::Unreachable => Ok(String::new()),
    }
}

async fn get_system_health<T: Transport + 'static>(
    State(app): State<AppState<T>>,
) -> Json<ExporterHealth> {
    Json(app.health.get_health(app.collector.store()))
}

async fn get_snapshot<T: Transport + 'static>(
    State(app): State<AppState<T>>,
) -> Result<Json<SnapshotView>, StatusCode> {
    let Some((snapshot, received_at)) = app.collector.store().read_with_time() else {
        return Err(StatusCode::NOT_FOUND);
    };
    let age = OffsetDateTime::now_utc() - received_at;
    Ok(Json(SnapshotView {
        received_at: received_at.format(&Rfc3339).unwrap_or_default(),
        age_seconds: age.whole_seconds().max(0),
        snapshot: (*snapshot).clone(),
    }))
}
